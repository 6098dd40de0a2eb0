use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58_decode, base58_encode, hash_pub_key, new_key_pair, public_key_from_pkcs8,
    sha256_digest,
};
use serde::{Deserialize, Serialize};

const VERSION: u8 = 0x00;
pub const ADDRESS_CHECK_SUM_LEN: usize = 4;

#[derive(Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Wallet {
    pkcs8: Vec<u8>,
    public_key: Vec<u8>,
}

impl Wallet {
    pub fn new() -> Result<Wallet> {
        let pkcs8 = new_key_pair()?;
        let public_key = public_key_from_pkcs8(&pkcs8)?;
        Ok(Wallet { pkcs8, public_key })
    }

    /// version ‖ public-key hash ‖ checksum, base58 encoded
    pub fn get_address(&self) -> String {
        convert_address(self.get_pub_key_hash().as_slice())
    }

    pub fn get_pub_key_hash(&self) -> Vec<u8> {
        hash_pub_key(self.public_key.as_slice())
    }

    pub fn get_public_key(&self) -> &[u8] {
        self.public_key.as_slice()
    }

    pub fn get_pkcs8(&self) -> &[u8] {
        self.pkcs8.as_slice()
    }
}

// First four bytes of a double SHA-256
fn checksum(payload: &[u8]) -> Vec<u8> {
    let first_sha = sha256_digest(payload);
    let second_sha = sha256_digest(first_sha.as_slice());
    second_sha[..ADDRESS_CHECK_SUM_LEN].to_vec()
}

pub fn convert_address(pub_key_hash: &[u8]) -> String {
    let mut payload: Vec<u8> = vec![VERSION];
    payload.extend(pub_key_hash);
    let checksum = checksum(payload.as_slice());
    payload.extend(checksum.as_slice());
    base58_encode(payload.as_slice())
}

/// Decodes an address into the public-key hash outputs are locked to.
pub fn address_to_pub_key_hash(address: &str) -> Result<Vec<u8>> {
    let payload = base58_decode(address)?;
    if payload.len() < ADDRESS_CHECK_SUM_LEN + 2 {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address} is too short"
        )));
    }

    let (body, actual_checksum) = payload.split_at(payload.len() - ADDRESS_CHECK_SUM_LEN);
    if body[0] != VERSION {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address} has unknown version {}",
            body[0]
        )));
    }
    if checksum(body) != actual_checksum {
        return Err(BlockchainError::InvalidAddress(format!(
            "{address} has a bad checksum"
        )));
    }
    Ok(body[1..].to_vec())
}

pub fn validate_address(address: &str) -> bool {
    address_to_pub_key_hash(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip() {
        let wallet = Wallet::new().unwrap();
        let address = wallet.get_address();

        assert!(validate_address(&address));
        assert_eq!(
            address_to_pub_key_hash(&address).unwrap(),
            wallet.get_pub_key_hash()
        );
    }

    #[test]
    fn test_checksum_is_four_bytes() {
        let pub_key_hash = vec![0xAB; 20];
        let payload = base58_decode(&convert_address(&pub_key_hash)).unwrap();
        assert_eq!(payload.len(), 1 + 20 + ADDRESS_CHECK_SUM_LEN);
    }

    #[test]
    fn test_corrupted_address_rejected() {
        let mut payload = base58_decode(&Wallet::new().unwrap().get_address()).unwrap();
        let last = payload.len() - 1;
        payload[last] ^= 0xFF;

        assert!(!validate_address(&base58_encode(&payload)));
        assert!(!validate_address("not-an-address"));
        assert!(!validate_address(""));
    }
}
