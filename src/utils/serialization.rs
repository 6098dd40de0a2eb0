// bincode 2.x with the standard configuration is the single on-disk and digest encoding
use crate::error::{BlockchainError, Result};
use crate::utils::sha256_digest;

pub fn serialize<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    bincode::encode_to_vec(data, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Serialization failed: {e}")))
}

pub fn deserialize<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T> {
    let (data, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| BlockchainError::Serialization(format!("Deserialization failed: {e}")))?;
    Ok(data)
}

/// SHA-256 of a value's canonical encoding.
pub fn digest_of<T: bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    Ok(sha256_digest(serialize(data)?.as_slice()))
}
