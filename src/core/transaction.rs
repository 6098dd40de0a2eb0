// Value moves through the ledger as transactions in the UTXO model: each one
// consumes earlier outputs through its inputs and creates new outputs.
// Spend authorization is ECDSA P-256: an output is locked to a public-key hash and
// the spending input carries the matching public key plus a signature.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, digest_of, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify,
    hash_pub_key, serialize,
};
use crate::wallet::Wallet;
use data_encoding::HEXLOWER;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Output index carried by the single input of a coinbase transaction.
pub const COINBASE_VOUT: i64 = -1;

/// Previously committed transactions referenced by a transaction's inputs, keyed by hex id.
pub type PrevTransactions = HashMap<String, Transaction>;

// A reference to output #vout of transaction txid, plus the proof that I may spend it
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    /// An unsigned input spending `txid:vout` with the raw public key of the owner.
    pub fn new(txid: &[u8], vout: usize, pub_key: &[u8]) -> TXInput {
        TXInput {
            txid: txid.to_vec(),
            vout: vout as i64,
            signature: vec![],
            pub_key: pub_key.to_vec(),
        }
    }

    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    pub fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

// An amount locked to whoever holds the key behind pub_key_hash
#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    pub fn new(value: u64, pub_key_hash: &[u8]) -> Result<TXOutput> {
        if value == 0 {
            return Err(BlockchainError::Transaction(
                "Transaction value must be positive".to_string(),
            ));
        }
        if pub_key_hash.is_empty() {
            return Err(BlockchainError::InvalidAddress(
                "Output must be locked to a public key hash".to_string(),
            ));
        }
        Ok(TXOutput {
            value,
            pub_key_hash: pub_key_hash.to_vec(),
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

/// Everything a transaction id commits to. `id` is not part of it, so the
/// digest never depends on a previous id value.
#[derive(bincode::Encode)]
struct TransactionContent {
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Assembles a transaction from explicit inputs and outputs and assigns its id.
    pub fn new(vin: Vec<TXInput>, vout: Vec<TXOutput>) -> Result<Transaction> {
        if vout.is_empty() {
            return Err(BlockchainError::Transaction(
                "Transaction must have at least one output".to_string(),
            ));
        }
        let mut tx = Transaction {
            id: vec![],
            vin,
            vout,
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Mints `subsidy` to `to`. An empty memo is replaced with random bytes so two
    /// coinbases paying the same key never share an id.
    pub fn new_coinbase_tx(to: &[u8], memo: &str, subsidy: u64) -> Result<Transaction> {
        let txout = TXOutput::new(subsidy, to)?;
        let memo = if memo.is_empty() {
            Uuid::new_v4().as_bytes().to_vec()
        } else {
            memo.as_bytes().to_vec()
        };
        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: memo,
            pub_key: vec![],
        };
        Transaction::new(vec![tx_input], vec![txout])
    }

    /// Builds and signs a transfer of `amount` from the wallet's key to `to`.
    ///
    /// Outputs are taken first-fit in the resolver's scan order until they cover
    /// `amount`; anything above it comes back to the sender as a change output.
    pub fn new_transfer(
        from: &Wallet,
        to: &[u8],
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let from_pub_key_hash = hash_pub_key(from.get_public_key());
        let (accumulated, valid_outputs) =
            utxo_set.find_spendable_outputs(from_pub_key_hash.as_slice(), amount)?;

        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let mut inputs = vec![];
        for (txid_hex, outs) in valid_outputs {
            let txid = HEXLOWER.decode(txid_hex.as_bytes()).map_err(|e| {
                BlockchainError::Transaction(format!("Invalid transaction ID: {e}"))
            })?;
            for out in outs {
                inputs.push(TXInput::new(txid.as_slice(), out, from.get_public_key()));
            }
        }

        // I send the excess back to the sender as change
        let mut outputs = vec![TXOutput::new(amount, to)?];
        let change = accumulated - amount;
        if change > 0 {
            outputs.push(TXOutput::new(change, from_pub_key_hash.as_slice())?);
        }

        let mut tx = Transaction::new(inputs, outputs)?;
        let prev_txs = utxo_set
            .get_blockchain()
            .resolve_prev_transactions(&tx)?;
        tx.sign(from.get_pkcs8(), &prev_txs)?;
        Ok(tx)
    }

    /// The output an input refers to, when it is present in `prev_txs`.
    fn prev_output<'a>(prev_txs: &'a PrevTransactions, vin: &TXInput) -> Option<&'a TXOutput> {
        let prev_tx = prev_txs.get(&HEXLOWER.encode(vin.get_txid()))?;
        prev_tx.vout.get(vin.output_index()?)
    }

    // Every input's authorization cleared; the starting point of each per-input view
    fn trimmed_copy(&self) -> Transaction {
        let vin = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: vec![],
            vin,
            vout: self.vout.clone(),
        }
    }

    /// Digest signed for input `idx`: that input carries the lock of the output it
    /// spends, every other input is cleared.
    fn signing_digest(
        trimmed: &mut Transaction,
        idx: usize,
        prev_out: &TXOutput,
    ) -> Result<Vec<u8>> {
        trimmed.vin[idx].pub_key = prev_out.pub_key_hash.clone();
        let digest = trimmed.hash();
        trimmed.vin[idx].pub_key = vec![];
        digest
    }

    /// Signs every input with `pkcs8` and refreshes the id. Coinbases are left untouched.
    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        // I sign each input against its own view of the transaction
        let mut trimmed = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let prev_out = Self::prev_output(prev_txs, &self.vin[idx]).ok_or_else(|| {
                BlockchainError::Transaction(format!(
                    "Previous output {}:{} not found",
                    HEXLOWER.encode(self.vin[idx].get_txid()),
                    self.vin[idx].vout
                ))
            })?;
            let digest = Self::signing_digest(&mut trimmed, idx, prev_out)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, digest.as_slice())?;
        }

        // The signatures are part of the content now, so I refresh the id
        self.id = self.hash()?;
        Ok(())
    }

    /// Checks every input's signature against its own digest. Fails closed: a
    /// missing previous output, a key that does not own the output, or a bad
    /// signature on any input makes the whole transaction invalid.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> bool {
        if self.is_coinbase() {
            return self.verify_coinbase();
        }
        if self.vin.is_empty() {
            return false;
        }

        let mut trimmed = self.trimmed_copy();
        for (idx, vin) in self.vin.iter().enumerate() {
            let prev_out = match Self::prev_output(prev_txs, vin) {
                Some(out) => out,
                None => {
                    debug!("Input {idx} references an unknown output");
                    return false;
                }
            };

            if !vin.uses_key(prev_out.get_pub_key_hash()) {
                debug!("Input {idx} is signed by a key that does not own the output");
                return false;
            }

            let digest = match Self::signing_digest(&mut trimmed, idx, prev_out) {
                Ok(digest) => digest,
                Err(_) => return false,
            };
            if !ecdsa_p256_sha256_sign_verify(
                vin.pub_key.as_slice(),
                vin.signature.as_slice(),
                digest.as_slice(),
            ) {
                debug!("Signature check failed for input {idx}");
                return false;
            }
        }
        true
    }

    fn verify_coinbase(&self) -> bool {
        !self.vout.is_empty() && self.vout.iter().all(|out| out.value > 0)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// SHA-256 of the transaction content, `id` excluded.
    pub fn hash(&self) -> Result<Vec<u8>> {
        digest_of(&TransactionContent {
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        })
    }

    /// Whether the stored id still matches the content.
    pub fn has_valid_id(&self) -> bool {
        matches!(self.hash(), Ok(hash) if hash == self.id)
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn get_output_value(&self) -> Result<u64> {
        self.vout.iter().try_fold(0u64, |total, out| {
            total
                .checked_add(out.value)
                .ok_or_else(|| BlockchainError::Transaction("Output value overflow".to_string()))
        })
    }

    /// Total value of the outputs this transaction spends.
    pub fn get_input_value(&self, prev_txs: &PrevTransactions) -> Result<u64> {
        if self.is_coinbase() {
            return Ok(0);
        }
        self.vin.iter().try_fold(0u64, |total, vin| {
            let prev_out = Self::prev_output(prev_txs, vin).ok_or_else(|| {
                BlockchainError::Transaction("Previous transaction not found".to_string())
            })?;
            total
                .checked_add(prev_out.value)
                .ok_or_else(|| BlockchainError::Transaction("Input value overflow".to_string()))
        })
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{new_key_pair, public_key_from_pkcs8};

    struct Key {
        pkcs8: Vec<u8>,
        public_key: Vec<u8>,
    }

    impl Key {
        fn generate() -> Key {
            let pkcs8 = new_key_pair().unwrap();
            let public_key = public_key_from_pkcs8(&pkcs8).unwrap();
            Key { pkcs8, public_key }
        }

        fn pub_key_hash(&self) -> Vec<u8> {
            hash_pub_key(&self.public_key)
        }
    }

    fn prev_map(txs: &[&Transaction]) -> PrevTransactions {
        txs.iter()
            .map(|tx| (HEXLOWER.encode(tx.get_id()), (*tx).clone()))
            .collect()
    }

    // Coinbase to `owner`, then an unsigned spend of it paying 4 to `to` and 6 back
    fn funded_spend(owner: &Key, to: &[u8]) -> (Transaction, Transaction) {
        let coinbase = Transaction::new_coinbase_tx(&owner.pub_key_hash(), "genesis", 10).unwrap();
        let spend = Transaction::new(
            vec![TXInput::new(coinbase.get_id(), 0, &owner.public_key)],
            vec![
                TXOutput::new(4, to).unwrap(),
                TXOutput::new(6, &owner.pub_key_hash()).unwrap(),
            ],
        )
        .unwrap();
        (coinbase, spend)
    }

    #[test]
    fn test_coinbase_structure() {
        let tx = Transaction::new_coinbase_tx(b"pkh-a", "", 10).unwrap();

        assert!(tx.is_coinbase());
        assert_eq!(tx.get_vin().len(), 1);
        assert!(tx.get_vin()[0].get_txid().is_empty());
        assert_eq!(tx.get_vin()[0].get_vout(), COINBASE_VOUT);
        assert_eq!(tx.get_vout()[0].get_value(), 10);
        assert!(tx.get_vout()[0].is_locked_with_key(b"pkh-a"));
        assert!(tx.verify(&PrevTransactions::new()));
    }

    #[test]
    fn test_coinbases_without_memo_get_distinct_ids() {
        let a = Transaction::new_coinbase_tx(b"pkh-a", "", 10).unwrap();
        let b = Transaction::new_coinbase_tx(b"pkh-a", "", 10).unwrap();
        assert_ne!(a.get_id(), b.get_id());
    }

    #[test]
    fn test_id_is_stable_under_reserialization() {
        let tx = Transaction::new_coinbase_tx(b"pkh-a", "memo", 10).unwrap();
        let decoded = Transaction::deserialize(&tx.serialize().unwrap()).unwrap();

        assert_eq!(decoded, tx);
        assert_eq!(decoded.hash().unwrap(), tx.get_id());
        assert!(decoded.has_valid_id());
    }

    #[test]
    fn test_id_changes_with_content() {
        let tx = Transaction::new_coinbase_tx(b"pkh-a", "memo", 10).unwrap();

        let mut changed_value = tx.clone();
        changed_value.vout[0].value = 11;
        assert_ne!(changed_value.hash().unwrap(), tx.get_id());
        assert!(!changed_value.has_valid_id());

        let mut changed_lock = tx.clone();
        changed_lock.vout[0].pub_key_hash = b"pkh-b".to_vec();
        assert_ne!(changed_lock.hash().unwrap(), tx.get_id());

        let mut changed_input = tx.clone();
        changed_input.vin[0].signature = b"other memo".to_vec();
        assert_ne!(changed_input.hash().unwrap(), tx.get_id());
    }

    #[test]
    fn test_zero_value_output_rejected() {
        assert!(TXOutput::new(0, b"pkh").is_err());
    }

    #[test]
    fn test_sign_then_verify() {
        let owner = Key::generate();
        let (coinbase, mut spend) = funded_spend(&owner, b"pkh-b");
        let prev = prev_map(&[&coinbase]);

        spend.sign(&owner.pkcs8, &prev).unwrap();

        assert!(!spend.is_coinbase());
        assert!(spend.has_valid_id());
        assert!(spend.verify(&prev));
    }

    #[test]
    fn test_altered_output_fails_verification() {
        let owner = Key::generate();
        let (coinbase, mut spend) = funded_spend(&owner, b"pkh-b");
        let prev = prev_map(&[&coinbase]);
        spend.sign(&owner.pkcs8, &prev).unwrap();

        spend.vout[0].value = 5;
        assert!(!spend.verify(&prev));
    }

    #[test]
    fn test_signature_by_foreign_key_fails() {
        let owner = Key::generate();
        let thief = Key::generate();
        let (coinbase, _) = funded_spend(&owner, b"pkh-b");
        let prev = prev_map(&[&coinbase]);

        // The thief claims the owner's output with their own key
        let mut stolen = Transaction::new(
            vec![TXInput::new(coinbase.get_id(), 0, &thief.public_key)],
            vec![TXOutput::new(10, &thief.pub_key_hash()).unwrap()],
        )
        .unwrap();
        stolen.sign(&thief.pkcs8, &prev).unwrap();
        assert!(!stolen.verify(&prev));

        // Or with the owner's public key but a signature it cannot produce
        let mut forged = Transaction::new(
            vec![TXInput::new(coinbase.get_id(), 0, &owner.public_key)],
            vec![TXOutput::new(10, &thief.pub_key_hash()).unwrap()],
        )
        .unwrap();
        forged.sign(&thief.pkcs8, &prev).unwrap();
        assert!(!forged.verify(&prev));
    }

    #[test]
    fn test_each_input_signs_its_own_digest() {
        let owner = Key::generate();
        let first = Transaction::new_coinbase_tx(&owner.pub_key_hash(), "one", 10).unwrap();
        let second = Transaction::new_coinbase_tx(&owner.pub_key_hash(), "two", 10).unwrap();
        let prev = prev_map(&[&first, &second]);

        let mut spend = Transaction::new(
            vec![
                TXInput::new(first.get_id(), 0, &owner.public_key),
                TXInput::new(second.get_id(), 0, &owner.public_key),
            ],
            vec![TXOutput::new(20, b"pkh-b").unwrap()],
        )
        .unwrap();
        spend.sign(&owner.pkcs8, &prev).unwrap();
        assert!(spend.verify(&prev));

        // Swapping the signatures between inputs must break both
        let mut swapped = spend.clone();
        let sig0 = swapped.vin[0].signature.clone();
        swapped.vin[0].signature = swapped.vin[1].signature.clone();
        swapped.vin[1].signature = sig0;
        assert!(!swapped.verify(&prev));
    }

    #[test]
    fn test_missing_previous_transaction_fails_closed() {
        let owner = Key::generate();
        let (coinbase, mut spend) = funded_spend(&owner, b"pkh-b");
        spend.sign(&owner.pkcs8, &prev_map(&[&coinbase])).unwrap();

        assert!(!spend.verify(&PrevTransactions::new()));
        assert!(spend.sign(&owner.pkcs8, &PrevTransactions::new()).is_err());
    }

    #[test]
    fn test_input_and_output_values() {
        let owner = Key::generate();
        let (coinbase, spend) = funded_spend(&owner, b"pkh-b");
        let prev = prev_map(&[&coinbase]);

        assert_eq!(spend.get_input_value(&prev).unwrap(), 10);
        assert_eq!(spend.get_output_value().unwrap(), 10);
        assert_eq!(coinbase.get_input_value(&prev).unwrap(), 0);
    }
}
