use crate::core::blockchain::check_stored_block;
use crate::core::{Blockchain, TXOutput, Transaction};
use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

/// Unspent outputs keyed by `(transaction id, output index)`.
pub type UtxoView = HashMap<(Vec<u8>, usize), TXOutput>;

/// Resolves unspent outputs by walking the chain from tip to genesis.
///
/// Nothing is cached: every query reflects the chain as of the moment its
/// iterator was created.
pub struct UTXOSet {
    blockchain: Blockchain,
}

impl UTXOSet {
    pub fn new(blockchain: Blockchain) -> UTXOSet {
        UTXOSet { blockchain }
    }

    pub fn get_blockchain(&self) -> &Blockchain {
        &self.blockchain
    }

    /// Calls `visit` with every unspent output, newest first.
    ///
    /// Spent indices are collected while walking backward, so an output is reported
    /// only if no later input references it. Transactions inside a block are visited
    /// last-to-first for the same reason. Blocks failing proof of work, or holding a
    /// transaction whose content no longer matches its id, abort the scan.
    fn scan<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Transaction, usize, &TXOutput) -> ControlFlow<()>,
    {
        let pow = self.blockchain.get_proof_of_work();
        // I remember which outputs later inputs consumed as I walk back in time
        let mut spent_txos: HashMap<Vec<u8>, HashSet<usize>> = HashMap::new();

        for block in self.blockchain.iterator() {
            let block = block?;
            check_stored_block(pow, &block)?;

            for tx in block.get_transactions().iter().rev() {
                let spent = spent_txos.get(tx.get_id());
                for (idx, out) in tx.get_vout().iter().enumerate() {
                    if spent.is_some_and(|indices| indices.contains(&idx)) {
                        continue;
                    }
                    if visit(tx, idx, out).is_break() {
                        return Ok(());
                    }
                }

                if tx.is_coinbase() {
                    continue;
                }
                for vin in tx.get_vin() {
                    if let Some(index) = vin.output_index() {
                        spent_txos
                            .entry(vin.get_txid().to_vec())
                            .or_default()
                            .insert(index);
                    }
                }
            }
        }
        Ok(())
    }

    /// Every unspent output locked to `pub_key_hash`, across the entire chain.
    pub fn find_unspent_outputs(&self, pub_key_hash: &[u8]) -> Result<Vec<TXOutput>> {
        let mut utxos = vec![];
        self.scan(|_, _, out| {
            if out.is_locked_with_key(pub_key_hash) {
                utxos.push(out.clone());
            }
            ControlFlow::Continue(())
        })?;
        Ok(utxos)
    }

    pub fn get_balance(&self, pub_key_hash: &[u8]) -> Result<u64> {
        self.find_unspent_outputs(pub_key_hash)?
            .iter()
            .try_fold(0u64, |balance, out| {
                balance
                    .checked_add(out.get_value())
                    .ok_or_else(|| BlockchainError::Transaction("Balance overflow".to_string()))
            })
    }

    /// First-fit selection of outputs owned by `pub_key_hash`, in scan order, until
    /// at least `amount` is accumulated. Returns the accumulated value and the
    /// chosen output indices per hex transaction id. An accumulated value below
    /// `amount` means the whole chain was scanned and funds are insufficient.
    pub fn find_spendable_outputs(
        &self,
        pub_key_hash: &[u8],
        amount: u64,
    ) -> Result<(u64, HashMap<String, Vec<usize>>)> {
        let mut unspent_outputs: HashMap<String, Vec<usize>> = HashMap::new();
        let mut accumulated = 0u64;

        self.scan(|tx, idx, out| {
            if !out.is_locked_with_key(pub_key_hash) {
                return ControlFlow::Continue(());
            }
            accumulated = accumulated.saturating_add(out.get_value());
            unspent_outputs
                .entry(HEXLOWER.encode(tx.get_id()))
                .or_default()
                .push(idx);
            if accumulated >= amount {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        Ok((accumulated, unspent_outputs))
    }

    /// The complete UTXO view of the chain.
    pub fn find_utxo(&self) -> Result<UtxoView> {
        let mut utxo = UtxoView::new();
        self.scan(|tx, idx, out| {
            utxo.insert((tx.get_id().to_vec(), idx), out.clone());
            ControlFlow::Continue(())
        })?;
        Ok(utxo)
    }

    /// Whether an input somewhere on the chain already references output `index`
    /// of `txid`.
    pub fn is_output_spent(&self, txid: &[u8], index: usize) -> Result<bool> {
        let pow = self.blockchain.get_proof_of_work();
        for block in self.blockchain.iterator() {
            let block = block?;
            check_stored_block(pow, &block)?;

            let spent = block
                .get_transactions()
                .iter()
                .filter(|tx| !tx.is_coinbase())
                .flat_map(|tx| tx.get_vin())
                .any(|vin| vin.get_txid() == txid && vin.output_index() == Some(index));
            if spent {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Number of transactions that still have at least one unspent output.
    pub fn count_transactions(&self) -> Result<usize> {
        let utxo = self.find_utxo()?;
        let ids: HashSet<&Vec<u8>> = utxo.keys().map(|(txid, _)| txid).collect();
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ProofOfWork;
    use crate::storage::{KvStore, MemoryStore};
    use crate::wallet::Wallet;
    use std::sync::Arc;

    fn chain_for(owner: &Wallet) -> Blockchain {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let pow = ProofOfWork::new(8).unwrap();
        Blockchain::open_or_create(store, pow, 10, &owner.get_pub_key_hash()).unwrap()
    }

    #[test]
    fn test_spent_output_leaves_the_view() {
        let a = Wallet::new().unwrap();
        let b = Wallet::new().unwrap();
        let chain = chain_for(&a);
        let utxo_set = UTXOSet::new(chain.clone());

        let genesis_tx = chain.iterator().next().unwrap().unwrap().get_transactions()[0].clone();
        assert!(!utxo_set.is_output_spent(genesis_tx.get_id(), 0).unwrap());
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);

        let tx = Transaction::new_transfer(&a, &b.get_pub_key_hash(), 4, &utxo_set).unwrap();
        chain.append(&[tx.clone()]).unwrap();

        assert!(utxo_set.is_output_spent(genesis_tx.get_id(), 0).unwrap());
        assert!(!utxo_set.is_output_spent(tx.get_id(), 0).unwrap());
        assert!(!utxo_set.is_output_spent(tx.get_id(), 1).unwrap());

        let view = utxo_set.find_utxo().unwrap();
        assert_eq!(view.len(), 2);
        assert!(!view.contains_key(&(genesis_tx.get_id().to_vec(), 0)));
        assert_eq!(view[&(tx.get_id().to_vec(), 0)].get_value(), 4);
        assert_eq!(view[&(tx.get_id().to_vec(), 1)].get_value(), 6);
        assert_eq!(utxo_set.count_transactions().unwrap(), 1);
    }

    #[test]
    fn test_spendable_search_stops_once_covered() {
        let a = Wallet::new().unwrap();
        let chain = chain_for(&a);
        for _ in 0..3 {
            let coinbase = Transaction::new_coinbase_tx(&a.get_pub_key_hash(), "", 10).unwrap();
            chain.append(&[coinbase]).unwrap();
        }
        let utxo_set = UTXOSet::new(chain);

        let (accumulated, outputs) = utxo_set
            .find_spendable_outputs(&a.get_pub_key_hash(), 15)
            .unwrap();
        assert_eq!(accumulated, 20);
        assert_eq!(outputs.values().map(Vec::len).sum::<usize>(), 2);

        assert_eq!(utxo_set.get_balance(&a.get_pub_key_hash()).unwrap(), 40);
    }

    #[test]
    fn test_unknown_key_has_nothing() {
        let a = Wallet::new().unwrap();
        let utxo_set = UTXOSet::new(chain_for(&a));

        assert!(utxo_set.find_unspent_outputs(b"nobody").unwrap().is_empty());
        assert_eq!(utxo_set.get_balance(b"nobody").unwrap(), 0);
        let (accumulated, outputs) = utxo_set.find_spendable_outputs(b"nobody", 1).unwrap();
        assert_eq!(accumulated, 0);
        assert!(outputs.is_empty());
    }
}
