// The chain store: blocks keyed by their hash plus one mutable tip pointer, kept
// in whatever KvStore I hand it. Every tip move is a single guarded write batch,
// so a block is never stored without the tip following it (or the reverse).

use crate::core::{Block, PrevTransactions, ProofOfWork, Transaction};
use crate::error::{BlockchainError, Result};
use crate::storage::{KvStore, UTXOSet, WriteBatch};
use data_encoding::HEXLOWER;
use log::{info, warn};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, RwLock};

/// Reserved key holding the hash of the newest block.
pub const TIP_BLOCK_HASH_KEY: &[u8] = b"l";

const GENESIS_MEMO: &str = "Genesis block reward";

#[derive(Clone)]
pub struct Blockchain {
    store: Arc<dyn KvStore>,
    pow: ProofOfWork,
    subsidy: u64,
    // Cached copy of the stored tip, refreshed inside every append
    tip_hash: Arc<RwLock<Vec<u8>>>,
    // Serializes read-tip / mine / write-tip across clones of this handle
    append_lock: Arc<Mutex<()>>,
}

impl Blockchain {
    /// Opens the chain held in `store`, failing with `ChainNotFound` if there is none.
    pub fn open(store: Arc<dyn KvStore>, pow: ProofOfWork, subsidy: u64) -> Result<Blockchain> {
        let tip_hash = store
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or(BlockchainError::ChainNotFound)?;

        if store.get(&tip_hash)?.is_none() {
            return Err(BlockchainError::CorruptChain(format!(
                "Tip block {} is missing from the store",
                HEXLOWER.encode(&tip_hash)
            )));
        }

        Ok(Blockchain {
            store,
            pow,
            subsidy,
            tip_hash: Arc::new(RwLock::new(tip_hash)),
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Opens the chain held in `store`, or creates one whose genesis block pays
    /// `subsidy` to `genesis_pub_key_hash`. Genesis block and tip land in one batch.
    pub fn open_or_create(
        store: Arc<dyn KvStore>,
        pow: ProofOfWork,
        subsidy: u64,
        genesis_pub_key_hash: &[u8],
    ) -> Result<Blockchain> {
        if store.get(TIP_BLOCK_HASH_KEY)?.is_some() {
            return Self::open(store, pow, subsidy);
        }

        info!(
            "Creating genesis block for {}",
            HEXLOWER.encode(genesis_pub_key_hash)
        );
        let coinbase_tx =
            Transaction::new_coinbase_tx(genesis_pub_key_hash, GENESIS_MEMO, subsidy)?;
        let genesis = Block::generate_genesis_block(&coinbase_tx, &pow)?;

        let batch = WriteBatch::new()
            .expect(TIP_BLOCK_HASH_KEY, None)
            .put(genesis.get_hash(), genesis.serialize()?.as_slice())
            .put(TIP_BLOCK_HASH_KEY, genesis.get_hash());

        match store.apply(batch) {
            Ok(()) => {}
            // Somebody else created the chain first; theirs wins
            Err(BlockchainError::StaleTip) => {
                warn!("Chain was created concurrently, opening the existing one");
                return Self::open(store, pow, subsidy);
            }
            Err(e) => return Err(e),
        }

        Ok(Blockchain {
            store,
            pow,
            subsidy,
            tip_hash: Arc::new(RwLock::new(genesis.get_hash().to_vec())),
            append_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn get_proof_of_work(&self) -> &ProofOfWork {
        &self.pow
    }

    pub fn get_subsidy(&self) -> u64 {
        self.subsidy
    }

    /// The tip as of this handle's last append, import or chain walk. Use
    /// [`Blockchain::iterator`] to pick up writes made through other handles.
    pub fn get_tip_hash(&self) -> Vec<u8> {
        self.tip_hash
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn set_tip_hash(&self, new_tip_hash: &[u8]) {
        let mut tip_hash = self
            .tip_hash
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *tip_hash = new_tip_hash.to_vec();
    }

    fn read_stored_tip(&self) -> Result<Vec<u8>> {
        self.store
            .get(TIP_BLOCK_HASH_KEY)?
            .ok_or(BlockchainError::ChainNotFound)
    }

    /// Verifies `transactions`, mines a block on the current tip and commits it.
    pub fn append(&self, transactions: &[Transaction]) -> Result<Block> {
        self.append_internal(transactions, None)
    }

    /// Like [`Blockchain::append`], abandoning the attempt with `MiningCancelled`
    /// once `cancel` is set. Nothing is written in that case.
    pub fn append_cancellable(
        &self,
        transactions: &[Transaction],
        cancel: &AtomicBool,
    ) -> Result<Block> {
        self.append_internal(transactions, Some(cancel))
    }

    fn append_internal(
        &self,
        transactions: &[Transaction],
        cancel: Option<&AtomicBool>,
    ) -> Result<Block> {
        let _guard = self.append_lock.lock().map_err(|_| {
            BlockchainError::StorageUnavailable("Append lock poisoned".to_string())
        })?;

        // I read the tip from the store, not the cache: another handle may have moved it
        let tip = self.read_stored_tip()?;
        self.set_tip_hash(&tip);
        self.check_transactions(transactions)?;

        info!("Mining block with {} transactions", transactions.len());
        let block = match cancel {
            Some(flag) => Block::new_block_cancellable(&tip, transactions, &self.pow, flag)?,
            None => Block::new_block(&tip, transactions, &self.pow)?,
        };

        self.commit_block(&block, &tip)?;
        info!("Successfully mined block: {}", block.get_hash_hex());
        Ok(block)
    }

    /// Ingests a block mined elsewhere. It must extend the current tip, carry a
    /// valid proof of work and contain only valid transactions.
    pub fn import_block(&self, block: &Block) -> Result<()> {
        let _guard = self.append_lock.lock().map_err(|_| {
            BlockchainError::StorageUnavailable("Append lock poisoned".to_string())
        })?;

        let tip = self.read_stored_tip()?;
        self.set_tip_hash(&tip);

        if block.get_prev_hash() != tip.as_slice() {
            return Err(BlockchainError::InvalidBlock(format!(
                "Block {} does not extend tip {}",
                block.get_hash_hex(),
                HEXLOWER.encode(&tip)
            )));
        }
        if !self.pow.validate(block) {
            warn!("Rejecting block {}: invalid proof of work", block.get_hash_hex());
            return Err(BlockchainError::InvalidProof(format!(
                "Block {} fails proof-of-work validation",
                block.get_hash_hex()
            )));
        }
        if block.get_transactions().is_empty() {
            return Err(BlockchainError::InvalidBlock(
                "Block must contain at least one transaction".to_string(),
            ));
        }
        self.check_transactions(block.get_transactions())?;

        self.commit_block(block, &tip)?;
        info!("Imported block: {}", block.get_hash_hex());
        Ok(())
    }

    fn commit_block(&self, block: &Block, expected_tip: &[u8]) -> Result<()> {
        let batch = WriteBatch::new()
            .expect(TIP_BLOCK_HASH_KEY, Some(expected_tip))
            .put(block.get_hash(), block.serialize()?.as_slice())
            .put(TIP_BLOCK_HASH_KEY, block.get_hash());
        self.store.apply(batch)?;
        self.set_tip_hash(block.get_hash());
        Ok(())
    }

    // Everything a block's transactions must satisfy against the current chain
    fn check_transactions(&self, transactions: &[Transaction]) -> Result<()> {
        let utxo = UTXOSet::new(self.clone()).find_utxo()?;
        // I track every id already on the chain: the UTXO view is keyed by id, so
        // a second transaction with the same id would shadow the first one's outputs
        let mut known_ids = self.transaction_ids()?;
        let mut spent_in_block: HashSet<(Vec<u8>, usize)> = HashSet::new();

        for (i, tx) in transactions.iter().enumerate() {
            if !tx.has_valid_id() {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction {i} id does not match its content"
                )));
            }
            if !known_ids.insert(tx.get_id().to_vec()) {
                return Err(BlockchainError::Transaction(format!(
                    "Duplicate transaction {}: id already used on the chain or in this block",
                    HEXLOWER.encode(tx.get_id())
                )));
            }

            if tx.is_coinbase() {
                if tx.get_output_value()? != self.subsidy {
                    return Err(BlockchainError::Transaction(format!(
                        "Coinbase transaction {i} must mint exactly {}",
                        self.subsidy
                    )));
                }
                continue;
            }

            let prev_txs = self.resolve_prev_transactions(tx)?;
            if !tx.verify(&prev_txs) {
                return Err(BlockchainError::InvalidSignature(format!(
                    "Transaction {} failed verification",
                    HEXLOWER.encode(tx.get_id())
                )));
            }

            for input in tx.get_vin() {
                let index = input.output_index().ok_or_else(|| {
                    BlockchainError::Transaction(format!("Invalid output index in transaction {i}"))
                })?;
                let output_reference = (input.get_txid().to_vec(), index);

                if !utxo.contains_key(&output_reference) {
                    return Err(BlockchainError::Transaction(format!(
                        "Input already spent: {}:{index}",
                        HEXLOWER.encode(input.get_txid())
                    )));
                }
                if !spent_in_block.insert(output_reference) {
                    return Err(BlockchainError::Transaction(format!(
                        "Double-spending detected in transaction {i}: output {}:{index} \
                         already spent in this block",
                        HEXLOWER.encode(input.get_txid())
                    )));
                }
            }

            let input_value = tx.get_input_value(&prev_txs)?;
            let output_value = tx.get_output_value()?;
            if input_value != output_value {
                return Err(BlockchainError::Transaction(format!(
                    "Transaction balance violation: inputs={input_value}, outputs={output_value}"
                )));
            }
        }
        Ok(())
    }

    // Ids of every transaction stored on the chain
    fn transaction_ids(&self) -> Result<HashSet<Vec<u8>>> {
        let mut ids = HashSet::new();
        for block in self.iterator() {
            for tx in block?.get_transactions() {
                ids.insert(tx.get_id().to_vec());
            }
        }
        Ok(ids)
    }

    /// Backward iterator over the chain, anchored at the stored tip as of this call.
    ///
    /// The tip is read from the store rather than the cached copy, so appends made
    /// through another handle on the same store are seen. A failed read is yielded
    /// as the iterator's only item.
    pub fn iterator(&self) -> BlockchainIterator {
        match self.read_stored_tip() {
            Ok(tip) => {
                self.set_tip_hash(&tip);
                BlockchainIterator::new(tip, self.store.clone())
            }
            Err(e) => BlockchainIterator::failed(e, self.store.clone()),
        }
    }

    /// Backward iterator starting from an arbitrary stored block.
    pub fn iter_from(&self, block_hash: &[u8]) -> BlockchainIterator {
        BlockchainIterator::new(block_hash.to_vec(), self.store.clone())
    }

    pub fn get_block(&self, block_hash: &[u8]) -> Result<Option<Block>> {
        load_block(self.store.as_ref(), block_hash)
    }

    /// Number of blocks above genesis.
    pub fn get_best_height(&self) -> Result<usize> {
        let mut count = 0usize;
        for block in self.iterator() {
            block?;
            count += 1;
        }
        Ok(count.saturating_sub(1))
    }

    pub fn find_transaction(&self, txid: &[u8]) -> Result<Option<Transaction>> {
        for block in self.iterator() {
            let block = block?;
            if let Some(tx) = block
                .get_transactions()
                .iter()
                .find(|tx| tx.get_id() == txid)
            {
                return Ok(Some(tx.clone()));
            }
        }
        Ok(None)
    }

    /// Looks up every transaction `tx` spends from, in a single chain walk.
    pub fn resolve_prev_transactions(&self, tx: &Transaction) -> Result<PrevTransactions> {
        let mut wanted: HashSet<Vec<u8>> = HashSet::new();
        if !tx.is_coinbase() {
            for vin in tx.get_vin() {
                wanted.insert(vin.get_txid().to_vec());
            }
        }

        let mut prev_txs: PrevTransactions = HashMap::new();
        if wanted.is_empty() {
            return Ok(prev_txs);
        }

        for block in self.iterator() {
            let block = block?;
            for candidate in block.get_transactions() {
                if wanted.remove(candidate.get_id()) {
                    prev_txs.insert(HEXLOWER.encode(candidate.get_id()), candidate.clone());
                }
            }
            if wanted.is_empty() {
                return Ok(prev_txs);
            }
        }

        let missing: Vec<String> = wanted.iter().map(|id| HEXLOWER.encode(id)).collect();
        Err(BlockchainError::Transaction(format!(
            "Previous transaction not found: {}",
            missing.join(", ")
        )))
    }

    /// Audits the stored chain from tip to genesis: every block must pass proof of
    /// work, every transaction id must match its content and the walk must end at
    /// a genesis block. Returns the number of blocks.
    pub fn verify_chain(&self) -> Result<usize> {
        let mut count = 0usize;
        let mut reached_genesis = false;
        for block in self.iterator() {
            let block = block?;
            check_stored_block(&self.pow, &block)?;
            reached_genesis = block.is_genesis();
            count += 1;
        }
        if !reached_genesis {
            return Err(BlockchainError::CorruptChain(
                "Chain does not end at a genesis block".to_string(),
            ));
        }
        Ok(count)
    }
}

/// Checks a block read back from the store before anything trusts it.
///
/// The proof of work only commits to transaction ids, so I also recompute every id:
/// content edited under an unchanged id would otherwise pass.
pub(crate) fn check_stored_block(pow: &ProofOfWork, block: &Block) -> Result<()> {
    if !pow.validate(block) {
        return Err(BlockchainError::InvalidProof(format!(
            "Block {} fails proof-of-work validation",
            block.get_hash_hex()
        )));
    }
    if let Some(tx) = block.get_transactions().iter().find(|tx| !tx.has_valid_id()) {
        return Err(BlockchainError::CorruptChain(format!(
            "Transaction {} in block {} does not match its id",
            HEXLOWER.encode(tx.get_id()),
            block.get_hash_hex()
        )));
    }
    Ok(())
}

fn load_block(store: &dyn KvStore, block_hash: &[u8]) -> Result<Option<Block>> {
    match store.get(block_hash)? {
        Some(bytes) => Ok(Some(Block::deserialize(bytes.as_slice())?)),
        None => Ok(None),
    }
}

/// Walks from a captured block hash back to genesis, one stored block per step.
///
/// The starting hash is fixed when the iterator is created, so appends made while
/// it runs are not observed. A missing or unreadable block is yielded as an error
/// and ends the walk.
pub struct BlockchainIterator {
    store: Arc<dyn KvStore>,
    next_hash: Option<Vec<u8>>,
    // Set when the starting tip could not be read
    pending_error: Option<BlockchainError>,
}

impl BlockchainIterator {
    fn new(start_hash: Vec<u8>, store: Arc<dyn KvStore>) -> BlockchainIterator {
        BlockchainIterator {
            store,
            next_hash: Some(start_hash),
            pending_error: None,
        }
    }

    fn failed(error: BlockchainError, store: Arc<dyn KvStore>) -> BlockchainIterator {
        BlockchainIterator {
            store,
            next_hash: None,
            pending_error: Some(error),
        }
    }
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(error) = self.pending_error.take() {
            return Some(Err(error));
        }
        let hash = self.next_hash.take()?;
        match load_block(self.store.as_ref(), &hash) {
            Ok(Some(block)) => {
                if !block.is_genesis() {
                    self.next_hash = Some(block.get_prev_hash().to_vec());
                }
                Some(Ok(block))
            }
            Ok(None) => Some(Err(BlockchainError::CorruptChain(format!(
                "Block {} is missing from the store",
                HEXLOWER.encode(&hash)
            )))),
            Err(e) => Some(Err(e)),
        }
    }
}
