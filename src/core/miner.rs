//! Background mining
//!
//! Proof of work is CPU-bound, so an append can be handed to a worker thread
//! while the caller keeps serving queries. The commit still goes through
//! [`Blockchain::append_cancellable`], which serializes with every other append.

use crate::core::{Block, Blockchain, Transaction};
use crate::error::{BlockchainError, Result};
use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

pub struct MiningJob {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<Result<Block>>,
}

impl MiningJob {
    pub fn spawn(blockchain: Blockchain, transactions: Vec<Transaction>) -> Result<MiningJob> {
        let cancel = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("miner".to_string())
            .spawn(move || blockchain.append_cancellable(&transactions, &flag))
            .map_err(|e| BlockchainError::Mining(format!("Failed to start mining thread: {e}")))?;
        Ok(MiningJob { cancel, handle })
    }

    /// Asks the worker to stop at its next nonce attempt.
    pub fn cancel(&self) {
        info!("Cancelling mining job");
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and returns the committed block.
    pub fn join(self) -> Result<Block> {
        self.handle
            .join()
            .map_err(|_| BlockchainError::Mining("Mining thread panicked".to_string()))?
    }
}
