//! Wallet management
//!
//! Key pairs, the textual address format and the wallet file. The ledger core
//! only ever sees raw public-key hashes; addresses stay at this edge.

#[allow(clippy::module_inception)]
pub mod wallet;
pub mod wallets;

pub use wallet::{
    address_to_pub_key_hash, convert_address, validate_address, Wallet, ADDRESS_CHECK_SUM_LEN,
};
pub use wallets::{Wallets, WALLET_FILE};
