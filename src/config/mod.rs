//! Configuration management
//!
//! Defaults, an optional `ledger.toml` and `LEDGER_*` environment variables,
//! resolved once by the binary. Library code receives plain values instead.

pub mod settings;

pub use settings::{Config, Settings, CONFIG_FILE, DEFAULT_SUBSIDY, GLOBAL_CONFIG};
