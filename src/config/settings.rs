use crate::core::DEFAULT_DIFFICULTY_BITS;
use crate::error::{BlockchainError, Result};
use crate::wallet::WALLET_FILE;
use log::info;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::new);

pub const CONFIG_FILE: &str = "ledger.toml";
pub const DEFAULT_SUBSIDY: u64 = 10;

const CONFIG_PATH_KEY: &str = "LEDGER_CONFIG";
const DATA_DIR_KEY: &str = "LEDGER_DATA_DIR";
const DIFFICULTY_BITS_KEY: &str = "LEDGER_DIFFICULTY_BITS";
const SUBSIDY_KEY: &str = "LEDGER_SUBSIDY";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub difficulty_bits: u32,
    pub subsidy: u64,
    pub wallet_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            data_dir: PathBuf::from("data"),
            difficulty_bits: DEFAULT_DIFFICULTY_BITS,
            subsidy: DEFAULT_SUBSIDY,
            wallet_file: WALLET_FILE.to_string(),
        }
    }
}

impl Settings {
    pub fn from_toml_str(contents: &str) -> Result<Settings> {
        let settings: Settings = toml::from_str(contents)
            .map_err(|e| BlockchainError::Config(format!("Invalid config file: {e}")))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Overrides fields from variables returned by `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_KEY) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(bits) = lookup(DIFFICULTY_BITS_KEY) {
            self.difficulty_bits = bits.trim().parse().map_err(|_| {
                BlockchainError::Config(format!(
                    "{DIFFICULTY_BITS_KEY} must be a number, got {bits}"
                ))
            })?;
        }
        if let Some(subsidy) = lookup(SUBSIDY_KEY) {
            self.subsidy = subsidy.trim().parse().map_err(|_| {
                BlockchainError::Config(format!("{SUBSIDY_KEY} must be a number, got {subsidy}"))
            })?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.difficulty_bits == 0 || self.difficulty_bits >= 256 {
            return Err(BlockchainError::Config(format!(
                "difficulty_bits must be between 1 and 255, got {}",
                self.difficulty_bits
            )));
        }
        if self.subsidy == 0 {
            return Err(BlockchainError::Config(
                "subsidy must be positive".to_string(),
            ));
        }
        if self.wallet_file.is_empty() {
            return Err(BlockchainError::Config(
                "wallet_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Config {
    inner: RwLock<Settings>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Config {
        Config {
            inner: RwLock::new(Settings::default()),
        }
    }

    /// Loads `ledger.toml` (or the file named by `LEDGER_CONFIG`) and then the
    /// `LEDGER_*` environment variables on top of the defaults.
    pub fn load_from_environment(&self) -> Result<()> {
        let explicit = env::var(CONFIG_PATH_KEY).ok().map(PathBuf::from);
        let path = explicit.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut settings = if path.exists() {
            info!("Loading configuration from {}", path.display());
            Settings::from_toml_str(&fs::read_to_string(&path)?)?
        } else if explicit.is_some() {
            return Err(BlockchainError::Config(format!(
                "Config file {} does not exist",
                path.display()
            )));
        } else {
            Settings::default()
        };

        settings.apply_overrides(|key| env::var(key).ok())?;
        self.set(settings);
        Ok(())
    }

    pub fn get(&self) -> Settings {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set(&self, settings: Settings) {
        *self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = settings;
    }

    pub fn get_data_dir(&self) -> PathBuf {
        self.get().data_dir
    }

    pub fn get_chain_path(&self) -> PathBuf {
        self.get_data_dir().join("chain")
    }

    pub fn get_wallet_path(&self) -> PathBuf {
        let settings = self.get();
        let wallet_file = Path::new(&settings.wallet_file);
        if wallet_file.is_absolute() {
            wallet_file.to_path_buf()
        } else {
            settings.data_dir.join(wallet_file)
        }
    }

    pub fn get_difficulty_bits(&self) -> u32 {
        self.get().difficulty_bits
    }

    pub fn get_subsidy(&self) -> u64 {
        self.get().subsidy
    }
}
