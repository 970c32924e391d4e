use anyhow::{bail, Context, Result};
use opw_crypto_pq::SecurityLevel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::address::AddressType;
use crate::cipher::CipherParams;
use crate::network::Network;
use crate::storage::DEFAULT_BACKUP_KEY;

/// Vault file name inside the data directory
pub const VAULT_FILE_NAME: &str = "vault.json";

/// Main configuration for the vault
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Directory holding the vault file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Network used until one is selected in the vault
    #[serde(default)]
    pub network: Network,

    /// Address type for new keyrings
    #[serde(default)]
    pub default_address_type: AddressType,

    /// ML-DSA level for new keyrings
    #[serde(default)]
    pub security_level: SecurityLevel,

    /// Storage key of the duplication backup
    #[serde(default = "default_backup_storage_key")]
    pub backup_storage_key: String,

    /// JSON-RPC endpoint for on-chain linkage checks
    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,

    #[serde(default)]
    pub cipher: CipherConfig,
}

/// Argon2id parameters for new ciphertexts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CipherConfig {
    /// Memory cost in KiB
    #[serde(default = "default_memory_kb")]
    pub memory_kb: u32,

    #[serde(default = "default_iterations")]
    pub iterations: u32,

    #[serde(default = "default_parallelism")]
    pub parallelism: u32,
}

fn default_backup_storage_key() -> String {
    DEFAULT_BACKUP_KEY.to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

fn default_memory_kb() -> u32 {
    CipherParams::default().memory_kb
}

fn default_iterations() -> u32 {
    CipherParams::default().iterations
}

fn default_parallelism() -> u32 {
    CipherParams::default().parallelism
}

impl Default for CipherConfig {
    fn default() -> Self {
        Self {
            memory_kb: default_memory_kb(),
            iterations: default_iterations(),
            parallelism: default_parallelism(),
        }
    }
}

impl CipherConfig {
    pub fn params(&self) -> CipherParams {
        CipherParams {
            memory_kb: self.memory_kb,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            network: Network::default(),
            default_address_type: AddressType::default(),
            security_level: SecurityLevel::default(),
            backup_storage_key: default_backup_storage_key(),
            rpc_url: None,
            rpc_timeout_secs: default_rpc_timeout_secs(),
            cipher: CipherConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from `path` if it exists, defaults otherwise
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.backup_storage_key.is_empty() {
            bail!("backup_storage_key must not be empty");
        }
        if self.backup_storage_key == crate::storage::KEYRING_STATE_KEY
            || self.backup_storage_key == crate::storage::PREFERENCES_KEY
        {
            bail!("backup_storage_key must differ from the vault keys");
        }
        if self.cipher.memory_kb < 8 * self.cipher.parallelism {
            bail!("cipher.memory_kb must be at least 8 * cipher.parallelism");
        }
        if self.cipher.iterations == 0 || self.cipher.parallelism == 0 {
            bail!("cipher.iterations and cipher.parallelism must be positive");
        }
        if self.rpc_timeout_secs == 0 {
            bail!("rpc_timeout_secs must be positive");
        }
        if let Some(url) = &self.rpc_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("rpc_url must be an http(s) URL");
            }
        }
        Ok(())
    }

    pub fn vault_path(&self) -> PathBuf {
        self.data_dir.join(VAULT_FILE_NAME)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }
}

/// Get the default data directory path
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".opwallet-vault")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    default_data_dir().join("config.toml")
}
