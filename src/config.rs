use crate::ethereum::utils::validate_address;
use alloy::primitives::Address;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: NetworkConfig,
    pub contract: ContractConfig,
    pub signer: SignerConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub gas: GasConfig,
}

/// Unset values are resolved through the node at submission time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GasConfig {
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    pub address: String,
    /// ABI or compiler artifact replacing the built-in Counter interface
    pub abi_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Environment variable holding the hex private key
    pub private_key_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub poll_interval_ms: u64,
    pub buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://1rpc.io/sepolia".to_string(),
            chain_id: 11155111,
            gas: GasConfig::default(),
        }
    }
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: "0xe09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640".to_string(),
            abi_path: None,
        }
    }
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            private_key_env: "private_key".to_string(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 4000,
            buffer: 256,
        }
    }
}

impl FeedConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {:?}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {:?}: {}", path, e))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        if let Some(parent) = path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    anyhow!("Failed to create config directory {:?}: {}", parent, e)
                })?;
            }
        }

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {:?}: {}", path, e))?;

        Ok(())
    }

    /// Load configuration with fallback to default
    pub async fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Self {
        let mut config = match path {
            Some(path) => match Self::load_from_file(path).await {
                Ok(config) => {
                    tracing::info!("Loaded configuration from file");
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to load config file, using defaults: {}", e);
                    Self::default()
                }
            },
            None => Self::default(),
        };

        config.apply_env_vars();
        config
    }

    fn apply_env_vars(&mut self) {
        self.apply_rpc_override(std::env::var("RPC_URL").ok());
    }

    fn apply_rpc_override(&mut self, rpc_url: Option<String>) {
        if let Some(url) = rpc_url.filter(|u| !u.trim().is_empty()) {
            tracing::info!("Using RPC_URL environment variable for the RPC endpoint");
            self.network.rpc_url = url;
        }
    }

    /// The configured contract address, validated
    pub fn contract_address(&self) -> Result<Address> {
        validate_address(&self.contract.address)
            .map_err(|e| anyhow!("Invalid contract address in configuration: {}", e))
    }

    /// Get default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("contract-bind").join("config.toml"))
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let sample_config = r#"# contract-bind configuration file

[network]
rpc_url = "https://1rpc.io/sepolia"
chain_id = 11155111

[network.gas]
# Omit to estimate through the node
# gas_limit = 100000
# Omit to use the node's suggested price
# gas_price = 20_000_000_000  # 20 Gwei

[contract]
address = "0xe09d7Ce1107Dc37C9c20d8019DD1786Ca82F6640"
# ABI or compiler artifact to bind instead of the built-in Counter interface
# abi_path = "out/Counter.sol/Counter.json"

[signer]
# Environment variable holding the hex-encoded private key
private_key_env = "private_key"

[feed]
poll_interval_ms = 4000
buffer = 256

# Environment variables that can be used:
# RPC_URL - Overrides network.rpc_url
"#;
        sample_config.to_string()
    }
}
