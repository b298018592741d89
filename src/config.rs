use crate::error::{Result, WalletError};
use alloy_primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::env;
use url::Url;

/// Deployed addresses of the four fixed contracts. Compiled-in configuration,
/// overridable through the environment; never discovered at runtime.
pub const FOREST_TOKEN_ADDRESS: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
pub const CARBON_CREDIT_ADDRESS: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
pub const STABLECOIN_ADDRESS: Address = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
pub const MARKETPLACE_ADDRESS: Address = address!("Cf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: NetworkConfig,
    pub contracts: ContractConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub chain_id: u64,
    pub rpc_url: Url,
    pub is_testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    pub forest_token: Address,
    pub carbon_credit: Address,
    pub stablecoin: Address,
    pub marketplace: Address,
}

/// Tuning for the history reconciler and the block-range log fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Lookback window in blocks; older history is intentionally not visible.
    pub lookback_blocks: u64,
    /// Initial chunk size for the adaptive log fetcher.
    pub initial_step: u64,
    /// Polling cadence for log subscriptions and receipt waits.
    pub poll_interval_seconds: u64,
    /// How many polls to wait for a receipt before treating a send as pending.
    pub receipt_poll_attempts: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let network_name = env::var("CHAIN_NETWORK").unwrap_or_else(|_| "localhost".to_string());
        let chain_id: u64 = env::var("CHAIN_ID")
            .unwrap_or_else(|_| {
                match network_name.as_str() {
                    "mainnet" => "1".to_string(),
                    "sepolia" => "11155111".to_string(),
                    // Hardhat / anvil local chain
                    _ => "31337".to_string(),
                }
            })
            .parse()
            .map_err(|e| WalletError::Config(format!("Invalid chain ID: {e}")))?;

        let rpc_url = env::var("CHAIN_RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:8545".to_string());
        let rpc_url = Url::parse(&rpc_url)
            .map_err(|e| WalletError::Config(format!("Invalid CHAIN_RPC_URL: {e}")))?;

        Ok(Self {
            network: NetworkConfig {
                name: network_name,
                chain_id,
                rpc_url,
                is_testnet: Self::is_testnet(chain_id),
            },
            contracts: ContractConfig {
                forest_token: address_from_env("FOREST_TOKEN_ADDRESS", FOREST_TOKEN_ADDRESS)?,
                carbon_credit: address_from_env("CARBON_CREDIT_ADDRESS", CARBON_CREDIT_ADDRESS)?,
                stablecoin: address_from_env("STABLECOIN_ADDRESS", STABLECOIN_ADDRESS)?,
                marketplace: address_from_env("MARKETPLACE_ADDRESS", MARKETPLACE_ADDRESS)?,
            },
            history: HistoryConfig {
                lookback_blocks: env::var("HISTORY_LOOKBACK_BLOCKS")
                    .unwrap_or_else(|_| "10000".to_string())
                    .parse()
                    .unwrap_or(10_000),
                initial_step: env::var("LOG_FETCH_INITIAL_STEP")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                poll_interval_seconds: env::var("POLL_INTERVAL_SECONDS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()
                    .unwrap_or(5),
                receipt_poll_attempts: env::var("RECEIPT_POLL_ATTEMPTS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()
                    .unwrap_or(3),
            },
        })
    }

    const fn is_testnet(chain_id: u64) -> bool {
        matches!(chain_id, 11_155_111 | 31_337)
    }

    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.as_str().is_empty() {
            return Err(WalletError::Config("CHAIN_RPC_URL is required".to_string()));
        }

        let contracts = &self.contracts;
        for (name, addr) in [
            ("forest token", contracts.forest_token),
            ("carbon credit", contracts.carbon_credit),
            ("stablecoin", contracts.stablecoin),
            ("marketplace", contracts.marketplace),
        ] {
            if addr == Address::ZERO {
                return Err(WalletError::Config(format!("{name} contract address is required")));
            }
        }

        if self.history.initial_step == 0 {
            return Err(WalletError::Config(
                "Log fetch step must be greater than 0".to_string(),
            ));
        }

        if self.history.lookback_blocks == 0 {
            return Err(WalletError::Config(
                "History lookback must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn address_from_env(var: &str, default: Address) -> Result<Address> {
    match env::var(var) {
        Ok(raw) => raw
            .parse::<Address>()
            .map_err(|e| WalletError::InvalidAddress(format!("Invalid {var}: {e}"))),
        Err(_) => Ok(default),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            network: NetworkConfig {
                name: "localhost".to_string(),
                chain_id: 31_337,
                rpc_url: Url::parse("http://127.0.0.1:8545").unwrap(),
                is_testnet: true,
            },
            contracts: ContractConfig::default(),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            forest_token: FOREST_TOKEN_ADDRESS,
            carbon_credit: CARBON_CREDIT_ADDRESS,
            stablecoin: STABLECOIN_ADDRESS,
            marketplace: MARKETPLACE_ADDRESS,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            lookback_blocks: 10_000,
            initial_step: 10,
            poll_interval_seconds: 5,
            receipt_poll_attempts: 3,
        }
    }
}
