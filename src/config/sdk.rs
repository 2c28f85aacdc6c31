use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

use crate::chain::ChainDescriptor;
use crate::config::consts::{
    DEFAULT_FORWARDER_ADDRESS, DEFAULT_FORWARDER_DOMAIN_NAME, DEFAULT_FORWARDER_DOMAIN_VERSION,
    DEFAULT_KEYSTORE_FILE,
};
use crate::error::Result;

/// A chain the application has opted into, optionally with its own RPC endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupportedChain {
    pub identifier: String,
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_url: Option<String>,
}

/// OpenZeppelin Defender style relayer used for forwarder meta-transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaslessOptions {
    pub relayer_url: String,
    #[serde(default = "default_forwarder_address")]
    pub forwarder_address: Address,
    #[serde(default = "default_forwarder_domain_name")]
    pub domain_name: String,
    #[serde(default = "default_forwarder_domain_version")]
    pub domain_version: String,
}

impl GaslessOptions {
    pub fn new(relayer_url: impl Into<String>) -> Self {
        Self {
            relayer_url: relayer_url.into(),
            forwarder_address: default_forwarder_address(),
            domain_name: default_forwarder_domain_name(),
            domain_version: default_forwarder_domain_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartWalletOptions {
    pub factory_address: Address,
    pub entry_point_address: Address,
    /// ERC-4337 bundler endpoint; without one, calls are routed through the account's execute
    #[serde(default)]
    pub bundler_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub gasless: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WalletOptions {
    /// Directory holding the encrypted local account
    #[serde(default)]
    pub keystore_dir: Option<PathBuf>,
    /// Password fallback when the caller supplies none
    #[serde(default)]
    pub device_id: Option<String>,
}

impl WalletOptions {
    pub fn keystore_path(&self) -> PathBuf {
        self.keystore_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_KEYSTORE_FILE)
    }
}

/// Top-level options of an SDK instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkOptions {
    pub active_chain: String,
    #[serde(default)]
    pub supported_chains: Vec<SupportedChain>,
    /// Metadata for known chains, keyed by chain id
    #[serde(default)]
    pub chains: Vec<ChainDescriptor>,
    #[serde(default)]
    pub gasless: Option<GaslessOptions>,
    #[serde(default)]
    pub smart_wallet: Option<SmartWalletOptions>,
    #[serde(default)]
    pub wallet: WalletOptions,
}

impl SdkOptions {
    pub fn new(active_chain: impl Into<String>) -> Self {
        Self {
            active_chain: active_chain.into(),
            supported_chains: Vec::new(),
            chains: Vec::new(),
            gasless: None,
            smart_wallet: None,
            wallet: WalletOptions::default(),
        }
    }

    pub fn with_supported_chain(mut self, chain: SupportedChain) -> Self {
        self.supported_chains.push(chain);
        self
    }

    pub fn with_gasless(mut self, gasless: GaslessOptions) -> Self {
        self.gasless = Some(gasless);
        self
    }

    pub fn with_smart_wallet(mut self, smart_wallet: SmartWalletOptions) -> Self {
        self.smart_wallet = Some(smart_wallet);
        self
    }
}

pub fn load_options_from_path<P: AsRef<Path>>(path: P) -> Result<SdkOptions> {
    let s = fs::read_to_string(path)?;
    let options: SdkOptions = toml::from_str(&s)?;
    Ok(options)
}

fn default_forwarder_address() -> Address {
    DEFAULT_FORWARDER_ADDRESS
}

fn default_forwarder_domain_name() -> String {
    DEFAULT_FORWARDER_DOMAIN_NAME.to_string()
}

fn default_forwarder_domain_version() -> String {
    DEFAULT_FORWARDER_DOMAIN_VERSION.to_string()
}
