//! Chain metadata lookup.
//!
//! The registry is built once from [`SdkOptions`] and never mutated, so it can be shared
//! freely between tasks.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use std::collections::HashMap;

use crate::config::consts::{
    DEFAULT_EXPLORER_URL, DEFAULT_NATIVE_DECIMALS, DEFAULT_NATIVE_NAME, DEFAULT_NATIVE_SYMBOL,
    UNKNOWN_CHAIN_PREFIX,
};
use crate::config::{SdkOptions, SupportedChain};
use crate::error::{Error, Result};

const RPC_SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainDescriptor {
    /// Chain registries publish ids both as numbers and as strings
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub chain_id: u64,
    #[serde(default)]
    pub rpc_url: String,
    pub name: String,
    #[serde(default = "default_symbol")]
    pub native_currency_symbol: String,
    #[serde(default = "default_native_name")]
    pub native_currency_name: String,
    #[serde(default = "default_decimals")]
    pub native_currency_decimals: u8,
    #[serde(default)]
    pub explorer_urls: Vec<String>,
}

impl ChainDescriptor {
    /// Descriptor for a chain with no published metadata.
    pub fn unknown(chain_id: u64, rpc_url: impl Into<String>) -> Self {
        Self {
            chain_id,
            rpc_url: rpc_url.into(),
            name: format!("{UNKNOWN_CHAIN_PREFIX} {chain_id}"),
            native_currency_symbol: default_symbol(),
            native_currency_name: default_native_name(),
            native_currency_decimals: DEFAULT_NATIVE_DECIMALS,
            explorer_urls: vec![DEFAULT_EXPLORER_URL.to_string()],
        }
    }

    pub fn chain_id_hex(&self) -> String {
        format!("0x{:x}", self.chain_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainRegistry {
    supported: Vec<SupportedChain>,
    known: HashMap<u64, ChainDescriptor>,
}

impl ChainRegistry {
    pub fn new(supported: Vec<SupportedChain>, known: Vec<ChainDescriptor>) -> Self {
        let known = known.into_iter().map(|c| (c.chain_id, c)).collect();
        Self { supported, known }
    }

    pub fn from_options(options: &SdkOptions) -> Self {
        Self::new(options.supported_chains.clone(), options.chains.clone())
    }

    pub fn supported(&self) -> &[SupportedChain] {
        &self.supported
    }

    /// Resolve a chain identifier, or a literal RPC endpoint paired with a chain id.
    pub fn resolve(&self, identifier_or_rpc: &str, chain_id: Option<u64>) -> Result<ChainDescriptor> {
        if RPC_SCHEMES.iter().any(|s| identifier_or_rpc.starts_with(s)) {
            let chain_id = chain_id.ok_or_else(|| {
                Error::InvalidInput(format!(
                    "a chain id is required when connecting to RPC endpoint {identifier_or_rpc}"
                ))
            })?;
            return Ok(self.describe(chain_id, Some(identifier_or_rpc)));
        }

        let supported = self
            .supported
            .iter()
            .find(|c| c.identifier == identifier_or_rpc)
            .ok_or_else(|| Error::UnsupportedChain {
                identifier: identifier_or_rpc.to_string(),
            })?;

        let descriptor = self.describe(supported.chain_id, supported.rpc_url.as_deref());
        if descriptor.rpc_url.is_empty() {
            return Err(Error::Config(format!(
                "no RPC endpoint configured for chain {}",
                supported.identifier
            )));
        }
        Ok(descriptor)
    }

    /// The supported chain with `chain_id`, resolved like its identifier would be.
    pub fn by_chain_id(&self, chain_id: u64) -> Result<ChainDescriptor> {
        let supported = self
            .supported
            .iter()
            .find(|c| c.chain_id == chain_id)
            .ok_or_else(|| Error::UnsupportedChain {
                identifier: chain_id.to_string(),
            })?;
        self.resolve(&supported.identifier, None)
    }

    /// Metadata for `chain_id`, synthesized when the chain is unknown.
    pub fn describe(&self, chain_id: u64, rpc_override: Option<&str>) -> ChainDescriptor {
        let mut descriptor = match self.known.get(&chain_id) {
            Some(known) => known.clone(),
            None => ChainDescriptor::unknown(chain_id, ""),
        };
        if let Some(rpc) = rpc_override {
            descriptor.rpc_url = rpc.to_string();
        }
        if descriptor.explorer_urls.is_empty() {
            descriptor.explorer_urls.push(DEFAULT_EXPLORER_URL.to_string());
        }
        descriptor
    }
}

fn default_symbol() -> String {
    DEFAULT_NATIVE_SYMBOL.to_string()
}

fn default_native_name() -> String {
    DEFAULT_NATIVE_NAME.to_string()
}

fn default_decimals() -> u8 {
    DEFAULT_NATIVE_DECIMALS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ChainRegistry {
        let arb = ChainDescriptor {
            chain_id: 421614,
            rpc_url: "https://sepolia-rollup.arbitrum.io/rpc".to_string(),
            name: "Arbitrum Sepolia".to_string(),
            native_currency_symbol: "ETH".to_string(),
            native_currency_name: "Sepolia Ether".to_string(),
            native_currency_decimals: 18,
            explorer_urls: vec!["https://sepolia.arbiscan.io".to_string()],
        };
        ChainRegistry::new(
            vec![
                SupportedChain {
                    identifier: "arbitrum-sepolia".to_string(),
                    chain_id: 421614,
                    rpc_url: None,
                },
                SupportedChain {
                    identifier: "devnet".to_string(),
                    chain_id: 31337,
                    rpc_url: Some("http://localhost:8545".to_string()),
                },
            ],
            vec![arb],
        )
    }

    #[test]
    fn test_resolve_known_identifier() {
        let chain = registry().resolve("arbitrum-sepolia", None).unwrap();
        assert_eq!(chain.chain_id, 421614);
        assert_eq!(chain.name, "Arbitrum Sepolia");
        assert_eq!(chain.rpc_url, "https://sepolia-rollup.arbitrum.io/rpc");
    }

    #[test]
    fn test_resolve_unsupported_identifier() {
        let err = registry().resolve("goerli", None).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain { ref identifier } if identifier == "goerli"));
        assert!(err
            .to_string()
            .starts_with("Please add your active chain to the supported chains list!"));
    }

    #[test]
    fn test_resolve_unknown_chain_synthesizes_metadata() {
        let chain = registry().resolve("devnet", None).unwrap();
        assert_eq!(chain.name, "Unknown Chain 31337");
        assert_eq!(chain.native_currency_symbol, "ETH");
        assert_eq!(chain.native_currency_decimals, 18);
        assert_eq!(chain.explorer_urls, vec!["https://etherscan.io".to_string()]);
        assert_eq!(chain.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_resolve_literal_rpc_url() {
        let chain = registry()
            .resolve("https://rpc.custom.example", Some(999))
            .unwrap();
        assert_eq!(chain.chain_id, 999);
        assert_eq!(chain.rpc_url, "https://rpc.custom.example");

        assert!(matches!(
            registry().resolve("wss://rpc.custom.example", None),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_by_chain_id() {
        let chain = registry().by_chain_id(31337).unwrap();
        assert_eq!(chain.rpc_url, "http://localhost:8545");

        let err = registry().by_chain_id(1).unwrap_err();
        assert!(matches!(err, Error::UnsupportedChain { ref identifier } if identifier == "1"));
    }

    #[test]
    fn test_descriptor_accepts_string_chain_id() {
        let json = r#"{"chainId":"137","name":"Polygon","explorerUrls":["https://polygonscan.com"]}"#;
        let chain: ChainDescriptor = serde_json::from_str(json).unwrap();
        assert_eq!(chain.chain_id, 137);
        assert_eq!(chain.native_currency_decimals, 18);
        assert_eq!(chain.chain_id_hex(), "0x89");
    }
}
