//! Error type shared by every module of the wallet core.

use alloy::primitives::B256;
use alloy::providers::MulticallError;
use alloy::transports::{RpcError, TransportError};
use thiserror::Error;

use crate::rpc::errors::describe_rpc_error;

pub const SMART_WALLET_ONLY: &str = "This functionality is only available for SmartWallets.";
pub const PLATFORM_UNAVAILABLE: &str =
    "This functionality is not yet available on your current platform.";

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the wallet core.
///
/// Callers branch on the variant; the rendered message stays stable for UIs that
/// still match on text.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "Please add your active chain to the supported chains list! '{identifier}' is not configured."
    )]
    UnsupportedChain { identifier: String },

    #[error("Incorrect Password!")]
    InvalidCredentials,

    #[error("No Account Connected!")]
    NotConnected,

    #[error("Signature verification failed for {address}")]
    SignatureVerification { address: String },

    #[error("{message}")]
    Unsupported { message: &'static str },

    #[error("Gasless transactions are not enabled. Please enable them in the SDK options.")]
    GaslessNotConfigured,

    #[error("Forward Request Failed!\nError: {body}\nRelayer URL: {relayer_url}")]
    RelayRequestFailed { relayer_url: String, body: String },

    #[error("ABI mismatch: {0}")]
    AbiMismatch(String),

    #[error("Network request failed: {0}")]
    Network(String),

    #[error("Transaction failed: {reason}. Tx hash: {tx_hash:?}")]
    TransactionReverted { tx_hash: B256, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn smart_wallet_only() -> Self {
        Error::Unsupported {
            message: SMART_WALLET_ONLY,
        }
    }

    pub fn platform_unavailable() -> Self {
        Error::Unsupported {
            message: PLATFORM_UNAVAILABLE,
        }
    }

    /// Whether a retry could plausibly succeed. Reverts and unknown methods never will.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Network(message) => {
                let lowered = message.to_lowercase();
                !lowered.contains("revert") && !lowered.contains("does not exist")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::AbiMismatch(format!("malformed response: {e}"))
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        match e {
            RpcError::ErrorResp(payload) => {
                let revert_data = payload.as_revert_data().map(|data| data.to_string());
                Error::Network(format!(
                    "RPC error {}: {}",
                    payload.code,
                    describe_rpc_error(&payload.message, revert_data.as_deref())
                ))
            }
            RpcError::SerError(e) => Error::InvalidInput(format!("unencodable request: {e}")),
            RpcError::DeserError { err, text } => {
                Error::AbiMismatch(format!("malformed response: {err}: {text}"))
            }
            other => Error::Network(other.to_string()),
        }
    }
}

impl From<alloy::contract::Error> for Error {
    fn from(e: alloy::contract::Error) -> Self {
        match e {
            alloy::contract::Error::TransportError(e) => e.into(),
            alloy::contract::Error::AbiError(e) => Error::AbiMismatch(e.to_string()),
            other => Error::AbiMismatch(other.to_string()),
        }
    }
}

impl From<MulticallError> for Error {
    fn from(e: MulticallError) -> Self {
        match e {
            MulticallError::TransportError(e) => e.into(),
            MulticallError::CallFailed(data) => {
                Error::Network(format!("multicall entry reverted with {data}"))
            }
            other => Error::AbiMismatch(other.to_string()),
        }
    }
}

impl From<alloy::signers::Error> for Error {
    fn from(e: alloy::signers::Error) -> Self {
        Error::Signer(e.to_string())
    }
}

impl From<alloy::sol_types::Error> for Error {
    fn from(e: alloy::sol_types::Error) -> Self {
        Error::AbiMismatch(e.to_string())
    }
}

impl From<alloy::dyn_abi::Error> for Error {
    fn from(e: alloy::dyn_abi::Error) -> Self {
        Error::AbiMismatch(e.to_string())
    }
}

impl From<eth_keystore::KeystoreError> for Error {
    fn from(e: eth_keystore::KeystoreError) -> Self {
        match e {
            eth_keystore::KeystoreError::MacMismatch => Error::InvalidCredentials,
            other => Error::Keystore(other.to_string()),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Keystore(e.to_string())
    }
}
