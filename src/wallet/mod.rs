//! Signing strategies.
//!
//! A [`SigningStrategy`] owns whatever credential material it needs and is the only
//! place signatures are produced. The session holds exactly one strategy at a time and
//! never touches key material itself.

use alloy::dyn_abi::TypedData;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::consts::FALLBACK_DEVICE_ID;
use crate::error::{Error, Result};
use crate::rpc::ChainContext;
use crate::transaction::TransactionInput;

pub mod display;
pub mod external;
pub mod local_key;
pub mod smart_account;

pub use external::{ExternalProvider, ProviderSession, RpcProviderSession};
pub use local_key::LocalKey;
pub use smart_account::{SignerInfo, SmartAccount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    LocalKey,
    ExternalProvider,
    SmartAccount,
}

/// How a strategy wants a chain switch to be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkSwitchAction {
    /// The wallet must be asked to switch via `wallet_switchEthereumChain`.
    ContinueSwitch,
    /// The strategy follows the session's RPC endpoint; nothing to ask the wallet.
    Handled,
    Unsupported,
}

#[async_trait]
pub trait SigningStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Address that transactions are sent from.
    async fn address(&self) -> Result<Address>;

    /// Address of the key that actually signs. Differs from `address` for smart accounts.
    async fn signer_address(&self) -> Result<Address> {
        self.address().await
    }

    /// EIP-191 personal message signature.
    async fn sign_message(&self, ctx: &ChainContext, message: &[u8]) -> Result<Bytes>;

    async fn sign_typed_data(&self, ctx: &ChainContext, data: &TypedData) -> Result<Bytes>;

    /// Typed data signed by the underlying key, bypassing any account wrapping.
    async fn sign_typed_data_as_signer(
        &self,
        ctx: &ChainContext,
        data: &TypedData,
    ) -> Result<Bytes> {
        self.sign_typed_data(ctx, data).await
    }

    async fn is_connected(&self) -> bool;

    /// Sign and submit. Runs inside the caller's nonce lock.
    async fn send_transaction(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<B256>;

    fn prepare_network_switch(&self) -> NetworkSwitchAction;

    /// Wallet-level JSON-RPC such as `wallet_switchEthereumChain`.
    async fn wallet_request(&self, _method: &str, _params: Value) -> Result<Value> {
        Err(Error::platform_unavailable())
    }

    async fn disconnect(&self, end_session: bool) -> Result<()>;

    fn as_smart_account(&self) -> Option<&SmartAccount> {
        None
    }
}

/// Stable identifier of this machine, used as the default keystore password.
pub fn device_id() -> String {
    let source = std::fs::read_to_string("/etc/machine-id")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| FALLBACK_DEVICE_ID.to_string());

    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Recover the signer of an EIP-191 personal message.
pub fn recover_address(message: &[u8], signature: &[u8]) -> Result<Address> {
    let signature = crate::eip712::parse_signature(signature)?;
    signature
        .recover_address_from_msg(message)
        .map_err(|e| Error::Signer(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_is_stable_hex() {
        let first = device_id();
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(first, device_id());
    }

    #[test]
    fn test_recover_address_rejects_garbage() {
        assert!(recover_address(b"hello", &[1u8; 10]).is_err());
    }
}
