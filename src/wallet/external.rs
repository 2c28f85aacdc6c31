//! Strategy for wallets that keep their own keys.
//!
//! Every signature and submission is forwarded to a [`ProviderSession`]; the wallet decides
//! whether to approve it.

use alloy::dyn_abi::TypedData;
use alloy::primitives::{Address, Bytes, B256};
use alloy::providers::DynProvider;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::{NetworkSwitchAction, SigningStrategy, StrategyKind};
use crate::error::{Error, Result};
use crate::rpc::{raw_request, ChainContext};
use crate::transaction::TransactionInput;

/// A live session with a wallet that keeps its own keys.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    async fn accounts(&self) -> Result<Vec<Address>> {
        let accounts = self.request("eth_accounts", json!([])).await?;
        Ok(serde_json::from_value(accounts)?)
    }

    /// End the session on the wallet side.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

/// Provider session reached over JSON-RPC, such as a remote signer or a wallet bridge.
pub struct RpcProviderSession {
    provider: DynProvider,
}

impl RpcProviderSession {
    pub fn new(provider: DynProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl ProviderSession for RpcProviderSession {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        raw_request(&self.provider, method, &params).await
    }
}

/// Delegates every signature and submission to an external wallet.
pub struct ExternalProvider {
    session: RwLock<Option<Arc<dyn ProviderSession>>>,
}

impl ExternalProvider {
    pub fn new(session: Arc<dyn ProviderSession>) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    async fn session(&self) -> Result<Arc<dyn ProviderSession>> {
        self.session.read().await.clone().ok_or(Error::NotConnected)
    }

    async fn account(&self) -> Result<Address> {
        self.session()
            .await?
            .accounts()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::NotConnected)
    }
}

fn parse_hex_bytes(value: Value, method: &str) -> Result<Bytes> {
    serde_json::from_value(value)
        .map_err(|e| Error::AbiMismatch(format!("unexpected {method} response: {e}")))
}

#[async_trait]
impl SigningStrategy for ExternalProvider {
    fn kind(&self) -> StrategyKind {
        StrategyKind::ExternalProvider
    }

    async fn address(&self) -> Result<Address> {
        self.account().await
    }

    async fn sign_message(&self, _ctx: &ChainContext, message: &[u8]) -> Result<Bytes> {
        let account = self.account().await?;
        let message = format!("0x{}", hex::encode(message));
        let signature = self
            .session()
            .await?
            .request("personal_sign", json!([message, account]))
            .await?;
        parse_hex_bytes(signature, "personal_sign")
    }

    async fn sign_typed_data(&self, _ctx: &ChainContext, data: &TypedData) -> Result<Bytes> {
        let account = self.account().await?;
        let payload = serde_json::to_string(data)?;
        let signature = self
            .session()
            .await?
            .request("eth_signTypedData_v4", json!([account, payload]))
            .await?;
        parse_hex_bytes(signature, "eth_signTypedData_v4")
    }

    async fn is_connected(&self) -> bool {
        match self.session.read().await.clone() {
            Some(session) => session
                .accounts()
                .await
                .map(|a| !a.is_empty())
                .unwrap_or(false),
            None => false,
        }
    }

    async fn send_transaction(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<B256> {
        input.endpoints()?;
        let mut request = input.to_request();
        if request.chain_id.is_none() {
            request.chain_id = Some(ctx.chain_id);
        }
        let tx_hash = self
            .session()
            .await?
            .request("eth_sendTransaction", json!([request]))
            .await?;
        serde_json::from_value(tx_hash)
            .map_err(|e| Error::AbiMismatch(format!("unexpected eth_sendTransaction response: {e}")))
    }

    fn prepare_network_switch(&self) -> NetworkSwitchAction {
        NetworkSwitchAction::ContinueSwitch
    }

    async fn wallet_request(&self, method: &str, params: Value) -> Result<Value> {
        self.session().await?.request(method, params).await
    }

    async fn disconnect(&self, end_session: bool) -> Result<()> {
        let session = self.session.write().await.take();
        if let (Some(session), true) = (session, end_session) {
            session.disconnect().await?;
            info!("External wallet session ended");
        }
        Ok(())
    }
}
