//! Node access.
//!
//! Every chain is reached through an alloy [`DynProvider`]. [`ProviderFactory`] builds one per
//! RPC endpoint, so the session can rebind on network switch and tests can substitute the
//! in-memory node from `mock`.

use alloy::providers::{DynProvider, Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::transports::http::{reqwest, Http};
use serde_json::{value::to_raw_value, Value};
use std::borrow::Cow;
use tracing::debug;

use crate::error::{Error, Result};

pub mod errors;
pub mod interceptor;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

/// Builds a provider for an endpoint; used again whenever the session switches networks.
pub trait ProviderFactory: Send + Sync {
    fn connect(&self, rpc_url: &str) -> Result<DynProvider>;
}

/// JSON-RPC over HTTP(S).
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpProviderFactory;

impl ProviderFactory for HttpProviderFactory {
    fn connect(&self, rpc_url: &str) -> Result<DynProvider> {
        http_provider(rpc_url, &[])
    }
}

/// HTTP provider that attaches `headers` to every request, e.g. a bundler API key.
pub fn http_provider(rpc_url: &str, headers: &[(&str, &str)]) -> Result<DynProvider> {
    let url: reqwest::Url = rpc_url
        .parse()
        .map_err(|e| Error::Config(format!("invalid RPC URL '{rpc_url}': {e}")))?;

    let mut header_map = reqwest::header::HeaderMap::new();
    for (name, value) in headers {
        let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::Config(format!("invalid header name '{name}': {e}")))?;
        let value = reqwest::header::HeaderValue::from_str(value)
            .map_err(|e| Error::Config(format!("invalid value for header {name}: {e}")))?;
        header_map.insert(name, value);
    }
    let client = reqwest::Client::builder()
        .default_headers(header_map)
        .build()
        .map_err(|e| Error::Config(e.to_string()))?;

    let transport = Http::with_client(client, url);
    let is_local = transport.guess_local();
    Ok(RootProvider::new(RpcClient::new(transport, is_local)).erased())
}

/// Forward a JSON-RPC call with untyped params and result.
pub async fn raw_request(provider: &DynProvider, method: &str, params: &Value) -> Result<Value> {
    debug!(method, "rpc request");
    let params = to_raw_value(params)?;
    let result = provider
        .raw_request_dyn(Cow::Owned(method.to_string()), &params)
        .await?;
    Ok(serde_json::from_str(result.get())?)
}

/// Provider and chain id that signing and sending operate against.
#[derive(Clone)]
pub struct ChainContext {
    pub provider: DynProvider,
    pub chain_id: u64,
}

impl ChainContext {
    pub fn new(provider: DynProvider, chain_id: u64) -> Self {
        Self { provider, chain_id }
    }

    pub async fn request(&self, method: &str, params: &Value) -> Result<Value> {
        raw_request(&self.provider, method, params).await
    }
}
