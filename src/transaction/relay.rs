//! Client for the forwarder relay that pays gas on behalf of the user.
//!
//! Relay failures are returned as-is and never retried: they usually mean the relayer is
//! out of funds or the forwarder is misconfigured.

use alloy::primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::config::GaslessOptions;
use crate::eip712::ForwardRequest;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RelayerRequest<'a> {
    request: &'a ForwardRequest,
    signature: String,
    forwarder_address: Address,
}

#[derive(Debug, Deserialize)]
struct RelayerResponse {
    status: String,
    #[serde(default)]
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayerResult {
    tx_hash: B256,
}

#[derive(Clone, Default)]
pub struct RelayClient {
    client: reqwest::Client,
}

impl RelayClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// POST a signed forward request and return the relayed transaction hash.
    pub async fn submit(
        &self,
        options: &GaslessOptions,
        request: &ForwardRequest,
        signature: &Bytes,
    ) -> Result<B256> {
        let body = RelayerRequest {
            request,
            signature: format!("0x{}", hex::encode(signature)),
            forwarder_address: options.forwarder_address,
        };

        debug!(relayer_url = %options.relayer_url, from = %request.from, "Submitting forward request");
        let response = self
            .client
            .post(&options.relayer_url)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            error!(status = %status, body = %text, "Relayer rejected forward request");
            return Err(self.failure(options, text));
        }

        let parsed: RelayerResponse = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(_) => return Err(self.failure(options, text)),
        };
        if parsed.status != "success" {
            return Err(self.failure(options, text));
        }

        parse_result(&parsed.result).ok_or_else(|| self.failure(options, text))
    }

    fn failure(&self, options: &GaslessOptions, body: String) -> Error {
        Error::RelayRequestFailed {
            relayer_url: options.relayer_url.clone(),
            body,
        }
    }
}

/// `result` is usually a JSON document encoded as a string; some relayers inline it.
fn parse_result(result: &Value) -> Option<B256> {
    let parsed: RelayerResult = match result {
        Value::String(encoded) => serde_json::from_str(encoded).ok()?,
        Value::Object(_) => serde_json::from_value(result.clone()).ok()?,
        _ => return None,
    };
    Some(parsed.tx_hash)
}
