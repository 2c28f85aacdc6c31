//! In-memory node used to exercise sessions without a network.
//!
//! Handlers are registered per JSON-RPC method. [`MockTransport::node`] preloads a node that
//! accepts raw transactions and mines them immediately. The node is served to alloy as a
//! [`tower::Service`], so everything above it runs through a real [`DynProvider`].

use alloy::primitives::{keccak256, B256};
use alloy::providers::{DynProvider, Provider, RootProvider};
use alloy::rpc::client::RpcClient;
use alloy::rpc::json_rpc::{
    ErrorPayload, Id, RequestPacket, Response, ResponsePacket, ResponsePayload, SerializedRequest,
};
use alloy::transports::{TransportError, TransportFut};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use super::errors::METHOD_NOT_FOUND as METHOD_NOT_FOUND_CODE;
use super::ProviderFactory;
use crate::error::{Error, Result};

type Handler = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// JSON-RPC error code used for failures raised by handlers.
const NODE_ERROR_CODE: i64 = -32000;

pub struct MockTransport {
    handlers: Mutex<HashMap<String, Handler>>,
    calls: Mutex<Vec<(u64, String, Value)>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A node on `chain_id` that accepts raw transactions and mines each one at once.
    ///
    /// The pending nonce is the number of transactions accepted so far, shared by all senders.
    pub fn node(chain_id: u64) -> Arc<Self> {
        let transport = Self::new();
        let sent: Arc<Mutex<HashSet<B256>>> = Arc::new(Mutex::new(HashSet::new()));

        transport.respond("eth_chainId", json!(format!("0x{chain_id:x}")));
        transport.respond("eth_gasPrice", json!("0x3b9aca00"));
        transport.respond("eth_estimateGas", json!("0x5208"));
        transport.respond("eth_getBalance", json!("0xde0b6b3a7640000"));
        transport.respond("eth_getCode", json!("0x"));
        transport.respond("eth_call", json!("0x"));

        let sent_count = sent.clone();
        transport.on("eth_getTransactionCount", move |_| {
            Ok(json!(format!("0x{:x}", guard(&sent_count).len())))
        });

        let sent_raw = sent.clone();
        transport.on("eth_sendRawTransaction", move |params| {
            let raw = params[0]
                .as_str()
                .and_then(|s| hex::decode(s.trim_start_matches("0x")).ok())
                .ok_or_else(|| Error::Network("invalid raw transaction".into()))?;
            let hash = keccak256(&raw);
            guard(&sent_raw).insert(hash);
            Ok(json!(hash))
        });

        transport.on("eth_getTransactionReceipt", move |params| {
            let hash: B256 = serde_json::from_value(params[0].clone())?;
            if !guard(&sent).contains(&hash) {
                return Ok(Value::Null);
            }
            Ok(mined_receipt(hash))
        });

        transport
    }

    /// Provider backed by this node.
    pub fn provider(self: &Arc<Self>) -> DynProvider {
        let client = RpcClient::new(MockService(self.clone()), true);
        RootProvider::new(client).erased()
    }

    /// Register a handler for `method`, replacing any previous one.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        guard(&self.handlers).insert(method.to_string(), Arc::new(handler));
    }

    /// Always answer `method` with `value`.
    pub fn respond(&self, method: &str, value: Value) {
        self.on(method, move |_| Ok(value.clone()));
    }

    /// Always fail `method` with a node error.
    pub fn fail(&self, method: &str, message: &str) {
        let message = message.to_string();
        self.on(method, move |_| Err(Error::Network(message.clone())));
    }

    /// Parameters of every call made to `method`, in order.
    pub fn calls(&self, method: &str) -> Vec<Value> {
        guard(&self.calls)
            .iter()
            .filter(|(_, m, _)| m == method)
            .map(|(_, _, p)| p.clone())
            .collect()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.calls(method).len()
    }

    pub fn request_ids(&self) -> Vec<u64> {
        guard(&self.calls).iter().map(|(id, _, _)| *id).collect()
    }

    fn dispatch(&self, method: &str, params: &Value) -> ResponsePayload {
        let handler = guard(&self.handlers).get(method).cloned();
        let outcome = match handler {
            Some(handler) => handler(params),
            None => {
                return ResponsePayload::Failure(ErrorPayload {
                    code: METHOD_NOT_FOUND_CODE,
                    message: Cow::Owned(format!(
                        "the method {method} does not exist/is not available"
                    )),
                    data: None,
                })
            }
        };

        let failure = |message: String| {
            ResponsePayload::Failure(ErrorPayload {
                code: NODE_ERROR_CODE,
                message: Cow::Owned(message),
                data: None,
            })
        };
        match outcome {
            Ok(value) => match serde_json::value::to_raw_value(&value) {
                Ok(raw) => ResponsePayload::Success(raw),
                Err(e) => failure(e.to_string()),
            },
            Err(Error::Network(message)) => failure(message),
            Err(other) => failure(other.to_string()),
        }
    }

    fn answer(&self, request: SerializedRequest) -> Response {
        let params: Value = request
            .params()
            .and_then(|raw| serde_json::from_str(raw.get()).ok())
            .unwrap_or(Value::Null);
        let id = match request.id() {
            Id::Number(n) => *n,
            _ => 0,
        };
        let method = request.method().to_string();
        guard(&self.calls).push((id, method.clone(), params.clone()));

        Response {
            id: request.id().clone(),
            payload: self.dispatch(&method, &params),
        }
    }
}

/// Receipt JSON for a successfully mined transaction.
pub fn mined_receipt(hash: B256) -> Value {
    json!({
        "type": "0x2",
        "status": "0x1",
        "cumulativeGasUsed": "0x5208",
        "logs": [],
        "logsBloom": format!("0x{}", "0".repeat(512)),
        "transactionHash": hash,
        "transactionIndex": "0x0",
        "blockHash": B256::repeat_byte(0x11),
        "blockNumber": "0x10",
        "gasUsed": "0x5208",
        "effectiveGasPrice": "0x3b9aca00",
        "from": "0x0000000000000000000000000000000000000000",
        "to": null,
        "contractAddress": null
    })
}

/// Serves a [`MockTransport`] to alloy's RPC client.
#[derive(Clone)]
pub struct MockService(pub Arc<MockTransport>);

impl tower::Service<RequestPacket> for MockService {
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = TransportFut<'static>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, packet: RequestPacket) -> Self::Future {
        let node = self.0.clone();
        Box::pin(async move {
            Ok(match packet {
                RequestPacket::Single(request) => ResponsePacket::Single(node.answer(request)),
                RequestPacket::Batch(requests) => ResponsePacket::Batch(
                    requests.into_iter().map(|r| node.answer(r)).collect(),
                ),
            })
        })
    }
}

/// Hands out the same node regardless of the endpoint asked for.
pub struct MockProviderFactory(pub Arc<MockTransport>);

impl ProviderFactory for MockProviderFactory {
    fn connect(&self, _rpc_url: &str) -> Result<DynProvider> {
        Ok(self.0.provider())
    }
}
