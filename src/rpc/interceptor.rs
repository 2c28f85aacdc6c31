//! Reroutes wallet methods from raw RPC traffic to the active signing strategy.
//!
//! Nodes cannot sign, so `eth_accounts`, `personal_sign` and `eth_signTypedData_v4`
//! are answered by the strategy. Every other method goes to the node untouched.

use alloy::dyn_abi::TypedData;
use serde_json::{json, Value};
use tracing::debug;

use super::ChainContext;
use crate::error::{Error, Result};
use crate::wallet::SigningStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptedMethod {
    Accounts,
    PersonalSign,
    SignTypedDataV4,
}

impl InterceptedMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "eth_accounts" => Some(Self::Accounts),
            "personal_sign" => Some(Self::PersonalSign),
            "eth_signTypedData_v4" => Some(Self::SignTypedDataV4),
            _ => None,
        }
    }
}

fn param<'a>(params: &'a Value, index: usize, method: &str) -> Result<&'a Value> {
    params
        .get(index)
        .ok_or_else(|| Error::InvalidInput(format!("{method} expects a parameter at index {index}")))
}

/// `personal_sign` payloads are hex when prefixed with 0x, UTF-8 text otherwise.
fn message_bytes(value: &Value) -> Result<Vec<u8>> {
    let text = value
        .as_str()
        .ok_or_else(|| Error::InvalidInput("personal_sign message must be a string".into()))?;
    match text.strip_prefix("0x") {
        Some(hex_body) => hex::decode(hex_body)
            .map_err(|e| Error::InvalidInput(format!("invalid hex message: {e}"))),
        None => Ok(text.as_bytes().to_vec()),
    }
}

/// Wallets send typed data either as a JSON string or as an inline object.
fn typed_data(value: &Value) -> Result<TypedData> {
    let parsed = match value {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| Error::InvalidInput(format!("invalid typed data: {e}")))
}

/// Answer `method` with `strategy` if it is a wallet method; `None` passes it through.
pub async fn intercept(
    strategy: &dyn SigningStrategy,
    ctx: &ChainContext,
    method: &str,
    params: &Value,
) -> Option<Result<Value>> {
    let intercepted = InterceptedMethod::parse(method)?;
    debug!(method, "Routing wallet method to signing strategy");

    let result = async {
        match intercepted {
            InterceptedMethod::Accounts => Ok(json!([strategy.address().await?])),
            InterceptedMethod::PersonalSign => {
                let message = message_bytes(param(params, 0, method)?)?;
                let signature = strategy.sign_message(ctx, &message).await?;
                Ok(json!(signature))
            }
            InterceptedMethod::SignTypedDataV4 => {
                let data = typed_data(param(params, 1, method)?)?;
                let signature = strategy.sign_typed_data(ctx, &data).await?;
                Ok(json!(signature))
            }
        }
    }
    .await;
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip712::{build_domain, ForwardRequest, TypedMessage};
    use crate::rpc::mock::MockTransport;
    use crate::wallet::{recover_address, LocalKey};
    use alloy::primitives::{Address, Bytes, U256};

    fn ctx() -> ChainContext {
        ChainContext::new(MockTransport::node(1).provider(), 1)
    }

    #[test]
    fn test_parse_only_wallet_methods() {
        assert_eq!(
            InterceptedMethod::parse("eth_accounts"),
            Some(InterceptedMethod::Accounts)
        );
        assert_eq!(
            InterceptedMethod::parse("personal_sign"),
            Some(InterceptedMethod::PersonalSign)
        );
        assert_eq!(
            InterceptedMethod::parse("eth_signTypedData_v4"),
            Some(InterceptedMethod::SignTypedDataV4)
        );
        assert_eq!(InterceptedMethod::parse("eth_sign"), None);
        assert_eq!(InterceptedMethod::parse("eth_call"), None);
    }

    #[test]
    fn test_message_bytes_hex_or_text() {
        assert_eq!(message_bytes(&json!("0x6869")).unwrap(), b"hi".to_vec());
        assert_eq!(message_bytes(&json!("hi")).unwrap(), b"hi".to_vec());
        assert!(message_bytes(&json!("0xzz")).is_err());
        assert!(message_bytes(&json!(1)).is_err());
    }

    #[tokio::test]
    async fn test_passthrough_returns_none() {
        let key = LocalKey::random();
        assert!(intercept(&key, &ctx(), "eth_blockNumber", &json!([]))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_accounts_and_personal_sign() {
        let key = LocalKey::random();
        let ctx = ctx();

        let accounts = intercept(&key, &ctx, "eth_accounts", &json!([]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(accounts, json!([key.address_sync()]));

        let signature = intercept(
            &key,
            &ctx,
            "personal_sign",
            &json!(["Hello World!", key.address_sync()]),
        )
        .await
        .unwrap()
        .unwrap();
        let signature: Bytes = serde_json::from_value(signature).unwrap();
        assert_eq!(
            recover_address(b"Hello World!", &signature).unwrap(),
            key.address_sync()
        );
    }

    #[tokio::test]
    async fn test_sign_typed_data_accepts_string_and_object() {
        let key = LocalKey::random();
        let ctx = ctx();
        let domain = build_domain("Test", "1", 1, Some(Address::repeat_byte(0x01)));
        let request = ForwardRequest {
            from: key.address_sync(),
            to: Address::repeat_byte(0x02),
            value: U256::ZERO,
            gas: U256::from(100_000),
            nonce: U256::ZERO,
            data: Bytes::new(),
        };
        let message = TypedMessage::new(domain.clone(), request);
        let typed = serde_json::to_value(message.to_typed_data()).unwrap();

        for payload in [json!(typed.to_string()), typed.clone()] {
            let signature = intercept(
                &key,
                &ctx,
                "eth_signTypedData_v4",
                &json!([key.address_sync(), payload]),
            )
            .await
            .unwrap()
            .unwrap();
            let signature: Bytes = serde_json::from_value(signature).unwrap();
            assert_eq!(
                message.request.recover(&domain, &signature).unwrap(),
                key.address_sync()
            );
        }
    }

    #[tokio::test]
    async fn test_missing_param_is_invalid_input() {
        let key = LocalKey::random();
        let result = intercept(&key, &ctx(), "eth_signTypedData_v4", &json!([]))
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
