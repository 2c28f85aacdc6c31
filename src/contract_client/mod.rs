//! Contract reads and writes against the session's current chain.
//!
//! Typed access goes through `sol!` calls. Contracts loaded with a JSON ABI can also be
//! called by function name with dynamic values.

use alloy::dyn_abi::{DynSolValue, FunctionExt, JsonAbiExt};
use alloy::json_abi::{Function, JsonAbi};
use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::Provider;
use alloy::sol_types::SolCall;
use tracing::debug;

use crate::error::{Error, Result};
use crate::retry::{retry_with_classifier, RetryConfig};
use crate::session::WalletSession;
use crate::transaction::{TransactionInput, TransactionResult};

pub mod multicall;
pub mod nft;
pub mod token;

pub use multicall::{BatchRead, ReadPath};
pub use nft::{Nft, NftPage};

/// A deployed contract, borrowed from a session.
pub struct Contract<'a> {
    session: &'a WalletSession,
    address: Address,
    abi: Option<JsonAbi>,
}

impl<'a> Contract<'a> {
    pub(crate) fn new(session: &'a WalletSession, address: Address, abi: Option<JsonAbi>) -> Self {
        Self {
            session,
            address,
            abi,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> Option<&JsonAbi> {
        self.abi.as_ref()
    }

    /// `eth_call` with `data`, retried on transient node failures. Sent from the connected
    /// address when there is one.
    pub async fn call_raw(&self, data: impl Into<Bytes>) -> Result<Bytes> {
        let mut input = TransactionInput::new().to(self.address).data(data);
        if let Some(strategy) = self.session.connected_strategy() {
            input.from = strategy.address().await.ok();
        }
        let request = input.to_call_request();
        let provider = &self.session.context().provider;

        retry_with_classifier(
            RetryConfig::for_reads(),
            "eth_call",
            || async { Ok::<_, Error>(provider.call(request.clone()).await?) },
            Error::is_transient,
        )
        .await
    }

    pub async fn read<C: SolCall>(&self, call: &C) -> Result<C::Return> {
        let data = self.call_raw(call.abi_encode()).await?;
        Ok(C::abi_decode_returns(&data)?)
    }

    /// Submit `call`, wait for the receipt and fail on revert.
    pub async fn write<C: SolCall>(
        &self,
        call: &C,
        value: Option<U256>,
        gasless: Option<bool>,
    ) -> Result<TransactionResult> {
        let input = TransactionInput::new()
            .to(self.address)
            .data(call.abi_encode())
            .value(value.unwrap_or_default());
        self.session.execute_named(C::SIGNATURE, input, gasless).await
    }

    fn function(&self, name: &str, args: &[DynSolValue]) -> Result<&Function> {
        let abi = self.abi.as_ref().ok_or_else(|| {
            Error::AbiMismatch(format!(
                "no ABI loaded for {}, cannot encode '{name}'",
                self.address
            ))
        })?;
        abi.function(name)
            .and_then(|overloads| overloads.iter().find(|f| f.inputs.len() == args.len()))
            .ok_or_else(|| {
                Error::AbiMismatch(format!(
                    "'{name}' taking {} arguments is not in the ABI of {}",
                    args.len(),
                    self.address
                ))
            })
    }

    /// Call a view function by name and decode every output.
    pub async fn read_fn(&self, name: &str, args: &[DynSolValue]) -> Result<Vec<DynSolValue>> {
        let function = self.function(name, args)?;
        let data = function.abi_encode_input(args)?;
        debug!(contract = %self.address, function = name, "Dynamic read");
        let output = self.call_raw(data).await?;
        Ok(function.abi_decode_output(&output)?)
    }

    pub async fn write_fn(
        &self,
        name: &str,
        args: &[DynSolValue],
        value: Option<U256>,
        gasless: Option<bool>,
    ) -> Result<TransactionResult> {
        let function = self.function(name, args)?;
        let input = TransactionInput::new()
            .to(self.address)
            .data(function.abi_encode_input(args)?)
            .value(value.unwrap_or_default());
        self.session.execute_named(name, input, gasless).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SdkOptions, SupportedChain};
    use crate::rpc::mock::{MockProviderFactory, MockTransport};
    use alloy::sol;
    use alloy::sol_types::SolValue;
    use serde_json::{json, Value};
    use std::sync::Arc;

    sol! {
        interface IERC20 {
            function balanceOf(address owner) external view returns (uint256);
        }
    }

    const ERC20_ABI: &str = r#"[{"type":"function","name":"balanceOf","stateMutability":"view","inputs":[{"name":"owner","type":"address"}],"outputs":[{"name":"","type":"uint256"}]}]"#;

    fn session(transport: &Arc<MockTransport>) -> WalletSession {
        let options = SdkOptions::new("local").with_supported_chain(SupportedChain {
            identifier: "local".into(),
            chain_id: 31337,
            rpc_url: Some("http://127.0.0.1:8545".into()),
        });
        WalletSession::with_provider_factory(options, Arc::new(MockProviderFactory(transport.clone())))
            .unwrap()
    }

    fn answer(value: Vec<u8>) -> Value {
        json!(format!("0x{}", hex::encode(value)))
    }

    #[tokio::test]
    async fn test_typed_read() {
        let transport = MockTransport::node(31337);
        transport.respond("eth_call", answer(U256::from(42).abi_encode()));
        let session = session(&transport);

        let contract = session.contract(Address::repeat_byte(0x20));
        let balance = contract
            .read(&IERC20::balanceOfCall {
                owner: Address::repeat_byte(0x01),
            })
            .await
            .unwrap();
        assert_eq!(balance, U256::from(42));
    }

    #[tokio::test]
    async fn test_read_fn_requires_abi() {
        let transport = MockTransport::node(31337);
        let session = session(&transport);

        let err = session
            .contract(Address::repeat_byte(0x20))
            .read_fn("balanceOf", &[DynSolValue::Address(Address::ZERO)])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AbiMismatch(_)));
        assert_eq!(transport.call_count("eth_call"), 0);
    }

    #[tokio::test]
    async fn test_read_fn_with_abi() {
        let transport = MockTransport::node(31337);
        transport.respond("eth_call", answer(U256::from(7).abi_encode()));
        let session = session(&transport);
        let abi: JsonAbi = serde_json::from_str(ERC20_ABI).unwrap();

        let contract = session.contract_with_abi(Address::repeat_byte(0x20), abi);
        let output = contract
            .read_fn("balanceOf", &[DynSolValue::Address(Address::ZERO)])
            .await
            .unwrap();
        assert_eq!(output, vec![DynSolValue::Uint(U256::from(7), 256)]);

        let err = contract.read_fn("balanceOf", &[]).await.unwrap_err();
        assert!(matches!(err, Error::AbiMismatch(_)));
    }

    #[tokio::test]
    async fn test_revert_is_not_retried() {
        let transport = MockTransport::node(31337);
        transport.fail("eth_call", "execution reverted");
        let session = session(&transport);

        let result = session
            .contract(Address::repeat_byte(0x20))
            .read(&IERC20::balanceOfCall {
                owner: Address::ZERO,
            })
            .await;
        assert!(result.is_err());
        assert_eq!(transport.call_count("eth_call"), 1);
    }

    #[tokio::test]
    async fn test_transient_read_is_retried() {
        let transport = MockTransport::node(31337);
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = attempts.clone();
        transport.on("eth_call", move |_| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Err(Error::Network("header not found".into()))
            } else {
                Ok(answer(U256::from(3).abi_encode()))
            }
        });
        let session = session(&transport);

        let balance = session
            .contract(Address::repeat_byte(0x20))
            .read(&IERC20::balanceOfCall {
                owner: Address::ZERO,
            })
            .await
            .unwrap();
        assert_eq!(balance, U256::from(3));
        assert_eq!(transport.call_count("eth_call"), 2);
    }

    #[tokio::test]
    async fn test_write_requires_connection() {
        let transport = MockTransport::node(31337);
        let session = session(&transport);

        let result = session
            .contract(Address::repeat_byte(0x20))
            .write(
                &IERC20::balanceOfCall {
                    owner: Address::ZERO,
                },
                None,
                None,
            )
            .await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
