//! End-to-end wallet flows against an in-memory node.

use alloy::primitives::{address, Address, Bytes, FixedBytes, Signature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use httpmock::prelude::*;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroizing;

use evmkit::config::{GaslessOptions, SmartWalletOptions, SupportedChain};
use evmkit::rpc::mock::{MockProviderFactory, MockTransport};
use evmkit::{
    ConnectParams, ConnectionState, Error, SdkOptions, StrategyKind, TransactionInput,
    WalletConnection, WalletSession,
};

const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
const ACCOUNT: Address = address!("00000000000000000000000000000000000000ac");

sol! {
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
    }

    interface IAccountFactory {
        function getAddress(address adminSigner, bytes data) external view returns (address);
    }

    interface IAccount {
        function getMessageHash(bytes32 hash) external view returns (bytes32);
        function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4);
    }

    interface IForwarder {
        function getNonce(address from) external view returns (uint256);
    }
}

fn testnets() -> SdkOptions {
    SdkOptions::new("arbitrum-sepolia")
        .with_supported_chain(SupportedChain {
            identifier: "arbitrum-sepolia".into(),
            chain_id: 421614,
            rpc_url: Some("https://sepolia-rollup.arbitrum.io/rpc".into()),
        })
        .with_supported_chain(SupportedChain {
            identifier: "base-sepolia".into(),
            chain_id: 84532,
            rpc_url: Some("https://sepolia.base.org".into()),
        })
}

fn session(transport: &Arc<MockTransport>, options: SdkOptions) -> WalletSession {
    WalletSession::with_provider_factory(options, Arc::new(MockProviderFactory(transport.clone())))
        .unwrap()
}

fn private_key() -> WalletConnection {
    WalletConnection::PrivateKey {
        private_key: Zeroizing::new(TEST_KEY.to_string()),
    }
}

fn test_key_address() -> Address {
    PrivateKeySigner::from_str(TEST_KEY).unwrap().address()
}

fn call_data(params: &Value) -> Vec<u8> {
    let input = params[0]
        .get("input")
        .or_else(|| params[0].get("data"))
        .and_then(Value::as_str)
        .unwrap_or("0x");
    hex::decode(input.trim_start_matches("0x")).unwrap_or_default()
}

fn encoded(bytes: Vec<u8>) -> Value {
    json!(format!("0x{}", hex::encode(bytes)))
}

#[tokio::test]
async fn test_local_key_signs_and_recovers() {
    let dir = tempfile::tempdir().unwrap();
    let mut options = testnets();
    options.wallet.keystore_dir = Some(dir.path().to_path_buf());

    let transport = MockTransport::node(421614);
    let mut session = session(&transport, options);
    let address = session
        .connect(
            WalletConnection::LocalKey {
                password: Some(Zeroizing::new("correct horse".into())),
            },
            ConnectParams::chain("arbitrum-sepolia"),
        )
        .await
        .unwrap();

    assert_eq!(session.chain_id(), 421614);
    assert_eq!(address.to_string().len(), 42);

    let signature = session.sign_message("Hello World!").await.unwrap();
    assert_eq!(signature.to_string().len(), 132);
    assert_eq!(
        session.recover_address("Hello World!", &signature).unwrap(),
        address
    );
}

#[tokio::test]
async fn test_approve_without_relay_returns_hash() {
    let transport = MockTransport::node(421614);
    let mut session = session(&transport, testnets());
    session
        .connect(private_key(), ConnectParams::default())
        .await
        .unwrap();

    let token = session.contract(Address::repeat_byte(0x20));
    let result = token
        .write(
            &IERC20::approveCall {
                spender: Address::repeat_byte(0x30),
                amount: U256::ZERO,
            },
            None,
            Some(false),
        )
        .await
        .unwrap();

    assert!(result.is_successful());
    assert_eq!(result.transaction_hash().len(), 66);
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);
}

#[tokio::test]
async fn test_unsupported_chain_is_rejected() {
    let transport = MockTransport::node(421614);
    let mut session = session(&transport, testnets());

    let err = session
        .connect(private_key(), ConnectParams::chain("polygon"))
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Please add your active chain to the supported chains list! 'polygon' is not configured."
    );
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_concurrent_sends_get_distinct_nonces() {
    let transport = MockTransport::node(421614);
    let mut session = session(&transport, testnets());
    session
        .connect(private_key(), ConnectParams::default())
        .await
        .unwrap();

    let first = TransactionInput::new()
        .to(Address::repeat_byte(0x41))
        .value(U256::from(1));
    let second = first.clone();
    let (a, b) = tokio::join!(
        session.send_transaction(first, None),
        session.send_transaction(second, None)
    );

    assert_ne!(a.unwrap(), b.unwrap());
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 2);
}

#[tokio::test]
async fn test_gasless_send_goes_through_relayer() {
    let server = MockServer::start_async().await;
    let relayed = B256::repeat_byte(0xab);
    let relay = server
        .mock_async(|when, then| {
            when.method(POST).path("/relay");
            then.status(200).json_body(json!({
                "status": "success",
                "result": json!({ "txHash": relayed }).to_string(),
            }));
        })
        .await;

    let transport = MockTransport::node(421614);
    transport.on("eth_call", |params| {
        let data = call_data(params);
        if data.starts_with(&IForwarder::getNonceCall::SELECTOR) {
            return Ok(encoded(U256::from(3).abi_encode()));
        }
        Ok(json!("0x"))
    });

    let options = testnets().with_gasless(GaslessOptions::new(server.url("/relay")));
    let mut session = session(&transport, options);
    session
        .connect(private_key(), ConnectParams::default())
        .await
        .unwrap();

    let tx_hash = session
        .send_transaction(TransactionInput::new().to(Address::repeat_byte(0x42)), None)
        .await
        .unwrap();

    relay.assert_async().await;
    assert_eq!(tx_hash, relayed);
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 0);
}

#[tokio::test]
async fn test_concurrent_gasless_sends_use_consecutive_forwarder_nonces() {
    let server = MockServer::start_async().await;
    let first_hash = B256::repeat_byte(0xa3);
    let second_hash = B256::repeat_byte(0xa4);
    let third = server
        .mock_async(|when, then| {
            when.method(POST).path("/relay").body_includes(r#""nonce":"0x3""#);
            then.status(200).json_body(json!({
                "status": "success",
                "result": json!({ "txHash": first_hash }).to_string(),
            }));
        })
        .await;
    let fourth = server
        .mock_async(|when, then| {
            when.method(POST).path("/relay").body_includes(r#""nonce":"0x4""#);
            then.status(200).json_body(json!({
                "status": "success",
                "result": json!({ "txHash": second_hash }).to_string(),
            }));
        })
        .await;

    // The forwarder keeps reporting 3 because neither request has been mined.
    let transport = MockTransport::node(421614);
    transport.on("eth_call", |params| {
        let data = call_data(params);
        if data.starts_with(&IForwarder::getNonceCall::SELECTOR) {
            return Ok(encoded(U256::from(3).abi_encode()));
        }
        Ok(json!("0x"))
    });

    let options = testnets().with_gasless(GaslessOptions::new(server.url("/relay")));
    let mut session = session(&transport, options);
    session
        .connect(private_key(), ConnectParams::default())
        .await
        .unwrap();

    let first = TransactionInput::new().to(Address::repeat_byte(0x42));
    let second = TransactionInput::new().to(Address::repeat_byte(0x43));
    let (a, b) = tokio::join!(
        session.send_transaction(first, None),
        session.send_transaction(second, None)
    );

    third.assert_async().await;
    fourth.assert_async().await;
    let mut hashes = vec![a.unwrap(), b.unwrap()];
    hashes.sort();
    assert_eq!(hashes, vec![first_hash, second_hash]);
}

#[tokio::test]
async fn test_reverting_estimate_stops_the_send() {
    let transport = MockTransport::node(421614);
    transport.fail(
        "eth_estimateGas",
        "execution reverted: ERC20: approve to the zero address",
    );
    let mut session = session(&transport, testnets());
    session
        .connect(private_key(), ConnectParams::default())
        .await
        .unwrap();

    let token = session.contract(Address::repeat_byte(0x20));
    let err = token
        .write(
            &IERC20::approveCall {
                spender: Address::ZERO,
                amount: U256::from(1),
            },
            None,
            Some(false),
        )
        .await
        .unwrap_err();

    assert!(err.to_string().contains("approve to the zero address"));
    assert!(!err.is_transient());
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 0);
}

/// Hosts the account factory and a legacy account that accepts personal signatures
/// from `admin`. The account has code once any raw transaction has been mined.
fn account_node(admin: Address) -> Arc<MockTransport> {
    let transport = MockTransport::node(31337);

    let weak = Arc::downgrade(&transport);
    transport.on("eth_getCode", move |_| {
        let deployed = weak
            .upgrade()
            .map(|t| t.call_count("eth_sendRawTransaction") > 0)
            .unwrap_or(false);
        Ok(json!(if deployed { "0x6080" } else { "0x" }))
    });

    transport.on("eth_call", move |params| {
        let data = call_data(params);
        if data.starts_with(&IAccountFactory::getAddressCall::SELECTOR) {
            return Ok(encoded(ACCOUNT.abi_encode()));
        }
        if data.starts_with(&IAccount::getMessageHashCall::SELECTOR) {
            return Err(Error::Network("execution reverted".into()));
        }
        if data.starts_with(&IAccount::isValidSignatureCall::SELECTOR) {
            let call = IAccount::isValidSignatureCall::abi_decode(&data)?;
            let signature = Signature::try_from(call.signature.as_ref())
                .map_err(|e| Error::Signer(e.to_string()))?;
            let recovered = signature
                .recover_address_from_msg(call.hash.as_slice())
                .map_err(|e| Error::Signer(e.to_string()))?;
            let magic = if recovered == admin {
                FixedBytes([0x16, 0x26, 0xba, 0x7e])
            } else {
                FixedBytes([0u8; 4])
            };
            return Ok(encoded(magic.abi_encode()));
        }
        Ok(json!("0x"))
    });

    transport
}

#[tokio::test]
async fn test_smart_account_deploys_before_first_signature() {
    let transport = account_node(test_key_address());
    let options = SdkOptions::new("local")
        .with_supported_chain(SupportedChain {
            identifier: "local".into(),
            chain_id: 31337,
            rpc_url: Some("http://127.0.0.1:8545".into()),
        })
        .with_smart_wallet(SmartWalletOptions {
            factory_address: Address::repeat_byte(0xfa),
            entry_point_address: Address::repeat_byte(0xee),
            bundler_url: None,
            api_key: None,
            gasless: false,
        });

    let mut session = session(&transport, options);
    let address = session
        .connect(
            WalletConnection::SmartAccount {
                personal: Box::new(private_key()),
            },
            ConnectParams::default(),
        )
        .await
        .unwrap();

    assert_eq!(address, ACCOUNT);
    assert_eq!(session.status().await.unwrap().kind, StrategyKind::SmartAccount);
    assert!(!session.is_deployed().await.unwrap());

    let signature: Bytes = session.sign_message("Hello World!").await.unwrap();
    assert_eq!(signature.len(), 65);
    assert!(session.is_deployed().await.unwrap());
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);

    session.sign_message("again").await.unwrap();
    assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);
}
