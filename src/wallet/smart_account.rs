//! Contract accounts driven by a personal signer.
//!
//! The account address is predicted from the factory before deployment. The first
//! signature or transaction deploys it. Every signature is checked with the account's
//! `isValidSignature` before it is handed back.

use alloy::dyn_abi::TypedData;
use alloy::primitives::{eip191_hash_message, Address, Bytes, FixedBytes, B256, U256};
use alloy::providers::{DynProvider, Provider};
use alloy::sol;
use alloy::sol_types::{SolCall, SolValue};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{NetworkSwitchAction, SigningStrategy, StrategyKind};
use crate::config::consts::{
    ERC1271_MAGIC_VALUE, PERMISSION_REQUEST_VALIDITY_SECS, PERMISSION_START_SKEW_SECS,
    USER_OP_PLACEHOLDER_GAS, USER_OP_PLACEHOLDER_MAX_FEE, USER_OP_PLACEHOLDER_PRIORITY_FEE,
    USER_OP_POLL_SECS,
};
use crate::config::SmartWalletOptions;
use crate::eip712::{account_domain, AccountMessage, SignerPermissionRequest, TypedMessage};
use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryConfig};
use crate::rpc::{http_provider, ChainContext};
use crate::transaction::{estimate_gas_price, wait_for_receipt, TransactionInput};

sol! {
    #[sol(rpc)]
    interface IAccountFactory {
        function getAddress(address adminSigner, bytes data) external view returns (address);
        function createAccount(address admin, bytes data) external returns (address);
    }

    #[sol(rpc)]
    interface IAccount {
        struct SignerPermissions {
            address signer;
            address[] approvedTargets;
            uint256 nativeTokenLimitPerTransaction;
            uint128 startTimestamp;
            uint128 endTimestamp;
        }

        struct SignerPermissionRequest {
            address signer;
            uint8 isAdmin;
            address[] approvedTargets;
            uint256 nativeTokenLimitPerTransaction;
            uint128 permissionStartTimestamp;
            uint128 permissionEndTimestamp;
            uint128 reqValidityStartTimestamp;
            uint128 reqValidityEndTimestamp;
            bytes32 uid;
        }

        function getMessageHash(bytes32 hash) external view returns (bytes32);
        function isValidSignature(bytes32 hash, bytes signature) external view returns (bytes4);
        function setPermissionsForSigner(SignerPermissionRequest req, bytes signature) external;
        function getAllActiveSigners() external view returns (SignerPermissions[]);
        function getAllAdmins() external view returns (address[]);
        function isAdmin(address signer) external view returns (bool);
        function execute(address target, uint256 value, bytes data) external;
    }

    #[sol(rpc)]
    interface IEntryPoint {
        struct UserOperation {
            address sender;
            uint256 nonce;
            bytes initCode;
            bytes callData;
            uint256 callGasLimit;
            uint256 verificationGasLimit;
            uint256 preVerificationGas;
            uint256 maxFeePerGas;
            uint256 maxPriorityFeePerGas;
            bytes paymasterAndData;
            bytes signature;
        }

        function getNonce(address sender, uint192 key) external view returns (uint256);
        function getUserOpHash(UserOperation userOp) external view returns (bytes32);
    }
}

/// `isAdmin` values understood by `setPermissionsForSigner`.
const PERMISSION_SESSION_KEY: u8 = 0;
const PERMISSION_ADD_ADMIN: u8 = 1;
const PERMISSION_REMOVE_ADMIN: u8 = 2;

/// A signer allowed to act for the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerInfo {
    pub signer: Address,
    pub is_admin: bool,
    pub approved_targets: Vec<Address>,
    pub native_token_limit_per_transaction: U256,
    pub start_timestamp: u128,
    pub end_timestamp: u128,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UserOperationJson {
    sender: Address,
    nonce: U256,
    init_code: Bytes,
    call_data: Bytes,
    call_gas_limit: U256,
    verification_gas_limit: U256,
    pre_verification_gas: U256,
    max_fee_per_gas: U256,
    max_priority_fee_per_gas: U256,
    paymaster_and_data: Bytes,
    signature: Bytes,
}

impl From<&IEntryPoint::UserOperation> for UserOperationJson {
    fn from(op: &IEntryPoint::UserOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            init_code: op.initCode.clone(),
            call_data: op.callData.clone(),
            call_gas_limit: op.callGasLimit,
            verification_gas_limit: op.verificationGasLimit,
            pre_verification_gas: op.preVerificationGas,
            max_fee_per_gas: op.maxFeePerGas,
            max_priority_fee_per_gas: op.maxPriorityFeePerGas,
            paymaster_and_data: op.paymasterAndData.clone(),
            signature: op.signature.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOperationGas {
    pre_verification_gas: U256,
    verification_gas_limit: U256,
    call_gas_limit: U256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SponsorResult {
    paymaster_and_data: Bytes,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserOperationStatus {
    #[serde(default)]
    transaction_hash: Option<B256>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn random_uid() -> FixedBytes<32> {
    FixedBytes::from(rand::random::<[u8; 32]>())
}

/// Request validity window starting slightly in the past.
fn request_validity(now: u64) -> (u128, u128) {
    (
        now.saturating_sub(PERMISSION_START_SKEW_SECS) as u128,
        (now + PERMISSION_REQUEST_VALIDITY_SECS) as u128,
    )
}

fn admin_request(signer: Address, is_admin: u8, now: u64) -> SignerPermissionRequest {
    let (start, end) = request_validity(now);
    SignerPermissionRequest {
        signer,
        isAdmin: is_admin,
        approvedTargets: Vec::new(),
        nativeTokenLimitPerTransaction: U256::ZERO,
        permissionStartTimestamp: 0,
        permissionEndTimestamp: 0,
        reqValidityStartTimestamp: start,
        reqValidityEndTimestamp: end,
        uid: random_uid(),
    }
}

/// Limits granted to a session key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionKeyPermissions {
    pub approved_targets: Vec<Address>,
    pub native_token_limit_per_transaction: U256,
    pub permission_start: u64,
    pub permission_end: u64,
    pub request_validity_start: u64,
    pub request_validity_end: u64,
}

impl SessionKeyPermissions {
    /// Permissions valid from now for `duration_secs`, with a long request validity.
    pub fn for_duration(
        approved_targets: Vec<Address>,
        native_token_limit_per_transaction: U256,
        duration_secs: u64,
    ) -> Self {
        let now = unix_now();
        let (start, end) = request_validity(now);
        Self {
            approved_targets,
            native_token_limit_per_transaction,
            permission_start: now,
            permission_end: now + duration_secs,
            request_validity_start: start as u64,
            request_validity_end: end as u64,
        }
    }
}

pub fn add_admin_request(signer: Address) -> SignerPermissionRequest {
    admin_request(signer, PERMISSION_ADD_ADMIN, unix_now())
}

pub fn remove_admin_request(signer: Address) -> SignerPermissionRequest {
    admin_request(signer, PERMISSION_REMOVE_ADMIN, unix_now())
}

pub fn session_key_request(
    signer: Address,
    permissions: &SessionKeyPermissions,
) -> SignerPermissionRequest {
    SignerPermissionRequest {
        signer,
        isAdmin: PERMISSION_SESSION_KEY,
        approvedTargets: permissions.approved_targets.clone(),
        nativeTokenLimitPerTransaction: permissions.native_token_limit_per_transaction,
        permissionStartTimestamp: permissions.permission_start as u128,
        permissionEndTimestamp: permissions.permission_end as u128,
        reqValidityStartTimestamp: permissions.request_validity_start as u128,
        reqValidityEndTimestamp: permissions.request_validity_end as u128,
        uid: random_uid(),
    }
}

/// A session key request with every permission zeroed.
pub fn revoke_session_key_request(signer: Address) -> SignerPermissionRequest {
    admin_request(signer, PERMISSION_SESSION_KEY, unix_now())
}

impl From<&SignerPermissionRequest> for IAccount::SignerPermissionRequest {
    fn from(req: &SignerPermissionRequest) -> Self {
        Self {
            signer: req.signer,
            isAdmin: req.isAdmin,
            approvedTargets: req.approvedTargets.clone(),
            nativeTokenLimitPerTransaction: req.nativeTokenLimitPerTransaction,
            permissionStartTimestamp: req.permissionStartTimestamp,
            permissionEndTimestamp: req.permissionEndTimestamp,
            reqValidityStartTimestamp: req.reqValidityStartTimestamp,
            reqValidityEndTimestamp: req.reqValidityEndTimestamp,
            uid: req.uid,
        }
    }
}

/// Call a bundler method with positional params.
async fn bundler_request<P, R>(bundler: &DynProvider, method: &'static str, params: P) -> Result<R>
where
    P: alloy::rpc::json_rpc::RpcSend,
    R: alloy::rpc::json_rpc::RpcRecv,
{
    debug!(method, "bundler request");
    Ok(bundler.raw_request(Cow::Borrowed(method), params).await?)
}

pub struct SmartAccount {
    personal: Arc<dyn SigningStrategy>,
    admin: Address,
    account: Address,
    options: SmartWalletOptions,
    /// Chains on which the account is known to have code.
    deployed: Mutex<HashSet<u64>>,
    bundler: Option<DynProvider>,
}

impl SmartAccount {
    /// Predict the account address for `personal` and prepare the bundler client.
    pub async fn initialize(
        ctx: &ChainContext,
        personal: Arc<dyn SigningStrategy>,
        options: SmartWalletOptions,
    ) -> Result<Self> {
        if personal.kind() == StrategyKind::SmartAccount {
            return Err(Error::InvalidInput(
                "a smart account cannot be the personal signer of another smart account".into(),
            ));
        }

        let admin = personal.address().await?;
        let factory = IAccountFactory::new(options.factory_address, ctx.provider.clone());
        let account = factory.getAddress(admin, Bytes::new()).call().await?;

        let bundler = match &options.bundler_url {
            Some(url) => {
                let headers: Vec<(&str, &str)> = options
                    .api_key
                    .iter()
                    .map(|key| ("x-api-key", key.as_str()))
                    .collect();
                Some(http_provider(url, &headers)?)
            }
            None => None,
        };

        info!(admin = %admin, account = %account, "Smart account initialized");
        Ok(Self {
            personal,
            admin,
            account,
            options,
            deployed: Mutex::new(HashSet::new()),
            bundler,
        })
    }

    /// Route user operations through `provider` instead of the configured bundler URL.
    pub fn with_bundler_provider(mut self, provider: DynProvider) -> Self {
        self.bundler = Some(provider);
        self
    }

    fn contract(&self, ctx: &ChainContext) -> IAccount::IAccountInstance<DynProvider> {
        IAccount::new(self.account, ctx.provider.clone())
    }

    pub fn account_address(&self) -> Address {
        self.account
    }

    pub fn admin_address(&self) -> Address {
        self.admin
    }

    pub fn personal(&self) -> &Arc<dyn SigningStrategy> {
        &self.personal
    }

    pub async fn is_deployed(&self, ctx: &ChainContext) -> Result<bool> {
        if self.deployed.lock().await.contains(&ctx.chain_id) {
            return Ok(true);
        }
        Ok(!ctx.provider.get_code_at(self.account).await?.is_empty())
    }

    /// Deploy the account through the factory unless it already has code.
    pub async fn ensure_deployed(&self, ctx: &ChainContext) -> Result<()> {
        let mut deployed = self.deployed.lock().await;
        if deployed.contains(&ctx.chain_id) {
            return Ok(());
        }
        if !ctx.provider.get_code_at(self.account).await?.is_empty() {
            deployed.insert(ctx.chain_id);
            return Ok(());
        }

        info!(account = %self.account, "Deploying smart account");
        let create = IAccountFactory::createAccountCall {
            admin: self.admin,
            data: Bytes::new(),
        };
        let input = TransactionInput::new()
            .from(self.admin)
            .to(self.options.factory_address)
            .data(create.abi_encode());
        let tx_hash = self.personal.send_transaction(ctx, &input).await?;

        let result =
            wait_for_receipt(ctx, tx_hash, RetryConfig::for_receipts(), &CancellationToken::new())
                .await?;
        if !result.is_successful() {
            return Err(Error::TransactionReverted {
                tx_hash,
                reason: "smart account deployment reverted".into(),
            });
        }

        deployed.insert(ctx.chain_id);
        info!(account = %self.account, tx_hash = ?tx_hash, "Smart account deployed");
        Ok(())
    }

    /// ERC-1271 check against the deployed account.
    pub async fn is_valid_signature(
        &self,
        ctx: &ChainContext,
        hash: B256,
        signature: &Bytes,
    ) -> Result<bool> {
        let magic = self
            .contract(ctx)
            .isValidSignature(hash, signature.clone())
            .call()
            .await?;
        Ok(magic == ERC1271_MAGIC_VALUE)
    }

    /// Sign `hash` for on-chain validation by the account, then verify it.
    async fn sign_account_hash(&self, ctx: &ChainContext, hash: B256) -> Result<Bytes> {
        self.ensure_deployed(ctx).await?;

        let supports_typed_messages = self.contract(ctx).getMessageHash(hash).call().await.is_ok();

        let signature = if supports_typed_messages {
            let message = TypedMessage::new(
                account_domain(ctx.chain_id, self.account),
                AccountMessage {
                    message: Bytes::from(hash.abi_encode()),
                },
            );
            self.personal
                .sign_typed_data(ctx, &message.to_typed_data())
                .await?
        } else {
            debug!(account = %self.account, "Account has no getMessageHash, using personal_sign");
            self.personal.sign_message(ctx, hash.as_slice()).await?
        };

        match self.is_valid_signature(ctx, hash, &signature).await {
            Ok(true) => Ok(signature),
            Ok(false) => Err(Error::SignatureVerification {
                address: self.account.to_string(),
            }),
            Err(e) => {
                warn!(account = %self.account, error = %e, "isValidSignature call failed");
                Err(Error::SignatureVerification {
                    address: self.account.to_string(),
                })
            }
        }
    }

    /// Calldata for `setPermissionsForSigner`, signed by the account's own admin.
    pub async fn permission_request_calldata(
        &self,
        ctx: &ChainContext,
        request: &SignerPermissionRequest,
    ) -> Result<Bytes> {
        let message = TypedMessage::new(account_domain(ctx.chain_id, self.account), request.clone());
        let signature = self
            .personal
            .sign_typed_data(ctx, &message.to_typed_data())
            .await?;

        let call = IAccount::setPermissionsForSignerCall {
            req: request.into(),
            signature,
        };
        Ok(Bytes::from(call.abi_encode()))
    }

    /// Admins first, then session keys that are not also admins.
    pub async fn get_all_active_signers(&self, ctx: &ChainContext) -> Result<Vec<SignerInfo>> {
        let account = self.contract(ctx);
        let admins = account.getAllAdmins().call().await?;
        let signers = account.getAllActiveSigners().call().await?;

        let mut all: Vec<SignerInfo> = admins
            .iter()
            .map(|admin| SignerInfo {
                signer: *admin,
                is_admin: true,
                approved_targets: Vec::new(),
                native_token_limit_per_transaction: U256::ZERO,
                start_timestamp: 0,
                end_timestamp: 0,
            })
            .collect();

        all.extend(
            signers
                .into_iter()
                .filter(|s| !admins.contains(&s.signer))
                .map(|s| SignerInfo {
                    signer: s.signer,
                    is_admin: false,
                    approved_targets: s.approvedTargets,
                    native_token_limit_per_transaction: s.nativeTokenLimitPerTransaction,
                    start_timestamp: s.startTimestamp,
                    end_timestamp: s.endTimestamp,
                }),
        );
        Ok(all)
    }

    pub async fn is_admin(&self, ctx: &ChainContext, signer: Address) -> Result<bool> {
        Ok(self.contract(ctx).isAdmin(signer).call().await?)
    }

    async fn send_via_execute(
        &self,
        ctx: &ChainContext,
        target: Address,
        input: &TransactionInput,
    ) -> Result<B256> {
        let execute = IAccount::executeCall {
            target,
            value: input.value,
            data: input.data.clone(),
        };
        let mut wrapped = TransactionInput::new()
            .from(self.admin)
            .to(self.account)
            .data(execute.abi_encode());
        wrapped.gas_limit = input.gas_limit;
        self.personal.send_transaction(ctx, &wrapped).await
    }

    fn entry_point(&self, ctx: &ChainContext) -> IEntryPoint::IEntryPointInstance<DynProvider> {
        IEntryPoint::new(self.options.entry_point_address, ctx.provider.clone())
    }

    async fn user_op_hash(&self, ctx: &ChainContext, op: &IEntryPoint::UserOperation) -> Result<B256> {
        Ok(self.entry_point(ctx).getUserOpHash(op.clone()).call().await?)
    }

    async fn sign_user_op(&self, ctx: &ChainContext, op: &mut IEntryPoint::UserOperation) -> Result<()> {
        let hash = self.user_op_hash(ctx, op).await?;
        op.signature = self.personal.sign_message(ctx, hash.as_slice()).await?;
        Ok(())
    }

    async fn send_user_operation(
        &self,
        ctx: &ChainContext,
        bundler: &DynProvider,
        target: Address,
        input: &TransactionInput,
    ) -> Result<B256> {
        let entry_point = self.options.entry_point_address;
        let nonce = self
            .entry_point(ctx)
            .getNonce(self.account, Default::default())
            .call()
            .await?;

        let call_data = IAccount::executeCall {
            target,
            value: input.value,
            data: input.data.clone(),
        }
        .abi_encode();

        let mut op = IEntryPoint::UserOperation {
            sender: self.account,
            nonce,
            initCode: Bytes::new(),
            callData: Bytes::from(call_data),
            callGasLimit: U256::ZERO,
            verificationGasLimit: U256::from(USER_OP_PLACEHOLDER_GAS),
            preVerificationGas: U256::from(USER_OP_PLACEHOLDER_GAS),
            maxFeePerGas: U256::from(USER_OP_PLACEHOLDER_MAX_FEE),
            maxPriorityFeePerGas: U256::from(USER_OP_PLACEHOLDER_PRIORITY_FEE),
            paymasterAndData: Bytes::new(),
            signature: Bytes::new(),
        };
        self.sign_user_op(ctx, &mut op).await?;

        if self.options.gasless {
            let sponsored: SponsorResult = bundler_request(
                bundler,
                "pm_sponsorUserOperation",
                (UserOperationJson::from(&op), entry_point),
            )
            .await?;
            op.paymasterAndData = sponsored.paymaster_and_data;
        }

        let gas: UserOperationGas = bundler_request(
            bundler,
            "eth_estimateUserOperationGas",
            (UserOperationJson::from(&op), entry_point),
        )
        .await?;
        op.callGasLimit = gas.call_gas_limit;
        op.verificationGasLimit = gas.verification_gas_limit;
        op.preVerificationGas = gas.pre_verification_gas;

        let fee = U256::from(estimate_gas_price(ctx).await?);
        op.maxFeePerGas = fee;
        op.maxPriorityFeePerGas = fee;
        self.sign_user_op(ctx, &mut op).await?;

        let user_op_hash: B256 = bundler_request(
            bundler,
            "eth_sendUserOperation",
            (UserOperationJson::from(&op), entry_point),
        )
        .await?;
        info!(account = %self.account, user_op_hash = ?user_op_hash, "User operation submitted");

        let poll = RetryConfig::fixed(USER_OP_POLL_SECS, 0);
        let cancel = CancellationToken::new();
        let tx_hash = poll_until(poll, "eth_getUserOperationByHash", &cancel, move || async move {
            let status: Option<UserOperationStatus> =
                bundler_request(bundler, "eth_getUserOperationByHash", (user_op_hash,)).await?;
            Ok(status.and_then(|s| s.transaction_hash))
        })
        .await?;
        Ok(tx_hash)
    }
}

#[async_trait]
impl SigningStrategy for SmartAccount {
    fn kind(&self) -> StrategyKind {
        StrategyKind::SmartAccount
    }

    async fn address(&self) -> Result<Address> {
        Ok(self.account)
    }

    async fn signer_address(&self) -> Result<Address> {
        Ok(self.admin)
    }

    async fn sign_message(&self, ctx: &ChainContext, message: &[u8]) -> Result<Bytes> {
        self.sign_account_hash(ctx, eip191_hash_message(message)).await
    }

    async fn sign_typed_data(&self, ctx: &ChainContext, data: &TypedData) -> Result<Bytes> {
        let hash = data.eip712_signing_hash()?;
        self.sign_account_hash(ctx, hash).await
    }

    async fn sign_typed_data_as_signer(&self, ctx: &ChainContext, data: &TypedData) -> Result<Bytes> {
        self.personal.sign_typed_data(ctx, data).await
    }

    async fn is_connected(&self) -> bool {
        self.personal.is_connected().await
    }

    async fn send_transaction(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<B256> {
        let (_, target) = input.endpoints()?;
        self.ensure_deployed(ctx).await?;

        match &self.bundler {
            Some(bundler) => self.send_user_operation(ctx, bundler, target, input).await,
            None => self.send_via_execute(ctx, target, input).await,
        }
    }

    fn prepare_network_switch(&self) -> NetworkSwitchAction {
        NetworkSwitchAction::Handled
    }

    async fn wallet_request(&self, method: &str, params: Value) -> Result<Value> {
        self.personal.wallet_request(method, params).await
    }

    async fn disconnect(&self, end_session: bool) -> Result<()> {
        self.personal.disconnect(end_session).await
    }

    fn as_smart_account(&self) -> Option<&SmartAccount> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eip712::{parse_signature, Schema};
    use crate::rpc::mock::MockTransport;
    use crate::rpc::http_provider;
    use crate::wallet::LocalKey;
    use alloy::primitives::address;
    use httpmock::prelude::*;
    use serde_json::json;

    const CHAIN_ID: u64 = 1;
    const FACTORY: Address = address!("00000000000000000000000000000000000000fa");
    const ENTRY_POINT: Address = address!("5FF137D4b0FDCD49DcA30c7CF57E578a026d2789");
    const ACCOUNT: Address = address!("00000000000000000000000000000000000000ac");

    fn options() -> SmartWalletOptions {
        SmartWalletOptions {
            factory_address: FACTORY,
            entry_point_address: ENTRY_POINT,
            bundler_url: None,
            api_key: None,
            gasless: false,
        }
    }

    fn encoded(bytes: Vec<u8>) -> Value {
        json!(format!("0x{}", hex::encode(bytes)))
    }

    fn call_input(params: &Value) -> Vec<u8> {
        let input = params[0]
            .get("input")
            .or_else(|| params[0].get("data"))
            .and_then(Value::as_str)
            .unwrap_or("0x");
        hex::decode(input.trim_start_matches("0x")).unwrap_or_default()
    }

    /// A node hosting the factory and the account. The account gains code once any
    /// raw transaction has been accepted and validates signatures from `valid_signer`.
    fn account_node(valid_signer: Address, typed_messages: bool) -> Arc<MockTransport> {
        let transport = MockTransport::node(CHAIN_ID);

        let weak = Arc::downgrade(&transport);
        transport.on("eth_getCode", move |_| {
            let deployed = weak
                .upgrade()
                .map(|t| t.call_count("eth_sendRawTransaction") > 0)
                .unwrap_or(false);
            Ok(json!(if deployed { "0x6080" } else { "0x" }))
        });

        transport.on("eth_call", move |params| {
            let data = call_input(params);
            let selector: [u8; 4] = data
                .get(..4)
                .and_then(|s| s.try_into().ok())
                .unwrap_or_default();

            if selector == IAccountFactory::getAddressCall::SELECTOR {
                return Ok(encoded(ACCOUNT.abi_encode()));
            }
            if selector == IAccount::getMessageHashCall::SELECTOR {
                if typed_messages {
                    return Ok(encoded(B256::ZERO.abi_encode()));
                }
                return Err(Error::Network("execution reverted".into()));
            }
            if selector == IAccount::isValidSignatureCall::SELECTOR {
                let call = IAccount::isValidSignatureCall::abi_decode(&data)?;
                let recovered = if typed_messages {
                    let domain = account_domain(CHAIN_ID, ACCOUNT);
                    let message = TypedMessage::new(
                        domain.clone(),
                        AccountMessage {
                            message: Bytes::from(call.hash.abi_encode()),
                        },
                    );
                    message.request.recover(&domain, &call.signature)?
                } else {
                    parse_signature(&call.signature)?
                        .recover_address_from_msg(call.hash.as_slice())
                        .map_err(|e| Error::Signer(e.to_string()))?
                };
                let magic = if recovered == valid_signer {
                    ERC1271_MAGIC_VALUE
                } else {
                    FixedBytes([0u8; 4])
                };
                return Ok(encoded(magic.abi_encode()));
            }
            if selector == IEntryPoint::getNonceCall::SELECTOR {
                return Ok(encoded(U256::from(4).abi_encode()));
            }
            if selector == IEntryPoint::getUserOpHashCall::SELECTOR {
                return Ok(encoded(B256::repeat_byte(0x55).abi_encode()));
            }
            Ok(json!("0x"))
        });

        transport
    }

    async fn smart_account(
        transport: &Arc<MockTransport>,
        personal: Arc<LocalKey>,
    ) -> (SmartAccount, ChainContext) {
        let ctx = ChainContext::new(transport.provider(), CHAIN_ID);
        let account = SmartAccount::initialize(&ctx, personal, options()).await.unwrap();
        (account, ctx)
    }

    #[tokio::test]
    async fn test_initialize_predicts_address() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let (account, _ctx) = smart_account(&transport, personal.clone()).await;

        assert_eq!(account.address().await.unwrap(), ACCOUNT);
        assert_eq!(account.signer_address().await.unwrap(), personal.address_sync());
        assert_eq!(transport.call_count("eth_sendRawTransaction"), 0);
    }

    #[tokio::test]
    async fn test_sign_deploys_once_then_verifies() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let (account, ctx) = smart_account(&transport, personal).await;

        assert!(!account.is_deployed(&ctx).await.unwrap());
        let signature = account.sign_message(&ctx, b"hello").await.unwrap();
        assert_eq!(signature.len(), 65);
        assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);
        assert!(account.is_deployed(&ctx).await.unwrap());

        account.sign_message(&ctx, b"again").await.unwrap();
        assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);
    }

    #[tokio::test]
    async fn test_sign_falls_back_to_personal_sign() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), false);
        let (account, ctx) = smart_account(&transport, personal).await;

        let signature = account.sign_message(&ctx, b"legacy").await.unwrap();
        assert_eq!(signature.len(), 65);
    }

    #[tokio::test]
    async fn test_rejected_signature_is_verification_error() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(Address::repeat_byte(0x99), true);
        let (account, ctx) = smart_account(&transport, personal).await;

        let err = account.sign_message(&ctx, b"hello").await.unwrap_err();
        assert!(matches!(err, Error::SignatureVerification { ref address } if address == &ACCOUNT.to_string()));
    }

    #[tokio::test]
    async fn test_send_wraps_in_execute() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let (account, ctx) = smart_account(&transport, personal).await;

        let input = TransactionInput::new()
            .from(ACCOUNT)
            .to(Address::repeat_byte(0x42))
            .value(U256::from(7));
        let tx_hash = account.send_transaction(&ctx, &input).await.unwrap();

        assert_ne!(tx_hash, B256::ZERO);
        // Deployment, then the execute call from the admin key.
        assert_eq!(transport.call_count("eth_sendRawTransaction"), 2);
    }

    #[tokio::test]
    async fn test_send_through_bundler() {
        let server = MockServer::start_async().await;
        let estimate = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bundler")
                    .header("x-api-key", "bundler-key")
                    .body_includes("eth_estimateUserOperationGas");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 0,
                    "result": {
                        "preVerificationGas": "0xa",
                        "verificationGasLimit": "0xb",
                        "callGasLimit": "0xc"
                    }
                }));
            })
            .await;
        let send = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bundler")
                    .body_includes("eth_sendUserOperation")
                    .body_includes("\"callGasLimit\":\"0xc\"");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": B256::repeat_byte(0x77)
                }));
            })
            .await;
        let mined = B256::repeat_byte(0x88);
        let lookup = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/bundler")
                    .body_includes("eth_getUserOperationByHash");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "result": { "transactionHash": mined }
                }));
            })
            .await;

        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let ctx = ChainContext::new(transport.provider(), CHAIN_ID);
        let options = SmartWalletOptions {
            bundler_url: Some(server.url("/bundler")),
            api_key: Some("bundler-key".into()),
            ..options()
        };
        let account = SmartAccount::initialize(&ctx, personal, options).await.unwrap();

        let input = TransactionInput::new()
            .from(ACCOUNT)
            .to(Address::repeat_byte(0x42))
            .value(U256::from(7));
        let tx_hash = account.send_transaction(&ctx, &input).await.unwrap();

        assert_eq!(tx_hash, mined);
        estimate.assert_async().await;
        send.assert_async().await;
        lookup.assert_async().await;
        // Only the deployment went to the node directly.
        assert_eq!(transport.call_count("eth_sendRawTransaction"), 1);
    }

    #[tokio::test]
    async fn test_bundler_provider_override() {
        let server = MockServer::start_async().await;
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let (account, _ctx) = smart_account(&transport, personal).await;

        let account =
            account.with_bundler_provider(http_provider(&server.url("/bundler"), &[]).unwrap());
        assert!(account.bundler.is_some());
    }

    #[tokio::test]
    async fn test_rejects_nested_smart_account() {
        let personal = Arc::new(LocalKey::random());
        let transport = account_node(personal.address_sync(), true);
        let (inner, ctx) = smart_account(&transport, personal).await;

        let nested = SmartAccount::initialize(&ctx, Arc::new(inner), options()).await;
        assert!(matches!(nested, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_admin_requests() {
        let signer = Address::repeat_byte(0x05);
        let add = add_admin_request(signer);
        let remove = remove_admin_request(signer);

        assert_eq!(add.isAdmin, 1);
        assert_eq!(remove.isAdmin, 2);
        assert_ne!(add.uid, remove.uid);
        assert!(add.reqValidityEndTimestamp > add.reqValidityStartTimestamp);
    }

    #[test]
    fn test_revoke_zeroes_permissions() {
        let revoke = revoke_session_key_request(Address::repeat_byte(0x06));
        assert_eq!(revoke.isAdmin, 0);
        assert!(revoke.approvedTargets.is_empty());
        assert_eq!(revoke.nativeTokenLimitPerTransaction, U256::ZERO);
        assert_eq!(revoke.permissionStartTimestamp, 0);
        assert_eq!(revoke.permissionEndTimestamp, 0);
        assert_eq!(
            revoke.reqValidityEndTimestamp - revoke.reqValidityStartTimestamp,
            (PERMISSION_REQUEST_VALIDITY_SECS + PERMISSION_START_SKEW_SECS) as u128
        );
    }

    #[test]
    fn test_session_key_request_copies_permissions() {
        let target = Address::repeat_byte(0x07);
        let permissions = SessionKeyPermissions::for_duration(vec![target], U256::from(5), 3600);
        let request = session_key_request(Address::repeat_byte(0x08), &permissions);

        assert_eq!(request.isAdmin, 0);
        assert_eq!(request.approvedTargets, vec![target]);
        assert_eq!(
            request.permissionEndTimestamp - request.permissionStartTimestamp,
            3600
        );
    }

    #[test]
    fn test_contract_request_matches_typed_schema() {
        let request = add_admin_request(Address::repeat_byte(0x09));
        let converted: IAccount::SignerPermissionRequest = (&request).into();

        assert_eq!(converted.abi_encode(), request.abi_encode());
        assert_eq!(Schema::SignerPermissionRequest.fields().len(), 9);
    }
}
