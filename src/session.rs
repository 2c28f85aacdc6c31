//! The wallet session: one connected strategy bound to one chain.
//!
//! A session is an ordinary value owned by the caller. Several may coexist, each with its
//! own strategy, RPC binding and nonce locks.
//!
//! `disconnect` and `switch_network` take `&mut self`, so they cannot overlap with sends
//! borrowed from the same session. Callers that spawn sends must await them before
//! disconnecting.

use alloy::dyn_abi::TypedData;
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::Provider;
use alloy::sol_types::SolCall;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::chain::{ChainDescriptor, ChainRegistry};
use crate::config::SdkOptions;
use crate::contract_client::token::IERC20;
use crate::contract_client::Contract;
use crate::eip712::TypedMessage;
use crate::error::{Error, Result};
use crate::rpc::interceptor::{intercept, InterceptedMethod};
use crate::rpc::{ChainContext, HttpProviderFactory, ProviderFactory};
use crate::transaction::{TransactionBuilder, TransactionInput, TransactionResult};
use crate::wallet::display::WalletStatus;
use crate::wallet::smart_account::{
    add_admin_request, remove_admin_request, revoke_session_key_request, session_key_request,
    SessionKeyPermissions,
};
use crate::wallet::{
    device_id, ExternalProvider, LocalKey, NetworkSwitchAction, ProviderSession, SignerInfo,
    SigningStrategy, SmartAccount,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Which signing strategy to connect with.
pub enum WalletConnection {
    /// Keystore under the configured wallet directory, created on first use.
    /// Without a password the device identifier is used.
    LocalKey { password: Option<Zeroizing<String>> },
    /// In-memory key, never written to disk.
    PrivateKey { private_key: Zeroizing<String> },
    ExternalProvider { session: Arc<dyn ProviderSession> },
    /// Contract account driven by `personal`, which must not itself be a smart account.
    SmartAccount { personal: Box<WalletConnection> },
}

impl std::fmt::Debug for WalletConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalKey { .. } => f.write_str("LocalKey"),
            Self::PrivateKey { .. } => f.write_str("PrivateKey"),
            Self::ExternalProvider { .. } => f.write_str("ExternalProvider"),
            Self::SmartAccount { personal } => write!(f, "SmartAccount({personal:?})"),
        }
    }
}

/// Target chain for `connect`. Defaults to the session's active chain.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    /// Supported chain identifier, or a literal RPC URL paired with `chain_id`.
    pub chain: Option<String>,
    pub chain_id: Option<u64>,
}

impl ConnectParams {
    pub fn chain(identifier: impl Into<String>) -> Self {
        Self {
            chain: Some(identifier.into()),
            chain_id: None,
        }
    }

    pub fn rpc(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            chain: Some(rpc_url.into()),
            chain_id: Some(chain_id),
        }
    }
}

pub struct WalletSession {
    options: SdkOptions,
    registry: ChainRegistry,
    factory: Arc<dyn ProviderFactory>,
    ctx: ChainContext,
    chain: ChainDescriptor,
    state: ConnectionState,
    strategy: Option<Arc<dyn SigningStrategy>>,
    builder: TransactionBuilder,
}

fn add_chain_params(chain: &ChainDescriptor) -> Value {
    json!([{
        "chainId": chain.chain_id_hex(),
        "chainName": chain.name,
        "nativeCurrency": {
            "name": chain.native_currency_name,
            "symbol": chain.native_currency_symbol,
            "decimals": chain.native_currency_decimals,
        },
        "rpcUrls": [chain.rpc_url],
        "blockExplorerUrls": chain.explorer_urls,
    }])
}

/// Wallets answer `eth_chainId` with a hex string, a few with a plain number.
fn parse_chain_id(value: &Value) -> Result<u64> {
    let parsed = match value {
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex_digits) => u64::from_str_radix(hex_digits, 16).ok(),
            None => text.parse().ok(),
        },
        Value::Number(number) => number.as_u64(),
        _ => None,
    };
    parsed.ok_or_else(|| Error::AbiMismatch(format!("unexpected eth_chainId response: {value}")))
}

impl WalletSession {
    /// Disconnected session over HTTP JSON-RPC, bound to the active chain.
    pub fn new(options: SdkOptions) -> Result<Self> {
        Self::with_provider_factory(options, Arc::new(HttpProviderFactory))
    }

    pub fn with_provider_factory(
        options: SdkOptions,
        factory: Arc<dyn ProviderFactory>,
    ) -> Result<Self> {
        let registry = ChainRegistry::from_options(&options);
        let chain = registry.resolve(&options.active_chain, None)?;
        let provider = factory.connect(&chain.rpc_url)?;
        let builder = TransactionBuilder::new(options.gasless.clone());

        Ok(Self {
            ctx: ChainContext::new(provider, chain.chain_id),
            options,
            registry,
            factory,
            chain,
            state: ConnectionState::Disconnected,
            strategy: None,
            builder,
        })
    }

    /// Replace the transaction builder, e.g. to tune receipt polling.
    pub fn with_builder(mut self, builder: TransactionBuilder) -> Self {
        self.builder = builder;
        self
    }

    pub fn options(&self) -> &SdkOptions {
        &self.options
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn chain(&self) -> &ChainDescriptor {
        &self.chain
    }

    /// Chain id the session is currently bound to.
    pub fn chain_id(&self) -> u64 {
        self.ctx.chain_id
    }

    pub(crate) fn context(&self) -> &ChainContext {
        &self.ctx
    }

    pub(crate) fn builder(&self) -> &TransactionBuilder {
        &self.builder
    }

    pub(crate) fn strategy(&self) -> Result<&Arc<dyn SigningStrategy>> {
        self.strategy.as_ref().ok_or(Error::NotConnected)
    }

    pub(crate) fn connected_strategy(&self) -> Option<&Arc<dyn SigningStrategy>> {
        self.strategy.as_ref()
    }

    /// Connect with `connection` and return the address transactions will be sent from.
    pub async fn connect(
        &mut self,
        connection: WalletConnection,
        params: ConnectParams,
    ) -> Result<Address> {
        let target = match params.chain.as_deref() {
            Some(chain) => self.registry.resolve(chain, params.chain_id)?,
            None => self.chain.clone(),
        };

        if let Some(previous) = self.strategy.take() {
            if let Err(e) = previous.disconnect(false).await {
                warn!(error = %e, "Previous wallet did not disconnect cleanly, connecting anyway");
            }
        }
        self.state = ConnectionState::Connecting;
        debug!(connection = ?connection, chain_id = target.chain_id, "Connecting wallet");

        match self.establish(connection, target).await {
            Ok(address) => {
                self.state = ConnectionState::Connected;
                Ok(address)
            }
            Err(e) => {
                self.strategy = None;
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        connection: WalletConnection,
        target: ChainDescriptor,
    ) -> Result<Address> {
        self.bind_chain(target.clone()).await?;

        let strategy = self.build_strategy(connection).await?;
        self.strategy = Some(strategy.clone());
        self.ensure_correct_network(&target).await?;

        let address = strategy.address().await?;
        info!(
            kind = ?strategy.kind(),
            address = %address,
            chain_id = self.ctx.chain_id,
            "Wallet connected"
        );
        Ok(address)
    }

    async fn build_strategy(&self, connection: WalletConnection) -> Result<Arc<dyn SigningStrategy>> {
        match connection {
            WalletConnection::SmartAccount { personal } => {
                let options = self.options.smart_wallet.clone().ok_or_else(|| {
                    Error::Config("smart wallet options are required to connect a smart account".into())
                })?;
                let personal = self.build_personal(*personal).await?;
                let account = SmartAccount::initialize(&self.ctx, personal, options).await?;
                Ok(Arc::new(account))
            }
            other => self.build_personal(other).await,
        }
    }

    async fn build_personal(&self, connection: WalletConnection) -> Result<Arc<dyn SigningStrategy>> {
        match connection {
            WalletConnection::LocalKey { password } => {
                let path = self.options.wallet.keystore_path();
                let device = self.options.wallet.device_id.clone().unwrap_or_else(device_id);
                // scrypt blocks, run it off the async workers
                let key = tokio::task::spawn_blocking(move || {
                    LocalKey::unlock_or_generate(&path, password.as_ref().map(|p| p.as_str()), &device)
                })
                .await
                .map_err(|e| Error::Keystore(e.to_string()))??;
                Ok(Arc::new(key))
            }
            WalletConnection::PrivateKey { private_key } => {
                Ok(Arc::new(LocalKey::from_private_key(&private_key)?))
            }
            WalletConnection::ExternalProvider { session } => {
                Ok(Arc::new(ExternalProvider::new(session)))
            }
            WalletConnection::SmartAccount { .. } => Err(Error::InvalidInput(
                "a smart account cannot be the personal signer of another smart account".into(),
            )),
        }
    }

    async fn bind_chain(&mut self, chain: ChainDescriptor) -> Result<()> {
        if chain.chain_id == self.chain.chain_id && chain.rpc_url == self.chain.rpc_url {
            return Ok(());
        }
        self.ctx = ChainContext::new(self.factory.connect(&chain.rpc_url)?, chain.chain_id);
        debug!(chain_id = chain.chain_id, rpc_url = %chain.rpc_url, "RPC endpoint rebound");
        self.chain = chain;
        Ok(())
    }

    /// Ask the wallet to follow `target`.
    ///
    /// When the wallet refuses both the switch and the add-then-switch, the session follows
    /// the chain the wallet reports instead, provided that chain is supported.
    async fn ensure_correct_network(&mut self, target: &ChainDescriptor) -> Result<()> {
        let Some(strategy) = self.strategy.clone() else {
            return Ok(());
        };

        match strategy.prepare_network_switch() {
            NetworkSwitchAction::Handled => Ok(()),
            NetworkSwitchAction::Unsupported => {
                warn!(chain_id = target.chain_id, "Wallet cannot switch networks");
                Ok(())
            }
            NetworkSwitchAction::ContinueSwitch => {
                let switch_params = json!([{ "chainId": target.chain_id_hex() }]);
                let switched = strategy
                    .wallet_request("wallet_switchEthereumChain", switch_params.clone())
                    .await;
                let Err(switch_error) = switched else {
                    return Ok(());
                };
                debug!(error = %switch_error, "Switch refused, adding chain to wallet");

                let added = async {
                    strategy
                        .wallet_request("wallet_addEthereumChain", add_chain_params(target))
                        .await?;
                    strategy
                        .wallet_request("wallet_switchEthereumChain", switch_params)
                        .await
                }
                .await;
                match added {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        warn!(
                            chain_id = target.chain_id,
                            error = %e,
                            "Could not switch wallet network"
                        );
                        self.follow_wallet_chain(strategy.as_ref(), target).await
                    }
                }
            }
        }
    }

    /// Rebind to the chain the wallet stayed on. An unsupported chain is an error; a wallet
    /// that cannot report its chain leaves the session on `target`.
    async fn follow_wallet_chain(
        &mut self,
        strategy: &dyn SigningStrategy,
        target: &ChainDescriptor,
    ) -> Result<()> {
        let reported = match strategy.wallet_request("eth_chainId", json!([])).await {
            Ok(reported) => reported,
            Err(e) => {
                warn!(
                    chain_id = target.chain_id,
                    error = %e,
                    "Wallet chain unknown, keeping requested chain"
                );
                return Ok(());
            }
        };
        let chain_id = parse_chain_id(&reported)?;
        if chain_id == target.chain_id {
            return Ok(());
        }

        let chain = self.registry.by_chain_id(chain_id)?;
        warn!(
            requested = target.chain_id,
            chain_id,
            "Wallet stayed on another supported chain, following it"
        );
        self.bind_chain(chain).await
    }

    /// Rebind to another chain and ask the connected wallet to follow.
    pub async fn switch_network(
        &mut self,
        identifier_or_rpc: &str,
        chain_id: Option<u64>,
    ) -> Result<ChainDescriptor> {
        let target = self.registry.resolve(identifier_or_rpc, chain_id)?;
        self.bind_chain(target.clone()).await?;
        self.ensure_correct_network(&target).await?;
        info!(chain_id = self.chain.chain_id, name = %self.chain.name, "Network switched");
        Ok(self.chain.clone())
    }

    /// Tear down the strategy and reset to a fresh disconnected session.
    pub async fn disconnect(&mut self, end_session: bool) -> Result<()> {
        if let Some(strategy) = self.strategy.take() {
            strategy.disconnect(end_session).await?;
            info!(end_session, "Wallet disconnected");
        }
        *self = Self::with_provider_factory(self.options.clone(), self.factory.clone())?;
        Ok(())
    }

    /// Raw JSON-RPC. Wallet methods are answered by the strategy, the rest by the node.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        match self.strategy.as_ref() {
            Some(strategy) => {
                if let Some(result) = intercept(strategy.as_ref(), &self.ctx, method, &params).await {
                    return result;
                }
            }
            None if InterceptedMethod::parse(method).is_some() => return Err(Error::NotConnected),
            None => {}
        }
        self.ctx.request(method, &params).await
    }

    pub async fn address(&self) -> Result<Address> {
        self.strategy()?.address().await
    }

    pub async fn is_connected(&self) -> bool {
        match (&self.strategy, self.state) {
            (Some(strategy), ConnectionState::Connected) => strategy.is_connected().await,
            _ => false,
        }
    }

    /// Native balance of the connected address.
    pub async fn balance(&self) -> Result<U256> {
        self.balance_of(None).await
    }

    /// Balance of the connected address in the native currency, or in the ERC-20 token at
    /// `currency`.
    pub async fn balance_of(&self, currency: Option<Address>) -> Result<U256> {
        let address = self.address().await?;
        match currency {
            None => Ok(self.ctx.provider.get_balance(address).await?),
            Some(token) => {
                let erc20 = IERC20::new(token, self.ctx.provider.clone());
                Ok(erc20.balanceOf(address).call().await?)
            }
        }
    }

    /// Send `amount` to `to` in the native currency, or in the ERC-20 token at `currency`.
    pub async fn transfer(
        &self,
        to: Address,
        amount: U256,
        currency: Option<Address>,
    ) -> Result<TransactionResult> {
        let input = match currency {
            None => TransactionInput::new().to(to).value(amount),
            Some(token) => TransactionInput::new()
                .to(token)
                .data(IERC20::transferCall { to, amount }.abi_encode()),
        };
        self.execute_named("transfer", input, None).await
    }

    pub async fn status(&self) -> Result<WalletStatus> {
        let strategy = self.strategy()?;
        let address = strategy.address().await?;
        Ok(WalletStatus {
            kind: strategy.kind(),
            address,
            signer: Some(strategy.signer_address().await?),
            balance: self.ctx.provider.get_balance(address).await?,
            chain: self.chain.clone(),
        })
    }

    /// EIP-191 signature, 65 bytes.
    pub async fn sign_message(&self, message: impl AsRef<[u8]>) -> Result<Bytes> {
        self.strategy()?.sign_message(&self.ctx, message.as_ref()).await
    }

    pub async fn sign_typed_data(&self, data: &TypedData) -> Result<Bytes> {
        self.strategy()?.sign_typed_data(&self.ctx, data).await
    }

    pub async fn sign_typed_message(&self, message: &TypedMessage) -> Result<Bytes> {
        self.sign_typed_data(&message.to_typed_data()).await
    }

    pub fn recover_address(&self, message: impl AsRef<[u8]>, signature: &[u8]) -> Result<Address> {
        crate::wallet::recover_address(message.as_ref(), signature)
    }

    /// Submit without waiting for inclusion. `from` defaults to the connected address.
    pub async fn send_transaction(
        &self,
        input: TransactionInput,
        gasless: Option<bool>,
    ) -> Result<B256> {
        let strategy = self.strategy()?;
        let input = self.with_sender(strategy.as_ref(), input).await?;
        self.builder
            .send(strategy.as_ref(), &self.ctx, input, gasless)
            .await
    }

    /// Submit, wait for the receipt and fail if the transaction reverted.
    pub async fn execute(
        &self,
        input: TransactionInput,
        gasless: Option<bool>,
    ) -> Result<TransactionResult> {
        self.execute_named("execute", input, gasless).await
    }

    pub(crate) async fn execute_named(
        &self,
        method: &str,
        input: TransactionInput,
        gasless: Option<bool>,
    ) -> Result<TransactionResult> {
        let strategy = self.strategy()?;
        let input = self.with_sender(strategy.as_ref(), input).await?;
        self.builder
            .send_and_confirm(strategy.as_ref(), &self.ctx, method, input, gasless)
            .await
    }

    async fn with_sender(
        &self,
        strategy: &dyn SigningStrategy,
        mut input: TransactionInput,
    ) -> Result<TransactionInput> {
        if input.from.is_none() {
            input.from = Some(strategy.address().await?);
        }
        Ok(input)
    }

    pub async fn wait_for_receipt(
        &self,
        tx_hash: B256,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult> {
        self.builder.wait_for_receipt(&self.ctx, tx_hash, cancel).await
    }

    pub async fn estimate_gas_limit(&self, input: &TransactionInput) -> Result<u64> {
        self.builder.estimate_gas_limit(&self.ctx, input).await
    }

    pub async fn estimate_gas_price(&self) -> Result<u128> {
        self.builder.estimate_gas_price(&self.ctx).await
    }

    pub async fn simulate(&self, input: &TransactionInput) -> Result<Bytes> {
        self.builder.simulate(&self.ctx, input).await
    }

    pub fn contract(&self, address: Address) -> Contract<'_> {
        Contract::new(self, address, None)
    }

    pub fn contract_with_abi(&self, address: Address, abi: JsonAbi) -> Contract<'_> {
        Contract::new(self, address, Some(abi))
    }

    // =========================================================================
    // Smart wallet operations
    // =========================================================================

    fn smart_account(&self) -> Result<&SmartAccount> {
        self.strategy()?
            .as_smart_account()
            .ok_or_else(Error::smart_wallet_only)
    }

    async fn set_permissions(
        &self,
        request: &crate::eip712::SignerPermissionRequest,
    ) -> Result<TransactionResult> {
        let account = self.smart_account()?;
        let data = account.permission_request_calldata(&self.ctx, request).await?;
        let input = TransactionInput::new()
            .from(account.account_address())
            .to(account.account_address())
            .data(data);
        self.execute_named("setPermissionsForSigner", input, Some(false))
            .await
    }

    pub async fn add_admin(&self, signer: Address) -> Result<TransactionResult> {
        self.smart_account()?;
        self.set_permissions(&add_admin_request(signer)).await
    }

    pub async fn remove_admin(&self, signer: Address) -> Result<TransactionResult> {
        self.smart_account()?;
        self.set_permissions(&remove_admin_request(signer)).await
    }

    pub async fn create_session_key(
        &self,
        signer: Address,
        permissions: &SessionKeyPermissions,
    ) -> Result<TransactionResult> {
        self.smart_account()?;
        self.set_permissions(&session_key_request(signer, permissions))
            .await
    }

    pub async fn revoke_session_key(&self, signer: Address) -> Result<TransactionResult> {
        self.smart_account()?;
        self.set_permissions(&revoke_session_key_request(signer)).await
    }

    pub async fn get_all_active_signers(&self) -> Result<Vec<SignerInfo>> {
        self.smart_account()?
            .get_all_active_signers(&self.ctx)
            .await
    }

    /// Whether the smart account has code on the current chain.
    pub async fn is_deployed(&self) -> Result<bool> {
        self.smart_account()?.is_deployed(&self.ctx).await
    }
}
