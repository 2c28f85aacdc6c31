//! Transaction assembly, gas policy and dispatch.
//!
//! [`TransactionBuilder`] decides between a direct send through the active signing
//! strategy and a gasless send through the forwarder relay. Every send runs inside a
//! per-address, per-chain lock, so the nonce read, signature and broadcast of one send
//! never interleave with another send from the same wallet.
//!
//! No queue is kept across sends. Callers that need ordered mining must wait for each
//! receipt before building the next transaction.

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::{Address, Bytes, TxKind, B256, U256};
use alloy::providers::Provider;
use alloy::rpc::types::{TransactionInput as RpcInput, TransactionReceipt, TransactionRequest};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::consts::{GAS_PRICE_TIP_PERCENT, MAX_GAS_PRICE_WEI, MIN_GAS_LIMIT};
use crate::config::GaslessOptions;
use crate::eip712::{forwarder_domain, ForwardRequest, TypedMessage};
use crate::error::{Error, Result};
use crate::retry::{poll_until, RetryConfig};
use crate::rpc::errors::is_unsupported_method;
use crate::rpc::ChainContext;
use crate::wallet::{SigningStrategy, StrategyKind};

pub mod receipt;
pub mod relay;

pub use receipt::{total_cost, TransactionResult};
use relay::RelayClient;

sol! {
    #[sol(rpc)]
    interface IForwarder {
        function getNonce(address from) external view returns (uint256);
    }
}

/// A transaction under construction. `to` and `from` are required before sending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionInput {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeeKind {
    Legacy,
    Eip1559,
}

impl TransactionInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Address) -> Self {
        self.to = Some(to);
        self
    }

    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    pub fn max_fee_per_gas(mut self, max_fee: u128) -> Self {
        self.max_fee_per_gas = Some(max_fee);
        self
    }

    pub fn max_priority_fee_per_gas(mut self, priority_fee: u128) -> Self {
        self.max_priority_fee_per_gas = Some(priority_fee);
        self
    }

    pub fn nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }

    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn fee_kind(&self) -> FeeKind {
        if self.max_fee_per_gas.is_some() {
            FeeKind::Eip1559
        } else {
            FeeKind::Legacy
        }
    }

    /// `(from, to)`, or an error naming whichever is missing.
    pub fn endpoints(&self) -> Result<(Address, Address)> {
        let from = self
            .from
            .ok_or_else(|| Error::InvalidInput("transaction 'from' must be set".into()))?;
        let to = self
            .to
            .ok_or_else(|| Error::InvalidInput("transaction 'to' must be set".into()))?;
        Ok((from, to))
    }

    /// Request suitable for `eth_call` and `eth_estimateGas`.
    pub fn to_call_request(&self) -> TransactionRequest {
        TransactionRequest {
            from: self.from,
            to: self.to.map(TxKind::Call),
            value: Some(self.value),
            input: RpcInput::new(self.data.clone()),
            ..Default::default()
        }
    }

    /// Full request including every gas and nonce field that has been set.
    pub fn to_request(&self) -> TransactionRequest {
        TransactionRequest {
            gas: self.gas_limit,
            gas_price: self.gas_price,
            max_fee_per_gas: self.max_fee_per_gas,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas,
            nonce: self.nonce,
            chain_id: self.chain_id,
            ..self.to_call_request()
        }
    }
}

pub fn apply_gas_floor(estimate: u64) -> u64 {
    estimate.max(MIN_GAS_LIMIT)
}

/// Network price plus the tip, capped at the ceiling.
pub fn apply_gas_price_policy(network_price: u128) -> u128 {
    let tip = network_price.saturating_mul(GAS_PRICE_TIP_PERCENT) / 100;
    let tipped = network_price.saturating_add(tip);
    tipped.min(MAX_GAS_PRICE_WEI)
}

/// Gas limit for `input`, never below the floor.
///
/// Only a node without `eth_estimateGas` falls back to the floor. Any other estimation
/// failure, a revert included, is returned so nothing doomed gets broadcast.
pub async fn estimate_gas_limit(ctx: &ChainContext, input: &TransactionInput) -> Result<u64> {
    match ctx.provider.estimate_gas(input.to_call_request()).await {
        Ok(estimate) => Ok(apply_gas_floor(estimate)),
        Err(e) if is_unsupported_method(&e) => {
            warn!(error = %e, fallback = MIN_GAS_LIMIT, "Gas estimation unavailable, using floor");
            Ok(MIN_GAS_LIMIT)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn estimate_gas_price(ctx: &ChainContext) -> Result<u128> {
    Ok(apply_gas_price_policy(ctx.provider.get_gas_price().await?))
}

/// Fill in nonce, gas and fees, sign with `signer` and broadcast the raw transaction.
///
/// Must run inside the caller's nonce lock.
pub async fn sign_and_broadcast(
    ctx: &ChainContext,
    signer: &PrivateKeySigner,
    input: &TransactionInput,
) -> Result<B256> {
    let (from, _) = input.endpoints()?;
    if from != signer.address() {
        return Err(Error::InvalidInput(format!(
            "transaction from {from} cannot be signed by {}",
            signer.address()
        )));
    }

    let mut filled = input.clone();
    if filled.nonce.is_none() {
        filled.nonce = Some(ctx.provider.get_transaction_count(from).pending().await?);
    }
    if filled.gas_limit.is_none() {
        filled.gas_limit = Some(estimate_gas_limit(ctx, input).await?);
    }
    if filled.chain_id.is_none() {
        filled.chain_id = Some(ctx.chain_id);
    }
    match filled.fee_kind() {
        FeeKind::Eip1559 => {
            filled.max_priority_fee_per_gas = Some(filled.max_priority_fee_per_gas.unwrap_or(0));
        }
        FeeKind::Legacy => {
            if filled.gas_price.is_none() {
                filled.gas_price = Some(estimate_gas_price(ctx).await?);
            }
        }
    }

    let wallet = EthereumWallet::from(signer.clone());
    let request = filled.to_request();
    let envelope = <TransactionRequest as alloy::network::TransactionBuilder<Ethereum>>::build(
        request, &wallet,
    )
    .await
    .map_err(|e| Error::Signer(e.to_string()))?;

    let raw = envelope.encoded_2718();
    let pending = ctx.provider.send_raw_transaction(&raw).await?;
    Ok(*pending.tx_hash())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendRoute {
    Direct,
    Relay,
}

/// Resolve the requested gasless flag against what the SDK was configured with.
pub fn dispatch_route(gasless_requested: Option<bool>, gasless_configured: bool) -> Result<SendRoute> {
    match (gasless_requested, gasless_configured) {
        (None, true) | (Some(true), true) => Ok(SendRoute::Relay),
        (None, false) | (Some(false), _) => Ok(SendRoute::Direct),
        (Some(true), false) => Err(Error::GaslessNotConfigured),
    }
}

/// Locks scoped to one sender on one chain.
#[derive(Default, Clone)]
pub struct NonceLocks {
    locks: Arc<Mutex<HashMap<(Address, u64), Arc<Mutex<()>>>>>,
}

impl NonceLocks {
    pub async fn acquire(&self, address: Address, chain_id: u64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry((address, chain_id)).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Forwarder nonces already signed for, per sender and chain.
///
/// The forwarder only advances its nonce once a relayed request is mined, so a send that
/// follows an unmined one must not reuse the on-chain value.
#[derive(Default, Clone)]
pub struct ForwarderNonces {
    reserved: Arc<Mutex<HashMap<(Address, u64), U256>>>,
}

impl ForwarderNonces {
    /// Next nonce to sign: the on-chain nonce, or one past the last reservation if higher.
    pub async fn reserve(&self, from: Address, chain_id: u64, on_chain: U256) -> U256 {
        let mut reserved = self.reserved.lock().await;
        let nonce = match reserved.get(&(from, chain_id)) {
            Some(last) if *last >= on_chain => *last + U256::from(1),
            _ => on_chain,
        };
        reserved.insert((from, chain_id), nonce);
        nonce
    }

    /// Hand `nonce` back after a failed sign or submit, if nothing was reserved after it.
    pub async fn release(&self, from: Address, chain_id: u64, nonce: U256) {
        let mut reserved = self.reserved.lock().await;
        let key = (from, chain_id);
        if reserved.get(&key) != Some(&nonce) {
            return;
        }
        if nonce.is_zero() {
            reserved.remove(&key);
        } else {
            reserved.insert(key, nonce - U256::from(1));
        }
    }
}

pub struct TransactionBuilder {
    gasless: Option<GaslessOptions>,
    relay: RelayClient,
    nonce_locks: NonceLocks,
    forwarder_nonces: ForwarderNonces,
    receipt_poll: RetryConfig,
}

impl TransactionBuilder {
    pub fn new(gasless: Option<GaslessOptions>) -> Self {
        Self {
            gasless,
            relay: RelayClient::new(),
            nonce_locks: NonceLocks::default(),
            forwarder_nonces: ForwarderNonces::default(),
            receipt_poll: RetryConfig::for_receipts(),
        }
    }

    pub fn with_receipt_poll(mut self, config: RetryConfig) -> Self {
        self.receipt_poll = config;
        self
    }

    pub fn gasless_configured(&self) -> bool {
        self.gasless.is_some()
    }

    pub async fn estimate_gas_limit(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<u64> {
        estimate_gas_limit(ctx, input).await
    }

    pub async fn estimate_gas_price(&self, ctx: &ChainContext) -> Result<u128> {
        estimate_gas_price(ctx).await
    }

    /// Run `input` as an `eth_call` against the latest block.
    pub async fn simulate(&self, ctx: &ChainContext, input: &TransactionInput) -> Result<Bytes> {
        Ok(ctx.provider.call(input.to_call_request()).await?)
    }

    /// Submit `input` and return its hash without waiting for it to be mined.
    pub async fn send(
        &self,
        strategy: &dyn SigningStrategy,
        ctx: &ChainContext,
        input: TransactionInput,
        gasless: Option<bool>,
    ) -> Result<B256> {
        let route = dispatch_route(gasless, self.gasless_configured())?;
        let (from, to) = input.endpoints()?;
        // Smart accounts sponsor through their own paymaster, never the forwarder.
        let route = match strategy.kind() {
            StrategyKind::SmartAccount => SendRoute::Direct,
            _ => route,
        };

        let _guard = self.nonce_locks.acquire(from, ctx.chain_id).await;
        let tx_hash = match route {
            SendRoute::Direct => strategy.send_transaction(ctx, &input).await?,
            SendRoute::Relay => self.send_gasless(strategy, ctx, &input).await?,
        };

        info!(
            route = ?route,
            from = %from,
            to = %to,
            tx_hash = ?tx_hash,
            "Transaction submitted"
        );
        Ok(tx_hash)
    }

    async fn send_gasless(
        &self,
        strategy: &dyn SigningStrategy,
        ctx: &ChainContext,
        input: &TransactionInput,
    ) -> Result<B256> {
        let options = self.gasless.as_ref().ok_or(Error::GaslessNotConfigured)?;
        let (from, to) = input.endpoints()?;

        let forwarder = IForwarder::new(options.forwarder_address, ctx.provider.clone());
        let on_chain = forwarder.getNonce(from).call().await?;

        let gas = match input.gas_limit {
            Some(gas) => gas,
            None => estimate_gas_limit(ctx, input).await?,
        };

        let nonce = self
            .forwarder_nonces
            .reserve(from, ctx.chain_id, on_chain)
            .await;
        let submitted = self.relay_signed(strategy, ctx, options, input, gas, nonce).await;
        if submitted.is_err() {
            self.forwarder_nonces.release(from, ctx.chain_id, nonce).await;
        }
        submitted
    }

    async fn relay_signed(
        &self,
        strategy: &dyn SigningStrategy,
        ctx: &ChainContext,
        options: &GaslessOptions,
        input: &TransactionInput,
        gas: u64,
        nonce: U256,
    ) -> Result<B256> {
        let (from, to) = input.endpoints()?;

        let request = ForwardRequest {
            from,
            to,
            value: input.value,
            gas: U256::from(gas),
            nonce,
            data: input.data.clone(),
        };
        let message = TypedMessage::new(forwarder_domain(options, ctx.chain_id), request.clone());
        let signature = strategy
            .sign_typed_data_as_signer(ctx, &message.to_typed_data())
            .await?;

        self.relay.submit(options, &request, &signature).await
    }

    /// Poll until `tx_hash` is mined. Cancelling `cancel` stops polling only.
    pub async fn wait_for_receipt(
        &self,
        ctx: &ChainContext,
        tx_hash: B256,
        cancel: &CancellationToken,
    ) -> Result<TransactionResult> {
        wait_for_receipt(ctx, tx_hash, self.receipt_poll.clone(), cancel).await
    }

    /// Send, wait for the receipt and fail if the transaction reverted.
    pub async fn send_and_confirm(
        &self,
        strategy: &dyn SigningStrategy,
        ctx: &ChainContext,
        method: &str,
        input: TransactionInput,
        gasless: Option<bool>,
    ) -> Result<TransactionResult> {
        let tx_hash = self.send(strategy, ctx, input.clone(), gasless).await?;
        let result = self
            .wait_for_receipt(ctx, tx_hash, &CancellationToken::new())
            .await?;

        log_fee_details(method, &result.receipt, input.gas_limit);

        if !result.is_successful() {
            let reason = match self.simulate(ctx, &input).await {
                Err(Error::Network(reason)) => reason,
                _ => format!("{method} reverted on-chain"),
            };
            return Err(Error::TransactionReverted { tx_hash, reason });
        }
        Ok(result)
    }
}

pub async fn wait_for_receipt(
    ctx: &ChainContext,
    tx_hash: B256,
    config: RetryConfig,
    cancel: &CancellationToken,
) -> Result<TransactionResult> {
    let provider = ctx.provider.clone();
    let receipt = poll_until(config, "eth_getTransactionReceipt", cancel, move || {
        let provider = provider.clone();
        async move { Ok(provider.get_transaction_receipt(tx_hash).await?) }
    })
    .await?;
    Ok(TransactionResult::from(receipt))
}

fn log_fee_details(method: &str, receipt: &TransactionReceipt, gas_limit: Option<u64>) {
    let total_cost = total_cost(receipt);
    info!(
        method = %method,
        tx_hash = ?receipt.transaction_hash,
        block_number = ?receipt.block_number,
        gas_used = %receipt.gas_used,
        gas_limit = ?gas_limit,
        effective_gas_price = ?receipt.effective_gas_price,
        total_cost = %total_cost,
        "💰 transaction gas details"
    );
}
