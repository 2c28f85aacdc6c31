//! Batched reads through Multicall3.

use alloy::providers::{CallItem, MulticallBuilder};
use alloy::sol_types::SolCall;
use futures_util::future::try_join_all;
use tracing::{debug, warn};

use super::Contract;
use crate::config::consts::DEFAULT_CALLS_PER_REQUEST;
use crate::error::{Error, Result};

/// How a batch was actually read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    Multicall,
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRead<T> {
    pub values: Vec<T>,
    pub path: ReadPath,
}

impl<'a> Contract<'a> {
    async fn aggregate_chunk<C: SolCall + 'static>(&self, calls: &[C]) -> Result<Vec<C::Return>> {
        let provider = self.session.context().provider.clone();
        let builder = calls
            .iter()
            .fold(MulticallBuilder::new_dynamic(provider), |builder, call| {
                builder.add_call_dynamic(CallItem::<C>::new(self.address, call.abi_encode().into()))
            });
        let results = builder.aggregate3().await?;
        if results.len() != calls.len() {
            return Err(Error::AbiMismatch(format!(
                "multicall returned {} results for {} calls",
                results.len(),
                calls.len()
            )));
        }

        results
            .into_iter()
            .map(|result| {
                result.map_err(|failure| {
                    Error::Network(format!("multicall entry {} reverted", failure.idx))
                })
            })
            .collect()
    }

    /// Read every call through Multicall3, using as few invocations as the chunk size
    /// allows. Fails if any chunk fails; see [`Contract::read_batch`] for the fallback.
    pub async fn multicall_read<C: SolCall + 'static>(&self, calls: &[C]) -> Result<Vec<C::Return>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }
        debug!(
            contract = %self.address,
            calls = calls.len(),
            chunks = calls.len().div_ceil(DEFAULT_CALLS_PER_REQUEST),
            "Multicall read"
        );
        let chunks = try_join_all(
            calls
                .chunks(DEFAULT_CALLS_PER_REQUEST)
                .map(|chunk| self.aggregate_chunk(chunk)),
        )
        .await?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// One `eth_call` per entry, in order.
    pub async fn sequential_read<C: SolCall>(&self, calls: &[C]) -> Result<Vec<C::Return>> {
        let mut values = Vec::with_capacity(calls.len());
        for call in calls {
            values.push(self.read(call).await?);
        }
        Ok(values)
    }

    /// Multicall first, falling back to sequential reads when the batch fails.
    pub async fn read_batch<C: SolCall + 'static>(&self, calls: &[C]) -> Result<BatchRead<C::Return>> {
        match self.multicall_read(calls).await {
            Ok(values) => Ok(BatchRead {
                values,
                path: ReadPath::Multicall,
            }),
            Err(e) => {
                warn!(
                    contract = %self.address,
                    error = %e,
                    "Multicall failed, reading sequentially"
                );
                Ok(BatchRead {
                    values: self.sequential_read(calls).await?,
                    path: ReadPath::Sequential,
                })
            }
        }
    }
}
