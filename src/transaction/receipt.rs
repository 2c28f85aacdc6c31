use alloy::primitives::U256;
use alloy::rpc::types::TransactionReceipt;
use serde::{Deserialize, Serialize};

/// Total fee paid by a mined transaction.
pub fn total_cost(receipt: &TransactionReceipt) -> U256 {
    U256::from(receipt.gas_used) * U256::from(receipt.effective_gas_price)
}

/// A mined transaction together with its status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionResult {
    pub receipt: TransactionReceipt,
    /// Receipt status as a string, "1" for success and "0" for a revert.
    pub id: String,
}

impl From<TransactionReceipt> for TransactionResult {
    fn from(receipt: TransactionReceipt) -> Self {
        let id = if receipt.status() { "1" } else { "0" }.to_string();
        Self { receipt, id }
    }
}

impl TransactionResult {
    pub fn is_successful(&self) -> bool {
        self.receipt.status()
    }

    pub fn transaction_hash(&self) -> String {
        format!("{:#x}", self.receipt.transaction_hash)
    }
}
