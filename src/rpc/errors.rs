//! Human readable decoding of JSON-RPC failures.

use alloy::sol_types::{Revert, SolError};
use alloy::transports::TransportError;

use crate::config::consts::ERROR_STRING_SELECTOR;

/// JSON-RPC code for a method the node does not implement.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// Decode `Error(string)` revert data into its reason.
pub fn decode_revert_reason(revert_data: &str) -> Option<String> {
    let data = revert_data.trim().strip_prefix("0x").unwrap_or(revert_data.trim());
    if !data.starts_with(ERROR_STRING_SELECTOR) {
        return None;
    }
    let bytes = hex::decode(data).ok()?;
    Revert::abi_decode(&bytes).ok().map(|r| r.reason)
}

/// Turn a node error message (plus optional revert data) into the text surfaced to callers.
///
/// The upstream message is always kept so operators can see what the node said.
pub fn describe_rpc_error(message: &str, data: Option<&str>) -> String {
    if let Some(reason) = data.and_then(decode_revert_reason) {
        return format!("Contract reverted: {reason}");
    }

    let lowered = message.to_lowercase();
    if lowered.contains("insufficient funds") {
        format!("Insufficient ETH for gas. Please fund the account. ({message})")
    } else if lowered.contains("replacement transaction underpriced") {
        format!("Transaction underpriced. A pending transaction may be blocking. ({message})")
    } else if lowered.contains("nonce too low") {
        format!("Nonce too low. A transaction may have been confirmed already. ({message})")
    } else {
        message.to_string()
    }
}

/// Whether the node rejected the method itself rather than the request it was given.
pub fn is_unsupported_method(error: &TransportError) -> bool {
    let Some(payload) = error.as_error_resp() else {
        return false;
    };
    let lowered = payload.message.to_lowercase();
    payload.code == METHOD_NOT_FOUND
        || lowered.contains("method not found")
        || lowered.contains("not supported")
        || lowered.contains("does not exist")
}
