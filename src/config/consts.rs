//! Centralized constants for gas policy, polling, chain defaults and contract addresses.
//!
//! Values that depend on the build profile are conditionally compiled (debug vs release).

use alloy::primitives::{address, Address, FixedBytes};

// =============================================================================
// Keystore
// =============================================================================

/// File name of the encrypted local account inside the keystore directory
pub const DEFAULT_KEYSTORE_FILE: &str = "account.json";

/// Fallback device identifier when the host cannot provide one
pub const FALLBACK_DEVICE_ID: &str = "evmkit-device";

// =============================================================================
// Gas Policy
// =============================================================================

/// Lowest gas limit ever submitted for a contract call
pub const MIN_GAS_LIMIT: u64 = 100_000;

/// Tip added on top of the node's gas price, in percent
pub const GAS_PRICE_TIP_PERCENT: u128 = 10;

/// Hard ceiling for the legacy gas price (300 Gwei)
pub const MAX_GAS_PRICE_WEI: u128 = 300_000_000_000;

// =============================================================================
// Receipt Polling
// =============================================================================

/// Initial delay between receipt polls in milliseconds
#[cfg(debug_assertions)]
pub const RECEIPT_POLL_INITIAL_MS: u64 = 250;

#[cfg(not(debug_assertions))]
pub const RECEIPT_POLL_INITIAL_MS: u64 = 1000;

/// Upper bound for the receipt poll delay in milliseconds
pub const RECEIPT_POLL_MAX_MS: u64 = 4000;

/// Backoff multiplier applied between receipt polls
pub const RECEIPT_POLL_BACKOFF: f64 = 1.5;

/// Delay between user operation status polls in seconds
pub const USER_OP_POLL_SECS: u64 = 2;

// =============================================================================
// Retry Settings
// =============================================================================

pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_READ_RETRY_DELAY_SECS: u64 = 1;

// =============================================================================
// Chain Defaults
// =============================================================================

pub const DEFAULT_EXPLORER_URL: &str = "https://etherscan.io";
pub const DEFAULT_NATIVE_SYMBOL: &str = "ETH";
pub const DEFAULT_NATIVE_NAME: &str = "Ether";
pub const DEFAULT_NATIVE_DECIMALS: u8 = 18;
pub const UNKNOWN_CHAIN_PREFIX: &str = "Unknown Chain";

// =============================================================================
// Gasless Relayer Defaults
// =============================================================================

pub const DEFAULT_FORWARDER_ADDRESS: Address =
    address!("D04F98C88cE1054c90022EE34d566B9237a1203C");
pub const DEFAULT_FORWARDER_DOMAIN_NAME: &str = "GSNv2 Forwarder";
pub const DEFAULT_FORWARDER_DOMAIN_VERSION: &str = "0.0.1";

// =============================================================================
// Multicall
// =============================================================================

/// Maximum number of calls packed into one aggregate3 invocation
pub const DEFAULT_CALLS_PER_REQUEST: usize = 100;

/// Largest ERC-721 balance or id range enumerated in one call
pub const MAX_OWNED_TOKENS: u64 = 10_000;

// =============================================================================
// Smart Accounts
// =============================================================================

/// ERC-1271 isValidSignature magic value
pub const ERC1271_MAGIC_VALUE: FixedBytes<4> = FixedBytes([0x16, 0x26, 0xba, 0x7e]);

/// EIP-712 domain used by accounts that support typed personal messages
pub const ACCOUNT_DOMAIN_NAME: &str = "Account";
pub const ACCOUNT_DOMAIN_VERSION: &str = "1";

/// Placeholder values for the gas estimation user operation
pub const USER_OP_PLACEHOLDER_GAS: u64 = 100_000;
pub const USER_OP_PLACEHOLDER_MAX_FEE: u128 = 21;
pub const USER_OP_PLACEHOLDER_PRIORITY_FEE: u128 = 1;

/// Validity window applied to signer permission requests
pub const PERMISSION_REQUEST_VALIDITY_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Clock skew tolerated at the start of a permission window
pub const PERMISSION_START_SKEW_SECS: u64 = 10;

// =============================================================================
// ZkSync
// =============================================================================

pub const ZKSYNC_DOMAIN_NAME: &str = "zkSync";
pub const ZKSYNC_DOMAIN_VERSION: &str = "2";

// =============================================================================
// Revert Decoding
// =============================================================================

/// Solidity Error(string) function selector
pub const ERROR_STRING_SELECTOR: &str = "08c379a0";
