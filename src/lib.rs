pub mod chain;
pub mod config;
pub mod contract_client;
pub mod eip712;
pub mod error;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod transaction;
pub mod wallet;

// ============================================================================
// Re-exports
// ============================================================================

pub use chain::{ChainDescriptor, ChainRegistry};
pub use config::{load_options_from_path, SdkOptions};
pub use contract_client::{Contract, ReadPath};
pub use eip712::{TypedDataRequest, TypedMessage};
pub use error::{Error, Result};
pub use session::{ConnectParams, ConnectionState, WalletConnection, WalletSession};
pub use transaction::{TransactionBuilder, TransactionInput, TransactionResult};
pub use wallet::{SigningStrategy, StrategyKind};
