pub mod consts;
pub mod sdk;

// Re-export for convenience
pub use sdk::{
    load_options_from_path, GaslessOptions, SdkOptions, SmartWalletOptions, SupportedChain,
    WalletOptions,
};
