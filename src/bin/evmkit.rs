use alloy::primitives::{utils::parse_ether, Address};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

use evmkit::wallet::display::display_wallet_status;
use evmkit::{
    load_options_from_path, ConnectParams, TransactionInput, WalletConnection, WalletSession,
};

/// evmkit - EVM wallet from the command line
#[derive(Parser)]
#[command(name = "evmkit")]
#[command(about = "Sign, inspect and send from an EVM wallet", long_about = None)]
struct Cli {
    /// SDK options file (TOML)
    #[arg(long, env = "EVMKIT_CONFIG", default_value = "evmkit.toml")]
    config: PathBuf,

    /// Keystore password; the device identifier is used when omitted
    #[arg(long, env = "EVMKIT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Use this private key instead of the keystore
    #[arg(long, env = "EVMKIT_PRIVATE_KEY", hide_env_values = true)]
    private_key: Option<String>,

    /// Connect to this supported chain instead of the configured active chain
    #[arg(long)]
    chain: Option<String>,

    /// Drive a smart account with the local key
    #[arg(long, default_value_t = false)]
    smart_wallet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the wallet address
    Address,

    /// Sign a message with EIP-191
    Sign {
        /// Message to sign
        message: String,
    },

    /// Show the wallet banner with native balance
    Balance,

    /// Send native currency and wait for the receipt
    Send {
        /// Recipient address
        to: Address,

        /// Amount in ether, e.g. 0.01
        amount: String,

        /// Route through the gasless relayer
        #[arg(long)]
        gasless: Option<bool>,
    },
}

fn connection(cli: &Cli) -> WalletConnection {
    let personal = match &cli.private_key {
        Some(key) => WalletConnection::PrivateKey {
            private_key: Zeroizing::new(key.clone()),
        },
        None => WalletConnection::LocalKey {
            password: cli.password.clone().map(Zeroizing::new),
        },
    };
    if cli.smart_wallet {
        WalletConnection::SmartAccount {
            personal: Box::new(personal),
        }
    } else {
        personal
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::WARN.into())
        .from_env_lossy()
        .add_directive("alloy=warn".parse()?)
        .add_directive("evmkit=info".parse()?);

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(true))
        .with(filter)
        .init();

    let cli = Cli::parse();
    let options = load_options_from_path(&cli.config)
        .with_context(|| format!("Failed to load options from {}", cli.config.display()))?;

    let mut session = WalletSession::new(options).context("Failed to create wallet session")?;
    let params = match &cli.chain {
        Some(chain) => ConnectParams::chain(chain.clone()),
        None => ConnectParams::default(),
    };
    let address = session
        .connect(connection(&cli), params)
        .await
        .context("Failed to connect wallet")?;

    match cli.command {
        Commands::Address => println!("{address}"),
        Commands::Sign { message } => {
            let signature = session.sign_message(message.as_bytes()).await?;
            println!("{signature}");
        }
        Commands::Balance => {
            let status = session.status().await?;
            display_wallet_status(&status);
        }
        Commands::Send {
            to,
            amount,
            gasless,
        } => {
            let value = parse_ether(&amount).with_context(|| format!("Invalid amount '{amount}'"))?;
            let input = TransactionInput::new().to(to).value(value);
            let result = session.execute(input, gasless).await?;
            info!(
                tx_hash = %result.transaction_hash(),
                block_number = ?result.receipt.block_number,
                "Transfer mined"
            );
            println!("{}", result.transaction_hash());
        }
    }

    session.disconnect(false).await?;
    Ok(())
}
