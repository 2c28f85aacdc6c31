use alloy::primitives::{utils::format_ether, Address, U256};
use term_table::row::Row;
use term_table::table_cell::{Alignment as CellAlignment, TableCell};
use term_table::{Table, TableStyle};
use tracing::{info, warn};

use super::StrategyKind;
use crate::chain::ChainDescriptor;

/// Connection summary shown after a wallet is loaded
#[derive(Debug, Clone)]
pub struct WalletStatus {
    pub kind: StrategyKind,
    pub address: Address,
    pub signer: Option<Address>,
    pub balance: U256,
    pub chain: ChainDescriptor,
}

fn label_row(label: &str, value: String) -> Row {
    Row::new(vec![
        TableCell::builder(label)
            .alignment(CellAlignment::Right)
            .build(),
        TableCell::builder(value)
            .alignment(CellAlignment::Left)
            .build(),
    ])
}

/// Render the status banner as a table.
pub fn render_wallet_status(status: &WalletStatus) -> String {
    let mut table = Table::new();
    table.style = TableStyle::extended();

    let header = match status.kind {
        StrategyKind::LocalKey => "🔑 LOCAL WALLET CONNECTED 🔑",
        StrategyKind::ExternalProvider => "🔌 EXTERNAL WALLET CONNECTED 🔌",
        StrategyKind::SmartAccount => "🛡️  SMART WALLET CONNECTED 🛡️",
    };
    table.add_row(Row::new(vec![TableCell::builder(header)
        .col_span(2)
        .alignment(CellAlignment::Center)
        .build()]));

    table.add_row(label_row("Address", format!("{:?}", status.address)));
    if let Some(signer) = status.signer.filter(|s| *s != status.address) {
        table.add_row(label_row("Signer", format!("{signer:?}")));
    }
    table.add_row(label_row(
        "Balance",
        format!(
            "{} {}",
            format_ether(status.balance),
            status.chain.native_currency_symbol
        ),
    ));
    table.add_row(label_row(
        "Network",
        format!("{} ({})", status.chain.name, status.chain.chain_id),
    ));
    table.add_row(label_row("RPC URL", status.chain.rpc_url.clone()));

    let footer = if status.balance.is_zero() {
        "❗ Please fund this address to send transactions ❗"
    } else {
        "✅ Ready"
    };
    table.add_row(Row::new(vec![TableCell::builder(footer)
        .col_span(2)
        .alignment(CellAlignment::Center)
        .build()]));

    table.render()
}

/// Log the status banner; warns when the wallet has no funds.
pub fn display_wallet_status(status: &WalletStatus) {
    let rendered = render_wallet_status(status);
    if status.balance.is_zero() {
        warn!("\n{}", rendered);
    } else {
        info!("\n{}", rendered);
    }
}
