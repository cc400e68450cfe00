use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::application::{
    DEFAULT_WALLET_SEED, LedgerConfig, LedgerService, SettlementReport, SettlementWorker,
    WalletSummary, parse_currency,
};
use crate::domain::{Currency, Transaction, WithdrawalMethod, parse_amount};

/// Custodia - custodial wallet ledger
#[derive(Parser)]
#[command(name = "custodia")]
#[command(about = "Custodial wallet ledger for consumer data-sale earnings")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "CUSTODIA_DATABASE", default_value = "custodia.db")]
    pub database: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub ledger: LedgerArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Upper bound for second-valued durations (ten years)
const MAX_DURATION_SECS: i64 = 315_360_000;

/// Settings forwarded to the ledger service
#[derive(Args)]
pub struct LedgerArgs {
    /// Secret seed mixed into derived wallet addresses
    #[arg(long, env = "CUSTODIA_WALLET_SEED", default_value = DEFAULT_WALLET_SEED, hide_env_values = true)]
    pub wallet_seed: String,

    /// Seconds before a pending withdrawal receives a simulated confirmation
    #[arg(
        long,
        env = "CUSTODIA_CONFIRMATION_DELAY",
        default_value = "3",
        value_parser = clap::value_parser!(i64).range(0..=MAX_DURATION_SECS)
    )]
    pub confirmation_delay: i64,

    /// Leave withdrawals pending until explicitly confirmed or failed
    #[arg(long)]
    pub no_simulated_confirmations: bool,

    /// Seconds before a still-pending withdrawal fails and is refunded
    #[arg(
        long,
        env = "CUSTODIA_SETTLEMENT_TIMEOUT",
        default_value = "86400",
        value_parser = clap::value_parser!(i64).range(1..=MAX_DURATION_SECS)
    )]
    pub settlement_timeout: i64,

    /// Eth credited per faucet request
    #[arg(long, default_value = "0.0001")]
    pub faucet_eth: String,

    /// Usdc credited per faucet request
    #[arg(long, default_value = "1.00")]
    pub faucet_usdc: String,
}

impl LedgerArgs {
    pub fn to_config(&self) -> Result<LedgerConfig> {
        let faucet_eth = parse_amount(Currency::Eth, &self.faucet_eth)
            .with_context(|| format!("Invalid faucet eth amount: {}", self.faucet_eth))?;
        let faucet_usdc = parse_amount(Currency::Usdc, &self.faucet_usdc)
            .with_context(|| format!("Invalid faucet usdc amount: {}", self.faucet_usdc))?;

        Ok(LedgerConfig {
            wallet_seed: self.wallet_seed.clone(),
            confirmation_delay: (!self.no_simulated_confirmations)
                .then(|| Duration::seconds(self.confirmation_delay)),
            settlement_timeout: Duration::seconds(self.settlement_timeout),
            faucet: vec![(Currency::Eth, faucet_eth), (Currency::Usdc, faucet_usdc)],
        })
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Credit data-sale proceeds to a wallet
    Credit {
        /// Wallet ID
        wallet_id: String,

        /// Amount to credit (e.g., "5.25")
        amount: String,

        /// Currency: usdc, eth
        #[arg(short, long, default_value = "usdc")]
        currency: String,

        /// Description of the sale
        #[arg(short, long, default_value = "data sale")]
        description: String,

        /// Broker that purchased the data
        #[arg(long)]
        broker: Option<String>,

        /// Data sources included in the sale (repeatable)
        #[arg(long = "source")]
        sources: Vec<String>,
    },

    /// Withdraw funds to an external address or a bank account
    Withdraw {
        /// Consumer ID
        consumer: String,

        /// Amount to withdraw (e.g., "3.00")
        amount: String,

        /// Currency: usdc, eth
        #[arg(short, long, default_value = "usdc")]
        currency: String,

        /// Destination address (0x + 40 hex characters)
        #[arg(long, conflicts_with = "bank", required_unless_present = "bank")]
        to: Option<String>,

        /// Destination bank account ID
        #[arg(long)]
        bank: Option<String>,
    },

    /// List a consumer's transactions, most recent first
    Transactions {
        /// Consumer ID
        consumer: String,
    },

    /// Bank account management commands
    #[command(subcommand)]
    Bank(BankCommands),

    /// Withdrawal settlement commands
    #[command(subcommand)]
    Settle(SettleCommands),

    /// Export a consumer's statement
    Export {
        /// Consumer ID
        consumer: String,

        /// Format: csv, json
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Create a wallet for a consumer
    Create {
        /// Consumer ID
        consumer: String,
    },

    /// Show a consumer's wallet
    Show {
        /// Consumer ID
        consumer: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Credit the faucet amounts to a consumer's wallet
    Fund {
        /// Consumer ID
        consumer: String,
    },

    /// Verify stored balances against the transaction history
    Check {
        /// Consumer ID
        consumer: String,
    },
}

#[derive(Subcommand)]
pub enum BankCommands {
    /// Register a bank account for withdrawals
    Add {
        /// Consumer ID
        consumer: String,

        /// Display label (e.g., "Checking")
        label: String,

        /// Account number (only the last four digits are stored)
        account_number: String,
    },

    /// List a consumer's bank accounts
    List {
        /// Consumer ID
        consumer: String,
    },
}

#[derive(Subcommand)]
pub enum SettleCommands {
    /// Confirm a pending withdrawal
    Confirm {
        /// Transaction ID
        id: String,
    },

    /// Fail a pending withdrawal and refund it
    Fail {
        /// Transaction ID
        id: String,

        /// Reason recorded on the transaction
        #[arg(short, long, default_value = "rejected by settlement provider")]
        reason: String,
    },

    /// Run one settlement pass
    Process,

    /// Run settlement passes until interrupted
    Watch {
        /// Milliseconds between passes
        #[arg(
            long,
            default_value = "1000",
            value_parser = clap::value_parser!(u64).range(1..=86_400_000)
        )]
        interval_ms: u64,
    },
}

/// Run one settlement pass before a command. Failures are logged and do not
/// block the command itself.
async fn settle_due_withdrawals(service: &LedgerService, verbose: bool) -> Option<SettlementReport> {
    match service.process_settlements(Utc::now()).await {
        Ok(report) => {
            if verbose && !report.is_empty() {
                eprintln!(
                    "[Settlement] {} confirmed, {} failed",
                    report.confirmed.len(),
                    report.failed.len()
                );
            }
            Some(report)
        }
        Err(err) => {
            warn!(error = %err, "settlement pass before command failed");
            None
        }
    }
}

impl Cli {
    async fn connect(&self) -> Result<LedgerService> {
        let config = self.ledger.to_config()?;
        Ok(LedgerService::connect(&self.database)
            .await?
            .with_config(config))
    }

    pub async fn run(self) -> Result<()> {
        // Settle due withdrawals before command dispatch (except for Init and Settle)
        if !matches!(self.command, Commands::Init | Commands::Settle(_)) {
            match self.connect().await {
                Ok(service) => {
                    settle_due_withdrawals(&service, self.verbose).await;
                }
                Err(err) => warn!(error = %err, "skipping settlement pass"),
            }
        }

        match &self.command {
            Commands::Init => {
                LedgerService::init(&self.database).await?;
                println!("Database initialized: {}", self.database);
            }

            Commands::Wallet(wallet_cmd) => {
                let service = self.connect().await?;
                run_wallet_command(&service, wallet_cmd).await?;
            }

            Commands::Credit {
                wallet_id,
                amount,
                currency,
                description,
                broker,
                sources,
            } => {
                let service = self.connect().await?;
                let wallet_id = Uuid::parse_str(wallet_id).context("Invalid wallet ID")?;
                let currency = parse_currency(currency)?;

                let mut metadata = Map::new();
                if let Some(broker) = broker {
                    metadata.insert("broker_id".into(), Value::String(broker.clone()));
                }
                if !sources.is_empty() {
                    metadata.insert("data_sources".into(), Value::from(sources.clone()));
                }

                let id = service
                    .credit(wallet_id, currency, amount, description, metadata)
                    .await?;
                let wallet = service.get_wallet_by_id(wallet_id).await?;
                println!("Credited {} {} ({})", amount, currency, id);
                println!(
                    "New balance: {} {}",
                    wallet.formatted_balance(currency),
                    currency
                );
            }

            Commands::Withdraw {
                consumer,
                amount,
                currency,
                to,
                bank,
            } => {
                let service = self.connect().await?;
                let currency = parse_currency(currency)?;
                let method = match (to, bank) {
                    (Some(address), _) => WithdrawalMethod::WalletTransfer {
                        address: address.clone(),
                    },
                    (None, Some(bank)) => WithdrawalMethod::Bank {
                        bank_account_id: Uuid::parse_str(bank)
                            .context("Invalid bank account ID")?,
                    },
                    (None, None) => anyhow::bail!("Either --to or --bank is required"),
                };

                let id = service.withdraw(consumer, currency, amount, method).await?;
                println!("Withdrawal requested: {} (pending)", id);
            }

            Commands::Transactions { consumer } => {
                let service = self.connect().await?;
                run_transactions_command(&service, consumer).await?;
            }

            Commands::Bank(bank_cmd) => {
                let service = self.connect().await?;
                run_bank_command(&service, bank_cmd).await?;
            }

            Commands::Settle(settle_cmd) => {
                let service = self.connect().await?;
                run_settle_command(service, settle_cmd).await?;
            }

            Commands::Export {
                consumer,
                format,
                output,
            } => {
                let service = self.connect().await?;
                run_export_command(&service, consumer, format, output.as_deref()).await?;
            }
        }

        Ok(())
    }
}

async fn run_wallet_command(service: &LedgerService, cmd: &WalletCommands) -> Result<()> {
    match cmd {
        WalletCommands::Create { consumer } => {
            let wallet = service.create_wallet(consumer).await?;
            println!("Created wallet for {}", wallet.consumer_id);
            println!("  ID:      {}", wallet.id);
            println!("  Address: {}", wallet.address);
        }

        WalletCommands::Show { consumer, json } => {
            let summary = service.wallet_summary(consumer).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_wallet_summary(consumer, &summary);
            }
        }

        WalletCommands::Fund { consumer } => {
            let result = service.fund_from_faucet(consumer).await?;
            println!("Funded wallet with {} deposit(s)", result.transactions.len());
            for (currency, balance) in &result.balances {
                println!("  {:<6} {:>16}", currency.as_str(), balance);
            }
        }

        WalletCommands::Check { consumer } => {
            let report = service.check_wallet(consumer).await?;
            println!("Checking wallet {}...\n", report.wallet.address);
            println!("Transactions:        {}", report.transaction_count);
            println!("Pending withdrawals: {}", report.pending_withdrawals);
            println!();

            if report.is_consistent() {
                println!("✓ Balances match transaction history");
            } else {
                for drift in &report.drift {
                    println!(
                        "✗ {}: stored {}, history {}",
                        drift.currency,
                        crate::domain::format_amount(drift.currency, drift.stored),
                        crate::domain::format_amount(drift.currency, drift.replayed)
                    );
                }
                anyhow::bail!("Balance drift detected");
            }
        }
    }
    Ok(())
}

fn print_wallet_summary(consumer: &str, summary: &WalletSummary) {
    match &summary.wallet {
        None => println!("No wallet for {}.", consumer),
        Some(wallet) => {
            println!("Wallet: {}", consumer);
            println!("  ID:      {}", wallet.id);
            println!("  Address: {}", wallet.address);
            println!(
                "  Created: {}",
                wallet.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!(
                "  Updated: {}",
                wallet.updated_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            for (currency, balance) in &wallet.balances {
                println!("  {:<6} {:>16}", currency.as_str(), balance);
            }
        }
    }
}

async fn run_transactions_command(service: &LedgerService, consumer: &str) -> Result<()> {
    let transactions = service.list_transactions(consumer).await?;

    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<17} {:<10} {:<9} {:>14} {:<5} DESCRIPTION",
        "DATE", "KIND", "STATUS", "AMOUNT", ""
    );
    println!("{}", "-".repeat(80));
    for tx in &transactions {
        print_transaction_row(tx);
    }
    Ok(())
}

fn print_transaction_row(tx: &Transaction) {
    println!(
        "{:<17} {:<10} {:<9} {:>14} {:<5} {}",
        tx.created_at.format("%Y-%m-%d %H:%M"),
        tx.kind.as_str(),
        tx.status.as_str(),
        tx.formatted_amount(),
        tx.currency.as_str(),
        truncate(&tx.description, 40)
    );
}

async fn run_bank_command(service: &LedgerService, cmd: &BankCommands) -> Result<()> {
    match cmd {
        BankCommands::Add {
            consumer,
            label,
            account_number,
        } => {
            let account = service
                .add_bank_account(consumer, label, account_number)
                .await?;
            println!("Added bank account {} ({})", account.masked(), account.id);
        }

        BankCommands::List { consumer } => {
            let accounts = service.list_bank_accounts(consumer).await?;
            if accounts.is_empty() {
                println!("No bank accounts found.");
            } else {
                println!("{:<38} {}", "ID", "ACCOUNT");
                println!("{}", "-".repeat(60));
                for account in accounts {
                    println!("{:<38} {}", account.id, account.masked());
                }
            }
        }
    }
    Ok(())
}

async fn run_settle_command(service: LedgerService, cmd: &SettleCommands) -> Result<()> {
    match cmd {
        SettleCommands::Confirm { id } => {
            let id = Uuid::parse_str(id).context("Invalid transaction ID")?;
            let tx = service.confirm_withdrawal(id).await?;
            println!("Withdrawal {} {}", tx.id, tx.status);
        }

        SettleCommands::Fail { id, reason } => {
            let id = Uuid::parse_str(id).context("Invalid transaction ID")?;
            let tx = service.fail_withdrawal(id, reason).await?;
            println!("Withdrawal {} {} and refunded", tx.id, tx.status);
        }

        SettleCommands::Process => {
            let report = service.process_settlements(Utc::now()).await?;
            println!(
                "Settled {} withdrawal(s): {} confirmed, {} failed",
                report.confirmed.len() + report.failed.len(),
                report.confirmed.len(),
                report.failed.len()
            );
        }

        SettleCommands::Watch { interval_ms } => {
            let handle = SettlementWorker::new(
                Arc::new(service),
                StdDuration::from_millis(*interval_ms),
            )
            .spawn();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            handle.shutdown().await;
        }
    }
    Ok(())
}

async fn run_export_command(
    service: &LedgerService,
    consumer: &str,
    format: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match format {
        "csv" => {
            let count = exporter.export_transactions_csv(consumer, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "json" => {
            let statement = exporter.export_statement_json(consumer, writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported statement with {} transactions",
                    statement.transactions.len()
                );
            }
        }
        other => anyhow::bail!("Unknown export format '{}'. Valid formats: csv, json", other),
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
