use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::domain::{
    BalanceDrift, BankAccount, Currency, MinorUnits, Transaction, TransactionId, TransactionKind,
    TransactionStatus, Wallet, WalletId, WithdrawalMethod, derive_address, find_drift,
    format_amount, is_valid_address, last_four_digits, normalize_address, parse_amount,
    replay_balances,
};
use crate::storage::{CreditOutcome, DebitOutcome, Repository, is_unique_violation};

use super::{LedgerConfig, LedgerError};

/// Application service providing the ledger operations.
/// This is the primary interface for any client (CLI, API route layer, workers).
pub struct LedgerService {
    repo: Repository,
    config: LedgerConfig,
}

/// Wallet as exposed to callers: balances rendered at fixed precision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletView {
    pub id: WalletId,
    pub address: String,
    pub balances: BTreeMap<Currency, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Wallet> for WalletView {
    fn from(wallet: &Wallet) -> Self {
        Self {
            id: wallet.id,
            address: wallet.address.clone(),
            balances: wallet.balance_strings(),
            created_at: wallet.created_at,
            updated_at: wallet.updated_at,
        }
    }
}

/// Answer to "does this consumer have a wallet, and what is in it".
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSummary {
    pub has_wallet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wallet: Option<WalletView>,
}

/// Result of a faucet funding request
#[derive(Debug, Clone, Serialize)]
pub struct FundingResult {
    pub transactions: Vec<TransactionId>,
    pub balances: BTreeMap<Currency, String>,
}

/// Withdrawals moved to a terminal state by one settlement pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementReport {
    pub confirmed: Vec<TransactionId>,
    pub failed: Vec<TransactionId>,
}

impl SettlementReport {
    pub fn is_empty(&self) -> bool {
        self.confirmed.is_empty() && self.failed.is_empty()
    }
}

/// Stored balances compared against a replay of the wallet's history
pub struct IntegrityReport {
    pub wallet: Wallet,
    pub transaction_count: usize,
    pub pending_withdrawals: usize,
    pub drift: Vec<BalanceDrift>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.drift.is_empty()
    }
}

pub const SETTLEMENT_TIMEOUT_REASON: &str = "settlement timed out";

impl LedgerService {
    /// Create a new ledger service with the given repository.
    pub fn new(repo: Repository, config: LedgerConfig) -> Self {
        Self { repo, config }
    }

    /// Initialize a new database at the given path.
    pub async fn init(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}?mode=rwc", database_path);
        let repo = Repository::init(&db_url).await?;
        Ok(Self::new(repo, LedgerConfig::default()))
    }

    /// Connect to an existing database.
    pub async fn connect(database_path: &str) -> Result<Self, LedgerError> {
        let db_url = format!("sqlite:{}", database_path);
        let repo = Repository::connect(&db_url).await?;
        Ok(Self::new(repo, LedgerConfig::default()))
    }

    pub fn with_config(mut self, config: LedgerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ========================
    // Wallet operations
    // ========================

    /// Create the consumer's wallet with zero balances.
    pub async fn create_wallet(&self, consumer_id: &str) -> Result<Wallet, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;

        if self.repo.get_wallet_by_consumer(consumer_id).await?.is_some() {
            return Err(LedgerError::WalletAlreadyExists(consumer_id.to_string()));
        }

        let now = Utc::now();
        let address = derive_address(&self.config.wallet_seed, consumer_id, now);
        let wallet = Wallet::new(consumer_id.to_string(), address, now);

        // A concurrent request may have won the race past the check above
        if let Err(err) = self.repo.save_wallet(&wallet).await {
            if is_unique_violation(&err) {
                return Err(LedgerError::WalletAlreadyExists(consumer_id.to_string()));
            }
            return Err(err.into());
        }

        info!(consumer_id, wallet_id = %wallet.id, address = %wallet.address, "wallet created");
        Ok(wallet)
    }

    /// Get the consumer's wallet, if any.
    pub async fn get_wallet(&self, consumer_id: &str) -> Result<Option<Wallet>, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        Ok(self.repo.get_wallet_by_consumer(consumer_id).await?)
    }

    /// Get a wallet by ID.
    pub async fn get_wallet_by_id(&self, wallet_id: WalletId) -> Result<Wallet, LedgerError> {
        self.repo
            .get_wallet(wallet_id)
            .await?
            .ok_or(LedgerError::WalletIdNotFound(wallet_id))
    }

    /// Summary shape of `GET /wallet`.
    pub async fn wallet_summary(&self, consumer_id: &str) -> Result<WalletSummary, LedgerError> {
        let wallet = self.get_wallet(consumer_id).await?;
        Ok(WalletSummary {
            has_wallet: wallet.is_some(),
            wallet: wallet.as_ref().map(WalletView::from),
        })
    }

    async fn require_wallet(&self, consumer_id: &str) -> Result<Wallet, LedgerError> {
        self.get_wallet(consumer_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(consumer_id.to_string()))
    }

    // ========================
    // Balance operations
    // ========================

    /// Credit the proceeds of a data sale. The transaction is recorded as completed.
    pub async fn credit(
        &self,
        wallet_id: WalletId,
        currency: Currency,
        amount: &str,
        description: &str,
        metadata: Map<String, Value>,
    ) -> Result<TransactionId, LedgerError> {
        let amount = parse_positive_amount(currency, amount)?;
        let wallet = self.get_wallet_by_id(wallet_id).await?;

        let mut entry = Transaction::new(
            wallet.id,
            TransactionKind::DataSale,
            currency,
            amount,
            description,
            Utc::now(),
        )
        .with_to_address(wallet.address.as_str())
        .with_metadata(metadata)
        .completed();

        let outcome = self
            .repo
            .record_credits(std::slice::from_mut(&mut entry))
            .await?;
        check_credit(outcome)?;

        info!(
            wallet_id = %wallet.id,
            transaction_id = %entry.id,
            amount = %entry.formatted_amount(),
            %currency,
            "credit applied"
        );
        Ok(entry.id)
    }

    /// Request a withdrawal. The balance is debited immediately and the
    /// transaction stays pending until it is settled.
    pub async fn withdraw(
        &self,
        consumer_id: &str,
        currency: Currency,
        amount: &str,
        method: WithdrawalMethod,
    ) -> Result<TransactionId, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        let amount = parse_positive_amount(currency, amount)?;
        let wallet = self.require_wallet(consumer_id).await?;
        let (method, destination_label) = self.resolve_method(consumer_id, method).await?;

        if !wallet.balances.can_debit(currency, amount) {
            let available = wallet.balance(currency);
            warn!(consumer_id, %currency, available, requested = amount, "withdrawal rejected");
            return Err(LedgerError::InsufficientBalance {
                currency,
                available,
                requested: amount,
            });
        }

        let description = format!(
            "Withdrawal of {} {} to {}",
            format_amount(currency, amount),
            currency,
            destination_label
        );
        let mut entry = Transaction::new(
            wallet.id,
            TransactionKind::Withdrawal,
            currency,
            amount,
            description,
            Utc::now(),
        )
        .with_from_address(wallet.address.as_str())
        .with_attribute("method", method.as_str());

        if let Some(address) = method.destination_address() {
            entry = entry
                .with_to_address(address)
                .with_attribute("destination", address);
        }
        if let WithdrawalMethod::Bank { bank_account_id } = &method {
            entry = entry.with_attribute("bank_account_id", bank_account_id.to_string());
        }

        match self.repo.record_withdrawal(&mut entry).await? {
            DebitOutcome::Applied { balance } => {
                info!(
                    consumer_id,
                    transaction_id = %entry.id,
                    amount = %entry.formatted_amount(),
                    %currency,
                    balance = %format_amount(currency, balance),
                    method = method.as_str(),
                    "withdrawal pending"
                );
                Ok(entry.id)
            }
            DebitOutcome::Insufficient { available } => {
                warn!(consumer_id, %currency, available, requested = amount, "withdrawal rejected");
                Err(LedgerError::InsufficientBalance {
                    currency,
                    available,
                    requested: amount,
                })
            }
        }
    }

    /// Validate the destination and return it in canonical form with a display label.
    async fn resolve_method(
        &self,
        consumer_id: &str,
        method: WithdrawalMethod,
    ) -> Result<(WithdrawalMethod, String), LedgerError> {
        match method {
            WithdrawalMethod::WalletTransfer { address } => {
                let trimmed = address.trim();
                if !is_valid_address(trimmed) {
                    return Err(LedgerError::InvalidAddress(address));
                }
                let address = normalize_address(trimmed);
                let label = address.clone();
                Ok((WithdrawalMethod::WalletTransfer { address }, label))
            }
            WithdrawalMethod::Bank { bank_account_id } => {
                let account = self
                    .repo
                    .get_bank_account(bank_account_id)
                    .await?
                    .filter(|account| account.consumer_id == consumer_id)
                    .ok_or(LedgerError::BankAccountNotFound(bank_account_id))?;
                Ok((WithdrawalMethod::Bank { bank_account_id }, account.masked()))
            }
        }
    }

    /// Credit the configured faucet amounts, standing in for a testnet faucet.
    pub async fn fund_from_faucet(&self, consumer_id: &str) -> Result<FundingResult, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        let wallet = self.require_wallet(consumer_id).await?;
        let now = Utc::now();

        let mut entries: Vec<Transaction> = self
            .config
            .faucet
            .iter()
            .filter(|(_, amount)| *amount > 0)
            .map(|&(currency, amount)| {
                Transaction::new(
                    wallet.id,
                    TransactionKind::Deposit,
                    currency,
                    amount,
                    format!("Faucet funding: {} {}", format_amount(currency, amount), currency),
                    now,
                )
                .with_to_address(wallet.address.as_str())
                .with_attribute("source", "faucet")
                .completed()
            })
            .collect();

        check_credit(self.repo.record_credits(&mut entries).await?)?;
        let wallet = self.get_wallet_by_id(wallet.id).await?;

        info!(consumer_id, deposits = entries.len(), "wallet funded from faucet");
        Ok(FundingResult {
            transactions: entries.iter().map(|entry| entry.id).collect(),
            balances: wallet.balance_strings(),
        })
    }

    // ========================
    // Transaction operations
    // ========================

    /// All transactions of the consumer's wallet, most recent first.
    /// A consumer without a wallet has no history.
    pub async fn list_transactions(&self, consumer_id: &str) -> Result<Vec<Transaction>, LedgerError> {
        match self.get_wallet(consumer_id).await? {
            Some(wallet) => Ok(self.repo.list_transactions_for_wallet(wallet.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.repo
            .get_transaction(id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(id))
    }

    // ========================
    // Settlement
    // ========================

    /// Record a settlement confirmation for a pending withdrawal.
    pub async fn confirm_withdrawal(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.confirm_at(id, Utc::now()).await
    }

    /// Record a settlement failure. The withdrawn funds are refunded.
    pub async fn fail_withdrawal(
        &self,
        id: TransactionId,
        reason: &str,
    ) -> Result<Transaction, LedgerError> {
        self.fail_at(id, reason, Utc::now()).await
    }

    async fn confirm_at(&self, id: TransactionId, at: DateTime<Utc>) -> Result<Transaction, LedgerError> {
        let mut entry = self.pending_withdrawal(id, TransactionStatus::Completed).await?;
        entry.mark_completed(at)?;

        if !self.repo.complete_transaction(&entry).await? {
            return Err(self.lost_settlement_race(id, TransactionStatus::Completed).await);
        }

        info!(transaction_id = %id, "withdrawal completed");
        Ok(entry)
    }

    async fn fail_at(
        &self,
        id: TransactionId,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<Transaction, LedgerError> {
        let mut entry = self.pending_withdrawal(id, TransactionStatus::Failed).await?;
        entry.mark_failed(at, reason)?;
        let mut refund = entry.create_refund(at);

        if !self.repo.fail_withdrawal(&entry, &mut refund).await? {
            return Err(self.lost_settlement_race(id, TransactionStatus::Failed).await);
        }

        warn!(transaction_id = %id, refund_id = %refund.id, reason, "withdrawal failed and refunded");
        Ok(entry)
    }

    async fn pending_withdrawal(
        &self,
        id: TransactionId,
        next: TransactionStatus,
    ) -> Result<Transaction, LedgerError> {
        let entry = self.get_transaction(id).await?;
        if entry.kind != TransactionKind::Withdrawal || !entry.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                id,
                from: entry.status,
                to: next,
            });
        }
        Ok(entry)
    }

    async fn lost_settlement_race(&self, id: TransactionId, next: TransactionStatus) -> LedgerError {
        match self.get_transaction(id).await {
            Ok(current) => LedgerError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            },
            Err(err) => err,
        }
    }

    /// One settlement pass over pending withdrawals.
    ///
    /// Withdrawals older than the settlement timeout fail and are refunded; otherwise,
    /// when a confirmation delay is configured, those older than it are confirmed.
    pub async fn process_settlements(&self, now: DateTime<Utc>) -> Result<SettlementReport, LedgerError> {
        let pending = self.repo.list_pending_withdrawals().await?;
        let mut report = SettlementReport::default();

        for entry in pending {
            let age = now - entry.created_at;

            let outcome = if age >= self.config.settlement_timeout {
                self.fail_at(entry.id, SETTLEMENT_TIMEOUT_REASON, now)
                    .await
                    .map(|tx| tx.status)
            } else if self.config.confirmation_delay.is_some_and(|delay| age >= delay) {
                self.confirm_at(entry.id, now).await.map(|tx| tx.status)
            } else {
                continue;
            };

            match outcome {
                Ok(TransactionStatus::Failed) => report.failed.push(entry.id),
                Ok(_) => report.confirmed.push(entry.id),
                // Settled by someone else between listing and updating
                Err(LedgerError::InvalidTransition { .. }) => {
                    debug!(transaction_id = %entry.id, "withdrawal already settled");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(report)
    }

    // ========================
    // Bank accounts
    // ========================

    /// Register a bank account as a withdrawal target.
    pub async fn add_bank_account(
        &self,
        consumer_id: &str,
        label: &str,
        account_number: &str,
    ) -> Result<BankAccount, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        let label = label.trim();
        if label.is_empty() {
            return Err(LedgerError::InvalidBankAccount("label is required".into()));
        }
        let last4 = last_four_digits(account_number).ok_or_else(|| {
            LedgerError::InvalidBankAccount("account number needs at least 4 digits".into())
        })?;

        let account = BankAccount::new(consumer_id.to_string(), label.to_string(), last4);
        self.repo.save_bank_account(&account).await?;

        info!(consumer_id, bank_account_id = %account.id, "bank account added");
        Ok(account)
    }

    pub async fn list_bank_accounts(&self, consumer_id: &str) -> Result<Vec<BankAccount>, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        Ok(self.repo.list_bank_accounts(consumer_id).await?)
    }

    // ========================
    // Integrity
    // ========================

    /// Compare the consumer's stored balances with a replay of their history.
    pub async fn check_wallet(&self, consumer_id: &str) -> Result<IntegrityReport, LedgerError> {
        let consumer_id = validate_consumer_id(consumer_id)?;
        let wallet = self.require_wallet(consumer_id).await?;
        let transactions = self.repo.list_transactions_for_wallet(wallet.id).await?;

        let replayed = replay_balances(&transactions);
        let drift = find_drift(&wallet.balances, &replayed);
        if !drift.is_empty() {
            warn!(consumer_id, ?drift, "stored balances disagree with history");
        }

        Ok(IntegrityReport {
            pending_withdrawals: transactions.iter().filter(|tx| tx.is_pending()).count(),
            transaction_count: transactions.len(),
            wallet,
            drift,
        })
    }
}

/// Parse a currency code supplied by a caller.
pub fn parse_currency(code: &str) -> Result<Currency, LedgerError> {
    Currency::from_str(code).ok_or_else(|| LedgerError::UnsupportedCurrency(code.to_string()))
}

fn parse_positive_amount(currency: Currency, input: &str) -> Result<MinorUnits, LedgerError> {
    let amount = parse_amount(currency, input)
        .map_err(|e| LedgerError::InvalidAmount(format!("'{}': {}", input, e)))?;
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(format!(
            "'{}': amount must be positive",
            input
        )));
    }
    Ok(amount)
}

fn check_credit(outcome: CreditOutcome) -> Result<(), LedgerError> {
    match outcome {
        CreditOutcome::Applied => Ok(()),
        CreditOutcome::Overflow { currency } => Err(LedgerError::InvalidAmount(format!(
            "{} balance would overflow",
            currency
        ))),
    }
}

/// Consumer ids are compared trimmed everywhere; blank ids are rejected.
fn validate_consumer_id(consumer_id: &str) -> Result<&str, LedgerError> {
    let consumer_id = consumer_id.trim();
    if consumer_id.is_empty() {
        return Err(LedgerError::InvalidConsumerId);
    }
    Ok(consumer_id)
}
