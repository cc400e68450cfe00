use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{
    Balances, BankAccount, BankAccountId, Currency, MinorUnits, Transaction, TransactionId,
    TransactionKind, TransactionStatus, Wallet, WalletId,
};

use super::{MIGRATION_001_INITIAL, MIGRATION_002_BANK_ACCOUNTS};

const TRANSACTION_COLUMNS: &str = "id, sequence, wallet_id, kind, from_address, to_address, amount, currency, status, description, metadata, created_at, completed_at, failed_at";

const WALLET_SELECT: &str = r#"
    SELECT w.id, w.consumer_id, w.address, w.created_at, w.updated_at, w.version,
           b.currency, b.amount
    FROM wallets w
    LEFT JOIN wallet_balances b ON b.wallet_id = w.id"#;

/// Result of a guarded balance credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditOutcome {
    Applied,
    /// Nothing written; the credit would push this currency past `i64::MAX`
    Overflow { currency: Currency },
}

/// Result of a guarded balance debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Debit applied; carries the new balance
    Applied { balance: MinorUnits },
    /// Nothing written; carries the balance that was available
    Insufficient { available: MinorUnits },
}

/// Returns true if the error chain contains a UNIQUE constraint violation.
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<sqlx::Error>(),
            Some(sqlx::Error::Database(db)) if db.is_unique_violation()
        )
    })
}

/// Repository for persisting wallets, balances, transactions and bank accounts.
///
/// Every mutation runs in a single SQLite transaction whose first statement is a
/// write, and balances change through relative `UPDATE`s, so concurrent callers
/// never overwrite each other's deltas.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given SQLite connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to a SQLite database at the given URL.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION_001_INITIAL)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 001")?;

        sqlx::raw_sql(MIGRATION_002_BANK_ACCOUNTS)
            .execute(&self.pool)
            .await
            .context("Failed to run migration 002")?;

        Ok(())
    }

    /// Initialize a new database (connect + migrate).
    pub async fn init(database_url: &str) -> Result<Self> {
        let repo = Self::connect(database_url).await?;
        repo.migrate().await?;
        Ok(repo)
    }

    // ========================
    // Wallet operations
    // ========================

    /// Save a new wallet together with its initial balances.
    pub async fn save_wallet(&self, wallet: &Wallet) -> Result<()> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO wallets (id, consumer_id, address, created_at, updated_at, version)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(wallet.id.to_string())
        .bind(&wallet.consumer_id)
        .bind(&wallet.address)
        .bind(wallet.created_at.to_rfc3339())
        .bind(wallet.updated_at.to_rfc3339())
        .bind(wallet.version)
        .execute(&mut *db_tx)
        .await
        .context("Failed to save wallet")?;

        for (currency, amount) in wallet.balances.iter() {
            sqlx::query("INSERT INTO wallet_balances (wallet_id, currency, amount) VALUES (?, ?, ?)")
                .bind(wallet.id.to_string())
                .bind(currency.as_str())
                .bind(amount)
                .execute(&mut *db_tx)
                .await
                .context("Failed to save wallet balance")?;
        }

        db_tx.commit().await.context("Failed to commit wallet")?;
        Ok(())
    }

    /// Get a wallet by ID.
    pub async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let query = format!("{} WHERE w.id = ?", WALLET_SELECT);
        let rows = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch wallet")?;

        Self::rows_to_wallet(&rows)
    }

    /// Get the wallet owned by a consumer.
    pub async fn get_wallet_by_consumer(&self, consumer_id: &str) -> Result<Option<Wallet>> {
        let query = format!("{} WHERE w.consumer_id = ?", WALLET_SELECT);
        let rows = sqlx::query(&query)
            .bind(consumer_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch wallet by consumer")?;

        Self::rows_to_wallet(&rows)
    }

    /// Build a wallet from its joined rows, one per balance.
    /// A single statement reads a consistent snapshot, so `version` always
    /// matches the balances.
    fn rows_to_wallet(rows: &[SqliteRow]) -> Result<Option<Wallet>> {
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let id_str: String = first.get("id");
        let mut balances = Balances::zero();
        for row in rows {
            let code: Option<String> = row.get("currency");
            let Some(code) = code else { continue };
            let currency = Currency::from_str(&code)
                .ok_or_else(|| anyhow!("Invalid currency: {}", code))?;
            balances.set(currency, row.get("amount"));
        }

        Ok(Some(Wallet {
            id: Uuid::parse_str(&id_str).context("Invalid wallet ID")?,
            consumer_id: first.get("consumer_id"),
            address: first.get("address"),
            balances,
            created_at: parse_timestamp(first.get("created_at")).context("Invalid created_at")?,
            updated_at: parse_timestamp(first.get("updated_at")).context("Invalid updated_at")?,
            version: first.get("version"),
        }))
    }

    // ========================
    // Balance mutations
    // ========================

    /// Apply credits and append their transactions atomically.
    /// Nothing is written when any of them would overflow its balance.
    pub async fn record_credits(&self, entries: &mut [Transaction]) -> Result<CreditOutcome> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        for entry in entries.iter_mut() {
            let credited =
                Self::credit_balance(&mut db_tx, entry.wallet_id, entry.currency, entry.amount)
                    .await?;
            if credited.is_none() {
                db_tx
                    .rollback()
                    .await
                    .context("Failed to roll back credit")?;
                return Ok(CreditOutcome::Overflow {
                    currency: entry.currency,
                });
            }
            Self::touch_wallet(&mut db_tx, entry.wallet_id, entry.created_at).await?;
            Self::insert_transaction(&mut db_tx, entry).await?;
        }

        db_tx.commit().await.context("Failed to commit credit")?;
        Ok(CreditOutcome::Applied)
    }

    /// Debit the balance and append the withdrawal atomically.
    /// Nothing is written when the balance cannot cover the amount.
    pub async fn record_withdrawal(&self, entry: &mut Transaction) -> Result<DebitOutcome> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let debited =
            Self::debit_balance(&mut db_tx, entry.wallet_id, entry.currency, entry.amount).await?;

        match debited {
            Some(balance) => {
                Self::touch_wallet(&mut db_tx, entry.wallet_id, entry.created_at).await?;
                Self::insert_transaction(&mut db_tx, entry).await?;
                db_tx.commit().await.context("Failed to commit withdrawal")?;
                Ok(DebitOutcome::Applied { balance })
            }
            None => {
                let available =
                    Self::balance_of(&mut db_tx, entry.wallet_id, entry.currency).await?;
                db_tx
                    .rollback()
                    .await
                    .context("Failed to roll back withdrawal")?;
                Ok(DebitOutcome::Insufficient { available })
            }
        }
    }

    /// Add `amount` to the balance. Returns `None` (nothing written) when the
    /// result would not fit in an `i64`.
    async fn credit_balance(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        currency: Currency,
        amount: MinorUnits,
    ) -> Result<Option<MinorUnits>> {
        let row = sqlx::query(
            r#"
            UPDATE wallet_balances
            SET amount = amount + ?
            WHERE wallet_id = ? AND currency = ? AND amount <= ?
            RETURNING amount
            "#,
        )
        .bind(amount)
        .bind(wallet_id.to_string())
        .bind(currency.as_str())
        .bind(MinorUnits::MAX - amount)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to credit balance")?;

        Ok(row.map(|row| row.get("amount")))
    }

    async fn debit_balance(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        currency: Currency,
        amount: MinorUnits,
    ) -> Result<Option<MinorUnits>> {
        let row = sqlx::query(
            r#"
            UPDATE wallet_balances
            SET amount = amount - ?
            WHERE wallet_id = ? AND currency = ? AND amount >= ?
            RETURNING amount
            "#,
        )
        .bind(amount)
        .bind(wallet_id.to_string())
        .bind(currency.as_str())
        .bind(amount)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to debit balance")?;

        Ok(row.map(|row| row.get("amount")))
    }

    async fn balance_of(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        currency: Currency,
    ) -> Result<MinorUnits> {
        let row = sqlx::query(
            "SELECT amount FROM wallet_balances WHERE wallet_id = ? AND currency = ?",
        )
        .bind(wallet_id.to_string())
        .bind(currency.as_str())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read balance")?;

        Ok(row.map(|row| row.get("amount")).unwrap_or(0))
    }

    async fn touch_wallet(
        conn: &mut SqliteConnection,
        wallet_id: WalletId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE wallets SET updated_at = ?, version = version + 1 WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(wallet_id.to_string())
            .execute(&mut *conn)
            .await
            .context("Failed to update wallet")?;
        Ok(())
    }

    // ========================
    // Transaction operations
    // ========================

    /// Append a transaction, assigning the next sequence number.
    async fn insert_transaction(conn: &mut SqliteConnection, entry: &mut Transaction) -> Result<()> {
        entry.sequence = Self::next_sequence(conn).await?;
        let metadata_json = serde_json::to_string(&entry.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, sequence, wallet_id, kind, from_address, to_address, amount, currency, status, description, metadata, created_at, completed_at, failed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(entry.sequence)
        .bind(entry.wallet_id.to_string())
        .bind(entry.kind.as_str())
        .bind(&entry.from_address)
        .bind(&entry.to_address)
        .bind(entry.amount)
        .bind(entry.currency.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.description)
        .bind(&metadata_json)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(entry.failed_at.map(|dt| dt.to_rfc3339()))
        .execute(&mut *conn)
        .await
        .context("Failed to save transaction")?;

        Ok(())
    }

    /// Get the next sequence number and increment the counter.
    async fn next_sequence(conn: &mut SqliteConnection) -> Result<i64> {
        let row = sqlx::query(
            r#"
            UPDATE sequence_counter
            SET value = value + 1
            WHERE name = 'transaction_sequence'
            RETURNING value
            "#,
        )
        .fetch_one(&mut *conn)
        .await
        .context("Failed to get next sequence number")?;

        Ok(row.get("value"))
    }

    /// Persist a pending -> completed transition.
    /// Returns false if the transaction was no longer pending.
    pub async fn complete_transaction(&self, entry: &Transaction) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = ?, completed_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(entry.status.as_str())
        .bind(entry.completed_at.map(|dt| dt.to_rfc3339()))
        .bind(entry.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to complete transaction")?;

        Ok(result.rows_affected() == 1)
    }

    /// Persist a pending -> failed transition and its refund atomically.
    /// Returns false (and writes nothing) if the withdrawal was no longer pending.
    pub async fn fail_withdrawal(&self, entry: &Transaction, refund: &mut Transaction) -> Result<bool> {
        let mut db_tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;

        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET status = ?, failed_at = ?, metadata = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(entry.status.as_str())
        .bind(entry.failed_at.map(|dt| dt.to_rfc3339()))
        .bind(serde_json::to_string(&entry.metadata)?)
        .bind(entry.id.to_string())
        .execute(&mut *db_tx)
        .await
        .context("Failed to fail withdrawal")?;

        if result.rows_affected() != 1 {
            db_tx
                .rollback()
                .await
                .context("Failed to roll back settlement")?;
            return Ok(false);
        }

        // The refunded amount left this balance earlier, so it always fits
        Self::credit_balance(&mut db_tx, refund.wallet_id, refund.currency, refund.amount)
            .await?
            .ok_or_else(|| anyhow!("Refund of {} would overflow the balance", entry.id))?;
        Self::touch_wallet(&mut db_tx, refund.wallet_id, refund.created_at).await?;
        Self::insert_transaction(&mut db_tx, refund).await?;

        db_tx.commit().await.context("Failed to commit refund")?;
        Ok(true)
    }

    /// Get a transaction by ID.
    pub async fn get_transaction(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let query = format!("SELECT {} FROM transactions WHERE id = ?", TRANSACTION_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch transaction")?;

        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    /// List a wallet's transactions, most recent first.
    pub async fn list_transactions_for_wallet(&self, wallet_id: WalletId) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE wallet_id = ? ORDER BY sequence DESC",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(wallet_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to list transactions for wallet")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    /// List withdrawals still awaiting settlement, oldest first.
    pub async fn list_pending_withdrawals(&self) -> Result<Vec<Transaction>> {
        let query = format!(
            "SELECT {} FROM transactions WHERE status = 'pending' AND kind = 'withdrawal' ORDER BY sequence",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&query)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list pending withdrawals")?;

        rows.iter().map(Self::row_to_transaction).collect()
    }

    fn row_to_transaction(row: &SqliteRow) -> Result<Transaction> {
        let id_str: String = row.get("id");
        let wallet_id_str: String = row.get("wallet_id");
        let kind_str: String = row.get("kind");
        let currency_str: String = row.get("currency");
        let status_str: String = row.get("status");
        let metadata_json: String = row.get("metadata");
        let completed_at: Option<String> = row.get("completed_at");
        let failed_at: Option<String> = row.get("failed_at");

        let metadata: Map<String, Value> =
            serde_json::from_str(&metadata_json).context("Invalid transaction metadata")?;

        Ok(Transaction {
            id: Uuid::parse_str(&id_str).context("Invalid transaction ID")?,
            sequence: row.get("sequence"),
            wallet_id: Uuid::parse_str(&wallet_id_str).context("Invalid wallet ID")?,
            kind: TransactionKind::from_str(&kind_str)
                .ok_or_else(|| anyhow!("Invalid transaction kind: {}", kind_str))?,
            from_address: row.get("from_address"),
            to_address: row.get("to_address"),
            amount: row.get("amount"),
            currency: Currency::from_str(&currency_str)
                .ok_or_else(|| anyhow!("Invalid currency: {}", currency_str))?,
            status: TransactionStatus::from_str(&status_str)
                .ok_or_else(|| anyhow!("Invalid transaction status: {}", status_str))?,
            description: row.get("description"),
            metadata,
            created_at: parse_timestamp(row.get("created_at")).context("Invalid created_at")?,
            completed_at: completed_at
                .map(parse_timestamp)
                .transpose()
                .context("Invalid completed_at")?,
            failed_at: failed_at
                .map(parse_timestamp)
                .transpose()
                .context("Invalid failed_at")?,
        })
    }

    // ========================
    // Bank account operations
    // ========================

    /// Save a new bank account.
    pub async fn save_bank_account(&self, account: &BankAccount) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bank_accounts (id, consumer_id, label, account_last4, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.consumer_id)
        .bind(&account.label)
        .bind(&account.account_last4)
        .bind(account.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .context("Failed to save bank account")?;
        Ok(())
    }

    /// Get a bank account by ID.
    pub async fn get_bank_account(&self, id: BankAccountId) -> Result<Option<BankAccount>> {
        let row = sqlx::query(
            "SELECT id, consumer_id, label, account_last4, created_at FROM bank_accounts WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch bank account")?;

        row.as_ref().map(Self::row_to_bank_account).transpose()
    }

    /// List a consumer's bank accounts in registration order.
    pub async fn list_bank_accounts(&self, consumer_id: &str) -> Result<Vec<BankAccount>> {
        let rows = sqlx::query(
            r#"
            SELECT id, consumer_id, label, account_last4, created_at
            FROM bank_accounts
            WHERE consumer_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(consumer_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list bank accounts")?;

        rows.iter().map(Self::row_to_bank_account).collect()
    }

    fn row_to_bank_account(row: &SqliteRow) -> Result<BankAccount> {
        let id_str: String = row.get("id");

        Ok(BankAccount {
            id: Uuid::parse_str(&id_str).context("Invalid bank account ID")?,
            consumer_id: row.get("consumer_id"),
            label: row.get("label"),
            account_last4: row.get("account_last4"),
            created_at: parse_timestamp(row.get("created_at")).context("Invalid created_at")?,
        })
    }
}

fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(&value)?.with_timezone(&Utc))
}
