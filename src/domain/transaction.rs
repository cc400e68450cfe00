use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{Currency, MinorUnits, WalletId, format_amount};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Earnings from a broker purchasing the consumer's data
    DataSale,
    /// Funds leaving the custodial wallet
    Withdrawal,
    /// Funds entering the wallet from outside (faucet, refunds)
    Deposit,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::DataSale => "data_sale",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Deposit => "deposit",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "data_sale" => Some(TransactionKind::DataSale),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "deposit" => Some(TransactionKind::Deposit),
            _ => None,
        }
    }

    /// Returns true if this kind of transaction adds to the wallet balance
    pub fn is_inflow(&self) -> bool {
        !matches!(self, TransactionKind::Withdrawal)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(TransactionStatus::Pending),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only pending -> completed and pending -> failed are allowed.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        !self.is_terminal() && next.is_terminal()
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single entry in a wallet's history.
/// Only `status`, `completed_at`/`failed_at` and the failure reason in `metadata`
/// change after creation, and only once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Monotonically increasing insertion order, assigned by the repository
    pub sequence: i64,
    /// Owning wallet
    pub wallet_id: WalletId,
    pub kind: TransactionKind,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    /// Amount in minor units (always positive)
    pub amount: MinorUnits,
    pub currency: Currency,
    pub status: TransactionStatus,
    pub description: String,
    /// Kind-specific attributes (broker id, withdrawal method, refund reference, ...)
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new pending transaction. Sequence number must be assigned by the repository.
    pub fn new(
        wallet_id: WalletId,
        kind: TransactionKind,
        currency: Currency,
        amount: MinorUnits,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        assert!(amount > 0, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            sequence: 0, // Will be set by repository
            wallet_id,
            kind,
            from_address: None,
            to_address: None,
            amount,
            currency,
            status: TransactionStatus::Pending,
            description: description.into(),
            metadata: Map::new(),
            created_at,
            completed_at: None,
            failed_at: None,
        }
    }

    pub fn with_from_address(mut self, address: impl Into<String>) -> Self {
        self.from_address = Some(address.into());
        self
    }

    pub fn with_to_address(mut self, address: impl Into<String>) -> Self {
        self.to_address = Some(address.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Mark as completed at creation time (credits settle immediately).
    pub fn completed(mut self) -> Self {
        self.status = TransactionStatus::Completed;
        self.completed_at = Some(self.created_at);
        self
    }

    pub fn formatted_amount(&self) -> String {
        format_amount(self.currency, self.amount)
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TransactionStatus::Completed)?;
        self.completed_at = Some(at);
        Ok(())
    }

    pub fn mark_failed(
        &mut self,
        at: DateTime<Utc>,
        reason: impl Into<String>,
    ) -> Result<(), TransitionError> {
        self.transition(TransactionStatus::Failed)?;
        self.failed_at = Some(at);
        self.metadata
            .insert("failure_reason".into(), Value::String(reason.into()));
        Ok(())
    }

    fn transition(&mut self, next: TransactionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Create the compensating deposit that returns a failed withdrawal's funds.
    pub fn create_refund(&self, at: DateTime<Utc>) -> Self {
        let mut refund = Transaction::new(
            self.wallet_id,
            TransactionKind::Deposit,
            self.currency,
            self.amount,
            format!("Refund of failed withdrawal: {}", self.description),
            at,
        )
        .with_attribute("refund_of", self.id.to_string())
        .completed();
        refund.to_address = self.from_address.clone();
        refund
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub id: TransactionId,
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transaction {} cannot move from {} to {}",
            self.id, self.from, self.to
        )
    }
}

impl std::error::Error for TransitionError {}
