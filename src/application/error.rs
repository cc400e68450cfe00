use thiserror::Error;

use crate::domain::{
    BankAccountId, Currency, MinorUnits, TransactionId, TransactionStatus, WalletId, format_amount,
};

/// Coarse classification for callers that translate errors into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InsufficientBalance,
    InvalidInput,
    Conflict,
    PersistenceFailure,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No wallet for consumer: {0}")]
    WalletNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletIdNotFound(WalletId),

    #[error("Consumer {0} already has a wallet")]
    WalletAlreadyExists(String),

    #[error("Bank account not found: {0}")]
    BankAccountNotFound(BankAccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error(
        "Insufficient {currency} balance: available {}, requested {}",
        display_amount(.currency, .available),
        display_amount(.currency, .requested)
    )]
    InsufficientBalance {
        currency: Currency,
        available: MinorUnits,
        requested: MinorUnits,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Invalid destination address: {0}")]
    InvalidAddress(String),

    #[error("Invalid consumer id")]
    InvalidConsumerId,

    #[error("Invalid bank account: {0}")]
    InvalidBankAccount(String),

    #[error("Transaction {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TransactionId,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Persistence failure: {0}")]
    Persistence(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::WalletNotFound(_)
            | LedgerError::WalletIdNotFound(_)
            | LedgerError::BankAccountNotFound(_)
            | LedgerError::TransactionNotFound(_) => ErrorKind::NotFound,
            LedgerError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            LedgerError::InvalidAmount(_)
            | LedgerError::UnsupportedCurrency(_)
            | LedgerError::InvalidAddress(_)
            | LedgerError::InvalidConsumerId
            | LedgerError::InvalidBankAccount(_) => ErrorKind::InvalidInput,
            LedgerError::WalletAlreadyExists(_) | LedgerError::InvalidTransition { .. } => {
                ErrorKind::Conflict
            }
            LedgerError::Persistence(_) => ErrorKind::PersistenceFailure,
        }
    }
}

fn display_amount(currency: &Currency, amount: &MinorUnits) -> String {
    format_amount(*currency, *amount)
}

impl From<crate::domain::TransitionError> for LedgerError {
    fn from(err: crate::domain::TransitionError) -> Self {
        LedgerError::InvalidTransition {
            id: err.id,
            from: err.from,
            to: err.to,
        }
    }
}
