mod repository;

pub use repository::*;

/// SQL migration for wallets, balances and the transaction log
pub const MIGRATION_001_INITIAL: &str = include_str!("migrations/001_initial.sql");

/// SQL migration for bank withdrawal targets
pub const MIGRATION_002_BANK_ACCOUNTS: &str = include_str!("migrations/002_bank_accounts.sql");
