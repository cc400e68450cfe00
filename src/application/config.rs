use chrono::Duration;

use crate::domain::{Currency, MinorUnits};

/// Seed used when none is configured. Only suitable for local demos.
pub const DEFAULT_WALLET_SEED: &str = "custodia-dev-seed";

/// Library-side settings of the ledger service.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Secret mixed into every derived wallet address
    pub wallet_seed: String,
    /// Age at which a pending withdrawal gets a synthesized confirmation.
    /// `None` leaves withdrawals pending until an explicit settlement event.
    pub confirmation_delay: Option<Duration>,
    /// Age at which a still-pending withdrawal is failed and refunded
    pub settlement_timeout: Duration,
    /// Amounts credited by one faucet funding request
    pub faucet: Vec<(Currency, MinorUnits)>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            wallet_seed: DEFAULT_WALLET_SEED.to_string(),
            confirmation_delay: Some(Duration::seconds(3)),
            settlement_timeout: Duration::hours(24),
            faucet: vec![(Currency::Eth, 100), (Currency::Usdc, 100)],
        }
    }
}
