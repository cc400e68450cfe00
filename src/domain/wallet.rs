use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Balances, Currency, MinorUnits, format_amount};

pub type WalletId = Uuid;

/// A custodial wallet owned by exactly one consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub consumer_id: String,
    /// Chain-style address, generated once and never changed
    pub address: String,
    pub balances: Balances,
    pub created_at: DateTime<Utc>,
    /// Bumped on every balance mutation
    pub updated_at: DateTime<Utc>,
    /// Incremented on every balance mutation
    pub version: i64,
}

impl Wallet {
    /// Create a wallet with zero balances in every supported currency.
    pub fn new(consumer_id: String, address: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            consumer_id,
            address,
            balances: Balances::zero(),
            created_at,
            updated_at: created_at,
            version: 0,
        }
    }

    pub fn balance(&self, currency: Currency) -> MinorUnits {
        self.balances.get(currency)
    }

    pub fn formatted_balance(&self, currency: Currency) -> String {
        format_amount(currency, self.balance(currency))
    }

    /// Balances rendered at each currency's fixed precision, e.g. `{eth: "0.000000", usdc: "5.25"}`.
    pub fn balance_strings(&self) -> BTreeMap<Currency, String> {
        self.balances.formatted()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_wallet_has_zero_balances() {
        let wallet = Wallet::new("c1".into(), "0xabc".into(), Utc::now());
        assert_eq!(wallet.balance(Currency::Usdc), 0);
        assert_eq!(wallet.balance(Currency::Eth), 0);
        assert_eq!(wallet.formatted_balance(Currency::Usdc), "0.00");
        assert_eq!(wallet.formatted_balance(Currency::Eth), "0.000000");
        assert_eq!(wallet.created_at, wallet.updated_at);
        assert_eq!(wallet.version, 0);
    }

    #[test]
    fn test_balance_strings_cover_all_currencies() {
        let wallet = Wallet::new("c1".into(), "0xabc".into(), Utc::now());
        let strings = wallet.balance_strings();
        assert_eq!(strings.len(), Currency::ALL.len());
        assert_eq!(strings[&Currency::Usdc], "0.00");
    }
}
