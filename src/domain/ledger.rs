use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{Currency, MinorUnits, Transaction, format_amount};

/// Per-currency balances of a wallet. Every supported currency is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances(BTreeMap<Currency, MinorUnits>);

impl Balances {
    pub fn zero() -> Self {
        Self(Currency::ALL.iter().map(|c| (*c, 0)).collect())
    }

    pub fn get(&self, currency: Currency) -> MinorUnits {
        self.0.get(&currency).copied().unwrap_or(0)
    }

    pub fn set(&mut self, currency: Currency, amount: MinorUnits) {
        self.0.insert(currency, amount.max(0));
    }

    pub fn iter(&self) -> impl Iterator<Item = (Currency, MinorUnits)> + '_ {
        self.0.iter().map(|(c, v)| (*c, *v))
    }

    pub fn can_debit(&self, currency: Currency, amount: MinorUnits) -> bool {
        self.get(currency) >= amount
    }

    pub fn credit(&mut self, currency: Currency, amount: MinorUnits) {
        let balance = self.0.entry(currency).or_insert(0);
        *balance = balance.saturating_add(amount);
    }

    /// Subtract `amount`, flooring the balance at zero.
    /// Returns the shortfall that could not be taken (zero when fully covered).
    pub fn debit(&mut self, currency: Currency, amount: MinorUnits) -> MinorUnits {
        let balance = self.0.entry(currency).or_insert(0);
        let shortfall = (amount - *balance).max(0);
        *balance = (*balance - amount).max(0);
        shortfall
    }

    pub fn formatted(&self) -> BTreeMap<Currency, String> {
        self.iter()
            .map(|(currency, amount)| (currency, format_amount(currency, amount)))
            .collect()
    }
}

impl Default for Balances {
    fn default() -> Self {
        Self::zero()
    }
}

/// Recompute a wallet's balances from its transaction history.
/// Withdrawals debit regardless of status: a failed withdrawal is compensated
/// by its own refund deposit.
pub fn replay_balances(transactions: &[Transaction]) -> Balances {
    let mut ordered: Vec<&Transaction> = transactions.iter().collect();
    ordered.sort_by_key(|tx| tx.sequence);

    let mut balances = Balances::zero();
    for tx in ordered {
        if tx.kind.is_inflow() {
            balances.credit(tx.currency, tx.amount);
        } else {
            balances.debit(tx.currency, tx.amount);
        }
    }
    balances
}

/// A currency whose stored balance disagrees with the replayed history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceDrift {
    pub currency: Currency,
    pub stored: MinorUnits,
    pub replayed: MinorUnits,
}

pub fn find_drift(stored: &Balances, replayed: &Balances) -> Vec<BalanceDrift> {
    Currency::ALL
        .iter()
        .filter_map(|&currency| {
            let (stored, replayed) = (stored.get(currency), replayed.get(currency));
            (stored != replayed).then_some(BalanceDrift {
                currency,
                stored,
                replayed,
            })
        })
        .collect()
}
