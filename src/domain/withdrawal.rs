use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type BankAccountId = Uuid;

/// Where a withdrawal sends the funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum WithdrawalMethod {
    /// On-chain style transfer to an external address
    WalletTransfer { address: String },
    /// Off-ramp to one of the consumer's registered bank accounts
    Bank { bank_account_id: BankAccountId },
}

impl WithdrawalMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalMethod::WalletTransfer { .. } => "wallet",
            WithdrawalMethod::Bank { .. } => "bank",
        }
    }

    pub fn destination_address(&self) -> Option<&str> {
        match self {
            WithdrawalMethod::WalletTransfer { address } => Some(address.as_str()),
            WithdrawalMethod::Bank { .. } => None,
        }
    }
}

/// Bank account registered as a withdrawal target. Only the last four digits are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankAccount {
    pub id: BankAccountId,
    pub consumer_id: String,
    pub label: String,
    pub account_last4: String,
    pub created_at: DateTime<Utc>,
}

impl BankAccount {
    pub fn new(consumer_id: String, label: String, account_last4: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            consumer_id,
            label,
            account_last4,
            created_at: Utc::now(),
        }
    }

    /// Display form, e.g. "Checking (****1234)"
    pub fn masked(&self) -> String {
        format!("{} (****{})", self.label, self.account_last4)
    }
}

/// Extract the last four digits of an account number, ignoring separators.
/// Returns `None` when fewer than four digits are present or other characters appear.
pub fn last_four_digits(account_number: &str) -> Option<String> {
    let mut digits = String::new();
    for c in account_number.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return None,
        }
    }
    (digits.len() >= 4).then(|| digits[digits.len() - 4..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_four_digits() {
        assert_eq!(last_four_digits("1234 5678 9012"), Some("9012".into()));
        assert_eq!(last_four_digits("12-34"), Some("1234".into()));
        assert_eq!(last_four_digits("123"), None);
        assert_eq!(last_four_digits("12a45678"), None);
    }

    #[test]
    fn test_method_destination() {
        let wallet = WithdrawalMethod::WalletTransfer {
            address: "0xabc".into(),
        };
        assert_eq!(wallet.as_str(), "wallet");
        assert_eq!(wallet.destination_address(), Some("0xabc"));

        let bank = WithdrawalMethod::Bank {
            bank_account_id: Uuid::new_v4(),
        };
        assert_eq!(bank.as_str(), "bank");
        assert_eq!(bank.destination_address(), None);
    }

    #[test]
    fn test_masked_account() {
        let account = BankAccount::new("c1".into(), "Checking".into(), "1234".into());
        assert_eq!(account.masked(), "Checking (****1234)");
    }
}
