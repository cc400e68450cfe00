use proptest::prelude::*;

use custodia::domain::{Balances, Currency, format_amount, parse_amount};

fn currency() -> impl Strategy<Value = Currency> {
    prop_oneof![Just(Currency::Eth), Just(Currency::Usdc)]
}

proptest! {
    /// Balances never go below zero, whatever the sequence of operations.
    #[test]
    fn balances_stay_non_negative(
        currency in currency(),
        ops in prop::collection::vec((any::<bool>(), 1i64..1_000_000), 0..50),
    ) {
        let mut balances = Balances::zero();
        for (is_credit, amount) in ops {
            if is_credit {
                balances.credit(currency, amount);
            } else {
                balances.debit(currency, amount);
            }
            prop_assert!(balances.get(currency) >= 0);
        }
    }

    /// A credit raises the balance by exactly the credited amount.
    #[test]
    fn credit_is_exact(
        currency in currency(),
        start in 0i64..1_000_000_000,
        amount in 1i64..1_000_000_000,
    ) {
        let mut balances = Balances::zero();
        balances.set(currency, start);
        balances.credit(currency, amount);
        prop_assert_eq!(balances.get(currency), start + amount);
    }

    /// A covered debit takes exactly the amount; an uncovered one reports the shortfall.
    #[test]
    fn debit_reports_shortfall(
        currency in currency(),
        start in 0i64..1_000_000,
        amount in 1i64..1_000_000,
    ) {
        let mut balances = Balances::zero();
        balances.set(currency, start);
        let covered = balances.can_debit(currency, amount);
        let shortfall = balances.debit(currency, amount);

        if covered {
            prop_assert_eq!(shortfall, 0);
            prop_assert_eq!(balances.get(currency), start - amount);
        } else {
            prop_assert_eq!(shortfall, amount - start);
            prop_assert_eq!(balances.get(currency), 0);
        }
    }

    /// Other currencies are untouched by an operation on one.
    #[test]
    fn currencies_are_independent(amount in 1i64..1_000_000) {
        let mut balances = Balances::zero();
        balances.set(Currency::Eth, 42);
        balances.credit(Currency::Usdc, amount);
        balances.debit(Currency::Usdc, amount);
        prop_assert_eq!(balances.get(Currency::Eth), 42);
        prop_assert_eq!(balances.get(Currency::Usdc), 0);
    }

    /// Rendered amounts always use the currency's fixed precision and parse back.
    #[test]
    fn formatted_amounts_are_fixed_precision(currency in currency(), amount in 0i64..10_000_000_000) {
        let rendered = format_amount(currency, amount);
        let decimals = rendered.split('.').nth(1).map(str::len);
        prop_assert_eq!(decimals, Some(currency.decimals() as usize));
        prop_assert_eq!(parse_amount(currency, &rendered), Ok(amount));
    }
}
