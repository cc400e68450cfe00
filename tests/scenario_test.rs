mod common;

use anyhow::Result;
use chrono::Duration;
use common::{external_address, test_service};
use custodia::application::{ErrorKind, parse_currency};
use custodia::domain::{TransactionKind, TransactionStatus, WithdrawalMethod};
use serde_json::{Map, json};

/// Earn, withdraw, settle, then try to overdraw.
#[tokio::test]
async fn test_earn_withdraw_settle_overdraw() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let usdc = parse_currency("usdc")?;

    let wallet = service.create_wallet("c1").await?;
    let mut metadata = Map::new();
    metadata.insert("broker_id".into(), json!("b-1"));
    service
        .credit(wallet.id, usdc, "5.25", "Location data sale", metadata)
        .await?;

    let withdrawal = service
        .withdraw(
            "c1",
            usdc,
            "3.00",
            WithdrawalMethod::WalletTransfer {
                address: external_address(),
            },
        )
        .await?;

    let wallet = service.get_wallet("c1").await?.unwrap();
    assert_eq!(wallet.formatted_balance(usdc), "2.25");

    let history = service.list_transactions("c1").await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, withdrawal);
    assert_eq!(history[0].kind, TransactionKind::Withdrawal);
    assert_eq!(history[0].status, TransactionStatus::Pending);
    assert_eq!(history[1].kind, TransactionKind::DataSale);
    assert_eq!(history[1].status, TransactionStatus::Completed);

    // The simulated confirmation arrives once the delay has elapsed
    let delay = service.config().confirmation_delay.unwrap_or_else(Duration::zero);
    let report = service
        .process_settlements(history[0].created_at + delay)
        .await?;
    assert_eq!(report.confirmed, vec![withdrawal]);

    let settled = service.get_transaction(withdrawal).await?;
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert!(settled.completed_at.is_some());
    assert_eq!(service.get_wallet("c1").await?.unwrap().formatted_balance(usdc), "2.25");

    let err = service
        .withdraw(
            "c1",
            usdc,
            "10.00",
            WithdrawalMethod::WalletTransfer {
                address: external_address(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientBalance);
    assert_eq!(service.get_wallet("c1").await?.unwrap().formatted_balance(usdc), "2.25");
    assert_eq!(service.list_transactions("c1").await?.len(), 2);

    Ok(())
}
