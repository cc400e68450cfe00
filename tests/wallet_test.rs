mod common;

use anyhow::Result;
use common::{Fixture, test_service, test_service_with};
use custodia::application::{ErrorKind, LedgerConfig, LedgerError};
use custodia::domain::{
    Currency, TransactionKind, TransactionStatus, WithdrawalMethod, is_valid_address,
};
use serde_json::json;

#[tokio::test]
async fn test_create_wallet_starts_at_zero() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let wallet = service.create_wallet("c1").await?;

    assert_eq!(wallet.consumer_id, "c1");
    assert!(is_valid_address(&wallet.address));
    assert_eq!(wallet.formatted_balance(Currency::Usdc), "0.00");
    assert_eq!(wallet.formatted_balance(Currency::Eth), "0.000000");
    assert!(service.list_transactions("c1").await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_created_wallet_round_trips_through_storage() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let created = service.create_wallet("c1").await?;
    let loaded = service.get_wallet("c1").await?.expect("wallet should exist");

    assert_eq!(created, loaded);
    assert_eq!(service.get_wallet_by_id(created.id).await?, loaded);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_wallet_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    service.create_wallet("c1").await?;
    let err = service.create_wallet("c1").await.unwrap_err();

    assert!(matches!(err, LedgerError::WalletAlreadyExists(ref id) if id == "c1"));
    assert_eq!(err.kind(), ErrorKind::Conflict);

    Ok(())
}

#[tokio::test]
async fn test_blank_consumer_id_is_rejected() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.create_wallet("   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    Ok(())
}

#[tokio::test]
async fn test_addresses_are_unique_per_consumer() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let a = service.create_wallet("alice").await?;
    let b = service.create_wallet("bob").await?;

    assert_ne!(a.address, b.address);
    assert_ne!(a.id, b.id);

    Ok(())
}

#[tokio::test]
async fn test_get_wallet_missing_is_none() -> Result<()> {
    let (service, _temp) = test_service().await?;

    assert!(service.get_wallet("nobody").await?.is_none());

    let err = service.get_wallet_by_id(uuid::Uuid::new_v4()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    Ok(())
}

#[tokio::test]
async fn test_wallet_summary_shape() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let summary = service.wallet_summary("c1").await?;
    assert!(!summary.has_wallet);
    assert_eq!(serde_json::to_value(&summary)?, json!({ "hasWallet": false }));

    let wallet = service.create_wallet("c1").await?;
    let summary = service.wallet_summary("c1").await?;
    assert!(summary.has_wallet);

    let value = serde_json::to_value(&summary)?;
    assert_eq!(value["hasWallet"], true);
    assert_eq!(value["wallet"]["address"], wallet.address);
    assert_eq!(value["wallet"]["balances"]["usdc"], "0.00");
    assert_eq!(value["wallet"]["balances"]["eth"], "0.000000");

    Ok(())
}

#[tokio::test]
async fn test_reads_are_idempotent() -> Result<()> {
    let (service, _temp) = test_service().await?;
    Fixture::funded_wallet(&service, "c1", "4.00").await?;

    let first_wallet = service.get_wallet("c1").await?;
    let second_wallet = service.get_wallet("c1").await?;
    assert_eq!(first_wallet, second_wallet);

    let first_history = service.list_transactions("c1").await?;
    let second_history = service.list_transactions("c1").await?;
    assert_eq!(first_history, second_history);

    Ok(())
}

#[tokio::test]
async fn test_faucet_funding_credits_both_currencies() -> Result<()> {
    let (service, _temp) = test_service().await?;
    let wallet = service.create_wallet("c1").await?;

    let result = service.fund_from_faucet("c1").await?;

    assert_eq!(result.transactions.len(), 2);
    assert_eq!(result.balances[&Currency::Eth], "0.000100");
    assert_eq!(result.balances[&Currency::Usdc], "1.00");

    let history = service.list_transactions("c1").await?;
    assert_eq!(history.len(), 2);
    for tx in &history {
        assert_eq!(tx.kind, TransactionKind::Deposit);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.to_address.as_deref(), Some(wallet.address.as_str()));
        assert_eq!(tx.metadata["source"], "faucet");
    }

    let wallet = service.get_wallet("c1").await?.unwrap();
    assert_eq!(wallet.version, 2);
    assert!(wallet.updated_at >= wallet.created_at);

    Ok(())
}

#[tokio::test]
async fn test_faucet_amounts_are_configurable() -> Result<()> {
    let config = LedgerConfig {
        faucet: vec![(Currency::Usdc, 2500), (Currency::Eth, 0)],
        ..LedgerConfig::default()
    };
    let (service, _temp) = test_service_with(config).await?;
    service.create_wallet("c1").await?;

    let result = service.fund_from_faucet("c1").await?;

    // Zero amounts are skipped
    assert_eq!(result.transactions.len(), 1);
    assert_eq!(result.balances[&Currency::Usdc], "25.00");
    assert_eq!(result.balances[&Currency::Eth], "0.000000");

    Ok(())
}

#[tokio::test]
async fn test_faucet_requires_wallet() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let err = service.fund_from_faucet("nobody").await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_seed_changes_derived_address() -> Result<()> {
    let (service, _temp) = test_service_with(LedgerConfig {
        wallet_seed: "production-seed".into(),
        ..LedgerConfig::default()
    })
    .await?;

    let wallet = service.create_wallet("c1").await?;
    assert!(is_valid_address(&wallet.address));
    assert_eq!(service.config().wallet_seed, "production-seed");

    Ok(())
}

#[tokio::test]
async fn test_consumer_ids_are_trimmed_on_every_lookup() -> Result<()> {
    let (service, _temp) = test_service().await?;

    let wallet = service.create_wallet(" c1 ").await?;
    assert_eq!(wallet.consumer_id, "c1");

    assert!(service.wallet_summary(" c1 ").await?.has_wallet);
    assert_eq!(service.get_wallet("c1 ").await?, Some(wallet.clone()));

    let err = service.create_wallet("c1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    service.fund_from_faucet(" c1").await?;
    assert_eq!(service.list_transactions(" c1 ").await?.len(), 2);

    let account = service.add_bank_account(" c1 ", "Checking", "12345678").await?;
    assert_eq!(service.list_bank_accounts("c1 ").await?, vec![account.clone()]);
    service
        .withdraw(
            " c1 ",
            Currency::Usdc,
            "0.50",
            WithdrawalMethod::Bank {
                bank_account_id: account.id,
            },
        )
        .await?;
    assert!(service.check_wallet(" c1 ").await?.is_consistent());

    let err = service.get_wallet("   ").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    Ok(())
}
