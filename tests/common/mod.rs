// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use anyhow::Result;
use custodia::application::{LedgerConfig, LedgerService};
use custodia::domain::{Currency, Wallet, WithdrawalMethod};
use serde_json::Map;
use tempfile::TempDir;

/// Helper to create a test service with a temporary database
pub async fn test_service() -> Result<(LedgerService, TempDir)> {
    test_service_with(LedgerConfig::default()).await
}

/// Helper to create a test service with custom settings
pub async fn test_service_with(config: LedgerConfig) -> Result<(LedgerService, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service = LedgerService::init(db_path.to_str().unwrap())
        .await?
        .with_config(config);
    Ok((service, temp_dir))
}

/// A second connection pool on the service's database file, for tampering with storage
pub async fn side_pool(temp_dir: &TempDir) -> Result<sqlx::SqlitePool> {
    let db_path = temp_dir.path().join("test.db");
    let url = format!("sqlite:{}", db_path.display());
    Ok(sqlx::SqlitePool::connect(&url).await?)
}

/// A syntactically valid external address: "0xAbC" right-padded with zeros
pub fn external_address() -> String {
    format!("{:0<42}", "0xAbC")
}

pub fn to_external() -> WithdrawalMethod {
    WithdrawalMethod::WalletTransfer {
        address: external_address(),
    }
}

/// Test fixture: a consumer wallet with some usdc earnings
pub struct Fixture;

impl Fixture {
    /// Create a wallet for `consumer` and credit `usdc` to it
    pub async fn funded_wallet(service: &LedgerService, consumer: &str, usdc: &str) -> Result<Wallet> {
        let wallet = service.create_wallet(consumer).await?;
        service
            .credit(wallet.id, Currency::Usdc, usdc, "data sale", Map::new())
            .await?;
        Ok(service.get_wallet(consumer).await?.unwrap())
    }
}
