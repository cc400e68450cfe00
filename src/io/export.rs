use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::application::{LedgerService, WalletView};
use crate::domain::Transaction;

/// Wallet statement for JSON export
#[derive(Debug, Clone, Serialize)]
pub struct Statement {
    pub consumer_id: String,
    pub exported_at: DateTime<Utc>,
    pub wallet: WalletView,
    pub transactions: Vec<Transaction>,
}

/// Exporter for converting a consumer's ledger history to various formats
pub struct Exporter<'a> {
    service: &'a LedgerService,
}

impl<'a> Exporter<'a> {
    pub fn new(service: &'a LedgerService) -> Self {
        Self { service }
    }

    /// Export the consumer's transactions to CSV, most recent first
    pub async fn export_transactions_csv<W: Write>(&self, consumer_id: &str, writer: W) -> Result<usize> {
        let transactions = self.service.list_transactions(consumer_id).await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "id",
            "sequence",
            "created_at",
            "kind",
            "status",
            "amount",
            "currency",
            "from_address",
            "to_address",
            "description",
            "completed_at",
            "failed_at",
            "metadata",
        ])?;

        for tx in &transactions {
            csv_writer.write_record(&[
                tx.id.to_string(),
                tx.sequence.to_string(),
                tx.created_at.to_rfc3339(),
                tx.kind.to_string(),
                tx.status.to_string(),
                tx.formatted_amount(),
                tx.currency.to_string(),
                tx.from_address.clone().unwrap_or_default(),
                tx.to_address.clone().unwrap_or_default(),
                tx.description.clone(),
                tx.completed_at
                    .map(|dt| dt.to_rfc3339())
                    .unwrap_or_default(),
                tx.failed_at.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
                serde_json::to_string(&tx.metadata)?,
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export wallet, balances and history as one JSON document
    pub async fn export_statement_json<W: Write>(&self, consumer_id: &str, writer: W) -> Result<Statement> {
        let wallet = self
            .service
            .get_wallet(consumer_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("No wallet for consumer: {}", consumer_id))?;
        let transactions = self.service.list_transactions(consumer_id).await?;

        let statement = Statement {
            consumer_id: consumer_id.to_string(),
            exported_at: Utc::now(),
            wallet: WalletView::from(&wallet),
            transactions,
        };

        serde_json::to_writer_pretty(writer, &statement)?;
        Ok(statement)
    }
}
