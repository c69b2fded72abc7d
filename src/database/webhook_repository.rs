use crate::database::error::DatabaseError;
use crate::database::PgLedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookSource {
    Paystack,
    Vtpass,
    Legacy,
}

impl WebhookSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookSource::Paystack => "paystack",
            WebhookSource::Vtpass => "vtpass",
            WebhookSource::Legacy => "legacy",
        }
    }

    /// Source for a delivery provider name
    pub fn for_provider(name: &str) -> Self {
        if name.eq_ignore_ascii_case("legacy") {
            WebhookSource::Legacy
        } else {
            WebhookSource::Vtpass
        }
    }
}

impl TryFrom<String> for WebhookSource {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "paystack" => Ok(WebhookSource::Paystack),
            "vtpass" => Ok(WebhookSource::Vtpass),
            "legacy" => Ok(WebhookSource::Legacy),
            other => Err(format!("unknown webhook source '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Received,
    Processed,
    Failed,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Received => "received",
            WebhookStatus::Processed => "processed",
            WebhookStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for WebhookStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "received" => Ok(WebhookStatus::Received),
            "processed" => Ok(WebhookStatus::Processed),
            "failed" => Ok(WebhookStatus::Failed),
            other => Err(format!("unknown webhook status '{}'", other)),
        }
    }
}

/// Append-only audit row for an inbound webhook
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookLog {
    pub id: Uuid,
    #[sqlx(try_from = "String")]
    pub source: WebhookSource,
    pub event: Option<String>,
    pub reference: Option<String>,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub is_valid: bool,
    #[sqlx(try_from = "String")]
    pub status: WebhookStatus,
    pub transaction_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewWebhookLog {
    pub source: WebhookSource,
    pub event: Option<String>,
    pub reference: Option<String>,
    pub payload: serde_json::Value,
    pub signature: Option<String>,
    pub is_valid: bool,
}

#[async_trait]
pub trait WebhookRepository: Send + Sync {
    async fn log_webhook(&self, new: NewWebhookLog) -> Result<WebhookLog, DatabaseError>;

    /// Only status, transaction link and error change after insert
    async fn mark_webhook(
        &self,
        id: Uuid,
        status: WebhookStatus,
        transaction_id: Option<Uuid>,
        error_message: Option<String>,
    ) -> Result<(), DatabaseError>;

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookLog>, DatabaseError>;
}

const WEBHOOK_COLUMNS: &str = "id, source, event, reference, payload, signature, is_valid, \
     status, transaction_id, error_message, created_at, updated_at";

#[async_trait]
impl WebhookRepository for PgLedgerStore {
    async fn log_webhook(&self, new: NewWebhookLog) -> Result<WebhookLog, DatabaseError> {
        let sql = format!(
            "INSERT INTO webhook_logs (source, event, reference, payload, signature, is_valid, status)
             VALUES ($1, $2, $3, $4, $5, $6, 'received')
             RETURNING {}",
            WEBHOOK_COLUMNS
        );
        sqlx::query_as::<_, WebhookLog>(&sql)
            .bind(new.source.as_str())
            .bind(&new.event)
            .bind(&new.reference)
            .bind(&new.payload)
            .bind(&new.signature)
            .bind(new.is_valid)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_webhook(
        &self,
        id: Uuid,
        status: WebhookStatus,
        transaction_id: Option<Uuid>,
        error_message: Option<String>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE webhook_logs
             SET status = $2,
                 transaction_id = COALESCE($3, transaction_id),
                 error_message = $4,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(transaction_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(())
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookLog>, DatabaseError> {
        let sql = format!("SELECT {} FROM webhook_logs WHERE id = $1", WEBHOOK_COLUMNS);
        sqlx::query_as::<_, WebhookLog>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
