use crate::database::error::DatabaseError;
use crate::database::PgLedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Paid,
    Reversed,
}

impl CommissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommissionStatus::Pending => "pending",
            CommissionStatus::Paid => "paid",
            CommissionStatus::Reversed => "reversed",
        }
    }
}

impl TryFrom<String> for CommissionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(CommissionStatus::Pending),
            "paid" => Ok(CommissionStatus::Paid),
            "reversed" => Ok(CommissionStatus::Reversed),
            other => Err(format!("unknown commission status '{}'", other)),
        }
    }
}

/// Platform commission earned on one successful transaction
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommissionLog {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub amount: i64,
    pub percentage_bps: i32,
    #[sqlx(try_from = "String")]
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait CommissionRepository: Send + Sync {
    /// `None` when the transaction already has a commission row
    async fn record_commission(
        &self,
        transaction_id: Uuid,
        amount: i64,
        percentage_bps: i32,
    ) -> Result<Option<CommissionLog>, DatabaseError>;

    /// Returns true if a non-reversed row was flipped
    async fn reverse_commission(&self, transaction_id: Uuid) -> Result<bool, DatabaseError>;

    async fn find_commission(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CommissionLog>, DatabaseError>;
}

#[async_trait]
impl CommissionRepository for PgLedgerStore {
    async fn record_commission(
        &self,
        transaction_id: Uuid,
        amount: i64,
        percentage_bps: i32,
    ) -> Result<Option<CommissionLog>, DatabaseError> {
        sqlx::query_as::<_, CommissionLog>(
            "INSERT INTO commission_logs (transaction_id, amount, percentage_bps, status)
             VALUES ($1, $2, $3, 'pending')
             ON CONFLICT (transaction_id) DO NOTHING
             RETURNING id, transaction_id, amount, percentage_bps, status, created_at, updated_at",
        )
        .bind(transaction_id)
        .bind(amount)
        .bind(percentage_bps)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn reverse_commission(&self, transaction_id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE commission_logs
             SET status = 'reversed', updated_at = NOW()
             WHERE transaction_id = $1 AND status <> 'reversed'",
        )
        .bind(transaction_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_commission(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CommissionLog>, DatabaseError> {
        sqlx::query_as::<_, CommissionLog>(
            "SELECT id, transaction_id, amount, percentage_bps, status, created_at, updated_at
             FROM commission_logs WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
