use crate::database::error::DatabaseError;
use crate::database::PgLedgerStore;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::FromRow;

/// Mobile network and its provider-side identifiers
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Network {
    pub id: i32,
    pub name: String,
    /// `mtn`, `glo`, `airtel`, `9mobile`
    pub code: String,
    pub airtime_service_id: String,
    pub data_service_id: String,
    pub legacy_network_id: i32,
    pub commission_bps: i32,
    pub is_active: bool,
}

/// Data bundle sold on a network. `price` is what the user pays,
/// `nominal_amount` the provider face value.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataPlan {
    pub id: i32,
    pub network_id: i32,
    pub name: String,
    pub plan_code: String,
    pub plan_type: String,
    pub price: i64,
    pub nominal_amount: i64,
    pub validity: Option<String>,
    pub is_active: bool,
}

/// Plan as reported by a provider's catalog endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderPlan {
    pub plan_code: String,
    pub name: String,
    pub plan_type: String,
    pub nominal_amount: i64,
    pub validity: Option<String>,
}

#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn find_network(&self, id: i32) -> Result<Option<Network>, DatabaseError>;

    async fn find_plan(&self, id: i32) -> Result<Option<DataPlan>, DatabaseError>;

    /// Active plans for a network, cheapest first
    async fn list_plans(&self, network_id: i32) -> Result<Vec<DataPlan>, DatabaseError>;

    /// Insert new plans at face value; existing plans only get a new nominal
    /// amount so local pricing survives a refresh
    async fn upsert_plans(
        &self,
        network_id: i32,
        plans: &[ProviderPlan],
    ) -> Result<usize, DatabaseError>;
}

const PLAN_COLUMNS: &str =
    "id, network_id, name, plan_code, plan_type, price, nominal_amount, validity, is_active";

#[async_trait]
impl CatalogRepository for PgLedgerStore {
    async fn find_network(&self, id: i32) -> Result<Option<Network>, DatabaseError> {
        sqlx::query_as::<_, Network>(
            "SELECT id, name, code, airtime_service_id, data_service_id, legacy_network_id,
                    commission_bps, is_active
             FROM networks WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_plan(&self, id: i32) -> Result<Option<DataPlan>, DatabaseError> {
        let sql = format!("SELECT {} FROM data_plans WHERE id = $1", PLAN_COLUMNS);
        sqlx::query_as::<_, DataPlan>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn list_plans(&self, network_id: i32) -> Result<Vec<DataPlan>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM data_plans
             WHERE network_id = $1 AND is_active = TRUE
             ORDER BY price ASC, id ASC",
            PLAN_COLUMNS
        );
        sqlx::query_as::<_, DataPlan>(&sql)
            .bind(network_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn upsert_plans(
        &self,
        network_id: i32,
        plans: &[ProviderPlan],
    ) -> Result<usize, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let mut written = 0;

        for plan in plans {
            let result = sqlx::query(
                "INSERT INTO data_plans
                 (network_id, name, plan_code, plan_type, price, nominal_amount, validity)
                 VALUES ($1, $2, $3, $4, $5, $5, $6)
                 ON CONFLICT (network_id, plan_code)
                 DO UPDATE SET nominal_amount = EXCLUDED.nominal_amount,
                               validity = EXCLUDED.validity",
            )
            .bind(network_id)
            .bind(&plan.name)
            .bind(&plan.plan_code)
            .bind(&plan.plan_type)
            .bind(plan.nominal_amount)
            .bind(&plan.validity)
            .execute(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;
            written += result.rows_affected() as usize;
        }

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(written)
    }
}
