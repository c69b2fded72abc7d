use crate::database::error::DatabaseError;
use crate::database::PgLedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status vocabulary
// ---------------------------------------------------------------------------

/// User-facing lifecycle of a transaction.
///
/// `Pending -> {Success, Failed}` and `Success -> Refunded`. Nothing ever
/// returns to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Success,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Failed | TransactionStatus::Refunded
        )
    }

    /// Staying in the same state is allowed so provider_status can move on
    /// its own.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        matches!(
            (self, next),
            (Pending, Pending)
                | (Pending, Success)
                | (Pending, Failed)
                | (Success, Success)
                | (Success, Refunded)
        )
    }
}

impl TryFrom<String> for TransactionStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(format!("unknown transaction status '{}'", other)),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery-side view of a transaction, evolves independently of the status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    Pending,
    Delivered,
    Failed,
    /// Provider reported the request id as already processed
    Retry,
}

impl ProviderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderStatus::Pending => "pending",
            ProviderStatus::Delivered => "delivered",
            ProviderStatus::Failed => "failed",
            ProviderStatus::Retry => "retry",
        }
    }
}

impl TryFrom<String> for ProviderStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(ProviderStatus::Pending),
            "delivered" => Ok(ProviderStatus::Delivered),
            "failed" => Ok(ProviderStatus::Failed),
            "retry" => Ok(ProviderStatus::Retry),
            other => Err(format!("unknown provider status '{}'", other)),
        }
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a `(status, provider_status)` pair is one the engine can produce
pub fn is_valid_combination(status: TransactionStatus, provider: ProviderStatus) -> bool {
    use ProviderStatus as P;
    use TransactionStatus as S;
    matches!(
        (status, provider),
        (S::Pending, P::Pending)
            | (S::Pending, P::Retry)
            | (S::Success, P::Delivered)
            | (S::Success, P::Pending)
            | (S::Failed, P::Failed)
            | (S::Failed, P::Pending)
            | (S::Refunded, P::Failed)
    )
}

/// Why a transaction ended `failed` or `refunded`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Provider answered that the delivery failed
    Delivery,
    /// Provider rejected our credentials; retrying cannot help
    ProviderAuth,
    /// Wallet refused the debit
    Debit,
    /// Checkout or gateway charge failed
    Payment,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Delivery => "delivery",
            FailureKind::ProviderAuth => "provider_auth",
            FailureKind::Debit => "debit",
            FailureKind::Payment => "payment",
        }
    }
}

impl TryFrom<String> for FailureKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "delivery" => Ok(FailureKind::Delivery),
            "provider_auth" => Ok(FailureKind::ProviderAuth),
            "debit" => Ok(FailureKind::Debit),
            "payment" => Ok(FailureKind::Payment),
            other => Err(format!("unknown failure kind '{}'", other)),
        }
    }
}

// Nullable column, so it decodes through `Option<FailureKind>` rather than
// the `try_from = "String"` route the other enums take
impl sqlx::Type<sqlx::Postgres> for FailureKind {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for FailureKind {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let text = <String as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
        FailureKind::try_from(text).map_err(Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    DataPurchase,
    AirtimePurchase,
    Funding,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::DataPurchase => "data_purchase",
            TransactionType::AirtimePurchase => "airtime_purchase",
            TransactionType::Funding => "funding",
        }
    }

    pub fn is_purchase(&self) -> bool {
        !matches!(self, TransactionType::Funding)
    }
}

impl TryFrom<String> for TransactionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "data_purchase" => Ok(TransactionType::DataPurchase),
            "airtime_purchase" => Ok(TransactionType::AirtimePurchase),
            "funding" => Ok(TransactionType::Funding),
            other => Err(format!("unknown transaction type '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Wallet,
    Paystack,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::Paystack => "paystack",
        }
    }
}

impl TryFrom<String> for PaymentMethod {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "wallet" => Ok(PaymentMethod::Wallet),
            "paystack" => Ok(PaymentMethod::Paystack),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Transaction entity, one row per purchase or funding attempt
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub reference: String,
    pub idempotency_key: Option<String>,
    pub user_id: String,
    #[sqlx(try_from = "String")]
    pub transaction_type: TransactionType,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub nominal_amount: i64,
    pub platform_commission: i64,
    pub agent_profit: i64,
    pub commission_bps: i32,
    #[sqlx(try_from = "String")]
    pub status: TransactionStatus,
    #[sqlx(try_from = "String")]
    pub provider_status: ProviderStatus,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub paystack_reference: Option<String>,
    pub network_id: Option<i32>,
    pub plan_id: Option<i32>,
    pub phone_number: Option<String>,
    pub retry_of: Option<Uuid>,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// `VTU-<yyyymmddhhmmss>-<8 hex>`
    pub fn generate_reference() -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("VTU-{}-{}", Utc::now().format("%Y%m%d%H%M%S"), &suffix[..8])
    }

    /// Parked: charged or in flight, waiting on the provider
    pub fn is_awaiting_delivery(&self) -> bool {
        matches!(
            (self.status, self.provider_status),
            (TransactionStatus::Pending, ProviderStatus::Pending)
                | (TransactionStatus::Pending, ProviderStatus::Retry)
                | (TransactionStatus::Success, ProviderStatus::Pending)
        )
    }
}

/// Split `amount` into platform commission and agent profit. Floors to kobo.
pub fn split_commission(amount: i64, commission_bps: i32) -> (i64, i64) {
    let commission = amount.saturating_mul(i64::from(commission_bps)) / 10_000;
    (commission, amount - commission)
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub reference: String,
    pub idempotency_key: Option<String>,
    pub user_id: String,
    pub transaction_type: TransactionType,
    pub payment_method: PaymentMethod,
    pub amount: i64,
    pub nominal_amount: i64,
    pub commission_bps: i32,
    pub provider: Option<String>,
    pub paystack_reference: Option<String>,
    pub network_id: Option<i32>,
    pub plan_id: Option<i32>,
    pub phone_number: Option<String>,
    pub retry_of: Option<Uuid>,
    pub retry_count: i32,
}

/// Compare-and-set status write
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub from: TransactionStatus,
    /// Also require this provider status when set
    pub from_provider: Option<ProviderStatus>,
    pub to: TransactionStatus,
    pub provider_status: ProviderStatus,
    pub provider_reference: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub provider_response: Option<serde_json::Value>,
}

impl StatusTransition {
    pub fn new(from: TransactionStatus, to: TransactionStatus, provider_status: ProviderStatus) -> Self {
        Self {
            from,
            from_provider: None,
            to,
            provider_status,
            provider_reference: None,
            error_message: None,
            failure_kind: None,
            provider_response: None,
        }
    }

    pub fn when_provider(mut self, provider_status: ProviderStatus) -> Self {
        self.from_provider = Some(provider_status);
        self
    }

    pub fn with_provider_reference(mut self, reference: Option<String>) -> Self {
        self.provider_reference = reference;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_failure(mut self, kind: FailureKind) -> Self {
        self.failure_kind = Some(kind);
        self
    }

    pub fn with_response(mut self, response: Option<serde_json::Value>) -> Self {
        self.provider_response = response;
        self
    }
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Unique violations surface as `DatabaseErrorKind::UniqueViolation`
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError>;

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_reference(&self, reference: &str)
        -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_paystack_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Apply `transition` only if the row is still in `transition.from`.
    /// `None` means another writer got there first.
    async fn transition(
        &self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Option<Transaction>, DatabaseError>;

    /// Bump `retry_count` if it is below `max`; returns the new count
    async fn increment_retry_count(&self, id: Uuid, max: i32)
        -> Result<Option<i32>, DatabaseError>;

    /// A re-attempt of `root_id` that is still pending or succeeded.
    /// At most one exists (`transactions_open_retry_key`).
    async fn find_open_retry(&self, root_id: Uuid) -> Result<Option<Transaction>, DatabaseError>;
}

pub(crate) const TRANSACTION_COLUMNS: &str = "id, reference, idempotency_key, user_id, transaction_type, \
     payment_method, amount, nominal_amount, platform_commission, agent_profit, commission_bps, \
     status, provider_status, provider, provider_reference, paystack_reference, network_id, \
     plan_id, phone_number, retry_of, retry_count, error_message, failure_kind, provider_response, \
     created_at, updated_at";

/// Statuses that block another re-attempt of the same root
pub const OPEN_RETRY_STATUSES: [TransactionStatus; 2] =
    [TransactionStatus::Pending, TransactionStatus::Success];

/// Compare-and-set on any executor, so it can join a wider database
/// transaction
pub(crate) async fn apply_transition<'e, E>(
    executor: E,
    id: Uuid,
    transition: &StatusTransition,
) -> Result<Option<Transaction>, DatabaseError>
where
    E: sqlx::PgExecutor<'e>,
{
    if !transition.from.can_transition_to(transition.to) {
        return Ok(None);
    }

    let sql = format!(
        "UPDATE transactions
         SET status = $3,
             provider_status = $4,
             provider_reference = COALESCE($5, provider_reference),
             error_message = COALESCE($6, error_message),
             provider_response = COALESCE($7, provider_response),
             failure_kind = COALESCE($9, failure_kind),
             updated_at = NOW()
         WHERE id = $1
           AND status = $2
           AND ($8::TEXT IS NULL OR provider_status = $8)
         RETURNING {}",
        TRANSACTION_COLUMNS
    );
    sqlx::query_as::<_, Transaction>(&sql)
        .bind(id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(transition.provider_status.as_str())
        .bind(&transition.provider_reference)
        .bind(&transition.error_message)
        .bind(&transition.provider_response)
        .bind(transition.from_provider.map(|p| p.as_str()))
        .bind(transition.failure_kind.map(|k| k.as_str()))
        .fetch_optional(executor)
        .await
        .map_err(DatabaseError::from_sqlx)
}

impl PgLedgerStore {
    async fn find_transaction_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE {} = $1",
            TRANSACTION_COLUMNS, column
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}

#[async_trait]
impl TransactionRepository for PgLedgerStore {
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let (commission, agent_profit) = split_commission(new.amount, new.commission_bps);
        let sql = format!(
            "INSERT INTO transactions
             (reference, idempotency_key, user_id, transaction_type, payment_method, amount,
              nominal_amount, platform_commission, agent_profit, commission_bps, status,
              provider_status, provider, paystack_reference, network_id, plan_id, phone_number,
              retry_of, retry_count)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 'pending', $11, $12,
                     $13, $14, $15, $16, $17)
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(&new.reference)
            .bind(&new.idempotency_key)
            .bind(&new.user_id)
            .bind(new.transaction_type.as_str())
            .bind(new.payment_method.as_str())
            .bind(new.amount)
            .bind(new.nominal_amount)
            .bind(commission)
            .bind(agent_profit)
            .bind(new.commission_bps)
            .bind(&new.provider)
            .bind(&new.paystack_reference)
            .bind(new.network_id)
            .bind(new.plan_id)
            .bind(&new.phone_number)
            .bind(new.retry_of)
            .bind(new.retry_count)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.find_transaction_where("reference", reference).await
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.find_transaction_where("idempotency_key", key).await
    }

    async fn find_by_paystack_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.find_transaction_where("paystack_reference", reference)
            .await
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        self.find_transaction_where("provider_reference", reference)
            .await
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Option<Transaction>, DatabaseError> {
        apply_transition(&self.pool, id, &transition).await
    }

    async fn increment_retry_count(
        &self,
        id: Uuid,
        max: i32,
    ) -> Result<Option<i32>, DatabaseError> {
        sqlx::query_scalar::<_, i32>(
            "UPDATE transactions
             SET retry_count = retry_count + 1, updated_at = NOW()
             WHERE id = $1 AND retry_count < $2
             RETURNING retry_count",
        )
        .bind(id)
        .bind(max)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn find_open_retry(&self, root_id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM transactions
             WHERE retry_of = $1 AND status = ANY($2)
             LIMIT 1",
            TRANSACTION_COLUMNS
        );
        let statuses: Vec<String> = OPEN_RETRY_STATUSES
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        sqlx::query_as::<_, Transaction>(&sql)
            .bind(root_id)
            .bind(statuses)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
