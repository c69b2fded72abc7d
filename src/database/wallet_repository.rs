use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::transaction_repository::{
    apply_transition, StatusTransition, Transaction, TransactionType, TRANSACTION_COLUMNS,
};
use crate::database::PgLedgerStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    Active,
    Frozen,
    Suspended,
}

impl WalletStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletStatus::Active => "active",
            WalletStatus::Frozen => "frozen",
            WalletStatus::Suspended => "suspended",
        }
    }
}

impl TryFrom<String> for WalletStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(WalletStatus::Active),
            "frozen" => Ok(WalletStatus::Frozen),
            "suspended" => Ok(WalletStatus::Suspended),
            other => Err(format!("unknown wallet status '{}'", other)),
        }
    }
}

/// Wallet entity. Amounts are kobo.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Wallet {
    pub id: Uuid,
    pub user_id: String,
    pub balance: i64,
    pub total_funded: i64,
    pub total_spent: i64,
    pub total_refunded: i64,
    pub last_funded_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// `balance == total_funded - total_spent + total_refunded`
    pub fn is_balanced(&self) -> bool {
        self.balance == self.total_funded - self.total_spent + self.total_refunded
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Funding,
    Refund,
}

#[derive(Debug, Clone)]
pub enum DebitOutcome {
    Debited(Wallet),
    InsufficientBalance { available: i64 },
    Inactive { status: WalletStatus },
    NotFound,
}

#[derive(Debug, Clone)]
pub enum RefundOutcome {
    Refunded(Wallet),
    AlreadyRefunded,
}

/// A purchase closed as failed or refunded, with its refund
#[derive(Debug, Clone)]
pub struct FailedWithRefund {
    pub transaction: Transaction,
    pub refund: RefundOutcome,
}

#[derive(Debug, Clone)]
pub enum FundingSettlement {
    /// This call moved the row to success and credited the wallet
    Credited {
        transaction: Transaction,
        wallet: Wallet,
    },
    /// Row already left pending; nothing credited
    Unchanged(Transaction),
}

/// Double-refund guard, unique per transaction
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RefundRecord {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub user_id: String,
    pub amount: i64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Create a zero-balance wallet if the user has none
    async fn ensure_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError>;

    async fn find_wallet(&self, user_id: &str) -> Result<Option<Wallet>, DatabaseError>;

    /// Conditional debit; never takes the balance below zero
    async fn debit(&self, user_id: &str, amount: i64) -> Result<DebitOutcome, DatabaseError>;

    /// Credits are accepted whatever the wallet status
    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: CreditKind,
    ) -> Result<Wallet, DatabaseError>;

    /// Record a refund and credit the wallet atomically, at most once per
    /// transaction
    async fn refund(
        &self,
        transaction: &Transaction,
        amount: i64,
        reason: &str,
    ) -> Result<RefundOutcome, DatabaseError>;

    async fn find_refund(&self, transaction_id: Uuid)
        -> Result<Option<RefundRecord>, DatabaseError>;

    /// Apply a closing `transition` and refund the full transaction amount
    /// in one database transaction. `None` when the compare-and-set lost;
    /// nothing is credited then. A failed write leaves the row untouched.
    async fn fail_and_refund(
        &self,
        id: Uuid,
        transition: StatusTransition,
        reason: &str,
    ) -> Result<Option<FailedWithRefund>, DatabaseError>;

    /// pending -> success on a funding row plus the wallet credit, atomically
    async fn settle_funding(
        &self,
        transaction_id: Uuid,
    ) -> Result<FundingSettlement, DatabaseError>;
}

const WALLET_COLUMNS: &str = "id, user_id, balance, total_funded, total_spent, total_refunded, \
     last_funded_at, status, created_at, updated_at";

#[async_trait]
impl WalletRepository for PgLedgerStore {
    async fn ensure_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError> {
        sqlx::query(
            "INSERT INTO wallets (user_id) VALUES ($1)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        self.find_wallet(user_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("wallet", user_id))
    }

    async fn find_wallet(&self, user_id: &str) -> Result<Option<Wallet>, DatabaseError> {
        let sql = format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS);
        sqlx::query_as::<_, Wallet>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }

    async fn debit(&self, user_id: &str, amount: i64) -> Result<DebitOutcome, DatabaseError> {
        let sql = format!(
            "UPDATE wallets
             SET balance = balance - $2,
                 total_spent = total_spent + $2,
                 updated_at = NOW()
             WHERE user_id = $1 AND status = 'active' AND balance >= $2
             RETURNING {}",
            WALLET_COLUMNS
        );
        let debited = sqlx::query_as::<_, Wallet>(&sql)
            .bind(user_id)
            .bind(amount)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        if let Some(wallet) = debited {
            return Ok(DebitOutcome::Debited(wallet));
        }

        // Work out why the guarded update matched nothing
        Ok(match self.find_wallet(user_id).await? {
            None => DebitOutcome::NotFound,
            Some(wallet) if wallet.status != WalletStatus::Active => DebitOutcome::Inactive {
                status: wallet.status,
            },
            Some(wallet) => DebitOutcome::InsufficientBalance {
                available: wallet.balance,
            },
        })
    }

    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: CreditKind,
    ) -> Result<Wallet, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;
        let wallet = credit_in_tx(&mut tx, user_id, amount, kind).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(wallet)
    }

    async fn refund(
        &self,
        transaction: &Transaction,
        amount: i64,
        reason: &str,
    ) -> Result<RefundOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        if !insert_refund_record(&mut tx, transaction, amount, reason).await? {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(RefundOutcome::AlreadyRefunded);
        }

        let wallet = credit_in_tx(&mut tx, &transaction.user_id, amount, CreditKind::Refund).await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(RefundOutcome::Refunded(wallet))
    }

    async fn find_refund(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<RefundRecord>, DatabaseError> {
        sqlx::query_as::<_, RefundRecord>(
            "SELECT id, transaction_id, user_id, amount, reason, created_at
             FROM refund_records WHERE transaction_id = $1",
        )
        .bind(transaction_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn fail_and_refund(
        &self,
        id: Uuid,
        transition: StatusTransition,
        reason: &str,
    ) -> Result<Option<FailedWithRefund>, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let Some(transaction) = apply_transition(&mut *tx, id, &transition).await? else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            return Ok(None);
        };

        let recorded =
            insert_refund_record(&mut tx, &transaction, transaction.amount, reason).await?;
        let refund = if recorded {
            let wallet = credit_in_tx(
                &mut tx,
                &transaction.user_id,
                transaction.amount,
                CreditKind::Refund,
            )
            .await?;
            RefundOutcome::Refunded(wallet)
        } else {
            RefundOutcome::AlreadyRefunded
        };
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(Some(FailedWithRefund {
            transaction,
            refund,
        }))
    }

    async fn settle_funding(
        &self,
        transaction_id: Uuid,
    ) -> Result<FundingSettlement, DatabaseError> {
        use crate::database::transaction_repository::TransactionRepository;

        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let sql = format!(
            "UPDATE transactions
             SET status = 'success', provider_status = 'delivered', updated_at = NOW()
             WHERE id = $1 AND status = 'pending' AND transaction_type = $2
             RETURNING {}",
            TRANSACTION_COLUMNS
        );
        let settled = sqlx::query_as::<_, Transaction>(&sql)
            .bind(transaction_id)
            .bind(TransactionType::Funding.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(DatabaseError::from_sqlx)?;

        let Some(transaction) = settled else {
            tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
            let current = self
                .find_transaction(transaction_id)
                .await?
                .ok_or_else(|| DatabaseError::not_found("transaction", transaction_id))?;
            return Ok(FundingSettlement::Unchanged(current));
        };

        let wallet = credit_in_tx(
            &mut tx,
            &transaction.user_id,
            transaction.amount,
            CreditKind::Funding,
        )
        .await?;
        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(FundingSettlement::Credited {
            transaction,
            wallet,
        })
    }
}

/// False when the transaction already has a refund record
async fn insert_refund_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    transaction: &Transaction,
    amount: i64,
    reason: &str,
) -> Result<bool, DatabaseError> {
    let inserted = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO refund_records (transaction_id, user_id, amount, reason)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (transaction_id) DO NOTHING
         RETURNING id",
    )
    .bind(transaction.id)
    .bind(&transaction.user_id)
    .bind(amount)
    .bind(reason)
    .fetch_optional(&mut **tx)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(inserted.is_some())
}

async fn credit_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: &str,
    amount: i64,
    kind: CreditKind,
) -> Result<Wallet, DatabaseError> {
    let sql = match kind {
        CreditKind::Funding => format!(
            "UPDATE wallets
             SET balance = balance + $2,
                 total_funded = total_funded + $2,
                 last_funded_at = NOW(),
                 updated_at = NOW()
             WHERE user_id = $1
             RETURNING {}",
            WALLET_COLUMNS
        ),
        CreditKind::Refund => format!(
            "UPDATE wallets
             SET balance = balance + $2,
                 total_refunded = total_refunded + $2,
                 updated_at = NOW()
             WHERE user_id = $1
             RETURNING {}",
            WALLET_COLUMNS
        ),
    };

    sqlx::query_as::<_, Wallet>(&sql)
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&mut **tx)
        .await
        .map_err(DatabaseError::from_sqlx)?
        .ok_or_else(|| {
            DatabaseError::new(DatabaseErrorKind::NotFound {
                entity: "wallet".to_string(),
                id: user_id.to_string(),
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(balance: i64, funded: i64, spent: i64, refunded: i64) -> Wallet {
        Wallet {
            id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            balance,
            total_funded: funded,
            total_spent: spent,
            total_refunded: refunded,
            last_funded_at: None,
            status: WalletStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_balance_identity_counts_refunds() {
        assert!(wallet(100_000, 100_000, 0, 0).is_balanced());
        assert!(wallet(100_000, 100_000, 25_000, 25_000).is_balanced());
        assert!(!wallet(100_000, 100_000, 25_000, 0).is_balanced());
    }

    #[test]
    fn test_wallet_status_roundtrips_db_text() {
        assert_eq!(
            WalletStatus::try_from("frozen".to_string()),
            Ok(WalletStatus::Frozen)
        );
        assert!(WalletStatus::try_from("closed".to_string()).is_err());
    }
}
