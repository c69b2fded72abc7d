//! In-memory ledger used by tests and `SKIP_EXTERNALS=true` runs.
//!
//! One mutex guards all tables, so every trait method is atomic the same way
//! a single Postgres statement or transaction is. Unique constraints carry the
//! same names Postgres generates for the migrations.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::catalog_repository::{CatalogRepository, DataPlan, Network, ProviderPlan};
use super::commission_repository::{CommissionLog, CommissionRepository, CommissionStatus};
use super::error::{DatabaseError, DatabaseErrorKind};
use super::transaction_repository::{
    split_commission, NewTransaction, ProviderStatus, StatusTransition, Transaction,
    TransactionRepository, TransactionStatus, TransactionType, OPEN_RETRY_STATUSES,
};
use super::wallet_repository::{
    CreditKind, DebitOutcome, FailedWithRefund, FundingSettlement, RefundOutcome, RefundRecord,
    Wallet, WalletRepository, WalletStatus,
};
use super::webhook_repository::{
    NewWebhookLog, WebhookLog, WebhookRepository, WebhookStatus,
};
use super::LedgerStore;

/// Writes the store can be told to fail, for exercising outage handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    WebhookLog,
    Refund,
}

#[derive(Default)]
struct Tables {
    wallets: HashMap<String, Wallet>,
    transactions: HashMap<Uuid, Transaction>,
    commissions: HashMap<Uuid, CommissionLog>,
    refunds: HashMap<Uuid, RefundRecord>,
    webhooks: HashMap<Uuid, WebhookLog>,
    networks: HashMap<i32, Network>,
    plans: HashMap<i32, DataPlan>,
    next_plan_id: i32,
    faults: HashSet<Fault>,
}

impl Tables {
    fn check_fault(&self, fault: Fault) -> Result<(), DatabaseError> {
        if self.faults.contains(&fault) {
            return Err(DatabaseError::new(DatabaseErrorKind::ConnectionError {
                message: format!("{:?} write unavailable", fault),
            }));
        }
        Ok(())
    }

    /// Refund record plus wallet credit; nothing changes on error
    fn record_refund(
        &mut self,
        transaction: &Transaction,
        amount: i64,
        reason: &str,
    ) -> Result<RefundOutcome, DatabaseError> {
        self.check_fault(Fault::Refund)?;
        if self.refunds.contains_key(&transaction.id) {
            return Ok(RefundOutcome::AlreadyRefunded);
        }
        let wallet = self.credit(&transaction.user_id, amount, CreditKind::Refund)?;
        self.refunds.insert(
            transaction.id,
            RefundRecord {
                id: Uuid::new_v4(),
                transaction_id: transaction.id,
                user_id: transaction.user_id.clone(),
                amount,
                reason: reason.to_string(),
                created_at: Utc::now(),
            },
        );
        Ok(RefundOutcome::Refunded(wallet))
    }

    /// The row `transition` would produce, without storing it
    fn transitioned(
        &self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Option<Transaction>, DatabaseError> {
        if !transition.from.can_transition_to(transition.to) {
            return Ok(None);
        }
        let Some(current) = self.transactions.get(&id) else {
            return Ok(None);
        };
        if current.status != transition.from {
            return Ok(None);
        }
        if let Some(expected) = transition.from_provider {
            if current.provider_status != expected {
                return Ok(None);
            }
        }

        let mut updated = current.clone();
        updated.status = transition.to;
        updated.provider_status = transition.provider_status;
        if transition.provider_reference.is_some() {
            updated.provider_reference = transition.provider_reference;
        }
        if transition.error_message.is_some() {
            updated.error_message = transition.error_message;
        }
        if transition.failure_kind.is_some() {
            updated.failure_kind = transition.failure_kind;
        }
        if transition.provider_response.is_some() {
            updated.provider_response = transition.provider_response;
        }
        updated.updated_at = Utc::now();

        if let Some(constraint) = self.unique_clash(&updated) {
            return Err(DatabaseError::unique_violation(constraint));
        }
        Ok(Some(updated))
    }

    fn credit(&mut self, user_id: &str, amount: i64, kind: CreditKind) -> Result<Wallet, DatabaseError> {
        let wallet = self
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| DatabaseError::not_found("wallet", user_id))?;
        wallet.balance += amount;
        match kind {
            CreditKind::Funding => {
                wallet.total_funded += amount;
                wallet.last_funded_at = Some(Utc::now());
            }
            CreditKind::Refund => wallet.total_refunded += amount,
        }
        wallet.updated_at = Utc::now();
        Ok(wallet.clone())
    }

    fn unique_clash(&self, candidate: &Transaction) -> Option<&'static str> {
        self.transactions.values().find_map(|existing| {
            if existing.id == candidate.id {
                return None;
            }
            if existing.reference == candidate.reference {
                return Some("transactions_reference_key");
            }
            if same_some(&existing.idempotency_key, &candidate.idempotency_key) {
                return Some("transactions_idempotency_key_key");
            }
            if same_some(&existing.provider_reference, &candidate.provider_reference) {
                return Some("transactions_provider_reference_key");
            }
            if same_some(&existing.paystack_reference, &candidate.paystack_reference) {
                return Some("transactions_paystack_reference_key");
            }
            let open = |t: &Transaction| OPEN_RETRY_STATUSES.contains(&t.status);
            if existing.retry_of.is_some()
                && existing.retry_of == candidate.retry_of
                && open(existing)
                && open(candidate)
            {
                return Some("transactions_open_retry_key");
            }
            None
        })
    }
}

fn same_some(a: &Option<String>, b: &Option<String>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

/// Mutex-guarded ledger with the same semantics as [`super::PgLedgerStore`]
#[derive(Default)]
pub struct InMemoryLedgerStore {
    tables: Mutex<Tables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with the four Nigerian networks and a few data plans
    pub async fn with_default_catalog() -> Self {
        let store = Self::new();
        for (id, name, code, data_service, legacy_id) in [
            (1, "MTN", "mtn", "mtn-data", 1),
            (2, "GLO", "glo", "glo-data", 2),
            (3, "Airtel", "airtel", "airtel-data", 4),
            (4, "9mobile", "9mobile", "etisalat-data", 3),
        ] {
            store
                .insert_network(Network {
                    id,
                    name: name.to_string(),
                    code: code.to_string(),
                    airtime_service_id: if code == "9mobile" {
                        "etisalat".to_string()
                    } else {
                        code.to_string()
                    },
                    data_service_id: data_service.to_string(),
                    legacy_network_id: legacy_id,
                    commission_bps: 1_000,
                    is_active: true,
                })
                .await;
        }
        store
            .insert_plan(1, "MTN 1GB SME", "mtn-1gb-sme", "sme", 25_000, 24_000, Some("30 days"))
            .await;
        store
            .insert_plan(1, "MTN 2GB SME", "mtn-2gb-sme", "sme", 50_000, 48_000, Some("30 days"))
            .await;
        store
            .insert_plan(2, "GLO 1GB", "glo-1gb", "gifting", 30_000, 29_000, Some("30 days"))
            .await;
        store
    }

    pub async fn insert_network(&self, network: Network) {
        let mut tables = self.tables.lock().await;
        tables.networks.insert(network.id, network);
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_plan(
        &self,
        network_id: i32,
        name: &str,
        plan_code: &str,
        plan_type: &str,
        price: i64,
        nominal_amount: i64,
        validity: Option<&str>,
    ) -> DataPlan {
        let mut tables = self.tables.lock().await;
        tables.next_plan_id += 1;
        let plan = DataPlan {
            id: tables.next_plan_id,
            network_id,
            name: name.to_string(),
            plan_code: plan_code.to_string(),
            plan_type: plan_type.to_string(),
            price,
            nominal_amount,
            validity: validity.map(str::to_string),
            is_active: true,
        };
        tables.plans.insert(plan.id, plan.clone());
        plan
    }

    pub async fn set_plan_active(&self, plan_id: i32, active: bool) {
        let mut tables = self.tables.lock().await;
        if let Some(plan) = tables.plans.get_mut(&plan_id) {
            plan.is_active = active;
        }
    }

    pub async fn set_wallet_status(&self, user_id: &str, status: WalletStatus) {
        let mut tables = self.tables.lock().await;
        if let Some(wallet) = tables.wallets.get_mut(user_id) {
            wallet.status = status;
        }
    }

    pub async fn transactions_for(&self, user_id: &str) -> Vec<Transaction> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Transaction> = tables
            .transactions
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.tables.lock().await.faults.insert(fault);
    }

    pub async fn clear_fault(&self, fault: Fault) {
        self.tables.lock().await.faults.remove(&fault);
    }

    pub async fn refund_count(&self) -> usize {
        self.tables.lock().await.refunds.len()
    }

    pub async fn webhook_logs(&self) -> Vec<WebhookLog> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<WebhookLog> = tables.webhooks.values().cloned().collect();
        rows.sort_by_key(|w| w.created_at);
        rows
    }
}

#[async_trait]
impl WalletRepository for InMemoryLedgerStore {
    async fn ensure_wallet(&self, user_id: &str) -> Result<Wallet, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let wallet = tables
            .wallets
            .entry(user_id.to_string())
            .or_insert_with(|| Wallet {
                id: Uuid::new_v4(),
                user_id: user_id.to_string(),
                balance: 0,
                total_funded: 0,
                total_spent: 0,
                total_refunded: 0,
                last_funded_at: None,
                status: WalletStatus::Active,
                created_at: now,
                updated_at: now,
            });
        Ok(wallet.clone())
    }

    async fn find_wallet(&self, user_id: &str) -> Result<Option<Wallet>, DatabaseError> {
        Ok(self.tables.lock().await.wallets.get(user_id).cloned())
    }

    async fn debit(&self, user_id: &str, amount: i64) -> Result<DebitOutcome, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let Some(wallet) = tables.wallets.get_mut(user_id) else {
            return Ok(DebitOutcome::NotFound);
        };
        if wallet.status != WalletStatus::Active {
            return Ok(DebitOutcome::Inactive {
                status: wallet.status,
            });
        }
        if wallet.balance < amount {
            return Ok(DebitOutcome::InsufficientBalance {
                available: wallet.balance,
            });
        }
        wallet.balance -= amount;
        wallet.total_spent += amount;
        wallet.updated_at = Utc::now();
        Ok(DebitOutcome::Debited(wallet.clone()))
    }

    async fn credit(
        &self,
        user_id: &str,
        amount: i64,
        kind: CreditKind,
    ) -> Result<Wallet, DatabaseError> {
        self.tables.lock().await.credit(user_id, amount, kind)
    }

    async fn refund(
        &self,
        transaction: &Transaction,
        amount: i64,
        reason: &str,
    ) -> Result<RefundOutcome, DatabaseError> {
        self.tables
            .lock()
            .await
            .record_refund(transaction, amount, reason)
    }

    async fn find_refund(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<RefundRecord>, DatabaseError> {
        Ok(self.tables.lock().await.refunds.get(&transaction_id).cloned())
    }

    async fn fail_and_refund(
        &self,
        id: Uuid,
        transition: StatusTransition,
        reason: &str,
    ) -> Result<Option<FailedWithRefund>, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let Some(transaction) = tables.transitioned(id, transition)? else {
            return Ok(None);
        };
        let refund = tables.record_refund(&transaction, transaction.amount, reason)?;
        tables.transactions.insert(id, transaction.clone());
        Ok(Some(FailedWithRefund {
            transaction,
            refund,
        }))
    }

    async fn settle_funding(
        &self,
        transaction_id: Uuid,
    ) -> Result<FundingSettlement, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let current = tables
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or_else(|| DatabaseError::not_found("transaction", transaction_id))?;

        if current.status != TransactionStatus::Pending
            || current.transaction_type != TransactionType::Funding
        {
            return Ok(FundingSettlement::Unchanged(current));
        }

        let wallet = tables.credit(&current.user_id, current.amount, CreditKind::Funding)?;
        let transaction = match tables.transactions.get_mut(&transaction_id) {
            Some(row) => {
                row.status = TransactionStatus::Success;
                row.provider_status = ProviderStatus::Delivered;
                row.updated_at = Utc::now();
                row.clone()
            }
            None => return Err(DatabaseError::not_found("transaction", transaction_id)),
        };

        Ok(FundingSettlement::Credited {
            transaction,
            wallet,
        })
    }
}

#[async_trait]
impl TransactionRepository for InMemoryLedgerStore {
    async fn insert_transaction(&self, new: NewTransaction) -> Result<Transaction, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let now = Utc::now();
        let (platform_commission, agent_profit) = split_commission(new.amount, new.commission_bps);
        let row = Transaction {
            id: Uuid::new_v4(),
            reference: new.reference,
            idempotency_key: new.idempotency_key,
            user_id: new.user_id,
            transaction_type: new.transaction_type,
            payment_method: new.payment_method,
            amount: new.amount,
            nominal_amount: new.nominal_amount,
            platform_commission,
            agent_profit,
            commission_bps: new.commission_bps,
            status: TransactionStatus::Pending,
            provider_status: ProviderStatus::Pending,
            provider: new.provider,
            provider_reference: None,
            paystack_reference: new.paystack_reference,
            network_id: new.network_id,
            plan_id: new.plan_id,
            phone_number: new.phone_number,
            retry_of: new.retry_of,
            retry_count: new.retry_count,
            error_message: None,
            failure_kind: None,
            provider_response: None,
            created_at: now,
            updated_at: now,
        };

        if let Some(constraint) = tables.unique_clash(&row) {
            return Err(DatabaseError::unique_violation(constraint));
        }

        tables.transactions.insert(row.id, row.clone());
        Ok(row)
    }

    async fn find_transaction(&self, id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self.tables.lock().await.transactions.get(&id).cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.reference == reference)
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_by_paystack_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.paystack_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .transactions
            .values()
            .find(|t| t.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: StatusTransition,
    ) -> Result<Option<Transaction>, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let updated = tables.transitioned(id, transition)?;
        if let Some(row) = &updated {
            tables.transactions.insert(id, row.clone());
        }
        Ok(updated)
    }

    async fn find_open_retry(&self, root_id: Uuid) -> Result<Option<Transaction>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .transactions
            .values()
            .find(|t| t.retry_of == Some(root_id) && OPEN_RETRY_STATUSES.contains(&t.status))
            .cloned())
    }

    async fn increment_retry_count(
        &self,
        id: Uuid,
        max: i32,
    ) -> Result<Option<i32>, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let Some(row) = tables.transactions.get_mut(&id) else {
            return Ok(None);
        };
        if row.retry_count >= max {
            return Ok(None);
        }
        row.retry_count += 1;
        row.updated_at = Utc::now();
        Ok(Some(row.retry_count))
    }
}

#[async_trait]
impl CommissionRepository for InMemoryLedgerStore {
    async fn record_commission(
        &self,
        transaction_id: Uuid,
        amount: i64,
        percentage_bps: i32,
    ) -> Result<Option<CommissionLog>, DatabaseError> {
        let mut tables = self.tables.lock().await;
        if tables.commissions.contains_key(&transaction_id) {
            return Ok(None);
        }
        let now = Utc::now();
        let log = CommissionLog {
            id: Uuid::new_v4(),
            transaction_id,
            amount,
            percentage_bps,
            status: CommissionStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables.commissions.insert(transaction_id, log.clone());
        Ok(Some(log))
    }

    async fn reverse_commission(&self, transaction_id: Uuid) -> Result<bool, DatabaseError> {
        let mut tables = self.tables.lock().await;
        match tables.commissions.get_mut(&transaction_id) {
            Some(log) if log.status != CommissionStatus::Reversed => {
                log.status = CommissionStatus::Reversed;
                log.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_commission(
        &self,
        transaction_id: Uuid,
    ) -> Result<Option<CommissionLog>, DatabaseError> {
        Ok(self
            .tables
            .lock()
            .await
            .commissions
            .get(&transaction_id)
            .cloned())
    }
}

#[async_trait]
impl WebhookRepository for InMemoryLedgerStore {
    async fn log_webhook(&self, new: NewWebhookLog) -> Result<WebhookLog, DatabaseError> {
        let mut tables = self.tables.lock().await;
        tables.check_fault(Fault::WebhookLog)?;
        let now = Utc::now();
        let log = WebhookLog {
            id: Uuid::new_v4(),
            source: new.source,
            event: new.event,
            reference: new.reference,
            payload: new.payload,
            signature: new.signature,
            is_valid: new.is_valid,
            status: WebhookStatus::Received,
            transaction_id: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        tables.webhooks.insert(log.id, log.clone());
        Ok(log)
    }

    async fn mark_webhook(
        &self,
        id: Uuid,
        status: WebhookStatus,
        transaction_id: Option<Uuid>,
        error_message: Option<String>,
    ) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock().await;
        let log = tables
            .webhooks
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("webhook_log", id))?;
        log.status = status;
        if transaction_id.is_some() {
            log.transaction_id = transaction_id;
        }
        log.error_message = error_message;
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookLog>, DatabaseError> {
        Ok(self.tables.lock().await.webhooks.get(&id).cloned())
    }
}

#[async_trait]
impl CatalogRepository for InMemoryLedgerStore {
    async fn find_network(&self, id: i32) -> Result<Option<Network>, DatabaseError> {
        Ok(self.tables.lock().await.networks.get(&id).cloned())
    }

    async fn find_plan(&self, id: i32) -> Result<Option<DataPlan>, DatabaseError> {
        Ok(self.tables.lock().await.plans.get(&id).cloned())
    }

    async fn list_plans(&self, network_id: i32) -> Result<Vec<DataPlan>, DatabaseError> {
        let tables = self.tables.lock().await;
        let mut plans: Vec<DataPlan> = tables
            .plans
            .values()
            .filter(|p| p.network_id == network_id && p.is_active)
            .cloned()
            .collect();
        plans.sort_by_key(|p| (p.price, p.id));
        Ok(plans)
    }

    async fn upsert_plans(
        &self,
        network_id: i32,
        plans: &[ProviderPlan],
    ) -> Result<usize, DatabaseError> {
        let mut tables = self.tables.lock().await;
        let mut written = 0;
        for incoming in plans {
            let existing = tables
                .plans
                .values_mut()
                .find(|p| p.network_id == network_id && p.plan_code == incoming.plan_code);
            match existing {
                Some(plan) => {
                    plan.nominal_amount = incoming.nominal_amount;
                    plan.validity = incoming.validity.clone();
                }
                None => {
                    tables.next_plan_id += 1;
                    let id = tables.next_plan_id;
                    tables.plans.insert(
                        id,
                        DataPlan {
                            id,
                            network_id,
                            name: incoming.name.clone(),
                            plan_code: incoming.plan_code.clone(),
                            plan_type: incoming.plan_type.clone(),
                            price: incoming.nominal_amount,
                            nominal_amount: incoming.nominal_amount,
                            validity: incoming.validity.clone(),
                            is_active: true,
                        },
                    );
                }
            }
            written += 1;
        }
        Ok(written)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn ping(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
