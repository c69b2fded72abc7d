//! Purchase Orchestrator Service
//!
//! Runs a purchase end to end: idempotency gate, catalog lookup, pending
//! transaction, wallet debit (or hosted checkout), delivery through the
//! configured provider, and settlement. Settlement is shared with manual
//! retries and delivery webhooks through [`PurchaseOrchestrator::apply_delivery_status`].

use crate::config::PurchaseConfig;
use crate::database::catalog_repository::{DataPlan, Network};
use crate::database::transaction_repository::{
    FailureKind, NewTransaction, PaymentMethod, ProviderStatus, StatusTransition, Transaction,
    TransactionStatus, TransactionType,
};
use crate::database::wallet_repository::{DebitOutcome, FailedWithRefund, RefundOutcome};
use crate::database::LedgerStore;
use crate::delivery::phone::normalize_msisdn;
use crate::delivery::{
    DeliveryError, DeliveryExecutor, DeliveryKind, DeliveryProvider, DeliveryReport,
    DeliveryRequest, DeliveryResolution,
};
use crate::error::{AppError, AppResult, DomainError, ExternalError, ValidationError};
use crate::payments::types::InitializeRequest;
use crate::payments::PaymentGateway;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DataPurchaseRequest {
    pub plan_id: i32,
    pub phone: String,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    pub idempotency_key: Option<String>,
    /// Required for Paystack checkout
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirtimePurchaseRequest {
    pub network_id: i32,
    /// Kobo
    pub amount: i64,
    pub phone: String,
    #[serde(default = "default_payment_method")]
    pub payment_method: PaymentMethod,
    pub idempotency_key: Option<String>,
    pub email: Option<String>,
    pub callback_url: Option<String>,
}

fn default_payment_method() -> PaymentMethod {
    PaymentMethod::Wallet
}

/// Outcome handed back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct PurchaseReceipt {
    pub transaction_id: Uuid,
    pub reference: String,
    pub status: TransactionStatus,
    pub provider_status: ProviderStatus,
    pub amount: i64,
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PurchaseReceipt {
    pub fn from_transaction(tx: &Transaction, is_duplicate: bool) -> Self {
        Self {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            status: tx.status,
            provider_status: tx.provider_status,
            amount: tx.amount,
            is_duplicate,
            authorization_url: None,
            message: tx.error_message.clone(),
        }
    }

    /// Still waiting on delivery or payment
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending || self.provider_status == ProviderStatus::Pending
    }
}

/// A provider answer to settle against a transaction
#[derive(Debug, Clone)]
pub struct DeliveryUpdate {
    pub resolution: DeliveryResolution,
    pub provider_reference: Option<String>,
    pub message: Option<String>,
    pub raw: Option<JsonValue>,
    /// Why a failed resolution failed; defaults to a delivery failure
    pub failure_kind: Option<FailureKind>,
}

impl From<DeliveryReport> for DeliveryUpdate {
    fn from(report: DeliveryReport) -> Self {
        Self {
            resolution: report.resolution,
            provider_reference: report.provider_reference,
            message: report.message,
            raw: report.raw,
            failure_kind: None,
        }
    }
}

/// Catalog item resolved to what gets charged and delivered
struct ResolvedItem {
    transaction_type: TransactionType,
    network: Network,
    plan: Option<DataPlan>,
    amount: i64,
    nominal_amount: i64,
}

struct PurchaseIntent {
    user_id: String,
    phone: String,
    payment_method: PaymentMethod,
    idempotency_key: Option<String>,
    email: Option<String>,
    callback_url: Option<String>,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct PurchaseOrchestrator {
    store: Arc<dyn LedgerStore>,
    delivery: Arc<dyn DeliveryProvider>,
    gateway: Arc<dyn PaymentGateway>,
    config: PurchaseConfig,
}

impl PurchaseOrchestrator {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        delivery: Arc<dyn DeliveryProvider>,
        gateway: Arc<dyn PaymentGateway>,
        config: PurchaseConfig,
    ) -> Self {
        Self {
            store,
            delivery,
            gateway,
            config,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.delivery.name()
    }

    pub async fn purchase_data(
        &self,
        user_id: &str,
        request: DataPurchaseRequest,
    ) -> AppResult<PurchaseReceipt> {
        let intent = PurchaseIntent {
            user_id: user_id.to_string(),
            phone: request.phone,
            payment_method: request.payment_method,
            idempotency_key: request.idempotency_key,
            email: request.email,
            callback_url: request.callback_url,
        };
        if let Some(existing) = self.find_duplicate(&intent).await? {
            return Ok(existing);
        }

        let item = self.resolve_plan(request.plan_id).await?;
        self.purchase(intent, item).await
    }

    pub async fn purchase_airtime(
        &self,
        user_id: &str,
        request: AirtimePurchaseRequest,
    ) -> AppResult<PurchaseReceipt> {
        let intent = PurchaseIntent {
            user_id: user_id.to_string(),
            phone: request.phone,
            payment_method: request.payment_method,
            idempotency_key: request.idempotency_key,
            email: request.email,
            callback_url: request.callback_url,
        };
        if let Some(existing) = self.find_duplicate(&intent).await? {
            return Ok(existing);
        }

        let item = self.resolve_airtime(request.network_id, request.amount).await?;
        self.purchase(intent, item).await
    }

    pub async fn get_transaction(&self, user_id: &str, id: Uuid) -> AppResult<Transaction> {
        match self.store.find_transaction(id).await? {
            Some(tx) if tx.user_id == user_id => Ok(tx),
            _ => Err(AppError::domain(DomainError::TransactionNotFound {
                transaction_id: id.to_string(),
            })),
        }
    }

    // =========================================================================
    // Purchase flow
    // =========================================================================

    async fn find_duplicate(&self, intent: &PurchaseIntent) -> AppResult<Option<PurchaseReceipt>> {
        let Some(key) = intent.idempotency_key.as_deref() else {
            return Ok(None);
        };
        if key.trim().is_empty() {
            return Err(AppError::validation(ValidationError::InvalidField {
                field: "idempotency_key".to_string(),
                reason: "must not be blank".to_string(),
            }));
        }

        match self.store.find_by_idempotency_key(key).await? {
            Some(existing) => self.duplicate_receipt(existing, &intent.user_id).map(Some),
            None => Ok(None),
        }
    }

    fn duplicate_receipt(&self, existing: Transaction, user_id: &str) -> AppResult<PurchaseReceipt> {
        if existing.user_id != user_id {
            return Err(AppError::validation(ValidationError::InvalidField {
                field: "idempotency_key".to_string(),
                reason: "already used by another request".to_string(),
            }));
        }
        info!(
            transaction_id = %existing.id,
            reference = %existing.reference,
            "Idempotent replay, returning existing transaction"
        );
        Ok(PurchaseReceipt::from_transaction(&existing, true))
    }

    async fn resolve_plan(&self, plan_id: i32) -> AppResult<ResolvedItem> {
        let plan = self
            .store
            .find_plan(plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| unknown_item("plan", plan_id))?;
        let network = self.active_network(plan.network_id).await?;

        Ok(ResolvedItem {
            transaction_type: TransactionType::DataPurchase,
            amount: plan.price,
            nominal_amount: plan.nominal_amount,
            network,
            plan: Some(plan),
        })
    }

    async fn resolve_airtime(&self, network_id: i32, amount: i64) -> AppResult<ResolvedItem> {
        if amount < self.config.min_airtime_kobo || amount > self.config.max_airtime_kobo {
            return Err(AppError::validation(ValidationError::OutOfRange {
                field: "amount".to_string(),
                min: Some(crate::error::format_naira(self.config.min_airtime_kobo)),
                max: Some(crate::error::format_naira(self.config.max_airtime_kobo)),
            }));
        }
        let network = self.active_network(network_id).await?;

        Ok(ResolvedItem {
            transaction_type: TransactionType::AirtimePurchase,
            network,
            plan: None,
            amount,
            nominal_amount: amount,
        })
    }

    async fn active_network(&self, network_id: i32) -> AppResult<Network> {
        self.store
            .find_network(network_id)
            .await?
            .filter(|n| n.is_active)
            .ok_or_else(|| unknown_item("network", network_id))
    }

    async fn purchase(&self, intent: PurchaseIntent, item: ResolvedItem) -> AppResult<PurchaseReceipt> {
        let phone = normalize_msisdn(&intent.phone).ok_or_else(|| {
            AppError::validation(ValidationError::InvalidPhoneNumber {
                phone: intent.phone.clone(),
            })
        })?;
        let email = match intent.payment_method {
            PaymentMethod::Paystack => Some(
                intent
                    .email
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .ok_or_else(|| {
                        AppError::validation(ValidationError::MissingField {
                            field: "email".to_string(),
                        })
                    })?,
            ),
            PaymentMethod::Wallet => None,
        };

        let reference = Transaction::generate_reference();
        let new = NewTransaction {
            reference: reference.clone(),
            idempotency_key: intent.idempotency_key.clone(),
            user_id: intent.user_id.clone(),
            transaction_type: item.transaction_type,
            payment_method: intent.payment_method,
            amount: item.amount,
            nominal_amount: item.nominal_amount,
            commission_bps: item.network.commission_bps,
            provider: Some(self.delivery.name().to_string()),
            paystack_reference: email.as_ref().map(|_| reference.clone()),
            network_id: Some(item.network.id),
            plan_id: item.plan.as_ref().map(|p| p.id),
            phone_number: Some(phone),
            retry_of: None,
            retry_count: 0,
        };

        let tx = match self.store.insert_transaction(new).await {
            Ok(tx) => tx,
            Err(e) if e.violates("idempotency_key") => {
                // Lost the race to a concurrent request with the same key
                let key = intent.idempotency_key.as_deref().unwrap_or_default();
                let winner = self.store.find_by_idempotency_key(key).await?.ok_or_else(|| {
                    AppError::internal("idempotency winner vanished after unique violation")
                })?;
                return self.duplicate_receipt(winner, &intent.user_id);
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            user_id = %tx.user_id,
            amount = tx.amount,
            payment_method = tx.payment_method.as_str(),
            "Purchase created"
        );

        match (intent.payment_method, email) {
            (PaymentMethod::Paystack, Some(email)) => {
                self.start_checkout(tx, email, intent.callback_url).await
            }
            _ => self.debit_and_deliver(tx).await,
        }
    }

    async fn start_checkout(
        &self,
        tx: Transaction,
        email: String,
        callback_url: Option<String>,
    ) -> AppResult<PurchaseReceipt> {
        let request = InitializeRequest {
            email,
            amount: tx.amount,
            reference: tx.reference.clone(),
            callback_url,
            metadata: Some(serde_json::json!({
                "transaction_id": tx.id,
                "transaction_type": tx.transaction_type.as_str(),
            })),
        };

        match self.gateway.initialize_payment(request).await {
            Ok(checkout) => {
                info!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    "Awaiting checkout payment"
                );
                let mut receipt = PurchaseReceipt::from_transaction(&tx, false);
                receipt.authorization_url = Some(checkout.authorization_url);
                Ok(receipt)
            }
            Err(e) => {
                warn!(transaction_id = %tx.id, error = %e, "Checkout initialization failed");
                self.store
                    .transition(
                        tx.id,
                        StatusTransition::new(
                            TransactionStatus::Pending,
                            TransactionStatus::Failed,
                            ProviderStatus::Pending,
                        )
                        .with_error(format!("Payment initialization failed: {}", e))
                        .with_failure(FailureKind::Payment),
                    )
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn debit_and_deliver(&self, tx: Transaction) -> AppResult<PurchaseReceipt> {
        let refusal = match self.store.debit(&tx.user_id, tx.amount).await? {
            DebitOutcome::Debited(wallet) => {
                info!(
                    transaction_id = %tx.id,
                    balance = wallet.balance,
                    "Wallet debited"
                );
                None
            }
            DebitOutcome::InsufficientBalance { available } => {
                Some(AppError::domain(DomainError::InsufficientBalance {
                    available,
                    required: tx.amount,
                }))
            }
            DebitOutcome::Inactive { status } => Some(AppError::domain(DomainError::WalletInactive {
                user_id: tx.user_id.clone(),
                status: status.as_str().to_string(),
            })),
            DebitOutcome::NotFound => Some(AppError::domain(DomainError::WalletNotFound {
                user_id: tx.user_id.clone(),
            })),
        };

        if let Some(err) = refusal {
            warn!(transaction_id = %tx.id, reason = %err, "Debit refused");
            self.store
                .transition(
                    tx.id,
                    StatusTransition::new(
                        TransactionStatus::Pending,
                        TransactionStatus::Failed,
                        ProviderStatus::Pending,
                    )
                    .with_error(err.user_message())
                    .with_failure(FailureKind::Debit),
                )
                .await?;
            return Err(err);
        }

        self.deliver(tx).await
    }

    /// Deliver a purchase that has been paid for, by wallet debit or by a
    /// confirmed checkout, and settle the outcome.
    pub async fn deliver(&self, tx: Transaction) -> AppResult<PurchaseReceipt> {
        let request = self.delivery_request(&tx).await?;

        match DeliveryExecutor::execute(self.delivery.as_ref(), &request).await {
            Ok(report) => {
                let settled = self.apply_delivery_status(&tx, report.into()).await?;
                self.receipt_for(settled).await
            }
            Err(DeliveryError::Duplicate {
                provider,
                request_id,
            }) => {
                warn!(
                    transaction_id = %tx.id,
                    reference = %tx.reference,
                    "Provider reports duplicate request, parking for reconciliation"
                );
                if tx.status == TransactionStatus::Pending {
                    self.store
                        .transition(
                            tx.id,
                            StatusTransition::new(
                                TransactionStatus::Pending,
                                TransactionStatus::Pending,
                                ProviderStatus::Retry,
                            )
                            .when_provider(ProviderStatus::Pending)
                            .with_error("Duplicate request reported by provider"),
                        )
                        .await?;
                }
                Err(AppError::external(ExternalError::DuplicateRequest {
                    provider,
                    reference: request_id,
                }))
            }
            Err(e) => {
                error!(
                    transaction_id = %tx.id,
                    error = %e,
                    "Provider refused the request, refunding"
                );
                let failure_kind = match e {
                    DeliveryError::Auth { .. } => FailureKind::ProviderAuth,
                    _ => FailureKind::Delivery,
                };
                let update = DeliveryUpdate {
                    resolution: DeliveryResolution::Failed,
                    provider_reference: None,
                    message: Some(e.to_string()),
                    raw: None,
                    failure_kind: Some(failure_kind),
                };
                self.apply_delivery_status(&tx, update).await?;
                Err(e.into())
            }
        }
    }

    async fn receipt_for(&self, tx: Transaction) -> AppResult<PurchaseReceipt> {
        if matches!(
            tx.status,
            TransactionStatus::Failed | TransactionStatus::Refunded
        ) {
            let refunded = self.store.find_refund(tx.id).await?.is_some();
            return Err(AppError::external(ExternalError::DeliveryFailed {
                provider: self.delivery.name().to_string(),
                message: tx
                    .error_message
                    .clone()
                    .map(|m| m.trim_end_matches(" (Refunded)").to_string())
                    .unwrap_or_else(|| "delivery failed".to_string()),
                refunded,
            })
            .with_context(tx.reference));
        }
        Ok(PurchaseReceipt::from_transaction(&tx, false))
    }

    async fn delivery_request(&self, tx: &Transaction) -> AppResult<DeliveryRequest> {
        let network_id = tx
            .network_id
            .ok_or_else(|| AppError::internal(format!("transaction {} has no network", tx.id)))?;
        let network = self
            .store
            .find_network(network_id)
            .await?
            .ok_or_else(|| unknown_item("network", network_id))?;

        let (kind, service_id, plan_code) = match tx.transaction_type {
            TransactionType::DataPurchase => {
                let plan_id = tx
                    .plan_id
                    .ok_or_else(|| AppError::internal(format!("transaction {} has no plan", tx.id)))?;
                let plan = self
                    .store
                    .find_plan(plan_id)
                    .await?
                    .ok_or_else(|| unknown_item("plan", plan_id))?;
                (
                    DeliveryKind::Data,
                    network.data_service_id.clone(),
                    Some(plan.plan_code),
                )
            }
            TransactionType::AirtimePurchase => (
                DeliveryKind::Airtime,
                network.airtime_service_id.clone(),
                None,
            ),
            TransactionType::Funding => {
                return Err(AppError::internal("funding transactions are not delivered"))
            }
        };

        Ok(DeliveryRequest {
            request_id: tx.reference.clone(),
            kind,
            service_id,
            plan_code,
            phone: tx.phone_number.clone().unwrap_or_default(),
            amount: tx.nominal_amount,
            network_code: network.code,
            legacy_network_id: network.legacy_network_id,
        })
    }

    // =========================================================================
    // Settlement
    // =========================================================================

    /// Settle a provider answer against a transaction.
    ///
    /// Every write is a compare-and-set, so replaying the same answer or
    /// racing a webhook against the synchronous path changes nothing the
    /// second time. Returns the transaction as it stands afterwards.
    pub async fn apply_delivery_status(
        &self,
        tx: &Transaction,
        update: DeliveryUpdate,
    ) -> AppResult<Transaction> {
        use ProviderStatus as P;
        use TransactionStatus as S;

        // An unpaid checkout purchase has nothing to settle yet
        if tx.payment_method == PaymentMethod::Paystack && tx.status == S::Pending {
            warn!(
                transaction_id = %tx.id,
                resolution = ?update.resolution,
                "Delivery update for unpaid checkout purchase ignored"
            );
            return Ok(tx.clone());
        }

        let written = match (update.resolution, tx.status, tx.provider_status) {
            (DeliveryResolution::Delivered, S::Pending, _) => {
                let won = self
                    .store
                    .transition(
                        tx.id,
                        StatusTransition::new(S::Pending, S::Success, P::Delivered)
                            .with_provider_reference(update.provider_reference)
                            .with_response(update.raw),
                    )
                    .await?;
                if let Some(row) = &won {
                    self.record_commission(row).await?;
                    info!(transaction_id = %row.id, reference = %row.reference, "Purchase delivered");
                }
                won
            }
            (DeliveryResolution::Delivered, S::Success, P::Pending) => {
                let won = self
                    .store
                    .transition(
                        tx.id,
                        StatusTransition::new(S::Success, S::Success, P::Delivered)
                            .when_provider(P::Pending)
                            .with_provider_reference(update.provider_reference)
                            .with_response(update.raw),
                    )
                    .await?;
                if let Some(row) = &won {
                    // Checkout purchases reach success before delivery
                    self.record_commission(row).await?;
                    info!(transaction_id = %row.id, "Delivery confirmed");
                }
                won
            }
            (DeliveryResolution::Pending, S::Pending, _) => {
                let won = self
                    .store
                    .transition(
                        tx.id,
                        StatusTransition::new(S::Pending, S::Success, P::Pending)
                            .with_provider_reference(update.provider_reference)
                            .with_response(update.raw),
                    )
                    .await?;
                if let Some(row) = &won {
                    self.record_commission(row).await?;
                    info!(
                        transaction_id = %row.id,
                        "Delivery unconfirmed, awaiting provider callback"
                    );
                }
                won
            }
            (DeliveryResolution::Failed, S::Pending, _) => {
                let message = failure_message(update.message.as_deref());
                let failed = self
                    .store
                    .fail_and_refund(
                        tx.id,
                        StatusTransition::new(S::Pending, S::Failed, P::Failed)
                            .with_provider_reference(update.provider_reference)
                            .with_error(format!("{} (Refunded)", message))
                            .with_failure(update.failure_kind.unwrap_or(FailureKind::Delivery))
                            .with_response(update.raw),
                        &message,
                    )
                    .await?;
                failed.map(log_refund)
            }
            (DeliveryResolution::Failed, S::Success, P::Pending) => {
                let message = failure_message(update.message.as_deref());
                let failed = self
                    .store
                    .fail_and_refund(
                        tx.id,
                        StatusTransition::new(S::Success, S::Refunded, P::Failed)
                            .when_provider(P::Pending)
                            .with_provider_reference(update.provider_reference)
                            .with_error(format!("{} (Refunded)", message))
                            .with_failure(update.failure_kind.unwrap_or(FailureKind::Delivery))
                            .with_response(update.raw),
                        &message,
                    )
                    .await?;
                let won = failed.map(log_refund);
                if let Some(row) = &won {
                    if self.store.reverse_commission(row.id).await? {
                        info!(transaction_id = %row.id, "Commission reversed");
                    }
                }
                won
            }
            (resolution, status, provider_status) => {
                if resolution == DeliveryResolution::Failed && provider_status == P::Delivered {
                    warn!(
                        transaction_id = %tx.id,
                        "Failure reported for a delivered transaction, ignoring"
                    );
                }
                debug!(
                    transaction_id = %tx.id,
                    resolution = ?resolution,
                    status = %status,
                    provider_status = %provider_status,
                    "Delivery update already applied"
                );
                None
            }
        };

        match written {
            Some(row) => Ok(row),
            // Lost a race or nothing to do; report the current row
            None => self
                .store
                .find_transaction(tx.id)
                .await?
                .ok_or_else(|| {
                    AppError::domain(DomainError::TransactionNotFound {
                        transaction_id: tx.id.to_string(),
                    })
                }),
        }
    }

    async fn record_commission(&self, tx: &Transaction) -> AppResult<()> {
        if self
            .store
            .record_commission(tx.id, tx.platform_commission, tx.commission_bps)
            .await?
            .is_some()
        {
            info!(
                transaction_id = %tx.id,
                commission = tx.platform_commission,
                "Commission recorded"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Manual retry
    // =========================================================================

    /// Retry a purchase on the user's request.
    ///
    /// A parked transaction is requeried and settled. A failed purchase is
    /// re-attempted as a fresh transaction linked to the original through
    /// `retry_of`, debiting the wallet again. Either way the attempt counts
    /// against the original's `retry_count`.
    pub async fn retry_transaction(&self, user_id: &str, id: Uuid) -> AppResult<PurchaseReceipt> {
        let tx = self.get_transaction(user_id, id).await?;
        let not_retryable = |reason: &str| {
            AppError::domain(DomainError::NotRetryable {
                transaction_id: id.to_string(),
                reason: reason.to_string(),
            })
        };

        if !tx.transaction_type.is_purchase() {
            return Err(not_retryable("funding transactions cannot be retried"));
        }
        if tx.payment_method == PaymentMethod::Paystack && tx.status == TransactionStatus::Pending
        {
            return Err(not_retryable("awaiting checkout payment"));
        }

        if tx.is_awaiting_delivery() {
            self.claim_retry(tx.id, id).await?;
            info!(transaction_id = %tx.id, "Manual requery");
            let report = DeliveryExecutor::requery_once(self.delivery.as_ref(), &tx.reference).await;
            let settled = self.apply_delivery_status(&tx, report.into()).await?;
            return self.receipt_for(settled).await;
        }

        if tx.status != TransactionStatus::Failed {
            return Err(not_retryable(&format!("transaction is {}", tx.status)));
        }
        if tx.failure_kind == Some(FailureKind::ProviderAuth) {
            return Err(not_retryable("provider rejected our credentials"));
        }

        let root_id = tx.retry_of.unwrap_or(tx.id);
        if let Some(open) = self.store.find_open_retry(root_id).await? {
            warn!(transaction_id = %tx.id, open_retry = %open.id, "Retry already open");
            return Err(not_retryable("a retry is already in progress or delivered"));
        }
        let attempt = self.claim_retry(root_id, id).await?;

        let new = NewTransaction {
            reference: Transaction::generate_reference(),
            idempotency_key: None,
            user_id: tx.user_id.clone(),
            transaction_type: tx.transaction_type,
            payment_method: PaymentMethod::Wallet,
            amount: tx.amount,
            nominal_amount: tx.nominal_amount,
            commission_bps: tx.commission_bps,
            provider: Some(self.delivery.name().to_string()),
            paystack_reference: None,
            network_id: tx.network_id,
            plan_id: tx.plan_id,
            phone_number: tx.phone_number.clone(),
            retry_of: Some(root_id),
            retry_count: attempt,
        };
        // The store admits one open retry per root; a concurrent caller loses here
        let retry = match self.store.insert_transaction(new).await {
            Ok(retry) => retry,
            Err(e) if e.violates("open_retry") => {
                return Err(not_retryable("a retry is already in progress or delivered"))
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            transaction_id = %retry.id,
            retry_of = %root_id,
            attempt,
            "Retrying failed purchase"
        );

        self.debit_and_deliver(retry).await
    }

    async fn claim_retry(&self, counter_id: Uuid, requested: Uuid) -> AppResult<i32> {
        let max = i32::try_from(self.config.max_retries).unwrap_or(i32::MAX);
        self.store
            .increment_retry_count(counter_id, max)
            .await?
            .ok_or_else(|| {
                AppError::domain(DomainError::MaxRetriesExceeded {
                    transaction_id: requested.to_string(),
                    max_retries: self.config.max_retries,
                })
            })
    }
}

fn unknown_item(item: &str, id: i32) -> AppError {
    AppError::validation(ValidationError::UnknownItem {
        item: item.to_string(),
        id: id.to_string(),
    })
}

fn log_refund(failed: FailedWithRefund) -> Transaction {
    let tx = failed.transaction;
    match failed.refund {
        RefundOutcome::Refunded(wallet) => info!(
            transaction_id = %tx.id,
            amount = tx.amount,
            balance = wallet.balance,
            "Wallet refunded"
        ),
        RefundOutcome::AlreadyRefunded => {
            warn!(transaction_id = %tx.id, "Refund already recorded")
        }
    }
    tx
}

fn failure_message(message: Option<&str>) -> String {
    match message.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_string(),
        _ => "Delivery failed".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeliveryConfig, PaystackSettings};
    use crate::database::transaction_repository::TransactionRepository;
    use crate::database::wallet_repository::WalletRepository;
    use crate::database::InMemoryLedgerStore;
    use crate::delivery::DeliveryProviderFactory;
    use crate::payments::PaystackGateway;

    fn orchestrator(store: Arc<InMemoryLedgerStore>) -> PurchaseOrchestrator {
        let delivery = DeliveryProviderFactory::new(DeliveryConfig {
            provider: "vtpass".to_string(),
            legacy_base_url: "http://127.0.0.1:9".to_string(),
            legacy_api_token: "token".to_string(),
            vtpass_base_url: "http://127.0.0.1:9".to_string(),
            vtpass_api_key: "key".to_string(),
            vtpass_secret_key: "secret".to_string(),
            vtpass_public_key: "public".to_string(),
            timeout_secs: 1,
            webhook_secret: None,
        })
        .get_default_provider()
        .unwrap();
        let gateway = PaystackGateway::new(PaystackSettings {
            secret_key: "sk_test".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            webhook_secret: None,
            callback_url: None,
            timeout_secs: 1,
            max_retries: 0,
        })
        .unwrap();
        PurchaseOrchestrator::new(store, delivery, Arc::new(gateway), PurchaseConfig::default())
    }

    #[tokio::test]
    async fn failure_receipt_reports_refund_from_the_ledger() {
        let store = Arc::new(InMemoryLedgerStore::with_default_catalog().await);
        store.ensure_wallet("u1").await.unwrap();
        let orchestrator = orchestrator(store.clone());
        let tx = store
            .insert_transaction(NewTransaction {
                reference: Transaction::generate_reference(),
                idempotency_key: None,
                user_id: "u1".to_string(),
                transaction_type: TransactionType::DataPurchase,
                payment_method: PaymentMethod::Wallet,
                amount: 25_000,
                nominal_amount: 24_000,
                commission_bps: 1_000,
                provider: Some("vtpass".to_string()),
                paystack_reference: None,
                network_id: Some(1),
                plan_id: Some(1),
                phone_number: Some("08031234567".to_string()),
                retry_of: None,
                retry_count: 0,
            })
            .await
            .unwrap();
        let failed = store
            .transition(
                tx.id,
                StatusTransition::new(
                    TransactionStatus::Pending,
                    TransactionStatus::Failed,
                    ProviderStatus::Failed,
                )
                .with_error("Invalid plan"),
            )
            .await
            .unwrap()
            .unwrap();

        let err = orchestrator.receipt_for(failed.clone()).await.unwrap_err();
        assert_eq!(err.user_message(), "Purchase failed: Invalid plan");

        store.refund(&failed, failed.amount, "Invalid plan").await.unwrap();
        let err = orchestrator.receipt_for(failed).await.unwrap_err();
        assert_eq!(err.user_message(), "Purchase failed: Invalid plan (Refunded)");
    }

    #[test]
    fn failure_message_falls_back() {
        assert_eq!(failure_message(None), "Delivery failed");
        assert_eq!(failure_message(Some("  ")), "Delivery failed");
        assert_eq!(failure_message(Some("Invalid plan")), "Invalid plan");
    }

    #[test]
    fn purchase_request_defaults_to_wallet() {
        let request: DataPurchaseRequest =
            serde_json::from_str(r#"{"plan_id": 1, "phone": "08031234567"}"#).unwrap();
        assert_eq!(request.payment_method, PaymentMethod::Wallet);
        assert!(request.idempotency_key.is_none());
    }
}
