//! Wallet funding through the card gateway

use crate::database::transaction_repository::{
    FailureKind, NewTransaction, PaymentMethod, ProviderStatus, StatusTransition, Transaction,
    TransactionStatus, TransactionType,
};
use crate::database::wallet_repository::{FundingSettlement, Wallet};
use crate::database::LedgerStore;
use crate::error::{AppError, AppResult, DomainError, ValidationError};
use crate::payments::types::{ChargeStatus, InitializeRequest};
use crate::payments::PaymentGateway;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct FundWalletRequest {
    pub email: String,
    /// Kobo
    pub amount: i64,
    pub callback_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingCheckout {
    pub transaction_id: Uuid,
    pub reference: String,
    pub amount: i64,
    pub authorization_url: String,
    pub access_code: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FundingStatus {
    pub transaction_id: Uuid,
    pub reference: String,
    pub status: TransactionStatus,
    pub amount: i64,
    /// True only for the call that credited the wallet
    pub credited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

impl FundingStatus {
    fn new(tx: &Transaction, wallet: Option<&Wallet>, credited: bool) -> Self {
        Self {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            status: tx.status,
            amount: tx.amount,
            credited,
            balance: wallet.map(|w| w.balance),
        }
    }
}

pub struct FundingService {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl FundingService {
    pub fn new(store: Arc<dyn LedgerStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Create the pending funding row, then open a hosted checkout for it.
    /// The row exists before the gateway is called so a webhook can always
    /// find it.
    pub async fn initialize_funding(
        &self,
        user_id: &str,
        request: FundWalletRequest,
    ) -> AppResult<FundingCheckout> {
        if request.amount <= 0 {
            return Err(AppError::validation(ValidationError::InvalidAmount {
                amount: request.amount.to_string(),
                reason: "must be greater than zero".to_string(),
            }));
        }
        if request.email.trim().is_empty() {
            return Err(AppError::validation(ValidationError::MissingField {
                field: "email".to_string(),
            }));
        }

        self.store.ensure_wallet(user_id).await?;
        let reference = Transaction::generate_reference();
        let tx = self
            .store
            .insert_transaction(funding_row(user_id, request.amount, &reference, &reference))
            .await?;

        let checkout = self
            .gateway
            .initialize_payment(InitializeRequest {
                email: request.email,
                amount: tx.amount,
                reference: reference.clone(),
                callback_url: request.callback_url,
                metadata: Some(serde_json::json!({
                    "transaction_id": tx.id,
                    "transaction_type": "funding",
                })),
            })
            .await;

        match checkout {
            Ok(checkout) => {
                info!(
                    transaction_id = %tx.id,
                    reference = %reference,
                    amount = tx.amount,
                    "Funding checkout initialized"
                );
                Ok(FundingCheckout {
                    transaction_id: tx.id,
                    reference,
                    amount: tx.amount,
                    authorization_url: checkout.authorization_url,
                    access_code: checkout.access_code,
                })
            }
            Err(e) => {
                error!(transaction_id = %tx.id, error = %e, "Funding initialization failed");
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

    /// Confirm a checkout with the gateway and credit the wallet once
    pub async fn verify_funding(&self, user_id: &str, reference: &str) -> AppResult<FundingStatus> {
        let tx = self
            .find_funding(reference)
            .await?
            .filter(|tx| tx.user_id == user_id)
            .ok_or_else(|| {
                AppError::domain(DomainError::TransactionNotFound {
                    transaction_id: reference.to_string(),
                })
            })?;
        self.confirm(tx).await
    }

    /// Credit the wallet for a gateway reference, creating the funding row
    /// when the checkout was started elsewhere.
    pub async fn fund_wallet(
        &self,
        user_id: &str,
        amount: i64,
        gateway_reference: &str,
    ) -> AppResult<FundingStatus> {
        let tx = match self.find_funding(gateway_reference).await? {
            Some(tx) if tx.user_id != user_id => {
                return Err(AppError::validation(ValidationError::InvalidField {
                    field: "reference".to_string(),
                    reason: "belongs to another user".to_string(),
                }))
            }
            Some(tx) => tx,
            None => {
                if amount <= 0 {
                    return Err(AppError::validation(ValidationError::InvalidAmount {
                        amount: amount.to_string(),
                        reason: "must be greater than zero".to_string(),
                    }));
                }
                self.store.ensure_wallet(user_id).await?;
                let row = funding_row(
                    user_id,
                    amount,
                    &Transaction::generate_reference(),
                    gateway_reference,
                );
                match self.store.insert_transaction(row).await {
                    Ok(tx) => tx,
                    // A concurrent call created it first
                    Err(e) if e.violates("paystack_reference") => self
                        .find_funding(gateway_reference)
                        .await?
                        .ok_or_else(|| AppError::internal("funding row vanished"))?,
                    Err(e) => return Err(e.into()),
                }
            }
        };
        self.confirm(tx).await
    }

    async fn find_funding(&self, reference: &str) -> AppResult<Option<Transaction>> {
        let tx = match self.store.find_by_paystack_reference(reference).await? {
            Some(tx) => Some(tx),
            None => self.store.find_by_reference(reference).await?,
        };
        Ok(tx.filter(|tx| tx.transaction_type == TransactionType::Funding))
    }

    async fn confirm(&self, tx: Transaction) -> AppResult<FundingStatus> {
        if tx.status != TransactionStatus::Pending {
            return Ok(FundingStatus::new(&tx, None, false));
        }

        let gateway_reference = tx.paystack_reference.clone().unwrap_or(tx.reference.clone());
        let verified = self.gateway.verify_payment(&gateway_reference).await?;

        match verified.status {
            ChargeStatus::Success if verified.amount != tx.amount => {
                error!(
                    transaction_id = %tx.id,
                    expected = tx.amount,
                    actual = verified.amount,
                    "Gateway amount does not match funding transaction"
                );
                self.fail(&tx, "Amount mismatch").await?;
                Err(AppError::domain(DomainError::AmountMismatch {
                    reference: gateway_reference,
                    expected: tx.amount,
                    actual: verified.amount,
                }))
            }
            ChargeStatus::Success => self.settle(tx.id).await,
            status if status.is_final_failure() => {
                let reason = verified
                    .gateway_response
                    .unwrap_or_else(|| format!("Payment {:?}", status).to_lowercase());
                let row = self.fail(&tx, &reason).await?;
                Ok(FundingStatus::new(&row, None, false))
            }
            _ => Ok(FundingStatus::new(&tx, None, false)),
        }
    }

    /// Compare-and-set settlement; a replay credits nothing
    pub async fn settle(&self, transaction_id: Uuid) -> AppResult<FundingStatus> {
        match self.store.settle_funding(transaction_id).await? {
            FundingSettlement::Credited {
                transaction,
                wallet,
            } => {
                info!(
                    transaction_id = %transaction.id,
                    amount = transaction.amount,
                    balance = wallet.balance,
                    "Wallet funded"
                );
                Ok(FundingStatus::new(&transaction, Some(&wallet), true))
            }
            FundingSettlement::Unchanged(transaction) => {
                info!(transaction_id = %transaction.id, status = %transaction.status, "Funding already settled");
                Ok(FundingStatus::new(&transaction, None, false))
            }
        }
    }

    async fn fail(&self, tx: &Transaction, reason: &str) -> AppResult<Transaction> {
        let written = self
            .store
            .transition(
                tx.id,
                StatusTransition::new(
                    TransactionStatus::Pending,
                    TransactionStatus::Failed,
                    ProviderStatus::Failed,
                )
                .with_error(reason)
                .with_failure(FailureKind::Payment),
            )
            .await?;
        match written {
            Some(row) => {
                warn!(transaction_id = %row.id, reason, "Funding failed");
                Ok(row)
            }
            None => Ok(self
                .store
                .find_transaction(tx.id)
                .await?
                .unwrap_or_else(|| tx.clone())),
        }
    }
}

fn funding_row(user_id: &str, amount: i64, reference: &str, gateway_reference: &str) -> NewTransaction {
    NewTransaction {
        reference: reference.to_string(),
        idempotency_key: None,
        user_id: user_id.to_string(),
        transaction_type: TransactionType::Funding,
        payment_method: PaymentMethod::Paystack,
        amount,
        nominal_amount: amount,
        commission_bps: 0,
        provider: None,
        paystack_reference: Some(gateway_reference.to_string()),
        network_id: None,
        plan_id: None,
        phone_number: None,
        retry_of: None,
        retry_count: 0,
    }
}
