use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::transaction_repository::{
    FailureKind, ProviderStatus, StatusTransition, Transaction, TransactionStatus,
    TransactionType,
};
use crate::database::webhook_repository::{NewWebhookLog, WebhookSource, WebhookStatus};
use crate::database::LedgerStore;
use crate::delivery::classification::{map_webhook_status, WebhookDeliveryStatus};
use crate::delivery::DeliveryResolution;
use crate::error::{AppError, ExternalError};
use crate::payments::types::WebhookEventKind;
use crate::payments::utils::secure_eq;
use crate::payments::PaymentGateway;
use crate::services::funding::FundingService;
use crate::services::purchase_orchestrator::{DeliveryUpdate, PurchaseOrchestrator};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("Invalid signature")]
    InvalidSignature { origin: WebhookSource },
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
    #[error("Processing error: {0}")]
    Processing(String),
}

impl From<AppError> for WebhookError {
    fn from(err: AppError) -> Self {
        WebhookError::Processing(err.to_string())
    }
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::InvalidSignature { origin } => {
                AppError::external(ExternalError::InvalidSignature {
                    source: origin.as_str().to_string(),
                })
            }
            WebhookError::Database(e) => e.into(),
            WebhookError::Processing(message) => AppError::internal(message),
        }
    }
}

/// What a webhook did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum WebhookOutcome {
    Processed { transaction_id: Uuid },
    /// Matched a transaction that had already moved on
    AlreadyApplied { transaction_id: Uuid },
    /// No transaction carries the reference
    Unmatched,
    Ignored { reason: String },
}

/// Delivery callback fields, read from either the top level or `data`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryCallback {
    pub request_id: Option<String>,
    pub provider_reference: Option<String>,
    pub status: Option<String>,
    pub message: Option<String>,
}

impl DeliveryCallback {
    pub fn parse(payload: &JsonValue) -> Self {
        let scopes: Vec<&JsonValue> = [Some(payload), payload.get("data")]
            .into_iter()
            .flatten()
            .collect();
        let find = |keys: &[&str]| -> Option<String> {
            scopes.iter().find_map(|scope| {
                keys.iter().find_map(|key| {
                    let value = scope
                        .get(*key)
                        .or_else(|| scope.pointer(&format!("/content/transactions/{}", key)))?;
                    match value {
                        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                        JsonValue::Number(n) => Some(n.to_string()),
                        _ => None,
                    }
                })
            })
        };

        Self {
            request_id: find(&["requestId", "request_id", "reference"]),
            provider_reference: find(&["transactionId", "transaction_id", "id"]),
            status: find(&["status", "Status"]),
            message: find(&["response_description", "api_response", "message"]),
        }
    }
}

pub struct WebhookReconciler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    orchestrator: Arc<PurchaseOrchestrator>,
    funding: Arc<FundingService>,
    delivery_secret: Option<String>,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        orchestrator: Arc<PurchaseOrchestrator>,
        funding: Arc<FundingService>,
        delivery_secret: Option<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            orchestrator,
            funding,
            delivery_secret,
        }
    }

    // =========================================================================
    // Payment gateway
    // =========================================================================

    pub async fn handle_payment_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let signature = signature.unwrap_or_default();
        let valid = self
            .gateway
            .verify_webhook(raw_body, signature)
            .map(|v| v.valid)
            .unwrap_or(false);

        let payload = payload_json(raw_body);
        let event = payload.get("event").and_then(|v| v.as_str()).map(str::to_string);
        let reference = payload
            .pointer("/data/reference")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let log_id = self
            .audit(NewWebhookLog {
                source: WebhookSource::Paystack,
                event,
                reference,
                payload,
                signature: Some(signature.to_string()).filter(|s| !s.is_empty()),
                is_valid: valid,
            })
            .await;

        if !valid {
            warn!(webhook_id = ?log_id, "Rejected gateway webhook with invalid signature");
            self.mark(
                log_id,
                WebhookStatus::Failed,
                None,
                Some("invalid signature".to_string()),
            )
            .await;
            return Err(WebhookError::InvalidSignature {
                origin: WebhookSource::Paystack,
            });
        }

        let result = self.apply_payment_event(raw_body).await;
        self.finish(log_id, result).await
    }

    async fn apply_payment_event(&self, raw_body: &[u8]) -> Result<WebhookOutcome, WebhookError> {
        let event = match self.gateway.parse_webhook_event(raw_body) {
            Ok(event) => event,
            Err(e) => {
                return Ok(WebhookOutcome::Ignored {
                    reason: e.to_string(),
                })
            }
        };
        let Some(reference) = event.reference.as_deref() else {
            return Ok(WebhookOutcome::Ignored {
                reason: "event carries no reference".to_string(),
            });
        };
        if event.kind == WebhookEventKind::Other {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unhandled event {}", event.event_type),
            });
        }

        let tx = match self.store.find_by_paystack_reference(reference).await? {
            Some(tx) => tx,
            None => match self.store.find_by_reference(reference).await? {
                Some(tx) => tx,
                None => {
                    warn!(reference, event = %event.event_type, "Gateway webhook for unknown reference");
                    return Ok(WebhookOutcome::Unmatched);
                }
            },
        };

        match event.kind {
            WebhookEventKind::ChargeSuccess => {
                if let Some(amount) = event.amount.filter(|a| *a != tx.amount) {
                    error!(
                        transaction_id = %tx.id,
                        expected = tx.amount,
                        actual = amount,
                        "Charge amount does not match transaction"
                    );
                    return Ok(WebhookOutcome::Ignored {
                        reason: format!("amount mismatch: expected {}, got {}", tx.amount, amount),
                    });
                }
                if tx.transaction_type == TransactionType::Funding {
                    let status = self.funding.settle(tx.id).await?;
                    Ok(if status.credited {
                        WebhookOutcome::Processed {
                            transaction_id: tx.id,
                        }
                    } else {
                        WebhookOutcome::AlreadyApplied {
                            transaction_id: tx.id,
                        }
                    })
                } else {
                    self.settle_paid_purchase(tx).await
                }
            }
            WebhookEventKind::ChargeFailed => {
                let reason = event
                    .gateway_response
                    .unwrap_or_else(|| "Payment failed".to_string());
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
                Ok(match written {
                    Some(row) => {
                        info!(transaction_id = %row.id, "Charge failed, transaction closed");
                        WebhookOutcome::Processed {
                            transaction_id: row.id,
                        }
                    }
                    None => WebhookOutcome::AlreadyApplied {
                        transaction_id: tx.id,
                    },
                })
            }
            WebhookEventKind::Other => Ok(WebhookOutcome::Ignored {
                reason: format!("unhandled event {}", event.event_type),
            }),
        }
    }

    /// Paid checkout purchase: mark charged, record commission, then deliver
    async fn settle_paid_purchase(&self, tx: Transaction) -> Result<WebhookOutcome, WebhookError> {
        let paid = self
            .store
            .transition(
                tx.id,
                StatusTransition::new(
                    TransactionStatus::Pending,
                    TransactionStatus::Success,
                    ProviderStatus::Pending,
                )
                .when_provider(ProviderStatus::Pending),
            )
            .await?;

        let Some(paid) = paid else {
            return Ok(WebhookOutcome::AlreadyApplied {
                transaction_id: tx.id,
            });
        };

        self.store
            .record_commission(paid.id, paid.platform_commission, paid.commission_bps)
            .await?;
        info!(transaction_id = %paid.id, reference = %paid.reference, "Checkout paid, dispatching delivery");

        // Delivery trouble is settled on the transaction; the webhook itself succeeded
        if let Err(e) = self.orchestrator.deliver(paid.clone()).await {
            warn!(transaction_id = %paid.id, error = %e, "Delivery after checkout did not complete");
        }

        Ok(WebhookOutcome::Processed {
            transaction_id: paid.id,
        })
    }

    // =========================================================================
    // Delivery provider
    // =========================================================================

    pub async fn handle_delivery_webhook(
        &self,
        raw_body: &[u8],
        secret: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let valid = match self.delivery_secret.as_deref() {
            Some(expected) => secret
                .map(|given| secure_eq(expected.as_bytes(), given.trim().as_bytes()))
                .unwrap_or(false),
            None => true,
        };

        let payload = payload_json(raw_body);
        let callback = DeliveryCallback::parse(&payload);
        let log_id = self
            .audit(NewWebhookLog {
                source: WebhookSource::for_provider(self.orchestrator.provider_name()),
                event: callback.status.clone(),
                reference: callback.request_id.clone(),
                payload,
                signature: None,
                is_valid: valid,
            })
            .await;

        if !valid {
            warn!(webhook_id = ?log_id, "Rejected delivery webhook with bad secret");
            self.mark(
                log_id,
                WebhookStatus::Failed,
                None,
                Some("invalid webhook secret".to_string()),
            )
            .await;
            return Err(WebhookError::InvalidSignature {
                origin: WebhookSource::for_provider(self.orchestrator.provider_name()),
            });
        }

        let result = self.apply_delivery_callback(callback).await;
        self.finish(log_id, result).await
    }

    async fn apply_delivery_callback(
        &self,
        callback: DeliveryCallback,
    ) -> Result<WebhookOutcome, WebhookError> {
        let Some(status) = callback.status.as_deref() else {
            return Ok(WebhookOutcome::Ignored {
                reason: "callback carries no status".to_string(),
            });
        };
        let Some(mapped) = map_webhook_status(status) else {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("unrecognised status {}", status),
            });
        };

        let mut tx = None;
        if let Some(request_id) = callback.request_id.as_deref() {
            tx = self.store.find_by_reference(request_id).await?;
        }
        if tx.is_none() {
            if let Some(provider_reference) = callback.provider_reference.as_deref() {
                tx = self.store.find_by_provider_reference(provider_reference).await?;
            }
        }
        let Some(tx) = tx.filter(|t| t.transaction_type.is_purchase()) else {
            warn!(
                request_id = ?callback.request_id,
                provider_reference = ?callback.provider_reference,
                "Delivery webhook for unknown transaction"
            );
            return Ok(WebhookOutcome::Unmatched);
        };

        let resolution = match mapped {
            WebhookDeliveryStatus::Success => DeliveryResolution::Delivered,
            WebhookDeliveryStatus::Pending => DeliveryResolution::Pending,
            WebhookDeliveryStatus::Failed => DeliveryResolution::Failed,
        };
        let before = (tx.status, tx.provider_status);
        let settled = self
            .orchestrator
            .apply_delivery_status(
                &tx,
                DeliveryUpdate {
                    resolution,
                    provider_reference: callback.provider_reference,
                    message: callback.message,
                    raw: None,
                    failure_kind: None,
                },
            )
            .await?;

        Ok(if (settled.status, settled.provider_status) == before {
            WebhookOutcome::AlreadyApplied {
                transaction_id: settled.id,
            }
        } else {
            WebhookOutcome::Processed {
                transaction_id: settled.id,
            }
        })
    }

    /// Audit row for an incoming webhook. A failed write is logged and the
    /// webhook is still processed.
    async fn audit(&self, new: NewWebhookLog) -> Option<Uuid> {
        let source = new.source;
        match self.store.log_webhook(new).await {
            Ok(log) => Some(log.id),
            Err(e) => {
                error!(source = source.as_str(), error = %e, "Could not record webhook");
                None
            }
        }
    }

    async fn mark(
        &self,
        log_id: Option<Uuid>,
        status: WebhookStatus,
        transaction_id: Option<Uuid>,
        note: Option<String>,
    ) {
        let Some(log_id) = log_id else {
            return;
        };
        if let Err(e) = self
            .store
            .mark_webhook(log_id, status, transaction_id, note)
            .await
        {
            error!(webhook_id = %log_id, error = %e, "Could not update webhook record");
        }
    }

    async fn finish(
        &self,
        log_id: Option<Uuid>,
        result: Result<WebhookOutcome, WebhookError>,
    ) -> Result<WebhookOutcome, WebhookError> {
        match &result {
            Ok(outcome) => {
                let (transaction_id, note) = match outcome {
                    WebhookOutcome::Processed { transaction_id }
                    | WebhookOutcome::AlreadyApplied { transaction_id } => {
                        (Some(*transaction_id), None)
                    }
                    WebhookOutcome::Unmatched => (None, Some("no matching transaction".to_string())),
                    WebhookOutcome::Ignored { reason } => (None, Some(reason.clone())),
                };
                self.mark(log_id, WebhookStatus::Processed, transaction_id, note)
                    .await;
            }
            Err(e) => {
                error!(webhook_id = ?log_id, error = %e, "Webhook processing failed");
                self.mark(log_id, WebhookStatus::Failed, None, Some(e.to_string()))
                    .await;
            }
        }
        result
    }
}

fn payload_json(raw_body: &[u8]) -> JsonValue {
    serde_json::from_slice(raw_body).unwrap_or_else(|_| {
        serde_json::json!({ "raw": String::from_utf8_lossy(raw_body) })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_vtpass_callback() {
        let callback = DeliveryCallback::parse(&json!({
            "type": "transaction-update",
            "data": {
                "code": "000",
                "requestId": "VTU-20250101120000-0badf00d",
                "response_description": "TRANSACTION SUCCESSFUL",
                "content": {"transactions": {"status": "delivered", "transactionId": "17355000001"}}
            }
        }));
        assert_eq!(
            callback.request_id.as_deref(),
            Some("VTU-20250101120000-0badf00d")
        );
        assert_eq!(callback.provider_reference.as_deref(), Some("17355000001"));
        assert_eq!(callback.status.as_deref(), Some("delivered"));
        assert_eq!(callback.message.as_deref(), Some("TRANSACTION SUCCESSFUL"));
    }

    #[test]
    fn parses_legacy_callback() {
        let callback = DeliveryCallback::parse(&json!({
            "id": 88123,
            "request_id": "VTU-20250101120000-0badf00d",
            "Status": "failed",
            "api_response": "Invalid number"
        }));
        assert_eq!(callback.provider_reference.as_deref(), Some("88123"));
        assert_eq!(callback.status.as_deref(), Some("failed"));
        assert_eq!(callback.message.as_deref(), Some("Invalid number"));
    }

    #[test]
    fn non_json_body_is_kept_for_audit() {
        assert_eq!(payload_json(b"hello"), json!({"raw": "hello"}));
    }
}
