use super::provider::DeliveryProvider;
use super::types::{
    DeliveryError, DeliveryKind, DeliveryOutcome, DeliveryReport, DeliveryRequest,
    DeliveryResolution,
};
use tracing::{debug, error, info, warn};

/// Runs one delivery attempt through a provider and resolves ambiguous
/// answers with a single requery.
///
/// Delivered and Failed are adopted as-is. Pending, Unknown, transport
/// failures, timeouts and 5xx responses get exactly one requery with the same
/// request id; if that is still unresolved the attempt is parked as
/// [`DeliveryResolution::Pending`]. Duplicate and credential rejections are
/// returned as errors because the caller handles them differently from a
/// failed delivery.
pub struct DeliveryExecutor;

impl DeliveryExecutor {
    pub async fn execute(
        provider: &dyn DeliveryProvider,
        request: &DeliveryRequest,
    ) -> Result<DeliveryReport, DeliveryError> {
        debug!(
            provider = provider.name(),
            request_id = %request.request_id,
            kind = ?request.kind,
            amount = request.amount,
            "Executing delivery"
        );

        let attempt = match request.kind {
            DeliveryKind::Airtime => provider.purchase_airtime(request).await,
            DeliveryKind::Data => provider.purchase_data(request).await,
        };

        let reply = match attempt {
            Ok(reply) => reply,
            Err(e @ DeliveryError::Auth { .. }) | Err(e @ DeliveryError::Duplicate { .. }) => {
                error!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    error = %e,
                    "Delivery rejected by provider"
                );
                return Err(e);
            }
            Err(e) if e.is_ambiguous() => {
                warn!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    error = %e,
                    "Delivery outcome unknown, requerying"
                );
                return Ok(Self::requery_once(provider, &request.request_id).await);
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    error = %e,
                    "Delivery request refused"
                );
                return Ok(DeliveryReport {
                    resolution: DeliveryResolution::Failed,
                    provider_reference: None,
                    message: Some(e.to_string()),
                    raw: None,
                    requeried: false,
                });
            }
        };

        match provider.classify(&reply) {
            DeliveryOutcome::Delivered => {
                info!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    provider_reference = ?reply.provider_reference,
                    "Delivery confirmed"
                );
                Ok(DeliveryReport::from_reply(DeliveryResolution::Delivered, reply, false))
            }
            DeliveryOutcome::Failed => {
                warn!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    code = ?reply.code,
                    message = ?reply.message,
                    "Delivery failed"
                );
                Ok(DeliveryReport::from_reply(DeliveryResolution::Failed, reply, false))
            }
            DeliveryOutcome::Duplicate => Err(DeliveryError::Duplicate {
                provider: provider.name().to_string(),
                request_id: request.request_id.clone(),
            }),
            DeliveryOutcome::AuthError => Err(DeliveryError::Auth {
                provider: provider.name().to_string(),
                message: reply
                    .message
                    .unwrap_or_else(|| "credentials rejected".to_string()),
            }),
            outcome @ (DeliveryOutcome::Pending | DeliveryOutcome::Unknown) => {
                info!(
                    provider = provider.name(),
                    request_id = %request.request_id,
                    outcome = ?outcome,
                    code = ?reply.code,
                    "Delivery not final, requerying"
                );
                let mut report = Self::requery_once(provider, &request.request_id).await;
                if report.provider_reference.is_none() {
                    report.provider_reference = reply.provider_reference;
                }
                Ok(report)
            }
        }
    }

    /// One requery. Never fails: anything short of a definitive answer parks
    /// the attempt as pending.
    pub async fn requery_once(provider: &dyn DeliveryProvider, request_id: &str) -> DeliveryReport {
        let reply = match provider.requery(request_id).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    request_id,
                    error = %e,
                    "Requery failed, parking as pending"
                );
                return DeliveryReport::parked(e.to_string(), true);
            }
        };

        let resolution = match provider.classify(&reply) {
            DeliveryOutcome::Delivered => DeliveryResolution::Delivered,
            DeliveryOutcome::Failed => DeliveryResolution::Failed,
            other => {
                info!(
                    provider = provider.name(),
                    request_id,
                    outcome = ?other,
                    "Requery inconclusive, parking as pending"
                );
                DeliveryResolution::Pending
            }
        };

        DeliveryReport::from_reply(resolution, reply, true)
    }
}
