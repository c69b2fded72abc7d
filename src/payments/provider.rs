use crate::payments::error::PaymentResult;
use crate::payments::types::{
    InitializeRequest, InitializeResponse, VerifyResponse, WebhookEvent,
    WebhookVerificationResult,
};
use async_trait::async_trait;

/// Card payment gateway used to fund wallets and pay for purchases
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initialize_payment(
        &self,
        request: InitializeRequest,
    ) -> PaymentResult<InitializeResponse>;

    /// Server-to-server confirmation of a charge
    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResponse>;

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult>;

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}
