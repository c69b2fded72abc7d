//! Shared fixtures: in-memory ledger, a scripted delivery provider and a
//! gateway that signs and parses like Paystack without network calls.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use vtu_backend::api::{AppState, StateBuilder};
use vtu_backend::config::{PaystackSettings, PurchaseConfig};
use vtu_backend::database::catalog_repository::{Network, ProviderPlan};
use vtu_backend::database::wallet_repository::{CreditKind, Wallet, WalletRepository};
use vtu_backend::database::InMemoryLedgerStore;
use vtu_backend::delivery::{
    DeliveryError, DeliveryOutcome, DeliveryProvider, DeliveryRequest, ProviderReply,
};
use vtu_backend::payments::types::{
    ChargeStatus, InitializeRequest, InitializeResponse, VerifyResponse, WebhookEvent,
    WebhookVerificationResult,
};
use vtu_backend::payments::utils::sign_hmac_sha512_hex;
use vtu_backend::payments::{PaymentError, PaymentGateway, PaymentResult, PaystackGateway};

pub const USER: &str = "user-1";
pub const PAYSTACK_SECRET: &str = "sk_test_reconciliation";
pub const DELIVERY_SECRET: &str = "delivery-hook-secret";

/// MTN 1GB SME from the default catalog: 250 naira at 10% commission
pub const PLAN_ID: i32 = 1;
pub const PLAN_PRICE: i64 = 25_000;
pub const PLAN_COMMISSION: i64 = 2_500;

pub fn reply(status: &str) -> ProviderReply {
    ProviderReply {
        code: None,
        status: Some(status.to_string()),
        provider_reference: Some(format!("PRV-{}", status)),
        message: Some(format!("transaction {}", status)),
        raw: json!({ "status": status }),
    }
}

pub fn timeout() -> DeliveryError {
    DeliveryError::Transport {
        provider: "scripted".to_string(),
        message: "operation timed out".to_string(),
        timed_out: true,
    }
}

type Scripted = Mutex<VecDeque<Result<ProviderReply, DeliveryError>>>;

/// Delivery provider answering from a script. An empty script delivers.
#[derive(Default)]
pub struct ScriptedProvider {
    purchases: Scripted,
    requeries: Scripted,
    purchase_calls: AtomicUsize,
    requery_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn on_purchase(&self, answer: Result<ProviderReply, DeliveryError>) {
        self.purchases.lock().unwrap().push_back(answer);
    }

    pub fn on_requery(&self, answer: Result<ProviderReply, DeliveryError>) {
        self.requeries.lock().unwrap().push_back(answer);
    }

    pub fn purchase_calls(&self) -> usize {
        self.purchase_calls.load(Ordering::SeqCst)
    }

    pub fn requery_calls(&self) -> usize {
        self.requery_calls.load(Ordering::SeqCst)
    }

    fn next(script: &Scripted) -> Result<ProviderReply, DeliveryError> {
        script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(reply("delivered")))
    }
}

#[async_trait]
impl DeliveryProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "vtpass"
    }

    async fn purchase_airtime(
        &self,
        _request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.purchases)
    }

    async fn purchase_data(
        &self,
        _request: &DeliveryRequest,
    ) -> Result<ProviderReply, DeliveryError> {
        self.purchase_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.purchases)
    }

    async fn requery(&self, _request_id: &str) -> Result<ProviderReply, DeliveryError> {
        self.requery_calls.fetch_add(1, Ordering::SeqCst);
        Self::next(&self.requeries)
    }

    fn classify(&self, reply: &ProviderReply) -> DeliveryOutcome {
        match reply.status.as_deref() {
            Some("delivered") => DeliveryOutcome::Delivered,
            Some("pending") => DeliveryOutcome::Pending,
            Some("failed") => DeliveryOutcome::Failed,
            Some("duplicate") => DeliveryOutcome::Duplicate,
            Some("auth") => DeliveryOutcome::AuthError,
            _ => DeliveryOutcome::Unknown,
        }
    }

    async fn fetch_data_plans(
        &self,
        _network: &Network,
    ) -> Result<Vec<ProviderPlan>, DeliveryError> {
        Ok(Vec::new())
    }
}

/// Gateway that keeps Paystack's webhook signing and parsing but answers
/// checkout calls locally.
pub struct FakeGateway {
    paystack: PaystackGateway,
    charges: Mutex<HashMap<String, (ChargeStatus, i64)>>,
    initialized: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        let paystack = PaystackGateway::new(PaystackSettings {
            secret_key: PAYSTACK_SECRET.to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            webhook_secret: None,
            callback_url: None,
            timeout_secs: 1,
            max_retries: 0,
        })
        .expect("paystack client");
        Self {
            paystack,
            charges: Mutex::new(HashMap::new()),
            initialized: AtomicUsize::new(0),
        }
    }

    /// What `verify_payment` reports for a reference
    pub fn set_charge(&self, reference: &str, status: ChargeStatus, amount: i64) {
        self.charges
            .lock()
            .unwrap()
            .insert(reference.to_string(), (status, amount));
    }

    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initialize_payment(
        &self,
        request: InitializeRequest,
    ) -> PaymentResult<InitializeResponse> {
        self.initialized.fetch_add(1, Ordering::SeqCst);
        Ok(InitializeResponse {
            authorization_url: format!("https://checkout.test/{}", request.reference),
            access_code: "ac_test".to_string(),
            reference: request.reference,
        })
    }

    async fn verify_payment(&self, reference: &str) -> PaymentResult<VerifyResponse> {
        let (status, amount) = self
            .charges
            .lock()
            .unwrap()
            .get(reference)
            .copied()
            .ok_or_else(|| PaymentError::ProviderError {
                provider: "paystack".to_string(),
                message: "Transaction reference not found".to_string(),
                provider_code: None,
                retryable: false,
            })?;
        Ok(VerifyResponse {
            reference: reference.to_string(),
            status,
            amount,
            currency: "NGN".to_string(),
            channel: Some("card".to_string()),
            paid_at: None,
            gateway_response: Some(format!("{:?}", status)),
        })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> PaymentResult<WebhookVerificationResult> {
        self.paystack.verify_webhook(payload, signature)
    }

    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent> {
        self.paystack.parse_webhook_event(payload)
    }
}

pub struct Harness {
    pub store: Arc<InMemoryLedgerStore>,
    pub delivery: Arc<ScriptedProvider>,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(PurchaseConfig::default()).await
    }

    pub async fn with_config(purchase: PurchaseConfig) -> Self {
        let store = Arc::new(InMemoryLedgerStore::with_default_catalog().await);
        let delivery = Arc::new(ScriptedProvider::default());
        let gateway = Arc::new(FakeGateway::new());
        let state = StateBuilder {
            store: store.clone(),
            delivery: delivery.clone(),
            gateway: gateway.clone(),
            purchase,
            delivery_webhook_secret: Some(DELIVERY_SECRET.to_string()),
            refresh_catalog: false,
        }
        .build();

        Self {
            store,
            delivery,
            gateway,
            state,
        }
    }

    /// Open the user's wallet and credit it as a completed funding
    pub async fn fund(&self, user_id: &str, amount: i64) -> Wallet {
        self.store.ensure_wallet(user_id).await.unwrap();
        self.store
            .credit(user_id, amount, CreditKind::Funding)
            .await
            .unwrap()
    }

    pub async fn wallet(&self, user_id: &str) -> Wallet {
        self.store.find_wallet(user_id).await.unwrap().unwrap()
    }
}

pub fn data_request(key: Option<&str>) -> vtu_backend::services::purchase_orchestrator::DataPurchaseRequest {
    serde_json::from_value(json!({
        "plan_id": PLAN_ID,
        "phone": "08031234567",
        "idempotency_key": key,
    }))
    .unwrap()
}

pub fn paystack_event(event: &str, reference: &str, amount: i64) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "event": event,
        "data": {
            "reference": reference,
            "amount": amount,
            "status": if event == "charge.success" { "success" } else { "failed" },
            "gateway_response": if event == "charge.success" { "Approved" } else { "Declined" },
        }
    }))
    .unwrap()
}

pub fn sign(body: &[u8]) -> String {
    sign_hmac_sha512_hex(body, PAYSTACK_SECRET)
}

pub fn delivery_callback(reference: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "type": "transaction-update",
        "data": {
            "requestId": reference,
            "response_description": format!("TRANSACTION {}", status.to_uppercase()),
            "content": { "transactions": { "status": status, "transactionId": "17355000001" } }
        }
    }))
    .unwrap()
}

pub fn body_json(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes).unwrap()
}
