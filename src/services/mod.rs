//! Business logic over the ledger store and upstream providers

pub mod catalog;
pub mod funding;
pub mod purchase_orchestrator;
pub mod wallet;
pub mod webhook_reconciler;

pub use catalog::CatalogService;
pub use funding::FundingService;
pub use purchase_orchestrator::{PurchaseOrchestrator, PurchaseReceipt};
pub use wallet::WalletService;
pub use webhook_reconciler::{WebhookError, WebhookOutcome, WebhookReconciler};
