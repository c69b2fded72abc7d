use crate::database::wallet_repository::{Wallet, WalletStatus};
use crate::database::LedgerStore;
use crate::error::{format_naira, AppResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Wallet as shown to its owner
#[derive(Debug, Clone, Serialize)]
pub struct WalletBalance {
    pub user_id: String,
    pub balance: i64,
    pub balance_display: String,
    pub total_funded: i64,
    pub total_spent: i64,
    pub total_refunded: i64,
    pub status: WalletStatus,
    pub last_funded_at: Option<DateTime<Utc>>,
}

impl From<Wallet> for WalletBalance {
    fn from(wallet: Wallet) -> Self {
        Self {
            balance_display: format_naira(wallet.balance),
            user_id: wallet.user_id,
            balance: wallet.balance,
            total_funded: wallet.total_funded,
            total_spent: wallet.total_spent,
            total_refunded: wallet.total_refunded,
            status: wallet.status,
            last_funded_at: wallet.last_funded_at,
        }
    }
}

pub struct WalletService {
    store: Arc<dyn LedgerStore>,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Balance for a user; a first visit opens an empty wallet
    pub async fn wallet_balance(&self, user_id: &str) -> AppResult<WalletBalance> {
        let wallet = match self.store.find_wallet(user_id).await? {
            Some(wallet) => wallet,
            None => self.store.ensure_wallet(user_id).await?,
        };
        if !wallet.is_balanced() {
            tracing::error!(
                user_id,
                balance = wallet.balance,
                total_funded = wallet.total_funded,
                total_spent = wallet.total_spent,
                total_refunded = wallet.total_refunded,
                "Wallet totals do not reconcile with balance"
            );
        }
        Ok(wallet.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryLedgerStore;

    #[tokio::test]
    async fn first_balance_opens_empty_wallet() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let service = WalletService::new(store.clone());

        let balance = service.wallet_balance("user-1").await.unwrap();
        assert_eq!(balance.balance, 0);
        assert_eq!(balance.balance_display, "₦0.00");
        assert_eq!(balance.status, WalletStatus::Active);
    }
}
