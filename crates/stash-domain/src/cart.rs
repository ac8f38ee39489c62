use anyhow::Result;
use async_trait::async_trait;
use stash_storage::SecureStorage;
use tracing::instrument;

use crate::{
    catalogue::{RecordSpec, DAY_MS, HOUR_MS},
    models::{BillingSnapshot, CartState, PurchaseRecord},
    OwnedRecords,
};

pub const CART_STATE: RecordSpec = RecordSpec::durable("cartState", DAY_MS);
pub const PURCHASE_HISTORY: RecordSpec = RecordSpec::durable("purchaseHistory", 30 * DAY_MS);
pub const BILLING_SNAPSHOT: RecordSpec = RecordSpec::session("billingSnapshot", HOUR_MS);

/// Every record the cart adapter owns.
pub const CART_RECORDS: &[RecordSpec] = &[CART_STATE, PURCHASE_HISTORY, BILLING_SNAPSHOT];

/// Cart and checkout state over `SecureStorage`.
#[derive(Clone)]
pub struct CartStorage {
    storage: SecureStorage,
}

impl CartStorage {
    pub fn new(storage: SecureStorage) -> Self {
        Self { storage }
    }

    pub async fn get_cart_state(&self) -> Result<Option<CartState>> {
        CART_STATE.load(&self.storage).await
    }

    #[instrument(skip_all)]
    pub async fn save_cart_state(&self, state: &CartState) -> Result<()> {
        CART_STATE.save(&self.storage, state).await
    }

    pub async fn clear_cart_state(&self) -> Result<()> {
        CART_STATE.clear(&self.storage).await
    }

    pub async fn get_billing_snapshot(&self) -> Result<Option<BillingSnapshot>> {
        BILLING_SNAPSHOT.load(&self.storage).await
    }

    #[instrument(skip_all)]
    pub async fn save_billing_snapshot(&self, snapshot: &BillingSnapshot) -> Result<()> {
        BILLING_SNAPSHOT.save(&self.storage, snapshot).await
    }

    pub async fn clear_billing_snapshot(&self) -> Result<()> {
        BILLING_SNAPSHOT.clear(&self.storage).await
    }

    /// Purchases newest last; empty when nothing is stored.
    pub async fn get_purchase_history(&self) -> Result<Vec<PurchaseRecord>> {
        Ok(PURCHASE_HISTORY
            .load(&self.storage)
            .await?
            .unwrap_or_default())
    }

    pub async fn save_purchase_history(&self, history: &[PurchaseRecord]) -> Result<()> {
        PURCHASE_HISTORY.save(&self.storage, history).await
    }

    /// Append one purchase to the stored history.
    #[instrument(skip_all, fields(order_id = %purchase.order_id))]
    pub async fn add_purchase(&self, purchase: PurchaseRecord) -> Result<()> {
        let mut history = self.get_purchase_history().await?;
        history.retain(|existing| existing.order_id != purchase.order_id);
        history.push(purchase);
        self.save_purchase_history(&history).await
    }

    pub async fn clear_purchase_history(&self) -> Result<()> {
        PURCHASE_HISTORY.clear(&self.storage).await
    }

    /// Remove every cart-owned record, leaving other adapters' data alone.
    #[instrument(skip_all)]
    pub async fn clear_cart_data(&self) -> Result<()> {
        for record in CART_RECORDS {
            record.clear(&self.storage).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OwnedRecords for CartStorage {
    fn name(&self) -> &'static str {
        "cart"
    }

    async fn clear_all(&self) -> Result<()> {
        self.clear_cart_data().await
    }
}
