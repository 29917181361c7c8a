pub mod connection;
pub mod memory;
pub mod repositories;

use std::sync::Arc;
use sqlx::PgPool;

pub use connection::{create_pool, run_migrations, verify_connection};
pub use memory::MemoryStore;
pub use repositories::*;

/// Every store the payment core talks to, behind its port trait.
#[derive(Clone)]
pub struct Stores {
    pub kv: Arc<dyn KeyValueStore>,
    pub carts: Arc<dyn PendingCartStore>,
    pub purchases: Arc<dyn PurchaseStore>,
    pub failed_purchases: Arc<dyn FailedPurchaseStore>,
    pub credits: Arc<dyn CreditStore>,
    pub pro: Arc<dyn ProStore>,
    pub rewards: Arc<dyn RewardStore>,
    pub promos: Arc<dyn PromoStore>,
    pub notifications: Arc<dyn NotificationStore>,
}

impl Stores {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            kv: Arc::new(KvRepository::new(pool.clone())),
            carts: Arc::new(PendingCartRepository::new(pool.clone())),
            purchases: Arc::new(PurchaseRepository::new(pool.clone())),
            failed_purchases: Arc::new(FailedPurchaseRepository::new(pool.clone())),
            credits: Arc::new(CreditRepository::new(pool.clone())),
            pro: Arc::new(ProRepository::new(pool.clone())),
            rewards: Arc::new(RewardRepository::new(pool.clone())),
            promos: Arc::new(PromoRepository::new(pool.clone())),
            notifications: Arc::new(NotificationRepository::new(pool)),
        }
    }

    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            kv: store.clone(),
            carts: store.clone(),
            purchases: store.clone(),
            failed_purchases: store.clone(),
            credits: store.clone(),
            pro: store.clone(),
            rewards: store.clone(),
            promos: store.clone(),
            notifications: store,
        }
    }
}
