pub mod credit_repository;
pub mod failed_purchase_repository;
pub mod kv_repository;
pub mod notification_repository;
pub mod pending_cart_repository;
pub mod pro_repository;
pub mod promo_repository;
pub mod purchase_repository;
pub mod reward_repository;

pub use credit_repository::{CreditRepository, CreditStore};
pub use failed_purchase_repository::{FailedPurchaseRepository, FailedPurchaseStore};
pub use kv_repository::{KeyValueStore, KvRepository};
pub use notification_repository::{NotificationRepository, NotificationStore};
pub use pending_cart_repository::{PendingCartRepository, PendingCartStore};
pub use pro_repository::{ProRepository, ProStore};
pub use promo_repository::{PromoRepository, PromoStore};
pub use purchase_repository::{ClaimOutcome, FulfillmentUpdate, PurchaseRepository, PurchaseStore};
pub use reward_repository::{RewardRepository, RewardStore};
