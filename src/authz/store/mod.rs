//! Backing data for permission resolution.
//!
//! A store answers two reads (role defaults, user overrides) and lets callers
//! subscribe to changes of a user's permission records. It never computes the
//! merged map; that is the resolver's job.

mod memory;
mod sqlite;
mod subscriptions;

pub use memory::MemoryPermissionStore;
pub use sqlite::SqlitePermissionStore;
pub use subscriptions::{ChangeCallback, SubscriptionHandle, SubscriptionRegistry};

use async_trait::async_trait;
use uuid::Uuid;

use super::catalog::Role;
use super::model::{RolePermissionSet, UserPermissionOverride};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("malformed permission record: {0}")]
    Malformed(String),
    #[error("permission store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Default grants of a role; `None` when the role has no records
    async fn fetch_role_defaults(&self, role: Role) -> Result<Option<RolePermissionSet>, StoreError>;

    /// Per-user overrides; `None` when the user has none
    async fn fetch_user_overrides(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserPermissionOverride>, StoreError>;

    /// Register a callback fired whenever the records behind `user_id` change
    fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle;

    fn unsubscribe(&self, handle: SubscriptionHandle);
}
