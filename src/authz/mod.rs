//! Authorization module - permission catalog, resolution and gating
//!
//! This module implements permission resolution with support for:
//! - Closed module/action catalog with per-role default grants
//! - Per-user overrides that grant or revoke on top of role defaults
//! - A sequenced, injectable cache with change notifications
//! - Fail-closed checks: loading, errors and absence all mean "denied"

pub mod cache;
pub mod catalog;
pub mod gate;
pub mod model;
pub mod resolver;
pub mod session;
pub mod store;

pub use cache::PermissionCache;
pub use catalog::{builtin_role_defaults, Action, Module, PermissionKey, Role};
pub use gate::{ClickEvent, ControlEvent, DenialDialog, Emphasis, GateOutcome, GatedControl};
pub use model::{ResolvedPermissionMap, RolePermissionSet, UserPermissionOverride};
pub use resolver::{PermissionLoadError, PermissionResolver};
pub use session::{PermissionSession, SessionState, SessionUser};
pub use store::{MemoryPermissionStore, PermissionStore, SqlitePermissionStore, StoreError};

/// Pairs the administrative API checks before acting
pub mod required {
    use super::{Action, Module, PermissionKey};

    pub const PERMISSIONS_VIEW: PermissionKey = PermissionKey::new(Module::Permissions, Action::View);
    pub const PERMISSIONS_MANAGE: PermissionKey = PermissionKey::new(Module::Permissions, Action::Manage);
    pub const USERS_MANAGE: PermissionKey = PermissionKey::new(Module::Users, Action::Manage);
}
