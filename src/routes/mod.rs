pub mod auth;
pub mod extract;
pub mod health;
pub mod permissions;
pub mod rbac;

use crate::app::AppState;
use crate::authz::gate::denial_message;
use crate::authz::PermissionKey;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;

/// Server-side gate: resolve the caller (cached) and refuse with 403 unless
/// `key` is granted. A load failure counts as a denial.
pub async fn require_permission(state: &AppState, auth: &AuthUser, key: PermissionKey) -> AppResult<()> {
    let map = state.resolver.resolve_or_empty(auth.user_id, auth.role).await;
    if map.is_granted(key) {
        return Ok(());
    }

    tracing::info!(user_id = %auth.user_id, role = %auth.role, permission = %key, "request denied");
    Err(AppError::forbidden(denial_message(key)))
}
