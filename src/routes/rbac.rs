//! RBAC Admin API Routes
//!
//! Endpoints for managing role defaults, per-user overrides and role
//! assignments. Every modification is written to the audit trail with
//! Critical severity and invalidates the affected cached permission maps.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::required::{PERMISSIONS_MANAGE, PERMISSIONS_VIEW, USERS_MANAGE};
use crate::authz::{PermissionStore, Role, RolePermissionSet, UserPermissionOverride};
use crate::db::users;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity_with_context, RequestContext};
use crate::jwt::AuthUser;
use crate::models::rbac::*;
use crate::models::user::{RoleChange, UpdateRoleRequest, User};

use super::extract::{ApiJson, ApiPath};
use super::require_permission;

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // Role defaults
        .route("/roles/:role/permissions", get(get_role_permissions).put(replace_role_permissions))
        // User overrides
        .route(
            "/users/:user_id/overrides",
            get(get_user_overrides).put(replace_user_overrides).delete(clear_user_overrides),
        )
        // Role assignment
        .route("/users/:user_id/role", put(update_user_role))
        // Effective permissions (computed)
        .route("/users/:user_id/effective-permissions", get(get_effective_permissions))
}

// =============================================================================
// ROLE DEFAULT ENDPOINTS
// =============================================================================

/// Get the default grants of a role
#[utoipa::path(
    get,
    path = "/rbac/roles/{role}/permissions",
    tag = "RBAC",
    params(
        ("role" = Role, Path, description = "Role tag"),
    ),
    responses(
        (status = 200, description = "Role defaults", body = RoleGrants),
        (status = 403, description = "permissions:view required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(role): ApiPath<Role>,
) -> AppResult<Json<RoleGrants>> {
    require_permission(&state, &auth, PERMISSIONS_VIEW).await?;

    let defaults = state
        .store
        .fetch_role_defaults(role)
        .await?
        .unwrap_or_else(|| RolePermissionSet::empty(role));

    Ok(Json(defaults.into()))
}

/// Replace the default grants of a role
#[utoipa::path(
    put,
    path = "/rbac/roles/{role}/permissions",
    tag = "RBAC",
    params(
        ("role" = Role, Path, description = "Role tag"),
    ),
    request_body = ReplaceRoleGrantsRequest,
    responses(
        (status = 200, description = "Role defaults replaced", body = RoleGrants),
        (status = 403, description = "permissions:manage required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn replace_role_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    ApiPath(role): ApiPath<Role>,
    ApiJson(req): ApiJson<ReplaceRoleGrantsRequest>,
) -> AppResult<Json<RoleGrants>> {
    require_permission(&state, &auth, PERMISSIONS_MANAGE).await?;

    let previous: Option<RoleGrants> = state.store.fetch_role_defaults(role).await?.map(Into::into);
    let defaults = RolePermissionSet::new(role, req.grants);
    state.store.replace_role_defaults(&defaults).await?;

    // Any number of users may hold the role.
    state.resolver.cache().clear();

    let grants: RoleGrants = defaults.into();
    log_activity_with_context(
        &state.event_bus,
        "replaced",
        Some(auth.user_id),
        &grants,
        previous.as_ref(),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(grants))
}

// =============================================================================
// USER OVERRIDE ENDPOINTS
// =============================================================================

/// Get the overrides of a user
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/overrides",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "User overrides", body = UserOverrides),
        (status = 403, description = "permissions:view required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_user_overrides(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(user_id): ApiPath<Uuid>,
) -> AppResult<Json<UserOverrides>> {
    require_permission(&state, &auth, PERMISSIONS_VIEW).await?;

    let overrides = state
        .store
        .fetch_user_overrides(user_id)
        .await?
        .unwrap_or_else(|| UserPermissionOverride::new(user_id));

    Ok(Json(overrides.into()))
}

/// Replace every override of a user
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/overrides",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = ReplaceOverridesRequest,
    responses(
        (status = 200, description = "Overrides replaced", body = UserOverrides),
        (status = 403, description = "permissions:manage required"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn replace_user_overrides(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<ReplaceOverridesRequest>,
) -> AppResult<Json<UserOverrides>> {
    require_permission(&state, &auth, PERMISSIONS_MANAGE).await?;
    ensure_user_exists(&state, user_id).await?;

    let previous: Option<UserOverrides> = state.store.fetch_user_overrides(user_id).await?.map(Into::into);
    let overrides = UserOverrides {
        user_id,
        entries: req.entries,
    }
    .into_override();

    state.store.replace_user_override(&overrides).await?;
    state.resolver.invalidate(user_id);

    let overrides: UserOverrides = overrides.into();
    log_activity_with_context(
        &state.event_bus,
        "replaced",
        Some(auth.user_id),
        &overrides,
        previous.as_ref(),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(Json(overrides))
}

/// Remove every override of a user
#[utoipa::path(
    delete,
    path = "/rbac/users/{user_id}/overrides",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 204, description = "Overrides cleared"),
        (status = 403, description = "permissions:manage required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn clear_user_overrides(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    ApiPath(user_id): ApiPath<Uuid>,
) -> AppResult<StatusCode> {
    require_permission(&state, &auth, PERMISSIONS_MANAGE).await?;

    let previous: Option<UserOverrides> = state.store.fetch_user_overrides(user_id).await?.map(Into::into);
    state.store.clear_user_override(user_id).await?;
    state.resolver.invalidate(user_id);

    let cleared = UserOverrides {
        user_id,
        entries: Vec::new(),
    };
    log_activity_with_context(
        &state.event_bus,
        "cleared",
        Some(auth.user_id),
        &cleared,
        previous.as_ref(),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ROLE ASSIGNMENT
// =============================================================================

/// Change the role of a user
#[utoipa::path(
    put,
    path = "/rbac/users/{user_id}/role",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    request_body = UpdateRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = User),
        (status = 403, description = "users:manage required"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user_role(
    State(state): State<AppState>,
    auth: AuthUser,
    headers: HeaderMap,
    ApiPath(user_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<UpdateRoleRequest>,
) -> AppResult<Json<User>> {
    require_permission(&state, &auth, USERS_MANAGE).await?;

    let previous = ensure_user_exists(&state, user_id).await?;
    if !users::update_role(&state.pool, user_id, req.role).await? {
        return Err(AppError::not_found("user not found"));
    }

    state.resolver.invalidate(user_id);
    state.store.notify_user_changed(user_id);

    let change = RoleChange {
        user_id,
        previous: previous.role,
        role: req.role,
    };
    log_activity_with_context(
        &state.event_bus,
        "changed",
        Some(auth.user_id),
        &change,
        None,
        Some(RequestContext::from_headers(&headers)),
    );

    let user = ensure_user_exists(&state, user_id).await?;
    Ok(Json(user))
}

// =============================================================================
// EFFECTIVE PERMISSIONS
// =============================================================================

/// Get computed effective permissions for a user, with the source of each entry
#[utoipa::path(
    get,
    path = "/rbac/users/{user_id}/effective-permissions",
    tag = "RBAC",
    params(
        ("user_id" = Uuid, Path, description = "User ID"),
    ),
    responses(
        (status = 200, description = "Effective permissions", body = EffectivePermissions),
        (status = 403, description = "permissions:view required"),
        (status = 404, description = "User not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_effective_permissions(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiPath(user_id): ApiPath<Uuid>,
) -> AppResult<Json<EffectivePermissions>> {
    require_permission(&state, &auth, PERMISSIONS_VIEW).await?;

    let user = ensure_user_exists(&state, user_id).await?;
    let defaults = state
        .store
        .fetch_role_defaults(user.role)
        .await?
        .unwrap_or_else(|| RolePermissionSet::empty(user.role));
    let overrides = state.store.fetch_user_overrides(user_id).await?;

    Ok(Json(EffectivePermissions::explain(user_id, &defaults, overrides.as_ref())))
}

async fn ensure_user_exists(state: &AppState, user_id: Uuid) -> AppResult<User> {
    users::find_by_id(&state.pool, user_id)
        .await?
        .map(Into::into)
        .ok_or_else(|| AppError::not_found("user not found"))
}
