//! Caller-facing permission endpoints.
//!
//! Every endpoint here is fail-closed: a load failure yields an empty grant
//! set (flagged `degraded`) or `granted: false`, never an error response.

use axum::extract::State;
use axum::Json;

use super::extract::ApiQuery;
use crate::app::AppState;
use crate::authz::ResolvedPermissionMap;
use crate::errors::AppResult;
use crate::jwt::AuthUser;
use crate::models::rbac::{PermissionCatalog, PermissionCheckQuery, PermissionCheckResponse, ResolvedPermissions};

#[utoipa::path(
    get,
    path = "/permissions/catalog",
    tag = "Permissions",
    responses((status = 200, description = "Modules, actions and roles with labels", body = PermissionCatalog))
)]
pub async fn catalog() -> Json<PermissionCatalog> {
    Json(PermissionCatalog::build())
}

#[utoipa::path(
    get,
    path = "/permissions/me",
    tag = "Permissions",
    responses((status = 200, description = "Resolved permissions of the caller", body = ResolvedPermissions)),
    security(("bearerAuth" = []))
)]
pub async fn my_permissions(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<ResolvedPermissions>> {
    let resolved = match state.resolver.resolve(auth.user_id, auth.role).await {
        Ok(map) => ResolvedPermissions::from_map(&map, false),
        Err(err) => {
            tracing::warn!(user_id = %auth.user_id, error = %err, "reporting empty permissions");
            ResolvedPermissions::from_map(&ResolvedPermissionMap::empty(auth.user_id, auth.role), true)
        }
    };
    Ok(Json(resolved))
}

#[utoipa::path(
    get,
    path = "/permissions/me/check",
    tag = "Permissions",
    params(
        ("module" = String, Query, description = "Module, e.g. finance"),
        ("action" = String, Query, description = "Action, e.g. view"),
    ),
    responses((status = 200, description = "Fresh check against the store", body = PermissionCheckResponse)),
    security(("bearerAuth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    ApiQuery(query): ApiQuery<PermissionCheckQuery>,
) -> AppResult<Json<PermissionCheckResponse>> {
    let granted = match state.resolver.refresh(auth.user_id, auth.role).await {
        Ok(map) => map.has(query.module, query.action),
        Err(err) => {
            tracing::warn!(user_id = %auth.user_id, error = %err, "fresh permission check failed, denying");
            false
        }
    };

    Ok(Json(PermissionCheckResponse {
        module: query.module,
        action: query.action,
        granted,
    }))
}

#[utoipa::path(
    post,
    path = "/permissions/me/refresh",
    tag = "Permissions",
    responses((status = 200, description = "Re-resolved permissions of the caller", body = ResolvedPermissions)),
    security(("bearerAuth" = []))
)]
pub async fn refresh_permissions(State(state): State<AppState>, auth: AuthUser) -> AppResult<Json<ResolvedPermissions>> {
    let resolved = match state.resolver.refresh(auth.user_id, auth.role).await {
        Ok(map) => ResolvedPermissions::from_map(&map, false),
        Err(err) => {
            tracing::warn!(user_id = %auth.user_id, error = %err, "refresh failed, reporting empty permissions");
            ResolvedPermissions::from_map(&ResolvedPermissionMap::empty(auth.user_id, auth.role), true)
        }
    };
    Ok(Json(resolved))
}
