use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{PermissionCache, PermissionResolver, SqlitePermissionStore};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_audit_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, health, permissions, rbac};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub store: Arc<SqlitePermissionStore>,
    pub resolver: Arc<PermissionResolver>,
    pub event_bus: EventBus,
}

impl AppState {
    /// Returns the state plus the receiving end of the audit bus
    pub fn new(pool: SqlitePool, jwt: JwtConfig) -> (Self, broadcast::Receiver<Value>) {
        let store = Arc::new(SqlitePermissionStore::new(pool.clone()));
        let resolver = Arc::new(PermissionResolver::new(
            store.clone(),
            Arc::new(PermissionCache::new()),
        ));
        let (event_bus, rx) = init_event_bus();

        let state = Self {
            pool,
            jwt: Arc::new(jwt),
            store,
            resolver,
            event_bus,
        };
        (state, rx)
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let (state, rx) = AppState::new(pool.clone(), jwt_config);

    tokio::spawn(start_audit_listener(rx, pool));

    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout));

    let permission_routes = Router::new()
        .route("/catalog", get(permissions::catalog))
        .route("/me", get(permissions::my_permissions))
        .route("/me/check", get(permissions::check_permission))
        .route("/me/refresh", post(permissions::refresh_permissions));

    Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/permissions", permission_routes)
        .nest("/rbac", rbac::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
