use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;

use steward::authz::SqlitePermissionStore;
use steward::create_app;

async fn setup() -> Result<(TempDir, SqlitePool, Router)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test_auth.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;
    SqlitePermissionStore::new(pool.clone()).seed_builtin_defaults().await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((dir, pool, app))
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, value))
}

fn granted(v: &Value) -> Vec<String> {
    v["granted"]
        .as_array()
        .map(|keys| {
            keys.iter()
                .map(|k| format!("{}:{}", k["module"].as_str().unwrap_or(""), k["action"].as_str().unwrap_or("")))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn auth_edge_cases() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    // 1. Short password
    let (status, _) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Short Pass", "email": "short@example.com", "password": "short"})),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST, "short password should be rejected");

    // 2. Valid registration, email is normalized
    let (status, v) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Valid User", "email": " Valid@Example.com ", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(v["user"]["email"], "valid@example.com");
    assert_eq!(v["user"]["role"], "member");

    // 3. Duplicate email
    let (status, _) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Again", "email": "valid@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);

    // 4. Wrong password and unknown email
    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "valid@example.com", "password": "wrongpassword"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "nobody@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // 5. No token and a garbage token
    let (status, _) = send(&app, "GET", "/permissions/me", None, None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = send(&app, "GET", "/permissions/me", Some("not-a-jwt"), None).await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    Ok(())
}

#[tokio::test]
async fn member_sees_role_defaults() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let (status, _) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({"name": "Mia Member", "email": "mia@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, v) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({"email": "mia@example.com", "password": "password123"})),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let token = v["token"].as_str().context("missing token")?.to_string();

    let (status, me) = send(&app, "GET", "/permissions/me", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["role"], "member");
    assert_eq!(me["degraded"], false);
    assert_eq!(granted(&me), vec!["dashboard:view", "events:view"]);

    let (status, check) = send(&app, "GET", "/permissions/me/check?module=events&action=view", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["granted"], true);

    let (status, check) = send(&app, "GET", "/permissions/me/check?module=finance&action=view", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(check["granted"], false);

    // Unknown module names never reach the resolver
    let (status, v) = send(&app, "GET", "/permissions/me/check?module=payroll&action=view", Some(&token), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "bad_request");

    let (status, v) = send(&app, "GET", "/permissions/me/check?module=events", Some(&token), None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(v["error"], "bad_request");

    let (status, _) = send(&app, "POST", "/auth/logout", Some(&token), None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn catalog_lists_modules_actions_and_roles() -> Result<()> {
    let (_dir, _pool, app) = setup().await?;

    let (status, v) = send(&app, "GET", "/permissions/catalog", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(v["modules"].as_array().map(Vec::len), Some(9));
    assert_eq!(v["actions"].as_array().map(Vec::len), Some(7));
    assert_eq!(v["roles"][0]["id"], "super_admin");
    assert_eq!(v["modules"][0], json!({"id": "dashboard", "label": "Dashboard"}));

    Ok(())
}
