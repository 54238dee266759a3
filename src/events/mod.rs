use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqliteConnection, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context for audit entries (IP, User-Agent)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
    pub severity: Severity,
}

/// Publish an audit event for any `Loggable` entity.
///
/// # Arguments
/// * `event_bus` - The event bus to send the event to.
/// * `action` - The action performed (e.g., "replaced", "cleared").
/// * `actor_id` - The administrator who performed the action.
/// * `entity` - The current/new entity state.
/// * `old_entity` - Optional previous entity state.
/// * `context` - Optional request context (IP, User-Agent).
pub fn log_activity_with_context<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
    context: Option<RequestContext>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        context,
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        entity.subject_id(),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    // Fire and forget - audit failures should not break the API
    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

/// SHA256(prev_hash || payload), hex encoded
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

struct AuditRecord<'a> {
    name: &'a str,
    actor_id: Option<Uuid>,
    subject_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
    severity: &'a str,
    payload: String,
}

impl<'a> AuditRecord<'a> {
    fn from_event(event: &'a Value) -> Self {
        let uuid_at = |field: &str| {
            event
                .get(field)
                .and_then(|v| v.as_str())
                .and_then(|s| Uuid::parse_str(s).ok())
        };

        Self {
            name: event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown"),
            actor_id: uuid_at("actor_id"),
            subject_id: uuid_at("subject_id"),
            occurred_at: event
                .get("occurred_at")
                .and_then(|v| v.as_str())
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            severity: event
                .get("payload")
                .and_then(|p| p.get("severity"))
                .and_then(|s| s.as_str())
                .unwrap_or(Severity::Important.as_str()),
            payload: serde_json::to_string(event).unwrap_or_default(),
        }
    }
}

/// Append one event to `permission_audit`, linking it to the previous entry.
///
/// The write lock is taken before the previous hash is read (`BEGIN IMMEDIATE`),
/// so a concurrent writer makes this wait on the busy timeout instead of
/// failing a lock upgrade, and two appends can never link to the same entry.
pub async fn append_audit_event(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let record = AuditRecord::from_event(event);
    let mut conn = pool.acquire().await?;

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let result = match insert_chained(&mut *conn, &record).await {
        Ok(()) => sqlx::query("COMMIT").execute(&mut *conn).await.map(|_| ()),
        Err(err) => Err(err),
    };

    if result.is_err() {
        if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
            tracing::warn!(error = %rollback, "audit rollback failed");
        }
    }
    result
}

async fn insert_chained(conn: &mut SqliteConnection, record: &AuditRecord<'_>) -> Result<(), sqlx::Error> {
    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM permission_audit ORDER BY rowid DESC LIMIT 1")
            .fetch_optional(&mut *conn)
            .await?;

    let hash = chain_hash(prev_hash.as_deref(), &record.payload);

    sqlx::query(
        r#"
        INSERT INTO permission_audit (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(record.name)
    .bind(record.occurred_at)
    .bind(record.actor_id.map(|u| u.to_string()))
    .bind(record.subject_id.map(|u| u.to_string()))
    .bind(&record.payload)
    .bind(record.severity)
    .bind(&prev_hash)
    .bind(&hash)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Walk the audit chain in insertion order. Returns the number of entries,
/// or the id of the first entry whose hash does not match.
pub async fn verify_audit_chain(pool: &SqlitePool) -> Result<Result<usize, String>, sqlx::Error> {
    let rows = sqlx::query("SELECT id, payload, prev_hash, hash FROM permission_audit ORDER BY rowid ASC")
        .fetch_all(pool)
        .await?;

    let mut prev: Option<String> = None;
    for row in &rows {
        let id: String = row.try_get("id")?;
        let payload: String = row.try_get("payload")?;
        let prev_hash: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        if prev_hash != prev || chain_hash(prev.as_deref(), &payload) != hash {
            return Ok(Err(id));
        }
        prev = Some(hash);
    }

    Ok(Ok(rows.len()))
}

const AUDIT_WRITE_ATTEMPTS: u32 = 3;

async fn save_with_retry(pool: &SqlitePool, event: &Value) {
    for attempt in 1..=AUDIT_WRITE_ATTEMPTS {
        match append_audit_event(pool, event).await {
            Ok(()) => return,
            Err(e) if attempt < AUDIT_WRITE_ATTEMPTS => {
                tracing::warn!(attempt, error = %e, "audit write failed, retrying");
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to save audit event"),
        }
    }
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("Permission audit listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        save_with_retry(&pool, &event).await;
    }
    tracing::info!("Permission audit listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_hash_depends_on_previous() {
        let first = chain_hash(None, "payload");
        let second = chain_hash(Some(&first), "payload");
        assert_ne!(first, second);
        assert_eq!(first.len(), 64);
        assert_eq!(chain_hash(None, "payload"), first);
    }

    #[test]
    fn test_request_context_prefers_forwarded_for() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        headers.insert("x-real-ip", "10.9.9.9".parse().unwrap());
        headers.insert(axum::http::header::USER_AGENT, "tests".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(ctx.user_agent.as_deref(), Some("tests"));
    }
}
