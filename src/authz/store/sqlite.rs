use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use super::{ChangeCallback, PermissionStore, StoreError, SubscriptionHandle, SubscriptionRegistry};
use crate::authz::catalog::{builtin_role_defaults, Action, Module, PermissionKey, Role};
use crate::authz::model::{RolePermissionSet, UserPermissionOverride};

/// Permission records kept in the application's SQLite database.
///
/// Tables: `role_permissions (role, module, action)`,
/// `user_permission_overrides (user_id, module, action, granted)` and
/// `role_seeds (role)`, which marks roles seeding must leave alone.
pub struct SqlitePermissionStore {
    pool: SqlitePool,
    subscriptions: SubscriptionRegistry,
}

fn key_from_row(row: &SqliteRow) -> Result<PermissionKey, StoreError> {
    let module: String = row
        .try_get("module")
        .map_err(|e| StoreError::Malformed(format!("missing module: {}", e)))?;
    let action: String = row
        .try_get("action")
        .map_err(|e| StoreError::Malformed(format!("missing action: {}", e)))?;

    let module: Module = module.parse().map_err(|e| StoreError::Malformed(format!("{}", e)))?;
    let action: Action = action.parse().map_err(|e| StoreError::Malformed(format!("{}", e)))?;
    Ok(PermissionKey::new(module, action))
}

impl SqlitePermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            subscriptions: SubscriptionRegistry::new(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replace the full default set of a role. An empty set is kept as is:
    /// the role is marked configured and seeding will not refill it.
    pub async fn replace_role_defaults(&self, defaults: &RolePermissionSet) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        write_role_grants(&mut tx, defaults).await?;
        tx.commit().await?;

        let notified = self.notify_role_holders(defaults.role).await;
        tracing::info!(
            role = %defaults.role,
            grants = defaults.grants.len(),
            notified,
            "role defaults replaced"
        );
        Ok(())
    }

    /// Replace every override entry of a user; an empty override clears them
    pub async fn replace_user_override(&self, overrides: &UserPermissionOverride) -> Result<(), StoreError> {
        let now = Utc::now();
        let user_id = overrides.user_id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM user_permission_overrides WHERE user_id = ?")
            .bind(&user_id)
            .execute(&mut *tx)
            .await?;

        for (key, granted) in &overrides.entries {
            sqlx::query(
                "INSERT INTO user_permission_overrides (user_id, module, action, granted, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&user_id)
            .bind(key.module.as_str())
            .bind(key.action.as_str())
            .bind(*granted)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.subscriptions.notify_user(overrides.user_id);
        tracing::info!(user_id = %overrides.user_id, entries = overrides.entries.len(), "user overrides replaced");
        Ok(())
    }

    pub async fn set_override_entry(
        &self,
        user_id: Uuid,
        key: PermissionKey,
        granted: bool,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_permission_overrides (user_id, module, action, granted, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (user_id, module, action) DO UPDATE SET granted = excluded.granted, updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id.to_string())
        .bind(key.module.as_str())
        .bind(key.action.as_str())
        .bind(granted)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.subscriptions.notify_user(user_id);
        Ok(())
    }

    pub async fn clear_user_override(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM user_permission_overrides WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;

        self.subscriptions.notify_user(user_id);
        Ok(result.rows_affected())
    }

    /// Tell a user's subscribers their records changed (e.g. after a role reassignment)
    pub fn notify_user_changed(&self, user_id: Uuid) -> usize {
        self.subscriptions.notify_user(user_id)
    }

    /// Insert builtin defaults for every role that was never seeded nor
    /// configured. Returns the roles that were seeded.
    pub async fn seed_builtin_defaults(&self) -> Result<Vec<Role>, StoreError> {
        let mut seeded = Vec::new();
        for role in Role::ALL {
            let mut tx = self.pool.begin().await?;
            let marked = sqlx::query("INSERT OR IGNORE INTO role_seeds (role, seeded_at) VALUES (?, ?)")
                .bind(role.as_str())
                .bind(Utc::now())
                .execute(&mut *tx)
                .await?;
            if marked.rows_affected() == 0 {
                continue;
            }

            write_role_grants(&mut tx, &builtin_role_defaults(role)).await?;
            tx.commit().await?;
            seeded.push(role);
        }

        for role in &seeded {
            self.notify_role_holders(*role).await;
        }
        Ok(seeded)
    }

    /// Best effort: the grants are already committed when this runs, so a
    /// failed lookup is logged and nobody is notified.
    async fn notify_role_holders(&self, role: Role) -> usize {
        match self.users_with_role(role).await {
            Ok(members) => self.subscriptions.notify_users(&members),
            Err(err) => {
                tracing::warn!(role = %role, error = %err, "could not list role holders, subscribers not notified");
                0
            }
        }
    }

    async fn users_with_role(&self, role: Role) -> Result<Vec<Uuid>, StoreError> {
        let rows = sqlx::query("SELECT id FROM users WHERE role = ?")
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                Uuid::parse_str(&id).map_err(|e| StoreError::Malformed(format!("invalid user id: {}", e)))
            })
            .collect()
    }
}

async fn write_role_grants(
    tx: &mut Transaction<'_, Sqlite>,
    defaults: &RolePermissionSet,
) -> Result<(), StoreError> {
    let now = Utc::now();
    let role = defaults.role.as_str();

    sqlx::query("DELETE FROM role_permissions WHERE role = ?")
        .bind(role)
        .execute(&mut **tx)
        .await?;

    for key in &defaults.grants {
        sqlx::query("INSERT INTO role_permissions (role, module, action, created_at) VALUES (?, ?, ?, ?)")
            .bind(role)
            .bind(key.module.as_str())
            .bind(key.action.as_str())
            .bind(now)
            .execute(&mut **tx)
            .await?;
    }

    sqlx::query("INSERT OR IGNORE INTO role_seeds (role, seeded_at) VALUES (?, ?)")
        .bind(role)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl PermissionStore for SqlitePermissionStore {
    async fn fetch_role_defaults(&self, role: Role) -> Result<Option<RolePermissionSet>, StoreError> {
        let rows = sqlx::query("SELECT module, action FROM role_permissions WHERE role = ?")
            .bind(role.as_str())
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let grants = rows.iter().map(key_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Some(RolePermissionSet::new(role, grants)))
    }

    async fn fetch_user_overrides(
        &self,
        user_id: Uuid,
    ) -> Result<Option<UserPermissionOverride>, StoreError> {
        let rows = sqlx::query(
            "SELECT module, action, granted FROM user_permission_overrides WHERE user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut entries = BTreeMap::new();
        for row in &rows {
            let granted: bool = row
                .try_get("granted")
                .map_err(|e| StoreError::Malformed(format!("missing granted: {}", e)))?;
            entries.insert(key_from_row(row)?, granted);
        }

        Ok(Some(UserPermissionOverride { user_id, entries }))
    }

    fn subscribe(&self, user_id: Uuid, on_change: ChangeCallback) -> SubscriptionHandle {
        self.subscriptions.subscribe(user_id, on_change)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.subscriptions.unsubscribe(handle);
    }
}
