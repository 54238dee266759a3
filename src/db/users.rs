use sqlx::SqlitePool;
use uuid::Uuid;

use crate::authz::Role;
use crate::errors::AppResult;
use crate::models::user::DbUser;
use crate::utils::utc_now;

use super::row_parsers::db_user_from_row;

const USER_COLUMNS: &str = "id, name, email, password_hash, role, created_at, updated_at, deleted_at";

pub async fn find_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(db_user_from_row).transpose()
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {} FROM users WHERE email = ? AND deleted_at IS NULL", USER_COLUMNS);
    let row = sqlx::query(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(db_user_from_row).transpose()
}

pub async fn email_taken(pool: &SqlitePool, email: &str) -> AppResult<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE email = ? AND deleted_at IS NULL")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

pub async fn insert(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> AppResult<Uuid> {
    let user_id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id.to_string())
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(user_id)
}

/// Returns false when no live user has that id
pub async fn update_role(pool: &SqlitePool, user_id: Uuid, role: Role) -> AppResult<bool> {
    let result = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL")
        .bind(role.as_str())
        .bind(utc_now())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
