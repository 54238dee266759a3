use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use steward::authz::{PermissionCache, PermissionResolver, PermissionSession, Role, SessionUser, SqlitePermissionStore};
use steward::config::load_env;
use steward::db::users;
use steward::events::verify_audit_chain;
use steward::utils::normalize_email;

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Parser, Debug)]
#[command(author, version, about = "steward administration tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Insert builtin defaults for roles that have no records
    SeedDefaults,
    /// Assign a role to the user with the given email
    SetRole {
        #[arg(long)]
        email: String,
        #[arg(long)]
        role: Role,
    },
    /// Print the resolved permissions of the user with the given email
    Resolve {
        #[arg(long)]
        email: String,
    },
    /// Check the hash chain of the permission audit trail
    AuditVerify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    let cli = Cli::parse();
    let pool = get_pool().await?;

    match cli.command {
        Commands::MigrateRun => {
            MIGRATOR.run(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            print_status(&pool).await?;
        }
        Commands::SeedDefaults => {
            MIGRATOR.run(&pool).await?;
            let seeded = SqlitePermissionStore::new(pool).seed_builtin_defaults().await?;
            if seeded.is_empty() {
                println!("Every role already has defaults");
            }
            for role in seeded {
                println!("seeded {}", role);
            }
        }
        Commands::SetRole { email, role } => {
            let user = users::find_by_email(&pool, &normalize_email(&email))
                .await?
                .with_context(|| format!("no user with email {}", email))?;
            users::update_role(&pool, user.id, role).await?;
            println!("{} : {} -> {}", user.email, user.role, role);
        }
        Commands::Resolve { email } => {
            let user = users::find_by_email(&pool, &normalize_email(&email))
                .await?
                .with_context(|| format!("no user with email {}", email))?;
            resolve(pool, SessionUser::new(user.id, user.role)).await?;
        }
        Commands::AuditVerify => match verify_audit_chain(&pool).await? {
            Ok(count) => println!("audit chain intact ({} entries)", count),
            Err(id) => anyhow::bail!("audit chain broken at entry {}", id),
        },
    }

    Ok(())
}

async fn resolve(pool: SqlitePool, user: SessionUser) -> anyhow::Result<()> {
    let store = Arc::new(SqlitePermissionStore::new(pool));
    let resolver = Arc::new(PermissionResolver::new(store, Arc::new(PermissionCache::new())));
    let session = PermissionSession::new(resolver);

    session.set_user(Some(user));
    session.wait_ready().await;

    let state = session.state();
    let map = state.permissions().context("session has no permissions loaded")?;
    println!("{} ({})", user.user_id, user.role);
    if map.is_empty() {
        println!("  no permissions");
    }
    for key in map.granted() {
        println!("  {}", key);
    }
    Ok(())
}

async fn get_pool() -> anyhow::Result<SqlitePool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    let options = SqliteConnectOptions::from_str(&database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .context("failed to connect to database")
}

async fn print_status(pool: &SqlitePool) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let table: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if table.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in MIGRATOR.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}
