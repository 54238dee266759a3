use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use steward::authz::{
    builtin_role_defaults, Action, ClickEvent, ControlEvent, Emphasis, GateOutcome, GatedControl, Module,
    PermissionCache, PermissionKey, PermissionResolver, PermissionSession, PermissionStore, Role, RolePermissionSet,
    SessionUser, SqlitePermissionStore, UserPermissionOverride,
};
use steward::db::users;
use steward::events::{append_audit_event, verify_audit_chain};

async fn setup() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test_store.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;
    Ok((dir, pool))
}

#[tokio::test]
async fn seeding_fills_only_missing_roles() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = SqlitePermissionStore::new(pool.clone());

    let custom = RolePermissionSet::new(Role::Viewer, [PermissionKey::new(Module::Blog, Action::View)]);
    store.replace_role_defaults(&custom).await?;

    let seeded = store.seed_builtin_defaults().await?;
    assert_eq!(seeded.len(), Role::ALL.len() - 1);
    assert!(!seeded.contains(&Role::Viewer));

    // Existing records are left alone
    assert_eq!(store.fetch_role_defaults(Role::Viewer).await?, Some(custom));
    assert_eq!(
        store.fetch_role_defaults(Role::Member).await?,
        Some(builtin_role_defaults(Role::Member))
    );

    assert!(store.seed_builtin_defaults().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn emptied_role_is_not_reseeded() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = SqlitePermissionStore::new(pool.clone());
    assert_eq!(store.seed_builtin_defaults().await?.len(), Role::ALL.len());

    // An administrator revokes everything from viewers
    store.replace_role_defaults(&RolePermissionSet::empty(Role::Viewer)).await?;
    assert_eq!(store.fetch_role_defaults(Role::Viewer).await?, None);

    // Next startup seeds again
    assert!(store.seed_builtin_defaults().await?.is_empty());
    assert_eq!(store.fetch_role_defaults(Role::Viewer).await?, None);

    let user_id = users::insert(&pool, "Vic Viewer", "vic@example.com", "x", Role::Viewer).await?;
    let resolver = PermissionResolver::new(Arc::new(store), Arc::new(PermissionCache::new()));
    assert!(resolver.resolve(user_id, Role::Viewer).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn role_edit_survives_failed_holder_lookup() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = SqlitePermissionStore::new(pool.clone());

    // Holder lookup reads `users`; without it the grants must still commit
    sqlx::query("DROP TABLE users").execute(&pool).await?;

    let defaults = RolePermissionSet::new(Role::Member, [PermissionKey::new(Module::Events, Action::Create)]);
    store.replace_role_defaults(&defaults).await?;
    assert_eq!(store.fetch_role_defaults(Role::Member).await?, Some(defaults));

    let seeded = store.seed_builtin_defaults().await?;
    assert!(!seeded.contains(&Role::Member));
    assert_eq!(seeded.len(), Role::ALL.len() - 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_audit_appends_keep_one_chain() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = Arc::new(SqlitePermissionStore::new(pool.clone()));
    let user_id = users::insert(&pool, "Olu", "olu@example.com", "x", Role::Member).await?;

    let mut appends = Vec::new();
    let mut writes = Vec::new();
    for i in 0..50 {
        let pool = pool.clone();
        appends.push(tokio::spawn(async move {
            let event = json!({
                "name": "role_permissions.replaced",
                "occurred_at": chrono::Utc::now().to_rfc3339(),
                "payload": { "seq": i, "severity": "important" },
            });
            append_audit_event(&pool, &event).await
        }));

        // Other writers on the same database in between
        let store = Arc::clone(&store);
        writes.push(tokio::spawn(async move {
            store
                .set_override_entry(user_id, PermissionKey::new(Module::Finance, Action::View), i % 2 == 0)
                .await
        }));
    }

    for task in appends {
        task.await??;
    }
    for task in writes {
        task.await??;
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM permission_audit").fetch_one(&pool).await?;
    assert_eq!(count, 50);
    assert_eq!(verify_audit_chain(&pool).await?, Ok(50));
    Ok(())
}

#[tokio::test]
async fn overrides_round_trip() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = SqlitePermissionStore::new(pool.clone());
    let user_id = users::insert(&pool, "Olu", "olu@example.com", "x", Role::Member).await?;

    assert_eq!(store.fetch_user_overrides(user_id).await?, None);

    let overrides = UserPermissionOverride::new(user_id)
        .grant(Module::Finance, Action::Export)
        .revoke(Module::Events, Action::View);
    store.replace_user_override(&overrides).await?;
    assert_eq!(store.fetch_user_overrides(user_id).await?, Some(overrides));

    store
        .set_override_entry(user_id, PermissionKey::new(Module::Finance, Action::Export), false)
        .await?;
    let stored = store.fetch_user_overrides(user_id).await?.context("overrides missing")?;
    assert_eq!(stored.entries.get(&PermissionKey::new(Module::Finance, Action::Export)), Some(&false));
    assert_eq!(stored.entries.len(), 2);

    assert_eq!(store.clear_user_override(user_id).await?, 2);
    assert_eq!(store.fetch_user_overrides(user_id).await?, None);
    Ok(())
}

#[tokio::test]
async fn role_edit_notifies_only_holders_of_the_role() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = SqlitePermissionStore::new(pool.clone());
    store.seed_builtin_defaults().await?;

    let leader = users::insert(&pool, "Lee", "lee@example.com", "x", Role::Leader).await?;
    let viewer = users::insert(&pool, "Vic", "vic@example.com", "x", Role::Viewer).await?;

    let leader_calls = Arc::new(AtomicUsize::new(0));
    let viewer_calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&leader_calls);
        store.subscribe(leader, Arc::new(move |_: Uuid| {
            calls.fetch_add(1, Ordering::SeqCst);
        }));
    }
    let viewer_handle = {
        let calls = Arc::clone(&viewer_calls);
        store.subscribe(viewer, Arc::new(move |_: Uuid| {
            calls.fetch_add(1, Ordering::SeqCst);
        }))
    };

    let mut defaults = builtin_role_defaults(Role::Leader);
    defaults.grants.insert(PermissionKey::new(Module::Projects, Action::Update));
    store.replace_role_defaults(&defaults).await?;

    assert_eq!(leader_calls.load(Ordering::SeqCst), 1);
    assert_eq!(viewer_calls.load(Ordering::SeqCst), 0);

    store.unsubscribe(viewer_handle);
    store.clear_user_override(viewer).await?;
    assert_eq!(viewer_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn session_over_sqlite_follows_overrides_and_gates_controls() -> Result<()> {
    let (_dir, pool) = setup().await?;
    let store = Arc::new(SqlitePermissionStore::new(pool.clone()));
    store.seed_builtin_defaults().await?;
    let user_id = users::insert(&pool, "Mia", "mia@example.com", "x", Role::Member).await?;

    let resolver = Arc::new(PermissionResolver::new(store.clone(), Arc::new(PermissionCache::new())));
    let session = PermissionSession::new(resolver);
    session.set_user(Some(SessionUser::new(user_id, Role::Member)));
    session.wait_ready().await;

    let publish = GatedControl::new(Module::Blog, Action::Create);
    assert_eq!(publish.emphasis(&session), Emphasis::Reduced);

    let mut event = ClickEvent::new();
    let outcome = publish.activate(&session, &mut event, |_| "published");
    match outcome {
        GateOutcome::DeniedDialog(dialog) => {
            assert_eq!(dialog.message, "You do not have permission to create in Blog.");
        }
        other => panic!("expected a denial dialog, got {:?}", other),
    }
    assert!(event.propagation_stopped());

    // The store notifies the session, which reloads on its own
    store
        .set_override_entry(user_id, PermissionKey::new(Module::Blog, Action::Create), true)
        .await?;
    assert!(session.loading());
    session.wait_ready().await;

    assert_eq!(publish.emphasis(&session), Emphasis::Normal);
    let mut event = ClickEvent::new();
    assert_eq!(publish.activate(&session, &mut event, |_| "published"), GateOutcome::Executed("published"));
    assert!(!event.propagation_stopped());
    Ok(())
}
