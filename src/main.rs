use steward::authz::SqlitePermissionStore;
use steward::config::{load_env, AppConfig};
use steward::{create_app, db, docs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let config = AppConfig::from_env()?;
    let pool = db::init(&config.database_url).await?;

    if config.seed_role_defaults {
        let seeded = SqlitePermissionStore::new(pool.clone()).seed_builtin_defaults().await?;
        if !seeded.is_empty() {
            let roles: Vec<&str> = seeded.iter().map(|role| role.as_str()).collect();
            tracing::info!(roles = ?roles, "seeded builtin role defaults");
        }
    }

    let openapi = docs::build_openapi(config.port)?;
    let app = create_app(pool).await?.merge(docs::swagger_routes(openapi));

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);
    tracing::info!("swagger ui available at http://localhost:{}/docs", config.port);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
