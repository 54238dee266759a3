use crate::errors::AppError;

const DEFAULT_PORT: u16 = 8000;

/// Process configuration, read from the environment (after `.env` is loaded)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub port: u16,
    /// Insert builtin role defaults at startup for roles without records
    pub seed_role_defaults: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url =
            std::env::var("DATABASE_URL").map_err(|_| AppError::configuration("DATABASE_URL not set"))?;

        let port = match std::env::var("APP_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .map_err(|_| AppError::configuration("APP_PORT must be a valid port number"))?,
            Err(_) => DEFAULT_PORT,
        };

        let seed_role_defaults = std::env::var("SEED_ROLE_DEFAULTS")
            .map(|value| parse_flag(&value))
            .unwrap_or(Ok(true))
            .map_err(|_| AppError::configuration("SEED_ROLE_DEFAULTS must be true or false"))?;

        Ok(Self {
            database_url,
            port,
            seed_role_defaults,
        })
    }
}

fn parse_flag(value: &str) -> Result<bool, ()> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(()),
    }
}

/// Load `.env` from the working directory, falling back to the crate directory
pub fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}
