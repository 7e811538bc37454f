//! Initialization helpers for the application:
//! - database connection + migrations
//! - bootstrap administrator account
//!
//! Keeps startup wiring out of `main.rs`.

use std::{path::Path, sync::Arc};

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::config::Config;
use crate::db::{CreateUser, UserRepository, UserRole};
use crate::services::auth::AuthService;
use crate::AppState;

/// Database URL safe for logs: userinfo and query string are dropped.
/// Strings that are not URLs keep only what follows the last '@'.
pub fn redact_db_url(db_url: &str) -> String {
    match url::Url::parse(db_url) {
        Ok(url) => {
            let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
            format!(
                "{}://{}{}{}",
                url.scheme(),
                url.host_str().unwrap_or(""),
                port,
                url.path()
            )
        }
        Err(_) => match db_url.rsplit_once('@') {
            Some((_, rest)) => format!("(redacted){}", rest),
            None => "(redacted)".to_string(),
        },
    }
}

/// Pool settings for `sqlite::memory:`. The database lives only as long as
/// its connection, so the pool keeps exactly one and never retires it.
pub fn memory_pool_options() -> SqlitePoolOptions {
    SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
}

/// Open the SQLite pool and run migrations.
///
/// For file databases the parent directory is created first and the file is
/// created if missing. `sqlite::memory:` is supported for throwaway runs.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    let pool = if db_url.starts_with("sqlite::memory:") {
        memory_pool_options().connect(db_url).await?
    } else {
        let db_path = db_url
            .strip_prefix("sqlite://")
            .or_else(|| db_url.strip_prefix("sqlite:"))
            .unwrap_or(db_url);
        let db_file_path = Path::new(db_path);

        if let Some(parent) = db_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    )
                })?;
            }
        }

        let existed = db_file_path.exists();
        let connect_options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect_with(connect_options)
            .await?;

        if existed {
            tracing::info!("Connected to database file: {}", db_file_path.display());
        } else {
            tracing::info!("Database file created: {}", db_file_path.display());
        }
        pool
    };

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Create the configured administrator account on first start.
///
/// Accounts can only be promoted by an administrator, so a fresh database
/// needs one seeded from `ADMIN_EMAIL` / `ADMIN_PASSWORD`. Does nothing when
/// either is unset or the account already exists.
pub async fn ensure_bootstrap_admin(state: &Arc<AppState>) -> Result<()> {
    let (Some(email), Some(password)) = (
        state.config.admin.email.as_deref(),
        state.config.admin.password.as_deref(),
    ) else {
        return Ok(());
    };

    if UserRepository::find_by_email(&state.db, email).await?.is_some() {
        tracing::debug!("Bootstrap administrator already exists");
        return Ok(());
    }

    let password_hash = AuthService::hash_password(state, password)?;
    let admin = UserRepository::create(
        &state.db,
        CreateUser {
            email: email.to_string(),
            password_hash,
            role: UserRole::Admin,
            first_name: "Academy".to_string(),
            last_name: "Administrator".to_string(),
            phone: None,
        },
    )
    .await?;

    tracing::info!("Created bootstrap administrator {}", admin.id);
    Ok(())
}
