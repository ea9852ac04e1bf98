//! Startup helpers: database connection, migrations and the shared
//! notification store.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::config::Config;
use crate::services::store::{NotificationStore, SqliteNotificationStore};

/// Redact potentially sensitive information from a database URL before logging.
///
/// Attempts to parse the URL and remove userinfo (username:password) components.
/// Falls back to removing everything before '@' or returning "(redacted)".
pub fn redact_db_url(db_url: &str) -> String {
    if let Ok(url) = url::Url::parse(db_url) {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        let port_part = url.port().map(|p| format!(":{}", p)).unwrap_or_default();
        let path = url.path();
        format!("{}://{}{}{}", scheme, host, port_part, path)
    } else {
        if let Some(at_pos) = db_url.find('@') {
            let without_creds = &db_url[at_pos + 1..];
            return format!("(redacted){}", without_creds);
        }
        "(redacted)".to_string()
    }
}

/// Initialize SQLite database connection and run migrations.
///
/// Creates the parent directory for the database file (if applicable),
/// opens a connection pool using `create_if_missing(true)` and runs migrations.
pub async fn init_db(config: &Config) -> Result<sqlx::SqlitePool> {
    let db_url = &config.database.url;
    tracing::info!("Connecting to database: {}", redact_db_url(db_url));

    // Extract the file path from the database URL
    let db_path = db_url.strip_prefix("sqlite://").unwrap_or(db_url);
    let db_file_path = Path::new(db_path);

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_file_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )
            })?;
            tracing::info!(
                "Database directory created or already exists: {}",
                parent.display()
            );
        }
    }

    let connect_options = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true);

    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(connect_options)
        .await?;

    // Log successful database file creation or connection
    if db_file_path.exists() {
        tracing::info!(
            "Successfully connected to database file: {}",
            db_file_path.display()
        );
    } else {
        tracing::info!(
            "Database file created successfully: {}",
            db_file_path.display()
        );
    }

    tracing::info!("Running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Build the store every dashboard view subscribes to.
pub fn init_store(pool: sqlx::SqlitePool, config: &Config) -> Arc<dyn NotificationStore> {
    tracing::info!(
        "Notification feed channel capacity: {}",
        config.feed.channel_capacity
    );
    Arc::new(SqliteNotificationStore::new(pool, config.feed.channel_capacity))
}

/// A migrated in-memory database. The pool keeps its single connection
/// alive so the database is not dropped between queries.
#[cfg(test)]
pub async fn memory_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Application state backed by an in-memory database.
#[cfg(test)]
pub async fn test_state() -> Arc<crate::AppState> {
    let config = Config::default();
    let db = memory_pool().await;
    let store = init_store(db.clone(), &config);
    Arc::new(crate::AppState {
        db,
        config,
        store,
        views: crate::services::views::ViewRegistry::new(),
    })
}
