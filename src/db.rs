//! Database module - SQLite connection and schema

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::models::swipe::{FEATURE_COLUMNS, USER_ID_COLUMN};

/// Create database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    Ok(pool)
}

/// Apply the schema (idempotent)
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    create_userinfo_table(pool).await?;
    create_swipefeatures_table(pool).await?;

    tracing::info!("Database schema applied successfully");
    Ok(())
}

async fn create_userinfo_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS userinfo (
            userID INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            passwordHash TEXT NOT NULL,
            deviceID TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_swipefeatures_table(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Feature columns come from the fixed schema so the table always
    // matches the classifier's vector ordering.
    let feature_cols = FEATURE_COLUMNS
        .iter()
        .map(|col| format!("{col} REAL NOT NULL"))
        .collect::<Vec<_>>()
        .join(",\n            ");

    let sql = format!(
        r#"
        CREATE TABLE IF NOT EXISTS swipefeatures (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            {USER_ID_COLUMN} INTEGER NOT NULL,
            {feature_cols},
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#
    );

    sqlx::query(&sql).execute(pool).await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_swipefeatures_user ON swipefeatures(userID)")
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    run_migrations(&pool).await.expect("migrations");
    pool
}
