//! Database layer: migrations and the upload ledger.

use std::str::FromStr;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;

use crate::errors::Result;

/// One pinned image, as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct UploadRecord {
    pub id: i64,
    pub cid: String,
    pub name: String,
    pub size: i64,
    pub content_type: String,
    /// Unix seconds
    pub uploaded_at: i64,
}

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    connect(database_url, 5).await
}

pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };
    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Uploads
// ─────────────────────────────────────────────────────────

pub async fn insert_upload(
    pool: &SqlitePool,
    cid: &str,
    name: &str,
    size: i64,
    content_type: &str,
    uploaded_at: i64,
) -> Result<i64> {
    let id = sqlx::query(
        r#"
        INSERT INTO uploads (cid, name, size, content_type, uploaded_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(cid)
    .bind(name)
    .bind(size)
    .bind(content_type)
    .bind(uploaded_at)
    .execute(pool)
    .await?
    .last_insert_rowid();
    Ok(id)
}

/// Most recent uploads first.
pub async fn recent_uploads(pool: &SqlitePool, limit: i64) -> Result<Vec<UploadRecord>> {
    let rows = sqlx::query_as::<_, UploadRecord>(
        r#"
        SELECT id, cid, name, size, content_type, uploaded_at
        FROM   uploads
        ORDER  BY uploaded_at DESC, id DESC
        LIMIT  ?1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
