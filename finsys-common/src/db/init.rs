//! Database initialization
//!
//! The relational store is created on first run with its default schema,
//! then brought up to date by the versioned migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default busy timeout applied to every connection, in milliseconds
///
/// A report write holds the relational writer for up to the document-store
/// timeout, so scoring writes must be willing to wait longer than that.
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;

/// Open (creating if needed) a SQLite database file with WAL enabled
///
/// Shared by the relational store and the SQLite-backed document store so
/// both get the same connection discipline. Pragmas are set through the
/// connect options so that every pooled connection carries them.
pub async fn open_sqlite_pool(
    db_path: &Path,
    max_connections: u32,
    busy_timeout: Duration,
) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        // WAL allows concurrent readers with one writer
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(busy_timeout)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Initialize the relational store and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)).await
}

/// [`init_database`] with an explicit busy timeout
pub async fn init_database_with(db_path: &Path, busy_timeout: Duration) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    let pool = open_sqlite_pool(db_path, 10, busy_timeout).await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables (idempotent) and run pending migrations
///
/// Split out from [`init_database`] so tests can apply the schema to an
/// already-open pool.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_transactions_table(pool).await?;
    create_fraud_reports_table(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;

    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_transactions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            type TEXT NOT NULL,
            amount REAL NOT NULL CHECK (amount >= 0),
            name_orig TEXT NOT NULL,
            old_balance_orig REAL NOT NULL,
            new_balance_orig REAL NOT NULL,
            name_dest TEXT NOT NULL,
            old_balance_dest REAL NOT NULL,
            new_balance_dest REAL NOT NULL,
            is_fraud INTEGER NOT NULL DEFAULT 0,
            fraud_probability REAL NOT NULL DEFAULT 0,
            is_deleted INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_type ON transactions(type)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_created_at ON transactions(created_at)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_name_orig ON transactions(name_orig)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_transactions_name_dest ON transactions(name_dest)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Report metadata only; bodies live in the document store
async fn create_fraud_reports_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS fraud_reports (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            transaction_id INTEGER NOT NULL REFERENCES transactions(id),
            generated_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            deleted_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_fraud_reports_generated_at ON fraud_reports(generated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
