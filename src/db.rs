//! SQLite setup for the video catalog.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{fs, path::Path, str::FromStr};
use tracing::{debug, info};

pub const MIGRATION_PATH: &str = "migrations/0001_init.sql";

#[cfg(test)]
pub const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open the pool, creating the database file (and its directory) if needed.
pub async fn connect(database_url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("parsing database url `{}`", database_url))?
        .create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            info!("Created missing directory {:?}", parent);
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", database_url))?;
    Ok(pool)
}

/// Run the migration file at `path` statement by statement.
pub async fn run_migrations(db: &SqlitePool, path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Migration file not found: {}", path.display());
    }
    let sql = fs::read_to_string(path)?;
    let applied = apply_sql(db, &sql).await?;
    info!("Applied {} migration statements", applied);
    Ok(())
}

/// Execute each `;`-separated statement of `sql`. Returns how many ran.
pub async fn apply_sql(db: &SqlitePool, sql: &str) -> Result<usize, sqlx::Error> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    for stmt in &statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }
    Ok(statements.len())
}
