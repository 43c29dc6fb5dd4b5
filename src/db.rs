use anyhow::Result;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbErr, SqlErr, Statement};
use sqlx::postgres::PgPoolOptions;
use std::path::PathBuf;
use tokio::fs;

pub type DbPool = sqlx::PgPool;
pub type OrmConn = DatabaseConnection;

/// Create the raw sqlx pool used for best-effort writes and seeding.
pub async fn create_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Create a SeaORM connection.
pub async fn create_orm_conn(database_url: &str) -> Result<DatabaseConnection> {
    let conn = Database::connect(database_url).await?;
    Ok(conn)
}

/// Minimal migration runner that executes SQL files in `migrations/` in filename order.
///
/// Every statement in those files must be idempotent (`IF NOT EXISTS`), the runner
/// keeps no bookkeeping table and replays everything on each start.
pub async fn run_migrations(conn: &DatabaseConnection) -> Result<()> {
    let mut entries = fs::read_dir("migrations").await?;
    let mut files: Vec<PathBuf> = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "sql") {
            files.push(path);
        }
    }
    files.sort();

    let backend = conn.get_database_backend();
    for file in files {
        let sql = fs::read_to_string(&file).await?;
        // Postgres prepared statements cannot contain multiple commands,
        // so split the migration file and run each statement individually.
        for stmt in split_statements(&sql) {
            let statement = format!("{stmt};");
            conn.execute(Statement::from_string(backend, statement))
                .await?;
        }
        tracing::debug!(file = %file.display(), "migration applied");
    }

    Ok(())
}

/// Splits a migration file into statements. Full-line `--` comments are
/// dropped before splitting so a `;` inside a comment cannot cut a statement.
pub(crate) fn split_statements(sql: &str) -> Vec<String> {
    let code = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");
    code.split(';')
        .map(str::trim)
        .filter(|stmt| !stmt.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when `err` is a unique-constraint violation. With `constraint`, the
/// violated index or column name must also appear in the driver message.
pub fn is_unique_violation(err: &DbErr, constraint: Option<&str>) -> bool {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            constraint.is_none_or(|name| message.contains(name))
        }
        _ => false,
    }
}
