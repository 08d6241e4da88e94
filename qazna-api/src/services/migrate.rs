//! Ordered, transactional, idempotent SQL migration and seed runner.
//!
//! Migrations are `.up.sql`/`.down.sql` pairs applied in filename order,
//! one transaction per file, with bookkeeping rows committed after each
//! successful apply. Seeds work the same way against their own table.
//!
//! The statement splitter understands single-quoted strings only; `;`
//! inside dollar-quoted bodies is not supported. Keep function bodies in
//! migrations free of internal semicolons.

use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_MIGRATIONS_TABLE: &str = "schema_migrations";
pub const DEFAULT_SEEDS_TABLE: &str = "schema_seeds";

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("read {file}: {source}")]
    Read {
        file: String,
        #[source]
        source: std::io::Error,
    },

    #[error("apply {file}: {source}")]
    Apply {
        file: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("missing down migration for {0}")]
    MissingDown(String),

    #[error("no migrations applied")]
    NothingApplied,

    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

pub struct Runner {
    pool: PgPool,
    migrations_dir: PathBuf,
    seeds_dir: PathBuf,
    migrations_table: String,
    seeds_table: String,
}

impl Runner {
    pub fn new(pool: PgPool, migrations_dir: impl Into<PathBuf>, seeds_dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            migrations_dir: migrations_dir.into(),
            seeds_dir: seeds_dir.into(),
            migrations_table: DEFAULT_MIGRATIONS_TABLE.to_string(),
            seeds_table: DEFAULT_SEEDS_TABLE.to_string(),
        }
    }

    /// Apply all pending migrations in filename order, commit-per-migration.
    pub async fn up(&self) -> Result<(), MigrateError> {
        self.ensure_tables().await?;
        let executed = self.executed(&self.migrations_table).await?;
        for file in collect_sql(&self.migrations_dir, ".up.sql")? {
            if executed.contains(&file.name) {
                continue;
            }
            self.apply_file(&file).await?;
            self.insert_record(&self.migrations_table, &file.name).await?;
            tracing::info!(migration = %file.name, "migration applied");
        }
        Ok(())
    }

    /// Roll back exactly the most recently applied migration.
    pub async fn down(&self) -> Result<(), MigrateError> {
        self.ensure_tables().await?;
        let history = self.history(&self.migrations_table).await?;
        let last = history.last().ok_or(MigrateError::NothingApplied)?;

        let down_name = last.trim_end_matches(".up.sql").to_string() + ".down.sql";
        let down_path = self.migrations_dir.join(&down_name);
        if !down_path.exists() {
            return Err(MigrateError::MissingDown(last.clone()));
        }

        self.apply_file(&SqlFile { name: down_name, path: down_path }).await?;
        sqlx::query(&format!("DELETE FROM {} WHERE name = $1", self.migrations_table))
            .bind(last)
            .execute(&self.pool)
            .await?;
        tracing::info!(migration = %last, "migration rolled back");
        Ok(())
    }

    /// Apply pending seed files; idempotent by name.
    pub async fn seed(&self) -> Result<(), MigrateError> {
        self.ensure_tables().await?;
        let executed = self.executed(&self.seeds_table).await?;
        for file in collect_sql(&self.seeds_dir, ".sql")? {
            if executed.contains(&file.name) {
                continue;
            }
            self.apply_file(&file).await?;
            self.insert_record(&self.seeds_table, &file.name).await?;
            tracing::info!(seed = %file.name, "seed applied");
        }
        Ok(())
    }

    /// Ordered names of applied migrations.
    pub async fn status(&self) -> Result<Vec<String>, MigrateError> {
        self.ensure_tables().await?;
        self.history(&self.migrations_table).await
    }

    async fn ensure_tables(&self) -> Result<(), MigrateError> {
        for table in [&self.migrations_table, &self.seeds_table] {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     name text PRIMARY KEY,
                     applied_at timestamptz NOT NULL DEFAULT now()
                 )"
            ))
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn apply_file(&self, file: &SqlFile) -> Result<(), MigrateError> {
        let sql = std::fs::read_to_string(&file.path)
            .map_err(|source| MigrateError::Read { file: file.name.clone(), source })?;

        let mut tx = self.pool.begin().await?;
        for statement in split_statements(&sql) {
            if statement.trim().is_empty() {
                continue;
            }
            sqlx::query(&statement).execute(&mut *tx).await.map_err(|source| {
                MigrateError::Apply { file: file.name.clone(), source }
            })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn insert_record(&self, table: &str, name: &str) -> Result<(), MigrateError> {
        sqlx::query(&format!("INSERT INTO {table} (name, applied_at) VALUES ($1, $2)"))
            .bind(name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn executed(&self, table: &str) -> Result<HashSet<String>, MigrateError> {
        let rows = sqlx::query(&format!("SELECT name FROM {table}")).fetch_all(&self.pool).await?;
        let mut names = HashSet::with_capacity(rows.len());
        for row in rows {
            names.insert(row.try_get("name")?);
        }
        Ok(names)
    }

    async fn history(&self, table: &str) -> Result<Vec<String>, MigrateError> {
        let rows = sqlx::query(&format!("SELECT name FROM {table} ORDER BY applied_at ASC"))
            .fetch_all(&self.pool)
            .await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in rows {
            names.push(row.try_get("name")?);
        }
        Ok(names)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SqlFile {
    name: String,
    path: PathBuf,
}

fn collect_sql(dir: &Path, suffix: &str) -> Result<Vec<SqlFile>, MigrateError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(MigrateError::Read { file: dir.display().to_string(), source })
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|source| MigrateError::Read { file: dir.display().to_string(), source })?;
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.ends_with(suffix) {
            continue;
        }
        files.push(SqlFile { name, path: entry.path() });
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Split SQL into top-level statements on `;`, respecting single-quoted
/// strings. Dollar-quoted bodies are not understood.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut in_string = false;

    for c in sql.chars() {
        match c {
            '\'' => {
                current.push(c);
                in_string = !in_string;
            }
            ';' if !in_string => {
                current.push(c);
                statements.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        statements.push(current);
    }
    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn splits_top_level_statements() {
        let sql = "CREATE TABLE a (id text);\nINSERT INTO a VALUES ('x');";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("CREATE TABLE"));
    }

    #[test]
    fn semicolons_inside_strings_are_preserved() {
        let sql = "INSERT INTO t VALUES ('a;b');INSERT INTO t VALUES ('c')";
        let statements = split_statements(sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("'a;b'"));
    }

    #[test]
    fn trailing_statement_without_semicolon_is_kept() {
        let statements = split_statements("SELECT 1");
        assert_eq!(statements.len(), 1);
        assert!(split_statements("   \n ").is_empty());
    }

    #[test]
    fn collects_files_sorted_by_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("0002_roles.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0001_accounts.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("0001_accounts.down.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("README.md"), "not sql").unwrap();

        let files = collect_sql(dir.path(), ".up.sql").unwrap();
        let names: Vec<_> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["0001_accounts.up.sql", "0002_roles.up.sql"]);
    }

    #[test]
    fn missing_directory_is_a_noop() {
        let files = collect_sql(Path::new("/nonexistent/migrations"), ".up.sql").unwrap();
        assert!(files.is_empty());
    }
}
