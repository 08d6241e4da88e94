//! Persistence: PostgreSQL stores and their in-memory doubles.

pub mod memory;
pub mod pg;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use qazna_core::error::AppError;

/// Connection-pool wrapper. The pool sizing is part of the latency
/// contract: max-open 50, max-idle 25, max-lifetime 15 min, max-idle-time
/// 5 min.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(dsn: &str) -> Result<Self, AppError> {
        tracing::info!("connecting to PostgreSQL");
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .min_connections(25)
            .max_lifetime(Duration::from_secs(15 * 60))
            .idle_timeout(Duration::from_secs(5 * 60))
            .connect(dsn)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("connect: {e}")))?;
        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(anyhow::anyhow!("health check: {e}")))?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Map a sqlx error onto the service taxonomy: unique violations become
/// conflicts, foreign-key violations become not-found, everything else is
/// an opaque storage error.
pub(crate) fn map_db_error(err: sqlx::Error, what: &str) -> AppError {
    match &err {
        sqlx::Error::RowNotFound => AppError::not_found(format!("{what} not found")),
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            AppError::conflict(format!("{what} already exists"))
        }
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            AppError::not_found(format!("{what} references a missing resource"))
        }
        _ => AppError::Database(anyhow::Error::new(err)),
    }
}
