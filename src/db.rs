use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::error::StoreError;

/// Postgres-backed repositories. Implements `UserRepo` and `CatalogRepo`.
#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("apply migrations")?;
        Ok(())
    }
}

/// Turns a unique-constraint violation into `StoreError::Conflict(field)`.
pub(crate) fn conflict_on(field: &'static str) -> impl FnOnce(sqlx::Error) -> StoreError {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(field),
        _ => StoreError::Backend(e),
    }
}
