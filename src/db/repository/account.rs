use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::db::models::Account;
use crate::error::{AppError, AppResult};

pub struct AccountRepository;

impl AccountRepository {
    /// Set `requires_refresh` on the given accounts of `provider`.
    ///
    /// Ids with no matching row are ignored. Returns the number of rows updated.
    pub async fn mark_requires_refresh(
        pool: &SqlitePool,
        provider: &str,
        provider_account_ids: &[String],
    ) -> AppResult<u64> {
        if provider_account_ids.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().naive_utc();

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE accounts SET requires_refresh = 1, updated_at = ");
        builder.push_bind(now);
        builder.push(" WHERE provider = ");
        builder.push_bind(provider);
        builder.push(" AND provider_account_id IN (");
        let mut ids = builder.separated(", ");
        for id in provider_account_ids {
            ids.push_bind(id);
        }
        ids.push_unseparated(")");

        let result = builder
            .build()
            .execute(pool)
            .await
            .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    /// List accounts of `provider` currently waiting for a credential refresh.
    pub async fn list_requiring_refresh(
        pool: &SqlitePool,
        provider: &str,
    ) -> AppResult<Vec<Account>> {
        sqlx::query_as::<_, Account>(
            r#"
            SELECT
                provider,
                provider_account_id,
                requires_refresh,
                created_at,
                updated_at
            FROM accounts
            WHERE provider = ? AND requires_refresh = 1
            ORDER BY provider_account_id
            "#,
        )
        .bind(provider)
        .fetch_all(pool)
        .await
        .map_err(AppError::Database)
    }
}
