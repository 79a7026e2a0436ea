//! Transaction helpers
//!
//! Multi-row writes run under a single transaction; the safe-merge algorithm
//! additionally opens savepoints inside it so a secondary conflict rolls
//! back one merge attempt rather than the surrounding batch.

use sqlx::{PgPool, Postgres, Transaction};

use crate::Result;

/// Transaction wrapper for automatic commit on success
///
/// This helper allows for clean transaction handling with automatic
/// commit/rollback.
pub async fn with_transaction<F, R>(pool: &PgPool, f: F) -> Result<R>
where
    F: for<'e> FnOnce(
            &'e mut Transaction<'static, Postgres>,
        ) -> futures::future::BoxFuture<'e, Result<R>>
        + Send,
    R: Send + 'static,
{
    let mut tx = pool.begin().await?;

    match f(&mut tx).await {
        Ok(result) => {
            tx.commit().await?;
            Ok(result)
        }
        Err(e) => {
            tx.rollback().await?;
            Err(e)
        }
    }
}

/// Run `f` under a named savepoint inside an open transaction.
///
/// On error the savepoint is rolled back and the error returned; the outer
/// transaction stays usable.
pub async fn with_savepoint<F, R>(
    tx: &mut Transaction<'static, Postgres>,
    name: &str,
    f: F,
) -> Result<R>
where
    F: for<'e> FnOnce(
            &'e mut Transaction<'static, Postgres>,
        ) -> futures::future::BoxFuture<'e, Result<R>>
        + Send,
    R: Send + 'static,
{
    sqlx::query(&format!("SAVEPOINT {name}"))
        .execute(&mut **tx)
        .await?;

    match f(tx).await {
        Ok(result) => {
            sqlx::query(&format!("RELEASE SAVEPOINT {name}"))
                .execute(&mut **tx)
                .await?;
            Ok(result)
        }
        Err(e) => {
            sqlx::query(&format!("ROLLBACK TO SAVEPOINT {name}"))
                .execute(&mut **tx)
                .await?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_transaction_commit() {
        // Integration test placeholder
    }

    #[tokio::test]
    #[ignore = "Requires database"]
    async fn test_savepoint_rollback_preserves_outer_tx() {
        // Integration test placeholder
    }
}
