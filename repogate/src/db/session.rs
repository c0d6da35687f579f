//! Request-scoped transactional sessions.
//!
//! A [`Session`] is owned by exactly one unit of work (a request, or one background write) and is
//! passed explicitly to every repository call made on its behalf. It never crosses tasks: the type
//! is `Send` so it can live inside a request future, but it is not `Clone` and every operation
//! takes `&mut self`.
//!
//! The transaction begins lazily on first use and ends on [`Session::commit`] or
//! [`Session::rollback`]; the next use begins a fresh one. Dropping a session with an open
//! transaction rolls it back and returns the connection to the pool.

use super::errors::Result;
use crate::types::abbrev_uuid;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, trace};
use uuid::Uuid;

pub struct Session {
    id: Uuid,
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &abbrev_uuid(&self.id))
            .field("in_transaction", &self.tx.is_some())
            .finish()
    }
}

impl Session {
    pub fn new(pool: PgPool) -> Self {
        Self {
            id: Uuid::new_v4(),
            pool,
            tx: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// The connection of the current transaction, beginning one if none is open
    pub async fn connection(&mut self) -> Result<&mut PgConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => {
                let tx = self.pool.begin().await?;
                debug!(session = %abbrev_uuid(&self.id), "Began transaction");
                tx
            }
        };
        Ok(&mut **self.tx.insert(tx))
    }

    /// Commit the open transaction, if any
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            debug!(session = %abbrev_uuid(&self.id), "Committed transaction");
        }
        Ok(())
    }

    /// Roll back the open transaction, if any
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            debug!(session = %abbrev_uuid(&self.id), "Rolled back transaction");
        }
        Ok(())
    }

    /// End the session, discarding uncommitted work
    pub async fn close(mut self) -> Result<()> {
        self.rollback().await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // sqlx queues the rollback when the transaction itself is dropped
        if self.tx.is_some() {
            trace!(session = %abbrev_uuid(&self.id), "Session dropped with an open transaction, rolling back");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[sqlx::test]
    async fn test_transaction_begins_lazily_and_commits(pool: PgPool) {
        let mut session = Session::new(pool.clone());
        assert!(!session.in_transaction());

        sqlx::query("INSERT INTO balances (address, amount) VALUES ('lazy', 1)")
            .execute(session.connection().await.unwrap())
            .await
            .unwrap();
        assert!(session.in_transaction());
        session.commit().await.unwrap();
        assert!(!session.in_transaction());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balances WHERE address = 'lazy'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test]
    async fn test_dropped_session_rolls_back(pool: PgPool) {
        {
            let mut session = Session::new(pool.clone());
            sqlx::query("INSERT INTO balances (address, amount) VALUES ('dropped', 1)")
                .execute(session.connection().await.unwrap())
                .await
                .unwrap();
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM balances WHERE address = 'dropped'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[sqlx::test]
    async fn test_rollback_then_reuse(pool: PgPool) {
        let mut session = Session::new(pool.clone());
        sqlx::query("INSERT INTO balances (address, amount) VALUES ('rolled', 1)")
            .execute(session.connection().await.unwrap())
            .await
            .unwrap();
        session.rollback().await.unwrap();

        sqlx::query("INSERT INTO balances (address, amount) VALUES ('kept', 1)")
            .execute(session.connection().await.unwrap())
            .await
            .unwrap();
        session.commit().await.unwrap();

        let addresses: Vec<String> = sqlx::query_scalar("SELECT address FROM balances ORDER BY address")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(addresses, vec!["kept".to_string()]);
    }
}
