use anyhow::Context;
use chrono::{Datelike, NaiveDate};
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

/// First half of the two-key advisory lock; the batch date's day number is the second.
const BATCH_LOCK_CLASS: i32 = 0x4346;

fn batch_lock_key(batch_date: NaiveDate) -> (i32, i32) {
    (BATCH_LOCK_CLASS, batch_date.num_days_from_ce())
}

/// Exclusive right to write one batch date.
///
/// Postgres ties advisory locks to the session that took them, so the guard keeps that pooled
/// connection checked out and unlocks through it. A guard dropped without `release` closes the
/// connection instead of returning it to the pool still holding the lock.
pub struct BatchLock {
    conn: PoolConnection<Postgres>,
    batch_date: NaiveDate,
    released: bool,
}

impl BatchLock {
    /// `None` when another session already holds the lock for this date.
    pub async fn try_acquire(pool: &sqlx::PgPool, batch_date: NaiveDate) -> anyhow::Result<Option<Self>> {
        let mut conn = pool
            .acquire()
            .await
            .context("failed to check out a connection for the batch lock")?;
        let (class, day) = batch_lock_key(batch_date);
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1, $2)")
            .bind(class)
            .bind(day)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to acquire batch lock for {batch_date}"))?;

        Ok(acquired.then(|| Self {
            conn,
            batch_date,
            released: false,
        }))
    }

    pub async fn release(mut self) -> anyhow::Result<()> {
        let (class, day) = batch_lock_key(self.batch_date);
        let unlocked: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1, $2)")
            .bind(class)
            .bind(day)
            .fetch_one(&mut *self.conn)
            .await
            .with_context(|| format!("failed to release batch lock for {}", self.batch_date))?;
        self.released = true;
        if !unlocked {
            tracing::warn!(batch_date = %self.batch_date, "batch lock was not held at release");
        }
        Ok(())
    }
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        if !self.released {
            self.conn.close_on_drop();
        }
    }
}
