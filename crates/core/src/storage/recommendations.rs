use anyhow::Context;
use chrono::NaiveDate;

use crate::domain::candidate::Tier;
use crate::domain::reason::ReasonCode;
use crate::domain::recommendation::{
    Direction, PositionTier, Recommendation, RecommendationBatch, RecommendationRef, TargetRange,
};
use crate::domain::verification::{Horizon, RecordKey, VerificationRecord, VerificationResult};
use crate::ledger::{DueRecord, Graded, LedgerStore};

/// Postgres-backed ledger. Inserts never overwrite; the only UPDATEs are guarded by
/// `result = 'pending'`.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: sqlx::PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

type RecommendationRow = (
    NaiveDate,
    String,
    String,
    String,
    String,
    f64,
    f64,
    f64,
    f64,
    String,
    String,
    f64,
);

type RecordRow = (
    NaiveDate,
    String,
    String,
    NaiveDate,
    Option<NaiveDate>,
    Option<f64>,
    Option<f64>,
    Option<bool>,
    Option<bool>,
    String,
    Option<String>,
    i32,
);

const RECOMMENDATION_COLUMNS: &str = "batch_date, symbol, name, industry, direction, entry_price, \
     target_min, target_max, stop_loss, position_tier, tier, composite_score";

const RECORD_COLUMNS: &str = "batch_date, symbol, horizon, target_date, verification_date, close_price, \
     pct_change, direction_correct, in_target_range, result, reason, attempts";

#[async_trait::async_trait]
impl LedgerStore for PgLedgerStore {
    async fn insert_batch(
        &self,
        batch: &RecommendationBatch,
        records: &[VerificationRecord],
    ) -> anyhow::Result<usize> {
        let mut tx = self.pool.begin().await.context("begin transaction failed")?;

        sqlx::query(
            "INSERT INTO recommendation_batches (batch_date, generated_at) VALUES ($1, $2) \
             ON CONFLICT (batch_date) DO NOTHING",
        )
        .bind(batch.batch_date)
        .bind(batch.generated_at)
        .execute(&mut *tx)
        .await
        .context("insert recommendation_batches failed")?;

        let mut inserted = 0usize;
        for r in &batch.items {
            let res = sqlx::query(&format!(
                "INSERT INTO recommendations ({RECOMMENDATION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
                 ON CONFLICT (batch_date, symbol) DO NOTHING"
            ))
            .bind(r.recommendation_date)
            .bind(&r.symbol)
            .bind(&r.name)
            .bind(&r.industry)
            .bind(r.direction.as_str())
            .bind(r.entry_price)
            .bind(r.target_range.min)
            .bind(r.target_range.max)
            .bind(r.stop_loss)
            .bind(r.position_tier.as_str())
            .bind(r.tier.as_str())
            .bind(r.composite_score)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("insert recommendation {} failed", r.symbol))?;
            inserted += res.rows_affected() as usize;
        }

        for v in records {
            sqlx::query(
                "INSERT INTO verification_records \
                 (batch_date, symbol, horizon, target_date, result, reason, attempts) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (batch_date, symbol, horizon) DO NOTHING",
            )
            .bind(v.recommendation_ref.batch_date)
            .bind(&v.recommendation_ref.symbol)
            .bind(v.horizon.as_str())
            .bind(v.target_date)
            .bind(v.result.as_str())
            .bind(v.reason.map(|r| r.as_str()))
            .bind(v.attempts as i32)
            .execute(&mut *tx)
            .await
            .context("insert verification_records failed")?;
        }

        tx.commit().await.context("commit transaction failed")?;
        Ok(inserted)
    }

    async fn pending_due(&self, as_of: NaiveDate) -> anyhow::Result<Vec<DueRecord>> {
        let rows = sqlx::query_as::<_, (NaiveDate, String, String, NaiveDate, f64, String, f64, f64)>(
            "SELECT v.batch_date, v.symbol, v.horizon, v.target_date, \
                    r.entry_price, r.direction, r.target_min, r.target_max \
             FROM verification_records v \
             JOIN recommendations r ON r.batch_date = v.batch_date AND r.symbol = v.symbol \
             WHERE v.result = 'pending' AND v.target_date <= $1 \
             ORDER BY v.target_date, v.batch_date, v.symbol, v.horizon",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .context("select pending verification_records failed")?;

        rows.into_iter()
            .map(
                |(batch_date, symbol, horizon, target_date, entry_price, direction, min, max)| {
                    Ok(DueRecord {
                        key: RecordKey {
                            recommendation: RecommendationRef { batch_date, symbol },
                            horizon: parse_column(&horizon, Horizon::parse, "horizon")?,
                        },
                        target_date,
                        entry_price,
                        direction: parse_column(&direction, Direction::parse, "direction")?,
                        target_range: TargetRange { min, max },
                    })
                },
            )
            .collect()
    }

    async fn finalize(&self, key: &RecordKey, graded: &Graded) -> anyhow::Result<bool> {
        let res = sqlx::query(
            "UPDATE verification_records SET \
                 verification_date = $4, close_price = $5, pct_change = $6, \
                 direction_correct = $7, in_target_range = $8, result = $9, reason = $10, \
                 attempts = attempts + 1, updated_at = now() \
             WHERE batch_date = $1 AND symbol = $2 AND horizon = $3 AND result = 'pending'",
        )
        .bind(key.recommendation.batch_date)
        .bind(&key.recommendation.symbol)
        .bind(key.horizon.as_str())
        .bind(graded.verification_date)
        .bind(graded.close_price)
        .bind(graded.pct_change)
        .bind(graded.direction_correct)
        .bind(graded.in_target_range)
        .bind(graded.result.as_str())
        .bind(graded.reason.map(|r| r.as_str()))
        .execute(&self.pool)
        .await
        .context("finalize verification_record failed")?;
        Ok(res.rows_affected() == 1)
    }

    async fn note_pending(&self, key: &RecordKey, reason: ReasonCode) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE verification_records SET reason = $4, attempts = attempts + 1, updated_at = now() \
             WHERE batch_date = $1 AND symbol = $2 AND horizon = $3 AND result = 'pending'",
        )
        .bind(key.recommendation.batch_date)
        .bind(&key.recommendation.symbol)
        .bind(key.horizon.as_str())
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .context("update pending verification_record failed")?;
        Ok(())
    }

    async fn batch_records(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<VerificationRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM verification_records \
             WHERE batch_date = $1 ORDER BY symbol, horizon"
        ))
        .bind(batch_date)
        .fetch_all(&self.pool)
        .await
        .context("select verification_records failed")?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn records_between(
        &self,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<VerificationRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM verification_records \
             WHERE ($1::date IS NULL OR batch_date >= $1) \
               AND ($2::date IS NULL OR batch_date <= $2) \
             ORDER BY batch_date, symbol, horizon"
        ))
        .bind(since)
        .bind(until)
        .fetch_all(&self.pool)
        .await
        .context("select verification history failed")?;

        rows.into_iter().map(record_from_row).collect()
    }

    async fn recommendations(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<Recommendation>> {
        let rows = sqlx::query_as::<_, RecommendationRow>(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations \
             WHERE batch_date = $1 ORDER BY composite_score DESC, symbol"
        ))
        .bind(batch_date)
        .fetch_all(&self.pool)
        .await
        .context("select recommendations failed")?;

        rows.into_iter().map(recommendation_from_row).collect()
    }

    async fn open_batch_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
        let dates = sqlx::query_scalar::<_, NaiveDate>(
            "SELECT DISTINCT batch_date FROM verification_records \
             WHERE result = 'pending' ORDER BY batch_date",
        )
        .fetch_all(&self.pool)
        .await
        .context("select open batch dates failed")?;
        Ok(dates)
    }

    async fn latest_batch_date(&self) -> anyhow::Result<Option<NaiveDate>> {
        let latest = sqlx::query_scalar::<_, Option<NaiveDate>>(
            "SELECT max(batch_date) FROM recommendation_batches",
        )
        .fetch_one(&self.pool)
        .await
        .context("select latest batch date failed")?;
        Ok(latest)
    }
}

fn parse_column<T>(value: &str, parse: impl Fn(&str) -> Option<T>, column: &str) -> anyhow::Result<T> {
    parse(value).with_context(|| format!("unexpected {column} value in database: {value:?}"))
}

fn recommendation_from_row(row: RecommendationRow) -> anyhow::Result<Recommendation> {
    let (
        batch_date,
        symbol,
        name,
        industry,
        direction,
        entry_price,
        target_min,
        target_max,
        stop_loss,
        position_tier,
        tier,
        composite_score,
    ) = row;
    Ok(Recommendation {
        symbol,
        name,
        industry,
        direction: parse_column(&direction, Direction::parse, "direction")?,
        entry_price,
        target_range: TargetRange {
            min: target_min,
            max: target_max,
        },
        stop_loss,
        position_tier: parse_column(&position_tier, PositionTier::parse, "position_tier")?,
        tier: parse_column(&tier, Tier::parse, "tier")?,
        composite_score,
        recommendation_date: batch_date,
    })
}

fn record_from_row(row: RecordRow) -> anyhow::Result<VerificationRecord> {
    let (
        batch_date,
        symbol,
        horizon,
        target_date,
        verification_date,
        close_price,
        pct_change,
        direction_correct,
        in_target_range,
        result,
        reason,
        attempts,
    ) = row;
    Ok(VerificationRecord {
        recommendation_ref: RecommendationRef { batch_date, symbol },
        horizon: parse_column(&horizon, Horizon::parse, "horizon")?,
        target_date,
        verification_date,
        close_price,
        pct_change,
        direction_correct,
        in_target_range,
        result: parse_column(&result, VerificationResult::parse, "result")?,
        reason: reason
            .as_deref()
            .map(|r| parse_column(r, ReasonCode::parse, "reason"))
            .transpose()?,
        attempts: attempts.max(0) as u32,
    })
}
