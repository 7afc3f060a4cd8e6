//! Prediction ledger: writes each recommendation batch once, then grades it at
//! T+0/T+1/T+3/T+5 against realized closes as those sessions arrive.
//!
//! Records are keyed by (batch_date, symbol, horizon) and only ever move from `pending` to a
//! terminal result. A pass can be dropped at any point; whatever was persisted stays valid and
//! the next pass resumes with the remaining pending set.

pub mod memory;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::domain::reason::{EngineError, ReasonCode};
use crate::domain::recommendation::{round2, Direction, Recommendation, RecommendationBatch, TargetRange};
use crate::domain::verification::{
    BatchSummary, Horizon, RecordKey, RollingAccuracy, VerificationRecord, VerificationResult,
};
use crate::time::TradingCalendar;

pub use memory::MemoryLedgerStore;

/// How a priced horizon is graded when direction and range disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPolicy {
    /// Success needs the right direction and a close inside the target range.
    #[default]
    RangeRequired,
    /// Success needs the right direction only.
    DirectionOnly,
}

impl VerificationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationPolicy::RangeRequired => "range_required",
            VerificationPolicy::DirectionOnly => "direction_only",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "range_required" => Some(VerificationPolicy::RangeRequired),
            "direction_only" => Some(VerificationPolicy::DirectionOnly),
            _ => None,
        }
    }

    fn grade(&self, direction_correct: bool, in_target_range: bool) -> (VerificationResult, Option<ReasonCode>) {
        if !direction_correct {
            return (VerificationResult::Fail, Some(ReasonCode::DirectionWrong));
        }
        match self {
            VerificationPolicy::RangeRequired if !in_target_range => {
                (VerificationResult::Fail, Some(ReasonCode::OutsideTargetRange))
            }
            _ => (VerificationResult::Success, None),
        }
    }
}

/// Realized closing prices. `Ok(None)` means the provider has no close for that session yet.
#[async_trait::async_trait]
pub trait ClosePriceLookup: Send + Sync {
    async fn fetch_close_price(&self, symbol: &str, date: NaiveDate) -> anyhow::Result<Option<f64>>;
}

/// A pending record whose target session is on or before the as-of date, joined with the
/// recommendation fields needed to grade it.
#[derive(Debug, Clone, PartialEq)]
pub struct DueRecord {
    pub key: RecordKey,
    pub target_date: NaiveDate,
    pub entry_price: f64,
    pub direction: Direction,
    pub target_range: TargetRange,
}

/// Terminal measurement for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graded {
    pub verification_date: NaiveDate,
    pub close_price: f64,
    pub pct_change: f64,
    pub direction_correct: bool,
    pub in_target_range: bool,
    pub result: VerificationResult,
    pub reason: Option<ReasonCode>,
}

impl Graded {
    pub fn compute(due: &DueRecord, close_price: f64, policy: VerificationPolicy) -> Self {
        let pct_change = round2((close_price - due.entry_price) / due.entry_price * 100.0);
        let direction_correct = due.direction.agrees_with(pct_change);
        let in_target_range = due.target_range.contains(close_price);
        let (result, reason) = policy.grade(direction_correct, in_target_range);
        Self {
            verification_date: due.target_date,
            close_price,
            pct_change,
            direction_correct,
            in_target_range,
            result,
            reason,
        }
    }
}

#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Appends a batch and its pending records. Existing rows are left untouched; returns the
    /// number of recommendations newly written.
    async fn insert_batch(
        &self,
        batch: &RecommendationBatch,
        records: &[VerificationRecord],
    ) -> anyhow::Result<usize>;

    async fn pending_due(&self, as_of: NaiveDate) -> anyhow::Result<Vec<DueRecord>>;

    /// Moves a pending record to its terminal result. Returns false when the record was
    /// already terminal (or unknown) and nothing changed.
    async fn finalize(&self, key: &RecordKey, graded: &Graded) -> anyhow::Result<bool>;

    /// Bumps the attempt counter of a record that stays pending and stores why.
    async fn note_pending(&self, key: &RecordKey, reason: ReasonCode) -> anyhow::Result<()>;

    async fn batch_records(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<VerificationRecord>>;

    async fn recommendations(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<Recommendation>>;

    /// Records of every batch dated within the inclusive bounds, ordered by batch date.
    async fn records_between(
        &self,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<VerificationRecord>>;

    /// Batch dates that still hold at least one pending record, oldest first.
    async fn open_batch_dates(&self) -> anyhow::Result<Vec<NaiveDate>>;

    async fn latest_batch_date(&self) -> anyhow::Result<Option<NaiveDate>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyReport {
    pub due: usize,
    pub resolved: usize,
    pub still_pending: usize,
}

#[derive(Clone)]
pub struct PredictionLedger {
    store: Arc<dyn LedgerStore>,
    calendar: TradingCalendar,
    policy: VerificationPolicy,
    concurrency: usize,
}

impl PredictionLedger {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        calendar: TradingCalendar,
        policy: VerificationPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            calendar,
            policy,
            concurrency: concurrency.max(1),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub fn calendar(&self) -> &TradingCalendar {
        &self.calendar
    }

    /// Writes the batch with one pending record per horizon. Re-recording a batch is a no-op.
    pub async fn record(
        &self,
        batch_date: NaiveDate,
        recommendations: &[Recommendation],
    ) -> anyhow::Result<usize> {
        for r in recommendations {
            anyhow::ensure!(
                r.recommendation_date == batch_date,
                "recommendation {} is dated {}, not batch {batch_date}",
                r.symbol,
                r.recommendation_date
            );
        }

        let records: Vec<VerificationRecord> = recommendations
            .iter()
            .flat_map(|r| {
                Horizon::ALL.into_iter().map(move |h| {
                    VerificationRecord::pending(
                        r.reference(),
                        h,
                        self.calendar.horizon_date(batch_date, h),
                    )
                })
            })
            .collect();

        let batch = RecommendationBatch {
            batch_date,
            generated_at: Utc::now(),
            items: recommendations.to_vec(),
        };
        let inserted = self
            .store
            .insert_batch(&batch, &records)
            .await
            .with_context(|| format!("failed to record batch {batch_date}"))?;

        tracing::info!(
            %batch_date,
            recommendations = recommendations.len(),
            inserted,
            "recorded recommendation batch"
        );
        Ok(inserted)
    }

    /// Grades every pending record whose target session is on or before `as_of`.
    ///
    /// Lookups run with bounded concurrency; each outcome is persisted as soon as it arrives.
    /// Missing prices, lookup errors and store errors on a single record leave that record
    /// pending for the next pass.
    pub async fn verify(
        &self,
        as_of: NaiveDate,
        lookup: Arc<dyn ClosePriceLookup>,
    ) -> anyhow::Result<VerifyReport> {
        let due = self
            .store
            .pending_due(as_of)
            .await
            .context("failed to load pending verification records")?;
        let mut report = VerifyReport {
            due: due.len(),
            ..VerifyReport::default()
        };

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for record in due {
            let permits = permits.clone();
            let lookup = lookup.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let price = lookup
                    .fetch_close_price(&record.key.recommendation.symbol, record.target_date)
                    .await;
                (record, price)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (record, price) = match joined {
                Ok(v) => v,
                Err(err) => {
                    tracing::error!(error = %err, "close price lookup task failed");
                    report.still_pending += 1;
                    continue;
                }
            };

            match self.apply(&record, price).await {
                Ok(true) => report.resolved += 1,
                Ok(false) => report.still_pending += 1,
                Err(err) => {
                    tracing::warn!(
                        symbol = %record.key.recommendation.symbol,
                        horizon = record.key.horizon.as_str(),
                        error = %format!("{err:#}"),
                        "failed to persist verification outcome, record stays pending"
                    );
                    report.still_pending += 1;
                }
            }
        }

        tracing::info!(
            %as_of,
            due = report.due,
            resolved = report.resolved,
            still_pending = report.still_pending,
            "verification pass finished"
        );
        Ok(report)
    }

    async fn apply(
        &self,
        record: &DueRecord,
        price: anyhow::Result<Option<f64>>,
    ) -> anyhow::Result<bool> {
        let symbol = &record.key.recommendation.symbol;
        let horizon = record.key.horizon.as_str();

        let reason = match price {
            Ok(Some(close)) if close.is_finite() && close > 0.0 => {
                let graded = Graded::compute(record, close, self.policy);
                let changed = self.store.finalize(&record.key, &graded).await?;
                if changed {
                    tracing::info!(
                        %symbol,
                        horizon,
                        close,
                        pct_change = graded.pct_change,
                        result = graded.result.as_str(),
                        "verification resolved"
                    );
                }
                return Ok(changed);
            }
            Ok(Some(close)) => {
                tracing::warn!(%symbol, horizon, close, "ignoring invalid close price");
                ReasonCode::PriceNotAvailable
            }
            Ok(None) => {
                tracing::debug!(%symbol, horizon, date = %record.target_date, "close not available yet");
                ReasonCode::PriceNotAvailable
            }
            Err(err) => {
                let err = EngineError::LookupUnavailable {
                    symbol: symbol.clone(),
                    date: record.target_date,
                    detail: format!("{err:#}"),
                };
                tracing::warn!(horizon, reason = %err.reason_code(), "{err}");
                err.reason_code()
            }
        };

        self.store.note_pending(&record.key, reason).await?;
        Ok(false)
    }

    pub async fn summarize(&self, batch_date: NaiveDate) -> anyhow::Result<BatchSummary> {
        let records = self.store.batch_records(batch_date).await?;
        Ok(BatchSummary::from_records(batch_date, &records))
    }

    /// Averages per-batch accuracy over every batch dated within `since..=until`.
    pub async fn rolling_accuracy(
        &self,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> anyhow::Result<RollingAccuracy> {
        let records = self
            .store
            .records_between(since, until)
            .await
            .context("failed to load verification history")?;

        Ok(RollingAccuracy::from_records(since, until, &records))
    }
}
