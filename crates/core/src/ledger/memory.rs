use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::domain::reason::ReasonCode;
use crate::domain::recommendation::{Recommendation, RecommendationBatch, RecommendationRef};
use crate::domain::verification::{RecordKey, VerificationRecord, VerificationResult};
use crate::ledger::{DueRecord, Graded, LedgerStore};

/// In-process ledger with the same append-only semantics as the Postgres store. Used for dry
/// runs and tests.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    batches: BTreeMap<NaiveDate, DateTime<Utc>>,
    recommendations: BTreeMap<RecommendationRef, Recommendation>,
    records: BTreeMap<RecordKey, VerificationRecord>,
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_batch(
        &self,
        batch: &RecommendationBatch,
        records: &[VerificationRecord],
    ) -> anyhow::Result<usize> {
        let mut inner = self.inner.lock().await;
        inner
            .batches
            .entry(batch.batch_date)
            .or_insert(batch.generated_at);

        let mut inserted = 0;
        for r in &batch.items {
            if !inner.recommendations.contains_key(&r.reference()) {
                inner.recommendations.insert(r.reference(), r.clone());
                inserted += 1;
            }
        }
        for r in records {
            inner.records.entry(r.key()).or_insert_with(|| r.clone());
        }
        Ok(inserted)
    }

    async fn pending_due(&self, as_of: NaiveDate) -> anyhow::Result<Vec<DueRecord>> {
        let inner = self.inner.lock().await;
        let mut out = Vec::new();
        for (key, r) in &inner.records {
            if r.result.is_terminal() || r.target_date > as_of {
                continue;
            }
            let Some(rec) = inner.recommendations.get(&key.recommendation) else {
                tracing::warn!(symbol = %key.recommendation.symbol, "verification record without recommendation");
                continue;
            };
            out.push(DueRecord {
                key: key.clone(),
                target_date: r.target_date,
                entry_price: rec.entry_price,
                direction: rec.direction,
                target_range: rec.target_range,
            });
        }
        Ok(out)
    }

    async fn finalize(&self, key: &RecordKey, graded: &Graded) -> anyhow::Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(r) = inner.records.get_mut(key) else {
            return Ok(false);
        };
        if r.result != VerificationResult::Pending {
            return Ok(false);
        }
        r.verification_date = Some(graded.verification_date);
        r.close_price = Some(graded.close_price);
        r.pct_change = Some(graded.pct_change);
        r.direction_correct = Some(graded.direction_correct);
        r.in_target_range = Some(graded.in_target_range);
        r.result = graded.result;
        r.reason = graded.reason;
        r.attempts += 1;
        Ok(true)
    }

    async fn note_pending(&self, key: &RecordKey, reason: ReasonCode) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(r) = inner.records.get_mut(key) {
            if r.result == VerificationResult::Pending {
                r.reason = Some(reason);
                r.attempts += 1;
            }
        }
        Ok(())
    }

    async fn batch_records(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<VerificationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| r.recommendation_ref.batch_date == batch_date)
            .cloned()
            .collect())
    }

    async fn records_between(
        &self,
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
    ) -> anyhow::Result<Vec<VerificationRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .records
            .values()
            .filter(|r| {
                let d = r.recommendation_ref.batch_date;
                since.map_or(true, |s| d >= s) && until.map_or(true, |u| d <= u)
            })
            .cloned()
            .collect())
    }

    async fn recommendations(&self, batch_date: NaiveDate) -> anyhow::Result<Vec<Recommendation>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .recommendations
            .values()
            .filter(|r| r.recommendation_date == batch_date)
            .cloned()
            .collect())
    }

    async fn open_batch_dates(&self) -> anyhow::Result<Vec<NaiveDate>> {
        let inner = self.inner.lock().await;
        let mut dates: Vec<NaiveDate> = inner
            .records
            .values()
            .filter(|r| !r.result.is_terminal())
            .map(|r| r.recommendation_ref.batch_date)
            .collect();
        dates.dedup();
        Ok(dates)
    }

    async fn latest_batch_date(&self) -> anyhow::Result<Option<NaiveDate>> {
        let inner = self.inner.lock().await;
        Ok(inner.batches.keys().next_back().copied())
    }
}
