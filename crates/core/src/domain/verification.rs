use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::reason::ReasonCode;
use crate::domain::recommendation::RecommendationRef;

/// Forward verification offset in trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "T+0")]
    T0,
    #[serde(rename = "T+1")]
    T1,
    #[serde(rename = "T+3")]
    T3,
    #[serde(rename = "T+5")]
    T5,
}

impl Horizon {
    pub const ALL: [Horizon; 4] = [Horizon::T0, Horizon::T1, Horizon::T3, Horizon::T5];

    pub fn offset(&self) -> u32 {
        match self {
            Horizon::T0 => 0,
            Horizon::T1 => 1,
            Horizon::T3 => 3,
            Horizon::T5 => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::T0 => "T+0",
            Horizon::T1 => "T+1",
            Horizon::T3 => "T+3",
            Horizon::T5 => "T+5",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|h| h.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationResult {
    Pending,
    Success,
    Fail,
}

impl VerificationResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationResult::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationResult::Pending => "pending",
            VerificationResult::Success => "success",
            VerificationResult::Fail => "fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VerificationResult::Pending),
            "success" => Some(VerificationResult::Success),
            "fail" => Some(VerificationResult::Fail),
            _ => None,
        }
    }
}

/// Key of a verification record in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub recommendation: RecommendationRef,
    pub horizon: Horizon,
}

/// Grade of one recommendation at one horizon.
///
/// Measured fields stay `None` while `result` is pending. Once terminal, the record is never
/// rewritten.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub recommendation_ref: RecommendationRef,
    pub horizon: Horizon,
    /// Trading day whose close grades this horizon.
    pub target_date: NaiveDate,
    pub verification_date: Option<NaiveDate>,
    pub close_price: Option<f64>,
    pub pct_change: Option<f64>,
    pub direction_correct: Option<bool>,
    pub in_target_range: Option<bool>,
    pub result: VerificationResult,
    pub reason: Option<ReasonCode>,
    pub attempts: u32,
}

impl VerificationRecord {
    pub fn pending(recommendation_ref: RecommendationRef, horizon: Horizon, target_date: NaiveDate) -> Self {
        Self {
            recommendation_ref,
            horizon,
            target_date,
            verification_date: None,
            close_price: None,
            pct_change: None,
            direction_correct: None,
            in_target_range: None,
            result: VerificationResult::Pending,
            reason: Some(ReasonCode::AwaitingHorizon),
            attempts: 0,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            recommendation: self.recommendation_ref.clone(),
            horizon: self.horizon,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonSummary {
    pub total: usize,
    pub success: usize,
    pub fail: usize,
    pub pending: usize,
    /// success / (success + fail); `None` while nothing at this horizon is resolved.
    pub accuracy: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub recommendation_date: NaiveDate,
    pub total: usize,
    pub per_horizon: BTreeMap<Horizon, HorizonSummary>,
}

impl BatchSummary {
    /// Aggregates a batch's records. `total` is the number of distinct recommendations.
    pub fn from_records(recommendation_date: NaiveDate, records: &[VerificationRecord]) -> Self {
        let mut per_horizon: BTreeMap<Horizon, HorizonSummary> = Horizon::ALL
            .into_iter()
            .map(|h| (h, HorizonSummary::default()))
            .collect();

        let mut symbols = std::collections::BTreeSet::new();
        for r in records {
            symbols.insert(r.recommendation_ref.symbol.as_str());
            let entry = per_horizon.entry(r.horizon).or_default();
            entry.total += 1;
            match r.result {
                VerificationResult::Pending => entry.pending += 1,
                VerificationResult::Success => entry.success += 1,
                VerificationResult::Fail => entry.fail += 1,
            }
        }

        for s in per_horizon.values_mut() {
            let resolved = s.success + s.fail;
            s.accuracy = (resolved > 0).then(|| s.success as f64 / resolved as f64);
        }

        Self {
            recommendation_date,
            total: symbols.len(),
            per_horizon,
        }
    }

    pub fn accuracy(&self, horizon: Horizon) -> Option<f64> {
        self.per_horizon.get(&horizon).and_then(|s| s.accuracy)
    }
}

/// Mean of one horizon's per-batch accuracy. `samples` counts the batches that had at least
/// one resolved record at that horizon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HorizonAccuracy {
    pub samples: usize,
    pub mean_accuracy: Option<f64>,
}

/// Accuracy across batch dates. Batches whose accuracy at a horizon is still null are left out
/// of that horizon's mean rather than counted as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingAccuracy {
    pub since: Option<NaiveDate>,
    pub until: Option<NaiveDate>,
    pub first_batch: Option<NaiveDate>,
    pub last_batch: Option<NaiveDate>,
    pub batches: usize,
    pub per_horizon: BTreeMap<Horizon, HorizonAccuracy>,
}

impl RollingAccuracy {
    pub fn from_summaries(
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
        summaries: &[BatchSummary],
    ) -> Self {
        let per_horizon = Horizon::ALL
            .into_iter()
            .map(|h| {
                let values: Vec<f64> = summaries.iter().filter_map(|s| s.accuracy(h)).collect();
                let mean_accuracy =
                    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64);
                (
                    h,
                    HorizonAccuracy {
                        samples: values.len(),
                        mean_accuracy,
                    },
                )
            })
            .collect();

        Self {
            since,
            until,
            first_batch: summaries.iter().map(|s| s.recommendation_date).min(),
            last_batch: summaries.iter().map(|s| s.recommendation_date).max(),
            batches: summaries.len(),
            per_horizon,
        }
    }

    /// Groups records by batch date and averages the resulting batch summaries.
    pub fn from_records(
        since: Option<NaiveDate>,
        until: Option<NaiveDate>,
        records: &[VerificationRecord],
    ) -> Self {
        let mut by_batch: BTreeMap<NaiveDate, Vec<VerificationRecord>> = BTreeMap::new();
        for r in records {
            by_batch
                .entry(r.recommendation_ref.batch_date)
                .or_default()
                .push(r.clone());
        }
        let summaries: Vec<BatchSummary> = by_batch
            .iter()
            .map(|(date, records)| BatchSummary::from_records(*date, records))
            .collect();
        Self::from_summaries(since, until, &summaries)
    }

    pub fn mean_accuracy(&self, horizon: Horizon) -> Option<f64> {
        self.per_horizon.get(&horizon).and_then(|a| a.mean_accuracy)
    }

    pub fn samples(&self, horizon: Horizon) -> usize {
        self.per_horizon.get(&horizon).map(|a| a.samples).unwrap_or(0)
    }
}
