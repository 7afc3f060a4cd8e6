use crate::domain::candidate::RawCandidate;
use crate::domain::reason::{ReasonCode, Rejection};
use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Inbound scoring batch as assembled by collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidateBatch {
    pub as_of_date: NaiveDate,
    pub candidates: Vec<RawCandidate>,
}

#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    pub batch_date: NaiveDate,
    pub candidates: Vec<RawCandidate>,
    /// Candidates dropped at intake; they never reach scoring.
    pub invalid: Vec<Rejection>,
}

impl RawCandidateBatch {
    /// Batch-level problems are errors. Per-candidate problems only drop that candidate.
    pub fn validate_and_into_batch(
        self,
        expected_as_of_date: Option<NaiveDate>,
    ) -> anyhow::Result<ValidatedBatch> {
        if let Some(expected) = expected_as_of_date {
            ensure!(
                self.as_of_date == expected,
                "batch as_of_date mismatch: expected {expected}, got {}",
                self.as_of_date
            );
        }
        ensure!(!self.candidates.is_empty(), "batch must contain candidates");

        let mut seen = BTreeSet::<String>::new();
        let mut candidates = Vec::with_capacity(self.candidates.len());
        let mut invalid = Vec::new();

        for raw in self.candidates {
            let symbol = raw.symbol.trim().to_string();
            match validate_candidate(raw, &mut seen) {
                Ok(c) => candidates.push(c),
                Err(err) => {
                    tracing::warn!(%symbol, error = %err, "dropping invalid candidate");
                    invalid.push(
                        Rejection::new(symbol, ReasonCode::InvalidInput)
                            .with_detail(format!("{err:#}")),
                    );
                }
            }
        }

        Ok(ValidatedBatch {
            batch_date: self.as_of_date,
            candidates,
            invalid,
        })
    }
}

fn validate_candidate(
    mut raw: RawCandidate,
    seen: &mut BTreeSet<String>,
) -> anyhow::Result<RawCandidate> {
    raw.symbol = raw.symbol.trim().to_string();
    ensure!(!raw.symbol.is_empty(), "symbol must be non-empty");
    ensure!(seen.insert(raw.symbol.clone()), "duplicate symbol: {}", raw.symbol);

    raw.name = raw.name.trim().to_string();
    ensure!(!raw.name.is_empty(), "name must be non-empty");

    raw.industry = raw.industry.trim().to_string();
    ensure!(!raw.industry.is_empty(), "industry must be non-empty");

    if let Some(flow) = &raw.flow {
        ensure!(
            flow.symbol() == raw.symbol,
            "flow series belongs to {}, not {}",
            flow.symbol(),
            raw.symbol
        );
    }

    for pair in raw.prices.windows(2) {
        ensure!(
            pair[0].date < pair[1].date,
            "prices must be strictly date-ordered ({} then {})",
            pair[0].date,
            pair[1].date
        );
    }
    for bar in &raw.prices {
        ensure!(
            bar.close.is_finite() && bar.close > 0.0,
            "close on {} must be a positive number",
            bar.date
        );
        ensure!(
            bar.volume.is_finite() && bar.volume >= 0.0,
            "volume on {} must be non-negative",
            bar.date
        );
    }

    // Out-of-range optional signals are treated as absent rather than fatal.
    if let Some(c) = &raw.catalyst {
        if !c.strength.is_finite() {
            raw.catalyst = None;
        }
    }
    raw.industry_logic = raw.industry_logic.filter(|x| x.is_finite());

    Ok(raw)
}
