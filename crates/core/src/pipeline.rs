//! Entry points used by the binaries: one scoring pass over a batch of raw candidates, and one
//! verification pass over every open batch in the ledger.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::chip_flow::ChipFlowAnalyzer;
use crate::analysis::normalizer::SignalNormalizer;
use crate::analysis::reversal::ReversalDetector;
use crate::analysis::scoring::{rank, Decision, ScoredCandidate, ScoringEngine};
use crate::analysis::selection::DiversificationSelector;
use crate::config::EngineOptions;
use crate::domain::candidate::{RawCandidate, Tier};
use crate::domain::reason::{ReasonCode, Rejection};
use crate::domain::recommendation::{Direction, Recommendation};
use crate::domain::verification::{BatchSummary, RollingAccuracy};
use crate::ledger::{ClosePriceLookup, PredictionLedger, VerifyReport};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub batch_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub selected: Vec<Recommendation>,
    pub rejected: Vec<Rejection>,
    /// Every candidate as scored, in rank order, for audit.
    pub scored: Vec<ScoredCandidate>,
    pub constraints_satisfied: bool,
    pub shortfall: Vec<ReasonCode>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    options: EngineOptions,
    analyzer: ChipFlowAnalyzer,
    normalizer: SignalNormalizer,
    detector: ReversalDetector,
    scorer: ScoringEngine,
    selector: DiversificationSelector,
}

impl Engine {
    /// Fails on invalid options so misconfiguration never surfaces per candidate.
    pub fn new(options: EngineOptions) -> anyhow::Result<Self> {
        options.validate()?;
        Ok(Self {
            analyzer: ChipFlowAnalyzer::new(options.flow),
            normalizer: SignalNormalizer::new(options.normalizer),
            detector: ReversalDetector::default(),
            scorer: ScoringEngine::new(options.weights),
            selector: DiversificationSelector::new(options.selection),
            options,
        })
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn score_candidate(&self, raw: &RawCandidate) -> ScoredCandidate {
        let flow = raw.flow.as_ref().and_then(|s| self.analyzer.analyze(s));
        let signals = self.normalizer.normalize(raw, flow.as_ref());
        let warning = self
            .detector
            .detect(&raw.symbol, flow.as_ref(), signals.price_percentile);
        self.scorer.score(raw, &signals, &warning)
    }

    pub fn run_scoring_batch(&self, batch_date: NaiveDate, candidates: Vec<RawCandidate>) -> ScoringOutcome {
        let mut scored = Vec::with_capacity(candidates.len());
        let mut rejected = Vec::new();
        let mut eligible = Vec::new();
        let mut entry_prices: HashMap<String, f64> = HashMap::new();

        for raw in &candidates {
            let s = self.score_candidate(raw);

            match (&s.decision, s.candidate.tier, raw.latest_close()) {
                (Decision::Vetoed { level, rules }, _, _) => {
                    let mut r = Rejection::new(&raw.symbol, ReasonCode::ReversalVeto)
                        .with_detail(format!("reversal warning level {}", level.value()));
                    r.reversal_rules = rules.clone();
                    rejected.push(r);
                }
                (Decision::Scored, Tier::Reject, _) => {
                    rejected.push(
                        Rejection::new(&raw.symbol, ReasonCode::BelowThreshold)
                            .with_detail(format!("composite {:.2}", s.candidate.composite_score)),
                    );
                }
                (Decision::Scored, _, None) => {
                    rejected.push(Rejection::new(&raw.symbol, ReasonCode::MissingEntryPrice));
                }
                (Decision::Scored, _, Some(close)) => {
                    entry_prices.insert(raw.symbol.clone(), close);
                    eligible.push(s.candidate.clone());
                }
            }
            scored.push(s);
        }

        let selection = self.selector.select(eligible);
        rejected.extend(selection.rejected);

        let targets = self.options.targets;
        let selected: Vec<Recommendation> = selection
            .selected
            .into_iter()
            .filter_map(|c| {
                let entry_price = entry_prices.get(&c.symbol).copied()?;
                let position_tier = c.tier.position_tier()?;
                Some(Recommendation {
                    direction: Direction::Up,
                    entry_price,
                    target_range: targets.target_range(entry_price),
                    stop_loss: targets.stop_loss(entry_price),
                    position_tier,
                    tier: c.tier,
                    composite_score: c.composite_score,
                    recommendation_date: batch_date,
                    symbol: c.symbol,
                    name: c.name,
                    industry: c.industry,
                })
            })
            .collect();

        rank(&mut scored);
        tracing::info!(
            %batch_date,
            candidates = candidates.len(),
            selected = selected.len(),
            rejected = rejected.len(),
            constraints_satisfied = selection.constraints_satisfied,
            "scoring batch finished"
        );

        ScoringOutcome {
            batch_date,
            generated_at: Utc::now(),
            selected,
            rejected,
            scored,
            constraints_satisfied: selection.constraints_satisfied,
            shortfall: selection.shortfall,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub as_of: NaiveDate,
    pub report: VerifyReport,
    pub summaries: Vec<BatchSummary>,
    /// Accuracy across every recorded batch after this pass.
    pub rolling: RollingAccuracy,
}

/// Verifies everything due by `as_of` and recomputes the summary of every batch that was open
/// when the pass started.
pub async fn run_verification(
    ledger: &PredictionLedger,
    as_of: NaiveDate,
    lookup: Arc<dyn ClosePriceLookup>,
) -> anyhow::Result<VerificationOutcome> {
    let open = ledger.store().open_batch_dates().await?;
    let report = ledger.verify(as_of, lookup).await?;

    let mut summaries = Vec::with_capacity(open.len());
    for batch_date in open {
        summaries.push(ledger.summarize(batch_date).await?);
    }

    let rolling = ledger.rolling_accuracy(None, None).await?;

    Ok(VerificationOutcome {
        as_of,
        report,
        summaries,
        rolling,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{CatalystSignal, PriceBar};
    use crate::domain::flow::series_from_nets;
    use crate::domain::reason::ReversalRule;
    use crate::domain::verification::Horizon;
    use crate::ledger::{MemoryLedgerStore, VerificationPolicy};
    use crate::time::TradingCalendar;
    use chrono::Duration;

    const STEADY: [i64; 10] = [10, 12, 15, 14, 16, 18, 20, 22, 25, 30];

    fn batch_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 6).unwrap()
    }

    fn bars(n: usize) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();
        (0..n)
            .map(|i| PriceBar {
                date: start + Duration::days(i as i64),
                close: 100.0 + i as f64,
                volume: 1000.0,
            })
            .collect()
    }

    fn strong(symbol: &str, industry: &str, catalyst: f64, nets: &[i64]) -> RawCandidate {
        RawCandidate {
            symbol: symbol.to_string(),
            name: format!("{symbol} Co"),
            industry: industry.to_string(),
            flow: Some(series_from_nets(symbol, nets)),
            prices: bars(20),
            catalyst: Some(CatalystSignal {
                strength: catalyst,
                tags: vec!["orders".to_string()],
            }),
            industry_logic: Some(9.0),
        }
    }

    fn engine() -> Engine {
        Engine::new(EngineOptions::default()).unwrap()
    }

    #[test]
    fn strong_candidate_scores_as_recommend() {
        let s = engine().score_candidate(&strong("2330", "semis", 0.9, &STEADY));
        // 27 + 25.5 + 18 + 2.5 + 6.25
        assert!((s.candidate.composite_score - 79.25).abs() < 1e-9);
        assert_eq!(s.candidate.tier, Tier::Recommend);
        assert_eq!(s.decision, Decision::Scored);
        assert!(s.candidate.completeness.is_complete());
    }

    #[test]
    fn invalid_options_fail_construction() {
        let mut options = EngineOptions::default();
        options.weights.catalyst = 0.9;
        assert!(Engine::new(options).is_err());
    }

    #[test]
    fn batch_selects_diversified_recommendations() {
        let industries = ["semis", "banks", "shipping", "steel"];
        let candidates: Vec<RawCandidate> = (0..10)
            .map(|i| {
                strong(
                    &format!("{}", 2000 + i),
                    industries[i % 4],
                    0.95 - i as f64 * 0.01,
                    &STEADY,
                )
            })
            .collect();

        let out = engine().run_scoring_batch(batch_date(), candidates);
        assert!(out.constraints_satisfied);
        assert!(out.shortfall.is_empty());
        assert_eq!(out.selected.len(), 8);
        assert_eq!(out.rejected.len(), 2);
        assert!(out
            .rejected
            .iter()
            .all(|r| r.reasons == vec![ReasonCode::TargetCountReached]));
        assert_eq!(out.scored.len(), 10);
        assert_eq!(out.scored[0].candidate.symbol, "2000");

        let policy = EngineOptions::default().targets;
        for r in &out.selected {
            assert_eq!(r.direction, Direction::Up);
            assert_eq!(r.entry_price, 119.0);
            assert_eq!(r.target_range, policy.target_range(119.0));
            assert_eq!(r.stop_loss, policy.stop_loss(119.0));
            assert_eq!(r.recommendation_date, batch_date());
            assert!(r.position_tier.allocation_pct().0 >= 5);
        }
    }

    #[test]
    fn rejections_carry_reason_codes() {
        let mut vetoed_nets = STEADY;
        vetoed_nets[9] = -40;
        let mut unpriced = strong("1101", "cement", 1.0, &STEADY);
        unpriced.prices.clear();
        let empty = RawCandidate {
            symbol: "9999".to_string(),
            name: "Quiet".to_string(),
            industry: "misc".to_string(),
            flow: None,
            prices: Vec::new(),
            catalyst: None,
            industry_logic: None,
        };

        let out = engine().run_scoring_batch(
            batch_date(),
            vec![strong("2303", "semis", 1.0, &vetoed_nets), unpriced, empty],
        );

        let by_symbol = |s: &str| out.rejected.iter().find(|r| r.symbol == s).unwrap();
        let veto = by_symbol("2303");
        assert_eq!(veto.reasons, vec![ReasonCode::ReversalVeto]);
        assert!(veto.reversal_rules.contains(&ReversalRule::ShortReversal));
        assert_eq!(by_symbol("1101").reasons, vec![ReasonCode::MissingEntryPrice]);
        assert_eq!(by_symbol("9999").reasons, vec![ReasonCode::BelowThreshold]);

        assert!(out.selected.is_empty());
        assert!(!out.constraints_satisfied);
        assert!(out.shortfall.contains(&ReasonCode::InsufficientCandidates));
    }

    struct FixedClose(f64);

    #[async_trait::async_trait]
    impl ClosePriceLookup for FixedClose {
        async fn fetch_close_price(&self, _symbol: &str, _date: NaiveDate) -> anyhow::Result<Option<f64>> {
            Ok(Some(self.0))
        }
    }

    #[tokio::test]
    async fn scored_batch_flows_through_the_ledger() {
        let industries = ["semis", "banks", "shipping"];
        let candidates: Vec<RawCandidate> = (0..9)
            .map(|i| strong(&format!("{}", 3000 + i), industries[i % 3], 0.9, &STEADY))
            .collect();
        let out = engine().run_scoring_batch(batch_date(), candidates);
        assert_eq!(out.selected.len(), 8);

        let ledger = PredictionLedger::new(
            Arc::new(MemoryLedgerStore::default()),
            TradingCalendar::default(),
            VerificationPolicy::RangeRequired,
            4,
        );
        ledger.record(out.batch_date, &out.selected).await.unwrap();

        let v = run_verification(&ledger, batch_date(), Arc::new(FixedClose(125.0)))
            .await
            .unwrap();
        assert_eq!(v.report.due, 8);
        assert_eq!(v.report.resolved, 8);
        assert_eq!(v.summaries.len(), 1);
        let summary = &v.summaries[0];
        assert_eq!(summary.total, 8);
        assert_eq!(summary.accuracy(Horizon::T0), Some(1.0));
        assert_eq!(summary.accuracy(Horizon::T5), None);
        assert_eq!(v.rolling.batches, 1);
        assert_eq!(v.rolling.mean_accuracy(Horizon::T0), Some(1.0));
        assert_eq!(v.rolling.samples(Horizon::T5), 0);
    }
}
