use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::analysis::normalizer::NormalizedSignals;
use crate::analysis::reversal::{ReversalWarning, WarningLevel};
use crate::domain::candidate::{Candidate, Dimension, DimensionScores, RawCandidate, Tier};
use crate::domain::reason::{EngineError, ReversalRule};
use crate::domain::recommendation::round2;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub catalyst: f64,
    pub institutional: f64,
    pub industry_logic: f64,
    pub price_position: f64,
    pub technical: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            catalyst: 0.30,
            institutional: 0.30,
            industry_logic: 0.20,
            price_position: 0.10,
            technical: 0.10,
        }
    }
}

impl ScoreWeights {
    /// Parses five comma-separated weights in dimension order:
    /// catalyst, institutional, industry_logic, price_position, technical.
    pub fn parse(s: &str) -> Option<Self> {
        let parts = s
            .split(',')
            .map(|p| p.trim().parse::<f64>().ok())
            .collect::<Option<Vec<f64>>>()?;
        let [catalyst, institutional, industry_logic, price_position, technical] =
            parts.as_slice()
        else {
            return None;
        };
        Some(Self {
            catalyst: *catalyst,
            institutional: *institutional,
            industry_logic: *industry_logic,
            price_position: *price_position,
            technical: *technical,
        })
    }

    pub fn get(&self, dim: Dimension) -> f64 {
        match dim {
            Dimension::Catalyst => self.catalyst,
            Dimension::Institutional => self.institutional,
            Dimension::IndustryLogic => self.industry_logic,
            Dimension::PricePosition => self.price_position,
            Dimension::Technical => self.technical,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for dim in Dimension::ALL {
            let w = self.get(dim);
            anyhow::ensure!(
                w.is_finite() && w >= 0.0,
                "weight for {dim:?} must be a non-negative number (got {w})"
            );
        }
        let sum: f64 = Dimension::ALL.iter().map(|d| self.get(*d)).sum();
        anyhow::ensure!(
            (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "score weights must sum to 1.0 (got {sum})"
        );
        Ok(())
    }

    pub fn composite(&self, scores: &DimensionScores) -> f64 {
        round2(
            Dimension::ALL
                .iter()
                .map(|d| scores.get(*d) * self.get(*d))
                .sum(),
        )
    }
}

/// Whether the tier came from the composite score or was forced by a reversal veto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Scored,
    Vetoed {
        level: WarningLevel,
        rules: Vec<ReversalRule>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate: Candidate,
    pub decision: Decision,
}

impl ScoredCandidate {
    pub fn is_vetoed(&self) -> bool {
        matches!(self.decision, Decision::Vetoed { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    weights: ScoreWeights,
}

impl ScoringEngine {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        raw: &RawCandidate,
        signals: &NormalizedSignals,
        warning: &ReversalWarning,
    ) -> ScoredCandidate {
        let composite_score = self.weights.composite(&signals.scores);

        let (tier, decision) = if warning.level.is_veto() {
            let rules: Vec<ReversalRule> = warning.reasons.iter().copied().collect();
            let err = EngineError::VetoOverride {
                symbol: raw.symbol.clone(),
                level: warning.level.value(),
                rules: rules.clone(),
            };
            tracing::info!(
                symbol = %raw.symbol,
                composite_score,
                reason = %err.reason_code(),
                "{err}"
            );
            (
                Tier::Reject,
                Decision::Vetoed {
                    level: warning.level,
                    rules,
                },
            )
        } else {
            (Tier::from_score(composite_score), Decision::Scored)
        };

        ScoredCandidate {
            candidate: Candidate {
                symbol: raw.symbol.clone(),
                name: raw.name.clone(),
                industry: raw.industry.clone(),
                dimension_scores: signals.scores,
                composite_score,
                tier,
                completeness: signals.completeness.clone(),
            },
            decision,
        }
    }
}

/// Composite descending, then institutional descending, then symbol ascending.
pub fn rank_order(a: &Candidate, b: &Candidate) -> Ordering {
    b.composite_score
        .total_cmp(&a.composite_score)
        .then_with(|| {
            b.dimension_scores
                .institutional
                .total_cmp(&a.dimension_scores.institutional)
        })
        .then_with(|| a.symbol.cmp(&b.symbol))
}

pub fn rank(candidates: &mut [ScoredCandidate]) {
    candidates.sort_by(|a, b| rank_order(&a.candidate, &b.candidate));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::DataCompleteness;
    use std::collections::BTreeSet;

    fn raw(symbol: &str) -> RawCandidate {
        RawCandidate {
            symbol: symbol.to_string(),
            name: format!("{symbol} Corp"),
            industry: "semis".to_string(),
            flow: None,
            prices: Vec::new(),
            catalyst: None,
            industry_logic: None,
        }
    }

    fn signals(scores: DimensionScores) -> NormalizedSignals {
        NormalizedSignals {
            scores,
            completeness: DataCompleteness::default(),
            price_percentile: None,
        }
    }

    fn calm(symbol: &str) -> ReversalWarning {
        ReversalWarning {
            symbol: symbol.to_string(),
            level: WarningLevel::NONE,
            reasons: BTreeSet::new(),
        }
    }

    #[test]
    fn default_weights_are_valid() {
        ScoreWeights::default().validate().unwrap();
    }

    #[test]
    fn weights_parse_and_validate() {
        let w = ScoreWeights::parse("0.2, 0.4, 0.2, 0.1, 0.1").unwrap();
        assert_eq!(w.institutional, 0.4);
        w.validate().unwrap();

        assert!(ScoreWeights::parse("0.5,0.5").is_none());
        assert!(ScoreWeights::parse("a,b,c,d,e").is_none());
        assert!(ScoreWeights::parse("0.5,0.5,0.5,0.1,0.1")
            .unwrap()
            .validate()
            .is_err());
        assert!(ScoreWeights::parse("1.2,-0.2,0,0,0")
            .unwrap()
            .validate()
            .is_err());
    }

    #[test]
    fn composite_is_weighted_sum() {
        let engine = ScoringEngine::default();
        let scores = DimensionScores {
            catalyst: 90.0,
            institutional: 80.0,
            industry_logic: 70.0,
            price_position: 60.0,
            technical: 50.0,
        };
        // 27 + 24 + 14 + 6 + 5
        let scored = engine.score(&raw("2330"), &signals(scores), &calm("2330"));
        assert!((scored.candidate.composite_score - 76.0).abs() < 1e-9);
        assert_eq!(scored.candidate.tier, Tier::Recommend);
        assert_eq!(scored.decision, Decision::Scored);
    }

    #[test]
    fn uniform_scores_map_to_tiers() {
        let engine = ScoringEngine::default();
        let tier_at = |s: f64| {
            engine
                .score(&raw("2330"), &signals(DimensionScores::uniform(s)), &calm("2330"))
                .candidate
                .tier
        };
        assert_eq!(tier_at(100.0), Tier::StrongRecommend);
        assert_eq!(tier_at(80.0), Tier::Recommend);
        assert_eq!(tier_at(70.0), Tier::Consider);
        assert_eq!(tier_at(50.0), Tier::Reject);
    }

    #[test]
    fn veto_overrides_a_perfect_score() {
        let engine = ScoringEngine::default();
        let warning = ReversalWarning {
            symbol: "2330".to_string(),
            level: WarningLevel::HARD_VETO,
            reasons: BTreeSet::from([
                ReversalRule::FlowDrop,
                ReversalRule::MomentumDecay,
                ReversalRule::ShortReversal,
            ]),
        };
        let scored = engine.score(
            &raw("2330"),
            &signals(DimensionScores::uniform(100.0)),
            &warning,
        );
        assert_eq!(scored.candidate.tier, Tier::Reject);
        assert!((scored.candidate.composite_score - 100.0).abs() < 1e-9);
        assert!(scored.is_vetoed());
        match scored.decision {
            Decision::Vetoed { level, rules } => {
                assert_eq!(level, WarningLevel::HARD_VETO);
                assert_eq!(rules.len(), 3);
            }
            Decision::Scored => panic!("expected veto"),
        }
    }

    #[test]
    fn ranking_breaks_ties_by_institutional_then_symbol() {
        let engine = ScoringEngine::default();
        let mut a = DimensionScores::uniform(70.0);
        a.institutional = 80.0;
        a.catalyst = 60.0;
        let b = DimensionScores::uniform(70.0);
        let mut items = vec![
            engine.score(&raw("2454"), &signals(b), &calm("2454")),
            engine.score(&raw("2303"), &signals(b), &calm("2303")),
            engine.score(&raw("3034"), &signals(a), &calm("3034")),
            engine.score(
                &raw("1101"),
                &signals(DimensionScores::uniform(90.0)),
                &calm("1101"),
            ),
        ];
        rank(&mut items);
        let order: Vec<&str> = items.iter().map(|s| s.candidate.symbol.as_str()).collect();
        assert_eq!(order, vec!["1101", "3034", "2303", "2454"]);
    }

    #[test]
    fn scoring_is_idempotent() {
        let engine = ScoringEngine::default();
        let s = signals(DimensionScores {
            catalyst: 71.3,
            institutional: 64.9,
            industry_logic: 88.0,
            price_position: 12.5,
            technical: 47.5,
        });
        let first = engine.score(&raw("6505"), &s, &calm("6505"));
        for _ in 0..5 {
            assert_eq!(engine.score(&raw("6505"), &s, &calm("6505")), first);
        }
    }
}
