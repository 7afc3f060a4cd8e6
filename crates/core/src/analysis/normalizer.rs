use crate::analysis::chip_flow::{FlowStats, FlowTrend, InvestorAlignment};
use crate::domain::candidate::{
    CatalystSignal, DataCompleteness, Dimension, DimensionScores, PriceBar, RawCandidate,
};
use crate::domain::reason::EngineError;

/// Score assigned to a dimension whose raw input is missing.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Minimum bars before the technical dimension is scored.
const MIN_TECHNICAL_BARS: usize = 10;
const SHORT_MA: usize = 5;
const LONG_MA: usize = 20;
const VOLUME_BASELINE_DAYS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizerOptions {
    /// Trailing closes used for the price-position percentile.
    pub price_window_days: usize,
}

impl Default for NormalizerOptions {
    fn default() -> Self {
        Self {
            price_window_days: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSignals {
    pub scores: DimensionScores,
    pub completeness: DataCompleteness,
    /// Percentile rank (0..=100) of the latest close; feeds the overextension check.
    pub price_percentile: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct SignalNormalizer {
    options: NormalizerOptions,
}

impl SignalNormalizer {
    pub fn new(options: NormalizerOptions) -> Self {
        Self { options }
    }

    pub fn normalize(&self, raw: &RawCandidate, flow: Option<&FlowStats>) -> NormalizedSignals {
        let closes: Vec<f64> = raw.prices.iter().map(|b| b.close).collect();
        let window_start = closes.len().saturating_sub(self.options.price_window_days);
        let price_percentile = price_percentile(&closes[window_start..]);

        let raw_scores = [
            (Dimension::Catalyst, raw.catalyst.as_ref().map(catalyst_score)),
            (Dimension::Institutional, flow.map(institutional_score)),
            (
                Dimension::IndustryLogic,
                raw.industry_logic.map(industry_logic_score),
            ),
            (
                Dimension::PricePosition,
                price_percentile.map(price_position_score),
            ),
            (Dimension::Technical, technical_score(&raw.prices)),
        ];

        let mut scores = DimensionScores::uniform(NEUTRAL_SCORE);
        let mut completeness = DataCompleteness::default();
        for (dim, score) in raw_scores {
            match score {
                Some(s) => scores.set(dim, s.clamp(0.0, 100.0)),
                None => {
                    completeness.missing.insert(dim);
                }
            }
        }

        if !completeness.is_complete() {
            let err = EngineError::DataIncomplete {
                symbol: raw.symbol.clone(),
                missing: completeness.missing.iter().copied().collect(),
            };
            tracing::debug!(symbol = %raw.symbol, error = %err, "neutral default applied");
        }

        NormalizedSignals {
            scores,
            completeness,
            price_percentile,
        }
    }
}

pub fn catalyst_score(signal: &CatalystSignal) -> f64 {
    signal.strength.clamp(0.0, 1.0) * 100.0
}

/// Flow classification sets the base; foreign/trust agreement nudges it.
pub fn institutional_score(stats: &FlowStats) -> f64 {
    let base: f64 = match stats.trend {
        FlowTrend::Accumulation => 85.0,
        FlowTrend::Buying => 75.0,
        FlowTrend::LeaningBullish => 60.0,
        FlowTrend::Neutral => 50.0,
        FlowTrend::Reversing => 35.0,
        FlowTrend::Distribution => 20.0,
    };
    let alignment: f64 = match stats.alignment {
        InvestorAlignment::BothBuying => 10.0,
        InvestorAlignment::BothSelling => -10.0,
        InvestorAlignment::Opposed => -5.0,
        InvestorAlignment::Mixed => 0.0,
    };
    (base + alignment).clamp(0.0, 100.0)
}

/// Collaborator rating on a 0..=10 scale.
pub fn industry_logic_score(rating: f64) -> f64 {
    rating.clamp(0.0, 10.0) * 10.0
}

/// Share of the earlier closes in the window lying below the latest close, ties counted
/// half. Needs at least two closes.
pub fn price_percentile(closes: &[f64]) -> Option<f64> {
    let (latest, earlier) = closes.split_last()?;
    if earlier.is_empty() {
        return None;
    }
    let below = earlier.iter().filter(|c| **c < *latest).count() as f64;
    let equal = earlier.iter().filter(|c| **c == *latest).count() as f64;
    Some((below + 0.5 * equal) / earlier.len() as f64 * 100.0)
}

/// Peaks at the 40th percentile and falls off towards both extremes, steepest on the
/// over-extended side (100th percentile scores 25, 0th scores 50).
pub fn price_position_score(percentile: f64) -> f64 {
    (100.0 - (percentile - 40.0).abs() * 1.25).clamp(0.0, 100.0)
}

/// Moving-average trend and volume ratio, equally weighted.
pub fn technical_score(bars: &[PriceBar]) -> Option<f64> {
    if bars.len() < MIN_TECHNICAL_BARS {
        return None;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let latest = *closes.last()?;
    let ma_short = mean(&closes[closes.len() - SHORT_MA..]);
    let ma_long = mean(&closes[closes.len().saturating_sub(LONG_MA)..]);

    let trend: f64 = if latest > ma_short && ma_short > ma_long {
        85.0
    } else if ma_short > ma_long {
        65.0
    } else if latest > ma_long {
        50.0
    } else {
        30.0
    };

    let (prior, last) = bars.split_at(bars.len() - 1);
    let baseline = mean(
        &prior[prior.len() - VOLUME_BASELINE_DAYS..]
            .iter()
            .map(|b| b.volume)
            .collect::<Vec<_>>(),
    );
    let volume = if baseline > 0.0 {
        match last[0].volume / baseline {
            r if r > 3.0 => 90.0,
            r if r > 2.0 => 80.0,
            r if r > 1.5 => 70.0,
            r if r > 1.0 => 60.0,
            _ => 40.0,
        }
    } else {
        NEUTRAL_SCORE
    };

    Some(0.5 * trend + 0.5 * volume)
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::chip_flow::ChipFlowAnalyzer;
    use crate::domain::flow::series_from_nets;
    use chrono::NaiveDate;

    fn bars(closes: &[f64], volumes: &[f64]) -> Vec<PriceBar> {
        let start = NaiveDate::from_ymd_opt(2026, 1, 5).unwrap();
        closes
            .iter()
            .zip(volumes.iter())
            .enumerate()
            .map(|(i, (c, v))| PriceBar {
                date: start + chrono::Duration::days(i as i64),
                close: *c,
                volume: *v,
            })
            .collect()
    }

    fn raw(symbol: &str) -> RawCandidate {
        RawCandidate {
            symbol: symbol.to_string(),
            name: symbol.to_string(),
            industry: "semis".to_string(),
            flow: None,
            prices: Vec::new(),
            catalyst: None,
            industry_logic: None,
        }
    }

    #[test]
    fn missing_inputs_fall_back_to_neutral_and_are_flagged() {
        let out = SignalNormalizer::default().normalize(&raw("2330"), None);
        assert_eq!(out.scores, DimensionScores::uniform(NEUTRAL_SCORE));
        assert_eq!(out.completeness.missing.len(), 5);
        assert_eq!(out.price_percentile, None);
    }

    #[test]
    fn complete_inputs_are_not_flagged() {
        let mut c = raw("2330");
        c.catalyst = Some(CatalystSignal {
            strength: 0.9,
            tags: vec!["ai-server".to_string()],
        });
        c.industry_logic = Some(8.0);
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        c.prices = bars(&closes, &[1000.0; 20]);
        let stats = ChipFlowAnalyzer::default()
            .analyze(&series_from_nets("2330", &[10, 12, 15, 14, 16]))
            .unwrap();

        let out = SignalNormalizer::default().normalize(&c, Some(&stats));
        assert!(out.completeness.is_complete());
        assert_eq!(out.scores.catalyst, 90.0);
        assert_eq!(out.scores.industry_logic, 80.0);
        // Accumulation, foreign-only flow: no alignment bonus.
        assert_eq!(out.scores.institutional, 85.0);
        assert_eq!(out.price_percentile, Some(100.0));
        assert_eq!(out.scores.price_position, 25.0);
    }

    #[test]
    fn institutional_score_adds_alignment_to_trend_base() {
        let mut stats = ChipFlowAnalyzer::default()
            .analyze(&series_from_nets("2330", &[10, 12, 15, 14, 16]))
            .unwrap();
        let cases = [
            (FlowTrend::Accumulation, InvestorAlignment::BothBuying, 95.0),
            (FlowTrend::Buying, InvestorAlignment::Mixed, 75.0),
            (FlowTrend::Reversing, InvestorAlignment::Opposed, 30.0),
            (FlowTrend::Distribution, InvestorAlignment::BothSelling, 10.0),
        ];
        for (trend, alignment, expected) in cases {
            stats.trend = trend;
            stats.alignment = alignment;
            assert_eq!(institutional_score(&stats), expected, "{trend:?} {alignment:?}");
        }
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        assert_eq!(
            catalyst_score(&CatalystSignal {
                strength: 3.0,
                tags: vec![]
            }),
            100.0
        );
        assert_eq!(industry_logic_score(-2.0), 0.0);
    }

    #[test]
    fn percentile_ranks_latest_close() {
        assert_eq!(price_percentile(&[10.0]), None);
        assert_eq!(price_percentile(&[10.0, 11.0]), Some(100.0));
        assert_eq!(price_percentile(&[12.0, 11.0]), Some(0.0));
        assert_eq!(price_percentile(&[10.0, 12.0, 14.0, 12.0]), Some(50.0));
    }

    #[test]
    fn price_position_penalizes_extremes() {
        assert_eq!(price_position_score(40.0), 100.0);
        assert_eq!(price_position_score(0.0), 50.0);
        assert_eq!(price_position_score(80.0), 50.0);
        assert_eq!(price_position_score(100.0), 25.0);
        assert!(price_position_score(95.0) < price_position_score(60.0));
    }

    #[test]
    fn technical_rewards_uptrend_on_volume() {
        let closes: Vec<f64> = (0..20).map(|i| 50.0 + i as f64).collect();
        let mut volumes = vec![1000.0; 20];
        volumes[19] = 3500.0;
        assert_eq!(technical_score(&bars(&closes, &volumes)), Some(87.5));

        let falling: Vec<f64> = (0..20).map(|i| 80.0 - i as f64).collect();
        assert_eq!(technical_score(&bars(&falling, &[1000.0; 20])), Some(35.0));

        assert_eq!(technical_score(&bars(&closes[..9], &volumes[..9])), None);
    }
}
