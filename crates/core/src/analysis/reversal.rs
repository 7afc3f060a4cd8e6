use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::analysis::chip_flow::{FlowStats, Momentum};
use crate::domain::reason::ReversalRule;

/// Reversal-warning severity, 0 (none) through 4 (hard veto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WarningLevel(u8);

impl WarningLevel {
    pub const NONE: WarningLevel = WarningLevel(0);
    pub const HARD_VETO: WarningLevel = WarningLevel(4);
    /// Levels at or above this force a reject in scoring.
    pub const VETO_FLOOR: WarningLevel = WarningLevel(3);

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_veto(&self) -> bool {
        *self >= Self::VETO_FLOOR
    }

    fn from_fired(count: usize) -> Self {
        match count {
            0 => WarningLevel(0),
            1 => WarningLevel(1),
            2 => WarningLevel(2),
            _ => Self::HARD_VETO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReversalWarning {
    pub symbol: String,
    pub level: WarningLevel,
    pub reasons: BTreeSet<ReversalRule>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReversalOptions {
    /// Day-over-day fall in net buying that counts as a drop (0.5 = more than half).
    pub drop_ratio: f64,
    /// Late/early momentum deceleration that counts as decay (0.3 = more than 30%).
    pub momentum_decay: f64,
    /// Buying days required before a 1-2 day flip counts as a reversal.
    pub min_prior_streak: usize,
    pub overextended_percentile: f64,
}

impl Default for ReversalOptions {
    fn default() -> Self {
        Self {
            drop_ratio: 0.5,
            momentum_decay: 0.3,
            min_prior_streak: 3,
            overextended_percentile: 80.0,
        }
    }
}

/// Classifies the current window only; it never consults earlier classifications.
#[derive(Debug, Clone, Default)]
pub struct ReversalDetector {
    options: ReversalOptions,
}

impl ReversalDetector {
    pub fn new(options: ReversalOptions) -> Self {
        Self { options }
    }

    pub fn detect(
        &self,
        symbol: &str,
        flow: Option<&FlowStats>,
        price_percentile: Option<f64>,
    ) -> ReversalWarning {
        let mut reasons = BTreeSet::new();

        if let Some(stats) = flow {
            if self.flow_dropped(&stats.daily_nets) {
                reasons.insert(ReversalRule::FlowDrop);
            }
            if self.momentum_decayed(stats) {
                reasons.insert(ReversalRule::MomentumDecay);
            }
            if self.short_reversal(stats) {
                reasons.insert(ReversalRule::ShortReversal);
            }
        }

        let overextended = price_percentile
            .map(|p| p > self.options.overextended_percentile)
            .unwrap_or(false);
        if overextended && !reasons.is_empty() {
            reasons.insert(ReversalRule::Overextended);
        }

        let level = WarningLevel::from_fired(reasons.len());
        if level > WarningLevel::NONE {
            tracing::debug!(%symbol, level = level.value(), ?reasons, "reversal warning");
        }

        ReversalWarning {
            symbol: symbol.to_string(),
            level,
            reasons,
        }
    }

    /// Only a shrinking buying day counts. A selling day that shrinks is easing pressure, not
    /// reversal risk for an upward call.
    fn flow_dropped(&self, nets: &[i64]) -> bool {
        let [.., prior, latest] = nets else {
            return false;
        };
        *prior > 0 && (*latest as f64) < *prior as f64 * (1.0 - self.options.drop_ratio)
    }

    fn momentum_decayed(&self, stats: &FlowStats) -> bool {
        match stats.momentum {
            Momentum::Ratio(r) => {
                stats.streak.early_window_net > 0 && r < 1.0 - self.options.momentum_decay
            }
            Momentum::New | Momentum::Flat => false,
        }
    }

    /// The newest one or two days are non-noise selling, directly after an unbroken run of
    /// buying days.
    fn short_reversal(&self, stats: &FlowStats) -> bool {
        let newest_first: Vec<i64> = stats.daily_nets.iter().rev().copied().collect();
        let needed = self.options.min_prior_streak.max(1);
        (1..=2).any(|k| {
            if newest_first.len() < k + needed {
                return false;
            }
            let flipped = newest_first[..k]
                .iter()
                .all(|n| *n < 0 && !stats.is_noise(*n));
            let prior_streak = newest_first[k..k + needed].iter().all(|n| *n > 0);
            flipped && prior_streak
        })
    }
}
