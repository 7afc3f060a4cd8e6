use anyhow::ensure;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::candidate::Tier;

/// One scoring run's accepted recommendations, as written to the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationBatch {
    pub batch_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub items: Vec<Recommendation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub name: String,
    pub industry: String,
    pub direction: Direction,
    pub entry_price: f64,
    pub target_range: TargetRange,
    pub stop_loss: f64,
    pub position_tier: PositionTier,
    pub tier: Tier,
    pub composite_score: f64,
    pub recommendation_date: NaiveDate,
}

impl Recommendation {
    pub fn reference(&self) -> RecommendationRef {
        RecommendationRef {
            batch_date: self.recommendation_date,
            symbol: self.symbol.clone(),
        }
    }
}

/// Key of a recommendation in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecommendationRef {
    pub batch_date: NaiveDate,
    pub symbol: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "neutral" => Some(Direction::Neutral),
            _ => None,
        }
    }

    /// Whether a realized move agrees with the prediction. Neutral calls are not graded on
    /// direction.
    pub fn agrees_with(&self, pct_change: f64) -> bool {
        match self {
            Direction::Up => pct_change > 0.0,
            Direction::Down => pct_change < 0.0,
            Direction::Neutral => true,
        }
    }
}

/// Suggested allocation band for a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionTier {
    /// 15-20% of the portfolio.
    Heavy,
    /// 10-15%.
    Standard,
    /// 5-10%.
    Light,
}

impl PositionTier {
    pub fn allocation_pct(&self) -> (u8, u8) {
        match self {
            PositionTier::Heavy => (15, 20),
            PositionTier::Standard => (10, 15),
            PositionTier::Light => (5, 10),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionTier::Heavy => "heavy",
            PositionTier::Standard => "standard",
            PositionTier::Light => "light",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "heavy" => Some(PositionTier::Heavy),
            "standard" => Some(PositionTier::Standard),
            "light" => Some(PositionTier::Light),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetRange {
    pub min: f64,
    pub max: f64,
}

impl TargetRange {
    pub fn contains(&self, price: f64) -> bool {
        self.min <= price && price <= self.max
    }
}

/// Percent offsets from the entry price used to derive targets and stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetPolicy {
    pub target_min_pct: f64,
    pub target_max_pct: f64,
    pub stop_loss_pct: f64,
}

impl Default for TargetPolicy {
    fn default() -> Self {
        Self {
            target_min_pct: 3.0,
            target_max_pct: 8.0,
            stop_loss_pct: 5.0,
        }
    }
}

impl TargetPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.target_min_pct.is_finite() && self.target_max_pct.is_finite(),
            "target percentages must be finite"
        );
        ensure!(
            self.target_min_pct <= self.target_max_pct,
            "TARGET_MIN_PCT ({}) must not exceed TARGET_MAX_PCT ({})",
            self.target_min_pct,
            self.target_max_pct
        );
        ensure!(
            self.stop_loss_pct > 0.0 && self.stop_loss_pct < 100.0,
            "STOP_LOSS_PCT must be in (0, 100) (got {})",
            self.stop_loss_pct
        );
        Ok(())
    }

    pub fn target_range(&self, entry_price: f64) -> TargetRange {
        TargetRange {
            min: round2(entry_price * (1.0 + self.target_min_pct / 100.0)),
            max: round2(entry_price * (1.0 + self.target_max_pct / 100.0)),
        }
    }

    pub fn stop_loss(&self, entry_price: f64) -> f64 {
        round2(entry_price * (1.0 - self.stop_loss_pct / 100.0))
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
