use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::domain::flow::FlowSeries;
use crate::domain::recommendation::PositionTier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Catalyst,
    Institutional,
    IndustryLogic,
    PricePosition,
    Technical,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Catalyst,
        Dimension::Institutional,
        Dimension::IndustryLogic,
        Dimension::PricePosition,
        Dimension::Technical,
    ];
}

/// Per-dimension scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionScores {
    pub catalyst: f64,
    pub institutional: f64,
    pub industry_logic: f64,
    pub price_position: f64,
    pub technical: f64,
}

impl DimensionScores {
    pub fn uniform(score: f64) -> Self {
        Self {
            catalyst: score,
            institutional: score,
            industry_logic: score,
            price_position: score,
            technical: score,
        }
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

    pub fn set(&mut self, dim: Dimension, score: f64) {
        let slot = match dim {
            Dimension::Catalyst => &mut self.catalyst,
            Dimension::Institutional => &mut self.institutional,
            Dimension::IndustryLogic => &mut self.industry_logic,
            Dimension::PricePosition => &mut self.price_position,
            Dimension::Technical => &mut self.technical,
        };
        *slot = score;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Collaborator-extracted catalyst strength in [0, 1] with its qualitative tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalystSignal {
    pub strength: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Unscored per-symbol inputs as supplied by collaborators. Every signal is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCandidate {
    pub symbol: String,
    pub name: String,
    pub industry: String,
    #[serde(default)]
    pub flow: Option<FlowSeries>,
    /// Daily closes, oldest first.
    #[serde(default)]
    pub prices: Vec<PriceBar>,
    #[serde(default)]
    pub catalyst: Option<CatalystSignal>,
    /// Industry-logic fit rating on a 0..=10 scale.
    #[serde(default)]
    pub industry_logic: Option<f64>,
}

impl RawCandidate {
    pub fn latest_close(&self) -> Option<f64> {
        self.prices
            .last()
            .map(|b| b.close)
            .filter(|c| c.is_finite() && *c > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    StrongRecommend,
    Recommend,
    Consider,
    Reject,
}

impl Tier {
    pub fn from_score(score: f64) -> Self {
        if score >= 85.0 {
            Tier::StrongRecommend
        } else if score >= 75.0 {
            Tier::Recommend
        } else if score >= 65.0 {
            Tier::Consider
        } else {
            Tier::Reject
        }
    }

    pub fn position_tier(&self) -> Option<PositionTier> {
        match self {
            Tier::StrongRecommend => Some(PositionTier::Heavy),
            Tier::Recommend => Some(PositionTier::Standard),
            Tier::Consider => Some(PositionTier::Light),
            Tier::Reject => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::StrongRecommend => "strong_recommend",
            Tier::Recommend => "recommend",
            Tier::Consider => "consider",
            Tier::Reject => "reject",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            Tier::StrongRecommend,
            Tier::Recommend,
            Tier::Consider,
            Tier::Reject,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

/// Dimensions that fell back to the neutral default for lack of raw input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCompleteness {
    pub missing: BTreeSet<Dimension>,
}

impl DataCompleteness {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub symbol: String,
    pub name: String,
    pub industry: String,
    pub dimension_scores: DimensionScores,
    pub composite_score: f64,
    pub tier: Tier,
    pub completeness: DataCompleteness,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries() {
        assert_eq!(Tier::from_score(85.0), Tier::StrongRecommend);
        assert_eq!(Tier::from_score(84.99), Tier::Recommend);
        assert_eq!(Tier::from_score(75.0), Tier::Recommend);
        assert_eq!(Tier::from_score(74.99), Tier::Consider);
        assert_eq!(Tier::from_score(65.0), Tier::Consider);
        assert_eq!(Tier::from_score(64.99), Tier::Reject);
        assert_eq!(Tier::Reject.position_tier(), None);
    }

    #[test]
    fn raw_candidate_deserializes_with_only_identity_fields() {
        let v = serde_json::json!({"symbol": "2330", "name": "TSMC", "industry": "semis"});
        let c: RawCandidate = serde_json::from_value(v).unwrap();
        assert!(c.flow.is_none());
        assert!(c.prices.is_empty());
        assert_eq!(c.latest_close(), None);
    }
}
