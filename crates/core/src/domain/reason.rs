use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::candidate::Dimension;

/// Machine-readable outcome codes attached to every rejection and every non-success
/// verification state. Stored as snake_case text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // Scoring and selection.
    InvalidInput,
    DataIncomplete,
    BelowThreshold,
    ReversalVeto,
    MissingEntryPrice,
    IndustryCap,
    TargetCountReached,
    InsufficientCandidates,
    TooFewIndustries,

    // Verification.
    AwaitingHorizon,
    PriceNotAvailable,
    LookupFailed,
    DirectionWrong,
    OutsideTargetRange,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::InvalidInput => "invalid_input",
            ReasonCode::DataIncomplete => "data_incomplete",
            ReasonCode::BelowThreshold => "below_threshold",
            ReasonCode::ReversalVeto => "reversal_veto",
            ReasonCode::MissingEntryPrice => "missing_entry_price",
            ReasonCode::IndustryCap => "industry_cap",
            ReasonCode::TargetCountReached => "target_count_reached",
            ReasonCode::InsufficientCandidates => "insufficient_candidates",
            ReasonCode::TooFewIndustries => "too_few_industries",
            ReasonCode::AwaitingHorizon => "awaiting_horizon",
            ReasonCode::PriceNotAvailable => "price_not_available",
            ReasonCode::LookupFailed => "lookup_failed",
            ReasonCode::DirectionWrong => "direction_wrong",
            ReasonCode::OutsideTargetRange => "outside_target_range",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let all = [
            ReasonCode::InvalidInput,
            ReasonCode::DataIncomplete,
            ReasonCode::BelowThreshold,
            ReasonCode::ReversalVeto,
            ReasonCode::MissingEntryPrice,
            ReasonCode::IndustryCap,
            ReasonCode::TargetCountReached,
            ReasonCode::InsufficientCandidates,
            ReasonCode::TooFewIndustries,
            ReasonCode::AwaitingHorizon,
            ReasonCode::PriceNotAvailable,
            ReasonCode::LookupFailed,
            ReasonCode::DirectionWrong,
            ReasonCode::OutsideTargetRange,
        ];
        all.into_iter().find(|c| c.as_str() == s)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named reversal-warning rules; a warning records which of them fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReversalRule {
    FlowDrop,
    MomentumDecay,
    ShortReversal,
    Overextended,
}

/// A candidate that did not make the final recommendation set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    pub symbol: String,
    pub reasons: Vec<ReasonCode>,
    #[serde(default)]
    pub reversal_rules: Vec<ReversalRule>,
    pub detail: Option<String>,
}

impl Rejection {
    pub fn new(symbol: impl Into<String>, reason: ReasonCode) -> Self {
        Self {
            symbol: symbol.into(),
            reasons: vec![reason],
            reversal_rules: Vec::new(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("data incomplete for {symbol}: missing {missing:?}")]
    DataIncomplete {
        symbol: String,
        missing: Vec<Dimension>,
    },

    #[error("lookup unavailable for {symbol} on {date}: {detail}")]
    LookupUnavailable {
        symbol: String,
        date: NaiveDate,
        detail: String,
    },

    #[error("selection constraints not satisfied: {reasons:?}")]
    ConstraintInfeasible { reasons: Vec<ReasonCode> },

    #[error("{symbol} vetoed at reversal level {level}: {rules:?}")]
    VetoOverride {
        symbol: String,
        level: u8,
        rules: Vec<ReversalRule>,
    },
}

impl EngineError {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            EngineError::DataIncomplete { .. } => ReasonCode::DataIncomplete,
            EngineError::LookupUnavailable { .. } => ReasonCode::LookupFailed,
            EngineError::ConstraintInfeasible { reasons } => reasons
                .first()
                .copied()
                .unwrap_or(ReasonCode::InsufficientCandidates),
            EngineError::VetoOverride { .. } => ReasonCode::ReversalVeto,
        }
    }
}
