use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::candidate::CatalystSignal;
use crate::domain::flow::{FlowSample, FlowSeries};

/// `GET /v1/institutional_flows?symbol=..&lookback_days=..`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSeriesResponse {
    pub symbol: String,
    pub items: Vec<FlowItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowItem {
    pub date: NaiveDate,
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
}

impl FlowSeriesResponse {
    pub fn into_series(self) -> anyhow::Result<FlowSeries> {
        let symbol = self.symbol;
        let samples = self
            .items
            .into_iter()
            .map(|i| FlowSample {
                symbol: symbol.clone(),
                date: i.date,
                foreign_net: i.foreign_net,
                trust_net: i.trust_net,
                dealer_net: i.dealer_net,
            })
            .collect();
        FlowSeries::from_samples(symbol, samples)
    }
}

/// `GET /v1/close_prices?symbol=..&date=..`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosePriceResponse {
    pub symbol: String,
    pub date: NaiveDate,
    pub close: Option<f64>,
}

/// `GET /v1/catalysts?symbol=..`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystResponse {
    pub symbol: String,
    pub strength: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl CatalystResponse {
    pub fn into_signal(self) -> Option<CatalystSignal> {
        let strength = self.strength.filter(|s| s.is_finite())?;
        Some(CatalystSignal {
            strength,
            tags: self.tags,
        })
    }
}
