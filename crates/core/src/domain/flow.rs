use anyhow::ensure;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One trading day's institutional net buy/sell for a symbol, in lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSample {
    pub symbol: String,
    pub date: NaiveDate,
    pub foreign_net: i64,
    pub trust_net: i64,
    pub dealer_net: i64,
}

/// Which investor classes contribute to the daily net used by the analyzers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvestorSet {
    pub foreign: bool,
    pub trust: bool,
    pub dealer: bool,
}

impl Default for InvestorSet {
    fn default() -> Self {
        Self {
            foreign: true,
            trust: true,
            dealer: true,
        }
    }
}

impl InvestorSet {
    /// Parses `"foreign,trust"`-style lists. Unknown names make the whole list invalid.
    pub fn parse(s: &str) -> Option<Self> {
        let mut out = Self {
            foreign: false,
            trust: false,
            dealer: false,
        };
        for part in s.split(',') {
            match part.trim().to_ascii_lowercase().as_str() {
                "" => continue,
                "foreign" => out.foreign = true,
                "trust" => out.trust = true,
                "dealer" => out.dealer = true,
                _ => return None,
            }
        }
        if out.is_empty() {
            return None;
        }
        Some(out)
    }

    pub fn is_empty(&self) -> bool {
        !(self.foreign || self.trust || self.dealer)
    }

    pub fn net(&self, sample: &FlowSample) -> i64 {
        let mut total = 0;
        if self.foreign {
            total += sample.foreign_net;
        }
        if self.trust {
            total += sample.trust_net;
        }
        if self.dealer {
            total += sample.dealer_net;
        }
        total
    }
}

/// Date-ordered, append-only flow history for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "UncheckedFlowSeries")]
pub struct FlowSeries {
    symbol: String,
    samples: Vec<FlowSample>,
}

#[derive(Deserialize)]
struct UncheckedFlowSeries {
    symbol: String,
    samples: Vec<FlowSample>,
}

impl TryFrom<UncheckedFlowSeries> for FlowSeries {
    type Error = anyhow::Error;

    fn try_from(raw: UncheckedFlowSeries) -> anyhow::Result<Self> {
        FlowSeries::from_samples(raw.symbol, raw.samples)
    }
}

impl FlowSeries {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            samples: Vec::new(),
        }
    }

    /// Builds a series from samples in any order. Duplicate dates or foreign symbols are
    /// rejected rather than merged.
    pub fn from_samples(
        symbol: impl Into<String>,
        mut samples: Vec<FlowSample>,
    ) -> anyhow::Result<Self> {
        samples.sort_by_key(|s| s.date);
        let mut out = Self::new(symbol);
        for sample in samples {
            out.push(sample)?;
        }
        Ok(out)
    }

    pub fn push(&mut self, sample: FlowSample) -> anyhow::Result<()> {
        ensure!(
            sample.symbol == self.symbol,
            "flow sample symbol mismatch: series {}, sample {}",
            self.symbol,
            sample.symbol
        );
        if let Some(last) = self.samples.last() {
            ensure!(
                sample.date > last.date,
                "flow samples must be appended in date order ({} after {})",
                sample.date,
                last.date
            );
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn samples(&self) -> &[FlowSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.samples.last().map(|s| s.date)
    }

    /// The most recent `lookback` samples, oldest first.
    pub fn window(&self, lookback: usize) -> &[FlowSample] {
        let start = self.samples.len().saturating_sub(lookback);
        &self.samples[start..]
    }
}

#[cfg(test)]
pub(crate) fn series_from_nets(symbol: &str, nets: &[i64]) -> FlowSeries {
    let start = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
    let samples = nets
        .iter()
        .enumerate()
        .map(|(i, n)| FlowSample {
            symbol: symbol.to_string(),
            date: start + chrono::Duration::days(i as i64),
            foreign_net: *n,
            trust_net: 0,
            dealer_net: 0,
        })
        .collect();
    FlowSeries::from_samples(symbol, samples).unwrap()
}
