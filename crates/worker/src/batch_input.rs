use anyhow::Context;
use chipflow_core::domain::candidate::RawCandidate;
use chipflow_core::domain::contract::RawCandidateBatch;
use chipflow_core::ingest::MarketDataProvider;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct EnrichOptions {
    /// Fill in flow series the batch file does not carry.
    pub flows: bool,
    /// Fill in catalyst signals the batch file does not carry.
    pub catalysts: bool,
    pub lookback_days: usize,
}

impl Default for EnrichOptions {
    fn default() -> Self {
        Self {
            flows: true,
            catalysts: true,
            lookback_days: 10,
        }
    }
}

impl EnrichOptions {
    pub fn from_env(lookback_days: usize) -> Self {
        let mut out = Self {
            lookback_days,
            ..Self::default()
        };

        if let Ok(s) = std::env::var("ENRICH_FLOWS") {
            if let Ok(b) = s.parse::<bool>() {
                out.flows = b;
            }
        }

        if let Ok(s) = std::env::var("ENRICH_CATALYSTS") {
            if let Ok(b) = s.parse::<bool>() {
                out.catalysts = b;
            }
        }

        out
    }
}

/// Reads a batch file, returning the parsed batch and the raw JSON kept for the run audit row.
pub fn load_batch(path: &Path) -> anyhow::Result<(RawCandidateBatch, serde_json::Value)> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read batch file {}", path.display()))?;
    let raw = serde_json::from_str::<serde_json::Value>(&text)
        .with_context(|| format!("batch file {} is not valid JSON", path.display()))?;
    let batch = serde_json::from_value::<RawCandidateBatch>(raw.clone())
        .with_context(|| format!("batch file {} does not match the candidate contract", path.display()))?;
    Ok((batch, raw))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichReport {
    pub flows_filled: usize,
    pub catalysts_filled: usize,
    pub failures: usize,
}

/// Fills missing inputs from the provider. A failed or empty fetch leaves the field absent so
/// the normalizer falls back to its neutral score.
pub async fn enrich_candidates(
    provider: &dyn MarketDataProvider,
    candidates: &mut [RawCandidate],
    opts: &EnrichOptions,
) -> EnrichReport {
    let mut report = EnrichReport::default();

    for c in candidates.iter_mut() {
        if opts.flows && c.flow.is_none() {
            match provider.fetch_flow_series(&c.symbol, opts.lookback_days).await {
                Ok(Some(series)) => {
                    c.flow = Some(series);
                    report.flows_filled += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(symbol = %c.symbol, error = %err, "flow fetch failed; scoring without it");
                }
            }
        }

        if opts.catalysts && c.catalyst.is_none() {
            match provider.fetch_catalyst_signal(&c.symbol).await {
                Ok(Some(signal)) => {
                    c.catalyst = Some(signal);
                    report.catalysts_filled += 1;
                }
                Ok(None) => {}
                Err(err) => {
                    report.failures += 1;
                    tracing::warn!(symbol = %c.symbol, error = %err, "catalyst fetch failed; scoring without it");
                }
            }
        }
    }

    tracing::info!(
        provider = provider.provider_name(),
        flows_filled = report.flows_filled,
        catalysts_filled = report.catalysts_filled,
        failures = report.failures,
        "enriched candidates"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipflow_core::domain::candidate::CatalystSignal;
    use chipflow_core::domain::flow::{FlowSample, FlowSeries};
    use chrono::NaiveDate;

    struct StubProvider;

    #[async_trait::async_trait]
    impl MarketDataProvider for StubProvider {
        fn provider_name(&self) -> &'static str {
            "stub"
        }

        async fn fetch_flow_series(&self, symbol: &str, _lookback_days: usize) -> anyhow::Result<Option<FlowSeries>> {
            match symbol {
                "2330" => {
                    let sample = FlowSample {
                        symbol: symbol.to_string(),
                        date: NaiveDate::from_ymd_opt(2026, 3, 6).unwrap(),
                        foreign_net: 500,
                        trust_net: 20,
                        dealer_net: -5,
                    };
                    Ok(Some(FlowSeries::from_samples(symbol, vec![sample])?))
                }
                "2303" => anyhow::bail!("upstream 503"),
                _ => Ok(None),
            }
        }

        async fn fetch_close_price(&self, _symbol: &str, _date: NaiveDate) -> anyhow::Result<Option<f64>> {
            Ok(None)
        }

        async fn fetch_catalyst_signal(&self, symbol: &str) -> anyhow::Result<Option<CatalystSignal>> {
            Ok((symbol == "2330").then(|| CatalystSignal {
                strength: 0.8,
                tags: vec!["capex".to_string()],
            }))
        }
    }

    fn bare(symbol: &str) -> RawCandidate {
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

    #[tokio::test]
    async fn enrichment_tolerates_provider_failures() {
        let mut candidates = vec![bare("2330"), bare("2303"), bare("6505")];
        let report = enrich_candidates(&StubProvider, &mut candidates, &EnrichOptions::default()).await;

        assert_eq!(
            report,
            EnrichReport {
                flows_filled: 1,
                catalysts_filled: 1,
                failures: 1,
            }
        );
        assert!(candidates[0].flow.is_some());
        assert!(candidates[0].catalyst.is_some());
        assert!(candidates[1].flow.is_none());
        assert!(candidates[2].flow.is_none());
    }

    #[tokio::test]
    async fn supplied_inputs_are_not_overwritten() {
        let mut c = bare("2330");
        c.catalyst = Some(CatalystSignal {
            strength: 0.1,
            tags: Vec::new(),
        });
        let opts = EnrichOptions {
            flows: false,
            ..EnrichOptions::default()
        };
        let mut candidates = vec![c];
        let report = enrich_candidates(&StubProvider, &mut candidates, &opts).await;
        assert_eq!(report, EnrichReport::default());
        assert_eq!(candidates[0].catalyst.as_ref().unwrap().strength, 0.1);
        assert!(candidates[0].flow.is_none());
    }

    #[test]
    fn loads_batch_files() {
        let dir = std::env::temp_dir().join(format!("chipflow-batch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("batch.json");
        std::fs::write(
            &path,
            r#"{"as_of_date":"2026-03-06","candidates":[{"symbol":"2330","name":"TSMC","industry":"semis","prices":[{"date":"2026-03-06","close":1000.0}]}]}"#,
        )
        .unwrap();

        let (batch, raw) = load_batch(&path).unwrap();
        assert_eq!(batch.candidates.len(), 1);
        assert_eq!(batch.candidates[0].prices[0].volume, 0.0);
        assert_eq!(raw["as_of_date"], "2026-03-06");

        std::fs::write(&path, "{not json").unwrap();
        assert!(load_batch(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
