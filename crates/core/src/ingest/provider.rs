use crate::config::Settings;
use crate::domain::candidate::CatalystSignal;
use crate::domain::flow::FlowSeries;
use crate::ingest::types::{CatalystResponse, ClosePriceResponse, FlowSeriesResponse};
use crate::ledger::ClosePriceLookup;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RETRIES: u32 = 3;

const FLOWS_PATH: &str = "/v1/institutional_flows";
const CLOSE_PRICES_PATH: &str = "/v1/close_prices";
const CATALYSTS_PATH: &str = "/v1/catalysts";

/// Upstream market data. Every call may fail or come back empty for a symbol; callers treat
/// that as missing input, never as zero.
#[async_trait::async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn fetch_flow_series(&self, symbol: &str, lookback_days: usize) -> Result<Option<FlowSeries>>;

    async fn fetch_close_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>>;

    async fn fetch_catalyst_signal(&self, symbol: &str) -> Result<Option<CatalystSignal>>;
}

#[derive(Debug, Clone)]
pub struct HttpJsonMarketData {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retries: u32,
}

impl HttpJsonMarketData {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_data_provider_base_url()?.to_string();
        let api_key = settings.data_provider_api_key.clone();

        let timeout_secs = std::env::var("DATA_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("DATA_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build data provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    /// One GET. A 404 means the provider has nothing for this query and yields `None`.
    async fn get_once<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let res = self
            .http
            .get(self.url(path))
            .headers(self.headers()?)
            .query(query)
            .send()
            .await
            .with_context(|| format!("data provider request to {path} failed"))?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read provider response")?;
        let raw_json = serde_json::from_str::<serde_json::Value>(&text)
            .with_context(|| format!("provider response is not valid JSON: {text}"))?;

        if !status.is_success() {
            anyhow::bail!("data provider HTTP {status}: {raw_json}");
        }

        let parsed = serde_json::from_value::<T>(raw_json)
            .with_context(|| format!("failed to parse provider response from {path}"))?;
        Ok(Some(parsed))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.get_once(path, query).await {
                Ok(v) => return Ok(v),
                Err(err) => {
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = Duration::from_secs(1 << (attempt - 1));
                    tracing::warn!(attempt, path, ?backoff, error = %err, "data provider fetch failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl MarketDataProvider for HttpJsonMarketData {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn fetch_flow_series(&self, symbol: &str, lookback_days: usize) -> Result<Option<FlowSeries>> {
        let query = [
            ("symbol", symbol.to_string()),
            ("lookback_days", lookback_days.to_string()),
        ];
        let Some(resp) = self.get::<FlowSeriesResponse>(FLOWS_PATH, &query).await? else {
            return Ok(None);
        };
        check_symbol(symbol, &resp.symbol)?;
        let series = resp.into_series()?;
        Ok((!series.is_empty()).then_some(series))
    }

    async fn fetch_close_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>> {
        let query = [("symbol", symbol.to_string()), ("date", date.to_string())];
        let Some(resp) = self.get::<ClosePriceResponse>(CLOSE_PRICES_PATH, &query).await? else {
            return Ok(None);
        };
        check_symbol(symbol, &resp.symbol)?;
        anyhow::ensure!(
            resp.date == date,
            "provider date mismatch: expected {date}, got {}",
            resp.date
        );
        Ok(resp.close)
    }

    async fn fetch_catalyst_signal(&self, symbol: &str) -> Result<Option<CatalystSignal>> {
        let query = [("symbol", symbol.to_string())];
        let Some(resp) = self.get::<CatalystResponse>(CATALYSTS_PATH, &query).await? else {
            return Ok(None);
        };
        check_symbol(symbol, &resp.symbol)?;
        Ok(resp.into_signal())
    }
}

#[async_trait::async_trait]
impl ClosePriceLookup for HttpJsonMarketData {
    async fn fetch_close_price(&self, symbol: &str, date: NaiveDate) -> Result<Option<f64>> {
        MarketDataProvider::fetch_close_price(self, symbol, date).await
    }
}

fn check_symbol(expected: &str, got: &str) -> Result<()> {
    anyhow::ensure!(
        expected == got,
        "provider symbol mismatch: expected {expected}, got {got}"
    );
    Ok(())
}
