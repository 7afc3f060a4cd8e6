pub mod analysis;
pub mod domain;
pub mod ingest;
pub mod ledger;
pub mod pipeline;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    use crate::analysis::chip_flow::{FlowOptions, NoiseThreshold};
    use crate::analysis::normalizer::NormalizerOptions;
    use crate::analysis::scoring::ScoreWeights;
    use crate::analysis::selection::SelectionConstraints;
    use crate::domain::flow::InvestorSet;
    use crate::domain::recommendation::TargetPolicy;
    use crate::ledger::VerificationPolicy;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub data_provider_base_url: Option<String>,
        pub data_provider_api_key: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                data_provider_base_url: std::env::var("DATA_PROVIDER_BASE_URL").ok(),
                data_provider_api_key: std::env::var("DATA_PROVIDER_API_KEY").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_data_provider_base_url(&self) -> anyhow::Result<&str> {
            self.data_provider_base_url
                .as_deref()
                .context("DATA_PROVIDER_BASE_URL is required")
        }
    }

    /// Tunables for one scoring + verification deployment.
    ///
    /// Every field has a documented default; `from_env` overrides individual fields and keeps
    /// the default when a variable is absent or unparsable. Cross-field validity (weights sum,
    /// selection bounds) is checked by [`EngineOptions::validate`].
    #[derive(Debug, Clone)]
    pub struct EngineOptions {
        pub flow: FlowOptions,
        pub normalizer: NormalizerOptions,
        pub weights: ScoreWeights,
        pub selection: SelectionConstraints,
        pub targets: TargetPolicy,
        pub verification: VerificationPolicy,
        pub lookup_concurrency: usize,
    }

    pub const DEFAULT_LOOKUP_CONCURRENCY: usize = 4;
    pub const MAX_LOOKUP_CONCURRENCY: usize = 8;

    impl Default for EngineOptions {
        fn default() -> Self {
            Self {
                flow: FlowOptions::default(),
                normalizer: NormalizerOptions::default(),
                weights: ScoreWeights::default(),
                selection: SelectionConstraints::default(),
                targets: TargetPolicy::default(),
                verification: VerificationPolicy::default(),
                lookup_concurrency: DEFAULT_LOOKUP_CONCURRENCY,
            }
        }
    }

    impl EngineOptions {
        pub fn from_env() -> Self {
            let mut out = Self::default();

            if let Some(n) = env_parse::<usize>("FLOW_LOOKBACK_DAYS") {
                out.flow.lookback_days = n;
            }
            if let Some(r) = env_parse::<f64>("FLOW_NOISE_RATIO") {
                out.flow.noise = NoiseThreshold::Relative(r);
            }
            if let Some(lots) = env_parse::<i64>("FLOW_NOISE_ABSOLUTE") {
                out.flow.noise = NoiseThreshold::Absolute(lots);
            }
            if let Ok(s) = std::env::var("FLOW_INVESTORS") {
                if let Some(set) = InvestorSet::parse(&s) {
                    out.flow.investors = set;
                }
            }

            if let Ok(s) = std::env::var("SCORE_WEIGHTS") {
                if let Some(w) = ScoreWeights::parse(&s) {
                    out.weights = w;
                }
            }

            if let Some(n) = env_parse::<usize>("PRICE_WINDOW_DAYS") {
                out.normalizer.price_window_days = n;
            }

            if let Some(n) = env_parse::<usize>("SELECT_TARGET_COUNT") {
                out.selection.target_count = n;
            }
            if let Some(s) = env_parse::<f64>("SELECT_MAX_INDUSTRY_SHARE") {
                out.selection.max_industry_share = s;
            }
            if let Some(n) = env_parse::<usize>("SELECT_MIN_INDUSTRIES") {
                out.selection.min_industries = n;
            }

            if let Some(p) = env_parse::<f64>("TARGET_MIN_PCT") {
                out.targets.target_min_pct = p;
            }
            if let Some(p) = env_parse::<f64>("TARGET_MAX_PCT") {
                out.targets.target_max_pct = p;
            }
            if let Some(p) = env_parse::<f64>("STOP_LOSS_PCT") {
                out.targets.stop_loss_pct = p;
            }

            if let Ok(s) = std::env::var("VERIFY_POLICY") {
                if let Some(p) = VerificationPolicy::parse(&s) {
                    out.verification = p;
                }
            }
            if let Some(n) = env_parse::<usize>("VERIFY_LOOKUP_CONCURRENCY") {
                out.lookup_concurrency = n;
            }
            out.lookup_concurrency = out.lookup_concurrency.clamp(1, MAX_LOOKUP_CONCURRENCY);

            out
        }

        pub fn validate(&self) -> anyhow::Result<()> {
            anyhow::ensure!(
                self.flow.lookback_days >= 2,
                "FLOW_LOOKBACK_DAYS must be >= 2 (got {})",
                self.flow.lookback_days
            );
            anyhow::ensure!(
                !self.flow.investors.is_empty(),
                "FLOW_INVESTORS must name at least one investor class"
            );
            anyhow::ensure!(
                self.normalizer.price_window_days >= 2,
                "PRICE_WINDOW_DAYS must be >= 2 (got {})",
                self.normalizer.price_window_days
            );
            self.weights.validate()?;
            self.selection.validate()?;
            self.targets.validate()?;
            Ok(())
        }
    }

    fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
        std::env::var(key).ok().and_then(|s| s.trim().parse::<T>().ok())
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        // One test owns these variables; nothing else in the crate reads them.
        #[test]
        fn env_overrides_keep_defaults_on_bad_values_and_clamp_concurrency() {
            std::env::set_var("FLOW_LOOKBACK_DAYS", "ten");
            std::env::set_var("SELECT_TARGET_COUNT", "7");
            std::env::set_var("VERIFY_POLICY", "direction_only");
            std::env::set_var("VERIFY_LOOKUP_CONCURRENCY", "64");
            let options = EngineOptions::from_env();
            assert_eq!(options.flow.lookback_days, FlowOptions::default().lookback_days);
            assert_eq!(options.selection.target_count, 7);
            assert_eq!(options.verification, VerificationPolicy::DirectionOnly);
            assert_eq!(options.lookup_concurrency, MAX_LOOKUP_CONCURRENCY);
            options.validate().unwrap();

            std::env::set_var("VERIFY_LOOKUP_CONCURRENCY", "0");
            std::env::set_var("VERIFY_POLICY", "lenient");
            let options = EngineOptions::from_env();
            assert_eq!(options.lookup_concurrency, 1);
            assert_eq!(options.verification, VerificationPolicy::RangeRequired);

            for key in [
                "FLOW_LOOKBACK_DAYS",
                "SELECT_TARGET_COUNT",
                "VERIFY_POLICY",
                "VERIFY_LOOKUP_CONCURRENCY",
            ] {
                std::env::remove_var(key);
            }
            let options = EngineOptions::from_env();
            assert_eq!(options.lookup_concurrency, DEFAULT_LOOKUP_CONCURRENCY);
            assert_eq!(options.selection.target_count, 8);
        }
    }
}
