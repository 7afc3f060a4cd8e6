use anyhow::Context;
use chipflow_core::config::{EngineOptions, Settings};
use chipflow_core::ingest::{HttpJsonMarketData, MarketDataProvider};
use chipflow_core::ledger::{ClosePriceLookup, LedgerStore, MemoryLedgerStore, PredictionLedger};
use chipflow_core::pipeline::{run_verification, Engine, ScoringOutcome};
use chipflow_core::storage::lock::BatchLock;
use chipflow_core::storage::PgLedgerStore;
use chipflow_core::time::{resolve_as_of_date, TradingCalendar};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod batch_input;

#[derive(Debug, Parser)]
#[command(name = "chipflow_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score a candidate batch and record the selected recommendations.
    Score {
        /// Batch file (JSON) with `as_of_date` and `candidates`.
        #[arg(long)]
        input: PathBuf,

        /// Batch date (YYYY-MM-DD). Must match the file when given.
        #[arg(long)]
        as_of_date: Option<String>,

        /// Do everything except writing to the database.
        #[arg(long)]
        dry_run: bool,
    },
    /// Grade every pending recommendation whose horizon has been reached.
    Verify {
        /// Market as-of date (YYYY-MM-DD). Defaults to the latest closed Taipei session.
        #[arg(long)]
        as_of_date: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let calendar = TradingCalendar::from_env();
    let options = EngineOptions::from_env();

    let res = match args.command {
        Command::Score {
            input,
            as_of_date,
            dry_run,
        } => score(&settings, options, calendar, &input, as_of_date.as_deref(), dry_run).await,
        Command::Verify { as_of_date } => verify(&settings, options, calendar, as_of_date.as_deref()).await,
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
    }
    res
}

async fn score(
    settings: &Settings,
    options: EngineOptions,
    calendar: TradingCalendar,
    input: &std::path::Path,
    as_of_date_arg: Option<&str>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let engine = Engine::new(options).context("invalid engine configuration")?;
    let (batch, raw_input) = batch_input::load_batch(input)?;

    let expected = as_of_date_arg
        .map(|s| resolve_as_of_date(Some(s), chrono::Utc::now(), &calendar))
        .transpose()?;
    let validated = batch.validate_and_into_batch(expected)?;
    let batch_date = validated.batch_date;
    if !calendar.is_trading_day(batch_date) {
        tracing::warn!(%batch_date, "batch date is not a trading day; T+0 rolls to the next session");
    }

    let mut candidates = validated.candidates;
    if settings.data_provider_base_url.is_some() {
        let provider = HttpJsonMarketData::from_settings(settings)?;
        let opts = batch_input::EnrichOptions::from_env(engine.options().flow.lookback_days);
        batch_input::enrich_candidates(&provider, &mut candidates, &opts).await;
    }

    let mut outcome = engine.run_scoring_batch(batch_date, candidates);
    outcome.rejected.extend(validated.invalid);
    log_outcome(&outcome);

    if dry_run {
        let ledger = PredictionLedger::new(
            Arc::new(MemoryLedgerStore::default()),
            calendar,
            engine.options().verification,
            engine.options().lookup_concurrency,
        );
        ledger.record(batch_date, &outcome.selected).await?;
        tracing::info!(%batch_date, dry_run = true, "scoring run finished without persisting");
        return Ok(());
    }

    let pool = connect(settings).await?;
    chipflow_core::storage::migrate(&pool).await?;

    let Some(lock) = BatchLock::try_acquire(&pool, batch_date).await? else {
        tracing::warn!(%batch_date, "batch lock not acquired; another run in progress");
        return Ok(());
    };

    let provider = "chipflow_engine";
    let res = persist_scoring(&pool, &outcome, calendar, engine.options(), provider, raw_input.clone()).await;
    if let Err(err) = &res {
        let run_id = chipflow_core::storage::runs::persist_run_failure(
            &pool,
            batch_date,
            outcome.generated_at,
            provider,
            &format!("{err:#}"),
            Some(raw_input),
        )
        .await;
        match run_id {
            Ok(run_id) => tracing::error!(%batch_date, %run_id, error = %err, "scoring run failed"),
            Err(e) => tracing::error!(%batch_date, error = %e, "failed to record scoring failure"),
        }
    }

    if let Err(err) = lock.release().await {
        tracing::warn!(%batch_date, error = %format!("{err:#}"), "batch lock release failed");
    }
    res
}

async fn persist_scoring(
    pool: &sqlx::PgPool,
    outcome: &ScoringOutcome,
    calendar: TradingCalendar,
    options: &EngineOptions,
    provider: &str,
    raw_input: serde_json::Value,
) -> anyhow::Result<()> {
    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let ledger = PredictionLedger::new(store, calendar, options.verification, options.lookup_concurrency);
    ledger.record(outcome.batch_date, &outcome.selected).await?;

    let run_id =
        chipflow_core::storage::runs::persist_run_success(pool, outcome, provider, Some(raw_input)).await?;
    tracing::info!(batch_date = %outcome.batch_date, %run_id, "persisted scoring run");
    Ok(())
}

async fn verify(
    settings: &Settings,
    options: EngineOptions,
    calendar: TradingCalendar,
    as_of_date_arg: Option<&str>,
) -> anyhow::Result<()> {
    let as_of = resolve_as_of_date(as_of_date_arg, chrono::Utc::now(), &calendar)?;

    let pool = connect(settings).await?;
    chipflow_core::storage::migrate(&pool).await?;

    let provider = HttpJsonMarketData::from_settings(settings)?;
    tracing::info!(%as_of, provider = provider.provider_name(), "starting verification pass");
    let lookup: Arc<dyn ClosePriceLookup> = Arc::new(provider);

    let ledger = PredictionLedger::new(
        Arc::new(PgLedgerStore::new(pool)),
        calendar,
        options.verification,
        options.lookup_concurrency,
    );

    // Each record commits on its own, so an interrupted pass leaves a valid ledger behind.
    let outcome = tokio::select! {
        res = run_verification(&ledger, as_of, lookup) => res?,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!(%as_of, "verification interrupted; remaining records stay pending");
            return Ok(());
        }
    };

    for s in &outcome.summaries {
        for (horizon, h) in &s.per_horizon {
            tracing::info!(
                batch_date = %s.recommendation_date,
                horizon = horizon.as_str(),
                total = h.total,
                success = h.success,
                fail = h.fail,
                pending = h.pending,
                accuracy = ?h.accuracy,
                "batch accuracy"
            );
        }
    }
    for (horizon, a) in &outcome.rolling.per_horizon {
        tracing::info!(
            horizon = horizon.as_str(),
            batches = outcome.rolling.batches,
            samples = a.samples,
            mean_accuracy = ?a.mean_accuracy,
            "rolling accuracy"
        );
    }
    Ok(())
}

fn log_outcome(outcome: &ScoringOutcome) {
    for r in &outcome.selected {
        tracing::info!(
            batch_date = %outcome.batch_date,
            symbol = %r.symbol,
            industry = %r.industry,
            tier = r.tier.as_str(),
            position_tier = r.position_tier.as_str(),
            composite_score = r.composite_score,
            entry_price = r.entry_price,
            target_min = r.target_range.min,
            target_max = r.target_range.max,
            stop_loss = r.stop_loss,
            "selected"
        );
    }
    for r in &outcome.rejected {
        let reasons: Vec<&str> = r.reasons.iter().map(|c| c.as_str()).collect();
        tracing::info!(
            batch_date = %outcome.batch_date,
            symbol = %r.symbol,
            ?reasons,
            detail = r.detail.as_deref().unwrap_or(""),
            "rejected"
        );
    }
    if !outcome.constraints_satisfied {
        let shortfall: Vec<&str> = outcome.shortfall.iter().map(|c| c.as_str()).collect();
        tracing::warn!(batch_date = %outcome.batch_date, ?shortfall, "selection constraints not satisfied");
    }
}

async fn connect(settings: &Settings) -> anyhow::Result<sqlx::PgPool> {
    let db_url = settings.require_database_url()?;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
