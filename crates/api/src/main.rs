use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chipflow_core::domain::recommendation::Recommendation;
use chipflow_core::domain::verification::{BatchSummary, RollingAccuracy, VerificationRecord};
use chipflow_core::ledger::LedgerStore;
use chipflow_core::storage::PgLedgerStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = chipflow_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
    let store: Option<Arc<dyn LedgerStore>> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match chipflow_core::storage::migrate(&pool).await {
                Ok(()) => Some(Arc::new(PgLedgerStore::new(pool)) as Arc<dyn LedgerStore>),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let app = router(AppState { store }).layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/accuracy", get(get_rolling_accuracy))
        .route("/batches/latest", get(get_latest_batch))
        .route("/batches/:batch_date", get(get_batch_by_date))
        .route("/batches/:batch_date/summary", get(get_batch_summary))
        .route(
            "/batches/:batch_date/verifications/:symbol",
            get(get_symbol_verifications),
        )
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    store: Option<Arc<dyn LedgerStore>>,
}

impl AppState {
    fn store(&self) -> Result<&Arc<dyn LedgerStore>, StatusCode> {
        self.store.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}

#[derive(Debug, Serialize)]
struct ApiBatch {
    batch_date: NaiveDate,
    recommendations: Vec<Recommendation>,
    summary: BatchSummary,
}

#[derive(Debug, Serialize)]
struct ApiSymbolVerifications {
    recommendation: Recommendation,
    records: Vec<VerificationRecord>,
}

#[derive(Debug, Default, Deserialize)]
struct AccuracyWindow {
    since: Option<String>,
    until: Option<String>,
}

fn internal(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "ledger query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

fn parse_batch_date(s: &str) -> Result<NaiveDate, StatusCode> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)
}

async fn get_rolling_accuracy(
    State(state): State<AppState>,
    Query(window): Query<AccuracyWindow>,
) -> Result<Json<RollingAccuracy>, StatusCode> {
    let store = state.store()?;
    let since = window.since.as_deref().map(parse_batch_date).transpose()?;
    let until = window.until.as_deref().map(parse_batch_date).transpose()?;
    if let (Some(s), Some(u)) = (since, until) {
        if s > u {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    let records = store.records_between(since, until).await.map_err(internal)?;
    Ok(Json(RollingAccuracy::from_records(since, until, &records)))
}

async fn get_latest_batch(State(state): State<AppState>) -> Result<Json<ApiBatch>, StatusCode> {
    let store = state.store()?;
    let batch_date = store
        .latest_batch_date()
        .await
        .map_err(internal)?
        .ok_or(StatusCode::NOT_FOUND)?;
    fetch_batch(store.as_ref(), batch_date).await.map(Json)
}

async fn get_batch_by_date(
    State(state): State<AppState>,
    Path(batch_date): Path<String>,
) -> Result<Json<ApiBatch>, StatusCode> {
    let store = state.store()?;
    let batch_date = parse_batch_date(&batch_date)?;
    fetch_batch(store.as_ref(), batch_date).await.map(Json)
}

async fn get_batch_summary(
    State(state): State<AppState>,
    Path(batch_date): Path<String>,
) -> Result<Json<BatchSummary>, StatusCode> {
    let store = state.store()?;
    let batch_date = parse_batch_date(&batch_date)?;
    let records = store.batch_records(batch_date).await.map_err(internal)?;
    if records.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(BatchSummary::from_records(batch_date, &records)))
}

async fn get_symbol_verifications(
    State(state): State<AppState>,
    Path((batch_date, symbol)): Path<(String, String)>,
) -> Result<Json<ApiSymbolVerifications>, StatusCode> {
    let store = state.store()?;
    let batch_date = parse_batch_date(&batch_date)?;

    let recommendation = store
        .recommendations(batch_date)
        .await
        .map_err(internal)?
        .into_iter()
        .find(|r| r.symbol == symbol)
        .ok_or(StatusCode::NOT_FOUND)?;

    let records = store
        .batch_records(batch_date)
        .await
        .map_err(internal)?
        .into_iter()
        .filter(|r| r.recommendation_ref.symbol == symbol)
        .collect();

    Ok(Json(ApiSymbolVerifications {
        recommendation,
        records,
    }))
}

async fn fetch_batch(store: &dyn LedgerStore, batch_date: NaiveDate) -> Result<ApiBatch, StatusCode> {
    let recommendations = store.recommendations(batch_date).await.map_err(internal)?;
    if recommendations.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    let records = store.batch_records(batch_date).await.map_err(internal)?;

    Ok(ApiBatch {
        batch_date,
        recommendations,
        summary: BatchSummary::from_records(batch_date, &records),
    })
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &chipflow_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chipflow_core::domain::candidate::Tier;
    use chipflow_core::domain::recommendation::{Direction, PositionTier, TargetPolicy};
    use chipflow_core::domain::verification::{Horizon, VerificationResult};
    use chipflow_core::ledger::{MemoryLedgerStore, PredictionLedger, VerificationPolicy};
    use chipflow_core::time::TradingCalendar;

    fn batch_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 6).unwrap()
    }

    async fn seeded() -> AppState {
        let store = Arc::new(MemoryLedgerStore::default());
        let ledger = PredictionLedger::new(
            store.clone(),
            TradingCalendar::default(),
            VerificationPolicy::RangeRequired,
            4,
        );
        let policy = TargetPolicy::default();
        let rec = Recommendation {
            symbol: "2330".to_string(),
            name: "TSMC".to_string(),
            industry: "semis".to_string(),
            direction: Direction::Up,
            entry_price: 50.0,
            target_range: policy.target_range(50.0),
            stop_loss: policy.stop_loss(50.0),
            position_tier: PositionTier::Heavy,
            tier: Tier::StrongRecommend,
            composite_score: 88.0,
            recommendation_date: batch_date(),
        };
        ledger.record(batch_date(), &[rec]).await.unwrap();
        AppState {
            store: Some(store as Arc<dyn LedgerStore>),
        }
    }

    #[tokio::test]
    async fn degraded_mode_returns_503() {
        let state = AppState { store: None };
        let err = get_latest_batch(State(state)).await.unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn latest_batch_includes_pending_summary() {
        let Json(batch) = get_latest_batch(State(seeded().await)).await.unwrap();
        assert_eq!(batch.batch_date, batch_date());
        assert_eq!(batch.recommendations.len(), 1);
        assert_eq!(batch.summary.total, 1);
        assert_eq!(batch.summary.accuracy(Horizon::T0), None);
    }

    #[tokio::test]
    async fn bad_dates_and_unknown_batches() {
        let state = seeded().await;
        let err = get_batch_by_date(State(state.clone()), Path("03/06/2026".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);

        let err = get_batch_summary(State(state), Path("2026-03-09".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn symbol_view_lists_all_horizons() {
        let Json(view) = get_symbol_verifications(
            State(seeded().await),
            Path(("2026-03-06".to_string(), "2330".to_string())),
        )
        .await
        .unwrap();
        assert_eq!(view.recommendation.symbol, "2330");
        assert_eq!(view.records.len(), 4);
        assert!(view
            .records
            .iter()
            .all(|r| r.result == VerificationResult::Pending));
    }

    #[tokio::test]
    async fn rolling_accuracy_window() {
        let state = seeded().await;
        let Json(all) = get_rolling_accuracy(State(state.clone()), Query(AccuracyWindow::default()))
            .await
            .unwrap();
        assert_eq!(all.batches, 1);
        assert_eq!(all.mean_accuracy(Horizon::T0), None);
        assert_eq!(all.samples(Horizon::T0), 0);

        let later = AccuracyWindow {
            since: Some("2026-03-09".to_string()),
            until: None,
        };
        let Json(none) = get_rolling_accuracy(State(state.clone()), Query(later))
            .await
            .unwrap();
        assert_eq!(none.batches, 0);

        let reversed = AccuracyWindow {
            since: Some("2026-03-09".to_string()),
            until: Some("2026-03-02".to_string()),
        };
        let err = get_rolling_accuracy(State(state.clone()), Query(reversed))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::BAD_REQUEST);

        let err = get_rolling_accuracy(State(AppState { store: None }), Query(AccuracyWindow::default()))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::SERVICE_UNAVAILABLE);
    }
}
