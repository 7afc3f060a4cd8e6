use anyhow::Context;
use chrono::{DateTime, NaiveDate, Utc};

use crate::pipeline::ScoringOutcome;

pub async fn persist_run_success(
    pool: &sqlx::PgPool,
    outcome: &ScoringOutcome,
    provider: &str,
    raw_input: Option<serde_json::Value>,
) -> anyhow::Result<uuid::Uuid> {
    let shortfall: Vec<String> = outcome
        .shortfall
        .iter()
        .map(|r| r.as_str().to_string())
        .collect();
    let outcome_json = serde_json::to_value(outcome).context("serialize scoring outcome failed")?;

    let run_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO scoring_runs (id, batch_date, generated_at, provider, status, error, \
             selected_count, rejected_count, constraints_satisfied, shortfall, raw_input, outcome) \
         VALUES ($1, $2, $3, $4, 'success', NULL, $5, $6, $7, $8, $9, $10) \
         RETURNING id",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(outcome.batch_date)
    .bind(outcome.generated_at)
    .bind(provider)
    .bind(outcome.selected.len() as i32)
    .bind(outcome.rejected.len() as i32)
    .bind(outcome.constraints_satisfied)
    .bind(shortfall)
    .bind(raw_input)
    .bind(outcome_json)
    .fetch_one(pool)
    .await
    .context("insert scoring_runs failed")?;

    Ok(run_id)
}

pub async fn persist_run_failure(
    pool: &sqlx::PgPool,
    batch_date: NaiveDate,
    generated_at: DateTime<Utc>,
    provider: &str,
    error: &str,
    raw_input: Option<serde_json::Value>,
) -> anyhow::Result<uuid::Uuid> {
    let run_id: uuid::Uuid = sqlx::query_scalar(
        "INSERT INTO scoring_runs (id, batch_date, generated_at, provider, status, error, raw_input) \
         VALUES ($1, $2, $3, $4, 'error', $5, $6) \
         RETURNING id",
    )
    .bind(uuid::Uuid::new_v4())
    .bind(batch_date)
    .bind(generated_at)
    .bind(provider)
    .bind(error)
    .bind(raw_input)
    .fetch_one(pool)
    .await
    .context("insert error scoring_runs failed")?;

    Ok(run_id)
}
