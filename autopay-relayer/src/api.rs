//! Status API: health, per-chain progress and policy listing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use autopay_core::entities::Policy;

use crate::state::AppState;

/// Build the main application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
        .route("/policies", get(list_policies))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Simple health check - returns OK if the server is running.
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct ChainStatusResponse {
    chain_id: i64,
    last_indexed_block: Option<i64>,
    active_policies: i64,
    pending_charges: i64,
}

#[derive(Serialize)]
struct WebhookStatusResponse {
    pending: i64,
    failed: i64,
}

#[derive(Serialize)]
struct StatusResponse {
    chains: Vec<ChainStatusResponse>,
    webhooks: WebhookStatusResponse,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, StatusCode> {
    let mut chains = Vec::with_capacity(state.chain_ids.len());
    for chain_id in &state.chain_ids {
        let status = state
            .store
            .chain_status(*chain_id)
            .await
            .map_err(internal_error)?;
        chains.push(ChainStatusResponse {
            chain_id: status.chain_id,
            last_indexed_block: status.last_indexed_block,
            active_policies: status.active_policies,
            pending_charges: status.pending_charges,
        });
    }
    let counts = state.store.webhook_counts().await.map_err(internal_error)?;
    Ok(Json(StatusResponse {
        chains,
        webhooks: WebhookStatusResponse {
            pending: counts.pending,
            failed: counts.failed,
        },
    }))
}

#[derive(Deserialize)]
struct ListPoliciesQuery {
    chain_id: i64,
}

#[derive(Serialize)]
struct PolicyResponse {
    policy_id: String,
    chain_id: i64,
    payer: String,
    merchant: String,
    charge_amount: String,
    spending_cap: String,
    total_spent: String,
    interval_seconds: i64,
    last_charged_at: i64,
    charge_count: i64,
    consecutive_failures: i32,
    end_time: i64,
    active: bool,
    needs_attention: bool,
    last_error: Option<String>,
}

impl From<Policy> for PolicyResponse {
    fn from(p: Policy) -> Self {
        Self {
            policy_id: p.policy_id,
            chain_id: p.chain_id,
            payer: p.payer,
            merchant: p.merchant,
            charge_amount: p.charge_amount.to_string(),
            spending_cap: p.spending_cap.to_string(),
            total_spent: p.total_spent.to_string(),
            interval_seconds: p.interval_seconds,
            last_charged_at: p.last_charged_at,
            charge_count: p.charge_count,
            consecutive_failures: p.consecutive_failures,
            end_time: p.end_time,
            active: p.active,
            needs_attention: p.needs_attention,
            last_error: p.last_error,
        }
    }
}

async fn list_policies(
    State(state): State<AppState>,
    Query(query): Query<ListPoliciesQuery>,
) -> Result<Json<Vec<PolicyResponse>>, StatusCode> {
    let policies = state
        .store
        .list_policies(query.chain_id)
        .await
        .map_err(internal_error)?;
    Ok(Json(policies.into_iter().map(Into::into).collect()))
}

fn internal_error(error: autopay_core::store::StoreError) -> StatusCode {
    tracing::error!(%error, "status api query failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
