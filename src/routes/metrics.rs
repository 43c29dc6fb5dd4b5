use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Counters since process start", body = ApiResponse<MetricsSnapshot>)
    ),
    tag = "Health"
)]
pub async fn metrics_snapshot(State(state): State<AppState>) -> Json<ApiResponse<MetricsSnapshot>> {
    let data = MetricsSnapshot {
        counters: state.metrics.snapshot(),
    };
    Json(ApiResponse::success("OK", data, Some(Meta::empty())))
}
