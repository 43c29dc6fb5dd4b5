use axum::{Json, extract::State, http::StatusCode};
use sea_orm::ConnectionTrait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    response::{ApiResponse, Meta},
    state::AppState,
};

#[derive(Serialize, ToSchema)]
pub struct HealthData {
    status: String,
    database: String,
    rate_limiter: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "OK", body = ApiResponse<HealthData>),
        (status = 503, description = "Database unreachable", body = ApiResponse<HealthData>),
    ),
    tag = "Health"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<HealthData>>) {
    let database_ok = state
        .orm
        .execute_unprepared("SELECT 1")
        .await
        .inspect_err(|err| tracing::warn!(error = %err, "health check database ping failed"))
        .is_ok();

    let data = HealthData {
        status: if database_ok { "ok" } else { "degraded" }.to_string(),
        database: if database_ok { "up" } else { "down" }.to_string(),
        rate_limiter: state.limiter.backend_name().to_string(),
    };
    let status = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ApiResponse::success("Health check", data, Some(Meta::empty()))),
    )
}
