use axum::{
    Form, Json, Router,
    extract::{Path, State, rejection::FormRejection},
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::payments::{InitPaymentRequest, InitPaymentResponse, RetryPaymentResponse, WebhookAck},
    error::AppResult,
    gateway::paytr::RawCallback,
    metrics,
    middleware::{auth::AuthUser, client_ip::ClientIp},
    models::Payment,
    response::ApiResponse,
    services::{payment_service, webhook_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init_payment))
        .route("/webhook", post(payment_webhook))
        .route("/{id}", get(get_payment))
        .route("/{id}/retry", put(retry_payment))
}

#[utoipa::path(
    post,
    path = "/api/payments/init",
    request_body = InitPaymentRequest,
    responses(
        (status = 200, description = "Gateway token issued", body = ApiResponse<InitPaymentResponse>),
        (status = 409, description = "PAYMENT_EXISTS or INVALID_STATUS"),
        (status = 500, description = "CONFIG_ERROR"),
        (status = 502, description = "PAYTR_API_ERROR, the payment is recorded as failed")
    ),
    tag = "Payments"
)]
pub async fn init_payment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    ClientIp(ip): ClientIp,
    Json(payload): Json<InitPaymentRequest>,
) -> AppResult<Json<ApiResponse<InitPaymentResponse>>> {
    let resp = payment_service::init_payment(&state, user.as_ref(), ip, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/payments/webhook",
    request_body(content = RawCallback, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Callback applied or acknowledged as duplicate", body = ApiResponse<WebhookAck>),
        (status = 400, description = "VALIDATION_ERROR"),
        (status = 401, description = "Signature mismatch"),
        (status = 404, description = "PAYMENT_NOT_FOUND")
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    payload: Result<Form<RawCallback>, FormRejection>,
) -> AppResult<Json<ApiResponse<WebhookAck>>> {
    let Form(callback) = payload.inspect_err(|rejection| {
        state.metrics.incr(metrics::WEBHOOK_REJECTED);
        tracing::warn!(error = %rejection.body_text(), "webhook body rejected");
    })?;
    let resp = webhook_service::handle_callback(&state, callback).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/payments/{id}/retry",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment reset to pending", body = ApiResponse<RetryPaymentResponse>),
        (status = 409, description = "INVALID_STATUS"),
        (status = 422, description = "MAX_RETRIES_EXCEEDED")
    ),
    tag = "Payments"
)]
pub async fn retry_payment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<RetryPaymentResponse>>> {
    let resp = payment_service::retry_payment(&state, user.as_ref(), id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    params(("id" = Uuid, Path, description = "Payment id")),
    responses(
        (status = 200, description = "Payment record", body = ApiResponse<Payment>),
        (status = 404, description = "PAYMENT_NOT_FOUND")
    ),
    tag = "Payments"
)]
pub async fn get_payment(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<Payment>>> {
    let resp = payment_service::get_payment(&state, user.as_ref(), id).await?;
    Ok(Json(resp))
}
