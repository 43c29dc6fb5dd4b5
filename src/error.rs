use axum::{
    extract::rejection::FormRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    domain::{billing::BillingError, order_status::InvalidTransition},
    response::{ApiResponse, ErrorBody},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Cart not found or already converted")]
    CartNotFound,

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Some products are no longer available")]
    ProductsUnavailable(Vec<Uuid>),

    #[error("Order not found")]
    OrderNotFound,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Payment not found")]
    PaymentNotFound,

    #[error("An active payment already exists for this order")]
    PaymentExists,

    #[error("{0}")]
    InvalidStatus(String),

    #[error("Maximum retry attempts exceeded")]
    MaxRetriesExceeded,

    #[error("Unauthorized")]
    InvalidSignature,

    #[error("{0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Too many requests")]
    RateLimited { retry_after_secs: u64 },

    #[error("Payment gateway is not configured: {0}")]
    Config(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Not Found")]
    NotFound,

    #[error("Database error")]
    DbError(#[from] sqlx::Error),

    #[error("Database error")]
    OrmError(#[from] sea_orm::DbErr),

    #[error("Internal Server Error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::EmptyCart => StatusCode::BAD_REQUEST,
            AppError::CartNotFound
            | AppError::OrderNotFound
            | AppError::PaymentNotFound
            | AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::ProductsUnavailable(_)
            | AppError::InvalidTransition(_)
            | AppError::PaymentExists
            | AppError::InvalidStatus(_) => StatusCode::CONFLICT,
            AppError::MaxRetriesExceeded => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::InvalidSignature | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::Gateway(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_)
            | AppError::DbError(_)
            | AppError::OrmError(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::CartNotFound => "CART_NOT_FOUND",
            AppError::EmptyCart => "EMPTY_CART",
            AppError::ProductsUnavailable(_) => "PRODUCTS_UNAVAILABLE",
            AppError::OrderNotFound => "ORDER_NOT_FOUND",
            AppError::InvalidTransition(_) => "INVALID_TRANSITION",
            AppError::PaymentNotFound => "PAYMENT_NOT_FOUND",
            AppError::PaymentExists => "PAYMENT_EXISTS",
            AppError::InvalidStatus(_) => "INVALID_STATUS",
            AppError::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            AppError::InvalidSignature | AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::RateLimited { .. } => "RATE_LIMITED",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Gateway(_) => "PAYTR_API_ERROR",
            AppError::NotFound => "NOT_FOUND",
            AppError::DbError(_) | AppError::OrmError(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::ProductsUnavailable(ids) => {
                Some(serde_json::json!({ "product_ids": ids }))
            }
            AppError::InvalidTransition(err) => Some(serde_json::json!({
                "current": err.from,
                "requested": err.to,
            })),
            AppError::RateLimited { retry_after_secs } => {
                Some(serde_json::json!({ "retry_after_seconds": retry_after_secs }))
            }
            _ => None,
        }
    }
}

impl From<FormRejection> for AppError {
    fn from(rejection: FormRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields: Vec<String> = errors
            .field_errors()
            .keys()
            .map(|field| field.to_string())
            .collect();
        fields.sort();
        AppError::Validation(format!("Invalid fields: {}", fields.join(", ")))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::DbError(err) => tracing::error!(error = %err, "database error"),
            AppError::OrmError(err) => tracing::error!(error = %err, "orm error"),
            AppError::Internal(err) => tracing::error!(error = %err, "internal error"),
            _ => {}
        }

        let body = ApiResponse::failure(ErrorBody {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let AppError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub type AppResult<T> = Result<T, AppError>;
