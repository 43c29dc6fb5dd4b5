use axum::{Router, http::Uri};

use crate::{error::AppError, state::AppState};

pub mod cart;
pub mod doc;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod params;
pub mod payments;

// Build the API router without binding state; it will be provided at the top level.
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .nest("/cart", cart::router())
        .nest("/orders", orders::router())
        .nest("/payments", payments::router())
}

/// Fallback for unmatched paths, answered in the usual envelope.
pub async fn not_found(uri: Uri) -> AppError {
    tracing::debug!(path = %uri.path(), "no route");
    AppError::NotFound
}
