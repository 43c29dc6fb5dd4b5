use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
};
use uuid::Uuid;

use crate::{
    dto::orders::{CreateOrderRequest, OrderDetail, OrderWithItems, UpdateOrderStatusRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    models::Order,
    response::ApiResponse,
    routes::params::OrderListQuery,
    services::order_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders).post(create_order))
        .route("/{id}", get(get_order))
        .route("/{id}/status", put(update_order_status))
}

#[utoipa::path(
    post,
    path = "/api/orders",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Cart converted into an order", body = ApiResponse<OrderWithItems>),
        (status = 400, description = "VALIDATION_ERROR or EMPTY_CART"),
        (status = 404, description = "CART_NOT_FOUND"),
        (status = 409, description = "PRODUCTS_UNAVAILABLE")
    ),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Json(payload): Json<CreateOrderRequest>,
) -> AppResult<(StatusCode, Json<ApiResponse<OrderWithItems>>)> {
    let resp = order_service::create_order(&state, user.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/orders",
    params(
        ("page" = Option<i64>, Query, description = "Page number, default 1"),
        ("per_page" = Option<i64>, Query, description = "Items per page, default 20"),
        ("status" = Option<String>, Query, description = "Filter by status")
    ),
    responses(
        (status = 200, description = "Orders visible to the caller", body = ApiResponse<Vec<Order>>)
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<OrderListQuery>,
) -> AppResult<Json<ApiResponse<Vec<Order>>>> {
    let resp = order_service::list_orders(&state, &user, query).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    get,
    path = "/api/orders/{id}",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order with item snapshots and status history", body = ApiResponse<OrderDetail>),
        (status = 404, description = "ORDER_NOT_FOUND")
    ),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<OrderDetail>>> {
    let resp = order_service::get_order(&state, user.as_ref(), id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/orders/{id}/status",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderStatusRequest,
    responses(
        (status = 200, description = "Order moved to the requested status", body = ApiResponse<Order>),
        (status = 409, description = "INVALID_TRANSITION")
    ),
    security(("bearer_auth" = [])),
    tag = "Orders"
)]
pub async fn update_order_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> AppResult<Json<ApiResponse<Order>>> {
    let resp = order_service::update_status(&state, &user, id, payload).await?;
    Ok(Json(resp))
}
