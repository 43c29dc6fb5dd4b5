use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::cart::{AddCartItemRequest, CartWithItems, UpdateCartItemRequest},
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::cart_service,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_cart))
        .route("/{cart_id}", get(get_cart))
        .route("/{cart_id}/items", post(add_item))
        .route("/{cart_id}/items/{item_id}", put(update_item).delete(remove_item))
}

#[utoipa::path(
    post,
    path = "/api/cart",
    responses(
        (status = 201, description = "Active cart for the caller; guests get a new expiring cart", body = ApiResponse<CartWithItems>)
    ),
    tag = "Cart"
)]
pub async fn create_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
) -> AppResult<(StatusCode, Json<ApiResponse<CartWithItems>>)> {
    let resp = cart_service::create_cart(&state, user.as_ref()).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/cart/{cart_id}",
    params(("cart_id" = Uuid, Path, description = "Cart id")),
    responses(
        (status = 200, description = "Cart with its items", body = ApiResponse<CartWithItems>),
        (status = 404, description = "Cart not found or expired")
    ),
    tag = "Cart"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(cart_id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::get_cart(&state, user.as_ref(), cart_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/cart/{cart_id}/items",
    params(("cart_id" = Uuid, Path, description = "Cart id")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Item added", body = ApiResponse<CartWithItems>),
        (status = 409, description = "Cart not active or product unavailable")
    ),
    tag = "Cart"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(cart_id): Path<Uuid>,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::add_item(&state, user.as_ref(), cart_id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/cart/{cart_id}/items/{item_id}",
    params(
        ("cart_id" = Uuid, Path, description = "Cart id"),
        ("item_id" = Uuid, Path, description = "Cart item id")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Quantity updated", body = ApiResponse<CartWithItems>)
    ),
    tag = "Cart"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::update_item(&state, user.as_ref(), cart_id, item_id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/cart/{cart_id}/items/{item_id}",
    params(
        ("cart_id" = Uuid, Path, description = "Cart id"),
        ("item_id" = Uuid, Path, description = "Cart item id")
    ),
    responses(
        (status = 200, description = "Item removed", body = ApiResponse<CartWithItems>)
    ),
    tag = "Cart"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path((cart_id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::remove_item(&state, user.as_ref(), cart_id, item_id).await?;
    Ok(Json(resp))
}
