use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::pricing::{line_total, round_money},
    dto::cart::{AddCartItemRequest, CartWithItems, UpdateCartItemRequest},
    entity::{
        cart_items::{ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, CartStatus, Column as CartCol, Entity as Carts, Model as CartModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    middleware::auth::AuthUser,
    models::{cart_from_entity, cart_item_from_entity},
    response::{ApiResponse, Meta},
    state::AppState,
};

pub(crate) fn is_expired(cart: &CartModel, now: DateTime<Utc>) -> bool {
    cart.expires_at
        .is_some_and(|expires_at| expires_at.with_timezone(&Utc) <= now)
}

/// User carts belong to their user. Guest carts are addressed by id only.
pub(crate) fn ensure_cart_owner(cart: &CartModel, user: Option<&AuthUser>) -> AppResult<()> {
    match (cart.user_id, user) {
        (None, _) => Ok(()),
        (Some(owner), Some(user)) if owner == user.user_id => Ok(()),
        _ => Err(AppError::CartNotFound),
    }
}

/// Loads a cart for mutation: locked, owned by the caller, not expired and still active.
async fn lock_mutable_cart<C>(conn: &C, cart_id: Uuid, user: Option<&AuthUser>) -> AppResult<CartModel>
where
    C: ConnectionTrait,
{
    let cart = Carts::find_by_id(cart_id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or(AppError::CartNotFound)?;
    ensure_cart_owner(&cart, user)?;
    if is_expired(&cart, Utc::now()) {
        return Err(AppError::CartNotFound);
    }
    if cart.status != CartStatus::Active {
        return Err(AppError::InvalidStatus(format!(
            "Cart is {} and can no longer be changed",
            cart.status.as_str()
        )));
    }
    Ok(cart)
}

/// Returns the caller's active cart, creating one when needed. Guests always
/// get a fresh cart that expires after the configured TTL.
pub async fn create_cart(
    state: &AppState,
    user: Option<&AuthUser>,
) -> AppResult<ApiResponse<CartWithItems>> {
    let now = Utc::now();

    if let Some(user) = user {
        let existing = Carts::find()
            .filter(
                Condition::all()
                    .add(CartCol::UserId.eq(user.user_id))
                    .add(CartCol::Status.eq(CartStatus::Active)),
            )
            .order_by_desc(CartCol::CreatedAt)
            .one(&state.orm)
            .await?;
        if let Some(cart) = existing {
            return cart_response(state, cart, "OK").await;
        }
    }

    let (user_id, guest_cart_id, expires_at) = match user {
        Some(user) => (Some(user.user_id), None, None),
        None => (
            None,
            Some(Uuid::new_v4().simple().to_string()),
            Some(now + Duration::hours(state.config.guest_cart_ttl_hours)),
        ),
    };

    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        guest_cart_id: Set(guest_cart_id),
        status: Set(CartStatus::Active),
        expires_at: Set(expires_at.map(Into::into)),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    tracing::debug!(cart_id = %cart.id, guest = cart.user_id.is_none(), "cart created");
    cart_response(state, cart, "Cart created").await
}

pub async fn get_cart(
    state: &AppState,
    user: Option<&AuthUser>,
    cart_id: Uuid,
) -> AppResult<ApiResponse<CartWithItems>> {
    let cart = Carts::find_by_id(cart_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::CartNotFound)?;
    ensure_cart_owner(&cart, user)?;
    if is_expired(&cart, Utc::now()) {
        return Err(AppError::CartNotFound);
    }
    cart_response(state, cart, "OK").await
}

/// Adds a product, capturing its current price. Adding the same product with
/// the same attributes again bumps the quantity of the existing line.
pub async fn add_item(
    state: &AppState,
    user: Option<&AuthUser>,
    cart_id: Uuid,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<CartWithItems>> {
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let cart = lock_mutable_cart(&txn, cart_id, user).await?;

    let product = Products::find_by_id(payload.product_id)
        .one(&txn)
        .await?
        .filter(|product| product.is_active)
        .ok_or_else(|| AppError::ProductsUnavailable(vec![payload.product_id]))?;

    let now = Utc::now();
    let existing = CartItems::find()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::ProductId.eq(product.id)),
        )
        .all(&txn)
        .await?
        .into_iter()
        .find(|item| item.attributes == payload.attributes);

    match existing {
        Some(item) => {
            let quantity = item.quantity + payload.quantity;
            if quantity > 99 {
                return Err(AppError::Validation("Quantity cannot exceed 99".into()));
            }
            let unit_price = item.unit_price;
            let mut active: CartItemActive = item.into();
            active.quantity = Set(quantity);
            active.line_total = Set(line_total(unit_price, quantity));
            active.updated_at = Set(now.into());
            active.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(payload.quantity),
                unit_price: Set(product.price),
                line_total: Set(line_total(product.price, payload.quantity)),
                attributes: Set(payload.attributes),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
            .insert(&txn)
            .await?;
        }
    }

    let cart = touch(&txn, cart).await?;
    txn.commit().await?;

    cart_response(state, cart, "Item added").await
}

/// Changes a line's quantity. The price captured when the line was added is kept.
pub async fn update_item(
    state: &AppState,
    user: Option<&AuthUser>,
    cart_id: Uuid,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartWithItems>> {
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let cart = lock_mutable_cart(&txn, cart_id, user).await?;

    let item = cart
        .find_related(CartItems)
        .filter(CartItemCol::Id.eq(item_id))
        .one(&txn)
        .await?
        .ok_or(AppError::NotFound)?;

    let unit_price = item.unit_price;
    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    active.line_total = Set(line_total(unit_price, payload.quantity));
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    let cart = touch(&txn, cart).await?;
    txn.commit().await?;

    cart_response(state, cart, "Item updated").await
}

pub async fn remove_item(
    state: &AppState,
    user: Option<&AuthUser>,
    cart_id: Uuid,
    item_id: Uuid,
) -> AppResult<ApiResponse<CartWithItems>> {
    let txn = state.orm.begin().await?;
    let cart = lock_mutable_cart(&txn, cart_id, user).await?;

    let result = CartItems::delete_many()
        .filter(
            Condition::all()
                .add(CartItemCol::CartId.eq(cart.id))
                .add(CartItemCol::Id.eq(item_id)),
        )
        .exec(&txn)
        .await?;
    if result.rows_affected == 0 {
        return Err(AppError::NotFound);
    }

    let cart = touch(&txn, cart).await?;
    txn.commit().await?;

    cart_response(state, cart, "Item removed").await
}

async fn touch<C>(conn: &C, cart: CartModel) -> AppResult<CartModel>
where
    C: ConnectionTrait,
{
    let mut active: CartActive = cart.into();
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

async fn cart_response(
    state: &AppState,
    cart: CartModel,
    message: &str,
) -> AppResult<ApiResponse<CartWithItems>> {
    let items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .all(&state.orm)
        .await?;
    let subtotal = round_money(items.iter().map(|item| item.line_total).sum::<Decimal>());

    Ok(ApiResponse::success(
        message,
        CartWithItems {
            cart: cart_from_entity(cart),
            items: items.into_iter().map(cart_item_from_entity).collect(),
            subtotal,
        },
        Some(Meta::empty()),
    ))
}
