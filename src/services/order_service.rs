use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    audit::{self, log_audit_best_effort},
    db::is_unique_violation,
    domain::{
        billing::normalize_mobile_phone,
        order_number::{MAX_SEQUENCE_ATTEMPTS, daily_prefix, format_order_number, next_sequence},
        order_status::OrderStatus,
        payment_status::PaymentStatus,
    },
    dto::orders::{CreateOrderRequest, OrderDetail, OrderWithItems, UpdateOrderStatusRequest},
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        carts::{ActiveModel as CartActive, CartStatus, Column as CartCol, Entity as Carts},
        order_items::{ActiveModel as OrderItemActive, Column as OrderItemCol, Entity as OrderItems},
        order_status_history::{
            ActiveModel as HistoryActive, Column as HistoryCol, Entity as OrderStatusHistory,
        },
        orders::{ActiveModel as OrderActive, Column as OrderCol, Entity as Orders, Model as OrderModel},
        products::Entity as Products,
    },
    error::{AppError, AppResult},
    metrics,
    middleware::auth::{AuthUser, ensure_admin},
    models::{Order, history_from_entity, order_from_entity, order_item_from_entity},
    response::{ApiResponse, Meta},
    routes::params::OrderListQuery,
    services::cart_service::{ensure_cart_owner, is_expired},
    state::AppState,
};

/// Freezes a cart into an order.
///
/// Runs in one transaction: the cart row is locked, items and products are
/// checked, the order and its item snapshots are inserted, the cart flips
/// `active -> converted` and the first history row is written. Any failure
/// rolls everything back and leaves the cart active.
pub async fn create_order(
    state: &AppState,
    user: Option<&AuthUser>,
    payload: CreateOrderRequest,
) -> AppResult<ApiResponse<OrderWithItems>> {
    payload.validate()?;
    let billing = payload.billing.validate()?;
    let phone = normalize_mobile_phone(&payload.customer.phone)?;
    let user_id = user.map(|u| u.user_id);

    let txn = state.orm.begin().await?;

    let cart = Carts::find_by_id(payload.cart_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::CartNotFound)?;
    ensure_cart_owner(&cart, user).map_err(|_| AppError::CartNotFound)?;
    if cart.status != CartStatus::Active || is_expired(&cart, Utc::now()) {
        return Err(AppError::CartNotFound);
    }

    let lines = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .order_by_asc(CartItemCol::CreatedAt)
        .find_also_related(Products)
        .all(&txn)
        .await?;
    if lines.is_empty() {
        return Err(AppError::EmptyCart);
    }

    let mut unavailable: Vec<Uuid> = lines
        .iter()
        .filter(|(item, product)| {
            product
                .as_ref()
                .is_none_or(|p| !p.is_active || p.stock < item.quantity)
        })
        .map(|(item, _)| item.product_id)
        .collect();
    if !unavailable.is_empty() {
        unavailable.sort();
        unavailable.dedup();
        tracing::info!(cart_id = %cart.id, products = ?unavailable, "cart has unavailable products");
        return Err(AppError::ProductsUnavailable(unavailable));
    }

    let totals = state
        .config
        .pricing
        .quote(lines.iter().map(|(item, _)| item.line_total), None);

    let now = Utc::now();
    let shipping_address = serde_json::to_value(&payload.shipping_address)
        .map_err(|e| AppError::Internal(e.into()))?;
    let draft = OrderActive {
        id: Set(Uuid::new_v4()),
        order_number: Set(String::new()),
        cart_id: Set(cart.id),
        user_id: Set(user_id.or(cart.user_id)),
        customer_name: Set(payload.customer.name.trim().to_string()),
        customer_email: Set(payload.customer.email.trim().to_lowercase()),
        customer_phone: Set(phone),
        billing_type: Set(billing.billing_type.as_str().to_string()),
        tax_id: Set(billing.tax_id),
        tax_office: Set(billing.tax_office),
        company_name: Set(billing.company_name),
        shipping_address: Set(shipping_address),
        delivery_date: Set(payload.delivery_date),
        delivery_slot: Set(payload.delivery_slot),
        subtotal: Set(totals.subtotal),
        tax_total: Set(totals.tax_total),
        shipping_total: Set(totals.shipping_total),
        grand_total: Set(totals.grand_total),
        currency: Set(state.config.paytr.currency.clone()),
        status: Set(OrderStatus::Pending),
        payment_method: Set(payload.payment_method),
        payment_status: Set(PaymentStatus::Pending.as_str().to_string()),
        notes: Set(payload.notes),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    let order = insert_with_order_number(&txn, draft, now.date_naive()).await?;

    let mut items = Vec::with_capacity(lines.len());
    for (line, product) in lines {
        let product_name = product.map(|p| p.name).unwrap_or_default();
        let item = OrderItemActive {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(line.product_id),
            product_name: Set(product_name),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            line_total: Set(line.line_total),
            attributes: Set(line.attributes),
            created_at: Set(now.into()),
        }
        .insert(&txn)
        .await?;
        items.push(order_item_from_entity(item));
    }

    // Conditional flip: only the request that still sees `active` wins.
    let flipped = Carts::update_many()
        .set(CartActive {
            status: Set(CartStatus::Converted),
            updated_at: Set(now.into()),
            ..Default::default()
        })
        .filter(
            Condition::all()
                .add(CartCol::Id.eq(cart.id))
                .add(CartCol::Status.eq(CartStatus::Active)),
        )
        .exec(&txn)
        .await?;
    if flipped.rows_affected == 0 {
        return Err(AppError::CartNotFound);
    }

    insert_history(&txn, order.id, None, OrderStatus::Pending, "Order created", user_id).await?;

    txn.commit().await?;

    state.metrics.incr(metrics::ORDERS_CREATED);
    tracing::info!(
        order_id = %order.id,
        order_number = %order.order_number,
        grand_total = %order.grand_total,
        "order created"
    );
    log_audit_best_effort(
        &state.pool,
        user_id,
        audit::ORDER_CREATED,
        "orders",
        serde_json::json!({ "order_id": order.id, "cart_id": cart.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order created",
        OrderWithItems {
            order: order_from_entity(order),
            items,
        },
        Some(Meta::empty()),
    ))
}

/// Inserts the order under `ORD-<date>-<seq>`, re-reading the daily count
/// after each collision on the unique order number. Each try runs in its own
/// savepoint so a collision does not poison the outer transaction.
async fn insert_with_order_number(
    txn: &DatabaseTransaction,
    draft: OrderActive,
    date: chrono::NaiveDate,
) -> AppResult<OrderModel> {
    let prefix = daily_prefix(date);
    for attempt in 0..MAX_SEQUENCE_ATTEMPTS {
        let existing = Orders::find()
            .filter(OrderCol::OrderNumber.starts_with(prefix.as_str()))
            .count(txn)
            .await?;
        let order_number = format_order_number(date, next_sequence(existing, attempt));

        let mut candidate = draft.clone();
        candidate.order_number = Set(order_number.clone());

        let savepoint = txn.begin().await?;
        match candidate.insert(&savepoint).await {
            Ok(order) => {
                savepoint.commit().await?;
                return Ok(order);
            }
            Err(err) if is_unique_violation(&err, Some("order_number")) => {
                savepoint.rollback().await?;
                tracing::debug!(order_number = %order_number, attempt, "order number taken, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::Internal(anyhow::anyhow!(
        "could not allocate an order number after {MAX_SEQUENCE_ATTEMPTS} attempts"
    )))
}

/// The only write path for `orders.status`.
///
/// The caller must hold the order row lock inside `conn`'s transaction; the
/// status update and the history row commit or roll back together.
pub async fn apply_transition<C>(
    conn: &C,
    order: OrderModel,
    target: OrderStatus,
    note: &str,
    actor: Option<Uuid>,
) -> AppResult<OrderModel>
where
    C: ConnectionTrait,
{
    let from = order.status;
    let to = from.transition(target)?;

    let mut active: OrderActive = order.into();
    active.status = Set(to);
    active.updated_at = Set(Utc::now().into());
    let order = active.update(conn).await?;

    insert_history(conn, order.id, Some(from), to, note, actor).await?;
    tracing::info!(order_id = %order.id, from = %from, to = %to, "order status changed");
    Ok(order)
}

async fn insert_history<C>(
    conn: &C,
    order_id: Uuid,
    from: Option<OrderStatus>,
    to: OrderStatus,
    note: &str,
    actor: Option<Uuid>,
) -> AppResult<()>
where
    C: ConnectionTrait,
{
    HistoryActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        from_status: Set(from),
        to_status: Set(to),
        note: Set(note.to_string()),
        created_by: Set(actor),
        created_at: Set(Utc::now().into()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

pub(crate) async fn lock_order<C>(conn: &C, id: Uuid) -> AppResult<OrderModel>
where
    C: ConnectionTrait,
{
    Orders::find_by_id(id)
        .lock(LockType::Update)
        .one(conn)
        .await?
        .ok_or(AppError::OrderNotFound)
}

/// Admins see every order, customers their own. Guest orders are addressed by
/// their unguessable id alone.
pub(crate) fn ensure_order_access(order: &OrderModel, user: Option<&AuthUser>) -> AppResult<()> {
    match (order.user_id, user) {
        (_, Some(user)) if user.is_admin() => Ok(()),
        (Some(owner), Some(user)) if owner == user.user_id => Ok(()),
        (None, _) => Ok(()),
        _ => Err(AppError::OrderNotFound),
    }
}

pub async fn update_status(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateOrderStatusRequest,
) -> AppResult<ApiResponse<Order>> {
    ensure_admin(user)?;
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, id).await?;
    let from = order.status;
    let note = payload
        .note
        .as_deref()
        .map(str::trim)
        .filter(|note| !note.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Status changed to {}", payload.status));

    let order = apply_transition(&txn, order, payload.status, &note, Some(user.user_id)).await?;
    txn.commit().await?;

    state.metrics.incr(metrics::ORDER_TRANSITIONS);
    log_audit_best_effort(
        &state.pool,
        Some(user.user_id),
        audit::ORDER_STATUS_CHANGED,
        "orders",
        serde_json::json!({ "order_id": order.id, "from": from, "to": order.status }),
    )
    .await;

    Ok(ApiResponse::success(
        "Order status updated",
        order_from_entity(order),
        Some(Meta::empty()),
    ))
}

pub async fn get_order(
    state: &AppState,
    user: Option<&AuthUser>,
    id: Uuid,
) -> AppResult<ApiResponse<OrderDetail>> {
    let order = Orders::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::OrderNotFound)?;
    ensure_order_access(&order, user)?;

    let items = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_item_from_entity)
        .collect();

    let history = OrderStatusHistory::find()
        .filter(HistoryCol::OrderId.eq(order.id))
        .order_by_asc(HistoryCol::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(history_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        OrderDetail {
            order: order_from_entity(order),
            items,
            history,
        },
        Some(Meta::empty()),
    ))
}

pub async fn list_orders(
    state: &AppState,
    user: &AuthUser,
    query: OrderListQuery,
) -> AppResult<ApiResponse<Vec<Order>>> {
    let (page, limit, offset) = query.pagination().normalize();

    let mut condition = Condition::all();
    if !user.is_admin() {
        condition = condition.add(OrderCol::UserId.eq(user.user_id));
    }
    if let Some(status) = query.status.as_deref().filter(|s| !s.is_empty()) {
        let status: OrderStatus = status.parse().map_err(AppError::Validation)?;
        condition = condition.add(OrderCol::Status.eq(status));
    }

    let finder = Orders::find()
        .filter(condition)
        .order_by_desc(OrderCol::CreatedAt);
    let total = finder.clone().count(&state.orm).await? as i64;

    let orders = finder
        .limit(limit as u64)
        .offset(offset as u64)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(order_from_entity)
        .collect();

    Ok(ApiResponse::success(
        "OK",
        orders,
        Some(Meta::new(page, limit, total)),
    ))
}
