use chrono::{Duration, Utc};
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    audit::{self, log_audit_best_effort},
    config::PaytrConfig,
    db::is_unique_violation,
    domain::{
        order_status::OrderStatus, payment_status::PaymentStatus, pricing::to_minor_units,
        reconciliation::completion_stamp,
    },
    dto::payments::{InitPaymentRequest, InitPaymentResponse, RetryPaymentResponse},
    entity::{
        order_items::{Column as OrderItemCol, Entity as OrderItems},
        orders::{ActiveModel as OrderActive, Entity as Orders, Model as OrderModel},
        payment_webhook_logs::{
            self, ActiveModel as WebhookLogActive, Column as WebhookLogCol,
            Entity as PaymentWebhookLogs,
        },
        payments::{
            ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments,
            Model as PaymentModel,
        },
    },
    error::{AppError, AppResult},
    gateway::paytr::{
        BasketLine, InitContext, MerchantCredentials, build_merchant_oid, build_signed_init_request,
    },
    metrics,
    middleware::auth::AuthUser,
    models::{Payment, payment_from_entity},
    response::{ApiResponse, Meta},
    services::order_service::{apply_transition, ensure_order_access, lock_order},
    state::AppState,
};

/// A failed payment may be reset to pending this many times.
pub const MAX_PAYMENT_RETRIES: u64 = 3;

pub fn merchant_credentials(config: &PaytrConfig) -> AppResult<MerchantCredentials> {
    match (&config.merchant_id, &config.merchant_key, &config.merchant_salt) {
        (Some(merchant_id), Some(merchant_key), Some(merchant_salt)) => Ok(MerchantCredentials {
            merchant_id: merchant_id.clone(),
            merchant_key: merchant_key.clone(),
            merchant_salt: merchant_salt.clone(),
        }),
        _ => Err(AppError::Config(
            "PAYTR_MERCHANT_ID, PAYTR_MERCHANT_KEY and PAYTR_MERCHANT_SALT must be set".into(),
        )),
    }
}

/// Creates a pending payment for a pending order and asks the gateway for a
/// checkout token.
///
/// The payment row is committed before the gateway is called. If the call
/// fails or times out the payment is marked `failed`; the order is left as is.
pub async fn init_payment(
    state: &AppState,
    user: Option<&AuthUser>,
    user_ip: String,
    payload: InitPaymentRequest,
) -> AppResult<ApiResponse<InitPaymentResponse>> {
    payload.validate()?;
    let credentials = merchant_credentials(&state.config.paytr)?;
    let paytr = &state.config.paytr;
    let now = Utc::now();

    let txn = state.orm.begin().await?;
    let order = lock_order(&txn, payload.order_id).await?;
    ensure_order_access(&order, user)?;
    if order.status != OrderStatus::Pending {
        return Err(AppError::InvalidStatus(format!(
            "Order is {}, payment can only start while it is pending",
            order.status
        )));
    }

    let payments = Payments::find()
        .filter(PaymentCol::OrderId.eq(order.id))
        .all(&txn)
        .await?;
    for payment in payments {
        let status = PaymentStatus::parse(&payment.status);
        if status.is_terminal() {
            continue;
        }
        if status == PaymentStatus::Pending && payment.expires_at.with_timezone(&Utc) <= now {
            tracing::info!(payment_id = %payment.id, "expiring stale payment session");
            fail_payment(&txn, payment, "Payment session expired").await?;
            continue;
        }
        return Err(AppError::PaymentExists);
    }

    let basket = OrderItems::find()
        .filter(OrderItemCol::OrderId.eq(order.id))
        .order_by_asc(OrderItemCol::CreatedAt)
        .all(&txn)
        .await?
        .into_iter()
        .map(|item| BasketLine {
            name: item.product_name,
            unit_price: item.unit_price.to_string(),
            quantity: item.quantity,
        })
        .collect();

    let ctx = InitContext {
        merchant_oid: build_merchant_oid(&order.order_number),
        payment_amount: to_minor_units(order.grand_total),
        email: payload.email.unwrap_or_else(|| order.customer_email.clone()),
        user_name: payload.user_name.unwrap_or_else(|| order.customer_name.clone()),
        user_address: payload
            .user_address
            .unwrap_or_else(|| address_line(&order)),
        user_phone: payload.user_phone.unwrap_or_else(|| order.customer_phone.clone()),
        ok_url: paytr.ok_url.clone(),
        fail_url: paytr.fail_url.clone(),
        user_ip,
        currency: order.currency.clone(),
        test_mode: paytr.test_mode,
        timeout_minutes: paytr.session_minutes,
        basket,
        max_installment: payload.max_installment.unwrap_or(1),
    };
    let signed = build_signed_init_request(&credentials, &ctx)
        .map_err(|err| AppError::Config(err.to_string()))?;

    let expires_at = now + Duration::minutes(paytr.session_minutes);
    let payment = PaymentActive {
        id: Set(Uuid::new_v4()),
        order_id: Set(order.id),
        merchant_oid: Set(signed.merchant_oid.clone()),
        gateway_token: Set(None),
        amount: Set(order.grand_total),
        currency: Set(order.currency.clone()),
        installment_count: Set(1),
        status: Set(PaymentStatus::Pending.as_str().to_string()),
        hash: Set(Some(signed.signature.clone())),
        user_ip: Set(Some(ctx.user_ip.clone())),
        gateway_metadata: Set(None),
        error_message: Set(None),
        attempt: Set(0),
        expires_at: Set(expires_at.into()),
        completed_at: Set(None),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await
    .map_err(|err| {
        if is_unique_violation(&err, Some("uq_payments_pending_per_order")) {
            AppError::PaymentExists
        } else {
            err.into()
        }
    })?;
    txn.commit().await?;

    let token = match state.paytr.request_token(&signed.payload).await {
        Ok(token) => token,
        Err(err) => {
            state.metrics.incr(metrics::PAYMENT_GATEWAY_ERRORS);
            tracing::warn!(
                payment_id = %payment.id,
                merchant_oid = %payment.merchant_oid,
                error = %err,
                "gateway token request failed"
            );
            fail_payment(&state.orm, payment, &err.to_string()).await?;
            return Err(AppError::Gateway("could not obtain a payment token".into()));
        }
    };

    let mut active: PaymentActive = payment.into();
    active.gateway_token = Set(Some(token.clone()));
    active.updated_at = Set(Utc::now().into());
    let payment = active.update(&state.orm).await?;

    state.metrics.incr(metrics::PAYMENTS_INITIATED);
    tracing::info!(
        payment_id = %payment.id,
        order_id = %order.id,
        merchant_oid = %payment.merchant_oid,
        "payment initiated"
    );
    log_audit_best_effort(
        &state.pool,
        user.map(|u| u.user_id),
        audit::PAYMENT_INITIATED,
        "payments",
        serde_json::json!({ "payment_id": payment.id, "order_id": order.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Payment initiated",
        InitPaymentResponse {
            payment_id: payment.id,
            merchant_order_id: payment.merchant_oid,
            redirect_url: format!("{}/{}", paytr.redirect_base_url.trim_end_matches('/'), token),
            gateway_token: token,
            expires_at,
        },
        Some(Meta::empty()),
    ))
}

/// Resets a failed payment to pending for another attempt.
///
/// Capped at [`MAX_PAYMENT_RETRIES`] per merchant order id. Each retry bumps
/// `attempt`, so the next callback is deduplicated separately from the failed
/// one, and leaves a `retry` record in the webhook log. An order sitting in
/// `failed` walks back to `pending` in the same transaction.
pub async fn retry_payment(
    state: &AppState,
    user: Option<&AuthUser>,
    payment_id: Uuid,
) -> AppResult<ApiResponse<RetryPaymentResponse>> {
    let now = Utc::now();
    let txn = state.orm.begin().await?;

    let payment = Payments::find_by_id(payment_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::PaymentNotFound)?;
    let order = lock_order(&txn, payment.order_id).await?;
    ensure_order_access(&order, user).map_err(|_| AppError::PaymentNotFound)?;

    let status = PaymentStatus::parse(&payment.status);
    if status != PaymentStatus::Failed {
        return Err(AppError::InvalidStatus(format!(
            "Payment is {status}, only failed payments can be retried"
        )));
    }

    let retries_used = PaymentWebhookLogs::find()
        .filter(
            Condition::all()
                .add(WebhookLogCol::PaymentId.eq(payment.id))
                .add(WebhookLogCol::Kind.eq(payment_webhook_logs::KIND_RETRY)),
        )
        .count(&txn)
        .await?;
    if retries_used >= MAX_PAYMENT_RETRIES {
        tracing::info!(payment_id = %payment.id, retries_used, "payment retry cap reached");
        return Err(AppError::MaxRetriesExceeded);
    }

    let other_active = Payments::find()
        .filter(
            Condition::all()
                .add(PaymentCol::OrderId.eq(order.id))
                .add(PaymentCol::Id.ne(payment.id))
                .add(PaymentCol::Status.eq(PaymentStatus::Pending.as_str())),
        )
        .count(&txn)
        .await?;
    if other_active > 0 {
        return Err(AppError::PaymentExists);
    }

    // Each attempt gets its own merchant_oid so callbacks for the failed
    // attempt can never be applied to the new one.
    let attempt = payment.attempt + 1;
    let previous_oid = payment.merchant_oid.clone();
    let merchant_oid = build_merchant_oid(&order.order_number);
    let mut active: PaymentActive = payment.into();
    active.status = Set(PaymentStatus::Pending.as_str().to_string());
    active.merchant_oid = Set(merchant_oid.clone());
    active.gateway_token = Set(None);
    active.hash = Set(None);
    active.attempt = Set(attempt);
    active.error_message = Set(None);
    active.expires_at = Set((now + Duration::minutes(state.config.paytr.session_minutes)).into());
    active.updated_at = Set(now.into());
    let payment = active.update(&txn).await?;

    WebhookLogActive {
        id: Set(Uuid::new_v4()),
        payment_id: Set(Some(payment.id)),
        merchant_oid: Set(merchant_oid.clone()),
        attempt: Set(attempt),
        kind: Set(payment_webhook_logs::KIND_RETRY.to_string()),
        payload: Set(serde_json::json!({
            "action": "retry",
            "previous_status": PaymentStatus::Failed.as_str(),
            "previous_merchant_oid": previous_oid,
            "retry_number": retries_used + 1,
            "requested_by": user.map(|u| u.user_id),
        })),
        processed: Set(false),
        error_message: Set(None),
        created_at: Set(now.into()),
        processed_at: Set(None),
    }
    .insert(&txn)
    .await?;

    let order = if order.status == OrderStatus::Failed {
        apply_transition(
            &txn,
            order,
            OrderStatus::Pending,
            "Payment retry requested",
            user.map(|u| u.user_id),
        )
        .await?
    } else {
        order
    };
    let order = set_order_payment_status(&txn, order, &PaymentStatus::Pending).await?;

    txn.commit().await?;

    tracing::info!(
        merchant_oid = %merchant_oid,
        previous_merchant_oid = %previous_oid,
        attempt,
        "payment reset for retry"
    );
    log_audit_best_effort(
        &state.pool,
        user.map(|u| u.user_id),
        audit::PAYMENT_RETRIED,
        "payments",
        serde_json::json!({ "payment_id": payment.id, "attempt": attempt }),
    )
    .await;

    let retries_used = retries_used + 1;
    Ok(ApiResponse::success(
        "Payment reset to pending",
        RetryPaymentResponse {
            payment: payment_from_entity(payment),
            retries_used,
            retries_left: MAX_PAYMENT_RETRIES.saturating_sub(retries_used),
            order_status: order.status,
        },
        Some(Meta::empty()),
    ))
}

pub async fn get_payment(
    state: &AppState,
    user: Option<&AuthUser>,
    id: Uuid,
) -> AppResult<ApiResponse<Payment>> {
    let payment = Payments::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::PaymentNotFound)?;
    let order = Orders::find_by_id(payment.order_id)
        .one(&state.orm)
        .await?
        .ok_or(AppError::PaymentNotFound)?;
    ensure_order_access(&order, user).map_err(|_| AppError::PaymentNotFound)?;

    Ok(ApiResponse::success(
        "OK",
        payment_from_entity(payment),
        Some(Meta::empty()),
    ))
}

async fn fail_payment<C>(conn: &C, payment: PaymentModel, reason: &str) -> AppResult<PaymentModel>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let completed_at = completion_stamp(payment.completed_at, &PaymentStatus::Failed, now.into());
    let mut active: PaymentActive = payment.into();
    active.status = Set(PaymentStatus::Failed.as_str().to_string());
    active.error_message = Set(Some(reason.to_string()));
    active.completed_at = Set(completed_at);
    active.updated_at = Set(now.into());
    Ok(active.update(conn).await?)
}

/// Mirrors the latest payment status onto the order. This is bookkeeping on
/// `payment_status` only; `status` moves through `apply_transition`.
pub(crate) async fn set_order_payment_status<C>(
    conn: &C,
    order: OrderModel,
    status: &PaymentStatus,
) -> AppResult<OrderModel>
where
    C: ConnectionTrait,
{
    if order.payment_status == status.as_str() {
        return Ok(order);
    }
    let mut active: OrderActive = order.into();
    active.payment_status = Set(status.as_str().to_string());
    active.updated_at = Set(Utc::now().into());
    Ok(active.update(conn).await?)
}

fn address_line(order: &OrderModel) -> String {
    let field = |name: &str| {
        order
            .shipping_address
            .get(name)
            .and_then(|value| value.as_str())
            .unwrap_or_default()
            .trim()
            .to_string()
    };
    [field("address_line"), field("district"), field("city")]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}
