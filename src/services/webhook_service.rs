//! Gateway callback reconciliation.
//!
//! A delivery is validated, authenticated, deduplicated per `merchant_oid`
//! and then applied to the payment and its order in
//! one transaction. Every delivery that gets past shape validation leaves a
//! row in `payment_webhook_logs`, rejected ones included.

use chrono::Utc;
use sea_orm::sea_query::LockType;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::{
    db::is_unique_violation,
    domain::{
        payment_status::PaymentStatus,
        reconciliation::{OrderEffect, completion_stamp, order_effect},
    },
    dto::payments::WebhookAck,
    entity::{
        payment_webhook_logs::{
            self, ActiveModel as WebhookLogActive, Column as WebhookLogCol,
            Entity as PaymentWebhookLogs, Model as WebhookLogModel,
        },
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
    },
    error::{AppError, AppResult},
    gateway::paytr::{CallbackPayload, RawCallback, map_gateway_status, verify_callback},
    metrics,
    response::{ApiResponse, Meta},
    services::{
        order_service::{apply_transition, lock_order},
        payment_service::{merchant_credentials, set_order_payment_status},
    },
    state::AppState,
};

const INVALID_SIGNATURE: &str = "Invalid signature";
const PAYMENT_NOT_FOUND: &str = "Payment not found";
const DUPLICATE_CALLBACK: &str = "Duplicate callback";
const SUPERSEDED_ATTEMPT: &str = "Merchant order id superseded by a retry";
const GATEWAY_NOT_CONFIGURED: &str = "Payment gateway is not configured";

pub async fn handle_callback(
    state: &AppState,
    raw: RawCallback,
) -> AppResult<ApiResponse<WebhookAck>> {
    let raw_payload = serde_json::to_value(&raw).map_err(|e| AppError::Internal(e.into()))?;
    let (payload, presented) = raw.into_parts().map_err(|err| {
        state.metrics.incr(metrics::WEBHOOK_REJECTED);
        AppError::Validation(err.to_string())
    })?;
    let oid = payload.merchant_oid.clone();

    let credentials = match merchant_credentials(&state.config.paytr) {
        Ok(credentials) => credentials,
        Err(err) => {
            state.metrics.incr(metrics::WEBHOOK_REJECTED);
            tracing::error!(merchant_oid = %oid, "callback received but gateway credentials are missing");
            record_attempt(&state.orm, None, &oid, 0, raw_payload, Some(GATEWAY_NOT_CONFIGURED))
                .await?;
            return Err(err);
        }
    };
    if !verify_callback(&payload, &presented, &credentials) {
        state.metrics.incr(metrics::WEBHOOK_REJECTED);
        tracing::warn!(merchant_oid = %oid, "callback signature mismatch");
        record_attempt(&state.orm, None, &oid, 0, raw_payload, Some(INVALID_SIGNATURE)).await?;
        return Err(AppError::InvalidSignature);
    }

    let Some(payment) = Payments::find()
        .filter(PaymentCol::MerchantOid.eq(oid.clone()))
        .one(&state.orm)
        .await?
    else {
        // A retry moved the payment to a new merchant_oid. Deliveries for the
        // old one are acknowledged and never applied.
        if let Some(earlier) = superseded_attempt(&state.orm, &oid).await? {
            let error = if already_processed(&state.orm, &oid).await? {
                DUPLICATE_CALLBACK
            } else {
                SUPERSEDED_ATTEMPT
            };
            record_attempt(
                &state.orm,
                earlier.payment_id,
                &oid,
                earlier.attempt,
                raw_payload,
                Some(error),
            )
            .await?;
            return Ok(duplicate_ack(state, oid));
        }

        state.metrics.incr(metrics::WEBHOOK_REJECTED);
        tracing::warn!(merchant_oid = %oid, "callback for unknown payment");
        record_attempt(&state.orm, None, &oid, 0, raw_payload, Some(PAYMENT_NOT_FOUND)).await?;
        return Err(AppError::PaymentNotFound);
    };

    if already_processed(&state.orm, &oid).await? {
        record_attempt(
            &state.orm,
            Some(payment.id),
            &oid,
            payment.attempt,
            raw_payload,
            Some(DUPLICATE_CALLBACK),
        )
        .await?;
        return Ok(duplicate_ack(state, oid));
    }

    // Committed on its own so a crash below still leaves evidence.
    let log = record_attempt(
        &state.orm,
        Some(payment.id),
        &oid,
        payment.attempt,
        raw_payload,
        None,
    )
    .await?;

    match apply_callback(state, payment.id, &payload, log).await? {
        Applied::Done => {
            state.metrics.incr(metrics::WEBHOOK_PROCESSED);
            Ok(ApiResponse::success(
                "Callback processed",
                WebhookAck {
                    merchant_oid: oid,
                    duplicate: false,
                },
                Some(Meta::empty()),
            ))
        }
        Applied::Duplicate(log_id) => {
            mark_duplicate(state, log_id).await;
            Ok(duplicate_ack(state, oid))
        }
    }
}

enum Applied {
    Done,
    /// Another delivery for the same merchant_oid was applied first, or a
    /// retry superseded it; carries the id of this delivery's log row.
    Duplicate(Uuid),
}

async fn apply_callback(
    state: &AppState,
    payment_id: Uuid,
    payload: &CallbackPayload,
    log: WebhookLogModel,
) -> AppResult<Applied> {
    let txn = state.orm.begin().await?;

    let payment = Payments::find_by_id(payment_id)
        .lock(LockType::Update)
        .one(&txn)
        .await?
        .ok_or(AppError::PaymentNotFound)?;

    // The payment lock serialises deliveries and retries; whoever waited
    // re-checks here.
    if payment.merchant_oid != payload.merchant_oid
        || already_processed(&txn, &payload.merchant_oid).await?
    {
        return Ok(Applied::Duplicate(log.id));
    }

    let now = Utc::now();
    let status = map_gateway_status(&payload.status);
    let order_id = payment.order_id;
    let attempt = payment.attempt;
    let installment_count = payload
        .installment_count
        .parse::<i32>()
        .unwrap_or(payment.installment_count);
    let failure_reason = payload
        .failed_reason_msg
        .clone()
        .filter(|reason| !reason.trim().is_empty());

    let mut active: PaymentActive = payment.clone().into();
    active.status = Set(status.as_str().to_string());
    active.installment_count = Set(installment_count);
    active.gateway_metadata = Set(Some(gateway_metadata(payload)));
    active.completed_at = Set(completion_stamp(payment.completed_at, &status, now.into()));
    if status == PaymentStatus::Failed {
        active.error_message = Set(failure_reason.clone());
    }
    active.updated_at = Set(now.into());
    active.update(&txn).await?;

    let order = lock_order(&txn, order_id).await?;
    let order = match order_effect(&status, order.status, failure_reason.as_deref()) {
        OrderEffect::Transition { to, note } => {
            let order = apply_transition(&txn, order, to, &note, None).await?;
            state.metrics.incr(metrics::ORDER_TRANSITIONS);
            order
        }
        OrderEffect::Diverged { wanted, current } => {
            state.metrics.incr(metrics::PAYMENT_ORDER_DIVERGENCE);
            tracing::warn!(
                merchant_oid = %payload.merchant_oid,
                order_id = %order.id,
                payment_status = %status,
                current = %current,
                wanted = %wanted,
                "payment and order diverged, order transition skipped"
            );
            order
        }
        OrderEffect::None => order,
    };
    set_order_payment_status(&txn, order, &status).await?;

    // `uq_payment_webhook_logs_processed_oid` allows one processed row per
    // merchant_oid.
    let log_id = log.id;
    let mut log_active: WebhookLogActive = log.into();
    log_active.processed = Set(true);
    log_active.processed_at = Set(Some(now.into()));
    match log_active.update(&txn).await {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err, Some("uq_payment_webhook_logs_processed_oid")) => {
            tracing::info!(merchant_oid = %payload.merchant_oid, "concurrent callback already applied");
            return Ok(Applied::Duplicate(log_id));
        }
        Err(err) => return Err(err.into()),
    }

    match txn.commit().await {
        Ok(()) => {}
        Err(err) if is_unique_violation(&err, None) => return Ok(Applied::Duplicate(log_id)),
        Err(err) => return Err(err.into()),
    }

    tracing::info!(
        merchant_oid = %payload.merchant_oid,
        attempt,
        payment_status = %status,
        "callback applied"
    );
    Ok(Applied::Done)
}

async fn already_processed<C>(conn: &C, merchant_oid: &str) -> AppResult<bool>
where
    C: ConnectionTrait,
{
    let processed = PaymentWebhookLogs::find()
        .filter(
            Condition::all()
                .add(WebhookLogCol::MerchantOid.eq(merchant_oid))
                .add(WebhookLogCol::Processed.eq(true)),
        )
        .count(conn)
        .await?;
    Ok(processed > 0)
}

/// Latest log row tying `merchant_oid` to a payment that has since moved on.
async fn superseded_attempt<C>(conn: &C, merchant_oid: &str) -> AppResult<Option<WebhookLogModel>>
where
    C: ConnectionTrait,
{
    let earlier = PaymentWebhookLogs::find()
        .filter(
            Condition::all()
                .add(WebhookLogCol::MerchantOid.eq(merchant_oid))
                .add(WebhookLogCol::PaymentId.is_not_null()),
        )
        .order_by_desc(WebhookLogCol::CreatedAt)
        .one(conn)
        .await?;
    Ok(earlier)
}

async fn record_attempt<C>(
    conn: &C,
    payment_id: Option<Uuid>,
    merchant_oid: &str,
    attempt: i32,
    payload: serde_json::Value,
    error: Option<&str>,
) -> AppResult<WebhookLogModel>
where
    C: ConnectionTrait,
{
    let log = WebhookLogActive {
        id: Set(Uuid::new_v4()),
        payment_id: Set(payment_id),
        merchant_oid: Set(merchant_oid.to_string()),
        attempt: Set(attempt),
        kind: Set(payment_webhook_logs::KIND_CALLBACK.to_string()),
        payload: Set(payload),
        processed: Set(false),
        error_message: Set(error.map(str::to_string)),
        created_at: Set(Utc::now().into()),
        processed_at: Set(None),
    }
    .insert(conn)
    .await?;
    Ok(log)
}

async fn mark_duplicate(state: &AppState, log_id: Uuid) {
    let result = PaymentWebhookLogs::update_many()
        .set(WebhookLogActive {
            error_message: Set(Some(DUPLICATE_CALLBACK.to_string())),
            ..Default::default()
        })
        .filter(WebhookLogCol::Id.eq(log_id))
        .exec(&state.orm)
        .await;
    if let Err(err) = result {
        tracing::warn!(error = %err, log_id = %log_id, "could not annotate duplicate callback");
    }
}

fn duplicate_ack(state: &AppState, merchant_oid: String) -> ApiResponse<WebhookAck> {
    state.metrics.incr(metrics::WEBHOOK_DUPLICATE);
    tracing::info!(merchant_oid = %merchant_oid, "duplicate callback acknowledged");
    ApiResponse::success(
        "Callback already processed",
        WebhookAck {
            merchant_oid,
            duplicate: true,
        },
        Some(Meta::empty()),
    )
}

fn gateway_metadata(payload: &CallbackPayload) -> serde_json::Value {
    serde_json::json!({
        "payment_type": payload.payment_type,
        "installment_count": payload.installment_count,
        "currency": payload.currency,
        "total_amount": payload.total_amount,
        "payment_amount": payload.payment_amount,
        "paid_price": payload.paid_price,
        "merchant_commission_fee": payload.merchant_commission_fee,
        "merchant_service_fee": payload.merchant_service_fee,
        "card_brand": payload.card_brand,
        "failed_reason_code": payload.failed_reason_code,
        "failed_reason_msg": payload.failed_reason_msg,
    })
}
