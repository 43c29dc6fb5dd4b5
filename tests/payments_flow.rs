mod common;

use std::sync::Arc;

use order_payments_api::{
    domain::{order_status::OrderStatus, payment_status::PaymentStatus},
    dto::payments::InitPaymentRequest,
    entity::{
        payment_webhook_logs::{Column as WebhookLogCol, Entity as PaymentWebhookLogs},
        payments::{ActiveModel as PaymentActive, Column as PaymentCol, Entity as Payments},
    },
    error::AppError,
    gateway::paytr::{CallbackPayload, MerchantCredentials, RawCallback, callback_signature},
    services::{order_service, payment_service, webhook_service},
    state::AppState,
};
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use secrecy::Secret;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn gateway_issuing(token: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/odeme/api/get-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "token": token,
        })))
        .mount(&server)
        .await;
    server
}

async fn gateway_rejecting() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/odeme/api/get-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "failed",
            "reason": "paytr_token mismatch",
        })))
        .mount(&server)
        .await;
    server
}

fn token_url(server: &MockServer) -> String {
    format!("{}/odeme/api/get-token", server.uri())
}

/// Pending order worth 379.00 (3 x 100.00 + 18% tax + 25.00 delivery).
async fn pending_order(state: &AppState) -> anyhow::Result<Uuid> {
    let product = common::create_product(state, dec!(100.00), 10).await?;
    let cart_id = common::guest_cart_with(state, &product, 3).await?;
    let order = order_service::create_order(state, None, common::order_request(cart_id))
        .await?
        .data
        .expect("order")
        .order;
    Ok(order.id)
}

fn init_request(order_id: Uuid) -> InitPaymentRequest {
    InitPaymentRequest {
        order_id,
        email: None,
        user_name: None,
        user_address: None,
        user_phone: None,
        max_installment: None,
    }
}

fn credentials() -> MerchantCredentials {
    MerchantCredentials {
        merchant_id: "100001".into(),
        merchant_key: Secret::new(common::MERCHANT_KEY.into()),
        merchant_salt: Secret::new(common::MERCHANT_SALT.into()),
    }
}

fn signed_callback(merchant_oid: &str, status: &str) -> RawCallback {
    let payload = CallbackPayload {
        merchant_oid: merchant_oid.to_string(),
        status: status.to_string(),
        total_amount: "37900".into(),
        payment_type: "card".into(),
        installment_count: "1".into(),
        currency: "TL".into(),
        payment_amount: "37900".into(),
        merchant_commission_fee: "758".into(),
        merchant_service_fee: "0".into(),
        paid_price: "37900".into(),
        card_brand: Some("bonus".into()),
        failed_reason_code: None,
        failed_reason_msg: (status == "failed").then(|| "Insufficient funds".to_string()),
    };
    let hash = callback_signature(&payload, &credentials()).expect("signature");

    RawCallback {
        merchant_oid: Some(payload.merchant_oid),
        status: Some(payload.status),
        total_amount: Some(payload.total_amount),
        hash: Some(hash),
        payment_type: Some(payload.payment_type),
        installment_count: Some(payload.installment_count),
        currency: Some(payload.currency),
        payment_amount: Some(payload.payment_amount),
        merchant_commission_fee: Some(payload.merchant_commission_fee),
        merchant_service_fee: Some(payload.merchant_service_fee),
        paid_price: Some(payload.paid_price),
        card_brand: payload.card_brand,
        failed_reason_code: payload.failed_reason_code,
        failed_reason_msg: payload.failed_reason_msg,
        test_mode: Some("1".into()),
    }
}

async fn order_status(state: &AppState, order_id: Uuid) -> anyhow::Result<(OrderStatus, usize)> {
    let detail = order_service::get_order(state, None, order_id)
        .await?
        .data
        .expect("detail");
    Ok((detail.order.status, detail.history.len()))
}

#[tokio::test]
async fn init_returns_token_and_redirect() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-init").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;

    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");
    assert_eq!(init.gateway_token, "tok-init");
    assert!(init.redirect_url.ends_with("/tok-init"));
    assert!(init.merchant_order_id.starts_with("SP"));

    let payment = payment_service::get_payment(&state, None, init.payment_id)
        .await?
        .data
        .expect("payment");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, dec!(379.00));
    assert_eq!(payment.gateway_token.as_deref(), Some("tok-init"));

    // A second live session for the same order is refused.
    let again = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id)).await;
    assert!(matches!(again, Err(AppError::PaymentExists)));

    Ok(())
}

#[tokio::test]
async fn gateway_rejection_fails_payment_and_keeps_order() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_rejecting().await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;

    let result = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id)).await;
    match result {
        Err(AppError::Gateway(message)) => assert_eq!(message, "could not obtain a payment token"),
        other => panic!("expected gateway error, got {other:?}"),
    }

    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?
        .expect("payment row");
    assert_eq!(payment.status, "failed");
    assert!(payment.completed_at.is_some());
    assert!(payment.error_message.is_some());

    let (status, history) = order_status(&state, order_id).await?;
    assert_eq!(status, OrderStatus::Pending);
    assert_eq!(history, 1);

    Ok(())
}

#[tokio::test]
async fn replayed_callback_is_applied_once() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-replay").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;
    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");

    let callback = signed_callback(&init.merchant_order_id, "success");
    let first = webhook_service::handle_callback(&state, callback.clone())
        .await?
        .data
        .expect("ack");
    assert!(!first.duplicate);

    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.status, "paid");
    let completed_at = payment.completed_at.expect("completed_at stamped");

    let replay = webhook_service::handle_callback(&state, callback)
        .await?
        .data
        .expect("ack");
    assert!(replay.duplicate);

    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.completed_at, Some(completed_at));

    let (status, history) = order_status(&state, order_id).await?;
    assert_eq!(status, OrderStatus::Confirmed);
    assert_eq!(history, 2);

    let logs = PaymentWebhookLogs::find()
        .filter(WebhookLogCol::MerchantOid.eq(init.merchant_order_id.clone()))
        .count(&state.orm)
        .await?;
    assert_eq!(logs, 2);

    Ok(())
}

#[tokio::test]
async fn concurrent_callbacks_confirm_order_once() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-race").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;
    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");

    let callback = signed_callback(&init.merchant_order_id, "success");
    let (left, right) = tokio::join!(
        webhook_service::handle_callback(&state, callback.clone()),
        webhook_service::handle_callback(&state, callback),
    );
    let left = left?.data.expect("ack");
    let right = right?.data.expect("ack");
    assert_ne!(left.duplicate, right.duplicate);

    let (status, history) = order_status(&state, order_id).await?;
    assert_eq!(status, OrderStatus::Confirmed);
    assert_eq!(history, 2);

    let processed = PaymentWebhookLogs::find()
        .filter(WebhookLogCol::MerchantOid.eq(init.merchant_order_id.clone()))
        .filter(WebhookLogCol::Processed.eq(true))
        .count(&state.orm)
        .await?;
    assert_eq!(processed, 1);

    Ok(())
}

#[tokio::test]
async fn forged_callback_is_rejected_and_recorded() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-forged").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;
    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");

    let mut callback = signed_callback(&init.merchant_order_id, "success");
    callback.total_amount = Some("1".into());

    let result = webhook_service::handle_callback(&state, callback).await;
    assert!(matches!(result, Err(AppError::InvalidSignature)));

    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.status, "pending");

    let log = PaymentWebhookLogs::find()
        .filter(WebhookLogCol::MerchantOid.eq(init.merchant_order_id.clone()))
        .one(&state.orm)
        .await?
        .expect("rejection recorded");
    assert!(!log.processed);
    assert_eq!(log.error_message.as_deref(), Some("Invalid signature"));

    Ok(())
}

#[tokio::test]
async fn failed_callback_cancels_order() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-failed").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;
    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");

    webhook_service::handle_callback(&state, signed_callback(&init.merchant_order_id, "failed")).await?;

    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.status, "failed");
    assert_eq!(payment.error_message.as_deref(), Some("Insufficient funds"));

    let detail = order_service::get_order(&state, None, order_id).await?.data.expect("detail");
    assert_eq!(detail.order.status, OrderStatus::Cancelled);
    assert_eq!(detail.order.payment_status, "failed");
    let last = detail.history.last().expect("history");
    assert_eq!(last.note, "Payment failed: Insufficient funds");

    Ok(())
}

#[tokio::test]
async fn fourth_retry_is_refused() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_rejecting().await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;

    let _ = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id)).await;
    let payment = Payments::find()
        .filter(PaymentCol::OrderId.eq(order_id))
        .one(&state.orm)
        .await?
        .expect("payment row");
    assert_eq!(payment.status, "failed");

    let mut merchant_oid = payment.merchant_oid.clone();
    for round in 1..=3u64 {
        let retried = payment_service::retry_payment(&state, None, payment.id)
            .await?
            .data
            .expect("retry payload");
        assert_eq!(retried.payment.status, PaymentStatus::Pending);
        assert_eq!(retried.payment.attempt, round as i32);
        assert_ne!(retried.payment.merchant_oid, merchant_oid);
        merchant_oid = retried.payment.merchant_oid.clone();
        assert_eq!(retried.retries_used, round);
        assert_eq!(retried.retries_left, 3 - round);

        // Only failed payments can be retried.
        let not_failed = payment_service::retry_payment(&state, None, payment.id).await;
        assert!(matches!(not_failed, Err(AppError::InvalidStatus(_))));

        let current = Payments::find_by_id(payment.id).one(&state.orm).await?.expect("payment");
        let mut active: PaymentActive = current.into();
        active.status = Set("failed".into());
        active.update(&state.orm).await?;
    }

    let capped = payment_service::retry_payment(&state, None, payment.id).await;
    assert!(matches!(capped, Err(AppError::MaxRetriesExceeded)));

    Ok(())
}

#[tokio::test]
async fn replay_after_retry_is_not_reapplied() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-retry-replay").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let order_id = pending_order(&state).await?;
    let init = payment_service::init_payment(&state, None, "203.0.113.5".into(), init_request(order_id))
        .await?
        .data
        .expect("init payload");
    let first_oid = init.merchant_order_id.clone();

    let failed = signed_callback(&first_oid, "failed");
    let ack = webhook_service::handle_callback(&state, failed.clone())
        .await?
        .data
        .expect("ack");
    assert!(!ack.duplicate);

    let retried = payment_service::retry_payment(&state, None, init.payment_id)
        .await?
        .data
        .expect("retry payload");
    assert_eq!(retried.payment.status, PaymentStatus::Pending);
    assert_ne!(retried.payment.merchant_oid, first_oid);

    // The gateway redelivers the old failure, then a late success for the old id.
    let replay = webhook_service::handle_callback(&state, failed)
        .await?
        .data
        .expect("ack");
    assert!(replay.duplicate);
    let late = webhook_service::handle_callback(&state, signed_callback(&first_oid, "success"))
        .await?
        .data
        .expect("ack");
    assert!(late.duplicate);

    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.status, "pending");
    assert_eq!(payment.merchant_oid, retried.payment.merchant_oid);
    assert!(payment.error_message.is_none());

    let processed = PaymentWebhookLogs::find()
        .filter(WebhookLogCol::MerchantOid.eq(first_oid.clone()))
        .filter(WebhookLogCol::Processed.eq(true))
        .count(&state.orm)
        .await?;
    assert_eq!(processed, 1);

    // The new attempt still settles normally.
    let settled = webhook_service::handle_callback(
        &state,
        signed_callback(&retried.payment.merchant_oid, "success"),
    )
    .await?
    .data
    .expect("ack");
    assert!(!settled.duplicate);
    let payment = Payments::find_by_id(init.payment_id).one(&state.orm).await?.expect("payment");
    assert_eq!(payment.status, "paid");

    Ok(())
}

#[tokio::test]
async fn callback_without_credentials_is_recorded() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let gateway = gateway_issuing("tok-unconfigured").await;
    let state = common::setup_state(&url, &token_url(&gateway)).await?;
    let mut config = (*state.config).clone();
    config.paytr.merchant_key = None;
    let state = AppState {
        config: Arc::new(config),
        ..state
    };

    let oid = format!("SPUNCONFIGURED{}", Uuid::new_v4().simple());
    let result = webhook_service::handle_callback(&state, signed_callback(&oid, "success")).await;
    assert!(matches!(result, Err(AppError::Config(_))));

    let log = PaymentWebhookLogs::find()
        .filter(WebhookLogCol::MerchantOid.eq(oid.clone()))
        .one(&state.orm)
        .await?
        .expect("attempt recorded");
    assert!(!log.processed);
    assert!(log.payment_id.is_none());
    assert_eq!(log.error_message.as_deref(), Some("Payment gateway is not configured"));
    assert_eq!(log.payload["merchant_oid"], oid.as_str());

    Ok(())
}
