mod common;

use order_payments_api::{
    domain::order_status::{OrderStatus, is_valid_walk},
    dto::orders::UpdateOrderStatusRequest,
    entity::carts::{CartStatus, Entity as Carts},
    error::AppError,
    middleware::auth::AuthUser,
    services::{cart_service, order_service},
};
use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

fn admin() -> AuthUser {
    AuthUser {
        user_id: Uuid::new_v4(),
        role: "admin".into(),
    }
}

#[tokio::test]
async fn cart_converts_into_priced_order() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;

    let product = common::create_product(&state, dec!(100.00), 10).await?;
    let cart_id = common::guest_cart_with(&state, &product, 3).await?;

    let created = order_service::create_order(&state, None, common::order_request(cart_id)).await?;
    let created = created.data.expect("order payload");
    let order = created.order;

    assert_eq!(order.subtotal, dec!(300.00));
    assert_eq!(order.tax_total, dec!(54.00));
    assert_eq!(order.shipping_total, dec!(25.00));
    assert_eq!(order.grand_total, dec!(379.00));
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.customer_phone, "5321234567");
    assert_eq!(order.customer_email, "ayse@example.com");
    assert!(order.order_number.starts_with("ORD-"));

    assert_eq!(created.items.len(), 1);
    assert_eq!(created.items[0].product_name, product.name);
    assert_eq!(created.items[0].line_total, dec!(300.00));

    let cart = Carts::find_by_id(cart_id).one(&state.orm).await?.expect("cart row");
    assert_eq!(cart.status, CartStatus::Converted);

    let detail = order_service::get_order(&state, None, order.id).await?;
    let history = detail.data.expect("detail").history;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_status, None);
    assert_eq!(history[0].to_status, OrderStatus::Pending);

    // Converted carts cannot be converted again.
    let again = order_service::create_order(&state, None, common::order_request(cart_id)).await;
    assert!(matches!(again, Err(AppError::CartNotFound)));

    Ok(())
}

#[tokio::test]
async fn concurrent_conversions_produce_one_order() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;

    let product = common::create_product(&state, dec!(40.00), 10).await?;
    let cart_id = common::guest_cart_with(&state, &product, 2).await?;

    let (first, second) = tokio::join!(
        order_service::create_order(&state, None, common::order_request(cart_id)),
        order_service::create_order(&state, None, common::order_request(cart_id)),
    );

    let successes = [first.is_ok(), second.is_ok()].into_iter().filter(|ok| *ok).count();
    assert_eq!(successes, 1);
    let failure = if first.is_err() { first } else { second };
    assert!(matches!(failure, Err(AppError::CartNotFound)));

    Ok(())
}

#[tokio::test]
async fn unavailable_products_block_conversion() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;

    let product = common::create_product(&state, dec!(15.00), 1).await?;
    let cart_id = common::guest_cart_with(&state, &product, 2).await?;

    let result = order_service::create_order(&state, None, common::order_request(cart_id)).await;
    match result {
        Err(AppError::ProductsUnavailable(ids)) => assert_eq!(ids, vec![product.id]),
        other => panic!("expected PRODUCTS_UNAVAILABLE, got {other:?}"),
    }

    let cart = Carts::find_by_id(cart_id).one(&state.orm).await?.expect("cart row");
    assert_eq!(cart.status, CartStatus::Active);

    Ok(())
}

#[tokio::test]
async fn empty_cart_is_rejected() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;

    let cart = cart_service::create_cart(&state, None).await?;
    let cart_id = cart.data.expect("cart").cart.id;

    let result = order_service::create_order(&state, None, common::order_request(cart_id)).await;
    assert!(matches!(result, Err(AppError::EmptyCart)));

    Ok(())
}

#[tokio::test]
async fn admin_walks_order_and_history_follows_graph() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;
    let admin = admin();

    let product = common::create_product(&state, dec!(600.00), 5).await?;
    let cart_id = common::guest_cart_with(&state, &product, 1).await?;
    let order = order_service::create_order(&state, None, common::order_request(cart_id))
        .await?
        .data
        .expect("order")
        .order;
    assert_eq!(order.shipping_total, dec!(0));

    for status in [
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OnDelivery,
        OrderStatus::Delivered,
    ] {
        order_service::update_status(
            &state,
            &admin,
            order.id,
            UpdateOrderStatusRequest { status, note: None },
        )
        .await?;
    }

    // Delivered is terminal.
    let rejected = order_service::update_status(
        &state,
        &admin,
        order.id,
        UpdateOrderStatusRequest {
            status: OrderStatus::Cancelled,
            note: Some("too late".into()),
        },
    )
    .await;
    assert!(matches!(rejected, Err(AppError::InvalidTransition(_))));

    let detail = order_service::get_order(&state, None, order.id).await?.data.expect("detail");
    assert_eq!(detail.order.status, OrderStatus::Delivered);
    let walk: Vec<OrderStatus> = detail.history.iter().map(|entry| entry.to_status).collect();
    assert_eq!(walk.len(), 6);
    assert!(is_valid_walk(&walk));
    assert_eq!(detail.history[1].note, "Status changed to confirmed");
    assert_eq!(detail.history[1].created_by, Some(admin.user_id));

    Ok(())
}

#[tokio::test]
async fn customers_cannot_change_status() -> anyhow::Result<()> {
    let Some(url) = common::database_url() else {
        return Ok(());
    };
    let state = common::setup_state(&url, "http://127.0.0.1:9/unused").await?;

    let customer = AuthUser {
        user_id: Uuid::new_v4(),
        role: "user".into(),
    };
    let result = order_service::update_status(
        &state,
        &customer,
        Uuid::new_v4(),
        UpdateOrderStatusRequest {
            status: OrderStatus::Confirmed,
            note: None,
        },
    )
    .await;
    assert!(matches!(result, Err(AppError::Forbidden)));

    Ok(())
}
