#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use order_payments_api::{
    config::{AppConfig, PaytrConfig},
    db::{create_orm_conn, create_pool, run_migrations},
    domain::{
        billing::{BillingInfo, BillingType},
        pricing::PricingPolicy,
    },
    dto::{
        cart::AddCartItemRequest,
        orders::{CreateOrderRequest, CustomerInfo, ShippingAddress},
    },
    entity::products::{ActiveModel as ProductActive, Model as ProductModel},
    gateway::client::PaytrClient,
    metrics::MetricsCollector,
    rate_limit::RateLimiter,
    services::cart_service,
    state::AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use secrecy::Secret;
use tokio::sync::OnceCell;
use uuid::Uuid;

static MIGRATED: OnceCell<()> = OnceCell::const_new();

pub const MERCHANT_KEY: &str = "test-merchant-key";
pub const MERCHANT_SALT: &str = "test-merchant-salt";

/// Integration tests run only against a dedicated database.
pub fn database_url() -> Option<String> {
    match std::env::var("TEST_DATABASE_URL") {
        Ok(url) => Some(url),
        Err(_) => {
            eprintln!("Skipping test: set TEST_DATABASE_URL to run database-backed tests.");
            None
        }
    }
}

pub fn test_config(database_url: &str, paytr_api_url: &str) -> AppConfig {
    AppConfig {
        database_url: database_url.to_string(),
        host: "127.0.0.1".into(),
        port: 0,
        redis_url: None,
        rate_limit_timeout_ms: 50,
        trusted_proxies: Vec::new(),
        guest_cart_ttl_hours: 72,
        pricing: PricingPolicy::default(),
        paytr: PaytrConfig {
            merchant_id: Some("100001".into()),
            merchant_key: Some(Secret::new(MERCHANT_KEY.into())),
            merchant_salt: Some(Secret::new(MERCHANT_SALT.into())),
            api_url: paytr_api_url.to_string(),
            timeout_secs: 2,
            ..PaytrConfig::default()
        },
    }
}

pub async fn setup_state(database_url: &str, paytr_api_url: &str) -> anyhow::Result<AppState> {
    let orm = create_orm_conn(database_url).await?;
    // Test functions run in parallel; concurrent `CREATE ... IF NOT EXISTS` can still collide.
    MIGRATED
        .get_or_try_init(|| async { run_migrations(&orm).await })
        .await?;
    let pool = create_pool(database_url).await?;
    let config = test_config(database_url, paytr_api_url);
    let metrics = MetricsCollector::new();

    Ok(AppState {
        pool,
        orm,
        paytr: PaytrClient::new(paytr_api_url, Duration::from_secs(config.paytr.timeout_secs))?,
        config: Arc::new(config),
        limiter: RateLimiter::in_memory(metrics.clone()),
        metrics,
    })
}

pub async fn create_product(state: &AppState, price: Decimal, stock: i32) -> anyhow::Result<ProductModel> {
    let product = ProductActive {
        id: Set(Uuid::new_v4()),
        name: Set(format!("Test bouquet {}", Uuid::new_v4().simple())),
        description: Set(Some("Integration test product".into())),
        price: Set(price),
        stock: Set(stock),
        is_active: Set(true),
        created_at: Set(chrono::Utc::now().into()),
    }
    .insert(&state.orm)
    .await?;
    Ok(product)
}

/// A guest cart holding `quantity` of `product`.
pub async fn guest_cart_with(state: &AppState, product: &ProductModel, quantity: i32) -> anyhow::Result<Uuid> {
    let cart = cart_service::create_cart(state, None).await?;
    let cart_id = cart.data.map(|c| c.cart.id).ok_or_else(|| anyhow::anyhow!("no cart"))?;
    cart_service::add_item(
        state,
        None,
        cart_id,
        AddCartItemRequest {
            product_id: product.id,
            quantity,
            attributes: None,
        },
    )
    .await?;
    Ok(cart_id)
}

pub fn order_request(cart_id: Uuid) -> CreateOrderRequest {
    CreateOrderRequest {
        cart_id,
        customer: CustomerInfo {
            name: "Ayse Yilmaz".into(),
            email: "Ayse@Example.com".into(),
            phone: "0532 123 45 67".into(),
        },
        billing: BillingInfo {
            billing_type: BillingType::Individual,
            national_id: Some("10000000146".into()),
            tax_id: None,
            tax_office: None,
            company_name: None,
        },
        shipping_address: ShippingAddress {
            recipient_name: "Mehmet Yilmaz".into(),
            city: "Istanbul".into(),
            district: "Kadikoy".into(),
            address_line: "Moda Caddesi No 12 Daire 3".into(),
            postal_code: Some("34710".into()),
            directions: None,
        },
        delivery_date: None,
        delivery_slot: Some("10:00-14:00".into()),
        payment_method: Some("card".into()),
        notes: None,
    }
}
