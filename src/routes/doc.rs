use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    domain::{
        billing::{BillingInfo, BillingType},
        order_status::OrderStatus,
    },
    dto::{
        cart::{AddCartItemRequest, CartWithItems, UpdateCartItemRequest},
        orders::{
            CreateOrderRequest, CustomerInfo, OrderDetail, OrderWithItems, ShippingAddress,
            UpdateOrderStatusRequest,
        },
        payments::{InitPaymentRequest, InitPaymentResponse, RetryPaymentResponse, WebhookAck},
    },
    entity::carts::CartStatus,
    gateway::paytr::RawCallback,
    models::{Cart, CartItem, Order, OrderItem, OrderStatusEntry, Payment},
    response::{ApiResponse, ErrorBody, Meta},
    routes::{cart, health, metrics, orders, params, payments},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        metrics::metrics_snapshot,
        cart::create_cart,
        cart::get_cart,
        cart::add_item,
        cart::update_item,
        cart::remove_item,
        orders::create_order,
        orders::list_orders,
        orders::get_order,
        orders::update_order_status,
        payments::init_payment,
        payments::payment_webhook,
        payments::retry_payment,
        payments::get_payment
    ),
    components(
        schemas(
            Cart,
            CartItem,
            CartStatus,
            Order,
            OrderItem,
            OrderStatus,
            OrderStatusEntry,
            Payment,
            BillingInfo,
            BillingType,
            CustomerInfo,
            ShippingAddress,
            CreateOrderRequest,
            UpdateOrderStatusRequest,
            OrderWithItems,
            OrderDetail,
            AddCartItemRequest,
            UpdateCartItemRequest,
            CartWithItems,
            InitPaymentRequest,
            InitPaymentResponse,
            RetryPaymentResponse,
            WebhookAck,
            RawCallback,
            params::Pagination,
            params::OrderListQuery,
            Meta,
            ErrorBody,
            ApiResponse<OrderWithItems>,
            ApiResponse<OrderDetail>,
            ApiResponse<CartWithItems>,
            ApiResponse<InitPaymentResponse>,
            ApiResponse<RetryPaymentResponse>,
            ApiResponse<WebhookAck>,
            metrics::MetricsSnapshot,
            ApiResponse<metrics::MetricsSnapshot>
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Liveness and counters"),
        (name = "Cart", description = "Cart maintenance"),
        (name = "Orders", description = "Cart conversion and order lifecycle"),
        (name = "Payments", description = "Gateway initiation, callbacks and retries"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
