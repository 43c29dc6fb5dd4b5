use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    domain::{billing::BillingInfo, order_status::OrderStatus},
    models::{Order, OrderItem, OrderStatusEntry},
};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct CustomerInfo {
    #[validate(length(min = 2, max = 120))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 10, max = 20))]
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 2, max = 120))]
    pub recipient_name: String,
    #[validate(length(min = 1, max = 80))]
    pub city: String,
    #[validate(length(min = 1, max = 80))]
    pub district: String,
    #[validate(length(min = 5, max = 500))]
    pub address_line: String,
    #[validate(length(max = 10))]
    pub postal_code: Option<String>,
    #[validate(length(max = 500))]
    pub directions: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateOrderRequest {
    pub cart_id: Uuid,
    #[validate(nested)]
    pub customer: CustomerInfo,
    pub billing: BillingInfo,
    #[validate(nested)]
    pub shipping_address: ShippingAddress,
    pub delivery_date: Option<NaiveDate>,
    #[validate(length(max = 40))]
    pub delivery_slot: Option<String>,
    #[validate(length(max = 40))]
    pub payment_method: Option<String>,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateOrderStatusRequest {
    /// Target status; `shipped` is accepted for `on_delivery`.
    pub status: OrderStatus,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub history: Vec<OrderStatusEntry>,
}
