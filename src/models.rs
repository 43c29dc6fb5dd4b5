use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    domain::{order_status::OrderStatus, payment_status::PaymentStatus},
    entity::{
        cart_items::Model as CartItemModel,
        carts::{CartStatus, Model as CartModel},
        order_items::Model as OrderItemModel,
        order_status_history::Model as HistoryModel,
        orders::Model as OrderModel,
        payments::Model as PaymentModel,
    },
};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Cart {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_cart_id: Option<String>,
    pub status: CartStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub cart_id: Uuid,
    pub user_id: Option<Uuid>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: String,
    pub billing_type: String,
    pub tax_id: String,
    pub tax_office: Option<String>,
    pub company_name: Option<String>,
    #[schema(value_type = Object)]
    pub shipping_address: serde_json::Value,
    pub delivery_date: Option<NaiveDate>,
    pub delivery_slot: Option<String>,
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub grand_total: Decimal,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_method: Option<String>,
    pub payment_status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderStatusEntry {
    pub id: Uuid,
    pub from_status: Option<OrderStatus>,
    pub to_status: OrderStatus,
    pub note: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub merchant_oid: String,
    pub gateway_token: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub installment_count: i32,
    #[schema(value_type = String)]
    pub status: PaymentStatus,
    #[schema(value_type = Option<Object>)]
    pub gateway_metadata: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub attempt: i32,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn cart_from_entity(model: CartModel) -> Cart {
    Cart {
        id: model.id,
        user_id: model.user_id,
        guest_cart_id: model.guest_cart_id,
        status: model.status,
        expires_at: model.expires_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn cart_item_from_entity(model: CartItemModel) -> CartItem {
    CartItem {
        id: model.id,
        cart_id: model.cart_id,
        product_id: model.product_id,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.line_total,
        attributes: model.attributes,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub fn order_from_entity(model: OrderModel) -> Order {
    Order {
        id: model.id,
        order_number: model.order_number,
        cart_id: model.cart_id,
        user_id: model.user_id,
        customer_name: model.customer_name,
        customer_email: model.customer_email,
        customer_phone: model.customer_phone,
        billing_type: model.billing_type,
        tax_id: model.tax_id,
        tax_office: model.tax_office,
        company_name: model.company_name,
        shipping_address: model.shipping_address,
        delivery_date: model.delivery_date,
        delivery_slot: model.delivery_slot,
        subtotal: model.subtotal,
        tax_total: model.tax_total,
        shipping_total: model.shipping_total,
        grand_total: model.grand_total,
        currency: model.currency,
        status: model.status,
        payment_method: model.payment_method,
        payment_status: model.payment_status,
        notes: model.notes,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

pub fn order_item_from_entity(model: OrderItemModel) -> OrderItem {
    OrderItem {
        id: model.id,
        order_id: model.order_id,
        product_id: model.product_id,
        product_name: model.product_name,
        quantity: model.quantity,
        unit_price: model.unit_price,
        line_total: model.line_total,
        attributes: model.attributes,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub fn history_from_entity(model: HistoryModel) -> OrderStatusEntry {
    OrderStatusEntry {
        id: model.id,
        from_status: model.from_status,
        to_status: model.to_status,
        note: model.note,
        created_by: model.created_by,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

pub fn payment_from_entity(model: PaymentModel) -> Payment {
    Payment {
        id: model.id,
        order_id: model.order_id,
        merchant_oid: model.merchant_oid,
        gateway_token: model.gateway_token,
        amount: model.amount,
        currency: model.currency,
        installment_count: model.installment_count,
        status: PaymentStatus::parse(&model.status),
        gateway_metadata: model.gateway_metadata,
        error_message: model.error_message,
        attempt: model.attempt,
        expires_at: model.expires_at.with_timezone(&Utc),
        completed_at: model.completed_at.map(|dt| dt.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}
