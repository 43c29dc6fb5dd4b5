use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{Cart, CartItem};

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AddCartItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
    /// Free-form line options (gift note, size, ...), copied into the order snapshot.
    #[schema(value_type = Option<Object>)]
    pub attributes: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateCartItemRequest {
    #[validate(range(min = 1, max = 99))]
    pub quantity: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CartWithItems {
    pub cart: Cart,
    pub items: Vec<CartItem>,
    pub subtotal: Decimal,
}
