use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{domain::order_status::OrderStatus, models::Payment};

#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct InitPaymentRequest {
    pub order_id: Uuid,
    /// Payer details default to the customer fields stored on the order.
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 2, max = 60))]
    pub user_name: Option<String>,
    #[validate(length(min = 5, max = 400))]
    pub user_address: Option<String>,
    #[validate(length(min = 10, max = 20))]
    pub user_phone: Option<String>,
    #[validate(range(min = 1, max = 12))]
    pub max_installment: Option<i32>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InitPaymentResponse {
    pub payment_id: Uuid,
    pub merchant_order_id: String,
    pub gateway_token: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RetryPaymentResponse {
    pub payment: Payment,
    pub retries_used: u64,
    pub retries_left: u64,
    pub order_status: OrderStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WebhookAck {
    pub merchant_oid: String,
    /// True when the callback was already applied and nothing changed.
    pub duplicate: bool,
}
