//! PayTR request signing, callback verification and status vocabulary.
//!
//! Both signatures are `base64(HMAC-SHA256(merchant_key, concat(fields)))`
//! with the fields joined without separators in a fixed order. The gateway
//! rejects anything that is not reproduced bit for bit.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::payment_status::PaymentStatus;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct MerchantCredentials {
    pub merchant_id: String,
    pub merchant_key: Secret<String>,
    pub merchant_salt: Secret<String>,
}

/// Everything about the order and payer that goes into the initiation request.
#[derive(Debug, Clone)]
pub struct InitContext {
    pub merchant_oid: String,
    /// Amount in minor units.
    pub payment_amount: String,
    pub email: String,
    pub user_name: String,
    pub user_address: String,
    pub user_phone: String,
    pub ok_url: String,
    pub fail_url: String,
    pub user_ip: String,
    pub currency: String,
    pub test_mode: bool,
    pub timeout_minutes: i64,
    pub basket: Vec<BasketLine>,
    pub max_installment: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasketLine {
    pub name: String,
    pub unit_price: String,
    pub quantity: i32,
}

/// Form body posted to the token endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InitRequestPayload {
    pub merchant_id: String,
    pub user_ip: String,
    pub merchant_oid: String,
    pub email: String,
    pub payment_amount: String,
    pub paytr_token: String,
    pub user_basket: String,
    pub debug_on: u8,
    pub no_installment: u8,
    pub max_installment: i32,
    pub user_name: String,
    pub user_address: String,
    pub user_phone: String,
    pub merchant_ok_url: String,
    pub merchant_fail_url: String,
    pub timeout_limit: i64,
    pub currency: String,
    pub test_mode: u8,
}

#[derive(Debug, Clone)]
pub struct SignedInitRequest {
    pub merchant_oid: String,
    pub signature: String,
    pub payload: InitRequestPayload,
}

#[derive(Debug, thiserror::Error)]
#[error("invalid merchant key")]
pub struct SigningError;

pub fn sign(key: &Secret<String>, parts: &[&str]) -> Result<String, SigningError> {
    let mut mac =
        HmacSha256::new_from_slice(key.expose_secret().as_bytes()).map_err(|_| SigningError)?;
    for part in parts {
        mac.update(part.as_bytes());
    }
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

pub fn build_signed_init_request(
    credentials: &MerchantCredentials,
    ctx: &InitContext,
) -> Result<SignedInitRequest, SigningError> {
    let signature = sign(
        &credentials.merchant_key,
        &[
            credentials.merchant_id.as_str(),
            ctx.merchant_oid.as_str(),
            ctx.payment_amount.as_str(),
            ctx.email.as_str(),
            ctx.user_name.as_str(),
            ctx.user_address.as_str(),
            ctx.user_phone.as_str(),
            ctx.ok_url.as_str(),
            ctx.fail_url.as_str(),
            ctx.user_ip.as_str(),
            credentials.merchant_salt.expose_secret().as_str(),
        ],
    )?;

    let basket: Vec<(&str, &str, i32)> = ctx
        .basket
        .iter()
        .map(|line| (line.name.as_str(), line.unit_price.as_str(), line.quantity))
        .collect();
    let user_basket = BASE64.encode(serde_json::to_vec(&basket).unwrap_or_default());

    let payload = InitRequestPayload {
        merchant_id: credentials.merchant_id.clone(),
        user_ip: ctx.user_ip.clone(),
        merchant_oid: ctx.merchant_oid.clone(),
        email: ctx.email.clone(),
        payment_amount: ctx.payment_amount.clone(),
        paytr_token: signature.clone(),
        user_basket,
        debug_on: 0,
        no_installment: u8::from(ctx.max_installment <= 1),
        max_installment: ctx.max_installment,
        user_name: ctx.user_name.clone(),
        user_address: ctx.user_address.clone(),
        user_phone: ctx.user_phone.clone(),
        merchant_ok_url: ctx.ok_url.clone(),
        merchant_fail_url: ctx.fail_url.clone(),
        timeout_limit: ctx.timeout_minutes,
        currency: ctx.currency.clone(),
        test_mode: u8::from(ctx.test_mode),
    };

    Ok(SignedInitRequest {
        merchant_oid: ctx.merchant_oid.clone(),
        signature,
        payload,
    })
}

/// Correlation key sent to the gateway. PayTR only accepts alphanumerics, so
/// the order number loses its dashes and gains a random suffix that keeps
/// repeated initiations for one order distinct.
pub fn build_merchant_oid(order_number: &str) -> String {
    let digits: String = order_number.chars().filter(char::is_ascii_alphanumeric).collect();
    let suffix = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("SP{}{}", digits.trim_start_matches("ORD"), &suffix[..8])
}

/// Callback body as posted by the gateway. Every field is optional here so a
/// malformed delivery becomes a `VALIDATION_ERROR` instead of a bare 422.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct RawCallback {
    pub merchant_oid: Option<String>,
    pub status: Option<String>,
    pub total_amount: Option<String>,
    pub hash: Option<String>,
    pub payment_type: Option<String>,
    pub installment_count: Option<String>,
    pub currency: Option<String>,
    pub payment_amount: Option<String>,
    pub merchant_commission_fee: Option<String>,
    pub merchant_service_fee: Option<String>,
    pub paid_price: Option<String>,
    pub card_brand: Option<String>,
    pub failed_reason_code: Option<String>,
    pub failed_reason_msg: Option<String>,
    pub test_mode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallbackPayload {
    pub merchant_oid: String,
    pub status: String,
    pub total_amount: String,
    pub payment_type: String,
    pub installment_count: String,
    pub currency: String,
    pub payment_amount: String,
    pub merchant_commission_fee: String,
    pub merchant_service_fee: String,
    pub paid_price: String,
    pub card_brand: Option<String>,
    pub failed_reason_code: Option<String>,
    pub failed_reason_msg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Missing required callback fields: {}", .0.join(", "))]
pub struct MissingFields(pub Vec<&'static str>);

impl RawCallback {
    /// Splits a delivery into the signed payload and the presented signature.
    pub fn into_parts(self) -> Result<(CallbackPayload, String), MissingFields> {
        fn present(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|v| !v.trim().is_empty())
        }

        let mut missing = Vec::new();
        if !present(&self.merchant_oid) {
            missing.push("merchant_oid");
        }
        if !present(&self.status) {
            missing.push("status");
        }
        if !present(&self.hash) {
            missing.push("hash");
        }
        if !missing.is_empty() {
            return Err(MissingFields(missing));
        }

        let payload = CallbackPayload {
            merchant_oid: self.merchant_oid.unwrap_or_default(),
            status: self.status.unwrap_or_default(),
            total_amount: self.total_amount.unwrap_or_default(),
            payment_type: self.payment_type.unwrap_or_default(),
            installment_count: self.installment_count.unwrap_or_default(),
            currency: self.currency.unwrap_or_default(),
            payment_amount: self.payment_amount.unwrap_or_default(),
            merchant_commission_fee: self.merchant_commission_fee.unwrap_or_default(),
            merchant_service_fee: self.merchant_service_fee.unwrap_or_default(),
            paid_price: self.paid_price.unwrap_or_default(),
            card_brand: self.card_brand,
            failed_reason_code: self.failed_reason_code,
            failed_reason_msg: self.failed_reason_msg,
        };
        Ok((payload, self.hash.unwrap_or_default()))
    }
}

pub fn callback_signature(
    payload: &CallbackPayload,
    credentials: &MerchantCredentials,
) -> Result<String, SigningError> {
    sign(
        &credentials.merchant_key,
        &[
            payload.merchant_oid.as_str(),
            payload.status.as_str(),
            payload.total_amount.as_str(),
            payload.payment_type.as_str(),
            payload.installment_count.as_str(),
            payload.currency.as_str(),
            payload.payment_amount.as_str(),
            payload.merchant_commission_fee.as_str(),
            payload.merchant_service_fee.as_str(),
            payload.paid_price.as_str(),
            credentials.merchant_salt.expose_secret().as_str(),
        ],
    )
}

/// Constant-time check of the presented callback signature.
pub fn verify_callback(
    payload: &CallbackPayload,
    presented: &str,
    credentials: &MerchantCredentials,
) -> bool {
    let Ok(expected) = callback_signature(payload, credentials) else {
        return false;
    };
    let expected = expected.as_bytes();
    let presented = presented.trim().as_bytes();
    if expected.len() != presented.len() {
        return false;
    }
    expected.ct_eq(presented).into()
}

/// Gateway status vocabulary to internal payment status. Unknown values pass
/// through unchanged.
pub fn map_gateway_status(status: &str) -> PaymentStatus {
    match status {
        "success" => PaymentStatus::Paid,
        "failed" => PaymentStatus::Failed,
        "refund" => PaymentStatus::Refunded,
        "partial_refund" => PaymentStatus::PartialRefunded,
        other => PaymentStatus::parse(other),
    }
}
