use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::Serialize;
use utoipa::ToSchema;

/// Tax and delivery rules applied when a cart is frozen into an order.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub delivery_fee: Decimal,
    pub free_delivery_threshold: Decimal,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.18),
            delivery_fee: dec!(25),
            free_delivery_threshold: dec!(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax_total: Decimal,
    pub shipping_total: Decimal,
    pub grand_total: Decimal,
}

impl PricingPolicy {
    /// Prices a set of line totals.
    ///
    /// `zone_fee` overrides the flat delivery fee when a zone-based quote is
    /// available; the free-delivery threshold still applies on top of it.
    pub fn quote<I>(&self, line_totals: I, zone_fee: Option<Decimal>) -> OrderTotals
    where
        I: IntoIterator<Item = Decimal>,
    {
        let subtotal = round_money(line_totals.into_iter().sum());
        let tax_total = round_money(subtotal * self.tax_rate);
        let shipping_total = if subtotal >= self.free_delivery_threshold {
            Decimal::ZERO
        } else {
            round_money(zone_fee.unwrap_or(self.delivery_fee))
        };

        OrderTotals {
            subtotal,
            tax_total,
            shipping_total,
            grand_total: subtotal + tax_total + shipping_total,
        }
    }
}

pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount in minor units (kuruş) as the gateway expects it, e.g. `379.00` -> `"37900"`.
pub fn to_minor_units(amount: Decimal) -> String {
    (round_money(amount) * dec!(100)).trunc().to_string()
}
