//! What a verified gateway callback does to the order, decided without I/O.

use chrono::{DateTime, FixedOffset};

use super::{order_status::OrderStatus, payment_status::PaymentStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEffect {
    /// Walk the order to `to`, recording `note` in its history.
    Transition { to: OrderStatus, note: String },
    /// The payment implies a transition the order can no longer take.
    /// The payment update stands; operators reconcile the divergence.
    Diverged { wanted: OrderStatus, current: OrderStatus },
    None,
}

pub fn order_effect(
    payment: &PaymentStatus,
    current: OrderStatus,
    failure_reason: Option<&str>,
) -> OrderEffect {
    let (wanted, note) = match payment {
        PaymentStatus::Paid => (OrderStatus::Confirmed, "Payment received".to_string()),
        PaymentStatus::Failed => {
            let reason = failure_reason
                .map(str::trim)
                .filter(|reason| !reason.is_empty())
                .unwrap_or("no reason given");
            (OrderStatus::Cancelled, format!("Payment failed: {reason}"))
        }
        _ => return OrderEffect::None,
    };

    if current == wanted {
        OrderEffect::None
    } else if current.can_transition_to(wanted) {
        OrderEffect::Transition { to: wanted, note }
    } else {
        OrderEffect::Diverged { wanted, current }
    }
}

/// `completed_at` is written once, on the first move into a terminal status.
pub fn completion_stamp(
    existing: Option<DateTime<FixedOffset>>,
    next: &PaymentStatus,
    now: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    match existing {
        Some(stamp) => Some(stamp),
        None if next.is_terminal() => Some(now),
        None => None,
    }
}
