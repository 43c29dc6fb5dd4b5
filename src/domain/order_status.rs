//! The order status graph.
//!
//! Every write to `orders.status` goes through [`OrderStatus::transition`]; the
//! transactional side (order row + history row) lives in
//! `services::order_service::apply_transition`.

use std::{fmt, str::FromStr};

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "confirmed")]
    Confirmed,
    #[sea_orm(string_value = "preparing")]
    Preparing,
    #[sea_orm(string_value = "ready")]
    Ready,
    /// Storefront code calls this state `shipped`; both names map here.
    #[sea_orm(string_value = "on_delivery")]
    #[serde(alias = "shipped")]
    OnDelivery,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
    #[sea_orm(string_value = "failed")]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Cannot transition order from {from} to {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::OnDelivery,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
    ];

    /// Outgoing edges of the status graph.
    pub fn allowed_targets(self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Pending => &[Confirmed, Cancelled, Failed],
            Confirmed => &[Preparing, Cancelled, Failed],
            Preparing => &[Ready, Cancelled],
            Ready => &[OnDelivery, Cancelled],
            OnDelivery => &[Delivered, Cancelled, Failed],
            Delivered | Cancelled => &[],
            Failed => &[Pending],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    pub fn transition(self, target: OrderStatus) -> Result<OrderStatus, InvalidTransition> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::OnDelivery => "on_delivery",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "shipped" => Ok(OrderStatus::OnDelivery),
            other => OrderStatus::ALL
                .into_iter()
                .find(|status| status.as_str() == other)
                .ok_or_else(|| format!("Unknown order status: {other}")),
        }
    }
}

/// Checks that a recorded sequence of statuses only uses edges of the graph.
pub fn is_valid_walk(statuses: &[OrderStatus]) -> bool {
    statuses
        .windows(2)
        .all(|pair| pair[0].can_transition_to(pair[1]))
}
