use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Internal payment status. Unknown gateway vocabulary is kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartialRefunded,
    Other(String),
}

impl PaymentStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartialRefunded => "partial_refunded",
            PaymentStatus::Other(raw) => raw,
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "pending" => PaymentStatus::Pending,
            "paid" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            "partial_refunded" => PaymentStatus::PartialRefunded,
            other => PaymentStatus::Other(other.to_string()),
        }
    }

    /// Terminal statuses stamp `completed_at` the first time they are reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Paid
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::PartialRefunded
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for PaymentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PaymentStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(PaymentStatus::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_round_trip_through_text() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Paid,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
            PaymentStatus::PartialRefunded,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), status);
        }
        assert_eq!(
            PaymentStatus::parse("chargeback"),
            PaymentStatus::Other("chargeback".into())
        );
    }

    #[test]
    fn pending_and_unknown_are_not_terminal() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Other("waiting".into()).is_terminal());
        assert!(PaymentStatus::PartialRefunded.is_terminal());
    }
}
