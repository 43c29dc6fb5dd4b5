//! Pure business rules, free of I/O.

pub mod billing;
pub mod order_number;
pub mod order_status;
pub mod payment_status;
pub mod pricing;
pub mod reconciliation;
