//! Outbound and inbound plumbing for the PayTR payment gateway.

pub mod client;
pub mod paytr;
