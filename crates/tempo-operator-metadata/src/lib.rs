//! Resource and configuration types shared by the tempo operator.
//!
//! Everything here is plain data with serde support. Nothing in this crate talks to
//! a cluster.

pub mod config;
pub mod duration;
pub mod integrations;
pub mod quantity;
pub mod stack;

pub use duration::GoDuration;

/// API group of the resources owned by the operator
pub const GROUP: &str = "tempo.grafana.com";

/// Operator version compiled into the binary
pub const VERSION: &str = include_str!("../../../VERSION");

/// trimmed operator version
pub fn operator_version() -> &'static str {
    VERSION.trim()
}

pub(crate) fn is_false(b: &bool) -> bool {
    !b
}

pub(crate) fn is_zero_i32(value: &i32) -> bool {
    *value == 0
}
