pub mod handler;
pub mod model;

pub use handler::{reset_usage, rule_usage, validate_rule};
