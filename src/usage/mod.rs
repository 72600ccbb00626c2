//! Token and cost accounting for tool invocations.
//!
//! Actual usage is taken from the tool's JSON output when present; otherwise
//! tokens are estimated from the prompt and the generated text.

pub mod cost;
pub mod estimator;
pub mod parser;

pub use cost::TokenCost;
pub use estimator::{EstimationMethod, TokenCount, TokenEstimator};
pub use parser::{parse_usage, parse_usage_value, ParsedTokenUsage, UsageSource};
