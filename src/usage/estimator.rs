//! Token estimation for tool output that carries no usage data.
//!
//! Text output from the CLI has no token counts, so they are estimated from
//! character and word counts.

use serde::{Deserialize, Serialize};

/// Token estimation strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EstimationMethod {
    /// 3.5 characters per token
    CharacterBased,
    /// 1.3 tokens per word
    WordBased,
    /// Higher of the two, plus a safety margin
    #[default]
    Conservative,
}

/// Input/output token pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenCount {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenCount {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Token estimator for counting tokens from text.
#[derive(Debug, Clone)]
pub struct TokenEstimator {
    method: EstimationMethod,
    safety_margin: f64,
}

impl Default for TokenEstimator {
    fn default() -> Self {
        Self::new(EstimationMethod::Conservative)
    }
}

impl TokenEstimator {
    pub fn new(method: EstimationMethod) -> Self {
        let safety_margin = match method {
            EstimationMethod::CharacterBased | EstimationMethod::WordBased => 1.0,
            EstimationMethod::Conservative => 1.2,
        };
        Self {
            method,
            safety_margin,
        }
    }

    /// Estimate tokens from text.
    pub fn estimate(&self, text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        let base = match self.method {
            EstimationMethod::CharacterBased => by_chars(text),
            EstimationMethod::WordBased => by_words(text),
            EstimationMethod::Conservative => by_chars(text).max(by_words(text)),
        };
        (base as f64 * self.safety_margin).ceil() as u64
    }

    /// Estimate both sides of one prompt/response exchange.
    pub fn estimate_exchange(&self, prompt: &str, output: &str) -> TokenCount {
        TokenCount::new(self.estimate(prompt), self.estimate(output))
    }
}

fn by_chars(text: &str) -> u64 {
    (text.chars().count() as f64 / 3.5).ceil() as u64
}

fn by_words(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as u64
}
