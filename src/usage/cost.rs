//! Per-model token pricing.

use serde::{Deserialize, Serialize};

/// Token pricing for one model family, in cents per 1K tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenCost {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
    pub model_name: String,
}

impl Default for TokenCost {
    fn default() -> Self {
        Self::sonnet()
    }
}

impl TokenCost {
    pub fn sonnet() -> Self {
        Self {
            input_cost_per_1k: 0.3,
            output_cost_per_1k: 1.5,
            model_name: "claude-sonnet".to_string(),
        }
    }

    pub fn haiku() -> Self {
        Self {
            input_cost_per_1k: 0.025,
            output_cost_per_1k: 0.125,
            model_name: "claude-haiku".to_string(),
        }
    }

    pub fn opus() -> Self {
        Self {
            input_cost_per_1k: 1.5,
            output_cost_per_1k: 7.5,
            model_name: "claude-opus".to_string(),
        }
    }

    /// Pricing for a model id or alias. Unknown models price as sonnet.
    pub fn for_model(model: &str) -> Self {
        let model = model.to_ascii_lowercase();
        if model.contains("opus") {
            Self::opus()
        } else if model.contains("haiku") {
            Self::haiku()
        } else {
            Self::sonnet()
        }
    }

    /// Cost in cents.
    pub fn calculate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let input_cost = (input_tokens as f64 / 1000.0) * self.input_cost_per_1k;
        let output_cost = (output_tokens as f64 / 1000.0) * self.output_cost_per_1k;
        input_cost + output_cost
    }

    /// Cost in US dollars.
    pub fn calculate_cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        self.calculate_cost(input_tokens, output_tokens) / 100.0
    }
}
