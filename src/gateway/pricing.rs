//! Model pricing registry for narrative and verification models.
//!
//! Costs are in nanodollars (1e-9 USD) per token.

use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy)]
pub struct ModelPricing {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

impl ModelPricing {
    const fn new(input: i64, output: i64) -> Self {
        Self {
            input_nanos_per_token: input,
            output_nanos_per_token: output,
        }
    }

    pub fn calculate_cost(&self, input_tokens: u32, output_tokens: u32) -> i64 {
        (input_tokens as i64) * self.input_nanos_per_token
            + (output_tokens as i64) * self.output_nanos_per_token
    }
}

// GPT-5-mini: $0.25/1M input, $2.00/1M output
const GPT_5_MINI: ModelPricing = ModelPricing::new(250, 2_000);
// GPT-4o-mini: $0.15/1M input, $0.60/1M output
const GPT_4O_MINI: ModelPricing = ModelPricing::new(150, 600);
// Claude Sonnet 4.5: $3.00/1M input, $15.00/1M output
const CLAUDE_SONNET_4_5: ModelPricing = ModelPricing::new(3_000, 15_000);
// Claude Haiku 4.5: $1.00/1M input, $5.00/1M output
const CLAUDE_HAIKU_4_5: ModelPricing = ModelPricing::new(1_000, 5_000);

const UNKNOWN_MODEL: ModelPricing = ModelPricing::new(1_000, 5_000);

static PRICING_MAP: OnceLock<HashMap<&'static str, ModelPricing>> = OnceLock::new();

fn init_pricing() -> HashMap<&'static str, ModelPricing> {
    let mut map = HashMap::new();
    map.insert("openai/gpt-5-mini", GPT_5_MINI);
    map.insert("openai/gpt-4o-mini", GPT_4O_MINI);
    map.insert("anthropic/claude-sonnet-4.5", CLAUDE_SONNET_4_5);
    map.insert("anthropic/claude-haiku-4.5", CLAUDE_HAIKU_4_5);
    map
}

pub fn get_pricing(model_id: &str) -> Option<ModelPricing> {
    PRICING_MAP.get_or_init(init_pricing).get(model_id).copied()
}

/// Calculate chat cost, defaulting to a mid-range price for unknown models.
pub fn chat_cost(model: &str, input_tokens: u32, output_tokens: u32) -> i64 {
    get_pricing(model)
        .unwrap_or(UNKNOWN_MODEL)
        .calculate_cost(input_tokens, output_tokens)
}
