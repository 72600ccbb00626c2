//! Token usage parsing from tool output.
//!
//! Different CLIs report usage differently:
//!
//! - **Claude CLI**: `{"usage": {"input_tokens": N, "output_tokens": N}}`
//! - **OpenAI/Codex**: `{"usage": {"prompt_tokens": N, "completion_tokens": N}}`
//!
//! Claude additionally reports cache reads/writes, which count as input.

use serde::Deserialize;
use serde_json::Value;

use super::estimator::TokenCount;

/// Where a token count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageSource {
    Anthropic,
    OpenAi,
    Estimated,
}

/// Parsed token usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTokenUsage {
    pub tokens: TokenCount,
    pub source: UsageSource,
}

impl ParsedTokenUsage {
    pub fn actual(input: u64, output: u64, source: UsageSource) -> Self {
        Self {
            tokens: TokenCount::new(input, output),
            source,
        }
    }

    pub fn estimated(tokens: TokenCount) -> Self {
        Self {
            tokens,
            source: UsageSource::Estimated,
        }
    }

    pub fn is_actual(&self) -> bool {
        self.source != UsageSource::Estimated
    }

    pub fn total(&self) -> u64 {
        self.tokens.total()
    }
}

#[derive(Debug, Deserialize)]
struct ClaudeUsage {
    input_tokens: u64,
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Parses a `usage` JSON value in any supported format.
pub fn parse_usage_value(value: &Value) -> Option<ParsedTokenUsage> {
    if let Ok(claude) = ClaudeUsage::deserialize(value) {
        let input = claude.input_tokens
            + claude.cache_creation_input_tokens
            + claude.cache_read_input_tokens;
        return Some(ParsedTokenUsage::actual(
            input,
            claude.output_tokens,
            UsageSource::Anthropic,
        ));
    }

    if let Ok(openai) = OpenAiUsage::deserialize(value) {
        return Some(ParsedTokenUsage::actual(
            openai.prompt_tokens,
            openai.completion_tokens,
            UsageSource::OpenAi,
        ));
    }

    None
}

/// Finds the `usage` field of a response object and parses it.
pub fn parse_usage(response: &Value) -> Option<ParsedTokenUsage> {
    response.get("usage").and_then(parse_usage_value)
}
