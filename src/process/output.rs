//! Parsing of the tool's stdout into generated content plus accounting.

use serde::Serialize;
use serde_json::Value;

use crate::config::OutputFormat;
use crate::error::TaskError;
use crate::usage::{parse_usage, ParsedTokenUsage, TokenCost, TokenEstimator};

use super::classifier::{classify, Verdict};

/// Generated content of one successful invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOutput {
    pub content: String,
    pub tokens_used: u64,
    /// Cost in US dollars.
    pub cost: f64,
    pub tokens_estimated: bool,
    pub session_id: Option<String>,
    /// Placeholder content synthesized without running the tool.
    pub degraded: bool,
}

/// Parses stdout according to the requested output format.
///
/// `prompt` and `model` are used for token and cost estimation when the
/// output carries no usage data.
pub fn parse_output(
    format: OutputFormat,
    stdout: &str,
    prompt: &str,
    model: &str,
) -> Result<RawOutput, TaskError> {
    match format {
        OutputFormat::Json => parse_json(stdout, prompt, model),
        OutputFormat::Text => Ok(parse_text(stdout, prompt, model)),
    }
}

fn parse_text(stdout: &str, prompt: &str, model: &str) -> RawOutput {
    let content = stdout.trim().to_string();
    let usage = ParsedTokenUsage::estimated(TokenEstimator::default().estimate_exchange(prompt, &content));
    let cost = TokenCost::for_model(model).calculate_cost_usd(usage.tokens.input_tokens, usage.tokens.output_tokens);
    RawOutput {
        content,
        tokens_used: usage.total(),
        cost,
        tokens_estimated: true,
        session_id: None,
        degraded: false,
    }
}

fn parse_json(stdout: &str, prompt: &str, model: &str) -> Result<RawOutput, TaskError> {
    let response = find_response(stdout).ok_or_else(|| {
        TaskError::ResponseParse(format!(
            "no JSON object with a 'result' field in output ({} bytes)",
            stdout.len()
        ))
    })?;

    let content = match response.get("result") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => {
            return Err(TaskError::ResponseParse(format!(
                "'result' is not a string: {}",
                other
            )))
        }
    };

    if response.get("is_error").and_then(Value::as_bool) == Some(true) {
        return Err(match classify(&content) {
            Verdict::Fatal(kind) => kind.into_error(content),
            _ => TaskError::Execution {
                code: Some(0),
                stderr: content,
            },
        });
    }

    let usage = parse_usage(&response)
        .unwrap_or_else(|| ParsedTokenUsage::estimated(TokenEstimator::default().estimate_exchange(prompt, &content)));
    let cost = response
        .get("total_cost_usd")
        .and_then(Value::as_f64)
        .unwrap_or_else(|| {
            TokenCost::for_model(model).calculate_cost_usd(usage.tokens.input_tokens, usage.tokens.output_tokens)
        });

    Ok(RawOutput {
        content: content.trim().to_string(),
        tokens_used: usage.total(),
        cost,
        tokens_estimated: !usage.is_actual(),
        session_id: response
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        degraded: false,
    })
}

/// Locates the response object. With several JSON lines, the last object
/// carrying a `result` wins; a single pretty-printed document or a JSON
/// array of messages is also accepted.
fn find_response(stdout: &str) -> Option<Value> {
    let from_lines = stdout
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .filter_map(|line| serde_json::from_str::<Value>(line).ok())
        .filter(|value| value.get("result").is_some())
        .last();
    if from_lines.is_some() {
        return from_lines;
    }

    match serde_json::from_str::<Value>(stdout.trim()).ok()? {
        value @ Value::Object(_) if value.get("result").is_some() => Some(value),
        Value::Array(items) => items.into_iter().rev().find(|item| item.get("result").is_some()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_with_usage_and_cost() {
        let stdout = r#"{"type":"result","subtype":"success","is_error":false,"result":"def test_add():\n    assert add(1, 2) == 3\n","session_id":"abc","total_cost_usd":0.0123,"usage":{"input_tokens":100,"output_tokens":50}}"#;
        let output = parse_output(OutputFormat::Json, stdout, "prompt", "sonnet").unwrap();
        assert!(output.content.starts_with("def test_add():"));
        assert_eq!(output.tokens_used, 150);
        assert_eq!(output.cost, 0.0123);
        assert!(!output.tokens_estimated);
        assert_eq!(output.session_id.as_deref(), Some("abc"));
    }

    #[test]
    fn test_last_result_line_wins() {
        let stdout = concat!(
            "{\"type\":\"system\",\"subtype\":\"init\"}\n",
            "not json\n",
            "{\"result\":\"first\"}\n",
            "{\"result\":\"second\",\"usage\":{\"prompt_tokens\":1,\"completion_tokens\":2}}\n",
        );
        let output = parse_output(OutputFormat::Json, stdout, "", "sonnet").unwrap();
        assert_eq!(output.content, "second");
        assert_eq!(output.tokens_used, 3);
    }

    #[test]
    fn test_pretty_printed_and_array_documents() {
        let pretty = "{\n  \"result\": \"ok\"\n}\n";
        assert_eq!(
            parse_output(OutputFormat::Json, pretty, "", "sonnet").unwrap().content,
            "ok"
        );

        let array = r#"[{"type":"system"},{"type":"result","result":"from array"}]"#;
        assert_eq!(
            parse_output(OutputFormat::Json, array, "", "sonnet").unwrap().content,
            "from array"
        );
    }

    #[test]
    fn test_missing_usage_is_estimated() {
        let output = parse_output(OutputFormat::Json, r#"{"result":"a b c d"}"#, "x y", "haiku").unwrap();
        assert!(output.tokens_estimated);
        assert!(output.tokens_used > 0);
        assert!(output.cost > 0.0);
    }

    #[test]
    fn test_malformed_json_is_parse_error() {
        for stdout in ["", "plain text", "{\"type\":\"system\"}", "{\"result\": 42}"] {
            let err = parse_output(OutputFormat::Json, stdout, "", "sonnet").unwrap_err();
            assert!(matches!(err, TaskError::ResponseParse(_)), "{}", stdout);
        }
    }

    #[test]
    fn test_is_error_is_classified() {
        let auth = parse_output(
            OutputFormat::Json,
            r#"{"is_error":true,"result":"Invalid API key · Please run /login"}"#,
            "",
            "sonnet",
        )
        .unwrap_err();
        assert!(matches!(auth, TaskError::Authentication(_)));

        let other = parse_output(
            OutputFormat::Json,
            r#"{"is_error":true,"result":"something odd"}"#,
            "",
            "sonnet",
        )
        .unwrap_err();
        assert!(matches!(other, TaskError::Execution { code: Some(0), .. }));
    }

    #[test]
    fn test_text_output_is_estimated() {
        let output = parse_output(OutputFormat::Text, "  generated tests\n", "prompt text", "opus").unwrap();
        assert_eq!(output.content, "generated tests");
        assert!(output.tokens_estimated);
        let expected = TokenCost::opus().calculate_cost_usd(
            TokenEstimator::default().estimate("prompt text"),
            TokenEstimator::default().estimate("generated tests"),
        );
        assert!((output.cost - expected).abs() < 1e-12);
    }
}
