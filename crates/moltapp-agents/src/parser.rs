use chrono::Utc;
use moltapp_models::{Decision, TradeAction};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Deserialize;

use crate::error::AgentError;

/// Extract the first JSON object from a string that may contain surrounding text.
///
/// Handles common model response formats:
/// - Clean JSON: `{"key": "value"}`
/// - Markdown-wrapped: ```json\n{"key": "value"}\n```
/// - Prefix text: `Here is my decision:\n{"key": "value"}`
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    if trimmed.starts_with('{') && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return Ok(trimmed.to_string());
    }

    if let Some(json_str) = extract_from_markdown_block(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    if let Some(json_str) = extract_first_object(trimmed) {
        if serde_json::from_str::<serde_json::Value>(&json_str).is_ok() {
            return Ok(json_str);
        }
    }

    Err(AgentError::Parse(format!(
        "No valid JSON object found in response (length={})",
        text.len()
    )))
}

fn extract_from_markdown_block(text: &str) -> Option<String> {
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];

    for marker in &start_markers {
        if let Some(start) = text.find(marker) {
            let json_start = start + marker.len();
            if let Some(end) = text[json_start..].find("```") {
                let extracted = text[json_start..json_start + end].trim();
                return Some(extracted.to_string());
            }
        }
    }

    None
}

/// Find the first balanced { ... } in the text, ignoring braces inside strings.
fn extract_first_object(text: &str) -> Option<String> {
    let mut depth = 0;
    let mut start = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start {
                        return Some(text[s..=i].to_string());
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Loose wire shape of a decision. Models emit numbers and strings interchangeably.
#[derive(Deserialize)]
struct RawDecision {
    action: String,
    symbol: String,
    #[serde(default)]
    quantity: serde_json::Value,
    #[serde(default)]
    reasoning: String,
    confidence: serde_json::Value,
}

/// Parse a trading decision from raw agent output.
pub fn parse_decision(raw: &str) -> Result<Decision, AgentError> {
    let json_str = extract_json(raw)?;
    let raw: RawDecision = serde_json::from_str(&json_str).map_err(|e| {
        AgentError::Parse(format!("Failed to parse decision: {e}\nJSON: {json_str}"))
    })?;

    let action = match raw.action.trim().to_ascii_lowercase().as_str() {
        "buy" => TradeAction::Buy,
        "sell" => TradeAction::Sell,
        "hold" => TradeAction::Hold,
        other => return Err(AgentError::InvalidDecision(format!("unknown action '{other}'"))),
    };

    let quantity = match &raw.quantity {
        serde_json::Value::Null => Decimal::ZERO,
        value => number_field("quantity", value)?,
    };

    let confidence = number_field("confidence", &raw.confidence)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    if confidence < Decimal::ZERO || confidence > Decimal::ONE_HUNDRED {
        return Err(AgentError::InvalidDecision(format!(
            "confidence {confidence} out of range 0-100"
        )));
    }
    let confidence = confidence
        .to_u8()
        .ok_or_else(|| AgentError::InvalidDecision(format!("confidence {confidence}")))?;

    let decision = Decision {
        action,
        symbol: raw.symbol.trim().to_string(),
        quantity,
        reasoning: raw.reasoning,
        confidence,
        timestamp: Utc::now(),
    };
    decision.validate().map_err(AgentError::InvalidDecision)?;
    Ok(decision)
}

fn number_field(field: &str, value: &serde_json::Value) -> Result<Decimal, AgentError> {
    let parsed = match value {
        serde_json::Value::Number(n) => n
            .to_string()
            .parse::<Decimal>()
            .ok()
            .or_else(|| n.as_f64().and_then(|f| Decimal::try_from(f).ok())),
        serde_json::Value::String(s) => s.trim().parse::<Decimal>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| AgentError::Parse(format!("{field} is not a number: {value}")))
}
