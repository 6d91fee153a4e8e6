use moltapp_models::MarketContext;

use crate::error::AgentError;

/// Response schema included in every agent system prompt.
fn response_schema() -> String {
    let example = serde_json::json!({
        "action": "buy | sell | hold",
        "symbol": "<one of the quoted symbols>",
        "quantity": "<USDC amount for buys, token amount for sells, 0 for hold>",
        "reasoning": "<two or three sentences>",
        "confidence": 65
    });
    serde_json::to_string_pretty(&example).unwrap_or_default()
}

/// System prompt for a competing trading agent.
pub fn trading_system_prompt(agent_name: &str, strategy: &str) -> String {
    let strategy = if strategy.trim().is_empty() {
        "Balanced: weigh momentum and value equally and size positions moderately."
    } else {
        strategy
    };

    format!(
        "You are {agent_name}, an autonomous trading agent competing against other AI agents \
         on tokenized equities (xStocks) settled in USDC.\n\n\
         ## STRATEGY\n\n\
         {strategy}\n\n\
         ## RULES\n\n\
         - Pick exactly ONE action for this round: buy, sell or hold.\n\
         - Only trade symbols that appear in the market snapshot.\n\
         - For buys, `quantity` is the USDC amount to spend. For sells, it is the token amount.\n\
         - Use hold with quantity 0 when no trade clears your bar.\n\
         - `confidence` is an integer from 0 to 100. Be calibrated: 50 is a coin flip.\n\n\
         ## OUTPUT\n\n\
         Respond with ONLY a JSON object, no prose before or after:\n\
         {schema}",
        schema = response_schema(),
    )
}

/// User prompt carrying the round's market snapshot.
pub fn market_prompt(context: &MarketContext) -> Result<String, AgentError> {
    let snapshot = serde_json::to_string_pretty(context)?;
    Ok(format!(
        "Round {round_id}. Current market snapshot:\n\n{snapshot}\n\nReturn your decision.",
        round_id = context.round_id,
    ))
}
