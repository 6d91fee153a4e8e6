//! Consensus scenarios over realistic three-agent rounds.

use chrono::Utc;
use moltapp_consensus::{analyze_round, boost_confidence, ConsensusEngine};
use moltapp_models::{
    AgentResult, ConsensusStrength, Decision, RoundResult, RoundTrigger, TradeAction,
    MARKET_SYMBOL,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn decide(agent: &str, action: TradeAction, symbol: &str, confidence: u8) -> AgentResult {
    AgentResult {
        agent_id: agent.to_string(),
        agent_name: agent.to_string(),
        decision: Decision {
            action,
            symbol: symbol.to_string(),
            quantity: dec!(100),
            reasoning: format!("{agent} reasoning"),
            confidence,
            timestamp: Utc::now(),
        },
        executed: !action.is_hold(),
        execution_error: None,
        execution: None,
    }
}

#[test]
fn bull_bear_split_yields_majority_signal_and_divergence() {
    let results = vec![
        decide("claude", TradeAction::Buy, "AAPLx", 80),
        decide("gpt", TradeAction::Buy, "AAPLx", 70),
        decide("grok", TradeAction::Sell, "AAPLx", 60),
    ];
    let consensus = analyze_round("R1", &results);

    assert_eq!(consensus.signals.len(), 1);
    let signal = &consensus.signals[0];
    assert_eq!(signal.symbol, "AAPLx");
    assert_eq!(signal.action, TradeAction::Buy);
    assert_eq!(signal.agent_count, 2);
    assert_eq!(signal.agent_count, signal.agreeing_agents.len());
    assert_eq!(signal.agreeing_agents, vec!["claude", "gpt"]);
    assert_eq!(signal.dissenting_agents, vec!["grok"]);
    assert_eq!(signal.strength, ConsensusStrength::Majority);
    assert_eq!(signal.confidence, 75);
    assert_eq!(signal.average_quantity, dec!(100));

    assert_eq!(consensus.divergences.len(), 1);
    let divergence = &consensus.divergences[0];
    assert_eq!(divergence.symbol, "AAPLx");
    assert!(divergence.is_bull_bear_split);
    // round((75 + 60) / 2)
    assert_eq!(divergence.divergence_score, 68);
    assert_eq!(divergence.decisions.len(), 3);
}

#[test]
fn unanimous_sell_is_boosted_and_capped() {
    let results = vec![
        decide("claude", TradeAction::Sell, "TSLAx", 90),
        decide("gpt", TradeAction::Sell, "TSLAx", 85),
        decide("grok", TradeAction::Sell, "TSLAx", 95),
    ];
    let consensus = analyze_round("R2", &results);

    // One signal: no 2-of-3 subset signal next to the unanimous one.
    assert_eq!(consensus.signals.len(), 1);
    let signal = &consensus.signals[0];
    assert_eq!(signal.strength, ConsensusStrength::Unanimous);
    assert_eq!(signal.agent_count, 3);
    assert!(signal.dissenting_agents.is_empty());
    // 90 * 1.2 = 108, capped.
    assert_eq!(signal.confidence, 100);
    assert!(consensus.divergences.is_empty());
}

#[test]
fn moderate_unanimous_confidence_is_multiplied() {
    let results = vec![
        decide("claude", TradeAction::Buy, "NVDAx", 50),
        decide("gpt", TradeAction::Buy, "NVDAx", 60),
    ];
    let consensus = analyze_round("R3", &results);
    assert_eq!(consensus.signals[0].strength, ConsensusStrength::Unanimous);
    // 55 * 1.2
    assert_eq!(consensus.signals[0].confidence, 66);
}

#[test]
fn single_agent_round_is_silent() {
    let results = vec![decide("claude", TradeAction::Buy, "AAPLx", 99)];
    let consensus = analyze_round("R4", &results);
    assert!(consensus.is_empty());
    assert_eq!(consensus.participants, vec!["claude"]);
}

#[test]
fn scattered_symbols_only_produce_market_sentiment() {
    let results = vec![
        decide("claude", TradeAction::Buy, "AAPLx", 80),
        decide("gpt", TradeAction::Buy, "MSFTx", 60),
        decide("grok", TradeAction::Sell, "GMEx", 40),
    ];
    let consensus = analyze_round("R5", &results);

    assert!(consensus.divergences.is_empty());
    assert_eq!(consensus.signals.len(), 1);
    let market = &consensus.signals[0];
    assert!(market.is_market_wide());
    assert_eq!(market.symbol, MARKET_SYMBOL);
    assert_eq!(market.action, TradeAction::Buy);
    assert_eq!(market.strength, ConsensusStrength::Majority);
    assert_eq!(market.confidence, 70);
    assert_eq!(market.average_quantity, Decimal::ZERO);
    assert_eq!(market.dissenting_agents, vec!["grok"]);
}

#[test]
fn hold_agreement_is_a_signal_without_divergence() {
    let results = vec![
        decide("claude", TradeAction::Hold, "SPYx", 40),
        decide("gpt", TradeAction::Hold, "SPYx", 50),
        decide("grok", TradeAction::Buy, "SPYx", 70),
    ];
    let consensus = analyze_round("R6", &results);
    assert_eq!(consensus.signals.len(), 1);
    assert_eq!(consensus.signals[0].action, TradeAction::Hold);
    // A buy without a sell is not a split.
    assert!(consensus.divergences.is_empty());
}

#[test]
fn boost_rewards_agreement() {
    let results = vec![
        decide("claude", TradeAction::Buy, "AAPLx", 80),
        decide("gpt", TradeAction::Buy, "AAPLx", 70),
        decide("grok", TradeAction::Sell, "AAPLx", 60),
    ];

    // Majority +15, and the agreeing average 75 earns 10% more.
    let gpt = boost_confidence(&results[1].decision, &results);
    assert!(gpt.has_consensus());
    assert_eq!(gpt.strength, Some(ConsensusStrength::Majority));
    assert_eq!(gpt.original, 70);
    assert_eq!(gpt.boosted, 94);
    assert_eq!(gpt.agreeing_average_confidence, Some(75.0));

    let claude = boost_confidence(&results[0].decision, &results);
    assert_eq!(claude.boosted, 100);

    let grok = boost_confidence(&results[2].decision, &results);
    assert!(!grok.has_consensus());
    assert_eq!(grok.boosted, 60);
    assert_eq!(grok.agreeing_agents, vec!["grok"]);
}

#[test]
fn boost_without_high_confidence_is_flat() {
    let results = vec![
        decide("claude", TradeAction::Sell, "COINx", 50),
        decide("gpt", TradeAction::Sell, "COINx", 60),
    ];
    let boost = boost_confidence(&results[0].decision, &results);
    assert_eq!(boost.strength, Some(ConsensusStrength::Unanimous));
    assert_eq!(boost.boosted, 75);
}

#[test]
fn holds_are_never_boosted() {
    let results = vec![
        decide("claude", TradeAction::Hold, "AAPLx", 50),
        decide("gpt", TradeAction::Hold, "AAPLx", 90),
    ];
    let boost = boost_confidence(&results[0].decision, &results);
    assert_eq!(boost.boosted, 50);
    assert!(!boost.has_consensus());
}

#[test]
fn engine_tracks_round_outcomes_end_to_end() {
    let engine = ConsensusEngine::new(100);
    let round = RoundResult {
        round_id: "R1".to_string(),
        timestamp: Utc::now(),
        trigger: RoundTrigger::Manual {
            requested_by: "ops".to_string(),
        },
        results: vec![
            decide("claude", TradeAction::Buy, "AAPLx", 80),
            decide("gpt", TradeAction::Buy, "AAPLx", 70),
            decide("grok", TradeAction::Sell, "AAPLx", 60),
        ],
        errors: vec![],
        duration_ms: 1_200,
    };

    let consensus = engine.analyze(&round);
    assert_eq!(consensus.signals.len(), 1);
    assert_eq!(engine.pending_outcomes().len(), 1);

    let resolved = engine.record_outcome("R1", "AAPLx", 3.4).unwrap();
    assert_eq!(resolved.len(), 1);
    assert!(resolved[0].profitable);

    let status = engine.status();
    assert_eq!(status.streak.current, 1);
    assert_eq!(status.accuracy.overall.accuracy, 100.0);
    assert_eq!(status.accuracy.pending, 0);
    assert_eq!(engine.agreement_matrix().rate("claude", "gpt"), Some(100.0));
}
