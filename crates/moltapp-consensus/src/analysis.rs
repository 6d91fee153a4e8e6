use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use moltapp_models::{
    AgentResult, ConsensusDivergence, ConsensusSignal, ConsensusStrength, Decision,
    DivergentDecision, RoundConsensus, TradeAction, MARKET_SYMBOL,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Confidence multiplier applied to a signal every agent agrees on.
pub const UNANIMOUS_MULTIPLIER: f64 = 1.2;
pub const MAJORITY_MULTIPLIER: f64 = 1.0;

/// Flat bonuses used by [`boost_confidence`].
pub const UNANIMOUS_BONUS: f64 = 25.0;
pub const MAJORITY_BONUS: f64 = 15.0;
/// Agreeing agents above this average confidence earn an extra 10%.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 70.0;
pub const HIGH_CONFIDENCE_MULTIPLIER: f64 = 1.1;

/// Detect agreement and disagreement among the agents of one completed round.
///
/// Rounds with fewer than two participating agents produce nothing.
pub fn analyze_round(round_id: &str, results: &[AgentResult]) -> RoundConsensus {
    let now = Utc::now();
    let participants = participants(results);
    let total_agents = participants.len();

    let mut signals = Vec::new();
    let mut divergences = Vec::new();

    if total_agents >= 2 {
        let mut by_symbol: BTreeMap<&str, Vec<&AgentResult>> = BTreeMap::new();
        for result in results {
            by_symbol
                .entry(result.decision.symbol.as_str())
                .or_default()
                .push(result);
        }

        for (symbol, group) in &by_symbol {
            if group.len() < 2 {
                continue;
            }

            let mut by_action: BTreeMap<TradeAction, Vec<&AgentResult>> = BTreeMap::new();
            for result in group {
                by_action
                    .entry(result.decision.action)
                    .or_default()
                    .push(*result);
            }

            for (action, members) in &by_action {
                if members.len() < 2 {
                    continue;
                }
                let agreeing = agent_ids(members);
                let dissenting = agent_ids(group)
                    .into_iter()
                    .filter(|id| !agreeing.contains(id))
                    .collect();
                let strength = strength_for(members.len(), total_agents);
                signals.push(ConsensusSignal {
                    round_id: round_id.to_string(),
                    symbol: symbol.to_string(),
                    action: *action,
                    agent_count: members.len(),
                    agreeing_agents: agreeing,
                    dissenting_agents: dissenting,
                    confidence: weighted_confidence(members, strength),
                    strength,
                    average_quantity: average_quantity(members),
                    timestamp: now,
                });
            }

            if let Some(divergence) = detect_divergence(round_id, symbol, group, now) {
                divergences.push(divergence);
            }
        }

        signals.extend(market_signals(round_id, results, &participants, now));
    }

    RoundConsensus {
        round_id: round_id.to_string(),
        signals,
        divergences,
        participants,
        analyzed_at: now,
    }
}

/// Cross-symbol sentiment: two or more agents taking the same non-hold action
/// on different symbols.
fn market_signals(
    round_id: &str,
    results: &[AgentResult],
    participants: &[String],
    now: DateTime<Utc>,
) -> Vec<ConsensusSignal> {
    let mut signals = Vec::new();
    for action in [TradeAction::Buy, TradeAction::Sell] {
        let members: Vec<&AgentResult> = results
            .iter()
            .filter(|r| r.decision.action == action)
            .collect();
        let symbols: BTreeSet<&str> = members
            .iter()
            .map(|r| r.decision.symbol.as_str())
            .collect();
        if members.len() < 2 || symbols.len() < 2 {
            continue;
        }

        let agreeing = agent_ids(&members);
        let dissenting = participants
            .iter()
            .filter(|id| !agreeing.contains(*id))
            .cloned()
            .collect();
        let strength = strength_for(members.len(), participants.len());
        signals.push(ConsensusSignal {
            round_id: round_id.to_string(),
            symbol: MARKET_SYMBOL.to_string(),
            action,
            agent_count: members.len(),
            agreeing_agents: agreeing,
            dissenting_agents: dissenting,
            confidence: weighted_confidence(&members, strength),
            strength,
            average_quantity: Decimal::ZERO,
            timestamp: now,
        });
    }
    signals
}

fn detect_divergence(
    round_id: &str,
    symbol: &str,
    group: &[&AgentResult],
    now: DateTime<Utc>,
) -> Option<ConsensusDivergence> {
    let side_mean = |action: TradeAction| {
        let confidences: Vec<f64> = group
            .iter()
            .filter(|r| r.decision.action == action)
            .map(|r| f64::from(r.decision.confidence))
            .collect();
        mean(&confidences)
    };

    let buy_mean = side_mean(TradeAction::Buy)?;
    let sell_mean = side_mean(TradeAction::Sell)?;

    Some(ConsensusDivergence {
        round_id: round_id.to_string(),
        symbol: symbol.to_string(),
        decisions: group
            .iter()
            .map(|r| DivergentDecision {
                agent_id: r.agent_id.clone(),
                action: r.decision.action,
                confidence: r.decision.confidence,
                quantity: r.decision.quantity,
            })
            .collect(),
        divergence_score: clamp_score((buy_mean + sell_mean) / 2.0),
        is_bull_bear_split: true,
        timestamp: now,
    })
}

/// How much the rest of the round backs one decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceBoost {
    pub original: u8,
    pub boosted: u8,
    /// Agents whose decision matches on symbol and action (including the decision's own agent).
    pub agreeing_agents: Vec<String>,
    /// None when fewer than two agents agree.
    pub strength: Option<ConsensusStrength>,
    pub agreeing_average_confidence: Option<f64>,
}

impl ConfidenceBoost {
    pub fn has_consensus(&self) -> bool {
        self.strength.is_some()
    }
}

/// Boost a single decision's confidence by how many agents in the same round
/// agree on its symbol and action: +25 when unanimous, +15 for a majority,
/// then 10% more when the agreeing agents average above 70. Holds are never boosted.
pub fn boost_confidence(decision: &Decision, round_results: &[AgentResult]) -> ConfidenceBoost {
    let agreeing: Vec<&AgentResult> = round_results
        .iter()
        .filter(|r| r.decision.symbol == decision.symbol && r.decision.action == decision.action)
        .collect();
    let total_agents = participants(round_results).len();

    let unboosted = ConfidenceBoost {
        original: decision.confidence,
        boosted: decision.confidence,
        agreeing_agents: agent_ids(&agreeing),
        strength: None,
        agreeing_average_confidence: None,
    };
    if decision.action.is_hold() || agreeing.len() < 2 {
        return unboosted;
    }

    let strength = strength_for(agreeing.len(), total_agents);
    let bonus = match strength {
        ConsensusStrength::Unanimous => UNANIMOUS_BONUS,
        ConsensusStrength::Majority => MAJORITY_BONUS,
    };
    let confidences: Vec<f64> = agreeing
        .iter()
        .map(|r| f64::from(r.decision.confidence))
        .collect();
    let average = mean(&confidences).unwrap_or_default();
    let multiplier = if average > HIGH_CONFIDENCE_THRESHOLD {
        HIGH_CONFIDENCE_MULTIPLIER
    } else {
        1.0
    };

    ConfidenceBoost {
        boosted: clamp_score((f64::from(decision.confidence) + bonus) * multiplier),
        strength: Some(strength),
        agreeing_average_confidence: Some(average),
        ..unboosted
    }
}

fn participants(results: &[AgentResult]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    results
        .iter()
        .filter(|r| seen.insert(r.agent_id.as_str()))
        .map(|r| r.agent_id.clone())
        .collect()
}

fn agent_ids(results: &[&AgentResult]) -> Vec<String> {
    results.iter().map(|r| r.agent_id.clone()).collect()
}

fn strength_for(agreeing: usize, total_agents: usize) -> ConsensusStrength {
    if agreeing == total_agents {
        ConsensusStrength::Unanimous
    } else {
        ConsensusStrength::Majority
    }
}

fn weighted_confidence(members: &[&AgentResult], strength: ConsensusStrength) -> u8 {
    let confidences: Vec<f64> = members
        .iter()
        .map(|r| f64::from(r.decision.confidence))
        .collect();
    let multiplier = match strength {
        ConsensusStrength::Unanimous => UNANIMOUS_MULTIPLIER,
        ConsensusStrength::Majority => MAJORITY_MULTIPLIER,
    };
    clamp_score(mean(&confidences).unwrap_or_default() * multiplier)
}

fn average_quantity(members: &[&AgentResult]) -> Decimal {
    if members.is_empty() {
        return Decimal::ZERO;
    }
    let total: Decimal = members.iter().map(|r| r.decision.quantity).sum();
    total / Decimal::from(members.len())
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn clamp_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_score_rounds_and_caps() {
        assert_eq!(clamp_score(74.5), 75);
        assert_eq!(clamp_score(108.0), 100);
        assert_eq!(clamp_score(-3.0), 0);
    }

    #[test]
    fn mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[80.0, 70.0]), Some(75.0));
    }

    #[test]
    fn strength_requires_every_agent() {
        assert_eq!(strength_for(3, 3), ConsensusStrength::Unanimous);
        assert_eq!(strength_for(2, 3), ConsensusStrength::Majority);
    }
}
