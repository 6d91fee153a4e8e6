use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use moltapp_models::{
    ConsensusConfig, ConsensusStrength, RoundConsensus, RoundResult, TradeAction,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::analyze_round;
use crate::error::ConsensusError;
use crate::sectors::{aggregate_sector_sentiment, SectorSentiment};

/// A consensus signal awaiting its realized return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingOutcome {
    pub round_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub strength: ConsensusStrength,
    pub confidence: u8,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResolvedOutcome {
    pub round_id: String,
    pub symbol: String,
    pub action: TradeAction,
    pub strength: ConsensusStrength,
    pub confidence: u8,
    /// Realized price move of the symbol, in percent.
    pub return_percent: f64,
    /// Buy signals profit from a rise, sell signals from a fall.
    pub profitable: bool,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StreakInfo {
    /// Consecutive profitable consensus outcomes, most recent first.
    pub current: u32,
    pub longest: u32,
    pub last_profitable: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccuracyBucket {
    pub total: u32,
    pub profitable: u32,
    /// Percent of resolved outcomes that were profitable.
    pub accuracy: f64,
    pub average_return: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AccuracyStats {
    pub resolved: u32,
    pub pending: usize,
    pub overall: AccuracyBucket,
    pub unanimous: AccuracyBucket,
    pub majority: AccuracyBucket,
    pub buy: AccuracyBucket,
    pub sell: AccuracyBucket,
    pub by_symbol: BTreeMap<String, AccuracyBucket>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentPairAgreement {
    pub agent_a: String,
    pub agent_b: String,
    /// Rounds in history where both agents produced a decision.
    pub rounds_together: u32,
    /// Rounds where both landed in the same consensus group.
    pub agreements: u32,
    /// Percent of `rounds_together`.
    pub agreement_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AgreementMatrix {
    pub agents: Vec<String>,
    pub rounds_observed: usize,
    /// One entry per ordered pair of distinct agents that shared a round.
    pub pairs: Vec<AgentPairAgreement>,
}

impl AgreementMatrix {
    pub fn rate(&self, agent_a: &str, agent_b: &str) -> Option<f64> {
        self.pairs
            .iter()
            .find(|p| p.agent_a == agent_a && p.agent_b == agent_b)
            .map(|p| p.agreement_rate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsensusStatus {
    pub rounds_analyzed: u64,
    pub rounds_in_history: usize,
    pub total_signals: usize,
    pub unanimous_signals: usize,
    pub total_divergences: usize,
    pub latest: Option<RoundConsensus>,
    pub streak: StreakInfo,
    pub accuracy: AccuracyStats,
    pub sector_sentiment: Vec<SectorSentiment>,
}

#[derive(Default)]
struct Tally {
    total: u32,
    profitable: u32,
    return_sum: f64,
}

impl Tally {
    fn add(&mut self, outcome: &ResolvedOutcome) {
        self.total += 1;
        if outcome.profitable {
            self.profitable += 1;
        }
        self.return_sum += outcome.return_percent;
    }

    fn bucket(&self) -> AccuracyBucket {
        if self.total == 0 {
            return AccuracyBucket::default();
        }
        AccuracyBucket {
            total: self.total,
            profitable: self.profitable,
            accuracy: f64::from(self.profitable) / f64::from(self.total) * 100.0,
            average_return: self.return_sum / f64::from(self.total),
        }
    }
}

#[derive(Default)]
struct AccuracyTallies {
    overall: Tally,
    unanimous: Tally,
    majority: Tally,
    buy: Tally,
    sell: Tally,
    by_symbol: BTreeMap<String, Tally>,
}

struct EngineState {
    history: VecDeque<RoundConsensus>,
    pending: HashMap<(String, String), Vec<PendingOutcome>>,
    rounds_analyzed: u64,
    streak: StreakInfo,
    tallies: AccuracyTallies,
}

/// Runs consensus analysis on completed rounds and keeps a rolling history
/// for agreement, streak, sector and accuracy queries.
///
/// Safe to share between tasks; every method takes `&self`.
pub struct ConsensusEngine {
    history_size: usize,
    state: Mutex<EngineState>,
}

impl ConsensusEngine {
    pub fn new(history_size: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            state: Mutex::new(EngineState {
                history: VecDeque::new(),
                pending: HashMap::new(),
                rounds_analyzed: 0,
                streak: StreakInfo::default(),
                tallies: AccuracyTallies::default(),
            }),
        }
    }

    pub fn from_config(config: &ConsensusConfig) -> Self {
        Self::new(config.history_size)
    }

    /// Analyze a completed round, remember the result and register pending
    /// outcomes for its actionable per-symbol signals.
    pub fn analyze(&self, round: &RoundResult) -> RoundConsensus {
        let consensus = analyze_round(&round.round_id, &round.results);
        let mut state = self.lock();

        let reanalyzed = state.history.iter().any(|c| c.round_id == consensus.round_id);
        if reanalyzed {
            state.history.retain(|c| c.round_id != consensus.round_id);
            state.pending.retain(|(round_id, _), _| *round_id != consensus.round_id);
            debug!(round_id = %consensus.round_id, "Replacing earlier analysis of round");
        } else {
            state.rounds_analyzed += 1;
        }
        state.history.push_back(consensus.clone());
        while state.history.len() > self.history_size {
            if let Some(evicted) = state.history.pop_front() {
                let before = state.pending.len();
                state.pending.retain(|(round_id, _), _| *round_id != evicted.round_id);
                let dropped = before - state.pending.len();
                if dropped > 0 {
                    debug!(round_id = %evicted.round_id, dropped, "Dropped unresolved outcomes of evicted round");
                }
            }
        }

        for signal in &consensus.signals {
            if signal.action.is_hold() || signal.is_market_wide() {
                continue;
            }
            state
                .pending
                .entry((signal.round_id.clone(), signal.symbol.clone()))
                .or_default()
                .push(PendingOutcome {
                    round_id: signal.round_id.clone(),
                    symbol: signal.symbol.clone(),
                    action: signal.action,
                    strength: signal.strength,
                    confidence: signal.confidence,
                    recorded_at: consensus.analyzed_at,
                });
        }

        info!(
            round_id = %consensus.round_id,
            signals = consensus.signals.len(),
            divergences = consensus.divergences.len(),
            "Consensus analyzed"
        );
        consensus
    }

    /// Report the realized price move for a `(round, symbol)` pair. Every
    /// pending signal under that key is resolved, in signal order.
    pub fn record_outcome(
        &self,
        round_id: &str,
        symbol: &str,
        return_percent: f64,
    ) -> Result<Vec<ResolvedOutcome>, ConsensusError> {
        let mut state = self.lock();
        let pending = state
            .pending
            .remove(&(round_id.to_string(), symbol.to_string()))
            .ok_or_else(|| ConsensusError::UnknownOutcome {
                round_id: round_id.to_string(),
                symbol: symbol.to_string(),
            })?;

        let now = Utc::now();
        let mut resolved = Vec::with_capacity(pending.len());
        for p in pending {
            let profitable = match p.action {
                TradeAction::Buy => return_percent > 0.0,
                TradeAction::Sell => return_percent < 0.0,
                TradeAction::Hold => false,
            };
            let outcome = ResolvedOutcome {
                round_id: p.round_id,
                symbol: p.symbol,
                action: p.action,
                strength: p.strength,
                confidence: p.confidence,
                return_percent,
                profitable,
                resolved_at: now,
            };

            let streak = &mut state.streak;
            if profitable {
                streak.current += 1;
                streak.longest = streak.longest.max(streak.current);
            } else {
                streak.current = 0;
            }
            streak.last_profitable = Some(profitable);

            let tallies = &mut state.tallies;
            tallies.overall.add(&outcome);
            match outcome.strength {
                ConsensusStrength::Unanimous => tallies.unanimous.add(&outcome),
                ConsensusStrength::Majority => tallies.majority.add(&outcome),
            }
            match outcome.action {
                TradeAction::Buy => tallies.buy.add(&outcome),
                TradeAction::Sell => tallies.sell.add(&outcome),
                TradeAction::Hold => {}
            }
            tallies
                .by_symbol
                .entry(outcome.symbol.clone())
                .or_default()
                .add(&outcome);

            debug!(
                round_id = %outcome.round_id,
                symbol = %outcome.symbol,
                return_percent,
                profitable,
                streak = state.streak.current,
                "Consensus outcome recorded"
            );
            resolved.push(outcome);
        }
        Ok(resolved)
    }

    /// Most recent rounds first.
    pub fn history(&self, limit: usize) -> Vec<RoundConsensus> {
        self.lock().history.iter().rev().take(limit).cloned().collect()
    }

    pub fn round(&self, round_id: &str) -> Option<RoundConsensus> {
        self.lock()
            .history
            .iter()
            .find(|c| c.round_id == round_id)
            .cloned()
    }

    pub fn pending_outcomes(&self) -> Vec<PendingOutcome> {
        let state = self.lock();
        let mut pending: Vec<PendingOutcome> = state.pending.values().flatten().cloned().collect();
        pending.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at).then(a.symbol.cmp(&b.symbol)));
        pending
    }

    pub fn streak(&self) -> StreakInfo {
        self.lock().streak.clone()
    }

    pub fn accuracy(&self) -> AccuracyStats {
        let state = self.lock();
        accuracy_of(&state)
    }

    /// How often each ordered pair of agents lands in the same consensus group,
    /// as a percentage of the history rounds they both took part in.
    pub fn agreement_matrix(&self) -> AgreementMatrix {
        let state = self.lock();
        let mut agents = BTreeSet::new();
        let mut counts: BTreeMap<(String, String), (u32, u32)> = BTreeMap::new();

        for round in &state.history {
            for a in &round.participants {
                agents.insert(a.clone());
                for b in &round.participants {
                    if a == b {
                        continue;
                    }
                    let agreed = round
                        .signals
                        .iter()
                        .any(|s| s.agreeing_agents.contains(a) && s.agreeing_agents.contains(b));
                    let entry = counts.entry((a.clone(), b.clone())).or_default();
                    entry.0 += 1;
                    if agreed {
                        entry.1 += 1;
                    }
                }
            }
        }

        AgreementMatrix {
            agents: agents.into_iter().collect(),
            rounds_observed: state.history.len(),
            pairs: counts
                .into_iter()
                .map(|((agent_a, agent_b), (together, agreements))| AgentPairAgreement {
                    agent_a,
                    agent_b,
                    rounds_together: together,
                    agreements,
                    agreement_rate: f64::from(agreements) / f64::from(together) * 100.0,
                })
                .collect(),
        }
    }

    /// Sector sentiment over every signal in the rolling history.
    pub fn sector_sentiment(&self) -> Vec<SectorSentiment> {
        let state = self.lock();
        aggregate_sector_sentiment(state.history.iter().flat_map(|c| c.signals.iter()))
    }

    pub fn status(&self) -> ConsensusStatus {
        let state = self.lock();
        let signals = || state.history.iter().flat_map(|c| c.signals.iter());
        ConsensusStatus {
            rounds_analyzed: state.rounds_analyzed,
            rounds_in_history: state.history.len(),
            total_signals: signals().count(),
            unanimous_signals: signals()
                .filter(|s| s.strength == ConsensusStrength::Unanimous)
                .count(),
            total_divergences: state.history.iter().map(|c| c.divergences.len()).sum(),
            latest: state.history.back().cloned(),
            streak: state.streak.clone(),
            accuracy: accuracy_of(&state),
            sector_sentiment: aggregate_sector_sentiment(signals()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn accuracy_of(state: &EngineState) -> AccuracyStats {
    let t = &state.tallies;
    AccuracyStats {
        resolved: t.overall.total,
        pending: state.pending.values().map(Vec::len).sum(),
        overall: t.overall.bucket(),
        unanimous: t.unanimous.bucket(),
        majority: t.majority.bucket(),
        buy: t.buy.bucket(),
        sell: t.sell.bucket(),
        by_symbol: t
            .by_symbol
            .iter()
            .map(|(symbol, tally)| (symbol.clone(), tally.bucket()))
            .collect(),
    }
}
