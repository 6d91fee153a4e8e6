use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("No pending consensus outcome for round {round_id}, symbol {symbol}")]
    UnknownOutcome { round_id: String, symbol: String },
}
