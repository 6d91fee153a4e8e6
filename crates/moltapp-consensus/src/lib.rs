pub mod analysis;
pub mod engine;
pub mod error;
pub mod sectors;

pub use analysis::{analyze_round, boost_confidence, ConfidenceBoost};
pub use engine::{
    AccuracyBucket, AccuracyStats, AgentPairAgreement, AgreementMatrix, ConsensusEngine,
    ConsensusStatus, PendingOutcome, ResolvedOutcome, StreakInfo,
};
pub use error::ConsensusError;
pub use sectors::{aggregate_sector_sentiment, sector_for, SectorSentiment, SentimentLabel};
