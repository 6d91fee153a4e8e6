/// Tables holding completed rounds, their per-agent results and consensus records.
///
/// The full `RoundResult` and `RoundConsensus` are kept as JSON so that readers get
/// back exactly what was produced; the flat columns exist for ad-hoc queries.
pub const ROUNDS_DDL: &str = "
CREATE TABLE IF NOT EXISTS rounds (
    round_id    TEXT PRIMARY KEY,
    trigger     TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    duration_ms INTEGER NOT NULL,
    agent_count INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    result_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_rounds_started_at ON rounds(started_at);

CREATE TABLE IF NOT EXISTS agent_results (
    round_id        TEXT NOT NULL,
    agent_id        TEXT NOT NULL,
    action          TEXT NOT NULL,
    symbol          TEXT NOT NULL,
    quantity        TEXT NOT NULL,
    confidence      INTEGER NOT NULL,
    executed        INTEGER NOT NULL,
    execution_error TEXT,
    decided_at      TEXT NOT NULL,
    result_json     TEXT NOT NULL,
    PRIMARY KEY (round_id, agent_id)
);
CREATE INDEX IF NOT EXISTS idx_agent_results_agent ON agent_results(agent_id, decided_at);

CREATE TABLE IF NOT EXISTS consensus (
    round_id         TEXT PRIMARY KEY,
    analyzed_at      TEXT NOT NULL,
    signal_count     INTEGER NOT NULL,
    divergence_count INTEGER NOT NULL,
    consensus_json   TEXT NOT NULL
);
";
