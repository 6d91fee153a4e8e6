use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use moltapp_models::{AgentResult, RoundConsensus, RoundResult};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::StoreError;
use crate::schema::ROUNDS_DDL;
use crate::store::RoundStore;

/// SQLite-backed round history.
///
/// `rusqlite::Connection` is not `Sync`, so access goes through a `Mutex`.
pub struct SqliteRoundStore {
    conn: Mutex<Connection>,
}

impl SqliteRoundStore {
    /// Open (or create) the database at `path`. Creates the schema and enables WAL.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(ROUNDS_DDL)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(ROUNDS_DDL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn round_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let count: usize = conn.query_row("SELECT COUNT(*) FROM rounds", [], |row| row.get(0))?;
        Ok(count)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))
    }

    fn insert_round(&self, round: &RoundResult) -> Result<(), StoreError> {
        let result_json = serde_json::to_string(round)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO rounds \
             (round_id, trigger, started_at, duration_ms, agent_count, error_count, result_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                round.round_id,
                round.trigger.label(),
                sortable(round.timestamp),
                round.duration_ms as i64,
                round.results.len() as i64,
                round.errors.len() as i64,
                result_json,
            ],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO agent_results \
                 (round_id, agent_id, action, symbol, quantity, confidence, executed, \
                  execution_error, decided_at, result_json) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for result in &round.results {
                stmt.execute(rusqlite::params![
                    round.round_id,
                    result.agent_id,
                    result.decision.action.as_str(),
                    result.decision.symbol,
                    result.decision.quantity.to_string(),
                    result.decision.confidence,
                    result.executed,
                    result.execution_error,
                    sortable(result.decision.timestamp),
                    serde_json::to_string(result)?,
                ])?;
            }
        }
        tx.commit()?;
        debug!(round_id = %round.round_id, agents = round.results.len(), "Round persisted");
        Ok(())
    }

    fn insert_consensus(&self, consensus: &RoundConsensus) -> Result<(), StoreError> {
        let consensus_json = serde_json::to_string(consensus)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO consensus \
             (round_id, analyzed_at, signal_count, divergence_count, consensus_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                consensus.round_id,
                sortable(consensus.analyzed_at),
                consensus.signals.len() as i64,
                consensus.divergences.len() as i64,
                consensus_json,
            ],
        )?;
        debug!(round_id = %consensus.round_id, "Consensus persisted");
        Ok(())
    }

    fn select_json(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt
            .query_map(params, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

/// Fixed-width RFC 3339 so lexical order matches time order.
fn sortable(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl RoundStore for SqliteRoundStore {
    async fn persist_round(&self, round: &RoundResult) -> Result<(), StoreError> {
        self.insert_round(round)
    }

    async fn persist_consensus(&self, consensus: &RoundConsensus) -> Result<(), StoreError> {
        self.insert_consensus(consensus)
    }

    async fn round(&self, round_id: &str) -> Result<Option<RoundResult>, StoreError> {
        let json: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT result_json FROM rounds WHERE round_id = ?1",
                rusqlite::params![round_id],
                |row| row.get(0),
            )
            .optional()?
        };
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn recent_rounds(&self, limit: usize) -> Result<Vec<RoundResult>, StoreError> {
        self.select_json(
            "SELECT result_json FROM rounds ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            rusqlite::params![limit as i64],
        )?
        .iter()
        .map(|j| serde_json::from_str(j).map_err(StoreError::from))
        .collect()
    }

    async fn agent_history(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> Result<Vec<AgentResult>, StoreError> {
        self.select_json(
            "SELECT result_json FROM agent_results WHERE agent_id = ?1 \
             ORDER BY decided_at DESC LIMIT ?2",
            rusqlite::params![agent_id, limit as i64],
        )?
        .iter()
        .map(|j| serde_json::from_str(j).map_err(StoreError::from))
        .collect()
    }

    async fn consensus_for(&self, round_id: &str) -> Result<Option<RoundConsensus>, StoreError> {
        let json: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT consensus_json FROM consensus WHERE round_id = ?1",
                rusqlite::params![round_id],
                |row| row.get(0),
            )
            .optional()?
        };
        json.map(|j| serde_json::from_str(&j))
            .transpose()
            .map_err(StoreError::from)
    }
}
