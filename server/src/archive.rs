//! Hand-off point for finished matches.
//!
//! Long-term storage lives outside this server. The hub gives every finished
//! or abandoned match to an [Archive] exactly once, right before it forgets
//! the match.

use backgammon_types::MatchRecord;
use commonware_codec::Encode;
use commonware_utils::hex;
use tracing::info;

pub trait Archive: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn store(&self, record: MatchRecord) -> Result<(), Self::Error>;
}

/// Writes each record to the log as hex.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogArchive;

impl Archive for LogArchive {
    type Error = std::convert::Infallible;

    fn store(&self, record: MatchRecord) -> Result<(), Self::Error> {
        info!(
            match_id = record.match_id,
            status = ?record.status,
            winner = ?record.winner,
            flagged = record.flagged,
            moves = record.move_log.len(),
            rolls = record.rolls.len(),
            duration_ms = record.duration_ms,
            seed = %hex(&record.seed),
            record = %hex(&record.encode()),
            "archived match"
        );
        Ok(())
    }
}

/// Keeps records in memory for inspection by tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MemoryArchive {
    pub records: std::sync::Arc<std::sync::Mutex<Vec<MatchRecord>>>,
}

#[cfg(test)]
impl MemoryArchive {
    pub fn records(&self) -> Vec<MatchRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl Archive for MemoryArchive {
    type Error = std::convert::Infallible;

    fn store(&self, record: MatchRecord) -> Result<(), Self::Error> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
