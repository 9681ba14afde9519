//! Batch reports

use chrono::{DateTime, Utc};
use picker_artifact::{RunRecord, TerminalState};
use picker_symbol::Symbol;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Outcome of one batch: one run record per requested symbol, in request
/// order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Ulid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub records: Vec<RunRecord>,
}

/// Per-terminal-state counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
}

impl Default for BatchReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchReport {
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_id: Ulid::new(),
            started_at: Utc::now(),
            finished_at: None,
            records: Vec::new(),
        }
    }

    /// Report over records produced elsewhere (e.g. loaded from the store)
    #[must_use]
    pub fn from_records(records: Vec<RunRecord>) -> Self {
        let started_at = records
            .iter()
            .map(|r| r.started_at)
            .min()
            .unwrap_or_else(Utc::now);
        let finished_at = records.iter().filter_map(|r| r.finished_at).max();
        Self {
            batch_id: Ulid::new(),
            started_at,
            finished_at,
            records,
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    #[must_use]
    pub fn record(&self, symbol: &Symbol) -> Option<&RunRecord> {
        self.records.iter().find(|r| &r.symbol == symbol)
    }

    #[must_use]
    pub fn count(&self, state: TerminalState) -> usize {
        self.records.iter().filter(|r| r.terminal == state).count()
    }

    #[must_use]
    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            complete: self.count(TerminalState::Complete),
            partial: self.count(TerminalState::Partial),
            failed: self.count(TerminalState::Failed),
        }
    }

    /// Every record complete
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.records
            .iter()
            .all(|r| r.terminal == TerminalState::Complete)
    }

    /// Symbols whose records are not complete
    #[must_use]
    pub fn incomplete(&self) -> Vec<&Symbol> {
        self.records
            .iter()
            .filter(|r| r.terminal != TerminalState::Complete)
            .map(|r| &r.symbol)
            .collect()
    }

    /// # Errors
    /// Returns error if a record fails to serialize
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str, terminal: TerminalState) -> RunRecord {
        let mut record = RunRecord::new(Symbol::parse(symbol).unwrap(), ["a"]);
        record.terminal = terminal;
        record
    }

    #[test]
    fn summary_counts_terminal_states() {
        let report = BatchReport::from_records(vec![
            record("ACME", TerminalState::Complete),
            record("BETA", TerminalState::Partial),
            record("GAMA", TerminalState::Failed),
        ]);
        assert_eq!(
            report.summary(),
            BatchSummary {
                complete: 1,
                partial: 1,
                failed: 1
            }
        );
        assert!(!report.is_complete());
        let incomplete: Vec<&str> = report.incomplete().into_iter().map(Symbol::as_str).collect();
        assert_eq!(incomplete, ["BETA", "GAMA"]);
    }

    #[test]
    fn report_json_roundtrips() {
        let mut report = BatchReport::from_records(vec![record("ACME", TerminalState::Complete)]);
        report.finish();
        let json = report.to_json_pretty().unwrap();
        let back: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert!(back.record(&Symbol::parse("ACME").unwrap()).is_some());
    }
}
