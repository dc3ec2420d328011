//! Maps raw procedure result rows onto the configured status columns.
//!
//! Procedure output columns are not stable across environments, so matching
//! is deliberately loose: exact name first, then a case-insensitive substring
//! match in either direction, then the first value in the row. The first hit
//! in row order wins.
use crate::db::probe::{ProcedureRun, ResultRow};
use crate::server::config::ProcedureSpec;

use super::models::StatusSnapshot;

pub fn resolve_column(row: &ResultRow, expected: &str) -> String {
    if let Some((_, value)) = row.iter().find(|(name, _)| name == expected) {
        return value.clone();
    }

    let expected_lower = expected.to_lowercase();
    let fuzzy = row.iter().find(|(name, _)| {
        let name_lower = name.to_lowercase();
        name_lower.contains(&expected_lower) || expected_lower.contains(&name_lower)
    });
    if let Some((_, value)) = fuzzy {
        return value.clone();
    }

    match row.first() {
        Some((_, value)) => value.clone(),
        None => "ERROR: No data returned".to_string(),
    }
}

/// Builds the snapshot for one procedure's outcome into `snapshot`.
pub fn resolve_procedure(snapshot: &mut StatusSnapshot, spec: &ProcedureSpec, run: &ProcedureRun) {
    for column in &spec.expected_columns {
        let status = match run {
            Ok(Some(row)) => resolve_column(row, column),
            Ok(None) => format!("ERROR: No result from {}", spec.procedure),
            Err(message) => format!("ERROR: {message}"),
        };
        snapshot.insert(column.clone(), status);
    }
}

pub fn resolve_snapshot(specs: &[ProcedureSpec], runs: &[ProcedureRun]) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new();
    for (index, spec) in specs.iter().enumerate() {
        match runs.get(index) {
            Some(run) => resolve_procedure(&mut snapshot, spec, run),
            None => resolve_procedure(&mut snapshot, spec, &Ok(None)),
        }
    }
    snapshot
}
