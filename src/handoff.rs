//! Handoff trailer parsing and post-run chain validation
//!
//! Every artifact must end with a trailer line of the exact form
//! `- handoff_to: <team-or-none>`. After a run, each team's declared
//! successor is checked against the actual next team of the selected and
//! ordered list. The check is a pure post-hoc audit; it never gates
//! execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::team::TeamId;

/// Trailer key matched at a fixed position within its line.
pub const HANDOFF_KEY: &str = "- handoff_to:";
/// Sentinel successor for the last team in a run.
pub const HANDOFF_NONE: &str = "none";
/// Result of parsing an artifact with no trailer line. Never an error.
pub const HANDOFF_UNKNOWN: &str = "unknown";

/// Extract the declared successor from an artifact's trailer line.
///
/// Pure function of the artifact text: parsing the same artifact twice
/// yields the same result. An artifact with no trailer yields `"unknown"`.
pub fn extract_handoff(artifact: &str) -> &str {
    for line in artifact.lines() {
        if let Some(rest) = line.trim_start().strip_prefix(HANDOFF_KEY) {
            return rest.split_whitespace().next().unwrap_or(HANDOFF_UNKNOWN);
        }
    }
    HANDOFF_UNKNOWN
}

/// One per participating team per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRecord {
    pub team: TeamId,
    /// The next team in the actually selected-and-ordered list, not the
    /// team's static canonical successor.
    pub expected_handoff_to: String,
    /// Parsed from the team's artifact trailer.
    pub observed_handoff_to: String,
    pub ok: bool,
}

/// Validate the handoff chain across the full run.
///
/// Returns one record per team plus the conjunction of all `ok` flags.
pub fn validate_handoffs(
    selection: &[TeamId],
    artifacts: &BTreeMap<TeamId, String>,
) -> (Vec<HandoffRecord>, bool) {
    let mut records = Vec::with_capacity(selection.len());
    for (idx, team) in selection.iter().enumerate() {
        let expected = match selection.get(idx + 1) {
            Some(next) => next.as_str(),
            None => HANDOFF_NONE,
        };
        let observed = artifacts
            .get(team)
            .map(|a| extract_handoff(a))
            .unwrap_or(HANDOFF_UNKNOWN);
        records.push(HandoffRecord {
            team: *team,
            expected_handoff_to: expected.to_string(),
            observed_handoff_to: observed.to_string(),
            ok: observed == expected,
        });
    }
    let overall = records.iter().all(|r| r.ok);
    (records, overall)
}
