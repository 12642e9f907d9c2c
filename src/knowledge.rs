//! Inter-team knowledge accumulation
//!
//! Designated producer teams contribute their decision rationale after their
//! wave completes; every team in later waves receives the accumulated log as
//! extra context. The log is only ever mutated by the single-threaded
//! harvest step between waves, so the snapshot handed to a wave reflects
//! exactly the waves before it.

use crate::team::TeamId;

/// Immutable snapshot of the log, taken once per wave and shared by every
/// team dispatched in that wave.
#[derive(Debug, Clone, Default)]
pub struct KnowledgeSnapshot {
    entries: Vec<String>,
}

impl KnowledgeSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Joined context block for the effective requirement.
    pub fn render(&self) -> String {
        self.entries.join("\n\n")
    }
}

/// Rolling log of harvested knowledge, truncated for delivery via a
/// most-recent-K window to bound prompt size. Entries are rendered once at
/// record time; only the rendered form is ever consumed.
#[derive(Debug)]
pub struct KnowledgeLog {
    entries: Vec<String>,
    window: usize,
}

impl KnowledgeLog {
    pub fn new(window: usize) -> Self {
        Self { entries: Vec::new(), window }
    }

    /// Character budget for a producer's rationale. Solution architecture is
    /// foundational and gets more room.
    pub fn rationale_budget(team: TeamId) -> usize {
        if team == TeamId::SolutionArch {
            1200
        } else {
            800
        }
    }

    /// Append one harvested entry, truncating the rationale to the team's
    /// budget.
    pub fn record(&mut self, team: TeamId, label: &str, title: &str, rationale: &str) {
        let budget = Self::rationale_budget(team);
        let truncated: String = rationale.chars().take(budget).collect();
        self.entries.push(format!("[{label}] {title}:\n{truncated}"));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Frozen view of the most recent `window` entries.
    pub fn snapshot(&self) -> KnowledgeSnapshot {
        let skip = self.entries.len().saturating_sub(self.window);
        KnowledgeSnapshot {
            entries: self.entries[skip..].to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_log_snapshot() {
        let log = KnowledgeLog::new(6);
        let snap = log.snapshot();
        assert!(snap.is_empty());
        assert_eq!(snap.render(), "");
    }

    #[test]
    fn test_record_and_render() {
        let mut log = KnowledgeLog::new(6);
        log.record(TeamId::SolutionArch, "Solution Architecture", "ADR-1", "use a queue");
        let snap = log.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.render(), "[Solution Architecture] ADR-1:\nuse a queue");
    }

    #[test]
    fn test_window_keeps_most_recent() {
        let mut log = KnowledgeLog::new(2);
        for i in 0..5 {
            log.record(TeamId::BackendEng, "Backend Engineering", &format!("d{i}"), "r");
        }
        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.render().contains("d3"));
        assert!(snap.render().contains("d4"));
        assert!(!snap.render().contains("d2"));
        // The log itself keeps everything
        assert_eq!(log.len(), 5);
    }

    #[test]
    fn test_rationale_truncated_per_team_budget() {
        let mut log = KnowledgeLog::new(6);
        let long = "x".repeat(5000);
        log.record(TeamId::SolutionArch, "Solution Architecture", "t", &long);
        log.record(TeamId::QaEng, "QA Engineering", "t", &long);
        let snap = log.snapshot();
        let rendered = snap.render();
        let arch_len = rendered.split("\n\n").next().unwrap().len();
        // 1200 for solution_arch vs 800 for everyone else, plus the header
        assert!(arch_len > 1200 && arch_len < 1300);
        assert_eq!(KnowledgeLog::rationale_budget(TeamId::QaEng), 800);
    }

    #[test]
    fn test_snapshot_is_frozen() {
        let mut log = KnowledgeLog::new(6);
        log.record(TeamId::UxUi, "UX / UI", "flows", "three screens");
        let snap = log.snapshot();
        log.record(TeamId::Devops, "DevOps", "deploy", "blue/green");
        assert_eq!(snap.len(), 1);
        assert_eq!(log.snapshot().len(), 2);
    }
}
