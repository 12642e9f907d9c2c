//! Tool execution boundary
//!
//! A tool is one named external capability: a document writer, a linter, a
//! ticket creator, a chat notifier. The executor must never raise; every
//! failure mode is represented in the returned outcome record.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::team::{TeamId, ToolKind};

/// Uniform outcome record for one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: ToolKind,
    /// Human-readable description of what the tool did (or failed to do).
    pub action: String,
    pub success: bool,
    /// Structured result payload, tool-specific.
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub error: String,
}

impl ToolOutcome {
    pub fn ok(tool: ToolKind, action: impl Into<String>) -> Self {
        Self {
            tool,
            action: action.into(),
            success: true,
            result: Value::Null,
            error: String::new(),
        }
    }

    pub fn failed(tool: ToolKind, action: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool,
            action: action.into(),
            success: false,
            result: Value::Null,
            error: error.into(),
        }
    }

    /// Single-line summary used in artifact text.
    pub fn summary(&self) -> String {
        let mark = if self.success { "ok" } else { "fail" };
        format!("{}({}: {})", self.tool, mark, self.action)
    }
}

/// One invocation: the tool, the calling team, and a tool-specific payload.
#[derive(Debug, Clone, Serialize)]
pub struct ToolRequest {
    pub tool: ToolKind,
    pub team: TeamId,
    pub payload: Value,
}

/// External tool-execution capability.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Must never fail at the call level; tool failures come back in the
    /// outcome with `success == false`.
    async fn invoke(&self, request: ToolRequest) -> ToolOutcome;
}

/// Stand-in executor for runs with no external tools wired: every
/// invocation succeeds with a canned action line.
pub struct SimulatedToolExecutor;

#[async_trait]
impl ToolExecutor for SimulatedToolExecutor {
    async fn invoke(&self, request: ToolRequest) -> ToolOutcome {
        ToolOutcome::ok(
            request.tool,
            format!("simulated {} for {}", request.tool, request.team),
        )
    }
}

/// User-facing recovery hint for a failed hard-blocking tool. Surfaced as
/// the stage's `block_reason` so a poller knows what to supply before
/// resuming.
pub fn recovery_hint(tool: ToolKind, error: &str) -> String {
    let hint = match tool {
        ToolKind::Git => {
            "A source-control token is needed to push code. Configure one in settings and re-run."
        }
        ToolKind::Lint => {
            "The linter found style violations in the generated code. Re-run with 'clean up the code style' to fix."
        }
        ToolKind::Format => {
            "The formatter found formatting issues in the generated code. Re-run with 'fix code formatting' to apply."
        }
        ToolKind::TypeCheck => {
            "The type checker found type errors in the generated code. Re-run with 'fix type errors' to resolve."
        }
        ToolKind::SecLint => {
            "The security linter found issues in the generated code. Re-run with 'fix security issues' to address."
        }
        _ => {
            return if error.is_empty() {
                format!("Tool '{tool}' failed. Check its configuration.")
            } else {
                let brief: String = error.chars().take(120).collect();
                format!("Tool '{tool}' failed: {brief}. Check configuration or supply the required credentials.")
            }
        }
    };
    hint.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_summary() {
        let ok = ToolOutcome::ok(ToolKind::Docs, "created doc");
        assert_eq!(ok.summary(), "docs(ok: created doc)");
        let bad = ToolOutcome::failed(ToolKind::Git, "push", "no token");
        assert_eq!(bad.summary(), "git(fail: push)");
    }

    #[test]
    fn test_simulated_executor_always_succeeds() {
        let executor = SimulatedToolExecutor;
        let outcome = tokio_test::block_on(executor.invoke(ToolRequest {
            tool: ToolKind::Tracker,
            team: TeamId::QaEng,
            payload: Value::Null,
        }));
        assert!(outcome.success);
        assert!(outcome.action.contains("qa_eng"));
    }

    #[test]
    fn test_recovery_hints_are_specific() {
        assert!(recovery_hint(ToolKind::Git, "").contains("token"));
        assert!(recovery_hint(ToolKind::Lint, "").contains("style"));
        let generic = recovery_hint(ToolKind::Research, "rate limited");
        assert!(generic.contains("research"));
        assert!(generic.contains("rate limited"));
    }
}
