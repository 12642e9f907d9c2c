//! Content generation boundary
//!
//! The generator wraps an LLM call somewhere out of our sight. It must
//! tolerate unavailability (network failure, budget exhaustion) by returning
//! `None`, in which case the stage falls back to the team's deterministic
//! focus line.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::team::TeamId;

/// Provenance-carrying output of one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub content: String,
    /// Where the content came from, e.g. "proxy" or "sdk_fallback".
    pub source: String,
    pub estimated_cost_usd: f64,
    pub budget_remaining_usd: f64,
}

/// One generation request: the team, the effective requirement (already
/// decorated with upstream context), the count of prior memory items, and
/// the successor the artifact must declare.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub team: TeamId,
    pub requirement: String,
    pub prior_count: usize,
    pub handoff_to: String,
}

/// External content-generation capability.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Returns `None` when generation is unavailable; the caller falls back
    /// to deterministic content and the run continues.
    async fn generate(&self, request: GenerationRequest) -> Option<Generation>;
}

/// Marker used when a stage ran without generator output.
pub const SOURCE_DETERMINISTIC: &str = "deterministic";

/// Remove markdown code fences and language tags from generated code.
pub fn strip_fences(code: &str) -> String {
    let trimmed = code.trim();
    let mut lines: Vec<&str> = trimmed.lines().collect();
    if lines.first().map(|l| l.trim_start().starts_with("```")).unwrap_or(false) {
        lines.remove(0);
    }
    if lines.last().map(|l| l.trim() == "```").unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Header format the remediation prompt asks for: `# === filename ===`.
const FILE_HEADER_PREFIX: &str = "# === ";
const FILE_HEADER_SUFFIX: &str = " ===";

/// Outcome of parsing an auto-fix response back into a file map.
///
/// `Empty` means the generator answered but the response carried nothing
/// usable, which is a different failure from the generator being
/// unavailable; the two get distinct recovery hints.
#[derive(Debug, Clone, PartialEq)]
pub enum FixParse {
    Files(BTreeMap<String, String>),
    Empty,
}

/// Parse a remediation response into per-file contents.
///
/// Expects `# === filename ===` block headers. When no header is present
/// the whole response is treated as the replacement for the first target
/// file, fences stripped.
pub fn parse_fix_response(text: &str, targets: &BTreeMap<String, String>) -> FixParse {
    let mut files: BTreeMap<String, String> = BTreeMap::new();
    let mut current: Option<String> = None;
    let mut buffer: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.starts_with(FILE_HEADER_PREFIX) && line.ends_with(FILE_HEADER_SUFFIX) {
            if let Some(name) = current.take() {
                files.insert(name, buffer.join("\n").trim().to_string());
            }
            let name = &line[FILE_HEADER_PREFIX.len()..line.len() - FILE_HEADER_SUFFIX.len()];
            current = Some(name.trim().to_string());
            buffer.clear();
        } else if current.is_some() {
            buffer.push(line);
        }
    }
    if let Some(name) = current.take() {
        files.insert(name, buffer.join("\n").trim().to_string());
    }

    if files.is_empty() {
        let body = strip_fences(text);
        match (targets.keys().next(), body.is_empty()) {
            (Some(first), false) => {
                files.insert(first.clone(), body);
            }
            _ => return FixParse::Empty,
        }
    }

    // Drop blocks that parsed to nothing
    files.retain(|_, content| !content.is_empty());
    if files.is_empty() {
        FixParse::Empty
    } else {
        FixParse::Files(files)
    }
}

/// Merge fixed files back into the stage's code map.
///
/// Fixed names that match an existing path exactly replace it; otherwise a
/// suffix match handles responses that drop the directory prefix. Unmatched
/// fixes are ignored rather than introducing surprise files.
pub fn merge_fixed_files(
    original: &BTreeMap<String, String>,
    fixed: BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = original.clone();
    for (name, content) in fixed {
        if merged.contains_key(&name) {
            merged.insert(name, content);
            continue;
        }
        let base = name.rsplit('/').next().unwrap_or(&name).to_string();
        if let Some(path) = merged
            .keys()
            .find(|orig| orig.ends_with(&name) || orig.rsplit('/').next() == Some(base.as_str()))
            .cloned()
        {
            merged.insert(path, content);
        }
    }
    merged
}
