//! Team registry - static roster, wave partition, and per-team configuration

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CadenceError;

/// One fixed role in the simulated delivery organization.
///
/// The variant order is the canonical pipeline order; `Ord` follows it, so
/// sorted collections keyed by `TeamId` come out in run order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TeamId {
    ProductMgmt,
    BizAnalysis,
    SolutionArch,
    ApiDesign,
    UxUi,
    FrontendEng,
    BackendEng,
    DatabaseEng,
    DataEng,
    MlEng,
    SecurityEng,
    Compliance,
    Devops,
    QaEng,
    SreOps,
    DocsTeam,
    FeatureEng,
}

impl TeamId {
    /// All teams in canonical pipeline order.
    pub const ALL: [TeamId; 17] = [
        TeamId::ProductMgmt,
        TeamId::BizAnalysis,
        TeamId::SolutionArch,
        TeamId::ApiDesign,
        TeamId::UxUi,
        TeamId::FrontendEng,
        TeamId::BackendEng,
        TeamId::DatabaseEng,
        TeamId::DataEng,
        TeamId::MlEng,
        TeamId::SecurityEng,
        TeamId::Compliance,
        TeamId::Devops,
        TeamId::QaEng,
        TeamId::SreOps,
        TeamId::DocsTeam,
        TeamId::FeatureEng,
    ];

    /// Stable string key, used in artifacts, memory banks, and handoff trailers.
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamId::ProductMgmt => "product_mgmt",
            TeamId::BizAnalysis => "biz_analysis",
            TeamId::SolutionArch => "solution_arch",
            TeamId::ApiDesign => "api_design",
            TeamId::UxUi => "ux_ui",
            TeamId::FrontendEng => "frontend_eng",
            TeamId::BackendEng => "backend_eng",
            TeamId::DatabaseEng => "database_eng",
            TeamId::DataEng => "data_eng",
            TeamId::MlEng => "ml_eng",
            TeamId::SecurityEng => "security_eng",
            TeamId::Compliance => "compliance",
            TeamId::Devops => "devops",
            TeamId::QaEng => "qa_eng",
            TeamId::SreOps => "sre_ops",
            TeamId::DocsTeam => "docs_team",
            TeamId::FeatureEng => "feature_eng",
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamId {
    type Err = CadenceError;

    /// Unknown identifiers are rejected at configuration-load time rather
    /// than falling through to a generic default at call time.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TeamId::ALL
            .iter()
            .find(|t| t.as_str() == s)
            .copied()
            .ok_or_else(|| CadenceError::UnknownTeam(s.to_string()))
    }
}

/// Classification of the decision a team's stage produces, used for
/// downstream bookkeeping only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Feature,
    AcceptanceCriteria,
    Adr,
    ApiContract,
    Architecture,
    ToolChoice,
    ThreatModel,
    Compliance,
    Deployment,
    TestPlan,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Feature => "feature",
            DecisionType::AcceptanceCriteria => "acceptance_criteria",
            DecisionType::Adr => "ADR",
            DecisionType::ApiContract => "api_contract",
            DecisionType::Architecture => "architecture",
            DecisionType::ToolChoice => "tool_choice",
            DecisionType::ThreatModel => "threat_model",
            DecisionType::Compliance => "compliance",
            DecisionType::Deployment => "deployment",
            DecisionType::TestPlan => "test_plan",
        }
    }
}

/// External capability a team may invoke during its stage, in declared order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Research query against an external search service.
    Research,
    /// Diagram rendering.
    Diagram,
    /// Document creation.
    Docs,
    /// Spreadsheet creation.
    Sheets,
    /// Persist code to source control. Hard gate, no auto-fix path.
    Git,
    /// Style linter. Hard gate, auto-fixable.
    Lint,
    /// Code formatter. Hard gate, auto-fixable.
    Format,
    /// Type checker. Hard gate, auto-fixable.
    TypeCheck,
    /// Security linter. Hard gate, auto-fixable.
    SecLint,
    /// Non-gating security scan.
    SecScan,
    /// Issue tracker update.
    Tracker,
    /// Chat notification.
    Chat,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Research => "research",
            ToolKind::Diagram => "diagram",
            ToolKind::Docs => "docs",
            ToolKind::Sheets => "sheets",
            ToolKind::Git => "git",
            ToolKind::Lint => "lint",
            ToolKind::Format => "format",
            ToolKind::TypeCheck => "typecheck",
            ToolKind::SecLint => "seclint",
            ToolKind::SecScan => "secscan",
            ToolKind::Tracker => "tracker",
            ToolKind::Chat => "chat",
        }
    }

    /// Failure of a hard-blocking tool pauses the run for external input.
    pub fn is_hard_blocking(&self) -> bool {
        matches!(
            self,
            ToolKind::Git
                | ToolKind::Lint
                | ToolKind::Format
                | ToolKind::TypeCheck
                | ToolKind::SecLint
        )
    }

    /// Quality gates whose violations the content generator may repair.
    /// Git is deliberately excluded: a push failure needs credentials, not
    /// regenerated code.
    pub fn is_auto_fixable(&self) -> bool {
        matches!(
            self,
            ToolKind::Lint | ToolKind::Format | ToolKind::TypeCheck | ToolKind::SecLint
        )
    }

    /// Tools that operate on the stage's code files and are skipped when a
    /// team produced none.
    pub fn needs_code(&self) -> bool {
        matches!(
            self,
            ToolKind::Git
                | ToolKind::Lint
                | ToolKind::Format
                | ToolKind::TypeCheck
                | ToolKind::SecLint
                | ToolKind::SecScan
        )
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static configuration for one team. Built once at registry construction
/// and never mutated.
#[derive(Debug, Clone)]
pub struct TeamConfig {
    pub id: TeamId,
    pub display_name: &'static str,
    /// One-line description of the stage's work, used as deterministic
    /// fallback content when no generator is available.
    pub focus: &'static str,
    /// Successor when the full roster runs. The scheduler overrides this
    /// with the actual next team of the run's selection.
    pub canonical_successor: Option<TeamId>,
    pub decision_type: DecisionType,
    /// Ordered tool capabilities this team is permitted to invoke.
    pub tools: Vec<ToolKind>,
    /// Whether this team's decision rationale is harvested into the shared
    /// knowledge log after its wave completes.
    pub knowledge_producer: bool,
    /// Whether this team receives the merged code tree of earlier waves for
    /// cross-team static validation.
    pub validates_upstream_code: bool,
    /// Keywords for requirement-based routing.
    pub keywords: &'static [&'static str],
}

/// Static registry: roster, wave partition, and per-team configuration.
///
/// Invariants, enforced by construction and checked in tests:
/// every team appears in exactly one wave; a team in wave N depends only on
/// teams in waves 1..N-1; the canonical successor chain follows roster order.
pub struct TeamRegistry {
    configs: HashMap<TeamId, TeamConfig>,
    waves: Vec<Vec<TeamId>>,
    core: Vec<TeamId>,
}

impl TeamRegistry {
    pub fn new() -> Self {
        use DecisionType as D;
        use TeamId as T;
        use ToolKind as K;

        let mut configs = HashMap::new();
        let mut add = |cfg: TeamConfig| {
            configs.insert(cfg.id, cfg);
        };

        add(TeamConfig {
            id: T::ProductMgmt,
            display_name: "Product Management",
            focus: "MVP slicing + milestone definition",
            canonical_successor: Some(T::BizAnalysis),
            decision_type: D::Feature,
            tools: vec![K::Docs, K::Research, K::Diagram, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["product", "roadmap", "mvp", "milestone", "vision"],
        });
        add(TeamConfig {
            id: T::BizAnalysis,
            display_name: "Business Analysis",
            focus: "requirements and acceptance criteria refinement",
            canonical_successor: Some(T::SolutionArch),
            decision_type: D::AcceptanceCriteria,
            tools: vec![K::Docs, K::Sheets, K::Research, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["requirement", "business", "acceptance", "criteria", "stakeholder"],
        });
        add(TeamConfig {
            id: T::SolutionArch,
            display_name: "Solution Architecture",
            focus: "component architecture + ADR extraction",
            canonical_successor: Some(T::ApiDesign),
            decision_type: D::Adr,
            tools: vec![K::Docs, K::Sheets, K::Diagram, K::Research, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["architecture", "design", "system", "diagram", "component", "integration"],
        });
        add(TeamConfig {
            id: T::ApiDesign,
            display_name: "API Design",
            focus: "contract-first OpenAPI draft",
            canonical_successor: Some(T::UxUi),
            decision_type: D::ApiContract,
            tools: vec![K::Docs, K::Diagram, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["api", "rest", "graphql", "openapi", "endpoint", "contract"],
        });
        add(TeamConfig {
            id: T::UxUi,
            display_name: "UX / UI",
            focus: "flow-level UX outline and handoff notes",
            canonical_successor: Some(T::FrontendEng),
            decision_type: D::Architecture,
            tools: vec![K::Docs, K::Diagram, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["ui", "ux", "wireframe", "user interface", "screen"],
        });
        add(TeamConfig {
            id: T::FrontendEng,
            display_name: "Frontend Engineering",
            focus: "UI implementation plan and state contracts",
            canonical_successor: Some(T::BackendEng),
            decision_type: D::Architecture,
            tools: vec![K::Git, K::Lint, K::Format, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["frontend", "react", "html", "css", "javascript", "web"],
        });
        add(TeamConfig {
            id: T::BackendEng,
            display_name: "Backend Engineering",
            focus: "service implementation and endpoint alignment",
            canonical_successor: Some(T::DatabaseEng),
            decision_type: D::Architecture,
            tools: vec![K::Git, K::Lint, K::Format, K::TypeCheck, K::SecLint, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["backend", "server", "service", "endpoint", "logic"],
        });
        add(TeamConfig {
            id: T::DatabaseEng,
            display_name: "Database Engineering",
            focus: "schema checks and migration path",
            canonical_successor: Some(T::DataEng),
            decision_type: D::Architecture,
            tools: vec![K::Git, K::Lint, K::TypeCheck, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["database", "sql", "schema", "migration", "query"],
        });
        add(TeamConfig {
            id: T::DataEng,
            display_name: "Data Engineering",
            focus: "data movement plan and transformation checks",
            canonical_successor: Some(T::MlEng),
            decision_type: D::Architecture,
            tools: vec![K::Git, K::Lint, K::Format, K::Tracker, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["data", "etl", "ingestion", "warehouse", "stream"],
        });
        add(TeamConfig {
            id: T::MlEng,
            display_name: "ML Engineering",
            focus: "model integration checkpoints",
            canonical_successor: Some(T::SecurityEng),
            decision_type: D::ToolChoice,
            tools: vec![K::Git, K::Lint, K::TypeCheck, K::Research, K::Tracker, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["model", "ml", "machine learning", "train", "inference", "dataset"],
        });
        add(TeamConfig {
            id: T::SecurityEng,
            display_name: "Security Engineering",
            focus: "baseline threat checks and scan profile",
            canonical_successor: Some(T::Compliance),
            decision_type: D::ThreatModel,
            tools: vec![K::SecScan, K::SecLint, K::Docs, K::Research, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["security", "auth", "vulnerability", "threat", "owasp"],
        });
        add(TeamConfig {
            id: T::Compliance,
            display_name: "Compliance",
            focus: "policy and audit evidence collection",
            canonical_successor: Some(T::Devops),
            decision_type: D::Compliance,
            tools: vec![K::Docs, K::Sheets, K::Tracker, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["compliance", "gdpr", "hipaa", "audit", "regulation", "policy"],
        });
        add(TeamConfig {
            id: T::Devops,
            display_name: "DevOps",
            focus: "deployment and rollback workflow",
            canonical_successor: Some(T::QaEng),
            decision_type: D::Deployment,
            tools: vec![K::Git, K::Lint, K::SecScan, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: false,
            keywords: &["deploy", "docker", "kubernetes", "ci/cd", "infrastructure", "container"],
        });
        add(TeamConfig {
            id: T::QaEng,
            display_name: "QA Engineering",
            focus: "end-to-end quality gates",
            canonical_successor: Some(T::SreOps),
            decision_type: D::TestPlan,
            tools: vec![K::Git, K::Lint, K::Format, K::Tracker, K::Chat],
            knowledge_producer: true,
            validates_upstream_code: true,
            keywords: &["test", "qa", "quality", "bug", "validation"],
        });
        add(TeamConfig {
            id: T::SreOps,
            display_name: "SRE / Ops",
            focus: "SLO + alerting baseline",
            canonical_successor: Some(T::DocsTeam),
            decision_type: D::Deployment,
            tools: vec![K::Git, K::Docs, K::Tracker, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["monitoring", "alerting", "slo", "sre", "observability", "incident"],
        });
        add(TeamConfig {
            id: T::DocsTeam,
            display_name: "Documentation",
            focus: "runbook and release notes",
            canonical_successor: Some(T::FeatureEng),
            decision_type: D::Architecture,
            tools: vec![K::Docs, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["documentation", "docs", "readme", "guide", "runbook", "changelog"],
        });
        add(TeamConfig {
            id: T::FeatureEng,
            display_name: "Feature Engineering",
            focus: "feature closure and backlog sync",
            canonical_successor: None,
            decision_type: D::Feature,
            tools: vec![K::Tracker, K::Docs, K::Chat],
            knowledge_producer: false,
            validates_upstream_code: false,
            keywords: &["feature", "story", "backlog", "sprint", "ticket"],
        });

        // Dependency DAG pre-flattened into a static wave list. A team in
        // wave N consumes only output of waves 1..N-1.
        let waves = vec![
            vec![T::ProductMgmt, T::BizAnalysis],
            vec![T::SolutionArch],
            vec![T::ApiDesign, T::UxUi],
            vec![T::FrontendEng, T::BackendEng, T::DatabaseEng, T::DataEng, T::MlEng],
            vec![T::SecurityEng, T::Compliance],
            vec![T::Devops, T::QaEng],
            vec![T::SreOps, T::DocsTeam, T::FeatureEng],
        ];

        // Always-on baseline for keyword-routed selection.
        let core = vec![T::SolutionArch, T::FrontendEng, T::BackendEng, T::Devops, T::QaEng];

        Self { configs, waves, core }
    }

    pub fn config(&self, id: TeamId) -> &TeamConfig {
        // Every TeamId variant is inserted in new(); the enum is closed.
        &self.configs[&id]
    }

    /// Full roster in canonical pipeline order.
    pub fn roster(&self) -> &'static [TeamId] {
        &TeamId::ALL
    }

    /// Static wave partition of the roster.
    pub fn waves(&self) -> &[Vec<TeamId>] {
        &self.waves
    }

    /// Teams included in every keyword-routed selection.
    pub fn core_teams(&self) -> &[TeamId] {
        &self.core
    }
}

impl Default for TeamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_id_round_trip() {
        for team in TeamId::ALL {
            let parsed: TeamId = team.as_str().parse().unwrap();
            assert_eq!(parsed, team);
        }
    }

    #[test]
    fn test_unknown_team_rejected() {
        let err = "growth_hacking".parse::<TeamId>();
        assert!(matches!(err, Err(CadenceError::UnknownTeam(_))));
    }

    #[test]
    fn test_waves_partition_roster_exactly_once() {
        let registry = TeamRegistry::new();
        let mut seen = Vec::new();
        for wave in registry.waves() {
            for team in wave {
                assert!(!seen.contains(team), "{team} appears in two waves");
                seen.push(*team);
            }
        }
        assert_eq!(seen.len(), registry.roster().len());
    }

    #[test]
    fn test_wave_order_respects_roster_order() {
        // Each wave's teams must come after every team of earlier waves in
        // the canonical ordering, so cross-wave dependencies only point back.
        let registry = TeamRegistry::new();
        let position = |t: TeamId| TeamId::ALL.iter().position(|x| *x == t).unwrap();
        let mut max_prev = 0;
        for wave in registry.waves() {
            let lo = wave.iter().map(|t| position(*t)).min().unwrap();
            let hi = wave.iter().map(|t| position(*t)).max().unwrap();
            if max_prev > 0 {
                assert!(lo >= max_prev, "wave overlaps an earlier wave");
            }
            max_prev = hi + 1;
        }
    }

    #[test]
    fn test_canonical_successor_chain_follows_roster() {
        let registry = TeamRegistry::new();
        let roster = registry.roster();
        for (idx, team) in roster.iter().enumerate() {
            let expected = roster.get(idx + 1).copied();
            assert_eq!(registry.config(*team).canonical_successor, expected);
        }
    }

    #[test]
    fn test_hard_block_classification() {
        assert!(ToolKind::Git.is_hard_blocking());
        assert!(!ToolKind::Git.is_auto_fixable());
        assert!(ToolKind::Lint.is_hard_blocking());
        assert!(ToolKind::Lint.is_auto_fixable());
        assert!(!ToolKind::SecScan.is_hard_blocking());
        assert!(!ToolKind::Chat.needs_code());
    }

    #[test]
    fn test_qa_is_the_upstream_code_validator() {
        let registry = TeamRegistry::new();
        let validators: Vec<TeamId> = registry
            .roster()
            .iter()
            .copied()
            .filter(|t| registry.config(*t).validates_upstream_code)
            .collect();
        assert_eq!(validators, vec![TeamId::QaEng]);
    }

    #[test]
    fn test_core_teams_are_known() {
        let registry = TeamRegistry::new();
        for team in registry.core_teams() {
            assert!(registry.roster().contains(team));
        }
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&TeamId::BackendEng).unwrap();
        assert_eq!(json, "\"backend_eng\"");
    }
}
