//! # Cadence
//!
//! Wave-scheduled delivery pipeline orchestration - the marching order.
//!
//! This crate simulates a 17-team software-delivery organization. A run
//! takes one requirement through the selected teams in seven dependency
//! waves: teams within a wave execute concurrently, waves execute in
//! order, and decisions harvested from earlier waves feed later ones.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            ORCHESTRATOR                              │
//! │  ┌───────────────┐  ┌────────────────┐  ┌────────────────────────┐  │
//! │  │ Team Selector │  │ Wave Scheduler │  │ Status Publisher (poll)│  │
//! │  └───────────────┘  └────────────────┘  └────────────────────────┘  │
//! └────────────────────────────┬────────────────────────────────────────┘
//!                              │
//!   W1 ┌──────────────┐ ┌──────────────┐
//!      │ product_mgmt │ │ biz_analysis │                ──┐
//!      └──────────────┘ └──────────────┘                  │ knowledge
//!   W2 ┌───────────────┐                                  │ flows
//!      │ solution_arch │                                  ▼ downward
//!      └───────────────┘
//!   W3 ┌────────────┐ ┌───────┐
//!      │ api_design │ │ ux_ui │
//!      └────────────┘ └───────┘
//!   W4 ┌──────────┐ ┌─────────┐ ┌──────────┐ ┌──────────┐ ┌────────┐
//!      │ frontend │ │ backend │ │ database │ │ data_eng │ │ ml_eng │
//!      └──────────┘ └─────────┘ └──────────┘ └──────────┘ └────────┘
//!   W5 ┌──────────────┐ ┌────────────┐
//!      │ security_eng │ │ compliance │
//!      └──────────────┘ └────────────┘
//!   W6 ┌────────┐ ┌────────┐
//!      │ devops │ │ qa_eng │
//!      └────────┘ └────────┘
//!   W7 ┌─────────┐ ┌───────────┐ ┌─────────────┐
//!      │ sre_ops │ │ docs_team │ │ feature_eng │
//!      └─────────┘ └───────────┘ └─────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Team**: One fixed role with its own tools, decision type, and focus
//! - **Wave**: A set of teams with no mutual dependencies, run concurrently
//! - **Stage**: One team's execution (generate → tools → artifact)
//! - **Handoff**: The `- handoff_to:` trailer chaining artifacts together
//! - **Knowledge**: Decision summaries accumulated across waves

pub mod error;
pub mod generate;
pub mod handoff;
pub mod knowledge;
pub mod memory;
pub mod pipeline;
pub mod scheduler;
pub mod stage;
pub mod team;
pub mod tools;

pub use error::CadenceError;
pub use generate::{ContentGenerator, Generation, GenerationRequest};
pub use handoff::{extract_handoff, validate_handoffs, HandoffRecord};
pub use knowledge::{KnowledgeLog, KnowledgeSnapshot};
pub use memory::{InMemoryStore, MemoryStore};
pub use pipeline::{
    Orchestrator, RunHandle, RunId, RunOutput, RunPhase, RunRequest, RunStatus, TeamSelection,
};
pub use scheduler::{SchedulerConfig, WaveEvent, WaveScheduler};
pub use stage::{QaVerdict, StageExecutor, StageInput, StageResult, StageRunner};
pub use team::{DecisionType, TeamConfig, TeamId, TeamRegistry, ToolKind};
pub use tools::{SimulatedToolExecutor, ToolExecutor, ToolOutcome, ToolRequest};
