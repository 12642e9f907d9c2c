//! Pipeline orchestrator - top-level run driver
//!
//! Resolves which teams participate (full roster, explicit subset, or
//! keyword-routed selection), drives the wave scheduler on a dedicated
//! task, and publishes immutable `RunStatus` snapshots through a watch
//! channel so a client can poll progress without waiting for the run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::CadenceError;
use crate::generate::ContentGenerator;
use crate::handoff::{validate_handoffs, HandoffRecord};
use crate::memory::MemoryStore;
use crate::scheduler::{SchedulerConfig, WaveEvent, WaveScheduler};
use crate::stage::{extract_action, preview, QaVerdict, StageExecutor, StageResult};
use crate::team::{TeamId, TeamRegistry};
use crate::tools::ToolExecutor;

/// Opaque run task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Completed | RunPhase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    InProgress,
    Complete,
}

/// Compact tool record exposed on the status surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSummary {
    pub tool: String,
    pub action: String,
    pub success: bool,
}

/// Per-team progress record, updated after every stage completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub team: TeamId,
    pub status: ActivityStatus,
    pub action: String,
    pub artifact_preview: String,
    pub tools_used: Vec<ToolSummary>,
    /// Set when the stage hit an unrecovered hard gate; the reason tells a
    /// poller what to supply before re-running.
    pub blocked: bool,
    pub block_reason: String,
}

impl Activity {
    fn pending(team: TeamId) -> Self {
        Self {
            team,
            status: ActivityStatus::Pending,
            action: String::new(),
            artifact_preview: String::new(),
            tools_used: Vec::new(),
            blocked: false,
            block_reason: String::new(),
        }
    }
}

/// Final aggregated result of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub artifacts: BTreeMap<TeamId, String>,
    /// Per-team code files, kept for attribution.
    pub code_files: BTreeMap<TeamId, BTreeMap<String, String>>,
    /// Flat project tree merged across teams, later teams winning.
    pub unified_code: BTreeMap<String, String>,
    pub file_attribution: BTreeMap<String, TeamId>,
    pub handoffs: Vec<HandoffRecord>,
    pub overall_handoff_ok: bool,
    /// Cross-team static validation outcome, when a validating team ran
    /// with upstream code available.
    pub qa_verdict: Option<QaVerdict>,
    pub qa_issues: Vec<String>,
}

/// Immutable status snapshot published after every change.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub task_id: RunId,
    pub requirement: String,
    pub phase: RunPhase,
    pub current_team: Option<TeamId>,
    pub activities: Vec<Activity>,
    pub result: Option<RunOutput>,
    pub error: Option<String>,
}

/// How the run's participating teams are chosen.
#[derive(Debug, Clone)]
pub enum TeamSelection {
    /// The whole roster, in canonical order.
    Full,
    /// An explicit subset; unknown names are rejected up front and the
    /// canonical relative order is preserved.
    Explicit(Vec<String>),
    /// Keyword routing over the requirement plus the always-on core teams.
    Auto,
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub requirement: String,
    pub selection: TeamSelection,
}

/// Handle to a run for external polling.
#[derive(Clone)]
pub struct RunHandle {
    id: RunId,
    status_rx: watch::Receiver<RunStatus>,
}

impl RunHandle {
    pub fn id(&self) -> RunId {
        self.id
    }

    /// Latest published snapshot.
    pub fn status(&self) -> RunStatus {
        self.status_rx.borrow().clone()
    }

    /// Wait until the run reaches a terminal phase.
    pub async fn wait(&mut self) -> Result<RunStatus, CadenceError> {
        loop {
            {
                let status = self.status_rx.borrow_and_update();
                if status.phase.is_terminal() {
                    return Ok(status.clone());
                }
            }
            self.status_rx
                .changed()
                .await
                .map_err(|_| CadenceError::ChannelClosed)?;
        }
    }
}

/// Internal progress events pushed from the scheduler task to the status
/// publisher.
enum RunEvent {
    WaveStarted(Vec<TeamId>),
    StageCompleted { team: TeamId, activity_update: Box<Activity> },
}

/// The top-level pipeline driver.
pub struct Orchestrator {
    registry: Arc<TeamRegistry>,
    scheduler: Arc<WaveScheduler>,
    memory: Arc<dyn MemoryStore>,
    runs: RwLock<HashMap<RunId, RunHandle>>,
}

impl Orchestrator {
    pub fn new(
        generator: Option<Arc<dyn ContentGenerator>>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
    ) -> Self {
        Self::with_config(generator, tools, memory, SchedulerConfig::default())
    }

    pub fn with_config(
        generator: Option<Arc<dyn ContentGenerator>>,
        tools: Arc<dyn ToolExecutor>,
        memory: Arc<dyn MemoryStore>,
        config: SchedulerConfig,
    ) -> Self {
        let registry = Arc::new(TeamRegistry::new());
        let stages = Arc::new(StageExecutor::new(
            Arc::clone(&registry),
            generator,
            tools,
            Arc::clone(&memory),
        ));
        let scheduler = Arc::new(WaveScheduler::new(Arc::clone(&registry), stages, config));
        Self {
            registry,
            scheduler,
            memory,
            runs: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &TeamRegistry {
        &self.registry
    }

    /// Resolve the ordered team list for a request.
    pub fn select_teams(&self, request: &RunRequest) -> Result<Vec<TeamId>, CadenceError> {
        match &request.selection {
            TeamSelection::Full => Ok(self.registry.roster().to_vec()),
            TeamSelection::Explicit(names) => {
                let mut picked = Vec::with_capacity(names.len());
                for name in names {
                    picked.push(name.parse::<TeamId>()?);
                }
                let ordered: Vec<TeamId> = self
                    .registry
                    .roster()
                    .iter()
                    .filter(|t| picked.contains(t))
                    .copied()
                    .collect();
                if ordered.is_empty() {
                    return Err(CadenceError::EmptySelection);
                }
                Ok(ordered)
            }
            TeamSelection::Auto => {
                let lowered = request.requirement.to_lowercase();
                let mut selected: Vec<TeamId> = self.registry.core_teams().to_vec();
                for team in self.registry.roster() {
                    let config = self.registry.config(*team);
                    if config.keywords.iter().any(|kw| lowered.contains(kw)) {
                        selected.push(*team);
                    }
                }
                let ordered: Vec<TeamId> = self
                    .registry
                    .roster()
                    .iter()
                    .filter(|t| selected.contains(t))
                    .copied()
                    .collect();
                info!(teams = ?ordered, "keyword-routed team selection");
                Ok(ordered)
            }
        }
    }

    /// Accept a run, spawn its driver task, and return a poll-able handle.
    #[instrument(skip_all)]
    pub fn start_run(&self, request: RunRequest) -> Result<RunHandle, CadenceError> {
        let selection = self.select_teams(&request)?;
        let id = RunId::new();
        let initial = RunStatus {
            task_id: id,
            requirement: request.requirement.clone(),
            phase: RunPhase::Pending,
            current_team: None,
            activities: selection.iter().map(|t| Activity::pending(*t)).collect(),
            result: None,
            error: None,
        };
        let (status_tx, status_rx) = watch::channel(initial.clone());
        let handle = RunHandle { id, status_rx };
        self.runs.write().insert(id, handle.clone());

        info!(run = %id, teams = selection.len(), "run accepted");

        let scheduler = Arc::clone(&self.scheduler);
        let memory = Arc::clone(&self.memory);
        let requirement = request.requirement;
        tokio::spawn(drive_run(
            scheduler, memory, selection, requirement, initial, status_tx,
        ));

        Ok(handle)
    }

    pub fn get_run(&self, id: &RunId) -> Option<RunHandle> {
        self.runs.read().get(id).cloned()
    }

    pub fn run_status(&self, id: &RunId) -> Result<RunStatus, CadenceError> {
        self.runs
            .read()
            .get(id)
            .map(|h| h.status())
            .ok_or(CadenceError::RunNotFound(*id))
    }

    pub fn run_ids(&self) -> Vec<RunId> {
        self.runs.read().keys().copied().collect()
    }
}

/// Run driver: executes the scheduler on a worker task, applies its
/// progress events to a local status copy, and publishes a fresh snapshot
/// after every change. A worker panic turns into a terminal `failed`
/// status rather than a stuck run.
async fn drive_run(
    scheduler: Arc<WaveScheduler>,
    memory: Arc<dyn MemoryStore>,
    selection: Vec<TeamId>,
    requirement: String,
    initial: RunStatus,
    status_tx: watch::Sender<RunStatus>,
) {
    let mut status = initial;
    status.phase = RunPhase::Running;
    let _ = status_tx.send(status.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let worker_selection = selection.clone();
    let worker = tokio::spawn(async move {
        let results = scheduler
            .run(&worker_selection, &requirement, |event| {
                let _ = event_tx.send(to_run_event(event));
            })
            .await;

        // Retain a one-line stage summary per team for future recalls
        for (team, result) in &results {
            let summary = format!(
                "stage={team} artifact_lines={}: {}",
                result.artifact.lines().count(),
                preview(&result.artifact, 120).replace('\n', " "),
            );
            memory.retain(&format!("team-{team}"), summary).await;
        }

        reconcile(&worker_selection, results)
    });

    // event_tx lives inside the worker's closure; the channel drains dry
    // once the scheduler is done.
    while let Some(event) = event_rx.recv().await {
        apply_event(&mut status, event);
        let _ = status_tx.send(status.clone());
    }

    match worker.await {
        Ok(output) => {
            info!(run = %status.task_id, handoff_ok = output.overall_handoff_ok, "run completed");
            status.phase = RunPhase::Completed;
            status.current_team = None;
            status.result = Some(output);
        }
        Err(err) => {
            warn!(run = %status.task_id, error = %err, "run driver crashed");
            status.phase = RunPhase::Failed;
            status.current_team = None;
            status.error =
                Some(CadenceError::Scheduler(format!("run task failed: {err}")).to_string());
        }
    }
    let _ = status_tx.send(status);
}

fn to_run_event(event: WaveEvent<'_>) -> RunEvent {
    match event {
        WaveEvent::WaveStarted { teams, .. } => RunEvent::WaveStarted(teams.to_vec()),
        WaveEvent::StageCompleted { team, result } => RunEvent::StageCompleted {
            team,
            activity_update: Box::new(activity_from_result(result)),
        },
    }
}

fn activity_from_result(result: &StageResult) -> Activity {
    Activity {
        team: result.team,
        status: ActivityStatus::Complete,
        action: extract_action(&result.artifact),
        artifact_preview: preview(&result.artifact, 120).replace('\n', " "),
        tools_used: result
            .tool_outcomes
            .iter()
            .map(|o| ToolSummary {
                tool: o.tool.as_str().to_string(),
                action: o.action.clone(),
                success: o.success,
            })
            .collect(),
        blocked: result.blocked,
        block_reason: result.block_reason.clone(),
    }
}

fn apply_event(status: &mut RunStatus, event: RunEvent) {
    match event {
        RunEvent::WaveStarted(teams) => {
            status.current_team = teams.first().copied();
            for activity in status.activities.iter_mut() {
                if teams.contains(&activity.team) {
                    activity.status = ActivityStatus::InProgress;
                }
            }
        }
        RunEvent::StageCompleted { team, activity_update } => {
            if let Some(slot) = status.activities.iter_mut().find(|a| a.team == team) {
                *slot = *activity_update;
            }
        }
    }
}

/// Post-run reconciliation: handoff audit plus the unified code tree.
fn reconcile(selection: &[TeamId], results: BTreeMap<TeamId, StageResult>) -> RunOutput {
    let artifacts: BTreeMap<TeamId, String> = results
        .iter()
        .map(|(team, r)| (*team, r.artifact.clone()))
        .collect();
    let (handoffs, overall_handoff_ok) = validate_handoffs(selection, &artifacts);

    let mut code_files: BTreeMap<TeamId, BTreeMap<String, String>> = BTreeMap::new();
    let mut unified_code: BTreeMap<String, String> = BTreeMap::new();
    let mut file_attribution: BTreeMap<String, TeamId> = BTreeMap::new();
    for (team, result) in &results {
        if result.code_files.is_empty() {
            continue;
        }
        code_files.insert(*team, result.code_files.clone());
        for (name, content) in &result.code_files {
            unified_code.insert(name.clone(), content.clone());
            file_attribution.insert(name.clone(), *team);
        }
    }

    let (qa_verdict, qa_issues) = results
        .values()
        .find(|r| r.qa_verdict.is_some())
        .map(|r| (r.qa_verdict, r.qa_issues.clone()))
        .unwrap_or((None, Vec::new()));

    RunOutput {
        artifacts,
        code_files,
        unified_code,
        file_attribution,
        handoffs,
        overall_handoff_ok,
        qa_verdict,
        qa_issues,
    }
}
