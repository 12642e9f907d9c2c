//! Wave scheduler - dependency-ordered parallel execution
//!
//! The roster's dependency DAG is pre-flattened into a static wave list.
//! Within a wave every selected team runs concurrently under a bounded
//! permit pool; waves execute strictly sequentially, and the join at the
//! end of each wave is the barrier behind which knowledge is harvested.

use std::cmp;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::knowledge::KnowledgeLog;
use crate::stage::{StageInput, StageResult, StageRunner};
use crate::team::{TeamId, TeamRegistry};

/// Scheduler tunables, injected rather than ambient.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Most-recent-K window on the knowledge log, bounding prompt size.
    pub snapshot_window: usize,
    /// Upper bound on concurrent stages within one wave.
    pub max_wave_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            snapshot_window: 6,
            max_wave_concurrency: 5,
        }
    }
}

/// Progress events emitted while a run executes, in scheduler order.
pub enum WaveEvent<'a> {
    /// A wave is about to dispatch these teams concurrently.
    WaveStarted { wave: usize, teams: &'a [TeamId] },
    /// One team's stage finished (possibly degraded).
    StageCompleted { team: TeamId, result: &'a StageResult },
}

/// Executes a selected team list honoring wave order while maximizing
/// parallelism, propagating accumulated knowledge forward.
pub struct WaveScheduler {
    registry: Arc<TeamRegistry>,
    stages: Arc<dyn StageRunner>,
    config: SchedulerConfig,
}

impl WaveScheduler {
    pub fn new(
        registry: Arc<TeamRegistry>,
        stages: Arc<dyn StageRunner>,
        config: SchedulerConfig,
    ) -> Self {
        Self { registry, stages, config }
    }

    /// Run every selected team, wave by wave.
    ///
    /// A single stage's panic is converted to a degraded fallback result;
    /// it aborts neither its siblings nor later waves. Results come back
    /// keyed by team in canonical roster order.
    #[instrument(skip_all, fields(teams = selection.len()))]
    pub async fn run(
        &self,
        selection: &[TeamId],
        requirement: &str,
        mut on_event: impl FnMut(WaveEvent<'_>),
    ) -> BTreeMap<TeamId, StageResult> {
        let successor: HashMap<TeamId, TeamId> = selection
            .windows(2)
            .map(|pair| (pair[0], pair[1]))
            .collect();

        let mut knowledge = KnowledgeLog::new(self.config.snapshot_window);
        let mut directed: HashMap<TeamId, String> = HashMap::new();
        let mut results: BTreeMap<TeamId, StageResult> = BTreeMap::new();
        // Flat code tree merged across completed waves, handed to validators
        let mut upstream_code: BTreeMap<String, String> = BTreeMap::new();

        for (wave_idx, wave) in self.registry.waves().iter().enumerate() {
            let batch: Vec<TeamId> = wave
                .iter()
                .filter(|t| selection.contains(t))
                .copied()
                .collect();
            if batch.is_empty() {
                continue;
            }

            info!(wave = wave_idx + 1, teams = ?batch, "dispatching wave");
            on_event(WaveEvent::WaveStarted { wave: wave_idx + 1, teams: &batch });

            // Frozen for the duration of this wave's parallel phase
            let snapshot = knowledge.snapshot();
            let permits = cmp::min(batch.len(), self.config.max_wave_concurrency.max(1));
            let semaphore = Arc::new(Semaphore::new(permits));

            let mut handles = Vec::with_capacity(batch.len());
            for team in &batch {
                let team = *team;
                let stages = Arc::clone(&self.stages);
                let semaphore = Arc::clone(&semaphore);
                let input = StageInput {
                    team,
                    requirement: requirement.to_string(),
                    knowledge: snapshot.clone(),
                    next_team: successor.get(&team).copied(),
                    directed: directed.get(&team).cloned().unwrap_or_default(),
                    upstream_code: if self.registry.config(team).validates_upstream_code {
                        upstream_code.clone()
                    } else {
                        BTreeMap::new()
                    },
                };
                handles.push((
                    team,
                    tokio::spawn(async move {
                        let _permit = match semaphore.acquire_owned().await {
                            Ok(permit) => permit,
                            Err(_) => {
                                return StageResult::fallback(team, "scheduler permit pool closed")
                            }
                        };
                        stages.run_stage(input).await
                    }),
                ));
            }

            // Barrier: the wave completes only when every stage has joined.
            // Collected in dispatch order, not completion order.
            for (team, handle) in handles {
                let result = match handle.await {
                    Ok(result) => result,
                    Err(err) => {
                        warn!(team = %team, error = %err, "stage task crashed, substituting fallback");
                        StageResult::fallback(team, &format!("stage task failed: {err}"))
                    }
                };
                on_event(WaveEvent::StageCompleted { team, result: &result });
                results.insert(team, result);
            }

            // Harvest knowledge and directed notes behind the barrier; the
            // next wave's snapshot reflects exactly waves 1..N.
            for team in &batch {
                let Some(result) = results.get(team) else { continue };
                for (target, note) in &result.directed_notes {
                    directed.insert(*target, note.clone());
                }
                for (name, content) in &result.code_files {
                    upstream_code.insert(name.clone(), content.clone());
                }
                let config = self.registry.config(*team);
                if config.knowledge_producer && !result.decision_rationale.is_empty() {
                    knowledge.record(
                        *team,
                        config.display_name,
                        &result.decision_title,
                        &result.decision_rationale,
                    );
                    debug!(team = %team, "harvested knowledge entry");
                }
            }
        }

        results
    }
}
