use crate::config::OrchestratorConfig;
use crate::executor::{
    agent_progress_key, agent_status_key, phase_output_key, phase_status_key, PhaseExecutor,
};
use crate::monitor::AgentMonitor;
use crate::types::{AgentStatus, OrchestrationResult};
use cohort_core::{
    AgentId, CohortError, CohortResult, CompletionStatus, CoordinationMessage, MessageKind,
    PlanPhase,
};
use cohort_planner::{AgentDependencyGraph, SubAgentDefinition};
use cohort_state::SharedStateStore;
use futures_util::FutureExt;
use serde_json::json;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Writer recorded on store keys the orchestrator itself sets.
const ORCHESTRATOR_WRITER: &str = "orchestrator";
const TIMEOUT_REASON: &str = "timeout";

/// Runs an [`AgentDependencyGraph`] layer by layer.
///
/// Agents inside a layer run concurrently, bounded by a semaphore; a layer
/// starts only after every agent of the previous one has finished. Agent
/// status is derived from the coordination messages agents publish to the
/// shared store.
pub struct Orchestrator {
    store: Arc<SharedStateStore>,
    executor: Arc<dyn PhaseExecutor>,
    monitor: Arc<AgentMonitor>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Orchestrator with default limits.
    pub fn new(store: Arc<SharedStateStore>, executor: Arc<dyn PhaseExecutor>) -> Self {
        Self {
            store,
            executor,
            monitor: Arc::new(AgentMonitor::new()),
            config: OrchestratorConfig::default(),
        }
    }

    /// Replace the runtime limits.
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the agent monitor.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// The store agents coordinate through.
    pub fn store(&self) -> &Arc<SharedStateStore> {
        &self.store
    }

    /// Active runtime limits.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run `graph` with the configured concurrency and timeout.
    pub async fn run(&self, graph: &AgentDependencyGraph) -> CohortResult<OrchestrationResult> {
        self.config.validate()?;
        self.orchestrate(
            graph,
            self.config.max_concurrent_agents,
            self.config.timeout(),
        )
        .await
    }

    /// Run `graph` to completion, failure isolation included.
    ///
    /// An agent is skipped when any of its dependencies did not complete.
    /// When `timeout` elapses, running agents are cancelled and reported as
    /// failed, and agents that never started are skipped. Returns `Err`
    /// only for a malformed graph or a zero concurrency limit; agent failures
    /// are reported in the result.
    pub async fn orchestrate(
        &self,
        graph: &AgentDependencyGraph,
        max_concurrent_agents: usize,
        timeout: Duration,
    ) -> CohortResult<OrchestrationResult> {
        graph.validate()?;
        if max_concurrent_agents == 0 {
            return Err(CohortError::Validation(
                "max_concurrent_agents must be at least 1".into(),
            ));
        }

        let started = Instant::now();
        let mut run = RunState::new(graph);
        self.monitor.register(graph).await;
        let (watch_id, mut messages) = self.store.watch_messages();

        let cancel = CancellationToken::new();
        let finished = CancellationToken::new();
        let _finished_guard = finished.clone().drop_guard();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => cancel.cancel(),
                    () = finished.cancelled() => {}
                }
            }
        });
        let semaphore = Arc::new(Semaphore::new(max_concurrent_agents));

        info!(
            goal_id = %graph.goal_id,
            agents = graph.len(),
            layers = graph.execution_order.len(),
            max_concurrent_agents,
            timeout_secs = timeout.as_secs(),
            "Orchestration started"
        );

        for (index, layer) in graph.execution_order.iter().enumerate() {
            info!(layer = index, agents = layer.len(), "Layer started");
            let mut tasks = JoinSet::new();

            for agent_id in layer {
                let Some(agent) = graph.agent(agent_id) else {
                    continue;
                };
                if let Some(reason) = run.blocked_reason(agent) {
                    self.skip(agent_id, reason, &mut run).await;
                    continue;
                }
                if cancel.is_cancelled() {
                    self.skip(agent_id, "run timed out before the agent started".into(), &mut run)
                        .await;
                    continue;
                }

                let permit = tokio::select! {
                    permit = Arc::clone(&semaphore).acquire_owned() => permit,
                    () = cancel.cancelled() => {
                        self.skip(agent_id, "run timed out before the agent started".into(), &mut run)
                            .await;
                        continue;
                    }
                };
                let Ok(permit) = permit else {
                    self.skip(agent_id, "concurrency limiter closed".into(), &mut run)
                        .await;
                    continue;
                };

                info!(agent_id = %agent.id, role = %agent.role, phases = agent.phases.len(), "Starting agent");
                run.statuses.insert(agent_id.clone(), AgentStatus::Running);
                let task = AgentRun {
                    agent: agent.clone(),
                    store: Arc::clone(&self.store),
                    executor: Arc::clone(&self.executor),
                    cancel: cancel.child_token(),
                };
                tasks.spawn(async move {
                    let _permit = permit;
                    task.execute().await;
                });
                self.absorb(&mut messages, &mut run).await;
            }

            self.join_layer(&mut tasks, &cancel, &mut messages, &mut run)
                .await;

            for agent_id in layer {
                if run.statuses.get(agent_id) == Some(&AgentStatus::Running) {
                    let reason = if cancel.is_cancelled() {
                        TIMEOUT_REASON.to_string()
                    } else {
                        "agent task ended without reporting a result".to_string()
                    };
                    self.force_fail(agent_id, reason, &mut run).await;
                }
            }
            info!(layer = index, "Layer finished");
        }

        self.absorb(&mut messages, &mut run).await;
        self.store.unsubscribe(watch_id);

        let result = run.into_result(graph, started.elapsed(), cancel.is_cancelled());
        info!(
            success = result.success,
            duration_ms = result.duration_ms,
            "{}",
            result.summary
        );
        Ok(result)
    }

    /// Wait for every task of a layer, applying the cancellation grace period.
    async fn join_layer(
        &self,
        tasks: &mut JoinSet<()>,
        cancel: &CancellationToken,
        messages: &mut mpsc::UnboundedReceiver<CoordinationMessage>,
        run: &mut RunState,
    ) {
        let mut deadline: Option<tokio::time::Instant> = None;
        let mut aborted = false;

        loop {
            let joined = if aborted {
                tasks.join_next().await
            } else if let Some(deadline) = deadline {
                let within_grace = tokio::time::timeout_at(deadline, tasks.join_next()).await;
                match within_grace {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(
                            remaining = tasks.len(),
                            "Agents ignored cancellation, aborting their tasks"
                        );
                        tasks.abort_all();
                        aborted = true;
                        continue;
                    }
                }
            } else {
                tokio::select! {
                    joined = tasks.join_next() => joined,
                    () = cancel.cancelled() => {
                        warn!(running = tasks.len(), "Run timed out, cancelling agents");
                        deadline = Some(tokio::time::Instant::now() + self.config.cancel_grace());
                        continue;
                    }
                }
            };

            match joined {
                None => break,
                Some(Ok(())) => {}
                Some(Err(e)) if e.is_panic() => error!(error = %e, "Agent task panicked"),
                Some(Err(e)) => debug!(error = %e, "Agent task aborted"),
            }
            self.absorb(messages, run).await;
        }
    }

    /// Drain every message published so far.
    async fn absorb(
        &self,
        messages: &mut mpsc::UnboundedReceiver<CoordinationMessage>,
        run: &mut RunState,
    ) {
        while let Ok(message) = messages.try_recv() {
            self.observe(&message, run).await;
        }
    }

    async fn observe(&self, message: &CoordinationMessage, run: &mut RunState) {
        let sender = message.sender();
        if !run.statuses.contains_key(sender) {
            return;
        }
        self.monitor.record_message(sender).await;

        match message.kind() {
            MessageKind::AgentStarted { .. } => {
                if run.mark(sender, AgentStatus::Running) {
                    self.monitor.set_status(sender, AgentStatus::Running).await;
                }
            }
            MessageKind::PhaseStarted { phase_name, .. } => {
                self.monitor.start_phase(sender, phase_name).await;
            }
            MessageKind::PhaseCompleted { duration_secs, .. } => {
                let ms = duration_secs.map_or(0, |s| (s * 1000.0) as u64);
                self.monitor.complete_phase(sender, ms).await;
            }
            MessageKind::PhaseFailed { .. } => {
                self.monitor.record_error(sender).await;
            }
            MessageKind::AgentCompleted { outputs, .. } => {
                if run.mark(sender, AgentStatus::Completed) {
                    info!(agent_id = %sender, "Agent completed");
                    if let Some(outputs) = outputs {
                        run.outputs.insert(sender.to_string(), outputs.clone());
                    }
                    self.monitor.set_status(sender, AgentStatus::Completed).await;
                }
            }
            MessageKind::AgentFailed { error, .. } => {
                let status = AgentStatus::Failed {
                    reason: error.clone(),
                };
                if run.mark(sender, status.clone()) {
                    error!(agent_id = %sender, reason = %error, "Agent failed");
                    self.monitor.set_status(sender, status).await;
                }
            }
            _ => {}
        }
    }

    async fn skip(&self, agent_id: &str, reason: String, run: &mut RunState) {
        warn!(agent_id, %reason, "Skipping agent");
        self.store
            .set(&agent_status_key(agent_id), json!("skipped"), ORCHESTRATOR_WRITER);
        let status = AgentStatus::Skipped { reason };
        self.monitor.set_status(agent_id, status.clone()).await;
        run.statuses.insert(agent_id.to_string(), status);
    }

    /// Fail an agent whose task ended without a terminal message.
    async fn force_fail(&self, agent_id: &str, reason: String, run: &mut RunState) {
        error!(agent_id, %reason, "Agent did not report a result");
        self.store
            .set(&agent_status_key(agent_id), json!("failed"), ORCHESTRATOR_WRITER);
        publish(&self.store, CoordinationMessage::agent_failed(agent_id, &reason));
        let status = AgentStatus::Failed { reason };
        self.monitor.set_status(agent_id, status.clone()).await;
        run.statuses.insert(agent_id.to_string(), status);
    }
}

/// Orchestrator-owned status table for one run.
struct RunState {
    statuses: HashMap<AgentId, AgentStatus>,
    outputs: BTreeMap<AgentId, serde_json::Value>,
}

impl RunState {
    fn new(graph: &AgentDependencyGraph) -> Self {
        Self {
            statuses: graph
                .agents
                .iter()
                .map(|a| (a.id.clone(), AgentStatus::Pending))
                .collect(),
            outputs: BTreeMap::new(),
        }
    }

    /// Move a non-terminal agent to `status`. Returns false if it had
    /// already finished.
    fn mark(&mut self, agent_id: &str, status: AgentStatus) -> bool {
        match self.statuses.get_mut(agent_id) {
            Some(current) if !current.is_terminal() => {
                *current = status;
                true
            }
            _ => false,
        }
    }

    /// Why `agent` cannot start, if one of its dependencies did not complete.
    fn blocked_reason(&self, agent: &SubAgentDefinition) -> Option<String> {
        agent.dependencies.iter().find_map(|dep| {
            match self.statuses.get(dep) {
                Some(AgentStatus::Completed) => None,
                Some(AgentStatus::Failed { .. }) => Some(format!("dependency {dep} failed")),
                Some(AgentStatus::Skipped { .. }) => Some(format!("dependency {dep} was skipped")),
                _ => Some(format!("dependency {dep} did not complete")),
            }
        })
    }

    fn into_result(
        mut self,
        graph: &AgentDependencyGraph,
        elapsed: Duration,
        timed_out: bool,
    ) -> OrchestrationResult {
        let mut completed_agents = Vec::new();
        let mut failed_agents = BTreeMap::new();
        let mut skipped_agents = BTreeMap::new();
        let mut statuses = BTreeMap::new();

        for agent in &graph.agents {
            let status = match self.statuses.remove(&agent.id) {
                Some(status) if status.is_terminal() => status,
                _ => AgentStatus::Skipped {
                    reason: "never scheduled".into(),
                },
            };
            match &status {
                AgentStatus::Completed => completed_agents.push(agent.id.clone()),
                AgentStatus::Failed { reason } => {
                    failed_agents.insert(agent.id.clone(), reason.clone());
                }
                AgentStatus::Skipped { reason } => {
                    skipped_agents.insert(agent.id.clone(), reason.clone());
                }
                AgentStatus::Pending | AgentStatus::Running => {}
            }
            statuses.insert(agent.id.clone(), status);
        }

        let summary = format!(
            "Orchestration complete: {}/{} agents completed, {} failed, {} skipped{}",
            completed_agents.len(),
            graph.len(),
            failed_agents.len(),
            skipped_agents.len(),
            if timed_out { " (timed out)" } else { "" },
        );

        OrchestrationResult {
            success: failed_agents.is_empty() && skipped_agents.is_empty(),
            completed_agents,
            failed_agents,
            skipped_agents,
            statuses,
            agent_outputs: self.outputs,
            timed_out,
            duration_ms: elapsed.as_millis() as u64,
            summary,
        }
    }
}

/// One agent's sequential walk through its phases.
struct AgentRun {
    agent: SubAgentDefinition,
    store: Arc<SharedStateStore>,
    executor: Arc<dyn PhaseExecutor>,
    cancel: CancellationToken,
}

impl AgentRun {
    /// Run all phases; a panic is contained and reported as a failure.
    async fn execute(self) {
        if let Err(panic) = AssertUnwindSafe(self.run_phases()).catch_unwind().await {
            let reason = format!("agent task aborted: {}", panic_message(panic.as_ref()));
            error!(agent_id = %self.agent.id, %reason, "Agent panicked");
            self.fail(&reason);
        }
    }

    async fn run_phases(&self) {
        let id = self.agent.id.as_str();
        let total = self.agent.phases.len();

        publish(
            &self.store,
            CoordinationMessage::agent_started(
                id,
                &self.agent.name,
                Some(self.agent.role.to_string()),
                self.agent.required_capabilities(),
            ),
        );
        self.store.set(&agent_status_key(id), json!("running"), id);
        self.store.set(&agent_progress_key(id), json!(0.0), id);

        let mut outputs = serde_json::Map::new();
        for (index, phase) in self.agent.phases.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.fail_phase(phase, TIMEOUT_REASON);
                return;
            }

            publish(
                &self.store,
                CoordinationMessage::phase_started(id, &phase.name, index, total),
            );
            self.store
                .set(&phase_status_key(&phase.name), json!("running"), id);
            debug!(agent_id = %id, phase = %phase.name, "Executing phase");

            let phase_started = Instant::now();
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(TIMEOUT_REASON.to_string()),
                result = self.executor.execute_phase(&self.agent, phase, &self.store) => {
                    result.map_err(|e| e.to_string())
                }
            };

            let output = match result {
                Ok(output) => output,
                Err(reason) => {
                    self.fail_phase(phase, &reason);
                    return;
                }
            };

            let output_key = phase_output_key(&phase.name);
            self.store.set(&output_key, output.clone(), id);
            self.store
                .set(&phase_status_key(&phase.name), json!("completed"), id);
            publish(
                &self.store,
                CoordinationMessage::phase_completed(
                    id,
                    &phase.name,
                    true,
                    Some(phase_started.elapsed().as_secs_f64()),
                    None,
                ),
            );
            publish(
                &self.store,
                CoordinationMessage::data_available(
                    id,
                    output_key,
                    Some("json".into()),
                    Some(json!({ "phase": phase.name })),
                ),
            );
            self.store.set(
                &agent_progress_key(id),
                json!((index + 1) as f64 / total as f64),
                id,
            );
            outputs.insert(phase.name.clone(), output);
        }

        self.store.set(&agent_status_key(id), json!("completed"), id);
        self.store.set(&agent_progress_key(id), json!(1.0), id);
        publish(
            &self.store,
            CoordinationMessage::agent_completed(
                id,
                CompletionStatus::Success,
                Some(format!("{total} phases completed")),
                Some(serde_json::Value::Object(outputs)),
            ),
        );
    }

    fn fail_phase(&self, phase: &PlanPhase, reason: &str) {
        let id = self.agent.id.as_str();
        warn!(agent_id = %id, phase = %phase.name, %reason, "Phase failed");
        self.store
            .set(&phase_status_key(&phase.name), json!("failed"), id);
        publish(
            &self.store,
            CoordinationMessage::phase_failed(id, &phase.name, reason),
        );
        if reason == TIMEOUT_REASON {
            self.fail(TIMEOUT_REASON);
        } else {
            self.fail(&format!("phase {} failed: {reason}", phase.name));
        }
    }

    fn fail(&self, reason: &str) {
        let id = self.agent.id.as_str();
        self.store.set(&agent_status_key(id), json!("failed"), id);
        publish(&self.store, CoordinationMessage::agent_failed(id, reason));
    }
}

fn publish(store: &SharedStateStore, message: CohortResult<CoordinationMessage>) {
    if let Err(e) = message.and_then(|m| store.publish_message(m)) {
        warn!(error = %e, "Dropping invalid coordination message");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
