#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end runs: plan -> analyzer -> generator -> orchestrator -> store.

use async_trait::async_trait;
use cohort_core::{CohortResult, ExecutionPlan, GoalDefinition, MessageType, PlanPhase};
use cohort_orchestrator::*;
use cohort_planner::{AgentDependencyGraph, CoordinationAnalyzer, SubAgentDefinition, SubAgentGenerator};
use cohort_state::{read_snapshot, SharedStateStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn phase(name: &str, domain: &str, deps: &[&str]) -> PlanPhase {
    PlanPhase::new(name, format!("Run {name}"))
        .with_capabilities([format!("{domain}-work")])
        .with_dependencies(deps.iter().copied())
}

fn graph_for(plan: &ExecutionPlan) -> AgentDependencyGraph {
    let strategy = CoordinationAnalyzer::default().analyze(plan);
    SubAgentGenerator::new()
        .generate(&GoalDefinition::new(&plan.goal_id, "e2e"), plan, &[], &strategy)
        .unwrap()
}

/// a -> b -> c, one agent per phase.
fn chain() -> AgentDependencyGraph {
    let graph = graph_for(&ExecutionPlan::new(
        "chain",
        vec![
            phase("a", "alpha", &[]),
            phase("b", "beta", &["a"]),
            phase("c", "gamma", &["b"]),
        ],
    ));
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.execution_order.len(), 3);
    graph
}

fn orchestrator(executor: impl PhaseExecutor + 'static) -> Orchestrator {
    Orchestrator::new(Arc::new(SharedStateStore::new()), Arc::new(executor))
}

fn fast() -> SimulatedExecutor {
    SimulatedExecutor::new(Duration::from_millis(5))
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_agent_skips_its_dependents() {
    let graph = chain();
    let orch = orchestrator(fast().with_failing_phase("b"));
    let result = orch.run(&graph).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.completed_agents, vec!["agent-1"]);
    assert!(result.failed_agents["agent-2"].contains("simulated failure"));
    assert_eq!(result.skipped_agents["agent-3"], "dependency agent-2 failed");
    assert!(!result.timed_out);

    let store = orch.store();
    assert_eq!(store.get("agent.agent-2.status"), Some(json!("failed")));
    assert_eq!(store.get("agent.agent-3.status"), Some(json!("skipped")));
    assert_eq!(store.get("phase.b.status"), Some(json!("failed")));
    assert!(store.get("phase.c.status").is_none());
    assert_eq!(
        store
            .get_messages(Some("agent-3"), Some(MessageType::AgentStarted))
            .len(),
        0
    );
}

#[tokio::test]
async fn unrelated_agents_keep_running_after_a_failure() {
    // a -> b, c independent
    let graph = graph_for(&ExecutionPlan::new(
        "fork",
        vec![
            phase("a", "alpha", &[]),
            phase("b", "beta", &["a"]),
            phase("c", "gamma", &[]),
        ],
    ));
    let orch = orchestrator(fast().with_failing_phase("a"));
    let result = orch.run(&graph).await.unwrap();

    assert!(!result.success);
    assert_eq!(result.completed_agents, vec!["agent-3"]);
    assert!(result.failed_agents.contains_key("agent-1"));
    assert!(result.skipped_agents.contains_key("agent-2"));
    assert_eq!(result.total_agents(), 3);
    assert!(result.summary.contains("1/3 agents completed, 1 failed, 1 skipped"));
}

/// Panics inside a chosen phase.
struct PanickingExecutor {
    phase: &'static str,
}

#[async_trait]
impl PhaseExecutor for PanickingExecutor {
    async fn execute_phase(
        &self,
        _agent: &SubAgentDefinition,
        phase: &PlanPhase,
        _store: &SharedStateStore,
    ) -> CohortResult<serde_json::Value> {
        if phase.name == self.phase {
            panic!("executor exploded in {}", phase.name);
        }
        Ok(json!({ "phase": phase.name }))
    }
}

#[tokio::test]
async fn panicking_agent_is_contained() {
    let graph = chain();
    let orch = orchestrator(PanickingExecutor { phase: "b" });
    let result = orch.run(&graph).await.unwrap();

    assert_eq!(result.completed_agents, vec!["agent-1"]);
    let reason = &result.failed_agents["agent-2"];
    assert!(reason.starts_with("agent task aborted: "));
    assert!(reason.contains("executor exploded in b"));
    assert!(result.skipped_agents.contains_key("agent-3"));

    let failures = orch
        .store()
        .get_messages(Some("agent-2"), Some(MessageType::AgentFailed));
    assert_eq!(failures.len(), 1);
}

// ---------------------------------------------------------------------------
// Concurrency and timeouts
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Gauge {
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// Records the highest number of phases running at once.
struct RecordingExecutor(Arc<Gauge>);

#[async_trait]
impl PhaseExecutor for RecordingExecutor {
    async fn execute_phase(
        &self,
        _agent: &SubAgentDefinition,
        phase: &PlanPhase,
        _store: &SharedStateStore,
    ) -> CohortResult<serde_json::Value> {
        let now = self.0.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.0.running.fetch_sub(1, Ordering::SeqCst);
        Ok(json!({ "phase": phase.name }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_the_limit() {
    let domains = ["alpha", "beta", "gamma", "delta", "epsilon", "zeta"];
    let phases = domains
        .iter()
        .enumerate()
        .map(|(i, d)| phase(&format!("p{i}"), d, &[]))
        .collect();
    let graph = graph_for(&ExecutionPlan::new("wide", phases));
    assert_eq!(graph.execution_order.len(), 1);
    assert_eq!(graph.execution_order[0].len(), 6);

    let gauge = Arc::new(Gauge::default());
    let orch = orchestrator(RecordingExecutor(Arc::clone(&gauge)));
    let result = orch
        .orchestrate(&graph, 2, Duration::from_secs(30))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.completed_agents.len(), 6);
    let peak = gauge.peak.load(Ordering::SeqCst);
    assert!(peak <= 2, "peak concurrency was {peak}");
    assert!(peak >= 1);
}

#[tokio::test]
async fn timeout_fails_running_agents_and_skips_the_rest() {
    let graph = chain();
    let orch = orchestrator(SimulatedExecutor::new(Duration::from_secs(30))).with_config(
        OrchestratorConfig {
            cancel_grace_ms: 50,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let result = orch
        .orchestrate(&graph, 5, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(result.timed_out);
    assert!(!result.success);
    assert_eq!(result.failed_agents["agent-1"], "timeout");
    assert!(result.skipped_agents.contains_key("agent-2"));
    assert!(result.skipped_agents.contains_key("agent-3"));
    assert!(result.summary.ends_with("(timed out)"));
    assert_eq!(orch.store().get("phase.a.status"), Some(json!("failed")));
}

/// Four independent agents in one layer: agent-1..agent-4.
fn wide_layer() -> AgentDependencyGraph {
    let graph = graph_for(&ExecutionPlan::new(
        "wide",
        vec![
            phase("a", "alpha", &[]),
            phase("b", "beta", &[]),
            phase("c", "gamma", &[]),
            phase("d", "delta", &[]),
        ],
    ));
    assert_eq!(graph.execution_order.len(), 1);
    assert_eq!(graph.execution_order[0].len(), 4);
    graph
}

#[tokio::test]
async fn queued_agents_are_admitted_in_generation_order() {
    let graph = wide_layer();
    let orch = orchestrator(fast());
    let result = orch
        .orchestrate(&graph, 1, Duration::from_secs(30))
        .await
        .unwrap();
    assert!(result.success);

    let started = orch
        .store()
        .get_messages(None, Some(MessageType::AgentStarted));
    let order: Vec<&str> = started.iter().map(|m| m.sender()).collect();
    assert_eq!(order, vec!["agent-1", "agent-2", "agent-3", "agent-4"]);
}

#[tokio::test]
async fn timeout_while_queued_skips_waiting_agents() {
    let graph = wide_layer();
    let orch = orchestrator(SimulatedExecutor::new(Duration::from_secs(30))).with_config(
        OrchestratorConfig {
            cancel_grace_ms: 50,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let result = orch
        .orchestrate(&graph, 1, Duration::from_millis(100))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(result.timed_out);
    assert_eq!(result.failed_agents.len(), 1);
    assert_eq!(result.failed_agents["agent-1"], "timeout");
    for id in ["agent-2", "agent-3", "agent-4"] {
        assert_eq!(
            result.skipped_agents[id], "run timed out before the agent started",
            "{id}"
        );
        assert_eq!(orch.store().get(&agent_status_key(id)), Some(json!("skipped")));
    }
    let started = orch
        .store()
        .get_messages(None, Some(MessageType::AgentStarted));
    assert_eq!(started.len(), 1);
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

#[tokio::test]
async fn successful_run_leaves_outputs_and_messages() {
    let graph = chain();
    let orch = orchestrator(fast());
    let result = orch.run(&graph).await.unwrap();
    assert!(result.success);
    assert_eq!(result.completed_agents, vec!["agent-1", "agent-2", "agent-3"]);

    let store = orch.store();
    for name in ["a", "b", "c"] {
        assert!(store.get(&phase_output_key(name)).is_some());
        assert_eq!(store.get(&phase_status_key(name)), Some(json!("completed")));
    }
    assert_eq!(store.get("phase.c.output").unwrap()["inputs"], json!(["b"]));
    assert_eq!(store.get(&agent_status_key("agent-3")), Some(json!("completed")));

    let announced = store.get_messages(None, Some(MessageType::DataAvailable));
    assert_eq!(announced.len(), 3);
    let completions = store.get_messages(None, Some(MessageType::AgentCompleted));
    let order: Vec<&str> = completions.iter().map(|m| m.sender()).collect();
    assert_eq!(order, vec!["agent-1", "agent-2", "agent-3"]);
}

#[tokio::test]
async fn store_snapshot_after_run_round_trips() {
    let graph = chain();
    let orch = orchestrator(fast());
    orch.run(&graph).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    orch.store().persist_to(&path).await.unwrap();

    let snapshot = read_snapshot(&path).await.unwrap();
    assert!(snapshot.entries.iter().any(|e| e.key == "phase.b.output"));
    assert_eq!(snapshot.messages.len(), orch.store().message_count());

    let restored = SharedStateStore::new();
    restored.load(&path).await.unwrap();
    assert_eq!(restored.get("phase.b.output"), orch.store().get("phase.b.output"));
}

#[tokio::test]
async fn monitor_reports_every_agent() {
    let graph = chain();
    let orch = orchestrator(fast().with_failing_phase("c"));
    orch.run(&graph).await.unwrap();

    let json = orch.monitor().to_json().await;
    assert_eq!(json["agents"].as_array().unwrap().len(), 3);
    assert_eq!(json["aggregate"]["phases_completed"], 2);
    assert_eq!(json["aggregate"]["errors"], 1);
}
