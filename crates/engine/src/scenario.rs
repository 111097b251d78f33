//! Scenario runner – execute scripted flows from YAML files.
//!
//! Steps run in order. `call` steps that start a task remember its id so
//! a later `await_task: "$last"` can wait for the task to settle.

use crate::commands::CommandRegistry;
use crate::context::AppContext;
use crate::probes;
use crate::types::*;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

const LAST_TASK: &str = "$last";

/// Load a scenario from a YAML string.
pub fn load_scenario(yaml: &str) -> Result<Scenario, String> {
    serde_yaml::from_str(yaml).map_err(|e| format!("failed to parse scenario YAML: {}", e))
}

/// Terminal statuses seen so far, fed from a registry subscription taken
/// before the first step so no settlement is missed.
struct SettledTasks {
    events: mpsc::UnboundedReceiver<TaskEvent>,
    settled: HashMap<TaskId, TaskStatus>,
}

impl SettledTasks {
    fn record(&mut self, event: TaskEvent) {
        let status = match &event {
            TaskEvent::Result { result, .. } => Some(result.status()),
            TaskEvent::Update(update) => update.status.filter(|s| s.is_terminal()),
            _ => None,
        };
        if let Some(status) = status {
            self.settled.insert(event.task_id(), status);
        }
    }

    async fn wait(&mut self, id: TaskId) -> Option<TaskStatus> {
        while let Ok(event) = self.events.try_recv() {
            self.record(event);
        }
        loop {
            if let Some(status) = self.settled.get(&id) {
                return Some(*status);
            }
            let event = self.events.recv().await?;
            self.record(event);
        }
    }
}

/// Execute a scenario and return the overall result.
pub async fn run_scenario(
    scenario: &Scenario,
    ctx: &AppContext,
    registry: &CommandRegistry,
) -> ScenarioResult {
    let (subscription, events) = ctx.registry().subscribe_channel();
    let mut settled = SettledTasks {
        events,
        settled: HashMap::new(),
    };
    let mut last_task: Option<TaskId> = None;
    let mut step_results = Vec::new();
    let mut overall = Status::Pass;

    for (i, step) in scenario.steps.iter().enumerate() {
        let result = match step {
            ScenarioStep::Call {
                call,
                args,
                expect_status,
                timeout_ms,
            } => {
                let limit = Duration::from_millis(*timeout_ms);
                let r = match tokio::time::timeout(limit, registry.execute(call, args.clone(), ctx))
                    .await
                {
                    Ok(r) => r,
                    Err(_) => result_err(
                        "call",
                        call,
                        &new_run_id(),
                        *timeout_ms,
                        ErrorCode::Timeout,
                        format!("{} did not finish within {}ms", call, timeout_ms),
                    ),
                };
                if let Some(id) = started_task(&r) {
                    last_task = Some(id);
                }
                let actual_status = serde_json::to_value(r.status)
                    .ok()
                    .and_then(|v| v.as_str().map(String::from))
                    .unwrap_or_default();
                if actual_status != *expect_status {
                    tracing::warn!(
                        step = i,
                        expected = %expect_status,
                        actual = %actual_status,
                        "scenario step status mismatch"
                    );
                    overall = Status::Fail;
                }
                r
            }
            ScenarioStep::AwaitTask {
                await_task,
                expect_status,
                timeout_ms,
            } => {
                let r = await_task_step(
                    await_task,
                    last_task,
                    *expect_status,
                    *timeout_ms,
                    &mut settled,
                )
                .await;
                if r.status != Status::Pass {
                    tracing::warn!(step = i, task = %await_task, "scenario task expectation failed");
                    overall = Status::Fail;
                }
                r
            }
            ScenarioStep::Probe { probe } => {
                let r = probes::run_probe(probe, ctx).await;
                if r.status != Status::Pass && r.status != Status::Skip {
                    overall = Status::Fail;
                }
                r
            }
        };
        step_results.push(result);
    }

    ctx.registry().unsubscribe(subscription);
    ScenarioResult {
        name: scenario.name.clone(),
        overall_status: overall,
        step_results,
    }
}

fn started_task(result: &CommandResult) -> Option<TaskId> {
    result
        .data
        .as_ref()?
        .get("task_id")?
        .as_str()?
        .parse()
        .ok()
}

async fn await_task_step(
    target: &str,
    last_task: Option<TaskId>,
    expect_status: TaskStatus,
    timeout_ms: u64,
    settled: &mut SettledTasks,
) -> CommandResult {
    let run_id = new_run_id();
    let start = Instant::now();

    let id = if target == LAST_TASK {
        last_task.ok_or_else(|| "no earlier step started a task".to_string())
    } else {
        target
            .parse::<TaskId>()
            .map_err(|e| format!("bad task id {}: {}", target, e))
    };
    let id = match id {
        Ok(id) => id,
        Err(message) => {
            return result_err("await_task", target, &run_id, 0, ErrorCode::InvalidInput, message)
        }
    };
    let label = id.to_string();

    let waited = tokio::time::timeout(Duration::from_millis(timeout_ms), settled.wait(id)).await;
    let elapsed = start.elapsed().as_millis() as u64;
    match waited {
        Ok(Some(status)) if status == expect_status => {
            let mut r = result_ok("await_task", &label, &run_id, elapsed);
            r.data = Some(serde_json::json!({ "status": status }));
            r
        }
        Ok(Some(status)) => {
            let mut r = result_ok("await_task", &label, &run_id, elapsed);
            r.status = Status::Fail;
            r.data = Some(serde_json::json!({ "status": status, "expected": expect_status }));
            r
        }
        Ok(None) => result_err(
            "await_task",
            &label,
            &run_id,
            elapsed,
            ErrorCode::InternalError,
            "task event stream closed",
        ),
        Err(_) => result_err(
            "await_task",
            &label,
            &run_id,
            elapsed,
            ErrorCode::Timeout,
            format!("task did not settle within {}ms", timeout_ms),
        ),
    }
}
