//! In-memory task registry.
//!
//! Holds every live task record, enforces the
//! `pending -> running -> {completed, error, cancelled}` state machine and
//! publishes a [`TaskEvent`] for every accepted change. All operations on
//! an unknown or already-settled id degrade to silent no-ops, so late
//! callbacks racing completion can never resurrect a task.

use crate::tasks::signal::AbortSignal;
use crate::types::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub type Listener = Arc<dyn Fn(&TaskEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct TaskEntry {
    task: Task,
    controller: CancellationToken,
}

struct Inner {
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    listeners: Mutex<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
    grace_period: Duration,
}

/// Cheaply cloneable handle; clones share the same task map.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                grace_period,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Store a new `pending` task and publish `create`. Returns at once.
    pub fn create(&self, descriptor: TaskDescriptor) -> TaskId {
        let id = TaskId::new();
        let now = now_ms();
        let task = Task {
            id,
            kind: descriptor.kind,
            status: TaskStatus::Pending,
            progress: 0,
            message: descriptor.message,
            error: None,
            metadata: descriptor.metadata,
            created_at: now,
            updated_at: now,
        };

        let mut tasks = self.inner.tasks.lock();
        tasks.insert(
            id,
            TaskEntry {
                task: task.clone(),
                controller: CancellationToken::new(),
            },
        );
        tracing::debug!(task_id = %id, kind = ?task.kind, "task created");
        self.publish(&TaskEvent::Create(task));
        id
    }

    /// Record progress. The first call promotes `pending -> running`.
    pub fn progress(&self, id: TaskId, value: u8) {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = live_entry(&mut tasks, id) else {
            return;
        };
        let value = value.min(100);
        entry.task.progress = value;
        if entry.task.status == TaskStatus::Pending {
            entry.task.status = TaskStatus::Running;
        }
        entry.task.updated_at = now_ms();
        self.publish(&TaskEvent::Progress {
            id,
            progress: value,
        });
    }

    /// Apply a non-terminal patch. Terminal statuses are only reachable
    /// through [`result`](Self::result) and [`cancel`](Self::cancel), so a
    /// patch carrying one (or a backwards edge) has its status dropped.
    pub fn update(&self, update: TaskUpdate) {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = live_entry(&mut tasks, update.id) else {
            return;
        };

        let mut accepted = update;
        if let Some(next) = accepted.status.filter(|s| *s != entry.task.status) {
            if !next.is_terminal() && entry.task.status.can_transition_to(next) {
                entry.task.status = next;
            } else {
                tracing::warn!(
                    task_id = %accepted.id,
                    from = ?entry.task.status,
                    to = ?next,
                    "rejected task status change"
                );
                accepted.status = None;
            }
        }
        if let Some(p) = accepted.progress {
            let p = p.min(100);
            entry.task.progress = p;
            accepted.progress = Some(p);
        }
        if let Some(ref m) = accepted.message {
            entry.task.message = m.clone();
        }
        entry.task.updated_at = now_ms();
        self.publish(&TaskEvent::Update(accepted));
    }

    /// Settle a task and publish its terminal event. A task still
    /// `pending` is promoted to `running` first, with its own update.
    pub fn result(&self, id: TaskId, result: TaskOutcome) {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = live_entry(&mut tasks, id) else {
            return;
        };

        let status = result.status();
        if !entry.task.status.can_transition_to(status) {
            entry.task.status = TaskStatus::Running;
            entry.task.updated_at = now_ms();
            self.publish(&TaskEvent::Update(
                TaskUpdate::new(id).status(TaskStatus::Running),
            ));
        }
        entry.task.status = status;
        entry.task.message = result.message.clone();
        entry.task.error = result.error.clone();
        if status == TaskStatus::Completed {
            entry.task.progress = 100;
        } else if status == TaskStatus::Error {
            entry.task.progress = 0;
        }
        entry.task.updated_at = now_ms();
        let kind = entry.task.kind;
        tracing::debug!(task_id = %id, ?status, "task settled");

        self.retire(&mut tasks, id, kind);
        self.publish(&TaskEvent::Result { id, result });
    }

    /// Cancel a `running` task: mark it `cancelled` and trip its signal.
    /// Returns whether anything happened; `pending` and settled tasks are
    /// left untouched.
    pub fn cancel(&self, id: TaskId) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(entry) = tasks.get_mut(&id) else {
            return false;
        };
        if entry.task.status != TaskStatus::Running {
            tracing::debug!(task_id = %id, status = ?entry.task.status, "cancel ignored");
            return false;
        }

        entry.task.status = TaskStatus::Cancelled;
        entry.task.message = "cancelled".to_string();
        entry.task.updated_at = now_ms();
        entry.controller.cancel();
        let kind = entry.task.kind;
        tracing::info!(task_id = %id, "task cancelled");

        self.retire(&mut tasks, id, kind);
        self.publish(&TaskEvent::Update(
            TaskUpdate::new(id)
                .status(TaskStatus::Cancelled)
                .message("cancelled"),
        ));
        true
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.inner.tasks.lock().get(&id).map(|e| e.task.clone())
    }

    /// All known tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut out: Vec<Task> = self
            .inner
            .tasks
            .lock()
            .values()
            .map(|e| e.task.clone())
            .collect();
        out.sort_by_key(|t| t.created_at);
        out
    }

    /// Observe-only view of the task's cancellation controller.
    pub fn signal(&self, id: TaskId) -> Option<AbortSignal> {
        self.inner
            .tasks
            .lock()
            .get(&id)
            .map(|e| AbortSignal::new(e.controller.clone()))
    }

    // -----------------------------------------------------------------------
    // Subscriptions
    // -----------------------------------------------------------------------

    /// Register a listener. Listeners run synchronously, in registration
    /// order, while the registry is locked: they must not call back into
    /// the registry. Use [`subscribe_channel`](Self::subscribe_channel) to
    /// react asynchronously.
    pub fn subscribe(&self, listener: impl Fn(&TaskEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.inner.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    /// Forward every event into an unbounded channel.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn publish(&self, event: &TaskEvent) {
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    fn retire(&self, tasks: &mut HashMap<TaskId, TaskEntry>, id: TaskId, kind: TaskKind) {
        if kind.retires_immediately() || self.inner.grace_period.is_zero() {
            tasks.remove(&id);
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tasks.remove(&id);
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let grace = self.inner.grace_period;
        handle.spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(inner) = weak.upgrade() {
                inner.tasks.lock().remove(&id);
                tracing::trace!(task_id = %id, "task retired after grace period");
            }
        });
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Entry for `id` unless it is absent or already settled.
fn live_entry(tasks: &mut HashMap<TaskId, TaskEntry>, id: TaskId) -> Option<&mut TaskEntry> {
    tasks
        .get_mut(&id)
        .filter(|entry| !entry.task.status.is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(kind: TaskKind) -> TaskDescriptor {
        TaskDescriptor {
            kind,
            message: "test".into(),
            metadata: TaskMetadata::Generic,
        }
    }

    fn recorder(reg: &TaskRegistry) -> Arc<Mutex<Vec<TaskEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        reg.subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    #[test]
    fn test_create_is_pending_and_published() {
        let reg = TaskRegistry::default();
        let events = recorder(&reg);
        let id = reg.create(descriptor(TaskKind::ArchiveExtract));

        let task = reg.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.progress, 0);
        assert!(matches!(&events.lock()[0], TaskEvent::Create(t) if t.id == id));
    }

    #[test]
    fn test_first_progress_promotes_to_running() {
        let reg = TaskRegistry::default();
        let id = reg.create(descriptor(TaskKind::ArchiveCreate));
        reg.progress(id, 30);
        let task = reg.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress, 30);
    }

    #[test]
    fn test_result_retires_archive_task_immediately() {
        let reg = TaskRegistry::default();
        let events = recorder(&reg);
        let id = reg.create(descriptor(TaskKind::ArchiveExtract));
        reg.progress(id, 50);
        reg.result(id, TaskOutcome::ok("done", None));

        assert!(reg.get(id).is_none());
        let last = events.lock().last().cloned().unwrap();
        assert!(matches!(last, TaskEvent::Result { id: rid, ref result } if rid == id && result.success));
    }

    #[test]
    fn test_result_on_pending_task_passes_through_running() {
        let reg = TaskRegistry::default();
        let events = recorder(&reg);
        let id = reg.create(descriptor(TaskKind::Generic));
        reg.result(id, TaskOutcome::ok("done", None));

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], TaskEvent::Create(t) if t.status == TaskStatus::Pending));
        assert!(matches!(
            &events[1],
            TaskEvent::Update(u) if u.id == id && u.status == Some(TaskStatus::Running)
        ));
        assert!(matches!(&events[2], TaskEvent::Result { result, .. } if result.success));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn test_unknown_id_is_a_silent_noop() {
        let reg = TaskRegistry::default();
        let events = recorder(&reg);
        let ghost = TaskId::new();
        reg.progress(ghost, 10);
        reg.update(TaskUpdate::new(ghost).progress(20));
        reg.result(ghost, TaskOutcome::ok("late", None));
        assert!(!reg.cancel(ghost));
        assert!(events.lock().is_empty());
        assert!(reg.list().is_empty());
    }

    #[test]
    fn test_cancel_requires_running() {
        let reg = TaskRegistry::default();
        let id = reg.create(descriptor(TaskKind::ArchiveCreate));
        let signal = reg.signal(id).unwrap();

        assert!(!reg.cancel(id));
        assert_eq!(reg.get(id).unwrap().status, TaskStatus::Pending);
        assert!(!signal.is_aborted());

        reg.progress(id, 5);
        assert!(reg.cancel(id));
        assert!(signal.is_aborted());
        assert!(reg.get(id).is_none());
    }

    #[test]
    fn test_no_events_after_cancellation() {
        let reg = TaskRegistry::default();
        let events = recorder(&reg);
        let id = reg.create(descriptor(TaskKind::ArchiveExtract));
        reg.progress(id, 20);
        reg.cancel(id);
        let count = events.lock().len();

        reg.progress(id, 60);
        reg.result(id, TaskOutcome::ok("finished anyway", None));
        assert!(!reg.cancel(id));

        let events = events.lock();
        assert_eq!(events.len(), count);
        assert!(events.last().unwrap().is_terminal());
    }

    #[test]
    fn test_update_rejects_terminal_and_backward_status() {
        let reg = TaskRegistry::default();
        let id = reg.create(descriptor(TaskKind::Generic));
        reg.update(TaskUpdate::new(id).status(TaskStatus::Completed));
        assert_eq!(reg.get(id).unwrap().status, TaskStatus::Pending);

        reg.update(TaskUpdate::new(id).status(TaskStatus::Running).progress(10));
        reg.update(TaskUpdate::new(id).status(TaskStatus::Pending));
        let task = reg.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.progress, 10);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let reg = TaskRegistry::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (order.clone(), order.clone());
        reg.subscribe(move |_| a.lock().push("first"));
        let second = reg.subscribe(move |_| b.lock().push("second"));
        reg.create(descriptor(TaskKind::Generic));
        assert_eq!(*order.lock(), vec!["first", "second"]);

        assert!(reg.unsubscribe(second));
        assert!(!reg.unsubscribe(second));
        reg.create(descriptor(TaskKind::Generic));
        assert_eq!(*order.lock(), vec!["first", "second", "first"]);
    }

    #[test]
    fn test_grace_retirement_without_runtime_is_immediate() {
        let reg = TaskRegistry::new(Duration::from_secs(30));
        let id = reg.create(descriptor(TaskKind::Generic));
        reg.progress(id, 1);
        reg.result(id, TaskOutcome::failed(ErrorCode::Aborted, "superseded"));
        assert!(reg.get(id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_result_settles_cancelled() {
        let reg = TaskRegistry::new(Duration::from_secs(30));
        let id = reg.create(descriptor(TaskKind::RunCommand));
        reg.progress(id, 1);
        reg.result(id, TaskOutcome::failed(ErrorCode::Aborted, "superseded"));
        assert_eq!(reg.get(id).unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_task_lingers_for_grace_period() {
        let reg = TaskRegistry::new(Duration::from_secs(30));
        let id = reg.create(descriptor(TaskKind::Generic));
        reg.progress(id, 40);
        reg.result(id, TaskOutcome::failed(ErrorCode::ExecutionFailed, "exit 1"));

        let task = reg.get(id).unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.progress, 0);
        assert_eq!(task.error.unwrap().code, ErrorCode::ExecutionFailed);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(reg.get(id).is_some());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reg.get(id).is_none());
    }

    #[tokio::test]
    async fn test_channel_subscription_sees_full_lifecycle() {
        let reg = TaskRegistry::default();
        let (sub, mut rx) = reg.subscribe_channel();
        let id = reg.create(descriptor(TaskKind::ArchiveRead));
        reg.progress(id, 10);
        reg.result(id, TaskOutcome::ok("ok", None));
        reg.unsubscribe(sub);

        assert!(matches!(rx.recv().await, Some(TaskEvent::Create(_))));
        assert!(matches!(rx.recv().await, Some(TaskEvent::Progress { progress: 10, .. })));
        assert!(matches!(rx.recv().await, Some(TaskEvent::Result { .. })));
        assert!(rx.recv().await.is_none());
    }
}
