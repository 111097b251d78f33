use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// Command result JSON – the stable output contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub run_id: String,
    pub command: String,
    pub target: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub timing_ms: TimingInfo,
    pub env_summary: EnvSummary,
    /// Arbitrary command-specific payload returned on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pass,
    Fail,
    Skip,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidInput,
    Unsupported,
    DependencyMissing,
    PermissionDenied,
    IoError,
    ExecutionFailed,
    Aborted,
    Timeout,
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| format!("{:?}", self));
        f.write_str(&s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TimingInfo {
    pub total: u64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub steps: HashMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSummary {
    pub os: String,
    pub arch: String,
}

impl Default for EnvSummary {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Task model
// ---------------------------------------------------------------------------

/// Opaque task identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    ArchiveCreate,
    ArchiveExtract,
    ArchiveRead,
    Delete,
    RunCommand,
    Generic,
}

impl TaskKind {
    /// Archive tasks are purged as soon as they settle; everything else
    /// lingers for the grace window so late pollers still find it.
    pub fn retires_immediately(self) -> bool {
        matches!(
            self,
            TaskKind::ArchiveCreate | TaskKind::ArchiveExtract | TaskKind::ArchiveRead
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of
    /// `pending -> running -> {completed, error, cancelled}`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::Running) => true,
            (TaskStatus::Running, n) => n.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskMetadata {
    ArchiveCreate {
        sources: Vec<PathBuf>,
        destination: PathBuf,
        format: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        client: serde_json::Value,
    },
    ArchiveExtract {
        archive_path: PathBuf,
        destination_folder: PathBuf,
        format: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        client: serde_json::Value,
    },
    ArchiveRead {
        archive_path: PathBuf,
        format: String,
        #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
        client: serde_json::Value,
    },
    Delete {
        paths: Vec<PathBuf>,
    },
    RunCommand {
        command: String,
    },
    Generic,
}

/// What a caller hands to `TaskRegistry::create`.
#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub kind: TaskKind,
    pub message: String,
    pub metadata: TaskMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    pub metadata: TaskMetadata,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Non-terminal patch applied through `TaskRegistry::update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskUpdate {
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            status: None,
            progress: None,
            message: None,
        }
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Terminal result of a task as handed to `TaskRegistry::result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TaskOutcome {
    pub fn ok(message: impl Into<String>, data: Option<serde_json::Value>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            data,
        }
    }

    pub fn failed(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            message: message.clone(),
            error: Some(ErrorInfo {
                code,
                message,
                details: serde_json::Value::Null,
            }),
            data: None,
        }
    }

    /// Terminal status this outcome settles a task into.
    pub fn status(&self) -> TaskStatus {
        match (&self.error, self.success) {
            (_, true) => TaskStatus::Completed,
            (Some(e), false) if e.code == ErrorCode::Aborted => TaskStatus::Cancelled,
            (_, false) => TaskStatus::Error,
        }
    }
}

/// Events pushed to registry subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    Create(Task),
    Progress { id: TaskId, progress: u8 },
    Result { id: TaskId, result: TaskOutcome },
    Update(TaskUpdate),
}

impl TaskEvent {
    pub fn task_id(&self) -> TaskId {
        match self {
            TaskEvent::Create(task) => task.id,
            TaskEvent::Progress { id, .. } | TaskEvent::Result { id, .. } => *id,
            TaskEvent::Update(update) => update.id,
        }
    }

    /// True for the last event a task ever produces.
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskEvent::Result { .. } => true,
            TaskEvent::Update(update) => update.status.is_some_and(TaskStatus::is_terminal),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub steps: Vec<ScenarioStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScenarioStep {
    Call {
        call: String,
        #[serde(default)]
        args: serde_json::Value,
        #[serde(default = "default_expect_status")]
        expect_status: String,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    AwaitTask {
        /// A task id, or `$last` for the most recent id a call returned.
        await_task: String,
        #[serde(default = "default_expect_task_status")]
        expect_status: TaskStatus,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
    Probe {
        probe: String,
    },
}

fn default_expect_status() -> String {
    "pass".to_string()
}

fn default_expect_task_status() -> TaskStatus {
    TaskStatus::Completed
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: Option<String>,
    pub overall_status: Status,
    pub step_results: Vec<CommandResult>,
}

// ---------------------------------------------------------------------------
// Serve / daemon protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

/// Unsolicited line pushed to subscribed daemon clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEvent {
    pub event: TaskEvent,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate a new run ID (UUIDv4).
pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Build a successful CommandResult shell (caller fills in data).
pub fn result_ok(command: &str, target: &str, run_id: &str, total_ms: u64) -> CommandResult {
    CommandResult {
        run_id: run_id.to_string(),
        command: command.to_string(),
        target: target.to_string(),
        status: Status::Pass,
        error: None,
        timing_ms: TimingInfo {
            total: total_ms,
            steps: HashMap::new(),
        },
        env_summary: EnvSummary::default(),
        data: None,
    }
}

/// Build an error CommandResult.
pub fn result_err(
    command: &str,
    target: &str,
    run_id: &str,
    total_ms: u64,
    code: ErrorCode,
    message: impl Into<String>,
) -> CommandResult {
    CommandResult {
        run_id: run_id.to_string(),
        command: command.to_string(),
        target: target.to_string(),
        status: Status::Error,
        error: Some(ErrorInfo {
            code,
            message: message.into(),
            details: serde_json::Value::Null,
        }),
        timing_ms: TimingInfo {
            total: total_ms,
            steps: HashMap::new(),
        },
        env_summary: EnvSummary::default(),
        data: None,
    }
}

/// Build a skip CommandResult.
pub fn result_skip(
    command: &str,
    target: &str,
    run_id: &str,
    total_ms: u64,
    code: ErrorCode,
    reason: impl Into<String>,
) -> CommandResult {
    CommandResult {
        run_id: run_id.to_string(),
        command: command.to_string(),
        target: target.to_string(),
        status: Status::Skip,
        error: Some(ErrorInfo {
            code,
            message: reason.into(),
            details: serde_json::Value::Null,
        }),
        timing_ms: TimingInfo {
            total: total_ms,
            steps: HashMap::new(),
        },
        env_summary: EnvSummary::default(),
        data: None,
    }
}
