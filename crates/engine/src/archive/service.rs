//! Archive task orchestration: wraps a strategy call in registry
//! bookkeeping (create -> running -> progress -> result).

use super::*;
use crate::settings::ArchiveSettings;
use crate::tasks::{ProgressSink, TaskRegistry};
use crate::types::*;
use tokio::task::JoinHandle;
use tracing::Instrument;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// A single path or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathList {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl PathList {
    pub fn to_vec(&self) -> Vec<PathBuf> {
        match self {
            PathList::One(p) => vec![p.clone()],
            PathList::Many(ps) => ps.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateArchiveRequest {
    /// Explicit format tag; resolved from `destination` when absent.
    #[serde(default)]
    pub archive_type: Option<String>,
    pub source: PathList,
    pub destination: PathBuf,
    #[serde(default)]
    pub client_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractArchiveRequest {
    pub archive_path: PathBuf,
    pub destination_folder: PathBuf,
    #[serde(default)]
    pub client_metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadArchiveRequest {
    pub archive_path: PathBuf,
    #[serde(default)]
    pub client_metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub enum ArchiveRequest {
    Create(CreateArchiveRequest),
    Extract(ExtractArchiveRequest),
    Read(ReadArchiveRequest),
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Archive,
    Unarchive,
    List,
}

impl ArchiveRequest {
    pub fn kind(&self) -> TaskKind {
        match self {
            ArchiveRequest::Create(_) => TaskKind::ArchiveCreate,
            ArchiveRequest::Extract(_) => TaskKind::ArchiveExtract,
            ArchiveRequest::Read(_) => TaskKind::ArchiveRead,
        }
    }

    /// Resolve the format tag. Never guesses: anything unrecognised is
    /// `Unknown` and left for the dispatcher to reject.
    pub fn format(&self) -> ArchiveFormat {
        match self {
            ArchiveRequest::Create(r) => match r.archive_type.as_deref() {
                Some(tag) => tag.parse().unwrap_or(ArchiveFormat::Unknown),
                None => ArchiveFormat::from_path(&r.destination),
            },
            ArchiveRequest::Extract(r) => ArchiveFormat::from_path(&r.archive_path),
            ArchiveRequest::Read(r) => ArchiveFormat::from_path(&r.archive_path),
        }
    }

    fn operation(&self) -> Operation {
        match self {
            ArchiveRequest::Create(_) => Operation::Archive,
            ArchiveRequest::Extract(_) => Operation::Unarchive,
            ArchiveRequest::Read(_) => Operation::List,
        }
    }

    fn descriptor(&self, format: ArchiveFormat) -> TaskDescriptor {
        let format_tag = format.to_string();
        let (message, metadata) = match self {
            ArchiveRequest::Create(r) => (
                format!("Creating {}", r.destination.display()),
                TaskMetadata::ArchiveCreate {
                    sources: r.source.to_vec(),
                    destination: r.destination.clone(),
                    format: format_tag,
                    client: r.client_metadata.clone(),
                },
            ),
            ArchiveRequest::Extract(r) => (
                format!("Extracting {}", r.archive_path.display()),
                TaskMetadata::ArchiveExtract {
                    archive_path: r.archive_path.clone(),
                    destination_folder: r.destination_folder.clone(),
                    format: format_tag,
                    client: r.client_metadata.clone(),
                },
            ),
            ArchiveRequest::Read(r) => (
                format!("Reading {}", r.archive_path.display()),
                TaskMetadata::ArchiveRead {
                    archive_path: r.archive_path.clone(),
                    format: format_tag,
                    client: r.client_metadata.clone(),
                },
            ),
        };
        TaskDescriptor {
            kind: self.kind(),
            message,
            metadata,
        }
    }

    fn validate(&self) -> TaskResult<()> {
        let empty = |p: &Path| p.as_os_str().is_empty();
        match self {
            ArchiveRequest::Create(r) => {
                let sources = r.source.to_vec();
                if sources.is_empty() || sources.iter().any(|p| empty(p)) {
                    return Err(TaskError::Validation("missing source path".into()));
                }
                if empty(&r.destination) {
                    return Err(TaskError::Validation("missing destination".into()));
                }
            }
            ArchiveRequest::Extract(r) => {
                if empty(&r.archive_path) {
                    return Err(TaskError::Validation("missing archive path".into()));
                }
                if empty(&r.destination_folder) {
                    return Err(TaskError::Validation("missing destination folder".into()));
                }
            }
            ArchiveRequest::Read(r) => {
                if empty(&r.archive_path) {
                    return Err(TaskError::Validation("missing archive path".into()));
                }
            }
        }
        Ok(())
    }

    fn options(&self, tools: Arc<ToolPaths>, ctx: OperationContext) -> ArchiveOptions {
        let (sources, destination) = match self {
            ArchiveRequest::Create(r) => (r.source.to_vec(), r.destination.clone()),
            ArchiveRequest::Extract(r) => {
                (vec![r.archive_path.clone()], r.destination_folder.clone())
            }
            ArchiveRequest::Read(r) => (vec![r.archive_path.clone()], PathBuf::new()),
        };
        ArchiveOptions {
            sources,
            destination,
            tools,
            ctx,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Successful strategy output, tagged with the task it ran under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOutcome {
    pub task_id: TaskId,
    pub format: ArchiveFormat,
    #[serde(flatten)]
    pub output: ArchiveOutput,
}

/// Detached archive job. Dropping `completion` leaves the job running;
/// its result is still published through the registry.
pub struct TaskHandle {
    pub id: TaskId,
    pub completion: JoinHandle<TaskResult<ArchiveOutcome>>,
}

struct PreparedJob {
    id: TaskId,
    format: ArchiveFormat,
    request: ArchiveRequest,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ArchiveService {
    registry: TaskRegistry,
    resolver: Arc<dyn StrategyResolver>,
    tools: Arc<ToolPaths>,
    initial_progress: u8,
}

impl ArchiveService {
    pub fn new(registry: TaskRegistry, settings: &ArchiveSettings) -> Self {
        Self::with_resolver(registry, settings, Arc::new(FormatDispatcher))
    }

    pub fn with_resolver(
        registry: TaskRegistry,
        settings: &ArchiveSettings,
        resolver: Arc<dyn StrategyResolver>,
    ) -> Self {
        Self {
            registry,
            resolver,
            tools: Arc::new(settings.tools.clone()),
            initial_progress: settings.initial_progress.min(99),
        }
    }

    /// Run a request to completion on the caller's task.
    pub async fn run(&self, request: ArchiveRequest) -> TaskResult<ArchiveOutcome> {
        let job = self.prepare(request);
        self.execute(job).await
    }

    /// Create the task now and run it in the background. The id is valid
    /// (and its `create` event published) before this returns.
    pub fn start(self: &Arc<Self>, request: ArchiveRequest) -> TaskHandle {
        let job = self.prepare(request);
        let id = job.id;
        let service = Arc::clone(self);
        let completion = tokio::spawn(async move { service.execute(job).await });
        TaskHandle { id, completion }
    }

    fn prepare(&self, request: ArchiveRequest) -> PreparedJob {
        let format = request.format();
        let id = self.registry.create(request.descriptor(format));
        PreparedJob {
            id,
            format,
            request,
        }
    }

    async fn execute(&self, job: PreparedJob) -> TaskResult<ArchiveOutcome> {
        let span = tracing::info_span!("archive_task", task_id = %job.id, format = %job.format);
        self.settle(job).instrument(span).await
    }

    async fn settle(&self, job: PreparedJob) -> TaskResult<ArchiveOutcome> {
        let id = job.id;
        self.registry.update(
            TaskUpdate::new(id)
                .status(TaskStatus::Running)
                .progress(self.initial_progress),
        );
        let Some(abort) = self.registry.signal(id) else {
            return Err(TaskError::Aborted);
        };
        let registry = self.registry.clone();
        let progress = ProgressSink::new(self.initial_progress, move |p| registry.progress(id, p));
        let ctx = OperationContext::new(progress, abort);

        match self.invoke(&job, ctx).await {
            Ok(output) => {
                tracing::info!(message = %output.message, "archive task completed");
                self.registry.progress(id, 100);
                let outcome = ArchiveOutcome {
                    task_id: id,
                    format: job.format,
                    output,
                };
                self.registry.result(
                    id,
                    TaskOutcome::ok(
                        outcome.output.message.clone(),
                        serde_json::to_value(&outcome).ok(),
                    ),
                );
                Ok(outcome)
            }
            Err(TaskError::Aborted) => {
                tracing::info!("archive task aborted");
                self.registry.result(id, TaskError::Aborted.to_outcome());
                Err(TaskError::Aborted)
            }
            Err(e @ TaskError::Unknown(_)) => {
                tracing::error!(error = %e, "archive task crashed");
                self.registry.result(id, e.to_outcome());
                Err(e)
            }
            Err(e) => {
                tracing::warn!(error = %e, "archive task failed");
                self.registry.result(id, e.to_outcome());
                Err(e)
            }
        }
    }

    /// Validate, dispatch and run the strategy on its own task so a panic
    /// inside it surfaces as `TaskError::Unknown` instead of unwinding
    /// through the bookkeeping.
    async fn invoke(&self, job: &PreparedJob, ctx: OperationContext) -> TaskResult<ArchiveOutput> {
        job.request.validate()?;
        let strategy = self.resolver.resolve(job.format)?;
        let options = job.request.options(Arc::clone(&self.tools), ctx);
        let operation = job.request.operation();
        tokio::spawn(async move {
            match operation {
                Operation::Archive => strategy.archive(&options).await,
                Operation::Unarchive => strategy.unarchive(&options).await,
                Operation::List => strategy.list(&options).await,
            }
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Reports 25/50/75 then succeeds.
    struct SteppingStrategy;

    #[async_trait::async_trait]
    impl ArchiveStrategy for SteppingStrategy {
        fn name(&self) -> &'static str {
            "stepping"
        }
        async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            self.unarchive(options).await
        }
        async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            for p in [25, 50, 75] {
                options.ctx.abort.check()?;
                options.ctx.progress.report(p);
                tokio::task::yield_now().await;
            }
            Ok(ArchiveOutput::message("done").with_entries(vec!["a.txt".into()]))
        }
        async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            self.unarchive(options).await
        }
    }

    /// Blocks until aborted.
    struct StallingStrategy;

    #[async_trait::async_trait]
    impl ArchiveStrategy for StallingStrategy {
        fn name(&self) -> &'static str {
            "stalling"
        }
        async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            self.unarchive(options).await
        }
        async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            options.ctx.progress.report(10);
            options.ctx.abort.aborted().await;
            Err(TaskError::Aborted)
        }
        async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            self.unarchive(options).await
        }
    }

    struct PanickingStrategy;

    #[async_trait::async_trait]
    impl ArchiveStrategy for PanickingStrategy {
        fn name(&self) -> &'static str {
            "panicking"
        }
        async fn archive(&self, _options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            panic!("archiver state corrupted")
        }
        async fn unarchive(&self, _options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            panic!("archiver state corrupted")
        }
        async fn list(&self, _options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
            panic!("archiver state corrupted")
        }
    }

    static STEPPING: SteppingStrategy = SteppingStrategy;
    static STALLING: StallingStrategy = StallingStrategy;
    static PANICKING: PanickingStrategy = PanickingStrategy;

    /// Routes every known format to one fixed strategy; `Unknown` still
    /// goes through the real dispatcher.
    struct Fixed(&'static dyn ArchiveStrategy);

    impl StrategyResolver for Fixed {
        fn resolve(&self, format: ArchiveFormat) -> TaskResult<&'static dyn ArchiveStrategy> {
            strategy_for(format)?;
            Ok(self.0)
        }
    }

    fn service(strategy: &'static dyn ArchiveStrategy) -> (Arc<ArchiveService>, TaskRegistry) {
        let registry = TaskRegistry::default();
        let svc = ArchiveService::with_resolver(
            registry.clone(),
            &ArchiveSettings::default(),
            Arc::new(Fixed(strategy)),
        );
        (Arc::new(svc), registry)
    }

    fn extract(path: &str) -> ArchiveRequest {
        ArchiveRequest::Extract(ExtractArchiveRequest {
            archive_path: PathBuf::from(path),
            destination_folder: PathBuf::from("/out"),
            client_metadata: serde_json::Value::Null,
        })
    }

    fn record(registry: &TaskRegistry) -> Arc<Mutex<Vec<TaskEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry.subscribe(move |e| sink.lock().push(e.clone()));
        events
    }

    fn observed_progress(events: &[TaskEvent]) -> Vec<u8> {
        events
            .iter()
            .filter_map(|e| match e {
                TaskEvent::Progress { progress, .. } => Some(*progress),
                TaskEvent::Update(u) => u.progress,
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_extract_reports_monotonic_progress_to_completion() {
        let (svc, registry) = service(&STEPPING);
        let events = record(&registry);

        let outcome = svc.run(extract("/a.zip")).await.unwrap();
        assert_eq!(outcome.format, ArchiveFormat::Zip);
        assert_eq!(outcome.output.entries, vec!["a.txt".to_string()]);

        let events = events.lock();
        assert!(matches!(&events[0], TaskEvent::Create(t) if t.id == outcome.task_id
            && t.kind == TaskKind::ArchiveExtract));
        let progress = observed_progress(&events);
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert_eq!(progress.last(), Some(&100));
        match events.last().unwrap() {
            TaskEvent::Result { id, result } => {
                assert_eq!(*id, outcome.task_id);
                assert!(result.success);
                let data = result.data.as_ref().unwrap();
                assert_eq!(data["taskId"], outcome.task_id.to_string());
            }
            other => panic!("expected terminal result, got {:?}", other),
        }
        assert!(registry.get(outcome.task_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_extension_fails_explicitly() {
        let (svc, registry) = service(&STEPPING);
        let events = record(&registry);

        let err = svc.run(extract("/a.rar")).await.unwrap_err();
        assert!(matches!(err, TaskError::Validation(_)));
        match events.lock().last().unwrap() {
            TaskEvent::Result { result, .. } => {
                assert!(!result.success);
                assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::InvalidInput);
            }
            other => panic!("expected terminal result, got {:?}", other),
        };
    }

    #[tokio::test]
    async fn test_missing_input_is_validation_error() {
        let (svc, _registry) = service(&STEPPING);
        let err = svc
            .run(ArchiveRequest::Create(CreateArchiveRequest {
                archive_type: Some("zip".into()),
                source: PathList::Many(vec![]),
                destination: PathBuf::from("/out.zip"),
                client_metadata: serde_json::Value::Null,
            }))
            .await
            .unwrap_err();
        assert_eq!(err, TaskError::Validation("missing source path".into()));
    }

    #[tokio::test]
    async fn test_cancel_mid_flight_silences_task() {
        let (svc, registry) = service(&STALLING);
        let events = record(&registry);

        let handle = svc.start(extract("/big.tar.gz"));
        // Wait until the strategy has reported past the initial progress.
        while !registry.get(handle.id).is_some_and(|t| t.progress > 10) {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(registry.cancel(handle.id));
        let count = events.lock().len();

        let result = handle.completion.await.unwrap();
        assert_eq!(result, Err(TaskError::Aborted));
        registry.progress(handle.id, 90);

        let events = events.lock();
        assert_eq!(events.len(), count);
        assert!(matches!(
            events.last().unwrap(),
            TaskEvent::Update(u) if u.status == Some(TaskStatus::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_panicking_strategy_marks_task_error() {
        let (svc, registry) = service(&PANICKING);
        let events = record(&registry);

        let err = svc.run(extract("/a.7z")).await.unwrap_err();
        assert_eq!(err, TaskError::Unknown("archiver state corrupted".into()));
        match events.lock().last().unwrap() {
            TaskEvent::Result { result, .. } => {
                assert_eq!(result.status(), TaskStatus::Error);
                assert_eq!(result.error.as_ref().unwrap().code, ErrorCode::InternalError);
            }
            other => panic!("expected terminal result, got {:?}", other),
        };
    }

    #[test]
    fn test_create_request_wire_format() {
        let json = serde_json::json!({
            "archiveType": "tar.gz",
            "source": "/home/me/docs",
            "destination": "/home/me/docs.tgz",
            "clientMetadata": { "panel": "left" }
        });
        let req: CreateArchiveRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.source.to_vec(), vec![PathBuf::from("/home/me/docs")]);
        let req = ArchiveRequest::Create(req);
        assert_eq!(req.format(), ArchiveFormat::TarGz);
        assert_eq!(req.kind(), TaskKind::ArchiveCreate);
    }
}
