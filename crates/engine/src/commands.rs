//! Command registry and the built-in commands.
//!
//! Commands are registered by name and invoked with JSON input/output.
//! Archive commands hand back a task id straight away; progress and the
//! final outcome arrive through the task registry's event stream.

use crate::archive::{ArchiveRequest, CreateArchiveRequest, ExtractArchiveRequest, ReadArchiveRequest};
use crate::context::AppContext;
use crate::error::TaskError;
use crate::types::*;
use futures::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

/// Signature for all engine commands.
pub type CommandHandler =
    for<'a> fn(Value, &'a AppContext) -> BoxFuture<'a, Result<Value, CommandError>>;

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Task(#[from] TaskError),
}

impl CommandError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CommandError::InvalidInput(_) => ErrorCode::InvalidInput,
            CommandError::Task(e) => e.error_code(),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub struct CommandRegistry {
    handlers: HashMap<String, CommandHandler>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register("ping", cmd_ping);
        reg.register("archive.create", cmd_archive_create);
        reg.register("archive.extract", cmd_archive_extract);
        reg.register("archive.read", cmd_archive_read);
        reg.register("task.get", cmd_task_get);
        reg.register("task.list", cmd_task_list);
        reg.register("task.cancel", cmd_task_cancel);
        reg.register("search", cmd_search);
        reg.register("search.invalidate", cmd_search_invalidate);
        reg
    }

    pub fn register(&mut self, name: &str, handler: CommandHandler) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(|s| s.as_str()).collect();
        names.sort();
        names
    }

    /// Execute a command by name and return a full CommandResult.
    pub async fn execute(&self, name: &str, args: Value, ctx: &AppContext) -> CommandResult {
        let run_id = new_run_id();
        let start = Instant::now();

        let Some(handler) = self.handlers.get(name) else {
            return result_err(
                "call",
                name,
                &run_id,
                start.elapsed().as_millis() as u64,
                ErrorCode::InvalidInput,
                format!("unknown command: {}", name),
            );
        };

        let outcome = handler(args, ctx).await;
        let elapsed = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(data) => {
                let mut r = result_ok("call", name, &run_id, elapsed);
                r.data = Some(data);
                r
            }
            // Superseded work is not a failure.
            Err(CommandError::Task(TaskError::Aborted)) => result_skip(
                "call",
                name,
                &run_id,
                elapsed,
                ErrorCode::Aborted,
                "superseded by a newer request",
            ),
            Err(e) => {
                tracing::debug!(command = name, error = %e, "command failed");
                result_err("call", name, &run_id, elapsed, e.error_code(), e.to_string())
            }
        }
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn parse<T: DeserializeOwned>(args: Value) -> Result<T, CommandError> {
    serde_json::from_value(args).map_err(|e| CommandError::InvalidInput(e.to_string()))
}

#[derive(Deserialize)]
struct TaskRef {
    id: TaskId,
}

#[derive(Deserialize)]
struct SearchArgs {
    directory: PathBuf,
    #[serde(default)]
    query: String,
}

// ===========================================================================
// Built-in commands
// ===========================================================================

/// `ping` – returns { "pong": true }. Proves wiring works.
fn cmd_ping(_args: Value, _ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move { Ok(serde_json::json!({ "pong": true })) }.boxed()
}

fn start_archive(request: ArchiveRequest, ctx: &AppContext) -> Value {
    let handle = ctx.archive().start(request);
    serde_json::json!({ "task_id": handle.id })
}

/// `archive.create`
///
/// Args: `{ "source": path | [paths], "destination": path, "archiveType"?: tag }`
/// Returns: `{ "task_id": "..." }`
fn cmd_archive_create(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let request: CreateArchiveRequest = parse(args)?;
        Ok(start_archive(ArchiveRequest::Create(request), ctx))
    }
    .boxed()
}

/// `archive.extract`
///
/// Args: `{ "archivePath": path, "destinationFolder": path }`
fn cmd_archive_extract(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let request: ExtractArchiveRequest = parse(args)?;
        Ok(start_archive(ArchiveRequest::Extract(request), ctx))
    }
    .boxed()
}

/// `archive.read` – the entry list arrives in the task's result data.
fn cmd_archive_read(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let request: ReadArchiveRequest = parse(args)?;
        Ok(start_archive(ArchiveRequest::Read(request), ctx))
    }
    .boxed()
}

fn cmd_task_get(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let TaskRef { id } = parse(args)?;
        let task = ctx
            .registry()
            .get(id)
            .ok_or_else(|| CommandError::InvalidInput(format!("no such task: {}", id)))?;
        Ok(serde_json::json!({ "task": task }))
    }
    .boxed()
}

fn cmd_task_list(_args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move { Ok(serde_json::json!({ "tasks": ctx.registry().list() })) }.boxed()
}

/// `task.cancel` – `{ "cancelled": false }` when the task is not running.
fn cmd_task_cancel(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let TaskRef { id } = parse(args)?;
        Ok(serde_json::json!({ "cancelled": ctx.registry().cancel(id) }))
    }
    .boxed()
}

/// `search`
///
/// Args: `{ "directory": path, "query": "..." }`
/// Returns: `{ "paths": [...] }`
fn cmd_search(args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        let SearchArgs { directory, query } = parse(args)?;
        let paths = ctx.search().search(&directory, &query).await?;
        Ok(serde_json::json!({ "paths": paths }))
    }
    .boxed()
}

fn cmd_search_invalidate(_args: Value, ctx: &AppContext) -> BoxFuture<'_, Result<Value, CommandError>> {
    async move {
        ctx.search().invalidate();
        Ok(serde_json::json!({ "invalidated": true }))
    }
    .boxed()
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;

    fn ctx() -> AppContext {
        AppContext::default_platform(EngineSettings::default())
    }

    #[tokio::test]
    async fn test_ping_command() {
        let ctx = ctx();
        let reg = CommandRegistry::new();
        let result = reg.execute("ping", serde_json::json!({}), &ctx).await;
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.data.unwrap()["pong"], true);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let ctx = ctx();
        let reg = CommandRegistry::new();
        let result = reg.execute("nonexistent", serde_json::json!({}), &ctx).await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_malformed_archive_args_rejected() {
        let ctx = ctx();
        let reg = CommandRegistry::new();
        let result = reg
            .execute("archive.create", serde_json::json!({ "source": 7 }), &ctx)
            .await;
        assert_eq!(result.status, Status::Error);
        assert_eq!(result.error.unwrap().code, ErrorCode::InvalidInput);
        assert!(ctx.registry().list().is_empty());
    }

    #[tokio::test]
    async fn test_archive_create_returns_task_id_then_settles() {
        let ctx = ctx();
        let reg = CommandRegistry::new();
        let (_sub, mut events) = ctx.registry().subscribe_channel();

        let result = reg
            .execute(
                "archive.create",
                serde_json::json!({ "source": "/tmp/whatever", "destination": "/tmp/out.rar" }),
                &ctx,
            )
            .await;
        assert_eq!(result.status, Status::Pass);
        let id: TaskId = serde_json::from_value(result.data.unwrap()["task_id"].clone()).unwrap();

        let outcome = loop {
            match events.recv().await.unwrap() {
                TaskEvent::Result { id: settled, result } if settled == id => break result,
                _ => {}
            }
        };
        assert!(!outcome.success);
        assert_eq!(outcome.error.unwrap().code, ErrorCode::InvalidInput);

        // Archive tasks are gone as soon as they settle.
        let get = reg
            .execute("task.get", serde_json::json!({ "id": id }), &ctx)
            .await;
        assert_eq!(get.status, Status::Error);
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_noop() {
        let ctx = ctx();
        let reg = CommandRegistry::new();
        let result = reg
            .execute("task.cancel", serde_json::json!({ "id": TaskId::new() }), &ctx)
            .await;
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.data.unwrap()["cancelled"], false);
    }

    #[tokio::test]
    async fn test_search_command() {
        let tmp = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.txt"] {
            std::fs::write(tmp.path().join(name), b"x").unwrap();
        }
        let ctx = ctx();
        let reg = CommandRegistry::new();

        let result = reg
            .execute(
                "search",
                serde_json::json!({ "directory": tmp.path(), "query": "" }),
                &ctx,
            )
            .await;
        assert_eq!(result.status, Status::Pass);
        assert_eq!(result.data.unwrap()["paths"].as_array().unwrap().len(), 3);

        let missing = reg
            .execute(
                "search",
                serde_json::json!({ "directory": tmp.path().join("nope"), "query": "" }),
                &ctx,
            )
            .await;
        assert_eq!(missing.status, Status::Error);
        assert_eq!(missing.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[test]
    fn test_list_commands() {
        let reg = CommandRegistry::new();
        let names = reg.list();
        for expected in ["ping", "archive.create", "task.cancel", "search"] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }
}
