//! `shelfctl` – headless host and test harness for the shelf engine.
//!
//! Runs archive jobs and searches through the same engine the desktop
//! app embeds, either one-shot from the command line or as a daemon on a
//! Unix socket.

mod config;
mod logging;
mod serve;

use clap::{Parser, Subcommand};
use engine::archive::{
    ArchiveRequest, CreateArchiveRequest, ExtractArchiveRequest, PathList, ReadArchiveRequest,
};
use engine::types::*;
use engine::{AppContext, CommandRegistry, CommandResult, TaskError};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

// ===========================================================================
// CLI definition
// ===========================================================================

#[derive(Parser)]
#[command(
    name = "shelfctl",
    version,
    about = "Headless host for shelf archive jobs and file search"
)]
struct Cli {
    /// Config file to load instead of the default `shelf_config.yaml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Invoke an engine command by name with JSON args.
    Call {
        /// Command name (e.g. "ping", "search", "archive.create").
        cmd: String,
        /// JSON args to pass to the command.
        #[arg(long, default_value = "{}")]
        args: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Give up after this long (e.g. "30s", "5000ms").
        #[arg(long)]
        timeout: Option<String>,
        /// Directory for artifacts output.
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Targeted capability check. Available: tools.
    Probe {
        target: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
        /// Directory for artifacts output.
        #[arg(long)]
        artifacts: Option<PathBuf>,
    },

    /// Run a scripted scenario from a YAML file.
    RunScenario {
        /// Path to the scenario YAML file.
        file: PathBuf,
        /// Directory for artifacts output.
        #[arg(long)]
        artifacts: Option<PathBuf>,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Start daemon mode over a Unix socket.
    Serve {
        /// Path for the Unix domain socket.
        #[arg(long)]
        socket: PathBuf,
    },

    /// Fuzzy-search the files below a directory.
    Search {
        directory: PathBuf,
        /// Empty lists the first entries in scan order.
        #[arg(default_value = "")]
        query: String,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Create, extract or list an archive and follow it to completion.
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
        /// Output as JSON.
        #[arg(long, global = true)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ArchiveAction {
    /// Pack SOURCES into DESTINATION.
    Create {
        destination: PathBuf,
        #[arg(required = true)]
        sources: Vec<PathBuf>,
        /// Format tag (zip, 7z, tar.gz, ...). Defaults to the destination's extension.
        #[arg(long)]
        format: Option<String>,
    },
    /// Unpack ARCHIVE into DESTINATION.
    Extract {
        archive: PathBuf,
        destination: PathBuf,
    },
    /// List the entries of ARCHIVE.
    Read { archive: PathBuf },
}

impl ArchiveAction {
    fn into_request(self) -> ArchiveRequest {
        match self {
            ArchiveAction::Create {
                destination,
                sources,
                format,
            } => ArchiveRequest::Create(CreateArchiveRequest {
                archive_type: format,
                source: PathList::Many(sources),
                destination,
                client_metadata: serde_json::Value::Null,
            }),
            ArchiveAction::Extract {
                archive,
                destination,
            } => ArchiveRequest::Extract(ExtractArchiveRequest {
                archive_path: archive,
                destination_folder: destination,
                client_metadata: serde_json::Value::Null,
            }),
            ArchiveAction::Read { archive } => ArchiveRequest::Read(ReadArchiveRequest {
                archive_path: archive,
                client_metadata: serde_json::Value::Null,
            }),
        }
    }
}

// ===========================================================================
// Main
// ===========================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let app_config = match config::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: failed to load configuration: {}", e);
            std::process::exit(2);
        }
    };
    logging::init_logging(&app_config.logging);

    let ctx = AppContext::default_platform(app_config.engine);
    let registry = CommandRegistry::new();

    match cli.command {
        Commands::Call {
            cmd,
            args,
            json,
            timeout,
            artifacts,
        } => cmd_call(&cmd, &args, json, timeout.as_deref(), artifacts, &ctx, &registry).await,
        Commands::Probe {
            target,
            json,
            artifacts,
        } => cmd_probe(&target, json, artifacts, &ctx).await,
        Commands::RunScenario {
            file,
            artifacts,
            json,
        } => cmd_run_scenario(&file, json, artifacts, &ctx, &registry).await,
        Commands::Serve { socket } => serve::run_daemon(socket, ctx, registry).await,
        Commands::Search {
            directory,
            query,
            json,
        } => cmd_search(&directory, &query, json, &ctx, &registry).await,
        Commands::Archive { action, json } => cmd_archive(action, json, &ctx).await,
    }
}

// ===========================================================================
// Subcommand implementations
// ===========================================================================

async fn cmd_call(
    cmd: &str,
    args_str: &str,
    json: bool,
    timeout: Option<&str>,
    artifacts: Option<PathBuf>,
    ctx: &AppContext,
    registry: &CommandRegistry,
) {
    let args: serde_json::Value = match serde_json::from_str(args_str) {
        Ok(v) => v,
        Err(e) => {
            let r = result_err(
                "call",
                cmd,
                &new_run_id(),
                0,
                ErrorCode::InvalidInput,
                format!("invalid JSON args: {}", e),
            );
            output_result(&r, json);
            return;
        }
    };

    let limit = match timeout.map(parse_duration).transpose() {
        Ok(limit) => limit,
        Err(e) => {
            let r = result_err("call", cmd, &new_run_id(), 0, ErrorCode::InvalidInput, e);
            output_result(&r, json);
            return;
        }
    };

    let result = match limit {
        Some(limit) => match tokio::time::timeout(limit, registry.execute(cmd, args, ctx)).await {
            Ok(r) => r,
            Err(_) => result_err(
                "call",
                cmd,
                &new_run_id(),
                limit.as_millis() as u64,
                ErrorCode::Timeout,
                format!("{} did not finish within {:?}", cmd, limit),
            ),
        },
        None => registry.execute(cmd, args, ctx).await,
    };
    if let Some(ref dir) = artifacts {
        write_artifacts(dir, &result);
    }
    output_result(&result, json);
}

async fn cmd_probe(target: &str, json: bool, artifacts: Option<PathBuf>, ctx: &AppContext) {
    let result = engine::probes::run_probe(target, ctx).await;
    if let Some(ref dir) = artifacts {
        write_artifacts(dir, &result);
    }
    output_result(&result, json);
}

async fn cmd_search(
    directory: &Path,
    query: &str,
    json: bool,
    ctx: &AppContext,
    registry: &CommandRegistry,
) {
    let args = serde_json::json!({ "directory": directory, "query": query });
    let result = registry.execute("search", args, ctx).await;
    if json || result.status != Status::Pass {
        output_result(&result, json);
        return;
    }
    let paths = result
        .data
        .as_ref()
        .and_then(|d| d["paths"].as_array())
        .cloned()
        .unwrap_or_default();
    for path in paths {
        if let Some(p) = path.as_str() {
            println!("{}", p);
        }
    }
}

/// Start the job, print its progress to stderr, cancel it on Ctrl-C, and
/// report the outcome once the terminal event arrives.
async fn cmd_archive(action: ArchiveAction, json: bool, ctx: &AppContext) {
    let run_id = new_run_id();
    let start = Instant::now();
    let (subscription, mut events) = ctx.registry().subscribe_channel();
    let handle = ctx.archive().start(action.into_request());
    let id = handle.id;
    let target = id.to_string();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                if event.task_id() != id {
                    continue;
                }
                if let TaskEvent::Progress { progress, .. } = &event {
                    if !json {
                        eprintln!("  {:>3}%", progress);
                    }
                }
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if ctx.registry().cancel(id) {
                    eprintln!("cancelling {}", id);
                }
            }
        }
    }
    ctx.registry().unsubscribe(subscription);

    let elapsed = || start.elapsed().as_millis() as u64;
    let result = match handle.completion.await {
        Ok(Ok(outcome)) => {
            let mut r = result_ok("archive", &target, &run_id, elapsed());
            r.data = serde_json::to_value(&outcome).ok();
            r
        }
        Ok(Err(TaskError::Aborted)) => result_skip(
            "archive",
            &target,
            &run_id,
            elapsed(),
            ErrorCode::Aborted,
            "cancelled",
        ),
        Ok(Err(e)) => result_err("archive", &target, &run_id, elapsed(), e.error_code(), e.to_string()),
        Err(e) => {
            let e = TaskError::from(e);
            result_err("archive", &target, &run_id, elapsed(), e.error_code(), e.to_string())
        }
    };
    output_result(&result, json);
}

async fn cmd_run_scenario(
    file: &Path,
    json: bool,
    artifacts: Option<PathBuf>,
    ctx: &AppContext,
    registry: &CommandRegistry,
) {
    let yaml = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => {
            let r = result_err(
                "run-scenario",
                &file.display().to_string(),
                &new_run_id(),
                0,
                ErrorCode::IoError,
                format!("cannot read scenario file: {}", e),
            );
            output_result(&r, json);
            return;
        }
    };

    let scenario = match engine::scenario::load_scenario(&yaml) {
        Ok(s) => s,
        Err(e) => {
            let r = result_err(
                "run-scenario",
                &file.display().to_string(),
                &new_run_id(),
                0,
                ErrorCode::InvalidInput,
                e,
            );
            output_result(&r, json);
            return;
        }
    };

    let scenario_result = engine::scenario::run_scenario(&scenario, ctx, registry).await;

    if json {
        let j = serde_json::to_string_pretty(&scenario_result).unwrap_or_default();
        println!("{}", j);
    } else {
        println!(
            "Scenario: {}",
            scenario_result.name.as_deref().unwrap_or("<unnamed>")
        );
        println!("Overall: {:?}", scenario_result.overall_status);
        for (i, sr) in scenario_result.step_results.iter().enumerate() {
            println!(
                "  Step {}: {} {} -> {:?} ({}ms)",
                i, sr.command, sr.target, sr.status, sr.timing_ms.total
            );
        }
    }

    if let Some(ref dir) = artifacts {
        let art_dir = dir.join(new_run_id());
        let _ = std::fs::create_dir_all(&art_dir);
        let j = serde_json::to_string_pretty(&scenario_result).unwrap_or_default();
        let _ = std::fs::write(art_dir.join("result.json"), j);

        let mut lines = String::new();
        for sr in &scenario_result.step_results {
            if let Ok(line) = serde_json::to_string(sr) {
                lines.push_str(&line);
                lines.push('\n');
            }
        }
        let _ = std::fs::write(art_dir.join("events.jsonl"), lines);
    }

    if scenario_result.overall_status != Status::Pass {
        std::process::exit(1);
    }
}

/// `"30s"`, `"5000ms"`, `"2m"`, or a bare number of milliseconds.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {:?}", s))?;
    match unit {
        "" | "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        _ => Err(format!("invalid duration unit in {:?} (use ms, s or m)", s)),
    }
}

// ===========================================================================
// Output helpers
// ===========================================================================

fn output_result(result: &CommandResult, json: bool) {
    if json {
        let j = serde_json::to_string_pretty(result).unwrap_or_default();
        println!("{}", j);
    } else {
        print_human(result);
    }

    // Exit with non-zero status on error/fail
    match result.status {
        Status::Pass | Status::Skip => {}
        Status::Fail => std::process::exit(1),
        Status::Error => std::process::exit(2),
    }
}

fn print_human(r: &CommandResult) {
    let status_icon = match r.status {
        Status::Pass => "PASS",
        Status::Fail => "FAIL",
        Status::Skip => "SKIP",
        Status::Error => "ERROR",
    };

    println!("[{}] {} {}", status_icon, r.command, r.target);
    println!("  run_id: {}", r.run_id);
    println!("  timing: {}ms", r.timing_ms.total);

    if let Some(ref err) = r.error {
        println!("  error:  {} – {}", err.code, err.message);
    }

    if let Some(ref data) = r.data {
        if let Ok(s) = serde_json::to_string_pretty(data) {
            for line in s.lines() {
                println!("  {}", line);
            }
        }
    }

    println!("  env: os={} arch={}", r.env_summary.os, r.env_summary.arch);
}

// ===========================================================================
// Artifact helpers
// ===========================================================================

fn write_artifacts(dir: &Path, result: &CommandResult) {
    let art_dir = dir.join(&result.run_id);
    if let Err(e) = std::fs::create_dir_all(&art_dir) {
        eprintln!(
            "warning: failed to create artifacts dir {}: {}",
            art_dir.display(),
            e
        );
        return;
    }

    let j = serde_json::to_string_pretty(result).unwrap_or_default();
    let _ = std::fs::write(art_dir.join("result.json"), &j);

    if let Ok(line) = serde_json::to_string(result) {
        let _ = std::fs::write(art_dir.join("events.jsonl"), format!("{}\n", line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("5000ms").unwrap(), Duration::from_millis(5000));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("250").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("fast").is_err());
        assert!(parse_duration("10h").is_err());
    }

    #[test]
    fn test_archive_create_args() {
        let cli = Cli::try_parse_from([
            "shelfctl",
            "archive",
            "create",
            "/tmp/out.zip",
            "/tmp/a",
            "/tmp/b",
            "--format",
            "zip",
        ])
        .unwrap();
        let Commands::Archive { action, json } = cli.command else {
            panic!("expected archive subcommand");
        };
        assert!(!json);
        let request = action.into_request();
        assert_eq!(request.kind(), TaskKind::ArchiveCreate);
        let ArchiveRequest::Create(create) = request else {
            panic!("expected create request");
        };
        assert_eq!(create.source.to_vec().len(), 2);
        assert_eq!(create.archive_type.as_deref(), Some("zip"));
    }
}
