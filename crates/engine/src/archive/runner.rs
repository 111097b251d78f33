//! Child-process runner shared by every archive strategy.

use crate::error::{TaskError, TaskResult};
use crate::tasks::OperationContext;
use regex::Regex;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

const CHUNK_SIZE: usize = 16 * 1024;
const STDERR_TAIL: usize = 400;

/// Turns a tool's stdout into 0..=100 progress.
#[derive(Debug)]
pub(crate) enum Meter {
    Silent,
    /// The tool prints `NN%` markers (7-Zip with `-bsp1`).
    Percent,
    /// One line per processed entry, against a precounted total.
    Entries { total: usize, seen: usize },
    /// Bytes seen on stdout against an expected size.
    Bytes { total: u64, seen: u64 },
}

impl Meter {
    pub(crate) fn entries(total: usize) -> Self {
        Meter::Entries {
            total: total.max(1),
            seen: 0,
        }
    }

    pub(crate) fn bytes(total: u64) -> Self {
        Meter::Bytes {
            total: total.max(1),
            seen: 0,
        }
    }

    fn observe(&mut self, chunk: &[u8]) -> Option<u8> {
        match self {
            Meter::Silent => None,
            Meter::Percent => {
                let text = String::from_utf8_lossy(chunk);
                percent_pattern()
                    .captures_iter(&text)
                    .filter_map(|c| c[1].parse::<u8>().ok())
                    .filter(|p| *p <= 100)
                    .last()
            }
            Meter::Entries { total, seen } => {
                let lines = chunk.iter().filter(|b| **b == b'\n').count();
                if lines == 0 {
                    return None;
                }
                *seen += lines;
                Some(ratio(*seen as u64, *total as u64))
            }
            Meter::Bytes { total, seen } => {
                *seen += chunk.len() as u64;
                Some(ratio(*seen, *total))
            }
        }
    }
}

fn ratio(seen: u64, total: u64) -> u8 {
    (seen.saturating_mul(100) / total).min(100) as u8
}

fn percent_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(\d{1,3})%").expect("static regex"))
}

/// One external archiver invocation.
pub(crate) struct ToolInvocation {
    program: String,
    args: Vec<OsString>,
    cwd: Option<PathBuf>,
    stdout_to: Option<PathBuf>,
    capture: bool,
    ok_codes: &'static [i32],
    meter: Meter,
    cleanup: Option<PathBuf>,
}

impl ToolInvocation {
    pub(crate) fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            stdout_to: None,
            capture: false,
            ok_codes: &[0],
            meter: Meter::Silent,
            cleanup: None,
        }
    }

    pub(crate) fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub(crate) fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    /// Stream stdout into `path` instead of parsing it. The file is
    /// removed again if the run fails or is aborted.
    pub(crate) fn stdout_to(mut self, path: &Path) -> Self {
        self.stdout_to = Some(path.to_path_buf());
        self.cleanup = Some(path.to_path_buf());
        self
    }

    pub(crate) fn capture_stdout(mut self) -> Self {
        self.capture = true;
        self
    }

    pub(crate) fn accept_exit_codes(mut self, codes: &'static [i32]) -> Self {
        self.ok_codes = codes;
        self
    }

    pub(crate) fn meter(mut self, meter: Meter) -> Self {
        self.meter = meter;
        self
    }

    /// Delete `path` (a partially written archive) on failure or abort.
    pub(crate) fn remove_on_failure(mut self, path: &Path) -> Self {
        self.cleanup = Some(path.to_path_buf());
        self
    }

    /// Run to completion, honouring `ctx.abort` between output chunks.
    /// Returns captured stdout (empty unless [`capture_stdout`] was set).
    ///
    /// [`capture_stdout`]: Self::capture_stdout
    pub(crate) async fn run(self, ctx: &OperationContext) -> TaskResult<String> {
        let ToolInvocation {
            program,
            args,
            cwd,
            stdout_to,
            capture,
            ok_codes,
            mut meter,
            cleanup,
        } = self;

        ctx.abort.check()?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = cwd {
            cmd.current_dir(dir);
        }

        tracing::debug!(tool = %program, ?args, "spawning archiver");
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TaskError::ToolMissing(program.clone())
            } else {
                TaskError::from(e)
            }
        })?;

        let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(TaskError::Unknown(format!("{} pipes were not captured", program)));
        };
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        });

        let mut sink = match stdout_to {
            Some(ref path) => Some(tokio::fs::File::create(path).await?),
            None => None,
        };
        let mut captured = Vec::new();
        let mut buf = vec![0u8; CHUNK_SIZE];

        let streamed: TaskResult<()> = loop {
            tokio::select! {
                biased;
                _ = ctx.abort.aborted() => break Err(TaskError::Aborted),
                read = stdout.read(&mut buf) => {
                    let n = match read {
                        Ok(0) => break Ok(()),
                        Ok(n) => n,
                        Err(e) => break Err(e.into()),
                    };
                    let chunk = &buf[..n];
                    if let Some(file) = sink.as_mut() {
                        if let Err(e) = file.write_all(chunk).await {
                            break Err(e.into());
                        }
                    } else if capture {
                        captured.extend_from_slice(chunk);
                    }
                    if let Some(p) = meter.observe(chunk) {
                        ctx.progress.report(p);
                    }
                }
            }
        };

        let finished = match streamed {
            Ok(()) => tokio::select! {
                biased;
                _ = ctx.abort.aborted() => Err(TaskError::Aborted),
                status = child.wait() => status.map_err(TaskError::from),
            },
            Err(e) => Err(e),
        };
        if finished.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        if let Some(mut file) = sink.take() {
            if finished.is_ok() {
                file.flush().await?;
            }
        }
        let stderr = stderr_task.await.unwrap_or_default();

        let failure = match finished {
            Ok(status) if status.code().is_some_and(|c| ok_codes.contains(&c)) => {
                return Ok(String::from_utf8_lossy(&captured).into_owned());
            }
            Ok(status) => TaskError::Execution(format!(
                "{} exited with {}: {}",
                program,
                status,
                stderr_tail(&stderr)
            )),
            Err(e) => e,
        };

        if let Some(ref path) = cleanup {
            if tokio::fs::remove_file(path).await.is_ok() {
                tracing::debug!(path = %path.display(), "removed partial output");
            }
        }
        if failure.is_aborted() {
            tracing::info!(tool = %program, "archiver aborted");
        } else {
            tracing::warn!(tool = %program, error = %failure, "archiver failed");
        }
        Err(failure)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let start = text
        .char_indices()
        .rev()
        .nth(STDERR_TAIL)
        .map(|(i, _)| i)
        .unwrap_or(0);
    text[start..].to_string()
}
