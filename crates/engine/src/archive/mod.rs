//! Archive formats, the strategy seam and the format dispatcher.
//!
//! Every format tag maps to exactly one stateless strategy through an
//! exhaustive `match`; adding a variant to [`ArchiveFormat`] does not
//! compile until it has a dispatch arm.

mod runner;
pub mod service;
mod sevenz;
mod stream;
mod tar;
mod zip;

use crate::error::{TaskError, TaskResult};
use crate::settings::ToolPaths;
use crate::tasks::OperationContext;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use service::{
    ArchiveOutcome, ArchiveRequest, ArchiveService, CreateArchiveRequest, ExtractArchiveRequest,
    PathList, ReadArchiveRequest, TaskHandle,
};
pub use sevenz::SevenZipStrategy;
pub use stream::{StreamCodec, StreamStrategy};
pub use tar::{TarCompression, TarStrategy};
pub use zip::ZipStrategy;

// ---------------------------------------------------------------------------
// Format tag
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
    Gz,
    Bz2,
    /// Sentinel for names and tags nothing recognises. It is passed through
    /// to the dispatcher, which rejects it.
    Unknown,
}

impl ArchiveFormat {
    /// Every supported format (everything except `Unknown`).
    pub const SUPPORTED: [ArchiveFormat; 8] = [
        ArchiveFormat::Zip,
        ArchiveFormat::SevenZip,
        ArchiveFormat::Tar,
        ArchiveFormat::TarGz,
        ArchiveFormat::TarBz2,
        ArchiveFormat::TarXz,
        ArchiveFormat::Gz,
        ArchiveFormat::Bz2,
    ];

    /// Resolve from a file name. Compound suffixes win over their tails,
    /// so `a.tar.gz` is `TarGz`, not `Gz`.
    pub fn from_path(path: &Path) -> Self {
        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().to_ascii_lowercase(),
            None => return ArchiveFormat::Unknown,
        };
        const SUFFIXES: [(&str, ArchiveFormat); 14] = [
            (".tar.gz", ArchiveFormat::TarGz),
            (".tgz", ArchiveFormat::TarGz),
            (".tar.bz2", ArchiveFormat::TarBz2),
            (".tbz2", ArchiveFormat::TarBz2),
            (".tbz", ArchiveFormat::TarBz2),
            (".tar.xz", ArchiveFormat::TarXz),
            (".txz", ArchiveFormat::TarXz),
            (".tar", ArchiveFormat::Tar),
            (".zip", ArchiveFormat::Zip),
            (".7z", ArchiveFormat::SevenZip),
            (".gz", ArchiveFormat::Gz),
            (".bz2", ArchiveFormat::Bz2),
            (".gzip", ArchiveFormat::Gz),
            (".bzip2", ArchiveFormat::Bz2),
        ];
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.ends_with(suffix) && name.len() > suffix.len())
            .map(|(_, f)| *f)
            .unwrap_or(ArchiveFormat::Unknown)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::SevenZip => "7z",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::TarXz => "tar.xz",
            ArchiveFormat::Gz => "gz",
            ArchiveFormat::Bz2 => "bz2",
            ArchiveFormat::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for ArchiveFormat {
    type Err = std::convert::Infallible;

    /// Parse a request tag. Unrecognised tags become `Unknown` rather than
    /// an error; the dispatcher decides what to do with them.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().trim_start_matches('.').to_ascii_lowercase();
        Ok(match tag.as_str() {
            "zip" => ArchiveFormat::Zip,
            "7z" | "7zip" => ArchiveFormat::SevenZip,
            "tar" => ArchiveFormat::Tar,
            "tar.gz" | "tgz" => ArchiveFormat::TarGz,
            "tar.bz2" | "tbz2" | "tbz" => ArchiveFormat::TarBz2,
            "tar.xz" | "txz" => ArchiveFormat::TarXz,
            "gz" | "gzip" => ArchiveFormat::Gz,
            "bz2" | "bzip2" => ArchiveFormat::Bz2,
            _ => ArchiveFormat::Unknown,
        })
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Strategy seam
// ---------------------------------------------------------------------------

/// Inputs for one strategy call. Built fresh per call and never shared
/// between tasks.
///
/// For `archive`, `sources` are the inputs and `destination` is the
/// archive to write. For `unarchive` and `list`, `sources[0]` is the
/// archive and `destination` is the target folder.
#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub sources: Vec<PathBuf>,
    pub destination: PathBuf,
    pub tools: Arc<ToolPaths>,
    pub ctx: OperationContext,
}

impl ArchiveOptions {
    pub fn archive_path(&self) -> TaskResult<&Path> {
        match self.sources.as_slice() {
            [one] => Ok(one.as_path()),
            [] => Err(TaskError::Validation("no archive given".into())),
            _ => Err(TaskError::Validation("expected exactly one archive".into())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArchiveOutput {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<String>,
}

impl ArchiveOutput {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            entries: Vec::new(),
        }
    }

    pub fn with_entries(mut self, entries: Vec<String>) -> Self {
        self.entries = entries;
        self
    }
}

/// Format-specific archive implementation.
///
/// Implementations hold no per-task state and must poll
/// `options.ctx.abort` at every unit of work.
#[async_trait::async_trait]
pub trait ArchiveStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput>;

    async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput>;

    /// Entry names contained in the archive.
    async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput>;
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

static ZIP: ZipStrategy = ZipStrategy;
static SEVEN_ZIP: SevenZipStrategy = SevenZipStrategy;
static TAR: TarStrategy = TarStrategy::new(TarCompression::None);
static TAR_GZ: TarStrategy = TarStrategy::new(TarCompression::Gzip);
static TAR_BZ2: TarStrategy = TarStrategy::new(TarCompression::Bzip2);
static TAR_XZ: TarStrategy = TarStrategy::new(TarCompression::Xz);
static GZ: StreamStrategy = StreamStrategy::new(StreamCodec::Gzip);
static BZ2: StreamStrategy = StreamStrategy::new(StreamCodec::Bzip2);

/// The strategy for `format`. `Unknown` is a validation error.
pub fn strategy_for(format: ArchiveFormat) -> TaskResult<&'static dyn ArchiveStrategy> {
    let strategy: &'static dyn ArchiveStrategy = match format {
        ArchiveFormat::Zip => &ZIP,
        ArchiveFormat::SevenZip => &SEVEN_ZIP,
        ArchiveFormat::Tar => &TAR,
        ArchiveFormat::TarGz => &TAR_GZ,
        ArchiveFormat::TarBz2 => &TAR_BZ2,
        ArchiveFormat::TarXz => &TAR_XZ,
        ArchiveFormat::Gz => &GZ,
        ArchiveFormat::Bz2 => &BZ2,
        ArchiveFormat::Unknown => {
            return Err(TaskError::Validation("unsupported archive format".into()))
        }
    };
    Ok(strategy)
}

/// Seam between the orchestrator and [`strategy_for`], so tests can
/// substitute strategies.
pub trait StrategyResolver: Send + Sync {
    fn resolve(&self, format: ArchiveFormat) -> TaskResult<&'static dyn ArchiveStrategy>;
}

pub struct FormatDispatcher;

impl StrategyResolver for FormatDispatcher {
    fn resolve(&self, format: ArchiveFormat) -> TaskResult<&'static dyn ArchiveStrategy> {
        strategy_for(format)
    }
}

// ---------------------------------------------------------------------------
// Shared path helpers
// ---------------------------------------------------------------------------

pub(crate) fn absolute(path: &Path) -> TaskResult<PathBuf> {
    std::path::absolute(path).map_err(TaskError::from)
}

pub(crate) async fn ensure_exists(path: &Path) -> TaskResult<()> {
    match tokio::fs::try_exists(path).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(TaskError::Validation(format!(
            "{} does not exist",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn ensure_absent(path: &Path) -> TaskResult<()> {
    match tokio::fs::try_exists(path).await {
        Ok(false) => Ok(()),
        Ok(true) => Err(TaskError::Validation(format!(
            "{} already exists",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// Split sources into a working directory (parent of the first source)
/// and the names to pass relative to it. Sources living elsewhere are
/// passed as absolute paths.
pub(crate) fn relative_sources(sources: &[PathBuf]) -> TaskResult<(PathBuf, Vec<OsString>)> {
    let first = sources
        .first()
        .ok_or_else(|| TaskError::Validation("no source paths given".into()))?;
    let first = absolute(first)?;
    let base = first
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| TaskError::Validation(format!("{} has no parent", first.display())))?;

    let mut names = Vec::with_capacity(sources.len());
    for source in sources {
        let source = absolute(source)?;
        match (source.parent(), source.file_name()) {
            (Some(parent), Some(name)) if parent == base => names.push(name.to_os_string()),
            _ => names.push(source.into_os_string()),
        }
    }
    Ok((base, names))
}

/// Number of filesystem entries under `sources` (inclusive), counted off
/// the async runtime.
pub(crate) async fn count_entries(sources: &[PathBuf], ctx: &OperationContext) -> TaskResult<usize> {
    let sources = sources.to_vec();
    let abort = ctx.abort.clone();
    tokio::task::spawn_blocking(move || {
        let mut total = 0usize;
        for source in &sources {
            for entry in walkdir::WalkDir::new(source) {
                abort.check()?;
                entry.map_err(|e| TaskError::Execution(e.to_string()))?;
                total += 1;
            }
        }
        Ok(total)
    })
    .await?
}

/// Non-empty, trimmed output lines.
pub(crate) fn output_lines(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect()
}
