use super::runner::{Meter, ToolInvocation};
use super::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gzip,
    Bzip2,
    Xz,
}

impl TarCompression {
    fn flag(self) -> Option<&'static str> {
        match self {
            TarCompression::None => None,
            TarCompression::Gzip => Some("-z"),
            TarCompression::Bzip2 => Some("-j"),
            TarCompression::Xz => Some("-J"),
        }
    }
}

/// Plain and compressed tarballs through the system `tar`.
pub struct TarStrategy {
    compression: TarCompression,
}

impl TarStrategy {
    pub const fn new(compression: TarCompression) -> Self {
        Self { compression }
    }

    fn invocation(&self, options: &ArchiveOptions, mode: &str) -> ToolInvocation {
        ToolInvocation::new(&options.tools.tar)
            .arg(mode)
            .args(self.compression.flag())
    }

    async fn entries(&self, archive: &Path, options: &ArchiveOptions) -> TaskResult<Vec<String>> {
        let stdout = self
            .invocation(options, "-t")
            .arg("-f")
            .arg(archive)
            .capture_stdout()
            .run(&options.ctx)
            .await?;
        Ok(output_lines(&stdout))
    }
}

#[async_trait::async_trait]
impl ArchiveStrategy for TarStrategy {
    fn name(&self) -> &'static str {
        match self.compression {
            TarCompression::None => "tar",
            TarCompression::Gzip => "tar.gz",
            TarCompression::Bzip2 => "tar.bz2",
            TarCompression::Xz => "tar.xz",
        }
    }

    async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let destination = absolute(&options.destination)?;
        ensure_absent(&destination).await?;
        if options.sources.is_empty() {
            return Err(TaskError::Validation("no source paths given".into()));
        }

        let mut invocation = self
            .invocation(options, "-c")
            .arg("-v")
            .arg("-f")
            .arg(&destination);
        for source in &options.sources {
            ensure_exists(source).await?;
            let source = absolute(source)?;
            let (Some(parent), Some(name)) = (source.parent(), source.file_name()) else {
                return Err(TaskError::Validation(format!(
                    "cannot archive {}",
                    source.display()
                )));
            };
            invocation = invocation.arg("-C").arg(parent).arg(name);
        }
        let total = count_entries(&options.sources, &options.ctx).await?;

        invocation
            .meter(Meter::entries(total))
            .remove_on_failure(&destination)
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!(
            "created {} ({} entries)",
            destination.display(),
            total
        )))
    }

    async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        let entries = self.entries(archive, options).await?;
        tokio::fs::create_dir_all(&options.destination).await?;

        self.invocation(options, "-x")
            .arg("-v")
            .arg("-f")
            .arg(archive)
            .arg("-C")
            .arg(&options.destination)
            .meter(Meter::entries(entries.len()))
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!(
            "extracted {} entries to {}",
            entries.len(),
            options.destination.display()
        ))
        .with_entries(entries))
    }

    async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        let entries = self.entries(archive, options).await?;
        Ok(ArchiveOutput::message(format!("{} entries", entries.len())).with_entries(entries))
    }
}
