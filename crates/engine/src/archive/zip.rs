use super::runner::{Meter, ToolInvocation};
use super::*;

/// `.zip` via Info-ZIP's `zip` / `unzip`.
pub struct ZipStrategy;

impl ZipStrategy {
    async fn entries(&self, archive: &Path, options: &ArchiveOptions) -> TaskResult<Vec<String>> {
        let stdout = ToolInvocation::new(&options.tools.unzip)
            .arg("-Z1")
            .arg(archive)
            .capture_stdout()
            .run(&options.ctx)
            .await?;
        Ok(output_lines(&stdout))
    }
}

#[async_trait::async_trait]
impl ArchiveStrategy for ZipStrategy {
    fn name(&self) -> &'static str {
        "zip"
    }

    async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let destination = absolute(&options.destination)?;
        ensure_absent(&destination).await?;
        for source in &options.sources {
            ensure_exists(source).await?;
        }
        let (base, names) = relative_sources(&options.sources)?;
        let total = count_entries(&options.sources, &options.ctx).await?;

        ToolInvocation::new(&options.tools.zip)
            .arg("-r")
            .arg(&destination)
            .args(&names)
            .current_dir(&base)
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

        // unzip prints an "Archive:" header before one line per entry.
        ToolInvocation::new(&options.tools.unzip)
            .arg("-o")
            .arg(archive)
            .arg("-d")
            .arg(&options.destination)
            .meter(Meter::entries(entries.len() + 1))
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
