use super::runner::{Meter, ToolInvocation};
use super::*;

/// `.7z` via the 7-Zip command line. `-bsp1` routes the percentage
/// indicator to stdout, which is what the progress meter reads.
pub struct SevenZipStrategy;

/// 7-Zip exits with 1 for warnings (e.g. a file changed while reading).
const OK_CODES: &[i32] = &[0, 1];

#[async_trait::async_trait]
impl ArchiveStrategy for SevenZipStrategy {
    fn name(&self) -> &'static str {
        "7z"
    }

    async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        if options.sources.is_empty() {
            return Err(TaskError::Validation("no source paths given".into()));
        }
        let destination = absolute(&options.destination)?;
        ensure_absent(&destination).await?;
        let mut sources = Vec::with_capacity(options.sources.len());
        for source in &options.sources {
            ensure_exists(source).await?;
            sources.push(absolute(source)?);
        }

        ToolInvocation::new(&options.tools.seven_zip)
            .args(["a", "-y", "-bsp1", "-bso0"])
            .arg(&destination)
            .args(&sources)
            .accept_exit_codes(OK_CODES)
            .meter(Meter::Percent)
            .remove_on_failure(&destination)
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!("created {}", destination.display())))
    }

    async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        tokio::fs::create_dir_all(&options.destination).await?;

        let mut out_flag = OsString::from("-o");
        out_flag.push(options.destination.as_os_str());
        ToolInvocation::new(&options.tools.seven_zip)
            .args(["x", "-y", "-bsp1", "-bso0"])
            .arg(out_flag)
            .arg(archive)
            .accept_exit_codes(OK_CODES)
            .meter(Meter::Percent)
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!(
            "extracted {} to {}",
            archive.display(),
            options.destination.display()
        )))
    }

    async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        let stdout = ToolInvocation::new(&options.tools.seven_zip)
            .args(["l", "-slt", "-ba"])
            .arg(archive)
            .capture_stdout()
            .accept_exit_codes(OK_CODES)
            .run(&options.ctx)
            .await?;
        let entries = parse_slt_paths(&stdout);
        Ok(ArchiveOutput::message(format!("{} entries", entries.len())).with_entries(entries))
    }
}

/// Pull `Path = ...` values out of `7z l -slt` technical listing.
fn parse_slt_paths(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .filter_map(|l| l.strip_prefix("Path = "))
        .map(|p| p.trim_end().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slt_listing() {
        let out = "Path = docs\nFolder = +\n\nPath = docs/readme.md\nSize = 12\nAttributes = A\n";
        assert_eq!(parse_slt_paths(out), vec!["docs", "docs/readme.md"]);
    }
}
