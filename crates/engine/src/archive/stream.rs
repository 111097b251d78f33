use super::runner::{Meter, ToolInvocation};
use super::*;

/// Single-file stream compressors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCodec {
    Gzip,
    Bzip2,
}

impl StreamCodec {
    fn program(self, tools: &ToolPaths) -> &str {
        match self {
            StreamCodec::Gzip => &tools.gzip,
            StreamCodec::Bzip2 => &tools.bzip2,
        }
    }

    /// Every file suffix that resolves to this codec.
    fn suffixes(self) -> &'static [&'static str] {
        match self {
            StreamCodec::Gzip => &[".gz", ".gzip"],
            StreamCodec::Bzip2 => &[".bz2", ".bzip2"],
        }
    }
}

/// `.gz` / `.bz2`: compress exactly one file, piping the tool's stdout
/// into the destination so progress and abort checks happen per chunk.
pub struct StreamStrategy {
    codec: StreamCodec,
}

impl StreamStrategy {
    pub const fn new(codec: StreamCodec) -> Self {
        Self { codec }
    }

    /// `notes.txt.gz` -> `notes.txt`; names without a codec suffix get `.out`.
    fn decompressed_name(&self, archive: &Path) -> TaskResult<String> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TaskError::Validation(format!("{} has no file name", archive.display())))?;
        let stem = self.codec.suffixes().iter().find_map(|ext| {
            let stem_len = name.len().checked_sub(ext.len()).filter(|n| *n > 0)?;
            (name.is_char_boundary(stem_len) && name[stem_len..].eq_ignore_ascii_case(ext))
                .then(|| name[..stem_len].to_string())
        });
        Ok(stem.unwrap_or_else(|| format!("{}.out", name)))
    }
}

#[async_trait::async_trait]
impl ArchiveStrategy for StreamStrategy {
    fn name(&self) -> &'static str {
        match self.codec {
            StreamCodec::Gzip => "gz",
            StreamCodec::Bzip2 => "bz2",
        }
    }

    async fn archive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let [source] = options.sources.as_slice() else {
            return Err(TaskError::Validation(format!(
                "{} compresses exactly one file",
                self.name()
            )));
        };
        let metadata = tokio::fs::metadata(source).await.map_err(|_| {
            TaskError::Validation(format!("{} does not exist", source.display()))
        })?;
        if !metadata.is_file() {
            return Err(TaskError::Validation(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        ensure_absent(&options.destination).await?;

        // Compressed bytes against the input size: a rough lower bound
        // that the orchestrator tops up to 100 on success.
        ToolInvocation::new(self.codec.program(&options.tools))
            .arg("-c")
            .arg(source)
            .stdout_to(&options.destination)
            .meter(Meter::bytes(metadata.len()))
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!(
            "created {}",
            options.destination.display()
        )))
    }

    async fn unarchive(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        let name = self.decompressed_name(archive)?;
        tokio::fs::create_dir_all(&options.destination).await?;
        let target = options.destination.join(&name);
        ensure_absent(&target).await?;

        ToolInvocation::new(self.codec.program(&options.tools))
            .arg("-d")
            .arg("-c")
            .arg(archive)
            .stdout_to(&target)
            .run(&options.ctx)
            .await?;

        Ok(ArchiveOutput::message(format!("extracted {}", target.display()))
            .with_entries(vec![name]))
    }

    async fn list(&self, options: &ArchiveOptions) -> TaskResult<ArchiveOutput> {
        let archive = options.archive_path()?;
        ensure_exists(archive).await?;
        let name = self.decompressed_name(archive)?;
        Ok(ArchiveOutput::message("1 entry").with_entries(vec![name]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompressed_name() {
        let gz = StreamStrategy::new(StreamCodec::Gzip);
        assert_eq!(gz.decompressed_name(Path::new("/x/notes.txt.gz")).unwrap(), "notes.txt");
        assert_eq!(gz.decompressed_name(Path::new("/x/LOG.GZ")).unwrap(), "LOG");
        assert_eq!(gz.decompressed_name(Path::new("/x/blob")).unwrap(), "blob.out");

        let bz = StreamStrategy::new(StreamCodec::Bzip2);
        assert_eq!(bz.decompressed_name(Path::new("data.csv.bz2")).unwrap(), "data.csv");
    }

    #[test]
    fn test_decompressed_name_strips_long_suffixes() {
        let gz = StreamStrategy::new(StreamCodec::Gzip);
        assert_eq!(gz.decompressed_name(Path::new("/x/x.gzip")).unwrap(), "x");
        assert_eq!(gz.decompressed_name(Path::new("/x/.gzip")).unwrap(), ".gzip.out");

        let bz = StreamStrategy::new(StreamCodec::Bzip2);
        assert_eq!(bz.decompressed_name(Path::new("dump.sql.BZIP2")).unwrap(), "dump.sql");

        for name in ["x.gzip", "x.gz"] {
            assert_eq!(ArchiveFormat::from_path(Path::new(name)), ArchiveFormat::Gz);
        }
        assert_eq!(ArchiveFormat::from_path(Path::new("x.bzip2")), ArchiveFormat::Bz2);
    }
}
