use crate::config::LoggingConfig;
use regex::Regex;
use std::io;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Built-in patterns applied when `redaction.use_default_pii` is set.
/// Home directories carry user names into every logged path.
const DEFAULT_PII: &[(&str, &str)] = &[
    (r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}", "<email>"),
    (r"/(home|Users)/[^/\s]+", "/$1/<user>"),
];

struct RedactingWriter<W> {
    inner: W,
    patterns: Vec<(Regex, String)>,
}

impl<W: io::Write> io::Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut redacted = String::from_utf8_lossy(buf).into_owned();
        for (re, replacement) in &self.patterns {
            redacted = re.replace_all(&redacted, replacement.as_str()).into_owned();
        }
        self.inner.write_all(redacted.as_bytes())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// stdout carries command results, so logs go to stderr.
struct RedactingMakeWriter {
    patterns: Vec<(Regex, String)>,
}

impl<'a> fmt::MakeWriter<'a> for RedactingMakeWriter {
    type Writer = RedactingWriter<io::Stderr>;

    fn make_writer(&self) -> Self::Writer {
        RedactingWriter {
            inner: io::stderr(),
            patterns: self.patterns.clone(),
        }
    }
}

fn redaction_patterns(config: &LoggingConfig) -> Vec<(Regex, String)> {
    let redaction = &config.redaction;
    if !redaction.enabled {
        return Vec::new();
    }

    let defaults = DEFAULT_PII
        .iter()
        .filter(|_| redaction.use_default_pii)
        .map(|(re, placeholder)| (*re, *placeholder));
    let custom = redaction
        .patterns
        .iter()
        .map(|p| (p.regex.as_str(), p.placeholder.as_str()));

    defaults
        .chain(custom)
        .filter_map(|(re, placeholder)| match Regex::new(re) {
            Ok(re) => Some((re, placeholder.to_string())),
            Err(e) => {
                eprintln!("warning: ignoring invalid redaction pattern {}: {}", re, e);
                None
            }
        })
        .collect()
}

pub fn init_logging(config: &LoggingConfig) {
    let level = config.levels.filter_directive();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let show_file = config.format.location.show_file;
    let show_line = config.format.location.show_line;
    let make_writer = RedactingMakeWriter {
        patterns: redaction_patterns(config),
    };

    // Use Layer::boxed() to unify the types of the if/else branches
    let fmt_layer = if !config.format.show_time {
        fmt::layer()
            .with_writer(make_writer)
            .with_target(show_file)
            .with_file(show_file)
            .with_line_number(show_line)
            .without_time()
            .boxed()
    } else {
        fmt::layer()
            .with_writer(make_writer)
            .with_target(show_file)
            .with_file(show_file)
            .with_line_number(show_line)
            .boxed()
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
