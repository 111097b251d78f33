//! Targeted capability probes.

use crate::context::AppContext;
use crate::types::*;
use std::time::Instant;

/// Run a probe by name and return a full CommandResult.
pub async fn run_probe(name: &str, ctx: &AppContext) -> CommandResult {
    match name {
        "tools" => probe_tools(ctx),
        _ => {
            let run_id = new_run_id();
            result_err(
                "probe",
                name,
                &run_id,
                0,
                ErrorCode::InvalidInput,
                format!("unknown probe: {} (available: tools)", name),
            )
        }
    }
}

// ---------------------------------------------------------------------------
// Archiver tools probe
// ---------------------------------------------------------------------------

/// Resolve every configured archiver on PATH. Missing binaries skip the
/// probe rather than fail it: the formats that need them are simply
/// unavailable.
fn probe_tools(ctx: &AppContext) -> CommandResult {
    let run_id = new_run_id();
    let start = Instant::now();
    let mut resolved = serde_json::Map::new();
    let mut missing = Vec::new();

    for (label, program) in ctx.settings().archive.tools.all() {
        let t0 = Instant::now();
        match which::which(program) {
            Ok(path) => {
                resolved.insert(label.into(), serde_json::json!(path.display().to_string()));
            }
            Err(e) => {
                tracing::debug!(tool = label, program, error = %e, "archiver not found");
                resolved.insert(label.into(), serde_json::Value::Null);
                missing.push(label);
            }
        }
        tracing::trace!(tool = label, elapsed_ms = t0.elapsed().as_millis() as u64, "resolved");
    }

    let total = start.elapsed().as_millis() as u64;
    let mut r = if missing.is_empty() {
        result_ok("probe", "tools", &run_id, total)
    } else {
        result_skip(
            "probe",
            "tools",
            &run_id,
            total,
            ErrorCode::DependencyMissing,
            format!("not found on PATH: {}", missing.join(", ")),
        )
    };
    r.data = Some(serde_json::json!({ "tools": resolved }));
    r
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::EngineSettings;

    #[tokio::test]
    async fn test_unknown_probe() {
        let ctx = AppContext::default();
        let r = run_probe("clipboard", &ctx).await;
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_missing_tool_skips() {
        let mut settings = EngineSettings::default();
        settings.archive.tools.seven_zip = "shelf-no-such-archiver".into();
        let ctx = AppContext::default_platform(settings);

        let r = run_probe("tools", &ctx).await;
        assert_eq!(r.status, Status::Skip);
        let err = r.error.unwrap();
        assert_eq!(err.code, ErrorCode::DependencyMissing);
        assert!(err.message.contains("7z"));
        assert!(r.data.unwrap()["tools"]["7z"].is_null());
    }
}
