//! Daemon mode – line-delimited JSON over a Unix socket.
//!
//! Each connection sends `{id, method, params}` lines and gets one
//! response line per request. After `subscribe`, registry events are
//! pushed on the same connection as `{"event": ...}` lines until it
//! closes.

use engine::tasks::SubscriptionId;
use engine::types::*;
use engine::{AppContext, CommandRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;

pub async fn run_daemon(socket_path: PathBuf, ctx: AppContext, registry: CommandRegistry) {
    // Remove stale socket if it exists
    let _ = std::fs::remove_file(&socket_path);

    let listener = match UnixListener::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            eprintln!("error: cannot bind socket {}: {}", socket_path.display(), e);
            std::process::exit(2);
        }
    };

    tracing::info!(socket = %socket_path.display(), "shelfctl daemon listening");
    let ctx = Arc::new(ctx);
    let registry = Arc::new(registry);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _addr)) => {
                    let ctx = Arc::clone(&ctx);
                    let registry = Arc::clone(&registry);
                    tokio::spawn(async move { serve_connection(stream, ctx, registry).await });
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }
    let _ = std::fs::remove_file(&socket_path);
}

/// Outbound lines go through one channel so responses and pushed events
/// never interleave mid-line.
async fn serve_connection(stream: UnixStream, ctx: Arc<AppContext>, registry: Arc<CommandRegistry>) {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(mut line) = rx.recv().await {
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut subscription: Option<SubscriptionId> = None;
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let response = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(req) if req.method == "subscribe" => {
                if subscription.is_none() {
                    subscription = Some(subscribe(&ctx, tx.clone()));
                }
                subscribed_response(req.id)
            }
            Ok(req) => handle_request(req, &ctx, &registry).await,
            Err(e) => error_response(
                "unknown".into(),
                ErrorCode::InvalidInput,
                format!("invalid JSON request: {}", e),
            ),
        };
        let resp_json = serde_json::to_string(&response).unwrap_or_else(|_| "{}".into());
        if tx.send(resp_json).is_err() {
            break;
        }
    }

    if let Some(id) = subscription {
        ctx.registry().unsubscribe(id);
    }
    drop(tx);
    let _ = writer_task.await;
    tracing::debug!("connection closed");
}

fn subscribe(ctx: &AppContext, tx: mpsc::UnboundedSender<String>) -> SubscriptionId {
    ctx.registry().subscribe(move |event| {
        let pushed = DaemonEvent {
            event: event.clone(),
        };
        if let Ok(line) = serde_json::to_string(&pushed) {
            let _ = tx.send(line);
        }
    })
}

fn subscribed_response(id: String) -> DaemonResponse {
    let mut result = result_ok("subscribe", "events", &new_run_id(), 0);
    result.data = Some(serde_json::json!({ "subscribed": true }));
    DaemonResponse {
        id,
        result: Some(result),
        error: None,
    }
}

fn error_response(id: String, code: ErrorCode, message: String) -> DaemonResponse {
    DaemonResponse {
        id,
        result: None,
        error: Some(ErrorInfo {
            code,
            message,
            details: serde_json::Value::Null,
        }),
    }
}

async fn handle_request(
    req: DaemonRequest,
    ctx: &AppContext,
    registry: &CommandRegistry,
) -> DaemonResponse {
    let result = match req.method.as_str() {
        "call" => {
            let cmd_name = req.params.get("cmd").and_then(|v| v.as_str()).unwrap_or("");
            let args = req
                .params
                .get("args")
                .cloned()
                .unwrap_or(serde_json::Value::Object(Default::default()));
            registry.execute(cmd_name, args, ctx).await
        }
        "probe" => {
            let target = req
                .params
                .get("target")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            engine::probes::run_probe(target, ctx).await
        }
        other => {
            return error_response(
                req.id,
                ErrorCode::InvalidInput,
                format!("unknown method: {}", other),
            );
        }
    };

    DaemonResponse {
        id: req.id,
        result: Some(result),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::Lines;
    use tokio::net::unix::OwnedReadHalf;

    async fn read_json(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> serde_json::Value {
        let line = lines.next_line().await.unwrap().unwrap();
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let ctx = AppContext::default();
        let registry = CommandRegistry::new();
        let req = DaemonRequest {
            id: "1".into(),
            method: "shutdown".into(),
            params: serde_json::Value::Null,
        };
        let resp = handle_request(req, &ctx, &registry).await;
        assert_eq!(resp.id, "1");
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, ErrorCode::InvalidInput);
    }

    #[tokio::test]
    async fn test_call_and_subscribe_over_socket() {
        let ctx = Arc::new(AppContext::default());
        let registry = Arc::new(CommandRegistry::new());
        let (server, client) = UnixStream::pair().unwrap();
        tokio::spawn(serve_connection(server, Arc::clone(&ctx), registry));

        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer
            .write_all(b"{\"id\":\"a\",\"method\":\"call\",\"params\":{\"cmd\":\"ping\"}}\n")
            .await
            .unwrap();
        let pong = read_json(&mut lines).await;
        assert_eq!(pong["id"], "a");
        assert_eq!(pong["result"]["data"]["pong"], true);

        writer
            .write_all(b"{\"id\":\"b\",\"method\":\"subscribe\"}\n")
            .await
            .unwrap();
        let ack = read_json(&mut lines).await;
        assert_eq!(ack["result"]["data"]["subscribed"], true);

        let id = ctx.registry().create(TaskDescriptor {
            kind: TaskKind::Generic,
            message: "pushed".into(),
            metadata: TaskMetadata::Generic,
        });
        let pushed = read_json(&mut lines).await;
        assert_eq!(pushed["event"]["create"]["id"], id.to_string());

        drop(writer);
        drop(lines);
    }
}
