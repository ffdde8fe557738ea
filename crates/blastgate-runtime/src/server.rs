//! UDS JSON-RPC status server.
//! Connection-per-request, newline-delimited JSON.
//!
//! Methods:
//! - `list_devices`: registry snapshot, one object per device, id order.
//! - `switch_state`: report of the latest tool-switch run.

use std::path::Path;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::coordinator::SwitchReport;
use crate::registry::RegistryHandle;

const METHOD_NOT_FOUND: i64 = -32601;
const PARSE_ERROR: i64 = -32700;

/// What the server reads from. Cheap to clone per connection.
#[derive(Clone)]
pub struct StatusSources {
    pub registry: RegistryHandle,
    pub switch: watch::Receiver<SwitchReport>,
}

/// Bind the socket, then serve until `cancel` fires.
pub async fn run_server(
    socket_path: &str,
    sources: StatusSources,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = bind(socket_path).await?;
    serve(listener, sources, cancel).await
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: UnixListener,
    sources: StatusSources,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    loop {
        let (stream, _) = tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => accepted?,
        };
        let sources = sources.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, sources).await {
                tracing::debug!("connection error: {e}");
            }
        });
    }

    tracing::debug!("status server stopped");
    Ok(())
}

/// Claim `socket_path`: replaces a stale socket, refuses a live one.
pub async fn bind(socket_path: &str) -> anyhow::Result<UnixListener> {
    let socket_dir = Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path {socket_path}"))?;
    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    if Path::new(socket_path).exists() {
        if UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another daemon is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!("status server listening on {socket_path}");
    Ok(listener)
}

async fn handle_connection(stream: UnixStream, sources: StatusSources) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response = match serde_json::from_str::<Value>(line.trim()) {
        Ok(request) => handle_request(&request, &sources).await?,
        Err(e) => error_response(Value::Null, PARSE_ERROR, &format!("parse error: {e}")),
    };

    let mut resp = serde_json::to_string(&response)?;
    resp.push('\n');
    writer.write_all(resp.as_bytes()).await?;
    Ok(())
}

/// Answer one decoded request.
pub async fn handle_request(request: &Value, sources: &StatusSources) -> anyhow::Result<Value> {
    let method = request["method"].as_str().unwrap_or("");
    let id = request["id"].clone();

    let result = match method {
        "list_devices" => serde_json::to_value(sources.registry.snapshot().await)?,
        "switch_state" => serde_json::to_value(&*sources.switch.borrow())?,
        _ => return Ok(error_response(id, METHOD_NOT_FOUND, "method not found")),
    };

    Ok(json!({
        "jsonrpc": "2.0",
        "result": result,
        "id": id,
    }))
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message},
        "id": id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use blastgate_core::registry::{DeviceClassifier, DeviceRegistry};

    use crate::client::rpc_call;
    use crate::coordinator::SwitchPhase;

    // ── Helpers ──────────────────────────────────────────────────────

    fn sources() -> (StatusSources, watch::Sender<SwitchReport>) {
        let registry =
            RegistryHandle::new(DeviceRegistry::new(DeviceClassifier::new("0", ["tablesaw"])));
        let (tx, rx) = watch::channel(SwitchReport::default());
        (
            StatusSources {
                registry,
                switch: rx,
            },
            tx,
        )
    }

    fn request(method: &str) -> Value {
        json!({"jsonrpc": "2.0", "method": method, "params": {}, "id": 7})
    }

    // ── Request handling ─────────────────────────────────────────────

    #[tokio::test]
    async fn list_devices_returns_snapshot_records() {
        let (sources, _tx) = sources();
        sources
            .registry
            .heartbeat("6", r#"{"gatePos":"open","ipAddress":"10.0.0.6"}"#)
            .await;

        let resp = handle_request(&request("list_devices"), &sources)
            .await
            .expect("handled");
        assert_eq!(resp["id"], 7);
        let devices = resp["result"].as_array().expect("array");
        let six = devices
            .iter()
            .find(|d| d["id"] == "6")
            .expect("gate 6 listed");
        assert_eq!(six["kind"], "gate");
        assert_eq!(six["alive"], true);
        assert_eq!(six["status"], "open");
        assert_eq!(six["ip_address"], "10.0.0.6");
        assert!(six["last_seen"].is_string());

        // Preregistered coordinator and tool are listed even before they speak.
        assert!(devices.iter().any(|d| d["id"] == "0"));
        assert!(devices.iter().any(|d| d["id"] == "tablesaw"));
    }

    #[tokio::test]
    async fn switch_state_reflects_latest_report() {
        let (sources, tx) = sources();
        tx.send_replace(SwitchReport {
            run_id: 3,
            tool: Some("jointer".to_owned()),
            phase: SwitchPhase::Polling,
            commands_sent: 4,
            ..SwitchReport::default()
        });

        let resp = handle_request(&request("switch_state"), &sources)
            .await
            .expect("handled");
        assert_eq!(resp["result"]["tool"], "jointer");
        assert_eq!(resp["result"]["phase"], "polling");
        assert_eq!(resp["result"]["commands_sent"], 4);
    }

    #[tokio::test]
    async fn unknown_method_is_an_rpc_error() {
        let (sources, _tx) = sources();
        let resp = handle_request(&request("reboot"), &sources)
            .await
            .expect("handled");
        assert_eq!(resp["error"]["code"], METHOD_NOT_FOUND);
        assert!(resp.get("result").is_none());
    }

    // ── Socket round trip ────────────────────────────────────────────

    #[tokio::test]
    async fn serves_over_unix_socket_and_stops_on_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("run").join("blastgated.sock");
        let socket = socket.to_str().expect("utf-8 path").to_owned();

        let (sources, _tx) = sources();
        sources.registry.ack("5", "close").await;

        let cancel = CancellationToken::new();
        let server = tokio::spawn({
            let socket = socket.clone();
            let cancel = cancel.clone();
            async move { run_server(&socket, sources, cancel).await }
        });

        let mut devices = Value::Null;
        for _ in 0..50 {
            if let Ok(v) = rpc_call(&socket, "list_devices").await {
                devices = v;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let five = devices
            .as_array()
            .and_then(|d| d.iter().find(|d| d["id"] == "5"))
            .expect("gate 5 served");
        assert_eq!(five["status"], "close");

        let err = rpc_call(&socket, "nope").await.expect_err("rpc error");
        assert!(err.to_string().contains("method not found"));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .expect("server exits after cancel")
            .expect("no panic")
            .expect("clean shutdown");
    }
}
