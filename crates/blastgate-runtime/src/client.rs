//! UDS JSON-RPC client for CLI subcommands.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

pub async fn rpc_call(socket_path: &str, method: &str) -> anyhow::Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot connect to daemon at {socket_path}: {e}"))?;

    let (reader, mut writer) = stream.into_split();

    let request = serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {},
        "id": 1,
    });
    let mut req = serde_json::to_string(&request)?;
    req.push('\n');
    writer.write_all(req.as_bytes()).await?;
    writer.shutdown().await?;

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await?;

    let response: Value = serde_json::from_str(line.trim())?;

    if let Some(error) = response.get("error") {
        let message = error["message"].as_str().unwrap_or("unknown error");
        anyhow::bail!("RPC error: {message}");
    }

    Ok(response["result"].clone())
}

/// `blastgate status`: device table plus the latest tool switch.
pub async fn cmd_status(socket_path: &str, json: bool) -> anyhow::Result<()> {
    let devices = rpc_call(socket_path, "list_devices").await?;
    let switch = rpc_call(socket_path, "switch_state").await?;

    if json {
        let combined = serde_json::json!({ "devices": devices, "switch": switch });
        println!("{}", serde_json::to_string_pretty(&combined)?);
        return Ok(());
    }

    println!("{}", format_devices(&devices, Utc::now()));
    if let Some(line) = format_switch(&switch) {
        println!();
        println!("{line}");
    }
    Ok(())
}

// ── Formatting ──────────────────────────────────────────────────────────────

/// Age of a `last_seen` timestamp, coarse like `ls -l`.
fn age(last_seen: &Value, now: DateTime<Utc>) -> String {
    let Some(seen) = last_seen
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    else {
        return "never".to_owned();
    };
    let secs = (now - seen.with_timezone(&Utc)).num_seconds().max(0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m", secs / 60),
        3600..86400 => format!("{}h", secs / 3600),
        _ => format!("{}d", secs / 86400),
    }
}

/// Render the `list_devices` result as an aligned table.
pub fn format_devices(devices: &Value, now: DateTime<Utc>) -> String {
    let Some(arr) = devices.as_array() else {
        return "no devices".to_owned();
    };
    if arr.is_empty() {
        return "no devices".to_owned();
    }

    let rows: Vec<[String; 6]> = arr
        .iter()
        .map(|d| {
            [
                d["id"].as_str().unwrap_or("?").to_owned(),
                d["kind"].as_str().unwrap_or("?").to_owned(),
                if d["alive"].as_bool().unwrap_or(false) {
                    "alive".to_owned()
                } else {
                    "dead".to_owned()
                },
                d["status"].as_str().unwrap_or("?").to_owned(),
                age(&d["last_seen"], now),
                d["ip_address"].as_str().unwrap_or("-").to_owned(),
            ]
        })
        .collect();

    let header = ["ID", "KIND", "LIVENESS", "STATUS", "SEEN", "IP"];
    let mut widths = header.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let render = |cells: &[&str]| -> String {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_owned()
    };

    let mut lines = vec![render(&header)];
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(render(&cells));
    }
    lines.join("\n")
}

/// One-line summary of `switch_state`. `None` before the first run.
pub fn format_switch(switch: &Value) -> Option<String> {
    let tool = switch["tool"].as_str()?;
    let phase = switch["phase"].as_str().unwrap_or("?");
    let mut line = format!(
        "last switch: {tool} ({phase}, {} commands, {} checks)",
        switch["commands_sent"].as_u64().unwrap_or(0),
        switch["attempts"].as_u64().unwrap_or(0),
    );
    if let Some(gate) = switch["pending_gate"].as_str() {
        line.push_str(&format!(", waiting on gate {gate}"));
    }
    Some(line)
}
