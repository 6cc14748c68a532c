//! Out-of-process tool execution.
//!
//! Python and node tools run in a child process that speaks one JSON
//! request on stdin and one JSON reply on stdout:
//!
//! ```text
//! -> {"tool": "...", "entry": "module:function", "payload": {...}, "protocol_version": 1}
//! <- {"ok": true, "result": ...}
//! <- {"ok": false, "error": {"type": "...", "message": "..."}}
//! ```

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use namel3ss_ir::ToolKind;

pub const PROTOCOL_VERSION: u32 = 1;

const PYTHON_SHIM: &str = r#"
import importlib, json, sys
req = json.load(sys.stdin)
module_name, _, func_name = req["entry"].rpartition(":")
try:
    func = getattr(importlib.import_module(module_name), func_name)
    out = {"ok": True, "result": func(req["payload"])}
except Exception as exc:
    out = {"ok": False, "error": {"type": type(exc).__name__, "message": str(exc)}}
sys.stdout.write(json.dumps(out))
"#;

const NODE_SHIM: &str = r#"
const path = require("path");
const chunks = [];
process.stdin.on("data", (c) => chunks.push(c));
process.stdin.on("end", async () => {
  const req = JSON.parse(Buffer.concat(chunks).toString("utf8"));
  const at = req.entry.lastIndexOf(":");
  const file = at < 0 ? req.entry : req.entry.slice(0, at);
  const name = at < 0 ? null : req.entry.slice(at + 1);
  let out;
  try {
    const mod = require(path.resolve(file));
    const fn = name ? mod[name] : mod;
    out = { ok: true, result: await fn(req.payload) };
  } catch (e) {
    out = { ok: false, error: { type: (e && e.name) || "Error", message: String((e && e.message) || e) } };
  }
  process.stdout.write(JSON.stringify(out));
});
"#;

/// One out-of-process call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool: String,
    pub kind: ToolKind,
    pub entry: String,
    pub payload: serde_json::Value,
    pub timeout: Duration,
    /// Interpreter binary (`python3`, `node`, ...).
    pub program: String,
    pub working_dir: PathBuf,
}

/// Failure reported by a runner, surfaced as a tool error outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub error_type: String,
    pub message: String,
}

impl ToolFailure {
    pub fn new(error_type: &str, message: impl Into<String>) -> Self {
        ToolFailure {
            error_type: error_type.to_string(),
            message: message.into(),
        }
    }
}

/// Executes python and node tools. Implemented by [`SubprocessRunner`];
/// tests substitute in-process fakes.
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolFailure>;
}

#[derive(Deserialize)]
struct Reply {
    ok: bool,
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<ReplyError>,
}

#[derive(Deserialize)]
struct ReplyError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Spawns one child process per call.
///
/// Each call drives its own current-thread tokio runtime, so `run` must not
/// be called from inside an async task; wrap engine calls in
/// `spawn_blocking` when embedding in an async server.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubprocessRunner;

impl ToolRunner for SubprocessRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<serde_json::Value, ToolFailure> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ToolFailure::new("runtime_error", e.to_string()))?;
        runtime.block_on(run_child(invocation))
    }
}

async fn run_child(invocation: &ToolInvocation) -> Result<serde_json::Value, ToolFailure> {
    let (flag, shim) = match invocation.kind {
        ToolKind::Python => ("-c", PYTHON_SHIM),
        ToolKind::Node => ("-e", NODE_SHIM),
        ToolKind::Builtin => {
            return Err(ToolFailure::new(
                "runtime_error",
                "builtin tools do not run out of process",
            ))
        }
    };
    let mut command = Command::new(&invocation.program);
    command
        .arg(flag)
        .arg(shim)
        .current_dir(&invocation.working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if invocation.kind == ToolKind::Python {
        command.env("PYTHONPATH", &invocation.working_dir);
    }
    let mut child = command
        .spawn()
        .map_err(|e| ToolFailure::new("spawn_failed", format!("{}: {}", invocation.program, e)))?;

    let request = serde_json::json!({
        "tool": invocation.tool,
        "entry": invocation.entry,
        "payload": invocation.payload,
        "protocol_version": PROTOCOL_VERSION,
    });
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(request.to_string().as_bytes())
            .await
            .map_err(|e| ToolFailure::new("io_error", e.to_string()))?;
        // Dropping stdin closes the pipe so the shim sees EOF.
    }

    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();
    let exchange = async {
        let read_out = async {
            let mut buf = Vec::new();
            if let Some(pipe) = stdout.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(pipe) = stderr.as_mut() {
                pipe.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let (out, err) = tokio::try_join!(read_out, read_err)?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err))
    };
    let (status, out, err) = match tokio::time::timeout(invocation.timeout, exchange).await {
        Ok(result) => result.map_err(|e| ToolFailure::new("io_error", e.to_string()))?,
        Err(_) => {
            tracing::warn!(tool = %invocation.tool, timeout_ms = invocation.timeout.as_millis() as u64, "tool timed out");
            return Err(ToolFailure::new(
                "timeout",
                format!("no reply within {} ms", invocation.timeout.as_millis()),
            ));
        }
    };

    let reply: Reply = serde_json::from_slice(&out).map_err(|_| {
        let stderr = String::from_utf8_lossy(&err);
        ToolFailure::new(
            "protocol_error",
            format!("invalid reply (exit {}): {}", status, stderr.trim()),
        )
    })?;
    if reply.ok {
        Ok(reply.result)
    } else {
        let error = reply.error.unwrap_or(ReplyError {
            error_type: None,
            message: None,
        });
        Err(ToolFailure::new(
            error.error_type.as_deref().unwrap_or("tool_error"),
            error.message.unwrap_or_else(|| "tool reported failure".to_string()),
        ))
    }
}
