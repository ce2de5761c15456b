use crate::context::ServerContext;
use crate::tools::{self, LoopTool};
use anyhow::Context;
use ios_loop_core::exec::{CommandRunner, SystemRunner};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "ios-agentic-loop";

// ---------------------------------------------------------------------------
// JSON-RPC 2.0 protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[allow(dead_code)]
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct ToolContent {
    r#type: &'static str,
    text: String,
}

#[derive(Debug, Serialize)]
struct ToolCallResult {
    content: Vec<ToolContent>,
    #[serde(rename = "isError")]
    is_error: bool,
}

impl JsonRpcResponse {
    fn ok(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

// ---------------------------------------------------------------------------
// Server loop
// ---------------------------------------------------------------------------

pub fn run(root: &Path) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    rt.block_on(serve(root))
}

async fn serve(root: &Path) -> anyhow::Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let ctx = Arc::new(ServerContext::build(root, runner).await?);
    let tools: Arc<Vec<Box<dyn LoopTool>>> = Arc::new(tools::all_tools());
    tracing::info!(
        udid = %ctx.device_id,
        bundle_id = %ctx.config.app.bundle_id,
        tools = tools.len(),
        "mcp server ready"
    );

    // Single writer so concurrent responses never interleave on stdout.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), std::io::Error>(())
    });

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut buf = Vec::new();
    let mut in_flight = JoinSet::new();
    loop {
        buf.clear();
        if stdin.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        reap_finished(&mut in_flight);

        let line = match std::str::from_utf8(&buf) {
            Ok(line) => line,
            Err(e) => {
                let msg = format!("parse error: input is not valid UTF-8: {e}");
                send(&tx, &JsonRpcResponse::err(None, -32700, msg));
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_line(line) {
            Err(resp) => send(&tx, &resp),
            Ok(None) => {}
            Ok(Some(req)) => {
                let (tx, ctx, tools) = (tx.clone(), ctx.clone(), tools.clone());
                in_flight.spawn(async move {
                    let resp = handle_request(&req, &tools, &ctx).await;
                    send(&tx, &resp);
                });
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        log_join(joined);
    }
    drop(tx);
    writer.await.context("stdout writer task failed")??;
    tracing::info!("stdin closed; mcp server exiting");
    Ok(())
}

/// Decode one input line. `Ok(None)` is a notification (an object with
/// no `id` key), which gets no response.
pub fn parse_line(line: &str) -> Result<Option<JsonRpcRequest>, JsonRpcResponse> {
    let raw: Value = serde_json::from_str(line)
        .map_err(|e| JsonRpcResponse::err(None, -32700, format!("parse error: {e}")))?;

    let Some(obj) = raw.as_object() else {
        return Err(JsonRpcResponse::err(
            None,
            -32600,
            "invalid request: expected a JSON object".to_string(),
        ));
    };
    let Some(id) = obj.get("id").cloned() else {
        return Ok(None);
    };

    serde_json::from_value(raw)
        .map(Some)
        .map_err(|e| JsonRpcResponse::err(Some(id), -32600, format!("invalid request: {e}")))
}

/// Drop completed request tasks without waiting on running ones.
fn reap_finished(in_flight: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(joined) = in_flight.try_join_next() {
        log_join(joined);
        reaped += 1;
    }
    reaped
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "request task panicked");
    }
}

fn send(tx: &mpsc::UnboundedSender<String>, resp: &JsonRpcResponse) {
    match serde_json::to_string(resp) {
        Ok(line) => {
            if tx.send(line).is_err() {
                tracing::debug!("stdout writer gone; dropping response");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize response"),
    }
}

// ---------------------------------------------------------------------------
// Request dispatch (pub for unit tests)
// ---------------------------------------------------------------------------

pub async fn handle_request(
    req: &JsonRpcRequest,
    tools: &[Box<dyn LoopTool>],
    ctx: &ServerContext,
) -> JsonRpcResponse {
    let id = req.id.clone();
    match req.method.as_str() {
        "initialize" => JsonRpcResponse::ok(
            id,
            serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        ),

        "ping" => JsonRpcResponse::ok(id, serde_json::json!({})),

        "tools/list" => {
            let tool_list: Vec<Value> = tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name(),
                        "description": t.description(),
                        "inputSchema": t.schema()
                    })
                })
                .collect();
            JsonRpcResponse::ok(id, serde_json::json!({ "tools": tool_list }))
        }

        "tools/call" => {
            let Some(params) = &req.params else {
                return JsonRpcResponse::err(id, -32602, "missing params".to_string());
            };
            let Some(tool_name) = params["name"].as_str() else {
                return JsonRpcResponse::err(id, -32602, "missing tool name in params".to_string());
            };
            let Some(tool) = tools.iter().find(|t| t.name() == tool_name) else {
                return JsonRpcResponse::err(id, -32601, format!("tool not found: {tool_name}"));
            };

            let args = match params.get("arguments") {
                Some(Value::Null) | None => Value::Object(Default::default()),
                Some(a) => a.clone(),
            };

            let started = Instant::now();
            let outcome = tool.call(args, ctx).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let (text, is_error) = match outcome {
                Ok(v) => {
                    tracing::info!(tool = tool_name, elapsed_ms, "tool call ok");
                    (
                        serde_json::to_string_pretty(&v)
                            .unwrap_or_else(|e| format!("serialization error: {e}")),
                        false,
                    )
                }
                Err(e) => {
                    tracing::warn!(tool = tool_name, elapsed_ms, error = %e, "tool call failed");
                    (e, true)
                }
            };

            let call_result = ToolCallResult {
                content: vec![ToolContent {
                    r#type: "text",
                    text,
                }],
                is_error,
            };
            JsonRpcResponse::ok(
                id,
                serde_json::to_value(&call_result)
                    .unwrap_or_else(|e| serde_json::json!({"error": e.to_string()})),
            )
        }

        other => JsonRpcResponse::err(id, -32601, format!("method not found: {other}")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
