//! MCP test server binary for integration tests
//!
//! A minimal stand-in for the PostgreSQL tool server. It speaks
//! newline-delimited JSON-RPC over stdin/stdout and behaves badly in the ways
//! a real server does: a non-JSON banner on stdout, log notifications
//! interleaved with responses, and diagnostics on stderr.
//!
//! # Handled Methods
//!
//! - `initialize` -- protocol `2025-06-18`, `tools` capability.
//! - `notifications/initialized` -- swallowed.
//! - `tools/list` -- two pages joined by `nextCursor`.
//! - `tools/call` -- see the tool list below.
//! - `ping` -- empty result.
//! - Anything else -- `-32601 Method not found`.
//!
//! # Tools
//!
//! - `ping` -- `{"ok": true}` as structured content.
//! - `server_info` -- name, version, and the reserved environment it saw.
//! - `echo` -- returns `message` as plain text.
//! - `run_query` -- `-32000` for a missing relation, an `isError` result
//!   for division by zero, `-32602` for empty SQL, otherwise
//!   `{"result": [{"sql": ...}]}`.
//! - `kill_session` -- `{"pid": pid, "terminated": true}`.
//! - `slow` -- sleeps `ms` milliseconds (default 2000) before answering.
//! - `duplicate_reply` -- writes an unknown-id response, the real one, then
//!   the real one again.
//! - `crash` -- exits without answering.
//!
//! The server refuses to start unless `MCP_TRANSPORT=stdio`.

use std::io::{self, BufRead, Write};
use std::time::Duration;

use serde_json::{json, Value};

const PROTOCOL_VERSION: &str = "2025-06-18";

fn main() {
    if std::env::var("MCP_TRANSPORT").as_deref() != Ok("stdio") {
        eprintln!("mcp_test_server: MCP_TRANSPORT must be 'stdio'");
        std::process::exit(2);
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    // Non-JSON noise the client must skip.
    let _ = writeln!(out, "mcp_test_server ready");
    let _ = out.flush();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => {
                send(&mut out, &make_error(&Value::Null, -32700, "Parse error"));
                continue;
            }
        };

        let method = request.get("method").and_then(|m| m.as_str()).unwrap_or("");
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        eprintln!("mcp_test_server: {method}");

        if method.starts_with("notifications/") {
            continue;
        }

        let response = match method {
            "initialize" => handle_initialize(&id),
            "tools/list" => handle_tools_list(&id, &request),
            "tools/call" => {
                send(
                    &mut out,
                    &json!({
                        "jsonrpc": "2.0",
                        "method": "notifications/message",
                        "params": {"level": "info", "data": "handling tools/call"}
                    }),
                );
                match handle_tools_call(&id, &request, &mut out) {
                    Some(response) => response,
                    None => continue,
                }
            }
            "ping" => make_result(&id, json!({})),
            _ => make_error(&id, -32601, &format!("Method not found: {method}")),
        };

        send(&mut out, &response);
    }
}

fn send(out: &mut impl Write, message: &Value) {
    let _ = writeln!(out, "{}", serde_json::to_string(message).unwrap());
    let _ = out.flush();
}

fn make_result(id: &Value, result: Value) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "result": result})
}

fn make_error(id: &Value, code: i64, message: &str) -> Value {
    json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}})
}

fn structured(id: &Value, value: Value) -> Value {
    make_result(
        id,
        json!({
            "content": [{"type": "text", "text": value.to_string()}],
            "structuredContent": value,
            "isError": false
        }),
    )
}

fn text(id: &Value, text: &str, is_error: bool) -> Value {
    make_result(
        id,
        json!({
            "content": [{"type": "text", "text": text}],
            "isError": is_error
        }),
    )
}

fn handle_initialize(id: &Value) -> Value {
    make_result(
        id,
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {"listChanged": false}},
            "serverInfo": {"name": "mcp-test-server", "version": "1.0.0"}
        }),
    )
}

fn tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": {}}
    })
}

fn handle_tools_list(id: &Value, request: &Value) -> Value {
    let cursor = request
        .get("params")
        .and_then(|p| p.get("cursor"))
        .and_then(|c| c.as_str());

    match cursor {
        None => make_result(
            id,
            json!({
                "tools": [
                    tool("ping", "Health check"),
                    tool("server_info", "Server name, version and environment"),
                    tool("echo", "Echo the message argument"),
                    tool("run_query", "Run a SQL statement"),
                ],
                "nextCursor": "page-2"
            }),
        ),
        Some("page-2") => make_result(
            id,
            json!({
                "tools": [
                    tool("kill_session", "Terminate a backend"),
                    tool("slow", "Sleep before answering"),
                    tool("duplicate_reply", "Answer twice"),
                    tool("crash", "Exit mid-call"),
                ]
            }),
        ),
        Some(other) => make_error(id, -32602, &format!("Unknown cursor: {other}")),
    }
}

fn handle_tools_call(id: &Value, request: &Value, out: &mut impl Write) -> Option<Value> {
    let params = request.get("params").cloned().unwrap_or(Value::Null);
    let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let response = match name {
        "ping" => structured(id, json!({"ok": true})),
        "server_info" => structured(
            id,
            json!({
                "name": "mcp-test-server",
                "version": "1.0.0",
                "database_url": std::env::var("DATABASE_URL").ok(),
                "allow_write": std::env::var("MCP_ALLOW_WRITE").ok(),
                "log_level": std::env::var("MCP_LOG_LEVEL").ok(),
                "transport": std::env::var("MCP_TRANSPORT").ok(),
                "extra": std::env::var("PGMCP_TEST_EXTRA").ok()
            }),
        ),
        "echo" => {
            let message = args.get("message").and_then(|m| m.as_str()).unwrap_or("");
            text(id, message, false)
        }
        "run_query" => {
            let sql = args.get("sql").and_then(|s| s.as_str()).unwrap_or("");
            if sql.trim().is_empty() {
                make_error(id, -32602, "sql must not be empty")
            } else if sql.contains("nonexistent") {
                make_error(id, -32000, "relation \"nonexistent\" does not exist")
            } else if sql.contains("1/0") {
                text(id, "division by zero", true)
            } else {
                structured(id, json!({"result": [{"sql": sql}]}))
            }
        }
        "kill_session" => {
            let pid = args.get("pid").and_then(|p| p.as_i64()).unwrap_or(0);
            structured(id, json!({"pid": pid, "terminated": true}))
        }
        "slow" => {
            let ms = args.get("ms").and_then(|m| m.as_u64()).unwrap_or(2000);
            std::thread::sleep(Duration::from_millis(ms));
            structured(id, json!({"slept_ms": ms}))
        }
        "duplicate_reply" => {
            send(out, &make_result(&json!(987_654), json!({"stray": true})));
            let response = structured(id, json!({"attempt": 1}));
            send(out, &response);
            send(out, &response);
            return None;
        }
        "crash" => {
            eprintln!("mcp_test_server: crashing on request");
            std::process::exit(3);
        }
        _ => make_error(id, -32602, &format!("Unknown tool: {name}")),
    };
    Some(response)
}
