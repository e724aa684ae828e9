//! A real subprocess standing in for `codex app-server`, used by the
//! integration tests in `tests/app_server_flows.rs`. Grounded on
//! `crates/codex/src/mcp/test_support.rs::write_fake_app_server`, adapted to
//! this crate's wire shapes (`threadId`/`approvalPolicy`/`item/tool/call`
//! etc.) and parameterized by scenario at write time (rather than an
//! environment variable) so concurrently-running tests never share mutable
//! process state.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

/// Write the fake server script, fixed to one `scenario`, to a fresh temp
/// dir and return its path.
pub fn write_fake_app_server(scenario: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-codex-app-server");
    let script = SCRIPT.replace("__SCENARIO__", scenario);
    fs::write(&script_path, script).expect("write fake app-server script");
    let mut perms = fs::metadata(&script_path).expect("metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms).expect("chmod");
    (dir, script_path)
}

const SCRIPT: &str = r#"#!/usr/bin/env python3
import json
import os
import sys
import threading
import time

SCENARIO = "__SCENARIO__"

turns = {}       # turn request id -> thread id
tool_owner = {}  # tool-call request id -> turn request id

def send(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

def start_turn(req_id, thread_id):
    turns[req_id] = thread_id

    def worker():
        time.sleep(0.02)
        if SCENARIO == "dies_mid_turn":
            send({"id": req_id, "result": {"accepted": True}})
            os._exit(1)
        elif SCENARIO == "unauthorized":
            send({"id": req_id, "result": {"accepted": True}})
            send({"method": "turn/completed", "params": {
                "threadId": thread_id, "status": "failed",
                "error": {"message": "Unauthorized: sign in required"},
            }})
        elif SCENARIO == "tool_call":
            tool_owner[9001] = req_id
            send({"id": 9001, "method": "item/tool/call", "params": {
                "threadId": thread_id, "callId": "c1", "tool": "echo", "arguments": "ping",
            }})
        elif SCENARIO == "unknown_tool":
            tool_owner[9002] = req_id
            send({"id": 9002, "method": "item/tool/call", "params": {
                "threadId": thread_id, "callId": "c2", "tool": "mystery", "arguments": {},
            }})
        else:
            send({"id": req_id, "result": {"accepted": True}})
            send({"method": "item/completed", "params": {
                "threadId": thread_id,
                "item": {"type": "agentMessage", "text": "echo:" + thread_id},
            }})
            send({"method": "turn/completed", "params": {"threadId": thread_id, "status": "completed"}})

    threading.Thread(target=worker, daemon=True).start()

def finish_after_tool(tool_id, result):
    req_id = tool_owner.pop(tool_id, None)
    if req_id is None:
        return
    thread_id = turns.get(req_id)
    output = result.get("output", "") if isinstance(result, dict) else ""
    send({"id": req_id, "result": {"accepted": True}})
    send({"method": "item/completed", "params": {
        "threadId": thread_id,
        "item": {"type": "agentMessage", "text": "tool-said:" + str(output)},
    }})
    send({"method": "turn/completed", "params": {"threadId": thread_id, "status": "completed"}})

for line in sys.stdin:
    if not line.strip():
        continue
    msg = json.loads(line)
    method = msg.get("method")
    if method == "initialize":
        if SCENARIO == "silent_init":
            continue
        send({"id": msg.get("id"), "result": {"ready": True}})
    elif method == "initialized":
        pass
    elif method == "account/get":
        send({"id": msg.get("id"), "result": {"requiresSignIn": False}})
    elif method == "thread/start":
        thread_id = "thread-" + str(msg.get("id"))
        send({"id": msg.get("id"), "result": {"threadId": thread_id}})
    elif method == "turn/start":
        params = msg.get("params", {})
        start_turn(msg.get("id"), params.get("threadId"))
    elif method is None and msg.get("id") in tool_owner:
        finish_after_tool(msg.get("id"), msg.get("result", {}))
"#;
