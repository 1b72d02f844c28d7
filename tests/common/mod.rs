#![allow(dead_code)]

use anyhow::anyhow;
use mipsdap::config::AdapterConfig;
use mipsdap::dap::transport::{MessageReader, MessageWriter};
use mipsdap::remote::frame::{encode, FrameCodec};
use mipsdap::session;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const MESSAGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How the fake remote answers `continue`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContinueReply {
    Stopped,
    Exited,
    Silent,
}

/// Behaviour of the scripted remote debugger.
#[derive(Debug, Clone)]
pub struct Script {
    /// Program source has lines `1..=source_lines`, one instruction each.
    pub source_lines: i64,
    pub pc: i64,
    pub pid: i32,
    pub continue_reply: ContinueReply,
    /// Methods answered with an `error` envelope.
    pub failing: Vec<&'static str>,
    /// Hang up right after answering this method.
    pub close_after: Option<&'static str>,
    /// Number of leading `verify_breakpoints` calls answered with a wrong result shape.
    pub malformed_verifies: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            source_lines: 10,
            pc: 0,
            // pids below 2 are never signalled
            pid: 0,
            continue_reply: ContinueReply::Stopped,
            failing: vec![],
            close_after: None,
            malformed_verifies: 0,
        }
    }
}

impl Script {
    fn program(&self) -> Value {
        let source: Vec<Value> = (1..=self.source_lines)
            .map(|n| json!({"filename": "main.mips", "lineno": n, "line": "nop"}))
            .collect();
        json!({
            "name": "main.mips",
            "labels": {"main": {"kind": ".text", "value": 0, "name": "main"}},
            "source": source,
            "memory": {
                "stack": "0x7ffffffc  00 00 00 2a  ...*\n0x7ffffff8  00 00 00 00  ....",
                "heap": "",
                "data": "0x10010000  68 69 00 00  hi..",
            },
            "registers": {"pc": self.pc, "$t0": 42, "$t1": -1},
        })
    }

    fn location_of(&self, line: i64) -> i64 {
        if (1..=self.source_lines).contains(&line) {
            line - 1
        } else {
            -1
        }
    }

    fn reply(&mut self, method: &str, params: &Value) -> Option<Value> {
        if self.failing.iter().any(|m| *m == method) {
            return Some(json!({"method": method, "error": format!("{method} failed")}));
        }
        let result = match method {
            "start" => json!({"pid": self.pid}),
            "verify_breakpoints" if self.malformed_verifies > 0 => {
                self.malformed_verifies -= 1;
                json!("not a location list")
            }
            "verify_breakpoints" => {
                let locations: Vec<i64> = params
                    .as_array()
                    .map(|bps| {
                        bps.iter()
                            .map(|bp| self.location_of(bp["line"].as_i64().unwrap_or(-1)))
                            .collect()
                    })
                    .unwrap_or_default();
                json!([params, locations])
            }
            "info" => json!({"program": self.program()}),
            "continue" => match self.continue_reply {
                ContinueReply::Stopped => json!({"stopped": true, "breakpoints": []}),
                ContinueReply::Exited => json!({"exited": true}),
                ContinueReply::Silent => return None,
            },
            "step" | "stop" => json!({"stopped": true}),
            "update_visualizer" => json!({"refreshed": true}),
            other => return Some(json!({"method": other, "error": "unknown method"})),
        };
        Some(json!({"method": method, "result": result}))
    }
}

#[derive(Debug, Clone)]
pub struct RemoteCall {
    pub method: String,
    pub params: Value,
}

/// Remote debugger double listening on a loopback port.
pub struct FakeRemote {
    pub port: u16,
    calls: Arc<Mutex<Vec<RemoteCall>>>,
}

impl FakeRemote {
    pub fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind fake remote");
        Self::serve_on(listener, script)
    }

    pub fn serve_on(listener: TcpListener, script: Script) -> Self {
        let port = listener.local_addr().expect("local addr").port();
        let calls = Arc::new(Mutex::new(vec![]));
        let worker_calls = calls.clone();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve_connection(stream, script, &worker_calls);
            }
        });
        Self { port, calls }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.method).collect()
    }

    pub fn wait_for_call(&self, method: &str, timeout: Duration) -> Option<RemoteCall> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(call) = self.calls().into_iter().find(|c| c.method == method) {
                return Some(call);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }
}

fn serve_connection(mut stream: TcpStream, mut script: Script, calls: &Mutex<Vec<RemoteCall>>) {
    let mut codec = FrameCodec::default();
    let mut buf = [0u8; 4096];
    loop {
        let n = match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        for call in codec.decode_json::<Value>(&buf[..n]).unwrap_or_default() {
            let method = call["method"].as_str().unwrap_or_default().to_string();
            let params = call["params"].clone();
            calls.lock().unwrap().push(RemoteCall {
                method: method.clone(),
                params: params.clone(),
            });

            if let Some(reply) = script.reply(&method, &params) {
                // split every frame to exercise reassembly on the adapter side
                let frame = encode(reply.to_string().as_bytes());
                let (head, tail) = frame.split_at(frame.len() / 2);
                if stream.write_all(head).is_err() {
                    return;
                }
                thread::sleep(Duration::from_millis(2));
                if stream.write_all(tail).is_err() {
                    return;
                }
            }
            if script.close_after == Some(method.as_str()) {
                let _ = stream.shutdown(Shutdown::Both);
                return;
            }
        }
    }
}

struct ChannelReader(Receiver<Value>);

impl MessageReader for ChannelReader {
    fn read_message(&mut self) -> anyhow::Result<Value> {
        self.0.recv().map_err(|_| anyhow!("DAP connection closed"))
    }
}

struct ChannelWriter(Sender<Value>);

impl MessageWriter for ChannelWriter {
    fn write_message(&mut self, message: &Value) -> anyhow::Result<()> {
        self.0
            .send(message.clone())
            .map_err(|_| anyhow!("DAP connection closed"))
    }
}

/// In-memory editor driving one adapter session.
pub struct Editor {
    to_adapter: Option<Sender<Value>>,
    from_adapter: Receiver<Value>,
    next_seq: i64,
    stash: VecDeque<Value>,
    session: Option<JoinHandle<anyhow::Result<()>>>,
}

impl Editor {
    pub fn start(config: AdapterConfig) -> Self {
        let (to_adapter, adapter_in) = mpsc::channel();
        let (adapter_out, from_adapter) = mpsc::channel();
        let session = thread::spawn(move || {
            session::serve(ChannelReader(adapter_in), ChannelWriter(adapter_out), config)
        });
        Self {
            to_adapter: Some(to_adapter),
            from_adapter,
            next_seq: 1,
            stash: VecDeque::new(),
            session: Some(session),
        }
    }

    pub fn request(&mut self, command: &str, arguments: Value) -> i64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        let request = json!({
            "seq": seq,
            "type": "request",
            "command": command,
            "arguments": arguments,
        });
        self.to_adapter
            .as_ref()
            .expect("editor open")
            .send(request)
            .expect("adapter alive");
        seq
    }

    /// Wait for the first message matching `pred`, keeping the others.
    pub fn expect(&mut self, what: &str, pred: impl Fn(&Value) -> bool) -> Value {
        if let Some(pos) = self.stash.iter().position(&pred) {
            return self.stash.remove(pos).unwrap();
        }
        let deadline = Instant::now() + MESSAGE_TIMEOUT;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            let msg = self
                .from_adapter
                .recv_timeout(left)
                .unwrap_or_else(|_| panic!("no {what} from adapter, got {:?}", self.stash));
            if pred(&msg) {
                return msg;
            }
            self.stash.push_back(msg);
        }
    }

    pub fn response(&mut self, seq: i64) -> Value {
        self.expect(&format!("response to #{seq}"), |m| {
            m["type"] == "response" && m["request_seq"] == seq
        })
    }

    pub fn event(&mut self, name: &str) -> Value {
        self.expect(&format!("`{name}` event"), |m| {
            m["type"] == "event" && m["event"] == name
        })
    }

    /// Call `command` and return its response.
    pub fn call(&mut self, command: &str, arguments: Value) -> Value {
        let seq = self.request(command, arguments);
        self.response(seq)
    }

    /// Collect whatever arrives within `wait`.
    pub fn settle(&mut self, wait: Duration) {
        let deadline = Instant::now() + wait;
        while let Ok(msg) = self
            .from_adapter
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
        {
            self.stash.push_back(msg);
        }
    }

    pub fn count_events(&self, name: &str) -> usize {
        self.stash
            .iter()
            .filter(|m| m["type"] == "event" && m["event"] == name)
            .count()
    }

    /// Disconnect, wait for the session to end and return every message not consumed yet.
    pub fn disconnect(mut self) -> Vec<Value> {
        let rsp = self.call("disconnect", json!({}));
        assert_eq!(rsp["success"], true);
        self.to_adapter.take();
        let result = self
            .session
            .take()
            .expect("session running")
            .join()
            .expect("session thread");
        assert!(result.is_ok(), "session failed: {result:?}");
        self.stash.extend(self.from_adapter.try_iter());
        self.stash.into_iter().collect()
    }
}

/// `initialize`, `launch` and `configurationDone` against `remote`.
pub fn launch(editor: &mut Editor, remote: &FakeRemote, extra: Value) {
    let rsp = editor.call("initialize", json!({"adapterID": "mipsdap"}));
    assert_eq!(rsp["success"], true);
    editor.event("initialized");

    let mut args = json!({
        "program": "/w/main.mips",
        "console": "none",
        "host": "127.0.0.1",
        "port": remote.port,
    });
    if let (Some(args), Some(extra)) = (args.as_object_mut(), extra.as_object()) {
        args.extend(extra.clone());
    }
    let launch = editor.request("launch", args);
    let done = editor.request("configurationDone", json!({}));
    assert_eq!(editor.response(done)["success"], true);
    let rsp = editor.response(launch);
    assert_eq!(rsp["success"], true, "launch failed: {rsp}");
}
