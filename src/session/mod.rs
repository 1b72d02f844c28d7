//! Debug session state machine.
//!
//! [`SessionController`] answers editor requests by driving a
//! [`RemoteDebuggerLink`]. Editor messages and remote events are merged into
//! one input queue and applied one at a time, so a breakpoint verification
//! round-trip always completes before the next request is looked at.

pub mod breakpoint;
pub mod format;
pub mod state;

use crate::config::{AdapterConfig, AttachArguments, LaunchArguments, StartArguments};
use crate::dap::protocol::{DapEvent, DapRequest, DapResponse, DapReverseRequest, Incoming};
use crate::dap::transport::{MessageReader, MessageWriter};
use crate::error::Error;
use crate::remote::envelope::{InfoResult, VerifyResult};
use crate::remote::{Method, ProgramSnapshot, Rendezvous, RemoteDebuggerLink, RemoteEvent};
use crate::session::breakpoint::{BreakpointSet, SourceBreakpoint};
use crate::session::format::{memory_rows, RegisterFormat};
use crate::session::state::SessionState;
use crate::{muted_error, weak_error};
use anyhow::{anyhow, Context};
use log::{debug, info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

pub const THREAD_ID: i64 = 0;
pub const THREAD_NAME: &str = "main";

const REGISTERS_REF: i64 = 1;
const MEMORY_STACK_REF: i64 = 2;
const MEMORY_HEAP_REF: i64 = 3;
const MEMORY_DATA_REF: i64 = 4;

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum Input {
    Editor(Incoming),
    /// The editor side of the transport is gone.
    EditorClosed(String),
    Remote(RemoteEvent),
}

#[derive(Debug, Deserialize)]
struct SourceArg {
    #[serde(default)]
    path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetBreakpointsArguments {
    source: SourceArg,
    #[serde(default)]
    breakpoints: Option<Vec<SourceBreakpoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VariablesArguments {
    variables_reference: i64,
}

#[derive(Debug, Deserialize)]
struct EvaluateArguments {
    expression: String,
    #[serde(default)]
    context: Option<String>,
}

/// `launch`/`attach` waiting for `configurationDone`.
struct DeferredStart {
    req: DapRequest,
    args: StartArguments,
    deadline: Instant,
}

pub struct SessionController<W: MessageWriter> {
    writer: W,
    server_seq: i64,
    config: AdapterConfig,
    inbox: Sender<Input>,
    state: SessionState,
    link: Option<RemoteDebuggerLink>,
    ready: Arc<Rendezvous>,
    breakpoints: BreakpointSet,
    /// Breakpoint set changed while no remote could verify it.
    needs_verify: bool,
    configuration_done: bool,
    deferred: Option<DeferredStart>,
    start: Option<StartArguments>,
    register_format: RegisterFormat,
    terminal_request_seq: Option<i64>,
    pid: Option<i32>,
    terminated: bool,
}

/// Run one debug session over an editor transport until the editor
/// disconnects or goes away.
pub fn serve<R, W>(mut reader: R, writer: W, config: AdapterConfig) -> anyhow::Result<()>
where
    R: MessageReader + 'static,
    W: MessageWriter,
{
    let (tx, rx) = mpsc::channel();

    let editor_tx = tx.clone();
    thread::spawn(move || loop {
        let input = match reader.read_message() {
            Ok(msg) => match Incoming::from_value(msg) {
                Ok(incoming) => Input::Editor(incoming),
                Err(e) => {
                    warn!(target: "dap", "skip malformed editor message: {e:#}");
                    continue;
                }
            },
            Err(e) => Input::EditorClosed(format!("{e:#}")),
        };
        let closed = matches!(input, Input::EditorClosed(_));
        if editor_tx.send(input).is_err() || closed {
            break;
        }
    });

    SessionController::new(writer, config, tx).run(rx)
}

impl<W: MessageWriter> SessionController<W> {
    /// `inbox` must feed the receiver later passed to [`SessionController::run`].
    pub fn new(writer: W, config: AdapterConfig, inbox: Sender<Input>) -> Self {
        Self {
            writer,
            server_seq: 1,
            config,
            inbox,
            state: SessionState::Disconnected,
            link: None,
            ready: Arc::new(Rendezvous::new()),
            breakpoints: BreakpointSet::default(),
            needs_verify: false,
            configuration_done: false,
            deferred: None,
            start: None,
            register_format: RegisterFormat::default(),
            terminal_request_seq: None,
            pid: None,
            terminated: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn breakpoints(&self) -> &BreakpointSet {
        &self.breakpoints
    }

    pub fn run(mut self, inbox: Receiver<Input>) -> anyhow::Result<()> {
        loop {
            let input = match self.deferred.as_ref().map(|d| d.deadline) {
                Some(deadline) => {
                    let timeout = deadline.saturating_duration_since(Instant::now());
                    match inbox.recv_timeout(timeout) {
                        Ok(input) => input,
                        Err(RecvTimeoutError::Timeout) => {
                            info!(target: "session", "no configurationDone in time, start anyway");
                            self.begin_deferred()?;
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match inbox.recv() {
                    Ok(input) => input,
                    Err(_) => break,
                },
            };
            if !self.handle(input)? {
                break;
            }
        }
        self.teardown();
        Ok(())
    }

    /// Apply one input. Return false once the session is over.
    pub fn handle(&mut self, input: Input) -> anyhow::Result<bool> {
        match input {
            Input::Editor(Incoming::Request(req)) => {
                if req.r#type != "request" {
                    return Ok(true);
                }
                match self.dispatch(&req) {
                    Ok(cont) => Ok(cont),
                    Err(e) => {
                        if let Some(err) = e.downcast_ref::<Error>() {
                            if err.is_fatal() && self.link.is_some() {
                                warn!(target: "session", "remote link broken: {err}");
                                self.terminate()?;
                            }
                        }
                        self.send_err(&req, format!("{e:#}"))?;
                        Ok(true)
                    }
                }
            }
            Input::Editor(Incoming::Response(rsp)) => {
                if Some(rsp.request_seq) == self.terminal_request_seq && !rsp.success {
                    warn!(
                        target: "session",
                        "editor failed to launch the remote debugger: {}",
                        rsp.message.as_deref().unwrap_or("no reason given")
                    );
                } else {
                    debug!(target: "dap", "`{}` response: success={}", rsp.command, rsp.success);
                }
                Ok(true)
            }
            Input::EditorClosed(reason) => {
                info!(target: "dap", "editor gone: {reason}");
                Ok(false)
            }
            Input::Remote(event) => {
                self.on_remote_event(event)?;
                Ok(true)
            }
        }
    }

    fn dispatch(&mut self, req: &DapRequest) -> anyhow::Result<bool> {
        match req.command.as_str() {
            "initialize" => self.handle_initialize(req)?,
            "launch" => self.handle_launch(req)?,
            "attach" => self.handle_attach(req)?,
            "configurationDone" => self.handle_configuration_done(req)?,
            "setBreakpoints" => self.handle_set_breakpoints(req)?,
            "threads" => self.handle_threads(req)?,
            "stackTrace" => self.handle_stack_trace(req)?,
            "scopes" => self.handle_scopes(req)?,
            "variables" => self.handle_variables(req)?,
            "continue" => self.handle_continue(req)?,
            "next" => self.handle_next(req)?,
            "pause" => self.handle_pause(req)?,
            "evaluate" => self.handle_evaluate(req)?,
            "updateVisualizer" => self.handle_update_visualizer(req)?,
            "terminate" => self.handle_terminate(req)?,
            "disconnect" => {
                self.handle_disconnect(req)?;
                return Ok(false);
            }
            other => {
                self.send_err(req, format!("Unsupported DAP command: {other}"))?;
            }
        }
        Ok(true)
    }

    // --------------------------------- editor output ---------------------------------------------

    fn next_seq(&mut self) -> i64 {
        let s = self.server_seq;
        self.server_seq += 1;
        s
    }

    fn send_success(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_response_raw(req, true, None, None)
    }

    fn send_success_body<T: Serialize>(&mut self, req: &DapRequest, body: T) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_response_raw(req, true, None, Some(body))
    }

    fn send_err(&mut self, req: &DapRequest, message: impl ToString) -> anyhow::Result<()> {
        self.send_response_raw(req, false, Some(message.to_string()), None)
    }

    fn send_response_raw(
        &mut self,
        req: &DapRequest,
        success: bool,
        message: Option<String>,
        body: Option<Value>,
    ) -> anyhow::Result<()> {
        let rsp = DapResponse {
            seq: self.next_seq(),
            r#type: "response",
            request_seq: req.seq,
            success,
            command: req.command.clone(),
            message,
            body,
        };
        self.writer.write_message(&serde_json::to_value(rsp)?)
    }

    fn send_event(&mut self, name: &'static str) -> anyhow::Result<()> {
        self.send_event_raw(name, None)
    }

    fn send_event_body<T: Serialize>(&mut self, name: &'static str, body: T) -> anyhow::Result<()> {
        let body = serde_json::to_value(body)?;
        self.send_event_raw(name, Some(body))
    }

    fn send_event_raw(&mut self, name: &'static str, body: Option<Value>) -> anyhow::Result<()> {
        let ev = DapEvent {
            seq: self.next_seq(),
            r#type: "event",
            event: name,
            body,
        };
        self.writer.write_message(&serde_json::to_value(ev)?)
    }

    fn send_stopped(&mut self, reason: &str) -> anyhow::Result<()> {
        self.send_event_body(
            "stopped",
            json!({"reason": reason, "threadId": THREAD_ID, "allThreadsStopped": true}),
        )
    }

    fn send_output(&mut self, category: &str, output: String) -> anyhow::Result<()> {
        self.send_event_body("output", json!({"category": category, "output": output}))
    }

    fn send_reverse_request(&mut self, command: &'static str, arguments: Value) -> anyhow::Result<i64> {
        let seq = self.next_seq();
        let req = DapReverseRequest {
            seq,
            r#type: "request",
            command,
            arguments,
        };
        self.writer.write_message(&serde_json::to_value(req)?)?;
        Ok(seq)
    }

    // --------------------------------- state ------------------------------------------------------

    fn move_to(&mut self, next: SessionState) -> bool {
        if !self.state.can_move_to(next) {
            warn!(target: "session", "ignore transition {} -> {next}", self.state);
            return false;
        }
        debug!(target: "session", "{} -> {next}", self.state);
        self.state = next;
        true
    }

    fn open_link(&self) -> Result<&RemoteDebuggerLink, Error> {
        self.link
            .as_ref()
            .filter(|link| link.is_open())
            .ok_or(Error::NotConnected)
    }

    fn snapshot(&self) -> Result<ProgramSnapshot, Error> {
        let link = self.open_link()?;
        let result = link.call_and_wait(Method::Info, &[], self.config.reply_timeout())?;
        let info: InfoResult = serde_json::from_value(result).map_err(|source| Error::ResultShape {
            method: Method::Info,
            source,
        })?;
        Ok(info.program)
    }

    /// Send the whole breakpoint set for verification and apply the answer.
    /// Any failure leaves every breakpoint unverified.
    fn verify_breakpoints(&mut self) {
        if self.breakpoints.is_empty() {
            self.needs_verify = false;
            return;
        }
        let locations = self.open_link().and_then(|link| {
            let result = link.call_and_wait(
                Method::VerifyBreakpoints,
                &self.breakpoints.params(),
                self.config.reply_timeout(),
            )?;
            serde_json::from_value::<VerifyResult>(result)
                .map(VerifyResult::into_locations)
                .map_err(|source| Error::ResultShape {
                    method: Method::VerifyBreakpoints,
                    source,
                })
        });
        match weak_error!(locations, "breakpoint verification:") {
            Some(locations) => {
                self.breakpoints.apply_locations(&locations);
                self.needs_verify = false;
            }
            None => self.breakpoints.mark_unverified(),
        }
    }

    fn interrupt_remote(&mut self) {
        let Some(pid) = self.pid.take().filter(|pid| *pid > 1) else {
            return;
        };
        debug!(target: "session", "interrupt remote debugger process {pid}");
        weak_error!(
            signal::kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|e| Error::Syscall("kill", e)),
            "interrupt remote debugger:"
        );
    }

    /// Stop the remote side and announce the end of the session once.
    fn terminate(&mut self) -> anyhow::Result<()> {
        if self.state.is_over() {
            return Ok(());
        }
        self.move_to(SessionState::Terminating);
        self.deferred = None;
        self.interrupt_remote();
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.move_to(SessionState::Terminated);
        if !self.terminated {
            self.terminated = true;
            self.send_event("terminated")?;
        }
        Ok(())
    }

    fn teardown(&mut self) {
        self.interrupt_remote();
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }

    // --------------------------------- startup ----------------------------------------------------

    fn ensure_not_started(&self, req: &DapRequest) -> anyhow::Result<()> {
        if self.state != SessionState::Disconnected || self.deferred.is_some() {
            return Err(anyhow!("{}: session already started", req.command));
        }
        Ok(())
    }

    fn defer_start(&mut self, req: &DapRequest, args: StartArguments) -> anyhow::Result<()> {
        self.ensure_not_started(req)?;
        self.register_format = args.register_format();
        if self.configuration_done {
            return self.begin_start(req, args);
        }
        self.deferred = Some(DeferredStart {
            req: req.clone(),
            args,
            deadline: Instant::now() + self.config.configuration_done_timeout(),
        });
        Ok(())
    }

    fn begin_deferred(&mut self) -> anyhow::Result<()> {
        let Some(DeferredStart { req, args, .. }) = self.deferred.take() else {
            return Ok(());
        };
        if let Err(e) = self.begin_start(&req, args) {
            self.send_err(&req, format!("{e:#}"))?;
        }
        Ok(())
    }

    fn begin_start(&mut self, req: &DapRequest, args: StartArguments) -> anyhow::Result<()> {
        let (host, port) = args.endpoint();
        let (host, port) = (host.to_string(), port);

        let mut link = RemoteDebuggerLink::new(self.config.link_options(), self.ready.clone());
        let inbox = self.inbox.clone();
        link.subscribe_all(move |event| {
            let _ = inbox.send(Input::Remote(event.clone()));
        });

        self.move_to(SessionState::Connecting);
        info!(target: "session", "connect to remote debugger at {host}:{port}");
        link.connect(&host, port);
        self.link = Some(link);
        self.start = Some(args);
        self.send_success(req)
    }

    fn on_connected(&mut self) -> anyhow::Result<()> {
        if !self.move_to(SessionState::AwaitingStart) {
            return Ok(());
        }
        self.verify_deferred_breakpoints()?;
        self.open_link()?.call(Method::Start, &[])?;
        Ok(())
    }

    /// Verify a set recorded while no remote could answer and re-announce it.
    fn verify_deferred_breakpoints(&mut self) -> anyhow::Result<()> {
        if !self.needs_verify {
            return Ok(());
        }
        self.verify_breakpoints();
        for bp in self.breakpoints.to_dap() {
            self.send_event_body("breakpoint", json!({"reason": "changed", "breakpoint": bp}))?;
        }
        Ok(())
    }

    fn on_start(&mut self, pid: Option<i32>) -> anyhow::Result<()> {
        if !self.move_to(SessionState::Ready) {
            return Ok(());
        }
        self.pid = pid;
        info!(target: "session", "remote program started, pid {pid:?}");
        // second chance for a verification that failed at connect
        self.verify_deferred_breakpoints()?;

        let stop_on_entry = self.start.as_ref().is_some_and(StartArguments::stop_on_entry);
        if stop_on_entry {
            self.move_to(SessionState::Stopped);
            return self.send_stopped("entry");
        }

        if self.breakpoints.has_verified() {
            let at_breakpoint = muted_error!(self.snapshot())
                .and_then(|program| {
                    let line = program.current_line()?;
                    Some(self.breakpoints.hits(&line.filename, line.lineno))
                })
                .unwrap_or(false);
            if at_breakpoint {
                self.move_to(SessionState::Stopped);
                return self.send_stopped("breakpoint");
            }
        }

        self.open_link()?
            .call(Method::Continue, &self.breakpoints.params())?;
        self.move_to(SessionState::Running);
        Ok(())
    }

    fn on_remote_event(&mut self, event: RemoteEvent) -> anyhow::Result<()> {
        match event {
            RemoteEvent::Connected => self.on_connected()?,
            RemoteEvent::Start { pid } => self.on_start(pid)?,
            RemoteEvent::Step(_) => {
                if self.move_to(SessionState::Stopped) {
                    self.send_stopped("step")?;
                }
            }
            RemoteEvent::Continue(_) => {
                if self.move_to(SessionState::Stopped) {
                    self.send_stopped("breakpoint")?;
                }
            }
            RemoteEvent::Stop(_) => {
                if self.move_to(SessionState::Stopped) {
                    self.send_stopped("pause")?;
                }
            }
            RemoteEvent::UpdateVisualizer(body) => {
                self.send_event_body("visualizerUpdated", body)?;
            }
            RemoteEvent::Info(_) | RemoteEvent::VerifyBreakpoints(_) => {
                debug!(target: "session", "late reply ignored");
            }
            RemoteEvent::Exited => {
                if !self.state.is_over() {
                    self.send_output("console", "remote program exited\n".to_string())?;
                }
                self.terminate()?;
            }
            RemoteEvent::Error(failure) => {
                warn!(target: "session", "{failure}");
                if !self.state.is_over() {
                    self.send_output("stderr", format!("{failure}\n"))?;
                }
                self.terminate()?;
            }
        }
        Ok(())
    }

    // --------------------------------- requests ---------------------------------------------------

    fn handle_initialize(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let body = json!({
            "supportsConfigurationDoneRequest": true,
            "supportsTerminateRequest": true,
            "supportsEvaluateForHovers": true,
            "supportsValueFormattingOptions": true,
            "supportsStepBack": false,
            "supportsSetVariable": false,
            "supportsRestartRequest": false,
        });
        self.send_success_body(req, body)?;
        self.send_event("initialized")
    }

    fn handle_launch(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: LaunchArguments = parse_args(req)?;
        self.ensure_not_started(req)?;
        if let Some((kind, cmd)) = args.terminal_command() {
            let cwd = Path::new(&args.program)
                .parent()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let seq = self.send_reverse_request(
                "runInTerminal",
                json!({"kind": kind, "title": "MIPS debugger", "cwd": cwd, "args": cmd}),
            )?;
            self.terminal_request_seq = Some(seq);
        }
        self.defer_start(req, StartArguments::Launch(args))
    }

    fn handle_attach(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: AttachArguments = parse_args(req)?;
        self.defer_start(req, StartArguments::Attach(args))
    }

    fn handle_configuration_done(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.configuration_done = true;
        self.send_success(req)?;
        self.begin_deferred()
    }

    fn handle_set_breakpoints(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: SetBreakpointsArguments = parse_args(req)?;
        let Some(requested) = args.breakpoints else {
            return self.send_success_body(req, json!({"breakpoints": []}));
        };
        let path = args.source.path.unwrap_or_default();
        self.breakpoints.replace(&path, requested);
        self.needs_verify = true;

        match self.state {
            SessionState::Disconnected | SessionState::Terminating | SessionState::Terminated => {}
            SessionState::Connecting => {
                let open = self
                    .link
                    .as_ref()
                    .is_some_and(|link| link.wait_open(self.config.transport_ready_timeout()));
                if open {
                    self.verify_breakpoints();
                } else {
                    debug!(target: "session", "remote not open yet, breakpoints stay unverified");
                }
            }
            SessionState::AwaitingStart
            | SessionState::Ready
            | SessionState::Stopped
            | SessionState::Running => self.verify_breakpoints(),
        }

        let body = json!({"breakpoints": self.breakpoints.to_dap()});
        self.send_success_body(req, body)
    }

    fn handle_threads(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.send_success_body(req, json!({"threads": [{"id": THREAD_ID, "name": THREAD_NAME}]}))
    }

    fn handle_stack_trace(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let program = self.snapshot().context("stackTrace")?;
        let frames: Vec<Value> = program
            .current_line()
            .map(|line| {
                let name = Path::new(&line.filename)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| line.filename.clone());
                json!({
                    "id": THREAD_ID,
                    "name": THREAD_NAME,
                    "line": line.lineno,
                    "column": 0,
                    "source": {"name": name, "path": line.filename},
                })
            })
            .into_iter()
            .collect();
        self.send_success_body(
            req,
            json!({"stackFrames": frames, "totalFrames": frames.len()}),
        )
    }

    fn handle_scopes(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let scopes = [
            ("Registers", REGISTERS_REF),
            ("Memory: stack", MEMORY_STACK_REF),
            ("Memory: heap", MEMORY_HEAP_REF),
            ("Memory: data", MEMORY_DATA_REF),
        ]
        .map(|(name, reference)| {
            json!({"name": name, "variablesReference": reference, "expensive": false})
        });
        self.send_success_body(req, json!({"scopes": scopes}))
    }

    fn handle_variables(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: VariablesArguments = parse_args(req)?;
        let program = self.snapshot().context("variables")?;

        let memory_variables = |dump: &str| -> Vec<Value> {
            memory_rows(dump)
                .into_iter()
                .map(|row| {
                    json!({"name": row.name, "type": "string", "value": row.value, "variablesReference": 0})
                })
                .collect()
        };
        let variables: Vec<Value> = match args.variables_reference {
            REGISTERS_REF => program
                .registers
                .iter()
                .map(|(name, value)| {
                    json!({
                        "name": name,
                        "type": "integer",
                        "value": self.register_format.render(*value),
                        "variablesReference": 0,
                    })
                })
                .collect(),
            MEMORY_STACK_REF => memory_variables(&program.memory.stack),
            MEMORY_HEAP_REF => memory_variables(&program.memory.heap),
            MEMORY_DATA_REF => memory_variables(&program.memory.data),
            _ => vec![],
        };
        self.send_success_body(req, json!({"variables": variables}))
    }

    fn ensure_execution_allowed(&self) -> Result<(), Error> {
        if self.state.accepts_execution() {
            Ok(())
        } else {
            Err(Error::NotReady(self.state))
        }
    }

    fn handle_continue(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.ensure_execution_allowed()?;
        self.open_link()?
            .call(Method::Continue, &self.breakpoints.params())?;
        self.move_to(SessionState::Running);
        self.send_success_body(req, json!({"allThreadsContinued": true}))
    }

    fn handle_next(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.ensure_execution_allowed()?;
        self.open_link()?.call(Method::Step, &[])?;
        self.move_to(SessionState::Running);
        self.send_success(req)
    }

    fn handle_pause(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        match self.state {
            SessionState::Running => self.open_link()?.call(Method::Stop, &[])?,
            SessionState::Ready | SessionState::Stopped => {}
            state => return Err(Error::NotReady(state).into()),
        }
        self.send_success(req)
    }

    fn handle_evaluate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let args: EvaluateArguments = parse_args(req)?;
        let context = args.context.as_deref().unwrap_or_default();

        let mut reply = None;
        if context == "hover" {
            if let Some(program) = muted_error!(self.snapshot()) {
                if let Some(value) = program.registers.get(&args.expression) {
                    reply = Some(self.register_format.render(*value));
                }
                if let Some(label) = program.labels.get(&args.expression) {
                    reply = Some(label.value.to_string());
                }
            }
        }
        let result = reply.unwrap_or_else(|| format!("eval(ctx: '{context}', '{}')", args.expression));
        self.send_success_body(req, json!({"result": result, "variablesReference": 0}))
    }

    fn handle_update_visualizer(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        let params = req
            .arguments
            .get("params")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        self.open_link()?.call(Method::UpdateVisualizer, &params)?;
        self.send_success(req)
    }

    fn handle_terminate(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.terminate()?;
        self.send_success(req)
    }

    fn handle_disconnect(&mut self, req: &DapRequest) -> anyhow::Result<()> {
        self.terminate()?;
        self.send_success(req)
    }
}

fn parse_args<T: DeserializeOwned>(req: &DapRequest) -> anyhow::Result<T> {
    serde_json::from_value(req.arguments.clone())
        .with_context(|| format!("{}: invalid arguments", req.command))
}
