//! Connection to the remote debugger.
//!
//! [`RemoteDebuggerLink`] owns the socket. A worker thread dials the remote
//! (retrying refused connections per [`RetryPolicy`]), then decodes frames and
//! routes every inbound envelope either to the caller waiting for it or to
//! the event subscribers.

use crate::error::Error;
use crate::remote::envelope::{Call, Envelope, EventKind, Failure, Method, RemoteEvent, Reply};
use crate::remote::frame::{self, FrameCodec, DEFAULT_MAX_PENDING};
use crate::remote::rendezvous::Rendezvous;
use serde_json::Value;
use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const READ_CHUNK: usize = 8192;

/// How the initial dial reacts to a refused connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    /// `None` retries until the link is closed.
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next dial, given how many dials already failed.
    pub fn next_delay(&self, failed: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if failed >= max => None,
            _ => Some(self.interval),
        }
    }

    fn is_retryable(err: &io::Error) -> bool {
        matches!(
            err.kind(),
            ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::TimedOut
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LinkOptions {
    pub retry: RetryPolicy,
    pub max_pending: usize,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&RemoteEvent) + Send + Sync>;

enum Subscriber {
    Persistent(Handler),
    Once(Box<dyn FnOnce(&RemoteEvent) + Send>),
}

/// Event subscribers, keyed by event kind. `None` key receives every event.
#[derive(Default)]
struct Subscriptions {
    next_id: u64,
    by_kind: HashMap<Option<EventKind>, Vec<(SubscriptionId, Subscriber)>>,
}

impl Subscriptions {
    fn add(&mut self, kind: Option<EventKind>, subscriber: Subscriber) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.by_kind.entry(kind).or_default().push((id, subscriber));
        id
    }

    fn remove(&mut self, id: SubscriptionId) {
        for subscribers in self.by_kind.values_mut() {
            subscribers.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Take the handlers that must see `kind`. One-shot subscribers are removed.
    fn take_for(&mut self, kind: EventKind) -> Vec<Subscriber> {
        let mut handlers = vec![];
        for key in [Some(kind), None] {
            let Some(subscribers) = self.by_kind.get_mut(&key) else {
                continue;
            };
            for (_, subscriber) in subscribers.iter() {
                if let Subscriber::Persistent(handler) = subscriber {
                    handlers.push(Subscriber::Persistent(handler.clone()));
                }
            }
            let (once, keep): (Vec<_>, Vec<_>) = std::mem::take(subscribers)
                .into_iter()
                .partition(|(_, s)| matches!(s, Subscriber::Once(_)));
            *subscribers = keep;
            handlers.extend(once.into_iter().map(|(_, s)| s));
        }
        handlers
    }
}

struct Shared {
    writer: Mutex<Option<TcpStream>>,
    open: AtomicBool,
    closed: AtomicBool,
    pending: Mutex<HashMap<Method, SyncSender<Reply>>>,
    subscriptions: Mutex<Subscriptions>,
    ready: Arc<Rendezvous>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Shared {
    fn publish(&self, event: RemoteEvent) {
        let kind = EventKind::from(&event);
        let handlers = lock(&self.subscriptions).take_for(kind);
        if handlers.is_empty() {
            log::debug!(target: "link", "no subscriber for `{kind}`, event dropped");
        }
        for handler in handlers {
            match handler {
                Subscriber::Persistent(f) => f(&event),
                Subscriber::Once(f) => f(&event),
            }
        }
    }

    fn take_pending(&self, method: Method) -> Option<SyncSender<Reply>> {
        lock(&self.pending).remove(&method)
    }

    /// Drop every pending slot, waiting callers see their call aborted.
    fn abort_pending(&self) {
        lock(&self.pending).clear();
    }

    fn dispatch(&self, msg: Value) {
        let reply = match serde_json::from_value::<Envelope>(msg)
            .map_err(Error::from)
            .and_then(Reply::try_from)
        {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!(target: "link", "drop inbound envelope: {e}");
                return;
            }
        };

        if reply.is_exit() {
            // the exit report answers no call, whoever waited is aborted
            self.take_pending(reply.method());
            self.publish(RemoteEvent::Exited);
            return;
        }

        match reply {
            Reply::Error(method, error) => {
                if let Some(slot) = self.take_pending(method) {
                    let _ = slot.try_send(Reply::Error(method, error.clone()));
                }
                self.publish(RemoteEvent::Error(Failure::Remote { method, error }));
            }
            Reply::Result(method, result) => match self.take_pending(method) {
                Some(slot) => {
                    let _ = slot.try_send(Reply::Result(method, result));
                }
                None => self.publish(RemoteEvent::from_result(method, result)),
            },
        }
    }

    fn dial(&self, host: &str, port: u16, retry: RetryPolicy) -> Result<TcpStream, String> {
        let mut failed = 0;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err("link closed while connecting".to_string());
            }
            match TcpStream::connect((host, port)) {
                Ok(stream) => return Ok(stream),
                Err(e) if RetryPolicy::is_retryable(&e) => {
                    failed += 1;
                    let Some(delay) = retry.next_delay(failed) else {
                        return Err(format!("connect {host}:{port}: {e} (gave up after {failed} attempts)"));
                    };
                    log::debug!(target: "link", "connect {host}:{port}: {e}, retry in {delay:?}");
                    thread::sleep(delay);
                }
                Err(e) => return Err(format!("connect {host}:{port}: {e}")),
            }
        }
    }

    /// Publish the stream as writer unless the link was closed meanwhile.
    fn install(&self, stream: &TcpStream) -> io::Result<bool> {
        let writer = stream.try_clone()?;
        let mut guard = lock(&self.writer);
        if self.closed.load(Ordering::SeqCst) {
            let _ = stream.shutdown(Shutdown::Both);
            return Ok(false);
        }
        *guard = Some(writer);
        self.open.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn read_loop(&self, mut stream: TcpStream, max_pending: usize) -> String {
        let mut codec = FrameCodec::new(max_pending);
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) => return "connection closed by remote debugger".to_string(),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return format!("read: {e}"),
            };
            // only unparsable JSON stays buffered, a bad envelope is dropped by dispatch
            let messages = match codec.decode_json::<Value>(&buf[..n]) {
                Ok(messages) => messages,
                Err(e) => return format!("framing: {e}"),
            };
            for msg in messages {
                log::debug!(target: "link", "<- {}", msg.get("method").unwrap_or(&Value::Null));
                self.dispatch(msg);
            }
        }
    }

    fn run(self: Arc<Self>, host: String, port: u16, options: LinkOptions) {
        let stream = match self.dial(&host, port, options.retry) {
            Ok(stream) => stream,
            Err(reason) => {
                if !self.closed.load(Ordering::SeqCst) {
                    log::warn!(target: "link", "{reason}");
                    self.publish(RemoteEvent::Error(Failure::Transport(reason)));
                }
                return;
            }
        };
        let _ = stream.set_nodelay(true);

        match self.install(&stream) {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                self.publish(RemoteEvent::Error(Failure::Transport(format!("clone socket: {e}"))));
                return;
            }
        }
        log::info!(target: "link", "connected to remote debugger at {host}:{port}");
        self.ready.notify_all();
        self.publish(RemoteEvent::Connected);

        let reason = self.read_loop(stream, options.max_pending);

        self.open.store(false, Ordering::SeqCst);
        self.abort_pending();
        if !self.closed.load(Ordering::SeqCst) {
            log::warn!(target: "link", "{reason}");
            self.publish(RemoteEvent::Error(Failure::Transport(reason)));
        }
    }
}

/// Call/event interface to the remote debugger.
pub struct RemoteDebuggerLink {
    shared: Arc<Shared>,
    options: LinkOptions,
    worker: Option<JoinHandle<()>>,
}

impl RemoteDebuggerLink {
    /// Create a disconnected link. `ready` is notified (all waiters) once the socket opens.
    pub fn new(options: LinkOptions, ready: Arc<Rendezvous>) -> Self {
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(None),
                open: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                pending: Mutex::new(HashMap::new()),
                subscriptions: Mutex::new(Subscriptions::default()),
                ready,
            }),
            options,
            worker: None,
        }
    }

    /// Start dialing `host:port` in the background.
    pub fn connect(&mut self, host: &str, port: u16) {
        if self.worker.is_some() {
            log::warn!(target: "link", "link already connecting, ignore second connect");
            return;
        }
        let shared = self.shared.clone();
        let host = host.to_string();
        let options = self.options;
        self.worker = Some(thread::spawn(move || shared.run(host, port, options)));
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Block until the socket is open or `timeout` elapses. Return true if open.
    pub fn wait_open(&self, timeout: Duration) -> bool {
        let waiter = self.shared.ready.register();
        if self.is_open() {
            return true;
        }
        waiter.wait(timeout);
        self.is_open()
    }

    /// Subscribe to every publication of `kind`.
    pub fn subscribe(
        &self,
        kind: EventKind,
        handler: impl Fn(&RemoteEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        lock(&self.shared.subscriptions).add(Some(kind), Subscriber::Persistent(Arc::new(handler)))
    }

    /// Subscribe to the next publication of `kind` only.
    pub fn subscribe_once(
        &self,
        kind: EventKind,
        handler: impl FnOnce(&RemoteEvent) + Send + 'static,
    ) -> SubscriptionId {
        lock(&self.shared.subscriptions).add(Some(kind), Subscriber::Once(Box::new(handler)))
    }

    /// Subscribe to every event regardless of kind.
    pub fn subscribe_all(
        &self,
        handler: impl Fn(&RemoteEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        lock(&self.shared.subscriptions).add(None, Subscriber::Persistent(Arc::new(handler)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        lock(&self.shared.subscriptions).remove(id)
    }

    /// Send a call without waiting for its reply.
    pub fn call(&self, method: Method, params: &[Value]) -> Result<(), Error> {
        let payload = serde_json::to_vec(&Call { method, params })?;
        let frame = frame::encode(&payload);

        let mut guard = lock(&self.shared.writer);
        let stream = guard.as_mut().ok_or(Error::NotConnected)?;
        stream.write_all(&frame)?;
        stream.flush()?;
        log::debug!(target: "link", "-> {method} ({} params)", params.len());
        Ok(())
    }

    /// Send a call and block until its reply arrives or `timeout` elapses.
    pub fn call_and_wait(
        &self,
        method: Method,
        params: &[Value],
        timeout: Duration,
    ) -> Result<Value, Error> {
        let (slot, reply) = mpsc::sync_channel(1);
        {
            let mut pending = lock(&self.shared.pending);
            if pending.contains_key(&method) {
                return Err(Error::CallInFlight(method));
            }
            pending.insert(method, slot);
        }

        if let Err(e) = self.call(method, params) {
            self.shared.take_pending(method);
            return Err(e);
        }

        match reply.recv_timeout(timeout) {
            Ok(Reply::Result(_, result)) => Ok(result),
            Ok(Reply::Error(method, error)) => Err(Error::Remote { method, error }),
            Err(RecvTimeoutError::Timeout) => {
                self.shared.take_pending(method);
                Err(Error::ReplyTimeout(method, timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::CallAborted(method)),
        }
    }

    /// Tear the link down. Idempotent, no error is published for it.
    pub fn close(&mut self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.open.store(false, Ordering::SeqCst);
        if let Some(stream) = lock(&self.shared.writer).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.shared.abort_pending();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!(target: "link", "link worker panicked");
            }
        }
        log::info!(target: "link", "link closed");
    }
}

impl Drop for RemoteDebuggerLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_retry_policy() {
        let bounded = RetryPolicy {
            interval: Duration::from_millis(10),
            max_attempts: Some(3),
        };
        assert_eq!(bounded.next_delay(1), Some(Duration::from_millis(10)));
        assert_eq!(bounded.next_delay(2), Some(Duration::from_millis(10)));
        assert_eq!(bounded.next_delay(3), None);
        assert_eq!(RetryPolicy::default().next_delay(10_000), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_once_and_persistent_subscribers() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        let persistent = Arc::new(AtomicUsize::new(0));
        let once = Arc::new(AtomicUsize::new(0));
        let every = Arc::new(AtomicUsize::new(0));

        link.subscribe(EventKind::Step, {
            let c = persistent.clone();
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        link.subscribe_once(EventKind::Step, {
            let c = once.clone();
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        link.subscribe_all({
            let c = every.clone();
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        for _ in 0..3 {
            link.shared.publish(RemoteEvent::Step(json!({"stopped": true})));
        }
        link.shared.publish(RemoteEvent::Exited);

        assert_eq!(persistent.load(Ordering::SeqCst), 3);
        assert_eq!(once.load(Ordering::SeqCst), 1);
        assert_eq!(every.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_unsubscribe() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        let count = Arc::new(AtomicUsize::new(0));
        let id = link.subscribe(EventKind::Exited, {
            let c = count.clone();
            move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        link.shared.publish(RemoteEvent::Exited);
        link.unsubscribe(id);
        link.shared.publish(RemoteEvent::Exited);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_routes_exit_to_exited_event() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        let seen = Arc::new(Mutex::new(vec![]));
        link.subscribe_all({
            let seen = seen.clone();
            move |e| lock(&seen).push(EventKind::from(e))
        });

        let (slot, reply) = mpsc::sync_channel(1);
        lock(&link.shared.pending).insert(Method::Continue, slot);

        link.shared
            .dispatch(json!({"method": "continue", "result": {"exited": true}}));

        assert_eq!(*lock(&seen), vec![EventKind::Exited]);
        assert!(matches!(reply.try_recv(), Err(mpsc::TryRecvError::Disconnected)));
    }

    #[test]
    fn test_dispatch_prefers_pending_caller() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        let seen = Arc::new(Mutex::new(vec![]));
        link.subscribe_all({
            let seen = seen.clone();
            move |e| lock(&seen).push(EventKind::from(e))
        });

        let (slot, reply) = mpsc::sync_channel(1);
        lock(&link.shared.pending).insert(Method::Info, slot);

        let info = json!({"method": "info", "result": 1});
        link.shared.dispatch(info.clone());
        assert_eq!(reply.try_recv().unwrap(), Reply::Result(Method::Info, json!(1)));

        // nobody waits anymore, the second reply becomes an event
        link.shared.dispatch(info);
        assert_eq!(*lock(&seen), vec![EventKind::Info]);
    }

    #[test]
    fn test_call_requires_connection() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        assert!(matches!(link.call(Method::Step, &[]), Err(Error::NotConnected)));
        assert!(matches!(
            link.call_and_wait(Method::Info, &[], Duration::from_millis(10)),
            Err(Error::NotConnected)
        ));
        assert!(lock(&link.shared.pending).is_empty());
    }

    #[test]
    fn test_invalid_envelope_does_not_block_stream() {
        let link = RemoteDebuggerLink::new(LinkOptions::default(), Arc::new(Rendezvous::new()));
        let seen = Arc::new(Mutex::new(vec![]));
        link.subscribe_all({
            let seen = seen.clone();
            move |e| lock(&seen).push(e.clone())
        });

        let mut stream = frame::encode(br#"{"result": 1}"#);
        stream.extend(frame::encode(br#"{"method": 5, "result": 1}"#));
        stream.extend(frame::encode(br#"{"method": "step", "result": {"stopped": true}}"#));

        let mut codec = FrameCodec::default();
        let messages = codec.decode_json::<Value>(&stream).unwrap();
        assert_eq!(messages.len(), 3);
        assert!(codec.pending().is_empty());

        for msg in messages {
            link.shared.dispatch(msg);
        }
        assert_eq!(*lock(&seen), vec![RemoteEvent::Step(json!({"stopped": true}))]);
    }
}
