//! Remote debugger side: wire framing, envelopes and the socket link.

pub mod envelope;
pub mod frame;
pub mod link;
pub mod rendezvous;

pub use envelope::{EventKind, Method, ProgramSnapshot, RemoteEvent};
pub use link::{LinkOptions, RemoteDebuggerLink, RetryPolicy};
pub use rendezvous::{Rendezvous, Wake};
