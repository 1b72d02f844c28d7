//! Editor side: Debug Adapter Protocol envelopes and transports.

pub mod protocol;
pub mod tracer;
pub mod transport;
