use crate::remote::envelope::Method;
use crate::session::state::SessionState;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- generic errors --------------------------------------------
    #[error(transparent)]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0} syscall error: {1}")]
    Syscall(&'static str, nix::Error),

    // --------------------------------- framing errors --------------------------------------------
    #[error("invalid frame size `{0}`")]
    InvalidFrameSize(String),
    #[error("frame declares {declared} bytes, limit is {limit}")]
    FrameTooLarge { declared: usize, limit: usize },
    #[error("{pending} bytes buffered without a complete message (limit {limit})")]
    FragmentOverflow { pending: usize, limit: usize },

    // --------------------------------- envelope errors -------------------------------------------
    #[error("unknown remote method `{0}`")]
    UnknownMethod(String),
    #[error("`{0}` envelope carries neither result nor error")]
    EmptyEnvelope(String),
    #[error("`{0}` envelope carries both result and error")]
    AmbiguousEnvelope(String),
    #[error("unexpected `{method}` result shape: {source}")]
    ResultShape {
        method: Method,
        source: serde_json::Error,
    },

    // --------------------------------- link errors -----------------------------------------------
    #[error("remote debugger is not connected")]
    NotConnected,
    #[error("a `{0}` call is already waiting for its reply")]
    CallInFlight(Method),
    #[error("no reply to `{0}` within {1:?}")]
    ReplyTimeout(Method, Duration),
    #[error("`{0}` call aborted, link closed or remote process exited")]
    CallAborted(Method),
    #[error("remote debugger failed `{method}`: {error}")]
    Remote { method: Method, error: Value },

    // --------------------------------- session errors --------------------------------------------
    #[error("session is {0}, the remote debugger is not ready")]
    NotReady(SessionState),
}

impl Error {
    /// Return true if error is fatal for the link it came from.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::IO(_) => true,
            Error::Json(_) => false,
            Error::Syscall(_, _) => false,
            Error::InvalidFrameSize(_) => true,
            Error::FrameTooLarge { .. } => true,
            Error::FragmentOverflow { .. } => true,
            Error::UnknownMethod(_) => false,
            Error::EmptyEnvelope(_) => false,
            Error::AmbiguousEnvelope(_) => false,
            Error::ResultShape { .. } => false,
            Error::NotConnected => false,
            Error::CallInFlight(_) => false,
            Error::ReplyTimeout(_, _) => false,
            Error::CallAborted(_) => false,
            Error::Remote { .. } => false,
            Error::NotReady(_) => false,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
