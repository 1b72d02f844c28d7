use strum_macros::Display;

/// Session lifecycle. Transitions outside of [`SessionState::can_move_to`] are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionState {
    Disconnected,
    Connecting,
    /// Socket is open, the `start` reply is not in yet.
    AwaitingStart,
    Ready,
    Stopped,
    Running,
    Terminating,
    Terminated,
}

impl SessionState {
    pub fn can_move_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disconnected, Connecting)
            | (Connecting, AwaitingStart)
            | (AwaitingStart, Ready)
            | (Ready, Stopped)
            | (Ready, Running)
            | (Stopped, Running)
            | (Running, Stopped)
            | (Terminating, Terminated) => true,
            (Terminating | Terminated, Terminating) => false,
            (_, Terminating) => true,
            _ => false,
        }
    }

    /// True when execution commands may be forwarded to the remote debugger.
    pub fn accepts_execution(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Stopped)
    }

    pub fn is_over(self) -> bool {
        matches!(self, SessionState::Terminating | SessionState::Terminated)
    }
}
