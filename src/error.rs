use std::io;
use std::time::Duration;

use futures::channel::oneshot::Canceled;
use thiserror::Error;

use cdpmux_types::{CommandOutcome, FailureKind};

pub type Result<T, E = CdpError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum CdpError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Serde(#[from] serde_json::Error),
    /// The browser answered with a protocol-level error payload.
    #[error("{0}")]
    Chrome(#[from] cdpmux_types::Error),
    #[error("invalid argument: {0}")]
    InvalidArgs(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command queue is full")]
    QueueFull,
    #[error("instance limit of {0} reached")]
    InstanceLimitReached(usize),
    #[error("debug port {0} is already held by a live instance")]
    PortConflict(u16),
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),
    #[error("failed to terminate instance {0}: {1}")]
    KillFailed(u32, String),
    #[error("cleanup failed: {0}")]
    CleanupFailed(String),
    /// An allocation the operation needed was refused. Fatal to the
    /// operation, never swallowed.
    #[error("allocation failed: {0}")]
    Memory(String),
    #[error("no instance {0}")]
    NoSuchInstance(u32),
    #[error("client is shut down")]
    Shutdown,
    #[error("received no response from the browser")]
    NoResponse,
    #[error("javascript exception: {0}")]
    JavascriptException(String),
    #[error("{0}")]
    Url(#[from] url::ParseError),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

impl From<Canceled> for CdpError {
    fn from(_: Canceled) -> Self {
        CdpError::Shutdown
    }
}

impl CdpError {
    pub(crate) fn msg(msg: impl Into<String>) -> Self {
        CdpError::Transport(msg.into())
    }

    /// Maps a terminal [`CommandOutcome`] other than completion onto the
    /// matching error kind.
    pub(crate) fn from_outcome(outcome: CommandOutcome, timeout: Duration) -> Self {
        match outcome {
            CommandOutcome::Completed(_) => CdpError::NoResponse,
            CommandOutcome::Failed { kind, message } => match kind {
                FailureKind::Transport => CdpError::Transport(message),
                FailureKind::Shutdown => CdpError::Shutdown,
            },
            CommandOutcome::TimedOut => CdpError::Timeout(timeout),
        }
    }
}
