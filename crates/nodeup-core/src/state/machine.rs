//! State machine types for the upload protocol.

use std::fmt;

/// State of the upload engine.
///
/// `line` is the index of the payload line in flight; it counts only
/// non-blank lines and advances only on acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Ready to pull the next line from the source.
    Ready { line: usize },
    /// Line is being transmitted on the bus.
    Sending { line: usize },
    /// Waiting for the node's status byte for the transmitted line.
    AwaitingStatus { line: usize },
    /// Terminal: all lines accepted (or the source was empty).
    Done { success: bool },
    /// Terminal: aborted. The reason is the session's returned error.
    Failed,
}

impl Default for UploadState {
    fn default() -> Self {
        Self::Ready { line: 0 }
    }
}

impl UploadState {
    /// Whether this state ends the session.
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Done { .. } | UploadState::Failed)
    }

    /// Line index in flight, if the state carries one.
    pub fn line(&self) -> Option<usize> {
        match self {
            UploadState::Ready { line }
            | UploadState::Sending { line }
            | UploadState::AwaitingStatus { line } => Some(*line),
            UploadState::Done { .. } | UploadState::Failed => None,
        }
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadState::Ready { line } => write!(f, "READY({line})"),
            UploadState::Sending { line } => write!(f, "SENDING({line})"),
            UploadState::AwaitingStatus { line } => write!(f, "AWAITING_STATUS({line})"),
            UploadState::Done { success } => write!(f, "DONE(success={success})"),
            UploadState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Counters accumulated over one upload session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    /// Payload lines accepted by the node.
    pub lines_sent: usize,
    /// Checksum-failed retransmissions performed.
    pub checksum_retries: usize,
    /// Total write transactions, retransmissions included.
    pub writes: usize,
    /// Total bytes handed to the bus, retransmissions included.
    pub bytes_written: usize,
}
