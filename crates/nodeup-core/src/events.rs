//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other surface) to subscribe to upload progress
//! without tight coupling to the protocol engine.

use crate::protocol::Status;
use crate::state::UploadStats;

/// Events emitted by an upload session.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A line was transmitted on the bus. `attempt` is 1 for the first
    /// transmission and grows on checksum retries.
    LineSent {
        line: usize,
        bytes: usize,
        attempt: u32,
    },
    /// A status byte arrived for the line in flight.
    StatusReceived { line: usize, status: Status },
    /// The node requested a retransmission of the line in flight.
    ChecksumRetry { line: usize, attempt: u32 },
    /// Upload finished successfully.
    Complete { stats: UploadStats },
    /// Upload aborted.
    Error { line: usize, message: String },
}

/// Observer trait for receiving upload events.
pub trait UploadObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &UploadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UploadObserver for NullObserver {
    fn on_event(&self, _event: &UploadEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UploadObserver for TracingObserver {
    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::LineSent {
                line,
                bytes,
                attempt,
            } => {
                tracing::debug!(line, bytes, attempt, "Line sent");
            }
            UploadEvent::StatusReceived { line, status } => {
                tracing::debug!(line, status = %status, "Status received");
            }
            UploadEvent::ChecksumRetry { line, attempt } => {
                tracing::warn!(line, attempt, "Checksum failed, retransmitting");
            }
            UploadEvent::Complete { stats } => {
                tracing::info!(
                    lines = stats.lines_sent,
                    retries = stats.checksum_retries,
                    bytes = stats.bytes_written,
                    "Upload complete"
                );
            }
            UploadEvent::Error { line, message } => {
                tracing::error!(line, "Upload failed: {}", message);
            }
        }
    }
}
