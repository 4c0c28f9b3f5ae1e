//! Upload session - drives the per-line send/await/retry/abort loop.

use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::events::{NullObserver, TracingObserver, UploadEvent, UploadObserver};
use crate::hex::is_blank_line;
use crate::protocol::{ENTER_UPGRADE_COMMAND, Status, is_valid_node_address};
use crate::state::{UploadState, UploadStats};
use crate::transport::{BusLink, TransportError};

/// Session failure taxonomy.
///
/// Every fatal condition carries the index of the payload line that was in
/// flight, so an operator can tell a corrupt image from a wiring or
/// addressing problem.
#[derive(Error, Debug)]
pub enum UploadError {
    /// Configuration error: fix the address, then rerun the session.
    #[error("invalid target address {address}: node addresses are 1..=127")]
    InvalidAddress { address: u8 },

    /// I/O-level failure. May be transient; rerunning the whole session is
    /// the caller's decision.
    #[error("transport failure at line {line}: {source}")]
    Transport {
        line: usize,
        #[source]
        source: TransportError,
    },

    /// The remote bootloader rejected the line. Terminal: its page and
    /// ordering state cannot be resumed mid-stream.
    #[error("line {line} rejected by bootloader: {status}")]
    Rejected { line: usize, status: Status },

    /// Status byte outside the known taxonomy (and the session was not
    /// configured to ignore those).
    #[error("unrecognized status byte {value:#04X} at line {line}")]
    UnknownStatus { line: usize, value: u8 },

    /// The bounded-poll deviation was enabled and the node never answered.
    #[error("no status for line {line} after {polls} polls")]
    StatusPollsExhausted { line: usize, polls: u32 },

    /// The line source failed mid-read.
    #[error("failed to read hex line {line}: {source}")]
    LineSource {
        line: usize,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    /// Index of the payload line that was in flight.
    pub fn line(&self) -> Option<usize> {
        match self {
            UploadError::InvalidAddress { .. } => None,
            UploadError::Transport { line, .. }
            | UploadError::Rejected { line, .. }
            | UploadError::UnknownStatus { line, .. }
            | UploadError::StatusPollsExhausted { line, .. }
            | UploadError::LineSource { line, .. } => Some(*line),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration for an upload session.
///
/// The defaults reproduce the baseline protocol behavior exactly; every
/// field is a documented deviation an operator opts into.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bound on status polls per line. `None` keeps the baseline behavior:
    /// poll forever, a non-responding node hangs the session.
    pub status_poll_limit: Option<u32>,
    /// Sleep between status polls, in milliseconds. 0 busy-polls (baseline).
    pub poll_delay_ms: u64,
    /// Treat unrecognized status bytes as accepted instead of failing.
    /// Restores the historical warn-and-continue behavior.
    pub ignore_unknown_status: bool,
}

impl SessionConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Broadcast the enter-upgrade command to every node on the bus.
///
/// One fixed one-byte transaction on the general call address; nodes that
/// hear it drop into their bootloaders and await new code.
pub fn enter_upgrade_mode<L: BusLink>(link: &mut L) -> Result<(), TransportError> {
    link.broadcast_command(ENTER_UPGRADE_COMMAND)?;
    info!(
        command = format!("{ENTER_UPGRADE_COMMAND:#04X}"),
        "Broadcast enter-upgrade command, nodes now await new code"
    );
    Ok(())
}

/// Upload session - streams HEX lines to one node's bootloader.
///
/// Owns its bus link for the session's lifetime; the link is released when
/// the session is dropped (or recovered with [`UploadSession::into_link`]),
/// on every exit path including failure.
pub struct UploadSession<L: BusLink, O: UploadObserver = NullObserver> {
    link: L,
    address: u8,
    config: SessionConfig,
    observer: Arc<O>,
    state: UploadState,
    stats: UploadStats,
}

impl<L: BusLink> UploadSession<L, TracingObserver> {
    /// Create a session with the default tracing observer.
    pub fn new(link: L, address: u8, config: SessionConfig) -> Self {
        Self::with_observer(link, address, config, Arc::new(TracingObserver))
    }
}

impl<L: BusLink, O: UploadObserver> UploadSession<L, O> {
    /// Create a session with a custom observer.
    pub fn with_observer(link: L, address: u8, config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            link,
            address,
            config,
            observer,
            state: UploadState::default(),
            stats: UploadStats::default(),
        }
    }

    /// Current state of the engine.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    /// Release the bus link.
    pub fn into_link(self) -> L {
        self.link
    }

    /// Run the upload to completion.
    ///
    /// Consumes the line source one line at a time, strictly in order.
    /// Returns the session counters on success; on failure the error names
    /// the in-flight line and the reason, and no further lines are sent.
    #[instrument(skip(self, lines), fields(address = self.address))]
    pub fn run<I>(&mut self, lines: I) -> Result<UploadStats, UploadError>
    where
        I: IntoIterator<Item = io::Result<Vec<u8>>>,
    {
        let mut source = lines.into_iter();
        let mut line_index = 0usize;

        loop {
            self.goto(UploadState::Ready { line: line_index });

            let line = match next_payload_line(&mut source) {
                Ok(Some(line)) => line,
                Ok(None) => {
                    // Exhausted source is success, not error.
                    self.goto(UploadState::Done { success: true });
                    self.observer
                        .on_event(&UploadEvent::Complete { stats: self.stats });
                    return Ok(self.stats);
                }
                Err(source) => {
                    return Err(self.fail(UploadError::LineSource {
                        line: line_index,
                        source,
                    }));
                }
            };

            // Revalidated every iteration: the bus can be rebound between
            // transactions.
            if !is_valid_node_address(self.address) {
                return Err(self.fail(UploadError::InvalidAddress {
                    address: self.address,
                }));
            }

            let mut attempt: u32 = 1;
            loop {
                self.goto(UploadState::Sending { line: line_index });
                if let Err(source) = self.send_line(&line) {
                    return Err(self.fail(UploadError::Transport {
                        line: line_index,
                        source,
                    }));
                }
                self.stats.writes += 1;
                self.stats.bytes_written += line.len();
                self.observer.on_event(&UploadEvent::LineSent {
                    line: line_index,
                    bytes: line.len(),
                    attempt,
                });

                self.goto(UploadState::AwaitingStatus { line: line_index });
                let status = Status::from_byte(self.await_status(line_index)?);
                self.observer.on_event(&UploadEvent::StatusReceived {
                    line: line_index,
                    status,
                });

                match status {
                    Status::Accepted => {
                        self.stats.lines_sent += 1;
                        break;
                    }
                    Status::ChecksumFailed => {
                        // The only automatic retry: same line, same index.
                        self.stats.checksum_retries += 1;
                        attempt += 1;
                        self.observer.on_event(&UploadEvent::ChecksumRetry {
                            line: line_index,
                            attempt,
                        });
                    }
                    Status::Unknown(value) if self.config.ignore_unknown_status => {
                        warn!(line = line_index, value, "Ignoring unrecognized status byte");
                        self.stats.lines_sent += 1;
                        break;
                    }
                    Status::Unknown(value) => {
                        return Err(self.fail(UploadError::UnknownStatus {
                            line: line_index,
                            value,
                        }));
                    }
                    rejection => {
                        return Err(self.fail(UploadError::Rejected {
                            line: line_index,
                            status: rejection,
                        }));
                    }
                }
            }

            line_index += 1;
        }
    }

    /// One addressed transaction: bind the target, push the line.
    fn send_line(&mut self, line: &[u8]) -> Result<(), TransportError> {
        self.link.select(self.address)?;
        self.link.write(line)
    }

    /// Poll for the node's status byte. The bootloader may need time to
    /// flash the record before it has one ready.
    fn await_status(&mut self, line: usize) -> Result<u8, UploadError> {
        let mut polls: u32 = 0;
        loop {
            match self.link.read_status() {
                Ok(Some(byte)) => return Ok(byte),
                Ok(None) => {
                    polls += 1;
                    if let Some(limit) = self.config.status_poll_limit
                        && polls >= limit
                    {
                        return Err(self.fail(UploadError::StatusPollsExhausted { line, polls }));
                    }
                    if self.config.poll_delay_ms > 0 {
                        thread::sleep(Duration::from_millis(self.config.poll_delay_ms));
                    }
                }
                Err(source) => {
                    return Err(self.fail(UploadError::Transport { line, source }));
                }
            }
        }
    }

    fn goto(&mut self, next: UploadState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    fn fail(&mut self, err: UploadError) -> UploadError {
        self.goto(UploadState::Failed);
        self.observer.on_event(&UploadEvent::Error {
            line: err.line().unwrap_or(0),
            message: err.to_string(),
        });
        err
    }
}

/// Pull the next transmittable line, skipping blanks.
fn next_payload_line<I>(source: &mut I) -> io::Result<Option<Vec<u8>>>
where
    I: Iterator<Item = io::Result<Vec<u8>>>,
{
    for line in source {
        let line = line?;
        if !is_blank_line(&line) {
            return Ok(Some(line));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::constants::*;
    use crate::transport::{BusOp, MockBusLink};

    const ADDR: u8 = 10;

    fn lines(input: &[&[u8]]) -> Vec<io::Result<Vec<u8>>> {
        input.iter().map(|l| Ok(l.to_vec())).collect()
    }

    fn session(mock: &MockBusLink, address: u8) -> UploadSession<MockBusLink> {
        UploadSession::with_observer(
            mock.clone(),
            address,
            SessionConfig::default(),
            Arc::new(NullObserver),
        )
    }

    #[test]
    fn test_empty_source_succeeds_without_transactions() {
        let mock = MockBusLink::new();
        let stats = session(&mock, ADDR).run(lines(&[])).unwrap();
        assert_eq!(stats.lines_sent, 0);
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_blank_only_source_succeeds_without_transactions() {
        let mock = MockBusLink::new();
        let stats = session(&mock, ADDR)
            .run(lines(&[b"\n", b"\r\n", b""]))
            .unwrap();
        assert_eq!(stats.lines_sent, 0);
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_all_accepted_sends_each_line_once_in_order() {
        let mock = MockBusLink::new();
        for _ in 0..3 {
            mock.queue_status(STATUS_ACCEPTED);
        }
        let stats = session(&mock, ADDR)
            .run(lines(&[b":A\n", b":B\n", b":C\n"]))
            .unwrap();
        assert_eq!(stats.lines_sent, 3);
        assert_eq!(stats.writes, 3);
        assert_eq!(
            mock.writes(),
            vec![b":A\n".to_vec(), b":B\n".to_vec(), b":C\n".to_vec()]
        );
    }

    #[test]
    fn test_checksum_retry_retransmits_same_line() {
        let mock = MockBusLink::new();
        // k = 2 checksum failures before acceptance
        mock.queue_status(STATUS_CHECKSUM_FAILED);
        mock.queue_status(STATUS_CHECKSUM_FAILED);
        mock.queue_status(STATUS_ACCEPTED);
        let stats = session(&mock, ADDR).run(lines(&[b":A\n"])).unwrap();
        // k + 1 transmissions, index never advanced past the line
        assert_eq!(stats.writes, 3);
        assert_eq!(stats.checksum_retries, 2);
        assert_eq!(stats.lines_sent, 1);
        assert_eq!(
            mock.writes(),
            vec![b":A\n".to_vec(), b":A\n".to_vec(), b":A\n".to_vec()]
        );
    }

    #[test]
    fn test_fatal_statuses_stop_immediately() {
        for code in [
            STATUS_NOT_INTEL_HEX,
            STATUS_MALFORMED,
            STATUS_PAGE_FULL,
            STATUS_WRONG_PAGE,
            STATUS_ILLEGAL_OPERATION,
        ] {
            let mock = MockBusLink::new();
            mock.queue_status(code);
            let err = session(&mock, ADDR)
                .run(lines(&[b":A\n", b":B\n"]))
                .unwrap_err();
            match err {
                UploadError::Rejected { line, status } => {
                    assert_eq!(line, 0);
                    assert_eq!(status, Status::from_byte(code));
                }
                other => panic!("expected Rejected for code {code}, got {other}"),
            }
            // Nothing after the rejected line went out.
            assert_eq!(mock.writes().len(), 1, "code {code}");
        }
    }

    #[test]
    fn test_address_zero_rejected_before_any_transaction() {
        let mock = MockBusLink::new();
        let err = session(&mock, 0).run(lines(&[b":A\n"])).unwrap_err();
        assert!(matches!(err, UploadError::InvalidAddress { address: 0 }));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_address_above_range_rejected_before_any_transaction() {
        let mock = MockBusLink::new();
        let err = session(&mock, 128).run(lines(&[b":A\n"])).unwrap_err();
        assert!(matches!(err, UploadError::InvalidAddress { address: 128 }));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_blank_line_retry_scenario() {
        // source = [blank, "S1\n", "S2\n"], statuses = [0, 103, 0]
        let mock = MockBusLink::new();
        mock.queue_status(STATUS_ACCEPTED);
        mock.queue_status(STATUS_CHECKSUM_FAILED);
        mock.queue_status(STATUS_ACCEPTED);
        let stats = session(&mock, ADDR)
            .run(lines(&[b"\n", b"S1\n", b"S2\n"]))
            .unwrap();
        assert_eq!(stats.writes, 3);
        assert_eq!(
            mock.ops(),
            vec![
                BusOp::Select(ADDR),
                BusOp::Write {
                    address: ADDR,
                    bytes: b"S1\n".to_vec(),
                },
                BusOp::Select(ADDR),
                BusOp::Write {
                    address: ADDR,
                    bytes: b"S2\n".to_vec(),
                },
                BusOp::Select(ADDR),
                BusOp::Write {
                    address: ADDR,
                    bytes: b"S2\n".to_vec(),
                },
            ]
        );
    }

    #[test]
    fn test_page_full_on_second_line() {
        // statuses = [0, 201] on two-line input
        let mock = MockBusLink::new();
        mock.queue_status(STATUS_ACCEPTED);
        mock.queue_status(STATUS_PAGE_FULL);
        let err = session(&mock, ADDR)
            .run(lines(&[b":A\n", b":B\n"]))
            .unwrap_err();
        match err {
            UploadError::Rejected { line, status } => {
                assert_eq!(line, 1);
                assert_eq!(status, Status::PageFull);
            }
            other => panic!("expected Rejected, got {other}"),
        }
        assert_eq!(mock.writes().len(), 2);
    }

    #[test]
    fn test_closed_transport_maps_to_transport_failure() {
        let mock = MockBusLink::new();
        mock.disconnect();
        let err = session(&mock, ADDR).run(lines(&[b":A\n"])).unwrap_err();
        assert!(matches!(
            err,
            UploadError::Transport {
                line: 0,
                source: TransportError::Closed,
            }
        ));
    }

    #[test]
    fn test_polling_waits_for_slow_node() {
        let mock = MockBusLink::new();
        mock.queue_not_ready();
        mock.queue_not_ready();
        mock.queue_status(STATUS_ACCEPTED);
        let stats = session(&mock, ADDR).run(lines(&[b":A\n"])).unwrap();
        assert_eq!(stats.lines_sent, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn test_bounded_polling_deviation() {
        let mock = MockBusLink::new();
        mock.queue_not_ready();
        mock.queue_not_ready();
        let config = SessionConfig {
            status_poll_limit: Some(2),
            ..SessionConfig::default()
        };
        let mut session =
            UploadSession::with_observer(mock.clone(), ADDR, config, Arc::new(NullObserver));
        let err = session.run(lines(&[b":A\n"])).unwrap_err();
        assert!(matches!(
            err,
            UploadError::StatusPollsExhausted { line: 0, polls: 2 }
        ));
    }

    #[test]
    fn test_unknown_status_fatal_by_default() {
        let mock = MockBusLink::new();
        mock.queue_status(42);
        let err = session(&mock, ADDR)
            .run(lines(&[b":A\n", b":B\n"]))
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::UnknownStatus { line: 0, value: 42 }
        ));
        assert_eq!(mock.writes().len(), 1);
    }

    #[test]
    fn test_unknown_status_ignored_when_configured() {
        let mock = MockBusLink::new();
        mock.queue_status(42);
        mock.queue_status(STATUS_ACCEPTED);
        let config = SessionConfig {
            ignore_unknown_status: true,
            ..SessionConfig::default()
        };
        let mut session =
            UploadSession::with_observer(mock.clone(), ADDR, config, Arc::new(NullObserver));
        let stats = session.run(lines(&[b":A\n", b":B\n"])).unwrap();
        assert_eq!(stats.lines_sent, 2);
        assert_eq!(stats.writes, 2);
    }

    #[test]
    fn test_line_source_error_reports_index() {
        let mock = MockBusLink::new();
        mock.queue_status(STATUS_ACCEPTED);
        let source: Vec<io::Result<Vec<u8>>> = vec![
            Ok(b":A\n".to_vec()),
            Err(io::Error::other("disk pulled")),
        ];
        let err = session(&mock, ADDR).run(source).unwrap_err();
        assert!(matches!(err, UploadError::LineSource { line: 1, .. }));
    }

    #[test]
    fn test_terminal_state_after_run() {
        let mock = MockBusLink::new();
        mock.queue_status(STATUS_ACCEPTED);
        let mut ok_session = session(&mock, ADDR);
        ok_session.run(lines(&[b":A\n"])).unwrap();
        assert_eq!(ok_session.state(), UploadState::Done { success: true });

        let failing = MockBusLink::new();
        failing.queue_status(STATUS_PAGE_FULL);
        let mut bad_session = session(&failing, ADDR);
        bad_session.run(lines(&[b":A\n"])).unwrap_err();
        assert_eq!(bad_session.state(), UploadState::Failed);
    }

    #[test]
    fn test_enter_upgrade_mode_broadcasts_command() {
        let mut mock = MockBusLink::new();
        enter_upgrade_mode(&mut mock).unwrap();
        assert_eq!(
            mock.ops(),
            vec![
                BusOp::Select(GENERAL_CALL_ADDRESS),
                BusOp::Write {
                    address: GENERAL_CALL_ADDRESS,
                    bytes: vec![ENTER_UPGRADE_COMMAND],
                },
            ]
        );
    }

    #[test]
    fn test_config_defaults_are_baseline() {
        let config = SessionConfig::default();
        assert_eq!(config.status_poll_limit, None);
        assert_eq!(config.poll_delay_ms, 0);
        assert!(!config.ignore_unknown_status);
    }
}
