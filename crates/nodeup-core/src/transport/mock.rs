//! Mock bus link for testing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::traits::{BusLink, TransportError};

/// One observable bus operation, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// `select(address)` was issued.
    Select(u8),
    /// `write(bytes)` was issued while `address` was selected.
    Write { address: u8, bytes: Vec<u8> },
}

/// Mock bus link for unit testing the upload state machine.
///
/// Clones share state, so a test can hand one clone to the session and keep
/// another to queue statuses and inspect the transaction log.
#[derive(Clone)]
pub struct MockBusLink {
    /// Queued status reads. `Some(byte)` is a status, `None` simulates a
    /// node that is not answering yet.
    status_queue: Arc<Mutex<VecDeque<Option<u8>>>>,
    /// Captured operations.
    op_log: Arc<Mutex<Vec<BusOp>>>,
    /// Currently selected address.
    selected: Arc<Mutex<Option<u8>>>,
    /// Whether the underlying transport is still open.
    connected: Arc<Mutex<bool>>,
}

impl MockBusLink {
    pub fn new() -> Self {
        Self {
            status_queue: Arc::new(Mutex::new(VecDeque::new())),
            op_log: Arc::new(Mutex::new(Vec::new())),
            selected: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Queue a status byte to be returned on a future read.
    pub fn queue_status(&self, status: u8) {
        self.status_queue.lock().unwrap().push_back(Some(status));
    }

    /// Queue a "node not answering yet" read.
    pub fn queue_not_ready(&self) {
        self.status_queue.lock().unwrap().push_back(None);
    }

    /// All captured operations in issue order.
    pub fn ops(&self) -> Vec<BusOp> {
        self.op_log.lock().unwrap().clone()
    }

    /// Just the written payloads, in issue order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.op_log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|op| match op {
                BusOp::Write { bytes, .. } => Some(bytes.clone()),
                BusOp::Select(_) => None,
            })
            .collect()
    }

    /// Simulate the transport being closed underneath the session.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if *self.connected.lock().unwrap() {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Default for MockBusLink {
    fn default() -> Self {
        Self::new()
    }
}

impl BusLink for MockBusLink {
    fn select(&mut self, address: u8) -> Result<(), TransportError> {
        self.check_connected()?;
        if address > crate::protocol::MAX_NODE_ADDRESS {
            return Err(TransportError::AddressOutOfRange { address });
        }
        *self.selected.lock().unwrap() = Some(address);
        self.op_log.lock().unwrap().push(BusOp::Select(address));
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.check_connected()?;
        let address = match *self.selected.lock().unwrap() {
            Some(address) => address,
            None => {
                return Err(TransportError::Io(std::io::Error::other(
                    "no address selected",
                )));
            }
        };
        self.op_log.lock().unwrap().push(BusOp::Write {
            address,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }

    fn read_status(&mut self) -> Result<Option<u8>, TransportError> {
        self.check_connected()?;
        self.status_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| {
                // An exhausted queue means the test script ran dry.
                TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "status queue exhausted",
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ENTER_UPGRADE_COMMAND, GENERAL_CALL_ADDRESS};

    #[test]
    fn test_status_queue() {
        let mut mock = MockBusLink::new();
        mock.queue_not_ready();
        mock.queue_status(0);

        assert_eq!(mock.read_status().unwrap(), None);
        assert_eq!(mock.read_status().unwrap(), Some(0));
        // Queue is empty now
        assert!(mock.read_status().is_err());
    }

    #[test]
    fn test_op_capture() {
        let mut mock = MockBusLink::new();
        mock.select(0x10).unwrap();
        mock.write(b":00000001FF\n").unwrap();

        assert_eq!(
            mock.ops(),
            vec![
                BusOp::Select(0x10),
                BusOp::Write {
                    address: 0x10,
                    bytes: b":00000001FF\n".to_vec(),
                },
            ]
        );
        assert_eq!(mock.writes(), vec![b":00000001FF\n".to_vec()]);
    }

    #[test]
    fn test_write_without_select() {
        let mut mock = MockBusLink::new();
        assert!(mock.write(b"data").is_err());
    }

    #[test]
    fn test_select_out_of_range() {
        let mut mock = MockBusLink::new();
        assert!(matches!(
            mock.select(0x80),
            Err(TransportError::AddressOutOfRange { address: 0x80 })
        ));
        assert!(mock.ops().is_empty());
    }

    #[test]
    fn test_disconnect() {
        let mut mock = MockBusLink::new();
        mock.disconnect();
        assert!(matches!(mock.select(0x10), Err(TransportError::Closed)));
        assert!(matches!(mock.read_status(), Err(TransportError::Closed)));
    }

    #[test]
    fn test_broadcast_command() {
        let mut mock = MockBusLink::new();
        mock.broadcast_command(ENTER_UPGRADE_COMMAND).unwrap();
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
}
