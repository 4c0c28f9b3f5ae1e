//! Bus transport layer abstraction.
//!
//! Defines the `BusLink` trait for addressed byte transfer on the shared
//! two-wire bus, allowing different implementations (Linux i2c-dev, mock).

use thiserror::Error;

use crate::protocol::GENERAL_CALL_ADDRESS;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("address {address:#04X} outside the 7-bit range accepted by the bus")]
    AddressOutOfRange { address: u8 },

    #[error("failed to bind bus to address {address:#04X}: {source}")]
    Config {
        address: u8,
        #[source]
        source: std::io::Error,
    },

    #[error("short write: bus accepted {written} of {expected} bytes")]
    ShortWrite { expected: usize, written: usize },

    #[error("bus closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Configuration-class failure: fixable by the caller before retrying
    /// the session (bad address, bus cannot be bound).
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            TransportError::AddressOutOfRange { .. } | TransportError::Config { .. }
        )
    }
}

/// Abstract bus link interface.
///
/// All operations block until the underlying transport completes or fails
/// and have observable effects on bus-attached hardware. The `&mut self`
/// receivers make exclusive use a compile-time property: one owner drives
/// one link, no external locking to bypass.
pub trait BusLink: Send {
    /// Bind subsequent transactions to the given bus address.
    fn select(&mut self, address: u8) -> Result<(), TransportError>;

    /// Transmit exactly `bytes.len()` bytes to the selected address.
    /// Never retried internally; retry is the caller's decision.
    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read one status byte from the selected address.
    ///
    /// `Ok(None)` means the node is not answering yet (it may still be
    /// flashing the previous record). Single-byte, non-buffered: only the
    /// most recent status matters.
    fn read_status(&mut self) -> Result<Option<u8>, TransportError>;

    /// Select the general call address and write a single command byte.
    /// Used only for enter-upgrade signaling, not in the per-line loop.
    fn broadcast_command(&mut self, command: u8) -> Result<(), TransportError> {
        self.select(GENERAL_CALL_ADDRESS)?;
        self.write(&[command])
    }
}
