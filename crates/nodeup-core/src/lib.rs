//! nodeup-core: firmware upload protocol engine for bus-attached nodes.
//!
//! Streams a firmware image, encoded as Intel HEX text, to the resident
//! bootloader on a node sharing a two-wire bus, one record line at a time,
//! and reacts to the single-byte status the bootloader returns per line.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: status byte taxonomy, command and addressing constants
//! - **Transport**: bus communication abstraction (Linux i2c-dev, mock)
//! - **State**: upload state machine types and session counters
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: the per-line send/await/retry/abort engine
//! - **Hex**: lazy line source over an Intel HEX file
//!
//! # Example
//!
//! ```no_run
//! use nodeup_core::hex::HexLines;
//! use nodeup_core::session::{SessionConfig, UploadSession};
//! use nodeup_core::transport::I2cLink;
//!
//! let link = I2cLink::open("/dev/i2c-1").expect("open bus");
//! let lines = HexLines::open("firmware.hex").expect("open image");
//! let mut session = UploadSession::new(link, 10, SessionConfig::default());
//! let stats = session.run(lines).expect("upload failed");
//! println!("{} lines flashed", stats.lines_sent);
//! ```

pub mod events;
pub mod hex;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use events::{NullObserver, TracingObserver, UploadEvent, UploadObserver};
pub use hex::HexLines;
pub use protocol::Status;
pub use session::{
    ConfigError, SessionConfig, UploadError, UploadSession, enter_upgrade_mode,
};
pub use state::{UploadState, UploadStats};
#[cfg(target_os = "linux")]
pub use transport::I2cLink;
pub use transport::{BusLink, MockBusLink, TransportError};
