//! Linux i2c-dev transport implementation.
//!
//! Talks to `/dev/i2c-*` character devices: `ioctl(fd, I2C_SLAVE, addr)`
//! binds the target address, then plain `read`/`write` on the fd perform
//! addressed transfers.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, trace};

use super::traits::{BusLink, TransportError};
use crate::protocol::MAX_NODE_ADDRESS;

/// `I2C_SLAVE` ioctl request from `linux/i2c-dev.h`.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// Bus link over a Linux I2C character device.
pub struct I2cLink {
    file: File,
    path: PathBuf,
}

impl I2cLink {
    /// Open an I2C character device, e.g. `/dev/i2c-1`.
    #[instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, TransportError> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        info!("Opened I2C interface");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Device path this link was opened on.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BusLink for I2cLink {
    fn select(&mut self, address: u8) -> Result<(), TransportError> {
        if address > MAX_NODE_ADDRESS {
            return Err(TransportError::AddressOutOfRange { address });
        }
        // Re-issued before every transaction: the bus may have been
        // reconfigured since the last call (broadcast, another tool).
        let rc = unsafe {
            libc::ioctl(
                self.file.as_raw_fd(),
                I2C_SLAVE,
                libc::c_ulong::from(address),
            )
        };
        if rc < 0 {
            return Err(TransportError::Config {
                address,
                source: std::io::Error::last_os_error(),
            });
        }
        trace!(address = format!("{address:#04X}"), "Bus address selected");
        Ok(())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let written = self.file.write(bytes)?;
        if written != bytes.len() {
            return Err(TransportError::ShortWrite {
                expected: bytes.len(),
                written,
            });
        }
        debug!(bytes_written = written, "Write complete");
        Ok(())
    }

    fn read_status(&mut self) -> Result<Option<u8>, TransportError> {
        let mut buf = [0u8; 1];
        match self.file.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(_) => {
                debug!(status = buf[0], "Status byte received");
                Ok(Some(buf[0]))
            }
            // The bootloader NAKs the bus while it is busy flashing a page;
            // adapters report that as ENXIO or EREMOTEIO (EAGAIN on some).
            Err(e)
                if matches!(
                    e.raw_os_error(),
                    Some(libc::ENXIO) | Some(libc::EREMOTEIO) | Some(libc::EAGAIN)
                ) =>
            {
                trace!("Node not answering yet");
                Ok(None)
            }
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}
