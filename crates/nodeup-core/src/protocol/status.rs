//! Status byte parsing and classification.
//!
//! The bootloader answers every transmitted line with a single status byte.
//! This module gives those bytes a type-safe representation and the
//! classification the upload loop decides on.

use std::fmt;

use super::constants::*;

/// Parsed status byte from a node.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Line accepted, continue with the next one.
    Accepted,
    /// Data was not recognized as an Intel HEX record.
    NotIntelHex,
    /// Record structure was malformed.
    Malformed,
    /// Record checksum did not match; retransmission is expected.
    ChecksumFailed,
    /// The node's current flash page is full.
    PageFull,
    /// Record addressed a page out of write order.
    WrongPage,
    /// Operation not permitted in the bootloader's current state.
    IllegalOperation,
    /// Status byte outside the known taxonomy.
    Unknown(u8),
}

impl Status {
    /// Parse a raw status byte.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            STATUS_ACCEPTED => Status::Accepted,
            STATUS_NOT_INTEL_HEX => Status::NotIntelHex,
            STATUS_MALFORMED => Status::Malformed,
            STATUS_CHECKSUM_FAILED => Status::ChecksumFailed,
            STATUS_PAGE_FULL => Status::PageFull,
            STATUS_WRONG_PAGE => Status::WrongPage,
            STATUS_ILLEGAL_OPERATION => Status::IllegalOperation,
            other => Status::Unknown(other),
        }
    }

    /// The wire value of this status.
    pub fn byte(&self) -> u8 {
        match self {
            Status::Accepted => STATUS_ACCEPTED,
            Status::NotIntelHex => STATUS_NOT_INTEL_HEX,
            Status::Malformed => STATUS_MALFORMED,
            Status::ChecksumFailed => STATUS_CHECKSUM_FAILED,
            Status::PageFull => STATUS_PAGE_FULL,
            Status::WrongPage => STATUS_WRONG_PAGE,
            Status::IllegalOperation => STATUS_ILLEGAL_OPERATION,
            Status::Unknown(value) => *value,
        }
    }

    /// Protocol violation reported by the remote bootloader. Terminal for
    /// the session: its page/ordering state cannot be resumed mid-stream.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Status::NotIntelHex
                | Status::Malformed
                | Status::PageFull
                | Status::WrongPage
                | Status::IllegalOperation
        )
    }

    /// The only self-healing status: retransmit the same line.
    pub fn is_retry(&self) -> bool {
        matches!(self, Status::ChecksumFailed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Accepted => write!(f, "accepted"),
            Status::NotIntelHex => write!(f, "not an Intel HEX record"),
            Status::Malformed => write!(f, "malformed record"),
            Status::ChecksumFailed => write!(f, "checksum failed"),
            Status::PageFull => write!(f, "page full"),
            Status::WrongPage => write!(f, "wrong page order"),
            Status::IllegalOperation => write!(f, "illegal operation"),
            Status::Unknown(value) => write!(f, "unknown status {value:#04X}"),
        }
    }
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Status({} '{}')", self.byte(), self)
    }
}
