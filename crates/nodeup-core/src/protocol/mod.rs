//! Protocol module - bootloader wire contract.

pub mod constants;
pub mod status;

pub use constants::*;
pub use status::Status;
