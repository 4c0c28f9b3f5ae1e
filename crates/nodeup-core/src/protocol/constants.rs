//! Protocol constants for the node bootloader.
//!
//! Wire values must match the resident bootloader exactly; they are part of
//! the bus contract, not host-side policy.

// ============================================================================
// Bus Addressing
// ============================================================================

/// General call (broadcast) address. All nodes listen; never a valid
/// per-line send target.
pub const GENERAL_CALL_ADDRESS: u8 = 0x00;

/// Highest address representable on the 7-bit bus.
pub const MAX_NODE_ADDRESS: u8 = 0x7F;

/// Check that an address can target a single node: inside the 7-bit range
/// and not the reserved general call address.
#[inline]
pub const fn is_valid_node_address(address: u8) -> bool {
    address > GENERAL_CALL_ADDRESS && address <= MAX_NODE_ADDRESS
}

// ============================================================================
// Commands (Host -> Nodes)
// ============================================================================

/// Broadcast command that switches all nodes into upgrade mode.
pub const ENTER_UPGRADE_COMMAND: u8 = 0xAA;

// ============================================================================
// Status Codes (Node -> Host)
// ============================================================================

/// Line accepted, send the next one.
pub const STATUS_ACCEPTED: u8 = 0;

/// Received data is not an Intel HEX record.
pub const STATUS_NOT_INTEL_HEX: u8 = 101;

/// Record parsed but structurally malformed.
pub const STATUS_MALFORMED: u8 = 102;

/// Record checksum mismatch; the line may be retransmitted.
pub const STATUS_CHECKSUM_FAILED: u8 = 103;

/// Node's current flash page is full.
pub const STATUS_PAGE_FULL: u8 = 201;

/// Record addressed a page out of write order.
pub const STATUS_WRONG_PAGE: u8 = 202;

/// Operation not permitted by the bootloader in its current state.
pub const STATUS_ILLEGAL_OPERATION: u8 = 203;

// ============================================================================
// Hex Lines
// ============================================================================

/// Lines at or below this length carry no record payload (a bare
/// terminator at most) and are never transmitted.
pub const BLANK_LINE_MAX_LEN: usize = 2;
