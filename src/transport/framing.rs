//! Session framing markers
//!
//! The wire carries raw PCM between two fixed markers:
//!
//! ```text
//! AA 55 'S' 'T' 'A' 'R' 'T' | chunk 0 | chunk 1 | ... | AA 55 'E' 'N' 'D'
//! ```
//!
//! There are no length prefixes, checksums or escaping. A chunk whose bytes
//! happen to contain a marker is indistinguishable from the marker itself.

use super::serial::{SerialTransport, TransportError};

/// Emitted before the first chunk of a session
pub const SESSION_START: [u8; 7] = [0xAA, 0x55, b'S', b'T', b'A', b'R', b'T'];

/// Emitted after the last chunk of a session
pub const SESSION_END: [u8; 5] = [0xAA, 0x55, b'E', b'N', b'D'];

/// Framing marker kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    SessionStart,
    SessionEnd,
}

impl Marker {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Marker::SessionStart => &SESSION_START,
            Marker::SessionEnd => &SESSION_END,
        }
    }
}

/// Send a marker one byte at a time over the synchronous path
pub fn send_marker(transport: &dyn SerialTransport, marker: Marker) -> Result<(), TransportError> {
    for &byte in marker.bytes() {
        transport.send_blocking_byte(byte)?;
    }
    transport.flush_blocking()?;
    tracing::trace!("Sent {:?} marker", marker);
    Ok(())
}
