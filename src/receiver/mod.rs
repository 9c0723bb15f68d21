//! Host-side receiver
//!
//! Recovers sessions from a captured wire stream and saves them as WAV.

pub mod decoder;
pub mod wav;

pub use decoder::{decode_stream, receive_sessions, DecodeError, DecodedSession, FrameDecoder, ReceiveOptions};
pub use wav::write_wav;
