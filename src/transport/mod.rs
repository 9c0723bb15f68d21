//! Transport side of the pipeline
//!
//! - Bounded handoff queue from the session controller
//! - Framing markers
//! - Serial transport interface and implementations
//! - Writer task draining the queue onto the wire

pub mod framing;
pub mod memory;
pub mod queue;
pub mod serial;
pub mod writer;

pub use framing::{Marker, SESSION_END, SESSION_START};
pub use memory::MemoryTransport;
pub use queue::{
    transport_queue, PopError, PushError, QueueConsumer, QueueProducer, SessionTicket, TransportItem,
};
pub use serial::{IoTransport, SerialTransport, TransportError, TxCompletion, TxPending};
pub use writer::{TransportWriter, WriterStats};
