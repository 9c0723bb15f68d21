//! Buffer memory shared between capture and transport

pub mod pool;

pub use pool::{BufferPool, PoolError, ReleaseError, Slot};
