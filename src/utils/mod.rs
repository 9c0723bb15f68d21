//! Shared utilities

pub mod error;

pub use error::{ErrorResponse, StreamError, StreamResult};
