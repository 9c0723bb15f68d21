//! Capture devices
//!
//! The capture trait plus the built-in sources: a synthetic generator and,
//! with the `microphone` feature, a live input device.

pub mod synthetic;
pub mod traits;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use synthetic::{Pattern, SyntheticCapture};
pub use traits::{
    AudioDeviceInfo, CaptureConfig, CaptureDevice, CaptureError, CaptureResult, ChannelMap,
    PdmIoConfig,
};

#[cfg(feature = "microphone")]
pub use microphone::{list_input_devices, MicrophoneCapture};
