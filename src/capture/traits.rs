//! Capture trait definitions
//!
//! Device-agnostic interface for PCM capture sources.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Capture device errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Configuration rejected: {0}")]
    Configuration(String),

    #[error("Device not started")]
    NotStarted,

    #[error("Read timed out after {0}ms")]
    Timeout(u64),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Device error: {0}")]
    Device(String),
}

/// Result type alias for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Which PDM edge the single capture channel is latched on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMap {
    #[default]
    Left,
    Right,
}

/// PDM bus clocking limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdmIoConfig {
    pub min_clock_hz: u32,
    pub max_clock_hz: u32,
    pub min_duty_percent: u8,
    pub max_duty_percent: u8,
}

impl Default for PdmIoConfig {
    fn default() -> Self {
        Self {
            min_clock_hz: 1_000_000,
            max_clock_hz: 3_500_000,
            min_duty_percent: 40,
            max_duty_percent: 60,
        }
    }
}

/// Settings applied to a capture device before a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate_hz: u32,

    /// Bits per sample
    pub bit_width: u8,

    /// Bytes delivered by one read
    pub block_bytes: usize,

    /// Channel the mono stream is taken from
    pub channel: ChannelMap,

    /// PDM clocking
    pub pdm: PdmIoConfig,
}

impl CaptureConfig {
    /// Duration covered by one block
    pub fn block_duration(&self) -> Duration {
        let bytes_per_second =
            u64::from(self.bit_width / 8).max(1) * u64::from(self.sample_rate_hz).max(1);
        Duration::from_micros(self.block_bytes as u64 * 1_000_000 / bytes_per_second)
    }
}

/// PCM capture source
///
/// `read` fills exactly one block into the caller's buffer, blocking until
/// the data is there or the timeout passes.
#[async_trait]
pub trait CaptureDevice: Send {
    /// Human-readable device name
    fn name(&self) -> &str;

    /// Apply a configuration; only valid while stopped
    async fn configure(&mut self, config: &CaptureConfig) -> CaptureResult<()>;

    /// Start producing samples
    async fn start(&mut self) -> CaptureResult<()>;

    /// Fill `buf` with the next block
    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CaptureResult<()>;

    /// Stop producing samples
    async fn stop(&mut self) -> CaptureResult<()>;
}

/// Information about an audio input device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDeviceInfo {
    /// Device name, also used to select it
    pub name: String,

    /// Whether this is the default input device
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_duration() {
        let config = CaptureConfig {
            sample_rate_hz: 16_000,
            bit_width: 16,
            block_bytes: 3200,
            channel: ChannelMap::Left,
            pdm: PdmIoConfig::default(),
        };
        assert_eq!(config.block_duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_channel_map_serde() {
        assert_eq!(serde_json::to_string(&ChannelMap::Right).unwrap(), "\"right\"");
        let map: ChannelMap = serde_json::from_str("\"left\"").unwrap();
        assert_eq!(map, ChannelMap::Left);
    }
}
