//! Streaming configuration
//!
//! Loaded from a JSON file; every field is optional and falls back to the
//! values the reference board ships with.

use crate::capture::{CaptureConfig, ChannelMap, PdmIoConfig};
use crate::utils::{StreamError, StreamResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Largest chunk a pool buffer may hold
pub const MAX_CHUNK_BYTES: usize = 16 * 1024 * 1024;

/// Largest arena the buffer pool may reserve
pub const MAX_POOL_BYTES: usize = 256 * 1024 * 1024;

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate_hz: u32,

    /// Bits per sample
    pub bit_width: u8,

    /// Audio covered by one chunk
    pub chunk_duration_ms: u32,

    /// Audio covered by one session
    pub record_duration_ms: u32,

    /// Number of buffers in the pool (and queue depth)
    pub pool_capacity: usize,

    /// Buffer alignment in bytes
    pub alignment: usize,

    /// Capture read timeout
    pub read_timeout_ms: u64,

    /// How long the controller waits for room in the transport queue
    pub enqueue_timeout_ms: u64,

    /// Microphone channel to capture
    pub channel: ChannelMap,

    /// PDM clocking limits
    pub pdm: PdmIoConfig,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 16_000,
            bit_width: 16,
            chunk_duration_ms: 100,
            record_duration_ms: 10_000,
            pool_capacity: 8,
            alignment: 4,
            read_timeout_ms: 1000,
            enqueue_timeout_ms: 500,
            channel: ChannelMap::Left,
            pdm: PdmIoConfig::default(),
        }
    }
}

impl StreamConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> StreamResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: StreamConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded stream config from {:?}", path);
        Ok(config)
    }

    /// Check that the configuration describes a whole number of bytes per
    /// chunk and a whole number of chunks per session
    pub fn validate(&self) -> StreamResult<()> {
        let fail = |msg: String| Err(StreamError::Config(msg));

        if !matches!(self.bit_width, 8 | 16 | 24 | 32) {
            return fail(format!("bit width {} is not 8, 16, 24 or 32", self.bit_width));
        }
        if self.sample_rate_hz == 0 || self.chunk_duration_ms == 0 || self.record_duration_ms == 0 {
            return fail("sample rate and durations must be non-zero".to_string());
        }
        if self.pool_capacity == 0 {
            return fail("pool capacity must be non-zero".to_string());
        }
        if self.read_timeout_ms == 0 || self.enqueue_timeout_ms == 0 {
            return fail("timeouts must be non-zero".to_string());
        }

        let Some(numerator) = self.chunk_numerator() else {
            return fail(format!(
                "{} ms at {} Hz x {} bit overflows the chunk size",
                self.chunk_duration_ms, self.sample_rate_hz, self.bit_width
            ));
        };
        if numerator % 1000 != 0 {
            return fail(format!(
                "{} ms at {} Hz x {} bit is not a whole number of bytes",
                self.chunk_duration_ms, self.sample_rate_hz, self.bit_width
            ));
        }
        if self.record_duration_ms % self.chunk_duration_ms != 0 {
            return fail(format!(
                "record duration {} ms is not a multiple of chunk duration {} ms",
                self.record_duration_ms, self.chunk_duration_ms
            ));
        }

        let chunk_bytes = numerator / 1000;
        if chunk_bytes > MAX_CHUNK_BYTES as u64 {
            return fail(format!(
                "chunk size {} exceeds the {} byte limit",
                chunk_bytes, MAX_CHUNK_BYTES
            ));
        }

        if !self.alignment.is_power_of_two() {
            return fail(format!("alignment {} is not a power of two", self.alignment));
        }
        if self.chunk_bytes() % self.alignment != 0 {
            return fail(format!(
                "chunk size {} is not a multiple of alignment {}",
                self.chunk_bytes(),
                self.alignment
            ));
        }

        let pool_bytes = self
            .chunk_bytes()
            .checked_add(self.alignment)
            .and_then(|slot| slot.checked_mul(self.pool_capacity));
        match pool_bytes {
            Some(bytes) if bytes <= MAX_POOL_BYTES => {}
            _ => {
                return fail(format!(
                    "{} buffers of {} bytes exceed the {} byte pool limit",
                    self.pool_capacity,
                    self.chunk_bytes(),
                    MAX_POOL_BYTES
                ))
            }
        }

        let pdm = &self.pdm;
        if pdm.min_clock_hz > pdm.max_clock_hz || pdm.min_duty_percent > pdm.max_duty_percent {
            return fail("PDM limits are inverted".to_string());
        }
        if pdm.max_duty_percent > 100 {
            return fail("PDM duty cycle above 100%".to_string());
        }

        Ok(())
    }

    /// Bytes per second times chunk milliseconds, `None` on overflow
    fn chunk_numerator(&self) -> Option<u64> {
        u64::from(self.bit_width / 8)
            .checked_mul(u64::from(self.sample_rate_hz))?
            .checked_mul(u64::from(self.chunk_duration_ms))
    }

    /// Bytes in one chunk (saturates for configurations `validate` rejects)
    pub fn chunk_bytes(&self) -> usize {
        self.chunk_numerator()
            .map(|n| usize::try_from(n / 1000).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX)
    }

    /// Chunks in one full session
    pub fn total_chunks(&self) -> usize {
        (self.record_duration_ms / self.chunk_duration_ms.max(1)) as usize
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    /// Settings handed to the capture device
    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            sample_rate_hz: self.sample_rate_hz,
            bit_width: self.bit_width,
            block_bytes: self.chunk_bytes(),
            channel: self.channel,
            pdm: self.pdm,
        }
    }
}
