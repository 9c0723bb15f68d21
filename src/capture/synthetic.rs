//! Synthetic capture source
//!
//! Generates deterministic PCM so the pipeline can run without a
//! microphone. Configuration is checked the way a PDM microphone driver
//! would check it: the sample rate must map to a bus clock inside the
//! configured PDM limits for one of the supported decimation ratios.

use super::traits::{CaptureConfig, CaptureDevice, CaptureError, CaptureResult};
use async_trait::async_trait;
use std::time::Duration;

/// Decimation ratios a PDM front end can typically run at
const DECIMATION_RATIOS: [u32; 5] = [32, 48, 64, 96, 128];

/// Waveform produced by [`SyntheticCapture`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pattern {
    /// Byte `k` of the read stream is `k mod 256`
    Ramp,
    /// Sine tone at half scale
    Tone { frequency_hz: f32 },
}

/// Deterministic capture device
pub struct SyntheticCapture {
    name: String,
    pattern: Pattern,
    realtime: bool,
    config: Option<CaptureConfig>,
    running: bool,
    position: u64,
}

impl SyntheticCapture {
    pub fn new(pattern: Pattern) -> Self {
        Self {
            name: format!("synthetic-{}", pattern.label()),
            pattern,
            realtime: false,
            config: None,
            running: false,
            position: 0,
        }
    }

    /// Pace reads at the real block cadence instead of returning at once
    pub fn with_realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Bytes produced so far, warmup reads included
    pub fn position(&self) -> u64 {
        self.position
    }

    fn fill(&mut self, config: &CaptureConfig, buf: &mut [u8]) {
        match self.pattern {
            Pattern::Ramp => {
                for (i, byte) in buf.iter_mut().enumerate() {
                    *byte = (self.position + i as u64) as u8;
                }
            }
            Pattern::Tone { frequency_hz } => {
                let width = usize::from(config.bit_width / 8);
                let amplitude = ((1i64 << (config.bit_width - 1)) - 1) as f64 * 0.5;
                let first_sample = self.position / width as u64;
                let rate = f64::from(config.sample_rate_hz);

                for (n, frame) in buf.chunks_exact_mut(width).enumerate() {
                    let t = (first_sample + n as u64) as f64 / rate;
                    let value = (amplitude
                        * (2.0 * std::f64::consts::PI * f64::from(frequency_hz) * t).sin())
                        as i32;
                    frame.copy_from_slice(&value.to_le_bytes()[..width]);
                }
            }
        }
        self.position += buf.len() as u64;
    }
}

impl Pattern {
    fn label(&self) -> &'static str {
        match self {
            Pattern::Ramp => "ramp",
            Pattern::Tone { .. } => "tone",
        }
    }
}

#[async_trait]
impl CaptureDevice for SyntheticCapture {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
        if self.running {
            return Err(CaptureError::Configuration("device is running".to_string()));
        }
        if config.sample_rate_hz == 0 || config.block_bytes == 0 {
            return Err(CaptureError::Configuration(
                "sample rate and block size must be non-zero".to_string(),
            ));
        }
        if !matches!(config.bit_width, 8 | 16 | 24 | 32) {
            return Err(CaptureError::Configuration(format!(
                "unsupported bit width {}",
                config.bit_width
            )));
        }
        if config.block_bytes % usize::from(config.bit_width / 8) != 0 {
            return Err(CaptureError::Configuration(
                "block size is not a whole number of samples".to_string(),
            ));
        }

        let pdm = &config.pdm;
        let clock = DECIMATION_RATIOS
            .iter()
            .map(|ratio| config.sample_rate_hz.saturating_mul(*ratio))
            .find(|clock| (pdm.min_clock_hz..=pdm.max_clock_hz).contains(clock))
            .ok_or_else(|| {
                CaptureError::Configuration(format!(
                    "no PDM clock in {}..={} Hz for {} Hz",
                    pdm.min_clock_hz, pdm.max_clock_hz, config.sample_rate_hz
                ))
            })?;

        tracing::debug!(
            "{} configured: {} Hz, {} bit, PDM clock {} Hz",
            self.name,
            config.sample_rate_hz,
            config.bit_width,
            clock
        );
        self.config = Some(config.clone());
        Ok(())
    }

    async fn start(&mut self) -> CaptureResult<()> {
        if self.config.is_none() {
            return Err(CaptureError::Configuration("device not configured".to_string()));
        }
        self.running = true;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CaptureResult<()> {
        if !self.running {
            return Err(CaptureError::NotStarted);
        }
        let config = self.config.clone().ok_or(CaptureError::NotStarted)?;
        if buf.len() != config.block_bytes {
            return Err(CaptureError::Read(format!(
                "buffer is {} bytes, block is {}",
                buf.len(),
                config.block_bytes
            )));
        }

        if self.realtime {
            let cadence = config.block_duration();
            if cadence > timeout {
                tokio::time::sleep(timeout).await;
                return Err(CaptureError::Timeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(cadence).await;
        }

        self.fill(&config, buf);
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        self.running = false;
        Ok(())
    }
}
