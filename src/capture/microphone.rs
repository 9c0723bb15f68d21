//! Live microphone capture using cpal
//!
//! The cpal stream lives on its own thread for as long as the device is
//! started. It runs in whatever sample format the device offers at the
//! requested rate; the callback extracts the configured channel, converts
//! it to 16-bit little-endian PCM and forwards it over a channel. `read`
//! assembles whole blocks from that.

use super::traits::{
    AudioDeviceInfo, CaptureConfig, CaptureDevice, CaptureError, CaptureResult, ChannelMap,
};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};
use parking_lot::Mutex as ParkingMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Enumerate audio input devices
pub fn list_input_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    match host.input_devices() {
        Ok(devices) => devices
            .filter_map(|d| d.name().ok())
            .map(|name| AudioDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to enumerate input devices: {}", e);
            Vec::new()
        }
    }
}

fn find_device(name: Option<&str>) -> CaptureResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("no default input device".to_string())),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Device(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceNotFound(wanted.to_string())),
    }
}

/// Sample formats we can convert, in order of preference
const FORMAT_PREFERENCE: [SampleFormat; 4] = [
    SampleFormat::I16,
    SampleFormat::F32,
    SampleFormat::I32,
    SampleFormat::U16,
];

/// Pick a device configuration that runs at exactly `sample_rate_hz`
fn select_input_config(
    ranges: &[SupportedStreamConfigRange],
    sample_rate_hz: u32,
) -> CaptureResult<SupportedStreamConfig> {
    let rate = SampleRate(sample_rate_hz);
    ranges
        .iter()
        .filter(|r| r.min_sample_rate() <= rate && rate <= r.max_sample_rate())
        .filter_map(|r| {
            let rank = FORMAT_PREFERENCE.iter().position(|f| *f == r.sample_format())?;
            Some((rank, r.channels(), r))
        })
        .min_by_key(|(rank, channels, _)| (*rank, *channels))
        .map(|(_, _, r)| r.clone().with_sample_rate(rate))
        .ok_or_else(|| {
            CaptureError::Configuration(format!(
                "device does not support {} Hz in a usable sample format",
                sample_rate_hz
            ))
        })
}

/// One channel of interleaved frames as 16-bit little-endian bytes
fn extract_channel<T>(data: &[T], channel_index: usize, stride: usize) -> Vec<u8>
where
    T: Sample,
    i16: FromSample<T>,
{
    data.iter()
        .skip(channel_index)
        .step_by(stride)
        .flat_map(|&sample| i16::from_sample(sample).to_le_bytes())
        .collect()
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    channel_index: usize,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    is_recording: Arc<AtomicBool>,
) -> Result<cpal::Stream, String>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let stride = usize::from(config.channels.max(1));
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if is_recording.load(Ordering::Relaxed) {
                    let _ = tx.send(extract_channel(data, channel_index, stride));
                }
            },
            |err| tracing::error!("Microphone stream error: {}", err),
            None,
        )
        .map_err(|e| e.to_string())
}

/// Microphone capture device
pub struct MicrophoneCapture {
    name: String,
    device_name: Option<String>,
    config: Option<CaptureConfig>,
    selected: Option<SupportedStreamConfig>,
    is_recording: Arc<AtomicBool>,
    stream_handle: Arc<ParkingMutex<Option<std::thread::JoinHandle<()>>>>,
    samples_rx: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    pending: VecDeque<u8>,
}

impl MicrophoneCapture {
    /// Capture from the named input device, or the default one
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            name: device_name.clone().unwrap_or_else(|| "default-input".to_string()),
            device_name,
            config: None,
            selected: None,
            is_recording: Arc::new(AtomicBool::new(false)),
            stream_handle: Arc::new(ParkingMutex::new(None)),
            samples_rx: None,
            pending: VecDeque::new(),
        }
    }
}

#[async_trait]
impl CaptureDevice for MicrophoneCapture {
    fn name(&self) -> &str {
        &self.name
    }

    async fn configure(&mut self, config: &CaptureConfig) -> CaptureResult<()> {
        if self.is_recording.load(Ordering::SeqCst) {
            return Err(CaptureError::Configuration("device is running".to_string()));
        }
        if config.bit_width != 16 {
            return Err(CaptureError::Configuration(format!(
                "microphone capture supports 16-bit samples, not {}",
                config.bit_width
            )));
        }

        let device = find_device(self.device_name.as_deref())?;
        let ranges: Vec<SupportedStreamConfigRange> = device
            .supported_input_configs()
            .map_err(|e| CaptureError::Configuration(format!("Failed to get audio configs: {}", e)))?
            .collect();
        let selected = select_input_config(&ranges, config.sample_rate_hz)?;

        tracing::info!(
            "Microphone initialized: {} ({}Hz, {}ch, {:?})",
            device.name().unwrap_or_else(|_| "Unknown".to_string()),
            selected.sample_rate().0,
            selected.channels(),
            selected.sample_format()
        );

        self.config = Some(config.clone());
        self.selected = Some(selected);
        Ok(())
    }

    async fn start(&mut self) -> CaptureResult<()> {
        if self.is_recording.load(Ordering::SeqCst) {
            return Ok(());
        }
        let config = self
            .config
            .clone()
            .ok_or_else(|| CaptureError::Configuration("device not configured".to_string()))?;
        let selected = self
            .selected
            .clone()
            .ok_or_else(|| CaptureError::Configuration("device not configured".to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.samples_rx = Some(rx);
        self.pending.clear();
        self.is_recording.store(true, Ordering::SeqCst);

        let is_recording = self.is_recording.clone();
        let device_name = self.device_name.clone();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        // cpal streams are not Send on every platform; keep it on one thread.
        let handle = std::thread::spawn(move || {
            let device = match find_device(device_name.as_deref()) {
                Ok(d) => d,
                Err(e) => {
                    is_recording.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            let channels = selected.channels();
            let channel_index = match config.channel {
                ChannelMap::Right if channels > 1 => 1,
                _ => 0,
            };
            let stream_config: StreamConfig = selected.config();

            let is_rec = is_recording.clone();
            let stream = match selected.sample_format() {
                SampleFormat::I16 => {
                    build_stream::<i16>(&device, &stream_config, channel_index, tx, is_rec)
                }
                SampleFormat::F32 => {
                    build_stream::<f32>(&device, &stream_config, channel_index, tx, is_rec)
                }
                SampleFormat::I32 => {
                    build_stream::<i32>(&device, &stream_config, channel_index, tx, is_rec)
                }
                SampleFormat::U16 => {
                    build_stream::<u16>(&device, &stream_config, channel_index, tx, is_rec)
                }
                other => Err(format!("unsupported sample format {:?}", other)),
            };

            let stream = match stream.and_then(|s| {
                s.play().map_err(|e| e.to_string())?;
                Ok(s)
            }) {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    is_recording.store(false, Ordering::SeqCst);
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            while is_recording.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(20));
            }
            drop(stream);
            tracing::debug!("Microphone stream stopped");
        });
        *self.stream_handle.lock() = Some(handle);

        match ready_rx.await {
            Ok(Ok(())) => {
                tracing::info!("Microphone capture started");
                Ok(())
            }
            Ok(Err(e)) => Err(CaptureError::Device(format!("Failed to start stream: {}", e))),
            Err(_) => Err(CaptureError::Device("stream thread exited".to_string())),
        }
    }

    async fn read(&mut self, buf: &mut [u8], timeout: Duration) -> CaptureResult<()> {
        let rx = self.samples_rx.as_mut().ok_or(CaptureError::NotStarted)?;
        let deadline = tokio::time::Instant::now() + timeout;

        while self.pending.len() < buf.len() {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(bytes)) => self.pending.extend(bytes),
                Ok(None) => return Err(CaptureError::Read("stream closed".to_string())),
                Err(_) => return Err(CaptureError::Timeout(timeout.as_millis() as u64)),
            }
        }

        for (dst, src) in buf.iter_mut().zip(self.pending.drain(..buf.len())) {
            *dst = src;
        }
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        self.is_recording.store(false, Ordering::SeqCst);
        let handle = self.stream_handle.lock().take();
        if let Some(handle) = handle {
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }
        self.samples_rx = None;
        self.pending.clear();
        Ok(())
    }
}
