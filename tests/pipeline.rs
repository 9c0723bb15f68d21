//! End-to-end tests for the capture-and-stream pipeline

use async_trait::async_trait;
use dmic_streamer::capture::{
    CaptureConfig, CaptureDevice, CaptureError, CaptureResult, Pattern, SyntheticCapture,
};
use dmic_streamer::receiver::{decode_stream, write_wav};
use dmic_streamer::recorder::{LogIndicator, SessionEvent, SessionOutcome, SessionReport, TriggerOutcome};
use dmic_streamer::transport::{MemoryTransport, SESSION_END, SESSION_START};
use dmic_streamer::{StreamConfig, Streamer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// 8 kHz x 16 bit x 100 ms = 1600 bytes per chunk, 5 chunks per session
fn test_config() -> StreamConfig {
    StreamConfig {
        sample_rate_hz: 8_000,
        record_duration_ms: 500,
        ..StreamConfig::default()
    }
}

fn start(
    config: StreamConfig,
    device: impl CaptureDevice + 'static,
    transport: &MemoryTransport,
) -> Streamer {
    Streamer::spawn(
        config,
        Box::new(device),
        Arc::new(transport.clone()),
        Arc::new(LogIndicator::new()),
    )
    .unwrap()
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_drained(rx: &mut broadcast::Receiver<SessionEvent>) -> usize {
    loop {
        if let SessionEvent::Drained { chunks_written, .. } = next_event(rx).await {
            return chunks_written;
        }
    }
}

/// Wait for both the controller report and the writer's drain; the two
/// tasks send them in either order.
async fn wait_session(rx: &mut broadcast::Receiver<SessionEvent>) -> (SessionReport, usize) {
    let mut report = None;
    let mut drained = None;
    while report.is_none() || drained.is_none() {
        match next_event(rx).await {
            SessionEvent::Finished(r) => report = Some(r),
            SessionEvent::Drained { chunks_written, .. } => drained = Some(chunks_written),
            _ => {}
        }
    }
    (report.unwrap(), drained.unwrap())
}

fn ramp(from: usize, len: usize) -> Vec<u8> {
    (from..from + len).map(|k| k as u8).collect()
}

/// Fills every block with its read number and fails the listed reads
struct ScriptedDevice {
    reads: usize,
    fail_on: Vec<usize>,
}

impl ScriptedDevice {
    fn failing_on(fail_on: &[usize]) -> Self {
        Self {
            reads: 0,
            fail_on: fail_on.to_vec(),
        }
    }
}

#[async_trait]
impl CaptureDevice for ScriptedDevice {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn configure(&mut self, _config: &CaptureConfig) -> CaptureResult<()> {
        Ok(())
    }

    async fn start(&mut self) -> CaptureResult<()> {
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> CaptureResult<()> {
        let read = self.reads;
        self.reads += 1;
        if self.fail_on.contains(&read) {
            return Err(CaptureError::Read(format!("scripted failure on read {}", read)));
        }
        buf.fill(read as u8);
        Ok(())
    }

    async fn stop(&mut self) -> CaptureResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn test_session_is_framed_on_the_wire() {
    let config = test_config();
    let chunk = config.chunk_bytes();
    assert_eq!(chunk, 1600);

    let transport = MemoryTransport::new();
    let streamer = start(config, SyntheticCapture::new(Pattern::Ramp), &transport);
    let mut events = streamer.subscribe();

    assert_eq!(streamer.fire(), TriggerOutcome::Accepted);

    let (report, chunks_written) = wait_session(&mut events).await;
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(report.chunks_queued, 5);
    assert_eq!(report.total_chunks, 5);
    assert_eq!(chunks_written, 5);

    // The warmup read consumed the first block of the ramp.
    let mut expected = SESSION_START.to_vec();
    expected.extend(ramp(chunk, 5 * chunk));
    expected.extend_from_slice(&SESSION_END);
    assert_eq!(transport.wire(), expected);

    assert_eq!(streamer.pool().free_count(), streamer.pool().capacity());
    assert!(!streamer.state().is_active());

    let stats = streamer.shutdown().await.unwrap();
    assert_eq!(stats.chunks_written, 5);
    assert_eq!(stats.sessions_closed, 1);
}

#[tokio::test]
async fn test_stalled_transport_truncates_session() {
    let config = StreamConfig {
        pool_capacity: 2,
        ..test_config()
    };
    let chunk = config.chunk_bytes();

    let transport = MemoryTransport::new();
    transport.stall();
    let streamer = start(config, SyntheticCapture::new(Pattern::Ramp), &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    // Draining waits on the stalled link, so the report comes first.
    let report = loop {
        if let SessionEvent::Finished(report) = next_event(&mut events).await {
            break report;
        }
    };
    assert_eq!(report.outcome, SessionOutcome::PoolExhausted);
    assert_eq!(report.chunks_queued, 2);

    // Only the start marker made it out while the link was stalled.
    assert_eq!(transport.wire(), SESSION_START.to_vec());
    assert_eq!(streamer.pool().outstanding(), 2);

    transport.resume();
    assert_eq!(wait_drained(&mut events).await, 2);

    let mut expected = SESSION_START.to_vec();
    expected.extend(ramp(chunk, 2 * chunk));
    expected.extend_from_slice(&SESSION_END);
    assert_eq!(transport.wire(), expected);
    assert_eq!(streamer.pool().free_count(), 2);

    // The recovered slots carry a full session once the link keeps up.
    while streamer.trigger().is_busy() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(streamer.fire(), TriggerOutcome::Accepted);
    let (report, chunks_written) = wait_session(&mut events).await;
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(chunks_written, 5);

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_repeated_sessions_do_not_leak_buffers() {
    let config = test_config();
    let chunk = config.chunk_bytes();
    let transport = MemoryTransport::new();
    let streamer = start(config, SyntheticCapture::new(Pattern::Ramp), &transport);
    let mut events = streamer.subscribe();

    for _ in 0..3 {
        assert_eq!(streamer.fire(), TriggerOutcome::Accepted);
        assert_eq!(wait_session(&mut events).await.1, 5);
        assert_eq!(streamer.pool().free_count(), streamer.pool().capacity());

        // The control loop resets the trigger right after the session.
        while streamer.trigger().is_busy() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    let sessions = decode_stream(transport.wire().as_slice(), chunk).unwrap();
    assert_eq!(sessions.len(), 3);
    for session in &sessions {
        assert!(session.terminated);
        assert_eq!(session.chunks, 5);
    }

    let stats = streamer.shutdown().await.unwrap();
    assert_eq!(stats.sessions_closed, 3);
    assert_eq!(stats.chunks_written, 15);
    assert_eq!(stats.send_failures, 0);
}

#[tokio::test]
async fn test_warmup_failure_is_not_fatal() {
    let transport = MemoryTransport::new();
    let streamer = start(test_config(), ScriptedDevice::failing_on(&[0]), &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    let (report, chunks_written) = wait_session(&mut events).await;
    assert_eq!(report.outcome, SessionOutcome::Completed);
    assert_eq!(chunks_written, 5);

    let sessions = decode_stream(transport.wire().as_slice(), 1600).unwrap();
    assert_eq!(sessions.len(), 1);
    // Reads 1..=5 carried the chunks.
    let firsts: Vec<u8> = sessions[0].pcm.chunks(1600).map(|c| c[0]).collect();
    assert_eq!(firsts, vec![1, 2, 3, 4, 5]);

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_failure_ends_session_early() {
    let transport = MemoryTransport::new();
    // Read 0 is the warmup, so read 3 is the third chunk.
    let streamer = start(test_config(), ScriptedDevice::failing_on(&[3]), &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    let (report, chunks_written) = wait_session(&mut events).await;
    assert!(matches!(report.outcome, SessionOutcome::CaptureFailed(_)));
    assert_eq!(report.chunks_queued, 2);
    assert_eq!(chunks_written, 2);

    let mut expected = SESSION_START.to_vec();
    expected.extend(vec![1u8; 1600]);
    expected.extend(vec![2u8; 1600]);
    expected.extend_from_slice(&SESSION_END);
    assert_eq!(transport.wire(), expected);
    assert_eq!(streamer.pool().free_count(), streamer.pool().capacity());

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_trigger_presses_collapse_into_one_session() {
    let transport = MemoryTransport::new();
    let streamer = start(test_config(), SyntheticCapture::new(Pattern::Ramp), &transport);
    let mut events = streamer.subscribe();

    assert_eq!(streamer.fire(), TriggerOutcome::Accepted);
    assert_ne!(streamer.fire(), TriggerOutcome::Accepted);
    assert_ne!(streamer.fire(), TriggerOutcome::Accepted);

    wait_session(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let sessions = decode_stream(transport.wire().as_slice(), 1600).unwrap();
    assert_eq!(sessions.len(), 1);
    assert!(matches!(
        events.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));

    streamer.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_trigger_during_session_is_rejected() {
    let transport = MemoryTransport::new();
    let device = SyntheticCapture::new(Pattern::Ramp).with_realtime(true);
    let streamer = start(test_config(), device, &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    match next_event(&mut events).await {
        SessionEvent::Started { .. } => {}
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(streamer.state().is_active());
    assert_eq!(streamer.fire(), TriggerOutcome::Rejected);

    assert_eq!(wait_session(&mut events).await.1, 5);
    let stats = streamer.shutdown().await.unwrap();
    assert_eq!(stats.sessions_closed, 1);
}

#[tokio::test]
async fn test_failed_sends_still_close_the_session() {
    let transport = MemoryTransport::new();
    transport.fail_sends(true);
    let streamer = start(test_config(), SyntheticCapture::new(Pattern::Ramp), &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    assert_eq!(wait_session(&mut events).await.1, 0);

    let mut expected = SESSION_START.to_vec();
    expected.extend_from_slice(&SESSION_END);
    assert_eq!(transport.wire(), expected);
    assert_eq!(streamer.pool().free_count(), streamer.pool().capacity());

    let stats = streamer.shutdown().await.unwrap();
    assert_eq!(stats.send_failures, 5);
}

#[tokio::test]
async fn test_receiver_recovers_tone_as_wav() {
    let config = test_config();
    let transport = MemoryTransport::new();
    let device = SyntheticCapture::new(Pattern::Tone { frequency_hz: 440.0 });
    let streamer = start(config.clone(), device, &transport);
    let mut events = streamer.subscribe();

    streamer.fire();
    wait_session(&mut events).await;
    streamer.shutdown().await.unwrap();

    // Noise on the line before the first session is skipped.
    let mut captured = b"\r\nboot\r\n".to_vec();
    captured.extend(transport.wire());

    let sessions = decode_stream(captured.as_slice(), config.chunk_bytes()).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].pcm.len(), 5 * config.chunk_bytes());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.wav");
    let samples = write_wav(&path, &sessions[0].pcm, config.sample_rate_hz, config.bit_width).unwrap();
    assert_eq!(samples, 4000);

    let mut reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.spec().sample_rate, 8_000);
    let peak = reader
        .samples::<i16>()
        .map(|s| s.unwrap().unsigned_abs())
        .max()
        .unwrap();
    assert!(peak > 10_000, "tone peak too low: {}", peak);
}
