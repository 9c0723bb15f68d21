//! Framed stream decoder
//!
//! Splits a captured byte stream back into sessions. The decoder must be
//! told the chunk size; inside a session it consumes whole chunks and only
//! looks for markers at chunk boundaries, which keeps PCM that happens to
//! contain marker bytes mid-chunk from ending a session early.

use crate::transport::{SESSION_END, SESSION_START};
use crate::utils::StreamResult;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Receiver-side errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("chunk size must be non-zero")]
    InvalidChunkSize,

    #[error("unsupported bit width {0}")]
    UnsupportedBitWidth(u8),

    #[error("{0} trailing bytes do not form a whole sample")]
    PartialSample(usize),

    #[error("no session start within {0} ms")]
    SyncTimeout(u64),
}

/// One session recovered from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSession {
    /// Concatenated chunk payloads
    pub pcm: Vec<u8>,
    /// Number of chunks
    pub chunks: usize,
    /// Whether the session ended with an end marker
    pub terminated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Hunting,
    InSession,
}

/// Incremental decoder for the framed stream
#[derive(Debug)]
pub struct FrameDecoder {
    chunk_bytes: usize,
    pending: Vec<u8>,
    state: DecodeState,
    current: Vec<u8>,
    chunks: usize,
    skipped: u64,
}

impl FrameDecoder {
    pub fn new(chunk_bytes: usize) -> Result<Self, DecodeError> {
        if chunk_bytes == 0 {
            return Err(DecodeError::InvalidChunkSize);
        }
        Ok(Self {
            chunk_bytes,
            pending: Vec::new(),
            state: DecodeState::Hunting,
            current: Vec::new(),
            chunks: 0,
            skipped: 0,
        })
    }

    /// Bytes discarded outside any session
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped
    }

    /// Whether a session is open
    pub fn in_session(&self) -> bool {
        self.state == DecodeState::InSession
    }

    /// Feed bytes, returning every session completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<DecodedSession> {
        self.pending.extend_from_slice(bytes);
        let mut sessions = Vec::new();

        loop {
            let progressed = match self.state {
                DecodeState::Hunting => self.hunt(),
                DecodeState::InSession => self.consume(&mut sessions),
            };
            if !progressed {
                break;
            }
        }

        sessions
    }

    /// Flush a session cut off by the end of input
    pub fn finish(mut self) -> Option<DecodedSession> {
        if self.state != DecodeState::InSession {
            return None;
        }
        if !self.pending.is_empty() {
            tracing::warn!("Dropping {} bytes of partial chunk", self.pending.len());
        }
        Some(self.take_session(false))
    }

    fn hunt(&mut self) -> bool {
        if let Some(pos) = find(&self.pending, &SESSION_START) {
            self.skipped += pos as u64;
            self.pending.drain(..pos + SESSION_START.len());
            self.state = DecodeState::InSession;
            self.current.clear();
            self.chunks = 0;
            return true;
        }

        // Keep a tail that could be the beginning of a split start marker.
        let keep = (SESSION_START.len() - 1).min(self.pending.len());
        let discard = self.pending.len() - keep;
        self.skipped += discard as u64;
        self.pending.drain(..discard);
        false
    }

    fn consume(&mut self, sessions: &mut Vec<DecodedSession>) -> bool {
        if self.pending.starts_with(&SESSION_END) {
            self.pending.drain(..SESSION_END.len());
            sessions.push(self.take_session(true));
            self.state = DecodeState::Hunting;
            return true;
        }

        if self.pending.starts_with(&SESSION_START) {
            tracing::warn!("Session restarted without an end marker");
            self.pending.drain(..SESSION_START.len());
            sessions.push(self.take_session(false));
            return true;
        }

        let pending = self.pending.as_slice();
        let could_be_marker = pending.len() < SESSION_START.len()
            && (SESSION_START.starts_with(pending) || SESSION_END.starts_with(pending));
        if could_be_marker || pending.len() < self.chunk_bytes {
            return false;
        }

        self.current.extend(self.pending.drain(..self.chunk_bytes));
        self.chunks += 1;
        true
    }

    fn take_session(&mut self, terminated: bool) -> DecodedSession {
        DecodedSession {
            pcm: std::mem::take(&mut self.current),
            chunks: std::mem::take(&mut self.chunks),
            terminated,
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// How to read sessions off a link that may never reach end of input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub chunk_bytes: usize,
    /// Give up if no session has started this long after the first read
    pub sync_timeout: Option<Duration>,
    /// Return after this many sessions
    pub max_sessions: Option<usize>,
}

impl ReceiveOptions {
    /// Read until end of input with no sync deadline
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            sync_timeout: None,
            max_sessions: None,
        }
    }
}

/// Decode sessions as bytes arrive, handing each to `on_session` as soon
/// as it completes
///
/// Read timeouts (`TimedOut`, `WouldBlock`) count as silence rather than
/// errors, so a serial port opened with a read timeout can be passed
/// directly. A session still open at end of input is delivered truncated.
/// Returns the number of sessions delivered.
pub fn receive_sessions<R, F>(
    mut reader: R,
    options: ReceiveOptions,
    mut on_session: F,
) -> StreamResult<usize>
where
    R: Read,
    F: FnMut(usize, DecodedSession) -> StreamResult<()>,
{
    let mut decoder = FrameDecoder::new(options.chunk_bytes)?;
    let mut buf = vec![0u8; 8192];
    let mut delivered = 0;
    let limit_reached = |count: usize| options.max_sessions.is_some_and(|max| count >= max);
    let started = Instant::now();

    while !limit_reached(delivered) {
        let n = match reader.read(&mut buf) {
            Ok(0) => {
                if decoder.skipped_bytes() > 0 {
                    tracing::debug!("Skipped {} bytes outside sessions", decoder.skipped_bytes());
                }
                if let Some(session) = decoder.finish() {
                    on_session(delivered, session)?;
                    delivered += 1;
                }
                return Ok(delivered);
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                0
            }
            Err(e) => return Err(e.into()),
        };

        for session in decoder.push(&buf[..n]) {
            on_session(delivered, session)?;
            delivered += 1;
            if limit_reached(delivered) {
                break;
            }
        }

        if delivered == 0 && !decoder.in_session() {
            if let Some(timeout) = options.sync_timeout {
                if started.elapsed() >= timeout {
                    tracing::debug!(
                        "Skipped {} bytes while waiting for a session",
                        decoder.skipped_bytes()
                    );
                    return Err(DecodeError::SyncTimeout(timeout.as_millis() as u64).into());
                }
            }
        }
    }

    Ok(delivered)
}

/// Decode every session in a reader, including one left open at the end
pub fn decode_stream<R: Read>(reader: R, chunk_bytes: usize) -> StreamResult<Vec<DecodedSession>> {
    let mut sessions = Vec::new();
    receive_sessions(reader, ReceiveOptions::new(chunk_bytes), |_, session| {
        sessions.push(session);
        Ok(())
    })?;
    Ok(sessions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::write_wav;
    use crate::utils::StreamError;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    /// A link that never reaches end of input: `None` entries and an
    /// exhausted script both read as a timeout
    struct LiveLink {
        script: VecDeque<Option<Vec<u8>>>,
        idle_reads: usize,
    }

    impl LiveLink {
        fn new(script: impl IntoIterator<Item = Option<Vec<u8>>>) -> Self {
            Self {
                script: script.into_iter().collect(),
                idle_reads: 0,
            }
        }
    }

    impl Read for LiveLink {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.script.pop_front() {
                Some(Some(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                _ => {
                    self.idle_reads += 1;
                    assert!(self.idle_reads < 10_000, "receiver kept waiting on a quiet link");
                    std::thread::sleep(Duration::from_millis(1));
                    Err(ErrorKind::TimedOut.into())
                }
            }
        }
    }

    fn framed(chunks: &[&[u8]], terminated: bool) -> Vec<u8> {
        let mut wire = SESSION_START.to_vec();
        for chunk in chunks {
            wire.extend_from_slice(chunk);
        }
        if terminated {
            wire.extend_from_slice(&SESSION_END);
        }
        wire
    }

    #[test]
    fn test_decodes_session_surrounded_by_noise() {
        let mut wire = b"boot log line\n".to_vec();
        wire.extend(framed(&[&[1, 2, 3, 4], &[5, 6, 7, 8]], true));
        wire.extend_from_slice(b"trailing");

        let mut decoder = FrameDecoder::new(4).unwrap();
        let sessions = decoder.push(&wire);

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].pcm, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(sessions[0].chunks, 2);
        assert!(sessions[0].terminated);
        assert!(decoder.skipped_bytes() >= 14);
    }

    #[test]
    fn test_byte_at_a_time_feed() {
        let wire = framed(&[&[9; 6], &[8; 6], &[7; 6]], true);
        let mut decoder = FrameDecoder::new(6).unwrap();

        let sessions: Vec<_> = wire.iter().flat_map(|b| decoder.push(&[*b])).collect();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].chunks, 3);
        assert_eq!(sessions[0].pcm.len(), 18);
    }

    #[test]
    fn test_end_marker_inside_chunk_is_payload() {
        let mut chunk = [0u8; 8];
        chunk[2..7].copy_from_slice(&SESSION_END);
        let wire = framed(&[&chunk, &[1; 8]], true);

        let mut decoder = FrameDecoder::new(8).unwrap();
        let sessions = decoder.push(&wire);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].chunks, 2);
        assert_eq!(&sessions[0].pcm[2..7], &SESSION_END);
    }

    #[test]
    fn test_truncated_session_and_back_to_back_sessions() {
        let mut wire = framed(&[&[1; 4]], true);
        wire.extend(framed(&[&[2; 4], &[3; 4]], true));
        wire.extend(framed(&[&[4; 4]], false));

        let sessions = decode_stream(wire.as_slice(), 4).unwrap();
        assert_eq!(sessions.len(), 3);
        assert_eq!(sessions[0].chunks, 1);
        assert_eq!(sessions[1].chunks, 2);
        assert_eq!(sessions[2].pcm, vec![4; 4]);
        assert!(!sessions[2].terminated);
    }

    #[test]
    fn test_restart_without_end_marker() {
        let mut wire = framed(&[&[1; 4]], false);
        wire.extend(framed(&[&[2; 4]], true));

        let sessions = FrameDecoder::new(4).unwrap().push(&wire);
        assert_eq!(sessions.len(), 2);
        assert!(!sessions[0].terminated);
        assert!(sessions[1].terminated);
    }

    #[test]
    fn test_live_link_session_written_before_end_of_input() {
        let samples: Vec<i16> = (0..8).map(|i| i * 100 - 400).collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut wire = b"noise".to_vec();
        wire.extend(framed(&[&pcm[..8], &pcm[8..]], true));

        let mut script: Vec<Option<Vec<u8>>> = wire.chunks(5).map(|c| Some(c.to_vec())).collect();
        script.insert(3, None);
        let link = LiveLink::new(script);

        let dir = tempdir().unwrap();
        let path = dir.path().join("live.wav");
        let options = ReceiveOptions {
            sync_timeout: Some(Duration::from_secs(5)),
            max_sessions: Some(1),
            ..ReceiveOptions::new(8)
        };
        let count = receive_sessions(link, options, |index, session| {
            assert_eq!(index, 0);
            assert!(session.terminated);
            write_wav(&path, &session.pcm, 8_000, 16)?;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);

        let mut reader = hound::WavReader::open(&path).unwrap();
        let read: Vec<i16> = reader.samples::<i16>().map(Result::unwrap).collect();
        assert_eq!(read, samples);
    }

    #[test]
    fn test_sync_timeout_on_silent_link() {
        let link = LiveLink::new([Some(b"garbage without a marker".to_vec())]);
        let options = ReceiveOptions {
            sync_timeout: Some(Duration::from_millis(30)),
            ..ReceiveOptions::new(4)
        };

        let err = receive_sessions(link, options, |_, _| Ok(())).unwrap_err();
        assert!(matches!(err, StreamError::Decode(DecodeError::SyncTimeout(30))));
    }

    #[test]
    fn test_quiet_gap_inside_session_is_not_a_sync_timeout() {
        let mut script = vec![Some(SESSION_START.to_vec()), Some(vec![1; 4])];
        script.extend((0..40).map(|_| None));
        script.push(Some(vec![2; 4]));
        script.push(Some(SESSION_END.to_vec()));

        let options = ReceiveOptions {
            sync_timeout: Some(Duration::from_millis(10)),
            max_sessions: Some(1),
            ..ReceiveOptions::new(4)
        };
        let mut received = Vec::new();
        receive_sessions(LiveLink::new(script), options, |_, session| {
            received.push(session);
            Ok(())
        })
        .unwrap();

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].pcm, vec![1, 1, 1, 1, 2, 2, 2, 2]);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        assert_eq!(FrameDecoder::new(0).unwrap_err(), DecodeError::InvalidChunkSize);
    }
}
