//! WAV output for received sessions

use super::decoder::DecodeError;
use crate::utils::StreamResult;
use std::path::Path;

/// Write little-endian mono PCM to a WAV file, returning the sample count
pub fn write_wav(path: &Path, pcm: &[u8], sample_rate: u32, bit_width: u8) -> StreamResult<usize> {
    if !matches!(bit_width, 8 | 16 | 24 | 32) {
        return Err(DecodeError::UnsupportedBitWidth(bit_width).into());
    }
    let width = usize::from(bit_width / 8);
    if pcm.len() % width != 0 {
        return Err(DecodeError::PartialSample(pcm.len() % width).into());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: u16::from(bit_width),
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;

    for frame in pcm.chunks_exact(width) {
        match width {
            1 => writer.write_sample(frame[0] as i8)?,
            2 => writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?,
            3 => {
                // Sign-extend the 24-bit sample.
                let value = i32::from_le_bytes([0, frame[0], frame[1], frame[2]]) >> 8;
                writer.write_sample(value)?
            }
            _ => writer.write_sample(i32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]))?,
        }
    }
    writer.finalize()?;

    let samples = pcm.len() / width;
    tracing::debug!("Wrote {} samples to {:?}", samples, path);
    Ok(samples)
}
