//! PCM framing between float samples and the wire-level chunk format.
//!
//! Outbound audio is 16 kHz mono float samples encoded as base64 int16-LE.
//! Inbound audio is the same encoding at 24 kHz, decoded into an [`AudioBuffer`].

use base64::Engine;
use thiserror::Error;

/// Sample rate of microphone audio sent to the remote service.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of synthesized audio received from the remote service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// MIME tag attached to every outbound chunk.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),
    #[error("PCM16 payload has an odd byte count ({0})")]
    UnalignedSamples(usize),
    #[error("channel count must be at least 1")]
    NoChannels,
}

/// One unit of audio on the wire, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    pub mime_type: String,
    /// Base64 encoded int16 little-endian PCM.
    pub data: String,
}

/// Decoded, playable multi-channel audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    sample_rate: u32,
    channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    /// Builds a buffer from per-channel sample vectors. All channels are
    /// truncated to the shortest one.
    pub fn new(sample_rate: u32, mut channels: Vec<Vec<f32>>) -> Self {
        let frames = channels.iter().map(Vec::len).min().unwrap_or(0);
        for channel in &mut channels {
            channel.truncate(frames);
        }
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self::new(sample_rate, vec![samples])
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Number of sample frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Playback length in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Averages all channels into one.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.len())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Encodes float samples as a base64 PCM16 chunk tagged for 16 kHz input.
///
/// Samples outside [-1, 1] are clamped to the int16 range; NaN becomes silence.
pub fn encode(samples: &[f32]) -> WireChunk {
    let pcm16: Vec<u8> = samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect();
    WireChunk {
        mime_type: INPUT_MIME_TYPE.to_string(),
        data: base64::engine::general_purpose::STANDARD.encode(&pcm16),
    }
}

/// Decodes a base64 payload into raw bytes.
pub fn decode(data: &str) -> Result<Vec<u8>, DecodeError> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}

/// Interprets `bytes` as interleaved int16-LE PCM and builds an [`AudioBuffer`].
///
/// A trailing partial frame is dropped. An odd byte count cannot be split into
/// samples and is rejected.
pub fn decode_audio_data(
    bytes: &[u8],
    sample_rate: u32,
    channel_count: usize,
) -> Result<AudioBuffer, DecodeError> {
    if channel_count == 0 {
        return Err(DecodeError::NoChannels);
    }
    if bytes.len() % BYTES_PER_SAMPLE != 0 {
        return Err(DecodeError::UnalignedSamples(bytes.len()));
    }

    let frame_bytes = BYTES_PER_SAMPLE * channel_count;
    let frames = bytes.len() / frame_bytes;
    let mut channels = vec![Vec::with_capacity(frames); channel_count];
    for frame in bytes.chunks_exact(frame_bytes) {
        for (channel, sample) in channels.iter_mut().zip(frame.chunks_exact(BYTES_PER_SAMPLE)) {
            let v = i16::from_le_bytes([sample[0], sample[1]]);
            channel.push(v as f32 / 32768.0);
        }
    }
    Ok(AudioBuffer::new(sample_rate, channels))
}

/// Decodes an inbound chunk straight into a mono buffer at the service's output rate.
pub fn decode_chunk(chunk: &WireChunk) -> Result<AudioBuffer, DecodeError> {
    let bytes = decode(&chunk.data)?;
    decode_audio_data(&bytes, OUTPUT_SAMPLE_RATE, 1)
}
