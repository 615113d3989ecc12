//! PCM16 audio frames exchanged with a realtime backend.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, Result};

/// Upper bound for a single frame pushed to a backend.
pub const MAX_FRAME_BYTES: usize = 15 * 1024 * 1024;

/// A chunk of interleaved PCM16 samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<i16>,
    sample_rate: u32,
    num_channels: u16,
    samples_per_channel: u32,
}

impl AudioFrame {
    /// # Errors
    /// Returns `Error::InvalidAudioFrame` if the rate or channel count is zero, if
    /// `data` does not hold `samples_per_channel * num_channels` samples, or if the
    /// frame exceeds [`MAX_FRAME_BYTES`].
    pub fn new(
        data: Vec<i16>,
        sample_rate: u32,
        num_channels: u16,
        samples_per_channel: u32,
    ) -> Result<Self> {
        if sample_rate == 0 {
            return Err(Error::InvalidAudioFrame("sample_rate must be positive".to_string()));
        }
        if num_channels == 0 {
            return Err(Error::InvalidAudioFrame("num_channels must be positive".to_string()));
        }
        let expected = samples_per_channel as usize * usize::from(num_channels);
        if data.len() != expected {
            return Err(Error::InvalidAudioFrame(format!(
                "expected {expected} samples, got {}",
                data.len()
            )));
        }
        if data.len() * 2 > MAX_FRAME_BYTES {
            return Err(Error::InvalidAudioFrame(format!(
                "frame exceeds 15MB ({} bytes)",
                data.len() * 2
            )));
        }
        Ok(Self {
            data,
            sample_rate,
            num_channels,
            samples_per_channel,
        })
    }

    /// Build a frame from little-endian PCM16 bytes.
    ///
    /// # Errors
    /// Returns `Error::InvalidAudioFrame` if the byte count does not divide into
    /// whole samples for every channel.
    pub fn from_pcm16_bytes(bytes: &[u8], sample_rate: u32, num_channels: u16) -> Result<Self> {
        let frame_bytes = 2 * usize::from(num_channels.max(1));
        if bytes.len() % frame_bytes != 0 {
            return Err(Error::InvalidAudioFrame(format!(
                "{} bytes is not a whole number of {num_channels}-channel PCM16 samples",
                bytes.len()
            )));
        }
        let data: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let samples_per_channel = u32::try_from(data.len() / usize::from(num_channels.max(1)))
            .map_err(|_| Error::InvalidAudioFrame("frame too long".to_string()))?;
        Self::new(data, sample_rate, num_channels, samples_per_channel)
    }

    #[must_use]
    pub fn data(&self) -> &[i16] {
        &self.data
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn num_channels(&self) -> u16 {
        self.num_channels
    }

    #[must_use]
    pub const fn samples_per_channel(&self) -> u32 {
        self.samples_per_channel
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::from_nanos(
            u64::from(self.samples_per_channel) * 1_000_000_000 / u64::from(self.sample_rate),
        )
    }

    #[must_use]
    pub fn to_pcm16_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data.len() * 2);
        for sample in &self.data {
            buf.extend_from_slice(&sample.to_le_bytes());
        }
        buf
    }
}

#[derive(Serialize, Deserialize)]
struct AudioFrameRepr {
    /// Base64 encoded little-endian PCM16.
    data: String,
    sample_rate: u32,
    num_channels: u16,
    samples_per_channel: u32,
}

impl Serialize for AudioFrame {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        AudioFrameRepr {
            data: general_purpose::STANDARD.encode(self.to_pcm16_bytes()),
            sample_rate: self.sample_rate,
            num_channels: self.num_channels,
            samples_per_channel: self.samples_per_channel,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AudioFrame {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = AudioFrameRepr::deserialize(deserializer)?;
        let bytes = general_purpose::STANDARD
            .decode(repr.data.as_bytes())
            .map_err(serde::de::Error::custom)?;
        let frame = Self::from_pcm16_bytes(&bytes, repr.sample_rate, repr.num_channels)
            .map_err(serde::de::Error::custom)?;
        if frame.samples_per_channel != repr.samples_per_channel {
            return Err(serde::de::Error::custom(format!(
                "samples_per_channel mismatch: header says {}, payload holds {}",
                repr.samples_per_channel, frame.samples_per_channel
            )));
        }
        Ok(frame)
    }
}
