//! PCM WAV encoding
//!
//! Output layout (little-endian):
//!
//! ```text
//! 0  "RIFF"   4  36 + data_len   8  "WAVE"
//! 12 "fmt "   16 16              20 1 (PCM)      22 channels
//! 24 rate     28 rate * align    32 align        34 bits per sample
//! 36 "data"   40 data_len        44 samples...
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::error::{AppError, Result};

pub const WAV_HEADER_LEN: usize = 44;
pub const WAV_MIME_TYPE: &str = "audio/wav";

const PCM_FORMAT: u16 = 1;

/// Largest data chunk whose RIFF size still fits the 32-bit length field
pub const MAX_DATA_LEN: u32 = u32::MAX - 36;

/// Header fields of a PCM WAV file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavHeader {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    /// Length of the sample data in bytes
    pub data_len: u32,
}

impl WavHeader {
    /// 16-bit mono header for `sample_count` samples
    ///
    /// Fails when the data or the byte rate would not fit a 32-bit field
    /// (about 2^31 samples, a little over 37 hours at 16 kHz).
    pub fn pcm16_mono(sample_rate: u32, sample_count: usize) -> Result<Self> {
        let data_len = sample_count
            .checked_mul(2)
            .and_then(|len| u32::try_from(len).ok())
            .filter(|len| *len <= MAX_DATA_LEN)
            .ok_or_else(|| {
                AppError::AudioError(format!(
                    "{} samples exceed the WAV size limit of {} bytes",
                    sample_count, MAX_DATA_LEN
                ))
            })?;
        if sample_rate.checked_mul(2).is_none() {
            return Err(AppError::AudioError(format!(
                "sample rate {}Hz too high for a WAV header",
                sample_rate
            )));
        }
        Ok(Self {
            sample_rate,
            channels: 1,
            bits_per_sample: 16,
            data_len,
        })
    }

    pub fn block_align(&self) -> u16 {
        self.channels.saturating_mul(self.bits_per_sample / 8)
    }

    /// Saturates for headers not built by `pcm16_mono`
    pub fn byte_rate(&self) -> u32 {
        self.sample_rate.saturating_mul(u32::from(self.block_align()))
    }

    pub fn write<B: BufMut>(&self, buf: &mut B) {
        buf.put_slice(b"RIFF");
        buf.put_u32_le(self.data_len.saturating_add(36));
        buf.put_slice(b"WAVE");
        buf.put_slice(b"fmt ");
        buf.put_u32_le(16);
        buf.put_u16_le(PCM_FORMAT);
        buf.put_u16_le(self.channels);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.byte_rate());
        buf.put_u16_le(self.block_align());
        buf.put_u16_le(self.bits_per_sample);
        buf.put_slice(b"data");
        buf.put_u32_le(self.data_len);
    }

    /// Read the header back from the start of a WAV buffer
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < WAV_HEADER_LEN {
            return Err(AppError::AudioError(format!(
                "WAV buffer too short: {} bytes",
                bytes.len()
            )));
        }

        let mut buf = &bytes[..WAV_HEADER_LEN];
        expect_tag(&mut buf, b"RIFF")?;
        let riff_len = buf.get_u32_le();
        expect_tag(&mut buf, b"WAVE")?;
        expect_tag(&mut buf, b"fmt ")?;
        let fmt_len = buf.get_u32_le();
        let format = buf.get_u16_le();
        if fmt_len != 16 || format != PCM_FORMAT {
            return Err(AppError::AudioError(format!(
                "unsupported WAV format {} (fmt chunk {} bytes)",
                format, fmt_len
            )));
        }
        let channels = buf.get_u16_le();
        let sample_rate = buf.get_u32_le();
        let _byte_rate = buf.get_u32_le();
        let _block_align = buf.get_u16_le();
        let bits_per_sample = buf.get_u16_le();
        expect_tag(&mut buf, b"data")?;
        let data_len = buf.get_u32_le();

        if data_len.checked_add(36) != Some(riff_len) {
            return Err(AppError::AudioError(format!(
                "RIFF size {} does not match data size {}",
                riff_len, data_len
            )));
        }

        Ok(Self {
            sample_rate,
            channels,
            bits_per_sample,
            data_len,
        })
    }
}

fn expect_tag(buf: &mut &[u8], tag: &[u8; 4]) -> Result<()> {
    let mut found = [0u8; 4];
    buf.copy_to_slice(&mut found);
    if &found != tag {
        return Err(AppError::AudioError(format!(
            "expected {:?} chunk, found {:?}",
            String::from_utf8_lossy(tag),
            String::from_utf8_lossy(&found)
        )));
    }
    Ok(())
}

/// Convert one float sample to signed 16-bit, clamping to [-1.0, 1.0]
pub fn to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Finished recording: header plus 16-bit mono samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedClip {
    header: WavHeader,
    samples: Vec<i16>,
}

impl EncodedClip {
    pub fn header(&self) -> &WavHeader {
        &self.header
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.header.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn mime_type(&self) -> &'static str {
        WAV_MIME_TYPE
    }

    /// Always `44 + 2 * sample_count`
    pub fn byte_len(&self) -> usize {
        WAV_HEADER_LEN + self.samples.len() * 2
    }

    pub fn duration(&self) -> Duration {
        if self.header.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.header.sample_rate as f64)
    }

    /// Serialized WAV file
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.byte_len());
        self.header.write(&mut buf);
        for sample in &self.samples {
            buf.put_i16_le(*sample);
        }
        buf.freeze()
    }
}

/// Encode mono float samples as a 16-bit PCM WAV clip
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<EncodedClip> {
    Ok(EncodedClip {
        header: WavHeader::pcm16_mono(sample_rate, samples.len())?,
        samples: samples.iter().copied().map(to_pcm16).collect(),
    })
}
