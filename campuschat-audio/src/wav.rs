//! RIFF/WAVE encoding for uploads and decoding for playback.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// 16-bit signed integer PCM; half the size of float and accepted everywhere.
    Pcm16,
    Float32,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WavError {
    #[error("not a RIFF/WAVE file")]
    NotWav,

    #[error("truncated wav: {0}")]
    Truncated(&'static str),

    #[error("unsupported wav encoding: format {format}, {bits} bits")]
    Unsupported { format: u16, bits: u16 },
}

/// Decoded PCM, interleaved when `channels > 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedWav {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedWav {
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate_hz == 0 {
            return 0.0;
        }
        self.frames() as f32 / self.sample_rate_hz as f32
    }

    pub fn to_mono(&self) -> Vec<f32> {
        let ch = self.channels.max(1) as usize;
        if ch == 1 {
            return self.samples.clone();
        }
        self.samples
            .chunks_exact(ch)
            .map(|frame| frame.iter().sum::<f32>() / ch as f32)
            .collect()
    }
}

pub fn encode_wav_mono(samples: &[f32], sample_rate_hz: u32, format: WavFormat) -> Vec<u8> {
    let num_channels: u16 = 1;
    let (audio_format, bits_per_sample): (u16, u16) = match format {
        WavFormat::Pcm16 => (1, 16),
        WavFormat::Float32 => (3, 32),
    };
    let bytes_per_sample = bits_per_sample as u32 / 8;

    let byte_rate = sample_rate_hz * num_channels as u32 * bytes_per_sample;
    let block_align = num_channels * (bits_per_sample / 8);
    let data_bytes_len = samples.len() as u32 * bytes_per_sample;

    let mut out = Vec::with_capacity((44 + data_bytes_len) as usize);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_bytes_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&audio_format.to_le_bytes());
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&sample_rate_hz.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&bits_per_sample.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_bytes_len.to_le_bytes());

    match format {
        WavFormat::Pcm16 => {
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        WavFormat::Float32 => {
            for s in samples {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }

    out
}

pub fn is_wav(bytes: &[u8]) -> bool {
    bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE"
}

struct Fmt {
    format: u16,
    channels: u16,
    sample_rate_hz: u32,
    bits: u16,
}

pub fn decode_wav(bytes: &[u8]) -> Result<DecodedWav, WavError> {
    if !is_wav(bytes) {
        return Err(WavError::NotWav);
    }

    let mut fmt: Option<Fmt> = None;
    let mut pos = 12usize;

    while pos + 8 <= bytes.len() {
        let id = &bytes[pos..pos + 4];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        let body_start = pos + 8;
        // Streaming writers leave the data size unset; take what is there.
        let body_end = body_start.saturating_add(size).min(bytes.len());
        let body = &bytes[body_start..body_end];

        match id {
            b"fmt " => fmt = Some(parse_fmt(body)?),
            b"data" => {
                let fmt = fmt.ok_or(WavError::Truncated("data chunk before fmt chunk"))?;
                let samples = decode_samples(body, &fmt)?;
                return Ok(DecodedWav {
                    sample_rate_hz: fmt.sample_rate_hz,
                    channels: fmt.channels,
                    samples,
                });
            }
            _ => {}
        }

        // Chunks are word-aligned.
        pos = body_end + (size & 1);
    }

    Err(WavError::Truncated("no data chunk"))
}

fn parse_fmt(body: &[u8]) -> Result<Fmt, WavError> {
    if body.len() < 16 {
        return Err(WavError::Truncated("fmt chunk"));
    }
    let u16_at = |i: usize| u16::from_le_bytes([body[i], body[i + 1]]);
    let mut format = u16_at(0);
    let channels = u16_at(2);
    let sample_rate_hz = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
    let bits = u16_at(14);

    // WAVE_FORMAT_EXTENSIBLE carries the real format in its sub-format GUID.
    if format == 0xFFFE && body.len() >= 26 {
        format = u16_at(24);
    }
    if channels == 0 {
        return Err(WavError::Truncated("fmt chunk without channels"));
    }

    Ok(Fmt {
        format,
        channels,
        sample_rate_hz,
        bits,
    })
}

fn decode_samples(data: &[u8], fmt: &Fmt) -> Result<Vec<f32>, WavError> {
    let out = match (fmt.format, fmt.bits) {
        (1, 8) => data.iter().map(|&b| (b as f32 - 128.0) / 128.0).collect(),
        (1, 16) => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32_768.0)
            .collect(),
        (1, 24) => data
            .chunks_exact(3)
            .map(|c| {
                let v = i32::from_le_bytes([0, c[0], c[1], c[2]]) >> 8;
                v as f32 / 8_388_608.0
            })
            .collect(),
        (1, 32) => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        (3, 32) => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (format, bits) => return Err(WavError::Unsupported { format, bits }),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wav_has_basic_header() {
        let wav = encode_wav_mono(&[0.0, 0.5, -0.5], 16_000, WavFormat::Pcm16);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 44 + 6);
    }

    #[test]
    fn pcm16_decodes_within_quantization() {
        let input = [0.0, 0.25, -0.75, 1.0];
        let wav = encode_wav_mono(&input, 22_050, WavFormat::Pcm16);
        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.sample_rate_hz, 22_050);
        assert_eq!(decoded.channels, 1);
        for (a, b) in input.iter().zip(&decoded.samples) {
            assert_relative_eq!(*a, *b, epsilon = 1e-3);
        }
    }

    #[test]
    fn float_is_lossless() {
        let input = [0.1, -0.2, 0.3];
        let decoded = decode_wav(&encode_wav_mono(&input, 8_000, WavFormat::Float32)).unwrap();
        assert_eq!(decoded.samples, input);
    }

    #[test]
    fn skips_unknown_chunks_and_downmixes() {
        let mut wav = Vec::new();
        wav.extend_from_slice(b"RIFF");
        wav.extend_from_slice(&0u32.to_le_bytes());
        wav.extend_from_slice(b"WAVE");
        // odd-sized LIST chunk with a pad byte
        wav.extend_from_slice(b"LIST");
        wav.extend_from_slice(&3u32.to_le_bytes());
        wav.extend_from_slice(&[1, 2, 3, 0]);
        wav.extend_from_slice(b"fmt ");
        wav.extend_from_slice(&16u32.to_le_bytes());
        wav.extend_from_slice(&1u16.to_le_bytes());
        wav.extend_from_slice(&2u16.to_le_bytes());
        wav.extend_from_slice(&8_000u32.to_le_bytes());
        wav.extend_from_slice(&32_000u32.to_le_bytes());
        wav.extend_from_slice(&4u16.to_le_bytes());
        wav.extend_from_slice(&16u16.to_le_bytes());
        wav.extend_from_slice(b"data");
        wav.extend_from_slice(&8u32.to_le_bytes());
        for v in [16_384i16, 0, -16_384, -16_384] {
            wav.extend_from_slice(&v.to_le_bytes());
        }

        let decoded = decode_wav(&wav).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 2);
        let mono = decoded.to_mono();
        assert_relative_eq!(mono[0], 0.25, epsilon = 1e-4);
        assert_relative_eq!(mono[1], -0.5, epsilon = 1e-4);
    }

    #[test]
    fn rejects_non_wav() {
        assert_eq!(decode_wav(b"ID3\x04mp3 data here"), Err(WavError::NotWav));
        assert!(!is_wav(b"RIFF"));
    }
}
