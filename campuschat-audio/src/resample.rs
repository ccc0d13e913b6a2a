use anyhow::Context;
use rubato::Resampler;

/// Resample mono f32 audio to a target sample rate.
///
/// Input is expected to be PCM samples in [-1, 1] with a known sample rate.
pub fn resample_mono_f32(
    input_samples: &[f32],
    input_sample_rate_hz: u32,
    target_sample_rate_hz: u32,
) -> anyhow::Result<Vec<f32>> {
    if input_sample_rate_hz == target_sample_rate_hz || input_samples.is_empty() {
        return Ok(input_samples.to_vec());
    }

    let input_sample_rate_hz: usize = input_sample_rate_hz
        .try_into()
        .context("invalid input sample rate")?;
    let target_sample_rate_hz: usize = target_sample_rate_hz
        .try_into()
        .context("invalid target sample rate")?;

    let params = rubato::SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: rubato::SincInterpolationType::Cubic,
        oversampling_factor: 256,
        window: rubato::WindowFunction::BlackmanHarris2,
    };

    let mut resampler = rubato::SincFixedIn::<f32>::new(
        target_sample_rate_hz as f64 / input_sample_rate_hz as f64,
        2.0,
        params,
        input_samples.len(),
        1,
    )
    .context("create resampler")?;

    let input = vec![input_samples.to_vec()];
    let out = resampler.process(&input, None).context("resample")?;
    Ok(out.into_iter().next().unwrap_or_default())
}

/// Resample interleaved audio channel by channel, keeping the channel count.
pub fn resample_interleaved(
    samples: &[f32],
    channels: usize,
    input_sample_rate_hz: u32,
    target_sample_rate_hz: u32,
) -> anyhow::Result<Vec<f32>> {
    let channels = channels.max(1);
    if channels == 1 {
        return resample_mono_f32(samples, input_sample_rate_hz, target_sample_rate_hz);
    }

    let planes = (0..channels)
        .map(|c| {
            let plane: Vec<f32> = samples.iter().skip(c).step_by(channels).copied().collect();
            resample_mono_f32(&plane, input_sample_rate_hz, target_sample_rate_hz)
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * channels);
    for i in 0..frames {
        for plane in &planes {
            out.push(plane[i]);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_returns_same() {
        let x = vec![0.0, 0.5, -0.5, 0.25];
        let y = resample_mono_f32(&x, 16_000, 16_000).unwrap();
        assert_eq!(x, y);
    }

    #[test]
    fn downsample_halves_length_roughly() {
        let x: Vec<f32> = (0..4_800).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let y = resample_mono_f32(&x, 48_000, 24_000).unwrap();
        let expected = 2_400f32;
        assert!((y.len() as f32 - expected).abs() / expected < 0.1, "{}", y.len());
    }

    #[test]
    fn interleaved_keeps_channel_layout() {
        let x = vec![0.1, -0.1, 0.2, -0.2];
        let y = resample_interleaved(&x, 2, 8_000, 8_000).unwrap();
        assert_eq!(x, y);
    }
}
