//! Level metering for the recording visualizer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const MIN_BAND_HZ: f32 = 80.0;
const MAX_BAND_HZ: f32 = 8_000.0;
const FLOOR_DB: f32 = -60.0;

/// RMS and peak of a block, both clamped to `0.0..=1.0`.
pub fn compute_levels(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }

    let mut peak = 0.0f32;
    let mut sum_sq = 0.0f32;

    for &s in samples {
        let v = s.abs();
        if v > peak {
            peak = v;
        }
        sum_sq += s * s;
    }

    let rms = (sum_sq / samples.len() as f32).sqrt();
    (rms.clamp(0.0, 1.0), peak.clamp(0.0, 1.0))
}

pub fn smooth_level(prev: f32, next: f32, dt: Duration) -> f32 {
    // Exponential smoothing with a 150ms time constant.
    let tau = 0.15f32;
    let alpha = 1.0 - (-dt.as_secs_f32() / tau).exp();
    prev + (next - prev) * alpha
}

/// Log-spaced band centers between 80 Hz and 8 kHz (or just under Nyquist).
pub fn band_centers(sample_rate_hz: u32, bars: usize) -> Vec<f32> {
    let hi = MAX_BAND_HZ.min(sample_rate_hz as f32 * 0.45);
    let lo = MIN_BAND_HZ.min(hi * 0.5);
    let ratio = hi / lo;
    (0..bars)
        .map(|i| lo * ratio.powf((i as f32 + 0.5) / bars as f32))
        .collect()
}

/// Per-band magnitude of `samples`, mapped from a -60..0 dBFS scale onto
/// `0.0..=1.0`. A full-scale sine at a band center reads close to 1.
pub fn spectrum_bars(samples: &[f32], sample_rate_hz: u32, bars: usize) -> Vec<f32> {
    if samples.is_empty() || sample_rate_hz == 0 {
        return vec![0.0; bars];
    }

    band_centers(sample_rate_hz, bars)
        .into_iter()
        .map(|freq| {
            let mag = goertzel_magnitude(samples, sample_rate_hz as f32, freq);
            if mag <= 0.0 {
                return 0.0;
            }
            let db = 20.0 * mag.log10();
            ((db - FLOOR_DB) / -FLOOR_DB).clamp(0.0, 1.0)
        })
        .collect()
}

// Hann-windowed single-frequency DFT, normalized so a sine of amplitude A
// yields roughly A.
fn goertzel_magnitude(samples: &[f32], sample_rate_hz: f32, freq_hz: f32) -> f32 {
    let n = samples.len();
    let w = 2.0 * std::f32::consts::PI * freq_hz / sample_rate_hz;
    let coeff = 2.0 * w.cos();
    let (mut s1, mut s2) = (0.0f32, 0.0f32);

    for (i, &x) in samples.iter().enumerate() {
        let window = if n > 1 {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos()
        } else {
            1.0
        };
        let s0 = x * window + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }

    let power = (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0);
    power.sqrt() / (n as f32 / 4.0)
}

/// Keeps the most recent input window and turns it into smoothed bars on
/// demand. Shared between the capture callback and the UI sampler.
pub struct LevelMeter {
    sample_rate_hz: u32,
    capacity: usize,
    state: Mutex<MeterState>,
}

struct MeterState {
    window: VecDeque<f32>,
    bars: Vec<f32>,
    last_read: Option<Instant>,
}

impl LevelMeter {
    pub fn new(sample_rate_hz: u32, window: usize) -> Self {
        let capacity = window.max(64);
        Self {
            sample_rate_hz,
            capacity,
            state: Mutex::new(MeterState {
                window: VecDeque::with_capacity(capacity),
                bars: Vec::new(),
                last_read: None,
            }),
        }
    }

    pub fn push(&self, samples: &[f32]) {
        let Ok(mut st) = self.state.lock() else {
            return;
        };
        st.window.extend(samples.iter().copied());
        let excess = st.window.len().saturating_sub(self.capacity);
        st.window.drain(..excess);
    }

    pub fn bars(&self, count: usize) -> Vec<f32> {
        let Ok(mut st) = self.state.lock() else {
            return vec![0.0; count];
        };
        let samples: Vec<f32> = st.window.iter().copied().collect();
        let next = spectrum_bars(&samples, self.sample_rate_hz, count);

        let now = Instant::now();
        let dt = st
            .last_read
            .map(|t| now.duration_since(t))
            .unwrap_or(Duration::from_secs(1));
        st.last_read = Some(now);

        if st.bars.len() != count {
            st.bars = next;
        } else {
            for (prev, n) in st.bars.iter_mut().zip(next) {
                *prev = smooth_level(*prev, n, dt);
            }
        }
        st.bars.clone()
    }

    pub fn rms(&self) -> f32 {
        let Ok(st) = self.state.lock() else {
            return 0.0;
        };
        let samples: Vec<f32> = st.window.iter().copied().collect();
        compute_levels(&samples).0
    }
}
