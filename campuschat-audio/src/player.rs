//! CPAL speaker output for WAV replies.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample, Stream};

use crate::resample::resample_mono_f32;
use crate::wav::{WavError, decode_wav};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Started,
    Ended,
    Errored(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("no output device found")]
    NoOutputDevice,

    #[error("cannot decode reply audio: {0}")]
    Decode(#[from] WavError),

    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to resample: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,
}

/// Stops playback when dropped.
pub struct PlayerHandle {
    stop: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl PlayerHandle {
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(h) = self.worker.take() {
            let _ = h.join();
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioPlayer {
    device_name: Option<String>,
}

enum WorkerMsg {
    Ready,
    Error(String),
}

impl AudioPlayer {
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    pub fn list_output_device_names() -> Vec<String> {
        let host = cpal::default_host();
        let mut out: Vec<String> = host
            .output_devices()
            .map(|devs| devs.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default();
        out.sort();
        out.dedup();
        out
    }

    fn device(&self) -> Result<cpal::Device, PlayerError> {
        let host = cpal::default_host();
        if let Some(needle) = self.device_name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            if let Ok(devices) = host.output_devices() {
                for dev in devices {
                    if dev.name().is_ok_and(|name| name == needle) {
                        return Ok(dev);
                    }
                }
            }
            log::warn!("preferred output device not found, falling back to default: {needle}");
        }
        host.default_output_device().ok_or(PlayerError::NoOutputDevice)
    }

    /// Plays a WAV clip on a worker thread.
    ///
    /// `on_event` receives `Started` once the device runs, then exactly one of
    /// `Ended` or `Errored`. Nothing is reported after the handle is stopped.
    pub fn play_wav<F>(&self, bytes: &[u8], on_event: F) -> Result<PlayerHandle, PlayerError>
    where
        F: Fn(PlayerEvent) + Send + 'static,
    {
        let decoded = decode_wav(bytes)?;
        let device = self.device()?;
        let cfg = device.default_output_config()?;
        let out_rate = cfg.sample_rate().0;
        let channels = cfg.channels() as usize;

        let samples = resample_mono_f32(&decoded.to_mono(), decoded.sample_rate_hz, out_rate)?;
        let total = samples.len();
        log::debug!(
            "playing {:.2}s of audio at {out_rate} Hz",
            decoded.duration_secs()
        );

        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = stop.clone();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();

        let worker = std::thread::spawn(move || {
            let position = Arc::new(AtomicUsize::new(0));
            let failure: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let samples = Arc::new(samples);
            let sample_format = cfg.sample_format();
            let config: cpal::StreamConfig = cfg.into();
            let tap = Tap {
                samples,
                position: position.clone(),
                channels,
                failure: failure.clone(),
            };

            let stream = match sample_format {
                SampleFormat::I16 => build_output_stream::<i16>(&device, &config, tap),
                SampleFormat::U16 => build_output_stream::<u16>(&device, &config, tap),
                SampleFormat::I32 => build_output_stream::<i32>(&device, &config, tap),
                _ => build_output_stream::<f32>(&device, &config, tap),
            };
            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                return;
            }
            let _ = worker_tx.send(WorkerMsg::Ready);
            on_event(PlayerEvent::Started);

            loop {
                if worker_stop.load(Ordering::SeqCst) {
                    return;
                }
                if let Some(err) = failure.lock().ok().and_then(|mut f| f.take()) {
                    on_event(PlayerEvent::Errored(err));
                    return;
                }
                if position.load(Ordering::SeqCst) >= total {
                    // Let the device drain its last buffer.
                    std::thread::sleep(Duration::from_millis(120));
                    if !worker_stop.load(Ordering::SeqCst) {
                        on_event(PlayerEvent::Ended);
                    }
                    return;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(PlayerError::Worker(e)),
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                return Err(PlayerError::WorkerTimeout);
            }
        }

        Ok(PlayerHandle {
            stop,
            worker: Some(worker),
        })
    }
}

struct Tap {
    samples: Arc<Vec<f32>>,
    position: Arc<AtomicUsize>,
    channels: usize,
    failure: Arc<Mutex<Option<String>>>,
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    tap: Tap,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let Tap {
        samples,
        position,
        channels,
        failure,
    } = tap;
    let channels = channels.max(1);

    let cb = move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
        let mut pos = position.load(Ordering::SeqCst);
        for frame in data.chunks_mut(channels) {
            let v = samples.get(pos).copied().unwrap_or(0.0);
            if pos < samples.len() {
                pos += 1;
            }
            for out in frame.iter_mut() {
                *out = T::from_sample(v);
            }
        }
        position.store(pos, Ordering::SeqCst);
    };

    device.build_output_stream(
        config,
        cb,
        move |err| {
            log::error!("output stream error: {err}");
            if let Ok(mut f) = failure.lock() {
                f.get_or_insert_with(|| err.to_string());
            }
        },
        None,
    )
}
