//! CPAL microphone capture.
//!
//! The cpal `Stream` is not `Send`, so it lives on a dedicated worker thread
//! and the recorder talks to it over channels.

use std::sync::{Arc, mpsc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Sample, SampleFormat, SizedSample, Stream};

use crate::analysis::LevelMeter;
use crate::resample::resample_mono_f32;
use crate::wav::{WavFormat, encode_wav_mono};

#[derive(Debug, thiserror::Error)]
pub enum AudioCaptureError {
    #[error("no input device found")]
    NoInputDevice,

    #[error("failed to list input devices: {0}")]
    ListDevices(#[from] cpal::DevicesError),

    #[error("failed to get default config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("audio worker failed: {0}")]
    Worker(String),

    #[error("audio worker startup timeout")]
    WorkerTimeout,

    #[error("recording stop timed out")]
    StopTimeout,

    #[error("failed to resample: {0}")]
    Resample(#[from] anyhow::Error),

    #[error("internal channel error")]
    Channel,
}

pub struct CapturedAudio {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

impl CapturedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate_hz as f64)
    }

    /// Mono PCM16 WAV at `target_rate_hz`, ready for upload.
    pub fn to_wav(&self, target_rate_hz: u32) -> Result<Vec<u8>, AudioCaptureError> {
        let samples = resample_mono_f32(&self.samples, self.sample_rate_hz, target_rate_hz)?;
        Ok(encode_wav_mono(&samples, target_rate_hz, WavFormat::Pcm16))
    }
}

pub struct AudioRecorder {
    cmd_tx: mpsc::Sender<Cmd>,
    worker_handle: Option<std::thread::JoinHandle<()>>,
    sample_rate_hz: u32,
    meter: Arc<LevelMeter>,
}

enum Cmd {
    Start,
    Stop(mpsc::Sender<Vec<f32>>),
    Shutdown,
}

enum WorkerMsg {
    Ready,
    Error(String),
}

impl AudioRecorder {
    pub fn list_input_device_names() -> Result<Vec<String>, AudioCaptureError> {
        let host = cpal::default_host();
        let mut out = Vec::new();
        for dev in host.input_devices()? {
            if let Ok(name) = dev.name() {
                out.push(name);
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// Opens the named input device, or the system default when the name is
    /// empty or not found. `meter_window` sizes the level analysis window.
    pub fn open_named(device_name: Option<&str>, meter_window: usize) -> Result<Self, AudioCaptureError> {
        let host = cpal::default_host();

        if let Some(needle) = device_name.map(str::trim).filter(|n| !n.is_empty()) {
            if let Ok(devices) = host.input_devices() {
                for dev in devices {
                    if dev.name().is_ok_and(|name| name == needle) {
                        log::info!("using input device: {needle}");
                        return Self::open(dev, meter_window);
                    }
                }
            }
            log::warn!("preferred input device not found, falling back to default: {needle}");
        }

        let device = host
            .default_input_device()
            .ok_or(AudioCaptureError::NoInputDevice)?;
        Self::open(device, meter_window)
    }

    pub fn open(device: Device, meter_window: usize) -> Result<Self, AudioCaptureError> {
        // Capture at the device's native rate; callers resample on the way out.
        let default_cfg = device.default_input_config()?;
        let sample_rate_hz = default_cfg.sample_rate().0;
        let meter = Arc::new(LevelMeter::new(sample_rate_hz, meter_window));

        let (sample_tx, sample_rx) = mpsc::channel::<Vec<f32>>();
        let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>();
        let (worker_tx, worker_rx) = mpsc::channel::<WorkerMsg>();
        let worker_meter = meter.clone();

        let worker_handle = std::thread::spawn(move || {
            let sample_format = default_cfg.sample_format();
            let channels = default_cfg.channels() as usize;
            let config: cpal::StreamConfig = default_cfg.into();

            let stream = match sample_format {
                SampleFormat::I16 => build_input_stream::<i16>(&device, &config, channels, sample_tx),
                SampleFormat::U16 => build_input_stream::<u16>(&device, &config, channels, sample_tx),
                SampleFormat::I8 => build_input_stream::<i8>(&device, &config, channels, sample_tx),
                SampleFormat::U8 => build_input_stream::<u8>(&device, &config, channels, sample_tx),
                SampleFormat::I32 => build_input_stream::<i32>(&device, &config, channels, sample_tx),
                SampleFormat::U32 => build_input_stream::<u32>(&device, &config, channels, sample_tx),
                SampleFormat::F64 => build_input_stream::<f64>(&device, &config, channels, sample_tx),
                _ => build_input_stream::<f32>(&device, &config, channels, sample_tx),
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    log::error!("input stream build failed: {e}");
                    let _ = worker_tx.send(WorkerMsg::Error(format!("build stream: {e}")));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                log::error!("input stream play failed: {e}");
                let _ = worker_tx.send(WorkerMsg::Error(format!("play stream: {e}")));
                return;
            }

            let _ = worker_tx.send(WorkerMsg::Ready);

            run_consumer(sample_rx, cmd_rx, &worker_meter);
            drop(stream);
            log::debug!("input stream closed");
        });

        match worker_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(WorkerMsg::Ready) => {}
            Ok(WorkerMsg::Error(e)) => return Err(AudioCaptureError::Worker(e)),
            Err(mpsc::RecvTimeoutError::Timeout) => return Err(AudioCaptureError::WorkerTimeout),
            Err(_) => return Err(AudioCaptureError::Channel),
        }

        Ok(Self {
            cmd_tx,
            worker_handle: Some(worker_handle),
            sample_rate_hz,
            meter,
        })
    }

    pub fn sample_rate_hz(&self) -> u32 {
        self.sample_rate_hz
    }

    /// Live input levels; fed whether or not a take is in progress.
    pub fn meter(&self) -> Arc<LevelMeter> {
        self.meter.clone()
    }

    pub fn start(&self) -> Result<(), AudioCaptureError> {
        self.cmd_tx
            .send(Cmd::Start)
            .map_err(|_| AudioCaptureError::Channel)
    }

    pub fn stop_captured(&self) -> Result<CapturedAudio, AudioCaptureError> {
        let (resp_tx, resp_rx) = mpsc::channel();
        self.cmd_tx
            .send(Cmd::Stop(resp_tx))
            .map_err(|_| AudioCaptureError::Channel)?;

        let samples = resp_rx
            .recv_timeout(Duration::from_secs(3))
            .map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => AudioCaptureError::StopTimeout,
                mpsc::RecvTimeoutError::Disconnected => AudioCaptureError::Channel,
            })?;

        Ok(CapturedAudio {
            sample_rate_hz: self.sample_rate_hz,
            samples,
        })
    }

    /// Stops the device and joins the worker. Safe to call more than once.
    pub fn close(&mut self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        if let Some(h) = self.worker_handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for AudioRecorder {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    sample_tx: mpsc::Sender<Vec<f32>>,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: Sample + SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    let cb = move |data: &[T], _: &cpal::InputCallbackInfo| {
        let mono: Vec<f32> = if channels <= 1 {
            data.iter().map(|&s| s.to_sample::<f32>()).collect()
        } else {
            data.chunks_exact(channels)
                .map(|frame| frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32)
                .collect()
        };
        let _ = sample_tx.send(mono);
    };

    device.build_input_stream(
        config,
        cb,
        |err| log::error!("input stream error: {err}"),
        None,
    )
}

fn run_consumer(sample_rx: mpsc::Receiver<Vec<f32>>, cmd_rx: mpsc::Receiver<Cmd>, meter: &LevelMeter) {
    let mut recording = false;
    let mut captured: Vec<f32> = Vec::new();

    loop {
        // Drain commands even when the device has stalled.
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                Cmd::Start => {
                    recording = true;
                    captured.clear();
                }
                Cmd::Stop(resp) => {
                    recording = false;
                    let _ = resp.send(std::mem::take(&mut captured));
                }
                Cmd::Shutdown => return,
            }
        }

        match sample_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(samples) => {
                meter.push(&samples);
                if recording {
                    captured.extend_from_slice(&samples);
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    }
}
