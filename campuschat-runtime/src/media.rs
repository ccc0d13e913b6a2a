//! Microphone and speaker adapters for the voice session.
//!
//! Device access exists on Windows and macOS; elsewhere both adapters fail
//! on acquisition, which the voice session surfaces once and recovers from.

use async_trait::async_trait;
use campuschat_core::api::AudioBlob;
use campuschat_core::config::VoiceConfig;
use campuschat_engine::traits::{AudioOutput, CaptureHandle, Microphone, PlaybackEvents, PlaybackHandle};

#[cfg(any(windows, target_os = "macos"))]
use campuschat_audio::{AudioPlayer, AudioRecorder, LevelMeter, PlayerEvent, PlayerHandle};
#[cfg(any(windows, target_os = "macos"))]
use campuschat_core::api::AudioPayload;
#[cfg(any(windows, target_os = "macos"))]
use campuschat_engine::traits::PlaybackEvent;
#[cfg(any(windows, target_os = "macos"))]
use std::sync::Arc;

// ~85ms at 48kHz; enough resolution for the lowest visualizer band.
#[cfg(any(windows, target_os = "macos"))]
const METER_WINDOW: usize = 4096;

#[cfg_attr(not(any(windows, target_os = "macos")), allow(dead_code))]
#[derive(Debug, Clone)]
pub struct DeviceMicrophone {
    device: Option<String>,
    upload_rate_hz: u32,
}

impl DeviceMicrophone {
    pub fn new(cfg: &VoiceConfig) -> Self {
        Self {
            device: cfg.microphone_device.clone(),
            upload_rate_hz: cfg.upload_sample_rate_hz.max(8_000),
        }
    }
}

#[async_trait]
impl Microphone for DeviceMicrophone {
    #[cfg(any(windows, target_os = "macos"))]
    async fn open(&self) -> anyhow::Result<Box<dyn CaptureHandle>> {
        use anyhow::Context;

        let device = self.device.clone();
        // Opening blocks on the audio worker's startup handshake.
        let recorder = tokio::task::spawn_blocking(move || {
            AudioRecorder::open_named(device.as_deref(), METER_WINDOW)
        })
        .await
        .context("microphone worker panicked")??;
        recorder.start()?;

        Ok(Box::new(DeviceCapture {
            meter: recorder.meter(),
            recorder,
            upload_rate_hz: self.upload_rate_hz,
        }))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    async fn open(&self) -> anyhow::Result<Box<dyn CaptureHandle>> {
        anyhow::bail!("recording is currently supported on Windows and macOS only")
    }
}

#[cfg(any(windows, target_os = "macos"))]
struct DeviceCapture {
    recorder: AudioRecorder,
    meter: Arc<LevelMeter>,
    upload_rate_hz: u32,
}

#[cfg(any(windows, target_os = "macos"))]
impl CaptureHandle for DeviceCapture {
    fn levels(&mut self, bars: usize) -> Vec<f32> {
        self.meter.bars(bars)
    }

    fn finish(mut self: Box<Self>) -> anyhow::Result<AudioPayload> {
        let captured = self.recorder.stop_captured()?;
        self.recorder.close();
        if captured.samples.is_empty() {
            anyhow::bail!("no audio was captured");
        }
        log::info!(
            "captured {:.1}s at {} Hz",
            captured.duration().as_secs_f32(),
            captured.sample_rate_hz
        );

        Ok(AudioPayload {
            filename: "recording.wav".into(),
            mime_type: "audio/wav".into(),
            bytes: captured.to_wav(self.upload_rate_hz)?,
        })
    }

    fn release(mut self: Box<Self>) {
        self.recorder.close();
    }
}

#[cfg_attr(not(any(windows, target_os = "macos")), allow(dead_code))]
#[derive(Debug, Clone, Default)]
pub struct DeviceSpeaker {
    device: Option<String>,
}

impl DeviceSpeaker {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }
}

impl AudioOutput for DeviceSpeaker {
    #[cfg(any(windows, target_os = "macos"))]
    fn play(&self, audio: &AudioBlob) -> anyhow::Result<(Box<dyn PlaybackHandle>, PlaybackEvents)> {
        if !campuschat_audio::is_wav(&audio.bytes) {
            anyhow::bail!("cannot play {} audio; only WAV replies are playable", audio.mime_type);
        }

        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = AudioPlayer::new(self.device.clone()).play_wav(&audio.bytes, move |ev| {
            let ev = match ev {
                PlayerEvent::Started => PlaybackEvent::Started,
                PlayerEvent::Ended => PlaybackEvent::Ended,
                PlayerEvent::Errored(e) => PlaybackEvent::Errored(e),
            };
            let _ = tx.send(ev);
        })?;

        Ok((Box::new(DevicePlayback(handle)), rx))
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    fn play(&self, audio: &AudioBlob) -> anyhow::Result<(Box<dyn PlaybackHandle>, PlaybackEvents)> {
        anyhow::bail!(
            "playback is currently supported on Windows and macOS only ({} bytes of {})",
            audio.bytes.len(),
            audio.mime_type
        )
    }
}

#[cfg(any(windows, target_os = "macos"))]
struct DevicePlayback(PlayerHandle);

#[cfg(any(windows, target_os = "macos"))]
impl PlaybackHandle for DevicePlayback {
    fn stop(&mut self) {
        self.0.stop();
    }
}

#[cfg(all(test, not(any(windows, target_os = "macos"))))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unsupported_platform_fails_acquisition() {
        let mic = DeviceMicrophone::new(&VoiceConfig::default());
        assert!(mic.open().await.is_err());

        let blob = AudioBlob {
            mime_type: "audio/wav".into(),
            bytes: vec![0; 4],
        };
        assert!(DeviceSpeaker::default().play(&blob).is_err());
    }
}
