use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,

    // `None` waits on a silent stream indefinitely.
    #[serde(default = "default_stream_idle_timeout_ms")]
    pub stream_idle_timeout_ms: Option<u64>,

    #[serde(default = "default_history_limit")]
    pub history_limit: u32,

    /// Use the memory-backed chat endpoints (server keeps multi-turn sessions).
    #[serde(default = "default_use_memory")]
    pub use_memory: bool,

    #[serde(default)]
    pub voice: VoiceConfig,
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stream_idle_timeout(&self) -> Option<Duration> {
        self.stream_idle_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 60_000,
            stream_idle_timeout_ms: default_stream_idle_timeout_ms(),
            history_limit: default_history_limit(),
            use_memory: default_use_memory(),
            voice: VoiceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub waveform_bars: usize,
    pub level_sample_interval_ms: u64,
    pub max_recording_secs: u64,
    pub upload_sample_rate_hz: u32,

    #[serde(default)]
    pub microphone_device: Option<String>,

    #[serde(default)]
    pub speaker_device: Option<String>,
}

impl VoiceConfig {
    pub fn level_sample_interval(&self) -> Duration {
        Duration::from_millis(self.level_sample_interval_ms.max(10))
    }

    pub fn max_recording(&self) -> Duration {
        Duration::from_secs(self.max_recording_secs.max(1))
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            waveform_bars: 32,
            level_sample_interval_ms: 50,
            max_recording_secs: 120,
            upload_sample_rate_hz: 16_000,
            microphone_device: None,
            speaker_device: None,
        }
    }
}

fn default_stream_idle_timeout_ms() -> Option<u64> {
    Some(60_000)
}

fn default_history_limit() -> u32 {
    50
}

fn default_use_memory() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_optional_fields_take_defaults() {
        let cfg: ClientConfig = serde_json::from_str(
            r#"{"base_url":"https://bot.example.edu","connect_timeout_ms":1000,"request_timeout_ms":2000}"#,
        )
        .unwrap();
        assert_eq!(cfg.stream_idle_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(cfg.history_limit, 50);
        assert!(cfg.use_memory);
        assert_eq!(cfg.voice.waveform_bars, 32);
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let cfg = ClientConfig {
            stream_idle_timeout_ms: Some(0),
            ..Default::default()
        };
        assert_eq!(cfg.stream_idle_timeout(), None);
    }
}
