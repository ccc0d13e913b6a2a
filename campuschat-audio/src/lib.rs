pub mod analysis;
pub mod resample;
pub mod wav;

// Device access is implemented for Windows and macOS only.
#[cfg(any(windows, target_os = "macos"))]
pub mod player;
#[cfg(any(windows, target_os = "macos"))]
pub mod recorder;

pub use analysis::LevelMeter;
pub use wav::{DecodedWav, WavError, WavFormat, decode_wav, encode_wav_mono, is_wav};

#[cfg(any(windows, target_os = "macos"))]
pub use player::{AudioPlayer, PlayerError, PlayerEvent, PlayerHandle};
#[cfg(any(windows, target_os = "macos"))]
pub use recorder::{AudioCaptureError, AudioRecorder, CapturedAudio};
