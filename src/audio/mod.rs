//! Audio capture pipeline
//!
//! - Microphone access over ALSA
//! - Block capture into a WAV clip
//! - Transcription of finished clips

pub mod capture;
pub mod device;
pub mod transcribe;
pub mod wav;

pub use capture::{CaptureBuffer, CaptureEngine, CaptureState};
pub use device::{list_capture_devices, AlsaMicrophone, CaptureDevice, Microphone, StreamInfo};
pub use transcribe::{HttpTranscriber, Transcriber, Transcript};
pub use wav::{encode_wav, EncodedClip, WavHeader, WAV_HEADER_LEN, WAV_MIME_TYPE};
