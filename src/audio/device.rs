//! Microphone access
//!
//! `Microphone` is the blocking device seam used by the capture engine;
//! `AlsaMicrophone` implements it for ALSA capture devices.

use alsa::pcm::{Access, Format, Frames, HwParams, State};
use alsa::{Direction, ValueOr, PCM};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};

/// Parameters the device actually granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub block_size: usize,
}

/// Blocking mono float microphone
pub trait Microphone: Send + 'static {
    /// Acquire the device; may pick the nearest supported rate
    fn open(&mut self, sample_rate: u32, block_size: usize) -> Result<StreamInfo>;

    /// Fill `buf` with up to `buf.len()` samples, returning how many were read
    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize>;

    /// Device is open and still delivering
    fn is_active(&self) -> bool;

    /// Pause or resume delivery without releasing the device
    fn set_enabled(&mut self, enabled: bool);

    /// Release the device
    fn close(&mut self);
}

/// ALSA capture device
pub struct AlsaMicrophone {
    device: String,
    pcm: Option<PCM>,
    enabled: bool,
}

impl AlsaMicrophone {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            pcm: None,
            enabled: false,
        }
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    fn configure(pcm: &PCM, sample_rate: u32, block_size: usize) -> Result<()> {
        let hwp = HwParams::any(pcm)
            .map_err(|e| AppError::AudioError(format!("Failed to get HwParams: {}", e)))?;
        hwp.set_channels(1)
            .map_err(|e| AppError::AudioError(format!("Failed to set mono: {}", e)))?;
        hwp.set_rate(sample_rate, ValueOr::Nearest)
            .map_err(|e| AppError::AudioError(format!("Failed to set sample rate: {}", e)))?;
        hwp.set_format(Format::float())
            .map_err(|e| AppError::AudioError(format!("Failed to set float format: {}", e)))?;
        hwp.set_access(Access::RWInterleaved)
            .map_err(|e| AppError::AudioError(format!("Failed to set access: {}", e)))?;
        hwp.set_period_size_near(block_size as Frames, ValueOr::Nearest)
            .map_err(|e| AppError::AudioError(format!("Failed to set period size: {}", e)))?;
        hwp.set_buffer_size_near((block_size * 4) as Frames)
            .map_err(|e| AppError::AudioError(format!("Failed to set buffer size: {}", e)))?;
        pcm.hw_params(&hwp)
            .map_err(|e| AppError::AudioError(format!("Failed to apply hw params: {}", e)))
    }
}

fn open_error(device: &str, e: alsa::Error) -> AppError {
    let errno = e.errno().abs();
    if errno == libc::EACCES || errno == libc::EPERM {
        AppError::PermissionDenied(format!("{}: {}", device, e))
    } else {
        AppError::AudioError(format!("Failed to open audio device {}: {}", device, e))
    }
}

impl Microphone for AlsaMicrophone {
    fn open(&mut self, sample_rate: u32, block_size: usize) -> Result<StreamInfo> {
        self.close();

        let pcm = PCM::new(&self.device, Direction::Capture, false)
            .map_err(|e| open_error(&self.device, e))?;
        Self::configure(&pcm, sample_rate, block_size)?;

        let actual_rate = pcm
            .hw_params_current()
            .and_then(|h| h.get_rate())
            .unwrap_or(sample_rate);
        if actual_rate != sample_rate {
            warn!(
                "Device {} does not support {}Hz, capturing at {}Hz",
                self.device, sample_rate, actual_rate
            );
        }

        pcm.prepare()
            .map_err(|e| AppError::AudioError(format!("Failed to prepare PCM: {}", e)))?;
        info!("Microphone {} opened: {}Hz mono", self.device, actual_rate);

        self.pcm = Some(pcm);
        self.enabled = true;
        Ok(StreamInfo {
            sample_rate: actual_rate,
            block_size,
        })
    }

    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize> {
        let Some(pcm) = self.pcm.as_ref() else {
            return Err(AppError::AudioError("microphone not open".into()));
        };
        if !self.enabled {
            return Ok(0);
        }

        match pcm.state() {
            State::XRun => {
                warn!("Microphone buffer overrun, recovering");
                let _ = pcm.prepare();
                return Ok(0);
            }
            State::Suspended => {
                warn!("Microphone suspended, resuming");
                let _ = pcm.resume();
                return Ok(0);
            }
            State::Disconnected => {
                return Err(AppError::AudioError(format!(
                    "microphone {} disconnected",
                    self.device
                )));
            }
            _ => {}
        }

        let io = pcm
            .io_f32()
            .map_err(|e| AppError::AudioError(format!("Failed to get PCM IO: {}", e)))?;
        match io.readi(buf) {
            Ok(frames) => Ok(frames),
            Err(e) => {
                let desc = e.to_string();
                if desc.contains("EPIPE") || desc.contains("Broken pipe") {
                    warn!("Microphone buffer overrun");
                    let _ = pcm.prepare();
                    Ok(0)
                } else {
                    Err(AppError::AudioError(format!("Microphone read failed: {}", e)))
                }
            }
        }
    }

    fn is_active(&self) -> bool {
        self.pcm
            .as_ref()
            .map(|pcm| pcm.state() != State::Disconnected)
            .unwrap_or(false)
    }

    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        if let Some(pcm) = self.pcm.as_ref() {
            let result = if enabled { pcm.prepare() } else { pcm.drop() };
            if let Err(e) = result {
                debug!("Microphone enable({}) failed: {}", enabled, e);
            }
        }
        self.enabled = enabled;
    }

    fn close(&mut self) {
        if self.pcm.take().is_some() {
            debug!("Microphone {} closed", self.device);
        }
        self.enabled = false;
    }
}

/// Capture device description
#[derive(Debug, Clone, Serialize)]
pub struct CaptureDevice {
    /// ALSA name, e.g. "hw:1,0" or "default"
    pub name: String,
    pub description: String,
    /// Supported rates among the common ones
    pub sample_rates: Vec<u32>,
    pub mono: bool,
}

/// List ALSA capture devices that can be opened now
pub fn list_capture_devices() -> Result<Vec<CaptureDevice>> {
    let mut devices = Vec::new();

    if let Ok(pcm) = PCM::new("default", Direction::Capture, false) {
        let (sample_rates, mono) = query_caps(&pcm);
        devices.push(CaptureDevice {
            name: "default".to_string(),
            description: "Default capture device".to_string(),
            sample_rates,
            mono,
        });
    }

    for card in alsa::card::Iter::new() {
        let card = match card {
            Ok(card) => card,
            Err(e) => {
                debug!("Error iterating sound cards: {}", e);
                continue;
            }
        };
        let index = card.get_index();
        let longname = card
            .get_longname()
            .or_else(|_| card.get_name())
            .unwrap_or_else(|_| "Unknown".to_string());

        for device_index in 0..8 {
            let name = format!("hw:{},{}", index, device_index);
            if let Ok(pcm) = PCM::new(&name, Direction::Capture, false) {
                let (sample_rates, mono) = query_caps(&pcm);
                if sample_rates.is_empty() {
                    continue;
                }
                devices.push(CaptureDevice {
                    name,
                    description: format!("{} - Device {}", longname, device_index),
                    sample_rates,
                    mono,
                });
            }
        }
    }

    info!("Found {} capture device(s)", devices.len());
    Ok(devices)
}

fn query_caps(pcm: &PCM) -> (Vec<u32>, bool) {
    let Ok(hwp) = HwParams::any(pcm) else {
        return (Vec::new(), false);
    };
    let rates = [8000, 16000, 22050, 44100, 48000]
        .into_iter()
        .filter(|rate| hwp.test_rate(*rate).is_ok())
        .collect();
    (rates, hwp.test_channels(1).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_microphone() {
        let mut mic = AlsaMicrophone::new("hw:99,0");
        assert!(!mic.is_active());
        let mut buf = [0.0f32; 16];
        assert!(mic.read_block(&mut buf).is_err());
        mic.close();
        assert_eq!(mic.device(), "hw:99,0");
    }

    #[test]
    fn test_missing_device_fails_to_open() {
        let mut mic = AlsaMicrophone::new("hw:99,0");
        assert!(mic.open(16000, 4096).is_err());
        assert!(!mic.is_active());
    }
}
