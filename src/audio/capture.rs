//! Microphone capture engine
//!
//! Reads fixed-size float blocks from a [`Microphone`] on a blocking task and
//! turns them into a WAV clip on `stop()`.

use parking_lot::Mutex as SyncMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::device::{Microphone, StreamInfo};
use super::wav::{encode_wav, EncodedClip};
use crate::config::CaptureConfig;
use crate::error::{AppError, Result};
use crate::events::{EventBus, SessionEvent};

/// Idle wait when the device had nothing to deliver
const IDLE_POLL: Duration = Duration::from_millis(5);

/// Capture pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Microphone not acquired yet
    Uninitialized,
    /// Microphone acquired, not recording
    Ready,
    Recording,
    /// Microphone unavailable
    Error,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Ready => "ready",
            Self::Recording => "recording",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only list of copied sample blocks
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    blocks: Vec<Vec<f32>>,
}

impl CaptureBuffer {
    pub fn push(&mut self, block: &[f32]) {
        self.blocks.push(block.to_vec());
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn sample_count(&self) -> usize {
        self.blocks.iter().map(Vec::len).sum()
    }

    /// Consume the buffer into one contiguous sample sequence
    pub fn into_samples(self) -> Vec<f32> {
        let mut samples = Vec::with_capacity(self.sample_count());
        for block in self.blocks {
            samples.extend_from_slice(&block);
        }
        samples
    }
}

struct Recording<M> {
    stop_flag: Arc<AtomicBool>,
    handle: JoinHandle<(M, Result<()>)>,
    buffer: Arc<SyncMutex<CaptureBuffer>>,
}

struct Inner<M> {
    /// None while the capture task owns it
    mic: Option<M>,
    stream: Option<StreamInfo>,
    recording: Option<Recording<M>>,
}

/// Records microphone audio into WAV clips
pub struct CaptureEngine<M: Microphone> {
    inner: Mutex<Inner<M>>,
    sample_rate: u32,
    block_size: usize,
    state_tx: watch::Sender<CaptureState>,
    events: Option<Arc<EventBus>>,
}

impl<M: Microphone> CaptureEngine<M> {
    pub fn new(mic: M, sample_rate: u32, block_size: usize) -> Self {
        let (state_tx, _) = watch::channel(CaptureState::Uninitialized);
        Self {
            inner: Mutex::new(Inner {
                mic: Some(mic),
                stream: None,
                recording: None,
            }),
            sample_rate,
            block_size,
            state_tx,
            events: None,
        }
    }

    pub fn from_config(mic: M, config: &CaptureConfig) -> Self {
        Self::new(mic, config.sample_rate, config.block_size)
    }

    /// Publish state changes on the event bus
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn state(&self) -> CaptureState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state_tx.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.state() == CaptureState::Recording
    }

    /// Rate the device granted, once opened
    pub async fn stream_info(&self) -> Option<StreamInfo> {
        self.inner.lock().await.stream
    }

    /// Samples captured so far in the current recording
    pub async fn captured_samples(&self) -> usize {
        let inner = self.inner.lock().await;
        inner
            .recording
            .as_ref()
            .map(|r| r.buffer.lock().sample_count())
            .unwrap_or(0)
    }

    /// Acquire the microphone ahead of the first recording
    pub async fn initialize(&self) -> Result<StreamInfo> {
        let mut inner = self.inner.lock().await;
        if inner.recording.is_some() {
            return Err(AppError::InvalidState("capture is recording".into()));
        }
        if let (Some(stream), Some(mic)) = (inner.stream, inner.mic.as_ref()) {
            if mic.is_active() {
                return Ok(stream);
            }
        }
        self.acquire(&mut inner).await
    }

    /// Begin recording into a fresh buffer
    pub async fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.recording.is_some() {
            return Err(AppError::InvalidState("capture already running".into()));
        }

        let live = inner.stream.is_some() && inner.mic.as_ref().is_some_and(|m| m.is_active());
        let stream = if live {
            let stream = inner.stream.ok_or_else(|| {
                AppError::InvalidState("capture stream missing".into())
            })?;
            if let Some(mic) = inner.mic.as_mut() {
                mic.set_enabled(true);
            }
            stream
        } else {
            debug!("Microphone stream inactive, reacquiring");
            self.acquire(&mut inner).await?
        };

        let mut mic = inner
            .mic
            .take()
            .ok_or_else(|| AppError::AudioError("microphone unavailable".into()))?;
        let stop_flag = Arc::new(AtomicBool::new(false));
        let buffer = Arc::new(SyncMutex::new(CaptureBuffer::default()));

        let handle = {
            let stop_flag = stop_flag.clone();
            let buffer = buffer.clone();
            let block_size = stream.block_size;
            tokio::task::spawn_blocking(move || {
                let result = capture_loop(&mut mic, block_size, &stop_flag, &buffer);
                (mic, result)
            })
        };

        inner.recording = Some(Recording {
            stop_flag,
            handle,
            buffer,
        });
        info!("Capture started at {}Hz", stream.sample_rate);
        self.set_state(CaptureState::Recording, None);
        Ok(())
    }

    /// Finish recording and encode everything captured since `start()`
    pub async fn stop(&self) -> Result<EncodedClip> {
        let mut inner = self.inner.lock().await;
        let recording = inner.recording.take().ok_or(AppError::CaptureNotStarted)?;
        let buffer = self.release(&mut inner, recording).await?;

        let sample_rate = inner
            .stream
            .map(|s| s.sample_rate)
            .unwrap_or(self.sample_rate);
        let clip = encode_wav(&buffer.into_samples(), sample_rate)?;
        info!(
            "Capture stopped: {} samples, {:.2}s",
            clip.sample_count(),
            clip.duration().as_secs_f64()
        );
        Ok(clip)
    }

    /// Abort recording and discard captured samples
    pub async fn cancel(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let recording = inner.recording.take().ok_or(AppError::CaptureNotStarted)?;
        let buffer = self.release(&mut inner, recording).await?;
        info!("Capture cancelled, {} samples discarded", buffer.sample_count());
        Ok(())
    }

    async fn acquire(&self, inner: &mut Inner<M>) -> Result<StreamInfo> {
        let mut mic = inner
            .mic
            .take()
            .ok_or_else(|| AppError::AudioError("microphone unavailable".into()))?;
        let (sample_rate, block_size) = (self.sample_rate, self.block_size);

        let (mic, result) = tokio::task::spawn_blocking(move || {
            let result = mic.open(sample_rate, block_size);
            (mic, result)
        })
        .await
        .map_err(|e| AppError::AudioError(format!("microphone open task failed: {}", e)))?;
        inner.mic = Some(mic);

        match result {
            Ok(stream) => {
                inner.stream = Some(stream);
                self.set_state(CaptureState::Ready, None);
                Ok(stream)
            }
            Err(e) => {
                inner.stream = None;
                if matches!(e, AppError::PermissionDenied(_)) {
                    warn!("Microphone access denied: {}", e);
                }
                self.set_state(CaptureState::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop the capture task, give the microphone back and close it
    async fn release(
        &self,
        inner: &mut Inner<M>,
        recording: Recording<M>,
    ) -> Result<CaptureBuffer> {
        recording.stop_flag.store(true, Ordering::SeqCst);
        let joined = recording.handle.await;

        let loop_result = match joined {
            Ok((mut mic, result)) => {
                mic.close();
                inner.mic = Some(mic);
                result
            }
            Err(e) => Err(AppError::AudioError(format!("capture task failed: {}", e))),
        };

        let buffer = std::mem::take(&mut *recording.buffer.lock());
        match loop_result {
            Ok(()) => {
                self.set_state(CaptureState::Ready, None);
                Ok(buffer)
            }
            Err(e) => {
                self.set_state(CaptureState::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    fn set_state(&self, state: CaptureState, error: Option<String>) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed || error.is_some() {
            debug!("Capture state -> {}", state);
            if let Some(events) = &self.events {
                events.publish(SessionEvent::CaptureStateChanged {
                    state: state.to_string(),
                    error,
                });
            }
        }
    }
}

impl<M: Microphone> Drop for CaptureEngine<M> {
    fn drop(&mut self) {
        if let Some(recording) = self.inner.get_mut().recording.as_ref() {
            recording.stop_flag.store(true, Ordering::SeqCst);
        }
    }
}

fn capture_loop<M: Microphone>(
    mic: &mut M,
    block_size: usize,
    stop_flag: &AtomicBool,
    buffer: &SyncMutex<CaptureBuffer>,
) -> Result<()> {
    let mut block = vec![0.0f32; block_size.max(1)];
    while !stop_flag.load(Ordering::Relaxed) {
        match mic.read_block(&mut block)? {
            0 => std::thread::sleep(IDLE_POLL),
            n => buffer.lock().push(&block[..n.min(block.len())]),
        }
    }
    Ok(())
}
