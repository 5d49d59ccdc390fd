//! Capture pipeline through the public API

use std::sync::Arc;
use std::time::Duration;

use avatar_session::audio::{
    CaptureEngine, CaptureState, Microphone, StreamInfo, WavHeader, WAV_HEADER_LEN,
};
use avatar_session::events::{EventBus, SessionEvent};
use avatar_session::Result;

/// Delivers a ramp in fixed blocks until `blocks` have been read
struct RampMicrophone {
    blocks: usize,
    read: usize,
    open: bool,
}

impl RampMicrophone {
    fn new(blocks: usize) -> Self {
        Self {
            blocks,
            read: 0,
            open: false,
        }
    }
}

impl Microphone for RampMicrophone {
    fn open(&mut self, sample_rate: u32, block_size: usize) -> Result<StreamInfo> {
        self.open = true;
        self.read = 0;
        Ok(StreamInfo {
            sample_rate,
            block_size,
        })
    }

    fn read_block(&mut self, buf: &mut [f32]) -> Result<usize> {
        if self.read == self.blocks {
            return Ok(0);
        }
        self.read += 1;
        let len = buf.len() as f32;
        for (i, sample) in buf.iter_mut().enumerate() {
            *sample = (i as f32 / len) * 3.0 - 1.5;
        }
        Ok(buf.len())
    }

    fn is_active(&self) -> bool {
        self.open
    }

    fn set_enabled(&mut self, _enabled: bool) {}

    fn close(&mut self) {
        self.open = false;
    }
}

#[tokio::test]
async fn test_three_blocks_at_16khz() {
    let events = Arc::new(EventBus::new());
    let mut rx = events.subscribe();
    let engine = CaptureEngine::new(RampMicrophone::new(3), 16_000, 4096).with_events(events);

    engine.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while engine.captured_samples().await < 3 * 4096 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    let clip = engine.stop().await.unwrap();

    let bytes = clip.to_bytes();
    assert_eq!(bytes.len(), 44 + 2 * 12288);
    let header = WavHeader::parse(&bytes).unwrap();
    assert_eq!(header.sample_rate, 16_000);
    assert_eq!(header.channels, 1);
    assert_eq!(header.bits_per_sample, 16);

    // ramp runs from -1.5 to just under 1.5, so both ends are clipped
    let first = i16::from_le_bytes([bytes[WAV_HEADER_LEN], bytes[WAV_HEADER_LEN + 1]]);
    assert_eq!(first, -32768);
    assert_eq!(*clip.samples().iter().max().unwrap(), 32767);

    let mut states = Vec::new();
    while let Ok(SessionEvent::CaptureStateChanged { state, .. }) = rx.try_recv() {
        states.push(state);
    }
    assert_eq!(states, vec!["ready", "recording", "ready"]);
    assert_eq!(engine.state(), CaptureState::Ready);
}
