//! Client-facing PCM types: hardware envelope, negotiated parameters,
//! the shared ring buffer and the period notification sink.

pub mod hardware;
pub mod ring;

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::bus::ChannelDirection;
use crate::codec::SampleFormat;

pub use hardware::{PcmHardware, MAX_PERIOD_SIZE, SAMPLE_RATE};
pub use ring::{Cursor, PcmBuffer};

/// Ring buffer shared between the PCM client and the data path.
pub type SharedPcmBuffer = Arc<Mutex<PcmBuffer>>;

/// Parameters the client negotiates before preparing a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwParams {
    pub format: SampleFormat,
    pub channels: u32,
    pub rate: u32,
    pub period_frames: usize,
    pub periods: u32,
}

impl HwParams {
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.channels)
    }

    pub fn period_bytes(&self) -> usize {
        self.period_frames * self.frame_bytes()
    }

    pub fn buffer_frames(&self) -> usize {
        self.period_frames * self.periods as usize
    }

    pub fn buffer_bytes(&self) -> usize {
        self.period_bytes() * self.periods as usize
    }
}

/// Client commands accepted by `trigger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCommand {
    Start,
    Stop,
}

/// Receives a notification each time a stream crosses a period boundary.
///
/// Called from the supply loop thread (playback) or the bus completion
/// context (capture), never while crate-internal locks are held, so the
/// sink may call back into `Substream::pointer`.
pub trait PeriodSink: Send + Sync {
    fn period_elapsed(&self, channel: usize, direction: ChannelDirection);
}

impl<F> PeriodSink for F
where
    F: Fn(usize, ChannelDirection) + Send + Sync,
{
    fn period_elapsed(&self, channel: usize, direction: ChannelDirection) {
        self(channel, direction)
    }
}
