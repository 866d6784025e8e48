//! Frame-addressed ring buffer and the copier that moves transfer units in
//! and out of it.
//!
//! Unlike a FIFO, the ring here is a flat region the client reads and writes
//! at its own pace. The data path only tracks where it is (`Cursor`) and
//! reports when a period boundary has been crossed.

use crate::bus::ChannelDirection;
use crate::codec::Codec;

/// Flat ring storage of `frames * frame_bytes` bytes.
#[derive(Debug, Clone)]
pub struct PcmBuffer {
    data: Vec<u8>,
    frame_bytes: usize,
    period_frames: usize,
}

impl PcmBuffer {
    /// Allocate a zeroed ring. `frame_bytes` and `period_frames` must be
    /// non-zero.
    pub fn new(frames: usize, frame_bytes: usize, period_frames: usize) -> Self {
        debug_assert!(frame_bytes > 0 && period_frames > 0);
        Self {
            data: vec![0; frames * frame_bytes],
            frame_bytes,
            period_frames,
        }
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.frame_bytes
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn period_frames(&self) -> usize {
        self.period_frames
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Write whole frames starting at `frame`, wrapping at the end.
    /// Returns the number of frames written (at most one ring's worth).
    pub fn write_frames(&mut self, frame: usize, src: &[u8]) -> usize {
        let count = (src.len() / self.frame_bytes).min(self.frames());
        let mut written = 0;
        while written < count {
            let pos = (frame + written) % self.frames();
            let run = (self.frames() - pos).min(count - written);
            let dst = pos * self.frame_bytes;
            let src_off = written * self.frame_bytes;
            let len = run * self.frame_bytes;
            self.data[dst..dst + len].copy_from_slice(&src[src_off..src_off + len]);
            written += run;
        }
        count
    }

    /// Read whole frames starting at `frame`, wrapping at the end.
    /// Returns the number of frames read (at most one ring's worth).
    pub fn read_frames(&self, frame: usize, out: &mut [u8]) -> usize {
        let count = (out.len() / self.frame_bytes).min(self.frames());
        let mut read = 0;
        while read < count {
            let pos = (frame + read) % self.frames();
            let run = (self.frames() - pos).min(count - read);
            let src = pos * self.frame_bytes;
            let dst = read * self.frame_bytes;
            let len = run * self.frame_bytes;
            out[dst..dst + len].copy_from_slice(&self.data[src..src + len]);
            read += run;
        }
        count
    }
}

/// Position of the data path inside the ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Frame offset into the ring, always `< ring.frames()`.
    pub buffer_position: usize,
    /// Frames into the current period, always `< ring.period_frames()`.
    pub period_position: usize,
}

impl Cursor {
    pub fn reset(&mut self) {
        *self = Cursor::default();
    }

    /// Move `frames` frames between `unit` and the ring at the current
    /// position, wrapping once at the end of the ring.
    ///
    /// `Tx` reads the ring into the unit, `Rx` writes the unit into the
    /// ring, both through `codec`. Returns `true` when a period boundary was
    /// crossed.
    pub fn copy_frames(
        &mut self,
        ring: &mut PcmBuffer,
        unit: &mut [u8],
        frames: usize,
        codec: Codec,
        direction: ChannelDirection,
    ) -> bool {
        let ring_frames = ring.frames();
        let frame_bytes = ring.frame_bytes();
        debug_assert!(frames <= ring_frames, "unit larger than the ring");
        debug_assert!(unit.len() >= frames * frame_bytes);
        let frames = frames.min(ring_frames);

        let first = (ring_frames - self.buffer_position).min(frames);
        let ring_off = self.buffer_position * frame_bytes;
        let head = first * frame_bytes;
        let tail = (frames - first) * frame_bytes;

        let data = ring.bytes_mut();
        match direction {
            ChannelDirection::Tx => {
                codec.convert(&mut unit[..head], &data[ring_off..ring_off + head]);
                if tail > 0 {
                    codec.convert(&mut unit[head..head + tail], &data[..tail]);
                }
            }
            ChannelDirection::Rx => {
                codec.convert(&mut data[ring_off..ring_off + head], &unit[..head]);
                if tail > 0 {
                    codec.convert(&mut data[..tail], &unit[head..head + tail]);
                }
            }
        }

        self.buffer_position = (self.buffer_position + frames) % ring_frames;
        self.period_position += frames;
        if self.period_position >= ring.period_frames() {
            self.period_position %= ring.period_frames();
            return true;
        }
        false
    }
}
