//! Atomic stream lifecycle state.
//!
//! Written by the PCM client's calls and read by the supply loop and the
//! capture completion path, so it lives in an `AtomicU8` rather than
//! behind a lock.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one stream direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Closed = 0,
    Opened = 1,
    /// Hardware parameters negotiated, ring allocated.
    Configured = 2,
    Prepared = 3,
    Running = 4,
    Stopped = 5,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Opened,
            2 => Self::Configured,
            3 => Self::Prepared,
            4 => Self::Running,
            5 => Self::Stopped,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Opened => write!(f, "opened"),
            Self::Configured => write!(f, "configured"),
            Self::Prepared => write!(f, "prepared"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug)]
pub struct StreamStateCell {
    state: AtomicU8,
}

impl StreamStateCell {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(StreamState::Closed as u8),
        }
    }

    pub fn current(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.current() == StreamState::Running
    }

    /// Closed -> Opened. Fails if the direction is already open.
    pub fn open(&self) -> bool {
        self.transition(StreamState::Closed, StreamState::Opened)
    }

    /// Prepared or Stopped -> Running.
    pub fn start(&self) -> bool {
        self.transition(StreamState::Prepared, StreamState::Running)
            || self.transition(StreamState::Stopped, StreamState::Running)
    }

    /// Running -> Stopped. Returns `false` if the stream was not running.
    pub fn stop(&self) -> bool {
        self.transition(StreamState::Running, StreamState::Stopped)
    }

    /// Unconditional store, used by the owning substream for the
    /// transitions only it can make.
    pub fn set(&self, state: StreamState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: StreamState, to: StreamState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for StreamStateCell {
    fn default() -> Self {
        Self::new()
    }
}
