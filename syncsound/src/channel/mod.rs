//! Logical channels and their per-direction stream state.
//!
//! A [`Channel`] is one PCM device (`MLB_SYNC<n>`). Its capture (`Rx`) and
//! playback (`Tx`) halves are fully independent [`Stream`]s, each optionally
//! bound to a bus endpoint.

pub mod attrs;
pub mod registry;
pub mod state;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::bus::{BusChannelConfig, ChannelDirection, InterfaceId};
use crate::codec::Codec;
use crate::pcm::{Cursor, PcmHardware, PeriodSink, SharedPcmBuffer};
use crate::playback::WaitQueue;

pub use attrs::{Attribute, Tunables};
pub use registry::Registry;
pub use state::{StreamState, StreamStateCell};

/// Association of one stream direction with a bus endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub iface: InterfaceId,
    pub channel_id: i32,
    pub config: BusChannelConfig,
}

/// Data-path state installed by `prepare` and torn down by `close`.
pub(crate) struct Transport {
    pub ring: SharedPcmBuffer,
    pub cursor: Cursor,
    pub codec: Codec,
    pub frame_bytes: usize,
    pub sink: Arc<dyn PeriodSink>,
}

impl Transport {
    /// Fill a playback unit from the ring. Capacity that does not form a
    /// whole frame is zeroed. Returns `true` on a period boundary.
    pub fn fill_unit(&mut self, unit: &mut [u8]) -> bool {
        let mut ring = lock(&self.ring);
        let frames = (unit.len() / self.frame_bytes).min(ring.frames());
        let used = frames * self.frame_bytes;
        let elapsed = self
            .cursor
            .copy_frames(&mut ring, unit, frames, self.codec, ChannelDirection::Tx);
        unit[used..].fill(0);
        elapsed
    }

    /// Copy the filled part of a capture unit into the ring.
    pub fn drain_unit(&mut self, unit: &mut [u8], processed_length: usize) -> bool {
        let mut ring = lock(&self.ring);
        let filled = processed_length.min(unit.len());
        let frames = (filled / self.frame_bytes).min(ring.frames());
        self.cursor
            .copy_frames(&mut ring, unit, frames, self.codec, ChannelDirection::Rx)
    }
}

/// One direction of a channel.
pub struct Stream {
    pub(crate) direction: ChannelDirection,
    binding: RwLock<Option<Binding>>,
    pub(crate) state: StreamStateCell,
    /// Set once the bus channel was started successfully.
    pub(crate) started: AtomicBool,
    pub(crate) transport: Mutex<Option<Transport>>,
    /// Ring position published after every copy; read without locking.
    position: AtomicUsize,
    /// Wakes the playback supply loop.
    pub(crate) wait_queue: WaitQueue,
}

impl Stream {
    fn new(direction: ChannelDirection) -> Self {
        Self {
            direction,
            binding: RwLock::new(None),
            state: StreamStateCell::new(),
            started: AtomicBool::new(false),
            transport: Mutex::new(None),
            position: AtomicUsize::new(0),
            wait_queue: WaitQueue::new(),
        }
    }

    pub fn direction(&self) -> ChannelDirection {
        self.direction
    }

    pub fn state(&self) -> StreamState {
        self.state.current()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// `(iface, channel_id)` of the current binding.
    pub fn endpoint(&self) -> Option<(InterfaceId, i32)> {
        self.binding
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|b| (b.iface, b.channel_id))
    }

    /// Current ring position. Never takes the transport or ring lock, so a
    /// client may ask while holding the ring.
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Acquire)
    }

    pub(crate) fn publish_position(&self, frames: usize) {
        self.position.store(frames, Ordering::Release);
    }

    pub(crate) fn set_binding(&self, binding: Option<Binding>) -> Option<Binding> {
        let mut guard = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, binding)
    }

    /// Apply `f` to the bound configuration, if any.
    pub(crate) fn update_config(&self, f: impl FnOnce(&mut BusChannelConfig)) -> Option<Binding> {
        let mut guard = self.binding.write().unwrap_or_else(PoisonError::into_inner);
        let binding = guard.as_mut()?;
        f(&mut binding.config);
        Some(binding.clone())
    }
}

/// One PCM device with a capture and a playback half.
pub struct Channel {
    id: usize,
    name: String,
    hardware: PcmHardware,
    pub(crate) tunables: Tunables,
    rx: Arc<Stream>,
    tx: Arc<Stream>,
}

impl Channel {
    pub fn new(id: usize, hardware: PcmHardware, tunables: Tunables) -> Self {
        Self {
            id,
            name: format!("MLB_SYNC{id}"),
            hardware,
            tunables,
            rx: Arc::new(Stream::new(ChannelDirection::Rx)),
            tx: Arc::new(Stream::new(ChannelDirection::Tx)),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Envelope template before narrowing to a bound bus channel.
    pub fn hardware(&self) -> &PcmHardware {
        &self.hardware
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    pub fn stream(&self, direction: ChannelDirection) -> &Arc<Stream> {
        match direction {
            ChannelDirection::Rx => &self.rx,
            ChannelDirection::Tx => &self.tx,
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
