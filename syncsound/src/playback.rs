//! Playback supply loop.
//!
//! One thread per started playback stream. It sleeps until the stream is
//! running and the bus has a free unit, fills that unit from the ring and
//! hands it back for transmission. Wakes come from `trigger(Start)` and from
//! TX completions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::bus::{BusLayer, ChannelDirection, InterfaceId, TransferUnit};
use crate::channel::{lock, Stream};
use crate::error::{Result, SyncSoundError};
use crate::pcm::PeriodSink;

// ---------------------------------------------------------------------------
// Wait queue
// ---------------------------------------------------------------------------

/// Condition variable keyed on a wake generation.
///
/// A waiter records the generation before evaluating its predicate and only
/// sleeps while the generation is unchanged, so a wake that lands between
/// the evaluation and the sleep is never lost.
#[derive(Debug, Default)]
pub struct WaitQueue {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn wake_all(&self) {
        let mut generation = lock(&self.generation);
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    /// Block until `ready` yields a value. The predicate runs without the
    /// queue lock held.
    pub fn wait_event<T>(&self, mut ready: impl FnMut() -> Option<T>) -> T {
        loop {
            let seen = *lock(&self.generation);
            if let Some(value) = ready() {
                return value;
            }
            let mut generation = lock(&self.generation);
            while *generation == seen {
                generation = self
                    .cond
                    .wait(generation)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Supply loop
// ---------------------------------------------------------------------------

/// Handle to a running supply thread. Dropping it stops and joins the
/// thread.
pub struct SupplyLoop {
    stream: Arc<Stream>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SupplyLoop {
    /// Spawn the supply thread for playback channel `channel` feeding the
    /// bus endpoint `(iface, channel_id)`.
    pub fn spawn(
        channel: usize,
        stream: Arc<Stream>,
        bus: Arc<dyn BusLayer>,
        iface: InterfaceId,
        channel_id: i32,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            channel,
            stream: stream.clone(),
            bus,
            iface,
            channel_id,
            stop: stop.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("most-play{channel}"))
            .spawn(move || worker.run())
            .map_err(|e| {
                SyncSoundError::OutOfResources(format!(
                    "cannot spawn supply loop for channel {channel}: {e}"
                ))
            })?;
        info!(channel, %iface, channel_id, "Supply loop started");
        Ok(Self {
            stream,
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.handle.is_none()
    }

    /// Request termination and wait for the thread to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.stream.wait_queue.wake_all();
        if handle.join().is_err() {
            error!("Supply loop thread panicked");
        } else {
            debug!("Supply loop joined");
        }
    }
}

impl Drop for SupplyLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    channel: usize,
    stream: Arc<Stream>,
    bus: Arc<dyn BusLayer>,
    iface: InterfaceId,
    channel_id: i32,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        while let Some(mut unit) = self.next_unit() {
            let sink = self.fill(&mut unit);
            self.bus.submit_unit(unit);
            if let Some(sink) = sink {
                sink.period_elapsed(self.channel, ChannelDirection::Tx);
            }
        }
        debug!(channel = self.channel, "Supply loop exiting");
    }

    /// Sleep until stop is requested (`None`) or the stream is running and
    /// the bus has a unit to spare.
    fn next_unit(&self) -> Option<TransferUnit> {
        self.stream.wait_queue.wait_event(|| {
            if self.stop.load(Ordering::Acquire) {
                return Some(None);
            }
            if !self.stream.is_running() {
                return None;
            }
            self.bus
                .acquire_unit(self.iface, self.channel_id)
                .map(Some)
        })
    }

    /// Copy one unit's worth of frames from the ring. A unit acquired while
    /// the stream stopped goes out as silence. Returns the sink to notify
    /// if a period elapsed.
    fn fill(&self, unit: &mut TransferUnit) -> Option<Arc<dyn PeriodSink>> {
        let mut transport = lock(&self.stream.transport);
        match transport.as_mut() {
            Some(t) if self.stream.is_running() => {
                let elapsed = t.fill_unit(&mut unit.buffer);
                self.stream.publish_position(t.cursor.buffer_position);
                elapsed.then(|| t.sink.clone())
            }
            _ => {
                unit.buffer.fill(0);
                None
            }
        }
    }
}
