//! Deterministic in-process bus.
//!
//! Each started endpoint gets a pool of `num_buffers` units of
//! `buffer_size` bytes. Nothing moves on its own: every [`VirtualBus::tick`]
//! transmits what playback submitted, delivers pending capture data and
//! fires the matching completions on the client. A TX endpoint can be
//! looped back into an RX endpoint, which is how the simulator and the
//! integration tests move audio end to end.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::{BusChannelConfig, BusClient, BusError, BusLayer, ChannelDirection, InterfaceId, TransferUnit};

/// Transmitted units kept per endpoint for inspection.
const TRANSMIT_LOG_DEPTH: usize = 256;

type Key = (InterfaceId, i32);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EndpointStats {
    pub running: bool,
    pub free_units: usize,
    pub submitted: u64,
    pub delivered: u64,
    pub released: u64,
}

struct Endpoint {
    config: BusChannelConfig,
    running: bool,
    free: Vec<TransferUnit>,
    submitted: VecDeque<TransferUnit>,
    /// Capture bytes waiting for a free unit.
    pending_rx: VecDeque<u8>,
    transmitted: VecDeque<Vec<u8>>,
    stats: EndpointStats,
}

impl Endpoint {
    fn new(key: Key, config: BusChannelConfig) -> Self {
        let capacity = config.buffer_size as usize;
        let free = (0..config.num_buffers)
            .map(|_| TransferUnit::new(key.0, key.1, capacity))
            .collect();
        Self {
            config,
            running: true,
            free,
            submitted: VecDeque::new(),
            pending_rx: VecDeque::new(),
            transmitted: VecDeque::new(),
            stats: EndpointStats::default(),
        }
    }
}

#[derive(Default)]
struct Inner {
    endpoints: BTreeMap<Key, Endpoint>,
    loopback: BTreeMap<Key, Key>,
    fail_start: BTreeSet<Key>,
    starts: usize,
    stops: usize,
}

/// Completions fired by one [`VirtualBus::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub transmitted: usize,
    pub received: usize,
}

#[derive(Default)]
pub struct VirtualBus {
    inner: Mutex<Inner>,
}

impl VirtualBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Route everything transmitted on `tx` into the capture queue of `rx`.
    pub fn set_loopback(&self, tx: Key, rx: Key) {
        self.inner().loopback.insert(tx, rx);
    }

    pub fn clear_loopback(&self, tx: Key) {
        self.inner().loopback.remove(&tx);
    }

    /// Make `start_channel` fail for this endpoint until cleared.
    pub fn set_start_failure(&self, key: Key, fail: bool) {
        let mut inner = self.inner();
        if fail {
            inner.fail_start.insert(key);
        } else {
            inner.fail_start.remove(&key);
        }
    }

    /// Queue capture data for a running RX endpoint. Returns `false` if the
    /// endpoint is not running.
    pub fn inject_rx(&self, key: Key, data: &[u8]) -> bool {
        match self.inner().endpoints.get_mut(&key) {
            Some(ep) if ep.running && ep.config.direction == ChannelDirection::Rx => {
                ep.pending_rx.extend(data.iter().copied());
                true
            }
            _ => false,
        }
    }

    /// Drain the log of units transmitted on a TX endpoint.
    pub fn take_transmitted(&self, key: Key) -> Vec<Vec<u8>> {
        self.inner()
            .endpoints
            .get_mut(&key)
            .map(|ep| ep.transmitted.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self, key: Key) -> Option<EndpointStats> {
        self.inner().endpoints.get(&key).map(|ep| EndpointStats {
            running: ep.running,
            free_units: ep.free.len(),
            ..ep.stats
        })
    }

    /// Configuration an endpoint was last started with.
    pub fn config(&self, key: Key) -> Option<BusChannelConfig> {
        self.inner().endpoints.get(&key).map(|ep| ep.config.clone())
    }

    pub fn start_count(&self) -> usize {
        self.inner().starts
    }

    pub fn stop_count(&self) -> usize {
        self.inner().stops
    }

    /// Run one transfer round: transmit submitted playback units, deliver
    /// queued capture data, then invoke the client's completions with the
    /// bus lock released.
    pub fn tick(&self, client: &dyn BusClient) -> TickReport {
        let mut tx_done: Vec<Key> = Vec::new();
        let mut rx_units: Vec<TransferUnit> = Vec::new();
        {
            let mut guard = self.inner();
            let inner = &mut *guard;

            let mut looped: Vec<(Key, Vec<u8>)> = Vec::new();
            for (key, ep) in inner.endpoints.iter_mut() {
                while let Some(unit) = ep.submitted.pop_front() {
                    if let Some(target) = inner.loopback.get(key) {
                        looped.push((*target, unit.buffer.clone()));
                    }
                    if ep.transmitted.len() == TRANSMIT_LOG_DEPTH {
                        ep.transmitted.pop_front();
                    }
                    ep.transmitted.push_back(unit.buffer.clone());
                    ep.free.push(unit);
                    tx_done.push(*key);
                }
            }
            for (target, data) in looped {
                match inner.endpoints.get_mut(&target) {
                    Some(ep) if ep.running => ep.pending_rx.extend(data),
                    _ => trace!(iface = %target.0, channel_id = target.1, "Loopback target not running"),
                }
            }

            for ep in inner.endpoints.values_mut() {
                if !ep.running || ep.config.direction != ChannelDirection::Rx {
                    continue;
                }
                while !ep.pending_rx.is_empty() {
                    let Some(mut unit) = ep.free.pop() else {
                        break;
                    };
                    let len = unit.capacity().min(ep.pending_rx.len());
                    for (dst, src) in unit.buffer.iter_mut().zip(ep.pending_rx.drain(..len)) {
                        *dst = src;
                    }
                    unit.processed_length = len;
                    ep.stats.delivered += 1;
                    rx_units.push(unit);
                }
            }
        }

        let report = TickReport {
            transmitted: tx_done.len(),
            received: rx_units.len(),
        };
        for (iface, channel_id) in tx_done {
            if let Err(e) = client.tx_completion(iface, channel_id) {
                debug!(%iface, channel_id, error = %e, "TX completion rejected");
            }
        }
        for unit in rx_units {
            let (iface, channel_id) = (unit.iface, unit.channel_id);
            if let Err(e) = client.rx_completion(unit) {
                debug!(%iface, channel_id, error = %e, "RX completion rejected");
            }
        }
        report
    }
}

impl BusLayer for VirtualBus {
    fn acquire_unit(&self, iface: InterfaceId, channel_id: i32) -> Option<TransferUnit> {
        let mut inner = self.inner();
        let ep = inner.endpoints.get_mut(&(iface, channel_id))?;
        if !ep.running || ep.config.direction != ChannelDirection::Tx {
            return None;
        }
        ep.free.pop()
    }

    fn submit_unit(&self, unit: TransferUnit) {
        let key = (unit.iface, unit.channel_id);
        match self.inner().endpoints.get_mut(&key) {
            Some(ep) => {
                ep.stats.submitted += 1;
                ep.submitted.push_back(unit);
            }
            None => warn!(iface = %key.0, channel_id = key.1, "Unit submitted to stopped endpoint"),
        }
    }

    fn release_unit(&self, unit: TransferUnit) {
        let key = (unit.iface, unit.channel_id);
        if let Some(ep) = self.inner().endpoints.get_mut(&key) {
            ep.stats.released += 1;
            // Units from before a restart only return if they still fit.
            if unit.capacity() == ep.config.buffer_size as usize
                && ep.free.len() < ep.config.num_buffers as usize
            {
                let mut unit = unit;
                unit.processed_length = 0;
                ep.free.push(unit);
            }
        }
    }

    fn start_channel(
        &self,
        iface: InterfaceId,
        channel_id: i32,
        config: &BusChannelConfig,
    ) -> Result<(), BusError> {
        let key = (iface, channel_id);
        let mut inner = self.inner();
        if inner.fail_start.contains(&key) {
            return Err(BusError::StartFailed {
                iface,
                channel_id,
                reason: "start failure injected".to_string(),
            });
        }
        if config.num_buffers == 0 || config.buffer_size == 0 {
            return Err(BusError::StartFailed {
                iface,
                channel_id,
                reason: "empty unit pool".to_string(),
            });
        }
        inner.endpoints.insert(key, Endpoint::new(key, config.clone()));
        inner.starts += 1;
        debug!(
            %iface,
            channel_id,
            direction = %config.direction,
            units = config.num_buffers,
            unit_bytes = config.buffer_size,
            "Bus channel started"
        );
        Ok(())
    }

    fn stop_channel(&self, iface: InterfaceId, channel_id: i32) {
        let mut inner = self.inner();
        if inner.endpoints.remove(&(iface, channel_id)).is_some() {
            inner.stops += 1;
            debug!(%iface, channel_id, "Bus channel stopped");
        }
    }
}
