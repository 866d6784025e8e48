//! Bus completion handling.
//!
//! Capture units are drained into the ring and always handed back to the
//! bus before anyone is told a period elapsed. TX completions only wake the
//! playback supply loop.

use tracing::{trace, warn};

use crate::bus::{BusLayer, ChannelDirection, InterfaceId, TransferUnit};
use crate::channel::{lock, Registry};
use crate::error::{Result, SyncSoundError};

pub(crate) fn on_rx_complete(registry: &Registry, bus: &dyn BusLayer, mut unit: TransferUnit) -> Result<()> {
    let (iface, channel_id) = (unit.iface, unit.channel_id);
    let Some(channel) = registry.lookup(iface, channel_id, ChannelDirection::Rx) else {
        warn!(%iface, channel_id, "Capture unit for unbound channel");
        bus.release_unit(unit);
        return Err(SyncSoundError::InvalidChannel { iface, channel_id });
    };

    let stream = channel.stream(ChannelDirection::Rx);
    let sink = {
        let mut transport = lock(&stream.transport);
        match transport.as_mut() {
            Some(t) if stream.is_running() => {
                let elapsed = t.drain_unit(&mut unit.buffer, unit.processed_length);
                stream.publish_position(t.cursor.buffer_position);
                elapsed.then(|| t.sink.clone())
            }
            _ => None,
        }
    };
    bus.release_unit(unit);

    if let Some(sink) = sink {
        trace!(channel = channel.id(), "Capture period elapsed");
        sink.period_elapsed(channel.id(), ChannelDirection::Rx);
    }
    Ok(())
}

pub(crate) fn on_tx_slot_free(registry: &Registry, iface: InterfaceId, channel_id: i32) -> Result<()> {
    let channel = registry
        .lookup(iface, channel_id, ChannelDirection::Tx)
        .ok_or(SyncSoundError::InvalidChannel { iface, channel_id })?;
    channel.stream(ChannelDirection::Tx).wait_queue.wake_all();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use crate::bus::{BusChannelConfig, BusError};
    use crate::channel::{Binding, Channel, StreamState, Transport, Tunables};
    use crate::codec::Codec;
    use crate::pcm::{Cursor, PcmBuffer, PcmHardware};

    #[derive(Default)]
    struct CountingBus {
        released: AtomicUsize,
    }

    impl BusLayer for CountingBus {
        fn acquire_unit(&self, _: InterfaceId, _: i32) -> Option<TransferUnit> {
            None
        }
        fn submit_unit(&self, _: TransferUnit) {}
        fn release_unit(&self, _: TransferUnit) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
        fn start_channel(&self, _: InterfaceId, _: i32, _: &BusChannelConfig) -> std::result::Result<(), BusError> {
            Ok(())
        }
        fn stop_channel(&self, _: InterfaceId, _: i32) {}
    }

    /// Registry with channel 0 capturing from `(iface0, 3)` into an 8-frame
    /// ring of 2-byte frames, period 4.
    fn capture_registry(periods: Arc<AtomicUsize>) -> Registry {
        let registry = Registry::new(vec![Channel::new(0, PcmHardware::default(), Tunables::default())]);
        registry
            .bind(
                0,
                Binding {
                    iface: InterfaceId(0),
                    channel_id: 3,
                    config: BusChannelConfig::sync(ChannelDirection::Rx, 4, 8),
                },
            )
            .unwrap();
        let stream = registry.get(0).unwrap().stream(ChannelDirection::Rx);
        *lock(&stream.transport) = Some(Transport {
            ring: Arc::new(Mutex::new(PcmBuffer::new(8, 2, 4))),
            cursor: Cursor::default(),
            codec: Codec::Copy,
            frame_bytes: 2,
            sink: Arc::new(move |_: usize, _: ChannelDirection| {
                periods.fetch_add(1, Ordering::SeqCst);
            }),
        });
        stream.state.set(StreamState::Running);
        registry
    }

    fn unit(channel_id: i32, fill: u8, processed: usize) -> TransferUnit {
        let mut unit = TransferUnit::new(InterfaceId(0), channel_id, 8);
        unit.buffer.fill(fill);
        unit.processed_length = processed;
        unit
    }

    #[test]
    fn test_one_period_fires_once() {
        let periods = Arc::new(AtomicUsize::new(0));
        let registry = capture_registry(periods.clone());
        let bus = CountingBus::default();

        on_rx_complete(&registry, &bus, unit(3, 0x42, 8)).unwrap();

        assert_eq!(periods.load(Ordering::SeqCst), 1);
        assert_eq!(bus.released.load(Ordering::SeqCst), 1);
        let stream = registry.get(0).unwrap().stream(ChannelDirection::Rx);
        let transport = lock(&stream.transport);
        let t = transport.as_ref().unwrap();
        assert_eq!(t.cursor.buffer_position, 4);
        assert_eq!(t.cursor.period_position, 0);
        assert_eq!(&lock(&t.ring).bytes()[..8], &[0x42; 8]);
    }

    #[test]
    fn test_not_running_still_releases() {
        let periods = Arc::new(AtomicUsize::new(0));
        let registry = capture_registry(periods.clone());
        let bus = CountingBus::default();
        let stream = registry.get(0).unwrap().stream(ChannelDirection::Rx);
        stream.state.set(StreamState::Stopped);

        on_rx_complete(&registry, &bus, unit(3, 0x42, 8)).unwrap();

        assert_eq!(bus.released.load(Ordering::SeqCst), 1);
        assert_eq!(periods.load(Ordering::SeqCst), 0);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn test_unknown_endpoint_releases_and_fails() {
        let registry = capture_registry(Arc::new(AtomicUsize::new(0)));
        let bus = CountingBus::default();
        let err = on_rx_complete(&registry, &bus, unit(9, 0, 8)).unwrap_err();
        assert_eq!(
            err,
            SyncSoundError::InvalidChannel {
                iface: InterfaceId(0),
                channel_id: 9
            }
        );
        assert_eq!(bus.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_tx_slot_free_requires_playback_binding() {
        let registry = capture_registry(Arc::new(AtomicUsize::new(0)));
        // (iface0, 3) is bound for capture only.
        assert!(on_tx_slot_free(&registry, InterfaceId(0), 3).is_err());
    }
}
