//! Client-side session on one stream direction.
//!
//! A [`Substream`] is what `open` hands out. It walks the stream through
//! `hw_params`, `prepare` and `trigger`, owns the ring and the playback
//! supply loop, and undoes everything on `close` or drop.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::bus::{BusLayer, ChannelDirection, InterfaceId};
use crate::channel::attrs::UNSET;
use crate::channel::{lock, Channel, Stream, StreamState, Transport};
use crate::codec::Codec;
use crate::error::{Result, SyncSoundError};
use crate::pcm::{Cursor, HwParams, PcmBuffer, PcmHardware, PeriodSink, SharedPcmBuffer, TriggerCommand};
use crate::playback::SupplyLoop;

pub struct Substream {
    channel: Arc<Channel>,
    stream: Arc<Stream>,
    bus: Arc<dyn BusLayer>,
    sink: Arc<dyn PeriodSink>,
    hardware: PcmHardware,
    params: Option<HwParams>,
    ring: Option<SharedPcmBuffer>,
    supply: Option<SupplyLoop>,
    /// Endpoint the bus channel was started on. Kept so close can stop it
    /// even after a disconnect cleared the binding.
    active: Option<(InterfaceId, i32)>,
    closed: bool,
}

impl Substream {
    pub(crate) fn open(
        channel: Arc<Channel>,
        direction: ChannelDirection,
        bus: Arc<dyn BusLayer>,
        sink: Arc<dyn PeriodSink>,
    ) -> Result<Self> {
        let stream = channel.stream(direction).clone();
        let binding = stream.binding().ok_or(SyncSoundError::NotConnected {
            channel: channel.id(),
            direction,
        })?;
        if !stream.state.open() {
            return Err(SyncSoundError::DeviceBusy(format!(
                "{} {} is already open",
                channel.name(),
                direction
            )));
        }
        let hardware = channel
            .hardware()
            .for_bus_channel(channel.tunables().buffer_size(), binding.config.num_buffers);
        info!(
            channel = channel.id(),
            %direction,
            iface = %binding.iface,
            channel_id = binding.channel_id,
            "Substream opened"
        );
        Ok(Self {
            channel,
            stream,
            bus,
            sink,
            hardware,
            params: None,
            ring: None,
            supply: None,
            active: None,
            closed: false,
        })
    }

    pub fn channel(&self) -> usize {
        self.channel.id()
    }

    pub fn direction(&self) -> ChannelDirection {
        self.stream.direction()
    }

    /// Envelope `hw_params` is checked against.
    pub fn hardware(&self) -> &PcmHardware {
        &self.hardware
    }

    pub fn params(&self) -> Option<HwParams> {
        self.params
    }

    pub fn state(&self) -> StreamState {
        self.stream.state()
    }

    /// Ring shared with the client, present between `hw_params` and
    /// `hw_free`.
    pub fn buffer(&self) -> Option<SharedPcmBuffer> {
        self.ring.clone()
    }

    /// Current frame offset of the data path into the ring.
    pub fn pointer(&self) -> usize {
        self.stream.position()
    }

    pub fn hw_params(&mut self, params: HwParams) -> Result<()> {
        if self.stream.is_running() {
            return Err(SyncSoundError::DeviceBusy(format!(
                "{} {} is running",
                self.channel.name(),
                self.direction()
            )));
        }
        self.hardware.validate(&params)?;
        self.teardown();
        // The previous configuration is gone even if the rewrite below fails.
        self.ring = None;
        self.params = None;
        self.stream.state.set(StreamState::Opened);

        let frame_bytes = params.frame_bytes();
        let period_bytes = params.period_bytes();
        let packets_per_xact = self.channel.tunables().packets_per_xact();
        let binding = self
            .stream
            .update_config(|config| {
                if packets_per_xact != UNSET {
                    config.packets_per_xact = packets_per_xact;
                }
                config.subbuffer_size = frame_bytes as u32;
                config.buffer_size = period_bytes as u32;
            })
            .ok_or(SyncSoundError::NotConnected {
                channel: self.channel.id(),
                direction: self.direction(),
            })?;
        debug!(
            channel = self.channel.id(),
            subbuffer_size = binding.config.subbuffer_size,
            buffer_size = binding.config.buffer_size,
            packets_per_xact = binding.config.packets_per_xact,
            "Bus channel configured"
        );

        self.ring = Some(Arc::new(Mutex::new(PcmBuffer::new(
            params.buffer_frames(),
            frame_bytes,
            params.period_frames,
        ))));
        self.params = Some(params);
        self.stream.state.set(StreamState::Configured);
        Ok(())
    }

    /// Release the ring allocated by `hw_params`.
    pub fn hw_free(&mut self) -> Result<()> {
        self.teardown();
        self.ring = None;
        self.params = None;
        self.stream.state.set(StreamState::Opened);
        Ok(())
    }

    pub fn prepare(&mut self) -> Result<()> {
        let (Some(params), Some(ring)) = (self.params, self.ring.clone()) else {
            return Err(SyncSoundError::InvalidParameter(
                "prepare before hw_params".to_string(),
            ));
        };
        let codec = Codec::for_format(params.format)?;
        self.teardown();
        self.stream.state.set(StreamState::Configured);

        let binding = self.stream.binding().ok_or(SyncSoundError::NotConnected {
            channel: self.channel.id(),
            direction: self.direction(),
        })?;
        *lock(&self.stream.transport) = Some(Transport {
            ring,
            cursor: Cursor::default(),
            codec,
            frame_bytes: params.frame_bytes(),
            sink: self.sink.clone(),
        });

        if self.direction().is_playback() {
            let supply = SupplyLoop::spawn(
                self.channel.id(),
                self.stream.clone(),
                self.bus.clone(),
                binding.iface,
                binding.channel_id,
            );
            match supply {
                Ok(supply) => self.supply = Some(supply),
                Err(e) => {
                    *lock(&self.stream.transport) = None;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self
            .bus
            .start_channel(binding.iface, binding.channel_id, &binding.config)
        {
            error!(channel = self.channel.id(), error = %e, "Bus channel start failed");
            if let Some(mut supply) = self.supply.take() {
                supply.stop();
            }
            *lock(&self.stream.transport) = None;
            return Err(SyncSoundError::DeviceBusy(e.to_string()));
        }

        self.stream.started.store(true, Ordering::Release);
        self.active = Some((binding.iface, binding.channel_id));
        self.stream.state.set(StreamState::Prepared);
        info!(channel = self.channel.id(), direction = %self.direction(), ?codec, "Substream prepared");
        Ok(())
    }

    pub fn trigger(&self, command: TriggerCommand) -> Result<()> {
        match command {
            TriggerCommand::Start => {
                if !self.stream.is_bound() {
                    return Err(SyncSoundError::NotConnected {
                        channel: self.channel.id(),
                        direction: self.direction(),
                    });
                }
                if !self.stream.state.start() {
                    return Err(SyncSoundError::InvalidParameter(format!(
                        "cannot start a {} stream",
                        self.stream.state()
                    )));
                }
                self.stream.wait_queue.wake_all();
                debug!(channel = self.channel.id(), direction = %self.direction(), "Stream started");
            }
            TriggerCommand::Stop => {
                if self.stream.state.stop() {
                    debug!(channel = self.channel.id(), direction = %self.direction(), "Stream stopped");
                }
            }
        }
        Ok(())
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    /// Stop the supply loop, then the bus channel it fed.
    fn teardown(&mut self) {
        if let Some(mut supply) = self.supply.take() {
            supply.stop();
        }
        let active = self.active.take();
        if self.stream.started.swap(false, Ordering::AcqRel) {
            if let Some((iface, channel_id)) = active {
                self.bus.stop_channel(iface, channel_id);
            }
        }
        *lock(&self.stream.transport) = None;
        self.stream.publish_position(0);
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.teardown();
        self.ring = None;
        self.params = None;
        self.stream.state.set(StreamState::Closed);
        info!(channel = self.channel.id(), direction = %self.direction(), "Substream closed");
    }
}

impl Drop for Substream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{BusChannelConfig, VirtualBus};
    use crate::channel::{Binding, Tunables};
    use crate::codec::SampleFormat;
    use crate::pcm::SAMPLE_RATE;

    fn bound_channel(direction: ChannelDirection) -> Arc<Channel> {
        let channel = Arc::new(Channel::new(0, PcmHardware::default(), Tunables::default()));
        channel.stream(direction).set_binding(Some(Binding {
            iface: InterfaceId(0),
            channel_id: 2,
            config: BusChannelConfig::sync(direction, 4, 512),
        }));
        channel
    }

    fn open(channel: &Arc<Channel>, direction: ChannelDirection, bus: Arc<VirtualBus>) -> Result<Substream> {
        Substream::open(
            channel.clone(),
            direction,
            bus,
            Arc::new(|_: usize, _: ChannelDirection| {}),
        )
    }

    fn params(channels: u32) -> HwParams {
        HwParams {
            format: SampleFormat::S16_LE,
            channels,
            rate: SAMPLE_RATE,
            period_frames: 64,
            periods: 4,
        }
    }

    #[test]
    fn test_open_unbound_fails() {
        let channel = Arc::new(Channel::new(0, PcmHardware::default(), Tunables::default()));
        let err = open(&channel, ChannelDirection::Tx, Arc::new(VirtualBus::new())).err();
        assert_eq!(
            err,
            Some(SyncSoundError::NotConnected {
                channel: 0,
                direction: ChannelDirection::Tx
            })
        );
    }

    #[test]
    fn test_open_twice_is_busy() {
        let channel = bound_channel(ChannelDirection::Rx);
        let bus = Arc::new(VirtualBus::new());
        let first = open(&channel, ChannelDirection::Rx, bus.clone()).unwrap();
        assert!(matches!(
            open(&channel, ChannelDirection::Rx, bus.clone()),
            Err(SyncSoundError::DeviceBusy(_))
        ));
        first.close();
        assert!(open(&channel, ChannelDirection::Rx, bus).is_ok());
    }

    #[test]
    fn test_hw_params_rewrites_bus_config() {
        let channel = bound_channel(ChannelDirection::Tx);
        channel.tunables().set_packets_per_xact(128);
        let mut sub = open(&channel, ChannelDirection::Tx, Arc::new(VirtualBus::new())).unwrap();
        sub.hw_params(params(2)).unwrap();

        let config = channel.stream(ChannelDirection::Tx).binding().unwrap().config;
        assert_eq!(config.subbuffer_size, 4);
        assert_eq!(config.buffer_size, 256);
        assert_eq!(config.packets_per_xact, 128);
        let ring = sub.buffer().unwrap();
        assert_eq!(lock(&ring).frames(), 256);
        assert_eq!(sub.state(), StreamState::Configured);
    }

    #[test]
    fn test_unset_packets_keeps_bus_value() {
        let channel = bound_channel(ChannelDirection::Tx);
        channel.tunables().set_packets_per_xact(UNSET);
        let mut sub = open(&channel, ChannelDirection::Tx, Arc::new(VirtualBus::new())).unwrap();
        sub.hw_params(params(1)).unwrap();
        let config = channel.stream(ChannelDirection::Tx).binding().unwrap().config;
        assert_eq!(config.packets_per_xact, 255);
    }

    #[test]
    fn test_hw_free_releases_ring() {
        let channel = bound_channel(ChannelDirection::Rx);
        let mut sub = open(&channel, ChannelDirection::Rx, Arc::new(VirtualBus::new())).unwrap();
        sub.hw_params(params(2)).unwrap();
        sub.hw_free().unwrap();
        assert!(sub.buffer().is_none());
        assert_eq!(sub.state(), StreamState::Opened);
    }

    #[test]
    fn test_hw_params_rejects_unadvertised_format() {
        let channel = bound_channel(ChannelDirection::Rx);
        let mut sub = open(&channel, ChannelDirection::Rx, Arc::new(VirtualBus::new())).unwrap();
        let mut p = params(2);
        p.format = SampleFormat::S32_LE;
        assert!(matches!(sub.hw_params(p), Err(SyncSoundError::InvalidParameter(_))));
        assert!(sub.buffer().is_none());
        assert!(matches!(sub.prepare(), Err(SyncSoundError::InvalidParameter(_))));
    }

    #[test]
    fn test_hw_params_after_disconnect_drops_prepared_state() {
        let channel = bound_channel(ChannelDirection::Tx);
        let stream = channel.stream(ChannelDirection::Tx).clone();
        let bus = Arc::new(VirtualBus::new());
        let mut sub = open(&channel, ChannelDirection::Tx, bus.clone()).unwrap();
        sub.hw_params(params(2)).unwrap();
        sub.prepare().unwrap();
        assert_eq!(sub.state(), StreamState::Prepared);

        let binding = stream.set_binding(None);
        assert!(matches!(sub.hw_params(params(2)), Err(SyncSoundError::NotConnected { .. })));
        assert_eq!(sub.state(), StreamState::Opened);
        assert!(sub.buffer().is_none());
        assert_eq!(bus.stop_count(), 1);

        // Rebinding does not revive the torn-down stream.
        stream.set_binding(binding);
        assert!(matches!(
            sub.trigger(TriggerCommand::Start),
            Err(SyncSoundError::InvalidParameter(_))
        ));
        sub.hw_params(params(2)).unwrap();
        sub.prepare().unwrap();
        sub.trigger(TriggerCommand::Start).unwrap();
    }

    #[test]
    fn test_start_requires_prepare() {
        let channel = bound_channel(ChannelDirection::Tx);
        let mut sub = open(&channel, ChannelDirection::Tx, Arc::new(VirtualBus::new())).unwrap();
        sub.hw_params(params(2)).unwrap();
        assert!(sub.trigger(TriggerCommand::Start).is_err());
        sub.prepare().unwrap();
        sub.trigger(TriggerCommand::Start).unwrap();
        assert_eq!(sub.state(), StreamState::Running);
        sub.trigger(TriggerCommand::Stop).unwrap();
        assert_eq!(sub.state(), StreamState::Stopped);
    }
}
