//! The card: every logical channel plus the callbacks the bus layer drives.

use std::sync::Arc;

use tracing::{info, warn};

use crate::bus::{BusChannelConfig, BusClient, BusLayer, ChannelDirection, DataType, InterfaceId, TransferUnit};
use crate::capture;
use crate::channel::attrs::{parse_kernel_int, parse_link_id, UNSET};
use crate::channel::{Attribute, Binding, Channel, Registry, Tunables};
use crate::config::{CardInfo, SyncSoundConfig};
use crate::error::{Result, SyncSoundError};
use crate::pcm::{PcmHardware, PeriodSink};
use crate::substream::Substream;

pub struct SyncSound {
    card: CardInfo,
    registry: Registry,
    bus: Arc<dyn BusLayer>,
}

impl SyncSound {
    pub fn new(bus: Arc<dyn BusLayer>, config: &SyncSoundConfig) -> Self {
        let channels = (0..config.device_count())
            .map(|id| {
                let tunables = Tunables::default();
                if let Some(ov) = config.channel_override(id) {
                    if let Some(v) = ov.packets_per_xact {
                        tunables.set_packets_per_xact(v);
                    }
                    if let Some(v) = ov.buffer_size {
                        tunables.set_buffer_size(v);
                    }
                }
                Channel::new(id, PcmHardware::default(), tunables)
            })
            .collect::<Vec<_>>();
        info!(
            channels = channels.len(),
            driver = %config.card.driver,
            "Sound cards registered"
        );
        Self {
            card: config.card.clone(),
            registry: Registry::new(channels),
            bus,
        }
    }

    pub fn card_info(&self) -> &CardInfo {
        &self.card
    }

    pub fn channels(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.registry.iter()
    }

    pub fn channel(&self, id: usize) -> Option<&Arc<Channel>> {
        self.registry.get(id)
    }

    /// Open one direction of channel `id`. `sink` hears about every
    /// elapsed period until the substream is closed.
    pub fn open(&self, id: usize, direction: ChannelDirection, sink: Arc<dyn PeriodSink>) -> Result<Substream> {
        let channel = self
            .registry
            .get(id)
            .ok_or_else(|| SyncSoundError::NotFound(format!("channel {id}")))?
            .clone();
        Substream::open(channel, direction, self.bus.clone(), sink)
    }

    // -----------------------------------------------------------------------
    // Attributes
    // -----------------------------------------------------------------------

    pub fn attribute_names(&self) -> Vec<String> {
        self.registry
            .iter()
            .flat_map(|c| Attribute::ALL.map(|a| a.name_for(c.id())))
            .collect()
    }

    fn resolve_attribute(&self, name: &str) -> Result<(Attribute, &Arc<Channel>)> {
        let not_found = || SyncSoundError::NotFound(format!("attribute '{name}'"));
        let (attr, index) = Attribute::parse_name(name).ok_or_else(not_found)?;
        let channel = self.registry.get(index).ok_or_else(not_found)?;
        Ok((attr, channel))
    }

    /// Current value formatted as `"<value> "`.
    pub fn show_attribute(&self, name: &str) -> Result<String> {
        let (attr, channel) = self.resolve_attribute(name)?;
        Ok(format!("{} ", channel.tunables().get(attr)))
    }

    /// Parse and store a new value. Returns the number of bytes consumed.
    pub fn store_attribute(&self, name: &str, text: &str) -> Result<usize> {
        let (attr, channel) = self.resolve_attribute(name)?;
        let value = parse_kernel_int(text).ok_or_else(|| {
            SyncSoundError::InvalidParameter(format!("'{}' is not an integer", text.trim_end()))
        })?;
        channel.tunables().set(attr, value);
        info!(channel = channel.id(), attribute = %attr, value, "Tunable updated");
        Ok(text.len())
    }
}

impl BusClient for SyncSound {
    fn probe_channel(
        &self,
        iface: InterfaceId,
        channel_id: i32,
        config: &BusChannelConfig,
        args: &str,
    ) -> Result<()> {
        if config.data_type != DataType::Sync {
            return Err(SyncSoundError::InvalidParameter(format!(
                "{:?} channels cannot carry PCM",
                config.data_type
            )));
        }
        if self.registry.lookup(iface, channel_id, config.direction).is_some() {
            return Err(SyncSoundError::InvalidParameter(format!(
                "channel {channel_id} on {iface} is already connected"
            )));
        }
        let id = parse_link_id(args).ok_or_else(|| {
            SyncSoundError::InvalidParameter(format!("no channel index in '{}'", args.trim_end()))
        })?;
        let channel = usize::try_from(id)
            .ok()
            .and_then(|id| self.registry.get(id))
            .ok_or_else(|| SyncSoundError::NotFound(format!("channel {id}")))?;

        let binding = Binding {
            iface,
            channel_id,
            config: config.clone(),
        };
        self.registry.bind(channel.id(), binding).map_err(|owner| {
            SyncSoundError::InvalidParameter(format!(
                "channel {channel_id} on {iface} is already connected to MLB_SYNC{owner}"
            ))
        })?;

        let tunables = channel.tunables();
        if tunables.packets_per_xact() == UNSET {
            tunables.set_packets_per_xact(config.packets_per_xact);
        }
        info!(
            channel = channel.id(),
            direction = %config.direction,
            %iface,
            channel_id,
            "Bus channel connected"
        );
        Ok(())
    }

    fn disconnect_channel(&self, iface: InterfaceId, channel_id: i32) -> Result<()> {
        let Some((id, direction)) = self.registry.unbind(iface, channel_id) else {
            warn!(%iface, channel_id, "Disconnect for unknown bus channel");
            return Err(SyncSoundError::InvalidChannel { iface, channel_id });
        };
        info!(channel = id, %direction, %iface, channel_id, "Bus channel disconnected");
        Ok(())
    }

    fn rx_completion(&self, unit: TransferUnit) -> Result<()> {
        capture::on_rx_complete(&self.registry, self.bus.as_ref(), unit)
    }

    fn tx_completion(&self, iface: InterfaceId, channel_id: i32) -> Result<()> {
        capture::on_tx_slot_free(&self.registry, iface, channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::VirtualBus;
    use crate::config::ChannelOverride;

    fn card(num_devices: usize) -> SyncSound {
        let config = SyncSoundConfig {
            num_devices,
            ..Default::default()
        };
        SyncSound::new(Arc::new(VirtualBus::new()), &config)
    }

    fn sync_config(direction: ChannelDirection) -> BusChannelConfig {
        BusChannelConfig::sync(direction, 4, 512)
    }

    #[test]
    fn test_probe_binds_channel() {
        let card = card(2);
        card.probe_channel(InterfaceId(0), 5, &sync_config(ChannelDirection::Tx), "syncsound1\n")
            .unwrap();
        let channel = card.channel(1).unwrap();
        assert!(channel.stream(ChannelDirection::Tx).is_bound());
        assert!(!channel.stream(ChannelDirection::Rx).is_bound());
    }

    #[test]
    fn test_probe_rejections() {
        let card = card(2);
        let mut config = sync_config(ChannelDirection::Rx);
        config.data_type = DataType::Async;
        assert!(matches!(
            card.probe_channel(InterfaceId(0), 1, &config, "0"),
            Err(SyncSoundError::InvalidParameter(_))
        ));

        let config = sync_config(ChannelDirection::Rx);
        assert!(matches!(
            card.probe_channel(InterfaceId(0), 1, &config, "none"),
            Err(SyncSoundError::InvalidParameter(_))
        ));
        assert!(matches!(
            card.probe_channel(InterfaceId(0), 1, &config, "ch7"),
            Err(SyncSoundError::NotFound(_))
        ));

        card.probe_channel(InterfaceId(0), 1, &config, "ch0").unwrap();
        assert!(matches!(
            card.probe_channel(InterfaceId(0), 1, &config, "ch1"),
            Err(SyncSoundError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_probe_seeds_unset_packets() {
        let card = card(1);
        card.channel(0).unwrap().tunables().set_packets_per_xact(UNSET);
        let mut config = sync_config(ChannelDirection::Tx);
        config.packets_per_xact = 188;
        card.probe_channel(InterfaceId(0), 2, &config, "0").unwrap();
        assert_eq!(card.show_attribute("packets_per_xact0").unwrap(), "188 ");
    }

    #[test]
    fn test_disconnect() {
        let card = card(1);
        card.probe_channel(InterfaceId(0), 2, &sync_config(ChannelDirection::Rx), "0")
            .unwrap();
        card.disconnect_channel(InterfaceId(0), 2).unwrap();
        assert!(!card.channel(0).unwrap().stream(ChannelDirection::Rx).is_bound());
        assert_eq!(
            card.disconnect_channel(InterfaceId(0), 2),
            Err(SyncSoundError::InvalidChannel {
                iface: InterfaceId(0),
                channel_id: 2
            })
        );
    }

    #[test]
    fn test_attributes() {
        let card = card(2);
        assert_eq!(
            card.attribute_names(),
            vec!["packets_per_xact0", "buffer_size0", "packets_per_xact1", "buffer_size1"]
        );
        assert_eq!(card.show_attribute("buffer_size1").unwrap(), "-1 ");
        assert_eq!(card.store_attribute("buffer_size1", "0x200\n").unwrap(), 6);
        assert_eq!(card.show_attribute("buffer_size1").unwrap(), "512 ");
        assert!(matches!(
            card.store_attribute("buffer_size1", "big"),
            Err(SyncSoundError::InvalidParameter(_))
        ));
        assert!(matches!(card.show_attribute("buffer_size2"), Err(SyncSoundError::NotFound(_))));
        assert!(matches!(card.show_attribute("volume0"), Err(SyncSoundError::NotFound(_))));
    }

    #[test]
    fn test_overrides_applied() {
        let config = SyncSoundConfig {
            num_devices: 2,
            channels: vec![ChannelOverride {
                index: 1,
                packets_per_xact: Some(64),
                buffer_size: Some(1024),
            }],
            ..Default::default()
        };
        let card = SyncSound::new(Arc::new(VirtualBus::new()), &config);
        assert_eq!(card.show_attribute("packets_per_xact1").unwrap(), "64 ");
        assert_eq!(card.show_attribute("buffer_size1").unwrap(), "1024 ");
        assert_eq!(card.show_attribute("packets_per_xact0").unwrap(), "255 ");
    }
}
