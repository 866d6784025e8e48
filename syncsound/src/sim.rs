//! Command execution for the simulator: one card on a virtual bus.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use tokio::sync::mpsc;
use tracing::info;

use syncsound::bus::virtual_bus::TickReport;
use syncsound::channel::attrs::ATTRIBUTE_GROUP;
use syncsound::channel::Channel;
use syncsound::config::SimulatorConfig;
use syncsound::{
    BusChannelConfig, BusClient, ChannelDirection, HwParams, InterfaceId, Result, SampleFormat, Substream,
    SyncSound, SyncSoundConfig, SyncSoundError, TriggerCommand, VirtualBus,
};

use crate::ipc::{ChannelInfo, SimCommand, SimEvent, StreamInfo};

pub type PeriodEvent = (usize, ChannelDirection);

pub struct Simulator {
    bus: Arc<VirtualBus>,
    card: SyncSound,
    settings: SimulatorConfig,
    substreams: HashMap<PeriodEvent, Substream>,
    periods: mpsc::UnboundedSender<PeriodEvent>,
}

impl Simulator {
    pub fn new(config: &SyncSoundConfig) -> (Self, mpsc::UnboundedReceiver<PeriodEvent>) {
        let bus = Arc::new(VirtualBus::new());
        let card = SyncSound::new(bus.clone(), config);
        let (periods, period_rx) = mpsc::unbounded_channel();
        let sim = Self {
            bus,
            card,
            settings: config.simulator.clone(),
            substreams: HashMap::new(),
            periods,
        };
        (sim, period_rx)
    }

    pub fn card(&self) -> &SyncSound {
        &self.card
    }

    /// Run one bus transfer round.
    pub fn tick(&self) -> TickReport {
        self.bus.tick(&self.card)
    }

    fn substream(&self, channel: usize, direction: ChannelDirection) -> Result<&Substream> {
        self.substreams
            .get(&(channel, direction))
            .ok_or_else(|| SyncSoundError::NotFound(format!("{direction} substream of channel {channel} is not open")))
    }

    fn substream_mut(&mut self, channel: usize, direction: ChannelDirection) -> Result<&mut Substream> {
        self.substreams
            .get_mut(&(channel, direction))
            .ok_or_else(|| SyncSoundError::NotFound(format!("{direction} substream of channel {channel} is not open")))
    }

    fn channel_list(&self) -> Vec<ChannelInfo> {
        let stream_info = |channel: &Channel, direction: ChannelDirection| {
            let stream = channel.stream(direction);
            let endpoint = stream.endpoint();
            StreamInfo {
                state: stream.state().to_string(),
                iface: endpoint.map(|(iface, _)| iface.0),
                channel_id: endpoint.map(|(_, id)| id),
            }
        };
        self.card
            .channels()
            .map(|c| ChannelInfo {
                id: c.id(),
                name: c.name().to_string(),
                rx: stream_info(c.as_ref(), ChannelDirection::Rx),
                tx: stream_info(c.as_ref(), ChannelDirection::Tx),
            })
            .collect()
    }

    /// Execute everything except `quit`.
    pub fn execute(&mut self, cmd: SimCommand) -> Result<SimEvent> {
        let ok = SimEvent::Ok {
            command: cmd.name().to_string(),
        };
        match cmd {
            SimCommand::Ping {} => return Ok(SimEvent::Pong {}),
            SimCommand::ListChannels {} => {
                return Ok(SimEvent::Channels {
                    channels: self.channel_list(),
                })
            }
            SimCommand::Connect {
                iface,
                channel_id,
                direction,
                args,
                data_type,
            } => {
                let mut config =
                    BusChannelConfig::sync(direction, self.settings.units_per_channel, self.settings.unit_bytes);
                if let Some(data_type) = data_type {
                    config.data_type = data_type;
                }
                self.card
                    .probe_channel(InterfaceId(iface), channel_id, &config, &args)?;
            }
            SimCommand::Disconnect { iface, channel_id } => {
                self.card.disconnect_channel(InterfaceId(iface), channel_id)?;
            }
            SimCommand::Loopback {
                iface,
                tx_channel_id,
                rx_channel_id,
            } => {
                let iface = InterfaceId(iface);
                self.bus.set_loopback((iface, tx_channel_id), (iface, rx_channel_id));
            }
            SimCommand::Unloop { iface, tx_channel_id } => {
                self.bus.clear_loopback((InterfaceId(iface), tx_channel_id));
            }
            SimCommand::Open { channel, direction } => {
                if self.substreams.contains_key(&(channel, direction)) {
                    return Err(SyncSoundError::DeviceBusy(format!(
                        "{direction} substream of channel {channel} is already open"
                    )));
                }
                let tx = self.periods.clone();
                let sink = Arc::new(move |channel: usize, direction: ChannelDirection| {
                    let _ = tx.send((channel, direction));
                });
                let substream = self.card.open(channel, direction, sink)?;
                self.substreams.insert((channel, direction), substream);
            }
            SimCommand::HwParams {
                channel,
                direction,
                format,
                channels,
                rate,
                period_frames,
                periods,
            } => {
                let params = HwParams {
                    format: format.parse::<SampleFormat>()?,
                    channels,
                    rate,
                    period_frames,
                    periods,
                };
                self.substream_mut(channel, direction)?.hw_params(params)?;
            }
            SimCommand::Prepare { channel, direction } => {
                self.substream_mut(channel, direction)?.prepare()?;
            }
            SimCommand::Start { channel, direction } => {
                self.substream(channel, direction)?
                    .trigger(TriggerCommand::Start)?;
            }
            SimCommand::Stop { channel, direction } => {
                self.substream(channel, direction)?
                    .trigger(TriggerCommand::Stop)?;
            }
            SimCommand::Pointer { channel, direction } => {
                let frames = self.substream(channel, direction)?.pointer();
                return Ok(SimEvent::Pointer {
                    channel,
                    direction,
                    frames,
                });
            }
            SimCommand::Write { channel, frame, data } => {
                let ring = self
                    .substream(channel, ChannelDirection::Tx)?
                    .buffer()
                    .ok_or_else(|| SyncSoundError::InvalidParameter("hw_params not set".to_string()))?;
                let mut ring = ring.lock().unwrap_or_else(PoisonError::into_inner);
                ring.write_frames(frame, &data);
            }
            SimCommand::Close { channel, direction } => {
                let substream = self
                    .substreams
                    .remove(&(channel, direction))
                    .ok_or_else(|| SyncSoundError::NotFound(format!("{direction} substream of channel {channel} is not open")))?;
                substream.close();
            }
            SimCommand::ListAttrs {} => {
                return Ok(SimEvent::Attrs {
                    group: ATTRIBUTE_GROUP.to_string(),
                    names: self.card.attribute_names(),
                })
            }
            SimCommand::GetAttr { name } => {
                let value = self.card.show_attribute(&name)?;
                return Ok(SimEvent::Attr { name, value });
            }
            SimCommand::SetAttr { name, value } => {
                self.card.store_attribute(&name, &value)?;
                let value = self.card.show_attribute(&name)?;
                return Ok(SimEvent::Attr { name, value });
            }
            SimCommand::Quit {} => {}
        }
        Ok(ok)
    }

    /// Close every open substream.
    pub fn shutdown(&mut self) {
        for ((channel, direction), substream) in self.substreams.drain() {
            info!(channel, %direction, "Closing substream on shutdown");
            substream.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn command(json: &str) -> SimCommand {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn test_loopback_session_reports_capture_periods() {
        let config = SyncSoundConfig {
            num_devices: 2,
            ..Default::default()
        };
        let (mut sim, mut periods) = Simulator::new(&config);
        for json in [
            r#"{"command":"connect","iface":0,"channel_id":1,"direction":"tx","args":"0"}"#,
            r#"{"command":"connect","iface":0,"channel_id":2,"direction":"rx","args":"1"}"#,
            r#"{"command":"loopback","iface":0,"tx_channel_id":1,"rx_channel_id":2}"#,
            r#"{"command":"open","channel":0,"direction":"tx"}"#,
            r#"{"command":"open","channel":1,"direction":"rx"}"#,
            r#"{"command":"hw_params","channel":0,"direction":"tx","format":"s16_le","channels":1,"period_frames":64,"periods":4}"#,
            r#"{"command":"hw_params","channel":1,"direction":"rx","format":"s16_le","channels":1,"period_frames":64,"periods":4}"#,
            r#"{"command":"prepare","channel":0,"direction":"tx"}"#,
            r#"{"command":"prepare","channel":1,"direction":"rx"}"#,
            r#"{"command":"start","channel":1,"direction":"rx"}"#,
            r#"{"command":"start","channel":0,"direction":"tx"}"#,
        ] {
            let event = sim.execute(command(json)).unwrap();
            assert!(matches!(event, SimEvent::Ok { .. }), "{json}: {event:?}");
        }

        let mut captured = false;
        for _ in 0..500 {
            sim.tick();
            tokio::time::sleep(Duration::from_millis(1)).await;
            while let Ok((channel, direction)) = periods.try_recv() {
                if (channel, direction) == (1, ChannelDirection::Rx) {
                    captured = true;
                }
            }
            if captured {
                break;
            }
        }
        assert!(captured);
        sim.shutdown();
    }

    #[tokio::test]
    async fn test_unloop_stops_capture_delivery() {
        let config = SyncSoundConfig {
            num_devices: 2,
            ..Default::default()
        };
        let (mut sim, _periods) = Simulator::new(&config);
        for json in [
            r#"{"command":"connect","iface":0,"channel_id":1,"direction":"tx","args":"0"}"#,
            r#"{"command":"connect","iface":0,"channel_id":2,"direction":"rx","args":"1"}"#,
            r#"{"command":"loopback","iface":0,"tx_channel_id":1,"rx_channel_id":2}"#,
            r#"{"command":"unloop","iface":0,"tx_channel_id":1}"#,
            r#"{"command":"open","channel":0,"direction":"tx"}"#,
            r#"{"command":"open","channel":1,"direction":"rx"}"#,
            r#"{"command":"hw_params","channel":0,"direction":"tx","format":"s16_le","channels":1,"period_frames":64,"periods":4}"#,
            r#"{"command":"hw_params","channel":1,"direction":"rx","format":"s16_le","channels":1,"period_frames":64,"periods":4}"#,
            r#"{"command":"prepare","channel":0,"direction":"tx"}"#,
            r#"{"command":"prepare","channel":1,"direction":"rx"}"#,
            r#"{"command":"start","channel":1,"direction":"rx"}"#,
            r#"{"command":"start","channel":0,"direction":"tx"}"#,
        ] {
            sim.execute(command(json)).unwrap();
        }

        let tx = (InterfaceId(0), 1);
        let rx = (InterfaceId(0), 2);
        let mut transmitted = 0;
        for _ in 0..500 {
            transmitted += sim.tick().transmitted;
            if transmitted >= 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(transmitted >= 4);
        assert!(sim.bus.stats(tx).unwrap().submitted >= 4);
        assert_eq!(sim.bus.stats(rx).unwrap().delivered, 0);
        sim.shutdown();
    }

    #[tokio::test]
    async fn test_list_attrs_names_group() {
        let config = SyncSoundConfig {
            num_devices: 2,
            ..Default::default()
        };
        let (mut sim, _periods) = Simulator::new(&config);
        match sim.execute(command(r#"{"command":"list_attrs"}"#)).unwrap() {
            SimEvent::Attrs { group, names } => {
                assert_eq!(group, "syncsound");
                assert_eq!(names.len(), 4);
                assert!(names.contains(&"buffer_size1".to_string()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_errors_carry_errno() {
        let (mut sim, _periods) = Simulator::new(&SyncSoundConfig::default());
        let err = sim
            .execute(command(r#"{"command":"open","channel":0,"direction":"tx"}"#))
            .unwrap_err();
        assert_eq!(err.errno(), -107);
        let err = sim
            .execute(command(r#"{"command":"get_attr","name":"buffer_size9"}"#))
            .unwrap_err();
        assert_eq!(err.errno(), -2);
        match sim
            .execute(command(r#"{"command":"set_attr","name":"buffer_size0","value":"256"}"#))
            .unwrap()
        {
            SimEvent::Attr { value, .. } => assert_eq!(value, "256 "),
            other => panic!("unexpected {other:?}"),
        }
    }
}
