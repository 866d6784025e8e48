//! syncsound: exposes MOST synchronous bus channels as PCM devices.
//!
//! Each logical channel is a sound card with one capture and one playback
//! stream. Playback is fed into bus transfer units by a supply thread;
//! capture units are drained into the ring from the bus completion path.
//! Samples are byte-swapped between host order and the bus's big-endian
//! order on the way through.
//!
//! The bus itself sits behind [`bus::BusLayer`]; [`bus::VirtualBus`] is an
//! in-process implementation for tests and the simulator binary.

pub mod bus;
mod capture;
pub mod card;
pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod pcm;
pub mod playback;
pub mod substream;

pub use bus::{BusChannelConfig, BusClient, BusLayer, ChannelDirection, DataType, InterfaceId, TransferUnit, VirtualBus};
pub use card::SyncSound;
pub use codec::{Codec, SampleFormat};
pub use config::SyncSoundConfig;
pub use error::{Result, SyncSoundError};
pub use pcm::{HwParams, PeriodSink, TriggerCommand};
pub use substream::Substream;
