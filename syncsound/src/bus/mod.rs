//! Contract with the bus layer.
//!
//! The bus layer owns the transfer units and the physical channels. It
//! hands units to this crate for exactly one fill or drain and expects them
//! back afterwards: playback units via [`BusLayer::submit_unit`], capture
//! units via [`BusLayer::release_unit`].
//!
//! In the other direction the bus layer drives a [`BusClient`] with
//! connect/disconnect requests and completion callbacks.

pub mod virtual_bus;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::Result;

pub use virtual_bus::VirtualBus;

/// Opaque handle of a bus interface (one host controller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceId(pub u32);

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "iface{}", self.0)
    }
}

/// Direction of a bus channel. `Tx` carries playback, `Rx` capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelDirection {
    Rx,
    Tx,
}

impl ChannelDirection {
    pub fn is_playback(self) -> bool {
        self == ChannelDirection::Tx
    }
}

impl fmt::Display for ChannelDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rx => write!(f, "rx"),
            Self::Tx => write!(f, "tx"),
        }
    }
}

/// Kind of traffic a bus channel carries. Only `Sync` can be bridged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Control,
    Async,
    Sync,
    Isoc,
}

/// Per-channel bus configuration. The bus layer supplies it on connect;
/// `hw_params` rewrites the sizing fields before the channel is started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusChannelConfig {
    pub direction: ChannelDirection,
    pub data_type: DataType,
    /// Number of transfer units in the channel's pool.
    pub num_buffers: u32,
    /// Bytes per transfer unit.
    pub buffer_size: u32,
    /// Bytes per frame carried in one unit.
    pub subbuffer_size: u32,
    pub packets_per_xact: i32,
}

impl BusChannelConfig {
    /// A synchronous channel with the bus defaults.
    pub fn sync(direction: ChannelDirection, num_buffers: u32, buffer_size: u32) -> Self {
        Self {
            direction,
            data_type: DataType::Sync,
            num_buffers,
            buffer_size,
            subbuffer_size: 4,
            packets_per_xact: 255,
        }
    }
}

/// A bus-owned buffer moving one block of samples.
#[derive(Debug)]
pub struct TransferUnit {
    pub iface: InterfaceId,
    pub channel_id: i32,
    /// Backing storage; its length is the unit capacity.
    pub buffer: Vec<u8>,
    /// Bytes actually filled by the bus (capture units).
    pub processed_length: usize,
}

impl TransferUnit {
    pub fn new(iface: InterfaceId, channel_id: i32, capacity: usize) -> Self {
        Self {
            iface,
            channel_id,
            buffer: vec![0; capacity],
            processed_length: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

/// Failure reported by the bus layer itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("channel {channel_id} on {iface} could not be started: {reason}")]
    StartFailed {
        iface: InterfaceId,
        channel_id: i32,
        reason: String,
    },
}

/// Operations this crate consumes from the bus layer.
pub trait BusLayer: Send + Sync {
    /// Take an empty unit from a TX channel's pool, or `None` if all units
    /// are in flight. Never blocks.
    fn acquire_unit(&self, iface: InterfaceId, channel_id: i32) -> Option<TransferUnit>;

    /// Hand a filled playback unit back for transmission.
    fn submit_unit(&self, unit: TransferUnit);

    /// Return a drained capture unit to its pool.
    fn release_unit(&self, unit: TransferUnit);

    fn start_channel(
        &self,
        iface: InterfaceId,
        channel_id: i32,
        config: &BusChannelConfig,
    ) -> std::result::Result<(), BusError>;

    fn stop_channel(&self, iface: InterfaceId, channel_id: i32);
}

/// Callbacks the bus layer invokes on this crate.
pub trait BusClient: Send + Sync {
    /// Bind a bus channel to the logical channel named in `args`.
    fn probe_channel(
        &self,
        iface: InterfaceId,
        channel_id: i32,
        config: &BusChannelConfig,
        args: &str,
    ) -> Result<()>;

    /// Drop whichever binding currently holds this bus channel.
    fn disconnect_channel(&self, iface: InterfaceId, channel_id: i32) -> Result<()>;

    /// A capture unit arrived. The unit is always handed back to the bus.
    fn rx_completion(&self, unit: TransferUnit) -> Result<()>;

    /// A playback unit slot became free on this channel.
    fn tx_completion(&self, iface: InterfaceId, channel_id: i32) -> Result<()>;
}
