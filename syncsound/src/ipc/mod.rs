//! IPC protocol types for driving the simulator.
//!
//! Events use `{"event": "<name>", "data": {...}}` format (stdout).
//! Commands use `{"command": "<name>", ...}` format (stdin).

pub mod bridge;

use serde::{Deserialize, Serialize};

use syncsound::{ChannelDirection, DataType};

// ---------------------------------------------------------------------------
// Events: simulator -> controller (stdout)
// ---------------------------------------------------------------------------

/// All events emitted via stdout as JSON lines.
///
/// Serialized as `{"event": "<variant>", "data": {...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum SimEvent {
    Ready {
        driver: String,
        channels: usize,
    },
    Pong {},
    Channels {
        channels: Vec<ChannelInfo>,
    },
    PeriodElapsed {
        channel: usize,
        direction: ChannelDirection,
    },
    Pointer {
        channel: usize,
        direction: ChannelDirection,
        frames: usize,
    },
    Attr {
        name: String,
        value: String,
    },
    Attrs {
        group: String,
        names: Vec<String>,
    },
    Ok {
        command: String,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        errno: Option<i32>,
    },
    Stopping {},
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub id: usize,
    pub name: String,
    pub rx: StreamInfo,
    pub tx: StreamInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamInfo {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iface: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<i32>,
}

// ---------------------------------------------------------------------------
// Commands: controller -> simulator (stdin)
// ---------------------------------------------------------------------------

fn default_rate() -> u32 {
    syncsound::pcm::SAMPLE_RATE
}

/// All commands received via stdin as JSON lines.
///
/// Deserialized from `{"command": "<variant>", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "command")]
#[serde(rename_all = "snake_case")]
pub enum SimCommand {
    Ping {},
    ListChannels {},
    /// Bus side: offer a bus channel to the logical channel named in `args`.
    Connect {
        iface: u32,
        channel_id: i32,
        direction: ChannelDirection,
        args: String,
        #[serde(default)]
        data_type: Option<DataType>,
    },
    Disconnect {
        iface: u32,
        channel_id: i32,
    },
    /// Route a TX bus channel back into an RX bus channel.
    Loopback {
        iface: u32,
        tx_channel_id: i32,
        rx_channel_id: i32,
    },
    /// Undo `loopback` for a TX bus channel.
    Unloop {
        iface: u32,
        tx_channel_id: i32,
    },
    Open {
        channel: usize,
        direction: ChannelDirection,
    },
    HwParams {
        channel: usize,
        direction: ChannelDirection,
        format: String,
        channels: u32,
        #[serde(default = "default_rate")]
        rate: u32,
        period_frames: usize,
        periods: u32,
    },
    Prepare {
        channel: usize,
        direction: ChannelDirection,
    },
    Start {
        channel: usize,
        direction: ChannelDirection,
    },
    Stop {
        channel: usize,
        direction: ChannelDirection,
    },
    Pointer {
        channel: usize,
        direction: ChannelDirection,
    },
    /// Write raw frames into a playback ring at `frame`.
    Write {
        channel: usize,
        #[serde(default)]
        frame: usize,
        data: Vec<u8>,
    },
    Close {
        channel: usize,
        direction: ChannelDirection,
    },
    ListAttrs {},
    GetAttr {
        name: String,
    },
    SetAttr {
        name: String,
        value: String,
    },
    Quit {},
}

impl SimCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping {} => "ping",
            Self::ListChannels {} => "list_channels",
            Self::Connect { .. } => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::Loopback { .. } => "loopback",
            Self::Unloop { .. } => "unloop",
            Self::Open { .. } => "open",
            Self::HwParams { .. } => "hw_params",
            Self::Prepare { .. } => "prepare",
            Self::Start { .. } => "start",
            Self::Stop { .. } => "stop",
            Self::Pointer { .. } => "pointer",
            Self::Write { .. } => "write",
            Self::Close { .. } => "close",
            Self::ListAttrs {} => "list_attrs",
            Self::GetAttr { .. } => "get_attr",
            Self::SetAttr { .. } => "set_attr",
            Self::Quit {} => "quit",
        }
    }
}
