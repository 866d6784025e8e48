//! Error types for the PCM bridge.
//!
//! Every failure is returned synchronously to the caller that detected it.
//! [`SyncSoundError::errno`] gives the negative result code a PCM layer
//! reports upward.

use thiserror::Error;

use crate::bus::{ChannelDirection, InterfaceId};

const ENOENT: i32 = 2;
const ENOMEM: i32 = 12;
const EBUSY: i32 = 16;
const EINVAL: i32 = 22;
const ENOTCONN: i32 = 107;

/// Errors surfaced by the channel, stream and bus-callback operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncSoundError {
    /// The stream direction has no bus binding.
    #[error("{direction} direction of channel {channel} is not connected to the bus")]
    NotConnected {
        channel: usize,
        direction: ChannelDirection,
    },

    /// Channel count, format or geometry outside the negotiated envelope.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The bus channel or the supply loop could not be started.
    #[error("Device busy: {0}")]
    DeviceBusy(String),

    /// A bus callback referenced an endpoint no channel is bound to.
    #[error("Invalid channel {channel_id} on {iface}")]
    InvalidChannel { iface: InterfaceId, channel_id: i32 },

    /// An execution context could not be created.
    #[error("Out of resources: {0}")]
    OutOfResources(String),

    /// A lookup by logical id or attribute name found nothing.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SyncSoundError {
    /// Negative result code for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Self::NotConnected { .. } => -ENOTCONN,
            Self::InvalidParameter(_) => -EINVAL,
            Self::DeviceBusy(_) => -EBUSY,
            Self::InvalidChannel { .. } => -EINVAL,
            Self::OutOfResources(_) => -ENOMEM,
            Self::NotFound(_) => -ENOENT,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SyncSoundError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        let err = SyncSoundError::NotConnected {
            channel: 0,
            direction: ChannelDirection::Tx,
        };
        assert_eq!(err.errno(), -107);
        assert_eq!(SyncSoundError::InvalidParameter("x".into()).errno(), -22);
        assert_eq!(SyncSoundError::DeviceBusy("x".into()).errno(), -16);
        assert_eq!(SyncSoundError::OutOfResources("x".into()).errno(), -12);
        assert_eq!(SyncSoundError::NotFound("x".into()).errno(), -2);
        let err = SyncSoundError::InvalidChannel {
            iface: InterfaceId(3),
            channel_id: 7,
        };
        assert_eq!(err.errno(), -22);
    }

    #[test]
    fn test_error_display() {
        let err = SyncSoundError::InvalidChannel {
            iface: InterfaceId(3),
            channel_id: 7,
        };
        let text = err.to_string();
        assert!(text.contains("7"));
        assert!(text.contains("iface3"));

        let err = SyncSoundError::NotConnected {
            channel: 1,
            direction: ChannelDirection::Rx,
        };
        assert!(err.to_string().contains("rx"));
    }
}
