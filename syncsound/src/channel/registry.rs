//! Channel arena plus endpoint lookup.
//!
//! Channels are created once and indexed by their logical id. Bus callbacks
//! identify a channel by `(iface, channel_id, direction)`; the endpoint map
//! resolves that to an arena index and enforces that each endpoint is
//! claimed by at most one stream.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use crate::bus::{ChannelDirection, InterfaceId};

use super::{Binding, Channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Endpoint {
    iface: InterfaceId,
    channel_id: i32,
    direction: ChannelDirection,
}

pub struct Registry {
    channels: Vec<Arc<Channel>>,
    endpoints: RwLock<HashMap<Endpoint, usize>>,
}

impl Registry {
    pub fn new(channels: Vec<Channel>) -> Self {
        Self {
            channels: channels.into_iter().map(Arc::new).collect(),
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: usize) -> Option<&Arc<Channel>> {
        self.channels.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Channel>> {
        self.channels.iter()
    }

    /// Channel whose `direction` half is bound to `(iface, channel_id)`.
    pub fn lookup(
        &self,
        iface: InterfaceId,
        channel_id: i32,
        direction: ChannelDirection,
    ) -> Option<&Arc<Channel>> {
        let key = Endpoint {
            iface,
            channel_id,
            direction,
        };
        let index = *self
            .endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)?;
        self.channels.get(index)
    }

    /// Bind one half of channel `id`. Returns the id of the channel already
    /// holding the endpoint if it is taken.
    pub(crate) fn bind(&self, id: usize, binding: Binding) -> Result<(), usize> {
        let Some(channel) = self.channels.get(id) else {
            return Err(id);
        };
        let direction = binding.config.direction;
        let key = Endpoint {
            iface: binding.iface,
            channel_id: binding.channel_id,
            direction,
        };
        let mut endpoints = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&owner) = endpoints.get(&key) {
            return Err(owner);
        }
        if let Some(old) = channel.stream(direction).set_binding(Some(binding)) {
            warn!(
                channel = id,
                %direction,
                iface = %old.iface,
                old_channel_id = old.channel_id,
                "Replacing existing binding"
            );
            endpoints.remove(&Endpoint {
                iface: old.iface,
                channel_id: old.channel_id,
                direction,
            });
        }
        endpoints.insert(key, id);
        Ok(())
    }

    /// Clear whichever binding holds `(iface, channel_id)`, capture first.
    pub(crate) fn unbind(&self, iface: InterfaceId, channel_id: i32) -> Option<(usize, ChannelDirection)> {
        let mut endpoints = self.endpoints.write().unwrap_or_else(PoisonError::into_inner);
        for direction in [ChannelDirection::Rx, ChannelDirection::Tx] {
            let key = Endpoint {
                iface,
                channel_id,
                direction,
            };
            if let Some(index) = endpoints.remove(&key) {
                if let Some(channel) = self.channels.get(index) {
                    channel.stream(direction).set_binding(None);
                }
                return Some((index, direction));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusChannelConfig;
    use crate::channel::Tunables;
    use crate::pcm::PcmHardware;

    fn registry(n: usize) -> Registry {
        Registry::new(
            (0..n)
                .map(|i| Channel::new(i, PcmHardware::default(), Tunables::default()))
                .collect(),
        )
    }

    fn binding(channel_id: i32, direction: ChannelDirection) -> Binding {
        Binding {
            iface: InterfaceId(1),
            channel_id,
            config: BusChannelConfig::sync(direction, 4, 512),
        }
    }

    #[test]
    fn test_bind_and_lookup() {
        let reg = registry(2);
        reg.bind(1, binding(5, ChannelDirection::Tx)).unwrap();
        let found = reg.lookup(InterfaceId(1), 5, ChannelDirection::Tx).unwrap();
        assert_eq!(found.id(), 1);
        assert!(reg.lookup(InterfaceId(1), 5, ChannelDirection::Rx).is_none());
        assert!(reg.lookup(InterfaceId(2), 5, ChannelDirection::Tx).is_none());
    }

    #[test]
    fn test_endpoint_claimed_once() {
        let reg = registry(2);
        reg.bind(0, binding(5, ChannelDirection::Rx)).unwrap();
        assert_eq!(reg.bind(1, binding(5, ChannelDirection::Rx)), Err(0));
        // Same channel id in the other direction is a different endpoint.
        reg.bind(1, binding(5, ChannelDirection::Tx)).unwrap();
    }

    #[test]
    fn test_rebinding_drops_old_endpoint() {
        let reg = registry(1);
        reg.bind(0, binding(5, ChannelDirection::Tx)).unwrap();
        reg.bind(0, binding(6, ChannelDirection::Tx)).unwrap();
        assert!(reg.lookup(InterfaceId(1), 5, ChannelDirection::Tx).is_none());
        assert!(reg.lookup(InterfaceId(1), 6, ChannelDirection::Tx).is_some());
    }

    #[test]
    fn test_unbind_leaves_other_direction() {
        let reg = registry(1);
        reg.bind(0, binding(2, ChannelDirection::Rx)).unwrap();
        reg.bind(0, binding(3, ChannelDirection::Tx)).unwrap();
        assert_eq!(reg.unbind(InterfaceId(1), 2), Some((0, ChannelDirection::Rx)));
        let channel = reg.get(0).unwrap();
        assert!(!channel.stream(ChannelDirection::Rx).is_bound());
        assert!(channel.stream(ChannelDirection::Tx).is_bound());
        assert_eq!(reg.unbind(InterfaceId(1), 2), None);
    }
}
