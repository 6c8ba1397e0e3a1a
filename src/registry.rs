//! Arena-backed storage for the Device/RxChannel/TxChannel/Subscription
//! object graph. Cyclic references (RxChannel <-> Subscription <-> TxChannel
//! <-> Device) are modeled as stable integer ids into flat arenas rather
//! than as a reference-counted graph, per the design notes: this keeps
//! ownership simple and makes a consistent snapshot just a cheap clone.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::channel::{ChannelType, RxChannel, TxChannel, TxDeviceRef};
use crate::codec::ProtocolVersion;
use crate::subscription::{Subscription, SubscriptionStatus};

macro_rules! arena_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(usize);

        impl $name {
            fn new(index: usize) -> Self {
                Self(index)
            }

            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

arena_id!(DeviceId);
arena_id!(RxId);
arena_id!(TxId);
arena_id!(SubId);

#[derive(Debug, Clone, Copy)]
pub struct ArcDescriptor {
    pub port: u16,
    pub protocol_version: ProtocolVersion,
}

#[derive(Debug, Clone)]
pub struct CmcDescriptor {
    pub port: u16,
    pub protocol_version: ProtocolVersion,
    pub id: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct DbcDescriptor {
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelCounts {
    pub rx: u16,
    pub tx: u16,
}

/// A discovered Dante device. Created on discovery completion, mutated by
/// response callbacks, never destroyed during a session: disconnection
/// marks descriptors stale (see [`Device::connected`]) but preserves
/// identity so in-flight subscriptions still resolve by name.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub arc: ArcDescriptor,
    pub cmc: CmcDescriptor,
    pub dbc: DbcDescriptor,
    pub sample_rate: u32,
    pub channel_counts: ChannelCounts,
    pub rx_channels: Vec<RxId>,
    pub tx_channels: Vec<TxId>,
    pub connected: bool,
}

/// Owns every arena plus the cross-device orphan table. This is the
/// "single source of truth" a façade reads through a mutex; reconciler
/// callbacks are the only code that should call the `*_mut` methods.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Option<Device>>,
    rx_channels: Vec<Option<RxChannel>>,
    tx_channels: Vec<Option<TxChannel>>,
    subscriptions: Vec<Option<Subscription>>,
    device_by_name: HashMap<String, DeviceId>,
    /// TX device name -> TX channels not yet attachable because that device
    /// hasn't been discovered.
    orphan_tx: HashMap<String, Vec<TxId>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_device(&mut self, device: Device) -> DeviceId {
        let key = device.name.to_lowercase();
        let id = DeviceId::new(self.devices.len());
        self.device_by_name.insert(key, id);
        self.devices.push(Some(device));
        id
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.index())?.as_ref()
    }

    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id.index())?.as_mut()
    }

    pub fn device_by_name(&self, name: &str) -> Option<DeviceId> {
        self.device_by_name.get(&name.to_lowercase()).copied()
    }

    /// Rename requires re-keying the case-insensitive name index.
    pub fn reindex_device_name(&mut self, id: DeviceId, new_name: &str) {
        self.device_by_name.retain(|_, v| *v != id);
        self.device_by_name.insert(new_name.to_lowercase(), id);
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &Device)> {
        self.devices
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|d| (DeviceId::new(i), d)))
    }

    pub fn insert_rx_channel(&mut self, channel: RxChannel) -> RxId {
        let id = RxId::new(self.rx_channels.len());
        self.rx_channels.push(Some(channel));
        id
    }

    /// A fresh RX channel always comes with its own default subscription,
    /// and each needs the other's id at construction time — only this
    /// module can mint both, so the two-step insert-then-fixup lives here.
    pub fn insert_rx_channel_with_subscription(
        &mut self,
        device: DeviceId,
        number: u16,
        name: String,
        status: SubscriptionStatus,
        subscription_status: SubscriptionStatus,
    ) -> RxId {
        let rx_id = RxId::new(self.rx_channels.len());
        self.rx_channels.push(None);
        let sub_id = self.insert_subscription(Subscription::new(rx_id, None, subscription_status));
        self.rx_channels[rx_id.index()] = Some(RxChannel {
            device,
            number,
            name,
            friendly_name: None,
            volume: None,
            status,
            subscription: sub_id,
        });
        rx_id
    }

    pub fn rx_channel(&self, id: RxId) -> Option<&RxChannel> {
        self.rx_channels.get(id.index())?.as_ref()
    }

    pub fn rx_channel_mut(&mut self, id: RxId) -> Option<&mut RxChannel> {
        self.rx_channels.get_mut(id.index())?.as_mut()
    }

    pub fn insert_tx_channel(&mut self, channel: TxChannel) -> TxId {
        let id = TxId::new(self.tx_channels.len());
        self.tx_channels.push(Some(channel));
        id
    }

    pub fn tx_channel(&self, id: TxId) -> Option<&TxChannel> {
        self.tx_channels.get(id.index())?.as_ref()
    }

    pub fn tx_channel_mut(&mut self, id: TxId) -> Option<&mut TxChannel> {
        self.tx_channels.get_mut(id.index())?.as_mut()
    }

    pub fn insert_subscription(&mut self, subscription: Subscription) -> SubId {
        let id = SubId::new(self.subscriptions.len());
        self.subscriptions.push(Some(subscription));
        id
    }

    pub fn subscription(&self, id: SubId) -> Option<&Subscription> {
        self.subscriptions.get(id.index())?.as_ref()
    }

    pub fn subscription_mut(&mut self, id: SubId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(id.index())?.as_mut()
    }

    /// Find an RX/TX channel on `device` by its 1-based wire number.
    pub fn rx_by_number(&self, device: DeviceId, number: u16) -> Option<RxId> {
        let device = self.device(device)?;
        device
            .rx_channels
            .iter()
            .copied()
            .find(|&id| self.rx_channel(id).map(|c| c.number) == Some(number))
    }

    pub fn tx_by_number(&self, device: DeviceId, number: u16) -> Option<TxId> {
        let device = self.device(device)?;
        device.tx_channels.iter().copied().find(|&id| {
            self.tx_channel(id)
                .and_then(|c| c.number)
                .is_some_and(|n| n == number)
        })
    }

    /// Names are unique within a device/channel-type pair, case-insensitive.
    pub fn tx_by_name(&self, device: DeviceId, name: &str) -> Option<TxId> {
        let needle = name.to_lowercase();
        let device = self.device(device)?;
        device.tx_channels.iter().copied().find(|&id| {
            self.tx_channel(id)
                .is_some_and(|c| c.name.to_lowercase() == needle)
        })
    }

    pub fn rx_by_name(&self, device: DeviceId, name: &str) -> Option<RxId> {
        let needle = name.to_lowercase();
        let device = self.device(device)?;
        device
            .rx_channels
            .iter()
            .copied()
            .find(|&id| self.rx_channel(id).is_some_and(|c| c.name.to_lowercase() == needle))
    }

    pub fn channel_name_taken(&self, device: DeviceId, kind: ChannelType, name: &str) -> bool {
        match kind {
            ChannelType::Rx => self.rx_by_name(device, name).is_some(),
            ChannelType::Tx => self.tx_by_name(device, name).is_some(),
        }
    }

    pub fn append_orphan_tx(&mut self, tx_device_name: &str, tx: TxId) {
        self.orphan_tx
            .entry(tx_device_name.to_string())
            .or_default()
            .push(tx);
    }

    /// Claim the orphan TX channel named `tx_channel_name` under device
    /// `tx_device_name`, if one exists, removing it from the orphan table.
    pub fn take_orphan_tx(&mut self, tx_device_name: &str, tx_channel_name: &str) -> Option<TxId> {
        let bucket = self.orphan_tx.get_mut(tx_device_name)?;
        let needle = tx_channel_name.to_lowercase();
        let pos = bucket
            .iter()
            .position(|&id| self.tx_channels[id.index()].as_ref().is_some_and(|c| c.name.to_lowercase() == needle))?;
        Some(bucket.remove(pos))
    }

    /// All orphans currently waiting on `tx_device_name`, without removing
    /// them — used when that device is finally discovered and every one of
    /// its orphans should be reattached in a batch.
    pub fn orphans_for(&self, tx_device_name: &str) -> Vec<TxId> {
        self.orphan_tx
            .get(tx_device_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_orphans_for(&mut self, tx_device_name: &str) {
        self.orphan_tx.remove(tx_device_name);
    }

    /// Re-point `sub`'s TX target, keeping both channels' back-reference
    /// sets consistent (invariant: `sub.tx == Some(t) iff sub in t.subscriptions`).
    pub fn rebind_subscription_tx(&mut self, sub_id: SubId, new_tx: Option<TxId>) {
        let old_tx = self.subscription(sub_id).and_then(|s| s.tx);
        if old_tx == new_tx {
            return;
        }
        if let Some(old) = old_tx {
            if let Some(channel) = self.tx_channel_mut(old) {
                channel.subscriptions.retain(|&s| s != sub_id);
            }
        }
        if let Some(new) = new_tx {
            if let Some(channel) = self.tx_channel_mut(new) {
                channel.subscriptions.push(sub_id);
            }
        }
        if let Some(sub) = self.subscription_mut(sub_id) {
            sub.tx = new_tx;
        }
    }
}

pub fn tx_device_ref_name<'a>(registry: &'a DeviceRegistry, reference: &'a TxDeviceRef) -> &'a str {
    match reference {
        TxDeviceRef::Known(id) => registry.device(*id).map(|d| d.name.as_str()).unwrap_or(""),
        TxDeviceRef::Pending(name) => name.as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::SubscriptionStatus;

    fn sample_device(name: &str) -> Device {
        Device {
            name: name.to_string(),
            ipv4: Ipv4Addr::LOCALHOST,
            arc: ArcDescriptor {
                port: 4440,
                protocol_version: (2, 8, 2),
            },
            cmc: CmcDescriptor {
                port: 8800,
                protocol_version: (2, 8, 2),
                id: None,
                manufacturer: None,
                model: None,
            },
            dbc: DbcDescriptor { port: 4455 },
            sample_rate: 48000,
            channel_counts: ChannelCounts::default(),
            rx_channels: vec![],
            tx_channels: vec![],
            connected: true,
        }
    }

    #[test]
    fn device_lookup_by_name_is_case_insensitive() {
        let mut registry = DeviceRegistry::new();
        let id = registry.insert_device(sample_device("Mixer.local."));
        assert_eq!(registry.device_by_name("mixer.local."), Some(id));
        assert_eq!(registry.device_by_name("MIXER.LOCAL."), Some(id));
    }

    #[test]
    fn subscription_back_reference_invariant_holds_after_rebind() {
        let mut registry = DeviceRegistry::new();
        let device = registry.insert_device(sample_device("amp.local."));
        let tx1 = registry.insert_tx_channel(TxChannel {
            device: TxDeviceRef::Known(device),
            number: Some(1),
            name: "out1".into(),
            friendly_name: None,
            volume: None,
            subscriptions: vec![],
        });
        let tx2 = registry.insert_tx_channel(TxChannel {
            device: TxDeviceRef::Known(device),
            number: Some(2),
            name: "out2".into(),
            friendly_name: None,
            volume: None,
            subscriptions: vec![],
        });
        let sub = registry.insert_subscription(Subscription::new(RxId::new(0), Some(tx1), SubscriptionStatus::Resolved));
        registry.tx_channel_mut(tx1).unwrap().subscriptions.push(sub);

        registry.rebind_subscription_tx(sub, Some(tx2));

        assert!(registry.tx_channel(tx1).unwrap().subscriptions.is_empty());
        assert_eq!(registry.tx_channel(tx2).unwrap().subscriptions, vec![sub]);
        assert_eq!(registry.subscription(sub).unwrap().tx, Some(tx2));
    }

    #[test]
    fn orphan_claimed_once_by_matching_name() {
        let mut registry = DeviceRegistry::new();
        let tx = registry.insert_tx_channel(TxChannel {
            device: TxDeviceRef::Pending("mic.local.".into()),
            number: None,
            name: "out2".into(),
            friendly_name: None,
            volume: None,
            subscriptions: vec![],
        });
        registry.append_orphan_tx("mic.local.", tx);
        assert_eq!(registry.take_orphan_tx("mic.local.", "out2"), Some(tx));
        assert_eq!(registry.take_orphan_tx("mic.local.", "out2"), None);
    }
}
