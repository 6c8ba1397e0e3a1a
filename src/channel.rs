//! RX/TX channel domain types.

use crate::registry::{DeviceId, SubId, TxId};
use crate::subscription::SubscriptionStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Rx,
    Tx,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rx => "rx",
            Self::Tx => "tx",
        }
    }
}

/// A TX channel's owning device: either a device we've fully discovered, or
/// a placeholder name for one we haven't (an "orphan").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxDeviceRef {
    Known(DeviceId),
    Pending(String),
}

impl TxDeviceRef {
    pub fn known(&self) -> Option<DeviceId> {
        match self {
            Self::Known(id) => Some(*id),
            Self::Pending(_) => None,
        }
    }
}

/// 0–255 with 254 reserved as the "unknown/muted-display" sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Volume(u8);

impl Volume {
    pub const MUTED_DISPLAY: u8 = 254;

    pub fn new(raw: u8) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u8 {
        self.0
    }

    pub fn is_muted_display(self) -> bool {
        self.0 == Self::MUTED_DISPLAY
    }
}

#[derive(Debug, Clone)]
pub struct RxChannel {
    pub device: DeviceId,
    /// 1-based on the wire; never -1 for an RX channel (unlike TX, RX
    /// channels only ever arrive already numbered).
    pub number: u16,
    pub name: String,
    pub friendly_name: Option<String>,
    pub volume: Option<Volume>,
    pub status: SubscriptionStatus,
    pub subscription: SubId,
}

impl RxChannel {
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct TxChannel {
    pub device: TxDeviceRef,
    /// -1 (represented as `None`) until resolved from a page response.
    pub number: Option<u16>,
    pub name: String,
    pub friendly_name: Option<String>,
    pub volume: Option<Volume>,
    /// Back-references to every Subscription currently pointing at this
    /// channel. Kept consistent with `Subscription::tx` by the reconciler.
    pub subscriptions: Vec<SubId>,
}

impl TxChannel {
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_sentinel_is_254() {
        assert!(Volume::new(254).is_muted_display());
        assert!(!Volume::new(100).is_muted_display());
    }
}
