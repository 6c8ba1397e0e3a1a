//! Subscription routing state: the "audio patch cable" from a TX channel to
//! an RX channel, and the enumerated status codes Dante peers report for it.

use crate::registry::{RxId, TxId};

/// Routing state of one RX channel. Every RX channel has exactly one
/// `Subscription`; its `tx` is `None` when unresolved or unsubscribed.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub rx: RxId,
    pub tx: Option<TxId>,
    pub status: SubscriptionStatus,
}

impl Subscription {
    pub fn new(rx: RxId, tx: Option<TxId>, status: SubscriptionStatus) -> Self {
        Self { rx, tx, status }
    }
}

/// Status codes reported by Dante peers for a subscription, per the wire
/// protocol's single flat status space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    None,
    Unresolved,
    Resolved,
    ResolveFail,
    SubscribeSelf,
    ResolvedNone,
    Idle,
    InProgress,
    Dynamic,
    Static,
    Manual,
    NoConnection,
    ChannelFormat,
    BundleFormat,
    NoRx,
    NoTx,
    RxFail,
    TxFail,
    QosFailRx,
    QosFailTx,
    TxRejectedAddr,
    InvalidMsg,
    ChannelLatency,
    ClockDomain,
    Unsupported,
    RxLinkDown,
    TxLinkDown,
    DynamicProtocol,
    SystemFail,
    NoData,
    FlagNoAdvert,
    FlagNoDbcp,
    /// Any code the wire protocol may emit that isn't in the table above.
    Unknown(u32),
}

impl SubscriptionStatus {
    /// Map a raw wire status code to its variant, per the code table in the
    /// external-interfaces section of the protocol documentation.
    pub fn derive(code: u32) -> Self {
        match code {
            0 => Self::None,
            1 => Self::Unresolved,
            2 => Self::Resolved,
            3 => Self::ResolveFail,
            4 => Self::SubscribeSelf,
            5 => Self::ResolvedNone,
            7 => Self::Idle,
            8 => Self::InProgress,
            9 => Self::Dynamic,
            10 => Self::Static,
            14 => Self::Manual,
            15 => Self::NoConnection,
            16 => Self::ChannelFormat,
            17 => Self::BundleFormat,
            18 => Self::NoRx,
            19 => Self::RxFail,
            20 => Self::NoTx,
            21 => Self::TxFail,
            22 => Self::QosFailRx,
            23 => Self::QosFailTx,
            24 => Self::TxRejectedAddr,
            25 => Self::InvalidMsg,
            26 => Self::ChannelLatency,
            27 => Self::ClockDomain,
            28 => Self::Unsupported,
            29 => Self::RxLinkDown,
            30 => Self::TxLinkDown,
            31 => Self::DynamicProtocol,
            255 => Self::SystemFail,
            256 => Self::FlagNoAdvert,
            512 => Self::FlagNoDbcp,
            65536 => Self::NoData,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Unresolved => 1,
            Self::Resolved => 2,
            Self::ResolveFail => 3,
            Self::SubscribeSelf => 4,
            Self::ResolvedNone => 5,
            Self::Idle => 7,
            Self::InProgress => 8,
            Self::Dynamic => 9,
            Self::Static => 10,
            Self::Manual => 14,
            Self::NoConnection => 15,
            Self::ChannelFormat => 16,
            Self::BundleFormat => 17,
            Self::NoRx => 18,
            Self::RxFail => 19,
            Self::NoTx => 20,
            Self::TxFail => 21,
            Self::QosFailRx => 22,
            Self::QosFailTx => 23,
            Self::TxRejectedAddr => 24,
            Self::InvalidMsg => 25,
            Self::ChannelLatency => 26,
            Self::ClockDomain => 27,
            Self::Unsupported => 28,
            Self::RxLinkDown => 29,
            Self::TxLinkDown => 30,
            Self::DynamicProtocol => 31,
            Self::SystemFail => 255,
            Self::FlagNoAdvert => 256,
            Self::FlagNoDbcp => 512,
            Self::NoData => 65536,
            Self::Unknown(code) => code,
        }
    }

    /// Human-readable strings for display, mirroring the upstream label
    /// tables (several codes have more than one phrasing in circulation).
    pub fn labels(self) -> &'static [&'static str] {
        match self {
            Self::None => &["none", "No subscription for this channel"],
            Self::Unresolved => &[
                "Subscription unresolved",
                "Unresolved",
                "cannot find this channel on the network",
            ],
            Self::Resolved => &["Subscription resolved", "Resolved", "channel found; preparing to create flow"],
            Self::ResolveFail => &[
                "Can't resolve subscription",
                "Resolve failed",
                "received an unexpected error when trying to resolve this channel",
            ],
            Self::SubscribeSelf => &["Subscribed to own signal", "Connected (self)"],
            Self::ResolvedNone => &[],
            Self::Idle => &[
                "Subscription idle",
                "Flow creation idle",
                "Insufficient information to create flow",
            ],
            Self::InProgress => &[
                "Subscription in progress",
                "Flow creation in progress",
                "communicating with transmitter to create flow",
            ],
            Self::Dynamic => &["Connected (unicast)"],
            Self::Static => &["Connected (multicast)"],
            Self::Manual => &["Manually Configured"],
            Self::NoConnection => &["No connection", "could not communicate with transmitter"],
            Self::ChannelFormat => &["Incorrect channel format", "source and destination channels do not match"],
            Self::BundleFormat => &[
                "Incorrect flow format",
                "Incorrect multicast flow format",
                "flow format incompatible with receiver",
            ],
            Self::NoRx => &[
                "No Receive flows",
                "No more flows (RX)",
                "receiver cannot support any more flows",
                "Is receiver subscribed to too many different devices?",
            ],
            Self::NoTx => &[
                "No Transmit flows",
                "No more flows (TX)",
                "transmitter cannot support any more flows",
                "Reduce fan out by unsubscribing receivers or switching to multicast.",
            ],
            Self::RxFail => &["Receive failure", "Receiver setup failed", "unexpected error on receiver"],
            Self::TxFail => &["Transmit failure", "Transmitter setup failed", "unexpected error on transmitter"],
            Self::QosFailRx => &[
                "Receive bandwidth exceeded",
                "receiver can't reliably support any more inbound flows",
                "Reduce number of subscriptions or look for excessive multicast.",
            ],
            Self::QosFailTx => &[
                "Transmit bandwidth exceeded",
                "transmitter can't reliably support any more outbound flows",
                "Reduce fan out by unsubscribing receivers or switching to multicast.",
            ],
            Self::TxRejectedAddr => &[
                "Subscription address rejected by transmitter",
                "Transmitter rejected address",
                "transmitter can't talk to receiver's address",
                "Check for address change on transmitter or receiver.",
            ],
            Self::InvalidMsg => &[
                "Subscription message rejected by transmitter",
                "Transmitter rejected message",
                "transmitter can't understand receiver's request",
            ],
            Self::ChannelLatency => &[
                "No suitable channel latency",
                "Incorrect channel latencies",
                "source demands more latency than the receiver has available",
            ],
            Self::ClockDomain => &[
                "Mismatched clock domains",
                "The transmitter and receiver are not part of the same clock domain",
            ],
            Self::Unsupported => &[
                "Unsupported feature",
                "The subscription cannot be completed as it requires features that are not supported on this device",
            ],
            Self::RxLinkDown => &["RX link down", "The subscription cannot be completed as RX link is down"],
            Self::TxLinkDown => &["TX link down", "The subscription cannot be completed as TX link is down"],
            Self::DynamicProtocol => &["Dynamic Protocol"],
            Self::SystemFail => &[
                "System failure",
                "Incorrect multicast flow format",
                "flow format incompatible with receiver",
            ],
            Self::NoData => &["No audio data."],
            Self::FlagNoAdvert => &["No audio data."],
            Self::FlagNoDbcp => &[],
            Self::Unknown(_) => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_and_code_are_inverses_for_known_codes() {
        let codes = [
            0, 1, 2, 3, 4, 5, 7, 8, 9, 10, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
            28, 29, 30, 31, 255, 256, 512, 65536,
        ];
        for code in codes {
            assert_eq!(SubscriptionStatus::derive(code).code(), code);
        }
    }

    #[test]
    fn unknown_code_round_trips_via_unknown_variant() {
        let status = SubscriptionStatus::derive(9001);
        assert_eq!(status, SubscriptionStatus::Unknown(9001));
        assert_eq!(status.code(), 9001);
    }
}
