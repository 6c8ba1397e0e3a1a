use std::net::Ipv4Addr;

/// Failures decoding or constructing wire-format packets.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("decode out of range: offset {offset} + length {length} exceeds buffer of {available} bytes")]
    DecodeOutOfRange {
        offset: usize,
        length: usize,
        available: usize,
    },
    #[error("string pointer {ptr} out of range in buffer of {available} bytes")]
    StringPointerOutOfRange { ptr: usize, available: usize },
    #[error("string at offset {offset} is not null-terminated")]
    StringNotTerminated { offset: usize },
    #[error("string at offset {offset} is not ASCII")]
    StringNotAscii { offset: usize },
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
}

/// Failures sending/receiving on a service socket. Always logged at the
/// point of occurrence rather than propagated to a caller.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("socket i/o error sending to {destination}: {source}")]
    Send {
        destination: std::net::SocketAddrV4,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to bind local service socket on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("no local network adapter serves peer {0}")]
    NoLocalAdapter(Ipv4Addr),
}

/// Errors surfaced to a façade caller: these are rejected before any packet
/// is sent, or reflect a caller asking about state the engine doesn't have.
#[derive(thiserror::Error, Debug)]
pub enum FacadeError {
    #[error("no device named {0:?} is known")]
    DeviceNotFound(String),
    #[error("device {device:?} has no {channel_type:?} channel numbered {number}")]
    ChannelNotFound {
        device: String,
        channel_type: &'static str,
        number: i32,
    },
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("sample rate {0} Hz is not one of the supported rates")]
    InvalidSampleRate(u32),
    #[error("encoding {0}-bit is not one of the supported encodings")]
    InvalidEncoding(u8),
    #[error("gain level {0} is out of range (expected 1..=5)")]
    InvalidGainLevel(u8),
    #[error("operation is unsupported on this device")]
    Unsupported,
    #[error(transparent)]
    Transport(#[from] TransportError),
}
