//! Audio Routing Channel: the ARC command builders and the page/dialect
//! math shared by every channel- and device-level operation. Keeping these
//! as pure functions (command code + body in, nothing mutated) lets the
//! façade own the actual socket and registry state.

use std::net::SocketAddrV4;
use std::time::Instant;

use crate::codec::{encode_command_frame, encode_integer, encode_string, ProtocolVersion};
use crate::error::TransportError;
use crate::message::PendingEntry;
use crate::registry::{ArcDescriptor, Device};
use crate::service::{EngineConfig, PushHandler, ServiceHandle};

pub const SERVICE_HEADER_LENGTH: usize = 10;
pub const SERVICE_PORT: u16 = 4440;
pub const SERVICE_TYPE_MDNS: &str = "_netaudio-arc._udp.local.";
pub const MAX_CHANNELS_PER_PAGE: u16 = 16;

const NEW_DIALECT_FLOOR: ProtocolVersion = (2, 8, 2);

const NULL_HEXTET: [u8; 2] = [0x00, 0x00];

/// The ARC/CMC packet layout changed at 2.8.2; everything before that
/// (2.7.x and 2.8.1) uses the legacy, more compact layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Legacy,
    New,
}

impl Dialect {
    pub fn for_version(version: ProtocolVersion) -> Self {
        if version >= NEW_DIALECT_FLOOR {
            Self::New
        } else {
            Self::Legacy
        }
    }
}

/// How many channels are expected on `current_page` (0-indexed) out of
/// `total_channel_count` laid out `MAX_CHANNELS_PER_PAGE` to a page.
pub fn channels_on_page(current_page: u16, total_channel_count: u16) -> u16 {
    if current_page < total_channel_count / MAX_CHANNELS_PER_PAGE {
        MAX_CHANNELS_PER_PAGE
    } else {
        total_channel_count % MAX_CHANNELS_PER_PAGE
    }
}

pub fn pages_for(channel_count: u16) -> u16 {
    channel_count.div_ceil(MAX_CHANNELS_PER_PAGE).max(1)
}

pub type Body = Vec<u8>;

pub fn request_all_channels() -> ([u8; 2], Body) {
    ([0x10, 0x00], Vec::new())
}

pub fn request_device_info() -> ([u8; 2], Body) {
    ([0x10, 0x03], Vec::new())
}

pub fn request_name() -> ([u8; 2], Body) {
    ([0x10, 0x02], Vec::new())
}

/// `page` is never encoded into the outgoing body for either dialect (the
/// device returns whichever page of `MAX_CHANNELS_PER_PAGE` channels it
/// pleases, and the response itself carries no decodable page number
/// either — see [`crate::device::parse_rx_channel_page`]).
pub fn request_rx_channels(dialect: Dialect, page: u16) -> ([u8; 2], Body) {
    match dialect {
        Dialect::New => {
            let mut body = Vec::new();
            body.extend_from_slice(&NULL_HEXTET.repeat(3));
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&NULL_HEXTET.repeat(6));
            ([0x34, 0x00], body)
        }
        Dialect::Legacy => {
            let mut body = Vec::new();
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&encode_integer(((page << 4) + 1) as u64, 2));
            body.extend_from_slice(&NULL_HEXTET);
            ([0x30, 0x00], body)
        }
    }
}

pub fn request_tx_channels(dialect: Dialect, page: u16, friendly_names: bool) -> ([u8; 2], Body) {
    match dialect {
        Dialect::New => {
            let mut body = Vec::new();
            body.extend_from_slice(&NULL_HEXTET.repeat(3));
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&NULL_HEXTET.repeat(6));
            ([0x24, 0x00], body)
        }
        Dialect::Legacy => {
            let code = if friendly_names { [0x20, 0x10] } else { [0x20, 0x00] };
            let mut body = Vec::new();
            body.extend_from_slice(&[0x00, 0x01]);
            body.extend_from_slice(&encode_integer(((page << 4) + 1) as u64, 2));
            body.extend_from_slice(&NULL_HEXTET);
            (code, body)
        }
    }
}

fn wrap_set_name(code: [u8; 2], preamble: &[u8], new_name: &str) -> ([u8; 2], Body) {
    let mut body = Vec::new();
    body.extend_from_slice(preamble);
    body.extend_from_slice(&encode_integer(
        (SERVICE_HEADER_LENGTH + preamble.len() + 2) as u64,
        2,
    ));
    body.extend_from_slice(&encode_string(new_name));
    (code, body)
}

pub fn rename_rx_channel(dialect: Dialect, number: u16, new_name: &str) -> ([u8; 2], Body) {
    let preamble: Body = match dialect {
        Dialect::New => {
            let mut p = NULL_HEXTET.repeat(4);
            p.extend_from_slice(&[0x00, 0x01]);
            p.extend_from_slice(&encode_integer(number as u64, 2));
            p.extend_from_slice(&[0x00, 0x03]);
            p
        }
        Dialect::Legacy => {
            let mut p = vec![0x00, 0x01];
            p.extend_from_slice(&encode_integer(number as u64, 2));
            p
        }
    };
    let code = match dialect {
        Dialect::New => [0x34, 0x01],
        Dialect::Legacy => [0x30, 0x01],
    };
    wrap_set_name(code, &preamble, new_name)
}

pub fn rename_tx_channel(dialect: Dialect, number: u16, new_name: &str) -> ([u8; 2], Body) {
    let preamble: Body = match dialect {
        Dialect::New => {
            let mut p = NULL_HEXTET.repeat(4);
            p.extend_from_slice(&[0x00, 0x01]);
            p.extend_from_slice(&encode_integer(number as u64, 2));
            p.extend_from_slice(&[0x00, 0x03]);
            p
        }
        Dialect::Legacy => {
            let mut p = vec![0x00, 0x01];
            p.extend_from_slice(&NULL_HEXTET);
            p.extend_from_slice(&encode_integer(number as u64, 2));
            p
        }
    };
    let code = match dialect {
        Dialect::New => [0x24, 0x38],
        Dialect::Legacy => [0x20, 0x13],
    };
    wrap_set_name(code, &preamble, new_name)
}

pub fn rename_device(new_name: &str) -> ([u8; 2], Body) {
    ([0x10, 0x01], encode_string(new_name))
}

pub fn set_latency(latency_ms: u32) -> ([u8; 2], Body) {
    let latency_encoded = encode_integer((latency_ms as u64) * 1_000_000, 4);
    let mut body = Vec::new();
    body.extend_from_slice(&[0x05, 0x03]);
    body.extend_from_slice(&[0x82, 0x05]);
    body.extend_from_slice(&encode_integer((SERVICE_HEADER_LENGTH + 22) as u64, 2));
    body.extend_from_slice(&[0x02, 0x11]);
    body.extend_from_slice(&[0x00, 0x10]);
    body.extend_from_slice(&[0x83, 0x01]);
    body.extend_from_slice(&encode_integer((SERVICE_HEADER_LENGTH + 22 + 4) as u64, 2));
    body.extend_from_slice(&[0x82, 0x19]);
    body.extend_from_slice(&[0x83, 0x01]);
    body.extend_from_slice(&[0x83, 0x02]);
    body.extend_from_slice(&[0x83, 0x06]);
    body.extend_from_slice(&latency_encoded);
    body.extend_from_slice(&latency_encoded);
    ([0x11, 0x01], body)
}

pub fn subscribe(
    dialect: Dialect,
    protocol_version: ProtocolVersion,
    rx_number: u16,
    tx_channel_name: &str,
    tx_device_name: &str,
) -> ([u8; 2], Body) {
    let (padding_len, code, preamble): (usize, [u8; 2], Body) = match dialect {
        Dialect::New => {
            let mut p = NULL_HEXTET.repeat(3);
            p.extend_from_slice(&[0x08, 0x00]);
            p.extend_from_slice(&[0x02, 0x01]);
            p.extend_from_slice(&encode_integer(rx_number as u64, 2));
            p.extend_from_slice(&[0x00, 0x03]);
            (4, [0x34, 0x10], p)
        }
        Dialect::Legacy => {
            let first = if protocol_version == (2, 8, 1) {
                [0x10, 0x01]
            } else {
                [0x02, 0x01]
            };
            let mut p = first.to_vec();
            p.extend_from_slice(&encode_integer(rx_number as u64, 2));
            (6, [0x30, 0x10], p)
        }
    };
    let padding = vec![0u8; padding_len];
    let string_idx = SERVICE_HEADER_LENGTH + preamble.len() + 4 + padding.len();
    let tx_name_encoded = encode_string(tx_channel_name);

    let mut body = Vec::new();
    body.extend_from_slice(&preamble);
    body.extend_from_slice(&encode_integer(string_idx as u64, 2));
    body.extend_from_slice(&encode_integer((string_idx + tx_name_encoded.len()) as u64, 2));
    body.extend_from_slice(&padding);
    body.extend_from_slice(&tx_name_encoded);
    body.extend_from_slice(&encode_string(tx_device_name));
    (code, body)
}

pub fn unsubscribe(dialect: Dialect, rx_number: u16) -> ([u8; 2], Body) {
    match dialect {
        Dialect::New => {
            let mut body = NULL_HEXTET.repeat(3);
            body.extend_from_slice(&[0x08, 0x00]);
            body.extend_from_slice(&[0x08, 0x01]);
            body.extend_from_slice(&encode_integer(rx_number as u64, 2));
            body.extend_from_slice(&[0x00, 0x03]);
            body.extend_from_slice(&NULL_HEXTET.repeat(2));
            ([0x34, 0x10], body)
        }
        Dialect::Legacy => {
            let mut body = vec![0x10, 0x01];
            body.extend_from_slice(&encode_integer(rx_number as u64, 2));
            ([0x30, 0x10], body)
        }
    }
}

pub type Callback = Box<dyn FnOnce(&[u8]) + Send>;

/// The ARC service socket. The peer listens on UDP 4440; our own local
/// socket binds `SERVICE_PORT + 40000` by convention (`_PORT_MAGIC` in the
/// original), so it never collides with the peer's listening port.
pub struct ArcService {
    handle: ServiceHandle,
}

impl ArcService {
    pub fn spawn(config: EngineConfig, on_push: PushHandler) -> Result<Self, TransportError> {
        Ok(Self {
            handle: ServiceHandle::spawn(SERVICE_PORT + 40000, config, on_push)?,
        })
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn command(
        &self,
        ipv4: std::net::Ipv4Addr,
        arc: &ArcDescriptor,
        command_code: [u8; 2],
        body: &[u8],
        callback: Option<Callback>,
    ) {
        let index = self.handle.next_message_index();
        let frame = encode_command_frame(arc.protocol_version, index, command_code, body);
        let destination = SocketAddrV4::new(ipv4, arc.port);
        self.handle.send(
            destination,
            index,
            PendingEntry {
                command_code,
                original_bytes: frame.clone(),
                callback: callback.map(|cb| cb as Box<dyn FnOnce(&[u8]) + Send>),
                enqueued_at: Instant::now(),
            },
            frame,
        );
    }
}

/// Helper mirroring [`ArcService::command`]'s signature shape but taking a
/// [`Device`] directly, for call sites that already hold one.
pub fn command_for_device(
    service: &ArcService,
    device: &Device,
    command_code: [u8; 2],
    body: &[u8],
    callback: Option<Callback>,
) {
    service.command(device.ipv4, &device.arc, command_code, body, callback);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_on_page_splits_evenly() {
        assert_eq!(channels_on_page(0, 17), 16);
        assert_eq!(channels_on_page(1, 17), 1);
        assert_eq!(pages_for(17), 2);
    }

    #[test]
    fn channels_on_page_handles_exact_multiple() {
        assert_eq!(channels_on_page(0, 32), 16);
        assert_eq!(channels_on_page(1, 32), 16);
        assert_eq!(pages_for(32), 2);
    }

    #[test]
    fn dialect_boundary_is_2_8_2() {
        assert_eq!(Dialect::for_version((2, 8, 2)), Dialect::New);
        assert_eq!(Dialect::for_version((2, 8, 1)), Dialect::Legacy);
        assert_eq!(Dialect::for_version((2, 7, 9)), Dialect::Legacy);
        assert_eq!(Dialect::for_version((3, 0, 0)), Dialect::New);
    }

    #[test]
    fn set_latency_10ms_encodes_expected_value() {
        let (code, body) = set_latency(10);
        assert_eq!(code, [0x11, 0x01]);
        let encoded = encode_integer(10_000_000, 4);
        assert_eq!(&body[body.len() - 4..], &encoded[..]);
        assert_eq!(&body[body.len() - 8..body.len() - 4], &encoded[..]);
    }

    #[test]
    fn subscribe_body_places_tx_name_pointers_consistently() {
        let (code, body) = subscribe(Dialect::New, (2, 8, 2), 3, "out1", "amp.local.");
        assert_eq!(code, [0x34, 0x10]);
        // string pointers point past the header into this very body, so
        // decode_string(full_frame, ptr) should recover "out1".
        let frame = encode_command_frame((2, 8, 2), 1, code, &body);
        // preamble is 14 bytes for the New dialect; the two string
        // pointers sit immediately after it.
        let ptr1 = crate::codec::decode_u16(&frame, 10 + 14).unwrap() as usize;
        assert_eq!(crate::codec::decode_string(&frame, ptr1).unwrap().as_deref(), Some("out1"));
    }

    #[test]
    fn rename_rx_channel_picks_dialect_specific_preamble_length() {
        let (code_new, body_new) = rename_rx_channel(Dialect::New, 1, "In-1");
        let (code_legacy, body_legacy) = rename_rx_channel(Dialect::Legacy, 1, "In-1");
        assert_eq!(code_new, [0x34, 0x01]);
        assert_eq!(code_legacy, [0x30, 0x01]);
        assert!(body_new.len() > body_legacy.len());
    }
}
