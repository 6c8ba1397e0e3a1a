//! Control & Monitoring Channel: volume-level subscribe/unsubscribe frames.
//! CMC shares ARC's 10-byte header shape but everything past it is its own
//! format, so it gets its own command builders rather than reusing ARC's.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

use crate::codec::{encode_command_frame, encode_integer, encode_mac_address, encode_string, ProtocolVersion};
use crate::error::TransportError;
use crate::message::PendingEntry;
use crate::registry::CmcDescriptor;
use crate::service::{EngineConfig, PushHandler, ServiceHandle};

pub const SERVICE_HEADER_LENGTH: usize = 10;
pub const SERVICE_PORT: u16 = 8800;
pub const SERVICE_TYPE_MDNS: &str = "_netaudio-cmc._udp.local.";

const NULL_HEXTET: [u8; 2] = [0x00, 0x00];

/// Three length fields embedded in the volume start/stop frames, derived
/// from the device name's encoded length. The `12 - (len + len%2) + len*2`
/// formula is opaque but matches observed packet traces exactly; treat it
/// as a magic constant rather than reverse-engineering its intent.
fn lengths_for(device_name: &str) -> (u16, u16, u16) {
    let len = device_name.len() as i64;
    let length = 12 - (len + len % 2) + len * 2;
    let length = length as u16;
    (length, length + 2, length + 6)
}

pub fn command_volume_start(
    device_name: &str,
    local_mac: [u8; 6],
    local_ip: Ipv4Addr,
    volume_port: u16,
    timeout: bool,
) -> ([u8; 2], Vec<u8>) {
    let (len1, len2, len3) = lengths_for(device_name);
    let mut body = Vec::new();
    body.extend_from_slice(&[0x03, 0xe4]);
    body.extend_from_slice(&encode_mac_address(local_mac));
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&[0x00, 0x04]);
    body.extend_from_slice(&encode_integer(len1 as u64, 2));
    body.extend_from_slice(&[0x00, 0x02]);
    body.extend_from_slice(&encode_integer(len2 as u64, 2));
    body.extend_from_slice(&[0x00, 0x0a]);
    body.extend_from_slice(&encode_string(device_name));
    body.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x01]);
    body.extend_from_slice(&encode_integer(len3 as u64, 2));
    body.extend_from_slice(&[0x00, 0x01]);
    body.extend_from_slice(&encode_integer(volume_port as u64, 2));
    body.extend_from_slice(&encode_integer(timeout as u64, 2));
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&local_ip.octets());
    body.extend_from_slice(&encode_integer(volume_port as u64, 2));
    body.extend_from_slice(&NULL_HEXTET.repeat(3));
    body.extend_from_slice(&encode_integer(volume_port as u64, 2));
    body.extend_from_slice(&NULL_HEXTET);
    ([0x30, 0x10], body)
}

pub fn command_volume_stop(
    device_name: &str,
    local_mac: [u8; 6],
    local_ip: Ipv4Addr,
    volume_port: u16,
) -> ([u8; 2], Vec<u8>) {
    let (len1, len2, len3) = lengths_for(device_name);
    let padding_len = if device_name.len() % 2 == 0 { 5 } else { 4 };
    let mut body = Vec::new();
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&encode_mac_address(local_mac));
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&[0x00, 0x04]);
    body.extend_from_slice(&encode_integer(len1 as u64, 2));
    body.extend_from_slice(&[0x00, 0x01]);
    body.extend_from_slice(&encode_integer(len2 as u64, 2));
    body.extend_from_slice(&[0x00, 0x0a]);
    body.extend_from_slice(&encode_string(device_name));
    body.extend_from_slice(&vec![0u8; padding_len]);
    body.extend_from_slice(&encode_integer(len3 as u64, 2));
    body.extend_from_slice(&[0x00, 0x01]);
    body.extend_from_slice(&encode_integer(volume_port as u64, 2));
    body.extend_from_slice(&[0x00, 0x01]);
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&local_ip.octets());
    body.extend_from_slice(&NULL_HEXTET);
    body.extend_from_slice(&NULL_HEXTET);
    ([0x30, 0x10], body)
}

/// Byte 15 of a volume-start reply is `0xFF` when the device doesn't
/// support volume-level reporting at all.
pub fn is_volume_unsupported(response: &[u8]) -> bool {
    response.get(15) == Some(&0xFF)
}

pub type Callback = Box<dyn FnOnce(&[u8]) + Send>;

/// The peer listens on UDP 8800; our own local socket binds
/// `SERVICE_PORT + 40000` by convention, same as the other command services.
pub struct CmcService {
    handle: ServiceHandle,
}

impl CmcService {
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
        ipv4: Ipv4Addr,
        cmc: &CmcDescriptor,
        command_code: [u8; 2],
        body: &[u8],
        callback: Option<Callback>,
    ) {
        self.command_with_version(ipv4, cmc.port, cmc.protocol_version, command_code, body, callback)
    }

    fn command_with_version(
        &self,
        ipv4: Ipv4Addr,
        port: u16,
        protocol_version: ProtocolVersion,
        command_code: [u8; 2],
        body: &[u8],
        callback: Option<Callback>,
    ) {
        let index = self.handle.next_message_index();
        let frame = encode_command_frame(protocol_version, index, command_code, body);
        let destination = SocketAddrV4::new(ipv4, port);
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lengths_formula_matches_observed_traces() {
        // "amp.local." has 10 chars: 12 - (10+0) + 20 = 22
        assert_eq!(lengths_for("amp.local."), (22, 24, 28));
    }

    #[test]
    fn volume_start_embeds_port_three_times() {
        let (code, body) = command_volume_start(
            "amp.local.",
            [0x52, 0x54, 0x00, 0x38, 0x5e, 0xba],
            Ipv4Addr::new(192, 168, 1, 10),
            8751,
            true,
        );
        assert_eq!(code, [0x30, 0x10]);
        let port_bytes = encode_integer(8751, 2);
        let occurrences = body
            .windows(2)
            .filter(|w| *w == port_bytes.as_slice())
            .count();
        assert!(occurrences >= 3);
    }

    #[test]
    fn unsupported_sentinel_detected_at_byte_15() {
        let mut response = vec![0u8; 20];
        response[15] = 0xFF;
        assert!(is_volume_unsupported(&response));
        response[15] = 0x00;
        assert!(!is_volume_unsupported(&response));
    }
}
