//! Byte-level codec utilities for the Audinate wire format: big-endian
//! integers, pointer-resolved ASCII string tables, the packed protocol
//! version hextet, and MAC address packing.

use std::net::Ipv4Addr;

use crate::error::{CodecError, TransportError};

/// Decode a big-endian unsigned integer of `length` bytes (default 2) at
/// `offset` in `source`.
pub fn decode_integer(source: &[u8], offset: usize, length: usize) -> Result<u64, CodecError> {
    let end = offset
        .checked_add(length)
        .ok_or(CodecError::DecodeOutOfRange {
            offset,
            length,
            available: source.len(),
        })?;
    let slice = source
        .get(offset..end)
        .ok_or(CodecError::DecodeOutOfRange {
            offset,
            length,
            available: source.len(),
        })?;
    let mut value: u64 = 0;
    for byte in slice {
        value = (value << 8) | (*byte as u64);
    }
    Ok(value)
}

/// Convenience wrapper over [`decode_integer`] for the common 2-byte case.
pub fn decode_u16(source: &[u8], offset: usize) -> Result<u16, CodecError> {
    decode_integer(source, offset, 2).map(|v| v as u16)
}

/// Convenience wrapper over [`decode_integer`] for the common 4-byte case.
pub fn decode_u32(source: &[u8], offset: usize) -> Result<u32, CodecError> {
    decode_integer(source, offset, 4).map(|v| v as u32)
}

/// Encode `integer` into a big-endian buffer of `length` bytes (2 or 4).
pub fn encode_integer(integer: u64, length: usize) -> Vec<u8> {
    let full = integer.to_be_bytes();
    full[full.len() - length..].to_vec()
}

pub fn encode_u16(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Follow a pointer into `source` and read a null-terminated 7-bit ASCII
/// string. A null pointer (`0`) means "absent" and decodes to `None`.
pub fn decode_string(source: &[u8], ptr: usize) -> Result<Option<String>, CodecError> {
    if ptr == 0 {
        return Ok(None);
    }
    let tail = source
        .get(ptr..)
        .ok_or(CodecError::StringPointerOutOfRange {
            ptr,
            available: source.len(),
        })?;
    let nul_pos = tail
        .iter()
        .position(|&b| b == 0)
        .ok_or(CodecError::StringNotTerminated { offset: ptr })?;
    let text = &tail[..nul_pos];
    if !text.is_ascii() {
        return Err(CodecError::StringNotAscii { offset: ptr });
    }
    Ok(Some(String::from_utf8_lossy(text).into_owned()))
}

/// Encode `string` as ASCII plus a single null terminator, for appending to
/// an outgoing packet's string table.
pub fn encode_string(string: &str) -> Vec<u8> {
    debug_assert!(string.is_ascii(), "dante names must be ASCII: {string:?}");
    debug_assert!(!string.contains('\0'), "dante names may not contain interior nulls");
    let mut bytes = string.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

/// (major, minor, patch) as exposed in ARC/CMC mDNS TXT records and packed
/// into ARC/CMC packet headers.
pub type ProtocolVersion = (u8, u8, u8);

/// Decode the two-byte `MN PP` protocol version field found in ARC/CMC
/// packet headers: the high/low nibbles of the first byte are major/minor,
/// the second byte is the patch level.
pub fn decode_protocol_version(source: &[u8]) -> Result<ProtocolVersion, CodecError> {
    let bytes = source
        .get(0..2)
        .ok_or(CodecError::DecodeOutOfRange {
            offset: 0,
            length: 2,
            available: source.len(),
        })?;
    let major = bytes[0] >> 4;
    let minor = bytes[0] & 0x0F;
    let patch = bytes[1];
    Ok((major, minor, patch))
}

/// Encode a protocol version triple back into the wire's `MN PP` hextet.
pub fn encode_protocol_version(version: ProtocolVersion) -> [u8; 2] {
    let (major, minor, patch) = version;
    [(major << 4) | (minor & 0x0F), patch]
}

/// Parse the dotted-ASCII protocol version found in mDNS TXT record values
/// (e.g. `"2.8.2"`), as distinct from the packed wire encoding above.
pub fn decode_protocol_version_from_mdns(text: &str) -> Result<ProtocolVersion, CodecError> {
    let mut parts = text.split('.');
    let mut next = || -> Result<u8, CodecError> {
        parts
            .next()
            .and_then(|s| s.parse::<u8>().ok())
            .ok_or(CodecError::Malformed("malformed mDNS protocol version"))
    };
    let major = next()?;
    let minor = next()?;
    let patch = next()?;
    Ok((major, minor, patch))
}

/// A MAC-48 address, packed as 6 raw bytes on the wire.
pub fn decode_mac_address(source: &[u8]) -> Result<[u8; 6], CodecError> {
    let slice = source.get(0..6).ok_or(CodecError::DecodeOutOfRange {
        offset: 0,
        length: 6,
        available: source.len(),
    })?;
    let mut mac = [0u8; 6];
    mac.copy_from_slice(slice);
    Ok(mac)
}

pub fn encode_mac_address(mac: [u8; 6]) -> [u8; 6] {
    mac
}

pub fn format_mac_address(mac: [u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Assemble the 10-byte ARC/CMC command header (version, length, message
/// index, command code, direction) followed by `body`, then patch the
/// length field now that the full frame size is known.
pub fn encode_command_frame(
    protocol_version: ProtocolVersion,
    message_index: u16,
    command_code: [u8; 2],
    body: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(10 + body.len());
    frame.extend_from_slice(&encode_protocol_version(protocol_version));
    frame.extend_from_slice(&[0, 0]); // length, patched below
    frame.extend_from_slice(&encode_u16(message_index));
    frame.extend_from_slice(&command_code);
    frame.extend_from_slice(&crate::message::MessageType::Send.to_bytes());
    frame.extend_from_slice(body);
    let len = frame.len() as u16;
    frame[2..4].copy_from_slice(&encode_u16(len));
    frame
}

/// Given a peer IPv4, find the local adapter that would route to it and
/// return its IPv4 and MAC address. Falls back to the system's first
/// non-loopback IPv4 adapter when no adapter shares the peer's subnet.
pub fn local_adapter_serving(peer: Ipv4Addr) -> Result<(Ipv4Addr, [u8; 6]), TransportError> {
    let interfaces = if_addrs::get_if_addrs().map_err(|source| TransportError::Bind {
        port: 0,
        source,
    })?;

    let matching = interfaces.iter().find(|iface| {
        if iface.is_loopback() {
            return false;
        }
        match &iface.addr {
            if_addrs::IfAddr::V4(v4) => {
                let network = u32::from(v4.ip) & u32::from(v4.netmask);
                let peer_masked = u32::from(peer) & u32::from(v4.netmask);
                network == peer_masked
            }
            if_addrs::IfAddr::V6(_) => false,
        }
    });

    let fallback = interfaces
        .iter()
        .find(|iface| !iface.is_loopback() && matches!(iface.addr, if_addrs::IfAddr::V4(_)));

    let chosen = matching.or(fallback).ok_or(TransportError::NoLocalAdapter(peer))?;

    let ip = match chosen.addr {
        if_addrs::IfAddr::V4(ref v4) => v4.ip,
        if_addrs::IfAddr::V6(_) => unreachable!("filtered to V4 above"),
    };

    let mac = mac_address::mac_address_by_name(&chosen.name)
        .ok()
        .flatten()
        .map(|m| m.bytes())
        .unwrap_or([0u8; 6]);

    Ok((ip, mac))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_round_trip_2_bytes() {
        for n in [0u64, 1, 255, 256, 65535] {
            let encoded = encode_integer(n, 2);
            assert_eq!(decode_integer(&encoded, 0, 2).unwrap(), n);
        }
    }

    #[test]
    fn integer_round_trip_4_bytes() {
        for n in [0u64, 1, 65536, u32::MAX as u64] {
            let encoded = encode_integer(n, 4);
            assert_eq!(decode_integer(&encoded, 0, 4).unwrap(), n);
        }
    }

    #[test]
    fn decode_integer_out_of_range() {
        let buf = [0u8; 2];
        assert!(decode_integer(&buf, 1, 2).is_err());
    }

    #[test]
    fn string_round_trip_with_offset() {
        let mut packet = vec![0xAAu8; 10];
        let ptr = packet.len() as u16;
        packet.extend(encode_string("Stage-Left"));
        let decoded = decode_string(&packet, ptr as usize).unwrap();
        assert_eq!(decoded.as_deref(), Some("Stage-Left"));
    }

    #[test]
    fn null_pointer_decodes_to_absent() {
        let packet = encode_string("ignored");
        assert_eq!(decode_string(&packet, 0).unwrap(), None);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let packet = vec![b'a', b'b', b'c'];
        assert!(decode_string(&packet, 0).is_err());
    }

    #[test]
    fn protocol_version_round_trip() {
        for major in 0..10u8 {
            for minor in 0..10u8 {
                for patch in [0u8, 1, 127, 255] {
                    let encoded = encode_protocol_version((major, minor, patch));
                    assert_eq!(decode_protocol_version(&encoded).unwrap(), (major, minor, patch));
                }
            }
        }
    }

    #[test]
    fn protocol_version_from_mdns_matches_wire_ordering() {
        let wire = decode_protocol_version(&encode_protocol_version((2, 8, 2))).unwrap();
        let mdns = decode_protocol_version_from_mdns("2.8.2").unwrap();
        assert_eq!(wire, mdns);
    }

    #[test]
    fn command_frame_length_field_matches_total_size() {
        let frame = encode_command_frame((2, 8, 2), 7, [0x10, 0x00], &[0xAA; 6]);
        assert_eq!(frame.len(), 10 + 6);
        assert_eq!(decode_u16(&frame, 2).unwrap() as usize, frame.len());
        assert_eq!(decode_u16(&frame, 4).unwrap(), 7);
        assert_eq!(&frame[6..8], &[0x10, 0x00]);
        assert_eq!(&frame[8..10], &crate::message::MessageType::Send.to_bytes());
    }

    #[test]
    fn mac_address_round_trip() {
        let mac = [0x52, 0x54, 0x00, 0x38, 0x5e, 0xba];
        let encoded = encode_mac_address(mac);
        assert_eq!(decode_mac_address(&encoded).unwrap(), mac);
        assert_eq!(format_mac_address(mac), "52:54:00:38:5e:ba");
    }
}
