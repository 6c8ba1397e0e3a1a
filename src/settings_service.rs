//! Multicast Control and Monitoring ("settings") service: a single
//! `0xFFFF`-magic framing shared by every get/set command, unicast to
//! UDP 8700 on the target device.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Instant;

use crate::codec::{encode_integer, encode_mac_address};
use crate::error::{FacadeError, TransportError};
use crate::message::PendingEntry;
use crate::service::{EngineConfig, PushHandler, ServiceHandle};

pub const SERVICE_HEADER_LENGTH: usize = 24;
pub const SERVICE_PORT: u16 = 8700;

const NULL_HEXTET: [u8; 2] = [0x00, 0x00];
/// Fallback MAC Audinate's own tooling uses when the command doesn't
/// actually depend on the sender's real address.
const PSEUDO_MAC: [u8; 6] = [0x52, 0x54, 0x00, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Pcm16,
    Pcm24,
    Pcm32,
}

impl Encoding {
    pub fn value(self) -> u16 {
        match self {
            Self::Pcm16 => 16,
            Self::Pcm24 => 24,
            Self::Pcm32 => 32,
        }
    }

    pub fn from_bits(bits: u8) -> Result<Self, FacadeError> {
        match bits {
            16 => Ok(Self::Pcm16),
            24 => Ok(Self::Pcm24),
            32 => Ok(Self::Pcm32),
            other => Err(FacadeError::InvalidEncoding(other)),
        }
    }
}

pub const SUPPORTED_SAMPLE_RATES: [u32; 6] = [44100, 48000, 88200, 96000, 176400, 192000];

pub fn validate_sample_rate(rate: u32) -> Result<(), FacadeError> {
    if SUPPORTED_SAMPLE_RATES.contains(&rate) {
        Ok(())
    } else {
        Err(FacadeError::InvalidSampleRate(rate))
    }
}

fn frame(message_index: u16, part1: Option<[u8; 2]>, mac_address: [u8; 6], payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(24 + payload.len());
    frame.extend_from_slice(&[0xFF, 0xFF]);
    frame.extend_from_slice(&NULL_HEXTET); // length, patched below
    frame.extend_from_slice(&encode_integer(message_index as u64, 2));
    frame.extend_from_slice(&part1.unwrap_or(NULL_HEXTET));
    frame.extend_from_slice(&encode_mac_address(mac_address));
    frame.extend_from_slice(&NULL_HEXTET);
    frame.extend_from_slice(b"Audinate");
    frame.extend_from_slice(payload);
    let len = frame.len() as u16;
    frame[2..4].copy_from_slice(&encode_integer(len as u64, 2));
    frame
}

pub fn get_dante_model(local_mac: [u8; 6]) -> ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>) {
    let payload = [0x07, 0x31, 0x00, 0x61, 0x00, 0x00, 0x00, 0x00];
    ([0x07, 0x31], payload.to_vec(), local_mac, None)
}

pub fn get_make_model(local_mac: [u8; 6]) -> ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>) {
    let payload = [0x07, 0x31, 0x00, 0xc1, 0x00, 0x00, 0x00, 0x00];
    ([0x07, 0x31], payload.to_vec(), local_mac, None)
}

pub fn set_aes67(is_enabled: bool) -> ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>) {
    let mut payload = vec![0x07, 0x34, 0x10, 0x06, 0x00, 0x00, 0x00, 0x64, 0x00, 0x01];
    payload.extend_from_slice(&encode_integer(is_enabled as u64, 2));
    let pseudo_mac = [0x52, 0x54, 0x00, 0x38, 0x5e, 0xba];
    ([0x07, 0x34], payload, pseudo_mac, Some([0x22, 0xdc]))
}

pub fn set_encoding(local_mac: [u8; 6], encoding: Encoding) -> ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>) {
    let mut payload = vec![
        0x07, 0x27, 0x00, 0x83, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00,
    ];
    payload.extend_from_slice(&encode_integer(encoding.value() as u64, 2));
    ([0x07, 0x27], payload, local_mac, None)
}

pub fn set_gain_level(
    is_rx: bool,
    channel_number: u16,
    gain_level: u8,
) -> Result<([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>), FacadeError> {
    if !(1..=5).contains(&gain_level) {
        return Err(FacadeError::InvalidGainLevel(gain_level));
    }
    let mut payload = vec![
        0x07, 0x27, 0x10, 0x0a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x0c, 0x00,
        0x10,
    ];
    payload.extend_from_slice(if is_rx { &[0x01, 0x02] } else { &[0x02, 0x01] });
    payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
    payload.extend_from_slice(&encode_integer(channel_number as u64, 2));
    payload.extend_from_slice(&[0x00, 0x00]);
    payload.extend_from_slice(&encode_integer(gain_level as u64, 2));
    Ok(([0x07, 0x27], payload, PSEUDO_MAC, None))
}

pub fn set_sample_rate(sample_rate: u32) -> Result<([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>), FacadeError> {
    validate_sample_rate(sample_rate)?;
    let mut payload = vec![
        0x07, 0x27, 0x00, 0x81, 0x00, 0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0x01,
    ];
    payload.extend_from_slice(&encode_integer(sample_rate as u64, 4));
    Ok(([0x07, 0x27], payload, PSEUDO_MAC, None))
}

pub fn trigger_identify() -> ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>) {
    let payload = vec![0x07, 0x31, 0x00, 0x63, 0x00, 0x00, 0x00, 0x64];
    ([0x07, 0x31], payload, [0u8; 6], None)
}

pub type Callback = Box<dyn FnOnce(&[u8]) + Send>;

/// The peer listens on UDP 8700; our own local socket binds
/// `SERVICE_PORT + 40000` by convention, same as the other command services.
pub struct SettingsService {
    handle: ServiceHandle,
}

impl SettingsService {
    pub fn spawn(config: EngineConfig, on_push: PushHandler) -> Result<Self, TransportError> {
        Ok(Self {
            handle: ServiceHandle::spawn(SERVICE_PORT + 40000, config, on_push)?,
        })
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    /// Send a prebuilt `(command_code, payload, mac, part1)` tuple as
    /// returned by this module's command builders.
    pub fn send(
        &self,
        ipv4: Ipv4Addr,
        built: ([u8; 2], Vec<u8>, [u8; 6], Option<[u8; 2]>),
        callback: Option<Callback>,
    ) {
        let (command_code, payload, mac, part1) = built;
        let index = self.handle.next_message_index();
        let bytes = frame(index, part1, mac, &payload);
        let destination = SocketAddrV4::new(ipv4, SERVICE_PORT);
        self.handle.send(
            destination,
            index,
            PendingEntry {
                command_code,
                original_bytes: bytes.clone(),
                callback: callback.map(|cb| cb as Box<dyn FnOnce(&[u8]) + Send>),
                enqueued_at: Instant::now(),
            },
            bytes,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_u16;

    #[test]
    fn frame_carries_ffff_magic_and_audinate_marker() {
        let bytes = frame(3, None, PSEUDO_MAC, &[0xAA, 0xBB]);
        assert_eq!(&bytes[0..2], &[0xFF, 0xFF]);
        assert_eq!(decode_u16(&bytes, 2).unwrap() as usize, bytes.len());
        assert_eq!(decode_u16(&bytes, 4).unwrap(), 3);
        assert_eq!(&bytes[14..22], b"Audinate");
    }

    #[test]
    fn sample_rate_validation_rejects_unsupported_rate() {
        assert!(validate_sample_rate(48000).is_ok());
        assert!(validate_sample_rate(22050).is_err());
    }

    #[test]
    fn gain_level_out_of_range_is_rejected() {
        assert!(set_gain_level(true, 1, 0).is_err());
        assert!(set_gain_level(true, 1, 6).is_err());
        assert!(set_gain_level(true, 1, 3).is_ok());
    }

    #[test]
    fn encoding_round_trips_from_bits() {
        assert_eq!(Encoding::from_bits(24).unwrap(), Encoding::Pcm24);
        assert!(Encoding::from_bits(20).is_err());
    }
}
