//! Pure parsing of ARC responses into intermediate records. These never
//! touch the registry directly — the façade applies them, since turning a
//! parsed record into a mutation of the device graph also has to resolve
//! orphan TX channels and subscription back-references across devices.

use crate::arc_service::{channels_on_page, Dialect, MAX_CHANNELS_PER_PAGE};
use crate::codec::{decode_integer, decode_string};
use crate::error::CodecError;
use crate::subscription::SubscriptionStatus;

#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelCounts {
    pub rx: u16,
    pub tx: u16,
}

pub fn parse_channel_counts(response: &[u8]) -> Result<ChannelCounts, CodecError> {
    Ok(ChannelCounts {
        rx: decode_integer(response, 14, 2)? as u16,
        tx: decode_integer(response, 12, 2)? as u16,
    })
}

/// Device-info response (command `1003`): the name sits behind a pointer
/// at offset 22.
pub fn parse_device_info_name(response: &[u8]) -> Result<Option<String>, CodecError> {
    let ptr = decode_integer(response, 22, 2)? as usize;
    decode_string(response, ptr)
}

/// Name response (command `1002`): the name string starts right after the
/// header, no pointer indirection.
pub fn parse_name_response(response: &[u8]) -> Result<Option<String>, CodecError> {
    decode_string(response, 10)
}

#[derive(Debug, Clone)]
pub struct RxChannelRecord {
    pub number: u16,
    pub name: String,
    pub status: SubscriptionStatus,
    pub tx_channel_name: Option<String>,
    pub tx_device_name: Option<String>,
    pub subscription_status: SubscriptionStatus,
}

#[derive(Debug, Clone)]
pub struct TxChannelRecord {
    pub number: u16,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChannelPage<T> {
    pub channels: Vec<T>,
    pub sample_rate: Option<u32>,
}

pub fn parse_rx_channel_page(
    response: &[u8],
    dialect: Dialect,
    page: u16,
    rx_count: u16,
) -> Result<ChannelPage<RxChannelRecord>, CodecError> {
    let count = channels_on_page(page, rx_count).min(MAX_CHANNELS_PER_PAGE);
    let mut channels = Vec::with_capacity(count as usize);
    let mut sample_rate = None;

    for index in 0..count as usize {
        let (definition_start, definition_end, common_ptr_offset) = match dialect {
            Dialect::New => {
                let def_start_ptr = 18;
                let start = decode_integer(response, def_start_ptr + 2 * index, 2)? as usize;
                (start, start + 56, 22)
            }
            Dialect::Legacy => {
                let start = 12 + 20 * index;
                (start, start + 16, 4)
            }
        };
        let definition = response
            .get(definition_start..definition_end)
            .ok_or(CodecError::DecodeOutOfRange {
                offset: definition_start,
                length: definition_end - definition_start,
                available: response.len(),
            })?;

        if sample_rate.is_none() {
            let common_start = decode_integer(definition, common_ptr_offset, 2)? as usize;
            let common = response
                .get(common_start..common_start + 16)
                .ok_or(CodecError::DecodeOutOfRange {
                    offset: common_start,
                    length: 16,
                    available: response.len(),
                })?;
            sample_rate = Some(decode_integer(common, 0, 4)? as u32);
        }

        let record = match dialect {
            Dialect::New => RxChannelRecord {
                number: decode_integer(definition, 2, 2)? as u16,
                name: decode_string(response, decode_integer(definition, 20, 2)? as usize)?
                    .unwrap_or_default(),
                status: SubscriptionStatus::derive(decode_integer(definition, 50, 2)?),
                tx_channel_name: decode_string(response, decode_integer(definition, 44, 2)? as usize)?,
                tx_device_name: decode_string(response, decode_integer(definition, 46, 2)? as usize)?,
                subscription_status: SubscriptionStatus::derive(decode_integer(definition, 48, 2)?),
            },
            Dialect::Legacy => RxChannelRecord {
                number: decode_integer(definition, 0, 2)? as u16,
                name: decode_string(response, decode_integer(definition, 10, 2)? as usize)?
                    .unwrap_or_default(),
                status: SubscriptionStatus::derive(decode_integer(definition, 12, 2)?),
                tx_channel_name: decode_string(response, decode_integer(definition, 6, 2)? as usize)?,
                tx_device_name: decode_string(response, decode_integer(definition, 8, 2)? as usize)?,
                subscription_status: SubscriptionStatus::derive(decode_integer(definition, 14, 2)?),
            },
        };
        channels.push(record);
    }

    Ok(ChannelPage { channels, sample_rate })
}

pub fn parse_tx_channel_page(
    response: &[u8],
    dialect: Dialect,
    page: u16,
    tx_count: u16,
) -> Result<ChannelPage<TxChannelRecord>, CodecError> {
    let count = channels_on_page(page, tx_count).min(MAX_CHANNELS_PER_PAGE);
    let mut channels = Vec::with_capacity(count as usize);
    let mut sample_rate = None;

    for index in 0..count as usize {
        let (definition_start, definition_end, common_ptr_offset) = match dialect {
            Dialect::New => {
                let start = decode_integer(response, 18 + 2 * index, 2)? as usize;
                (start, start + 40, 22)
            }
            Dialect::Legacy => {
                let start = 12 + 8 * index;
                (start, start + 8, 4)
            }
        };
        let definition = response
            .get(definition_start..definition_end)
            .ok_or(CodecError::DecodeOutOfRange {
                offset: definition_start,
                length: definition_end - definition_start,
                available: response.len(),
            })?;

        if sample_rate.is_none() {
            let common_start = decode_integer(definition, common_ptr_offset, 2)? as usize;
            let common = response
                .get(common_start..common_start + 16)
                .ok_or(CodecError::DecodeOutOfRange {
                    offset: common_start,
                    length: 16,
                    available: response.len(),
                })?;
            sample_rate = Some(decode_integer(common, 0, 4)? as u32);
        }

        let record = match dialect {
            Dialect::New => {
                let default_name =
                    decode_string(response, decode_integer(definition, 30, 2)? as usize)?;
                let friendly_name =
                    decode_string(response, decode_integer(definition, 20, 2)? as usize)?;
                TxChannelRecord {
                    number: decode_integer(definition, 2, 2)? as u16,
                    name: friendly_name.or(default_name).unwrap_or_default(),
                }
            }
            Dialect::Legacy => TxChannelRecord {
                number: decode_integer(definition, 0, 2)? as u16,
                name: decode_string(response, decode_integer(definition, 6, 2)? as usize)?
                    .unwrap_or_default(),
            },
        };
        channels.push(record);
    }

    Ok(ChannelPage { channels, sample_rate })
}

/// Legacy-only friendly-name page (command `2010`): a compact table with no
/// common-definition block of its own.
pub fn parse_tx_friendly_name_page(
    response: &[u8],
    page: u16,
    tx_count: u16,
) -> Result<Vec<(u16, String)>, CodecError> {
    let count = channels_on_page(page, tx_count).min(MAX_CHANNELS_PER_PAGE);
    let mut updates = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        let start = 12 + 6 * index;
        let definition = response
            .get(start..start + 6)
            .ok_or(CodecError::DecodeOutOfRange {
                offset: start,
                length: 6,
                available: response.len(),
            })?;
        let number = decode_integer(definition, 2, 2)? as u16;
        let name = decode_string(response, decode_integer(definition, 4, 2)? as usize)?
            .unwrap_or_default();
        updates.push((number, name));
    }
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_integer, encode_string};

    fn put_u16(buf: &mut Vec<u8>, offset: usize, value: u16) {
        if buf.len() < offset + 2 {
            buf.resize(offset + 2, 0);
        }
        buf[offset..offset + 2].copy_from_slice(&encode_integer(value as u64, 2));
    }

    #[test]
    fn channel_counts_read_rx_and_tx_offsets() {
        let mut response = vec![0u8; 20];
        put_u16(&mut response, 12, 8); // tx
        put_u16(&mut response, 14, 17); // rx
        let counts = parse_channel_counts(&response).unwrap();
        assert_eq!(counts.rx, 17);
        assert_eq!(counts.tx, 8);
    }

    #[test]
    fn legacy_rx_page_decodes_one_channel_with_subscription() {
        // Build a minimal legacy-dialect RX page response for a single channel.
        let mut response = vec![0u8; 32];
        // common block lives at offset 32..48
        response.resize(48, 0);
        response[32..36].copy_from_slice(&encode_integer(48000, 4));

        // channel definition at offset 12..28 (def_start=12, stride=20, length=16)
        let common_ptr_offset = 12 + 4; // offset 4 within definition -> absolute 16
        put_u16(&mut response, common_ptr_offset, 32);
        put_u16(&mut response, 12 + 0, 1); // rx_channel_number
        put_u16(&mut response, 12 + 12, 2); // status code "Resolved"

        let name_ptr = response.len() as u16;
        response.extend(encode_string("In-1"));
        put_u16(&mut response, 12 + 10, name_ptr);

        let tx_name_ptr = response.len() as u16;
        response.extend(encode_string("out1"));
        put_u16(&mut response, 12 + 6, tx_name_ptr);

        let tx_device_ptr = response.len() as u16;
        response.extend(encode_string("amp.local."));
        put_u16(&mut response, 12 + 8, tx_device_ptr);

        put_u16(&mut response, 12 + 14, 2); // subscription status "Resolved"

        let page = parse_rx_channel_page(&response, Dialect::Legacy, 0, 1).unwrap();
        assert_eq!(page.sample_rate, Some(48000));
        assert_eq!(page.channels.len(), 1);
        let channel = &page.channels[0];
        assert_eq!(channel.number, 1);
        assert_eq!(channel.name, "In-1");
        assert_eq!(channel.status, SubscriptionStatus::Resolved);
        assert_eq!(channel.tx_channel_name.as_deref(), Some("out1"));
        assert_eq!(channel.tx_device_name.as_deref(), Some("amp.local."));
        assert_eq!(channel.subscription_status, SubscriptionStatus::Resolved);
    }

    #[test]
    fn paging_boundary_with_17_rx_channels_yields_16_then_1() {
        assert_eq!(channels_on_page(0, 17), 16);
        assert_eq!(channels_on_page(1, 17), 1);
    }
}
