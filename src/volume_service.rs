//! Passive listener for volume-level pushes that CMC's `volume_start`
//! command causes a device to start sending. Parsing the push payload
//! itself is out of scope (see SPEC_FULL.md Non-goals); we only log and
//! drop it, matching the reference client's unfinished handling.

use log::debug;

use crate::error::TransportError;
use crate::service::{EngineConfig, ServiceHandle};

pub const SERVICE_PORT: u16 = 8751;

pub struct VolumeService {
    handle: ServiceHandle,
}

impl VolumeService {
    pub fn spawn(config: EngineConfig) -> Result<Self, TransportError> {
        let on_push = Box::new(|addr, message: Vec<u8>| {
            debug!("volume push from {addr}: {} bytes (unparsed)", message.len());
        });
        Ok(Self {
            handle: ServiceHandle::spawn(SERVICE_PORT, config, on_push)?,
        })
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }
}
