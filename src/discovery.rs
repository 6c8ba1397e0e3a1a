//! mDNS-driven discovery fusion: ARC, CMC, and DBC each advertise their own
//! `_netaudio-*._udp.local.` service type, but a Dante device only becomes
//! usable once all three records for the same mDNS hostname have arrived.
//! `_netaudio-chan` exists on the wire too but carries nothing this crate
//! needs, so it is never browsed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};

use crate::codec::decode_protocol_version_from_mdns;
use crate::registry::{ArcDescriptor, CmcDescriptor, DbcDescriptor};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    InProgress,
    Complete,
    Disconnected,
}

#[derive(Debug, Clone, Default)]
struct FoundEntry {
    ipv4: Option<Ipv4Addr>,
    arc: Option<ArcDescriptor>,
    cmc: Option<CmcDescriptor>,
    dbc: Option<DbcDescriptor>,
    state: Option<DiscoveryState>,
}

impl FoundEntry {
    fn all_present(&self) -> bool {
        self.arc.is_some() && self.cmc.is_some() && self.dbc.is_some()
    }
}

/// Emitted once a device's ARC+CMC+DBC records have all arrived.
pub struct DiscoveredDevice {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub arc: ArcDescriptor,
    pub cmc: CmcDescriptor,
    pub dbc: DbcDescriptor,
}

pub type RegisterCallback = Box<dyn Fn(DiscoveredDevice) + Send>;
pub type DisconnectCallback = Box<dyn Fn(&str) + Send>;

pub struct Discovery {
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Discovery {
    pub fn spawn(
        on_register: RegisterCallback,
        on_disconnect: DisconnectCallback,
    ) -> Result<Self, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;
        let arc_rx = daemon.browse(crate::arc_service::SERVICE_TYPE_MDNS)?;
        let cmc_rx = daemon.browse(crate::cmc_service::SERVICE_TYPE_MDNS)?;
        let dbc_rx = daemon.browse(crate::dbc_service::SERVICE_TYPE_MDNS)?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::spawn(move || {
                let mut found: HashMap<String, FoundEntry> = HashMap::new();
                let mut fullname_to_host: HashMap<String, String> = HashMap::new();
                while !shutdown.load(Ordering::SeqCst) {
                    while let Ok(event) = arc_rx.try_recv() {
                        handle_event(&mut found, &mut fullname_to_host, Service::Arc, event, &on_register, &on_disconnect);
                    }
                    while let Ok(event) = cmc_rx.try_recv() {
                        handle_event(&mut found, &mut fullname_to_host, Service::Cmc, event, &on_register, &on_disconnect);
                    }
                    while let Ok(event) = dbc_rx.try_recv() {
                        handle_event(&mut found, &mut fullname_to_host, Service::Dbc, event, &on_register, &on_disconnect);
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                let _ = daemon.shutdown();
            })
        };

        Ok(Self {
            shutdown,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Discovery {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Arc,
    Cmc,
    Dbc,
}

fn handle_event(
    found: &mut HashMap<String, FoundEntry>,
    fullname_to_host: &mut HashMap<String, String>,
    service: Service,
    event: ServiceEvent,
    on_register: &RegisterCallback,
    on_disconnect: &DisconnectCallback,
) {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            let name = info.get_hostname().to_string();
            debug!("{service:?} resolved for {name}");
            fullname_to_host.insert(info.get_fullname().to_string(), name.clone());
            let entry = found.entry(name.clone()).or_default();
            if entry.state == Some(DiscoveryState::Disconnected) {
                entry.arc = None;
                entry.cmc = None;
                entry.dbc = None;
                entry.state = Some(DiscoveryState::InProgress);
            }
            if entry.state.is_none() {
                entry.state = Some(DiscoveryState::InProgress);
            }
            if entry.ipv4.is_none() {
                entry.ipv4 = info.get_addresses().iter().next().copied();
            }

            match apply_service(service, &info) {
                Ok(()) => {}
                Err(err) => {
                    warn!("malformed {service:?} TXT record for {name}: {err}");
                    return;
                }
            }
            set_descriptor(entry, service, &info);

            if entry.all_present() && entry.state == Some(DiscoveryState::InProgress) {
                entry.state = Some(DiscoveryState::Complete);
                let (Some(ipv4), Some(arc), Some(cmc), Some(dbc)) =
                    (entry.ipv4, entry.arc, entry.cmc.clone(), entry.dbc)
                else {
                    return;
                };
                info!("discovered Dante device {name}");
                on_register(DiscoveredDevice { name, ipv4, arc, cmc, dbc });
            }
        }
        ServiceEvent::ServiceRemoved(_service_type, fullname) => {
            debug!("{service:?} removed: {fullname}");
            // `ServiceRemoved` only carries the mDNS instance name, not the
            // hostname `found` is keyed by, so we track that mapping
            // ourselves from the `ServiceResolved` events seen so far.
            if let Some(name) = fullname_to_host.get(&fullname).cloned() {
                if let Some(entry) = found.get_mut(&name) {
                    entry.state = Some(DiscoveryState::Disconnected);
                    on_disconnect(&name);
                }
            }
        }
        ServiceEvent::SearchStopped(service_type) => {
            error!("{service:?} search stopped: {service_type}");
        }
        ServiceEvent::SearchStarted(_) | ServiceEvent::ServiceFound(_, _) => {}
    }
}

fn txt_value<'a>(info: &'a ServiceInfo, key: &str) -> Option<&'a str> {
    info.get_property(key).map(|property| property.val_str())
}

fn apply_service(service: Service, info: &ServiceInfo) -> Result<(), crate::error::CodecError> {
    match service {
        Service::Arc => {
            txt_value(info, "arcp_vers")
                .map(decode_protocol_version_from_mdns)
                .transpose()?;
        }
        Service::Cmc => {
            txt_value(info, "cmcp_vers")
                .map(decode_protocol_version_from_mdns)
                .transpose()?;
        }
        Service::Dbc => {}
    }
    Ok(())
}

fn set_descriptor(entry: &mut FoundEntry, service: Service, info: &ServiceInfo) {
    match service {
        Service::Arc => {
            let protocol_version = txt_value(info, "arcp_vers")
                .and_then(|v| decode_protocol_version_from_mdns(v).ok())
                .unwrap_or((0, 0, 0));
            entry.arc = Some(ArcDescriptor {
                port: info.get_port(),
                protocol_version,
            });
        }
        Service::Cmc => {
            let protocol_version = txt_value(info, "cmcp_vers")
                .and_then(|v| decode_protocol_version_from_mdns(v).ok())
                .unwrap_or((0, 0, 0));
            entry.cmc = Some(CmcDescriptor {
                port: info.get_port(),
                protocol_version,
                id: txt_value(info, "id").map(str::to_string),
                manufacturer: txt_value(info, "mf").map(str::to_string),
                model: txt_value(info, "model").map(str::to_string),
            });
        }
        Service::Dbc => {
            entry.dbc = Some(DbcDescriptor { port: info.get_port() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn found_entry_requires_all_three_descriptors() {
        let mut entry = FoundEntry::default();
        assert!(!entry.all_present());
        entry.arc = Some(ArcDescriptor {
            port: 4440,
            protocol_version: (2, 8, 2),
        });
        entry.cmc = Some(CmcDescriptor {
            port: 8800,
            protocol_version: (2, 8, 2),
            id: None,
            manufacturer: None,
            model: None,
        });
        assert!(!entry.all_present());
        entry.dbc = Some(DbcDescriptor { port: 4455 });
        assert!(entry.all_present());
    }
}
