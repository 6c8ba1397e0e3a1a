//! The façade: owns every service socket plus the device registry, and is
//! the only place that turns a parsed wire response into a mutation of the
//! device graph. `Device`/`RxChannel`/`TxChannel` never hold references back
//! into services or the registry, so every request/response round trip goes
//! through here instead.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use log::{debug, info, warn};

use crate::arc_service::{self, ArcService, Dialect};
use crate::channel::{ChannelType, RxChannel, TxChannel, TxDeviceRef};
use crate::cmc_service::{self, CmcService};
use crate::codec::local_adapter_serving;
use crate::device::{self, RxChannelRecord, TxChannelRecord};
use crate::discovery::{DiscoveredDevice, Discovery, DisconnectCallback, RegisterCallback};
use crate::error::{FacadeError, TransportError};
use crate::registry::{ArcDescriptor, ChannelCounts, Device, DeviceId, DeviceRegistry, TxId};
use crate::service::EngineConfig;
use crate::settings_service::{self, Encoding, SettingsService};
use crate::subscription::SubscriptionStatus;
use crate::validate::{dedupe_channel_name, validate_device_name};
use crate::volume_service::VolumeService;

/// Read-only view of a device, cheap to clone out past the registry lock.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    pub name: String,
    pub ipv4: Ipv4Addr,
    pub connected: bool,
    pub sample_rate: u32,
    pub channel_counts: ChannelCounts,
    pub arc_version: (u8, u8, u8),
    pub cmc_version: (u8, u8, u8),
}

#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub kind: ChannelType,
    pub number: Option<u16>,
    pub name: String,
    pub friendly_name: Option<String>,
    pub volume: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct SubscriptionSnapshot {
    pub rx_name: String,
    pub tx_name: Option<String>,
    pub tx_device_name: Option<String>,
    pub status: SubscriptionStatus,
}

/// Ties the four service sockets, mDNS discovery, and the device registry
/// together. Construct with [`Application::new`], then call
/// [`Application::start_discovery`] — discovery's callbacks run on mdns-sd's
/// own thread and need a handle back into the façade, which is why `new`
/// hands back an `Arc` rather than a bare value.
pub struct Application {
    registry: Mutex<DeviceRegistry>,
    arc: ArcService,
    cmc: CmcService,
    settings: SettingsService,
    volume: VolumeService,
    discovery: Mutex<Option<Discovery>>,
    self_ref: Mutex<Weak<Application>>,
}

impl Application {
    pub fn new(config: EngineConfig) -> Result<Arc<Self>, TransportError> {
        let arc = ArcService::spawn(
            config,
            Box::new(|addr, _| debug!("unexpected ARC push from {addr}")),
        )?;
        let cmc = CmcService::spawn(
            config,
            Box::new(|addr, _| debug!("unexpected CMC push from {addr}")),
        )?;
        let settings = SettingsService::spawn(
            config,
            Box::new(|addr, _| debug!("unexpected settings push from {addr}")),
        )?;
        let volume = VolumeService::spawn(config)?;

        let app = Arc::new(Self {
            registry: Mutex::new(DeviceRegistry::new()),
            arc,
            cmc,
            settings,
            volume,
            discovery: Mutex::new(None),
            self_ref: Mutex::new(Weak::new()),
        });
        *app.self_ref.lock().expect("self_ref mutex poisoned") = Arc::downgrade(&app);
        Ok(app)
    }

    /// Start mDNS discovery. Devices register themselves asynchronously as
    /// their ARC, CMC, and DBC records all resolve.
    pub fn start_discovery(&self) -> Result<(), mdns_sd::Error> {
        let on_register_app = self.arc_handle();
        let on_register: RegisterCallback =
            Box::new(move |discovered| on_register_app.handle_discovered(discovered));

        let on_disconnect_app = self.arc_handle();
        let on_disconnect: DisconnectCallback =
            Box::new(move |name| on_disconnect_app.handle_disconnected(name));

        let discovery = Discovery::spawn(on_register, on_disconnect)?;
        *self.discovery.lock().expect("discovery mutex poisoned") = Some(discovery);
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(mut discovery) = self.discovery.lock().expect("discovery mutex poisoned").take() {
            discovery.stop();
        }
    }

    /// Drop pending requests older than `deadline` on every service socket.
    /// Callers are expected to invoke this periodically; nothing in the
    /// façade does it on its own.
    pub fn purge_expired(&self, deadline: Duration) {
        self.arc.handle().purge_expired(deadline);
        self.cmc.handle().purge_expired(deadline);
        self.settings.handle().purge_expired(deadline);
        self.volume.handle().purge_expired(deadline);
    }

    fn arc_handle(&self) -> Arc<Application> {
        self.self_ref
            .lock()
            .expect("self_ref mutex poisoned")
            .upgrade()
            .expect("application dropped while a callback was still pending")
    }

    fn registry(&self) -> MutexGuard<'_, DeviceRegistry> {
        self.registry.lock().expect("registry mutex poisoned")
    }

    // ---- discovery callbacks ----------------------------------------

    fn handle_discovered(&self, discovered: DiscoveredDevice) {
        let device_id = {
            let mut registry = self.registry();
            match registry.device_by_name(&discovered.name) {
                Some(id) => {
                    if let Some(device) = registry.device_mut(id) {
                        device.ipv4 = discovered.ipv4;
                        device.arc = discovered.arc;
                        device.cmc = discovered.cmc;
                        device.dbc = discovered.dbc;
                        device.connected = true;
                    }
                    id
                }
                None => registry.insert_device(Device {
                    name: discovered.name,
                    ipv4: discovered.ipv4,
                    arc: discovered.arc,
                    cmc: discovered.cmc,
                    dbc: discovered.dbc,
                    sample_rate: 0,
                    channel_counts: ChannelCounts::default(),
                    rx_channels: Vec::new(),
                    tx_channels: Vec::new(),
                    connected: true,
                }),
            }
        };
        info!("device {device_id:?} ready, requesting name and channel layout");
        self.request_name(device_id);
        self.request_all_channels(device_id);
    }

    fn handle_disconnected(&self, name: &str) {
        let mut registry = self.registry();
        if let Some(id) = registry.device_by_name(name) {
            if let Some(device) = registry.device_mut(id) {
                device.connected = false;
            }
        }
    }

    // ---- per-device state lookups ------------------------------------

    fn device_ipv4_arc(&self, device_name: &str) -> Result<(Ipv4Addr, ArcDescriptor), FacadeError> {
        let registry = self.registry();
        let device_id = registry
            .device_by_name(device_name)
            .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
        let device = registry.device(device_id).expect("looked up by its own id");
        Ok((device.ipv4, device.arc))
    }

    fn device_arc_and_id(&self, device_id: DeviceId) -> Option<(Ipv4Addr, ArcDescriptor)> {
        let registry = self.registry();
        let device = registry.device(device_id)?;
        Some((device.ipv4, device.arc))
    }

    // ---- ARC request/response cascade --------------------------------

    fn request_name(&self, device_id: DeviceId) {
        let Some((ipv4, arc)) = self.device_arc_and_id(device_id) else {
            return;
        };
        let (code, body) = arc_service::request_name();
        let app = self.arc_handle();
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |resp| app.on_name_response(device_id, resp))),
        );
    }

    fn on_name_response(&self, device_id: DeviceId, resp: &[u8]) {
        match device::parse_name_response(resp) {
            Ok(Some(name)) => {
                let mut registry = self.registry();
                if let Some(device) = registry.device_mut(device_id) {
                    device.name = name.clone();
                }
                registry.reindex_device_name(device_id, &name);
            }
            Ok(None) => {}
            Err(err) => warn!("malformed name response for device {device_id:?}: {err}"),
        }
    }

    fn request_all_channels(&self, device_id: DeviceId) {
        let Some((ipv4, arc)) = self.device_arc_and_id(device_id) else {
            return;
        };
        let (code, body) = arc_service::request_all_channels();
        let app = self.arc_handle();
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |resp| app.on_all_channels_response(device_id, resp))),
        );
    }

    fn on_all_channels_response(&self, device_id: DeviceId, resp: &[u8]) {
        match device::parse_channel_counts(resp) {
            Ok(counts) => {
                {
                    let mut registry = self.registry();
                    if let Some(device) = registry.device_mut(device_id) {
                        device.channel_counts = ChannelCounts {
                            rx: counts.rx,
                            tx: counts.tx,
                        };
                    }
                }
                self.request_tx_channels(device_id, false);
                self.request_rx_channels(device_id);
            }
            Err(err) => warn!("malformed channel-count response for device {device_id:?}: {err}"),
        }
    }

    fn request_rx_channels(&self, device_id: DeviceId) {
        let Some((ipv4, arc, rx_count)) = self.device_arc_with_rx_count(device_id) else {
            return;
        };
        let dialect = Dialect::for_version(arc.protocol_version);
        for page in 0..arc_service::pages_for(rx_count) {
            let (code, body) = arc_service::request_rx_channels(dialect, page);
            let app = self.arc_handle();
            self.arc.command(
                ipv4,
                &arc,
                code,
                &body,
                Some(Box::new(move |resp| {
                    app.on_rx_channels_response(device_id, dialect, page, rx_count, resp)
                })),
            );
        }
    }

    fn device_arc_with_rx_count(&self, device_id: DeviceId) -> Option<(Ipv4Addr, ArcDescriptor, u16)> {
        let registry = self.registry();
        let device = registry.device(device_id)?;
        Some((device.ipv4, device.arc, device.channel_counts.rx))
    }

    fn device_arc_with_tx_count(&self, device_id: DeviceId) -> Option<(Ipv4Addr, ArcDescriptor, u16)> {
        let registry = self.registry();
        let device = registry.device(device_id)?;
        Some((device.ipv4, device.arc, device.channel_counts.tx))
    }

    fn on_rx_channels_response(
        &self,
        device_id: DeviceId,
        dialect: Dialect,
        page: u16,
        rx_count: u16,
        resp: &[u8],
    ) {
        match device::parse_rx_channel_page(resp, dialect, page, rx_count) {
            Ok(page) => {
                let mut registry = self.registry();
                if let Some(sample_rate) = page.sample_rate {
                    if let Some(device) = registry.device_mut(device_id) {
                        if device.sample_rate == 0 {
                            device.sample_rate = sample_rate;
                        }
                    }
                }
                for record in page.channels {
                    apply_rx_record(&mut registry, device_id, record);
                }
            }
            Err(err) => warn!("malformed RX channel page for device {device_id:?}: {err}"),
        }
    }

    fn request_tx_channels(&self, device_id: DeviceId, friendly_names: bool) {
        let Some((ipv4, arc, tx_count)) = self.device_arc_with_tx_count(device_id) else {
            return;
        };
        let dialect = Dialect::for_version(arc.protocol_version);
        for page in 0..arc_service::pages_for(tx_count) {
            let (code, body) = arc_service::request_tx_channels(dialect, page, friendly_names);
            let app = self.arc_handle();
            self.arc.command(
                ipv4,
                &arc,
                code,
                &body,
                Some(Box::new(move |resp| {
                    app.on_tx_channels_response(device_id, dialect, page, tx_count, resp)
                })),
            );
        }
    }

    fn on_tx_channels_response(
        &self,
        device_id: DeviceId,
        dialect: Dialect,
        page: u16,
        tx_count: u16,
        resp: &[u8],
    ) {
        match device::parse_tx_channel_page(resp, dialect, page, tx_count) {
            Ok(page) => {
                let mut registry = self.registry();
                if let Some(sample_rate) = page.sample_rate {
                    if let Some(device) = registry.device_mut(device_id) {
                        if device.sample_rate == 0 {
                            device.sample_rate = sample_rate;
                        }
                    }
                }
                for record in page.channels {
                    apply_tx_record(&mut registry, device_id, record);
                }
            }
            Err(err) => warn!("malformed TX channel page for device {device_id:?}: {err}"),
        }
    }

    // ---- public façade: reads ------------------------------------------

    pub fn devices(&self) -> Vec<DeviceSnapshot> {
        self.registry()
            .devices()
            .map(|(_, device)| DeviceSnapshot {
                name: device.name.clone(),
                ipv4: device.ipv4,
                connected: device.connected,
                sample_rate: device.sample_rate,
                channel_counts: device.channel_counts,
                arc_version: device.arc.protocol_version,
                cmc_version: device.cmc.protocol_version,
            })
            .collect()
    }

    pub fn channels(&self, device_name: &str, kind: ChannelType) -> Result<Vec<ChannelSnapshot>, FacadeError> {
        let registry = self.registry();
        let device_id = registry
            .device_by_name(device_name)
            .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
        let device = registry.device(device_id).expect("looked up by its own id");
        Ok(match kind {
            ChannelType::Rx => device
                .rx_channels
                .iter()
                .filter_map(|&id| registry.rx_channel(id))
                .map(|channel: &RxChannel| ChannelSnapshot {
                    kind: ChannelType::Rx,
                    number: Some(channel.number),
                    name: channel.name.clone(),
                    friendly_name: channel.friendly_name.clone(),
                    volume: channel.volume.map(|v| v.raw()),
                })
                .collect(),
            ChannelType::Tx => device
                .tx_channels
                .iter()
                .filter_map(|&id| registry.tx_channel(id))
                .map(|channel: &TxChannel| ChannelSnapshot {
                    kind: ChannelType::Tx,
                    number: channel.number,
                    name: channel.name.clone(),
                    friendly_name: channel.friendly_name.clone(),
                    volume: channel.volume.map(|v| v.raw()),
                })
                .collect(),
        })
    }

    pub fn subscriptions(&self, device_name: &str) -> Result<Vec<SubscriptionSnapshot>, FacadeError> {
        let registry = self.registry();
        let device_id = registry
            .device_by_name(device_name)
            .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
        let device = registry.device(device_id).expect("looked up by its own id");
        Ok(device
            .rx_channels
            .iter()
            .filter_map(|&rx_id| {
                let rx = registry.rx_channel(rx_id)?;
                let sub = registry.subscription(rx.subscription)?;
                let (tx_name, tx_device_name) = match sub.tx {
                    Some(tx_id) => {
                        let tx = registry.tx_channel(tx_id)?;
                        let device_name = crate::registry::tx_device_ref_name(&registry, &tx.device).to_string();
                        (Some(tx.name.clone()), Some(device_name))
                    }
                    None => (None, None),
                };
                Some(SubscriptionSnapshot {
                    rx_name: rx.name.clone(),
                    tx_name,
                    tx_device_name,
                    status: sub.status,
                })
            })
            .collect())
    }

    // ---- public façade: commands ---------------------------------------

    pub fn subscribe(
        &self,
        device_name: &str,
        rx_number: u16,
        tx_device_name: &str,
        tx_channel_name: &str,
    ) -> Result<(), FacadeError> {
        let (ipv4, arc, device_id, already_subscribed) = {
            let registry = self.registry();
            let device_id = registry
                .device_by_name(device_name)
                .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
            let device = registry.device(device_id).expect("looked up by its own id");
            let rx_id = registry.rx_by_number(device_id, rx_number).ok_or_else(|| FacadeError::ChannelNotFound {
                device: device_name.to_string(),
                channel_type: "rx",
                number: rx_number as i32,
            })?;
            let rx = registry.rx_channel(rx_id).expect("looked up by its own id");
            let sub = registry.subscription(rx.subscription).expect("every RX channel has a subscription");
            let already_subscribed = match sub.tx {
                Some(tx_id) => {
                    let tx = registry.tx_channel(tx_id).expect("looked up by its own id");
                    tx.name.eq_ignore_ascii_case(tx_channel_name)
                        && crate::registry::tx_device_ref_name(&registry, &tx.device)
                            .eq_ignore_ascii_case(tx_device_name)
                }
                None => false,
            };
            (device.ipv4, device.arc, device_id, already_subscribed)
        };
        if already_subscribed {
            return Ok(());
        }

        let dialect = Dialect::for_version(arc.protocol_version);
        let (code, body) = arc_service::subscribe(dialect, arc.protocol_version, rx_number, tx_channel_name, tx_device_name);
        let app = self.arc_handle();
        // The response carries nothing useful, so re-request RX channels to
        // pick up the resulting subscription state.
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |_resp| app.request_rx_channels(device_id))),
        );
        Ok(())
    }

    pub fn unsubscribe(&self, device_name: &str, rx_number: u16) -> Result<(), FacadeError> {
        let (ipv4, arc, device_id) = {
            let registry = self.registry();
            let device_id = registry
                .device_by_name(device_name)
                .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
            registry.rx_by_number(device_id, rx_number).ok_or_else(|| FacadeError::ChannelNotFound {
                device: device_name.to_string(),
                channel_type: "rx",
                number: rx_number as i32,
            })?;
            let device = registry.device(device_id).expect("looked up by its own id");
            (device.ipv4, device.arc, device_id)
        };
        let dialect = Dialect::for_version(arc.protocol_version);
        let (code, body) = arc_service::unsubscribe(dialect, rx_number);
        let app = self.arc_handle();
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |_resp| app.request_rx_channels(device_id))),
        );
        Ok(())
    }

    pub fn rename_device(&self, device_name: &str, new_name: &str) -> Result<(), FacadeError> {
        validate_device_name(new_name).map_err(|reason| FacadeError::InvalidName {
            name: new_name.to_string(),
            reason,
        })?;
        let (ipv4, arc, device_id) = {
            let registry = self.registry();
            let device_id = registry
                .device_by_name(device_name)
                .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
            let device = registry.device(device_id).expect("looked up by its own id");
            (device.ipv4, device.arc, device_id)
        };
        let (code, body) = arc_service::rename_device(new_name);
        let app = self.arc_handle();
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |_resp| app.request_name(device_id))),
        );
        Ok(())
    }

    pub fn rename_channel(
        &self,
        device_name: &str,
        kind: ChannelType,
        number: u16,
        new_name: &str,
    ) -> Result<(), FacadeError> {
        let (ipv4, arc, device_id, deduped_name) = {
            let registry = self.registry();
            let device_id = registry
                .device_by_name(device_name)
                .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
            match kind {
                ChannelType::Rx => registry.rx_by_number(device_id, number).ok_or_else(|| FacadeError::ChannelNotFound {
                    device: device_name.to_string(),
                    channel_type: "rx",
                    number: number as i32,
                })?,
                ChannelType::Tx => registry.tx_by_number(device_id, number).ok_or_else(|| FacadeError::ChannelNotFound {
                    device: device_name.to_string(),
                    channel_type: "tx",
                    number: number as i32,
                })?,
            };
            let device = registry.device(device_id).expect("looked up by its own id");
            let deduped = dedupe_channel_name(new_name, |candidate| registry.channel_name_taken(device_id, kind, candidate));
            (device.ipv4, device.arc, device_id, deduped)
        };

        let dialect = Dialect::for_version(arc.protocol_version);
        let (code, body) = match kind {
            ChannelType::Rx => arc_service::rename_rx_channel(dialect, number, &deduped_name),
            ChannelType::Tx => arc_service::rename_tx_channel(dialect, number, &deduped_name),
        };
        let app = self.arc_handle();
        // Below 2.8.2 the response doesn't carry the new name back, so
        // re-request the whole channel page rather than trying to parse it
        // out of the reply.
        self.arc.command(
            ipv4,
            &arc,
            code,
            &body,
            Some(Box::new(move |_resp| match kind {
                ChannelType::Rx => app.request_rx_channels(device_id),
                ChannelType::Tx => app.request_tx_channels(device_id, false),
            })),
        );
        Ok(())
    }

    pub fn set_latency(&self, device_name: &str, latency_ms: u32) -> Result<(), FacadeError> {
        let (ipv4, arc) = self.device_ipv4_arc(device_name)?;
        let (code, body) = arc_service::set_latency(latency_ms);
        self.arc.command(ipv4, &arc, code, &body, None);
        Ok(())
    }

    pub fn set_sample_rate(&self, device_name: &str, sample_rate: u32) -> Result<(), FacadeError> {
        let (ipv4, _arc) = self.device_ipv4_arc(device_name)?;
        let built = settings_service::set_sample_rate(sample_rate)?;
        self.settings.send(ipv4, built, None);
        Ok(())
    }

    pub fn set_encoding(&self, device_name: &str, encoding: Encoding) -> Result<(), FacadeError> {
        let (ipv4, _arc) = self.device_ipv4_arc(device_name)?;
        let (_local_ip, local_mac) = local_adapter_serving(ipv4)?;
        let built = settings_service::set_encoding(local_mac, encoding);
        self.settings.send(ipv4, built, None);
        Ok(())
    }

    pub fn set_gain_level(
        &self,
        device_name: &str,
        kind: ChannelType,
        channel_number: u16,
        gain_level: u8,
    ) -> Result<(), FacadeError> {
        let (ipv4, _arc) = self.device_ipv4_arc(device_name)?;
        let built = settings_service::set_gain_level(matches!(kind, ChannelType::Rx), channel_number, gain_level)?;
        self.settings.send(ipv4, built, None);
        Ok(())
    }

    pub fn enable_aes67(&self, device_name: &str, is_enabled: bool) -> Result<(), FacadeError> {
        let (ipv4, _arc) = self.device_ipv4_arc(device_name)?;
        let built = settings_service::set_aes67(is_enabled);
        self.settings.send(ipv4, built, None);
        Ok(())
    }

    pub fn identify(&self, device_name: &str) -> Result<(), FacadeError> {
        let (ipv4, _arc) = self.device_ipv4_arc(device_name)?;
        let built = settings_service::trigger_identify();
        self.settings.send(ipv4, built, None);
        Ok(())
    }

    pub fn start_volume_reporting(&self, device_name: &str, timeout: bool) -> Result<(), FacadeError> {
        let (ipv4, cmc) = self.device_ipv4_cmc(device_name)?;
        let (local_ip, local_mac) = local_adapter_serving(ipv4)?;
        let (code, body) = cmc_service::command_volume_start(
            device_name,
            local_mac,
            local_ip,
            crate::volume_service::SERVICE_PORT,
            timeout,
        );
        self.cmc.command(
            ipv4,
            &cmc,
            code,
            &body,
            Some(Box::new(|resp| {
                if cmc_service::is_volume_unsupported(resp) {
                    warn!("device does not support volume-level reporting");
                }
            })),
        );
        Ok(())
    }

    pub fn stop_volume_reporting(&self, device_name: &str) -> Result<(), FacadeError> {
        let (ipv4, cmc) = self.device_ipv4_cmc(device_name)?;
        let (local_ip, local_mac) = local_adapter_serving(ipv4)?;
        let (code, body) =
            cmc_service::command_volume_stop(device_name, local_mac, local_ip, crate::volume_service::SERVICE_PORT);
        self.cmc.command(ipv4, &cmc, code, &body, None);
        Ok(())
    }

    fn device_ipv4_cmc(&self, device_name: &str) -> Result<(Ipv4Addr, crate::registry::CmcDescriptor), FacadeError> {
        let registry = self.registry();
        let device_id = registry
            .device_by_name(device_name)
            .ok_or_else(|| FacadeError::DeviceNotFound(device_name.to_string()))?;
        let device = registry.device(device_id).expect("looked up by its own id");
        Ok((device.ipv4, device.cmc.clone()))
    }
}

/// Apply one parsed RX channel record: insert-or-update the channel, then
/// resolve and rebind its subscription's TX target.
fn apply_rx_record(registry: &mut DeviceRegistry, device_id: DeviceId, record: RxChannelRecord) {
    let rx_id = match registry.rx_by_number(device_id, record.number) {
        Some(id) => {
            if let Some(channel) = registry.rx_channel_mut(id) {
                channel.name = record.name.clone();
                channel.status = record.status;
            }
            id
        }
        None => {
            let id = registry.insert_rx_channel_with_subscription(
                device_id,
                record.number,
                record.name.clone(),
                record.status,
                record.subscription_status,
            );
            if let Some(device) = registry.device_mut(device_id) {
                device.rx_channels.push(id);
            }
            id
        }
    };

    let sub_id = registry
        .rx_channel(rx_id)
        .map(|channel| channel.subscription)
        .expect("just inserted or looked up");

    let tx_id = resolve_tx_channel(
        registry,
        device_id,
        record.tx_channel_name.as_deref(),
        record.tx_device_name.as_deref(),
    );
    registry.rebind_subscription_tx(sub_id, tx_id);
    if let Some(sub) = registry.subscription_mut(sub_id) {
        sub.status = record.subscription_status;
    }
}

/// Resolve an RX record's `(tx_device_name, tx_channel_name)` pair to a TX
/// channel id, creating a placeholder (possibly an orphan, if the named
/// device hasn't been discovered yet) when none exists.
fn resolve_tx_channel(
    registry: &mut DeviceRegistry,
    device_id: DeviceId,
    tx_channel_name: Option<&str>,
    tx_device_name: Option<&str>,
) -> Option<TxId> {
    let tx_device_name = tx_device_name?;
    let tx_channel_name = tx_channel_name?;

    // "." means "this same device" — used for loopback subscriptions.
    let tx_device_id = if tx_device_name == "." {
        Some(device_id)
    } else {
        registry.device_by_name(tx_device_name)
    };

    match tx_device_id {
        Some(owner) => {
            if let Some(id) = registry.tx_by_name(owner, tx_channel_name) {
                return Some(id);
            }
            let id = registry.insert_tx_channel(TxChannel {
                device: TxDeviceRef::Known(owner),
                number: None,
                name: tx_channel_name.to_string(),
                friendly_name: None,
                volume: None,
                subscriptions: Vec::new(),
            });
            if let Some(device) = registry.device_mut(owner) {
                device.tx_channels.push(id);
            }
            Some(id)
        }
        None => {
            if let Some(id) = registry.take_orphan_tx(tx_device_name, tx_channel_name) {
                return Some(id);
            }
            let id = registry.insert_tx_channel(TxChannel {
                device: TxDeviceRef::Pending(tx_device_name.to_string()),
                number: None,
                name: tx_channel_name.to_string(),
                friendly_name: None,
                volume: None,
                subscriptions: Vec::new(),
            });
            registry.append_orphan_tx(tx_device_name, id);
            Some(id)
        }
    }
}

/// Apply one parsed TX channel record: resolve by number first, falling
/// back to a name match (the case of a TX channel created earlier as an
/// unnumbered loopback/orphan reference), else insert fresh.
fn apply_tx_record(registry: &mut DeviceRegistry, device_id: DeviceId, record: TxChannelRecord) {
    if let Some(id) = registry.tx_by_number(device_id, record.number) {
        if let Some(channel) = registry.tx_channel_mut(id) {
            channel.name = record.name;
        }
        return;
    }

    if let Some(id) = registry.tx_by_name(device_id, &record.name) {
        if let Some(channel) = registry.tx_channel_mut(id) {
            channel.number = Some(record.number);
        }
        return;
    }

    let id = registry.insert_tx_channel(TxChannel {
        device: TxDeviceRef::Known(device_id),
        number: Some(record.number),
        name: record.name,
        friendly_name: None,
        volume: None,
        subscriptions: Vec::new(),
    });
    if let Some(device) = registry.device_mut(device_id) {
        device.tx_channels.push(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CmcDescriptor, DbcDescriptor};
    use std::net::Ipv4Addr;

    fn sample_device(name: &str) -> Device {
        Device {
            name: name.to_string(),
            ipv4: Ipv4Addr::LOCALHOST,
            arc: ArcDescriptor {
                port: 4440,
                protocol_version: (2, 8, 2),
            },
            cmc: CmcDescriptor {
                port: 8800,
                protocol_version: (2, 8, 2),
                id: None,
                manufacturer: None,
                model: None,
            },
            dbc: DbcDescriptor { port: 4455 },
            sample_rate: 0,
            channel_counts: ChannelCounts::default(),
            rx_channels: Vec::new(),
            tx_channels: Vec::new(),
            connected: true,
        }
    }

    #[test]
    fn apply_rx_record_creates_channel_and_resolves_known_tx_device() {
        let mut registry = DeviceRegistry::new();
        let rx_device = registry.insert_device(sample_device("mixer.local."));
        let tx_device = registry.insert_device(sample_device("amp.local."));

        apply_rx_record(
            &mut registry,
            rx_device,
            RxChannelRecord {
                number: 1,
                name: "In-1".into(),
                status: SubscriptionStatus::Resolved,
                tx_channel_name: Some("out1".into()),
                tx_device_name: Some("amp.local.".into()),
                subscription_status: SubscriptionStatus::Resolved,
            },
        );

        let rx_id = registry.rx_by_number(rx_device, 1).expect("rx channel created");
        let sub_id = registry.rx_channel(rx_id).unwrap().subscription;
        let tx_id = registry.subscription(sub_id).unwrap().tx.expect("tx resolved");
        let tx = registry.tx_channel(tx_id).unwrap();
        assert_eq!(tx.name, "out1");
        assert_eq!(tx.device, TxDeviceRef::Known(tx_device));
        assert!(registry.tx_channel(tx_id).unwrap().subscriptions.contains(&sub_id));
    }

    #[test]
    fn apply_rx_record_orphans_tx_from_undiscovered_device() {
        let mut registry = DeviceRegistry::new();
        let rx_device = registry.insert_device(sample_device("mixer.local."));

        apply_rx_record(
            &mut registry,
            rx_device,
            RxChannelRecord {
                number: 2,
                name: "In-2".into(),
                status: SubscriptionStatus::Unresolved,
                tx_channel_name: Some("out3".into()),
                tx_device_name: Some("mic.local.".into()),
                subscription_status: SubscriptionStatus::Unresolved,
            },
        );

        let rx_id = registry.rx_by_number(rx_device, 2).unwrap();
        let sub_id = registry.rx_channel(rx_id).unwrap().subscription;
        let tx_id = registry.subscription(sub_id).unwrap().tx.expect("orphan tx still resolves");
        assert_eq!(registry.tx_channel(tx_id).unwrap().device, TxDeviceRef::Pending("mic.local.".into()));
        assert_eq!(registry.take_orphan_tx("mic.local.", "out3"), None, "claimed by the rx record itself");
    }

    #[test]
    fn apply_tx_record_resolves_number_for_previously_orphaned_loopback_channel() {
        let mut registry = DeviceRegistry::new();
        let device_id = registry.insert_device(sample_device("amp.local."));
        let tx_id = registry.insert_tx_channel(TxChannel {
            device: TxDeviceRef::Known(device_id),
            number: None,
            name: "out1".into(),
            friendly_name: None,
            volume: None,
            subscriptions: Vec::new(),
        });

        apply_tx_record(
            &mut registry,
            device_id,
            TxChannelRecord {
                number: 1,
                name: "out1".into(),
            },
        );

        assert_eq!(registry.tx_channel(tx_id).unwrap().number, Some(1));
        // the name-matched channel was updated in place, not duplicated
        let device = registry.device(device_id).unwrap();
        assert_eq!(device.tx_channels.iter().filter(|&&id| id == tx_id).count(), 1);
    }
}
