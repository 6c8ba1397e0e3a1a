//! Discovery, domain model, and wire protocol for talking to Dante digital
//! audio network devices over ARC, CMC, the settings service, and the
//! passive volume-level listener.
//!
//! [`Application`] is the entry point: it owns the four service sockets,
//! runs mDNS discovery, and exposes a façade over the resulting device
//! graph.

pub mod application;
pub mod arc_service;
pub mod channel;
pub mod cmc_service;
pub mod codec;
pub mod dbc_service;
pub mod device;
pub mod discovery;
pub mod error;
pub mod message;
pub mod registry;
pub mod service;
pub mod settings_service;
pub mod subscription;
pub mod validate;
pub mod volume_service;

pub use application::{Application, ChannelSnapshot, DeviceSnapshot, SubscriptionSnapshot};
pub use channel::{ChannelType, Volume};
pub use error::{CodecError, FacadeError, TransportError};
pub use registry::{ArcDescriptor, ChannelCounts, CmcDescriptor, DbcDescriptor, DeviceId};
pub use service::EngineConfig;
pub use settings_service::Encoding;
pub use subscription::SubscriptionStatus;
