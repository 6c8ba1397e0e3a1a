//! Dante Broadcast Control: discovery only. No command is ever built for
//! this service — its only role is to gate device-registration on its
//! mDNS record having shown up alongside ARC and CMC.

pub const SERVICE_TYPE_MDNS: &str = "_netaudio-dbc._udp.local.";
