//! Message indexing and the in-flight pending-request table shared by every
//! service socket.

use std::collections::HashMap;
use std::time::Instant;

/// `SEND` (0x0000) marks an unsolicited push from a peer; `RECV` (0x0001)
/// marks a reply correlated against something we sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Send,
    Recv,
}

impl MessageType {
    pub const SEND_BYTES: [u8; 2] = [0x00, 0x00];
    pub const RECV_BYTES: [u8; 2] = [0x00, 0x01];

    pub fn from_bytes(bytes: [u8; 2]) -> Option<Self> {
        match bytes {
            Self::SEND_BYTES => Some(Self::Send),
            Self::RECV_BYTES => Some(Self::Recv),
            _ => None,
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            Self::Send => Self::SEND_BYTES,
            Self::Recv => Self::RECV_BYTES,
        }
    }
}

/// Per-service monotonically increasing 16-bit message index, wrapping
/// modulo 2^16. Collisions within the wrap window are assumed impossible
/// given typical RTT far below the time it takes to wrap.
#[derive(Debug, Default)]
pub struct MessageIndex {
    next: u16,
}

impl MessageIndex {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn generate(&mut self) -> u16 {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        id
    }
}

/// An in-flight request awaiting a correlated response.
pub struct PendingEntry {
    pub command_code: [u8; 2],
    pub original_bytes: Vec<u8>,
    pub callback: Option<Box<dyn FnOnce(&[u8]) + Send>>,
    pub enqueued_at: Instant,
}

impl std::fmt::Debug for PendingEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingEntry")
            .field("command_code", &self.command_code)
            .field("len", &self.original_bytes.len())
            .field("has_callback", &self.callback.is_some())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Concurrent-safe (guarded by an external mutex) table of in-flight
/// messages keyed by 16-bit index.
#[derive(Default)]
pub struct PendingTable {
    entries: HashMap<u16, PendingEntry>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn insert(&mut self, index: u16, entry: PendingEntry) {
        self.entries.insert(index, entry);
    }

    pub fn take(&mut self, index: u16) -> Option<PendingEntry> {
        self.entries.remove(&index)
    }

    /// Purge entries older than `deadline`, returning how many were dropped.
    pub fn purge_expired(&mut self, deadline: std::time::Duration) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.enqueued_at.elapsed() < deadline);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_index_wraps_modulo_2_16() {
        let mut idx = MessageIndex::new();
        for expected in 0..=u16::MAX {
            assert_eq!(idx.generate(), expected);
        }
        assert_eq!(idx.generate(), 0);
    }

    #[test]
    fn message_type_round_trips() {
        assert_eq!(MessageType::from_bytes([0x00, 0x00]), Some(MessageType::Send));
        assert_eq!(MessageType::from_bytes([0x00, 0x01]), Some(MessageType::Recv));
        assert_eq!(MessageType::from_bytes([0x12, 0x34]), None);
        assert_eq!(MessageType::Send.to_bytes(), [0x00, 0x00]);
    }

    #[test]
    fn pending_table_purges_only_expired() {
        let mut table = PendingTable::new();
        table.insert(
            1,
            PendingEntry {
                command_code: [0x10, 0x00],
                original_bytes: vec![],
                callback: None,
                enqueued_at: Instant::now() - std::time::Duration::from_secs(2),
            },
        );
        table.insert(
            2,
            PendingEntry {
                command_code: [0x10, 0x00],
                original_bytes: vec![],
                callback: None,
                enqueued_at: Instant::now(),
            },
        );
        let purged = table.purge_expired(std::time::Duration::from_secs(1));
        assert_eq!(purged, 1);
        assert!(table.take(1).is_none());
        assert!(table.take(2).is_some());
    }
}
