use chrono::{DateTime, Utc};
use dashmap::DashMap;
use shore_proto::{Identity, ServerMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Where a connected identity can currently be reached.
#[derive(Debug, Clone)]
pub struct PeerAddress {
    pub connection_id: Uuid,
    pub connected_at: DateTime<Utc>,
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl PeerAddress {
    pub fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            connected_at: Utc::now(),
            tx,
        }
    }

    /// Best-effort delivery. Returns false once the connection's writer is gone.
    pub fn deliver(&self, message: ServerMessage) -> bool {
        self.tx.send(message).is_ok()
    }
}

/// Routing table from logical identity to current address.
///
/// Writes are last-writer-wins; nothing here knows about calls.
pub trait PresenceDirectory: Send + Sync {
    /// Registers `address` for `identity`, returning whatever it replaced.
    fn set(&self, identity: Identity, address: PeerAddress) -> Option<PeerAddress>;

    /// Removes the entry only if it still belongs to `connection_id`.
    fn remove(&self, identity: &Identity, connection_id: Uuid) -> bool;

    fn lookup(&self, identity: &Identity) -> Option<PeerAddress>;

    fn snapshot(&self) -> Vec<Identity>;

    fn addresses(&self) -> Vec<PeerAddress>;

    fn len(&self) -> usize {
        self.snapshot().len()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPresence {
    entries: DashMap<Identity, PeerAddress>,
}

impl InMemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceDirectory for InMemoryPresence {
    fn set(&self, identity: Identity, address: PeerAddress) -> Option<PeerAddress> {
        self.entries.insert(identity, address)
    }

    fn remove(&self, identity: &Identity, connection_id: Uuid) -> bool {
        self.entries
            .remove_if(identity, |_, current| current.connection_id == connection_id)
            .is_some()
    }

    fn lookup(&self, identity: &Identity) -> Option<PeerAddress> {
        // clone out so no shard guard outlives this call
        self.entries.get(identity).map(|entry| entry.value().clone())
    }

    fn snapshot(&self) -> Vec<Identity> {
        let mut ids: Vec<Identity> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    fn addresses(&self) -> Vec<PeerAddress> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> (PeerAddress, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PeerAddress::new(tx), rx)
    }

    #[test_timeout::timeout]
    fn reconnect_replaces_entry() {
        let presence = InMemoryPresence::new();
        let (first, _rx1) = address();
        let (second, _rx2) = address();
        let first_id = first.connection_id;
        let second_id = second.connection_id;

        assert!(presence.set("alice".into(), first).is_none());
        let replaced = presence.set("alice".into(), second).expect("previous entry");
        assert_eq!(replaced.connection_id, first_id);
        assert_eq!(
            presence.lookup(&"alice".into()).unwrap().connection_id,
            second_id
        );
        assert_eq!(presence.len(), 1);
    }

    #[test_timeout::timeout]
    fn stale_disconnect_keeps_newer_entry() {
        let presence = InMemoryPresence::new();
        let (first, _rx1) = address();
        let (second, _rx2) = address();
        let first_id = first.connection_id;
        let second_id = second.connection_id;
        presence.set("alice".into(), first);
        presence.set("alice".into(), second);

        assert!(!presence.remove(&"alice".into(), first_id));
        assert!(presence.lookup(&"alice".into()).is_some());
        assert!(presence.remove(&"alice".into(), second_id));
        assert!(presence.lookup(&"alice".into()).is_none());
    }

    #[test_timeout::timeout]
    fn snapshot_is_sorted() {
        let presence = InMemoryPresence::new();
        for name in ["zoe", "adam", "mia"] {
            let (addr, _rx) = address();
            presence.set(name.into(), addr);
        }
        let names: Vec<String> = presence
            .snapshot()
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(names, vec!["adam", "mia", "zoe"]);
    }

    #[test_timeout::timeout]
    fn deliver_reports_closed_writer() {
        let (addr, rx) = address();
        assert!(addr.deliver(ServerMessage::Pong));
        drop(rx);
        assert!(!addr.deliver(ServerMessage::Pong));
    }
}
