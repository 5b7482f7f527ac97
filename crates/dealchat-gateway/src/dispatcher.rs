use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use dealchat_types::events::RelayEvent;

/// A named set of connections that receive the same events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every connection of one user
    User(i64),
    /// Every connection that joined one discussion
    Discussion(i64),
}

/// Tracks live connections and the groups they belong to.
#[derive(Clone, Default)]
pub struct Dispatcher {
    inner: Arc<RwLock<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// conn_id -> outbound channel and joined groups
    connections: HashMap<Uuid, ConnectionEntry>,
    /// group -> member conn_ids
    groups: HashMap<Group, HashSet<Uuid>>,
}

struct ConnectionEntry {
    tx: mpsc::UnboundedSender<RelayEvent>,
    groups: HashSet<Group>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns (conn_id, receiver).
    pub async fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<RelayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.write().await.connections.insert(
            conn_id,
            ConnectionEntry {
                tx,
                groups: HashSet::new(),
            },
        );
        (conn_id, rx)
    }

    /// Add a registered connection to a group. Returns false for unknown connections.
    pub async fn join(&self, conn_id: Uuid, group: Group) -> bool {
        let mut guard = self.inner.write().await;
        let registry = &mut *guard;
        let Some(entry) = registry.connections.get_mut(&conn_id) else {
            return false;
        };
        entry.groups.insert(group);
        registry.groups.entry(group).or_default().insert(conn_id);
        true
    }

    /// Send an event to every member of a group. Returns how many connections it reached.
    pub async fn emit(&self, group: Group, event: RelayEvent) -> usize {
        let registry = self.inner.read().await;
        let Some(members) = registry.groups.get(&group) else {
            return 0;
        };
        members
            .iter()
            .filter_map(|conn_id| registry.connections.get(conn_id))
            .filter(|entry| entry.tx.send(event.clone()).is_ok())
            .count()
    }

    /// Send an event to one connection only.
    pub async fn send_to(&self, conn_id: Uuid, event: RelayEvent) {
        if let Some(entry) = self.inner.read().await.connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Drop a connection and every group membership it held.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut registry = self.inner.write().await;
        let Some(entry) = registry.connections.remove(&conn_id) else {
            return;
        };
        for group in entry.groups {
            if let Some(members) = registry.groups.get_mut(&group) {
                members.remove(&conn_id);
                if members.is_empty() {
                    registry.groups.remove(&group);
                }
            }
        }
    }

    pub async fn member_count(&self, group: Group) -> usize {
        self.inner.read().await.groups.get(&group).map_or(0, HashSet::len)
    }
}
