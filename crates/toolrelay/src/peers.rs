//! Connection membership: the live set of peers that can execute tools.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::error::{RelayError, RelayResult};

/// Descriptive information about a connected peer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    pub connected_at: String,
}

/// Transport handle for one peer. Text frames pushed here are written to the
/// peer's socket by its connection task.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    info: PeerInfo,
    sender: mpsc::UnboundedSender<String>,
}

impl PeerHandle {
    pub fn new(info: PeerInfo, sender: mpsc::UnboundedSender<String>) -> Self {
        Self { info, sender }
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &PeerInfo {
        &self.info
    }

    /// Queue a text frame for the peer. Fails once the transport has closed.
    pub fn send(&self, text: String) -> RelayResult<()> {
        self.sender
            .send(text)
            .map_err(|_| RelayError::Internal(format!("transport for peer {} is closed", self.id())))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Set of live peers keyed by peer id. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct Membership {
    peers: Arc<RwLock<HashMap<String, PeerHandle>>>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a peer and watch its transport; the peer is removed when the
    /// transport closes.
    pub async fn add(&self, peer: PeerHandle) {
        let id = peer.id().to_string();
        let sender = peer.sender.clone();
        let total = {
            let mut peers = self.peers.write().await;
            peers.insert(id.clone(), peer);
            peers.len()
        };
        tracing::info!(peer_id = %id, total, "peer joined");

        let membership = self.clone();
        tokio::spawn(async move {
            sender.closed().await;
            membership.remove_channel(&id, &sender).await;
        });
    }

    /// Remove a peer. Returns whether it was present; repeated calls are no-ops.
    pub async fn remove(&self, id: &str) -> bool {
        let (removed, total) = {
            let mut peers = self.peers.write().await;
            let removed = peers.remove(id).is_some();
            (removed, peers.len())
        };
        if removed {
            tracing::info!(peer_id = %id, total, "peer left");
        }
        removed
    }

    /// Remove `id` only if it is still bound to `sender`, so a closed transport
    /// never evicts a newer registration under the same id.
    async fn remove_channel(&self, id: &str, sender: &mpsc::UnboundedSender<String>) {
        let removed = {
            let mut peers = self.peers.write().await;
            match peers.get(id) {
                Some(current) if current.sender.same_channel(sender) => {
                    peers.remove(id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            tracing::info!(peer_id = %id, "peer transport closed");
        }
    }

    /// Current members, read fresh for a single dispatch attempt.
    pub async fn snapshot(&self) -> Vec<PeerHandle> {
        self.peers.read().await.values().cloned().collect()
    }

    pub async fn list(&self) -> Vec<PeerInfo> {
        let mut infos: Vec<PeerInfo> = self
            .peers
            .read()
            .await
            .values()
            .map(|peer| peer.info.clone())
            .collect();
        infos.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        infos
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.peers.read().await.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }

    /// Insert without a close watcher, so a dead transport stays a member.
    #[cfg(test)]
    pub(crate) async fn insert_unwatched(&self, peer: PeerHandle) {
        self.peers.write().await.insert(peer.id().to_string(), peer);
    }
}

#[cfg(test)]
pub(crate) fn test_peer(id: &str) -> (PeerHandle, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let info = PeerInfo {
        id: id.to_string(),
        client: Some("test".to_string()),
        capabilities: Vec::new(),
        remote_addr: None,
        connected_at: crate::utils::time::now_rfc3339(),
    };
    (PeerHandle::new(info, tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn add_and_snapshot() {
        let membership = Membership::new();
        let (peer, _rx) = test_peer("peer-1");
        membership.add(peer).await;

        let snapshot = membership.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), "peer-1");
        assert!(membership.contains("peer-1").await);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let membership = Membership::new();
        let (peer, _rx) = test_peer("peer-1");
        membership.add(peer).await;

        assert!(membership.remove("peer-1").await);
        assert!(!membership.remove("peer-1").await);
        assert!(membership.is_empty().await);
    }

    #[tokio::test]
    async fn closed_transport_removes_peer() {
        let membership = Membership::new();
        let (peer, rx) = test_peer("peer-1");
        membership.add(peer).await;
        assert_eq!(membership.len().await, 1);

        drop(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(membership.is_empty().await);
    }

    #[tokio::test]
    async fn stale_close_does_not_evict_new_registration() {
        let membership = Membership::new();
        let (old_peer, old_rx) = test_peer("peer-1");
        membership.add(old_peer).await;
        let (new_peer, _new_rx) = test_peer("peer-1");
        membership.add(new_peer).await;

        drop(old_rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(membership.contains("peer-1").await);
    }

    #[tokio::test]
    async fn snapshot_is_not_live() {
        let membership = Membership::new();
        let (peer, _rx) = test_peer("peer-1");
        membership.add(peer).await;

        let snapshot = membership.snapshot().await;
        membership.remove("peer-1").await;
        assert_eq!(snapshot.len(), 1);
        assert!(membership.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (peer, rx) = test_peer("peer-1");
        drop(rx);
        assert!(peer.is_closed());
        assert!(peer.send("{}".to_string()).is_err());
    }
}
