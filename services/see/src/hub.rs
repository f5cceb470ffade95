//! Fan-out of encoded frames to connected websocket peers.
//!
//! The caller encodes a batch once; the hub queues the frame to every peer.
//! Each peer owns an unbounded queue drained by its socket writer task, so
//! no lock is ever held across a socket write. A peer whose queue is gone
//! (its writer exited) is dropped on the next broadcast: disconnect on
//! failure, no retry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, RwLock};

pub type PeerId = u64;

#[derive(Debug, Default)]
pub struct Hub {
    peers: RwLock<HashMap<PeerId, mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl Hub {
    /// Registers a peer. `initial_frames` are queued before the peer becomes
    /// visible to broadcasts, so a joining peer always sees its replay
    /// frames first. A broadcast racing the registration may or may not be
    /// delivered to the new peer.
    pub async fn attach(
        &self,
        initial_frames: Vec<String>,
    ) -> (PeerId, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in initial_frames {
            let _ = tx.send(frame);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.peers.write().await.insert(id, tx);
        (id, rx)
    }

    pub async fn detach(&self, id: PeerId) {
        self.peers.write().await.remove(&id);
    }

    /// Best-effort delivery to every connected peer. The peer set is copied
    /// out under the shared lock and the sends happen with no lock held;
    /// peers whose queue is closed are removed afterwards.
    pub async fn broadcast(&self, frame: &str) {
        let snapshot: Vec<(PeerId, mpsc::UnboundedSender<String>)> = {
            let peers = self.peers.read().await;
            peers.iter().map(|(id, tx)| (*id, tx.clone())).collect()
        };

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.send(frame.to_owned()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut peers = self.peers.write().await;
            for id in dead {
                peers.remove(&id);
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn initial_frames_arrive_before_broadcasts() {
        let hub = Hub::default();
        let (_id, mut rx) = hub
            .attach(vec!["replay-1".to_owned(), "replay-2".to_owned()])
            .await;
        hub.broadcast("live").await;

        assert_eq!(rx.recv().await.as_deref(), Some("replay-1"));
        assert_eq!(rx.recv().await.as_deref(), Some("replay-2"));
        assert_eq!(rx.recv().await.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn detached_peer_receives_nothing_further() {
        let hub = Hub::default();
        let (id, mut rx) = hub.attach(Vec::new()).await;
        hub.broadcast("first").await;
        hub.detach(id).await;
        hub.broadcast("second").await;

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert!(rx.try_recv().is_err(), "no frame after detach");
    }

    #[tokio::test]
    async fn dead_peers_are_dropped_on_broadcast() {
        let hub = Hub::default();
        let (_id, rx) = hub.attach(Vec::new()).await;
        assert_eq!(hub.peer_count().await, 1);

        drop(rx);
        hub.broadcast("anyone there").await;
        assert_eq!(hub.peer_count().await, 0);
    }
}
