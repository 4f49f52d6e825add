//! Peer map shared by the router-style sockets.
//!
//! Both the TCP frontend and the in-process backend speak the same envelope
//! protocol: inbound traffic is normalized to `[identity][empty][body…]`,
//! outbound envelopes carry the target identity in the first frame. The hub
//! tracks one write channel per peer and applies handover semantics when a
//! peer re-announces an identity that is already bound.

use bytes::Bytes;
use flume::Sender;
use hashbrown::HashMap;
use tracing::trace;

/// Lifecycle and traffic events produced by connection actors.
#[derive(Debug)]
pub enum PeerEvent {
    /// A peer announced itself. Replaces any previous binding of the same
    /// identity (handover).
    Up {
        identity: Bytes,
        tx: Sender<Vec<Bytes>>,
    },
    /// A peer went away.
    Down { identity: Bytes },
    /// A complete multipart body arrived from a peer.
    Message { identity: Bytes, body: Vec<Bytes> },
}

/// Routing table from peer identity to its write channel.
#[derive(Debug, Default)]
pub struct PeerMap {
    peers: HashMap<Bytes, Sender<Vec<Bytes>>>,
}

impl PeerMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a peer event.
    ///
    /// Lifecycle events mutate the routing table and return `None`; traffic
    /// events are normalized to `[identity][empty][body…]` and returned.
    pub fn apply(&mut self, event: PeerEvent) -> Option<Vec<Bytes>> {
        match event {
            PeerEvent::Up { identity, tx } => {
                // Handover: a new binding for a known identity wins, the old
                // write channel is dropped and its pump exits.
                if self.peers.insert(identity.clone(), tx).is_some() {
                    trace!(identity = ?identity, "peer identity handed over");
                }
                None
            }
            PeerEvent::Down { identity } => {
                self.peers.remove(&identity);
                None
            }
            PeerEvent::Message { identity, body } => {
                let mut envelope = Vec::with_capacity(body.len() + 2);
                envelope.push(identity);
                envelope.push(Bytes::new());
                envelope.extend(body);
                Some(envelope)
            }
        }
    }

    /// Route an outbound envelope `[identity][empty][body…]` to its peer.
    ///
    /// The identity frame and the optional empty delimiter are stripped;
    /// envelopes addressed to an unknown identity are dropped silently.
    pub fn route(&self, mut parts: Vec<Bytes>) {
        if parts.is_empty() {
            return;
        }

        let target = parts.remove(0);
        if !parts.is_empty() && parts[0].is_empty() {
            parts.remove(0);
        }

        if let Some(tx) = self.peers.get(&target) {
            let _ = tx.send(parts);
        } else {
            trace!(identity = ?target, "dropping envelope for unknown peer");
        }
    }

    #[must_use]
    pub fn contains(&self, identity: &[u8]) -> bool {
        self.peers.contains_key(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> (Sender<Vec<Bytes>>, flume::Receiver<Vec<Bytes>>) {
        flume::unbounded()
    }

    #[test]
    fn test_normalizes_inbound() {
        let mut map = PeerMap::new();
        let envelope = map
            .apply(PeerEvent::Message {
                identity: Bytes::from_static(b"w1"),
                body: vec![Bytes::from_static(b"READY")],
            })
            .unwrap();

        assert_eq!(envelope.len(), 3);
        assert_eq!(envelope[0], &b"w1"[..]);
        assert!(envelope[1].is_empty());
        assert_eq!(envelope[2], &b"READY"[..]);
    }

    #[test]
    fn test_routes_to_known_peer() {
        let mut map = PeerMap::new();
        let (tx, rx) = peer();
        map.apply(PeerEvent::Up {
            identity: Bytes::from_static(b"w1"),
            tx,
        });

        map.route(vec![
            Bytes::from_static(b"w1"),
            Bytes::new(),
            Bytes::from_static(b"payload"),
        ]);

        let body = rx.try_recv().unwrap();
        assert_eq!(body, vec![Bytes::from_static(b"payload")]);
    }

    #[test]
    fn test_unknown_peer_dropped_silently() {
        let map = PeerMap::new();
        // Must not panic or error.
        map.route(vec![Bytes::from_static(b"ghost"), Bytes::new()]);
    }

    #[test]
    fn test_handover_replaces_binding() {
        let mut map = PeerMap::new();
        let (old_tx, old_rx) = peer();
        let (new_tx, new_rx) = peer();

        map.apply(PeerEvent::Up {
            identity: Bytes::from_static(b"c1"),
            tx: old_tx,
        });
        map.apply(PeerEvent::Up {
            identity: Bytes::from_static(b"c1"),
            tx: new_tx,
        });

        map.route(vec![Bytes::from_static(b"c1"), Bytes::from_static(b"hello")]);
        assert!(old_rx.try_recv().is_err());
        assert_eq!(new_rx.try_recv().unwrap(), vec![Bytes::from_static(b"hello")]);
    }

    #[test]
    fn test_peer_down_removes_binding() {
        let mut map = PeerMap::new();
        let (tx, _rx) = peer();
        map.apply(PeerEvent::Up {
            identity: Bytes::from_static(b"w1"),
            tx,
        });
        assert!(map.contains(b"w1"));

        map.apply(PeerEvent::Down {
            identity: Bytes::from_static(b"w1"),
        });
        assert!(!map.contains(b"w1"));
    }
}
