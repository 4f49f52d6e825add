//! In-process transport for the router's worker-facing side.
//!
//! Workers live on the same cooperative runtime as the router, so the
//! backend socket pair is plain channels behind an `inproc://` endpoint
//! name. A global registry maps bound endpoints to their event channels;
//! dealers connect by name and announce their identity, after which both
//! sides exchange the same normalized envelopes as the TCP transport:
//! the router sees `[identity][empty][body…]`, a dealer sees only bodies.

use bytes::Bytes;
use dashmap::DashMap;
use flume::{Receiver, Sender};

use crate::error::{Result, TransportError};
use crate::hub::{PeerEvent, PeerMap};

/// Global registry of bound inproc endpoints
static REGISTRY: once_cell::sync::Lazy<DashMap<String, Sender<PeerEvent>>> =
    once_cell::sync::Lazy::new(DashMap::new);

const PREFIX: &str = "inproc://";

fn endpoint_name(endpoint: &str) -> Result<&str> {
    let name = endpoint
        .strip_prefix(PREFIX)
        .ok_or_else(|| TransportError::invalid_frame(format!("inproc endpoint must start with '{PREFIX}', got: '{endpoint}'")))?;
    if name.is_empty() {
        return Err(TransportError::invalid_frame("inproc endpoint name cannot be empty"));
    }
    Ok(name)
}

/// Router-style side of an inproc endpoint.
///
/// Owns the endpoint name for its lifetime; dropping it unbinds the name.
pub struct InprocRouter {
    name: String,
    event_rx: Receiver<PeerEvent>,
    peers: PeerMap,
}

impl InprocRouter {
    /// Bind an `inproc://` endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is malformed or already bound.
    pub fn bind(endpoint: &str) -> Result<Self> {
        let name = endpoint_name(endpoint)?;

        let (event_tx, event_rx) = flume::unbounded();
        if REGISTRY.insert(name.to_string(), event_tx).is_some() {
            return Err(TransportError::AddrInUse(endpoint.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            event_rx,
            peers: PeerMap::new(),
        })
    }

    /// Receive the next normalized envelope `[identity][empty][body…]`.
    ///
    /// Returns `None` once every dealer side is gone and the channel has
    /// drained.
    pub async fn recv(&mut self) -> Option<Vec<Bytes>> {
        loop {
            let event = self.event_rx.recv_async().await.ok()?;
            if let Some(envelope) = self.peers.apply(event) {
                return Some(envelope);
            }
        }
    }

    /// Route `[identity][empty][body…]` to the matching dealer.
    pub fn send(&self, envelope: Vec<Bytes>) {
        self.peers.route(envelope);
    }
}

impl Drop for InprocRouter {
    fn drop(&mut self) {
        REGISTRY.remove(&self.name);
    }
}

/// Dealer-style side of an inproc endpoint.
pub struct InprocDealer {
    identity: Bytes,
    event_tx: Sender<PeerEvent>,
    rx: Receiver<Vec<Bytes>>,
}

impl InprocDealer {
    /// Connect to a bound endpoint and announce `identity`.
    ///
    /// # Errors
    ///
    /// Fails if the endpoint is malformed or not bound.
    pub fn connect(endpoint: &str, identity: impl Into<Bytes>) -> Result<Self> {
        let name = endpoint_name(endpoint)?;

        let event_tx = REGISTRY
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::AddrNotFound(endpoint.to_string()))?;

        let identity = identity.into();
        let (tx, rx) = flume::unbounded();
        event_tx
            .send(PeerEvent::Up {
                identity: identity.clone(),
                tx,
            })
            .map_err(|_| TransportError::ChannelSend)?;

        Ok(Self {
            identity,
            event_tx,
            rx,
        })
    }

    /// Send a multipart body to the router side.
    ///
    /// # Errors
    ///
    /// Fails once the router side is gone.
    pub fn send(&self, body: Vec<Bytes>) -> Result<()> {
        self.event_tx
            .send(PeerEvent::Message {
                identity: self.identity.clone(),
                body,
            })
            .map_err(|_| TransportError::ChannelSend)
    }

    /// Receive the next body sent by the router.
    ///
    /// Returns `None` once the router side is gone.
    pub async fn recv(&self) -> Option<Vec<Bytes>> {
        self.rx.recv_async().await.ok()
    }
}

impl Drop for InprocDealer {
    fn drop(&mut self) {
        let _ = self.event_tx.send(PeerEvent::Down {
            identity: self.identity.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_malformed_endpoint() {
        assert!(matches!(
            InprocRouter::bind("tcp://whatever"),
            Err(TransportError::InvalidFrame(_))
        ));
        assert!(matches!(
            InprocRouter::bind("inproc://"),
            Err(TransportError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_bind_duplicate() {
        let endpoint = "inproc://test-duplicate";
        let _router = InprocRouter::bind(endpoint).unwrap();
        assert!(matches!(
            InprocRouter::bind(endpoint),
            Err(TransportError::AddrInUse(_))
        ));
    }

    #[test]
    fn test_connect_before_bind() {
        assert!(matches!(
            InprocDealer::connect("inproc://test-unbound", "w1"),
            Err(TransportError::AddrNotFound(_))
        ));
    }

    #[test]
    fn test_rebind_after_drop() {
        let endpoint = "inproc://test-rebind";
        drop(InprocRouter::bind(endpoint).unwrap());
        assert!(InprocRouter::bind(endpoint).is_ok());
    }

    #[test]
    fn test_roundtrip() {
        compio::runtime::Runtime::new().unwrap().block_on(async {
            let endpoint = "inproc://test-roundtrip";
            let mut router = InprocRouter::bind(endpoint).unwrap();
            let dealer = InprocDealer::connect(endpoint, "w1").unwrap();

            dealer.send(vec![Bytes::from_static(b"READY")]).unwrap();
            let envelope = router.recv().await.unwrap();
            assert_eq!(envelope[0], &b"w1"[..]);
            assert!(envelope[1].is_empty());
            assert_eq!(envelope[2], &b"READY"[..]);

            router.send(vec![
                Bytes::from_static(b"w1"),
                Bytes::new(),
                Bytes::from_static(b"job"),
            ]);
            let body = dealer.recv().await.unwrap();
            assert_eq!(body, vec![Bytes::from_static(b"job")]);
        });
    }
}
