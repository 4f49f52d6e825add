//! TCP router/dealer sockets.
//!
//! The client-facing transport of the broker. A dealer connects and
//! announces its identity with a single-frame message; every message after
//! that is a multipart body. The router side runs one connection actor per
//! peer with a split-pump design: the read pump decodes frames into
//! complete multipart messages and feeds the shared event channel, the
//! write pump drains a per-peer channel onto the socket. Neither pump
//! touches routing state; the [`PeerMap`] is owned by the `TcpRouter` and
//! mutated only on its receive path.
//!
//! Closing either side abandons pending I/O (zero linger): dropping the
//! router cancels the accept loop and closes every per-peer write channel
//! without flushing.

use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use compio::buf::BufResult;
use compio::io::{AsyncRead, AsyncWriteExt};
use compio::net::{TcpListener, TcpStream};
use compio::runtime::Task;
use flume::{Receiver, Sender};
use tracing::{trace, warn};

use crate::error::{Result, TransportError};
use crate::frame::{encode_multipart, FrameDecoder, MultipartAssembler};
use crate::hub::{PeerEvent, PeerMap};

const READ_CHUNK: usize = 8192;

/// Router-style TCP socket: accepts dealer peers and exchanges
/// identity-addressed envelopes with them.
pub struct TcpRouter {
    local_addr: SocketAddr,
    event_rx: Receiver<PeerEvent>,
    peers: PeerMap,
    // Dropping the handle cancels the accept loop.
    _accept_task: Task<()>,
}

impl TcpRouter {
    /// Bind a listener and start accepting peers.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (event_tx, event_rx) = flume::unbounded();
        let accept_task = compio::runtime::spawn(accept_loop(listener, event_tx));

        Ok(Self {
            local_addr,
            event_rx,
            peers: PeerMap::new(),
            _accept_task: accept_task,
        })
    }

    /// The bound address, useful when binding port 0.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next normalized envelope `[identity][empty][body…]`.
    ///
    /// Peer lifecycle events are folded into the routing table on the way.
    pub async fn recv(&mut self) -> Option<Vec<Bytes>> {
        loop {
            let event = self.event_rx.recv_async().await.ok()?;
            if let Some(envelope) = self.peers.apply(event) {
                return Some(envelope);
            }
        }
    }

    /// Route `[identity][empty][body…]` to the matching peer.
    ///
    /// Envelopes addressed to an unknown identity are dropped silently.
    pub fn send(&self, envelope: Vec<Bytes>) {
        self.peers.route(envelope);
    }
}

/// Dealer-style TCP socket used by broker clients.
pub struct TcpDealer {
    identity: Bytes,
    write_tx: Sender<Vec<Bytes>>,
    body_rx: Receiver<Vec<Bytes>>,
    // Keep the pumps alive for the socket's lifetime.
    _tasks: (Task<()>, Task<()>),
}

impl TcpDealer {
    /// Connect to a router and announce `identity`.
    ///
    /// # Errors
    ///
    /// Fails if the TCP connection cannot be established.
    pub async fn connect(addr: &str, identity: impl Into<Bytes>) -> Result<Self> {
        let stream = Rc::new(TcpStream::connect(addr).await?);
        let identity = identity.into();

        let (write_tx, write_rx) = flume::unbounded();
        let (body_tx, body_rx) = flume::unbounded();

        // The announcement is the first message on the wire.
        write_tx
            .send(vec![identity.clone()])
            .map_err(|_| TransportError::ChannelSend)?;

        let write_task = compio::runtime::spawn(write_pump(Rc::clone(&stream), write_rx));
        let read_task = compio::runtime::spawn(dealer_read_pump(stream, body_tx));

        Ok(Self {
            identity,
            write_tx,
            body_rx,
            _tasks: (read_task, write_task),
        })
    }

    /// The identity announced to the router.
    #[must_use]
    pub const fn identity(&self) -> &Bytes {
        &self.identity
    }

    /// Queue a multipart body for sending.
    ///
    /// # Errors
    ///
    /// Fails once the connection is gone.
    pub fn send(&self, body: Vec<Bytes>) -> Result<()> {
        self.write_tx
            .send(body)
            .map_err(|_| TransportError::SocketClosed)
    }

    /// Receive the next body, waiting until one arrives.
    ///
    /// Returns `None` once the connection is gone.
    pub async fn recv(&self) -> Option<Vec<Bytes>> {
        self.body_rx.recv_async().await.ok()
    }

    /// Receive the next body without waiting.
    ///
    /// # Errors
    ///
    /// Fails once the connection is gone.
    pub fn try_recv(&self) -> Result<Option<Vec<Bytes>>> {
        match self.body_rx.try_recv() {
            Ok(body) => Ok(Some(body)),
            Err(flume::TryRecvError::Empty) => Ok(None),
            Err(flume::TryRecvError::Disconnected) => Err(TransportError::SocketClosed),
        }
    }
}

async fn accept_loop(listener: TcpListener, event_tx: Sender<PeerEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!(%addr, "accepted peer connection");
                compio::runtime::spawn(connection_actor(stream, event_tx.clone())).detach();
            }
            Err(e) => {
                warn!("accept error: {e}");
                compio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

async fn connection_actor(stream: TcpStream, events: Sender<PeerEvent>) {
    let stream = Rc::new(stream);
    let (write_tx, write_rx) = flume::unbounded();

    compio::runtime::spawn(write_pump(Rc::clone(&stream), write_rx)).detach();
    router_read_pump(stream, events, write_tx).await;
}

/// Read pump on the router side: the first complete message is the peer's
/// identity announcement, everything after it is traffic.
async fn router_read_pump(
    stream: Rc<TcpStream>,
    events: Sender<PeerEvent>,
    write_tx: Sender<Vec<Bytes>>,
) {
    let mut reader = stream.as_ref();
    let mut decoder = FrameDecoder::new();
    let mut assembler = MultipartAssembler::default();
    let mut src = BytesMut::new();
    let mut identity: Option<Bytes> = None;

    'outer: loop {
        let BufResult(res, chunk) = reader.read(Vec::with_capacity(READ_CHUNK)).await;
        match res {
            Ok(0) => break,
            Ok(_) => {
                src.extend_from_slice(&chunk);
                loop {
                    match decoder.decode(&mut src) {
                        Ok(Some(frame)) => {
                            let Some(parts) = assembler.push(frame) else {
                                continue;
                            };
                            let event = match &identity {
                                None => {
                                    let id = announced_identity(parts);
                                    identity = Some(id.clone());
                                    PeerEvent::Up {
                                        identity: id,
                                        tx: write_tx.clone(),
                                    }
                                }
                                Some(id) => PeerEvent::Message {
                                    identity: id.clone(),
                                    body: parts,
                                },
                            };
                            if events.send(event).is_err() {
                                break 'outer;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("dropping peer connection: {e}");
                            break 'outer;
                        }
                    }
                }
            }
            Err(e) => {
                trace!("peer read error: {e}");
                break;
            }
        }
    }

    if let Some(id) = identity {
        let _ = events.send(PeerEvent::Down { identity: id });
    }
}

/// Read pump on the dealer side: every complete message is a body.
async fn dealer_read_pump(stream: Rc<TcpStream>, body_tx: Sender<Vec<Bytes>>) {
    let mut reader = stream.as_ref();
    let mut decoder = FrameDecoder::new();
    let mut assembler = MultipartAssembler::default();
    let mut src = BytesMut::new();

    'outer: loop {
        let BufResult(res, chunk) = reader.read(Vec::with_capacity(READ_CHUNK)).await;
        match res {
            Ok(0) => break,
            Ok(_) => {
                src.extend_from_slice(&chunk);
                loop {
                    match decoder.decode(&mut src) {
                        Ok(Some(frame)) => {
                            if let Some(parts) = assembler.push(frame) {
                                if body_tx.send(parts).is_err() {
                                    break 'outer;
                                }
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("dropping connection: {e}");
                            break 'outer;
                        }
                    }
                }
            }
            Err(e) => {
                trace!("read error: {e}");
                break;
            }
        }
    }
}

/// Write pump shared by both sides: drains the channel onto the socket.
async fn write_pump(stream: Rc<TcpStream>, rx: Receiver<Vec<Bytes>>) {
    let mut writer = stream.as_ref();
    let mut buf = BytesMut::new();

    while let Ok(parts) = rx.recv_async().await {
        encode_multipart(&parts, &mut buf);
        let wire = buf.split().to_vec();
        let BufResult(res, _) = writer.write_all(wire).await;
        if res.is_err() {
            break;
        }
    }
}

fn announced_identity(parts: Vec<Bytes>) -> Bytes {
    parts
        .into_iter()
        .next()
        .filter(|frame| !frame.is_empty())
        .unwrap_or_else(|| Bytes::from(uuid::Uuid::new_v4().to_string()))
}
