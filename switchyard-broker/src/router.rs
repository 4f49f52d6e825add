//! The router: a two-socket switch with a dynamic worker pool.
//!
//! The frontend is a TCP router socket clients connect to; the backend is
//! an in-process endpoint the workers dial. Workers advertise idleness
//! with a `READY` body; the router dispatches to advertised-idle workers
//! only, pins every client key to the worker that first served it, and
//! spawns one spare worker whenever an assignment drains the idle pool so
//! the next new client never waits for worker startup.
//!
//! All pool and affinity state is mutated only on the router loop; there
//! is nothing to lock.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{pin_mut, select, FutureExt};
use hashbrown::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use switchyard_core::error::Result;
use switchyard_core::inproc::InprocRouter;
use switchyard_core::message::Message;
use switchyard_core::shutdown::ShutdownToken;
use switchyard_core::tcp::TcpRouter;

use crate::protocol::{client_key, url_scheme, AsyncMessageRequest, AsyncMessageResponse, READY};
use crate::worker::Worker;

/// Well-known client-facing endpoint.
pub const FRONTEND_ENDPOINT: &str = "127.0.0.1:5554";

/// Worker-facing endpoint prefix; each router instance suffixes its
/// frontend port so multiple brokers can coexist in one process.
pub const BACKEND_ENDPOINT: &str = "inproc://workers";

enum Event {
    Backend(Vec<Bytes>),
    Frontend(Vec<Bytes>),
    Stop,
}

struct WorkerHandle {
    identity: String,
    // Dropping the handle tears the worker task down with the router.
    _task: compio::runtime::Task<()>,
}

/// The message switch between clients and workers.
pub struct Router {
    frontend: TcpRouter,
    backend: InprocRouter,
    backend_endpoint: String,
    shutdown: ShutdownToken,
    workers: Vec<WorkerHandle>,
    workers_available: VecDeque<String>,
    client_worker_map: HashMap<String, String>,
    worker_identity_map: HashMap<String, Bytes>,
    /// Requests parked until a worker announces readiness.
    pending: VecDeque<Vec<Bytes>>,
}

impl Router {
    /// Bind the frontend and backend sockets and spawn the first worker.
    ///
    /// # Errors
    ///
    /// Fails if either socket cannot be bound.
    pub async fn bind(addr: &str, shutdown: ShutdownToken) -> Result<Self> {
        let frontend = TcpRouter::bind(addr).await?;
        let backend_endpoint = format!("{BACKEND_ENDPOINT}-{}", frontend.local_addr().port());
        let backend = InprocRouter::bind(&backend_endpoint)?;

        let mut router = Self {
            frontend,
            backend,
            backend_endpoint,
            shutdown,
            workers: Vec::new(),
            workers_available: VecDeque::new(),
            client_worker_map: HashMap::new(),
            worker_identity_map: HashMap::new(),
            pending: VecDeque::new(),
        };
        router.spawn_worker();

        Ok(router)
    }

    /// The bound frontend address.
    #[must_use]
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.frontend.local_addr()
    }

    fn spawn_worker(&mut self) {
        let identity = Uuid::new_v4().to_string();
        match Worker::connect(&self.backend_endpoint, identity.clone(), self.shutdown.clone()) {
            Ok(worker) => {
                let task = compio::runtime::spawn(worker.run());
                info!("spawned worker {identity}");
                self.workers.push(WorkerHandle {
                    identity,
                    _task: task,
                });
            }
            Err(e) => warn!("failed to spawn worker: {e}"),
        }
    }

    /// Poll both sockets until shutdown, then abort the connected clients.
    pub async fn run(mut self) {
        info!("listening on {}", self.frontend.local_addr());

        loop {
            let event = {
                let backend = self.backend.recv().fuse();
                let frontend = self.frontend.recv().fuse();
                let stop = self.shutdown.wait().fuse();
                pin_mut!(backend, frontend, stop);
                select! {
                    envelope = backend => envelope.map_or(Event::Stop, Event::Backend),
                    envelope = frontend => envelope.map_or(Event::Stop, Event::Frontend),
                    _ = stop => Event::Stop,
                }
            };

            match event {
                Event::Backend(envelope) => self.on_backend(envelope),
                Event::Frontend(envelope) => self.on_frontend(envelope),
                Event::Stop => break,
            }
        }

        info!("stopping");
        self.abort_clients();
        // One beat for the connection pumps to flush the aborts.
        compio::time::sleep(std::time::Duration::from_millis(100)).await;
        info!("stopped");
    }

    /// Backend input: either a `READY` announcement or a reply to forward.
    fn on_backend(&mut self, envelope: Vec<Bytes>) {
        // [worker][empty][reply…]
        if envelope.len() < 3 {
            return;
        }
        let worker_id = String::from_utf8_lossy(&envelope[0]).to_string();
        let reply = &envelope[2..];

        if reply.len() == 1 && reply[0].as_ref() == READY.as_bytes() {
            debug!("worker {worker_id} ready");
            self.workers_available.push_back(worker_id);
            self.drain_pending();
            return;
        }

        // [client][empty][response]: remember who this worker serves so a
        // shutdown abort can still reach them.
        self.worker_identity_map.insert(worker_id, reply[0].clone());
        self.frontend.send(reply.to_vec());
    }

    fn on_frontend(&mut self, envelope: Vec<Bytes>) {
        // [client][empty][payload]
        if envelope.len() < 3 {
            return;
        }
        self.dispatch(envelope);
    }

    /// Assign a worker to the request and forward it to the backend.
    fn dispatch(&mut self, envelope: Vec<Bytes>) {
        let client_identity = envelope[0].clone();
        let payload = &envelope[envelope.len() - 1];

        let mut request: AsyncMessageRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("discarding undecodable request: {e}");
                self.reply_error(&client_identity, format!("could not decode request: {e}"));
                return;
            }
        };

        let client_key = request.client.as_deref().map(|client| {
            let scheme = url_scheme(request.context.url.as_deref());
            client_key(client, &scheme)
        });

        // Stamped worker wins, then affinity, then the idle pool.
        let mut worker_id = request.worker.clone();
        if worker_id.is_none() {
            if let Some(key) = &client_key {
                worker_id = self.client_worker_map.get(key).cloned();
            }
        }

        let worker_id = match worker_id {
            Some(id) => {
                debug!(
                    "{} is assigned {id}",
                    request.client.as_deref().unwrap_or("<anonymous>")
                );
                id
            }
            None => match self.workers_available.pop_front() {
                Some(id) => {
                    if let Some(key) = &client_key {
                        info!("assigned worker {id} to {key}");
                        self.client_worker_map.insert(key.clone(), id.clone());
                    }
                    if self.workers_available.is_empty() {
                        // One-ahead allocation hides worker startup from
                        // the next new client.
                        debug!("spawning an additional worker, for next client");
                        self.spawn_worker();
                    }
                    id
                }
                None => {
                    // No idle worker: the request waits for the next READY.
                    self.spawn_worker();
                    self.pending.push_back(envelope);
                    return;
                }
            },
        };

        if request.worker.is_none() {
            request.worker = Some(worker_id.clone());
        }

        let forwarded = Message::new()
            .push_str(&worker_id)
            .push_empty()
            .push(client_identity)
            .push_empty()
            .push_json(&request);
        match forwarded {
            Ok(message) => self.backend.send(message.into_frames()),
            Err(e) => warn!("failed to encode request for {worker_id}: {e}"),
        }
    }

    fn drain_pending(&mut self) {
        while !self.pending.is_empty() && !self.workers_available.is_empty() {
            if let Some(envelope) = self.pending.pop_front() {
                self.dispatch(envelope);
            }
        }
    }

    fn reply_error(&self, client_identity: &Bytes, message: String) {
        let response = AsyncMessageResponse {
            success: false,
            message: Some(message),
            ..Default::default()
        };
        if let Ok(reply) = Message::new()
            .push(client_identity.clone())
            .push_empty()
            .push_json(&response)
        {
            self.frontend.send(reply.into_frames());
        }
    }

    /// Tell every client with an engaged worker that the daemon aborted.
    fn abort_clients(&mut self) {
        for handle in &self.workers {
            let Some(client_identity) = self.worker_identity_map.get(&handle.identity) else {
                continue;
            };

            let response = AsyncMessageResponse {
                success: false,
                worker: Some(handle.identity.clone()),
                message: Some("abort".to_string()),
                ..Default::default()
            };

            match Message::new()
                .push(client_identity.clone())
                .push_empty()
                .push_json(&response)
            {
                Ok(message) => {
                    self.frontend.send(message.into_frames());
                    debug!("sent abort to client of worker {}", handle.identity);
                }
                Err(e) => debug!("suppressed abort encoding error: {e}"),
            }
        }
    }
}
