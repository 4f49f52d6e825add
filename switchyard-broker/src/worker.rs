//! Worker: a single-tasked request servicer.
//!
//! Each worker owns a dealer socket on the router's backend endpoint and
//! at most one backend integration. The integration is bound lazily on the
//! worker's first request, from the URL scheme in the request context, via
//! an explicit factory table; every later request reuses it. Requests are
//! processed strictly serially and every one of them produces exactly one
//! reply envelope.

use bytes::Bytes;
use futures::{pin_mut, select, FutureExt};
use tracing::{debug, error};
use url::Url;

use switchyard_core::inproc::InprocDealer;
use switchyard_core::message::Message;
use switchyard_core::shutdown::ShutdownToken;

use crate::error::{AsyncMessageError, HandlerResult};
use crate::handler::AsyncMessageHandler;
use crate::mq::MessageQueueHandler;
use crate::protocol::{AsyncMessageRequest, AsyncMessageResponse, READY};
use crate::sb::ServiceBusHandler;

type Constructor = fn(&str) -> Box<dyn AsyncMessageHandler>;

/// Scheme dispatch table; aliases of the MQ handler are separate rows.
const INTEGRATIONS: [(&str, Constructor); 3] = [
    ("mq", |worker| Box::new(MessageQueueHandler::new(worker))),
    ("mqs", |worker| Box::new(MessageQueueHandler::new(worker))),
    ("sb", |worker| Box::new(ServiceBusHandler::new(worker))),
];

/// Construct the integration handler for a URL scheme.
pub fn integration_for(scheme: &str, worker: &str) -> HandlerResult<Box<dyn AsyncMessageHandler>> {
    INTEGRATIONS
        .iter()
        .find(|(candidate, _)| *candidate == scheme)
        .map(|(_, construct)| construct(worker))
        .ok_or_else(|| {
            AsyncMessageError::configuration(format!(
                "integration for {scheme}:// is not implemented"
            ))
        })
}

/// A request servicer bound to one client key of traffic.
pub struct Worker {
    identity: String,
    socket: InprocDealer,
    integration: Option<Box<dyn AsyncMessageHandler>>,
    shutdown: ShutdownToken,
}

impl Worker {
    /// Connect a worker to the router's backend endpoint.
    ///
    /// # Errors
    ///
    /// Fails if the backend endpoint is not bound.
    pub fn connect(
        endpoint: &str,
        identity: String,
        shutdown: ShutdownToken,
    ) -> switchyard_core::error::Result<Self> {
        let socket = InprocDealer::connect(endpoint, identity.clone())?;
        Ok(Self {
            identity,
            socket,
            integration: None,
            shutdown,
        })
    }

    /// Serve requests until shutdown or until the router goes away.
    pub async fn run(mut self) {
        debug!(worker = %self.identity, "starting");

        if self.socket.send(vec![Bytes::from(READY)]).is_err() {
            return;
        }

        loop {
            let envelope = {
                let recv = self.socket.recv().fuse();
                let stop = self.shutdown.wait().fuse();
                pin_mut!(recv, stop);
                select! {
                    envelope = recv => envelope,
                    _ = stop => None,
                }
            };
            let Some(envelope) = envelope else { break };

            // [client][empty][payload]
            let (Some(client), Some(payload)) = (envelope.first(), envelope.last()) else {
                continue;
            };
            if envelope.len() < 3 {
                continue;
            }
            let client = client.clone();

            let response = self.process(payload).await;
            let reply = match Message::new()
                .push(client)
                .push_empty()
                .push_json(&response)
            {
                Ok(message) => message.into_frames(),
                Err(e) => {
                    error!(worker = %self.identity, "failed to encode response: {e}");
                    continue;
                }
            };

            if self.socket.send(reply).is_err() {
                break;
            }
        }

        debug!(worker = %self.identity, "stopping");
        if let Some(mut integration) = self.integration.take() {
            integration.close().await;
        }
        debug!(worker = %self.identity, "stopped");
    }

    async fn process(&mut self, payload: &Bytes) -> AsyncMessageResponse {
        let request: AsyncMessageRequest = match serde_json::from_slice(payload) {
            Ok(request) => request,
            Err(e) => {
                return self.error_response(None, format!("could not decode request: {e}"));
            }
        };
        let request_id = request.request_id.clone();

        // Misrouted envelopes are answered, not served.
        if request.worker.as_deref() != Some(self.identity.as_str()) {
            let got = request.worker.as_deref().unwrap_or("<no worker>");
            return self.error_response(
                request_id,
                format!("got {got}, expected {}", self.identity),
            );
        }

        if self.integration.is_none() {
            match self.bind_integration(&request) {
                Ok(integration) => self.integration = Some(integration),
                Err(e) => return self.error_response(request_id, e.to_string()),
            }
        }

        match self.integration.as_mut() {
            Some(integration) => integration.handle(&request).await,
            None => self.error_response(request_id, "no integration bound".to_string()),
        }
    }

    fn bind_integration(
        &self,
        request: &AsyncMessageRequest,
    ) -> HandlerResult<Box<dyn AsyncMessageHandler>> {
        let url = request
            .context
            .url
            .as_deref()
            .ok_or_else(|| AsyncMessageError::configuration("no url found in request context"))?;
        let parsed = Url::parse(url).map_err(|e| {
            AsyncMessageError::configuration(format!("could not parse url \"{url}\": {e}"))
        })?;

        integration_for(parsed.scheme(), &self.identity)
    }

    fn error_response(&self, request_id: Option<String>, message: String) -> AsyncMessageResponse {
        AsyncMessageResponse {
            request_id,
            worker: Some(self.identity.clone()),
            success: false,
            message: Some(message),
            response_time: Some(0),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_core::inproc::InprocRouter;
    use switchyard_core::shutdown;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        compio::runtime::Runtime::new().unwrap().block_on(future)
    }

    #[test]
    fn test_integration_factory() {
        assert!(integration_for("mq", "w").is_ok());
        assert!(integration_for("mqs", "w").is_ok());
        assert!(integration_for("sb", "w").is_ok());

        let err = integration_for("amqp", "w").unwrap_err();
        assert_eq!(err.to_string(), "integration for amqp:// is not implemented");
    }

    async fn request_via(
        router: &mut InprocRouter,
        worker_id: &str,
        request: &AsyncMessageRequest,
    ) -> AsyncMessageResponse {
        let envelope = Message::new()
            .push_str(worker_id)
            .push_empty()
            .push_str("client-1")
            .push_empty()
            .push_json(request)
            .unwrap()
            .into_frames();
        router.send(envelope);

        let reply = router.recv().await.unwrap();
        // [worker][empty][client][empty][response]
        assert_eq!(reply[2], &b"client-1"[..]);
        serde_json::from_slice(&reply[4]).unwrap()
    }

    #[test]
    fn test_worker_announces_ready_and_answers() {
        run(async {
            let endpoint = "inproc://test-worker-loop";
            let mut router = InprocRouter::bind(endpoint).unwrap();
            let (controller, token) = shutdown::channel();

            let worker =
                Worker::connect(endpoint, "worker-a".to_string(), token).unwrap();
            let task = compio::runtime::spawn(worker.run());

            let ready = router.recv().await.unwrap();
            assert_eq!(ready[0], &b"worker-a"[..]);
            assert_eq!(ready[2], READY.as_bytes());

            // Mismatched worker stamp is answered with an error.
            let request = AsyncMessageRequest {
                action: "CONN".to_string(),
                request_id: Some("r-1".to_string()),
                worker: Some("someone-else".to_string()),
                ..Default::default()
            };
            let response = request_via(&mut router, "worker-a", &request).await;
            assert!(!response.success);
            assert_eq!(response.request_id.as_deref(), Some("r-1"));
            assert_eq!(
                response.message.as_deref(),
                Some("got someone-else, expected worker-a")
            );

            // Unknown scheme is answered and the worker stays up.
            let request = AsyncMessageRequest {
                action: "CONN".to_string(),
                worker: Some("worker-a".to_string()),
                context: crate::protocol::RequestContext {
                    url: Some("amqp://host/vhost".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            };
            let response = request_via(&mut router, "worker-a", &request).await;
            assert!(!response.success);
            assert_eq!(
                response.message.as_deref(),
                Some("integration for amqp:// is not implemented")
            );

            // Missing url likewise.
            let request = AsyncMessageRequest {
                action: "CONN".to_string(),
                worker: Some("worker-a".to_string()),
                ..Default::default()
            };
            let response = request_via(&mut router, "worker-a", &request).await;
            assert_eq!(
                response.message.as_deref(),
                Some("no url found in request context")
            );

            controller.shutdown();
            task.await;
        });
    }
}
