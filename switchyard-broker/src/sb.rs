//! Service Bus integration handler.
//!
//! Thin handler for the `sb` URL scheme: connect to a namespace, put and
//! get against plain queues. Expression selection and the richer Service
//! Bus entities are not served here; the handler exists so per-scheme
//! affinity and dispatch are real for `sb://` clients.

use async_trait::async_trait;
use tracing::debug;

use crate::backend::memory::MemoryConnector;
use crate::backend::{BackendError, Connector, GetOptions, OpenMode, QueueManager};
use crate::endpoint::parse_endpoint;
use crate::error::{AsyncMessageError, HandlerResult};
use crate::handler::{AsyncMessageHandler, HandlerReply, OperationTable};
use crate::protocol::AsyncMessageRequest;
use crate::settings::ConnectionSettings;

/// Handler for the `sb` URL scheme.
pub struct ServiceBusHandler {
    worker: String,
    operations: OperationTable,
    connector: Box<dyn Connector>,
    namespace: Option<Box<dyn QueueManager>>,
    message_wait: u64,
}

impl ServiceBusHandler {
    #[must_use]
    pub fn new(worker: impl Into<String>) -> Self {
        Self::with_connector(worker, Box::new(MemoryConnector))
    }

    #[must_use]
    pub fn with_connector(worker: impl Into<String>, connector: Box<dyn Connector>) -> Self {
        Self {
            worker: worker.into(),
            operations: OperationTable::standard(),
            connector,
            namespace: None,
            message_wait: 0,
        }
    }

    fn namespace(&self) -> HandlerResult<&dyn QueueManager> {
        self.namespace
            .as_deref()
            .ok_or_else(|| AsyncMessageError::connection("not connected"))
    }

    fn queue_name(&self, request: &AsyncMessageRequest) -> HandlerResult<String> {
        let endpoint = request
            .context
            .endpoint
            .as_deref()
            .ok_or_else(|| AsyncMessageError::configuration("no endpoint specified"))?;
        let arguments = parse_endpoint(endpoint)?;
        if arguments.expression.is_some() {
            return Err(AsyncMessageError::configuration(
                "argument expression is not supported for sb://",
            ));
        }
        Ok(arguments.queue)
    }
}

#[async_trait(?Send)]
impl AsyncMessageHandler for ServiceBusHandler {
    fn worker(&self) -> &str {
        &self.worker
    }

    fn operations(&self) -> &OperationTable {
        &self.operations
    }

    async fn on_connect(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        if request.context.is_empty() {
            return Err(AsyncMessageError::configuration("no context in request"));
        }

        // Re-connecting an established namespace is not an error here.
        if self.namespace.is_some() {
            return Ok(HandlerReply::status("re-used connection"));
        }

        let url = request
            .context
            .url
            .as_deref()
            .ok_or_else(|| AsyncMessageError::configuration("no url found in request context"))?;
        let settings = ConnectionSettings::service_bus(url)?;

        let namespace = self
            .connector
            .connect(&settings)
            .await
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

        self.namespace = Some(namespace);
        self.message_wait = request.context.message_wait.unwrap_or(0);

        Ok(HandlerReply::status("connected"))
    }

    async fn on_disconnect(
        &mut self,
        _request: &AsyncMessageRequest,
    ) -> HandlerResult<HandlerReply> {
        self.close().await;
        Ok(HandlerReply::status("disconnected"))
    }

    async fn on_put(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        let payload = request
            .payload
            .clone()
            .ok_or_else(|| AsyncMessageError::configuration("no payload"))?;
        let queue_name = self.queue_name(request)?;

        let namespace = self.namespace()?;
        let mut queue = namespace
            .open(&queue_name, OpenMode::Input)
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;
        let info = queue
            .put(&payload)
            .await
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

        Ok(HandlerReply {
            response_length: Some(payload.len()),
            metadata: Some(info.descriptor()),
            payload: Some(payload),
            message: None,
        })
    }

    async fn on_get(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        if request.payload.is_some() {
            return Err(AsyncMessageError::configuration("payload not allowed"));
        }

        let queue_name = self.queue_name(request)?;
        let message_wait = request.context.message_wait.unwrap_or(self.message_wait);

        let namespace = self.namespace()?;
        let mut queue = namespace
            .open(&queue_name, OpenMode::Input)
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

        let (payload, info) = match queue.get(&GetOptions::with_wait(message_wait)).await {
            Ok(found) => found,
            Err(BackendError::NoMessageAvailable) => {
                return Err(AsyncMessageError::timeout(format!(
                    "timeout while waiting for message on {queue_name}"
                )))
            }
            Err(e) => return Err(AsyncMessageError::connection(e.to_string())),
        };

        Ok(HandlerReply {
            response_length: Some(payload.len()),
            metadata: Some(info.descriptor()),
            payload: Some(payload),
            message: None,
        })
    }

    async fn close(&mut self) {
        if let Some(mut namespace) = self.namespace.take() {
            debug!("closing namespace connection");
            if let Err(e) = namespace.disconnect().await {
                debug!("suppressed error while disconnecting: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RequestContext;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        compio::runtime::Runtime::new().unwrap().block_on(future)
    }

    fn conn_request(namespace: &str) -> AsyncMessageRequest {
        AsyncMessageRequest {
            action: "CONN".to_string(),
            context: RequestContext {
                url: Some(format!("sb://{namespace}.example.com/")),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_repeated_conn_reuses_connection() {
        run(async {
            let mut handler = ServiceBusHandler::new("worker-1");

            let reply = handler.on_connect(&conn_request("ns-reuse")).await.unwrap();
            assert_eq!(reply.message.as_deref(), Some("connected"));

            let reply = handler.on_connect(&conn_request("ns-reuse")).await.unwrap();
            assert_eq!(reply.message.as_deref(), Some("re-used connection"));
        });
    }

    #[test]
    fn test_put_get_roundtrip() {
        run(async {
            let mut handler = ServiceBusHandler::new("worker-1");
            handler.on_connect(&conn_request("ns-roundtrip")).await.unwrap();

            let mut put = AsyncMessageRequest {
                action: "SEND".to_string(),
                payload: Some("event".to_string()),
                ..Default::default()
            };
            put.context.endpoint = Some("queue:events".to_string());
            let reply = handler.on_put(&put).await.unwrap();
            assert_eq!(reply.response_length, Some(5));

            let mut get = AsyncMessageRequest {
                action: "RECEIVE".to_string(),
                ..Default::default()
            };
            get.context.endpoint = Some("queue:events".to_string());
            let reply = handler.on_get(&get).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some("event"));
        });
    }

    #[test]
    fn test_expression_not_supported() {
        run(async {
            let mut handler = ServiceBusHandler::new("worker-1");
            handler.on_connect(&conn_request("ns-expr")).await.unwrap();

            let mut get = AsyncMessageRequest {
                action: "GET".to_string(),
                ..Default::default()
            };
            get.context.endpoint = Some("queue:events, expression:$.id".to_string());
            let err = handler.on_get(&get).await.unwrap_err();
            assert!(err.to_string().contains("not supported for sb://"));
        });
    }
}
