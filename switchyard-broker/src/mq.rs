//! IBM MQ style integration handler.
//!
//! Serves `CONN`/`DISC`/`PUT`/`GET` against one queue manager connection.
//! A GET without an expression is a single destructive get with the wait
//! built from `message_wait`; a GET with an expression runs the
//! browse-then-fetch algorithm: scan the queue non-destructively until a
//! message satisfies the expression, then destructively get exactly that
//! message by id with whatever wait budget remains. Transient remote
//! disconnects during GET are retried with jittered backoff; PUT never
//! retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::backend::memory::MemoryConnector;
use crate::backend::{
    BackendError, BrowseStep, Connector, GetOptions, OpenMode, QueueManager,
};
use crate::endpoint::{parse_endpoint, reject_expression, EndpointArguments};
use crate::error::{AsyncMessageError, HandlerResult};
use crate::handler::{AsyncMessageHandler, HandlerReply, OperationTable};
use crate::protocol::AsyncMessageRequest;
use crate::settings::ConnectionSettings;
use crate::transform::{ContentType, Transformer};

const MAX_GET_RETRIES: u32 = 5;
const BROWSE_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Handler for the `mq` and `mqs` URL schemes.
pub struct MessageQueueHandler {
    worker: String,
    operations: OperationTable,
    connector: Box<dyn Connector>,
    qmgr: Option<Box<dyn QueueManager>>,
    /// Default GET wait in seconds, recorded at CONN.
    message_wait: u64,
    backoff_unit: Duration,
}

impl MessageQueueHandler {
    #[must_use]
    pub fn new(worker: impl Into<String>) -> Self {
        Self::with_connector(worker, Box::new(MemoryConnector))
    }

    /// Construct with an explicit backend connector.
    #[must_use]
    pub fn with_connector(worker: impl Into<String>, connector: Box<dyn Connector>) -> Self {
        Self {
            worker: worker.into(),
            operations: OperationTable::standard(),
            connector,
            qmgr: None,
            message_wait: 0,
            backoff_unit: Duration::from_secs(1),
        }
    }

    fn queue_manager(&self) -> HandlerResult<&dyn QueueManager> {
        self.qmgr
            .as_deref()
            .ok_or_else(|| AsyncMessageError::connection("not connected"))
    }

    /// Common prologue of PUT and GET: endpoint arguments and wait budget.
    fn prepare(&self, request: &AsyncMessageRequest) -> HandlerResult<(EndpointArguments, u64)> {
        self.queue_manager()?;

        let endpoint = request
            .context
            .endpoint
            .as_deref()
            .ok_or_else(|| AsyncMessageError::configuration("no endpoint specified"))?;
        let arguments = parse_endpoint(endpoint)?;

        let message_wait = request.context.message_wait.unwrap_or(self.message_wait);

        Ok((arguments, message_wait))
    }

    /// Browse the queue until a message satisfies the expression, within
    /// the wait budget; returns the matching message id.
    async fn find_message(
        &self,
        queue_name: &str,
        transformer: &Transformer,
        message_wait: u64,
    ) -> HandlerResult<Vec<u8>> {
        let started = Instant::now();
        let qmgr = self.queue_manager()?;
        let mut browse_queue = qmgr
            .open(queue_name, OpenMode::Browse)
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

        loop {
            let mut step = BrowseStep::First;
            loop {
                match browse_queue.get(&GetOptions::browsing(step)).await {
                    Ok((payload, info)) => {
                        if transformer.matches(&payload)? > 0 {
                            debug!(queue = queue_name, "found matching message");
                            return Ok(info.msg_id);
                        }
                        step = BrowseStep::Next;
                    }
                    Err(BackendError::NoMessageAvailable) => break,
                    Err(e) => return Err(AsyncMessageError::connection(e.to_string())),
                }
            }

            if started.elapsed().as_secs() >= message_wait {
                return Err(AsyncMessageError::timeout(
                    "timeout while waiting for matching message",
                ));
            }
            debug!(queue = queue_name, "no matching message found, trying again after some sleep");
            compio::time::sleep(BROWSE_RETRY_INTERVAL).await;
        }
    }

    async fn put_request(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        let payload = request
            .payload
            .clone()
            .ok_or_else(|| AsyncMessageError::configuration("no payload"))?;

        let (arguments, _) = self.prepare(request)?;
        reject_expression(&arguments, &request.action)?;

        let qmgr = self.queue_manager()?;
        let mut queue = qmgr
            .open(&arguments.queue, OpenMode::Input)
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

    async fn get_request(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        let (arguments, message_wait) = self.prepare(request)?;

        let options = match &arguments.expression {
            Some(expression) => {
                let content_type = match request.context.content_type.as_deref() {
                    Some(value) => ContentType::from_string(value)?,
                    None => {
                        return Err(AsyncMessageError::transform(
                            "no content type specified for expression matching",
                        ))
                    }
                };
                let transformer = Transformer::new(content_type, expression)?;

                let started = Instant::now();
                let msg_id = self
                    .find_message(&arguments.queue, &transformer, message_wait)
                    .await?;

                // Whatever the browse left of the budget bounds the fetch.
                let remaining_wait = message_wait.saturating_sub(started.elapsed().as_secs());
                debug!(remaining_wait, "remaining message_wait after finding message");
                GetOptions::matching(msg_id, remaining_wait)
            }
            None => GetOptions::with_wait(message_wait),
        };

        let qmgr = self.queue_manager()?;
        let mut attempt = 0u32;
        let (payload, info) = loop {
            let mut queue = qmgr
                .open(&arguments.queue, OpenMode::Input)
                .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

            match queue.get(&options).await {
                Ok(found) => break found,
                Err(BackendError::NoMessageAvailable) => {
                    return Err(AsyncMessageError::timeout(format!(
                        "timeout while waiting for message on {}",
                        arguments.queue
                    )))
                }
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= MAX_GET_RETRIES {
                        return Err(AsyncMessageError::Transport(format!(
                            "failed to get message from {} after {attempt} attempts: {e}",
                            arguments.queue
                        )));
                    }
                    let jitter = rand::thread_rng().gen_range(1..=5u32);
                    let backoff = self.backoff_unit * (attempt * 2 + jitter);
                    debug!(
                        queue = %arguments.queue,
                        attempt,
                        "transient disconnect during get, retrying in {backoff:?}"
                    );
                    compio::time::sleep(backoff).await;
                }
                Err(e) => return Err(AsyncMessageError::connection(e.to_string())),
            }
        };

        Ok(HandlerReply {
            response_length: Some(payload.len()),
            metadata: Some(info.descriptor()),
            payload: Some(payload),
            message: None,
        })
    }
}

#[async_trait(?Send)]
impl AsyncMessageHandler for MessageQueueHandler {
    fn worker(&self) -> &str {
        &self.worker
    }

    fn operations(&self) -> &OperationTable {
        &self.operations
    }

    async fn on_connect(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        if self.qmgr.is_some() {
            return Err(AsyncMessageError::connection("already connected"));
        }
        if request.context.is_empty() {
            return Err(AsyncMessageError::configuration("no context in request"));
        }

        let settings = ConnectionSettings::from_mq_context(&request.context)?;
        debug!(
            connection = %settings.connection,
            queue_manager = %settings.queue_manager,
            tls = settings.uses_tls(),
            "connecting"
        );

        let qmgr = self
            .connector
            .connect(&settings)
            .await
            .map_err(|e| AsyncMessageError::connection(e.to_string()))?;

        self.qmgr = Some(qmgr);
        self.message_wait = settings.message_wait;

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
        self.put_request(request).await
    }

    async fn on_get(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply> {
        if request.payload.is_some() {
            return Err(AsyncMessageError::configuration("payload not allowed"));
        }
        self.get_request(request).await
    }

    async fn close(&mut self) {
        if let Some(mut qmgr) = self.qmgr.take() {
            debug!("closing queue manager connection");
            if let Err(e) = qmgr.disconnect().await {
                debug!("suppressed error while disconnecting: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MessageInfo, Queue};
    use crate::protocol::RequestContext;
    use std::cell::Cell;
    use std::rc::Rc;

    fn run<F: std::future::Future>(future: F) -> F::Output {
        compio::runtime::Runtime::new().unwrap().block_on(future)
    }

    fn conn_request(queue_manager: &str) -> AsyncMessageRequest {
        AsyncMessageRequest {
            action: "CONN".to_string(),
            context: RequestContext {
                connection: Some("localhost(1414)".to_string()),
                queue_manager: Some(queue_manager.to_string()),
                channel: Some("SRV.CONN".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn request(action: &str, endpoint: &str) -> AsyncMessageRequest {
        AsyncMessageRequest {
            action: action.to_string(),
            context: RequestContext {
                endpoint: Some(endpoint.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn connected(queue_manager: &str) -> MessageQueueHandler {
        let mut handler = MessageQueueHandler::new("worker-1");
        handler.on_connect(&conn_request(queue_manager)).await.unwrap();
        handler
    }

    #[test]
    fn test_connect_and_reconnect() {
        run(async {
            let mut handler = MessageQueueHandler::new("worker-1");

            let reply = handler.on_connect(&conn_request("QM.CONN")).await.unwrap();
            assert_eq!(reply.message.as_deref(), Some("connected"));

            // Repeated CONN on a connected handler is a deterministic error.
            let err = handler.on_connect(&conn_request("QM.CONN")).await.unwrap_err();
            assert_eq!(err.to_string(), "already connected");

            // DISC then CONN works again.
            let reply = handler
                .on_disconnect(&AsyncMessageRequest::default())
                .await
                .unwrap();
            assert_eq!(reply.message.as_deref(), Some("disconnected"));
            assert!(handler.on_connect(&conn_request("QM.CONN")).await.is_ok());
        });
    }

    #[test]
    fn test_connect_requires_context() {
        run(async {
            let mut handler = MessageQueueHandler::new("worker-1");
            let err = handler
                .on_connect(&AsyncMessageRequest::default())
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), "no context in request");
        });
    }

    #[test]
    fn test_operations_require_connection() {
        run(async {
            let mut handler = MessageQueueHandler::new("worker-1");
            let mut put = request("PUT", "queue:Q1");
            put.payload = Some("x".to_string());
            let err = handler.on_put(&put).await.unwrap_err();
            assert_eq!(err.to_string(), "not connected");
        });
    }

    #[test]
    fn test_put_get_roundtrip() {
        run(async {
            let mut handler = connected("QM.ROUNDTRIP").await;

            let mut put = request("PUT", "queue:Q1");
            put.payload = Some("hello".to_string());
            let reply = handler.on_put(&put).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some("hello"));
            assert_eq!(reply.response_length, Some(5));
            let metadata = reply.metadata.unwrap();
            assert!(metadata.contains_key("MsgId"));
            assert!(metadata.contains_key("PutDate"));
            assert!(metadata.contains_key("PutTime"));

            let reply = handler.on_get(&request("GET", "queue:Q1")).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some("hello"));
            assert_eq!(reply.response_length, Some(5));
        });
    }

    #[test]
    fn test_put_requires_payload() {
        run(async {
            let mut handler = connected("QM.NOPAYLOAD").await;
            let err = handler.on_put(&request("PUT", "queue:Q1")).await.unwrap_err();
            assert_eq!(err.to_string(), "no payload");
        });
    }

    #[test]
    fn test_get_rejects_payload() {
        run(async {
            let mut handler = connected("QM.GETPAYLOAD").await;
            let mut get = request("GET", "queue:Q1");
            get.payload = Some("nope".to_string());
            let err = handler.on_get(&get).await.unwrap_err();
            assert_eq!(err.to_string(), "payload not allowed");
        });
    }

    #[test]
    fn test_missing_endpoint() {
        run(async {
            let mut handler = connected("QM.NOEP").await;
            let get = AsyncMessageRequest {
                action: "GET".to_string(),
                ..Default::default()
            };
            let err = handler.on_get(&get).await.unwrap_err();
            assert_eq!(err.to_string(), "no endpoint specified");
        });
    }

    #[test]
    fn test_expression_rejected_for_put() {
        run(async {
            let mut handler = connected("QM.EXPRPUT").await;
            let mut put = request("PUT", "queue:Q1, expression:$.id");
            put.payload = Some("x".to_string());
            let err = handler.on_put(&put).await.unwrap_err();
            assert_eq!(
                err.to_string(),
                "argument expression is not allowed for action PUT"
            );
        });
    }

    #[test]
    fn test_get_without_wait_times_out_immediately() {
        run(async {
            let mut handler = connected("QM.NOWAIT").await;
            let started = Instant::now();
            let err = handler.on_get(&request("GET", "queue:EMPTY")).await.unwrap_err();
            assert!(matches!(err, AsyncMessageError::Timeout(_)));
            assert!(err.to_string().contains("timeout while waiting for message"));
            // message_wait of zero must not block.
            assert!(started.elapsed() < Duration::from_secs(1));
        });
    }

    #[test]
    fn test_get_honours_message_wait() {
        run(async {
            let mut handler = connected("QM.WAIT").await;
            let mut get = request("GET", "queue:EMPTY");
            get.context.message_wait = Some(1);

            let started = Instant::now();
            let err = handler.on_get(&get).await.unwrap_err();
            assert!(matches!(err, AsyncMessageError::Timeout(_)));
            let elapsed = started.elapsed();
            assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_secs(3));
        });
    }

    #[test]
    fn test_browse_then_fetch_takes_only_the_match() {
        run(async {
            let mut handler = connected("QM.BROWSE").await;

            for id in ["A", "B", "C"] {
                let mut put = request("PUT", "queue:Q1");
                put.payload = Some(format!(r#"[{{"id":"{id}"}}]"#));
                handler.on_put(&put).await.unwrap();
            }

            let mut get = request("GET", "queue:Q1, expression:$[?(@.id=='B')]");
            get.context.content_type = Some("json".to_string());
            get.context.message_wait = Some(5);
            let reply = handler.on_get(&get).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some(r#"[{"id":"B"}]"#));

            // The two other messages are untouched and in order.
            let reply = handler.on_get(&request("GET", "queue:Q1")).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some(r#"[{"id":"A"}]"#));
            let reply = handler.on_get(&request("GET", "queue:Q1")).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some(r#"[{"id":"C"}]"#));
        });
    }

    #[test]
    fn test_browse_times_out_without_match() {
        run(async {
            let mut handler = connected("QM.BROWSETIMEOUT").await;

            let mut put = request("PUT", "queue:Q1");
            put.payload = Some(r#"[{"id":"A"}]"#.to_string());
            handler.on_put(&put).await.unwrap();

            let mut get = request("GET", "queue:Q1, expression:$[?(@.id=='Z')]");
            get.context.content_type = Some("json".to_string());
            get.context.message_wait = Some(1);

            let started = Instant::now();
            let err = handler.on_get(&get).await.unwrap_err();
            assert_eq!(err.to_string(), "timeout while waiting for matching message");
            assert!(started.elapsed() < Duration::from_secs(3));
        });
    }

    #[test]
    fn test_expression_requires_content_type() {
        run(async {
            let mut handler = connected("QM.NOCONTENT").await;
            let get = request("GET", "queue:Q1, expression:$.id");
            let err = handler.on_get(&get).await.unwrap_err();
            assert!(matches!(err, AsyncMessageError::Transform(_)));
        });
    }

    // A backend whose gets fail with a transient disconnect a fixed number
    // of times before succeeding.
    struct FlakyConnector {
        failures: Rc<Cell<u32>>,
    }

    struct FlakyManager {
        failures: Rc<Cell<u32>>,
    }

    struct FlakyQueue {
        failures: Rc<Cell<u32>>,
    }

    #[async_trait(?Send)]
    impl Connector for FlakyConnector {
        async fn connect(
            &self,
            _settings: &ConnectionSettings,
        ) -> Result<Box<dyn QueueManager>, BackendError> {
            Ok(Box::new(FlakyManager {
                failures: Rc::clone(&self.failures),
            }))
        }
    }

    #[async_trait(?Send)]
    impl QueueManager for FlakyManager {
        fn open(&self, _queue: &str, _mode: OpenMode) -> Result<Box<dyn Queue>, BackendError> {
            Ok(Box::new(FlakyQueue {
                failures: Rc::clone(&self.failures),
            }))
        }

        async fn disconnect(&mut self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    #[async_trait(?Send)]
    impl Queue for FlakyQueue {
        async fn put(&mut self, _payload: &str) -> Result<MessageInfo, BackendError> {
            Ok(MessageInfo::stamp())
        }

        async fn get(
            &mut self,
            _options: &GetOptions,
        ) -> Result<(String, MessageInfo), BackendError> {
            let remaining = self.failures.get();
            if remaining > 0 {
                self.failures.set(remaining - 1);
                return Err(BackendError::RemoteDisconnected(
                    "connection reset by peer".to_string(),
                ));
            }
            Ok(("recovered".to_string(), MessageInfo::stamp()))
        }
    }

    async fn flaky_handler(failures: u32) -> (MessageQueueHandler, Rc<Cell<u32>>) {
        let counter = Rc::new(Cell::new(failures));
        let mut handler = MessageQueueHandler::with_connector(
            "worker-1",
            Box::new(FlakyConnector {
                failures: Rc::clone(&counter),
            }),
        );
        handler.backoff_unit = Duration::from_millis(1);
        handler.on_connect(&conn_request("QM.FLAKY")).await.unwrap();
        (handler, counter)
    }

    #[test]
    fn test_transient_disconnects_are_retried() {
        run(async {
            let (mut handler, counter) = flaky_handler(2).await;
            let reply = handler.on_get(&request("GET", "queue:Q1")).await.unwrap();
            assert_eq!(reply.payload.as_deref(), Some("recovered"));
            assert_eq!(counter.get(), 0);
        });
    }

    #[test]
    fn test_retries_give_up_after_five_attempts() {
        run(async {
            let (mut handler, _counter) = flaky_handler(u32::MAX).await;
            let err = handler.on_get(&request("GET", "queue:Q1")).await.unwrap_err();
            assert!(matches!(err, AsyncMessageError::Transport(_)));
            assert!(err.to_string().contains("after 5 attempts"));
        });
    }

    #[test]
    fn test_put_does_not_retry() {
        run(async {
            let (mut handler, counter) = flaky_handler(1).await;
            let mut put = request("PUT", "queue:Q1");
            put.payload = Some("x".to_string());
            // Put succeeds without touching the flaky get path.
            handler.on_put(&put).await.unwrap();
            assert_eq!(counter.get(), 1);
        });
    }
}
