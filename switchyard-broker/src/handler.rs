//! Integration handler trait and action dispatch.
//!
//! Each worker owns exactly one handler. The dispatch table is an explicit
//! registry built at handler construction: action strings map to a typed
//! operation, with the `SEND`/`RECEIVE` aliases registered as extra keys
//! pointing at the same operation. `handle` wraps dispatch with the
//! response-time clock and converts every error into a failure response,
//! so a worker never dies from a bad request.

use std::collections::BTreeMap;
use std::time::Instant;

use async_trait::async_trait;
use hashbrown::HashMap;

use crate::error::{AsyncMessageError, HandlerResult};
use crate::protocol::{AsyncMessageRequest, AsyncMessageResponse};

/// The operations an integration implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Disconnect,
    Put,
    Get,
}

/// Registry from action string to operation.
#[derive(Debug, Clone)]
pub struct OperationTable {
    entries: HashMap<&'static str, Operation>,
}

impl OperationTable {
    /// The full table: `CONN`, `DISC`, `PUT`/`SEND`, `GET`/`RECEIVE`.
    #[must_use]
    pub fn standard() -> Self {
        let mut entries = HashMap::new();
        entries.insert("CONN", Operation::Connect);
        entries.insert("DISC", Operation::Disconnect);
        entries.insert("PUT", Operation::Put);
        entries.insert("SEND", Operation::Put);
        entries.insert("GET", Operation::Get);
        entries.insert("RECEIVE", Operation::Get);
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, action: &str) -> Option<Operation> {
        self.entries.get(action).copied()
    }

    #[must_use]
    pub fn actions(&self) -> Vec<&'static str> {
        let mut actions: Vec<_> = self.entries.keys().copied().collect();
        actions.sort_unstable();
        actions
    }
}

/// What a successful operation hands back to the dispatch wrapper.
#[derive(Debug, Default)]
pub struct HandlerReply {
    pub message: Option<String>,
    pub payload: Option<String>,
    pub metadata: Option<BTreeMap<String, String>>,
    pub response_length: Option<usize>,
}

impl HandlerReply {
    /// A reply that carries only a status string, e.g. `"connected"`.
    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// A backend integration owned by a single worker.
///
/// Implementations hold the backend connection state; requests arrive
/// strictly serially, one worker never serves two clients.
#[async_trait(?Send)]
pub trait AsyncMessageHandler {
    /// Identity of the owning worker.
    fn worker(&self) -> &str;

    /// The action registry, built once at construction.
    fn operations(&self) -> &OperationTable;

    async fn on_connect(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply>;

    async fn on_disconnect(&mut self, request: &AsyncMessageRequest)
        -> HandlerResult<HandlerReply>;

    async fn on_put(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply>;

    async fn on_get(&mut self, request: &AsyncMessageRequest) -> HandlerResult<HandlerReply>;

    /// Tear down the backend connection; called at worker shutdown.
    async fn close(&mut self);

    /// Dispatch a request and produce exactly one response.
    async fn handle(&mut self, request: &AsyncMessageRequest) -> AsyncMessageResponse {
        let started = Instant::now();

        let result = match self.operations().get(&request.action) {
            Some(Operation::Connect) => self.on_connect(request).await,
            Some(Operation::Disconnect) => self.on_disconnect(request).await,
            Some(Operation::Put) => self.on_put(request).await,
            Some(Operation::Get) => self.on_get(request).await,
            None => Err(AsyncMessageError::NoImplementation(request.action.clone())),
        };

        let response_time = started.elapsed().as_millis() as u64;

        match result {
            Ok(reply) => AsyncMessageResponse {
                request_id: request.request_id.clone(),
                worker: Some(self.worker().to_string()),
                success: true,
                message: reply.message,
                payload: reply.payload,
                metadata: reply.metadata,
                response_length: reply.response_length,
                response_time: Some(response_time),
            },
            Err(error) => AsyncMessageResponse {
                request_id: request.request_id.clone(),
                worker: Some(self.worker().to_string()),
                success: false,
                message: Some(error.wire_message(&request.action)),
                response_time: Some(response_time),
                ..Default::default()
            },
        }
    }
}
