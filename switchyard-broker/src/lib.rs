//! # Switchyard Broker
//!
//! The async-message protocol and the broker that serves it: a two-socket
//! router switch with a dynamic worker pool, client-to-worker affinity and
//! per-scheme backend integrations.
//!
//! ## Layout
//!
//! - [`protocol`]: the JSON request/response schema and wire constants
//! - [`error`]: the handler-boundary error taxonomy
//! - [`handler`]: the integration trait and its action dispatch table
//! - [`endpoint`]: the per-request endpoint grammar
//! - [`transform`]: JSON/XPath content transformers for message selection
//! - [`settings`]: connection settings parsed from context fields or URLs
//! - [`backend`]: the queue-manager abstraction and the in-process backend
//! - [`mq`]: the IBM MQ style integration handler
//! - [`sb`]: the Service Bus integration handler
//! - [`worker`]: the per-client request servicer
//! - [`router`]: the frontend/backend switch

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::future_not_send)] // Single-threaded cooperative runtime

pub mod backend;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod mq;
pub mod protocol;
pub mod router;
pub mod sb;
pub mod settings;
pub mod transform;
pub mod worker;

pub mod prelude {
    pub use crate::error::AsyncMessageError;
    pub use crate::handler::{AsyncMessageHandler, Operation, OperationTable};
    pub use crate::protocol::{AsyncMessageRequest, AsyncMessageResponse, RequestContext};
    pub use crate::router::Router;
    pub use crate::worker::Worker;
}
