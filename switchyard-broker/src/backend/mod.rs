//! Queue-manager abstraction behind the integration handlers.
//!
//! The handlers own every protocol decision (wait budgets, browse
//! cursors, match-by-id fetches, retries) and drive a small trait surface
//! modelled on the MQI verbs they need: connect, open, put, get. The
//! shipped implementation is the in-process queue manager in [`memory`];
//! anything that can speak these traits can stand in for it.

pub mod memory;

use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::settings::ConnectionSettings;

/// Backend failure classes, mirroring the reason codes the handlers care
/// about.
#[derive(Error, Debug)]
pub enum BackendError {
    /// `MQRC_NO_MSG_AVAILABLE`: the wait (if any) expired with nothing to
    /// hand out.
    #[error("no message available")]
    NoMessageAvailable,

    /// Transient connection loss; GET retries these.
    #[error("remote disconnected: {0}")]
    RemoteDisconnected(String),

    /// Anything else: refused connections, unknown queues, closed
    /// managers.
    #[error("{0}")]
    Failed(String),
}

impl BackendError {
    /// Whether a retry may help.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteDisconnected(_))
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// How a queue is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Destructive gets and puts.
    Input,
    /// Non-destructive scanning, shared with other consumers.
    Browse,
}

/// Cursor directive for a browsing get.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowseStep {
    /// Rewind to the head of the queue.
    First,
    /// Advance past the last browsed message.
    Next,
}

/// Get-message options, the GMO analogue.
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Server-side wait; `None` means a single immediate look.
    pub wait: Option<Duration>,
    /// Present on browsing gets.
    pub browse: Option<BrowseStep>,
    /// Destructive get of one specific message.
    pub match_msg_id: Option<Vec<u8>>,
}

impl GetOptions {
    /// Wait options from a `message_wait` in seconds; zero means no wait.
    #[must_use]
    pub fn with_wait(message_wait: u64) -> Self {
        Self {
            wait: (message_wait > 0).then(|| Duration::from_secs(message_wait)),
            ..Self::default()
        }
    }

    /// Browsing options; never waits, the caller paces its own passes.
    #[must_use]
    pub fn browsing(step: BrowseStep) -> Self {
        Self {
            browse: Some(step),
            ..Self::default()
        }
    }

    /// Destructive match on a message id, bounded by the remaining wait.
    #[must_use]
    pub fn matching(msg_id: Vec<u8>, message_wait: u64) -> Self {
        Self {
            match_msg_id: Some(msg_id),
            ..Self::with_wait(message_wait)
        }
    }
}

/// Message descriptor returned with every put and get.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageInfo {
    pub msg_id: Vec<u8>,
    /// `YYYYMMDD`
    pub put_date: String,
    /// `HHMMSSCC`
    pub put_time: String,
}

impl MessageInfo {
    /// Mint a descriptor stamped with the current wall clock.
    #[must_use]
    pub fn stamp() -> Self {
        let now = Utc::now();
        let centis = now.timestamp_subsec_millis() / 10;
        Self {
            msg_id: Uuid::new_v4().as_bytes().to_vec(),
            put_date: now.format("%Y%m%d").to_string(),
            put_time: format!("{}{centis:02}", now.format("%H%M%S")),
        }
    }

    /// The canonical response metadata; the binary id is Latin-1
    /// stringified so it survives the JSON wire.
    #[must_use]
    pub fn descriptor(&self) -> std::collections::BTreeMap<String, String> {
        std::collections::BTreeMap::from([
            ("PutDate".to_string(), self.put_date.clone()),
            ("PutTime".to_string(), self.put_time.clone()),
            (
                "MsgId".to_string(),
                crate::protocol::latin1_string(&self.msg_id),
            ),
        ])
    }
}

/// An open queue handle.
#[async_trait(?Send)]
pub trait Queue {
    async fn put(&mut self, payload: &str) -> Result<MessageInfo, BackendError>;

    async fn get(&mut self, options: &GetOptions) -> Result<(String, MessageInfo), BackendError>;
}

/// A connected queue manager.
#[async_trait(?Send)]
pub trait QueueManager {
    fn open(&self, queue: &str, mode: OpenMode) -> Result<Box<dyn Queue>, BackendError>;

    async fn disconnect(&mut self) -> Result<(), BackendError>;
}

/// Connection factory, the seam between handler logic and wire client.
#[async_trait(?Send)]
pub trait Connector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn QueueManager>, BackendError>;
}
