//! In-process queue manager.
//!
//! Queue managers are named by their connection settings and live in a
//! process-global registry, so every worker of the daemon that connects to
//! the same manager observes the same queues. Queues are FIFO; browse
//! cursors belong to the open handle, and a destructive get can match a
//! specific message id. Waits are honoured by polling the queue on the
//! cooperative clock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{
    BackendError, BrowseStep, Connector, GetOptions, MessageInfo, OpenMode, Queue, QueueManager,
};
use crate::settings::ConnectionSettings;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: String,
    info: MessageInfo,
}

type QueueStore = Arc<Mutex<HashMap<String, VecDeque<StoredMessage>>>>;

/// Global registry of named queue managers
static REGISTRY: once_cell::sync::Lazy<DashMap<String, QueueStore>> =
    once_cell::sync::Lazy::new(DashMap::new);

/// Connector for the in-process backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryConnector;

#[async_trait(?Send)]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn QueueManager>, BackendError> {
        let key = format!("{}/{}", settings.connection, settings.queue_manager);
        let store = REGISTRY
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())))
            .clone();

        Ok(Box::new(MemoryQueueManager {
            store,
            connected: true,
        }))
    }
}

/// A connection to one named in-process queue manager.
pub struct MemoryQueueManager {
    store: QueueStore,
    connected: bool,
}

#[async_trait(?Send)]
impl QueueManager for MemoryQueueManager {
    fn open(&self, queue: &str, mode: OpenMode) -> Result<Box<dyn Queue>, BackendError> {
        if !self.connected {
            return Err(BackendError::failed("queue manager is disconnected"));
        }

        Ok(Box::new(MemoryQueue {
            store: Arc::clone(&self.store),
            name: queue.to_string(),
            mode,
            cursor: 0,
        }))
    }

    async fn disconnect(&mut self) -> Result<(), BackendError> {
        self.connected = false;
        Ok(())
    }
}

/// An open handle on one queue.
pub struct MemoryQueue {
    store: QueueStore,
    name: String,
    mode: OpenMode,
    cursor: usize,
}

impl MemoryQueue {
    fn take_matching(&self, match_msg_id: Option<&[u8]>) -> Option<StoredMessage> {
        let mut store = self.store.lock();
        let queue = store.get_mut(&self.name)?;

        match match_msg_id {
            Some(msg_id) => {
                let index = queue.iter().position(|m| m.info.msg_id == msg_id)?;
                queue.remove(index)
            }
            None => queue.pop_front(),
        }
    }
}

#[async_trait(?Send)]
impl Queue for MemoryQueue {
    async fn put(&mut self, payload: &str) -> Result<MessageInfo, BackendError> {
        let info = MessageInfo::stamp();
        self.store
            .lock()
            .entry(self.name.clone())
            .or_default()
            .push_back(StoredMessage {
                payload: payload.to_string(),
                info: info.clone(),
            });
        Ok(info)
    }

    async fn get(&mut self, options: &GetOptions) -> Result<(String, MessageInfo), BackendError> {
        // Browsing never waits; the caller paces its own passes.
        if let Some(step) = options.browse {
            if self.mode != OpenMode::Browse {
                return Err(BackendError::failed("queue is not open for browsing"));
            }
            if step == BrowseStep::First {
                self.cursor = 0;
            }

            let store = self.store.lock();
            let Some(queue) = store.get(&self.name) else {
                return Err(BackendError::NoMessageAvailable);
            };
            let Some(message) = queue.get(self.cursor) else {
                return Err(BackendError::NoMessageAvailable);
            };
            self.cursor += 1;
            return Ok((message.payload.clone(), message.info.clone()));
        }

        let deadline = options.wait.map(|wait| Instant::now() + wait);
        loop {
            if let Some(message) = self.take_matching(options.match_msg_id.as_deref()) {
                return Ok((message.payload, message.info));
            }

            match deadline {
                None => return Err(BackendError::NoMessageAvailable),
                Some(deadline) if Instant::now() >= deadline => {
                    return Err(BackendError::NoMessageAvailable)
                }
                Some(_) => compio::time::sleep(POLL_INTERVAL).await,
            }
        }
    }
}
