//! Client-side request correlator.
//!
//! The synchronous helper used by load-test processes: send one JSON
//! request on a dealer socket and block until the correlated response
//! arrives. The correlator does not multiplex (callers serialise use of
//! a socket), so the response id is only checked for debuggability.

use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use switchyard_broker::protocol::{AsyncMessageRequest, AsyncMessageResponse};
use switchyard_core::error::TransportError;
use switchyard_core::tcp::TcpDealer;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const POLL_DRIFT_WARNING: Duration = Duration::from_secs(1);

/// Failures surfaced to the load-test caller.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The daemon shut down with the request in flight. Distinct from an
    /// error so callers can tell a teardown from a failure.
    #[error("request aborted by daemon shutdown")]
    Abort,

    /// The daemon answered `success=false` with this message.
    #[error("{0}")]
    Server(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid message on the wire: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Send `request` and block until its response arrives.
///
/// A fresh `request_id` is minted when the request carries none. The
/// socket is polled in 100 ms steps; a poll iteration that takes longer
/// than a second is logged as clock drift.
///
/// # Errors
///
/// [`ClientError::Abort`] when the daemon aborts the request on shutdown,
/// [`ClientError::Server`] for any other `success=false` response, and
/// transport/codec errors when the socket or the JSON give out.
pub async fn async_message_request(
    client: &TcpDealer,
    mut request: AsyncMessageRequest,
) -> Result<AsyncMessageResponse, ClientError> {
    let request_id = match &request.request_id {
        Some(id) => id.clone(),
        None => {
            let id = Uuid::new_v4().simple().to_string();
            request.request_id = Some(id.clone());
            id
        }
    };

    debug!(
        %request_id,
        action = %request.action,
        client = request.client.as_deref().unwrap_or(""),
        "sending request"
    );
    let body = serde_json::to_vec(&request)?;
    client.send(vec![Bytes::from(body)])?;

    let response: AsyncMessageResponse = loop {
        let started = Instant::now();

        match client.try_recv()? {
            Some(parts) => {
                let Some(payload) = parts.last() else {
                    continue;
                };
                break serde_json::from_slice(payload)?;
            }
            None => compio::time::sleep(POLL_INTERVAL).await,
        }

        let delta = started.elapsed();
        if delta > POLL_DRIFT_WARNING {
            warn!(%request_id, "response poll iteration took {delta:?}");
        }
    };

    if response.request_id.as_deref() != Some(request_id.as_str()) {
        debug!(
            %request_id,
            response_request_id = response.request_id.as_deref().unwrap_or(""),
            "response request id does not match"
        );
    }

    if !response.success {
        if response.message.as_deref() == Some("abort") {
            return Err(ClientError::Abort);
        }
        return Err(ClientError::Server(
            response
                .message
                .unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    Ok(response)
}
