//! The async-message wire schema.
//!
//! Requests and responses are UTF-8 JSON bodies inside the transport
//! envelopes. Binary backend values never travel as arrays or base64:
//! they are decoded byte-for-byte as ISO-8859-1 and emitted as plain JSON
//! strings, mirroring what the load-test clients expect.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel body a worker sends to advertise idleness.
pub const READY: &str = "READY";

/// Request envelope: sent by clients, forwarded by the router, consumed by
/// workers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsyncMessageRequest {
    /// One of `CONN`, `DISC`, `PUT` (alias `SEND`), `GET` (alias `RECEIVE`).
    pub action: String,

    /// Correlation id minted by the client, round-tripped verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Stable client identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Worker identifier; absent on a client's first request, stamped by
    /// the router for all subsequent ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    #[serde(default)]
    pub context: RequestContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

/// Backend-specific request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_manager: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_cipher: Option<String>,

    /// Default GET wait in seconds, recorded at CONN.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_wait: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_type: Option<String>,
}

impl RequestContext {
    /// True when no field carries a value.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.url.is_none()
            && self.endpoint.is_none()
            && self.connection.is_none()
            && self.queue_manager.is_none()
            && self.channel.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.key_file.is_none()
            && self.cert_label.is_none()
            && self.ssl_cipher.is_none()
            && self.message_wait.is_none()
            && self.content_type.is_none()
            && self.header_type.is_none()
    }
}

/// Response envelope, one per accepted request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AsyncMessageResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// The worker that produced this response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,

    pub success: bool,

    /// Error or status string; on shutdown the router emits exactly
    /// `"abort"` here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_length: Option<usize>,

    /// Elapsed milliseconds measured at the handler boundary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time: Option<u64>,
}

/// The router-internal affinity key: `"<client>::<scheme>"`, so the same
/// client using two different backends is served by two workers.
#[must_use]
pub fn client_key(client: &str, scheme: &str) -> String {
    format!("{client}::{scheme}")
}

/// The scheme of a context URL, or an empty string when the URL is absent
/// or unparsable. Scheme errors are surfaced by the worker, not the router.
#[must_use]
pub fn url_scheme(url: Option<&str>) -> String {
    url.and_then(|u| url::Url::parse(u).ok())
        .map(|u| u.scheme().to_string())
        .unwrap_or_default()
}

/// Decode arbitrary bytes as an ISO-8859-1 string, byte for byte.
#[must_use]
pub fn latin1_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_minimal_roundtrip() {
        let json = r#"{"action":"CONN","client":"c1","context":{"url":"mq://host/?QueueManager=QM1&Channel=CH1"}}"#;
        let request: AsyncMessageRequest = serde_json::from_str(json).unwrap();

        assert_eq!(request.action, "CONN");
        assert_eq!(request.client.as_deref(), Some("c1"));
        assert!(request.worker.is_none());
        assert_eq!(
            request.context.url.as_deref(),
            Some("mq://host/?QueueManager=QM1&Channel=CH1")
        );

        // Absent fields stay absent on the wire.
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(!encoded.contains("request_id"));
        assert!(!encoded.contains("payload"));
    }

    #[test]
    fn test_response_skips_absent_fields() {
        let response = AsyncMessageResponse {
            success: false,
            message: Some("abort".to_string()),
            ..Default::default()
        };
        let encoded = serde_json::to_string(&response).unwrap();
        assert_eq!(encoded, r#"{"success":false,"message":"abort"}"#);
    }

    #[test]
    fn test_client_key_partitions_by_scheme() {
        assert_eq!(client_key("c1", "mq"), "c1::mq");
        assert_eq!(client_key("c1", "sb"), "c1::sb");
        assert_ne!(client_key("c1", "mq"), client_key("c1", "sb"));
    }

    #[test]
    fn test_url_scheme() {
        assert_eq!(
            url_scheme(Some("mqs://user@host/?QueueManager=QM1&Channel=CH1")),
            "mqs"
        );
        assert_eq!(url_scheme(Some("not a url")), "");
        assert_eq!(url_scheme(None), "");
    }

    #[test]
    fn test_latin1_string() {
        assert_eq!(latin1_string(b"hello"), "hello");
        // 0xe9 is not valid UTF-8 on its own; Latin-1 maps it to U+00E9.
        assert_eq!(latin1_string(&[0xe9, 0x20, 0x63]), "\u{e9} c");
    }

    #[test]
    fn test_context_is_empty() {
        assert!(RequestContext::default().is_empty());
        let ctx = RequestContext {
            endpoint: Some("queue:IN".to_string()),
            ..Default::default()
        };
        assert!(!ctx.is_empty());
    }
}
