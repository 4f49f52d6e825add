//! Multipart envelope builder.
//!
//! Provides a fluent API for building the broker's multipart envelopes with
//! automatic frame management.

use bytes::Bytes;
use std::io;

/// A multipart envelope builder.
///
/// # Examples
///
/// ```
/// use switchyard_core::message::Message;
///
/// // ROUTER envelope: [identity] [empty] [payload]
/// let msg = Message::new()
///     .push_str("client-1")
///     .push_empty()
///     .push(b"request".as_slice())
///     .into_frames();
/// assert_eq!(msg.len(), 3);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Message {
    frames: Vec<Bytes>,
}

impl Message {
    /// Create a new empty envelope.
    #[must_use]
    pub const fn new() -> Self {
        Self { frames: Vec::new() }
    }

    /// Add a frame from any type that can be converted to `Bytes`.
    #[must_use]
    pub fn push(mut self, frame: impl Into<Bytes>) -> Self {
        self.frames.push(frame.into());
        self
    }

    /// Add a string frame (UTF-8 encoded).
    #[must_use]
    pub fn push_str(mut self, s: &str) -> Self {
        self.frames.push(Bytes::copy_from_slice(s.as_bytes()));
        self
    }

    /// Add a frame with JSON-serialized data.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn push_json<T: serde::Serialize>(mut self, value: &T) -> io::Result<Self> {
        let json = serde_json::to_vec(value)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.frames.push(Bytes::from(json));
        Ok(self)
    }

    /// Add an empty frame (the envelope delimiter).
    #[must_use]
    pub fn push_empty(mut self) -> Self {
        self.frames.push(Bytes::new());
        self
    }

    /// Get the number of frames.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Check if the envelope has no frames.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Consume the builder and return the frames.
    #[must_use]
    pub fn into_frames(self) -> Vec<Bytes> {
        self.frames
    }

    /// Try to parse a frame as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame doesn't exist or isn't valid JSON.
    pub fn parse_frame_json<T: serde::de::DeserializeOwned>(&self, index: usize) -> io::Result<T> {
        let frame = self
            .frames
            .get(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Frame index out of bounds"))?;

        serde_json::from_slice(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Try to parse a frame as a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame doesn't exist or isn't valid UTF-8.
    pub fn parse_frame_str(&self, index: usize) -> io::Result<&str> {
        let frame = self
            .frames
            .get(index)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "Frame index out of bounds"))?;

        std::str::from_utf8(frame).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(frames: Vec<Bytes>) -> Self {
        Self { frames }
    }
}

impl From<Message> for Vec<Bytes> {
    fn from(msg: Message) -> Self {
        msg.frames
    }
}
