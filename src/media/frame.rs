//! Frame type

use std::sync::Arc;

use bytes::Bytes;

/// One discrete unit of the live stream (typically one JPEG image)
///
/// Cheap to clone: the content type is shared and the payload is a
/// reference-counted `Bytes`, so fanning a frame out to many viewers never
/// copies the image data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    content_type: Arc<str>,
    /// Opaque frame bytes
    pub payload: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(content_type: impl Into<Arc<str>>, payload: Bytes) -> Self {
        Self {
            content_type: content_type.into(),
            payload,
        }
    }

    /// Content type declared by the producer
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
