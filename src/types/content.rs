use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncSeek};

/// Capability required of upload sources: positioned reads plus rewind, so
/// metadata extractors and retried puts can re-read from the start.
pub trait Content: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin + ?Sized> Content for T {}

/// Boxed content source. In-memory bytes and files both qualify.
pub type ContentStream = Box<dyn Content>;

/// Wrap in-memory bytes as a content source
pub fn content_from_bytes(data: impl Into<Bytes>) -> ContentStream {
    Box::new(std::io::Cursor::new(data.into()))
}
