//! Response body shapes and safe materialization.
//!
//! Bodies arrive in four shapes: decoded text, an immutable blob, a
//! fixed-size buffer, or an open forward-only byte stream. Inspection of a
//! stream body must not destroy the caller's ability to deliver the
//! original bytes, so [`StreamBody`] supports a mandatory tee: the stream
//! is split into an inspection half and an untouched redelivery half
//! before any byte is consumed.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::InterceptError;

/// A forward-only stream of body chunks.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// An HTTP-like message body.
///
/// Cloning is cheap: text and blobs share or copy their storage, and a
/// stream clone shares the same underlying stream (there is only ever one
/// sequence of bytes; see [`StreamBody`]).
#[derive(Clone)]
pub enum Body {
    Text(String),
    Blob(Bytes),
    Buffer(Vec<u8>),
    Stream(StreamBody),
}

impl Body {
    /// Decodes this body to text. Streams are inspected non-destructively
    /// via [`StreamBody::peek_text`]; the redelivery half stays intact.
    /// Decoding assumes UTF-8 and never fails on malformed sequences.
    pub async fn to_text(&self) -> std::result::Result<String, InterceptError> {
        match self {
            Body::Text(s) => Ok(s.clone()),
            Body::Blob(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            Body::Buffer(b) => Ok(String::from_utf8_lossy(b).into_owned()),
            Body::Stream(s) => s.peek_text().await,
        }
    }
}

/// Materializes an optional body to text. An absent body yields `None`,
/// never the empty string, so downstream "does the content include X"
/// checks cannot be fooled by a missing body.
pub async fn materialize(
    body: Option<&Body>,
) -> std::result::Result<Option<String>, InterceptError> {
    match body {
        None => Ok(None),
        Some(b) => b.to_text().await.map(Some),
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Text(s) => f.debug_tuple("Text").field(&s.len()).finish(),
            Body::Blob(b) => f.debug_tuple("Blob").field(&b.len()).finish(),
            Body::Buffer(b) => f.debug_tuple("Buffer").field(&b.len()).finish(),
            Body::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::Text(s)
    }
}

impl From<&str> for Body {
    fn from(s: &str) -> Self {
        Body::Text(s.to_string())
    }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self {
        Body::Blob(b)
    }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self {
        Body::Buffer(b)
    }
}

/// A shared, single-consumption byte stream.
///
/// The stream lives behind a shared slot: `take` removes it for final
/// delivery, `tee` replaces one stream with two independent halves that
/// each observe the full chunk sequence. Clones of a `StreamBody` point at
/// the same slot.
#[derive(Clone)]
pub struct StreamBody {
    inner: Arc<Mutex<Option<ByteStream>>>,
}

impl StreamBody {
    pub fn new(stream: ByteStream) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
        }
    }

    /// Builds a stream body from in-memory chunks. Mostly useful for tests
    /// and transports that already buffered the payload.
    pub fn from_chunks(chunks: Vec<Bytes>) -> Self {
        Self::new(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }

    /// Removes the stream for final delivery. Returns `None` when it was
    /// already taken.
    pub async fn take(&self) -> Option<ByteStream> {
        self.inner.lock().await.take()
    }

    pub async fn is_consumed(&self) -> bool {
        self.inner.lock().await.is_none()
    }

    /// Splits the stream into two independent halves observing the same
    /// chunk sequence. The slot is left empty; callers that only want to
    /// inspect should use [`peek_text`](Self::peek_text), which puts the
    /// redelivery half back.
    pub async fn tee(&self) -> std::result::Result<(ByteStream, ByteStream), InterceptError> {
        let mut source = self
            .inner
            .lock()
            .await
            .take()
            .ok_or(InterceptError::BodyConsumed)?;

        let (tx_a, rx_a) = mpsc::unbounded_channel::<io::Result<Bytes>>();
        let (tx_b, rx_b) = mpsc::unbounded_channel::<io::Result<Bytes>>();

        tokio::spawn(async move {
            while let Some(chunk) = source.next().await {
                match chunk {
                    Ok(bytes) => {
                        let a = tx_a.send(Ok(bytes.clone())).is_ok();
                        let b = tx_b.send(Ok(bytes)).is_ok();
                        if !a && !b {
                            break;
                        }
                    }
                    Err(e) => {
                        // io::Error is not Clone; rebuild it for each half.
                        let _ = tx_a.send(Err(io::Error::new(e.kind(), e.to_string())));
                        let _ = tx_b.send(Err(io::Error::new(e.kind(), e.to_string())));
                        break;
                    }
                }
            }
        });

        Ok((
            UnboundedReceiverStream::new(rx_a).boxed(),
            UnboundedReceiverStream::new(rx_b).boxed(),
        ))
    }

    /// Drains a tee'd inspection half to text while reinstalling the
    /// redelivery half, leaving this body deliverable whether or not the
    /// caller ends up rewriting it.
    pub async fn peek_text(&self) -> std::result::Result<String, InterceptError> {
        let (mut inspect, redeliver) = self.tee().await?;

        // Reinstall before draining so a failed drain still leaves the
        // body deliverable.
        *self.inner.lock().await = Some(redeliver);

        let mut buf = Vec::new();
        while let Some(chunk) = inspect.next().await {
            match chunk {
                Ok(bytes) => buf.extend_from_slice(&bytes),
                Err(e) => return Err(InterceptError::Stream(e.to_string())),
            }
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StreamBody(..)")
    }
}
