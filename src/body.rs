//! Request bodies.
//!
//! A [`Body`] is either empty, a single-use byte stream, or a replayable
//! buffer. The client turns a single-use stream into a replayable buffer
//! exactly once, and only when the retry policy allows more than one attempt,
//! so retried sends never observe an already consumed stream.

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;

type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + Sync>>;

/// The body of an outgoing request.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Empty,
    Stream(BodyStream),
    Replayable(Bytes),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self { kind: Kind::Empty }
    }

    /// A single-use body read from `stream`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + Sync + 'static,
    {
        Self {
            kind: Kind::Stream(Box::pin(stream)),
        }
    }

    /// A single-use body read from `reader`.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + Sync + 'static,
    {
        Self::from_stream(ReaderStream::new(reader))
    }

    /// Returns `true` if there is nothing to send.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            Kind::Empty => true,
            Kind::Replayable(bytes) => bytes.is_empty(),
            Kind::Stream(_) => false,
        }
    }

    /// Returns `true` if the body can be sent more than once.
    pub fn is_replayable(&self) -> bool {
        !matches!(self.kind, Kind::Stream(_))
    }

    /// Returns the buffered content of a replayable body.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            Kind::Replayable(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the exact length when it is known up front.
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            Kind::Empty => Some(0),
            Kind::Replayable(bytes) => Some(bytes.len() as u64),
            Kind::Stream(_) => None,
        }
    }

    /// Drains a single-use stream into a replayable buffer.
    ///
    /// Replayable and empty bodies are returned unchanged.
    pub(crate) async fn into_replayable(self) -> io::Result<Body> {
        match self.kind {
            Kind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(Body::from(buf.freeze()))
            }
            kind => Ok(Body { kind }),
        }
    }

    /// Produces the body for one attempt.
    ///
    /// A replayable body is reset by handing out a fresh view of the buffer;
    /// a stream is moved out and leaves an empty body behind.
    pub(crate) fn take_for_attempt(&mut self) -> Body {
        if let Kind::Replayable(bytes) = &self.kind {
            return Body::from(bytes.clone());
        }
        std::mem::take(self)
    }

    pub(crate) fn is_stream(&self) -> bool {
        matches!(self.kind, Kind::Stream(_))
    }

    pub(crate) fn into_reqwest(self) -> reqwest::Body {
        match self.kind {
            Kind::Empty => reqwest::Body::from(Bytes::new()),
            Kind::Replayable(bytes) => reqwest::Body::from(bytes),
            Kind::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Empty => f.write_str("Body::Empty"),
            Kind::Stream(_) => f.write_str("Body::Stream(..)"),
            Kind::Replayable(bytes) => write!(f, "Body::Replayable({} bytes)", bytes.len()),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: Kind::Replayable(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}
