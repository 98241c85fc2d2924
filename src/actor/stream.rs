//! Per-caller output streams

use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

use super::broadcast::{Broadcaster, SubscriberId};
use crate::upstream::{BodyStream, Headers, UpstreamError};

/// Chunks delivered to one caller: the replayed prefix, then live chunks
///
/// Dropping the stream (the client went away) detaches it from the
/// broadcaster right away.
#[derive(Debug)]
pub struct ChunkStream {
    rx: mpsc::UnboundedReceiver<Bytes>,
    registration: Option<(Weak<Broadcaster>, SubscriberId)>,
}

impl ChunkStream {
    pub(crate) fn detached(rx: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self {
            rx,
            registration: None,
        }
    }

    pub(crate) fn live(
        rx: mpsc::UnboundedReceiver<Bytes>,
        broadcaster: Weak<Broadcaster>,
        id: SubscriberId,
    ) -> Self {
        Self {
            rx,
            registration: Some((broadcaster, id)),
        }
    }

    /// Whether this stream was registered for live chunks
    pub fn is_live(&self) -> bool {
        self.registration.is_some()
    }
}

impl Stream for ChunkStream {
    type Item = Bytes;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Bytes>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ChunkStream {
    fn drop(&mut self) {
        if let Some((broadcaster, id)) = self.registration.take() {
            if let Some(broadcaster) = broadcaster.upgrade() {
                broadcaster.detach(id);
            }
        }
    }
}

/// Body handed back for one request
pub enum ResponseBody {
    /// Replayed and live chunks from the log
    Log(ChunkStream),
    /// A failed upstream response relayed as-is
    Passthrough(BodyStream),
}

impl Stream for ResponseBody {
    type Item = Result<Bytes, UpstreamError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.get_mut() {
            ResponseBody::Log(stream) => Pin::new(stream).poll_next(cx).map(|chunk| chunk.map(Ok)),
            ResponseBody::Passthrough(body) => body.as_mut().poll_next(cx),
        }
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseBody::Log(stream) => f.debug_tuple("Log").field(stream).finish(),
            ResponseBody::Passthrough(_) => f.write_str("Passthrough"),
        }
    }
}

/// Response produced by an actor for one request
#[derive(Debug)]
pub struct ActorResponse {
    /// Status code
    pub status: u16,
    /// Response headers
    pub headers: Headers,
    /// Body
    pub body: ResponseBody,
}

impl ActorResponse {
    /// Whether the body is served from the chunk log
    pub fn is_from_log(&self) -> bool {
        matches!(self.body, ResponseBody::Log(_))
    }

    /// Take the log stream, if this response is served from the log
    pub fn into_chunks(self) -> Option<ChunkStream> {
        match self.body {
            ResponseBody::Log(stream) => Some(stream),
            ResponseBody::Passthrough(_) => None,
        }
    }
}
