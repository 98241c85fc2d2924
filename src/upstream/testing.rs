//! Scripted upstream for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{BodyStream, Headers, Upstream, UpstreamError, UpstreamRequest, UpstreamResponse};

type Feed = mpsc::UnboundedSender<Result<Bytes, UpstreamError>>;

/// Upstream whose bodies are fed by the test
///
/// Every successful fetch opens a new body; the test pushes chunks into the
/// most recent one with [`ScriptedUpstream::push`] and ends it with
/// [`ScriptedUpstream::finish`] or [`ScriptedUpstream::fail`].
#[derive(Debug, Default)]
pub(crate) struct ScriptedUpstream {
    calls: AtomicUsize,
    latency: Duration,
    failures: Mutex<VecDeque<u16>>,
    feeds: Mutex<Vec<Feed>>,
    requests: Mutex<Vec<UpstreamRequest>>,
}

impl ScriptedUpstream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Delay every response head by `latency`
    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Number of fetches issued so far
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests seen so far
    pub(crate) fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Answer the next fetch with `status` and a short error body
    pub(crate) fn fail_next(&self, status: u16) {
        self.failures.lock().unwrap().push_back(status);
    }

    /// Send a chunk on the latest body
    pub(crate) fn push(&self, chunk: &'static [u8]) {
        let feeds = self.feeds.lock().unwrap();
        let feed = feeds.last().expect("no upstream body open");
        let _ = feed.send(Ok(Bytes::from_static(chunk)));
    }

    /// Whether the consumer of the latest body has dropped it
    pub(crate) fn body_released(&self) -> bool {
        self.feeds
            .lock()
            .unwrap()
            .last()
            .is_some_and(|feed| feed.is_closed())
    }

    /// End the latest body cleanly
    pub(crate) fn finish(&self) {
        self.feeds.lock().unwrap().pop();
    }

    /// End the latest body with a read error
    pub(crate) fn fail(&self) {
        if let Some(feed) = self.feeds.lock().unwrap().pop() {
            let _ = feed.send(Err(UpstreamError::Body("connection reset".into())));
        }
    }
}

#[async_trait]
impl Upstream for ScriptedUpstream {
    async fn fetch(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut headers = Headers::new();
        headers.insert("content-type".into(), "text/event-stream".into());

        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(status) = failure {
            return Ok(UpstreamResponse {
                status,
                headers,
                body: futures::stream::iter([Ok(Bytes::from_static(b"upstream failed"))]).boxed(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.lock().unwrap().push(tx);
        Ok(UpstreamResponse {
            status: 200,
            headers,
            body: receiver_stream(rx),
        })
    }
}

fn receiver_stream(rx: mpsc::UnboundedReceiver<Result<Bytes, UpstreamError>>) -> BodyStream {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
        .boxed()
}
