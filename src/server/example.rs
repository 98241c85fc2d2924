//! Built-in demo event stream
//!
//! `GET /durablefetch-example-stream-sse?n=N` emits `N` server-sent events,
//! one per tick, each carrying `{"number": i}`, then `data: [DONE]`. Proxying
//! the relay's own demo stream through the relay shows resumption end to end
//! without any other upstream.

use std::time::Duration;

use bytes::Bytes;
use futures::Stream;

/// Path of the demo stream
pub const EXAMPLE_STREAM_PATH: &str = "/durablefetch-example-stream-sse";

/// Events emitted when `n` is absent or not a number
pub const DEFAULT_EXAMPLE_EVENTS: u64 = 10;

/// Delay before each event
pub const DEFAULT_EXAMPLE_INTERVAL: Duration = Duration::from_millis(300);

/// Read `n` from the query string
pub fn event_count(query: Option<&str>) -> u64 {
    query
        .into_iter()
        .flat_map(|query| url::form_urlencoded::parse(query.as_bytes()))
        .find(|(name, _)| name == "n")
        .and_then(|(_, value)| value.trim().parse().ok())
        .unwrap_or(DEFAULT_EXAMPLE_EVENTS)
}

/// Numbered events followed by the `[DONE]` marker, one every `interval`
pub fn events(count: u64, interval: Duration) -> impl Stream<Item = Bytes> + Send + 'static {
    futures::stream::unfold(Some(0u64), move |sent| async move {
        let Some(sent) = sent else {
            return None;
        };
        tokio::time::sleep(interval).await;
        if sent >= count {
            return Some((Bytes::from_static(b"data: [DONE]\n\n"), None));
        }
        let number = sent + 1;
        let event = format!("data: {}\n\n", serde_json::json!({ "number": number }));
        Some((Bytes::from(event), Some(number)))
    })
}
