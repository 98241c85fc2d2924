//! End-to-end tests against a real upstream over loopback

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::header::{HeaderValue, CONTENT_TYPE};
use http_body_util::StreamBody;
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use durable_fetch::{
    ClientConfig, DurableFetchClient, HttpUpstream, MemoryBackend, ProxyServer, ServerConfig,
};

const CHUNKS: [&[u8]; 3] = [b"data: one\n\n", b"data: two\n\n", b"data: three\n\n"];
const FULL_BODY: &str = "data: one\n\ndata: two\n\ndata: three\n\n";

/// Upstream that streams [`CHUNKS`] slowly and counts requests
async fn spawn_upstream(calls: Arc<AtomicUsize>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                let service = service_fn(move |_request: Request<Incoming>| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        let frames = futures::stream::iter(CHUNKS).then(|chunk| async move {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Infallible>(Frame::data(Bytes::from_static(chunk)))
                        }).boxed();
                        let mut response = Response::new(StreamBody::new(frames));
                        response
                            .headers_mut()
                            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), service)
                    .await;
            });
        }
    });

    addr
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

/// Relay in front of `http://` upstreams, on an ephemeral port
async fn spawn_relay() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig::with_addr(addr)
        .homepage("https://example.com/home")
        .upstream_scheme("http")
        .example_interval(Duration::from_millis(20));
    let server = ProxyServer::new(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(HttpUpstream::with_client(http_client())),
    );
    tokio::spawn(async move { server.serve(listener, std::future::pending()).await });

    addr
}

struct Harness {
    relay: SocketAddr,
    upstream: SocketAddr,
    calls: Arc<AtomicUsize>,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(Arc::clone(&calls)).await;
        let relay = spawn_relay().await;
        Self {
            relay,
            upstream,
            calls,
            http: http_client(),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn proxied(&self, path: &str) -> String {
        format!("http://{}/{}{}", self.relay, self.upstream, path)
    }

    fn target(&self, path: &str) -> String {
        format!("http://{}{}", self.upstream, path)
    }

    fn admin(&self, endpoint: &str) -> String {
        format!("http://{}{}", self.relay, endpoint)
    }

    async fn post_json(&self, endpoint: &str, body: String) -> serde_json::Value {
        let text = self
            .http
            .post(self.admin(endpoint))
            .body(body)
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        serde_json::from_str(&text).unwrap()
    }

    async fn fetch_text(&self, path: &str) -> String {
        self.http
            .get(self.proxied(path))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_concurrent_clients_share_one_upstream_fetch() {
    let harness = Harness::start().await;

    let (a, b, c) = tokio::join!(
        harness.fetch_text("/events"),
        harness.fetch_text("/events"),
        harness.fetch_text("/events"),
    );

    assert_eq!(a, FULL_BODY);
    assert_eq!(b, FULL_BODY);
    assert_eq!(c, FULL_BODY);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_late_joiner_gets_full_body() {
    let harness = Harness::start().await;

    let first = harness
        .http
        .get(harness.proxied("/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["cache-control"], "no-store");
    assert_eq!(first.headers()["content-type"], "text/event-stream");
    assert_eq!(first.headers()["access-control-allow-origin"], "*");

    // Join once part of the body has been logged
    tokio::time::sleep(Duration::from_millis(80)).await;
    let late = harness.fetch_text("/events").await;

    assert_eq!(first.text().await.unwrap(), FULL_BODY);
    assert_eq!(late, FULL_BODY);
    assert_eq!(harness.calls(), 1);

    // Served from storage after completion
    assert_eq!(harness.fetch_text("/events").await, FULL_BODY);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_distinct_urls_fetch_separately() {
    let harness = Harness::start().await;

    let (a, b) = tokio::join!(harness.fetch_text("/a"), harness.fetch_text("/b?x=1"));

    assert_eq!(a, FULL_BODY);
    assert_eq!(b, FULL_BODY);
    assert_eq!(harness.calls(), 2);
}

#[tokio::test]
async fn test_status_and_delete() {
    let harness = Harness::start().await;
    assert_eq!(harness.fetch_text("/events").await, FULL_BODY);

    let body = format!(r#"{{"url":"{}"}}"#, harness.target("/events"));

    let status = harness.post_json("/in-progress", body.clone()).await;
    assert_eq!(status["inProgress"], false);
    assert_eq!(status["completed"], true);
    assert_eq!(status["activeConnections"], 0);
    assert_eq!(status["chunksStored"], 3);

    let deleted = harness.post_json("/delete", body).await;
    assert_eq!(deleted["success"], true);
    assert_eq!(deleted["message"], "Storage cleared");

    assert_eq!(harness.fetch_text("/events").await, FULL_BODY);
    assert_eq!(harness.calls(), 2);
}

#[tokio::test]
async fn test_preflight_root_and_bad_path() {
    let harness = Harness::start().await;

    let preflight = harness
        .http
        .request(reqwest::Method::OPTIONS, harness.proxied("/events"))
        .send()
        .await
        .unwrap();
    assert_eq!(preflight.status(), 204);
    assert_eq!(preflight.headers()["access-control-allow-origin"], "*");
    assert_eq!(preflight.headers()["access-control-max-age"], "86400");

    let root = harness.http.get(harness.admin("/")).send().await.unwrap();
    assert_eq!(root.status(), 307);
    assert_eq!(root.headers()["location"], "https://example.com/home");

    let bad = harness.http.get(harness.admin("//")).send().await.unwrap();
    assert_eq!(bad.status(), 400);
    assert_eq!(
        bad.text().await.unwrap(),
        "Invalid request: missing host in path"
    );

    assert_eq!(harness.calls(), 0);
}

#[tokio::test]
async fn test_client_through_relay() {
    let harness = Harness::start().await;

    let config = ClientConfig::new(format!("http://{}", harness.relay)).proxy_loopback();
    let client = DurableFetchClient::with_client(config, http_client()).unwrap();
    let target = harness.target("/events");

    let text = client
        .get(&target)
        .unwrap()
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(text, FULL_BODY);

    let status = client.is_in_progress(&target).await.unwrap();
    assert!(status.completed);
    assert_eq!(status.chunks_stored, 3);

    let outcome = client.delete(&target).await.unwrap();
    assert!(outcome.success);
    assert_eq!(client.is_in_progress(&target).await.unwrap().chunks_stored, 0);
    assert_eq!(harness.calls(), 1);
}

#[tokio::test]
async fn test_relay_replays_its_own_example_stream() {
    let harness = Harness::start().await;
    let url = format!(
        "http://{}/{}/durablefetch-example-stream-sse?n=3",
        harness.relay, harness.relay
    );
    let expected = concat!(
        "data: {\"number\":1}\n\n",
        "data: {\"number\":2}\n\n",
        "data: {\"number\":3}\n\n",
        "data: [DONE]\n\n",
    );

    let first = harness.http.get(&url).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-example"], "test");
    assert_eq!(first.headers()["cache-control"], "no-store");
    assert_eq!(first.text().await.unwrap(), expected);

    // Served from the log the second time
    let again = harness.http.get(&url).send().await.unwrap();
    assert_eq!(again.text().await.unwrap(), expected);
}
