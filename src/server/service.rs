//! HTTP routing
//!
//! ```text
//! OPTIONS *            -> 204 preflight
//! *       /            -> 307 to the homepage
//! *       /durablefetch-example-stream-sse?n=N -> demo event stream
//! POST    /in-progress -> resource status (JSON)
//! POST    /delete      -> purge resource (JSON)
//! *       /{host}/...  -> proxied through the resource actor
//! ```
//!
//! Every response, errors included, carries the CORS headers.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::header::{
    HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LOCATION,
};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use serde::Serialize;

use super::cors;
use super::example::{self, DEFAULT_EXAMPLE_INTERVAL, EXAMPLE_STREAM_PATH};
use crate::actor::{ActorResponse, ResponseBody};
use crate::dispatch::{Dispatcher, ProxyRequest};
use crate::error::Error;

/// Body type of every response the server writes
pub type ProxyBody = UnsyncBoxBody<Bytes, Error>;

/// Request handler shared by all connections
#[derive(Clone)]
pub struct ProxyService {
    dispatcher: Arc<Dispatcher>,
    homepage: Arc<str>,
    example_interval: Duration,
}

impl ProxyService {
    /// Create a service routing to `dispatcher`
    pub fn new(dispatcher: Arc<Dispatcher>, homepage: impl Into<Arc<str>>) -> Self {
        Self {
            dispatcher,
            homepage: homepage.into(),
            example_interval: DEFAULT_EXAMPLE_INTERVAL,
        }
    }

    /// Set the delay between demo stream events
    pub fn example_interval(mut self, interval: Duration) -> Self {
        self.example_interval = interval;
        self
    }

    /// Get a reference to the dispatcher
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Handle one request whose body has already been read
    pub async fn handle(&self, request: Request<Bytes>) -> Response<ProxyBody> {
        let (parts, body) = request.into_parts();

        let mut response = match (&parts.method, parts.uri.path()) {
            (&Method::OPTIONS, _) => with_status(empty(), StatusCode::NO_CONTENT),
            (_, "/") => self.redirect_home(),
            (_, EXAMPLE_STREAM_PATH) => self.example_stream(parts.uri.query()),
            (&Method::POST, "/in-progress") => match self.dispatcher.status(&body).await {
                Ok(status) => json(&status),
                Err(e) => error_response(&e),
            },
            (&Method::POST, "/delete") => match self.dispatcher.purge(&body).await {
                Ok(outcome) => json(&outcome),
                Err(e) => error_response(&e),
            },
            _ => {
                let request = ProxyRequest {
                    method: parts.method.clone(),
                    path: parts.uri.path().to_string(),
                    query: parts.uri.query().map(str::to_string),
                    headers: parts.headers,
                    body,
                };
                match self.dispatcher.proxy(request).await {
                    Ok(response) => relay(response),
                    Err(e) => error_response(&e),
                }
            }
        };

        tracing::debug!(
            method = %parts.method,
            path = %parts.uri.path(),
            status = response.status().as_u16(),
            "Request handled"
        );

        cors::apply(response.headers_mut());
        response
    }

    /// Answer for a request whose body could not be read
    pub fn reject(&self, error: &Error) -> Response<ProxyBody> {
        let mut response = error_response(error);
        cors::apply(response.headers_mut());
        response
    }

    fn example_stream(&self, query: Option<&str>) -> Response<ProxyBody> {
        let count = example::event_count(query);
        let frames = example::events(count, self.example_interval)
            .map(|event| Ok::<_, Error>(Frame::data(event)));

        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert("x-example", HeaderValue::from_static("test"));
        response
    }

    fn redirect_home(&self) -> Response<ProxyBody> {
        let mut response = with_status(empty(), StatusCode::TEMPORARY_REDIRECT);
        match HeaderValue::from_str(&self.homepage) {
            Ok(location) => {
                response.headers_mut().insert(LOCATION, location);
            }
            Err(e) => {
                tracing::warn!(homepage = %self.homepage, error = %e, "Invalid homepage URL");
                *response.status_mut() = StatusCode::NOT_FOUND;
            }
        }
        response
    }
}

fn empty() -> ProxyBody {
    Empty::new().map_err(|never| match never {}).boxed_unsync()
}

fn full(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn streamed(body: ResponseBody) -> ProxyBody {
    let frames = body.map(|chunk| chunk.map(Frame::data).map_err(Error::UpstreamStream));
    StreamBody::new(frames).boxed_unsync()
}

fn with_status(body: ProxyBody, status: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn json<T: Serialize>(value: &T) -> Response<ProxyBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode response");
            with_status(full(e.to_string()), StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn error_response(error: &Error) -> Response<ProxyBody> {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        tracing::warn!(error = %error, "Request failed");
    } else {
        tracing::debug!(error = %error, "Request rejected");
    }

    let mut response = with_status(full(error.to_string()), status);
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn relay(response: ActorResponse) -> Response<ProxyBody> {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let from_log = response.is_from_log();

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for (name, value) in &response.headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::debug!(header = %name, "Dropping unrepresentable header"),
        }
    }
    // A log body may be cut short by an upstream failure
    if from_log {
        headers.remove(CONTENT_LENGTH);
    }

    let mut relayed = with_status(streamed(response.body), status);
    *relayed.headers_mut() = headers;
    relayed
}
