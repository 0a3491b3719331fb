//! HTTP/1.1 transport
//!
//! Built on `hyper` and `tokio`: one task per connection, requests handled by
//! `service_fn`. Requests under the upload base path are converted into a
//! [`TusRequest`] and handed to the [`Dispatcher`]; `GET /health` and
//! `GET /metrics` are answered directly.
//!
//! hyper cannot send a final 1xx response, so the resumable "aborted" outcome
//! (100) goes out as `204 No Content`, still carrying `Offset`.

use super::dispatch::{Dispatcher, TusRequest};
use super::ServerError;
use crate::config::Config;
use crate::metrics;
use crate::protocol::{ResponseBody, TusResponse};
use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::ext::ReasonPhrase;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::io::{ReaderStream, StreamReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Response body type of the server
pub type HttpBody = UnsyncBoxBody<Bytes, io::Error>;

struct State {
    dispatcher: Arc<Dispatcher>,
    metrics_enabled: bool,
    shutdown: CancellationToken,
}

/// tus HTTP server
///
/// Binds in [`Server::new`], so `local_addr` is known before `run` (useful
/// with port 0).
pub struct Server {
    state: Arc<State>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl Server {
    /// Build the dispatcher from `config` and bind the listener
    pub async fn new(config: Config) -> Result<Self, ServerError> {
        let dispatcher = Dispatcher::from_config(&config)?;
        Self::bind(&config.server.address, dispatcher, config.metrics.enabled).await
    }

    /// Bind `address` and serve an already built dispatcher
    pub async fn bind(
        address: &str,
        dispatcher: Dispatcher,
        metrics_enabled: bool,
    ) -> Result<Self, ServerError> {
        let addr: SocketAddr = address
            .parse()
            .map_err(|e| ServerError::BindError(format!("Invalid address: {}", e)))?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindError(format!("Failed to bind to {}: {}", addr, e)))?;

        // Actual bound address (important for port 0)
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("Failed to get local address: {}", e)))?;

        info!("Server bound to {}", local_addr);

        Ok(Self {
            state: Arc::new(State {
                dispatcher: Arc::new(dispatcher),
                metrics_enabled,
                shutdown: CancellationToken::new(),
            }),
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the accept loop and cancels in-flight transfers
    pub fn shutdown_token(&self) -> CancellationToken {
        self.state.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires
    ///
    /// Accept errors are logged and do not stop the server.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(
            base_path = self.state.dispatcher.parser().base_path(),
            "Serving tus uploads on {}", self.local_addr
        );

        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = self.state.shutdown.cancelled() => {
                    info!("Shutting down server");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let state = Arc::clone(&self.state);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(req, state).await) }
                });

                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Error serving connection from {}: {}", peer_addr, e);
                }
            });
        }
    }
}

async fn handle_request(req: Request<Incoming>, state: Arc<State>) -> Response<HttpBody> {
    let path = req.uri().path().to_string();
    let dispatcher = &state.dispatcher;

    if !dispatcher.parser().matches(&path) {
        return serve_auxiliary(req.method(), &path, state.metrics_enabled);
    }

    let (parts, body) = req.into_parts();
    let reader = StreamReader::new(body.into_data_stream().map_err(io::Error::other));

    let request = TusRequest {
        method: parts.method.as_str().to_string(),
        path,
        headers: parts.headers,
        body: reader,
        cancel: state.shutdown.child_token(),
    };

    into_http_response(dispatcher.dispatch(request).await)
}

// Endpoints outside the upload base path
fn serve_auxiliary(method: &Method, path: &str, metrics_enabled: bool) -> Response<HttpBody> {
    match (method, path) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok".to_string()),
        (&Method::GET, "/metrics") if metrics_enabled => match metrics::gather_text() {
            Ok(text) => text_response(StatusCode::OK, text),
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        _ => text_response(StatusCode::NOT_FOUND, "Not Found".to_string()),
    }
}

fn text_response(status: StatusCode, text: String) -> Response<HttpBody> {
    let mut response = Response::new(full_body(text));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    response
}

fn full_body(text: String) -> HttpBody {
    Full::new(Bytes::from(text))
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// Convert a dispatcher response into a hyper response
pub fn into_http_response(response: TusResponse) -> Response<HttpBody> {
    let (status, reason, headers, body) = response.into_parts();

    let body = match body {
        ResponseBody::Empty => Empty::<Bytes>::new()
            .map_err(|never| match never {})
            .boxed_unsync(),
        ResponseBody::Text(text) => full_body(text),
        ResponseBody::File { file, length } => {
            StreamBody::new(ReaderStream::new(file.take(length)).map_ok(Frame::data))
                .boxed_unsync()
        }
    };

    let mut http = Response::new(body);
    *http.status_mut() = if status.is_informational() {
        StatusCode::NO_CONTENT
    } else {
        status
    };
    *http.headers_mut() = headers;
    if let Some(reason) = reason {
        http.extensions_mut()
            .insert(ReasonPhrase::from_static(reason.as_bytes()));
    }
    http
}
