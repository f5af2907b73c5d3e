//! WebSocket event server
//!
//! The upgrade request path selects the namespace. Middleware runs inside the
//! handshake callback, so a rejected client never reaches a handler. Each
//! accepted connection gets a reader loop (sequential dispatch) and a writer
//! task (ordered emits plus periodic pings).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::ChannelError;
use super::http::{self, HttpRoutes};
use super::namespace::{Dispatch, Namespace};
use super::protocol::InboundFrame;
use super::socket::{Outbound, Socket};

/// Interval between server WebSocket pings
pub const PING_INTERVAL: Duration = Duration::from_secs(25);

/// Connection-scoped check run during the WebSocket upgrade.
///
/// An accepted request may name the operator it belongs to; the first name
/// returned by any middleware is attached to the connection's [`Socket`].
pub trait Middleware: Send + Sync + 'static {
    fn check(&self, request: &Request) -> Result<Option<String>, ChannelError>;
}

struct Accepted {
    namespace: Arc<dyn Dispatch>,
    operator: Option<String>,
}

struct Routes {
    namespaces: HashMap<String, Arc<dyn Dispatch>>,
    middleware: Vec<Arc<dyn Middleware>>,
    http: Option<Arc<dyn HttpRoutes>>,
    ping_interval: Duration,
}

impl Routes {
    fn route(&self, request: &Request) -> Result<Accepted, ChannelError> {
        let path = normalize_path(request.uri().path());
        let namespace = self
            .namespaces
            .get(path)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownNamespace(path.to_string()))?;

        let mut operator = None;
        for middleware in &self.middleware {
            let name = middleware.check(request)?;
            operator = operator.or(name);
        }
        Ok(Accepted {
            namespace,
            operator,
        })
    }
}

fn normalize_path(path: &str) -> &str {
    match path.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}

/// Namespaced WebSocket event server
pub struct EventServer {
    routes: Routes,
}

impl Default for EventServer {
    fn default() -> Self {
        Self::new()
    }
}

impl EventServer {
    pub fn new() -> Self {
        Self {
            routes: Routes {
                namespaces: HashMap::new(),
                middleware: Vec::new(),
                http: None,
                ping_interval: PING_INTERVAL,
            },
        }
    }

    /// Serve `namespace` at `path` (e.g. `/ssh`)
    pub fn with_namespace<N: Namespace>(mut self, path: &str, namespace: Arc<N>) -> Self {
        self.routes
            .namespaces
            .insert(normalize_path(path).to_string(), namespace);
        self
    }

    /// Add middleware applied to every namespace
    pub fn with_middleware<M: Middleware>(mut self, middleware: Arc<M>) -> Self {
        self.routes.middleware.push(middleware);
        self
    }

    /// Answer the paths claimed by `routes` as plain HTTP
    pub fn with_http_routes<H: HttpRoutes>(mut self, routes: Arc<H>) -> Self {
        self.routes.http = Some(routes);
        self
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.routes.ping_interval = interval;
        self
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Open connections are also told to stop, which runs their namespace
    /// disconnect hooks.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ChannelError> {
        let routes = Arc::new(self.routes);
        info!("Event channel listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Event channel shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let routes = routes.clone();
                        let shutdown = shutdown.child_token();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, routes, shutdown).await;
                        });
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
            }
        }

        Ok(())
    }
}

async fn serve_http(mut stream: TcpStream, peer: SocketAddr, routes: Arc<dyn HttpRoutes>) {
    let deadline = tokio::time::Instant::now() + http::REQUEST_TIMEOUT;
    let response = match tokio::time::timeout_at(deadline, http::read_request(&mut stream)).await {
        Ok(Ok(request)) => {
            debug!("{} {} from {}", request.method(), request.uri().path(), peer);
            routes.respond(&request)
        }
        Ok(Err(e)) => {
            info!("Bad HTTP request from {}: {}", peer, e);
            let body = serde_json::json!({
                "success": false,
                "message": "Bad request",
                "error": e.to_string(),
            });
            http::json_response(StatusCode::BAD_REQUEST, &body)
        }
        Err(_) => {
            debug!("HTTP request from {} timed out", peer);
            return;
        }
    };

    if let Err(e) = http::write_response(&mut stream, &response).await {
        debug!("HTTP response to {} failed: {}", peer, e);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    routes: Arc<Routes>,
    shutdown: CancellationToken,
) {
    if let Some(http_routes) = routes.http.clone() {
        if let Some(path) = http::sniff_path(&stream).await {
            if http_routes.handles(&path) {
                serve_http(stream, peer, http_routes).await;
                return;
            }
        }
    }

    let mut selected: Option<Accepted> = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match routes.route(request) {
            Ok(accepted) => {
                selected = Some(accepted);
                Ok(response)
            }
            Err(e) => {
                info!("Refusing upgrade from {}: {}", peer, e);
                Err(e.rejection())
            }
        }
    };

    let ws = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };
    let Some(Accepted {
        namespace,
        operator,
    }) = selected
    else {
        return;
    };

    let (sink, mut frames) = ws.split();
    let (socket, outbound_rx) = Socket::channel(uuid::Uuid::new_v4().to_string());
    let socket = socket.with_operator(operator);
    info!("Connection {} established from {}", socket.id(), peer);

    let writer = tokio::spawn(write_loop(
        sink,
        outbound_rx,
        routes.ping_interval,
        socket.id().to_string(),
    ));

    namespace.connected(&socket).await;

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = frames.next() => message,
        };

        match message {
            Some(Ok(Message::Text(text))) => match InboundFrame::parse(&text) {
                Ok(frame) if frame.event == "disconnect" => {
                    debug!("Client {} requested disconnect", socket.id());
                    break;
                }
                Ok(frame) => namespace.dispatch(&socket, &frame.event, frame.data).await,
                Err(e) => namespace.reject(&socket, &e),
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!("Read error on {}: {}", socket.id(), e);
                break;
            }
        }
    }

    namespace.disconnected(&socket).await;
    socket.close();
    if let Err(e) = writer.await {
        warn!("Writer task for {} panicked: {}", socket.id(), e);
    }
    info!("Connection {} closed", socket.id());
}

async fn write_loop(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    ping_interval: Duration,
    id: String,
) {
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );

    loop {
        let message = tokio::select! {
            next = outbound.recv() => match next {
                Some(Outbound::Event(event)) => match serde_json::to_string(&event) {
                    Ok(text) => Message::Text(text),
                    Err(e) => {
                        warn!("Failed to encode {} for {}: {}", event.event, id, e);
                        continue;
                    }
                },
                Some(Outbound::Close) | None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        if let Err(e) = sink.send(message).await {
            debug!("WebSocket send to {} failed: {}", id, e);
            break;
        }
    }

    let _ = sink.close().await;
    debug!("Writer for {} stopped", id);
}
