//! SSE transport: a long-lived event stream plus POSTs to an announced
//! endpoint.
//!
//! The server answers the GET with an `endpoint` event naming the URL that
//! requests must be POSTed to. Responses arrive later as `message` events on
//! the stream. A single reader task owns the pending-request table; callers
//! talk to it over a command channel and wait on a oneshot.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::pending::{PendingRequests, Reply};
use super::{parse_url, ClientTransport, ConnectionInfo};
use crate::config::TransportKind;
use crate::error::{McpError, TransportError};
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, RequestId};
use crate::sse::{SseEvent, SseParser};

const EVENT_STREAM: &str = "text/event-stream";

/// How long disconnect waits for the reader to reject its waiters.
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Instructions for the stream reader.
#[derive(Debug)]
enum Command {
    /// Route the response for `id` to `reply`.
    Register {
        id: RequestId,
        reply: oneshot::Sender<Reply>,
    },
    /// Forget `id`; a late response is dropped.
    Cancel(RequestId),
    /// Fail every outstanding request.
    RejectAll,
    /// Fail everything and stop reading.
    Shutdown,
}

/// An open event stream.
struct StreamSession {
    endpoint: Url,
    session_id: Option<String>,
    commands: mpsc::UnboundedSender<Command>,
    reader: JoinHandle<()>,
}

/// SSE transport for MCP servers.
pub struct SseTransport {
    server: String,
    url: Url,
    headers: HeaderMap,
    http: Client,
    connect_timeout: Duration,
    session: Mutex<Option<StreamSession>>,
    connected: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
}

impl SseTransport {
    /// Create a transport for the stream at `url`.
    pub fn new(server: impl Into<String>, url: &str) -> Result<Self, TransportError> {
        Ok(Self {
            server: server.into(),
            url: parse_url(url)?,
            headers: HeaderMap::new(),
            http: Client::new(),
            connect_timeout: Duration::from_secs(30),
            session: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            outstanding: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Extra headers sent on the GET and every POST.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Bound on establishing the stream and receiving the endpoint.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Requests still waiting on the stream, as last seen by the reader.
    pub fn pending_requests(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn active(&self) -> Result<(Url, mpsc::UnboundedSender<Command>), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.session
            .lock()
            .as_ref()
            .map(|s| (s.endpoint.clone(), s.commands.clone()))
            .ok_or(TransportError::NotConnected)
    }

    async fn open_stream(&self) -> Result<ConnectionInfo, TransportError> {
        debug!(server = %self.server, url = %self.url, "Opening SSE stream");

        let response = self
            .http
            .get(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, EVENT_STREAM)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM) {
            return Err(TransportError::Handshake(format!(
                "expected {} but server sent '{}'",
                EVENT_STREAM, content_type
            )));
        }

        let (endpoint_tx, mut endpoint_rx) = watch::channel::<Option<Url>>(None);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_stream(
            StreamContext {
                server: self.server.clone(),
                base: self.url.clone(),
                connected: Arc::clone(&self.connected),
                outstanding: Arc::clone(&self.outstanding),
                endpoint_tx,
            },
            response.bytes_stream(),
            commands_rx,
        ));

        let endpoint = match endpoint_rx.wait_for(Option::is_some).await {
            Ok(endpoint) => endpoint.clone(),
            Err(_) => None,
        };
        let Some(endpoint) = endpoint else {
            reader.abort();
            return Err(TransportError::Handshake(
                "stream closed before the endpoint event".to_string(),
            ));
        };

        let session_id = session_id_from(&endpoint);
        info!(
            server = %self.server,
            endpoint = %endpoint,
            session_id = session_id.as_deref().unwrap_or("-"),
            "SSE endpoint received"
        );

        let info = ConnectionInfo {
            pid: None,
            endpoint: Some(endpoint.to_string()),
            session_id: session_id.clone(),
        };

        self.connected.store(true, Ordering::SeqCst);
        let previous = self.session.lock().replace(StreamSession {
            endpoint,
            session_id,
            commands,
            reader,
        });
        if let Some(previous) = previous {
            previous.reader.abort();
        }
        Ok(info)
    }

    async fn post(&self, endpoint: Url, body: &impl serde::Serialize) -> Result<(), TransportError> {
        let response = self
            .http
            .post(endpoint)
            .headers(self.headers.clone())
            .json(body)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(TransportError::HttpStatus {
                    status: status.as_u16(),
                    body,
                })
            }
        }
    }

    fn send_command(&self, command: Command) {
        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.commands.send(command);
        }
    }
}

/// Session id carried in the endpoint's query string, if any.
fn session_id_from(endpoint: &Url) -> Option<String> {
    endpoint
        .query_pairs()
        .find(|(key, _)| key == "session_id" || key == "sessionId")
        .map(|(_, value)| value.into_owned())
}

/// State the reader needs besides its stream and command channel.
struct StreamContext {
    server: String,
    base: Url,
    connected: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    endpoint_tx: watch::Sender<Option<Url>>,
}

impl StreamContext {
    /// Publish the table size and report whether the reader keeps going.
    fn track(&self, pending: &PendingRequests, running: bool) -> bool {
        self.outstanding.store(pending.len(), Ordering::SeqCst);
        if !running {
            self.connected.store(false, Ordering::SeqCst);
        }
        running
    }

    /// Apply a command. Returns false on shutdown.
    fn apply(&self, pending: &mut PendingRequests, command: Command) -> bool {
        match command {
            Command::Register { id, reply } => {
                pending.insert(id, reply);
            }
            Command::Cancel(id) => {
                if pending.cancel(&id) {
                    debug!(server = %self.server, id = %id, "Cancelled pending request");
                }
            }
            Command::RejectAll => {
                pending.reject_all(|| TransportError::NotConnected.into());
            }
            Command::Shutdown => {
                pending.reject_all(|| TransportError::NotConnected.into());
                return false;
            }
        }
        true
    }

    fn handle_event(
        &self,
        event: SseEvent,
        pending: &mut PendingRequests,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        if event.is_endpoint() {
            match self.base.join(event.data.trim()) {
                Ok(endpoint) => {
                    self.endpoint_tx.send_replace(Some(endpoint));
                }
                Err(e) => warn!(
                    server = %self.server,
                    data = %event.data,
                    error = %e,
                    "Ignoring unparseable endpoint event"
                ),
            }
            return true;
        }

        let message = match IncomingMessage::parse(&event.data) {
            Ok(message) => message,
            Err(e) => {
                warn!(server = %self.server, error = %e, "Ignoring malformed SSE message");
                return true;
            }
        };

        if !message.is_response() {
            debug!(
                server = %self.server,
                method = message.method.as_deref().unwrap_or("-"),
                "Ignoring server-initiated message"
            );
            return true;
        }

        let Some(id) = message.id.clone() else {
            warn!(server = %self.server, "Dropping response without id");
            return true;
        };

        // The request registered before POSTing, so its command is already
        // queued even if the select has not picked it up yet.
        if !pending.contains(&id) {
            while let Ok(command) = commands.try_recv() {
                if !self.apply(pending, command) {
                    return false;
                }
            }
        }

        if !pending.resolve(&id, message.into_result()) {
            warn!(server = %self.server, id = %id, "Dropping response with no pending request");
        }
        true
    }
}

/// Read the event stream until it ends or the transport shuts it down.
async fn read_stream<S, B>(
    ctx: StreamContext,
    stream: S,
    mut commands: mpsc::UnboundedReceiver<Command>,
) where
    S: Stream<Item = Result<B, reqwest::Error>>,
    B: AsRef<[u8]>,
{
    let mut stream = Box::pin(stream);
    let mut parser = SseParser::new();
    let mut pending = PendingRequests::new();

    loop {
        tokio::select! {
            biased;

            command = commands.recv() => match command {
                Some(command) => {
                    let running = ctx.apply(&mut pending, command);
                    if !ctx.track(&pending, running) {
                        return;
                    }
                }
                None => break,
            },

            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    for event in parser.feed(bytes.as_ref()) {
                        let running = ctx.handle_event(event, &mut pending, &mut commands);
                        if !ctx.track(&pending, running) {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!(server = %ctx.server, error = %e, "SSE stream error");
                    break;
                }
                None => break,
            },
        }
    }

    ctx.connected.store(false, Ordering::SeqCst);
    commands.close();
    while let Ok(command) = commands.try_recv() {
        ctx.apply(&mut pending, command);
    }
    let rejected = pending.reject_all(|| TransportError::ConnectionClosed.into());
    ctx.outstanding.store(0, Ordering::SeqCst);
    info!(server = %ctx.server, rejected, "SSE stream closed");
}

#[async_trait]
impl ClientTransport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn connect(&self) -> Result<ConnectionInfo, TransportError> {
        if self.is_connected() {
            let existing = self.session.lock().as_ref().map(|session| ConnectionInfo {
                pid: None,
                endpoint: Some(session.endpoint.to_string()),
                session_id: session.session_id.clone(),
            });
            if let Some(info) = existing {
                return Ok(info);
            }
        }

        tokio::time::timeout(self.connect_timeout, self.open_stream())
            .await
            .map_err(|_| {
                TransportError::Handshake(format!(
                    "no endpoint event within {:?}",
                    self.connect_timeout
                ))
            })?
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let session = self.session.lock().take();
        self.connected.store(false, Ordering::SeqCst);

        let Some(session) = session else {
            return Ok(());
        };

        debug!(
            server = %self.server,
            outstanding = self.pending_requests(),
            "Stopping SSE reader"
        );
        let _ = session.commands.send(Command::Shutdown);
        let mut reader = session.reader;
        if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, &mut reader)
            .await
            .is_err()
        {
            reader.abort();
        }
        debug!(server = %self.server, "SSE stream closed by client");
        Ok(())
    }

    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        let (endpoint, commands) = self.active()?;

        // Register before sending so a fast reply cannot outrun its waiter.
        let (reply, response) = oneshot::channel();
        commands
            .send(Command::Register {
                id: id.clone(),
                reply,
            })
            .map_err(|_| TransportError::ConnectionClosed)?;

        debug!(server = %self.server, id = %id, method, "Sending request");
        let request = JsonRpcRequest::new(id.clone(), method, params);
        if let Err(e) = self.post(endpoint, &request).await {
            let _ = commands.send(Command::Cancel(id));
            return Err(e.into());
        }

        match response.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectionClosed.into()),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let (endpoint, _) = self.active()?;
        let notification = JsonRpcNotification::new(method, params);
        self.post(endpoint, &notification).await?;
        Ok(())
    }

    async fn cancel(&self, id: &RequestId) {
        self.send_command(Command::Cancel(id.clone()));
    }

    async fn cancel_all(&self) {
        self.send_command(Command::RejectAll);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
