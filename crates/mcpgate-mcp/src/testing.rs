//! In-memory transport and factory used by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use crate::client::{ClientOptions, McpClient, RetryPolicy};
use crate::config::{ServerConfig, ServerDefaults, TransportKind};
use crate::error::{McpError, TransportError};
use crate::factory::ClientFactory;
use crate::protocol::{methods, RequestId};
use crate::transport::{ClientTransport, ConnectionInfo, Reply};

/// How the fake answers one request.
#[derive(Debug, Clone)]
pub(crate) enum ScriptedReply {
    Ok(Value),
    Err(i32, &'static str),
    /// Never answer.
    Hang,
    /// Fail as if the server went away.
    Closed,
}

fn default_reply(method: &str) -> ScriptedReply {
    ScriptedReply::Ok(match method {
        methods::INITIALIZE => json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}, "resources": {}},
            "serverInfo": {"name": "fake", "version": "0.0.1"}
        }),
        methods::TOOLS_LIST => json!({"tools": []}),
        methods::RESOURCES_LIST => json!({"resources": []}),
        methods::TOOLS_CALL => json!({"content": [{"type": "text", "text": "ok"}]}),
        methods::RESOURCES_READ => json!({"contents": []}),
        _ => json!({}),
    })
}

/// Requests parked until the test resolves them.
#[derive(Clone, Default)]
pub(crate) struct DeferredHandle {
    inner: Arc<Mutex<DeferredState>>,
}

#[derive(Default)]
struct DeferredState {
    order: Vec<(RequestId, Value)>,
    waiters: HashMap<RequestId, oneshot::Sender<Reply>>,
}

impl DeferredHandle {
    fn park(&self, id: RequestId, params: Value) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.lock();
        state.order.push((id.clone(), params));
        state.waiters.insert(id, tx);
        rx
    }

    /// Wait until `count` requests are parked.
    pub(crate) async fn wait_for(&self, count: usize) {
        while self.inner.lock().waiters.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Ids of parked requests.
    pub(crate) fn pending_ids(&self) -> Vec<RequestId> {
        self.inner.lock().waiters.keys().cloned().collect()
    }

    /// Parked requests in arrival order, with their params.
    pub(crate) fn take_all(&self) -> Vec<(RequestId, Value)> {
        std::mem::take(&mut self.inner.lock().order)
    }

    /// Answer a parked request.
    pub(crate) fn resolve(&self, id: &RequestId, result: Value) {
        if let Some(tx) = self.inner.lock().waiters.remove(id) {
            let _ = tx.send(Ok(result));
        }
    }
}

/// Scriptable in-memory transport.
pub(crate) struct FakeTransport {
    kind: TransportKind,
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    replies: Mutex<HashMap<String, VecDeque<ScriptedReply>>>,
    connect_calls: Arc<AtomicUsize>,
    disconnect_calls: Arc<AtomicUsize>,
    notifications: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<RequestId>>>,
    deferred: Option<DeferredHandle>,
}

impl FakeTransport {
    pub(crate) fn new(kind: TransportKind) -> Self {
        Self {
            kind,
            connected: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            replies: Mutex::new(HashMap::new()),
            connect_calls: Arc::new(AtomicUsize::new(0)),
            disconnect_calls: Arc::new(AtomicUsize::new(0)),
            notifications: Arc::new(Mutex::new(Vec::new())),
            cancelled: Arc::new(Mutex::new(Vec::new())),
            deferred: None,
        }
    }

    /// Fail the first `count` connection attempts.
    pub(crate) fn fail_connects(self, count: usize) -> Self {
        self.failing_connects.store(count, Ordering::SeqCst);
        self
    }

    /// Queue a reply for `method`. The last queued reply repeats.
    pub(crate) fn reply(self, method: &str, reply: ScriptedReply) -> Self {
        self.replies
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    /// Park every request until resolved through [`DeferredHandle`].
    pub(crate) fn deferred(mut self) -> Self {
        self.deferred = Some(DeferredHandle::default());
        self
    }

    pub(crate) fn deferred_handle(&self) -> DeferredHandle {
        self.deferred.clone().unwrap_or_default()
    }

    pub(crate) fn connect_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.connect_calls)
    }

    pub(crate) fn disconnect_calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.disconnect_calls)
    }

    pub(crate) fn notifications(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.notifications)
    }

    pub(crate) fn cancelled(&self) -> Arc<Mutex<Vec<RequestId>>> {
        Arc::clone(&self.cancelled)
    }

    fn next_reply(&self, method: &str) -> ScriptedReply {
        let mut replies = self.replies.lock();
        match replies.get_mut(method) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| default_reply(method)),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| default_reply(method)),
            None => default_reply(method),
        }
    }
}

#[async_trait]
impl ClientTransport for FakeTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&self) -> Result<ConnectionInfo, TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Handshake("scripted failure".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(ConnectionInfo::default())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn request(
        &self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, McpError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected.into());
        }

        if let Some(deferred) = &self.deferred {
            let rx = deferred.park(id, params.unwrap_or(Value::Null));
            return rx
                .await
                .unwrap_or_else(|_| Err(TransportError::ConnectionClosed.into()));
        }

        match self.next_reply(method) {
            ScriptedReply::Ok(value) => Ok(value),
            ScriptedReply::Err(code, message) => Err(McpError::server_error(code, message)),
            ScriptedReply::Hang => futures::future::pending().await,
            ScriptedReply::Closed => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::ConnectionClosed.into())
            }
        }
    }

    async fn notify(&self, method: &str, _params: Option<Value>) -> Result<(), McpError> {
        self.notifications.lock().push(method.to_string());
        Ok(())
    }

    async fn cancel(&self, id: &RequestId) {
        self.cancelled.lock().push(id.clone());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

type TransportBuilder = Arc<dyn Fn() -> FakeTransport + Send + Sync>;

/// Factory handing out fake transports per server name.
///
/// Unknown servers get a fake that never connects.
#[derive(Clone, Default)]
pub(crate) struct FakeFactory {
    builders: HashMap<String, TransportBuilder>,
    created: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Serve `name` with transports produced by `build`.
    pub(crate) fn server<F>(mut self, name: &str, build: F) -> Self
    where
        F: Fn() -> FakeTransport + Send + Sync + 'static,
    {
        self.builders.insert(name.to_string(), Arc::new(build));
        self
    }

    /// Names of servers a client was created for, in order.
    pub(crate) fn created(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.created)
    }
}

impl ClientFactory for FakeFactory {
    fn create(
        &self,
        server: &ServerConfig,
        defaults: &ServerDefaults,
    ) -> Result<McpClient, McpError> {
        self.created.lock().push(server.name.clone());

        let transport = match self.builders.get(&server.name) {
            Some(build) => build(),
            None => FakeTransport::new(server.transport).fail_connects(usize::MAX),
        };

        let mut options = ClientOptions::from_server(server, defaults);
        options.retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..options.retry
        };
        Ok(McpClient::new(&server.name, Box::new(transport), options))
    }
}

/// Tools response listing `names`.
pub(crate) fn tools(names: &[&str]) -> ScriptedReply {
    ScriptedReply::Ok(json!({
        "tools": names
            .iter()
            .map(|name| json!({"name": name, "description": format!("{} tool", name)}))
            .collect::<Vec<_>>()
    }))
}

/// Resources response listing `uris`.
pub(crate) fn resources(uris: &[&str]) -> ScriptedReply {
    ScriptedReply::Ok(json!({
        "resources": uris
            .iter()
            .map(|uri| json!({"uri": uri, "name": uri}))
            .collect::<Vec<_>>()
    }))
}
