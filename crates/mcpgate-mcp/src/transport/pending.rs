//! Outstanding request bookkeeping for multiplexed transports.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::McpError;
use crate::protocol::RequestId;

/// What a waiting request eventually receives.
pub type Reply = Result<Value, McpError>;

/// Maps request ids to the callers waiting on them.
///
/// Each id resolves at most once; resolving, cancelling or rejecting removes
/// the entry.
#[derive(Debug, Default)]
pub struct PendingRequests {
    waiters: HashMap<RequestId, oneshot::Sender<Reply>>,
}

impl PendingRequests {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a waiter created elsewhere. A duplicate id is reported to the
    /// waiter itself and the existing entry is left untouched.
    pub fn insert(&mut self, id: RequestId, waiter: oneshot::Sender<Reply>) -> bool {
        if self.waiters.contains_key(&id) {
            let _ = waiter.send(Err(McpError::DuplicateRequestId(id.to_string())));
            return false;
        }
        self.waiters.insert(id, waiter);
        true
    }

    /// Deliver a reply. Returns false when nobody was waiting on `id`.
    pub fn resolve(&mut self, id: &RequestId, reply: Reply) -> bool {
        match self.waiters.remove(id) {
            // The receiver may be gone if the caller timed out concurrently.
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Stop waiting on `id` without a reply.
    pub fn cancel(&mut self, id: &RequestId) -> bool {
        self.waiters.remove(id).is_some()
    }

    /// Fail every waiter with an error built by `make_error`.
    pub fn reject_all(&mut self, make_error: impl Fn() -> McpError) -> usize {
        let count = self.waiters.len();
        for (_, tx) in self.waiters.drain() {
            let _ = tx.send(Err(make_error()));
        }
        count
    }

    /// Whether `id` is outstanding.
    pub fn contains(&self, id: &RequestId) -> bool {
        self.waiters.contains_key(id)
    }

    /// Number of outstanding requests.
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use serde_json::json;

    fn wait_on(pending: &mut PendingRequests, id: impl Into<RequestId>) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        assert!(pending.insert(id.into(), tx));
        rx
    }

    #[tokio::test]
    async fn test_resolve_delivers_to_matching_waiter() {
        let mut pending = PendingRequests::new();
        let first = wait_on(&mut pending, "1");
        let second = wait_on(&mut pending, "2");

        assert!(pending.resolve(&RequestId::from("2"), Ok(json!("two"))));
        assert!(pending.resolve(&RequestId::from("1"), Ok(json!("one"))));

        assert_eq!(first.await.unwrap().unwrap(), json!("one"));
        assert_eq!(second.await.unwrap().unwrap(), json!("two"));
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let mut pending = PendingRequests::new();
        let _first = wait_on(&mut pending, 7i64);

        let (tx, rx) = oneshot::channel();
        assert!(!pending.insert(RequestId::from(7i64), tx));
        assert!(matches!(
            rx.await.unwrap(),
            Err(McpError::DuplicateRequestId(id)) if id == "7"
        ));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_unmatched_and_cancelled() {
        let mut pending = PendingRequests::new();
        assert!(!pending.resolve(&RequestId::from("9"), Ok(Value::Null)));

        let _rx = wait_on(&mut pending, "3");
        assert!(pending.cancel(&RequestId::from("3")));
        assert!(!pending.resolve(&RequestId::from("3"), Ok(Value::Null)));
    }

    #[tokio::test]
    async fn test_reject_all() {
        let mut pending = PendingRequests::new();
        let rx = wait_on(&mut pending, "1");
        assert_eq!(
            pending.reject_all(|| TransportError::ConnectionClosed.into()),
            1
        );

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.is_connection_lost());
        assert_eq!(pending.len(), 0);
    }
}
