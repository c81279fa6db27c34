//! Correlation registry: pending requests keyed by correlation id.
//!
//! Every mutation of the table is one short critical section. Completion is
//! at-most-once because only the caller that removes an entry may complete it.

use std::collections::HashMap;
use std::time::Duration;

use deck_core::{BridgeError, RequestId};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome delivered to a waiting caller.
pub type Reply = Result<Value, BridgeError>;

struct PendingRequest {
    action: String,
    created_at: Instant,
    tx: oneshot::Sender<Reply>,
}

/// Receiving half of a registered request. Pass it to
/// [`CorrelationRegistry::wait`].
#[derive(Debug)]
pub struct PendingReply {
    id: RequestId,
    rx: oneshot::Receiver<Reply>,
}

impl PendingReply {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

#[derive(Default)]
pub struct CorrelationRegistry {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending entry. An id that is already pending is rejected and
    /// the existing entry is left untouched.
    pub fn register(&self, id: &RequestId, action: &str) -> Result<PendingReply, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock();
        if pending.contains_key(id.as_str()) {
            return Err(BridgeError::DuplicateRequestId(id.to_string()));
        }
        let _ = pending.insert(
            id.to_string(),
            PendingRequest {
                action: action.to_string(),
                created_at: Instant::now(),
                tx,
            },
        );
        drop(pending);

        debug!(request_id = %id, action, "request registered");
        Ok(PendingReply { id: id.clone(), rx })
    }

    /// Resolve a pending request. Returns `false` if no entry matched, which
    /// covers late replies for requests that already timed out.
    pub fn resolve(&self, id: &str, value: Value) -> bool {
        self.complete(id, Ok(value))
    }

    /// Reject a single pending request.
    pub fn reject(&self, id: &str, err: BridgeError) -> bool {
        self.complete(id, Err(err))
    }

    /// Drop an entry without completing it.
    pub fn expire(&self, id: &str) -> bool {
        self.pending.lock().remove(id).is_some()
    }

    /// Reject every pending request with `err`. Returns how many were rejected.
    pub fn fail_all(&self, err: &BridgeError) -> usize {
        let drained: Vec<(String, PendingRequest)> = self.pending.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            debug!(request_id = %id, action = %entry.action, error = %err, "failing pending request");
            let _ = entry.tx.send(Err(err.clone()));
        }
        count
    }

    pub fn has_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Await the reply for `pending`, or reject it with
    /// [`BridgeError::RequestTimeout`] once `timeout` elapses.
    ///
    /// Dropping the returned future before it finishes removes the entry, so
    /// an abandoned call never pins its id.
    pub async fn wait(&self, pending: PendingReply, timeout: Duration) -> Reply {
        let PendingReply { id, mut rx } = pending;
        let _abandon = ExpireOnDrop {
            registry: self,
            id: &id,
        };
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(BridgeError::Io(format!("pending request {id} was dropped"))),
            Err(_) => {
                if self.expire(id.as_str()) {
                    warn!(request_id = %id, ?timeout, "request timed out");
                    return Err(BridgeError::RequestTimeout {
                        id: id.to_string(),
                        timeout,
                    });
                }
                // Completed between the deadline and the expire call.
                rx.try_recv().unwrap_or_else(|_| {
                    Err(BridgeError::RequestTimeout {
                        id: id.to_string(),
                        timeout,
                    })
                })
            }
        }
    }

    fn complete(&self, id: &str, reply: Reply) -> bool {
        let Some(entry) = self.pending.lock().remove(id) else {
            return false;
        };
        debug!(
            request_id = id,
            action = %entry.action,
            elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
            ok = reply.is_ok(),
            "request completed"
        );
        entry.tx.send(reply).is_ok()
    }
}

/// Removes the entry when a [`CorrelationRegistry::wait`] is cancelled.
/// After a normal completion the entry is already gone and this is a no-op.
struct ExpireOnDrop<'a> {
    registry: &'a CorrelationRegistry,
    id: &'a RequestId,
}

impl Drop for ExpireOnDrop<'_> {
    fn drop(&mut self) {
        if self.registry.expire(self.id.as_str()) {
            debug!(request_id = %self.id, "abandoned request removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn id(s: &str) -> RequestId {
        RequestId::from_raw(s)
    }

    #[test]
    fn new_is_empty() {
        let registry = CorrelationRegistry::new();
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.has_pending("1"));
    }

    #[tokio::test]
    async fn resolve_delivers_value_once() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(&id("1"), "run-agent").unwrap();
        assert!(registry.has_pending("1"));

        assert!(registry.resolve("1", json!({"final_result": "done"})));
        assert!(!registry.resolve("1", json!("again")), "second reply must not resolve");
        assert_eq!(registry.pending_count(), 0);

        let value = registry.wait(pending, Duration::from_secs(1)).await.unwrap();
        assert_eq!(value, json!({"final_result": "done"}));
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = CorrelationRegistry::new();
        let _first = registry.register(&id("dup"), "run-agent").unwrap();
        let err = registry.register(&id("dup"), "get-recordings").unwrap_err();
        assert_eq!(err, BridgeError::DuplicateRequestId("dup".into()));
        assert_eq!(registry.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_late_reply_is_dropped() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(&id("slow"), "get-recordings").unwrap();

        let err = registry
            .wait(pending, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(
            err,
            BridgeError::RequestTimeout {
                id: "slow".into(),
                timeout: Duration::from_secs(10)
            }
        );
        assert!(!registry.has_pending("slow"));
        assert!(!registry.resolve("slow", json!("late")));
    }

    #[tokio::test(start_paused = true)]
    async fn reply_just_before_deadline_wins() {
        let registry = Arc::new(CorrelationRegistry::new());
        let pending = registry.register(&id("edge"), "run-agent").unwrap();

        let resolver = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(9_999)).await;
            resolver.resolve("edge", json!(7));
        });

        let value = registry.wait(pending, Duration::from_secs(10)).await.unwrap();
        assert_eq!(value, json!(7));
    }

    #[tokio::test]
    async fn out_of_order_replies_resolve_independently() {
        let registry = Arc::new(CorrelationRegistry::new());
        let a = registry.register(&id("1"), "run-agent").unwrap();
        let b = registry.register(&id("2"), "get-recordings").unwrap();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();
        for (name, pending) in [("A", a), ("B", b)] {
            let registry = Arc::clone(&registry);
            let order_tx = order_tx.clone();
            tokio::spawn(async move {
                let value = registry.wait(pending, Duration::from_secs(5)).await.unwrap();
                let _ = order_tx.send((name, value));
            });
        }

        assert!(registry.resolve("2", json!("b")));
        assert_eq!(order_rx.recv().await.unwrap(), ("B", json!("b")));
        assert!(registry.resolve("1", json!("a")));
        assert_eq!(order_rx.recv().await.unwrap(), ("A", json!("a")));
    }

    #[tokio::test]
    async fn fail_all_rejects_everything() {
        let registry = CorrelationRegistry::new();
        let a = registry.register(&id("a"), "run-agent").unwrap();
        let b = registry.register(&id("b"), "run-deep-search").unwrap();

        let err = BridgeError::WorkerExited { code: Some(1) };
        assert_eq!(registry.fail_all(&err), 2);
        assert_eq!(registry.pending_count(), 0);

        assert_eq!(registry.wait(a, Duration::from_secs(1)).await.unwrap_err(), err);
        assert_eq!(registry.wait(b, Duration::from_secs(1)).await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn reject_single_request() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(&id("x"), "run-agent").unwrap();
        assert!(registry.reject("x", BridgeError::NotRunning));
        assert!(!registry.reject("x", BridgeError::NotRunning));
        assert_eq!(
            registry.wait(pending, Duration::from_secs(1)).await.unwrap_err(),
            BridgeError::NotRunning
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_wait_frees_the_id() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(&id("42"), "run-agent").unwrap();

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), registry.wait(pending, Duration::from_secs(10)))
                .await;
        assert!(cancelled.is_err());
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.resolve("42", json!("late")));

        let again = registry.register(&id("42"), "run-agent").unwrap();
        assert!(registry.resolve("42", json!("second run")));
        assert_eq!(
            registry.wait(again, Duration::from_secs(10)).await.unwrap(),
            json!("second run")
        );
    }

    #[test]
    fn expire_removes_without_completing() {
        let registry = CorrelationRegistry::new();
        let pending = registry.register(&id("gone"), "run-agent").unwrap();
        assert_eq!(pending.id().as_str(), "gone");
        assert!(registry.expire("gone"));
        assert!(!registry.expire("gone"));
    }
}
