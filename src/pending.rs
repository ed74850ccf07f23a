//! Pending-request table
//!
//! Correlates responses with the request that produced them. Entries are
//! registered by the command issuer before the request is written and removed
//! either by the reader task (matched response), by the issuer (timeout), or
//! in bulk when the session ends.

use crate::error::{DebugError, Result};
use crate::protocol::Response;
use std::collections::HashMap;
use tokio::sync::{oneshot, Mutex};

/// Receiver side of one outstanding request
pub type ResponseReceiver = oneshot::Receiver<Result<Response>>;

struct PendingRequest {
    command: String,
    result_slot: oneshot::Sender<Result<Response>>,
}

/// Outstanding requests for one session, keyed by sequence number
#[derive(Default)]
pub struct PendingRequests {
    inner: Mutex<HashMap<i64, PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a waiter for `seq`
    ///
    /// Fails if a waiter for the same sequence is already outstanding.
    pub async fn register(&self, seq: i64, command: &str) -> Result<ResponseReceiver> {
        let mut pending = self.inner.lock().await;
        if pending.contains_key(&seq) {
            return Err(DebugError::bad_state(
                command,
                format!("sequence {} already outstanding", seq),
            ));
        }

        let (tx, rx) = oneshot::channel();
        pending.insert(
            seq,
            PendingRequest {
                command: command.to_string(),
                result_slot: tx,
            },
        );
        Ok(rx)
    }

    /// Deliver a response to its waiter
    ///
    /// Returns the command the response answered, or `None` when no waiter
    /// matched `request_seq`.
    pub async fn resolve(&self, response: Response) -> Option<String> {
        self.resolve_with(response, |_, _| {}).await
    }

    /// Deliver a response, running `on_claim` between claiming and waking
    ///
    /// The entry is removed under the table lock, so once `on_claim` runs a
    /// concurrent `cancel` for the same sequence fails. `on_claim` is skipped
    /// for unmatched responses.
    pub async fn resolve_with(
        &self,
        response: Response,
        on_claim: impl FnOnce(&str, &Response),
    ) -> Option<String> {
        let entry = self.inner.lock().await.remove(&response.request_seq)?;
        on_claim(&entry.command, &response);
        // A dropped receiver means the caller gave up; nothing left to notify.
        let _ = entry.result_slot.send(Ok(response));
        Some(entry.command)
    }

    /// Drop the waiter for `seq` without resolving it
    pub async fn cancel(&self, seq: i64) -> bool {
        self.inner.lock().await.remove(&seq).is_some()
    }

    /// Resolve every outstanding waiter with an error produced by `make_err`
    ///
    /// Returns how many waiters were failed.
    pub async fn fail_all(&self, make_err: impl Fn(&str) -> DebugError) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.inner.lock().await;
            pending.drain().map(|(_, entry)| entry).collect()
        };

        let count = drained.len();
        for entry in drained {
            let _ = entry.result_slot.send(Err(make_err(&entry.command)));
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn response_to(seq: i64, command: &str) -> Response {
        Response::success(100 + seq, &Request::new(seq, command, None), None)
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let table = PendingRequests::new();
        let rx = table.register(1, "next").await.unwrap();
        assert_eq!(table.len().await, 1);

        let command = table.resolve(response_to(1, "next")).await;
        assert_eq!(command.as_deref(), Some("next"));
        assert!(table.is_empty().await);

        let response = rx.await.unwrap().unwrap();
        assert_eq!(response.request_seq, 1);
        assert!(response.success);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_rejected() {
        let table = PendingRequests::new();
        let _rx = table.register(4, "threads").await.unwrap();
        let result = table.register(4, "threads").await;
        assert!(matches!(result, Err(DebugError::BadState { .. })));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_unmatched_response_ignored() {
        let table = PendingRequests::new();
        let _rx = table.register(1, "next").await.unwrap();
        assert!(table.resolve(response_to(2, "next")).await.is_none());
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn test_resolution_happens_once() {
        let table = PendingRequests::new();
        let rx = table.register(1, "continue").await.unwrap();
        assert!(table.resolve(response_to(1, "continue")).await.is_some());
        assert!(table.resolve(response_to(1, "continue")).await.is_none());
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_claim_hook_runs_before_waiter_wakes() {
        let table = PendingRequests::new();
        let mut rx = table.register(5, "stepIn").await.unwrap();

        let mut seen = None;
        let command = table
            .resolve_with(response_to(5, "stepIn"), |command, response| {
                seen = Some((command.to_string(), response.success));
            })
            .await;
        assert_eq!(command.as_deref(), Some("stepIn"));
        assert_eq!(seen, Some(("stepIn".to_string(), true)));
        assert!(rx.try_recv().unwrap().is_ok());

        let mut ran = false;
        assert!(table
            .resolve_with(response_to(6, "stepIn"), |_, _| ran = true)
            .await
            .is_none());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_claimed_entry_cannot_be_cancelled() {
        let table = PendingRequests::new();
        let _rx = table.register(8, "next").await.unwrap();
        table.resolve(response_to(8, "next")).await;
        assert!(!table.cancel(8).await);
    }

    #[tokio::test]
    async fn test_cancel_drops_waiter() {
        let table = PendingRequests::new();
        let rx = table.register(9, "stackTrace").await.unwrap();
        assert!(table.cancel(9).await);
        assert!(!table.cancel(9).await);
        assert!(rx.await.is_err());
    }

    #[tokio::test]
    async fn test_fail_all_resolves_every_waiter() {
        let table = PendingRequests::new();
        let rx1 = table.register(1, "stepIn").await.unwrap();
        let rx2 = table.register(2, "threads").await.unwrap();

        let failed = table
            .fail_all(|command| DebugError::Terminated(format!("{} aborted", command)))
            .await;
        assert_eq!(failed, 2);
        assert!(table.is_empty().await);

        match rx1.await.unwrap() {
            Err(DebugError::Terminated(msg)) => assert_eq!(msg, "stepIn aborted"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(rx2.await.unwrap(), Err(DebugError::Terminated(_))));
    }

    #[tokio::test]
    async fn test_resolve_after_receiver_dropped() {
        let table = PendingRequests::new();
        let rx = table.register(3, "scopes").await.unwrap();
        drop(rx);
        assert_eq!(
            table.resolve(response_to(3, "scopes")).await.as_deref(),
            Some("scopes")
        );
    }
}
