//! Outbound requests and the pending-callback table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::codec::{Decoded, ErrorCodec};
use crate::error::{HubError, Result, RouteError};
use crate::protocol::Message;
use crate::writer::WriterHandle;

type Callback = Box<dyn FnOnce(Reply) + Send>;

/// The answer to an outbound request.
///
/// The first load value is the error slot: `null` on success, an encoded
/// error otherwise. It is decoded on arrival.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    first: Option<Decoded>,
    rest: Vec<Value>,
}

impl Reply {
    /// Decode a response load.
    pub fn from_load(load: Vec<Value>) -> Self {
        let mut values = load.into_iter();
        let first = values.next().map(ErrorCodec::decode);
        Self {
            first,
            rest: values.collect(),
        }
    }

    /// The error the responder reported, if any.
    pub fn error(&self) -> Option<&RouteError> {
        match &self.first {
            Some(Decoded::Error(err)) => Some(err),
            _ => None,
        }
    }

    /// The values after the error slot.
    pub fn values(&self) -> &[Value] {
        &self.rest
    }

    /// The first value, decoded.
    pub fn first(&self) -> Option<&Decoded> {
        self.first.as_ref()
    }

    pub fn into_result(self) -> std::result::Result<Vec<Value>, RouteError> {
        match self.first {
            Some(Decoded::Error(err)) => Err(err),
            _ => Ok(self.rest),
        }
    }
}

/// Callbacks waiting for a response, by correlation key.
///
/// An entry is removed on first resolution, so each callback runs at most
/// once.
#[derive(Default)]
pub struct PendingTable {
    entries: Mutex<HashMap<String, Callback>>,
}

impl std::fmt::Debug for PendingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTable")
            .field("len", &self.len())
            .finish()
    }
}

impl PendingTable {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Callback>> {
        // a panicking callback never runs under the lock, so poison is harmless
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, key: String, callback: Callback) {
        self.lock().insert(key, callback);
    }

    pub fn take(&self, key: &str) -> Option<Callback> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every waiting callback without calling it.
    pub fn clear(&self) {
        let drained: Vec<_> = self.lock().drain().collect();
        drop(drained);
    }
}

/// Sends requests to the hub and routes responses to their callbacks.
#[derive(Debug, Clone)]
pub struct Requester {
    writer: WriterHandle,
    pending: Arc<PendingTable>,
}

impl Requester {
    pub fn new(writer: WriterHandle) -> Self {
        Self {
            writer,
            pending: Arc::new(PendingTable::default()),
        }
    }

    pub(crate) fn writer(&self) -> &WriterHandle {
        &self.writer
    }

    /// Requests still waiting for a response.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Send a request; `callback` runs on its own task when the response
    /// arrives. Returns the correlation key.
    ///
    /// There is no timeout: if the target never answers, the callback never
    /// runs.
    pub async fn request_with<F>(&self, path: &str, load: Vec<Value>, callback: F) -> Result<String>
    where
        F: FnOnce(Reply) + Send + 'static,
    {
        let key = uuid::Uuid::new_v4().to_string();
        self.pending.insert(key.clone(), Box::new(callback));

        let message = Message::request(key.clone(), path, load);
        if let Err(e) = self.writer.send_message(&message).await {
            self.pending.take(&key);
            return Err(e);
        }

        tracing::debug!(key = %key, path, "Sent request");
        Ok(key)
    }

    /// Send a request and wait for its response.
    ///
    /// Fails with [`HubError::ConnectionClosed`] if the connection shuts down
    /// first.
    pub async fn request(&self, path: &str, load: Vec<Value>) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        self.request_with(path, load, move |reply| {
            let _ = tx.send(reply);
        })
        .await?;
        rx.await.map_err(|_| HubError::ConnectionClosed)
    }

    /// Hand a response to its waiting callback.
    pub fn resolve(&self, message: Message) {
        let callback = match self.pending.take(&message.key) {
            Some(callback) => callback,
            None => {
                tracing::warn!(key = %message.key, "Lost response");
                return;
            }
        };

        let reply = Reply::from_load(message.load);
        tokio::spawn(async move { callback(reply) });
    }

    pub(crate) fn close(&self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_decodes_error_slot() {
        let err = RouteError::new("Cannot find x").with_status(404);
        let reply = Reply::from_load(vec![ErrorCodec::encode(&err), json!(1)]);

        assert_eq!(reply.error(), Some(&err));
        assert_eq!(reply.into_result(), Err(err));
    }

    #[test]
    fn test_reply_success() {
        let reply = Reply::from_load(vec![json!(null), json!("pon")]);
        assert!(reply.error().is_none());
        assert_eq!(reply.first(), Some(&Decoded::Value(json!(null))));
        assert_eq!(reply.into_result(), Ok(vec![json!("pon")]));

        assert_eq!(Reply::from_load(vec![]).into_result(), Ok(vec![]));
    }

    #[tokio::test]
    async fn test_request_roundtrip() {
        let (writer, mut rx) = WriterHandle::channel(4, 0);
        let requester = Requester::new(writer);

        let waiting = {
            let requester = requester.clone();
            tokio::spawn(async move { requester.request("priv1/path", vec![json!(1)]).await })
        };

        let sent = rx.recv().await.unwrap().message().unwrap();
        assert_eq!(sent.path.as_deref(), Some("priv1/path"));
        assert_eq!(requester.pending(), 1);

        requester.resolve(Message::response(sent.key, None, vec![json!(null), json!("pon")]));
        let reply = waiting.await.unwrap().unwrap();

        assert_eq!(reply.values(), &[json!("pon")]);
        assert_eq!(requester.pending(), 0);
    }

    #[tokio::test]
    async fn test_resolve_runs_callback_once() {
        let (writer, mut rx) = WriterHandle::channel(4, 0);
        let requester = Requester::new(writer);
        let (tx, mut calls) = tokio::sync::mpsc::unbounded_channel();

        let key = requester
            .request_with("a", vec![], move |reply| {
                let _ = tx.send(reply);
            })
            .await
            .unwrap();
        let _ = rx.recv().await;

        requester.resolve(Message::response(key.clone(), None, vec![json!(null)]));
        requester.resolve(Message::response(key, None, vec![json!(null)]));

        assert!(calls.recv().await.is_some());
        assert!(calls.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_close_fails_waiters() {
        let (writer, _rx) = WriterHandle::channel(4, 0);
        let requester = Requester::new(writer);

        let waiting = {
            let requester = requester.clone();
            tokio::spawn(async move { requester.request("a", vec![]).await })
        };
        while requester.pending() == 0 {
            tokio::task::yield_now().await;
        }
        requester.close();

        assert!(matches!(
            waiting.await.unwrap(),
            Err(HubError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_send_failure_removes_entry() {
        let (writer, rx) = WriterHandle::channel(4, 0);
        drop(rx);
        let requester = Requester::new(writer);

        let result = requester.request_with("a", vec![], |_reply| {}).await;
        assert!(matches!(result, Err(HubError::ConnectionClosed)));
        assert_eq!(requester.pending(), 0);
    }
}
