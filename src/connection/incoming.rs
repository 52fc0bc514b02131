//! Inbound traffic of a child process.

use std::sync::Arc;

use tokio::io::AsyncRead;

use super::requester::Requester;
use super::Role;
use crate::config::TEST_ENV;
use crate::error::{Result, RouteError};
use crate::protocol::MessageKind;
use crate::request::Request;
use crate::router::{Completion, Router};
use crate::transport::MessageReader;

/// Settle a request after its dispatch ended.
///
/// Halted dispatches belong to their handler. A clean completion of a request
/// that was already answered is a ghost and is ignored. A pending error is
/// logged (unless `env` is the test marker) and sent back; an unanswered
/// request gets "Cannot find <path>".
pub async fn finish(req: &Request, completion: Completion, env: &str) {
    let err = match completion {
        Completion::Halted => return,
        Completion::Done(err) => err,
    };

    let err = match err {
        Some(err) => {
            if env != TEST_ENV {
                tracing::error!(key = req.key(), error = %err, "Unhandled error in request");
            }
            err
        }
        None if req.is_sent() => {
            tracing::debug!(key = req.key(), "Ignoring ghost request");
            return;
        }
        None => RouteError::not_found(req.original_path()),
    };

    tracing::debug!(key = req.key(), "Responding with {}", err);
    if let Err(e) = req.send_error(&err).await {
        tracing::warn!(key = req.key(), "Failed to send response: {}", e);
    }
}

/// Read messages until the hub closes the pipe. Each request is routed on
/// its own task; responses go to the requester.
pub(super) async fn serve<R>(
    role: Role,
    router: Option<Router>,
    requester: Requester,
    env: String,
    reader: R,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let router = router.map(Arc::new);
    let env: Arc<str> = env.into();
    let mut messages = MessageReader::new(reader);

    tracing::debug!(role = ?role, "Serving");

    while let Some(message) = messages.next().await? {
        match message.classify() {
            MessageKind::Request => {
                let mut req = match Request::from_message(message, requester.writer().clone()) {
                    Some(req) => req,
                    None => continue,
                };
                tracing::debug!(key = req.key(), path = %req.path, "Got request");

                let router = router.clone();
                let env = env.clone();
                tokio::spawn(async move {
                    let completion = match &router {
                        Some(router) => router.handle(&mut req).await,
                        None => {
                            tracing::debug!("No routes defined");
                            Completion::Done(None)
                        }
                    };
                    finish(&req, completion, &env).await;
                });
            }
            MessageKind::Response => {
                tracing::debug!(key = %message.key, "Got response");
                requester.resolve(message);
            }
        }
    }

    tracing::debug!(role = ?role, "Hub closed the connection");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Decoded, ErrorCodec};
    use crate::writer::WriterHandle;
    use serde_json::json;

    fn request(path: &str) -> (Request, tokio::sync::mpsc::Receiver<crate::writer::OutboundFrame>) {
        let (reply, rx) = WriterHandle::channel(4, 0);
        (Request::new("k", path, vec![], reply), rx)
    }

    fn sent_error(rx: &mut tokio::sync::mpsc::Receiver<crate::writer::OutboundFrame>) -> RouteError {
        let message = rx.try_recv().unwrap().message().unwrap();
        match ErrorCodec::decode(message.load[0].clone()) {
            Decoded::Error(err) => err,
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unanswered_gets_cannot_find() {
        let (mut req, mut rx) = request("priv1/missing");
        req.path = "missing".to_string();

        finish(&req, Completion::Done(None), TEST_ENV).await;

        let err = sent_error(&mut rx);
        assert_eq!(err.message, "Cannot find priv1/missing");
    }

    #[tokio::test]
    async fn test_ghost_is_ignored() {
        let (req, mut rx) = request("a");
        req.send(vec![json!(null)]).await.unwrap();
        let _ = rx.try_recv();

        finish(&req, Completion::Done(None), TEST_ENV).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_error_is_sent() {
        let (req, mut rx) = request("a");
        let err = RouteError::named("TypeError", "bad").with_field("code", "E1");

        finish(&req, Completion::Done(Some(err.clone())), TEST_ENV).await;
        assert_eq!(sent_error(&mut rx), err);
    }

    #[tokio::test]
    async fn test_halted_sends_nothing() {
        let (req, mut rx) = request("a");
        finish(&req, Completion::Halted, TEST_ENV).await;
        assert!(rx.try_recv().is_err());
    }
}
