//! Terminal handler chain for one registered path.

use std::sync::Arc;

use super::handler::{BoxFuture, Completion, ErrorFn, Next, RequestFn};
use super::layer::{Handle, Layer};
use super::pattern::PatternOptions;
use crate::error::RouteError;
use crate::request::Request;

/// Ordered handlers registered for one path.
///
/// Every handler is wrapped in a layer anchored at `/`; the route itself does
/// no matching, its router already did.
#[derive(Debug, Clone)]
pub struct Route {
    path: String,
    stack: Vec<Layer>,
}

impl Route {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            stack: Vec::new(),
        }
    }

    /// The template this route was registered under.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    fn push(&mut self, handle: Handle) -> &mut Self {
        // "/" always compiles
        if let Ok(layer) = Layer::new("/", PatternOptions::default(), handle) {
            self.stack.push(layer);
        }
        self
    }

    /// Append a request handler.
    pub fn handle<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.push(Handle::Request(Arc::new(f)))
    }

    /// Append an error handler.
    pub fn handle_error<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(RouteError, &'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.push(Handle::Error(Arc::new(f)))
    }

    /// Append already boxed handlers.
    pub fn add(&mut self, handler: Arc<RequestFn>) -> &mut Self {
        self.push(Handle::Request(handler))
    }

    pub fn add_error(&mut self, handler: Arc<ErrorFn>) -> &mut Self {
        self.push(Handle::Error(handler))
    }

    /// Run the chain in order.
    ///
    /// A pending error is offered only to error handlers. [`Next::SkipRoute`]
    /// ends the route with no error so the router can keep searching.
    pub fn dispatch<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Completion> {
        Box::pin(async move {
            let mut pending: Option<RouteError> = None;

            for (idx, layer) in self.stack.iter().enumerate() {
                if idx > 0 {
                    tokio::task::yield_now().await;
                }

                let outcome = match pending.take() {
                    Some(err) => layer.handle_error(err, req).await,
                    None => layer.handle_request(req).await,
                };

                match outcome {
                    Next::Continue => {}
                    Next::Error(err) => pending = Some(err),
                    Next::SkipRoute => return Completion::Done(None),
                    Next::Halt => return Completion::Halted,
                }
            }

            Completion::Done(pending)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterHandle;
    use serde_json::json;

    fn request() -> Request {
        let (reply, _rx) = WriterHandle::channel(4, 0);
        Request::new("k", "/", vec![], reply)
    }

    fn mark(
        tag: &'static str,
    ) -> impl for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static {
        move |req| {
            Box::pin(async move {
                req.load.push(json!(tag));
                Next::Continue
            })
        }
    }

    #[tokio::test]
    async fn test_empty_route_is_done() {
        let route = Route::new("/x");
        let mut req = request();
        assert_eq!(route.dispatch(&mut req).await, Completion::Done(None));
    }

    #[tokio::test]
    async fn test_handlers_run_in_order() {
        let mut route = Route::new("/x");
        route.handle(mark("a")).handle(mark("b"));
        let mut req = request();

        assert_eq!(route.dispatch(&mut req).await, Completion::Done(None));
        assert_eq!(req.load, vec![json!("a"), json!("b")]);
    }

    #[tokio::test]
    async fn test_error_skips_to_error_handler() {
        let mut route = Route::new("/x");
        route
            .handle(|_req| Box::pin(async move { Next::Error(RouteError::new("bad")) }))
            .handle(mark("skipped"))
            .handle_error(|err, req| {
                Box::pin(async move {
                    req.load.push(json!(err.message));
                    Next::Continue
                })
            })
            .handle(mark("after"));
        let mut req = request();

        assert_eq!(route.dispatch(&mut req).await, Completion::Done(None));
        assert_eq!(req.load, vec![json!("bad"), json!("after")]);
    }

    #[tokio::test]
    async fn test_unhandled_error_reaches_done() {
        let mut route = Route::new("/x");
        route
            .handle(|_req| Box::pin(async move { Next::Error(RouteError::new("bad")) }))
            .handle(mark("skipped"));
        let mut req = request();

        match route.dispatch(&mut req).await {
            Completion::Done(Some(e)) => assert_eq!(e.message, "bad"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(req.load.is_empty());
    }

    #[tokio::test]
    async fn test_skip_route_stops_chain() {
        let mut route = Route::new("/x");
        route
            .handle(|_req| Box::pin(async move { Next::SkipRoute }))
            .handle(mark("skipped"));
        let mut req = request();

        assert_eq!(route.dispatch(&mut req).await, Completion::Done(None));
        assert!(req.load.is_empty());
    }

    #[tokio::test]
    async fn test_halt_stops_chain() {
        let mut route = Route::new("/x");
        route
            .handle(|_req| Box::pin(async move { Next::Halt }))
            .handle(mark("skipped"));
        let mut req = request();

        assert_eq!(route.dispatch(&mut req).await, Completion::Halted);
        assert!(req.load.is_empty());
    }
}
