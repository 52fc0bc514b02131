//! Handler signatures and dispatch outcomes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RouteError;
use crate::request::Request;

/// Type alias for boxed futures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What a handler wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// Continue with the next matching handler.
    Continue,
    /// Continue, but only error handlers will see the request.
    Error(RouteError),
    /// Abandon the current route; the router resumes its search after it.
    SkipRoute,
    /// Stop here. The handler has answered, or will answer, the request.
    Halt,
}

impl From<RouteError> for Next {
    fn from(err: RouteError) -> Self {
        Next::Error(err)
    }
}

impl From<Result<(), RouteError>> for Next {
    fn from(result: Result<(), RouteError>) -> Self {
        match result {
            Ok(()) => Next::Continue,
            Err(e) => Next::Error(e),
        }
    }
}

/// How a dispatch through a router or route ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Every candidate handler ran; carries the error still pending, if any.
    Done(Option<RouteError>),
    /// A handler returned [`Next::Halt`].
    Halted,
}

impl From<RouteError> for Completion {
    fn from(err: RouteError) -> Self {
        Completion::Done(Some(err))
    }
}

impl Completion {
    /// View this completion as a handler outcome, for a parent dispatcher.
    pub fn into_next(self) -> Next {
        match self {
            Completion::Done(None) => Next::Continue,
            Completion::Done(Some(e)) => Next::Error(e),
            Completion::Halted => Next::Halt,
        }
    }
}

/// A request handler: `|req| Box::pin(async move { ... })`.
pub type RequestFn = dyn for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync;

/// An error handler, only invoked while an error is pending.
pub type ErrorFn =
    dyn for<'a> Fn(RouteError, &'a mut Request) -> BoxFuture<'a, Next> + Send + Sync;

/// A parameter callback, invoked with the decoded value.
pub type ParamFn = dyn for<'a> Fn(&'a mut Request, String) -> BoxFuture<'a, Next> + Send + Sync;

/// Box a request handler.
///
/// Going through this function lets the compiler infer the higher-ranked
/// closure signature, so `|req| Box::pin(async move { .. })` just works.
pub fn request_fn<F>(f: F) -> Arc<RequestFn>
where
    F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box an error handler.
pub fn error_fn<F>(f: F) -> Arc<ErrorFn>
where
    F: for<'a> Fn(RouteError, &'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a parameter callback.
pub fn param_fn<F>(f: F) -> Arc<ParamFn>
where
    F: for<'a> Fn(&'a mut Request, String) -> BoxFuture<'a, Next> + Send + Sync + 'static,
{
    Arc::new(f)
}
