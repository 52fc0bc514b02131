//! One entry of a router or route stack: a pattern plus what to run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use super::handler::{BoxFuture, ErrorFn, Next, RequestFn};
use super::pattern::{PathMatch, PathPattern, PatternOptions};
use super::route::Route;
use super::Router;
use crate::error::RouteError;
use crate::request::Request;

/// What a layer runs when it matches.
#[derive(Clone)]
pub enum Handle {
    /// Sees requests with no pending error.
    Request(Arc<RequestFn>),
    /// Sees requests only while an error is pending.
    Error(Arc<ErrorFn>),
    /// A mounted sub-router.
    Router(Arc<Router>),
    /// A terminal route.
    Route(Route),
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handle::Request(_) => f.write_str("Request"),
            Handle::Error(_) => f.write_str("Error"),
            Handle::Router(_) => f.write_str("Router"),
            Handle::Route(r) => write!(f, "Route({})", r.path()),
        }
    }
}

/// A compiled pattern bound to a handle.
#[derive(Debug, Clone)]
pub struct Layer {
    pattern: PathPattern,
    handle: Handle,
}

impl Layer {
    pub fn new(
        path: &str,
        options: PatternOptions,
        handle: Handle,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: PathPattern::compile(path, options)?,
            handle,
        })
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn route_mut(&mut self) -> Option<&mut Route> {
        match &mut self.handle {
            Handle::Route(route) => Some(route),
            _ => None,
        }
    }

    /// Terminal route layers need a full match and are skipped while an
    /// error is pending.
    pub fn is_route(&self) -> bool {
        matches!(self.handle, Handle::Route(_))
    }

    pub fn matches(&self, path: &str) -> Result<Option<PathMatch>, RouteError> {
        self.pattern.matches(path)
    }

    /// Run the layer for a request with no pending error.
    ///
    /// Error handlers are skipped. Panics become [`Next::Error`].
    pub fn handle_request<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Next> {
        Box::pin(async move {
            match &self.handle {
                Handle::Request(f) => guard(move || f(req)).await,
                Handle::Error(_) => Next::Continue,
                Handle::Router(router) => guard(move || router.handle(req)).await.into_next(),
                Handle::Route(route) => guard(move || route.dispatch(req)).await.into_next(),
            }
        })
    }

    /// Run the layer while `err` is pending.
    ///
    /// Only error handlers run; every other kind passes the error on.
    pub fn handle_error<'a>(&'a self, err: RouteError, req: &'a mut Request) -> BoxFuture<'a, Next> {
        Box::pin(async move {
            match &self.handle {
                Handle::Error(f) => guard(move || f(err, req)).await,
                _ => Next::Error(err),
            }
        })
    }
}

/// Call a handler, converting a panic in either its synchronous part or its
/// future into an error outcome.
pub(super) async fn guard<'a, T, F>(call: F) -> T
where
    F: FnOnce() -> BoxFuture<'a, T>,
    T: From<RouteError>,
{
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(fut) => fut,
        Err(payload) => return T::from(RouteError::from_panic(payload)),
    };
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(out) => out,
        Err(payload) => T::from(RouteError::from_panic(payload)),
    }
}
