//! Path-based middleware routing.
//!
//! A [`Router`] holds an ordered stack of [`Layer`]s. Each layer pairs a
//! compiled [`PathPattern`] with a [`Handle`]: a request handler, an error
//! handler, a mounted sub-router or a terminal [`Route`].
//!
//! Handlers are plain closures returning a boxed future that resolves to a
//! [`Next`] outcome:
//!
//! ```ignore
//! let mut router = Router::default();
//! router.add("numbers/:num", |req| Box::pin(async move {
//!     let num = req.param("num").unwrap_or_default().to_string();
//!     let _ = req.send(vec![Value::Null, num.into()]).await;
//!     Next::Halt
//! }))?;
//! ```

mod handler;
mod layer;
mod params;
mod pattern;
mod route;
mod stack;

pub use handler::{
    error_fn, param_fn, request_fn, BoxFuture, Completion, ErrorFn, Next, ParamFn, RequestFn,
};
pub use layer::{Handle, Layer};
pub use params::{ParamKey, Params};
pub use pattern::{decode_param, PathMatch, PathPattern, PatternOptions};
pub use route::Route;
pub use stack::{Router, RouterOptions};
