//! The router: an ordered layer stack with parameter callbacks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::handler::{BoxFuture, Completion, Next, ParamFn};
use super::layer::{guard, Handle, Layer};
use super::params::ParamKey;
use super::pattern::PatternOptions;
use super::route::Route;
use crate::error::{HubError, Result, RouteError};
use crate::request::Request;

/// Router-wide matching options, threaded into every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterOptions {
    /// Literal path text is compared case-sensitively.
    pub case_sensitive: bool,
    /// A trailing slash is significant for routes.
    pub strict: bool,
    /// Merge captured params over the params the request arrived with,
    /// instead of replacing them.
    pub merge_params: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            case_sensitive: true,
            strict: false,
            merge_params: true,
        }
    }
}

/// Memo of one parameter's callbacks within a single dispatch.
struct ParamCall {
    matched: String,
    value: Option<String>,
    outcome: Option<Next>,
}

/// An ordered stack of middleware, mounted routers and routes.
///
/// Dispatch walks the stack from the top. Middleware (`use_*`) matches by
/// prefix and sees the remainder of the path; routes must match the whole
/// path and are skipped while an error is pending.
#[derive(Default)]
pub struct Router {
    options: RouterOptions,
    stack: Vec<Layer>,
    params: HashMap<String, Vec<Arc<ParamFn>>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("options", &self.options)
            .field("stack", &self.stack)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Router {
    pub fn new(options: RouterOptions) -> Self {
        Self {
            options,
            stack: Vec::new(),
            params: HashMap::new(),
        }
    }

    pub fn options(&self) -> RouterOptions {
        self.options
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    fn pattern_options(&self, end: bool) -> PatternOptions {
        PatternOptions {
            case_sensitive: self.options.case_sensitive,
            strict: end && self.options.strict,
            end,
        }
    }

    fn layer(&self, path: &str, end: bool, handle: Handle) -> Result<Layer> {
        Layer::new(path, self.pattern_options(end), handle).map_err(|source| HubError::Pattern {
            template: path.to_string(),
            source,
        })
    }

    /// Mount any handle as middleware under `path`.
    pub fn use_handle(&mut self, path: &str, handle: Handle) -> Result<&mut Self> {
        let layer = self.layer(path, false, handle)?;
        self.stack.push(layer);
        Ok(self)
    }

    /// Mount a request handler as middleware.
    pub fn use_fn<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.use_handle(path, Handle::Request(Arc::new(f)))
    }

    /// Mount an error handler as middleware.
    pub fn use_error<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(RouteError, &'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.use_handle(path, Handle::Error(Arc::new(f)))
    }

    /// Mount a sub-router. It sees paths relative to `path`.
    pub fn use_router(&mut self, path: &str, router: Router) -> Result<&mut Self> {
        self.use_handle(path, Handle::Router(Arc::new(router)))
    }

    /// Register a route for `path` and return it for adding handlers.
    pub fn route(&mut self, path: &str) -> Result<&mut Route> {
        let layer = self.layer(path, true, Handle::Route(Route::new(path)))?;
        self.stack.push(layer);
        self.stack
            .last_mut()
            .and_then(Layer::route_mut)
            .ok_or_else(|| HubError::RouteTable(format!("route {} was not registered", path)))
    }

    /// Register a route with a single handler.
    pub fn add<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.route(path)?.handle(f);
        Ok(self)
    }

    /// Register a callback for a named parameter.
    ///
    /// Callbacks run in registration order before the handler of any layer
    /// that captures `name`, at most once per distinct value per dispatch.
    pub fn param<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Request, String) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.params
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(f));
        self
    }

    /// Dispatch a request through the stack.
    ///
    /// On [`Completion::Done`] the request's `base_path`, `params` and `path`
    /// are restored to what they were on entry, so a parent router can keep
    /// going.
    pub fn handle<'a>(&'a self, req: &'a mut Request) -> BoxFuture<'a, Completion> {
        Box::pin(async move {
            let parent_params = req.params.clone();
            let parent_base = req.base_path.clone();
            let fqdn = !req.path.starts_with('/');

            let mut called: HashMap<String, ParamCall> = HashMap::new();
            let mut idx = 0;
            let mut layer_error: Option<RouteError> = None;
            let mut removed = String::new();
            let mut slash_added = false;
            let mut first = true;

            let completion = loop {
                if !first {
                    tokio::task::yield_now().await;
                }
                first = false;

                // undo the previous layer's trimming
                if slash_added {
                    req.path.remove(0);
                    slash_added = false;
                }
                if !removed.is_empty() {
                    req.base_path = parent_base.clone();
                    req.path = format!("{}{}", removed, req.path);
                    removed.clear();
                }

                let mut found = None;
                while idx < self.stack.len() {
                    let layer = &self.stack[idx];
                    idx += 1;

                    match layer.matches(&req.path) {
                        Err(decode_error) => {
                            if layer_error.is_none() {
                                layer_error = Some(decode_error);
                            }
                        }
                        Ok(None) => {}
                        Ok(Some(_)) if layer.is_route() && layer_error.is_some() => {}
                        Ok(Some(m)) => {
                            found = Some((layer, m));
                            break;
                        }
                    }
                }

                let (layer, m) = match found {
                    Some(hit) => hit,
                    None => break Completion::Done(layer_error.take()),
                };

                tracing::trace!(
                    template = layer.pattern().template(),
                    path = %req.path,
                    "Layer matched"
                );

                req.params = if self.options.merge_params {
                    m.params.merged_over(&parent_params)
                } else {
                    m.params
                };

                match self.process_params(layer, &mut called, req).await {
                    Next::Continue => {}
                    Next::Error(e) => {
                        layer_error = Some(layer_error.take().unwrap_or(e));
                        continue;
                    }
                    Next::SkipRoute => continue,
                    Next::Halt => break Completion::Halted,
                }

                let outcome = if layer.is_route() {
                    layer.handle_request(req).await
                } else {
                    let layer_path = m.path;
                    if !layer_path.is_empty() {
                        let rest = req.path.get(layer_path.len()..).unwrap_or("");
                        if let Some(c) = rest.chars().next() {
                            if c != '/' && c != '.' {
                                continue;
                            }
                        }

                        req.path = rest.to_string();
                        if !fqdn && !req.path.starts_with('/') {
                            req.path.insert(0, '/');
                            slash_added = true;
                        }
                        req.base_path = format!(
                            "{}{}",
                            parent_base,
                            layer_path.strip_suffix('/').unwrap_or(&layer_path)
                        );
                        removed = layer_path;
                    }

                    match layer_error.take() {
                        Some(err) => layer.handle_error(err, req).await,
                        None => layer.handle_request(req).await,
                    }
                };

                match outcome {
                    Next::Continue | Next::SkipRoute => layer_error = None,
                    Next::Error(e) => layer_error = Some(e),
                    Next::Halt => break Completion::Halted,
                }
            };

            if let Completion::Done(_) = completion {
                req.base_path = parent_base;
                req.params = parent_params;
            }

            completion
        })
    }

    /// Run parameter callbacks for the named keys `layer` captured.
    async fn process_params(
        &self,
        layer: &Layer,
        called: &mut HashMap<String, ParamCall>,
        req: &mut Request,
    ) -> Next {
        if self.params.is_empty() {
            return Next::Continue;
        }

        for key in layer.pattern().keys() {
            let name = match key {
                ParamKey::Name(name) => name,
                ParamKey::Index(_) => continue,
            };
            let callbacks = match self.params.get(name) {
                Some(callbacks) if !callbacks.is_empty() => callbacks,
                _ => continue,
            };
            let value = match req.params.get(name.as_str()) {
                Some(value) => value.to_string(),
                None => continue,
            };

            if let Some(prev) = called.get(name) {
                let failed = matches!(prev.outcome, Some(Next::Error(_)));
                if prev.matched == value || failed {
                    req.params.insert(name.as_str(), prev.value.clone());
                    match &prev.outcome {
                        Some(outcome) => return outcome.clone(),
                        None => continue,
                    }
                }
            }

            called.insert(
                name.clone(),
                ParamCall {
                    matched: value.clone(),
                    value: Some(value.clone()),
                    outcome: None,
                },
            );

            for callback in callbacks {
                let (target, arg) = (&mut *req, value.clone());
                let outcome = guard(move || callback(target, arg)).await;

                let current = req.params.get(name.as_str()).map(str::to_string);
                if let Some(memo) = called.get_mut(name) {
                    memo.value = current;
                    if matches!(outcome, Next::Error(_) | Next::SkipRoute) {
                        memo.outcome = Some(outcome.clone());
                    }
                }

                match outcome {
                    Next::Continue => {}
                    other => return other,
                }
            }
        }

        Next::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::WriterHandle;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(path: &str) -> Request {
        let (reply, _rx) = WriterHandle::channel(4, 0);
        Request::new("k", path, vec![], reply)
    }

    fn record(
        tag: &'static str,
    ) -> impl for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static {
        move |req| {
            Box::pin(async move {
                req.load.push(json!(tag));
                Next::Continue
            })
        }
    }

    fn answer(
        tag: &'static str,
    ) -> impl for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static {
        move |req| {
            Box::pin(async move {
                req.load.push(json!(tag));
                Next::Halt
            })
        }
    }

    #[tokio::test]
    async fn test_route_params() {
        let mut router = Router::default();
        router
            .route("numbers/:num")
            .unwrap()
            .handle(|req| {
                Box::pin(async move {
                    let num = req.param("num").map(str::to_string);
                    req.load.push(json!(num));
                    Next::Halt
                })
            });
        let mut req = request("numbers/14");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!("14")]);
    }

    #[tokio::test]
    async fn test_no_match_is_done_without_error() {
        let mut router = Router::default();
        router.add("a", answer("a")).unwrap();
        let mut req = request("b");

        assert_eq!(router.handle(&mut req).await, Completion::Done(None));
        assert!(req.load.is_empty());
    }

    #[tokio::test]
    async fn test_middleware_runs_before_route() {
        let mut router = Router::default();
        router.use_fn("/", record("mw")).unwrap();
        router.add("path", answer("route")).unwrap();
        let mut req = request("path");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!("mw"), json!("route")]);
    }

    #[tokio::test]
    async fn test_error_skips_routes_until_error_handler() {
        let mut router = Router::default();
        router
            .use_fn("/", |_req| {
                Box::pin(async move { Next::Error(RouteError::new("early")) })
            })
            .unwrap();
        router.add("path", answer("route")).unwrap();
        router
            .use_error("/", |err, req| {
                Box::pin(async move {
                    req.load.push(json!(err.message));
                    Next::Halt
                })
            })
            .unwrap();
        let mut req = request("path");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!("early")]);
    }

    #[tokio::test]
    async fn test_unhandled_error_is_returned() {
        let mut router = Router::default();
        router
            .add("path", |_req| {
                Box::pin(async move { Next::Error(RouteError::named("TypeError", "nope")) })
            })
            .unwrap();
        let mut req = request("path");

        match router.handle(&mut req).await {
            Completion::Done(Some(e)) => assert_eq!(e.name, "TypeError"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_skip_route_resumes_search() {
        let mut router = Router::default();
        router
            .route("item/:id")
            .unwrap()
            .handle(|_req| Box::pin(async move { Next::SkipRoute }))
            .handle(answer("never"));
        router.add("item/:id", answer("second")).unwrap();
        let mut req = request("item/1");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!("second")]);
    }

    #[tokio::test]
    async fn test_mounted_router_sees_relative_path() {
        let mut child = Router::default();
        child
            .add("/users/:id", |req| {
                Box::pin(async move {
                    let seen = json!({
                        "path": req.path,
                        "base": req.base_path,
                        "id": req.param("id"),
                    });
                    req.load.push(seen);
                    Next::Halt
                })
            })
            .unwrap();

        let mut parent = Router::default();
        parent.use_router("/api", child).unwrap();
        let mut req = request("/api/users/7");

        assert_eq!(parent.handle(&mut req).await, Completion::Halted);
        assert_eq!(
            req.load,
            vec![json!({"path": "/users/7", "base": "/api", "id": "7"})]
        );
        assert_eq!(req.original_path(), "/api/users/7");
    }

    #[tokio::test]
    async fn test_mounted_router_restores_state_on_fallthrough() {
        let mut child = Router::default();
        child.use_fn("/", record("child")).unwrap();

        let mut parent = Router::default();
        parent.use_router("/api", child).unwrap();
        parent
            .use_fn("/", |req| {
                Box::pin(async move {
                    let seen = json!([req.path, req.base_path]);
                    req.load.push(seen);
                    Next::Continue
                })
            })
            .unwrap();
        let mut req = request("/api/x");

        assert_eq!(parent.handle(&mut req).await, Completion::Done(None));
        assert_eq!(req.load, vec![json!("child"), json!(["/api/x", ""])]);
        assert_eq!(req.path, "/api/x");
        assert_eq!(req.base_path, "");
    }

    #[tokio::test]
    async fn test_prefix_must_end_at_segment() {
        let mut router = Router::default();
        router.use_fn("/api", record("api")).unwrap();
        let mut req = request("/apis");

        assert_eq!(router.handle(&mut req).await, Completion::Done(None));
        assert!(req.load.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_slash_mount_matches_children() {
        let mut router = Router::default();
        router
            .use_fn("/api/", |req| {
                Box::pin(async move {
                    let seen = json!([req.path, req.base_path]);
                    req.load.push(seen);
                    Next::Halt
                })
            })
            .unwrap();
        let mut req = request("/api/users");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!(["/users", "/api"])]);
    }

    #[tokio::test]
    async fn test_params_merge_across_nested_routers() {
        let mut child = Router::default();
        child
            .add("/posts/:post", |req| {
                Box::pin(async move {
                    let seen = json!([req.param("user"), req.param("post")]);
                    req.load.push(seen);
                    Next::Halt
                })
            })
            .unwrap();

        let mut parent = Router::default();
        parent.use_router("/users/:user", child).unwrap();
        let mut req = request("/users/3/posts/9");

        assert_eq!(parent.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!(["3", "9"])]);
    }

    #[tokio::test]
    async fn test_params_replaced_without_merge() {
        let mut child = Router::new(RouterOptions {
            merge_params: false,
            ..RouterOptions::default()
        });
        child
            .add("/posts/:post", |req| {
                Box::pin(async move {
                    let seen = json!([req.param("user"), req.param("post")]);
                    req.load.push(seen);
                    Next::Halt
                })
            })
            .unwrap();

        let mut parent = Router::default();
        parent.use_router("/users/:user", child).unwrap();
        let mut req = request("/users/3/posts/9");

        parent.handle(&mut req).await;
        assert_eq!(req.load, vec![json!([null, "9"])]);
    }

    #[tokio::test]
    async fn test_indexed_params_offset_when_nested() {
        let mut child = Router::default();
        child
            .add("/*", |req| {
                Box::pin(async move {
                    let seen = json!([req.param(0), req.param(1)]);
                    req.load.push(seen);
                    Next::Halt
                })
            })
            .unwrap();

        let mut parent = Router::default();
        parent.use_router("/files/*", child).unwrap();
        let mut req = request("/files/a/b");

        parent.handle(&mut req).await;
        // the parent's wildcard swallowed everything, the child's is empty
        assert_eq!(req.load, vec![json!(["a/b", ""])]);
    }

    #[tokio::test]
    async fn test_param_callback_runs_once_per_value() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::default();
        let counter = calls.clone();
        router.param("id", move |req, value| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                req.load.push(json!(value));
                Next::Continue
            })
        });
        router.add("item/:id", record("first")).unwrap();
        router.add("item/:id", answer("second")).unwrap();
        let mut req = request("item/5");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(req.load, vec![json!("5"), json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn test_param_callback_can_rewrite_value() {
        let mut router = Router::default();
        router.param("name", |req, value| {
            Box::pin(async move {
                req.params.insert("name", Some(value.to_uppercase()));
                Next::Continue
            })
        });
        router.add("hi/:name", record("first")).unwrap();
        router
            .add("hi/:name", |req| {
                Box::pin(async move {
                    let name = req.param("name").map(str::to_string);
                    req.load.push(json!(name));
                    Next::Halt
                })
            })
            .unwrap();
        let mut req = request("hi/bob");

        router.handle(&mut req).await;
        assert_eq!(req.load, vec![json!("first"), json!("BOB")]);
    }

    #[tokio::test]
    async fn test_param_callback_error_replays() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut router = Router::default();
        let counter = calls.clone();
        router.param("id", move |_req, _value| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Next::Error(RouteError::new("bad id"))
            })
        });
        router.add("item/:id", answer("route")).unwrap();
        router.use_fn("item/:id", record("mw")).unwrap();
        let mut req = request("item/5");

        match router.handle(&mut req).await {
            Completion::Done(Some(e)) => assert_eq!(e.message, "bad id"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(req.load.is_empty());
    }

    #[tokio::test]
    async fn test_decode_error_goes_to_error_handler() {
        let mut router = Router::default();
        router.add("greet/:name", answer("route")).unwrap();
        router
            .use_error("/", |err, req| {
                Box::pin(async move {
                    req.load.push(json!(err.name));
                    Next::Halt
                })
            })
            .unwrap();
        let mut req = request("greet/%zz");

        assert_eq!(router.handle(&mut req).await, Completion::Halted);
        assert_eq!(req.load, vec![json!("URIError")]);
    }

    #[tokio::test]
    async fn test_case_sensitive_by_default() {
        let mut router = Router::default();
        router.add("path/callback", answer("hit")).unwrap();
        let mut req = request("PATH/callback");
        assert_eq!(router.handle(&mut req).await, Completion::Done(None));

        let mut router = Router::new(RouterOptions {
            case_sensitive: false,
            ..RouterOptions::default()
        });
        router.add("path/callback", answer("hit")).unwrap();
        let mut req = request("PATH/callback");
        assert_eq!(router.handle(&mut req).await, Completion::Halted);
    }

    #[tokio::test]
    async fn test_handler_panic_is_caught() {
        let mut router = Router::default();
        router.add("boom", |_req| panic!("kaboom")).unwrap();
        let mut req = request("boom");

        match router.handle(&mut req).await {
            Completion::Done(Some(e)) => assert_eq!(e.message, "kaboom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_invalid_custom_capture_is_error() {
        let mut router = Router::default();
        let err = router.route("x/:id((").unwrap_err();
        assert!(matches!(err, HubError::Pattern { .. }));
    }
}
