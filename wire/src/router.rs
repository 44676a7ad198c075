//! Verb + path-pattern routing for wire protocol commands.
//!
//! Patterns use `:name` segments (`/wd/hub/session/:sessionId/element/:id/click`).
//! Matching is a pure function over the route table; the table itself is
//! built once and shared read-only between requests.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{CommandError, CommandResult};
use crate::response::Response;

/// Side-channel key holding the pattern that matched the request.
pub const ROUTE_EXTRA: &str = "route";

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Delete,
}

impl Verb {
    pub fn as_str(self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unsupported verb {0}")]
pub struct UnsupportedVerb(pub String);

impl FromStr for Verb {
    type Err = UnsupportedVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Verb::Get),
            "POST" => Ok(Verb::Post),
            "DELETE" => Ok(Verb::Delete),
            other => Err(UnsupportedVerb(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// Splits a request path into segments, dropping the query string and any
/// leading or trailing slashes.
fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let path = path.trim_matches('/');
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('/').collect()
    }
}

#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    pub fn parse(raw: &str) -> Self {
        let segments = split_path(raw)
            .into_iter()
            .map(|s| match s.strip_prefix(':') {
                Some(name) => Segment::Param(name.to_string()),
                None => Segment::Literal(s.to_string()),
            })
            .collect();
        Self {
            raw: raw.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    fn literal_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count()
    }

    fn matches_segments(&self, path: &[&str]) -> Option<Params> {
        if self.segments.len() != path.len() {
            return None;
        }
        let mut params = Params::new();
        for (segment, actual) in self.segments.iter().zip(path) {
            match segment {
                Segment::Literal(lit) if lit == actual => {}
                Segment::Param(name) if !actual.is_empty() => {
                    params.insert(name.clone(), (*actual).to_string());
                }
                _ => return None,
            }
        }
        Some(params)
    }

    /// Binds the named segments of `path`, or returns `None` when the path
    /// does not fit the pattern.
    pub fn matches(&self, path: &str) -> Option<Params> {
        self.matches_segments(&split_path(path))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.segments == other.segments
    }
}

/// Everything a handler gets to see about one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    verb: Verb,
    path: String,
    params: Params,
    headers: BTreeMap<String, String>,
    body: Bytes,
    extras: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new(verb: Verb, path: &str, headers: BTreeMap<String, String>, body: Bytes) -> Self {
        Self {
            verb,
            path: path.to_string(),
            params: Params::new(),
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v))
                .collect(),
            body,
            extras: HashMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn session_id(&self) -> Option<&str> {
        self.param("sessionId")
    }

    pub fn element_id(&self) -> Option<&str> {
        self.param("id")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn body_is_empty(&self) -> bool {
        self.body.iter().all(u8::is_ascii_whitespace)
    }

    /// The JSON body as a generic document. An empty body reads as `{}`.
    pub fn payload(&self) -> CommandResult<Value> {
        if self.body_is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// The JSON body decoded into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> CommandResult<T> {
        if self.body_is_empty() {
            return Ok(serde_json::from_value(Value::Object(Map::new()))?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn insert_extra(&mut self, key: impl Into<String>, value: Value) {
        self.extras.insert(key.into(), value);
    }

    pub fn extra(&self, key: &str) -> Option<&Value> {
        self.extras.get(key)
    }

    pub fn session_id_owned(&self) -> Option<String> {
        self.session_id().map(str::to_owned)
    }
}

/// Shared state the router hands to every handler.
pub trait CommandState: Send + Sync + 'static {
    /// Whether a modal alert is blocking the session addressed by `ctx`.
    fn alert_open(&self, _ctx: &RequestContext) -> bool {
        false
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = CommandResult> + Send>>;

type HandlerFn<S> = dyn Fn(Arc<S>, RequestContext) -> HandlerFuture + Send + Sync;

pub struct Handler<S> {
    call: Arc<HandlerFn<S>>,
    alert_safe: bool,
}

impl<S> Clone for Handler<S> {
    fn clone(&self) -> Self {
        Self {
            call: self.call.clone(),
            alert_safe: self.alert_safe,
        }
    }
}

impl<S> Handler<S> {
    /// Lets the handler run while an alert is open.
    pub fn alert_safe(mut self) -> Self {
        self.alert_safe = true;
        self
    }

    pub fn is_alert_safe(&self) -> bool {
        self.alert_safe
    }
}

/// Wraps an `async fn(Arc<S>, RequestContext) -> CommandResult` as a handler.
pub fn handler<S, F, Fut>(f: F) -> Handler<S>
where
    S: Send + Sync + 'static,
    F: Fn(Arc<S>, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CommandResult> + Send + 'static,
{
    Handler {
        call: Arc::new(move |state: Arc<S>, ctx: RequestContext| -> HandlerFuture {
            Box::pin(f(state, ctx))
        }),
        alert_safe: false,
    }
}

struct Route<S> {
    verb: Verb,
    pattern: Pattern,
    handler: Handler<S>,
}

pub struct CommandRouter<S> {
    routes: Vec<Route<S>>,
    fallback: Option<Handler<S>>,
}

impl<S: CommandState> Default for CommandRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CommandState> CommandRouter<S> {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            fallback: None,
        }
    }

    /// Adds a route. Registering the same verb and pattern again replaces
    /// the earlier handler.
    pub fn register(&mut self, verb: Verb, pattern: &str, handler: Handler<S>) {
        let pattern = Pattern::parse(pattern);
        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.verb == verb && r.pattern == pattern)
        {
            existing.pattern = pattern;
            existing.handler = handler;
            return;
        }
        self.routes.push(Route {
            verb,
            pattern,
            handler,
        });
    }

    pub fn route(mut self, verb: Verb, pattern: &str, handler: Handler<S>) -> Self {
        self.register(verb, pattern, handler);
        self
    }

    pub fn get(self, pattern: &str, handler: Handler<S>) -> Self {
        self.route(Verb::Get, pattern, handler)
    }

    pub fn post(self, pattern: &str, handler: Handler<S>) -> Self {
        self.route(Verb::Post, pattern, handler)
    }

    pub fn delete(self, pattern: &str, handler: Handler<S>) -> Self {
        self.route(Verb::Delete, pattern, handler)
    }

    /// Handler for requests no pattern matches. Without one the router
    /// answers with an unknown-command envelope.
    pub fn fallback(mut self, handler: Handler<S>) -> Self {
        self.fallback = Some(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn resolve_segments(&self, verb: Verb, segments: &[&str]) -> Option<(&Route<S>, Params)> {
        let mut best: Option<(&Route<S>, Params)> = None;
        for route in self.routes.iter().filter(|r| r.verb == verb) {
            let Some(params) = route.pattern.matches_segments(segments) else {
                continue;
            };
            let better = best
                .as_ref()
                .is_none_or(|(b, _)| route.pattern.literal_count() > b.pattern.literal_count());
            if better {
                best = Some((route, params));
            }
        }
        best
    }

    /// Finds the pattern serving `verb path` and the parameters it binds.
    pub fn resolve(&self, verb: Verb, path: &str) -> Option<(&str, Params)> {
        self.resolve_segments(verb, &split_path(path))
            .map(|(route, params)| (route.pattern.as_str(), params))
    }

    pub async fn dispatch(
        &self,
        state: Arc<S>,
        verb: Verb,
        path: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> Response {
        let segments = split_path(path);
        let mut ctx = RequestContext::new(verb, path, headers, body);

        let Some((route, params)) = self.resolve_segments(verb, &segments) else {
            return match &self.fallback {
                Some(fallback) => invoke(fallback, state, ctx).await,
                None => {
                    tracing::debug!(verb = %verb, path, "no route for command");
                    Response::unknown_command(verb.as_str(), path)
                }
            };
        };

        ctx.params = params;
        ctx.insert_extra(ROUTE_EXTRA, Value::String(route.pattern.as_str().to_string()));
        invoke(&route.handler, state, ctx).await
    }
}

async fn invoke<S: CommandState>(
    handler: &Handler<S>,
    state: Arc<S>,
    ctx: RequestContext,
) -> Response {
    let session_id = ctx.session_id_owned();
    if !handler.alert_safe && state.alert_open(&ctx) {
        tracing::info!(path = ctx.path(), "refusing command while alert is open");
        return Response::error(session_id, &CommandError::AlertOpen);
    }

    let verb = ctx.verb();
    let path = ctx.path().to_string();
    // Run on its own task so a panicking handler is reported, not propagated.
    match tokio::spawn((handler.call)(state, ctx)).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::warn!(verb = %verb, path, error = %err, "command failed");
            Response::error(session_id, &err)
        }
        Err(join) => {
            let message = if join.is_panic() {
                panic_message(join.into_panic())
            } else {
                "handler was cancelled".to_string()
            };
            tracing::error!(verb = %verb, path, panic = %message, "command handler panicked");
            Response::error(session_id, &CommandError::Failure(message))
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
