//! axum front-end for a [`CommandRouter`].

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response as HttpResponse};

use crate::response::Response;
use crate::router::{CommandRouter, CommandState, Verb};

pub const CONTENT_TYPE_JSON: &str = "application/json;charset=UTF-8";

struct Dispatcher<S> {
    router: CommandRouter<S>,
    state: Arc<S>,
}

type AppState<S> = Arc<Dispatcher<S>>;

fn verb(method: &Method) -> Option<Verb> {
    match *method {
        Method::GET => Some(Verb::Get),
        Method::POST => Some(Verb::Post),
        Method::DELETE => Some(Verb::Delete),
        _ => None,
    }
}

pub fn header_map(headers: &HeaderMap) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

impl IntoResponse for Response {
    fn into_response(self) -> HttpResponse {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, CONTENT_TYPE_JSON)],
            self.to_json(),
        )
            .into_response()
    }
}

async fn dispatch<S: CommandState>(
    State(app): State<AppState<S>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let Some(verb) = verb(&method) else {
        tracing::debug!(method = %method, path = uri.path(), "rejecting verb");
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let path = uri.path();
    tracing::debug!(verb = %verb, path, "command");
    app.router
        .dispatch(app.state.clone(), verb, path, header_map(&headers), body)
        .await
        .into_response()
}

/// Serves every request through `router`; axum only does the HTTP framing.
pub fn service<S: CommandState>(router: CommandRouter<S>, state: Arc<S>) -> Router {
    let app: AppState<S> = Arc::new(Dispatcher { router, state });
    Router::new().fallback(dispatch::<S>).with_state(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn maps_protocol_verbs_only() {
        assert_eq!(verb(&Method::GET), Some(Verb::Get));
        assert_eq!(verb(&Method::DELETE), Some(Verb::Delete));
        assert_eq!(verb(&Method::PUT), None);
        assert_eq!(verb(&Method::PATCH), None);
    }

    #[test]
    fn header_names_are_lowercase() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let map = header_map(&headers);
        assert_eq!(map["content-type"], "application/json");
    }
}
