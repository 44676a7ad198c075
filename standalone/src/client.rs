use std::time::Duration;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use reqwest::{Client as ReqwestClient, Method};
use wire::{Capabilities, Response, Verb};

const PROXY_RETRY: Duration = Duration::from_millis(200);
const PROXY_WINDOW: Duration = Duration::from_secs(10);

/// HTTP client for one device server behind a local forward port.
pub struct DeviceClient {
    http: ReqwestClient,
    base: String,
}

impl DeviceClient {
    /// `http` is shared by every session; reqwest clients pool connections.
    pub fn new(http: ReqwestClient, port: u16) -> Self {
        Self {
            http,
            base: format!("http://127.0.0.1:{port}"),
        }
    }

    async fn send(&self, verb: Verb, path: &str, body: Bytes) -> reqwest::Result<Response> {
        self.send_within(verb, path, body, None).await
    }

    async fn send_within(
        &self,
        verb: Verb,
        path: &str,
        body: Bytes,
        timeout: Option<Duration>,
    ) -> reqwest::Result<Response> {
        let method = match verb {
            Verb::Get => Method::GET,
            Verb::Post => Method::POST,
            Verb::Delete => Method::DELETE,
        };
        let mut request = self
            .http
            .request(method, format!("{}{path}", self.base))
            .header(reqwest::header::CONTENT_TYPE, wire::http::CONTENT_TYPE_JSON);
        if !body.is_empty() {
            request = request.body(body);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request.send().await?.json::<Response>().await
    }

    /// Polls `/wd/hub/status` with growing delays until the server answers.
    /// No single poll outlives `timeout`.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Result<()> {
        let started = tokio::time::Instant::now();
        let mut delay_ms = 1u64;
        loop {
            let remaining = timeout.saturating_sub(started.elapsed()).max(Duration::from_millis(1));
            let polled = self
                .send_within(Verb::Get, "/wd/hub/status", Bytes::new(), Some(remaining))
                .await;
            if polled.is_ok() {
                tracing::debug!(elapsed = ?started.elapsed(), "device server ready");
                return Ok(());
            }
            if started.elapsed() >= timeout {
                bail!("device server did not become ready after {timeout:?}");
            }
            delay_ms = (delay_ms * 2).min(1000);
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    pub async fn create_session(&self, desired: &Capabilities) -> Result<Response> {
        let body = serde_json::to_vec(&serde_json::json!({ "desiredCapabilities": desired }))?;
        Ok(self
            .send(Verb::Post, "/wd/hub/session", Bytes::from(body))
            .await?)
    }

    pub async fn delete_session(&self, id: &str) -> Result<Response> {
        Ok(self
            .send(Verb::Delete, &format!("/wd/hub/session/{id}"), Bytes::new())
            .await?)
    }

    /// Forwards a command unchanged. Connection failures are retried while
    /// the device server restarts.
    pub async fn forward(&self, verb: Verb, path: &str, body: Bytes) -> Result<Response> {
        let started = tokio::time::Instant::now();
        loop {
            match self.send(verb, path, body.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && started.elapsed() < PROXY_WINDOW => {
                    tracing::debug!(path, error = %e, "device server unreachable, retrying");
                    tokio::time::sleep(PROXY_RETRY).await;
                }
                Err(e) => return Err(e).with_context(|| format!("proxy {verb} {path}")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use wire::{CommandRouter, CommandState, RequestContext, handler};

    struct Device;

    impl CommandState for Device {}

    async fn status(_: Arc<Device>, _: RequestContext) -> wire::CommandResult {
        Ok(Response::success(None, serde_json::json!({"ready": true})))
    }

    async fn serve() -> u16 {
        let router = CommandRouter::new().get("/wd/hub/status", handler(status));
        let app = wire::http::service(router, Arc::new(Device));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        port
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn reads_envelopes_from_device() {
        let client = DeviceClient::new(ReqwestClient::new(), serve().await);
        client.wait_until_ready(Duration::from_secs(5)).await.unwrap();
        let resp = client
            .forward(Verb::Get, "/wd/hub/nothing", Bytes::new())
            .await
            .unwrap();
        assert_eq!(resp.status, wire::Status::UnknownCommand);
    }

    #[tokio::test]
    async fn gives_up_on_silent_device() {
        let client = DeviceClient::new(ReqwestClient::new(), unused_port());
        let err = client
            .wait_until_ready(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("did not become ready"));
    }

    #[tokio::test]
    async fn gives_up_on_hung_device() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accepts connections and never answers.
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let client = DeviceClient::new(ReqwestClient::new(), port);
        let waited = tokio::time::timeout(
            Duration::from_secs(5),
            client.wait_until_ready(Duration::from_millis(200)),
        )
        .await
        .expect("wait_until_ready ignored its deadline");
        assert!(waited.is_err());
    }
}
