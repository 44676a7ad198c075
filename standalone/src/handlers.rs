//! Coordinator routes. Session lifecycle is handled here; every other
//! session command is proxied to the device server that owns the session.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use wire::capabilities::AUT;
use wire::{
    Capabilities, CommandError, CommandResult, CommandRouter, CommandState, RequestContext,
    Response, handler,
};

use crate::client::DeviceClient;
use crate::devices::DeviceFinder;
use crate::emulator::{EmulatorOptions, RunningEmulator};
use crate::ports::PortAllocator;
use crate::runner::{Adb, start_device_server};
use crate::session::{ActiveSession, SessionRegistry};
use crate::store::{DeviceStore, Reservation, StoreError};

const SESSION: &str = "/wd/hub/session/:sessionId";

pub struct Settings {
    pub device_server_port: u16,
    pub device_server_jar: Option<PathBuf>,
    pub server_start_timeout: Duration,
    pub session_timeout: Duration,
    pub keep_emulator: bool,
    pub apps: BTreeSet<String>,
    pub emulator: EmulatorOptions,
}

pub struct Coordinator {
    pub settings: Settings,
    pub adb: Adb,
    pub finder: Arc<dyn DeviceFinder>,
    pub store: DeviceStore,
    pub forward_ports: PortAllocator,
    pub sessions: Mutex<SessionRegistry>,
    pub http: reqwest::Client,
}

impl CommandState for Coordinator {}

type State = Arc<Coordinator>;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionRequest {
    #[serde(default)]
    desired_capabilities: Option<Capabilities>,
}

pub fn routes() -> CommandRouter<Coordinator> {
    CommandRouter::new()
        .get("/wd/hub/status", handler(status))
        .post("/wd/hub/session", handler(create_session))
        .get("/wd/hub/sessions", handler(list_sessions))
        .get(SESSION, handler(get_session))
        .delete(SESSION, handler(delete_session))
        .fallback(handler(proxy))
}

async fn status(state: State, _: RequestContext) -> CommandResult {
    let devices = serde_json::to_value(state.store.devices())?;
    Ok(Response::success(
        None,
        json!({
            "build": { "version": env!("CARGO_PKG_VERSION"), "browserName": "droidwire" },
            "os": {
                "arch": std::env::consts::ARCH,
                "name": std::env::consts::OS,
            },
            "supportedApps": state.settings.apps,
            "supportedDevices": devices,
        }),
    ))
}

/// Resolves the app under test against the configured apps. With no apps
/// configured the app is expected to be installed already.
fn resolve_app(desired: Capabilities, apps: &BTreeSet<String>) -> CommandResult<Capabilities> {
    let desired = desired.with_aut_from_browser_name();
    if apps.is_empty() || desired.aut().is_none() {
        return Ok(desired);
    }
    match desired.default_app(apps) {
        Some(app) => Ok(desired.with(AUT, Value::from(app))),
        None => Err(CommandError::SessionNotCreated(format!(
            "the requested application under test is not configured: {}",
            desired.aut().unwrap_or_default()
        ))),
    }
}

async fn create_session(state: State, ctx: RequestContext) -> CommandResult {
    let req: NewSessionRequest = ctx.parse()?;
    let desired = resolve_app(
        req.desired_capabilities.unwrap_or_default(),
        &state.settings.apps,
    )?;

    let scan = state.clone();
    tokio::task::spawn_blocking(move || scan.store.refresh(scan.finder.as_ref()))
        .await
        .map_err(CommandError::failure)??;

    let reservation = state.store.reserve(&desired)?;
    let Some(forward_port) = state.forward_ports.next() else {
        state.store.release(&reservation, state.settings.keep_emulator);
        return Err(StoreError::AllocationExhausted.into());
    };

    let mut emulator = None;
    match state
        .start(&desired, &reservation, forward_port, &mut emulator)
        .await
    {
        Ok((id, capabilities)) => {
            let value = capabilities.to_value();
            let session = ActiveSession::new(
                id.clone(),
                capabilities,
                reservation.clone(),
                reservation.serial(),
                forward_port,
                emulator,
            );
            state.sessions.lock().await.insert(session);
            Ok(Response::success(Some(id), value))
        }
        Err(e) => {
            tracing::warn!(serial = %reservation.serial(), error = %format!("{e:#}"), "session start failed");
            state
                .teardown(reservation, forward_port, emulator)
                .await;
            Err(CommandError::SessionNotCreated(format!("{e:#}")))
        }
    }
}

async fn list_sessions(state: State, _: RequestContext) -> CommandResult {
    Ok(Response::success(None, state.sessions.lock().await.summaries()))
}

async fn get_session(state: State, ctx: RequestContext) -> CommandResult {
    let id = ctx.session_id().unwrap_or_default();
    let mut sessions = state.sessions.lock().await;
    sessions.touch(id);
    let session = sessions
        .get(id)
        .ok_or_else(|| CommandError::NoSuchSession(id.to_string()))?;
    Ok(Response::success(
        Some(session.id.clone()),
        session.capabilities.to_value(),
    ))
}

async fn delete_session(state: State, ctx: RequestContext) -> CommandResult {
    let id = ctx.session_id().unwrap_or_default();
    let session = state
        .sessions
        .lock()
        .await
        .remove(id)
        .ok_or_else(|| CommandError::NoSuchSession(id.to_string()))?;
    state.stop(session).await;
    Ok(Response::success(Some(id.to_string()), Value::Null))
}

/// `/wd/hub/session/<id>/...` paths name the session that owns them.
fn session_in_path(path: &str) -> Option<&str> {
    let mut segments = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some("wd"), Some("hub"), Some("session")) => segments.next(),
        _ => None,
    }
}

async fn proxy(state: State, ctx: RequestContext) -> CommandResult {
    let Some(id) = session_in_path(ctx.path()) else {
        return Err(CommandError::UnknownCommand {
            verb: ctx.verb().to_string(),
            path: ctx.path().to_string(),
        });
    };
    let port = state
        .sessions
        .lock()
        .await
        .touch(id)
        .ok_or_else(|| CommandError::NoSuchSession(id.to_string()))?;
    DeviceClient::new(state.http.clone(), port)
        .forward(ctx.verb(), ctx.path(), ctx.body().clone())
        .await
        .map_err(|e| CommandError::failure(format!("{e:#}")))
}

impl Coordinator {
    /// Boots the reserved device if needed, starts its server and opens the
    /// device session. Returns the device's session id and capabilities.
    async fn start(
        &self,
        desired: &Capabilities,
        reservation: &Reservation,
        forward_port: u16,
        emulator: &mut Option<RunningEmulator>,
    ) -> anyhow::Result<(String, Capabilities)> {
        if let Some(lease) = reservation.avd.as_ref().filter(|lease| !lease.running) {
            let mut launched =
                RunningEmulator::launch(&self.settings.emulator, &lease.name, lease.port).await?;
            let booted = launched
                .wait_for_boot(&self.adb, self.settings.emulator.boot_timeout)
                .await;
            *emulator = Some(launched);
            booted?;
        }

        let adb = self.adb.clone();
        let serial = reservation.serial();
        let jar = self.settings.device_server_jar.clone();
        let device_port = self.settings.device_server_port;
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            if let Some(jar) = jar {
                start_device_server(&adb, &serial, &jar, device_port)?;
            }
            adb.forward(&serial, forward_port, device_port)
        })
        .await??;

        let client = DeviceClient::new(self.http.clone(), forward_port);
        client
            .wait_until_ready(self.settings.server_start_timeout)
            .await?;
        let response = client.create_session(desired).await?;
        if !response.status.is_success() {
            bail!("device refused the session: {}", response.value);
        }
        let id = response
            .session_id
            .context("device server returned no session id")?;
        let capabilities =
            Capabilities::from_value(response.value).unwrap_or_else(|| desired.clone());
        Ok((id, capabilities))
    }

    /// Ends a registered session on the device and frees what it held.
    pub async fn stop(&self, session: ActiveSession) {
        let client = DeviceClient::new(self.http.clone(), session.forward_port);
        if let Err(e) = client.delete_session(&session.id).await {
            tracing::warn!(session_id = %session.id, error = %format!("{e:#}"), "device did not end session");
        }
        tracing::info!(session_id = %session.id, "session stopped");
        self.teardown(session.reservation, session.forward_port, session.emulator)
            .await;
    }

    async fn teardown(
        &self,
        reservation: Reservation,
        forward_port: u16,
        emulator: Option<RunningEmulator>,
    ) {
        let adb = self.adb.clone();
        let serial = reservation.serial();
        if let Err(e) =
            tokio::task::spawn_blocking(move || adb.remove_forward(&serial, forward_port)).await
        {
            tracing::warn!(error = %e, "removing adb forward failed");
        }
        self.forward_ports.release(forward_port);

        let keep = self.settings.keep_emulator;
        if let Some(emulator) = emulator {
            if !keep {
                emulator.kill().await;
            }
        }
        self.store.release(&reservation, keep);
    }

    /// Stops every session idle past the configured timeout.
    pub async fn reap_idle(&self) {
        let expired = self
            .sessions
            .lock()
            .await
            .take_expired(self.settings.session_timeout);
        for session in expired {
            tracing::info!(session_id = %session.id, "session timed out");
            self.stop(session).await;
        }
    }

    pub async fn shutdown(&self) {
        let sessions = self.sessions.lock().await.drain();
        for session in sessions {
            self.stop(session).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceDescriptor, DeviceDiscoveryError};
    use axum::body::Bytes;
    use std::collections::BTreeMap;
    use wire::{Status, Verb};

    struct NoDevices;

    impl DeviceFinder for NoDevices {
        fn find_connected_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceDiscoveryError> {
            Ok(Vec::new())
        }
    }

    struct BrokenAdb;

    impl DeviceFinder for BrokenAdb {
        fn find_connected_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceDiscoveryError> {
            Err(DeviceDiscoveryError::Spawn {
                command: "adb devices -l".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        }
    }

    fn coordinator(finder: Arc<dyn DeviceFinder>) -> State {
        Arc::new(Coordinator {
            settings: Settings {
                device_server_port: 8080,
                device_server_jar: None,
                server_start_timeout: Duration::from_secs(1),
                session_timeout: Duration::from_secs(1800),
                keep_emulator: false,
                apps: BTreeSet::from(["io.demo:1.0".to_string(), "io.demo:2.0".to_string()]),
                emulator: EmulatorOptions::default(),
            },
            adb: Adb::new("/nonexistent/adb"),
            finder,
            store: DeviceStore::new(PortAllocator::with_base(5560)),
            forward_ports: PortAllocator::with_base(8080),
            sessions: Mutex::new(SessionRegistry::default()),
            http: reqwest::Client::new(),
        })
    }

    async fn call(state: &State, verb: Verb, path: &str, body: Value) -> Response {
        let body = if body.is_null() {
            Bytes::new()
        } else {
            Bytes::from(body.to_string())
        };
        routes()
            .dispatch(state.clone(), verb, path, BTreeMap::new(), body)
            .await
    }

    #[tokio::test]
    async fn status_lists_apps() {
        let state = coordinator(Arc::new(NoDevices));
        let resp = call(&state, Verb::Get, "/wd/hub/status", Value::Null).await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.value["supportedApps"], json!(["io.demo:1.0", "io.demo:2.0"]));
        assert_eq!(resp.value["supportedDevices"], json!([]));
    }

    #[tokio::test]
    async fn no_device_fails_session_creation() {
        let state = coordinator(Arc::new(NoDevices));
        let resp = call(
            &state,
            Verb::Post,
            "/wd/hub/session",
            json!({"desiredCapabilities": {"aut": "io.demo"}}),
        )
        .await;
        assert_eq!(resp.status, Status::SessionNotCreated);
        assert_eq!(resp.session_id, None);
        assert!(resp.value["message"].as_str().unwrap().starts_with("No devices are found"));
        assert_eq!(state.forward_ports.next(), Some(8080));
    }

    #[tokio::test]
    async fn discovery_failure_fails_session_creation() {
        let state = coordinator(Arc::new(BrokenAdb));
        let resp = call(&state, Verb::Post, "/wd/hub/session", json!({})).await;
        assert_eq!(resp.status, Status::SessionNotCreated);
    }

    #[tokio::test]
    async fn unconfigured_app_is_refused() {
        let state = coordinator(Arc::new(NoDevices));
        let resp = call(
            &state,
            Verb::Post,
            "/wd/hub/session",
            json!({"desiredCapabilities": {"aut": "io.other:1.0"}}),
        )
        .await;
        assert_eq!(resp.status, Status::SessionNotCreated);
        assert!(resp.value["message"].as_str().unwrap().contains("io.other:1.0"));
    }

    #[test]
    fn resolves_default_app_version() {
        let apps = BTreeSet::from(["io.demo:1.0".to_string(), "io.demo:2.0".to_string()]);
        let caps = Capabilities::from_value(json!({"browserName": "io.demo"})).unwrap();
        let resolved = resolve_app(caps, &apps).unwrap();
        assert_eq!(resolved.aut(), Some("io.demo:2.0"));

        let caps = Capabilities::from_value(json!({"aut": "anything"})).unwrap();
        assert_eq!(resolve_app(caps, &BTreeSet::new()).unwrap().aut(), Some("anything"));
    }

    #[tokio::test]
    async fn unknown_sessions_answer_no_such_driver() {
        let state = coordinator(Arc::new(NoDevices));
        for (verb, path) in [
            (Verb::Get, "/wd/hub/session/nope"),
            (Verb::Delete, "/wd/hub/session/nope"),
            (Verb::Post, "/wd/hub/session/nope/touch/click"),
            (Verb::Get, "/wd/hub/session/nope/element/1/location"),
        ] {
            let resp = call(&state, verb, path, Value::Null).await;
            assert_eq!(resp.status, Status::NoSuchDriver, "{verb} {path}");
        }
    }

    #[tokio::test]
    async fn non_session_paths_are_unknown_commands() {
        let state = coordinator(Arc::new(NoDevices));
        let resp = call(&state, Verb::Get, "/wd/hub/nothing", Value::Null).await;
        assert_eq!(resp.status, Status::UnknownCommand);
        assert_eq!(resp.session_id, None);
    }

    #[test]
    fn finds_session_in_path() {
        assert_eq!(session_in_path("/wd/hub/session/abc/url"), Some("abc"));
        assert_eq!(session_in_path("/wd/hub/session/abc/"), Some("abc"));
        assert_eq!(session_in_path("/wd/hub/status"), None);
        assert_eq!(session_in_path("/other/hub/session/abc"), None);
    }

    struct FakeDevice;

    impl CommandState for FakeDevice {}

    async fn echo(_: Arc<FakeDevice>, ctx: RequestContext) -> CommandResult {
        Ok(Response::success(
            ctx.session_id_owned(),
            json!({ "path": ctx.path(), "body": ctx.payload()? }),
        ))
    }

    async fn fake_device_server() -> u16 {
        let router = CommandRouter::new()
            .post("/wd/hub/session/:sessionId/touch/click", handler(echo))
            .delete(SESSION, handler(echo));
        let app = wire::http::service(router, Arc::new(FakeDevice));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        port
    }

    #[tokio::test]
    async fn proxies_session_commands_and_stops_sessions() {
        let state = coordinator(Arc::new(NoDevices));
        let port = fake_device_server().await;
        state.sessions.lock().await.insert(ActiveSession::new(
            "s1".to_string(),
            Capabilities::from_value(json!({"aut": "io.demo:2.0"})).unwrap(),
            Reservation {
                descriptor: DeviceDescriptor::hardware("hw1"),
                avd: None,
            },
            "hw1".to_string(),
            port,
            None,
        ));

        let resp = call(
            &state,
            Verb::Post,
            "/wd/hub/session/s1/touch/click",
            json!({"element": "btn"}),
        )
        .await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(resp.session_id.as_deref(), Some("s1"));
        assert_eq!(resp.value["body"], json!({"element": "btn"}));

        let resp = call(&state, Verb::Get, "/wd/hub/session/s1", Value::Null).await;
        assert_eq!(resp.value["aut"], "io.demo:2.0");

        let resp = call(&state, Verb::Delete, "/wd/hub/session/s1", Value::Null).await;
        assert_eq!(resp.status, Status::Success);
        assert_eq!(state.sessions.lock().await.len(), 0);
    }

    #[tokio::test]
    async fn sessions_list_starts_empty() {
        let state = coordinator(Arc::new(NoDevices));
        let resp = call(&state, Verb::Get, "/wd/hub/sessions", Value::Null).await;
        assert_eq!(resp.value, json!([]));
    }
}
