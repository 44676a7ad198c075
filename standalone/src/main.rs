use anyhow::{Context, Result};
use argh::FromArgs;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

use crate::devices::{AdbDeviceFinder, DeviceFinder};
use crate::emulator::EmulatorOptions;
use crate::handlers::{Coordinator, Settings};
use crate::ports::PortAllocator;
use crate::runner::Adb;
use crate::session::SessionRegistry;
use crate::store::DeviceStore;

mod avd;
mod client;
mod devices;
mod emulator;
mod handlers;
mod ports;
mod runner;
mod session;
mod store;

const REAP_INTERVAL: Duration = Duration::from_secs(2);

/// JSON Wire Protocol coordinator for Android devices and emulators
#[derive(FromArgs)]
struct Config {
    /// port the coordinator listens on
    #[argh(option, default = "4444")]
    port: u16,

    /// first emulator console port; 16 even ports from here are used
    #[argh(option, default = "5560")]
    emulator_port: u16,

    /// first local port forwarded to device servers
    #[argh(option, default = "8080")]
    server_port: u16,

    /// port the device server listens on inside the device
    #[argh(option, default = "8080")]
    device_server_port: u16,

    /// seconds a session may stay idle before it is stopped
    #[argh(option, default = "1800")]
    session_timeout: u64,

    /// milliseconds to wait for a device server to answer
    #[argh(option, default = "20000")]
    server_start_timeout: u64,

    /// leave launched emulators running after their session ends
    #[argh(switch)]
    keep_emulator: bool,

    /// app under test offered to sessions, as name:version (repeatable)
    #[argh(option)]
    app: Vec<String>,

    /// AVD that may be launched for sessions (repeatable)
    #[argh(option)]
    avd: Vec<String>,

    /// run emulators without a window
    #[argh(switch)]
    no_window: bool,

    /// emulator executable
    #[argh(option, default = "PathBuf::from(\"emulator\")")]
    emulator: PathBuf,

    /// device server jar pushed before each session
    #[argh(option)]
    device_server_jar: Option<PathBuf>,

    /// adb executable; defaults to $DROIDWIRE_ADB, then adb on the PATH
    #[argh(option)]
    adb: Option<PathBuf>,

    /// log filter, e.g. `info` or `droidwire=debug`; defaults to $RUST_LOG
    #[argh(option)]
    log_level: Option<String>,

    /// shorthand for --log-level debug
    #[argh(switch, short = 'v')]
    verbose: bool,
}

impl Config {
    fn filter(&self) -> EnvFilter {
        let directive = match (&self.log_level, self.verbose) {
            (Some(level), _) => Some(level.clone()),
            (None, true) => Some("debug".to_string()),
            (None, false) => None,
        };
        match directive {
            Some(directive) => EnvFilter::new(directive),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }

    fn settings(&self) -> Settings {
        Settings {
            device_server_port: self.device_server_port,
            device_server_jar: self.device_server_jar.clone(),
            server_start_timeout: Duration::from_millis(self.server_start_timeout),
            session_timeout: Duration::from_secs(self.session_timeout),
            keep_emulator: self.keep_emulator,
            apps: self.app.iter().cloned().collect::<BTreeSet<_>>(),
            emulator: EmulatorOptions {
                binary: self.emulator.clone(),
                no_window: self.no_window,
                ..EmulatorOptions::default()
            },
        }
    }
}

async fn build(config: &Config) -> Result<Arc<Coordinator>> {
    let adb = Adb::locate(config.adb.clone());
    let finder: Arc<dyn DeviceFinder> = Arc::new(AdbDeviceFinder::new(adb.clone()));

    let store = DeviceStore::new(PortAllocator::with_base(config.emulator_port));
    let avd_home = avd::avd_home();
    for name in &config.avd {
        store.add_avd(name, avd::load_avd(avd_home.as_deref(), name));
    }

    let coordinator = Arc::new(Coordinator {
        settings: config.settings(),
        adb,
        finder,
        store,
        forward_ports: PortAllocator::with_base(config.server_port),
        sessions: Mutex::new(SessionRegistry::default()),
        http: reqwest::Client::builder()
            .build()
            .context("build reqwest client")?,
    });

    let scan = coordinator.clone();
    match tokio::task::spawn_blocking(move || scan.store.refresh(scan.finder.as_ref())).await? {
        Ok(()) => {}
        Err(e) => tracing::warn!(error = %e, "device discovery failed, continuing with AVDs only"),
    }
    let devices = coordinator.store.devices();
    tracing::info!(count = devices.len(), "devices available");
    Ok(coordinator)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config: Config = argh::from_env();
    tracing_subscriber::fmt().with_env_filter(config.filter()).init();

    let coordinator = build(&config).await?;

    let reaper = coordinator.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REAP_INTERVAL);
        loop {
            interval.tick().await;
            reaper.reap_idle().await;
        }
    });

    let app = wire::http::service(handlers::routes(), coordinator.clone());
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(port = config.port, "coordinator ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    tracing::info!("shutting down, stopping sessions");
    coordinator.shutdown().await;
    Ok(())
}
