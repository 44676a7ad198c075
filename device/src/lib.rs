use jni::JNIEnv;
use jni::objects::{JClass, JObjectArray};
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::sync::Arc;

mod handlers;
mod screen;
mod state;
mod touch;

#[cfg(test)]
mod fake;

use crate::screen::JniScreen;
use crate::state::DeviceState;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_LOG: &str = "/data/local/tmp/droidwire/droidwire.log";
const INJECTOR_CLASS: &str = "com/droidwire/Injector";

#[derive(Debug, thiserror::Error)]
enum StartError {
    #[error("jni: {0}")]
    Jni(#[from] jni::errors::Error),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        source: std::io::Error,
    },
}

fn io_err(context: &'static str) -> impl FnOnce(std::io::Error) -> StartError {
    move |source| StartError::Io { context, source }
}

fn port() -> u16 {
    std::env::var("DROIDWIRE_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[unsafe(no_mangle)]
pub extern "system" fn Java_com_droidwire_Main_nativeRun(
    mut env: JNIEnv,
    _class: JClass,
    _java_args: JObjectArray,
) {
    let is_daemon = std::env::var("DROIDWIRE_DAEMON").is_ok();

    if !is_daemon {
        // Parent: respawn detached and return so the shell that started us exits.
        let mut cmd = Command::new("app_process");
        cmd.arg0("droidwire-server")
            .args(["/system/bin", "com.droidwire.Main"])
            .env("DROIDWIRE_DAEMON", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
        if let Err(e) = cmd.spawn() {
            eprintln!("droidwire: failed to spawn daemon: {e}");
        }
        return;
    }

    let log_path = std::env::var("DROIDWIRE_LOG").unwrap_or_else(|_| DEFAULT_LOG.to_string());
    match std::fs::File::create(&log_path) {
        Ok(log_file) => tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .init(),
        Err(e) => {
            eprintln!("droidwire: cannot open log {log_path}: {e}");
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .init();
        }
    }

    if let Err(e) = run(&mut env) {
        tracing::error!(error = %e, "device server stopped");
    }
}

fn run(env: &mut JNIEnv) -> Result<(), StartError> {
    let port = port();
    tracing::info!(port, "starting device server");

    let injector_class = env.find_class(INJECTOR_CLASS)?;
    let injector = env.new_object(&injector_class, "()V", &[])?;
    let injector = env.new_global_ref(&injector)?;
    let jvm = env.get_java_vm()?;

    let state = Arc::new(DeviceState::new(Arc::new(JniScreen::new(jvm, injector))));
    let app = wire::http::service(handlers::routes(), state).layer(
        tower_http::compression::CompressionLayer::new()
            .zstd(true)
            .no_br()
            .no_gzip()
            .no_deflate(),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(io_err("build tokio runtime"))?;

    runtime.block_on(async move {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(io_err("bind tcp listener"))?;
        tracing::info!(port, "wire protocol ready");
        axum::serve(listener, app)
            .await
            .map_err(io_err("tcp server failed"))
    })
}
