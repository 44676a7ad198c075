//! Launching configured AVDs on a fixed console port.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::process::{Child, Command};

use crate::devices::EMULATOR_PREFIX;
use crate::runner::Adb;

const BOOT_POLL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct EmulatorOptions {
    pub binary: PathBuf,
    pub no_window: bool,
    pub boot_timeout: Duration,
}

impl Default for EmulatorOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("emulator"),
            no_window: false,
            boot_timeout: Duration::from_secs(180),
        }
    }
}

impl EmulatorOptions {
    pub fn args(&self, avd: &str, port: u16) -> Vec<String> {
        let mut args = vec![
            "-avd".to_string(),
            avd.to_string(),
            "-port".to_string(),
            port.to_string(),
            "-no-boot-anim".to_string(),
        ];
        if self.no_window {
            args.push("-no-window".to_string());
        }
        args
    }
}

pub fn serial_for_port(port: u16) -> String {
    format!("{EMULATOR_PREFIX}{port}")
}

/// An emulator process this coordinator started.
pub struct RunningEmulator {
    pub avd: String,
    pub port: u16,
    child: Child,
}

impl RunningEmulator {
    pub fn serial(&self) -> String {
        serial_for_port(self.port)
    }

    pub async fn launch(options: &EmulatorOptions, avd: &str, port: u16) -> Result<Self> {
        let args = options.args(avd, port);
        tracing::info!(avd, port, "launching emulator");
        let child = Command::new(&options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false)
            .spawn()
            .with_context(|| format!("failed to spawn {}", options.binary.display()))?;
        Ok(Self {
            avd: avd.to_string(),
            port,
            child,
        })
    }

    /// Waits until `sys.boot_completed` reads `1`.
    pub async fn wait_for_boot(&mut self, adb: &Adb, timeout: Duration) -> Result<()> {
        let serial = self.serial();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                bail!("emulator {} exited during boot with {status}", self.avd);
            }
            let adb = adb.clone();
            let polled = serial.clone();
            let booted = tokio::task::spawn_blocking(move || {
                adb.getprop(&polled, "sys.boot_completed")
                    .map(|v| v == "1")
                    .unwrap_or(false)
            })
            .await?;
            if booted {
                tracing::info!(serial, "emulator booted");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("emulator {} did not boot within {timeout:?}", self.avd);
            }
            tokio::time::sleep(BOOT_POLL).await;
        }
    }

    pub async fn kill(mut self) {
        match self.child.kill().await {
            Ok(()) => tracing::info!(avd = %self.avd, port = self.port, "emulator stopped"),
            Err(e) => tracing::warn!(avd = %self.avd, error = %e, "failed to stop emulator"),
        }
    }
}
