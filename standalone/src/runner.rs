use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const DEVICE_DIR: &str = "/data/local/tmp/droidwire";
const SERVER_PROCESS: &str = "droidwire-server";

/// Thin wrapper over the `adb` executable.
#[derive(Debug, Clone)]
pub struct Adb {
    path: PathBuf,
}

impl Adb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `--adb` flag, then `DROIDWIRE_ADB`, then `adb` on the `PATH`.
    pub fn locate(flag: Option<PathBuf>) -> Self {
        let path = flag
            .or_else(|| std::env::var_os("DROIDWIRE_ADB").map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("adb"));
        Self::new(path)
    }

    pub fn program(&self) -> &Path {
        &self.path
    }

    pub fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        let mut cmd = Command::new(&self.path);
        cmd.args(args);
        cmd
    }

    fn label(&self, args: &[&str]) -> String {
        format_command(&self.path.to_string_lossy(), args)
    }

    pub fn run(&self, args: &[&str], label: &str) -> Result<()> {
        let status = self
            .command(args)
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("{label}: failed to spawn {}", self.label(args)))?;
        if !status.success() {
            bail!(
                "{}: command failed with status {}: {}",
                label,
                status,
                self.label(args)
            );
        }
        Ok(())
    }

    pub fn output(&self, args: &[&str], label: &str) -> Result<String> {
        let Output { status, stdout, .. } = self
            .command(args)
            .stderr(Stdio::null())
            .output()
            .with_context(|| format!("{label}: failed to spawn {}", self.label(args)))?;
        if !status.success() {
            bail!("{label}: {} failed with status {status}", self.label(args));
        }
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    pub fn shell(&self, serial: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["-s", serial, "shell"];
        full.extend_from_slice(args);
        self.output(&full, "adb shell")
    }

    pub fn getprop(&self, serial: &str, prop: &str) -> Result<String> {
        self.shell(serial, &["getprop", prop])
    }

    pub fn forward(&self, serial: &str, local_port: u16, remote_port: u16) -> Result<()> {
        let local = format!("tcp:{local_port}");
        let remote = format!("tcp:{remote_port}");
        self.run(
            &["-s", serial, "forward", &local, &remote],
            "configure adb forward",
        )
    }

    /// Best effort; a forward that is already gone is fine.
    pub fn remove_forward(&self, serial: &str, local_port: u16) {
        let local = format!("tcp:{local_port}");
        let _ = self
            .command(["-s", serial, "forward", "--remove", &local])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Pushes the device server jar and starts it. The device side detaches
/// itself, so this returns as soon as `app_process` forks.
pub fn start_device_server(adb: &Adb, serial: &str, jar: &Path, device_port: u16) -> Result<()> {
    let _ = adb
        .command(["-s", serial, "shell", "pkill", "-9", "-f", SERVER_PROCESS])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    adb.run(
        &["-s", serial, "shell", &format!("mkdir -p {DEVICE_DIR}")],
        "prepare device",
    )?;

    let remote_jar = format!("{DEVICE_DIR}/droidwire-server.jar");
    let local_jar = jar.to_string_lossy();
    adb.run(&["-s", serial, "push", &local_jar, &remote_jar], "push jar")?;

    adb.run(
        &[
            "-s",
            serial,
            "shell",
            "env",
            &format!("CLASSPATH={remote_jar}"),
            &format!("DROIDWIRE_PORT={device_port}"),
            &format!("DROIDWIRE_LOG={DEVICE_DIR}/droidwire.log"),
            "app_process",
            "/system/bin",
            "com.droidwire.Main",
        ],
        "start device server",
    )?;

    tracing::info!(serial, device_port, "device server started");
    Ok(())
}

pub fn format_command(cmd: &str, args: &[&str]) -> String {
    let mut out = String::from(cmd);
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_commands_for_errors() {
        assert_eq!(
            format_command("adb", &["-s", "abc", "forward", "tcp:1", "tcp:2"]),
            "adb -s abc forward tcp:1 tcp:2"
        );
        assert_eq!(format_command("adb", &[]), "adb");
    }

    #[test]
    fn flag_wins_over_default() {
        let adb = Adb::locate(Some(PathBuf::from("/opt/sdk/adb")));
        assert_eq!(adb.program(), Path::new("/opt/sdk/adb"));
    }

    #[test]
    fn failing_command_reports_label() {
        let adb = Adb::new("false");
        let err = adb.run(&["devices"], "list devices").unwrap_err();
        assert!(err.to_string().starts_with("list devices: command failed"));

        let adb = Adb::new("/nonexistent/adb");
        let err = adb.output(&["devices"], "list devices").unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
