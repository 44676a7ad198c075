//! Discovery of attached Android devices through `adb devices -l`.

use serde::Serialize;
use serde_json::Value;
use wire::Capabilities;
use wire::capabilities::{EMULATOR, MODEL, PLATFORM_NAME, PLATFORM_VERSION, SCREEN_SIZE, SERIAL};

use crate::runner::{Adb, format_command};

/// Serials with this prefix belong to emulators the store launched itself.
pub const EMULATOR_PREFIX: &str = "emulator-";
const PLATFORM: &str = "ANDROID";

#[derive(Debug, thiserror::Error)]
pub enum DeviceDiscoveryError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{command} printed output that is not UTF-8")]
    Encoding { command: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Hardware,
    Emulator,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub serial: String,
    pub kind: DeviceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_size: Option<String>,
}

impl DeviceDescriptor {
    pub fn hardware(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            kind: DeviceKind::Hardware,
            model: None,
            api_level: None,
            screen_size: None,
        }
    }

    pub fn is_emulator(&self) -> bool {
        self.kind == DeviceKind::Emulator
    }

    /// What this device offers, in capability form.
    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::default()
            .with(PLATFORM_NAME, Value::from(PLATFORM))
            .with(EMULATOR, Value::from(self.is_emulator()));
        if !self.is_emulator() {
            caps = caps.with(SERIAL, Value::from(self.serial.as_str()));
        }
        for (key, value) in [
            (MODEL, &self.model),
            (PLATFORM_VERSION, &self.api_level),
            (SCREEN_SIZE, &self.screen_size),
        ] {
            if let Some(value) = value {
                caps = caps.with(key, Value::from(value.as_str()));
            }
        }
        caps
    }
}

/// Serials listed by `adb devices -l`, in output order.
pub fn parse_device_serials(output: &str) -> Vec<String> {
    output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with(EMULATOR_PREFIX))
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// `WxH` out of `wm size` output. An override size wins over the physical one.
pub fn parse_wm_size(output: &str) -> Option<String> {
    let mut physical = None;
    for line in output.lines() {
        let Some((label, size)) = line.split_once(':') else {
            continue;
        };
        let size = size.trim();
        if !size.contains('x') {
            continue;
        }
        match label.trim() {
            "Override size" => return Some(size.to_string()),
            "Physical size" => physical = Some(size.to_string()),
            _ => {}
        }
    }
    physical
}

pub trait DeviceFinder: Send + Sync {
    fn find_connected_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceDiscoveryError>;

    /// Fills in model, API level and screen size. Missing properties stay
    /// unset.
    fn describe(&self, device: DeviceDescriptor) -> DeviceDescriptor {
        device
    }
}

/// Re-runs `adb` on every call; nothing is cached.
pub struct AdbDeviceFinder {
    adb: Adb,
}

impl AdbDeviceFinder {
    pub fn new(adb: Adb) -> Self {
        Self { adb }
    }

    fn property(&self, serial: &str, prop: &str) -> Option<String> {
        match self.adb.getprop(serial, prop) {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(serial, prop, error = %e, "cannot read device property");
                None
            }
        }
    }
}

impl DeviceFinder for AdbDeviceFinder {
    fn find_connected_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceDiscoveryError> {
        let args = ["devices", "-l"];
        let command = format_command(&self.adb.program().to_string_lossy(), &args);
        let output = self
            .adb
            .command(args)
            .output()
            .map_err(|source| DeviceDiscoveryError::Spawn {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(DeviceDiscoveryError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        let stdout =
            String::from_utf8(output.stdout).map_err(|_| DeviceDiscoveryError::Encoding {
                command,
            })?;
        let devices: Vec<_> = parse_device_serials(&stdout)
            .into_iter()
            .map(DeviceDescriptor::hardware)
            .collect();
        tracing::debug!(count = devices.len(), "devices discovered");
        Ok(devices)
    }

    fn describe(&self, mut device: DeviceDescriptor) -> DeviceDescriptor {
        device.model = self.property(&device.serial, "ro.product.model");
        device.api_level = self.property(&device.serial, "ro.build.version.sdk");
        device.screen_size = match self.adb.shell(&device.serial, &["wm", "size"]) {
            Ok(output) => parse_wm_size(&output),
            Err(e) => {
                tracing::warn!(serial = %device.serial, error = %e, "cannot read screen size");
                None
            }
        };
        device
    }
}
