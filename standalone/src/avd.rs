//! What an AVD offers, read from its `config.ini` before it ever boots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::devices::{DeviceDescriptor, DeviceKind};

/// Named emulator skins and their portrait size.
const NAMED_SKINS: [(&str, &str); 9] = [
    ("QVGA", "240x320"),
    ("WQVGA400", "240x400"),
    ("WQVGA432", "240x432"),
    ("HVGA", "320x480"),
    ("WVGA800", "480x800"),
    ("WVGA854", "480x854"),
    ("WXGA", "1280x800"),
    ("WXGA720", "1280x720"),
    ("WXGA800", "1280x800"),
];

/// Where AVD definitions live: `$ANDROID_AVD_HOME`, then
/// `$ANDROID_USER_HOME/avd`, then `~/.android/avd`.
pub fn avd_home() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("ANDROID_AVD_HOME") {
        return Some(PathBuf::from(dir));
    }
    if let Some(dir) = std::env::var_os("ANDROID_USER_HOME") {
        return Some(PathBuf::from(dir).join("avd"));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".android").join("avd"))
}

fn parse_ini(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

/// `WxH` for a skin given by size or by name.
pub fn skin_size(skin: &str) -> Option<String> {
    if let Some((w, h)) = skin.split_once('x') {
        if w.parse::<u32>().is_ok() && h.parse::<u32>().is_ok() {
            return Some(skin.to_string());
        }
    }
    NAMED_SKINS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(skin))
        .map(|(_, size)| size.to_string())
}

/// API level out of `android-33`, `system-images/android-33/google_apis/x86_64/`
/// or `Google Inc.:Google APIs:19`.
fn api_level(value: &str) -> Option<String> {
    let level = value
        .split(['/', ':'])
        .find_map(|part| part.strip_prefix("android-"))
        .or_else(|| value.rsplit(':').next())?;
    level
        .chars()
        .all(|c| c.is_ascii_digit())
        .then(|| level.to_string())
        .filter(|level| !level.is_empty())
}

/// Describes AVD `name` from the text of its `config.ini`. Unknown values
/// stay unset.
pub fn describe_avd(name: &str, config: &str) -> DeviceDescriptor {
    let ini = parse_ini(config);
    let api_level = ["image.sysdir.1", "target"]
        .iter()
        .filter_map(|key| ini.get(key))
        .find_map(|value| api_level(value));
    let screen_size = match (ini.get("hw.lcd.width"), ini.get("hw.lcd.height")) {
        (Some(w), Some(h)) => Some(format!("{w}x{h}")),
        _ => ini.get("skin.name").and_then(|skin| skin_size(skin)),
    };
    DeviceDescriptor {
        serial: name.to_string(),
        kind: DeviceKind::Emulator,
        model: ini.get("hw.device.name").map(|m| m.to_string()),
        api_level,
        screen_size,
    }
}

/// Folder of AVD `name`. The `<name>.ini` pointer file wins over the
/// conventional `<name>.avd` folder next to it.
fn avd_dir(home: &Path, name: &str) -> PathBuf {
    std::fs::read_to_string(home.join(format!("{name}.ini")))
        .ok()
        .and_then(|pointer| parse_ini(&pointer).get("path").map(PathBuf::from))
        .filter(|path| path.is_dir())
        .unwrap_or_else(|| home.join(format!("{name}.avd")))
}

/// Reads and describes AVD `name` under `home`. An unreadable config still
/// yields a descriptor, just without platform or screen.
pub fn load_avd(home: Option<&Path>, name: &str) -> DeviceDescriptor {
    let Some(home) = home else {
        tracing::warn!(avd = name, "no AVD home, capabilities unknown");
        return describe_avd(name, "");
    };
    let config = avd_dir(home, name).join("config.ini");
    match std::fs::read_to_string(&config) {
        Ok(text) => describe_avd(name, &text),
        Err(e) => {
            tracing::warn!(avd = name, path = %config.display(), error = %e, "cannot read AVD config");
            describe_avd(name, "")
        }
    }
}
