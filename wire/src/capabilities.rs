//! Desired/actual capability sets and the matcher that pairs them.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const AUT: &str = "aut";
pub const BROWSER_NAME: &str = "browserName";
pub const PLATFORM_NAME: &str = "platformName";
pub const PLATFORM_VERSION: &str = "platformVersion";
pub const SCREEN_SIZE: &str = "screenSize";
pub const EMULATOR: &str = "emulator";
pub const LOCALE: &str = "locale";
pub const SERIAL: &str = "serial";
pub const MODEL: &str = "model";
pub const LAUNCH_ACTIVITY: &str = "launchActivity";
pub const AUTOMATION_NAME: &str = "automationName";

/// Keys that take part in node/request matching. Everything else is carried
/// along but ignored by [`matches`].
pub const CONSIDERED_KEYS: [&str; 6] = [
    BROWSER_NAME,
    AUT,
    PLATFORM_NAME,
    SCREEN_SIZE,
    PLATFORM_VERSION,
    EMULATOR,
];

/// An immutable capability set. Well-known keys are typed, the rest live in
/// `extra`. Both round-trip with the JSON type the client sent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct Capabilities {
    aut: Option<String>,
    browser_name: Option<String>,
    platform_name: Option<String>,
    platform_version: Option<String>,
    screen_size: Option<String>,
    emulator: Option<bool>,
    locale: Option<String>,
    serial: Option<String>,
    model: Option<String>,
    launch_activity: Option<String>,
    automation_name: Option<String>,
    extra: Map<String, Value>,
    /// Values of typed keys as received, e.g. `19` for a platform version.
    sent: Map<String, Value>,
}

/// String form used for comparisons. Strings compare by content, other
/// scalars by their JSON text.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        v @ (Value::Number(_) | Value::Bool(_)) => Some(v.to_string()),
        _ => None,
    }
}

/// Only the exact strings `"true"` and `"false"` stand in for a boolean.
fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s == "true" => Some(true),
        Value::String(s) if s == "false" => Some(false),
        _ => None,
    }
}

/// Moves `key` out of `map` when `convert` accepts it, remembering the value
/// as sent. Anything else stays in `map`.
fn take<T>(
    map: &mut Map<String, Value>,
    sent: &mut Map<String, Value>,
    key: &str,
    convert: fn(&Value) -> Option<T>,
) -> Option<T> {
    let typed = convert(map.get(key)?)?;
    if let Some(value) = map.remove(key) {
        sent.insert(key.to_string(), value);
    }
    Some(typed)
}

impl From<Map<String, Value>> for Capabilities {
    fn from(mut map: Map<String, Value>) -> Self {
        let mut sent = Map::new();
        let mut string = |key: &str| take(&mut map, &mut sent, key, as_string);
        let aut = string(AUT);
        let browser_name = string(BROWSER_NAME);
        let platform_name = string(PLATFORM_NAME);
        let platform_version = string(PLATFORM_VERSION);
        let screen_size = string(SCREEN_SIZE);
        let locale = string(LOCALE);
        let serial = string(SERIAL);
        let model = string(MODEL);
        let launch_activity = string(LAUNCH_ACTIVITY);
        let automation_name = string(AUTOMATION_NAME);
        let emulator = take(&mut map, &mut sent, EMULATOR, as_bool);
        Self {
            aut,
            browser_name,
            platform_name,
            platform_version,
            screen_size,
            emulator,
            locale,
            serial,
            model,
            launch_activity,
            automation_name,
            // Explicit nulls carry no information once typed keys are gone.
            extra: map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            sent,
        }
    }
}

impl From<Capabilities> for Map<String, Value> {
    fn from(caps: Capabilities) -> Self {
        let mut sent = caps.sent;
        let mut map = caps.extra;
        let strings = [
            (AUT, caps.aut),
            (BROWSER_NAME, caps.browser_name),
            (PLATFORM_NAME, caps.platform_name),
            (PLATFORM_VERSION, caps.platform_version),
            (SCREEN_SIZE, caps.screen_size),
            (LOCALE, caps.locale),
            (SERIAL, caps.serial),
            (MODEL, caps.model),
            (LAUNCH_ACTIVITY, caps.launch_activity),
            (AUTOMATION_NAME, caps.automation_name),
        ];
        for (key, value) in strings {
            if let Some(value) = value {
                let value = sent.remove(key).unwrap_or(Value::String(value));
                map.insert(key.to_string(), value);
            }
        }
        if let Some(emulator) = caps.emulator {
            let value = sent.remove(EMULATOR).unwrap_or(Value::Bool(emulator));
            map.insert(EMULATOR.to_string(), value);
        }
        map
    }
}

impl Capabilities {
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(map.into()),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.clone().into())
    }

    pub fn aut(&self) -> Option<&str> {
        self.aut.as_deref()
    }

    pub fn browser_name(&self) -> Option<&str> {
        self.browser_name.as_deref()
    }

    pub fn platform_name(&self) -> Option<&str> {
        self.platform_name.as_deref()
    }

    pub fn platform_version(&self) -> Option<&str> {
        self.platform_version.as_deref()
    }

    pub fn screen_size(&self) -> Option<&str> {
        self.screen_size.as_deref()
    }

    pub fn emulator(&self) -> Option<bool> {
        self.emulator
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn launch_activity(&self) -> Option<&str> {
        self.launch_activity.as_deref()
    }

    pub fn automation_name(&self) -> Option<&str> {
        self.automation_name.as_deref()
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// String form of any key, typed or not.
    pub fn get(&self, key: &str) -> Option<String> {
        let typed = match key {
            AUT => self.aut.clone(),
            BROWSER_NAME => self.browser_name.clone(),
            PLATFORM_NAME => self.platform_name.clone(),
            PLATFORM_VERSION => self.platform_version.clone(),
            SCREEN_SIZE => self.screen_size.clone(),
            EMULATOR => self.emulator.map(|b| b.to_string()),
            LOCALE => self.locale.clone(),
            SERIAL => self.serial.clone(),
            MODEL => self.model.clone(),
            LAUNCH_ACTIVITY => self.launch_activity.clone(),
            AUTOMATION_NAME => self.automation_name.clone(),
            _ => None,
        };
        typed.or_else(|| self.extra.get(key).and_then(scalar_string))
    }

    /// Copy of `self` with a single key replaced. `Value::Null` clears it.
    pub fn with(&self, key: &str, value: Value) -> Self {
        let mut map: Map<String, Value> = self.clone().into();
        map.insert(key.to_string(), value);
        map.into()
    }

    /// Requests that only name a browser get the browser as their app.
    pub fn with_aut_from_browser_name(&self) -> Self {
        match (&self.aut, &self.browser_name) {
            (None, Some(browser)) => Self {
                aut: Some(browser.clone()),
                ..self.clone()
            },
            _ => self.clone(),
        }
    }

    /// Union of both sets; keys present in `other` win.
    pub fn merged(&self, other: &Capabilities) -> Self {
        let mut map: Map<String, Value> = self.clone().into();
        map.extend(Map::from(other.clone()));
        map.into()
    }

    /// Picks the app under test among `supported` (`name:version` entries).
    ///
    /// A bare app name selects the highest version on offer; a pinned
    /// `name:version` must be offered verbatim. Requests carrying a launch
    /// activity are taken at their word.
    pub fn default_app(&self, supported: &BTreeSet<String>) -> Option<String> {
        let aut = self.aut.as_deref()?;
        if self.launch_activity.is_some() {
            return Some(aut.to_string());
        }
        if !aut.contains(':') {
            let prefix = format!("{aut}:");
            return supported
                .iter()
                .filter(|app| app.starts_with(&prefix))
                .next_back()
                .cloned();
        }
        supported.contains(aut).then(|| aut.to_string())
    }
}

/// Whether `node` can serve `requested`.
///
/// Only [`CONSIDERED_KEYS`] take part. A requested key that is absent or
/// null places no constraint on the node.
pub fn matches(node: Option<&Capabilities>, requested: Option<&Capabilities>) -> bool {
    let (Some(node), Some(requested)) = (node, requested) else {
        return false;
    };
    CONSIDERED_KEYS.iter().all(|key| match requested.get(key) {
        None => true,
        Some(wanted) => node.get(key).as_deref() == Some(wanted.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn caps(value: Value) -> Capabilities {
        Capabilities::from_value(value).unwrap()
    }

    #[test]
    fn matches_on_considered_keys() {
        let node = caps(json!({"aut": "app1", "platformName": "ANDROID19"}));
        assert!(matches(Some(&node), Some(&caps(json!({"aut": "app1"})))));
        assert!(!matches(Some(&node), Some(&caps(json!({"aut": "app2"})))));
        assert!(matches(Some(&node), Some(&caps(json!({"aut": null})))));
    }

    #[test]
    fn absent_sides_never_match() {
        let node = caps(json!({"aut": "app1"}));
        assert!(!matches(None, Some(&node)));
        assert!(!matches(Some(&node), None));
        assert!(!matches(None, None));
    }

    #[test]
    fn custom_keys_are_ignored() {
        let node = caps(json!({"aut": "app1", "tenant": "a"}));
        let requested = caps(json!({"aut": "app1", "tenant": "b"}));
        assert!(matches(Some(&node), Some(&requested)));
        let requested = caps(json!({"tenant": "a", "aut": "other"}));
        assert!(!matches(Some(&node), Some(&requested)));
    }

    #[test]
    fn values_compare_by_string_form() {
        let node = caps(json!({"platformVersion": "19", "emulator": true}));
        let requested = caps(json!({"platformVersion": 19, "emulator": "true"}));
        assert!(matches(Some(&node), Some(&requested)));

        let requested = caps(json!({"emulator": false}));
        assert!(!matches(Some(&node), Some(&requested)));
    }

    #[test]
    fn missing_node_value_fails_constrained_key() {
        let node = caps(json!({"aut": "app1"}));
        let requested = caps(json!({"screenSize": "320x480"}));
        assert!(!matches(Some(&node), Some(&requested)));
    }

    #[test]
    fn round_trips_unknown_keys() {
        let raw = json!({
            "aut": "io.app:1.0",
            "emulator": false,
            "locale": "de_DE",
            "preSessionAdbCommands": ["shell setprop a b"],
            "tenant": {"id": 3},
        });
        let parsed: Capabilities = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.aut(), Some("io.app:1.0"));
        assert_eq!(parsed.emulator(), Some(false));
        assert_eq!(parsed.extra().len(), 2);
        assert_eq!(serde_json::to_value(&parsed).unwrap(), raw);
    }

    #[test]
    fn unparseable_flags_stay_in_extra() {
        let parsed = caps(json!({"emulator": "maybe"}));
        assert_eq!(parsed.emulator(), None);
        assert_eq!(parsed.get(EMULATOR).as_deref(), Some("maybe"));
    }

    #[test]
    fn typed_keys_keep_their_json_type() {
        let raw = json!({"emulator": "true", "platformVersion": 19, "aut": "io.app:1"});
        let parsed = caps(raw.clone());
        assert_eq!(parsed.platform_version(), Some("19"));
        assert_eq!(parsed.emulator(), Some(true));
        assert_eq!(parsed.to_value(), raw);

        let replaced = parsed.with(PLATFORM_VERSION, json!("21"));
        assert_eq!(replaced.to_value()["platformVersion"], json!("21"));
        assert_eq!(replaced.to_value()["emulator"], json!("true"));
    }

    #[test]
    fn flag_strings_must_be_exact() {
        let parsed = caps(json!({"emulator": "TRUE"}));
        assert_eq!(parsed.emulator(), None);
        let node = caps(json!({"emulator": true}));
        assert!(!matches(Some(&node), Some(&parsed)));
    }

    #[test]
    fn browser_name_fills_missing_aut() {
        let parsed = caps(json!({"browserName": "android"})).with_aut_from_browser_name();
        assert_eq!(parsed.aut(), Some("android"));

        let parsed = caps(json!({"browserName": "android", "aut": "x"})).with_aut_from_browser_name();
        assert_eq!(parsed.aut(), Some("x"));
    }

    #[test]
    fn merged_prefers_other() {
        let base = caps(json!({"aut": "a", "locale": "en"}));
        let merged = base.merged(&caps(json!({"aut": "b", "model": "Pixel"})));
        assert_eq!(merged.aut(), Some("b"));
        assert_eq!(merged.locale(), Some("en"));
        assert_eq!(merged.model(), Some("Pixel"));
    }

    #[test]
    fn default_app_resolution() {
        let supported: BTreeSet<String> = ["io.app:0.9", "io.app:0.10", "io.other:1"]
            .into_iter()
            .map(String::from)
            .collect();

        // Sorted order, so "0.9" sorts after "0.10".
        let bare = caps(json!({"aut": "io.app"}));
        assert_eq!(bare.default_app(&supported).as_deref(), Some("io.app:0.9"));

        let pinned = caps(json!({"aut": "io.app:0.10"}));
        assert_eq!(pinned.default_app(&supported).as_deref(), Some("io.app:0.10"));

        let missing = caps(json!({"aut": "io.app:2.0"}));
        assert_eq!(missing.default_app(&supported), None);

        let launched = caps(json!({"aut": "io.web", "launchActivity": ".Main"}));
        assert_eq!(launched.default_app(&supported).as_deref(), Some("io.web"));

        assert_eq!(caps(json!({})).default_app(&supported), None);
    }
}
