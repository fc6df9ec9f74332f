//! Layered settings loading.
//!
//! The compiled defaults are serialized to JSON, the user file is merged
//! over them key by key, and the result is decoded back into
//! [`TetherSettings`]. `TETHER_*` variables are applied last, then the
//! whole thing is validated.
//!
//! In the file, nested objects merge recursively, arrays and scalars
//! replace the default wholesale, and `null` keeps the default.

use std::io;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::TetherSettings;

/// `~/.tether/settings.json`.
pub fn settings_path() -> PathBuf {
    std::env::var_os("HOME")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from)
        .join(".tether")
        .join("settings.json")
}

/// Load from [`settings_path`].
///
/// # Errors
///
/// See [`load_settings_from_path`].
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path`, falling back to defaults when it does not exist, and
/// apply environment overrides.
///
/// # Errors
///
/// Fails when the file is unreadable or not JSON, when the merged document
/// does not decode, or when [`TetherSettings::validate`] rejects a value.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    let mut settings = read_layered(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_layered(path: &Path) -> Result<TetherSettings> {
    let mut layered = serde_json::to_value(TetherSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(raw) => {
            let overlay: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            debug!(path = %path.display(), "merging settings file");
            merge_json(&mut layered, overlay);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
        }
        Err(source) => {
            return Err(SettingsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    }
    Ok(serde_json::from_value(layered)?)
}

/// Merge `overlay` into `base` in place.
pub fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None if value.is_null() => {}
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `TETHER_*` variables from the process environment.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides_from(settings, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`.
///
/// Values are parsed strictly. A value that does not parse or is out of
/// range is logged and skipped.
pub fn apply_overrides_from(
    settings: &mut TetherSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let env = Overrides { lookup };

    let server = &mut settings.server;
    if let Some(url) = env.text("TETHER_WS_URL") {
        server.ws_url = url;
    }
    if let Some(url) = env.text("TETHER_HTTP_URL") {
        server.http_url = url;
    }
    if let Some(id) = env.text("TETHER_DEFAULT_SESSION") {
        server.default_session = id;
    }

    let conn = &mut settings.connection;
    if let Some(ms) = env.number("TETHER_HEARTBEAT_INTERVAL_MS", 1_000..=600_000) {
        conn.heartbeat_interval_ms = ms;
    }
    if let Some(ms) = env.number("TETHER_PONG_GRACE_MS", 100..=120_000) {
        conn.pong_grace_ms = ms;
    }
    if let Some(ms) = env.number("TETHER_CONNECT_TIMEOUT_MS", 100..=120_000) {
        conn.connect_timeout_ms = ms;
    }
    if let Some(ms) = env.number("TETHER_RECONNECT_BASE_DELAY_MS", 1..=60_000) {
        conn.reconnect.base_delay_ms = ms;
    }
    if let Some(ms) = env.number("TETHER_RECONNECT_MAX_DELAY_MS", 1..=600_000) {
        conn.reconnect.max_delay_ms = ms;
    }
    if let Some(n) = env.number("TETHER_RECONNECT_MAX_ATTEMPTS", 0..=1_000) {
        conn.reconnect.max_attempts = n;
    }

    if let Some(n) = env.number("TETHER_DEDUPE_WINDOW", 1..=1_000_000) {
        settings.sync.dedupe_window = n;
    }
    if let Some(on) = env.flag("TETHER_RESYNC_ON_PROVIDER_SWITCH") {
        settings.sync.resync_on_provider_switch = on;
    }

    if let Some(level) = env.text("TETHER_LOG_LEVEL") {
        settings.logging.level = level;
    }
    if let Some(on) = env.flag("TETHER_LOG_JSON") {
        settings.logging.json = on;
    }
}

/// `true`/`yes`/`on`/`1` or `false`/`no`/`off`/`0`, any case.
pub fn parse_flag(raw: &str) -> Option<bool> {
    const ON: [&str; 4] = ["true", "yes", "on", "1"];
    const OFF: [&str; 4] = ["false", "no", "off", "0"];
    let lower = raw.to_ascii_lowercase();
    if ON.contains(&lower.as_str()) {
        Some(true)
    } else if OFF.contains(&lower.as_str()) {
        Some(false)
    } else {
        None
    }
}

/// A number inside `range`.
pub fn parse_in_range<T: FromStr + PartialOrd>(raw: &str, range: &RangeInclusive<T>) -> Option<T> {
    raw.parse().ok().filter(|n| range.contains(n))
}

struct Overrides<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Overrides<F> {
    /// Non-empty string value.
    fn text(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.is_empty())
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.checked(key, parse_flag)
    }

    fn number<T: FromStr + PartialOrd>(&self, key: &str, range: RangeInclusive<T>) -> Option<T> {
        self.checked(key, |raw| parse_in_range(raw, &range))
    }

    fn checked<T>(&self, key: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = (self.lookup)(key)?;
        let parsed = parse(raw.trim());
        if parsed.is_none() {
            warn!(key, value = %raw, "ignoring invalid environment override");
        }
        parsed
    }
}
