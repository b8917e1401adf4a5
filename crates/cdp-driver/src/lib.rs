//! Chromium DevTools Protocol driver adapter.
//!
//! This crate wraps the chromiumoxide connection behind a small command/event
//! surface: launch presets, executable discovery, a pluggable transport, and a
//! driver object whose page operations are thin forwarders onto CDP commands.

pub mod commands;
pub mod driver;
pub mod metrics;
pub mod options;
pub mod registry;
pub mod transport;
pub mod util;

use std::{env, path::PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use which::which;

pub use commands::{Anchor, CookieParam, KeyPress, QueryScope, QuerySpec, WaitGate};
pub use driver::{Cdp, CdpDriver, EventBus};
pub use error::{DriverError, DriverErrorKind};
pub use events::RawEvent;
pub use options::{LaunchOptions, OptionsPreset, PageLoadStrategy};

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Unique identifier for the browser instance managed by the driver.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct BrowserId(pub Uuid);

    /// Unique identifier for a page/tab.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    /// Unique identifier for a CDP session.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct SessionId(pub Uuid);

    impl BrowserId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl SessionId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for BrowserId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Default for SessionId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub mod error {
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use thiserror::Error;

    /// High-level error categories surfaced by the driver.
    #[derive(Clone, Debug, Error, Serialize, Deserialize)]
    pub enum DriverErrorKind {
        #[error("navigation timed out")]
        NavTimeout,
        #[error("cdp i/o failure")]
        CdpIo,
        #[error("target element not found")]
        TargetNotFound,
        #[error("resource body unavailable")]
        BodyUnavailable,
        #[error("internal error")]
        Internal,
    }

    /// Enriched error metadata passed back to callers.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct DriverError {
        pub kind: DriverErrorKind,
        pub hint: Option<String>,
        pub retriable: bool,
        pub data: Option<serde_json::Value>,
    }

    impl fmt::Display for DriverError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.kind)?;
            if let Some(hint) = &self.hint {
                write!(f, ": {}", hint)?;
            }
            Ok(())
        }
    }

    impl std::error::Error for DriverError {}

    impl DriverError {
        pub fn new(kind: DriverErrorKind) -> Self {
            Self {
                kind,
                hint: None,
                retriable: false,
                data: None,
            }
        }

        pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
            self.hint = Some(hint.into());
            self
        }

        pub fn retriable(mut self, flag: bool) -> Self {
            self.retriable = flag;
            self
        }

        pub fn with_data(mut self, data: serde_json::Value) -> Self {
            self.data = Some(data);
            self
        }
    }
}

pub mod events {
    use super::ids::PageId;
    use serde::{Deserialize, Serialize};

    /// Raw events emitted by the driver on its broadcast bus.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub enum RawEvent {
        PageLifecycle {
            page: PageId,
            opener: Option<PageId>,
            phase: String,
            ts: u64,
        },
        PageNavigated {
            page: PageId,
            url: String,
            ts: u64,
        },
        TrafficSummary {
            page: PageId,
            requests: u64,
            res2xx: u64,
            res4xx: u64,
            res5xx: u64,
            inflight: u64,
            quiet: bool,
        },
        Error {
            page: Option<PageId>,
            message: String,
        },
    }
}

pub mod config {
    use super::detect_chrome_executable;
    use serde::{Deserialize, Serialize};
    use std::{
        env,
        path::{Path, PathBuf},
    };

    /// Configuration for launching and tuning the driver.
    #[derive(Clone, Debug, Serialize, Deserialize)]
    pub struct DriverConfig {
        pub executable: PathBuf,
        pub user_data_dir: PathBuf,
        pub headless: bool,
        pub default_deadline_ms: u64,
        pub retry_backoff_ms: u64,
        pub websocket_url: Option<String>,
        pub heartbeat_interval_ms: u64,
    }

    impl Default for DriverConfig {
        fn default() -> Self {
            Self {
                executable: default_chrome_path(),
                user_data_dir: default_profile_dir(),
                headless: resolve_headless_default(),
                default_deadline_ms: 30_000,
                retry_backoff_ms: 250,
                websocket_url: None,
                heartbeat_interval_ms: 15_000,
            }
        }
    }

    fn resolve_headless_default() -> bool {
        // WISP_HEADLESS: "0", "false", "no", "off" means headful
        match env::var("WISP_HEADLESS") {
            Ok(value) => {
                let lower = value.to_ascii_lowercase();
                !matches!(lower.as_str(), "0" | "false" | "no" | "off")
            }
            Err(_) => true,
        }
    }

    fn default_chrome_path() -> PathBuf {
        detect_chrome_executable().unwrap_or_default()
    }

    fn default_profile_dir() -> PathBuf {
        if let Ok(path) = env::var("WISPBROWSER_CHROME_PROFILE") {
            return PathBuf::from(path);
        }

        let default = Path::new("./.wispbrowser-profile");
        default.into()
    }
}

pub use config::DriverConfig;

/// Build the shared raw-event broadcast channel.
pub fn event_bus(buffer: usize) -> (EventBus, broadcast::Receiver<RawEvent>) {
    broadcast::channel(buffer)
}

pub(crate) fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("WISPBROWSER_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("WISPBROWSER_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for root in windows_search_roots() {
            paths.push(root.join("Google/Chrome/Application/chrome.exe"));
            paths.push(root.join("Chromium/Application/chrome.exe"));
            paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "windows")]
fn windows_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
        if let Ok(value) = env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                roots.push(PathBuf::from(trimmed));
            }
        }
    }
    roots
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DriverMode {
    Real,
    Stub,
}

impl DriverMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverMode::Real => "real",
            DriverMode::Stub => "stub",
        }
    }

    pub fn is_stub(&self) -> bool {
        matches!(self, DriverMode::Stub)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum ChromeMode {
    Auto,
    ForceReal,
    ForceStub,
}

pub(crate) fn chrome_mode() -> ChromeMode {
    match env::var("WISPBROWSER_USE_REAL_CHROME")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "1" | "true" | "yes" | "on" => ChromeMode::ForceReal,
        "0" | "false" | "no" | "off" => ChromeMode::ForceStub,
        _ => ChromeMode::Auto,
    }
}

pub(crate) fn resolve_chrome_path(cfg: &DriverConfig) -> Option<PathBuf> {
    if !cfg.executable.as_os_str().is_empty() && cfg.executable.exists() {
        return Some(cfg.executable.clone());
    }
    detect_chrome_executable()
}

#[cfg(test)]
mod tests {
    use super::{chrome_executable_names, detect_chrome_executable};
    use std::sync::Mutex;
    use std::{env, fs};
    use tempfile::tempdir;

    // Both tests mutate process environment; keep them serialized.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn detects_from_env_var() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("WISPBROWSER_CHROME").ok();
        env::set_var("WISPBROWSER_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        if let Some(value) = original {
            env::set_var("WISPBROWSER_CHROME", value);
        } else {
            env::remove_var("WISPBROWSER_CHROME");
        }
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    fn detects_from_path_entries() {
        let _guard = ENV_LOCK.lock().unwrap();
        let dir = tempdir().unwrap();
        let name = chrome_executable_names()
            .first()
            .expect("chrome executable names must not be empty");
        let exe_path = dir.path().join(name);
        fs::write(&exe_path, b"").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o755);
            fs::set_permissions(&exe_path, perms).unwrap();
        }
        let original_path = env::var("PATH").ok();
        let original_env = env::var("WISPBROWSER_CHROME").ok();
        let skip_flag = env::var("WISPBROWSER_SKIP_OS_PATHS").ok();
        env::set_var("WISPBROWSER_CHROME", "");
        env::set_var("WISPBROWSER_SKIP_OS_PATHS", "1");
        env::set_var("PATH", dir.path());
        let detected = detect_chrome_executable();
        if let Some(value) = original_path {
            env::set_var("PATH", value);
        }
        if let Some(value) = original_env {
            env::set_var("WISPBROWSER_CHROME", value);
        } else {
            env::remove_var("WISPBROWSER_CHROME");
        }
        if let Some(value) = skip_flag {
            env::set_var("WISPBROWSER_SKIP_OS_PATHS", value);
        } else {
            env::remove_var("WISPBROWSER_SKIP_OS_PATHS");
        }
        assert_eq!(detected, Some(exe_path));
    }
}
