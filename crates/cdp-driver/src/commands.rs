//! Command parameter types exposed by the driver interface.

use serde::{Deserialize, Serialize};

/// Specification for a DOM query operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuerySpec {
    pub selector: String,
    pub scope: QueryScope,
}

impl QuerySpec {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            scope: QueryScope::Document,
        }
    }
}

/// Query scope determines which portion of the document the driver inspects.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum QueryScope {
    Document,
    Frame(String),
}

/// Resolved element position used for click/typing injection.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Anchor {
    pub backend_node_id: Option<u64>,
    pub x: f64,
    pub y: f64,
}

/// Wait gate definitions.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum WaitGate {
    DomReady,
    NetworkQuiet { window_ms: u64, max_inflight: u32 },
    FrameStable { min_stable_ms: u64 },
}

/// Keys dispatchable through `Input.dispatchKeyEvent`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPress {
    Escape,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Enter,
    Backspace,
    Delete,
}

impl KeyPress {
    /// (`key`, `code`, windowsVirtualKeyCode) triple per the DOM UI Events spec.
    pub fn descriptor(&self) -> (&'static str, &'static str, i64) {
        match self {
            KeyPress::Escape => ("Escape", "Escape", 27),
            KeyPress::ArrowUp => ("ArrowUp", "ArrowUp", 38),
            KeyPress::ArrowDown => ("ArrowDown", "ArrowDown", 40),
            KeyPress::ArrowLeft => ("ArrowLeft", "ArrowLeft", 37),
            KeyPress::ArrowRight => ("ArrowRight", "ArrowRight", 39),
            KeyPress::Enter => ("Enter", "Enter", 13),
            KeyPress::Backspace => ("Backspace", "Backspace", 8),
            KeyPress::Delete => ("Delete", "Delete", 46),
        }
    }
}

/// Parameters accepted by `Network.setCookies` / returned by `Network.getCookies`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CookieParam {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(rename = "httpOnly", skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
    #[serde(rename = "sameSite", skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl CookieParam {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
            url: None,
            expires: None,
            http_only: None,
            secure: None,
            same_site: None,
        }
    }
}
