//! Convenience layer over Chromium automation.
//!
//! `wispbrowser` wraps the [`cdp_driver`] crate behind a [`Browser`] facade of
//! thin forwarders: launch presets, human-like tempo, cookie persistence, and
//! request-level traffic capture through [`traffic_recorder`].

pub mod browser;
pub mod config;
pub mod cookies;
pub mod js;
pub mod logging;
pub mod retry;

pub use browser::{strip_locale, Browser, BrowserBuilder};
pub use cdp_driver::{
    Anchor, Cdp, CdpDriver, CookieParam, DriverConfig, DriverError, KeyPress, LaunchOptions,
    OptionsPreset, PageLoadStrategy, RawEvent, WaitGate,
};
pub use logging::{init_logging, LogOptions};
pub use stealth::{MobileProfileBuilder, PauseBand, Sleeper, StealthControl, StealthRuntime};
pub use traffic_recorder::{config::UrlFilter, CapturedExchange, ResponseBody, TrafficSnapshot};
