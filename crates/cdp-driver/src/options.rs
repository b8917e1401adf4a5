//! Pre-built launch option presets.
//!
//! Maps a preset mode plus a handful of flags onto the concrete Chrome argument
//! list handed to the transport at launch. Invalid modes or page-load strategies
//! are unrepresentable; everything here is plain configuration mapping.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Named argument bundles applied before individual flags.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionsPreset {
    /// No arguments beyond what the flags request.
    #[default]
    Default,
    /// Hardened baseline for unattended runs.
    Base,
    /// Baseline plus mobile emulation sizing.
    Mobile,
}

/// How long navigation should block on resource loading.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageLoadStrategy {
    /// Wait for all resources.
    #[default]
    Normal,
    /// DOM is interactive; images/CSS may still be loading.
    Eager,
    /// Do not block at all.
    None,
}

impl PageLoadStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageLoadStrategy::Normal => "normal",
            PageLoadStrategy::Eager => "eager",
            PageLoadStrategy::None => "none",
        }
    }
}

/// Viewport sizing taken from an emulated device profile.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct EmulatedWindow {
    pub width: u32,
    pub height: u32,
}

/// Launch-time option bundle, resolved into Chrome arguments.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub preset: OptionsPreset,
    pub page_load_strategy: PageLoadStrategy,
    pub headless: bool,
    pub incognito: bool,
    pub maximized: bool,
    pub reduce_traffic: bool,
    pub profile_dir: Option<PathBuf>,
    pub emulated_window: Option<EmulatedWindow>,
    /// Extra arguments appended verbatim after preset expansion.
    pub extra_args: Vec<String>,
}

impl LaunchOptions {
    pub fn new(preset: OptionsPreset) -> Self {
        Self {
            preset,
            ..Self::default()
        }
    }

    pub fn headless(mut self, flag: bool) -> Self {
        self.headless = flag;
        self
    }

    pub fn incognito(mut self, flag: bool) -> Self {
        self.incognito = flag;
        self
    }

    pub fn maximized(mut self, flag: bool) -> Self {
        self.maximized = flag;
        self
    }

    pub fn reduce_traffic(mut self, flag: bool) -> Self {
        self.reduce_traffic = flag;
        self
    }

    pub fn profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profile_dir = Some(dir.into());
        self
    }

    pub fn page_load_strategy(mut self, strategy: PageLoadStrategy) -> Self {
        self.page_load_strategy = strategy;
        self
    }

    pub fn emulated_window(mut self, width: u32, height: u32) -> Self {
        self.emulated_window = Some(EmulatedWindow { width, height });
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Resolve the preset and flags into the final argument list.
    pub fn to_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();

        match self.preset {
            OptionsPreset::Default => {}
            OptionsPreset::Base => {
                args.extend(base_args().iter().map(|s| s.to_string()));
            }
            OptionsPreset::Mobile => {
                args.extend(base_args().iter().map(|s| s.to_string()));
                args.push("--disable-extensions".into());
                let window = self.emulated_window.unwrap_or(EmulatedWindow {
                    width: 412,
                    height: 823,
                });
                args.push(format!("--window-size={},{}", window.width, window.height));
            }
        }

        if cfg!(target_os = "windows") {
            args.push("--disable-gpu".into());
        }

        if self.incognito {
            args.push("--incognito".into());
        }

        if self.maximized {
            args.push("--start-maximized".into());
        }

        if let Some(dir) = &self.profile_dir {
            args.push(format!("--user-data-dir={}", dir.display()));
        }

        if self.reduce_traffic {
            args.push("--disable-extensions".into());
            args.push("--autoplay-policy=no-user-gesture-required".into());
            args.push("--blink-settings=imagesEnabled=false".into());
        }

        args.extend(self.extra_args.iter().cloned());
        args.dedup();
        args
    }
}

fn base_args() -> &'static [&'static str] {
    &[
        "--ignore-certificate-errors",
        "--test-type",
        "--disable-notifications",
        "--no-sandbox",
        "--disable-dev-shm-usage",
        "--lang=en-US",
        "--mute-audio",
        "--hide-crash-restore-bubble",
        "--crash-dumps-dir=/tmp",
        "--log-level=1",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_preset_adds_only_flag_args() {
        let args = LaunchOptions::default().incognito(true).to_args();
        assert!(args.contains(&"--incognito".to_string()));
        assert!(!args.iter().any(|a| a == "--test-type"));
    }

    #[test]
    fn base_preset_includes_hardening_args() {
        let args = LaunchOptions::new(OptionsPreset::Base).to_args();
        assert!(args.contains(&"--disable-notifications".to_string()));
        assert!(args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn mobile_preset_sizes_the_window() {
        let args = LaunchOptions::new(OptionsPreset::Mobile)
            .emulated_window(420, 800)
            .to_args();
        assert!(args.contains(&"--window-size=420,800".to_string()));
        assert!(args.contains(&"--disable-extensions".to_string()));
    }

    #[test]
    fn reduce_traffic_disables_images() {
        let args = LaunchOptions::default().reduce_traffic(true).to_args();
        assert!(args
            .iter()
            .any(|a| a == "--blink-settings=imagesEnabled=false"));
    }

    #[test]
    fn profile_dir_is_forwarded() {
        let args = LaunchOptions::default().profile_dir("/tmp/profile").to_args();
        assert!(args.iter().any(|a| a.starts_with("--user-data-dir=")));
    }
}
