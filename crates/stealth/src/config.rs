//! Configuration definitions for stealth profiles and tempo plans.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize profile bundle: {0}")]
    Deserialize(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StealthProfileBundle {
    pub profiles: Vec<StealthProfile>,
    #[serde(default)]
    pub tempos: Vec<TempoPlan>,
    /// Name of the profile applied when no explicit choice is made.
    #[serde(default)]
    pub default_profile: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StealthProfile {
    pub name: String,
    pub user_agent: String,
    #[serde(default)]
    pub accept_language: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub touch: bool,
    #[serde(default)]
    pub client_hints: Option<ClientHints>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    #[serde(default)]
    pub mobile: bool,
}

/// User-agent client hints, injected as `Emulation.setUserAgentOverride`
/// metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientHints {
    pub brands: Vec<BrandVersion>,
    pub full_version_list: Vec<BrandVersion>,
    pub platform: String,
    pub platform_version: String,
    pub architecture: String,
    pub model: String,
    pub mobile: bool,
    pub bitness: String,
    #[serde(default)]
    pub wow64: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BrandVersion {
    pub brand: String,
    pub version: String,
}

impl ClientHints {
    /// CDP `userAgentMetadata` payload.
    pub fn to_metadata(&self) -> serde_json::Value {
        json!({
            "brands": self.brands.iter().map(|b| json!({"brand": b.brand, "version": b.version})).collect::<Vec<_>>(),
            "fullVersionList": self.full_version_list.iter().map(|b| json!({"brand": b.brand, "version": b.version})).collect::<Vec<_>>(),
            "platform": self.platform,
            "platformVersion": self.platform_version,
            "architecture": self.architecture,
            "model": self.model,
            "mobile": self.mobile,
            "bitness": self.bitness,
            "wow64": self.wow64,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TempoPlan {
    pub name: String,
    #[serde(default)]
    pub mouse: MouseTempoPlan,
    #[serde(default)]
    pub typing: TypingTempoPlan,
    #[serde(default)]
    pub scroll: ScrollTempoPlan,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for TempoPlan {
    fn default() -> Self {
        Self {
            name: "default".into(),
            mouse: MouseTempoPlan::default(),
            typing: TypingTempoPlan::default(),
            scroll: ScrollTempoPlan::default(),
            seed: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MouseTempoPlan {
    #[serde(default = "MouseTempoPlan::default_pre_delay_ms")]
    pub pre_delay_ms: u64,
    #[serde(default = "MouseTempoPlan::default_hover_ms")]
    pub hover_ms: u64,
    #[serde(default = "MouseTempoPlan::default_press_ms")]
    pub press_ms: u64,
    #[serde(default)]
    pub jitter_px: f64,
    #[serde(default = "MouseTempoPlan::default_path_points")]
    pub path_points: u8,
}

impl MouseTempoPlan {
    fn default_pre_delay_ms() -> u64 {
        120
    }

    fn default_hover_ms() -> u64 {
        90
    }

    fn default_press_ms() -> u64 {
        40
    }

    fn default_path_points() -> u8 {
        4
    }
}

impl Default for MouseTempoPlan {
    fn default() -> Self {
        Self {
            pre_delay_ms: Self::default_pre_delay_ms(),
            hover_ms: Self::default_hover_ms(),
            press_ms: Self::default_press_ms(),
            jitter_px: 3.5,
            path_points: Self::default_path_points(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypingTempoPlan {
    #[serde(default = "TypingTempoPlan::default_per_char_ms")]
    pub per_char_ms: u64,
    #[serde(default = "TypingTempoPlan::default_jitter_ms")]
    pub jitter_ms: u64,
}

impl TypingTempoPlan {
    fn default_per_char_ms() -> u64 {
        30
    }

    fn default_jitter_ms() -> u64 {
        30
    }
}

impl Default for TypingTempoPlan {
    fn default() -> Self {
        Self {
            per_char_ms: Self::default_per_char_ms(),
            jitter_ms: Self::default_jitter_ms(),
        }
    }
}

/// Wheel-scroll pacing: bursts of randomized step lengths with a fixed dwell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrollTempoPlan {
    #[serde(default = "ScrollTempoPlan::default_step_min_px")]
    pub step_min_px: u32,
    #[serde(default = "ScrollTempoPlan::default_step_max_px")]
    pub step_max_px: u32,
    #[serde(default = "ScrollTempoPlan::default_dwell_ms")]
    pub dwell_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    #[serde(default = "ScrollTempoPlan::default_burst_min")]
    pub burst_min: u32,
    #[serde(default = "ScrollTempoPlan::default_burst_max")]
    pub burst_max: u32,
}

impl ScrollTempoPlan {
    fn default_step_min_px() -> u32 {
        35
    }

    fn default_step_max_px() -> u32 {
        120
    }

    fn default_dwell_ms() -> u64 {
        30
    }

    fn default_burst_min() -> u32 {
        50
    }

    fn default_burst_max() -> u32 {
        100
    }
}

impl Default for ScrollTempoPlan {
    fn default() -> Self {
        Self {
            step_min_px: Self::default_step_min_px(),
            step_max_px: Self::default_step_max_px(),
            dwell_ms: Self::default_dwell_ms(),
            jitter_ms: 0,
            burst_min: Self::default_burst_min(),
            burst_max: Self::default_burst_max(),
        }
    }
}

pub fn load_bundle_from_reader<R: Read>(
    mut reader: R,
) -> Result<StealthProfileBundle, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    parse_bundle_str(&buf)
}

pub fn load_bundle_from_path(path: impl AsRef<Path>) -> Result<StealthProfileBundle, ConfigError> {
    let file = File::open(path.as_ref())?;
    load_bundle_from_reader(file)
}

pub fn parse_bundle_str(raw: &str) -> Result<StealthProfileBundle, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(bundle) => Ok(bundle),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}
