//! Fingerprint profiles and human-like tempo.
//!
//! Coordinates stealth profiles (user agent, client hints, device metrics),
//! randomized mobile-profile generation from a curated catalog, and tempo plans
//! backing the mouse/typing/scroll simulators. Profiles are injected through
//! the driver's `Cdp` trait.

pub mod catalog;
pub mod config;
pub mod pause;

use crate::config::{ClientHints, ScrollTempoPlan, StealthProfile, StealthProfileBundle, TempoPlan, Viewport};
use async_trait::async_trait;
use cdp_driver::{ids::PageId as DriverPageId, Cdp};
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub use crate::config::{BrandVersion, StealthProfileBundle as ProfileBundle};
pub use crate::pause::{PauseBand, Sleeper};

/// Identifier for an applied stealth profile.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub Uuid);

impl ProfileId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProfileId {
    fn default() -> Self {
        Self::new()
    }
}

/// Tempo advice returned to the facade before an interaction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TempoAdvice {
    pub delay_ms: u64,
    pub path: Option<Vec<(i32, i32)>>,
    pub step_px: Option<u32>,
}

impl Default for TempoAdvice {
    fn default() -> Self {
        Self {
            delay_ms: 120,
            path: None,
            step_px: None,
        }
    }
}

#[derive(Clone, Debug, Error)]
pub enum StealthError {
    #[error("no profile applied for {0}")]
    NoProfile(String),
    #[error("cdp I/O failure: {0}")]
    CdpIo(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait StealthControl {
    async fn apply_stealth(&self, origin: &str) -> Result<ProfileId, StealthError>;
    async fn configure_page(&self, page: DriverPageId, origin: &str) -> Result<(), StealthError>;
    fn tempo_advice(&self, op: &str) -> TempoAdvice;
}

/// Runtime holding the loaded profile/tempo catalog and per-origin choices.
pub struct StealthRuntime {
    applied: DashMap<String, AppliedProfile>,
    profiles: Arc<RwLock<HashMap<String, StealthProfile>>>,
    tempos: Arc<RwLock<HashMap<String, TempoPlan>>>,
    default_profile: Arc<RwLock<Option<String>>>,
    adapter: Option<Arc<dyn Cdp + Send + Sync>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppliedProfile {
    pub profile_id: ProfileId,
    pub profile_name: String,
    pub tempo: String,
}

impl StealthRuntime {
    pub fn new() -> Self {
        Self::with_optional_adapter(None)
    }

    pub fn with_adapter(adapter: Arc<dyn Cdp + Send + Sync>) -> Self {
        Self::with_optional_adapter(Some(adapter))
    }

    fn with_optional_adapter(adapter: Option<Arc<dyn Cdp + Send + Sync>>) -> Self {
        Self {
            applied: DashMap::new(),
            profiles: Arc::new(RwLock::new(HashMap::new())),
            tempos: Arc::new(RwLock::new(HashMap::new())),
            default_profile: Arc::new(RwLock::new(None)),
            adapter,
        }
    }

    pub fn load_bundle(&self, bundle: StealthProfileBundle) {
        let StealthProfileBundle {
            profiles: profile_defs,
            tempos: tempo_defs,
            default_profile,
        } = bundle;

        {
            let mut profiles = self.profiles.write();
            profiles.clear();
            for profile in profile_defs {
                profiles.insert(profile.name.clone(), profile);
            }
        }
        {
            let mut tempos = self.tempos.write();
            tempos.clear();
            for tempo in tempo_defs {
                tempos.insert(tempo.name.clone(), tempo);
            }
        }
        {
            let mut guard = self.default_profile.write();
            *guard = default_profile;
        }
    }

    /// Register a single generated profile and make it the default when none is
    /// set yet.
    pub fn add_profile(&self, profile: StealthProfile) {
        let name = profile.name.clone();
        self.profiles.write().insert(name.clone(), profile);
        let mut default = self.default_profile.write();
        if default.is_none() {
            *default = Some(name);
        }
    }

    pub fn applied_profile_for(&self, origin: &str) -> Option<AppliedProfile> {
        self.applied.get(origin).map(|entry| entry.value().clone())
    }

    pub fn profile(&self, name: &str) -> Option<StealthProfile> {
        self.profiles.read().get(name).cloned()
    }

    fn choose_profile(&self) -> AppliedProfile {
        let profiles = self.profiles.read();
        let default = self.default_profile.read();

        let profile_name = default
            .clone()
            .filter(|name| profiles.contains_key(name))
            .or_else(|| profiles.keys().next().cloned())
            .unwrap_or_else(|| "default".into());

        let tempo = {
            let tempos = self.tempos.read();
            tempos.keys().next().cloned().unwrap_or_else(|| "default".into())
        };

        AppliedProfile {
            profile_id: ProfileId::new(),
            profile_name,
            tempo,
        }
    }

    async fn inject_profile(
        &self,
        adapter: &Arc<dyn Cdp + Send + Sync>,
        page: DriverPageId,
        profile: &StealthProfile,
    ) -> Result<(), StealthError> {
        if !profile.user_agent.is_empty() {
            let metadata = profile.client_hints.as_ref().map(ClientHints::to_metadata);
            adapter
                .set_user_agent(
                    page,
                    &profile.user_agent,
                    profile.accept_language.as_deref(),
                    profile.platform.as_deref(),
                    metadata,
                )
                .await
                .map_err(map_driver_error)?;
        }

        if let Some(timezone) = &profile.timezone {
            adapter
                .set_timezone(page, timezone)
                .await
                .map_err(map_driver_error)?;
        }

        if let Some(viewport) = &profile.viewport {
            adapter
                .set_device_metrics(
                    page,
                    viewport.width,
                    viewport.height,
                    viewport.device_scale_factor,
                    viewport.mobile,
                )
                .await
                .map_err(map_driver_error)?;
        }

        if profile.touch {
            adapter
                .set_touch_emulation(page, true)
                .await
                .map_err(map_driver_error)?;
        }

        Ok(())
    }

    fn select_tempo_plan(&self) -> TempoPlan {
        let applied_tempo = self
            .applied
            .iter()
            .next()
            .map(|entry| entry.value().tempo.clone());

        let tempos = self.tempos.read();
        if let Some(name) = applied_tempo {
            if let Some(plan) = tempos.get(&name) {
                return plan.clone();
            }
        }

        tempos.values().next().cloned().unwrap_or_default()
    }

    fn advice_from_plan(plan: &TempoPlan, op: &str) -> TempoAdvice {
        let op_trimmed = op.trim();
        let normalized = if op_trimmed.is_empty() {
            "click".to_string()
        } else {
            op_trimmed.to_ascii_lowercase()
        };

        let seed = Self::tempo_seed(plan, &normalized);
        let mut rng = StdRng::seed_from_u64(seed);

        match normalized.as_str() {
            "click" | "mouse.click" | "mouse.select" | "select" => {
                Self::mouse_advice(plan, &mut rng)
            }
            "type" | "typing" | "keyboard.type" => Self::typing_advice(plan, &mut rng),
            op if op.starts_with("scroll") => Self::scroll_advice(plan, &mut rng),
            _ => TempoAdvice::default(),
        }
    }

    fn tempo_seed(plan: &TempoPlan, op: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        plan.name.hash(&mut hasher);
        op.hash(&mut hasher);
        if let Some(seed) = plan.seed {
            seed.hash(&mut hasher);
        }
        hasher.finish()
    }

    fn mouse_advice(plan: &TempoPlan, rng: &mut StdRng) -> TempoAdvice {
        let hover_jitter = if plan.mouse.hover_ms > 0 {
            rng.gen_range(0..=plan.mouse.hover_ms)
        } else {
            0
        };
        let press_jitter = if plan.mouse.press_ms > 0 {
            rng.gen_range(0..=plan.mouse.press_ms)
        } else {
            0
        };

        let mut advice = TempoAdvice {
            delay_ms: plan.mouse.pre_delay_ms + hover_jitter + press_jitter,
            path: None,
            step_px: None,
        };

        let steps = plan.mouse.path_points.max(2) as usize;
        if plan.mouse.jitter_px > 0.0 && steps > 1 {
            let mut path = Vec::with_capacity(steps);
            for _ in 0..steps {
                let dx = rng.gen_range(-plan.mouse.jitter_px..=plan.mouse.jitter_px);
                let dy = rng.gen_range(-plan.mouse.jitter_px..=plan.mouse.jitter_px);
                path.push((dx.round() as i32, dy.round() as i32));
            }
            advice.path = Some(path);
        }

        advice
    }

    fn typing_advice(plan: &TempoPlan, rng: &mut StdRng) -> TempoAdvice {
        let jitter = if plan.typing.jitter_ms > 0 {
            rng.gen_range(0..=plan.typing.jitter_ms)
        } else {
            0
        };

        TempoAdvice {
            delay_ms: plan.typing.per_char_ms + jitter,
            path: None,
            step_px: None,
        }
    }

    fn scroll_advice(plan: &TempoPlan, rng: &mut StdRng) -> TempoAdvice {
        let jitter = if plan.scroll.jitter_ms > 0 {
            rng.gen_range(0..=plan.scroll.jitter_ms)
        } else {
            0
        };

        let step = if plan.scroll.step_max_px > plan.scroll.step_min_px {
            rng.gen_range(plan.scroll.step_min_px..=plan.scroll.step_max_px)
        } else {
            plan.scroll.step_min_px
        };

        TempoAdvice {
            delay_ms: plan.scroll.dwell_ms + jitter,
            path: None,
            step_px: Some(step),
        }
    }
}

impl Default for StealthRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StealthControl for StealthRuntime {
    async fn apply_stealth(&self, origin: &str) -> Result<ProfileId, StealthError> {
        let applied = self.choose_profile();
        let profile_id = applied.profile_id.clone();
        self.applied.insert(origin.to_string(), applied);
        Ok(profile_id)
    }

    async fn configure_page(&self, page: DriverPageId, origin: &str) -> Result<(), StealthError> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| StealthError::Internal("stealth adapter not configured".into()))?
            .clone();

        let profile_name = self
            .applied
            .get(origin)
            .map(|entry| entry.profile_name.clone())
            .ok_or_else(|| StealthError::NoProfile(origin.to_string()))?;

        let profile = {
            let profiles = self.profiles.read();
            profiles.get(&profile_name).cloned().ok_or_else(|| {
                StealthError::Internal(format!(
                    "profile '{profile_name}' not found for origin {origin}"
                ))
            })?
        };

        self.inject_profile(&adapter, page, &profile).await
    }

    fn tempo_advice(&self, op: &str) -> TempoAdvice {
        let plan = self.select_tempo_plan();
        Self::advice_from_plan(&plan, op)
    }
}

/// Builds randomized mobile fingerprints from the curated catalog.
#[derive(Clone, Copy, Debug)]
pub struct MobileProfileBuilder {
    pub min_major: u32,
    pub max_major: u32,
    pub seed: Option<u64>,
}

impl Default for MobileProfileBuilder {
    fn default() -> Self {
        Self {
            min_major: 120,
            max_major: 125,
            seed: None,
        }
    }
}

impl MobileProfileBuilder {
    pub fn versions(mut self, min_major: u32, max_major: u32) -> Self {
        self.min_major = min_major;
        self.max_major = max_major;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn generate(&self) -> StealthProfile {
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let entry = catalog::pick_entry(&mut rng, self.min_major, self.max_major);
        let width = rng.gen_range(400..=500);
        let height = rng.gen_range(640..=900);
        let pixel_ratio = (rng.gen_range(1.5..=3.5f64) * 100.0).round() / 100.0;

        let major = entry.major.to_string();
        let client_hints = ClientHints {
            brands: vec![
                BrandVersion {
                    brand: "Google Chrome".into(),
                    version: major.clone(),
                },
                BrandVersion {
                    brand: "Chromium".into(),
                    version: major.clone(),
                },
            ],
            full_version_list: vec![
                BrandVersion {
                    brand: "Google Chrome".into(),
                    version: entry.full_version.into(),
                },
                BrandVersion {
                    brand: "Chromium".into(),
                    version: entry.full_version.into(),
                },
            ],
            platform: "Android".into(),
            platform_version: entry.platform_version.into(),
            architecture: "".into(),
            model: entry.model.into(),
            mobile: true,
            bitness: "64".into(),
            wow64: false,
        };

        StealthProfile {
            name: format!("mobile-{}-{}", entry.model.to_ascii_lowercase(), entry.major),
            user_agent: entry.user_agent(),
            accept_language: Some("en-US,en;q=0.9".into()),
            platform: Some("Android".into()),
            timezone: None,
            viewport: Some(Viewport {
                width,
                height,
                device_scale_factor: pixel_ratio,
                mobile: true,
            }),
            touch: true,
            client_hints: Some(client_hints),
        }
    }
}

/// Generate a burst of wheel-scroll step lengths from a plan. `count` falls
/// back to the plan's burst range when unset.
pub fn scroll_burst<R: Rng + ?Sized>(
    plan: &ScrollTempoPlan,
    count: Option<u32>,
    rng: &mut R,
) -> Vec<u32> {
    let count = count.unwrap_or_else(|| {
        if plan.burst_max > plan.burst_min {
            rng.gen_range(plan.burst_min..=plan.burst_max)
        } else {
            plan.burst_min
        }
    });

    (0..count)
        .map(|_| {
            if plan.step_max_px > plan.step_min_px {
                rng.gen_range(plan.step_min_px..=plan.step_max_px)
            } else {
                plan.step_min_px
            }
        })
        .collect()
}

fn map_driver_error(err: cdp_driver::DriverError) -> StealthError {
    let mut hint = err.hint.clone().unwrap_or_default();
    if hint.is_empty() {
        hint = format!("cdp error {:?}", err.kind);
    }
    StealthError::CdpIo(hint)
}
