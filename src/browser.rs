//! The `Browser` facade: thin forwarders onto the driver, with human-like
//! pacing, cookie persistence and traffic capture folded in.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cdp_driver::ids::PageId;
use cdp_driver::{
    event_bus, Anchor, Cdp, CdpDriver, CookieParam, DriverConfig, KeyPress, LaunchOptions,
    QuerySpec, RawEvent, WaitGate,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use stealth::config::StealthProfileBundle;
use stealth::{
    scroll_burst, MobileProfileBuilder, Sleeper, StealthControl, StealthRuntime,
};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};
use traffic_recorder::config::UrlFilter;
use traffic_recorder::{CapturedExchange, PageId as RecorderPageId, TrafficSnapshot};

use crate::cookies::{cookie_file_path, read_cookie_file, write_cookie_file};
use crate::js;
use crate::logging::failure_screen_dir;
use crate::retry::{with_retry, DEFAULT_ATTEMPTS};

const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);
const NAV_DEADLINE: Duration = Duration::from_secs(30);

/// Remove everything from the first `locale` occurrence; translated links
/// carry the interesting part before that marker.
pub fn strip_locale(url: &str) -> &str {
    match url.find("locale") {
        Some(idx) => &url[..idx],
        None => url,
    }
}

/// Builder for [`Browser`].
pub struct BrowserBuilder {
    config: DriverConfig,
    launch: LaunchOptions,
    bundle: Option<StealthProfileBundle>,
    mobile_emulation: bool,
    log_dir: PathBuf,
}

impl Default for BrowserBuilder {
    fn default() -> Self {
        Self {
            config: DriverConfig::default(),
            launch: LaunchOptions::default(),
            bundle: None,
            mobile_emulation: false,
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl BrowserBuilder {
    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    pub fn stealth_bundle(mut self, bundle: StealthProfileBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Generate and apply a randomized mobile fingerprint on startup.
    pub fn mobile_emulation(mut self, flag: bool) -> Self {
        self.mobile_emulation = flag;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub async fn build(self) -> Result<Browser> {
        let (bus, _rx) = event_bus(256);
        let driver = Arc::new(CdpDriver::new(self.config, self.launch, bus));
        Arc::clone(&driver)
            .start()
            .await
            .map_err(|err| anyhow!("driver start failed: {err}"))?;

        // The driver opens an initial blank page on startup; adopt it, or open
        // one ourselves when attaching over websocket.
        let deadline = Instant::now() + Duration::from_secs(5);
        let page = loop {
            if let Some(page) = driver.pages().first().copied() {
                break page;
            }
            if Instant::now() >= deadline {
                break driver
                    .create_page("about:blank")
                    .await
                    .map_err(|err| anyhow!("no initial page available: {err}"))?;
            }
            sleep(Duration::from_millis(50)).await;
        };

        let mut browser = Browser::from_parts(driver, page);
        browser.log_dir = self.log_dir;

        if let Some(bundle) = self.bundle {
            browser.stealth.load_bundle(bundle);
        }
        if self.mobile_emulation {
            browser
                .stealth
                .add_profile(MobileProfileBuilder::default().generate());
            browser.apply_stealth_profile("*").await?;
        }

        info!(target: "wispbrowser", "browser ready");
        Ok(browser)
    }
}

/// Comprehensive wrapper around the driver; every method forwards onto one or
/// two CDP commands.
pub struct Browser {
    driver: Arc<CdpDriver>,
    stealth: Arc<StealthRuntime>,
    sleeper: Sleeper,
    page: PageId,
    windows: Vec<PageId>,
    http: reqwest::Client,
    log_dir: PathBuf,
}

impl Browser {
    pub fn builder() -> BrowserBuilder {
        BrowserBuilder::default()
    }

    /// Assemble a facade over an already-started driver and page. Used by the
    /// builder and by tests driving a scripted transport.
    pub fn from_parts(driver: Arc<CdpDriver>, page: PageId) -> Self {
        let stealth = Arc::new(StealthRuntime::with_adapter(
            Arc::clone(&driver) as Arc<dyn Cdp + Send + Sync>
        ));
        Self {
            driver,
            stealth,
            sleeper: Sleeper::new(),
            page,
            windows: vec![page],
            http: reqwest::Client::new(),
            log_dir: PathBuf::from("logs"),
        }
    }

    pub fn driver(&self) -> Arc<CdpDriver> {
        Arc::clone(&self.driver)
    }

    pub fn stealth(&self) -> Arc<StealthRuntime> {
        Arc::clone(&self.stealth)
    }

    pub fn active_page(&self) -> PageId {
        self.page
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RawEvent> {
        self.driver.subscribe()
    }

    pub async fn shutdown(&self) {
        self.driver.shutdown().await;
    }

    // --- waits ---------------------------------------------------------

    pub async fn wait(&self, secs: f64) {
        self.sleeper.wait(secs).await;
    }

    pub async fn wait_random(&self, min_secs: f64, max_secs: f64) {
        self.sleeper.wait_random(min_secs, max_secs).await;
    }

    pub async fn band_fixed_wait(&self, band: &str) {
        self.sleeper.band_fixed(band).await;
    }

    pub async fn band_random_wait(&self, band: &str, custom: Option<(f64, f64)>) {
        self.sleeper.band_random(band, custom).await;
    }

    // --- navigation ----------------------------------------------------

    /// Navigate after stripping translation markers from the URL.
    pub async fn goto(&self, url: &str) -> Result<()> {
        let target = strip_locale(url).to_string();
        self.goto_raw(&target).await
    }

    /// Navigate to the URL exactly as given.
    pub async fn goto_raw(&self, url: &str) -> Result<()> {
        let driver = &self.driver;
        let page = self.page;
        with_retry(DEFAULT_ATTEMPTS, Duration::from_millis(250), || {
            driver.navigate(page, url, NAV_DEADLINE)
        })
        .await
        .with_context(|| format!("navigation to {url} failed"))?;
        info!(target: "wispbrowser", %url, "navigated");
        Ok(())
    }

    pub async fn back(&self) -> Result<()> {
        self.driver.back(self.page).await?;
        Ok(())
    }

    pub async fn reload(&self) -> Result<()> {
        self.driver.reload(self.page).await?;
        Ok(())
    }

    pub async fn wait_until(&self, gate: WaitGate, timeout: Duration) -> Result<()> {
        self.driver.wait_basic(self.page, gate, timeout).await?;
        Ok(())
    }

    // --- windows -------------------------------------------------------

    pub async fn open_new_window(&mut self, url: &str) -> Result<()> {
        let page = self.driver.create_page(url).await?;
        self.windows.push(page);
        self.page = page;
        Ok(())
    }

    pub async fn switch_window(&mut self, index: usize) -> Result<()> {
        let page = *self
            .windows
            .get(index)
            .ok_or_else(|| anyhow!("no window at index {index}"))?;
        self.driver.activate_page(page).await?;
        self.page = page;
        Ok(())
    }

    pub async fn close_last_opened_window(&mut self) -> Result<()> {
        if self.windows.len() < 2 {
            bail!("no secondary window to close");
        }
        let last = self.windows.pop().expect("len checked above");
        self.driver.close_page(last).await?;
        self.page = *self.windows.last().expect("primary window remains");
        self.driver.activate_page(self.page).await?;
        Ok(())
    }

    /// Close the active page after a short grace period.
    pub async fn close(&self, grace_secs: f64) -> Result<()> {
        self.sleeper.wait(grace_secs).await;
        self.driver.close_page(self.page).await?;
        info!(target: "wispbrowser", "page closed");
        Ok(())
    }

    // --- capture & downloads -------------------------------------------

    /// Screenshot the active page into `name`, appending `.png` when missing.
    pub async fn screenshot(&self, name: &str) -> Result<PathBuf> {
        let file = if name.ends_with(".png") {
            name.to_string()
        } else {
            format!("{name}.png")
        };
        let bytes = self.driver.screenshot(self.page, DEFAULT_DEADLINE).await?;
        let path = PathBuf::from(file);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        Ok(path)
    }

    /// Screenshot into the log directory when an operation fails; best effort.
    pub async fn capture_failure(&self, op: &str) {
        let dir = failure_screen_dir(&self.log_dir);
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(target: "wispbrowser", %err, "failed to create failure screen dir");
            return;
        }
        let path = dir.join(format!("{op}.png"));
        match self.driver.screenshot(self.page, DEFAULT_DEADLINE).await {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(&path, bytes) {
                    warn!(target: "wispbrowser", %err, "failed to write failure screen");
                }
            }
            Err(err) => {
                warn!(target: "wispbrowser", %err, "failed to capture failure screen");
            }
        }
    }

    /// Download an image over HTTP; failures are logged, not raised.
    pub async fn save_image(&self, url: &str, path: &Path) {
        match self.fetch_bytes(url).await {
            Ok(bytes) => match std::fs::write(path, bytes) {
                Ok(()) => info!(target: "wispbrowser", path = %path.display(), "image saved"),
                Err(err) => {
                    error!(target: "wispbrowser", %err, %url, "failed to write image")
                }
            },
            Err(err) => error!(target: "wispbrowser", %err, %url, "failed to download image"),
        }
    }

    /// Download arbitrary content into `dir/name`; failures are logged, not
    /// raised.
    pub async fn download_content(&self, src: &str, dir: &Path, name: &str) {
        match self.fetch_bytes(src).await {
            Ok(bytes) => {
                let path = dir.join(name);
                match std::fs::write(&path, bytes) {
                    Ok(()) => info!(target: "wispbrowser", %name, "downloaded"),
                    Err(err) => error!(target: "wispbrowser", %err, %name, "failed to write download"),
                }
            }
            Err(err) => error!(target: "wispbrowser", %err, %src, "failed to download content"),
        }
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.http.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Decode a `data:image/...;base64,` payload and write it to disk.
    pub fn save_base64_image(&self, data: &str, path: &Path) -> Result<()> {
        let encoded = data.rsplit_once(',').map(|(_, tail)| tail).unwrap_or(data);
        let bytes = STANDARD
            .decode(encoded.trim())
            .context("invalid base64 image data")?;
        std::fs::write(path, bytes)
            .with_context(|| format!("failed to write image {}", path.display()))?;
        info!(target: "wispbrowser", path = %path.display(), "image saved");
        Ok(())
    }

    // --- elements ------------------------------------------------------

    /// Find one element; errors when nothing matches within the deadline.
    pub async fn find_element(&self, selector: &str, timeout: Duration) -> Result<Anchor> {
        let deadline = Instant::now() + timeout;
        loop {
            let anchors = self
                .driver
                .query(self.page, QuerySpec::css(selector))
                .await?;
            if let Some(anchor) = anchors.into_iter().next() {
                return Ok(anchor);
            }
            if Instant::now() >= deadline {
                bail!("element not found within timeout, selector: {selector}");
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    /// Find all matching elements; an empty vec when nothing appears in time.
    pub async fn find_elements(&self, selector: &str, timeout: Duration) -> Result<Vec<Anchor>> {
        let deadline = Instant::now() + timeout;
        loop {
            let anchors = self
                .driver
                .query(self.page, QuerySpec::css(selector))
                .await?;
            if !anchors.is_empty() || Instant::now() >= deadline {
                return Ok(anchors);
            }
            sleep(Duration::from_millis(100)).await;
        }
    }

    // --- actions -------------------------------------------------------

    /// Click at coordinates after a fixed delay.
    pub async fn click_at(&self, x: f64, y: f64, delay_secs: f64) -> Result<()> {
        self.sleeper.wait(delay_secs).await;
        self.driver.click_at(self.page, x, y, 1).await?;
        Ok(())
    }

    /// Scroll an element into view and click it with the mouse.
    pub async fn click_element(&self, selector: &str, clicks: u32) -> Result<()> {
        self.scroll_to_element(selector).await?;
        let advice = self.stealth.tempo_advice("click");
        self.sleeper.wait(advice.delay_ms as f64 / 1000.0).await;
        for _ in 0..clicks.max(1) {
            self.driver
                .click(self.page, selector, DEFAULT_DEADLINE)
                .await?;
        }
        self.sleeper.band_random("short", None).await;
        Ok(())
    }

    pub async fn press_esc(&self) -> Result<()> {
        self.driver.press_key(self.page, KeyPress::Escape).await?;
        self.sleeper.band_random("very_short", None).await;
        Ok(())
    }

    /// Press an arrow key by name (`up`, `down`, `left`, `right`).
    pub async fn press_arrow(&self, direction: &str) -> Result<()> {
        let key = match direction.to_ascii_lowercase().as_str() {
            "up" => KeyPress::ArrowUp,
            "down" => KeyPress::ArrowDown,
            "left" => KeyPress::ArrowLeft,
            "right" => KeyPress::ArrowRight,
            other => bail!("unknown arrow direction '{other}'"),
        };
        self.driver.press_key(self.page, key).await?;
        Ok(())
    }

    /// Move the pointer over an element and dwell there.
    pub async fn hover(&self, selector: &str, band: &str) -> Result<()> {
        self.scroll_to_element(selector).await?;
        let anchor = self.find_element(selector, DEFAULT_DEADLINE).await?;
        self.driver.move_mouse(self.page, anchor.x, anchor.y).await?;
        self.sleeper.band_random(band, None).await;
        Ok(())
    }

    pub async fn hover_at(&self, x: f64, y: f64, click: bool) -> Result<()> {
        self.driver.move_mouse(self.page, x, y).await?;
        if click {
            self.driver.click_at(self.page, x, y, 1).await?;
        }
        self.sleeper.band_random("very_short", None).await;
        Ok(())
    }

    pub async fn highlight_element(&self, selector: &str) -> Result<()> {
        self.driver
            .evaluate_script(self.page, &js::with_element(selector, js::HIGHLIGHT_ELEMENT))
            .await?;
        Ok(())
    }

    /// Clear an input by backspacing its current value, one key at a time.
    pub async fn clear_input(&self, selector: &str) -> Result<()> {
        let value = self
            .driver
            .evaluate_script(self.page, &js::input_value(selector))
            .await?;
        let len = value.as_str().map(|s| s.chars().count()).unwrap_or(0);
        self.driver
            .type_text(self.page, selector, "", DEFAULT_DEADLINE)
            .await?;
        for _ in 0..len {
            self.sleeper.wait(0.03).await;
            self.driver.press_key(self.page, KeyPress::Backspace).await?;
        }
        Ok(())
    }

    /// Type into an element one character at a time with human-like gaps.
    pub async fn type_like_human(&self, selector: &str, text: &str) -> Result<()> {
        self.driver
            .type_text(self.page, selector, "", DEFAULT_DEADLINE)
            .await?;
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.driver
                .insert_text(self.page, ch.encode_utf8(&mut buf))
                .await?;
            let advice = self.stealth.tempo_advice("type");
            self.sleeper.wait(advice.delay_ms as f64 / 1000.0).await;
        }
        Ok(())
    }

    /// Press Escape and settle; closes overlays before the next step.
    pub async fn ensure_transition(&self) -> Result<()> {
        self.press_esc().await?;
        self.sleeper.band_random("very_short", None).await;
        Ok(())
    }

    // --- scrolling -----------------------------------------------------

    /// Center an element in the viewport.
    pub async fn scroll_to_element(&self, selector: &str) -> Result<()> {
        let found = self
            .driver
            .evaluate_script(self.page, &js::with_element(selector, js::SCROLL_INTO_VIEW))
            .await?;
        if found != serde_json::json!(true) {
            bail!("scroll target not found, selector: {selector}");
        }
        self.sleeper.band_random("very_short", None).await;
        Ok(())
    }

    /// Scroll the page by a pixel length.
    pub async fn scroll_page(&self, length: f64) -> Result<()> {
        self.driver.scroll_by(self.page, 0.0, length).await?;
        Ok(())
    }

    /// Scroll an element's own pane to its bottom.
    pub async fn scroll_element_to_bottom(&self, selector: &str) -> Result<()> {
        self.driver
            .evaluate_script(
                self.page,
                &js::with_element(selector, js::SCROLL_ELEMENT_TO_BOTTOM),
            )
            .await?;
        Ok(())
    }

    /// Scroll like a mouse wheel: a burst of randomized steps with short
    /// dwells in between.
    pub async fn scroll_like_mouse(&self, scrolls_count: Option<u32>) -> Result<()> {
        let plan = stealth::config::ScrollTempoPlan::default();
        let mut rng = StdRng::from_entropy();
        let steps = scroll_burst(&plan, scrolls_count, &mut rng);
        for step in steps {
            self.driver.scroll_by(self.page, 0.0, step as f64).await?;
            self.sleeper.wait(plan.dwell_ms as f64 / 1000.0).await;
        }
        Ok(())
    }

    /// Wheel-scroll towards an element until it is roughly centered; falls
    /// back to a direct scroll after 15 seconds.
    pub async fn scroll_like_mouse_to_element(
        &self,
        selector: &str,
        tolerance: f64,
    ) -> Result<()> {
        let plan = stealth::config::ScrollTempoPlan::default();
        let mut rng = StdRng::from_entropy();
        let start = Instant::now();

        loop {
            let centered = self
                .driver
                .evaluate_script(self.page, &js::is_element_centered(selector, tolerance))
                .await?;
            if centered == serde_json::json!(true) {
                return Ok(());
            }

            let top = self
                .driver
                .evaluate_script(self.page, &js::element_top(selector))
                .await?;
            let top = top
                .as_f64()
                .ok_or_else(|| anyhow!("scroll target not found, selector: {selector}"))?;

            let step = scroll_burst(&plan, Some(1), &mut rng)[0] as f64;
            let delta = if top > 0.0 { step } else { -step };
            self.driver.scroll_by(self.page, 0.0, delta).await?;
            self.sleeper.wait(plan.dwell_ms as f64 / 1000.0).await;

            if start.elapsed() > Duration::from_secs(15) {
                return self.scroll_to_element(selector).await;
            }
        }
    }

    // --- cookies -------------------------------------------------------

    /// Persist the current cookie jar as a JSON array file.
    pub async fn save_cookies(&self, name: &str, directory: Option<&Path>) -> Result<PathBuf> {
        let cookies = self.driver.get_cookies(self.page).await?;
        let path = cookie_file_path(name, directory)?;
        write_cookie_file(&path, &cookies)?;
        info!(target: "wispbrowser", path = %path.display(), count = cookies.len(), "cookies saved");
        Ok(path)
    }

    /// Add cookies to the browser and refresh so they take effect.
    pub async fn load_cookies(&self, cookies: Vec<CookieParam>) -> Result<()> {
        self.driver.set_cookies(self.page, &cookies).await?;
        self.driver.reload(self.page).await?;
        Ok(())
    }

    pub async fn load_cookies_from_path(&self, path: &Path) -> Result<()> {
        let cookies = read_cookie_file(path)?;
        self.load_cookies(cookies).await
    }

    /// Delete every cookie and refresh.
    pub async fn clear_all_cookies(&self) -> Result<()> {
        self.driver.clear_cookies(self.page).await?;
        self.driver.reload(self.page).await?;
        Ok(())
    }

    // --- traffic capture -----------------------------------------------

    /// Enable network capture on the active page with the given URL filter.
    pub async fn start_traffic_capture(&self, filter: UrlFilter) -> Result<()> {
        self.driver.recorder().set_filter(filter).await;
        self.driver.set_network_capture(self.page, true).await?;
        Ok(())
    }

    pub async fn stop_traffic_capture(&self) -> Result<()> {
        self.driver.set_network_capture(self.page, false).await?;
        Ok(())
    }

    /// Exchanges completed since the previous drain.
    pub async fn drain_traffic(&self) -> Result<Vec<CapturedExchange>> {
        Ok(self
            .driver
            .recorder()
            .drain(self.recorder_page())
            .await
            .unwrap_or_default())
    }

    /// Every exchange captured on the active page so far.
    pub async fn traffic_history(&self) -> Result<Vec<CapturedExchange>> {
        Ok(self
            .driver
            .recorder()
            .history(self.recorder_page())
            .await
            .unwrap_or_default())
    }

    pub async fn traffic_snapshot(&self) -> Option<TrafficSnapshot> {
        self.driver
            .recorder()
            .current_snapshot(self.recorder_page())
            .await
    }

    fn recorder_page(&self) -> RecorderPageId {
        RecorderPageId(self.page.0)
    }

    // --- stealth -------------------------------------------------------

    /// Choose a profile for the origin and inject it into the active page.
    pub async fn apply_stealth_profile(&self, origin: &str) -> Result<()> {
        self.stealth
            .apply_stealth(origin)
            .await
            .map_err(|err| anyhow!("{err}"))?;
        self.stealth
            .configure_page(self.page, origin)
            .await
            .map_err(|err| anyhow!("{err}"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_locale_truncates_at_marker() {
        assert_eq!(
            strip_locale("https://example.com/page?locale=de_DE"),
            "https://example.com/page?"
        );
        assert_eq!(
            strip_locale("https://example.com/plain"),
            "https://example.com/plain"
        );
    }
}
