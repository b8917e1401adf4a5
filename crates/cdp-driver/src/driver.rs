//! The driver object. Page operations are thin forwarders onto CDP commands;
//! the event pump keeps the page registry current and feeds the traffic
//! recorder.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{json, Number, Value};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::{select, spawn};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use traffic_recorder::{
    BodyFetcher, FetchError, MaintenanceHandle as RecorderMaintenance, PageId as RecorderPageId,
    RecorderError, RecorderEvent, TrafficRecorder, TrafficSummary,
};

use crate::commands::{Anchor, CookieParam, KeyPress, QueryScope, QuerySpec, WaitGate};
use crate::config::DriverConfig;
use crate::error::{DriverError, DriverErrorKind};
use crate::events::RawEvent;
use crate::ids::{BrowserId, PageId, SessionId};
use crate::metrics;
use crate::options::LaunchOptions;
use crate::registry::Registry;
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent};
use crate::{chrome_mode, resolve_chrome_path, ChromeMode, DriverMode};

/// Shared event bus type alias.
pub type EventBus = broadcast::Sender<RawEvent>;

/// The capability surface exposed to the facade and the stealth runtime.
#[async_trait]
pub trait Cdp {
    async fn navigate(&self, page: PageId, url: &str, deadline: Duration)
        -> Result<(), DriverError>;
    async fn back(&self, page: PageId) -> Result<(), DriverError>;
    async fn reload(&self, page: PageId) -> Result<(), DriverError>;
    async fn query(&self, page: PageId, spec: QuerySpec) -> Result<Vec<Anchor>, DriverError>;
    async fn click(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;
    async fn click_at(
        &self,
        page: PageId,
        x: f64,
        y: f64,
        click_count: u32,
    ) -> Result<(), DriverError>;
    async fn move_mouse(&self, page: PageId, x: f64, y: f64) -> Result<(), DriverError>;
    async fn press_key(&self, page: PageId, key: KeyPress) -> Result<(), DriverError>;
    async fn insert_text(&self, page: PageId, text: &str) -> Result<(), DriverError>;
    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<(), DriverError>;
    async fn evaluate_script(&self, page: PageId, expression: &str)
        -> Result<Value, DriverError>;
    async fn scroll_by(&self, page: PageId, dx: f64, dy: f64) -> Result<(), DriverError>;
    async fn screenshot(&self, page: PageId, deadline: Duration) -> Result<Vec<u8>, DriverError>;
    async fn get_cookies(&self, page: PageId) -> Result<Vec<CookieParam>, DriverError>;
    async fn set_cookies(&self, page: PageId, cookies: &[CookieParam])
        -> Result<(), DriverError>;
    async fn clear_cookies(&self, page: PageId) -> Result<(), DriverError>;
    async fn set_user_agent(
        &self,
        page: PageId,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<(), DriverError>;
    async fn set_timezone(&self, page: PageId, timezone: &str) -> Result<(), DriverError>;
    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<(), DriverError>;
    async fn set_touch_emulation(&self, page: PageId, enabled: bool) -> Result<(), DriverError>;
    async fn set_network_capture(&self, page: PageId, enabled: bool) -> Result<(), DriverError>;
    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), DriverError>;
}

/// Driver implementation with pluggable transport.
pub struct CdpDriver {
    pub browser_id: BrowserId,
    pub cfg: DriverConfig,
    pub bus: EventBus,
    pub registry: Arc<Registry>,
    mode: DriverMode,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    transport: Arc<dyn CdpTransport>,
    targets: DashMap<String, PageId>,
    sessions: DashMap<String, PageId>,
    page_activity: DashMap<PageId, Instant>,
    recorder: Arc<TrafficRecorder>,
    recorder_maintenance: Mutex<Option<RecorderMaintenance>>,
}

impl CdpDriver {
    pub fn new(mut cfg: DriverConfig, launch: LaunchOptions, bus: EventBus) -> Self {
        let mode = chrome_mode();
        let detected = resolve_chrome_path(&cfg);
        let wants_stub = matches!(mode, ChromeMode::ForceStub);
        let mut use_real = cfg.websocket_url.is_some() || matches!(mode, ChromeMode::ForceReal);
        let mut stub_reason: Option<&'static str> = wants_stub.then_some("forced_stub_mode");
        if !use_real && !wants_stub {
            use_real = detected.is_some();
        }

        if use_real && cfg.websocket_url.is_none() {
            if let Some(path) = detected.clone() {
                cfg.executable = path;
            } else {
                if matches!(mode, ChromeMode::ForceReal) {
                    panic!(
                        "Chrome/Chromium executable not found while WISPBROWSER_USE_REAL_CHROME=1"
                    );
                }
                warn!(
                    target: "cdp-driver",
                    "Chrome executable not found; falling back to stub transport"
                );
                use_real = false;
                stub_reason = Some("chrome_not_found");
            }
        }

        let transport: Arc<dyn CdpTransport> = if use_real {
            info!(target: "cdp-driver", "using real Chromium transport");
            Arc::new(ChromiumTransport::new(cfg.clone(), launch))
        } else {
            let reason = stub_reason.unwrap_or("unknown");
            warn!(
                target: "cdp-driver",
                mode = %DriverMode::Stub.as_str(),
                reason,
                remediation = "Install Chrome/Chromium and set WISPBROWSER_USE_REAL_CHROME=1 with WISPBROWSER_CHROME=/path/to/chrome or pass --chrome-path/--ws-url",
                "driver initialized without a real browser; page automation is disabled"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, bus, transport)
    }

    pub fn with_transport(
        cfg: DriverConfig,
        bus: EventBus,
        transport: Arc<dyn CdpTransport>,
    ) -> Self {
        let (recorder, _) = TrafficRecorder::new(512);
        let mode = transport.driver_mode();
        Self {
            browser_id: BrowserId::new(),
            cfg,
            bus,
            registry: Arc::new(Registry::new()),
            mode,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            transport,
            targets: DashMap::new(),
            sessions: DashMap::new(),
            page_activity: DashMap::new(),
            recorder: Arc::new(recorder),
            recorder_maintenance: Mutex::new(None),
        }
    }

    pub fn mode(&self) -> DriverMode {
        self.mode
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn recorder(&self) -> Arc<TrafficRecorder> {
        Arc::clone(&self.recorder)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RawEvent> {
        self.bus.subscribe()
    }

    pub async fn start(self: Arc<Self>) -> Result<(), DriverError> {
        // Idempotent: a second start is a no-op.
        {
            let guard = self.tasks.lock().await;
            if !guard.is_empty() {
                return Ok(());
            }
        }

        self.recorder
            .set_fetcher(Arc::new(DriverBodyFetcher {
                driver: Arc::downgrade(&self),
            }))
            .await;

        {
            let mut maintenance = self.recorder_maintenance.lock().await;
            if maintenance.is_none() {
                let handle = self.recorder.spawn_maintenance();
                *maintenance = Some(handle);
            }
        }

        self.transport.start().await?;
        let loop_task = spawn(Self::event_loop(Arc::clone(&self)));
        let forward_task = self.spawn_summary_forwarder();
        let mut guard = self.tasks.lock().await;
        guard.push(loop_task);
        guard.push(forward_task);
        drop(guard);
        info!(target: "cdp-driver", "event loop started");
        if self.cfg.websocket_url.is_none() && !self.mode.is_stub() {
            self.ensure_initial_page().await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let mut handles = self.tasks.lock().await;
        while let Some(handle) = handles.pop() {
            let _ = handle.await;
        }
        if let Some(handle) = self.recorder_maintenance.lock().await.take() {
            let _ = handle.shutdown().await;
        }
    }

    pub fn register_page(
        &self,
        page: PageId,
        session: SessionId,
        target_id: Option<String>,
        cdp_session: Option<String>,
    ) {
        if let Some(target) = target_id.as_ref() {
            self.targets.insert(target.clone(), page);
        }
        if let Some(cdp) = cdp_session.as_ref() {
            self.sessions.insert(cdp.clone(), page);
        }
        self.registry
            .insert_page(page, session, target_id, cdp_session);
        self.schedule_recorder_enable(page);
    }

    /// Open a new target and wait for its session to attach.
    pub async fn create_page(&self, url: &str) -> Result<PageId, DriverError> {
        let response = self
            .send_command("Target.createTarget", json!({ "url": url }))
            .await?;
        let target_id = response
            .get("targetId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint("createTarget missing targetId")
            })?
            .to_string();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(entry) = self.targets.get(&target_id) {
                let page = *entry.value();
                if self
                    .registry
                    .get(&page)
                    .map(|ctx| ctx.cdp_session.is_some())
                    .unwrap_or(false)
                {
                    return Ok(page);
                }
            }

            if Instant::now() >= deadline {
                return Err(DriverError::new(DriverErrorKind::Internal)
                    .with_hint("Timed out waiting for target attach"));
            }

            sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn close_page(&self, page: PageId) -> Result<(), DriverError> {
        let target_id = self
            .registry
            .get(&page)
            .and_then(|ctx| ctx.target_id)
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint(format!("no target for page {page:?}"))
            })?;
        self.send_command("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    pub async fn activate_page(&self, page: PageId) -> Result<(), DriverError> {
        let target_id = self
            .registry
            .get(&page)
            .and_then(|ctx| ctx.target_id)
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint(format!("no target for page {page:?}"))
            })?;
        self.send_command("Target.activateTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    /// Pages in open order, oldest first.
    pub fn pages(&self) -> Vec<PageId> {
        self.registry.pages_in_order()
    }

    pub fn recent_url(&self, page: PageId) -> Option<String> {
        self.registry.get(&page).and_then(|ctx| ctx.recent_url)
    }

    fn recorder_page_id(page: PageId) -> RecorderPageId {
        RecorderPageId(page.0)
    }

    fn schedule_recorder_enable(&self, page: PageId) {
        let recorder = Arc::clone(&self.recorder);
        let recorder_page = Self::recorder_page_id(page);
        spawn(async move {
            if let Err(err) = recorder.enable(recorder_page).await {
                warn!(target: "cdp-driver", ?err, "traffic recorder enable failed");
            }
        });
    }

    fn schedule_recorder_disable(&self, page: PageId) {
        let recorder = Arc::clone(&self.recorder);
        let recorder_page = Self::recorder_page_id(page);
        spawn(async move {
            if let Err(err) = recorder.disable(recorder_page).await {
                if !matches!(err, RecorderError::PageNotEnabled) {
                    warn!(target: "cdp-driver", ?err, "traffic recorder disable failed");
                }
            }
        });
    }

    async fn recorder_ingest(&self, page: PageId, event: RecorderEvent) {
        let recorder_page = Self::recorder_page_id(page);
        if let Err(err) = self.recorder.ingest(recorder_page, event).await {
            if matches!(err, RecorderError::PageNotEnabled) {
                self.schedule_recorder_enable(page);
            } else {
                warn!(target: "cdp-driver", ?err, "traffic recorder ingest failed");
            }
        }
    }

    fn spawn_summary_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
        let driver = Arc::clone(self);
        spawn(async move {
            let mut rx = driver.recorder.bus.subscribe();
            loop {
                tokio::select! {
                    _ = driver.shutdown.cancelled() => {
                        break;
                    }
                    summary = rx.recv() => {
                        match summary {
                            Ok(summary) => driver.emit_traffic_summary(&summary),
                            Err(broadcast::error::RecvError::Lagged(_)) => {
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }
        })
    }

    async fn event_loop(self: Arc<Self>) {
        debug!(target: "cdp-driver", "event loop entered");
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => {
                    break;
                }
                event = self.transport.next_event() => {
                    match event {
                        Some(ev) => {
                            backoff = MIN_BACKOFF;
                            self.handle_event(ev).await;
                        }
                        None => {
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            self.handle_transport_disconnect();
                            warn!(target = "cdp-driver", "transport stream ended; attempting restart");
                            if let Err(err) = self.transport.start().await {
                                warn!(target = "cdp-driver", ?err, "transport restart failed");
                            }
                            if self.shutdown.is_cancelled() {
                                break;
                            }
                            sleep(backoff).await;
                            backoff = (backoff + MIN_BACKOFF).min(MAX_BACKOFF);
                        }
                    }
                }
            }
        }
        debug!(target: "cdp-driver", "event loop exiting");
    }

    fn handle_transport_disconnect(&self) {
        let existing_pages: Vec<PageId> = self
            .registry
            .iter()
            .into_iter()
            .map(|(page, _)| page)
            .collect();
        let had_pages = !existing_pages.is_empty();

        for page in existing_pages {
            self.emit_page_event(page, None, "closed", timestamp_now());
            self.schedule_recorder_disable(page);
            self.registry.remove_page(&page);
        }

        self.targets.clear();
        self.sessions.clear();
        self.page_activity.clear();

        let message = if had_pages {
            "cdp transport restarted; active pages were reset"
        } else {
            "cdp transport restarted"
        };

        let _ = self.bus.send(RawEvent::Error {
            page: None,
            message: message.to_string(),
        });
    }

    async fn handle_event(&self, event: TransportEvent) {
        if let Err(err) = self.process_event(event).await {
            let _ = self.bus.send(RawEvent::Error {
                page: None,
                message: format!("cdp event handling error: {:?}", err),
            });
        }
    }

    async fn process_event(&self, event: TransportEvent) -> Result<(), DriverError> {
        metrics::record_event();
        match event.method.as_str() {
            "Target.targetCreated" => {
                self.on_target_created(event.params)?;
            }
            "Target.targetDestroyed" => {
                self.on_target_destroyed(event.params)?;
            }
            "Target.attachedToTarget" => {
                self.on_target_attached(event.params)?;
            }
            "Target.detachedFromTarget" => {
                self.on_target_detached(event.params)?;
            }
            "Target.targetInfoChanged" => {
                self.on_target_info_changed(event)?;
            }
            "Page.lifecycleEvent" => {
                self.on_page_lifecycle(event)?;
            }
            "Network.requestWillBeSent" => {
                self.on_network_request(event).await?;
            }
            "Network.responseReceived" => {
                self.on_network_response(event).await?;
            }
            "Network.loadingFinished" => {
                self.on_network_finished(event).await?;
            }
            "Network.loadingFailed" => {
                self.on_network_failed(event).await?;
            }
            "Runtime.exceptionThrown" => {
                self.on_exception_thrown(event)?;
            }
            _ => {
                debug!(target: "cdp-driver", method = %event.method, "unhandled cdp event");
            }
        }
        Ok(())
    }

    fn on_target_created(&self, params: Value) -> Result<(), DriverError> {
        let payload: TargetCreatedParams = decode_params(params)?;

        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        let target_id = payload.target_info.target_id;
        let page_id = PageId::new();
        let session = SessionId::new();

        self.targets.insert(target_id.clone(), page_id);
        self.registry
            .insert_page(page_id, session, Some(target_id), None);
        self.schedule_recorder_enable(page_id);

        if let Some(url) = payload.target_info.url.filter(|u| !u.is_empty()) {
            self.registry.set_recent_url(&page_id, url);
        }

        let opener = payload
            .target_info
            .opener_id
            .and_then(|opener_id| self.targets.get(&opener_id).map(|entry| *entry.value()));
        self.emit_page_event(page_id, opener, "opened", timestamp_now());
        Ok(())
    }

    fn on_target_destroyed(&self, params: Value) -> Result<(), DriverError> {
        let payload: TargetDestroyedParams = decode_params(params)?;

        if let Some((_, page)) = self.targets.remove(&payload.target_id) {
            self.sessions.retain(|_, v| *v != page);
            self.page_activity.remove(&page);
            self.registry.remove_page(&page);
            self.schedule_recorder_disable(page);
            self.emit_page_event(page, None, "closed", timestamp_now());
        }
        Ok(())
    }

    fn on_target_attached(&self, params: Value) -> Result<(), DriverError> {
        let payload: AttachedToTargetParams = decode_params(params)?;

        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        if let Some(page_entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *page_entry.value();
            self.sessions.insert(payload.session_id.clone(), page);
            self.registry.set_cdp_session(&page, payload.session_id);
            self.emit_page_event(page, None, "focus", timestamp_now());
        }

        Ok(())
    }

    fn on_target_detached(&self, params: Value) -> Result<(), DriverError> {
        let payload: DetachedFromTargetParams = decode_params(params)?;
        self.sessions.remove(&payload.session_id);
        Ok(())
    }

    fn on_target_info_changed(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: TargetInfoChangedParams = decode_params(event.params)?;

        if payload.target_info.target_type != "page" {
            return Ok(());
        }

        if let Some(page_entry) = self.targets.get(&payload.target_info.target_id) {
            let page = *page_entry.value();
            if let Some(url) = payload.target_info.url.as_ref().filter(|u| !u.is_empty()) {
                self.registry.set_recent_url(&page, url.clone());
                self.emit_navigation_event(page, url.clone(), timestamp_now());
            }
        }

        Ok(())
    }

    fn on_page_lifecycle(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: PageLifecycleParams = decode_params(event.params)?;

        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            let phase = payload.name.to_ascii_lowercase();
            let ts = payload
                .timestamp
                .map(|t| (t * 1_000.0) as u64)
                .unwrap_or_else(timestamp_now);
            self.emit_page_event(page, None, &phase, ts);
        }

        Ok(())
    }

    async fn on_network_request(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: NetworkRequestParams = decode_params(event.params)?;

        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            self.recorder_ingest(
                page,
                RecorderEvent::RequestWillBeSent {
                    request_id: payload.request_id,
                    url: payload.request.url,
                    method: payload.request.method,
                    headers: payload.request.headers.unwrap_or(Value::Null),
                    post_data: payload.request.post_data,
                },
            )
            .await;
        }
        Ok(())
    }

    async fn on_network_response(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: NetworkResponseParams = decode_params(event.params)?;

        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            self.recorder_ingest(
                page,
                RecorderEvent::ResponseReceived {
                    request_id: payload.request_id,
                    status: payload.response.status,
                    headers: payload.response.headers,
                },
            )
            .await;
        }
        Ok(())
    }

    async fn on_network_finished(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: NetworkFinishedParams = decode_params(event.params)?;

        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            self.recorder_ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: payload.request_id,
                },
            )
            .await;
        }
        Ok(())
    }

    async fn on_network_failed(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: NetworkFinishedParams = decode_params(event.params)?;

        if let Some(page) = self.page_from_session(event.session_id.as_ref()) {
            self.recorder_ingest(
                page,
                RecorderEvent::LoadingFailed {
                    request_id: payload.request_id,
                },
            )
            .await;
        }
        Ok(())
    }

    fn on_exception_thrown(&self, event: TransportEvent) -> Result<(), DriverError> {
        let payload: ExceptionThrownParams = decode_params(event.params)?;

        let message = payload
            .exception_details
            .exception
            .and_then(|ex| ex.description)
            .or(payload.exception_details.text)
            .unwrap_or_else(|| "runtime exception".to_string());

        let page = self.page_from_session(event.session_id.as_ref());

        let _ = self.bus.send(RawEvent::Error { page, message });
        Ok(())
    }

    fn page_from_session(&self, session: Option<&String>) -> Option<PageId> {
        session.and_then(|sid| self.sessions.get(sid).map(|entry| *entry.value()))
    }

    fn emit_page_event(&self, page: PageId, opener: Option<PageId>, phase: &str, ts: u64) {
        self.page_activity.insert(page, Instant::now());
        let _ = self.bus.send(RawEvent::PageLifecycle {
            page,
            opener,
            phase: phase.to_string(),
            ts,
        });
    }

    fn emit_navigation_event(&self, page: PageId, url: String, ts: u64) {
        self.page_activity.insert(page, Instant::now());
        let _ = self.bus.send(RawEvent::PageNavigated { page, url, ts });
    }

    fn emit_traffic_summary(&self, summary: &TrafficSummary) {
        metrics::record_traffic_summary();
        let page = PageId(summary.page.0);
        let _ = self.bus.send(RawEvent::TrafficSummary {
            page,
            requests: summary.requests,
            res2xx: summary.res2xx,
            res4xx: summary.res4xx,
            res5xx: summary.res5xx,
            inflight: summary.inflight,
            quiet: summary.quiet,
        });
    }

    async fn wait_for_dom_ready(&self, page: PageId, deadline: Instant) -> Result<(), DriverError> {
        loop {
            if Instant::now() >= deadline {
                return Err(DriverError::new(DriverErrorKind::NavTimeout)
                    .with_hint("DomReady wait timed out"));
            }

            let response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": "document.readyState",
                        "returnByValue": true,
                    }),
                )
                .await?;

            let ready = response
                .get("result")
                .and_then(|v| v.get("value"))
                .and_then(|v| v.as_str())
                .map(|state| matches!(state, "interactive" | "complete"))
                .unwrap_or(false);

            if ready {
                return Ok(());
            }

            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn wait_for_network_quiet(
        &self,
        page: PageId,
        window_ms: u64,
        max_inflight: u32,
        deadline: Instant,
    ) -> Result<(), DriverError> {
        loop {
            if Instant::now() >= deadline {
                return Err(DriverError::new(DriverErrorKind::NavTimeout)
                    .with_hint("NetworkQuiet wait timed out"));
            }

            let recorder_page = Self::recorder_page_id(page);
            if let Some(snapshot) = self.recorder.current_snapshot(recorder_page).await {
                if snapshot.inflight <= max_inflight as u64
                    && snapshot.since_last_activity_ms >= window_ms
                    && snapshot.quiet
                {
                    return Ok(());
                }
            }

            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn wait_for_frame_stable(
        &self,
        page: PageId,
        min_stable_ms: u64,
        deadline: Instant,
    ) -> Result<(), DriverError> {
        loop {
            if Instant::now() >= deadline {
                return Err(DriverError::new(DriverErrorKind::NavTimeout)
                    .with_hint("FrameStable wait timed out"));
            }

            let elapsed = self
                .page_activity
                .get(&page)
                .map(|entry| Instant::now().saturating_duration_since(*entry.value()))
                .unwrap_or(Duration::ZERO);

            if elapsed.as_millis() as u64 >= min_stable_ms {
                return Ok(());
            }

            sleep(Duration::from_millis(100)).await;
        }
    }

    async fn send_command(&self, method: &str, params: Value) -> Result<Value, DriverError> {
        let start = Instant::now();
        metrics::record_command(method);
        match self
            .transport
            .send_command(CommandTarget::Browser, method, params)
            .await
        {
            Ok(value) => {
                metrics::record_command_success(method, start.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::record_command_failure(method);
                Err(err)
            }
        }
    }

    async fn send_page_command(
        &self,
        page: PageId,
        method: &str,
        params: Value,
    ) -> Result<Value, DriverError> {
        if let Some(session) = self.registry.get_cdp_session(&page) {
            let start = Instant::now();
            metrics::record_command(method);
            match self
                .transport
                .send_command(CommandTarget::Session(session), method, params)
                .await
            {
                Ok(value) => {
                    metrics::record_command_success(method, start.elapsed());
                    Ok(value)
                }
                Err(err) => {
                    metrics::record_command_failure(method);
                    Err(err)
                }
            }
        } else {
            Err(DriverError::new(DriverErrorKind::Internal)
                .with_hint(format!("missing cdp session for page {page:?}")))
        }
    }

    async fn ensure_initial_page(&self) -> Result<(), DriverError> {
        if self
            .registry
            .iter()
            .iter()
            .any(|(_, ctx)| ctx.cdp_session.is_some())
        {
            return Ok(());
        }

        self.send_command("Target.createTarget", json!({ "url": "about:blank" }))
            .await?;
        Ok(())
    }

    async fn wait_for_page_ready(&self, page: PageId) -> Result<(), DriverError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if self
                .registry
                .get(&page)
                .map(|ctx| ctx.cdp_session.is_some())
                .unwrap_or(false)
            {
                return Ok(());
            }
            sleep(Duration::from_millis(50)).await;
        }
        Err(DriverError::new(DriverErrorKind::Internal)
            .with_hint(format!("cdp session not ready for page {page:?}")))
    }

    fn scope_expression(scope: &QueryScope) -> Result<String, DriverError> {
        match scope {
            QueryScope::Document => Ok("document".to_string()),
            QueryScope::Frame(frame_selector) => {
                let frame_literal = serde_json::to_string(frame_selector).map_err(|err| {
                    DriverError::new(DriverErrorKind::Internal).with_hint(err.to_string())
                })?;
                Ok(format!(
                    "(() => {{\n    try {{\n        const frameEl = document.querySelector({frame});\n        if (!frameEl) {{ return null; }}\n        const doc = frameEl.contentDocument || (frameEl.contentWindow ? frameEl.contentWindow.document : null);\n        return doc || null;\n    }} catch (err) {{\n        return null;\n    }}\n}})()",
                    frame = frame_literal
                ))
            }
        }
    }

    async fn dispatch_mouse_event(&self, page: PageId, payload: Value) -> Result<(), DriverError> {
        self.send_page_command(page, "Input.dispatchMouseEvent", payload)
            .await
            .map(|_| ())
    }
}

/// Pulls response bodies and the cookie jar for the recorder through the
/// driver's session commands.
struct DriverBodyFetcher {
    driver: Weak<CdpDriver>,
}

#[async_trait]
impl BodyFetcher for DriverBodyFetcher {
    async fn response_body(
        &self,
        page: RecorderPageId,
        request_id: &str,
    ) -> Result<String, FetchError> {
        let driver = self
            .driver
            .upgrade()
            .ok_or_else(|| FetchError::Other("driver gone".into()))?;
        let page = PageId(page.0);
        let response = driver
            .send_page_command(
                page,
                "Network.getResponseBody",
                json!({ "requestId": request_id }),
            )
            .await
            .map_err(|err| {
                let text = err.to_string();
                if text.contains("No resource with given identifier found") {
                    FetchError::BodyGone
                } else {
                    FetchError::Other(text)
                }
            })?;

        let body = response
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let base64_encoded = response
            .get("base64Encoded")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if base64_encoded {
            let bytes = STANDARD
                .decode(body)
                .map_err(|err| FetchError::Other(err.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            Ok(body.to_string())
        }
    }

    async fn page_cookies(&self, page: RecorderPageId) -> Result<Vec<Value>, FetchError> {
        let driver = self
            .driver
            .upgrade()
            .ok_or_else(|| FetchError::Other("driver gone".into()))?;
        let page = PageId(page.0);
        let cookies = driver
            .get_cookies(page)
            .await
            .map_err(|err| FetchError::Other(err.to_string()))?;
        cookies
            .into_iter()
            .map(|cookie| {
                serde_json::to_value(cookie).map_err(|err| FetchError::Other(err.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl Cdp for CdpDriver {
    async fn navigate(
        &self,
        page: PageId,
        url: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        self.send_page_command(page, "Page.navigate", json!({ "url": url }))
            .await?;
        self.registry.set_recent_url(&page, url.to_string());
        let start = Instant::now();
        let deadline_at = start
            .checked_add(deadline)
            .unwrap_or_else(|| start + Duration::from_secs(30));
        self.wait_for_dom_ready(page, deadline_at).await?;
        Ok(())
    }

    async fn back(&self, page: PageId) -> Result<(), DriverError> {
        let history = self
            .send_page_command(page, "Page.getNavigationHistory", json!({}))
            .await?;
        let current = history
            .get("currentIndex")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if current <= 0 {
            return Ok(());
        }
        let entry_id = history
            .get("entries")
            .and_then(|v| v.as_array())
            .and_then(|entries| entries.get((current - 1) as usize))
            .and_then(|entry| entry.get("id"))
            .and_then(|v| v.as_i64())
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint("navigation history entry missing id")
            })?;
        self.send_page_command(
            page,
            "Page.navigateToHistoryEntry",
            json!({ "entryId": entry_id }),
        )
        .await?;
        Ok(())
    }

    async fn reload(&self, page: PageId) -> Result<(), DriverError> {
        self.send_page_command(page, "Page.reload", json!({}))
            .await?;
        Ok(())
    }

    async fn query(&self, page: PageId, spec: QuerySpec) -> Result<Vec<Anchor>, DriverError> {
        self.wait_for_page_ready(page).await?;
        let selector_literal = serde_json::to_string(&spec.selector).map_err(|err| {
            DriverError::new(DriverErrorKind::Internal).with_hint(err.to_string())
        })?;

        let scope_expression = Self::scope_expression(&spec.scope)?;

        let expression = format!(
            "(() => {{\n    const scope = {scope};\n    if (!scope) {{ return []; }}\n    let elements;\n    try {{\n        elements = scope.querySelectorAll({selector});\n    }} catch (err) {{\n        return [];\n    }}\n    return Array.from(elements, (el) => {{\n        if (!el) {{ return null; }}\n        const rect = el.getBoundingClientRect();\n        return {{\n            backendNodeId: null,\n            x: Number.isFinite(rect.left) ? rect.left + rect.width / 2 : 0,\n            y: Number.isFinite(rect.top) ? rect.top + rect.height / 2 : 0\n        }};\n    }}).filter(Boolean);\n}})()",
            scope = scope_expression,
            selector = selector_literal
        );

        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                }),
            )
            .await?;

        let values = response
            .get("result")
            .and_then(|res| res.get("value"))
            .and_then(|val| val.as_array())
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint("query did not return an array value")
            })?;

        let mut anchors = Vec::with_capacity(values.len());
        for entry in values {
            let obj = entry.as_object().ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal)
                    .with_hint("query entry was not an object")
            })?;
            let x = obj.get("x").and_then(|v| v.as_f64()).ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal).with_hint("query entry missing 'x'")
            })?;
            let y = obj.get("y").and_then(|v| v.as_f64()).ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal).with_hint("query entry missing 'y'")
            })?;
            let backend = obj.get("backendNodeId").and_then(|v| v.as_u64());
            anchors.push(Anchor {
                backend_node_id: backend,
                x,
                y,
            });
        }

        Ok(anchors)
    }

    async fn click(
        &self,
        page: PageId,
        selector: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        self.wait_for_page_ready(page).await?;
        let poll_interval = Duration::from_millis(100);
        let deadline_instant = Instant::now() + deadline;
        let anchor = loop {
            let anchors = self.query(page, QuerySpec::css(selector)).await?;

            if let Some(anchor) = anchors.first() {
                break anchor.clone();
            }

            if Instant::now() >= deadline_instant {
                return Err(DriverError::new(DriverErrorKind::TargetNotFound)
                    .with_hint(format!("click target not found for selector '{selector}'")));
            }

            sleep(poll_interval).await;
        };

        self.click_at(page, anchor.x, anchor.y, 1).await
    }

    async fn click_at(
        &self,
        page: PageId,
        x: f64,
        y: f64,
        click_count: u32,
    ) -> Result<(), DriverError> {
        for _ in 0..click_count.max(1) {
            let press_payload = json!({
                "type": "mousePressed",
                "x": x,
                "y": y,
                "button": "left",
                "buttons": 1,
                "clickCount": 1,
                "pointerType": "mouse",
            });
            self.dispatch_mouse_event(page, press_payload).await?;

            let release_payload = json!({
                "type": "mouseReleased",
                "x": x,
                "y": y,
                "button": "left",
                "buttons": 1,
                "clickCount": 1,
                "pointerType": "mouse",
            });
            self.dispatch_mouse_event(page, release_payload).await?;
        }
        Ok(())
    }

    async fn move_mouse(&self, page: PageId, x: f64, y: f64) -> Result<(), DriverError> {
        self.dispatch_mouse_event(
            page,
            json!({
                "type": "mouseMoved",
                "x": x,
                "y": y,
                "pointerType": "mouse",
            }),
        )
        .await
    }

    async fn press_key(&self, page: PageId, key: KeyPress) -> Result<(), DriverError> {
        let (key_name, code, vk) = key.descriptor();
        self.send_page_command(
            page,
            "Input.dispatchKeyEvent",
            json!({
                "type": "rawKeyDown",
                "key": key_name,
                "code": code,
                "windowsVirtualKeyCode": vk,
                "nativeVirtualKeyCode": vk,
            }),
        )
        .await?;
        self.send_page_command(
            page,
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key_name,
                "code": code,
                "windowsVirtualKeyCode": vk,
                "nativeVirtualKeyCode": vk,
            }),
        )
        .await?;
        Ok(())
    }

    async fn insert_text(&self, page: PageId, text: &str) -> Result<(), DriverError> {
        self.send_page_command(page, "Input.insertText", json!({ "text": text }))
            .await
            .map(|_| ())
    }

    async fn type_text(
        &self,
        page: PageId,
        selector: &str,
        text: &str,
        deadline: Duration,
    ) -> Result<(), DriverError> {
        self.wait_for_page_ready(page).await?;
        let selector_literal = serde_json::to_string(&selector).map_err(|err| {
            DriverError::new(DriverErrorKind::Internal).with_hint(err.to_string())
        })?;

        let focus_expression = format!(
            "(() => {{\n    const el = document.querySelector({selector});\n    if (!el) {{ return {{ status: 'not-found' }}; }}\n    if (typeof el.focus === 'function') {{ el.focus(); }}\n    return {{ status: 'focused' }};\n}})()",
            selector = selector_literal,
        );

        let focus_retry_interval = Duration::from_millis(100);
        let focus_deadline = Instant::now() + deadline;

        loop {
            let focus_response = self
                .send_page_command(
                    page,
                    "Runtime.evaluate",
                    json!({
                        "expression": focus_expression,
                        "returnByValue": true,
                    }),
                )
                .await?;

            let status = focus_response
                .get("result")
                .and_then(|res| res.get("value"))
                .and_then(|val| val.get("status"))
                .and_then(|val| val.as_str())
                .unwrap_or("unknown");

            match status {
                "focused" => break,
                "not-found" => {
                    if Instant::now() >= focus_deadline {
                        return Err(DriverError::new(DriverErrorKind::TargetNotFound)
                            .with_hint(format!("selector '{selector}' not found before deadline")));
                    }
                    sleep(focus_retry_interval).await;
                }
                other => {
                    return Err(DriverError::new(DriverErrorKind::Internal).with_hint(format!(
                        "failed to focus element for selector '{selector}' (status: {other})"
                    )));
                }
            }
        }

        self.insert_text(page, text).await
    }

    async fn evaluate_script(&self, page: PageId, expression: &str) -> Result<Value, DriverError> {
        self.wait_for_page_ready(page).await?;
        let response = self
            .send_page_command(
                page,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            return Err(DriverError::new(DriverErrorKind::Internal)
                .with_hint("evaluate_script raised exception")
                .with_data(details.clone()));
        }

        let value = response
            .get("result")
            .and_then(|res| res.get("value"))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(value)
    }

    async fn scroll_by(&self, page: PageId, dx: f64, dy: f64) -> Result<(), DriverError> {
        self.dispatch_mouse_event(
            page,
            json!({
                "type": "mouseWheel",
                "x": 100.0,
                "y": 100.0,
                "deltaX": dx,
                "deltaY": dy,
                "pointerType": "mouse",
            }),
        )
        .await
    }

    async fn screenshot(&self, page: PageId, _deadline: Duration) -> Result<Vec<u8>, DriverError> {
        let response = self
            .send_page_command(page, "Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                DriverError::new(DriverErrorKind::Internal).with_hint("missing screenshot data")
            })?;
        let bytes = STANDARD.decode(data).map_err(|err| {
            DriverError::new(DriverErrorKind::Internal).with_hint(err.to_string())
        })?;
        Ok(bytes)
    }

    async fn get_cookies(&self, page: PageId) -> Result<Vec<CookieParam>, DriverError> {
        let response = self
            .send_page_command(page, "Network.getCookies", json!({}))
            .await?;
        let cookies = response
            .get("cookies")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()));
        serde_json::from_value(cookies).map_err(|err| {
            DriverError::new(DriverErrorKind::Internal)
                .with_hint(format!("failed to decode cookies: {err}"))
        })
    }

    async fn set_cookies(
        &self,
        page: PageId,
        cookies: &[CookieParam],
    ) -> Result<(), DriverError> {
        if cookies.is_empty() {
            return Ok(());
        }

        let payload: Vec<Value> = cookies
            .iter()
            .map(|cookie| {
                let mut map = serde_json::Map::new();
                map.insert("name".into(), Value::String(cookie.name.clone()));
                map.insert("value".into(), Value::String(cookie.value.clone()));
                if let Some(domain) = cookie.domain.as_ref() {
                    map.insert("domain".into(), Value::String(domain.clone()));
                }
                if let Some(path) = cookie.path.as_ref() {
                    map.insert("path".into(), Value::String(path.clone()));
                }
                if let Some(url) = cookie.url.as_ref() {
                    map.insert("url".into(), Value::String(url.clone()));
                }
                if let Some(expires) = cookie.expires {
                    if let Some(number) = Number::from_f64(expires) {
                        map.insert("expires".into(), Value::Number(number));
                    }
                }
                if let Some(flag) = cookie.http_only {
                    map.insert("httpOnly".into(), Value::Bool(flag));
                }
                if let Some(flag) = cookie.secure {
                    map.insert("secure".into(), Value::Bool(flag));
                }
                if let Some(site) = cookie.same_site.as_ref() {
                    map.insert("sameSite".into(), Value::String(site.clone()));
                }
                Value::Object(map)
            })
            .collect();

        self.send_page_command(page, "Network.setCookies", json!({ "cookies": payload }))
            .await?;
        Ok(())
    }

    async fn clear_cookies(&self, page: PageId) -> Result<(), DriverError> {
        self.send_page_command(page, "Network.clearBrowserCookies", json!({}))
            .await?;
        Ok(())
    }

    async fn set_user_agent(
        &self,
        page: PageId,
        user_agent: &str,
        accept_language: Option<&str>,
        platform: Option<&str>,
        metadata: Option<Value>,
    ) -> Result<(), DriverError> {
        let mut params = serde_json::Map::new();
        params.insert("userAgent".into(), Value::String(user_agent.to_string()));
        if let Some(lang) = accept_language {
            params.insert("acceptLanguage".into(), Value::String(lang.to_string()));
        }
        if let Some(platform) = platform {
            params.insert("platform".into(), Value::String(platform.to_string()));
        }
        if let Some(metadata) = metadata {
            params.insert("userAgentMetadata".into(), metadata);
        }
        self.send_page_command(page, "Emulation.setUserAgentOverride", Value::Object(params))
            .await?;
        Ok(())
    }

    async fn set_timezone(&self, page: PageId, timezone: &str) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Emulation.setTimezoneOverride",
            json!({ "timezoneId": timezone }),
        )
        .await?;
        Ok(())
    }

    async fn set_device_metrics(
        &self,
        page: PageId,
        width: u32,
        height: u32,
        device_scale_factor: f64,
        mobile: bool,
    ) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": width,
                "height": height,
                "deviceScaleFactor": device_scale_factor,
                "mobile": mobile,
            }),
        )
        .await?;
        Ok(())
    }

    async fn set_touch_emulation(&self, page: PageId, enabled: bool) -> Result<(), DriverError> {
        self.send_page_command(
            page,
            "Emulation.setTouchEmulationEnabled",
            json!({ "enabled": enabled }),
        )
        .await?;
        Ok(())
    }

    async fn set_network_capture(&self, page: PageId, enabled: bool) -> Result<(), DriverError> {
        if enabled {
            self.send_page_command(
                page,
                "Network.enable",
                json!({
                    "maxTotalBufferSize": 10_485_760u64,
                    "maxResourceBufferSize": 5_242_880u64,
                    "maxPostDataSize": 1_048_576u64,
                }),
            )
            .await?;
            self.schedule_recorder_enable(page);
        } else {
            self.send_page_command(page, "Network.disable", json!({}))
                .await?;
            self.schedule_recorder_disable(page);
        }
        Ok(())
    }

    async fn wait_basic(
        &self,
        page: PageId,
        gate: WaitGate,
        timeout: Duration,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;

        match gate {
            WaitGate::DomReady => self.wait_for_dom_ready(page, deadline).await,
            WaitGate::NetworkQuiet {
                window_ms,
                max_inflight,
            } => {
                self.wait_for_network_quiet(page, window_ms, max_inflight, deadline)
                    .await
            }
            WaitGate::FrameStable { min_stable_ms } => {
                self.wait_for_frame_stable(page, min_stable_ms, deadline)
                    .await
            }
        }
    }
}

fn decode_params<T: for<'de> Deserialize<'de>>(params: Value) -> Result<T, DriverError> {
    serde_json::from_value(params)
        .map_err(|err| DriverError::new(DriverErrorKind::Internal).with_hint(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct TargetCreatedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetDestroyedParams {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachedToTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct DetachedFromTargetParams {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetInfoChangedParams {
    #[serde(rename = "targetInfo")]
    target_info: TargetInfoPayload,
}

#[derive(Debug, Deserialize)]
struct TargetInfoPayload {
    #[serde(rename = "targetId")]
    target_id: String,
    #[serde(rename = "type")]
    target_type: String,
    url: Option<String>,
    #[serde(rename = "openerId")]
    opener_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageLifecycleParams {
    name: String,
    timestamp: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct NetworkRequestParams {
    #[serde(rename = "requestId")]
    request_id: String,
    request: NetworkRequestInfo,
}

#[derive(Debug, Deserialize)]
struct NetworkRequestInfo {
    url: String,
    method: String,
    headers: Option<Value>,
    #[serde(rename = "postData")]
    post_data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NetworkResponseParams {
    #[serde(rename = "requestId")]
    request_id: String,
    response: NetworkResponseInfo,
}

#[derive(Debug, Deserialize)]
struct NetworkResponseInfo {
    status: i64,
    headers: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct NetworkFinishedParams {
    #[serde(rename = "requestId")]
    request_id: String,
}

#[derive(Debug, Deserialize)]
struct ExceptionThrownParams {
    #[serde(rename = "exceptionDetails")]
    exception_details: ExceptionDetails,
}

#[derive(Debug, Deserialize)]
struct ExceptionDetails {
    text: Option<String>,
    exception: Option<ExceptionObject>,
}

#[derive(Debug, Deserialize)]
struct ExceptionObject {
    description: Option<String>,
}

fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ScriptedTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration as TokioDuration};

    async fn scripted_driver() -> (Arc<CdpDriver>, Arc<ScriptedTransport>, mpsc::Sender<TransportEvent>) {
        let (bus, _rx) = crate::event_bus(8);
        let (transport, tx) = ScriptedTransport::with_events();
        let driver = Arc::new(CdpDriver::with_transport(
            DriverConfig::default(),
            bus,
            transport.clone() as Arc<dyn CdpTransport>,
        ));
        Arc::clone(&driver).start().await.expect("start driver");
        (driver, transport, tx)
    }

    fn attach_page(driver: &CdpDriver) -> PageId {
        let page = PageId::new();
        driver.register_page(page, SessionId::new(), Some("t-1".into()), Some("s-1".into()));
        page
    }

    #[tokio::test]
    async fn ignores_unknown_events() {
        let (driver, _transport, tx) = scripted_driver().await;
        let mut rx = driver.subscribe();

        tx.send(TransportEvent {
            method: "Test.Event".into(),
            params: Value::Null,
            session_id: None,
        })
        .await
        .unwrap();

        let result = timeout(TokioDuration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "unexpected raw event broadcast: {result:?}");

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn commands_route_through_transport() {
        let (driver, transport, _tx) = scripted_driver().await;
        let page = attach_page(&driver);

        transport.push_response(Value::Null);
        transport.push_response(json!({
            "result": { "value": "complete" }
        }));

        driver
            .navigate(page, "https://example.com", Duration::from_secs(5))
            .await
            .expect("navigate through transport");

        transport.push_response(json!({ "data": STANDARD.encode("img") }));
        driver
            .screenshot(page, Duration::from_secs(5))
            .await
            .expect("screenshot through transport");

        let commands = transport.sent_commands();
        assert!(commands.iter().any(|(method, _)| method == "Page.navigate"));
        assert!(commands
            .iter()
            .any(|(method, _)| method == "Page.captureScreenshot"));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn click_at_dispatches_press_and_release() {
        let (driver, transport, _tx) = scripted_driver().await;
        let page = attach_page(&driver);

        driver
            .click_at(page, 10.0, 20.0, 2)
            .await
            .expect("click at coordinates");

        let mouse_events: Vec<_> = transport
            .sent_commands()
            .into_iter()
            .filter(|(method, _)| method == "Input.dispatchMouseEvent")
            .collect();
        assert_eq!(mouse_events.len(), 4);
        assert_eq!(mouse_events[0].1["type"], json!("mousePressed"));
        assert_eq!(mouse_events[1].1["type"], json!("mouseReleased"));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn press_key_sends_down_and_up() {
        let (driver, transport, _tx) = scripted_driver().await;
        let page = attach_page(&driver);

        driver
            .press_key(page, KeyPress::Escape)
            .await
            .expect("press escape");

        let key_events: Vec<_> = transport
            .sent_commands()
            .into_iter()
            .filter(|(method, _)| method == "Input.dispatchKeyEvent")
            .collect();
        assert_eq!(key_events.len(), 2);
        assert_eq!(key_events[0].1["type"], json!("rawKeyDown"));
        assert_eq!(key_events[0].1["windowsVirtualKeyCode"], json!(27));
        assert_eq!(key_events[1].1["type"], json!("keyUp"));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn cookie_commands_roundtrip() {
        let (driver, transport, _tx) = scripted_driver().await;
        let page = attach_page(&driver);

        transport.push_response(json!({
            "cookies": [ { "name": "sid", "value": "abc", "domain": ".example.com" } ]
        }));

        let cookies = driver.get_cookies(page).await.expect("get cookies");
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sid");

        driver
            .set_cookies(page, &cookies)
            .await
            .expect("set cookies");
        driver.clear_cookies(page).await.expect("clear cookies");

        let commands = transport.sent_commands();
        assert!(commands.iter().any(|(m, _)| m == "Network.getCookies"));
        let set = commands
            .iter()
            .find(|(m, _)| m == "Network.setCookies")
            .expect("setCookies command");
        assert_eq!(set.1["cookies"][0]["name"], json!("sid"));
        assert!(commands
            .iter()
            .any(|(m, _)| m == "Network.clearBrowserCookies"));

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn network_events_flow_into_the_recorder() {
        let (driver, transport, tx) = scripted_driver().await;

        let page = PageId::new();
        driver.register_page(
            page,
            SessionId::new(),
            Some("target-net".into()),
            Some("session-net".into()),
        );
        // Let the deferred recorder enable land before events arrive.
        sleep(Duration::from_millis(20)).await;

        tx.send(TransportEvent {
            method: "Network.requestWillBeSent".into(),
            params: json!({
                "requestId": "req-1",
                "request": {
                    "url": "https://example.com/api",
                    "method": "GET",
                    "headers": {"accept": "*/*"}
                }
            }),
            session_id: Some("session-net".into()),
        })
        .await
        .unwrap();

        tx.send(TransportEvent {
            method: "Network.responseReceived".into(),
            params: json!({
                "requestId": "req-1",
                "response": { "status": 200, "headers": {} }
            }),
            session_id: Some("session-net".into()),
        })
        .await
        .unwrap();

        // Body fetch + cookie jar responses for completion.
        transport.push_response(json!({ "body": "{\"ok\":true}", "base64Encoded": false }));
        transport.push_response(json!({ "cookies": [] }));

        tx.send(TransportEvent {
            method: "Network.loadingFinished".into(),
            params: json!({ "requestId": "req-1" }),
            session_id: Some("session-net".into()),
        })
        .await
        .unwrap();

        let recorder = driver.recorder();
        let recorder_page = CdpDriver::recorder_page_id(page);
        let drained = timeout(TokioDuration::from_secs(1), async {
            loop {
                let drained = recorder.drain(recorder_page).await.unwrap_or_default();
                if !drained.is_empty() {
                    break drained;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("captured exchange");

        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].url, "https://example.com/api");
        assert_eq!(drained[0].status, Some(200));

        driver.shutdown().await;
    }

    struct DisconnectingTransport {
        start_calls: AtomicUsize,
        next_calls: AtomicUsize,
        rx: Mutex<mpsc::Receiver<TransportEvent>>,
    }

    impl DisconnectingTransport {
        fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    start_calls: AtomicUsize::new(0),
                    next_calls: AtomicUsize::new(0),
                    rx: Mutex::new(rx),
                }),
                tx,
            )
        }

        fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CdpTransport for DisconnectingTransport {
        async fn start(&self) -> Result<(), DriverError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            let call = self.next_calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                return None;
            }
            let mut guard = self.rx.lock().await;
            guard.recv().await
        }

        async fn send_command(
            &self,
            _target: CommandTarget,
            _method: &str,
            _params: Value,
        ) -> Result<Value, DriverError> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn event_loop_recovers_after_transport_disconnect() {
        let (bus, mut rx) = crate::event_bus(8);
        let (transport, tx) = DisconnectingTransport::new_pair();
        let driver = Arc::new(CdpDriver::with_transport(
            DriverConfig::default(),
            bus,
            transport.clone() as Arc<dyn CdpTransport>,
        ));

        let stale_page = PageId::new();
        driver.register_page(
            stale_page,
            SessionId::new(),
            Some("stale-target".into()),
            Some("stale-session".into()),
        );

        Arc::clone(&driver).start().await.expect("start driver");
        assert_eq!(transport.start_calls(), 1);

        timeout(TokioDuration::from_millis(300), async {
            while transport.start_calls() < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transport restart");

        tx.send(TransportEvent {
            method: "Target.targetCreated".into(),
            params: json!({
                "targetInfo": {
                    "targetId": "page-1",
                    "type": "page",
                    "url": "https://example.com"
                }
            }),
            session_id: None,
        })
        .await
        .unwrap();

        let mut saw_closed = false;
        let mut saw_opened = false;
        let mut saw_error = false;

        for _ in 0..6 {
            let evt = timeout(TokioDuration::from_millis(300), rx.recv())
                .await
                .expect("receive raw event")
                .expect("raw event payload");
            match evt {
                RawEvent::PageLifecycle { page, phase, .. } => {
                    if phase == "closed" && page == stale_page {
                        saw_closed = true;
                    } else if phase == "opened" {
                        saw_opened = true;
                    }
                }
                RawEvent::Error { .. } => saw_error = true,
                _ => {}
            }
            if saw_closed && saw_opened && saw_error {
                break;
            }
        }

        assert!(saw_closed, "expected closed lifecycle for stale page");
        assert!(saw_opened, "expected opened lifecycle after restart");
        assert!(saw_error, "expected transport restart error notification");
        assert!(driver.registry.get(&stale_page).is_none());

        driver.shutdown().await;
    }

    #[tokio::test]
    async fn wait_basic_network_quiet_resolves_on_snapshot() {
        use traffic_recorder::TrafficSnapshot;

        let (driver, transport, _tx) = scripted_driver().await;
        let page = attach_page(&driver);
        let recorder_page = CdpDriver::recorder_page_id(page);
        driver
            .recorder()
            .enable(recorder_page)
            .await
            .expect("enable recorder page");

        driver
            .recorder()
            .update_snapshot(
                recorder_page,
                TrafficSnapshot {
                    requests: 10,
                    res2xx: 10,
                    res4xx: 0,
                    res5xx: 0,
                    inflight: 0,
                    captured: 2,
                    quiet: true,
                    since_last_activity_ms: 2_000,
                },
            )
            .await
            .expect("update snapshot");

        let baseline = transport.sent_commands().len();

        driver
            .wait_basic(
                page,
                WaitGate::NetworkQuiet {
                    window_ms: 500,
                    max_inflight: 0,
                },
                Duration::from_secs(1),
            )
            .await
            .expect("wait_basic network quiet");

        assert_eq!(transport.sent_commands().len(), baseline);

        driver.shutdown().await;
    }
}
