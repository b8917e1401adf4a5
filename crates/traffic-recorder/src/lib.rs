//! Request-level network traffic capture.
//!
//! Correlates the three CDP network events (`requestWillBeSent`,
//! `responseReceived`, `loadingFinished`) into one completed exchange record per
//! request id, deduplicates, and exposes a pull-based drain API next to roll-up
//! counters with quiet detection. The recorder has no transport of its own; the
//! driver's event pump feeds it and response bodies come back through the
//! [`BodyFetcher`] seam.

pub mod config;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{RecorderConfig, UrlFilter};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier representing a page for which the recorder is collecting data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PageId(pub Uuid);

impl PageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PageId {
    fn default() -> Self {
        Self::new()
    }
}

/// Network events understood by the recorder.
#[derive(Clone, Debug)]
pub enum RecorderEvent {
    RequestWillBeSent {
        request_id: String,
        url: String,
        method: String,
        headers: Value,
        post_data: Option<String>,
    },
    ResponseReceived {
        request_id: String,
        status: i64,
        headers: Option<Value>,
    },
    LoadingFinished {
        request_id: String,
    },
    LoadingFailed {
        request_id: String,
    },
}

/// Body of a completed exchange.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

/// One fully correlated request/response record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CapturedExchange {
    pub request_id: String,
    pub url: String,
    pub method: String,
    pub request_headers: Value,
    pub post_data: Option<String>,
    pub status: Option<i64>,
    pub response_headers: Option<Value>,
    pub body: ResponseBody,
    /// Browser cookie jar at completion time, verbatim from the driver.
    pub cookies: Vec<Value>,
}

/// Cumulative counters exposed via the pull-based snapshot API.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub requests: u64,
    pub res2xx: u64,
    pub res4xx: u64,
    pub res5xx: u64,
    pub inflight: u64,
    pub captured: u64,
    pub quiet: bool,
    pub since_last_activity_ms: u64,
}

/// Summary payload published on the broadcast bus.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrafficSummary {
    pub page: PageId,
    pub requests: u64,
    pub res2xx: u64,
    pub res4xx: u64,
    pub res5xx: u64,
    pub inflight: u64,
    pub captured: u64,
    pub quiet: bool,
    pub since_last_activity_ms: u64,
}

/// Errors emitted by the recorder surface.
#[derive(Clone, Debug, Error)]
pub enum RecorderError {
    #[error("page not enabled")]
    PageNotEnabled,
    #[error("internal error: {0}")]
    Internal(String),
}

/// Errors returned by [`BodyFetcher`] implementations.
#[derive(Clone, Debug, Error)]
pub enum FetchError {
    /// The browser already discarded the resource; the record completes with an
    /// empty body.
    #[error("resource body no longer available")]
    BodyGone,
    #[error("{0}")]
    Other(String),
}

/// Driver-side seam used to pull response bodies and the cookie jar once an
/// exchange finishes loading.
#[async_trait]
pub trait BodyFetcher: Send + Sync {
    async fn response_body(&self, page: PageId, request_id: &str)
        -> Result<String, FetchError>;
    async fn page_cookies(&self, page: PageId) -> Result<Vec<Value>, FetchError>;
}

/// Broadcast channel for traffic summaries.
pub type SummaryBus = broadcast::Sender<TrafficSummary>;

struct PendingExchange {
    url: String,
    method: String,
    request_headers: Value,
    post_data: Option<String>,
    status: Option<i64>,
    response_headers: Option<Value>,
}

#[derive(Default)]
struct CaptureState {
    pending: HashMap<String, PendingExchange>,
    fresh: Vec<CapturedExchange>,
    history: Vec<CapturedExchange>,
    processed: HashSet<String>,
}

struct PageState {
    counters: Mutex<Counters>,
    capture: Mutex<CaptureState>,
    snapshot: RwLock<TrafficSnapshot>,
}

impl PageState {
    fn new(config: &RecorderConfig) -> Self {
        Self {
            counters: Mutex::new(Counters::new(config)),
            capture: Mutex::new(CaptureState::default()),
            snapshot: RwLock::new(TrafficSnapshot::default()),
        }
    }
}

#[derive(Debug)]
struct Counters {
    requests: u64,
    res2xx: u64,
    res4xx: u64,
    res5xx: u64,
    inflight: u64,
    captured: u64,
    last_activity: Instant,
    last_publish: Instant,
    last_quiet: bool,
}

impl Counters {
    fn new(config: &RecorderConfig) -> Self {
        let now = Instant::now();
        let last_publish = now
            .checked_sub(Duration::from_millis(config.min_publish_interval_ms))
            .unwrap_or(now);
        Self {
            requests: 0,
            res2xx: 0,
            res4xx: 0,
            res5xx: 0,
            inflight: 0,
            captured: 0,
            last_activity: now,
            last_publish,
            last_quiet: false,
        }
    }

    fn register(&mut self, event: &RecorderEvent, now: Instant) {
        match event {
            RecorderEvent::RequestWillBeSent { .. } => {
                self.requests += 1;
                self.inflight += 1;
                self.last_activity = now;
            }
            RecorderEvent::ResponseReceived { status, .. } => {
                match *status {
                    200..=299 => self.res2xx += 1,
                    400..=499 => self.res4xx += 1,
                    500..=599 => self.res5xx += 1,
                    _ => {}
                }
                self.last_activity = now;
            }
            RecorderEvent::LoadingFinished { .. } | RecorderEvent::LoadingFailed { .. } => {
                if self.inflight > 0 {
                    self.inflight -= 1;
                }
                self.last_activity = now;
            }
        }
    }

    fn quiet(&self, now: Instant, config: &RecorderConfig) -> bool {
        if self.inflight != 0 {
            return false;
        }
        let since_last = now.saturating_duration_since(self.last_activity);
        since_last.as_millis() as u64 >= config.quiet_window_ms
    }

    fn evaluate_publish(&mut self, quiet: bool, now: Instant, config: &RecorderConfig) -> bool {
        let interval_elapsed = now.saturating_duration_since(self.last_publish).as_millis() as u64
            >= config.min_publish_interval_ms;
        let quiet_trigger = quiet && !self.last_quiet;
        self.last_quiet = quiet;
        if interval_elapsed || quiet_trigger {
            self.last_publish = now;
            true
        } else {
            false
        }
    }

    fn build_summary(&self, page: PageId, config: &RecorderConfig, now: Instant) -> TrafficSummary {
        let since_last = now.saturating_duration_since(self.last_activity).as_millis() as u64;
        let quiet = self.inflight == 0 && since_last >= config.quiet_window_ms;
        TrafficSummary {
            page,
            requests: self.requests,
            res2xx: self.res2xx,
            res4xx: self.res4xx,
            res5xx: self.res5xx,
            inflight: self.inflight,
            captured: self.captured,
            quiet,
            since_last_activity_ms: since_last,
        }
    }
}

/// The recorder proper. One instance serves every page the driver registers.
pub struct TrafficRecorder {
    pub bus: SummaryBus,
    states: DashMap<PageId, Arc<PageState>>,
    filter: RwLock<UrlFilter>,
    fetcher: RwLock<Option<Arc<dyn BodyFetcher>>>,
    config: RecorderConfig,
}

/// Handle returned by [`TrafficRecorder::spawn_maintenance`] for lifecycle control.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Gracefully stop the maintenance loop and await its completion.
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            match task.await {
                Ok(_) => Ok(()),
                Err(err) if err.is_cancelled() => Ok(()),
                Err(err) => Err(err),
            }
        } else {
            Ok(())
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl TrafficRecorder {
    pub fn new(buffer: usize) -> (Self, broadcast::Receiver<TrafficSummary>) {
        Self::with_config(RecorderConfig::default(), buffer)
    }

    pub fn with_config(
        config: RecorderConfig,
        buffer: usize,
    ) -> (Self, broadcast::Receiver<TrafficSummary>) {
        let (tx, rx) = broadcast::channel(buffer);
        (
            Self {
                bus: tx,
                states: DashMap::new(),
                filter: RwLock::new(UrlFilter::default()),
                fetcher: RwLock::new(None),
                config,
            },
            rx,
        )
    }

    /// Install the driver-side body fetcher. Until one is set, completed records
    /// carry an empty body and no cookies.
    pub async fn set_fetcher(&self, fetcher: Arc<dyn BodyFetcher>) {
        let mut guard = self.fetcher.write().await;
        *guard = Some(fetcher);
    }

    pub async fn set_filter(&self, filter: UrlFilter) {
        let mut guard = self.filter.write().await;
        *guard = filter;
    }

    pub async fn current_filter(&self) -> UrlFilter {
        self.filter.read().await.clone()
    }

    /// Spawn a background task that periodically re-evaluates quiet timeouts.
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let recorder = Arc::clone(self);
        let cancel = CancellationToken::new();
        let loop_token = cancel.clone();
        let tick_interval = Duration::from_millis(self.config.maintenance_interval_ms.max(1));
        let task = tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => {
                        break;
                    }
                    _ = ticker.tick() => {
                        recorder.evaluate_timeouts().await;
                    }
                }
            }
        });
        MaintenanceHandle {
            cancel,
            task: Some(task),
        }
    }

    pub async fn enable(&self, page: PageId) -> Result<(), RecorderError> {
        if self.states.contains_key(&page) {
            return Ok(());
        }
        self.states
            .insert(page, Arc::new(PageState::new(&self.config)));
        Ok(())
    }

    pub async fn disable(&self, page: PageId) -> Result<(), RecorderError> {
        self.states
            .remove(&page)
            .map(|_| ())
            .ok_or(RecorderError::PageNotEnabled)
    }

    pub fn is_enabled(&self, page: PageId) -> bool {
        self.states.contains_key(&page)
    }

    /// Feed one network event through the correlation state machine.
    pub async fn ingest(&self, page: PageId, event: RecorderEvent) -> Result<(), RecorderError> {
        let state = self
            .states
            .get(&page)
            .ok_or(RecorderError::PageNotEnabled)?
            .clone();
        let now = Instant::now();

        match &event {
            RecorderEvent::RequestWillBeSent {
                request_id,
                url,
                method,
                headers,
                post_data,
            } => {
                let filter = self.filter.read().await;
                let mut capture = state.capture.lock().await;
                if filter.should_capture(url) && !capture.processed.contains(request_id) {
                    capture.pending.insert(
                        request_id.clone(),
                        PendingExchange {
                            url: url.clone(),
                            method: method.clone(),
                            request_headers: headers.clone(),
                            post_data: post_data.clone(),
                            status: None,
                            response_headers: None,
                        },
                    );
                }
            }
            RecorderEvent::ResponseReceived {
                request_id,
                status,
                headers,
            } => {
                let mut capture = state.capture.lock().await;
                if let Some(pending) = capture.pending.get_mut(request_id) {
                    pending.status = Some(*status);
                    pending.response_headers = headers.clone();
                }
            }
            RecorderEvent::LoadingFinished { request_id } => {
                self.complete_exchange(page, &state, request_id).await;
            }
            RecorderEvent::LoadingFailed { request_id } => {
                let mut capture = state.capture.lock().await;
                capture.pending.remove(request_id);
            }
        }

        let mut counters = state.counters.lock().await;
        counters.register(&event, now);
        let summary = counters.build_summary(page, &self.config, now);
        let should_publish = counters.evaluate_publish(summary.quiet, now, &self.config);
        drop(counters);

        {
            let mut snapshot = state.snapshot.write().await;
            *snapshot = snapshot_from_summary(&summary);
        }

        if should_publish {
            self.publish_summary(summary);
        }

        Ok(())
    }

    async fn complete_exchange(&self, page: PageId, state: &Arc<PageState>, request_id: &str) {
        let pending = {
            let mut capture = state.capture.lock().await;
            if capture.processed.contains(request_id) {
                capture.pending.remove(request_id);
                return;
            }
            match capture.pending.remove(request_id) {
                Some(pending) => pending,
                None => return,
            }
        };

        // Filters may have changed since the request went out; re-check before
        // paying for the body fetch.
        if !self.filter.read().await.should_capture(&pending.url) {
            return;
        }

        let fetcher = self.fetcher.read().await.clone();
        let (body, cookies) = match fetcher {
            Some(fetcher) => {
                let body = match fetcher.response_body(page, request_id).await {
                    Ok(raw) => parse_body(raw, self.config.max_body_bytes),
                    Err(FetchError::BodyGone) => {
                        debug!(target: "traffic-recorder", request_id, "response body already discarded");
                        ResponseBody::Empty
                    }
                    Err(FetchError::Other(message)) => {
                        warn!(target: "traffic-recorder", request_id, %message, "response body fetch failed");
                        ResponseBody::Empty
                    }
                };
                let cookies = fetcher.page_cookies(page).await.unwrap_or_default();
                (body, cookies)
            }
            None => (ResponseBody::Empty, Vec::new()),
        };

        let exchange = CapturedExchange {
            request_id: request_id.to_string(),
            url: pending.url,
            method: pending.method,
            request_headers: pending.request_headers,
            post_data: pending.post_data,
            status: pending.status,
            response_headers: pending.response_headers,
            body,
            cookies,
        };

        let mut capture = state.capture.lock().await;
        capture.processed.insert(request_id.to_string());
        capture.fresh.push(exchange.clone());
        capture.history.push(exchange);

        let mut counters = state.counters.lock().await;
        counters.captured += 1;
    }

    /// Pull-based snapshot API: exchanges completed since the previous drain.
    pub async fn drain(&self, page: PageId) -> Result<Vec<CapturedExchange>, RecorderError> {
        let state = self
            .states
            .get(&page)
            .ok_or(RecorderError::PageNotEnabled)?
            .clone();
        let mut capture = state.capture.lock().await;
        Ok(std::mem::take(&mut capture.fresh))
    }

    /// Every exchange captured for the page since it was enabled.
    pub async fn history(&self, page: PageId) -> Result<Vec<CapturedExchange>, RecorderError> {
        let state = self
            .states
            .get(&page)
            .ok_or(RecorderError::PageNotEnabled)?
            .clone();
        let capture = state.capture.lock().await;
        Ok(capture.history.clone())
    }

    pub fn publish_summary(&self, summary: TrafficSummary) {
        let _ = self.bus.send(summary);
    }

    pub async fn current_snapshot(&self, page: PageId) -> Option<TrafficSnapshot> {
        let state = self.states.get(&page)?;
        let guard = state.snapshot.read().await;
        Some(guard.clone())
    }

    pub async fn update_snapshot(
        &self,
        page: PageId,
        snapshot: TrafficSnapshot,
    ) -> Result<(), RecorderError> {
        let state = self
            .states
            .get(&page)
            .ok_or(RecorderError::PageNotEnabled)?
            .clone();
        let mut guard = state.snapshot.write().await;
        *guard = snapshot;
        Ok(())
    }

    pub async fn evaluate_timeouts(&self) {
        let now = Instant::now();
        for entry in self.states.iter() {
            let page = *entry.key();
            let state = entry.value().clone();
            let mut counters = state.counters.lock().await;
            let quiet = counters.quiet(now, &self.config);
            let should_publish = counters.evaluate_publish(quiet, now, &self.config);
            let summary = counters.build_summary(page, &self.config, now);
            drop(counters);

            if should_publish {
                {
                    let mut snapshot = state.snapshot.write().await;
                    *snapshot = snapshot_from_summary(&summary);
                }
                self.publish_summary(summary);
            }
        }
    }
}

fn snapshot_from_summary(summary: &TrafficSummary) -> TrafficSnapshot {
    TrafficSnapshot {
        requests: summary.requests,
        res2xx: summary.res2xx,
        res4xx: summary.res4xx,
        res5xx: summary.res5xx,
        inflight: summary.inflight,
        captured: summary.captured,
        quiet: summary.quiet,
        since_last_activity_ms: summary.since_last_activity_ms,
    }
}

/// Parse a raw body: JSON when possible (dropping the `extensions` member to
/// trim GraphQL payloads), raw text otherwise, truncated at `max_bytes`.
fn parse_body(raw: String, max_bytes: usize) -> ResponseBody {
    if raw.is_empty() {
        return ResponseBody::Empty;
    }

    let raw = if raw.len() > max_bytes {
        let mut end = max_bytes;
        while end > 0 && !raw.is_char_boundary(end) {
            end -= 1;
        }
        raw[..end].to_string()
    } else {
        raw
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(mut value) => {
            if let Some(object) = value.as_object_mut() {
                object.remove("extensions");
            }
            ResponseBody::Json(value)
        }
        Err(_) => ResponseBody::Text(raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_event(id: &str, url: &str) -> RecorderEvent {
        RecorderEvent::RequestWillBeSent {
            request_id: id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            headers: serde_json::json!({"accept": "*/*"}),
            post_data: None,
        }
    }

    #[tokio::test]
    async fn ingest_updates_and_publishes_summary() {
        let (recorder, mut rx) = TrafficRecorder::new(8);
        let page = PageId::new();
        recorder.enable(page).await.expect("enable page");

        recorder
            .ingest(page, request_event("1", "https://example.com/a"))
            .await
            .expect("record request");

        let summary = rx.recv().await.expect("receive summary");
        assert_eq!(summary.page, page);
        assert_eq!(summary.requests, 1);
        assert_eq!(summary.inflight, 1);
        assert!(!summary.quiet);

        let snapshot = recorder.current_snapshot(page).await.expect("snapshot");
        assert_eq!(snapshot.requests, 1);
        assert_eq!(snapshot.inflight, 1);
    }

    #[tokio::test]
    async fn correlates_three_events_into_one_record() {
        let (recorder, _rx) = TrafficRecorder::new(8);
        let page = PageId::new();
        recorder.enable(page).await.unwrap();

        recorder
            .ingest(page, request_event("9", "https://example.com/api"))
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::ResponseReceived {
                    request_id: "9".into(),
                    status: 200,
                    headers: Some(serde_json::json!({"content-type": "application/json"})),
                },
            )
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "9".into(),
                },
            )
            .await
            .unwrap();

        let drained = recorder.drain(page).await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].status, Some(200));
        assert_eq!(drained[0].url, "https://example.com/api");

        // A second drain yields nothing new; history keeps the record.
        assert!(recorder.drain(page).await.unwrap().is_empty());
        assert_eq!(recorder.history(page).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_finish_events_are_deduplicated() {
        let (recorder, _rx) = TrafficRecorder::new(8);
        let page = PageId::new();
        recorder.enable(page).await.unwrap();

        recorder
            .ingest(page, request_event("7", "https://example.com/x"))
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "7".into(),
                },
            )
            .await
            .unwrap();
        // Late replay of the same id opens no second record.
        recorder
            .ingest(page, request_event("7", "https://example.com/x"))
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "7".into(),
                },
            )
            .await
            .unwrap();

        assert_eq!(recorder.drain(page).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn filtered_urls_are_not_captured_but_still_counted() {
        let (recorder, _rx) = TrafficRecorder::new(8);
        let page = PageId::new();
        recorder.enable(page).await.unwrap();
        recorder
            .set_filter(UrlFilter {
                contains: vec!["/graphql".into()],
                matches: vec![],
            })
            .await;

        recorder
            .ingest(page, request_event("1", "https://example.com/asset.png"))
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "1".into(),
                },
            )
            .await
            .unwrap();

        assert!(recorder.drain(page).await.unwrap().is_empty());
        let snapshot = recorder.current_snapshot(page).await.unwrap();
        assert_eq!(snapshot.requests, 1);
    }

    #[tokio::test]
    async fn failed_loads_discard_pending_entries() {
        let (recorder, _rx) = TrafficRecorder::new(8);
        let page = PageId::new();
        recorder.enable(page).await.unwrap();

        recorder
            .ingest(page, request_event("3", "https://example.com/fail"))
            .await
            .unwrap();
        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFailed {
                    request_id: "3".into(),
                },
            )
            .await
            .unwrap();

        assert!(recorder.drain(page).await.unwrap().is_empty());
        let snapshot = recorder.current_snapshot(page).await.unwrap();
        assert_eq!(snapshot.inflight, 0);
    }

    #[tokio::test]
    async fn quiet_detection_emits_summary_after_timeout() {
        let config = RecorderConfig {
            quiet_window_ms: 50,
            min_publish_interval_ms: 1,
            maintenance_interval_ms: 10,
            ..RecorderConfig::default()
        };
        let (recorder, mut rx) = TrafficRecorder::with_config(config, 8);
        let page = PageId::new();
        recorder.enable(page).await.expect("enable page");

        recorder
            .ingest(page, request_event("1", "https://example.com"))
            .await
            .expect("request event");
        let _ = rx.recv().await;

        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "1".into(),
                },
            )
            .await
            .expect("finish event");

        tokio::time::sleep(Duration::from_millis(60)).await;
        recorder.evaluate_timeouts().await;

        let summary = rx.recv().await.expect("quiet summary");
        assert_eq!(summary.page, page);
        assert!(summary.quiet);
        assert_eq!(summary.inflight, 0);
    }

    #[tokio::test]
    async fn maintenance_loop_emits_quiet_summary() {
        let config = RecorderConfig {
            quiet_window_ms: 40,
            min_publish_interval_ms: 1,
            maintenance_interval_ms: 10,
            ..RecorderConfig::default()
        };
        let (recorder_raw, mut rx) = TrafficRecorder::with_config(config, 8);
        let recorder = Arc::new(recorder_raw);
        let maint = recorder.spawn_maintenance();

        let page = PageId::new();
        recorder.enable(page).await.expect("enable page");

        recorder
            .ingest(page, request_event("1", "https://example.com"))
            .await
            .expect("request event");
        let _ = rx.recv().await;

        recorder
            .ingest(
                page,
                RecorderEvent::LoadingFinished {
                    request_id: "1".into(),
                },
            )
            .await
            .expect("finish event");

        tokio::time::sleep(Duration::from_millis(60)).await;

        let summary = tokio::time::timeout(Duration::from_millis(200), async move {
            let mut inner_rx = rx;
            loop {
                if let Ok(summary) = inner_rx.recv().await {
                    if summary.quiet {
                        break summary;
                    }
                }
            }
        })
        .await
        .expect("quiet summary timeout");

        assert!(summary.quiet);
        assert_eq!(summary.inflight, 0);

        maint.shutdown().await.expect("shutdown maintenance");
    }

    #[test]
    fn body_parsing_drops_extensions_and_truncates() {
        let body = parse_body(
            r#"{"data": {"ok": true}, "extensions": {"trace": "x"}}"#.to_string(),
            1024,
        );
        match body {
            ResponseBody::Json(value) => {
                assert!(value.get("extensions").is_none());
                assert_eq!(value["data"]["ok"], serde_json::json!(true));
            }
            other => panic!("expected json body, got {other:?}"),
        }

        let truncated = parse_body("abcdefgh".to_string(), 4);
        match truncated {
            ResponseBody::Text(text) => assert_eq!(text, "abcd"),
            other => panic!("expected text body, got {other:?}"),
        }

        assert!(matches!(parse_body(String::new(), 16), ResponseBody::Empty));
    }
}
