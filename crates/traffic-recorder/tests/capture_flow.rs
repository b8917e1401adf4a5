use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use traffic_recorder::config::UrlFilter;
use traffic_recorder::{
    BodyFetcher, FetchError, PageId, RecorderEvent, ResponseBody, TrafficRecorder,
};

struct StubFetcher {
    body: Result<String, FetchError>,
}

#[async_trait]
impl BodyFetcher for StubFetcher {
    async fn response_body(&self, _page: PageId, _request_id: &str) -> Result<String, FetchError> {
        self.body.clone()
    }

    async fn page_cookies(&self, _page: PageId) -> Result<Vec<serde_json::Value>, FetchError> {
        Ok(vec![json!({"name": "sid", "value": "abc"})])
    }
}

async fn run_exchange(recorder: &TrafficRecorder, page: PageId, id: &str, url: &str) {
    recorder
        .ingest(
            page,
            RecorderEvent::RequestWillBeSent {
                request_id: id.into(),
                url: url.into(),
                method: "POST".into(),
                headers: json!({"content-type": "application/json"}),
                post_data: Some(r#"{"query":"{feed}"}"#.into()),
            },
        )
        .await
        .unwrap();
    recorder
        .ingest(
            page,
            RecorderEvent::ResponseReceived {
                request_id: id.into(),
                status: 200,
                headers: Some(json!({"content-type": "application/json"})),
            },
        )
        .await
        .unwrap();
    recorder
        .ingest(
            page,
            RecorderEvent::LoadingFinished {
                request_id: id.into(),
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn completed_records_carry_body_and_cookies() {
    let (recorder, _rx) = TrafficRecorder::new(16);
    recorder
        .set_fetcher(Arc::new(StubFetcher {
            body: Ok(r#"{"data": {"ok": 1}, "extensions": {"t": 2}}"#.into()),
        }))
        .await;

    let page = PageId::new();
    recorder.enable(page).await.unwrap();
    run_exchange(&recorder, page, "req-1", "https://example.com/graphql").await;

    let drained = recorder.drain(page).await.unwrap();
    assert_eq!(drained.len(), 1);
    let record = &drained[0];
    assert_eq!(record.method, "POST");
    assert_eq!(record.status, Some(200));
    assert_eq!(record.cookies.len(), 1);
    match &record.body {
        ResponseBody::Json(value) => {
            assert!(value.get("extensions").is_none());
            assert_eq!(value["data"]["ok"], json!(1));
        }
        other => panic!("expected json body, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_body_still_completes_the_record() {
    let (recorder, _rx) = TrafficRecorder::new(16);
    recorder
        .set_fetcher(Arc::new(StubFetcher {
            body: Err(FetchError::BodyGone),
        }))
        .await;

    let page = PageId::new();
    recorder.enable(page).await.unwrap();
    run_exchange(&recorder, page, "req-2", "https://example.com/api").await;

    let drained = recorder.drain(page).await.unwrap();
    assert_eq!(drained.len(), 1);
    assert!(matches!(drained[0].body, ResponseBody::Empty));
}

#[tokio::test]
async fn runtime_filter_changes_apply_to_later_requests() {
    let (recorder, _rx) = TrafficRecorder::new(16);
    let page = PageId::new();
    recorder.enable(page).await.unwrap();

    run_exchange(&recorder, page, "a", "https://example.com/api/feed").await;
    recorder
        .set_filter(UrlFilter {
            contains: vec!["/never".into()],
            matches: vec![],
        })
        .await;
    run_exchange(&recorder, page, "b", "https://example.com/api/feed").await;

    let history = recorder.history(page).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].request_id, "a");
}

#[tokio::test]
async fn disabled_pages_reject_events() {
    let (recorder, _rx) = TrafficRecorder::new(16);
    let page = PageId::new();
    let result = recorder
        .ingest(
            page,
            RecorderEvent::LoadingFinished {
                request_id: "x".into(),
            },
        )
        .await;
    assert!(result.is_err());
}
