//! Contract tests bridging the full driver surface to a real Chromium binary.
//! Ignored by default because they require Chrome/Chromium on the host machine.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use cdp_driver::{event_bus, Cdp, CdpDriver, DriverConfig, LaunchOptions};
use tokio::time::sleep;

fn contract_enabled() -> bool {
    env::var("WISPBROWSER_CDP_CONTRACT")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

async fn setup_driver() -> Arc<CdpDriver> {
    let (bus, _rx) = event_bus(32);
    let driver = Arc::new(CdpDriver::new(
        DriverConfig::default(),
        LaunchOptions::default(),
        bus,
    ));
    Arc::clone(&driver).start().await.expect("driver start");
    driver
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set WISPBROWSER_CDP_CONTRACT=1 and WISPBROWSER_USE_REAL_CHROME=1"]
async fn contract_navigate_and_type() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (WISPBROWSER_CDP_CONTRACT not enabled)");
        return;
    }

    let driver = setup_driver().await;
    let page = driver
        .create_page("about:blank")
        .await
        .expect("create initial page");

    driver
        .navigate(page, "https://example.com", Duration::from_secs(15))
        .await
        .expect("navigate succeeds");

    driver
        .type_text(page, "body", "wispbrowser", Duration::from_secs(5))
        .await
        .expect("type_text succeeds");

    driver.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Chrome/Chromium; set WISPBROWSER_CDP_CONTRACT=1 and WISPBROWSER_USE_REAL_CHROME=1"]
async fn contract_captures_traffic() {
    if !contract_enabled() {
        eprintln!("skipping CDP contract test (WISPBROWSER_CDP_CONTRACT not enabled)");
        return;
    }

    let driver = setup_driver().await;
    let page = driver.create_page("about:blank").await.expect("create page");

    driver
        .set_network_capture(page, true)
        .await
        .expect("enable capture");
    driver
        .navigate(page, "https://example.com", Duration::from_secs(15))
        .await
        .expect("navigate succeeds");

    let recorder = driver.recorder();
    let recorder_page = traffic_recorder::PageId(page.0);

    let mut captured = Vec::new();
    let start = std::time::Instant::now();
    while start.elapsed() < Duration::from_secs(10) && captured.is_empty() {
        captured = recorder.drain(recorder_page).await.unwrap_or_default();
        sleep(Duration::from_millis(200)).await;
    }

    assert!(!captured.is_empty(), "expected at least one captured exchange");
    driver.shutdown().await;
}
