use std::sync::Arc;

use cdp_driver::ids::{PageId, SessionId};
use cdp_driver::transport::{CdpTransport, ScriptedTransport};
use cdp_driver::{event_bus, Cdp, CdpDriver, DriverConfig};
use stealth::{MobileProfileBuilder, StealthControl, StealthRuntime};

fn driver_with_page() -> (Arc<CdpDriver>, Arc<ScriptedTransport>, PageId) {
    let (bus, _rx) = event_bus(8);
    let transport = ScriptedTransport::new();
    let driver = Arc::new(CdpDriver::with_transport(
        DriverConfig::default(),
        bus,
        transport.clone() as Arc<dyn CdpTransport>,
    ));
    let page = PageId::new();
    driver.register_page(page, SessionId::new(), Some("t".into()), Some("s".into()));
    (driver, transport, page)
}

#[tokio::test]
async fn apply_and_retrieve_profile() {
    let runtime = StealthRuntime::new();
    runtime.add_profile(MobileProfileBuilder::default().seed(5).generate());

    let profile_id = runtime.apply_stealth("https://example.com").await.unwrap();
    assert!(runtime
        .applied_profile_for("https://example.com")
        .map(|p| p.profile_id == profile_id)
        .unwrap_or(false));
}

#[tokio::test]
async fn configure_page_requires_an_applied_profile() {
    let (driver, _transport, page) = driver_with_page();
    let runtime = StealthRuntime::with_adapter(driver as Arc<dyn Cdp + Send + Sync>);
    let err = runtime.configure_page(page, "https://missing.com").await;
    assert!(err.is_err());
}

#[tokio::test]
async fn configure_page_injects_fingerprint_commands() {
    let (driver, transport, page) = driver_with_page();
    let runtime = StealthRuntime::with_adapter(driver as Arc<dyn Cdp + Send + Sync>);
    runtime.add_profile(MobileProfileBuilder::default().seed(9).generate());

    runtime.apply_stealth("https://example.com").await.unwrap();
    runtime
        .configure_page(page, "https://example.com")
        .await
        .expect("inject profile");

    let commands = transport.sent_commands();
    let ua = commands
        .iter()
        .find(|(method, _)| method == "Emulation.setUserAgentOverride")
        .expect("user agent override");
    assert!(ua.1["userAgent"]
        .as_str()
        .unwrap()
        .contains("Mobile Safari"));
    assert_eq!(ua.1["userAgentMetadata"]["platform"], "Android");
    assert!(commands
        .iter()
        .any(|(method, _)| method == "Emulation.setDeviceMetricsOverride"));
    assert!(commands
        .iter()
        .any(|(method, _)| method == "Emulation.setTouchEmulationEnabled"));
}
