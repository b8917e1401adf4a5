//! Facade tests over a scripted transport: every forwarder should resolve to
//! the expected CDP commands without a real browser.

use std::sync::Arc;

use cdp_driver::ids::{PageId, SessionId};
use cdp_driver::transport::{CdpTransport, ScriptedTransport};
use cdp_driver::{event_bus, CdpDriver, DriverConfig};
use serde_json::{json, Value};
use wispbrowser::browser::Browser;

fn facade() -> (Browser, Arc<ScriptedTransport>) {
    let (bus, _rx) = event_bus(8);
    let transport = ScriptedTransport::new();
    let driver = Arc::new(CdpDriver::with_transport(
        DriverConfig::default(),
        bus,
        transport.clone() as Arc<dyn CdpTransport>,
    ));
    let page = PageId::new();
    driver.register_page(page, SessionId::new(), Some("t-0".into()), Some("s-0".into()));
    (Browser::from_parts(driver, page), transport)
}

fn dom_ready() -> Value {
    json!({ "result": { "value": "complete" } })
}

#[tokio::test]
async fn goto_strips_locale_before_navigating() {
    let (browser, transport) = facade();

    transport.push_response(Value::Null); // Page.navigate
    transport.push_response(dom_ready());

    browser
        .goto("https://example.com/post?locale=de_DE")
        .await
        .expect("navigation");

    let commands = transport.sent_commands();
    let nav = commands
        .iter()
        .find(|(method, _)| method == "Page.navigate")
        .expect("navigate command");
    assert_eq!(nav.1["url"], json!("https://example.com/post?"));
}

#[tokio::test]
async fn goto_raw_keeps_the_url_verbatim() {
    let (browser, transport) = facade();

    transport.push_response(Value::Null);
    transport.push_response(dom_ready());

    browser
        .goto_raw("https://example.com/post?locale=de_DE")
        .await
        .expect("navigation");

    let nav = transport
        .sent_commands()
        .into_iter()
        .find(|(method, _)| method == "Page.navigate")
        .expect("navigate command");
    assert_eq!(nav.1["url"], json!("https://example.com/post?locale=de_DE"));
}

#[tokio::test]
async fn screenshot_appends_png_suffix() {
    let (browser, transport) = facade();
    let dir = tempfile::tempdir().unwrap();
    let name = dir.path().join("shot").to_string_lossy().to_string();

    transport.push_response(json!({
        "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"png-bytes")
    }));

    let path = browser.screenshot(&name).await.expect("screenshot");
    assert!(path.to_string_lossy().ends_with("shot.png"));
    assert_eq!(std::fs::read(&path).unwrap(), b"png-bytes");
}

#[tokio::test]
async fn save_base64_image_decodes_data_urls() {
    let (browser, _transport) = facade();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("img.png");

    let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, b"image");
    browser
        .save_base64_image(&format!("data:image/png;base64,{encoded}"), &path)
        .expect("decode and write");

    assert_eq!(std::fs::read(&path).unwrap(), b"image");
}

#[tokio::test]
async fn save_cookies_writes_a_json_array_file() {
    let (browser, transport) = facade();
    let dir = tempfile::tempdir().unwrap();

    transport.push_response(json!({
        "cookies": [
            { "name": "sid", "value": "abc", "domain": ".example.com" },
            { "name": "theme", "value": "dark" }
        ]
    }));

    let path = browser
        .save_cookies("jar", Some(dir.path()))
        .await
        .expect("save cookies");

    let raw = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<Value> = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0]["name"], json!("sid"));
}

#[tokio::test]
async fn load_cookies_sets_and_reloads() {
    let (browser, transport) = facade();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jar.json");
    std::fs::write(
        &path,
        r#"[{"name": "sid", "value": "abc", "domain": ".example.com"}]"#,
    )
    .unwrap();

    browser
        .load_cookies_from_path(&path)
        .await
        .expect("load cookies");

    let commands = transport.sent_commands();
    let set = commands
        .iter()
        .find(|(method, _)| method == "Network.setCookies")
        .expect("setCookies command");
    assert_eq!(set.1["cookies"][0]["name"], json!("sid"));
    assert!(commands.iter().any(|(method, _)| method == "Page.reload"));
}

#[tokio::test]
async fn type_like_human_inserts_characters_one_by_one() {
    let (browser, transport) = facade();

    transport.push_response(json!({
        "result": { "value": { "status": "focused" } }
    }));

    browser
        .type_like_human("input[name=q]", "hi")
        .await
        .expect("typing");

    let inserted: Vec<String> = transport
        .sent_commands()
        .into_iter()
        .filter(|(method, _)| method == "Input.insertText")
        .map(|(_, params)| params["text"].as_str().unwrap_or_default().to_string())
        .collect();
    // focus round inserts the empty string, then one command per character
    assert_eq!(inserted, vec!["", "h", "i"]);
}

#[tokio::test]
async fn scroll_page_sends_wheel_events() {
    let (browser, transport) = facade();

    browser.scroll_page(240.0).await.expect("scroll");

    let wheel = transport
        .sent_commands()
        .into_iter()
        .find(|(method, params)| {
            method == "Input.dispatchMouseEvent" && params["type"] == json!("mouseWheel")
        })
        .expect("wheel event");
    assert_eq!(wheel.1["deltaY"], json!(240.0));
}

#[tokio::test]
async fn press_arrow_rejects_unknown_directions() {
    let (browser, _transport) = facade();
    assert!(browser.press_arrow("diagonal").await.is_err());
}

#[tokio::test]
async fn traffic_capture_toggles_network_domain() {
    let (browser, transport) = facade();

    browser
        .start_traffic_capture(wispbrowser::UrlFilter {
            contains: vec!["/api/".into()],
            matches: vec![],
        })
        .await
        .expect("start capture");
    browser.stop_traffic_capture().await.expect("stop capture");

    let commands = transport.sent_commands();
    assert!(commands.iter().any(|(m, _)| m == "Network.enable"));
    assert!(commands.iter().any(|(m, _)| m == "Network.disable"));

    let filter = browser.driver().recorder().current_filter().await;
    assert_eq!(filter.contains, vec!["/api/".to_string()]);
}
