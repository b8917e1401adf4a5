//! JavaScript snippets injected through `Runtime.evaluate`.
//!
//! Selector arguments are embedded as JSON string literals so arbitrary CSS
//! selectors stay safe to interpolate.

pub const HIGHLIGHT_ELEMENT: &str = "el.style.border = '3px solid red'";

pub const SCROLL_ELEMENT_TO_BOTTOM: &str = "el.scrollTop = el.scrollHeight";

pub const SCROLL_INTO_VIEW: &str = "el.scrollIntoView({block: 'center'})";

pub const OPEN_NEW_WINDOW: &str = "window.open('');";

fn literal(selector: &str) -> String {
    serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
}

/// Wrap an `el`-based statement in a selector lookup; evaluates to `true` when
/// the element was found.
pub fn with_element(selector: &str, statement: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); if (!el) {{ return false; }} {stmt}; return true; }})()",
        sel = literal(selector),
        stmt = statement,
    )
}

/// Distance from the top of the viewport to the element's bounding box.
pub fn element_top(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); return el ? el.getBoundingClientRect().top : null; }})()",
        sel = literal(selector),
    )
}

/// Current string value of an input element.
pub fn input_value(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({sel}); return el ? String(el.value ?? '') : ''; }})()",
        sel = literal(selector),
    )
}

/// Whether the element's center sits within `tolerance` (fraction of the
/// viewport) of the viewport center, and the element intersects the viewport.
pub fn is_element_centered(selector: &str, tolerance: f64) -> String {
    format!(
        r#"(() => {{
    const el = document.querySelector({sel});
    if (!el) {{ return false; }}
    const box = el.getBoundingClientRect();
    const vw = window.innerWidth || document.documentElement.clientWidth;
    const vh = window.innerHeight || document.documentElement.clientHeight;
    const cx = box.left + box.width / 2;
    const cy = box.top + box.height / 2;
    const centeredX = Math.abs(cx - vw / 2) <= vw * {tol};
    const centeredY = Math.abs(cy - vh / 2) <= vh * {tol};
    return centeredX && centeredY &&
        box.top < vh && box.bottom >= 0 &&
        box.left < vw && box.right >= 0;
}})()"#,
        sel = literal(selector),
        tol = tolerance,
    )
}
