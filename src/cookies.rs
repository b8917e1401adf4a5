//! Cookie persistence: a JSON array of cookie objects on disk, round-tripped
//! through the driver's cookie commands.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cdp_driver::CookieParam;

pub const DEFAULT_COOKIE_DIR: &str = "./configs/cookies";

/// Resolve the file path for a named cookie jar, creating the directory.
pub fn cookie_file_path(name: &str, directory: Option<&Path>) -> Result<PathBuf> {
    let dir = directory
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIE_DIR));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create cookie directory {}", dir.display()))?;
    let file = if name.ends_with(".json") {
        name.to_string()
    } else {
        format!("{name}.json")
    };
    Ok(dir.join(file))
}

pub fn write_cookie_file(path: &Path, cookies: &[CookieParam]) -> Result<()> {
    let payload = serde_json::to_string_pretty(cookies).context("failed to encode cookies")?;
    fs::write(path, payload)
        .with_context(|| format!("failed to write cookie file {}", path.display()))?;
    Ok(())
}

pub fn read_cookie_file(path: &Path) -> Result<Vec<CookieParam>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read cookie file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse cookie file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cookie_files_roundtrip() {
        let dir = tempdir().unwrap();
        let path = cookie_file_path("session", Some(dir.path())).unwrap();
        assert!(path.to_string_lossy().ends_with("session.json"));

        let mut cookie = CookieParam::new("sid", "abc123");
        cookie.domain = Some(".example.com".into());
        cookie.secure = Some(true);
        write_cookie_file(&path, &[cookie]).unwrap();

        let loaded = read_cookie_file(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "sid");
        assert_eq!(loaded[0].domain.as_deref(), Some(".example.com"));
    }

    #[test]
    fn json_suffix_is_not_duplicated() {
        let dir = tempdir().unwrap();
        let path = cookie_file_path("jar.json", Some(dir.path())).unwrap();
        assert!(path.to_string_lossy().ends_with("jar.json"));
        assert!(!path.to_string_lossy().ends_with("jar.json.json"));
    }

    #[test]
    fn unparseable_files_error_with_path_context() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "not json").unwrap();
        let err = read_cookie_file(&path).unwrap_err();
        assert!(err.to_string().contains("broken.json"));
    }
}
