//! Logging bootstrap: console layer plus two daily-rolling files — everything
//! at one path, warnings and errors alone at another.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[derive(Clone, Debug)]
pub struct LogOptions {
    pub directory: PathBuf,
    pub console: bool,
    pub level: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            console: true,
            level: "info".into(),
        }
    }
}

impl LogOptions {
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directory = dir.into();
        self
    }

    pub fn console(mut self, flag: bool) -> Self {
        self.console = flag;
        self
    }

    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Install the global subscriber. The returned guards must be held for the
/// process lifetime or buffered log lines are lost.
pub fn init_logging(options: &LogOptions) -> Result<Vec<WorkerGuard>> {
    std::fs::create_dir_all(&options.directory).with_context(|| {
        format!(
            "failed to create log directory {}",
            options.directory.display()
        )
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(options.level.clone()));

    let (all_writer, all_guard) = tracing_appender::non_blocking(rolling::daily(
        &options.directory,
        "wispbrowser.log",
    ));
    let (warn_writer, warn_guard) = tracing_appender::non_blocking(rolling::daily(
        &options.directory,
        "wispbrowser.warn.log",
    ));

    let all_layer = tracing_subscriber::fmt::layer()
        .with_writer(all_writer)
        .with_ansi(false);
    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_writer)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(all_layer)
        .with(warn_layer);

    if options.console {
        registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .ok();
    } else {
        registry.try_init().ok();
    }

    Ok(vec![all_guard, warn_guard])
}

/// Location used for failure screenshots, next to the log files.
pub fn failure_screen_dir(log_dir: &Path) -> PathBuf {
    log_dir.join("failure_screens")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn init_creates_the_log_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("logs/run");
        let options = LogOptions::default().directory(&nested).console(false);
        let guards = init_logging(&options).expect("logging init");
        assert!(nested.is_dir());
        assert_eq!(guards.len(), 2);
    }

    #[test]
    fn failure_screens_live_under_the_log_dir() {
        let path = failure_screen_dir(Path::new("logs"));
        assert_eq!(path, PathBuf::from("logs/failure_screens"));
    }
}
