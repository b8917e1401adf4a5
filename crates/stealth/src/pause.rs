//! Categorized pause bands and the sleeper behind the human-like waits.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

/// Named delay categories used across the facade.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PauseBand {
    VeryShort,
    Short,
    Medium,
    Long,
    VeryLong,
}

impl PauseBand {
    /// Randomized band bounds in seconds.
    pub fn random_range(&self) -> (f64, f64) {
        match self {
            PauseBand::VeryShort => (0.5, 1.0),
            PauseBand::Short => (1.0, 2.0),
            PauseBand::Medium => (2.0, 3.0),
            PauseBand::Long => (3.0, 4.0),
            PauseBand::VeryLong => (4.0, 5.0),
        }
    }

    /// Fixed band duration in seconds.
    pub fn fixed_secs(&self) -> u64 {
        match self {
            PauseBand::VeryShort => 1,
            PauseBand::Short => 2,
            PauseBand::Medium => 3,
            PauseBand::Long => 4,
            PauseBand::VeryLong => 5,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "very_short" => Some(PauseBand::VeryShort),
            "short" => Some(PauseBand::Short),
            "medium" => Some(PauseBand::Medium),
            "long" => Some(PauseBand::Long),
            "very_long" => Some(PauseBand::VeryLong),
            _ => None,
        }
    }
}

/// Introduces fixed or randomized delays.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sleeper;

impl Sleeper {
    pub fn new() -> Self {
        Self
    }

    pub async fn wait(&self, secs: f64) {
        tokio::time::sleep(Duration::from_secs_f64(secs.max(0.0))).await;
    }

    pub async fn wait_random(&self, min_secs: f64, max_secs: f64) {
        tokio::time::sleep(sample_random(min_secs, max_secs)).await;
    }

    /// Random wait within a named band; a custom `(min, max)` overrides the
    /// band bounds. Unknown names fall back to the shortest band.
    pub async fn band_random(&self, band: &str, custom: Option<(f64, f64)>) {
        let resolved = PauseBand::parse(band).unwrap_or_else(|| {
            warn!(target: "stealth", band, "unknown pause band, using 'very_short'");
            PauseBand::VeryShort
        });
        let (min, max) = custom.unwrap_or_else(|| resolved.random_range());
        self.wait_random(min, max).await;
    }

    /// Fixed wait for a named band. Unknown names fall back to the medium band.
    pub async fn band_fixed(&self, band: &str) {
        let resolved = PauseBand::parse(band).unwrap_or_else(|| {
            warn!(target: "stealth", band, "unknown pause band, using 'medium'");
            PauseBand::Medium
        });
        self.wait(resolved.fixed_secs() as f64).await;
    }
}

pub(crate) fn sample_random(min_secs: f64, max_secs: f64) -> Duration {
    let (low, high) = if min_secs <= max_secs {
        (min_secs, max_secs)
    } else {
        (max_secs, min_secs)
    };
    let secs = if (high - low).abs() < f64::EPSILON {
        low
    } else {
        rand::thread_rng().gen_range(low..=high)
    };
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_cover_half_second_to_five_seconds() {
        assert_eq!(PauseBand::VeryShort.random_range(), (0.5, 1.0));
        assert_eq!(PauseBand::VeryLong.random_range(), (4.0, 5.0));
        assert_eq!(PauseBand::Medium.fixed_secs(), 3);
    }

    #[test]
    fn unknown_band_names_do_not_parse() {
        assert!(PauseBand::parse("instant").is_none());
        assert_eq!(PauseBand::parse("short"), Some(PauseBand::Short));
    }

    #[test]
    fn sampled_durations_stay_in_bounds() {
        for _ in 0..64 {
            let duration = sample_random(0.5, 1.0);
            assert!(duration >= Duration::from_millis(500));
            assert!(duration <= Duration::from_millis(1000));
        }
        // inverted bounds are tolerated
        let duration = sample_random(2.0, 1.0);
        assert!(duration >= Duration::from_secs(1));
        assert!(duration <= Duration::from_secs(2));
    }
}
