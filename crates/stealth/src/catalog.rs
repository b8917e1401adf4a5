//! Curated mobile Chrome user-agent catalog.
//!
//! Entries are real UA shapes for recent Android Chrome builds; selection is
//! filtered by major version and drawn with the caller's RNG so profile
//! generation stays deterministic under a seed.

use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Clone, Copy, Debug)]
pub struct UaEntry {
    pub major: u32,
    pub full_version: &'static str,
    pub android_version: &'static str,
    pub platform_version: &'static str,
    pub model: &'static str,
}

impl UaEntry {
    pub fn user_agent(&self) -> String {
        format!(
            "Mozilla/5.0 (Linux; Android {android}; {model}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{major}.0.0.0 Mobile Safari/537.36",
            android = self.android_version,
            model = self.model,
            major = self.major,
        )
    }
}

pub const MOBILE_CHROME: &[UaEntry] = &[
    UaEntry {
        major: 120,
        full_version: "120.0.6099.144",
        android_version: "13",
        platform_version: "13.0.0",
        model: "Pixel 7",
    },
    UaEntry {
        major: 120,
        full_version: "120.0.6099.230",
        android_version: "14",
        platform_version: "14.0.0",
        model: "SM-S918B",
    },
    UaEntry {
        major: 121,
        full_version: "121.0.6167.101",
        android_version: "13",
        platform_version: "13.0.0",
        model: "SM-G991B",
    },
    UaEntry {
        major: 122,
        full_version: "122.0.6261.119",
        android_version: "14",
        platform_version: "14.0.0",
        model: "Pixel 8",
    },
    UaEntry {
        major: 122,
        full_version: "122.0.6261.64",
        android_version: "12",
        platform_version: "12.0.0",
        model: "M2101K6G",
    },
    UaEntry {
        major: 123,
        full_version: "123.0.6312.80",
        android_version: "14",
        platform_version: "14.0.0",
        model: "Pixel 8 Pro",
    },
    UaEntry {
        major: 123,
        full_version: "123.0.6312.118",
        android_version: "13",
        platform_version: "13.0.0",
        model: "SM-A536B",
    },
    UaEntry {
        major: 124,
        full_version: "124.0.6367.82",
        android_version: "14",
        platform_version: "14.0.0",
        model: "SM-S928B",
    },
    UaEntry {
        major: 124,
        full_version: "124.0.6367.113",
        android_version: "13",
        platform_version: "13.0.0",
        model: "CPH2449",
    },
    UaEntry {
        major: 125,
        full_version: "125.0.6422.53",
        android_version: "14",
        platform_version: "14.0.0",
        model: "Pixel 7a",
    },
    UaEntry {
        major: 125,
        full_version: "125.0.6422.112",
        android_version: "14",
        platform_version: "14.0.0",
        model: "SM-F946B",
    },
];

/// Pick a catalog entry whose major version falls inside `[min, max]`.
/// Out-of-range bounds fall back to the whole catalog.
pub fn pick_entry<R: Rng + ?Sized>(rng: &mut R, min_major: u32, max_major: u32) -> UaEntry {
    let candidates: Vec<UaEntry> = MOBILE_CHROME
        .iter()
        .copied()
        .filter(|entry| entry.major >= min_major && entry.major <= max_major)
        .collect();

    if candidates.is_empty() {
        return *MOBILE_CHROME
            .choose(rng)
            .expect("user-agent catalog must not be empty");
    }

    *candidates
        .choose(rng)
        .expect("filtered candidates checked non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn picks_within_version_range() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..32 {
            let entry = pick_entry(&mut rng, 122, 124);
            assert!(entry.major >= 122 && entry.major <= 124);
        }
    }

    #[test]
    fn empty_range_falls_back_to_catalog() {
        let mut rng = StdRng::seed_from_u64(2);
        let entry = pick_entry(&mut rng, 900, 901);
        assert!(MOBILE_CHROME.iter().any(|e| e.major == entry.major));
    }

    #[test]
    fn user_agent_embeds_model_and_major() {
        let entry = MOBILE_CHROME[0];
        let ua = entry.user_agent();
        assert!(ua.contains(entry.model));
        assert!(ua.contains("Chrome/120.0.0.0"));
        assert!(ua.contains("Mobile Safari"));
    }
}
