//! Deterministic "demo" engagement numbers.
//!
//! Displayed like/view/comment counts are the server count plus a
//! pseudo-random offset seeded from the content id, so the same item always
//! shows the same inflated number. Whether this stays is a product decision;
//! [`MetricsPolicy::disabled`] shows raw server counts only.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Likes,
    Views,
    Comments,
    Followers,
}

impl MetricKind {
    fn label(self) -> &'static str {
        match self {
            MetricKind::Likes => "likes",
            MetricKind::Views => "views",
            MetricKind::Comments => "comments",
            MetricKind::Followers => "followers",
        }
    }

    fn range(self) -> std::ops::Range<u64> {
        match self {
            MetricKind::Likes => 120..8_000,
            MetricKind::Views => 2_000..250_000,
            MetricKind::Comments => 4..350,
            MetricKind::Followers => 300..60_000,
        }
    }
}

/// Same id and kind always give the same number.
#[must_use]
pub fn demo_count(id: &str, kind: MetricKind) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hasher.update(b":");
    hasher.update(kind.label().as_bytes());
    let digest = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed));
    rng.gen_range(kind.range())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsPolicy {
    blend_demo: bool,
}

impl MetricsPolicy {
    #[must_use]
    pub fn new(blend_demo: bool) -> Self {
        MetricsPolicy { blend_demo }
    }

    #[must_use]
    pub fn disabled() -> Self {
        MetricsPolicy { blend_demo: false }
    }

    #[must_use]
    pub fn display_count(self, id: &str, kind: MetricKind, real: u64) -> u64 {
        if self.blend_demo {
            real.saturating_add(demo_count(id, kind))
        } else {
            real
        }
    }
}

/// Compact rendering: 999, 1.2K, 3.4M. Rounds to one decimal, so a count
/// that would round up to 1000K is shown as 1M.
#[must_use]
pub fn format_count(count: u64) -> String {
    if count < 1_000 {
        return count.to_string();
    }
    let thousands = rounded_tenths(count, 1_000);
    if thousands < 10_000 {
        return tenths_label(thousands) + "K";
    }
    tenths_label(rounded_tenths(count, 1_000_000)) + "M"
}

/// `count / unit` in tenths, rounded half up.
fn rounded_tenths(count: u64, unit: u64) -> u64 {
    let tenth = unit / 10;
    count.saturating_add(tenth / 2) / tenth
}

fn tenths_label(tenths: u64) -> String {
    match tenths % 10 {
        0 => (tenths / 10).to_string(),
        fraction => format!("{}.{fraction}", tenths / 10),
    }
}
