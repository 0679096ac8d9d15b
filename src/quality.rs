//! Data-quality labels and provenance categories.
//!
//! Both are closed enums so every table keyed on them (weights, multipliers,
//! the worst-of ordering) is checked for exhaustiveness by the compiler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Freshness/reliability label attached to every value.
///
/// Variants are declared best-first; the derived `Ord` is the fixed
/// ordering used by [`combine_quality`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityFlag {
    /// Direct, recent measurement
    Primary,
    /// Derived from nearby measurements
    Interpolated,
    /// Numerical model output
    Modeled,
    /// Direct measurement older than the staleness window
    Stale,
    /// Climatological/default constant
    Historical,
    /// No value available
    Missing,
}

impl QualityFlag {
    /// All flags in best-to-worst order.
    pub const ALL: [QualityFlag; 6] = [
        QualityFlag::Primary,
        QualityFlag::Interpolated,
        QualityFlag::Modeled,
        QualityFlag::Stale,
        QualityFlag::Historical,
        QualityFlag::Missing,
    ];

    /// Lowercase label, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityFlag::Primary => "primary",
            QualityFlag::Interpolated => "interpolated",
            QualityFlag::Modeled => "modeled",
            QualityFlag::Stale => "stale",
            QualityFlag::Historical => "historical",
            QualityFlag::Missing => "missing",
        }
    }

    /// Label a direct reading by its age relative to `now`.
    ///
    /// Readings strictly older than `stale_after` are [`QualityFlag::Stale`].
    pub fn for_reading_age(
        observed_at: DateTime<Utc>,
        now: DateTime<Utc>,
        stale_after: Duration,
    ) -> Self {
        if now - observed_at > stale_after {
            QualityFlag::Stale
        } else {
            QualityFlag::Primary
        }
    }
}

impl std::fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance category, used to assign base trust weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Observation,
    Model,
    Interpolated,
}

/// Worse of two qualities under the fixed ordering
/// `[primary, interpolated, modeled, stale, historical, missing]`.
pub fn combine_quality(a: QualityFlag, b: QualityFlag) -> QualityFlag {
    a.max(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_combine_quality_picks_worse() {
        assert_eq!(
            combine_quality(QualityFlag::Primary, QualityFlag::Modeled),
            QualityFlag::Modeled
        );
        assert_eq!(
            combine_quality(QualityFlag::Historical, QualityFlag::Interpolated),
            QualityFlag::Historical
        );
        assert_eq!(
            combine_quality(QualityFlag::Missing, QualityFlag::Primary),
            QualityFlag::Missing
        );
        for q in QualityFlag::ALL {
            assert_eq!(combine_quality(q, q), q);
        }
    }

    #[test]
    fn test_ordering_matches_declared_list() {
        let mut sorted = QualityFlag::ALL;
        sorted.sort();
        assert_eq!(sorted, QualityFlag::ALL);
    }

    #[test]
    fn test_staleness_window() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap();
        let window = Duration::hours(3);

        let fresh = now - Duration::minutes(40);
        let boundary = now - Duration::hours(3);
        let old = now - Duration::hours(5);

        assert_eq!(QualityFlag::for_reading_age(fresh, now, window), QualityFlag::Primary);
        assert_eq!(QualityFlag::for_reading_age(boundary, now, window), QualityFlag::Primary);
        assert_eq!(QualityFlag::for_reading_age(old, now, window), QualityFlag::Stale);
    }

    #[test]
    fn test_serialized_labels() {
        let json = serde_json::to_string(&QualityFlag::Historical).unwrap();
        assert_eq!(json, "\"historical\"");
        let kind: SourceKind = serde_json::from_str("\"model\"").unwrap();
        assert_eq!(kind, SourceKind::Model);
    }
}
