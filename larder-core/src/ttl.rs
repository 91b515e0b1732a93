//! TTL engine: converts TTL specifications into absolute expiry timestamps.
//!
//! Timestamps are milliseconds since the Unix epoch. An `expires_at` of `0`
//! (or anything negative) means the entry never expires.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

const MS_PER_SECOND: f64 = 1_000.0;
const MS_PER_MINUTE: f64 = 60_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// A structured TTL. Missing fields are zero; fractional values are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TtlSpan {
    #[serde(default)]
    pub seconds: f64,
    #[serde(default)]
    pub minutes: f64,
    #[serde(default)]
    pub hours: f64,
    #[serde(default)]
    pub days: f64,
}

impl TtlSpan {
    pub fn seconds(seconds: f64) -> Self {
        Self {
            seconds,
            ..Default::default()
        }
    }

    pub fn minutes(minutes: f64) -> Self {
        Self {
            minutes,
            ..Default::default()
        }
    }

    pub fn hours(hours: f64) -> Self {
        Self {
            hours,
            ..Default::default()
        }
    }

    pub fn days(days: f64) -> Self {
        Self {
            days,
            ..Default::default()
        }
    }

    /// Total length of the span in milliseconds.
    pub fn total_millis(&self) -> f64 {
        self.seconds * MS_PER_SECOND
            + self.minutes * MS_PER_MINUTE
            + self.hours * MS_PER_HOUR
            + self.days * MS_PER_DAY
    }
}

/// Time-to-live specification: raw milliseconds or a structured span.
///
/// Serialized untagged, so both `5000` and `{"minutes": 5}` parse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ttl {
    Millis(f64),
    Span(TtlSpan),
}

impl Ttl {
    /// A TTL that never expires.
    pub const NEVER: Ttl = Ttl::Millis(0.0);

    /// Length of this TTL in milliseconds.
    pub fn to_millis(&self) -> f64 {
        to_millis(self)
    }

    /// True when applying this TTL yields "never expires".
    pub fn is_never(&self) -> bool {
        self.to_millis() <= 0.0
    }
}

impl Default for Ttl {
    fn default() -> Self {
        Ttl::NEVER
    }
}

impl From<u64> for Ttl {
    fn from(ms: u64) -> Self {
        Ttl::Millis(ms as f64)
    }
}

impl From<i64> for Ttl {
    fn from(ms: i64) -> Self {
        Ttl::Millis(ms as f64)
    }
}

impl From<f64> for Ttl {
    fn from(ms: f64) -> Self {
        Ttl::Millis(ms)
    }
}

impl From<Duration> for Ttl {
    fn from(d: Duration) -> Self {
        Ttl::Millis(d.as_secs_f64() * MS_PER_SECOND)
    }
}

impl From<TtlSpan> for Ttl {
    fn from(span: TtlSpan) -> Self {
        Ttl::Span(span)
    }
}

/// Convert a TTL into milliseconds. Non-finite results collapse to `0`.
pub fn to_millis(ttl: &Ttl) -> f64 {
    let ms = match ttl {
        Ttl::Millis(ms) => *ms,
        Ttl::Span(span) => span.total_millis(),
    };
    if ms.is_finite() {
        ms
    } else {
        0.0
    }
}

/// Absolute expiry for a TTL applied at `now`, or `0` when it never expires.
///
/// Fractional milliseconds round up so any positive TTL lands strictly after
/// `now`.
pub fn expires_at(ttl: &Ttl, now: TimestampMs) -> TimestampMs {
    let ms = to_millis(ttl);
    if ms > 0.0 {
        now.saturating_add(ms.ceil() as i64)
    } else {
        0
    }
}

/// Whether an entry with the given expiry has elapsed at `now`.
pub fn is_expired(expires_at: TimestampMs, now: TimestampMs) -> bool {
    expires_at > 0 && now >= expires_at
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> TimestampMs {
    Utc::now().timestamp_millis()
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// A longer TTL never expires earlier than a shorter one.
        #[test]
        fn prop_expiry_is_monotonic_in_ttl(
            a in 0.0f64..1e9,
            b in 0.0f64..1e9,
            now in 0i64..4_000_000_000_000,
        ) {
            let (t1, t2) = if a <= b { (a, b) } else { (b, a) };
            let e1 = expires_at(&Ttl::Millis(t1), now);
            let e2 = expires_at(&Ttl::Millis(t2), now);
            if e1 != 0 {
                prop_assert!(e1 <= e2);
            }
        }

        /// Positive TTLs produce an expiry strictly after `now`.
        #[test]
        fn prop_positive_ttl_is_not_expired_at_now(
            ms in 0.001f64..1e9,
            now in 0i64..4_000_000_000_000,
        ) {
            let at = expires_at(&Ttl::Millis(ms), now);
            prop_assert!(at > now);
            prop_assert!(!is_expired(at, now));
            prop_assert!(is_expired(at, at));
        }

        /// Span seconds and raw milliseconds agree.
        #[test]
        fn prop_span_seconds_match_millis(secs in 0u32..100_000) {
            let span = Ttl::Span(TtlSpan::seconds(secs as f64));
            prop_assert_eq!(span.to_millis(), secs as f64 * 1000.0);
        }
    }
}
