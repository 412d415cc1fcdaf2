//! Time primitives for the synchronization protocol
//!
//! Every clock in the system speaks in seconds since the Unix epoch as a
//! floating-point value. Offsets are signed differences in seconds.

use std::fmt;
use std::ops::Sub;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// A reading of some (possibly simulated) clock, in seconds since epoch.
///
/// Built only through [`Timestamp::from_secs_f64`]:
///
/// ```compile_fail
/// let t = berkeley_core::Timestamp(1.0);
/// ```
///
/// ```
/// use berkeley_core::Timestamp;
/// assert_eq!(Timestamp::from_secs_f64(1.5).as_secs_f64(), 1.5);
/// ```
#[derive(Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Timestamp(f64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0.0);

    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp(secs)
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0
    }

    /// Shift this reading by a signed offset in seconds
    #[inline]
    pub fn offset_by(self, offset: f64) -> Self {
        Timestamp(self.0 + offset)
    }

    /// Halfway point between this reading and a later one
    #[inline]
    pub fn midpoint(self, later: Timestamp) -> Self {
        Timestamp(self.0 + (later.0 - self.0) / 2.0)
    }

    /// Wall-clock rendering as `HH:MM:SS` in the local timezone
    pub fn to_hms(self) -> String {
        let secs = self.0.floor();
        let nanos = ((self.0 - secs) * 1e9) as u32;
        match DateTime::from_timestamp(secs as i64, nanos.min(999_999_999)) {
            Some(utc) => utc.with_timezone(&Local).format("%H:%M:%S").to_string(),
            None => format!("{:.3}s", self.0),
        }
    }
}

/// Signed difference between two readings, in seconds
impl Sub<Timestamp> for Timestamp {
    type Output = f64;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Self::Output {
        self.0 - rhs.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t({:.6}s)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hms())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_and_difference() {
        let t = Timestamp::from_secs_f64(1_000.0);
        let shifted = t.offset_by(-3.5);
        assert_eq!(shifted.as_secs_f64(), 996.5);
        assert_eq!(shifted - t, -3.5);
    }

    #[test]
    fn test_midpoint() {
        let t0 = Timestamp::from_secs_f64(10.0);
        let t2 = Timestamp::from_secs_f64(10.5);
        assert_eq!(t0.midpoint(t2).as_secs_f64(), 10.25);
    }

    #[test]
    fn test_hms_format_shape() {
        let rendered = Timestamp::from_secs_f64(1_700_000_000.25).to_hms();
        assert_eq!(rendered.len(), 8);
        assert_eq!(rendered.matches(':').count(), 2);
    }
}
