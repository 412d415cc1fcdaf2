//! Clock implementations for the synchronization cycle

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::{Mutex, RwLock};

use berkeley_core::Timestamp;

/// A source of clock readings.
///
/// Implementations must be `Send + Sync`: the coordinator reads its clock
/// from every connection handler concurrently.
pub trait Clock: Send + Sync {
    /// Current reading in seconds since epoch
    fn now(&self) -> Timestamp;
}

/// The operating system's wall clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        // A clock set before 1970 reads as the epoch rather than panicking
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Timestamp::from_secs_f64(secs)
    }
}

/// Manually driven clock for tests and simulations.
/// Stands still until told to move.
#[derive(Debug)]
pub struct ManualClock {
    value: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        ManualClock {
            value: Mutex::new(start),
        }
    }

    /// Move forward (or backward) by `secs`
    pub fn advance(&self, secs: f64) {
        let mut value = self.value.lock();
        *value = value.offset_by(secs);
    }

    pub fn set(&self, t: Timestamp) {
        *self.value.lock() = t;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.value.lock()
    }
}

/// Virtual clock - a base source plus an adjustable offset.
///
/// The coordinator reads this clock to timestamp requests and, after a
/// cycle, applies the consensus offset to it.
pub struct VirtualClock {
    source: Arc<dyn Clock>,
    offset: RwLock<f64>,
}

impl VirtualClock {
    pub fn new(source: Arc<dyn Clock>, offset: f64) -> Self {
        VirtualClock {
            source,
            offset: RwLock::new(offset),
        }
    }

    /// Virtual clock over the system clock
    pub fn system(offset: f64) -> Self {
        Self::new(Arc::new(SystemClock), offset)
    }

    /// Current offset from the base source
    pub fn offset(&self) -> f64 {
        *self.offset.read()
    }

    /// Accumulate a correction into the offset.
    /// Returns the new offset.
    pub fn adjust(&self, delta: f64) -> f64 {
        let mut offset = self.offset.write();
        *offset += delta;
        *offset
    }

    /// Reading of the underlying source, without the offset
    pub fn source_now(&self) -> Timestamp {
        self.source.now()
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> Timestamp {
        self.source.now().offset_by(self.offset())
    }
}

impl std::fmt::Debug for VirtualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualClock")
            .field("offset", &self.offset())
            .finish()
    }
}
