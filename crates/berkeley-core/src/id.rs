//! Identity types for the synchronization protocol
//!
//! Clients are known to the coordinator only by their remote address; the
//! process identifier below names a participant for persistence and logging.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a synchronization cycle, starting at 1
pub type CycleIndex = u64;

/// First cycle index of a fresh history
pub const FIRST_CYCLE: CycleIndex = 1;

/// Process identity - the operator-chosen name of a participant (e.g. `P1`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProcessId(String);

impl ProcessId {
    /// Name used for the coordinator's own offset history
    pub const COORDINATOR: &'static str = "coordinator";

    pub fn new(id: impl Into<String>) -> Self {
        ProcessId(id.into())
    }

    pub fn coordinator() -> Self {
        ProcessId::new(Self::COORDINATOR)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier reduced to characters that are safe inside a file name.
    ///
    /// `N/A` (the default client id) becomes `N_A`.
    pub fn file_stem(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        ProcessId::new("N/A")
    }
}

impl From<&str> for ProcessId {
    fn from(s: &str) -> Self {
        ProcessId::new(s)
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({})", self.0)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem_sanitizes() {
        assert_eq!(ProcessId::new("P1").file_stem(), "P1");
        assert_eq!(ProcessId::default().file_stem(), "N_A");
        assert_eq!(ProcessId::new("../etc").file_stem(), "___etc");
    }

    #[test]
    fn test_display() {
        assert_eq!(ProcessId::coordinator().to_string(), "coordinator");
        assert_eq!(format!("{:?}", ProcessId::new("P2")), "Process(P2)");
    }
}
