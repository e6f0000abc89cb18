//! Correction loop states and the step trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A state of the correction loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionState {
    Generate,
    Validate,
    Execute,
    Critique,
    Repair,
    Done,
    Failed,
}

impl CorrectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "GENERATE",
            Self::Validate => "VALIDATE",
            Self::Execute => "EXECUTE",
            Self::Critique => "CRITIQUE",
            Self::Repair => "REPAIR",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        }
    }

    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for CorrectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the processing trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub attempt: u32,
    pub state: CorrectionState,
    /// What happened in this state, in a sentence.
    pub detail: String,
    /// Milliseconds since the session started.
    pub elapsed_ms: u64,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(CorrectionState::Done.is_terminal());
        assert!(CorrectionState::Failed.is_terminal());
        assert!(!CorrectionState::Repair.is_terminal());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&CorrectionState::Critique).unwrap(),
            "\"CRITIQUE\""
        );
        assert_eq!(CorrectionState::Generate.to_string(), "GENERATE");
    }
}
