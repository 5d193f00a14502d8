//! Strongly-typed identifiers generated by the orchestrator itself.
//!
//! Jobs, workflows and scheduled entries are named by their callers with
//! plain strings. The ids below are minted internally so individual workflow
//! runs and scheduler fires can be correlated in logs and reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when parsing an ID from a string fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse.
    pub id_type: &'static str,
    /// The reason for the parse failure.
    pub reason: String,
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {}: {}", self.id_type, self.reason)
    }
}

impl std::error::Error for ParseIdError {}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Creates a new ID with a randomly generated ULID.
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}_{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = s.strip_prefix(concat!($prefix, "_")).unwrap_or(s);
                Ulid::from_str(raw).map(Self).map_err(|e| ParseIdError {
                    id_type: stringify!($name),
                    reason: e.to_string(),
                })
            }
        }
    };
}

define_id!(
    /// Identifies a single execution of a workflow.
    WorkflowRunId,
    "run"
);

define_id!(
    /// Identifies a single dispatch of a scheduled entry.
    FireId,
    "fire"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_format() {
        assert!(WorkflowRunId::new().to_string().starts_with("run_"));
        assert!(FireId::new().to_string().starts_with("fire_"));
    }

    #[test]
    fn parse_with_and_without_prefix() {
        let id = WorkflowRunId::new();
        let parsed: WorkflowRunId = id.to_string().parse().expect("should parse");
        assert_eq!(id, parsed);

        let raw: WorkflowRunId = id.as_ulid().to_string().parse().expect("should parse");
        assert_eq!(id, raw);
    }

    #[test]
    fn parse_invalid_ulid() {
        let err = "fire_nope".parse::<FireId>().unwrap_err();
        assert_eq!(err.id_type, "FireId");
    }
}
