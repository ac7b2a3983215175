// Copyright (c) 2025 - Cowboy AI, Inc.
//! Stack and resource status classification
//!
//! Every status the stack API emits maps to exactly one [`StatusClass`]
//! through static membership tables. Unknown strings are kept verbatim and
//! classified as informational.

use std::fmt;

use serde::{Deserialize, Serialize};

/// How an event status is reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusClass {
    Success,
    Failure,
    Warning,
    Info,
}

/// Operation submitted against a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackOperation {
    Create,
    Update,
    Delete,
}

macro_rules! statuses {
    ($($variant:ident => $text:literal),+ $(,)?) => {
        /// Status of a stack or one of its resources
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum StackStatus {
            $($variant,)+
            /// A status this crate does not know
            Other(String),
        }

        impl StackStatus {
            /// Every known status
            pub const KNOWN: &'static [StackStatus] = &[$(StackStatus::$variant),+];

            /// Parse a provider status string
            pub fn parse(raw: &str) -> Self {
                match raw {
                    $($text => StackStatus::$variant,)+
                    other => StackStatus::Other(other.to_string()),
                }
            }

            /// Provider spelling
            pub fn as_str(&self) -> &str {
                match self {
                    $(StackStatus::$variant => $text,)+
                    StackStatus::Other(raw) => raw,
                }
            }
        }
    };
}

statuses! {
    CreateInProgress => "CREATE_IN_PROGRESS",
    CreateFailed => "CREATE_FAILED",
    CreateComplete => "CREATE_COMPLETE",
    RollbackInProgress => "ROLLBACK_IN_PROGRESS",
    RollbackFailed => "ROLLBACK_FAILED",
    RollbackComplete => "ROLLBACK_COMPLETE",
    DeleteInProgress => "DELETE_IN_PROGRESS",
    DeleteFailed => "DELETE_FAILED",
    DeleteComplete => "DELETE_COMPLETE",
    DeleteSkipped => "DELETE_SKIPPED",
    UpdateInProgress => "UPDATE_IN_PROGRESS",
    UpdateCompleteCleanupInProgress => "UPDATE_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateComplete => "UPDATE_COMPLETE",
    UpdateFailed => "UPDATE_FAILED",
    UpdateRollbackInProgress => "UPDATE_ROLLBACK_IN_PROGRESS",
    UpdateRollbackFailed => "UPDATE_ROLLBACK_FAILED",
    UpdateRollbackCompleteCleanupInProgress => "UPDATE_ROLLBACK_COMPLETE_CLEANUP_IN_PROGRESS",
    UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
    ReviewInProgress => "REVIEW_IN_PROGRESS",
    ImportInProgress => "IMPORT_IN_PROGRESS",
    ImportComplete => "IMPORT_COMPLETE",
    ImportRollbackInProgress => "IMPORT_ROLLBACK_IN_PROGRESS",
    ImportRollbackFailed => "IMPORT_ROLLBACK_FAILED",
    ImportRollbackComplete => "IMPORT_ROLLBACK_COMPLETE",
}

use StackStatus::*;

const FAILURE: &[StackStatus] = &[
    CreateFailed,
    DeleteFailed,
    RollbackComplete,
    RollbackFailed,
    UpdateFailed,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    ImportRollbackFailed,
    ImportRollbackComplete,
];

const WARNING: &[StackStatus] = &[
    RollbackInProgress,
    UpdateRollbackInProgress,
    UpdateRollbackCompleteCleanupInProgress,
    ImportRollbackInProgress,
];

const SUCCESS: &[StackStatus] = &[CreateComplete, DeleteComplete, UpdateComplete, ImportComplete];

impl StackStatus {
    /// Reporting class of this status
    pub fn classify(&self) -> StatusClass {
        if FAILURE.contains(self) {
            StatusClass::Failure
        } else if WARNING.contains(self) {
            StatusClass::Warning
        } else if SUCCESS.contains(self) {
            StatusClass::Success
        } else {
            StatusClass::Info
        }
    }

    /// No further transition happens without a new operation
    pub fn is_terminal(&self) -> bool {
        matches!(self.classify(), StatusClass::Success | StatusClass::Failure)
    }

    pub fn is_success(&self) -> bool {
        self.classify() == StatusClass::Success
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for StackStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StackStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(StackStatus::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_every_known_status_round_trips() {
        for status in StackStatus::KNOWN {
            assert_eq!(&StackStatus::parse(status.as_str()), status);
        }
    }

    #[test]
    fn test_tables_are_disjoint() {
        for status in StackStatus::KNOWN {
            let memberships = [FAILURE, WARNING, SUCCESS]
                .iter()
                .filter(|table| table.contains(status))
                .count();
            assert!(memberships <= 1, "{status} is in {memberships} tables");
        }
    }

    #[test_case("UPDATE_COMPLETE", StatusClass::Success)]
    #[test_case("UPDATE_ROLLBACK_COMPLETE", StatusClass::Failure)]
    #[test_case("ROLLBACK_IN_PROGRESS", StatusClass::Warning)]
    #[test_case("UPDATE_IN_PROGRESS", StatusClass::Info)]
    #[test_case("SOMETHING_NEW", StatusClass::Info)]
    fn test_classify(raw: &str, expected: StatusClass) {
        assert_eq!(StackStatus::parse(raw).classify(), expected);
    }

    #[test]
    fn test_in_progress_is_not_terminal() {
        assert!(!StackStatus::UpdateInProgress.is_terminal());
        assert!(!StackStatus::UpdateRollbackInProgress.is_terminal());
        assert!(StackStatus::DeleteFailed.is_terminal());
    }
}
