use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::lock::LockError;
use crate::merge::RecordError;
use crate::snapshot::validate::ValidationError;
use crate::store::StoreError;

/// Machine-readable error codes paired with plain-language messages.
///
/// Nothing user-facing should print raw error chains; surfaces render
/// [`ErrorCode::message`] and [`ErrorCode::hint`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    MalformedDocument,
    ForeignDocument,
    MissingPayload,
    UnsupportedVersion,
    PartialRecord,
    RestoreDeclined,
    SerializationFailed,
    StorageWriteFailed,
    LockContention,
    StorageReadFailed,
    ChatUnavailable,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::MalformedDocument => "E2001",
            Self::ForeignDocument => "E2002",
            Self::MissingPayload => "E2003",
            Self::UnsupportedVersion => "E2004",
            Self::PartialRecord => "E2005",
            Self::RestoreDeclined => "E4001",
            Self::SerializationFailed => "E3001",
            Self::StorageWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::StorageReadFailed => "E5003",
            Self::ChatUnavailable => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "The settings file could not be read",
            Self::MalformedDocument => "That file is not a readable studydeck backup",
            Self::ForeignDocument => "That backup was made by a different application",
            Self::MissingPayload => "That backup does not contain any study data",
            Self::UnsupportedVersion => "That backup was made by an incompatible version",
            Self::PartialRecord => "Some saved data could not be merged and was skipped",
            Self::RestoreDeclined => "Restore cancelled; nothing was changed",
            Self::SerializationFailed => "Your study data could not be exported",
            Self::StorageWriteFailed => "Your study data could not be saved",
            Self::LockContention => "Your study data is busy in another window",
            Self::StorageReadFailed => "Your study data could not be read",
            Self::ChatUnavailable => "The tutor could not be reached",
            Self::InternalUnexpected => "Something unexpected went wrong",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix the syntax in config.toml and retry."),
            Self::MalformedDocument | Self::MissingPayload => {
                Some("Choose a file created with `sd export`.")
            }
            Self::ForeignDocument => None,
            Self::UnsupportedVersion => Some("Update studydeck and import the file again."),
            Self::PartialRecord => Some("Run with --verbose to see which records were skipped."),
            Self::RestoreDeclined => Some("Pass --yes to confirm the restore."),
            Self::SerializationFailed => Some("Check the records shown by `sd keys` and retry."),
            Self::StorageWriteFailed => {
                Some("Check free disk space and permissions, then import again.")
            }
            Self::LockContention => Some("Retry after the other studydeck process finishes."),
            Self::StorageReadFailed => Some("Check that the store directory is readable."),
            Self::ChatUnavailable => Some("Check your connection and the [chat] settings."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures of the export, import, and restore operations.
///
/// Validation failures happen before any store access. A `StorageWrite`
/// means the operation did not complete and must not be reported as a
/// success, even if earlier records were already written.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to serialize snapshot: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("record `{key}` cannot be exported: {source}")]
    Unrepresentable {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write export file {}: {source}", .path.display())]
    ExportWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read record `{key}`: {source}")]
    StorageRead {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("record `{key}` does not have the expected shape: {source}")]
    UnreadableRecord {
        key: String,
        #[source]
        source: RecordError,
    },

    #[error("failed to write record `{key}`: {source}")]
    StorageWrite {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("seed restore requires explicit confirmation")]
    RestoreDeclined,

    #[error(transparent)]
    Lock(#[from] LockError),
}

impl SyncError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(err) => err.code(),
            Self::Serialization(_) | Self::Unrepresentable { .. } | Self::ExportWrite { .. } => {
                ErrorCode::SerializationFailed
            }
            Self::StorageRead { .. } | Self::UnreadableRecord { .. } => {
                ErrorCode::StorageReadFailed
            }
            Self::StorageWrite { .. } => ErrorCode::StorageWriteFailed,
            Self::RestoreDeclined => ErrorCode::RestoreDeclined,
            Self::Lock(err) => err.code(),
        }
    }

    /// Plain-language message suitable for showing to the learner.
    #[must_use]
    pub fn user_message(&self) -> String {
        let code = self.code();
        match code.hint() {
            Some(hint) => format!("{} ({code}). {hint}", code.message()),
            None => format!("{} ({code}).", code.message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const ALL: [ErrorCode; 13] = [
        ErrorCode::ConfigParseError,
        ErrorCode::MalformedDocument,
        ErrorCode::ForeignDocument,
        ErrorCode::MissingPayload,
        ErrorCode::UnsupportedVersion,
        ErrorCode::PartialRecord,
        ErrorCode::RestoreDeclined,
        ErrorCode::SerializationFailed,
        ErrorCode::StorageWriteFailed,
        ErrorCode::LockContention,
        ErrorCode::StorageReadFailed,
        ErrorCode::ChatUnavailable,
        ErrorCode::InternalUnexpected,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let raw = code.code();
            assert_eq!(raw.len(), 5);
            assert!(raw.starts_with('E'));
            assert!(raw.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn user_message_hides_raw_error_text() {
        let err = SyncError::StorageWrite {
            key: "notes".to_string(),
            source: StoreError::WriteRejected {
                key: "notes".to_string(),
                reason: "quota exceeded: 0x7ffe".to_string(),
            },
        };
        let message = err.user_message();
        assert!(message.starts_with("Your study data could not be saved"));
        assert!(message.contains("E5001"));
        assert!(!message.contains("0x7ffe"));
    }

    #[test]
    fn declined_restore_mentions_confirmation_flag() {
        let message = SyncError::RestoreDeclined.user_message();
        assert!(message.contains("--yes"));
    }
}
