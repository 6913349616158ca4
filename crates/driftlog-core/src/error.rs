use std::fmt;

/// Machine-readable error codes for callers that branch on failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    LogClosed,
    ConfigParseError,
    PreconditionFailed,
    EntryMissing,
    HashMismatch,
    TieBreakNotStrict,
    InvalidSignature,
    AppendRejected,
    StorageFailed,
    SerializationFailed,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::LogClosed => "E1001",
            Self::ConfigParseError => "E1002",
            Self::PreconditionFailed => "E1003",
            Self::EntryMissing => "E2001",
            Self::HashMismatch => "E3001",
            Self::TieBreakNotStrict => "E3002",
            Self::InvalidSignature => "E3003",
            Self::AppendRejected => "E4001",
            Self::StorageFailed => "E5001",
            Self::SerializationFailed => "E5002",
        }
    }

    /// Short human-facing summary for logs.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::LogClosed => "Log is closed",
            Self::ConfigParseError => "Config file parse error",
            Self::PreconditionFailed => "Operation precondition violated",
            Self::EntryMissing => "Entry missing from block store",
            Self::HashMismatch => "Content hash mismatch",
            Self::TieBreakNotStrict => "Tie-break comparator returned equal for distinct entries",
            Self::InvalidSignature => "Invalid entry signature",
            Self::AppendRejected => "Entry rejected by the log's append filter",
            Self::StorageFailed => "Storage backend failure",
            Self::SerializationFailed => "Entry serialization failure",
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::LogClosed => Some("Open the log again before mutating it."),
            Self::ConfigParseError => Some("Fix the log config TOML and retry."),
            Self::PreconditionFailed => None,
            Self::EntryMissing => {
                Some("Retry, or fetch the missing ancestors from another peer first.")
            }
            Self::HashMismatch => Some("Discard the entry; its bytes do not match its address."),
            Self::TieBreakNotStrict => {
                Some("Custom tie-breaks must order every pair of distinct entries.")
            }
            Self::InvalidSignature => Some("Reject the sender's batch; it carries forged entries."),
            Self::AppendRejected => None,
            Self::StorageFailed => Some("Check the index/block database and disk space."),
            Self::SerializationFailed => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Errors surfaced by log operations.
///
/// `Clone` so one in-flight join outcome can be handed to every caller
/// awaiting the same hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("log is closed")]
    Closed,

    #[error("entry {hash} is missing from the block store")]
    MissingEntry { hash: String },

    #[error("content hash mismatch: stored={stored} computed={computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("tie-break returned equal for distinct entries {a} and {b}")]
    TieBreak { a: String, b: String },

    #[error("invalid signature on entry {hash}")]
    InvalidSignature { hash: String },

    #[error("entry {hash} rejected by can_append")]
    AppendRejected { hash: String },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Machine-readable code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Closed => ErrorCode::LogClosed,
            Self::MissingEntry { .. } => ErrorCode::EntryMissing,
            Self::HashMismatch { .. } => ErrorCode::HashMismatch,
            Self::TieBreak { .. } => ErrorCode::TieBreakNotStrict,
            Self::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            Self::AppendRejected { .. } => ErrorCode::AppendRejected,
            Self::Precondition(_) => ErrorCode::PreconditionFailed,
            Self::Config(_) => ErrorCode::ConfigParseError,
            Self::Storage(_) => ErrorCode::StorageFailed,
            Self::Serialization(_) => ErrorCode::SerializationFailed,
        }
    }

    /// Whether a caller may reasonably retry (possibly against another peer).
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::MissingEntry { .. } | Self::Storage(_))
    }

    /// Whether this is an integrity failure that must never be retried.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. } | Self::TieBreak { .. } | Self::InvalidSignature { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub(crate) fn storage_err(e: impl fmt::Display) -> Error {
    Error::Storage(e.to_string())
}
