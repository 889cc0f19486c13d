use std::fmt;

/// Machine-readable error codes surfaced in logs and CLI JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidChunk,
    MalformedRecord,
    InvalidIdentifier,
    SchemaTooNew,
    CorruptDocument,
    StorageWriteFailed,
    StorageReadFailed,
    LockContention,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidChunk => "E2001",
            Self::MalformedRecord => "E2002",
            Self::InvalidIdentifier => "E2003",
            Self::SchemaTooNew => "E3001",
            Self::CorruptDocument => "E3002",
            Self::StorageWriteFailed => "E5001",
            Self::StorageReadFailed => "E5002",
            Self::LockContention => "E5003",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Store not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidChunk => "Chunk message is not valid",
            Self::MalformedRecord => "Raw viewer record could not be normalized",
            Self::InvalidIdentifier => "Identifier is empty or malformed",
            Self::SchemaTooNew => "Store schema is newer than this binary",
            Self::CorruptDocument => "Stored document could not be decoded",
            Self::StorageWriteFailed => "Storage write failed",
            Self::StorageReadFailed => "Storage read failed",
            Self::LockContention => "Lock contention",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `sight init` in this directory first."),
            Self::ConfigParseError => Some("Fix syntax in .sightline/config.toml and retry."),
            Self::InvalidChunk => {
                Some("Send {\"contentId\": ..., \"records\": [...], \"reportedTotal\": n}.")
            }
            Self::MalformedRecord | Self::InvalidIdentifier => None,
            Self::SchemaTooNew => Some("Upgrade sight to a version that knows this schema."),
            Self::CorruptDocument => {
                Some("Re-ingest the affected content; the next write replaces the document.")
            }
            Self::StorageWriteFailed => Some("Check disk space and write permissions."),
            Self::StorageReadFailed => Some("Check that .sightline/sightline.db is readable."),
            Self::LockContention => Some("Retry after the other `sight` process releases its lock."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
