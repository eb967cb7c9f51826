//! Unified error types for ikura-bot.
//!
//! Each subsystem has its own error enum; everything converges into
//! [`BotError`] so callers near the top of the stack can use one `Result`
//! alias.

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for bot operations.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Binary codec error.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// Database error.
    #[error("db: {0}")]
    Db(#[from] DbError),

    /// Wire protocol error.
    #[error("wire: {0}")]
    Wire(#[from] WireError),

    /// Command dispatch error.
    #[error("command: {0}")]
    Command(#[from] CommandError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("{0}")]
    Internal(String),
}

impl BotError {
    /// Create an internal error.
    #[inline]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias for bot operations.
pub type Result<T> = std::result::Result<T, BotError>;

// ============================================================================
// Binary Codec Errors
// ============================================================================

/// Error type for the persistent binary codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The leading type tag did not match the expected entity.
    #[error("type tag mismatch (found {found:#04x}, expected {expected:#04x})")]
    TagMismatch { found: u8, expected: u8 },

    /// Ran out of bytes while decoding.
    #[error("unexpected end of input")]
    Truncated,

    /// The superblock magic did not match.
    #[error("invalid database identifier")]
    BadMagic,

    /// The on-disk version is not the one this build reads.
    #[error("unsupported database version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    /// Structurally invalid payload.
    #[error("{0}")]
    Invalid(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = std::result::Result<T, CodecError>;

// ============================================================================
// Database Errors
// ============================================================================

/// Error type for database load/save.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Decode error while loading.
    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// The database file does not exist and `--create` was not given.
    #[error("database file does not exist: {0}")]
    Missing(String),
}

/// Result type for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

// ============================================================================
// Wire Protocol Errors
// ============================================================================

/// Error type for IRC-family frame parsing.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The frame was empty.
    #[error("empty frame")]
    Empty,

    /// No command after tags/prefix.
    #[error("missing command")]
    MissingCommand,

    /// The tags section was malformed.
    #[error("malformed tags: {0}")]
    Tags(String),

    /// The prefix section was malformed.
    #[error("malformed prefix: {0}")]
    Prefix(String),
}

/// Result type for wire parsing.
pub type WireResult<T> = std::result::Result<T, WireError>;

// ============================================================================
// Command Errors
// ============================================================================

/// Error type for command dispatch and execution.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The caller's permission mask does not intersect the command's.
    #[error("insufficient permissions")]
    PermissionDenied,

    /// No such command.
    #[error("'{0}' does not exist")]
    Unknown(String),

    /// Interpreter diagnostic (parse, type, or name error).
    #[error("{0}")]
    Interp(String),
}

/// Result type for command execution.
pub type CommandResult<T> = std::result::Result<T, CommandError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Tests
// ============================================================================
