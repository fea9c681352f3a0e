//! Common error types for lingo
//!
//! Every failure the core can surface has its own variant so callers can
//! render a precise message. [`Error::kind`] gives the stable identifier
//! used in `{kind, message}` payloads.

use thiserror::Error;

/// Common result type for lingo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by every lingo component
#[derive(Error, Debug)]
pub enum Error {
    /// Input to the key path model was not a JSON object
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Caller has no identity profile, shared storage refuses the write
    #[error("Promotion denied: {0}")]
    PromotionDenied(String),

    /// Project already lives in shared storage
    #[error("Project {0} is already promoted to shared storage")]
    AlreadyPromoted(String),

    /// No unused invite code could be generated
    #[error("Could not generate a unique invite code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: usize },

    /// Invite code does not exist (or was deleted)
    #[error("Invite code '{0}' is not valid")]
    InvalidCode(String),

    /// Invite code is past its expiry instant
    #[error("Invite code '{0}' has expired")]
    CodeExpired(String),

    /// Invite code reached its use limit
    #[error("Invite code '{0}' has reached its use limit")]
    CodeExhausted(String),

    /// Joining identity already owns the project
    #[error("You already own project {0}")]
    AlreadyOwner(String),

    /// Joining identity is already a member of the project
    #[error("You are already a member of project {0}")]
    AlreadyMember(String),

    /// Role does not allow the requested mutation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Project id unknown to both stores
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// Shared record changed since the caller's copy was loaded
    #[error("Project {project_id} was modified elsewhere (expected version {expected}, found {found})")]
    VersionConflict {
        project_id: String,
        expected: i64,
        found: i64,
    },

    /// Transient storage failure; the caller may retry
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored document could not be (de)serialised
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable snake-case identifier of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidDocument(_) => "invalid_document",
            Error::PromotionDenied(_) => "promotion_denied",
            Error::AlreadyPromoted(_) => "already_promoted",
            Error::CodeSpaceExhausted { .. } => "code_space_exhausted",
            Error::InvalidCode(_) => "invalid_code",
            Error::CodeExpired(_) => "code_expired",
            Error::CodeExhausted(_) => "code_exhausted",
            Error::AlreadyOwner(_) => "already_owner",
            Error::AlreadyMember(_) => "already_member",
            Error::PermissionDenied(_) => "permission_denied",
            Error::ProjectNotFound(_) => "project_not_found",
            Error::VersionConflict { .. } => "version_conflict",
            Error::Database(_) if self.is_constraint_violation() => "constraint_violation",
            Error::StorageUnavailable(_) | Error::Database(_) | Error::Io(_) => {
                "storage_unavailable"
            }
            Error::InvalidInput(_) => "invalid_input",
            Error::Config(_) => "config",
            Error::Json(_) => "invalid_document",
        }
    }

    /// True for transient failures where retrying the same call may succeed
    ///
    /// A violated constraint fails the same way every time, so it is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(_) => !self.is_constraint_violation(),
            Error::StorageUnavailable(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// True if SQLite rejected a write for breaking a table constraint
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                !matches!(db_err.kind(), sqlx::error::ErrorKind::Other)
            }
            _ => false,
        }
    }

    /// True if the violated constraint is a primary key or UNIQUE index
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
            _ => false,
        }
    }

    /// `{kind, message}` pair handed to callers
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::json!({
            "kind": self.kind(),
            "message": self.to_string(),
        })
    }

    /// True if this is SQLite reporting a busy/locked database
    pub fn is_lock_error(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}
