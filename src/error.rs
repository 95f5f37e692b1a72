use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication failed for {platform}: {message}")]
    Auth { platform: String, message: String },

    #[error("{platform} unavailable: {message}")]
    RemoteUnavailable { platform: String, message: String },

    #[error("{platform} rejected the request: {message}")]
    Validation { platform: String, message: String },

    #[error("{operation} is not supported by {platform}")]
    NotSupported { platform: String, operation: String },

    #[error("Mapping store {} is corrupt: {message}", path.display())]
    StoreCorrupt { path: PathBuf, message: String },

    #[error(
        "Mapping store {} is locked by another run ({holder}); remove {} if no run is active",
        path.display(),
        lock_path.display()
    )]
    StoreLocked {
        path: PathBuf,
        lock_path: PathBuf,
        holder: String,
    },

    #[error("Duplicate mapping: {0}")]
    DuplicateMapping(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn auth(platform: &str, message: impl Into<String>) -> Self {
        Error::Auth {
            platform: platform.to_string(),
            message: message.into(),
        }
    }

    pub fn unavailable(platform: &str, message: impl Into<String>) -> Self {
        Error::RemoteUnavailable {
            platform: platform.to_string(),
            message: message.into(),
        }
    }

    pub fn validation(platform: &str, message: impl Into<String>) -> Self {
        Error::Validation {
            platform: platform.to_string(),
            message: message.into(),
        }
    }

    pub fn not_supported(platform: &str, operation: impl Into<String>) -> Self {
        Error::NotSupported {
            platform: platform.to_string(),
            operation: operation.into(),
        }
    }

    /// Short, stable name used in run reports and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Auth { .. } => "auth",
            Error::RemoteUnavailable { .. } => "remote_unavailable",
            Error::Validation { .. } => "validation",
            Error::NotSupported { .. } => "not_supported",
            Error::StoreCorrupt { .. } => "store_corrupt",
            Error::StoreLocked { .. } => "store_locked",
            Error::DuplicateMapping(_) => "duplicate_mapping",
            Error::InvalidIdentifier(_) => "invalid_identifier",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether this error, raised by a single item's adapter call, concerns
    /// only that item. Anything else (an auth failure above all) means further
    /// calls to the same platform are pointless for the rest of the run.
    pub fn is_per_item(&self) -> bool {
        matches!(
            self,
            Error::RemoteUnavailable { .. } | Error::Validation { .. } | Error::NotSupported { .. }
        )
    }

    /// Only transient transport failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RemoteUnavailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_item_classification() {
        assert!(Error::unavailable("github", "timeout").is_per_item());
        assert!(Error::validation("github", "422").is_per_item());
        assert!(Error::not_supported("radicle", "update_item").is_per_item());
        assert!(!Error::auth("github", "403").is_per_item());
        assert!(!Error::Config("bad".into()).is_per_item());
        assert!(!Error::StoreCorrupt {
            path: PathBuf::from("x.json"),
            message: "eof".into()
        }
        .is_per_item());
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(Error::unavailable("radicle", "timed out").is_retryable());
        assert!(!Error::validation("radicle", "bad title").is_retryable());
        assert!(!Error::auth("github", "401").is_retryable());
    }

    #[test]
    fn test_display_includes_platform() {
        let e = Error::auth("github", "bad credentials");
        assert_eq!(
            e.to_string(),
            "Authentication failed for github: bad credentials"
        );
        assert_eq!(e.kind(), "auth");
    }
}
