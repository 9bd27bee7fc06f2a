//! ALM-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, AlmError>;

/// Top-level error type for the artifact lifecycle manager.
#[derive(Debug, Error)]
pub enum AlmError {
    #[error("[ALM-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[ALM-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[ALM-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[ALM-2001] access denied for {path}: {reason}")]
    AccessDenied { path: PathBuf, reason: String },

    #[error("[ALM-2002] invalid artifact name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("[ALM-2003] failed to link {link} -> {target}: {source}")]
    LinkCreation {
        link: PathBuf,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ALM-2101] scratch directory unavailable at {path}: {source}")]
    ScratchDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ALM-2102] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[ALM-2103] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[ALM-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[ALM-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl AlmError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "ALM-1001",
            Self::MissingConfig { .. } => "ALM-1002",
            Self::ConfigParse { .. } => "ALM-1003",
            Self::AccessDenied { .. } => "ALM-2001",
            Self::InvalidName { .. } => "ALM-2002",
            Self::LinkCreation { .. } => "ALM-2003",
            Self::ScratchDirUnavailable { .. } => "ALM-2101",
            Self::Serialization { .. } => "ALM-2102",
            Self::Sql { .. } => "ALM-2103",
            Self::Io { .. } => "ALM-3002",
            Self::Runtime { .. } => "ALM-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    ///
    /// Security-boundary refusals never become valid by retrying.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::LinkCreation { .. }
                | Self::ScratchDirUnavailable { .. }
                | Self::Sql { .. }
                | Self::Runtime { .. }
        )
    }

    /// Whether this error marks a caller crossing the publish boundary.
    #[must_use]
    pub const fn is_access_violation(&self) -> bool {
        matches!(self, Self::AccessDenied { .. } | Self::InvalidName { .. })
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for publish refusals.
    #[must_use]
    pub fn access_denied(path: impl AsRef<Path>, reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            path: path.as_ref().to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for AlmError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for AlmError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for AlmError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn io_err() -> std::io::Error {
        std::io::Error::other("test")
    }

    fn all_variants() -> Vec<AlmError> {
        vec![
            AlmError::InvalidConfig {
                details: String::new(),
            },
            AlmError::MissingConfig {
                path: PathBuf::new(),
            },
            AlmError::ConfigParse {
                context: "",
                details: String::new(),
            },
            AlmError::AccessDenied {
                path: PathBuf::new(),
                reason: String::new(),
            },
            AlmError::InvalidName {
                name: String::new(),
                reason: String::new(),
            },
            AlmError::LinkCreation {
                link: PathBuf::new(),
                target: PathBuf::new(),
                source: io_err(),
            },
            AlmError::ScratchDirUnavailable {
                path: PathBuf::new(),
                source: io_err(),
            },
            AlmError::Serialization {
                context: "",
                details: String::new(),
            },
            AlmError::Sql {
                context: "",
                details: String::new(),
            },
            AlmError::Io {
                path: PathBuf::new(),
                source: io_err(),
            },
            AlmError::Runtime {
                details: String::new(),
            },
        ]
    }

    #[test]
    fn error_codes_are_unique() {
        let errors = all_variants();
        let codes: Vec<&str> = errors.iter().map(AlmError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
    }

    #[test]
    fn display_carries_code_prefix() {
        for err in all_variants() {
            let msg = err.to_string();
            assert!(
                msg.starts_with(&format!("[{}]", err.code())),
                "display should lead with its code: {msg}"
            );
        }
    }

    #[test]
    fn access_denied_is_not_retryable() {
        let err = AlmError::access_denied("/etc/passwd", "outside allowed root");
        assert!(!err.is_retryable());
        assert!(err.is_access_violation());
        assert_eq!(err.code(), "ALM-2001");
        assert!(err.to_string().contains("/etc/passwd"));
    }

    #[test]
    fn sweep_side_failures_are_retryable() {
        assert!(
            AlmError::ScratchDirUnavailable {
                path: PathBuf::from("/srv/public/tmp"),
                source: io_err(),
            }
            .is_retryable()
        );
        assert!(
            AlmError::LinkCreation {
                link: PathBuf::new(),
                target: PathBuf::new(),
                source: io_err(),
            }
            .is_retryable()
        );
        assert!(
            !AlmError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn io_convenience_constructor() {
        let err = AlmError::io(
            "/tmp/test.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.code(), "ALM-3002");
        assert!(err.to_string().contains("/tmp/test.txt"));
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: AlmError = json_err.into();
        assert_eq!(err.code(), "ALM-2102");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: AlmError = toml_err.into();
        assert_eq!(err.code(), "ALM-1003");
    }
}
