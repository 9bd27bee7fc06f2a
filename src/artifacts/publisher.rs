//! Publish: expose a file under the allowed root through a named link in the
//! public scratch directory.
//!
//! Validation is the security boundary. Anything that does not canonicalize
//! to an existing regular file under `allowed_root` is refused with
//! `AccessDenied` before the filesystem is touched. Once validation passes,
//! creating the link is best-effort: a failure is logged and reported in the
//! returned [`Publication`], never raised.
//!
//! Publishing a name that already exists keeps the existing entry; the new
//! call reports [`LinkOutcome::Failed`].

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::artifacts::reference::{generate_name, public_path_for, validate_name};
use crate::core::config::ArtifactsConfig;
use crate::core::errors::{AlmError, Result};
use crate::core::paths::{canonicalize_existing, is_within, resolve_absolute_path};
use crate::logger::dual::{ActivityEvent, ActivityLoggerHandle};

/// Result of creating the link once validation passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LinkOutcome {
    Created,
    Failed { error_code: String, message: String },
}

/// What a successful `publish` call produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Publication {
    pub name: String,
    /// `scratch_dir/name`.
    pub link: PathBuf,
    /// Canonical source path the link points at.
    pub target: PathBuf,
    /// URL path clients download from, e.g. `/tmp/abc123`.
    pub public_path: String,
    pub link_outcome: LinkOutcome,
}

impl Publication {
    pub fn is_linked(&self) -> bool {
        self.link_outcome == LinkOutcome::Created
    }
}

/// Publishes files from one allowed root into one scratch directory.
///
/// Holds no mutable state, so one instance can serve concurrent callers.
#[derive(Clone)]
pub struct Publisher {
    allowed_root: PathBuf,
    scratch_dir: PathBuf,
    public_prefix: String,
    logger: Option<ActivityLoggerHandle>,
}

impl Publisher {
    pub fn new(config: &ArtifactsConfig, logger: Option<ActivityLoggerHandle>) -> Self {
        Self {
            allowed_root: config.allowed_root.clone(),
            scratch_dir: config.scratch_dir.clone(),
            public_prefix: config.public_path.clone(),
            logger,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn allowed_root(&self) -> &Path {
        &self.allowed_root
    }

    /// Check that `source` may be published and return its canonical path.
    pub fn authorize(&self, source: &Path) -> Result<PathBuf> {
        let root = resolve_absolute_path(&self.allowed_root);

        let Ok(resolved) = canonicalize_existing(source) else {
            return Err(AlmError::access_denied(
                source,
                "file does not exist under the allowed root",
            ));
        };

        if !is_within(&root, &resolved) {
            return Err(AlmError::access_denied(
                source,
                format!("resolves outside allowed root {}", root.display()),
            ));
        }

        let is_file = fs::metadata(&resolved).is_ok_and(|meta| meta.is_file());
        if !is_file {
            return Err(AlmError::access_denied(source, "not a regular file"));
        }

        Ok(resolved)
    }

    /// Publish `source` as `scratch_dir/name`.
    pub fn publish(&self, source: &Path, name: &str) -> Result<Publication> {
        let target = match validate_name(name).and_then(|()| self.authorize(source)) {
            Ok(target) => target,
            Err(err) => {
                self.log_denial(source, &err);
                return Err(err);
            }
        };
        let link = self.scratch_dir.join(name);

        let link_outcome = match create_link(&target, &link) {
            Ok(()) => {
                self.log_event(ActivityEvent::ArtifactPublished {
                    name: name.to_string(),
                    link: link.to_string_lossy().into_owned(),
                    target: target.to_string_lossy().into_owned(),
                });
                LinkOutcome::Created
            }
            Err(source) => {
                let err = AlmError::LinkCreation {
                    link: link.clone(),
                    target: target.clone(),
                    source,
                };
                eprintln!("[ALM-PUBLISH] {err}");
                self.log_event(ActivityEvent::LinkCreationFailed {
                    name: name.to_string(),
                    link: link.to_string_lossy().into_owned(),
                    target: target.to_string_lossy().into_owned(),
                    error_message: err.to_string(),
                });
                LinkOutcome::Failed {
                    error_code: err.code().to_string(),
                    message: err.to_string(),
                }
            }
        };

        Ok(Publication {
            name: name.to_string(),
            link,
            target,
            public_path: public_path_for(&self.public_prefix, name),
            link_outcome,
        })
    }

    /// Publish under a freshly generated random name.
    pub fn publish_generated(&self, source: &Path) -> Result<Publication> {
        self.publish(source, &generate_name())
    }

    fn log_denial(&self, source: &Path, err: &AlmError) {
        let reason = match err {
            AlmError::AccessDenied { reason, .. } | AlmError::InvalidName { reason, .. } => {
                reason.clone()
            }
            other => other.to_string(),
        };
        self.log_event(ActivityEvent::PublishDenied {
            path: source.to_string_lossy().into_owned(),
            error_code: err.code().to_string(),
            reason,
        });
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}
