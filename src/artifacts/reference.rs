//! Artifact references: named links in the public scratch directory.
//!
//! A reference carries no metadata of its own. Its age is the modification
//! time of the link itself (`lstat`), never of the file it points at, so
//! touching the source does not extend a download window.

#![allow(missing_docs)]

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};

use rand::Rng;
use serde::Serialize;

use crate::core::errors::{AlmError, Result};

/// Placeholder that keeps the scratch directory in version control.
/// Never expired, never counted.
pub const SENTINEL_NAME: &str = ".gitkeep";

/// Random bytes in a generated name (hex-encoded, so twice as many chars).
const GENERATED_NAME_BYTES: usize = 16;

/// One link found in (or created in) the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactReference {
    pub name: String,
    /// `scratch_dir/name`.
    pub link: PathBuf,
    /// Where the link points; `None` for entries that are not symlinks.
    pub target: Option<PathBuf>,
    /// Link mtime, the reference's creation time for expiry purposes.
    #[serde(with = "system_time_rfc3339")]
    pub modified: SystemTime,
}

impl ArtifactReference {
    /// `modified + ttl`, or `None` if that overflows the clock.
    pub fn expires_at(&self, ttl: Duration) -> Option<SystemTime> {
        self.modified.checked_add(ttl)
    }

    /// Strictly past its expiry instant.
    pub fn is_expired(&self, ttl: Duration, now: SystemTime) -> bool {
        self.expires_at(ttl).is_some_and(|expire_at| expire_at < now)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self, ttl: Duration, now: SystemTime) -> Duration {
        self.expires_at(ttl)
            .and_then(|expire_at| expire_at.duration_since(now).ok())
            .unwrap_or(Duration::ZERO)
    }

    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.modified).unwrap_or(Duration::ZERO)
    }

    /// URL path of this reference, e.g. `/tmp/abc123`.
    pub fn public_path(&self, public_prefix: &str) -> String {
        public_path_for(public_prefix, &self.name)
    }
}

/// A scratch-directory entry as seen by a scan.
#[derive(Debug)]
pub enum ScratchEntry {
    Reference(ArtifactReference),
    /// The entry was listed but could not be stat'ed.
    Unreadable {
        name: String,
        path: PathBuf,
        error: io::Error,
    },
}

impl ScratchEntry {
    pub fn name(&self) -> &str {
        match self {
            Self::Reference(reference) => &reference.name,
            Self::Unreadable { name, .. } => name,
        }
    }
}

/// Name reported for a directory entry the listing itself failed to yield.
pub const UNLISTABLE_ENTRY: &str = "<unlistable entry>";

/// List everything directly under `scratch_dir` except the sentinel, sorted
/// by name.
///
/// Failing to list the directory itself is `ScratchDirUnavailable`; a single
/// entry that cannot be stat'ed is reported as [`ScratchEntry::Unreadable`]
/// and does not fail the scan.
pub fn scan_scratch_dir(scratch_dir: &Path) -> Result<Vec<ScratchEntry>> {
    let entries = fs::read_dir(scratch_dir).map_err(|source| AlmError::ScratchDirUnavailable {
        path: scratch_dir.to_path_buf(),
        source,
    })?;
    Ok(collect_entries(scratch_dir, entries))
}

fn collect_entries<I>(scratch_dir: &Path, entries: I) -> Vec<ScratchEntry>
where
    I: IntoIterator<Item = io::Result<fs::DirEntry>>,
{
    let mut out = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                out.push(ScratchEntry::Unreadable {
                    name: UNLISTABLE_ENTRY.to_string(),
                    path: scratch_dir.to_path_buf(),
                    error,
                });
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == SENTINEL_NAME {
            continue;
        }
        let path = entry.path();
        out.push(match read_reference(&path, name.clone()) {
            Ok(reference) => ScratchEntry::Reference(reference),
            Err(error) => ScratchEntry::Unreadable { name, path, error },
        });
    }

    out.sort_by(|a, b| a.name().cmp(b.name()));
    out
}

/// Read one link without following it.
pub fn read_reference(link: &Path, name: String) -> io::Result<ArtifactReference> {
    let meta = fs::symlink_metadata(link)?;
    let target = if meta.file_type().is_symlink() {
        fs::read_link(link).ok()
    } else {
        None
    };
    Ok(ArtifactReference {
        name,
        link: link.to_path_buf(),
        target,
        modified: meta.modified()?,
    })
}

/// Reject names that would land anywhere but directly inside the scratch
/// directory, or that collide with the sentinel.
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| AlmError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name == SENTINEL_NAME {
        return Err(invalid("name is reserved"));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(invalid("name must not contain path separators"));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(invalid("name must be a single plain path component")),
    }
}

/// Random 32-hex-character name for callers that do not pick one.
pub fn generate_name() -> String {
    let mut bytes = [0u8; GENERATED_NAME_BYTES];
    rand::rng().fill(&mut bytes[..]);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// `prefix` + `/` + `name`, tolerating a trailing slash on the prefix.
pub fn public_path_for(public_prefix: &str, name: &str) -> String {
    format!("{}/{name}", public_prefix.trim_end_matches('/'))
}

/// Full download URL: request origin (scheme + host) joined with the public
/// path of `name`.
pub fn download_url(origin: &str, public_prefix: &str, name: &str) -> String {
    format!(
        "{}{}",
        origin.trim_end_matches('/'),
        public_path_for(public_prefix, name)
    )
}

mod system_time_rfc3339 {
    use std::time::SystemTime;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        let dt: chrono::DateTime<chrono::Utc> = (*time).into();
        serializer.serialize_str(&dt.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}
