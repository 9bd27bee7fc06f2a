//! Shared path manipulation utilities.

use std::env;
use std::path::{Component, Path, PathBuf};

/// Directory under the installation's parent where downloadable links live.
const PUBLIC_DIR: &str = "public";
/// Leaf directory of the public scratch area.
const SCRATCH_LEAF: &str = "tmp";

/// Resolve a path to an absolute, normalized path.
///
/// If `fs::canonicalize` succeeds (path exists), it is used to resolve symlinks
/// and normalize components.
///
/// If it fails (e.g. path does not exist), the path is made absolute relative
/// to CWD and `..`/`.` components are resolved syntactically.
pub fn resolve_absolute_path(path: &Path) -> PathBuf {
    let absolute = absolutize(path);

    // Try filesystem resolution first (handles symlinks).
    if let Ok(canonical) = std::fs::canonicalize(&absolute) {
        return canonical;
    }

    // Fallback: syntactic normalization.
    normalize_syntactic(&absolute)
}

/// Strictly canonicalize a path: the path must exist and every symlink along
/// it is resolved. Unlike [`resolve_absolute_path`] there is no syntactic
/// fallback, so a dangling or missing path is reported as an error.
pub fn canonicalize_existing(path: &Path) -> std::io::Result<PathBuf> {
    std::fs::canonicalize(absolutize(path))
}

/// Component-wise containment check: `/data2/x` is not inside `/data`.
pub fn is_within(root: &Path, candidate: &Path) -> bool {
    candidate.starts_with(root)
}

/// Directory holding the running executable, used as the installation root.
pub fn installation_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

/// `<installation root>/../public/tmp`, normalized.
pub fn default_scratch_dir() -> PathBuf {
    scratch_dir_for(&installation_root())
}

/// Scratch directory derived from an explicit installation root.
pub fn scratch_dir_for(install_root: &Path) -> PathBuf {
    normalize_syntactic(
        &absolutize(install_root)
            .join("..")
            .join(PUBLIC_DIR)
            .join(SCRATCH_LEAF),
    )
}

/// Strip a single trailing separator, keeping `/` intact.
pub fn trim_trailing_slash(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if s.len() > 1
        && let Some(stripped) = s.strip_suffix('/')
    {
        return PathBuf::from(stripped);
    }
    path.to_path_buf()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir().map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
    }
}

fn normalize_syntactic(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::Normal(_) => {
                components.push(component);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
        }
    }
    components.into_iter().collect()
}
