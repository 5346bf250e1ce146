//! Path checks applied before anything from an archive touches the disk.
//!
//! Entry names and link targets come from untrusted archives. Both are
//! resolved lexically against the extraction directory and rejected when
//! they escape it. Links an archive has already created can still redirect
//! a lexically safe path, so [`stays_within`] repeats the check against the
//! filesystem right before anything is written.

use std::path::{self, Component, Path, PathBuf};

/// Resolve `.` and `..` components without consulting the filesystem.
///
/// `..` at the root stays at the root, as it does when a path is resolved.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                normalized.push(component)
            }
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
        }
    }
    normalized
}

fn absolute(path: &Path) -> Option<PathBuf> {
    path::absolute(path).ok().map(|p| normalize(&p))
}

/// Resolve an archive entry path below `base`.
///
/// Returns `None` when the entry would land outside `base`, or on `base`
/// itself.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use unrardll::safety::safe_path;
///
/// let base = Path::new("/tmp/out");
/// assert_eq!(
///     safe_path(base, "dir/file.txt"),
///     Some(Path::new("/tmp/out/dir/file.txt").to_path_buf())
/// );
///
/// // Path traversal attempt - rejected
/// assert_eq!(safe_path(base, "../../etc/passwd"), None);
///
/// // Absolute path - rejected
/// assert_eq!(safe_path(base, "/etc/passwd"), None);
/// ```
pub fn safe_path(base: &Path, relpath: impl AsRef<Path>) -> Option<PathBuf> {
    let base = absolute(base)?;
    let path = normalize(&base.join(relpath));
    if path == base || !path.starts_with(&base) {
        return None;
    }
    Some(path)
}

/// Whether a link whose target resolves to `target` (relative targets are
/// taken relative to `base`) stays inside `base`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use unrardll::safety::is_safe_symlink;
///
/// let base = Path::new("/tmp/out");
/// assert!(is_safe_symlink(base, Path::new("/tmp/out/dir/../file")));
/// assert!(!is_safe_symlink(base, Path::new("/tmp/out/../secret")));
/// assert!(!is_safe_symlink(base, Path::new("/tmp/outside")));
/// ```
pub fn is_safe_symlink(base: &Path, target: &Path) -> bool {
    match absolute(base) {
        Some(base) => normalize(&base.join(target)).starts_with(&base),
        None => false,
    }
}

/// Follow the longest existing prefix of `path` through the filesystem and
/// resolve the rest lexically.
fn resolve_on_disk(path: &Path) -> Option<PathBuf> {
    let components: Vec<Component> = path.components().collect();
    for split in (1..=components.len()).rev() {
        let existing: PathBuf = components[..split].iter().collect();
        if let Ok(mut real) = existing.canonicalize() {
            real.extend(&components[split..]);
            return Some(normalize(&real));
        }
    }
    None
}

/// Whether `path` stays inside `base` once links already on disk are
/// followed. Missing trailing components are resolved lexically.
///
/// # Examples
///
/// ```
/// use unrardll::safety::stays_within;
///
/// let base = std::env::temp_dir();
/// assert!(stays_within(&base, &base.join("not-created-yet/file.txt")));
/// assert!(!stays_within(&base, &base.join("../outside.txt")));
/// ```
pub fn stays_within(base: &Path, path: &Path) -> bool {
    let Ok(base) = base.canonicalize() else {
        return false;
    };
    // `..` must reach the filesystem unresolved, so no lexical pass here
    let resolved = path::absolute(path).ok().and_then(|p| resolve_on_disk(&p));
    resolved.is_some_and(|p| p.starts_with(&base))
}
