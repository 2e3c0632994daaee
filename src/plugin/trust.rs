//! Trusted root resolution and path containment checks.
//!
//! Everything that decides whether a path "lives inside" a trusted root goes
//! through this module. Containment is always checked twice:
//!
//! - **lexically**, on normalized absolute paths, without touching the disk;
//! - **canonically**, after resolving symlinks on both the candidate and the roots.
//!
//! A symlink can look contained lexically while its target lives elsewhere, so
//! callers must require both checks to pass. The canonical check is skipped only
//! when the candidate cannot be canonicalized (it does not exist yet), in which
//! case the lexical verdict stands and the later existence test fails anyway.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use super::{PluginError, PluginResult};

/// Default environment variable naming extra trusted roots.
pub const TRUSTED_ROOTS_ENV: &str = "NOTES_PLUGIN_ROOTS";

/// OS path-list delimiter accepted in the environment value alongside `,`.
#[cfg(windows)]
pub const PATH_LIST_SEPARATOR: char = ';';
#[cfg(not(windows))]
pub const PATH_LIST_SEPARATOR: char = ':';

/// Build the deduplicated, sorted list of trusted roots.
///
/// Roots are resolved against `cwd` and normalized lexically before
/// deduplication, so `./bundled` and `/work/bundled` collapse into one entry.
/// No filesystem access happens here.
pub fn resolve_trusted_roots<B, C>(
    bundled: B,
    configured: C,
    env_value: Option<&str>,
    cwd: &Path,
) -> Vec<PathBuf>
where
    B: IntoIterator,
    B::Item: AsRef<Path>,
    C: IntoIterator,
    C::Item: AsRef<Path>,
{
    let mut roots = BTreeSet::new();

    let from_env = env_value.into_iter().flat_map(split_env_roots);

    for root in bundled
        .into_iter()
        .map(|p| p.as_ref().to_path_buf())
        .chain(configured.into_iter().map(|p| p.as_ref().to_path_buf()))
        .chain(from_env)
    {
        if root.as_os_str().is_empty() {
            continue;
        }
        roots.insert(absolutize(&root, cwd));
    }

    roots.into_iter().collect()
}

/// Split an environment value on `,` and the OS path-list delimiter.
pub fn split_env_roots(value: &str) -> Vec<PathBuf> {
    value
        .split(|c| c == ',' || c == PATH_LIST_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Resolve `path` against `cwd` and normalize it lexically.
pub fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&cwd.join(path))
    }
}

/// Collapse `.` and `..` components without consulting the filesystem.
///
/// `..` at the root is dropped (`/..` is `/`); leading `..` on a relative path
/// is preserved.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return PathBuf::from(".");
    }

    parts.iter().collect()
}

/// Lexical containment: the relative path from `root` to `candidate` must not
/// climb out with `..` and must not be absolute.
///
/// Both paths are normalized first; `candidate == root` counts as contained.
pub fn is_lexically_contained(root: &Path, candidate: &Path) -> bool {
    let root = normalize_lexically(root);
    let candidate = normalize_lexically(candidate);

    match candidate.strip_prefix(&root) {
        Ok(relative) => relative.components().all(|c| matches!(c, Component::Normal(_))),
        Err(_) => false,
    }
}

/// Whether `candidate` is lexically inside at least one of `roots`.
pub fn is_lexically_trusted(roots: &[PathBuf], candidate: &Path) -> bool {
    roots.iter().any(|root| is_lexically_contained(root, candidate))
}

/// Canonical containment against every trusted root.
///
/// Returns `None` when `candidate` cannot be canonicalized (missing, dangling
/// symlink, permission error), otherwise whether its real location lies inside
/// the real location of some root.
pub fn is_canonically_contained(roots: &[PathBuf], candidate: &Path) -> Option<bool> {
    let real_candidate = candidate.canonicalize().ok()?;

    Some(roots.iter().any(|root| {
        let real_root = root.canonicalize().unwrap_or_else(|_| normalize_lexically(root));
        is_lexically_contained(&real_root, &real_candidate)
    }))
}

/// Require `candidate` to be contained in the trusted roots both lexically and
/// canonically.
pub fn ensure_trusted(roots: &[PathBuf], candidate: &Path) -> PluginResult<()> {
    if !is_lexically_trusted(roots, candidate) {
        tracing::debug!(path = %candidate.display(), "Rejected path: lexically outside trusted roots");
        return Err(PluginError::OutsideTrustedRoots(candidate.to_path_buf()));
    }

    if is_canonically_contained(roots, candidate) == Some(false) {
        tracing::debug!(path = %candidate.display(), "Rejected path: resolves outside trusted roots");
        return Err(PluginError::OutsideTrustedRoots(candidate.to_path_buf()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cwd() -> PathBuf {
        if cfg!(windows) {
            PathBuf::from(r"C:\work")
        } else {
            PathBuf::from("/work")
        }
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/./b/../c/")), PathBuf::from("/a/c"));
        assert_eq!(normalize_lexically(Path::new("/../a")), PathBuf::from("/a"));
        assert_eq!(normalize_lexically(Path::new("../a/./b")), PathBuf::from("../a/b"));
        assert_eq!(normalize_lexically(Path::new("a/..")), PathBuf::from("."));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_and_absolute_roots_collapse() {
        let roots = resolve_trusted_roots(["./bundled"], ["/work/bundled/"], None, &cwd());
        assert_eq!(roots, vec![PathBuf::from("/work/bundled")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_env_value_supports_both_delimiters() {
        let roots = resolve_trusted_roots(
            Vec::<PathBuf>::new(),
            Vec::<PathBuf>::new(),
            Some(" /opt/b , /opt/a:relative ,, "),
            &cwd(),
        );
        assert_eq!(
            roots,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b"), PathBuf::from("/work/relative")]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_roots_are_sorted_and_deduplicated() {
        let roots = resolve_trusted_roots(
            ["/z", "/a", "/m/../a"],
            ["/z/", "./a"],
            Some("/a"),
            &cwd(),
        );
        assert_eq!(roots, vec![PathBuf::from("/a"), PathBuf::from("/work/a"), PathBuf::from("/z")]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let first = resolve_trusted_roots(["plugins", "./more/../plugins"], ["x/y"], Some("q,r"), &cwd());
        let second = resolve_trusted_roots(&first, Vec::<PathBuf>::new(), None, &cwd());
        assert_eq!(first, second);
    }

    #[cfg(unix)]
    #[test]
    fn test_lexical_containment() {
        let root = Path::new("/plugins");
        assert!(is_lexically_contained(root, Path::new("/plugins/tasks")));
        assert!(is_lexically_contained(root, Path::new("/plugins")));
        assert!(!is_lexically_contained(root, Path::new("/plugins/../etc")));
        assert!(!is_lexically_contained(root, Path::new("/plugins-evil/tasks")));
        assert!(!is_lexically_contained(root, Path::new("/etc")));
    }

    #[test]
    fn test_canonical_check_skipped_for_missing_paths() {
        let dir = TempDir::new().unwrap();
        let roots = vec![dir.path().to_path_buf()];
        assert_eq!(is_canonically_contained(&roots, &dir.path().join("missing")), None);
        assert_eq!(is_canonically_contained(&roots, dir.path()), Some(true));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let trusted = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let link = trusted.path().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let roots = vec![trusted.path().to_path_buf()];
        assert!(is_lexically_trusted(&roots, &link));
        assert_eq!(is_canonically_contained(&roots, &link), Some(false));
        assert!(matches!(ensure_trusted(&roots, &link), Err(PluginError::OutsideTrustedRoots(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_root_still_trusts_its_children() {
        let real = TempDir::new().unwrap();
        let alias_parent = TempDir::new().unwrap();
        let alias = alias_parent.path().join("alias");
        std::os::unix::fs::symlink(real.path(), &alias).unwrap();
        std::fs::create_dir(real.path().join("tasks")).unwrap();

        let roots = vec![alias.clone()];
        assert!(ensure_trusted(&roots, &alias.join("tasks")).is_ok());
    }
}
