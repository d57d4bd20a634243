use std::ops::Deref;
use std::path::{Path, PathBuf};

/// An absolute, symlink-resolved path.
///
/// The only way to construct one is [`AbsPath::canonicalize`] or
/// [`AbsPath::make_absolute`]; there is no `From<PathBuf>` that skips
/// canonicalization, so a `&AbsPath` can always be handed to an external
/// `git` invocation (or compared for equality) without re-resolving it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AbsPath(PathBuf);

impl AbsPath {
    /// Canonicalize `path`, resolving symlinks and `.`/`..` components.
    ///
    /// Uses `dunce` rather than `std::fs::canonicalize` so the result never
    /// carries a Windows verbatim (`\\?\`) prefix that external tools like
    /// `git` choke on; on Unix this is a thin wrapper with no behavior change.
    pub fn canonicalize(path: impl AsRef<Path>) -> std::io::Result<Self> {
        dunce::canonicalize(path).map(AbsPath)
    }

    /// `path` if already absolute, otherwise `root.join(path)`, canonicalized.
    /// Returns `root` unchanged for an empty `path`.
    pub fn make_absolute(path: impl AsRef<Path>, root: &AbsPath) -> std::io::Result<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Ok(root.clone());
        }
        if path.is_absolute() {
            Self::canonicalize(path)
        } else {
            Self::canonicalize(root.0.join(path))
        }
    }

    /// Build an `AbsPath` for a location that may not exist yet (e.g. a
    /// worktree about to be created), by canonicalizing the nearest existing
    /// ancestor and rejoining the remaining, not-yet-created components.
    pub fn join_uncreated(root: &AbsPath, rest: impl AsRef<Path>) -> Self {
        AbsPath(root.0.join(rest))
    }

    pub fn join(&self, part: impl AsRef<Path>) -> AbsPath {
        AbsPath(self.0.join(part))
    }

    /// Split into (parent directory, file name), if both exist.
    pub fn split(&self) -> Option<(&Path, &std::ffi::OsStr)> {
        Some((self.0.parent()?, self.0.file_name()?))
    }

    pub fn base(&self) -> Option<&std::ffi::OsStr> {
        self.0.file_name()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.0.parent()
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }
}

/// Canonicalize `path`'s nearest existing ancestor, then rejoin whatever
/// components don't exist yet. Used for directories this engine owns but may
/// not have created on a first run, like the configured root before its
/// first `git init`.
pub fn canonicalize_nearest_ancestor(path: impl AsRef<Path>) -> std::io::Result<AbsPath> {
    let path = path.as_ref();
    let mut existing = path;
    let mut tail: Vec<&std::ffi::OsStr> = Vec::new();

    while !existing.exists() {
        let name = existing
            .file_name()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no existing ancestor found"))?;
        tail.push(name);
        existing = existing
            .parent()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no existing ancestor found"))?;
    }

    let mut result = AbsPath::canonicalize(existing)?;
    for name in tail.into_iter().rev() {
        result = result.join(name);
    }
    Ok(result)
}

impl Deref for AbsPath {
    type Target = Path;
    fn deref(&self) -> &Path {
        &self.0
    }
}

impl AsRef<Path> for AbsPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for AbsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[cfg(test)]
mod abs_path_tests {
    use super::AbsPath;

    #[test]
    fn canonicalize_resolves_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let abs = AbsPath::canonicalize(dir.path()).unwrap();
        assert!(abs.as_path().is_absolute());
    }

    #[test]
    fn make_absolute_passes_through_absolute_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsPath::canonicalize(dir.path()).unwrap();
        let same = AbsPath::make_absolute(root.as_path(), &root).unwrap();
        assert_eq!(same, root);
    }

    #[test]
    fn make_absolute_joins_relative_against_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("child")).unwrap();
        let root = AbsPath::canonicalize(dir.path()).unwrap();
        let joined = AbsPath::make_absolute("child", &root).unwrap();
        assert_eq!(joined.base().unwrap(), "child");
    }

    #[test]
    fn make_absolute_empty_path_returns_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsPath::canonicalize(dir.path()).unwrap();
        let same = AbsPath::make_absolute("", &root).unwrap();
        assert_eq!(same, root);
    }

    #[test]
    fn split_returns_dir_and_base() {
        let dir = tempfile::tempdir().unwrap();
        let root = AbsPath::canonicalize(dir.path()).unwrap();
        let (parent, name) = root.split().unwrap();
        assert_eq!(parent.join(name), *root.as_path());
    }

    #[test]
    fn canonicalize_nearest_ancestor_handles_fully_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let result = super::canonicalize_nearest_ancestor(dir.path()).unwrap();
        assert_eq!(result, AbsPath::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn canonicalize_nearest_ancestor_rejoins_missing_components() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("not-yet").join("created");
        let result = super::canonicalize_nearest_ancestor(&target).unwrap();
        let expected = AbsPath::canonicalize(dir.path()).unwrap().join("not-yet").join("created");
        assert_eq!(result, expected);
    }
}

