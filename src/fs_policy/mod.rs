//! Filesystem policy: path resolution, allowed-root containment, and
//! symlink-traversal control. A standalone, immutable policy object that
//! every component in this crate resolves paths through.

use crate::errors::ExecError;
use std::path::{Component, Path, PathBuf};

/// Fixed system-root aliases rewritten before containment checks, so that a
/// caller-supplied `/tmp/foo` and the kernel's real `/private/tmp/foo` (macOS)
/// are recognized as the same location.
#[cfg(target_os = "macos")]
const SYSTEM_ROOT_ALIASES: &[(&str, &str)] = &[
    ("/var", "/private/var"),
    ("/tmp", "/private/tmp"),
    ("/etc", "/private/etc"),
    ("/bin", "/usr/bin"),
    ("/sbin", "/usr/sbin"),
    ("/lib", "/usr/lib"),
];

#[cfg(not(target_os = "macos"))]
const SYSTEM_ROOT_ALIASES: &[(&str, &str)] = &[];

/// Immutable filesystem access policy. Construct via [`FSPolicyBuilder`].
#[derive(Debug, Clone)]
pub struct FSPolicy {
    allowed_roots: Vec<PathBuf>,
    work_base_dir: PathBuf,
    block_symlinks: bool,
}

#[derive(Debug, Default)]
pub struct FSPolicyBuilder {
    allowed_roots: Vec<PathBuf>,
    work_base_dir: Option<PathBuf>,
    block_symlinks: bool,
}

impl FSPolicyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allowed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.allowed_roots.push(root.into());
        self
    }

    pub fn allowed_roots(mut self, roots: impl IntoIterator<Item = PathBuf>) -> Self {
        self.allowed_roots.extend(roots);
        self
    }

    pub fn work_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_base_dir = Some(dir.into());
        self
    }

    pub fn block_symlinks(mut self, block: bool) -> Self {
        self.block_symlinks = block;
        self
    }

    pub fn build(self) -> Result<FSPolicy, ExecError> {
        let mut allowed_roots = Vec::with_capacity(self.allowed_roots.len());
        for root in self.allowed_roots {
            let canon = canonicalize_best_effort(&root);
            allowed_roots.push(canon);
        }

        let work_base_dir = match self.work_base_dir {
            Some(dir) => canonicalize_best_effort(&dir),
            None => match allowed_roots.first() {
                Some(root) => root.clone(),
                None => std::env::current_dir()
                    .map_err(|e| ExecError::invalid(format!("cannot determine cwd: {e}")))?,
            },
        };

        if !allowed_roots.is_empty() && !is_within_any(&work_base_dir, &allowed_roots) {
            return Err(ExecError::policy(format!(
                "workBaseDir \"{}\" is outside allowed roots",
                work_base_dir.display()
            )));
        }

        Ok(FSPolicy {
            allowed_roots,
            work_base_dir,
            block_symlinks: self.block_symlinks,
        })
    }
}

impl FSPolicy {
    pub fn builder() -> FSPolicyBuilder {
        FSPolicyBuilder::new()
    }

    pub fn work_base_dir(&self) -> &Path {
        &self.work_base_dir
    }

    pub fn allowed_roots(&self) -> &[PathBuf] {
        &self.allowed_roots
    }

    pub fn block_symlinks(&self) -> bool {
        self.block_symlinks
    }

    /// Resolve `input` (trimmed; falls back to `default_if_empty`) into a
    /// cleaned, lexical absolute path contained within an allowed root.
    ///
    /// Returns the *lexical* path, not the symlink-resolved one, so callers
    /// can `lstat` the final component themselves (see
    /// [`Self::verify_dir_resolved`]).
    pub fn resolve_path(
        &self,
        input: &str,
        default_if_empty: &str,
    ) -> Result<PathBuf, ExecError> {
        self.resolve_path_under(input, default_if_empty, &self.work_base_dir)
    }

    /// Like [`Self::resolve_path`], but relative input is joined against
    /// `base` instead of `work_base_dir` — used when a caller-supplied
    /// workdir should anchor a relative path (e.g. a script path relative
    /// to the resolved script workdir).
    pub fn resolve_path_under(
        &self,
        input: &str,
        default_if_empty: &str,
        base: &Path,
    ) -> Result<PathBuf, ExecError> {
        let trimmed = input.trim();
        let raw = if trimmed.is_empty() {
            default_if_empty.trim()
        } else {
            trimmed
        };

        if raw.is_empty() {
            return Err(ExecError::invalid("path is required"));
        }
        if raw.contains('\0') {
            return Err(ExecError::invalid("path contains NUL byte"));
        }
        if is_drive_relative(raw) {
            return Err(ExecError::invalid(format!(
                "path \"{raw}\" is drive-relative, which is not supported"
            )));
        }

        let candidate = PathBuf::from(raw);
        let joined = if candidate.is_absolute() {
            candidate
        } else {
            base.join(candidate)
        };

        let lexical = lexical_normalize(&joined);
        let aliased = apply_system_root_aliases(&lexical);

        let check_path = best_effort_symlink_resolve(&aliased);

        if !self.allowed_roots.is_empty() && !is_within_any(&check_path, &self.allowed_roots) {
            return Err(ExecError::policy(format!(
                "path \"{}\" is outside allowed roots",
                aliased.display()
            )));
        }

        Ok(aliased)
    }

    /// Verify that `abs_dir` is a directory and, if `block_symlinks` is set,
    /// that none of its components are a disallowed symlink.
    pub fn verify_dir_resolved(&self, abs_dir: &Path) -> Result<(), ExecError> {
        if !abs_dir.is_absolute() {
            return Err(ExecError::invalid("directory path must be absolute"));
        }

        if !self.block_symlinks {
            let meta = std::fs::metadata(abs_dir).map_err(ExecError::Io)?;
            if !meta.is_dir() {
                return Err(ExecError::invalid(format!(
                    "\"{}\" is not a directory",
                    abs_dir.display()
                )));
            }
            return Ok(());
        }

        walk_verify_no_disallowed_symlink(abs_dir)?;
        let meta = std::fs::metadata(abs_dir).map_err(ExecError::Io)?;
        if !meta.is_dir() {
            return Err(ExecError::invalid(format!(
                "\"{}\" is not a directory",
                abs_dir.display()
            )));
        }
        Ok(())
    }

    /// Create `abs_dir` (and missing parents) if it does not exist, honoring
    /// `block_symlinks` by creating one component at a time and refusing to
    /// step through a disallowed symlink. `max_new_dirs == 0` means unlimited.
    pub fn ensure_dir_resolved(&self, abs_dir: &Path, max_new_dirs: u32) -> Result<(), ExecError> {
        if !self.block_symlinks {
            std::fs::create_dir_all(abs_dir).map_err(ExecError::Io)?;
            return self.verify_dir_resolved(abs_dir);
        }

        let mut created = 0u32;
        let mut current = PathBuf::new();
        for component in abs_dir.components() {
            current.push(component);
            if current.exists() {
                continue;
            }
            if max_new_dirs != 0 && created >= max_new_dirs {
                return Err(ExecError::invalid("too many parent directories"));
            }
            std::fs::create_dir(&current).map_err(ExecError::Io)?;
            created += 1;
        }
        self.verify_dir_resolved(abs_dir)
    }

    /// Require that `abs_path` exists, is a regular file, and (when
    /// `block_symlinks` is set) is not itself a symlink.
    pub fn require_existing_regular_file_resolved(&self, abs_path: &Path) -> Result<(), ExecError> {
        if self.block_symlinks {
            if let Some(parent) = abs_path.parent() {
                if parent.as_os_str().is_empty() {
                    // root-level path, nothing to verify above it
                } else {
                    self.verify_dir_resolved(parent)?;
                }
            }
            let meta = std::fs::symlink_metadata(abs_path)
                .map_err(|e| ExecError::not_found(format!("{}: {e}", abs_path.display())))?;
            if meta.file_type().is_symlink() {
                return Err(ExecError::policy(format!(
                    "\"{}\" is a symlink, which is disallowed",
                    abs_path.display()
                )));
            }
            if !meta.is_file() {
                return Err(ExecError::invalid(format!(
                    "\"{}\" is not a regular file",
                    abs_path.display()
                )));
            }
            return Ok(());
        }

        let meta = std::fs::metadata(abs_path)
            .map_err(|e| ExecError::not_found(format!("{}: {e}", abs_path.display())))?;
        if !meta.is_file() {
            return Err(ExecError::invalid(format!(
                "\"{}\" is not a regular file",
                abs_path.display()
            )));
        }
        Ok(())
    }
}

fn is_drive_relative(raw: &str) -> bool {
    // "C:foo" (drive letter + relative path, no separator) is a Windows
    // path form we never accept, on any platform we run on.
    let bytes = raw.as_bytes();
    bytes.len() >= 2
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && !raw.starts_with(r"\\")
        && !raw[2..].starts_with(['/', '\\'])
}

/// Normalize a path lexically (without touching the filesystem): resolve `.`
/// and `..` components so `/a/../b` becomes `/b` rather than passing through
/// unexamined.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            Component::CurDir => {}
            other => components.push(other),
        }
    }
    components.iter().collect()
}

#[cfg(target_os = "macos")]
fn apply_system_root_aliases(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    for (from, to) in SYSTEM_ROOT_ALIASES {
        if s == *from {
            return PathBuf::from(to);
        }
        if let Some(rest) = s.strip_prefix(&format!("{from}/")) {
            return PathBuf::from(to).join(rest);
        }
    }
    path.to_path_buf()
}

#[cfg(not(target_os = "macos"))]
fn apply_system_root_aliases(path: &Path) -> PathBuf {
    path.to_path_buf()
}

/// Walk upward from `path` resolving symlinks best-effort: components that
/// don't exist yet are left unresolved and rejoined to the resolved prefix.
fn best_effort_symlink_resolve(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let mut unresolved_tail = Vec::new();
    let mut probe = path.to_path_buf();
    loop {
        if let Ok(resolved) = probe.canonicalize() {
            let mut out = resolved;
            for component in unresolved_tail.iter().rev() {
                out.push(component);
            }
            return out;
        }
        match probe.file_name() {
            Some(name) => {
                unresolved_tail.push(name.to_os_string());
                if !probe.pop() {
                    break;
                }
            }
            None => break,
        }
    }
    path.to_path_buf()
}

fn is_within_any(path: &Path, roots: &[PathBuf]) -> bool {
    roots.iter().any(|root| {
        path == root
            || path
                .strip_prefix(root)
                .is_ok_and(|rel| !matches!(rel.components().next(), Some(Component::ParentDir)))
    })
}

fn canonicalize_best_effort(path: &Path) -> PathBuf {
    path.canonicalize()
        .unwrap_or_else(|_| lexical_normalize(path))
}

/// True if `path`'s basename (or, on a platform whose symlink alias table
/// includes it, an ancestor) matches the fixed system-symlink alias table.
fn is_system_symlink_alias(path: &Path) -> bool {
    let s = path.to_string_lossy();
    SYSTEM_ROOT_ALIASES.iter().any(|(from, _)| s == *from)
}

fn walk_verify_no_disallowed_symlink(abs_dir: &Path) -> Result<(), ExecError> {
    let mut current = PathBuf::new();
    for component in abs_dir.components() {
        current.push(component);
        if current.as_os_str().is_empty() || current == Path::new("/") {
            continue;
        }
        let meta = std::fs::symlink_metadata(&current).map_err(ExecError::Io)?;
        if meta.file_type().is_symlink() && !is_system_symlink_alias(&current) {
            return Err(ExecError::policy(format!(
                "\"{}\" contains a disallowed symlink component",
                abs_dir.display()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn resolve_path_rejects_empty() {
        let tmp = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy.resolve_path("", "").unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn resolve_path_rejects_nul() {
        let tmp = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy.resolve_path("foo\0bar", "").unwrap_err();
        assert!(err.to_string().contains("NUL"));
    }

    #[test]
    fn resolve_path_joins_relative_against_work_base() {
        let tmp = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let resolved = policy.resolve_path("sub/dir", "").unwrap();
        assert_eq!(
            resolved,
            canonicalize_best_effort(tmp.path()).join("sub/dir")
        );
    }

    #[test]
    fn resolve_path_outside_allowed_roots_fails() {
        let tmp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy.resolve_path(other.path().to_str().unwrap(), "").unwrap_err();
        assert!(err.to_string().contains("outside allowed roots"));
    }

    #[test]
    fn resolve_path_empty_allowed_roots_means_no_sandbox() {
        let policy = FSPolicy::builder().build().unwrap();
        let resolved = policy.resolve_path("/etc", "").unwrap();
        assert_eq!(resolved, PathBuf::from("/etc"));
    }

    #[test]
    fn resolve_path_rejects_drive_relative() {
        let tmp = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy.resolve_path("C:foo", "").unwrap_err();
        assert!(err.to_string().contains("drive-relative"));
    }

    #[test]
    fn lexical_normalize_collapses_parent_dirs() {
        let out = lexical_normalize(Path::new("/a/b/../c"));
        assert_eq!(out, PathBuf::from("/a/c"));
    }

    #[test]
    fn verify_dir_resolved_requires_directory() {
        let tmp = TempDir::new().unwrap();
        let file_path = tmp.path().join("file.txt");
        std::fs::write(&file_path, "x").unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy.verify_dir_resolved(&file_path).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }

    #[test]
    fn ensure_dir_resolved_creates_missing_components() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("a/b/c");
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        policy.ensure_dir_resolved(&target, 0).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn require_existing_regular_file_rejects_missing() {
        let tmp = TempDir::new().unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .build()
            .unwrap();
        let err = policy
            .require_existing_regular_file_resolved(&tmp.path().join("missing.txt"))
            .unwrap_err();
        assert!(matches!(err, ExecError::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn block_symlinks_rejects_symlinked_file() {
        let tmp = TempDir::new().unwrap();
        let real = tmp.path().join("real.txt");
        std::fs::write(&real, "x").unwrap();
        let link = tmp.path().join("link.txt");
        std::os::unix::fs::symlink(&real, &link).unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .block_symlinks(true)
            .build()
            .unwrap();
        let err = policy
            .require_existing_regular_file_resolved(&link)
            .unwrap_err();
        assert!(matches!(err, ExecError::PolicyViolation(_)));
    }

    #[cfg(unix)]
    #[test]
    fn block_symlinks_rejects_symlinked_parent_dir() {
        let tmp = TempDir::new().unwrap();
        let real_dir = tmp.path().join("real_dir");
        std::fs::create_dir(&real_dir).unwrap();
        let link_dir = tmp.path().join("link_dir");
        std::os::unix::fs::symlink(&real_dir, &link_dir).unwrap();
        let policy = FSPolicy::builder()
            .allowed_root(tmp.path())
            .block_symlinks(true)
            .build()
            .unwrap();
        let err = policy.verify_dir_resolved(&link_dir).unwrap_err();
        assert!(matches!(err, ExecError::PolicyViolation(_)));
    }
}
