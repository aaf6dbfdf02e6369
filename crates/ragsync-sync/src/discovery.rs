//! File discovery under one or more roots, with regex exclusions
//!
//! Exclusion patterns match against the full absolute path. A directory
//! that matches is pruned: nothing beneath it is visited. Checksums are
//! not computed here; callers decide when to pay for the read.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::mime::mime_type_for;

/// One discovered regular file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub size: u64,
    pub mime_type: String,
}

/// Compiled exclusion patterns
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    patterns: Vec<Regex>,
}

impl ExcludeSet {
    /// Compile every pattern up front. Any invalid pattern fails the whole set.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).with_context(|| format!("invalid exclude pattern '{p}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        self.patterns.iter().any(|re| re.is_match(&s))
    }
}

/// Walk every root and return the files not excluded, sorted by path.
///
/// A root may be a single file. Roots are made absolute against the
/// current directory. An unreadable directory aborts with an error.
pub fn discover_files<P: AsRef<Path>>(
    roots: &[P],
    excludes: &ExcludeSet,
) -> Result<Vec<DiscoveredFile>> {
    let mut out = Vec::new();
    for root in roots {
        let root = root.as_ref();
        let abs = std::path::absolute(root)
            .with_context(|| format!("resolving absolute path: {}", root.display()))?;
        let meta = std::fs::metadata(&abs)
            .with_context(|| format!("stat root: {}", abs.display()))?;

        if excludes.is_excluded(&abs) {
            debug!(path = %abs.display(), "root excluded");
            continue;
        }
        if meta.is_dir() {
            walk(&abs, excludes, &mut out)
                .with_context(|| format!("discovering files under {}", abs.display()))?;
        } else if meta.is_file() {
            out.push(describe(abs, meta.len()));
        }
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out.dedup_by(|a, b| a.path == b.path);
    Ok(out)
}

fn describe(path: PathBuf, size: u64) -> DiscoveredFile {
    let mime_type = mime_type_for(&path).to_string();
    DiscoveredFile {
        path,
        size,
        mime_type,
    }
}

fn walk(dir: &Path, excludes: &ExcludeSet, out: &mut Vec<DiscoveredFile>) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("reading dir: {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("reading dir entry in {}", dir.display()))?;
        let path = entry.path();
        if excludes.is_excluded(&path) {
            debug!(path = %path.display(), "excluded");
            continue;
        }

        let file_type = entry
            .file_type()
            .with_context(|| format!("stat: {}", path.display()))?;
        if file_type.is_dir() {
            walk(&path, excludes, out)?;
        } else if file_type.is_file() {
            let meta = entry
                .metadata()
                .with_context(|| format!("stat: {}", path.display()))?;
            out.push(describe(path, meta.len()));
        } else if file_type.is_symlink() {
            // Follow links to files; linked directories are not descended.
            if let Ok(meta) = std::fs::metadata(&path) {
                if meta.is_file() {
                    out.push(describe(path, meta.len()));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &[u8]) {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, content).unwrap();
    }

    #[test]
    fn finds_nested_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.md", b"b");
        touch(dir.path(), "a/c.txt", b"cc");
        touch(dir.path(), "a/d/e.rs", b"eee");

        let files = discover_files(&[dir.path()], &ExcludeSet::default()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a/c.txt"),
                PathBuf::from("a/d/e.rs"),
                PathBuf::from("b.md")
            ]
        );
        assert_eq!(files[1].size, 3);
        assert_eq!(files[1].mime_type, "text/x-rust");
    }

    #[test]
    fn excluded_directory_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "project/src/main.rs", b"fn main() {}");
        touch(dir.path(), "project/.git/objects/ab/cdef", b"blob");
        touch(dir.path(), "project/.git/HEAD", b"ref");

        let excludes = ExcludeSet::new(&[r"\.git"]).unwrap();
        let files = discover_files(&[dir.path().join("project")], &excludes).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("src/main.rs"));
        assert!(files.iter().all(|f| !f.path.to_string_lossy().contains(".git")));
    }

    #[test]
    fn pattern_matches_full_path() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "drafts/x.md", b"x");
        touch(dir.path(), "final/y.md", b"y");

        let excludes = ExcludeSet::new(&["/drafts/"]).unwrap();
        let files = discover_files(&[dir.path()], &excludes).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("final/y.md"));
    }

    #[test]
    fn invalid_pattern_fails_before_walking() {
        let err = ExcludeSet::new(&["(unclosed"]).unwrap_err();
        assert!(err.to_string().contains("(unclosed"));
    }

    #[test]
    fn file_root_and_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "one.txt", b"1");
        let files = discover_files(&[dir.path().join("one.txt")], &ExcludeSet::default()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].path.is_absolute());

        assert!(discover_files(&[dir.path().join("missing")], &ExcludeSet::default()).is_err());
    }

    #[test]
    fn overlapping_roots_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a/x.txt", b"x");
        let roots = [dir.path().to_path_buf(), dir.path().join("a")];
        let files = discover_files(&roots, &ExcludeSet::default()).unwrap();
        assert_eq!(files.len(), 1);
    }
}
