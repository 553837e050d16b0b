//! Test-file discovery.

use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::interceptor::TestPattern;

/// Directories never descended into.
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "target"];

/// Expand `paths` into the sorted, de-duplicated list of test files. Explicit
/// file arguments are kept even when they do not match `pattern`; directories
/// are walked and filtered through it.
pub fn discover(paths: &[PathBuf], pattern: &TestPattern, work_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            files.push(absolute(root));
            continue;
        }
        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            let ignored = entry.file_type().is_dir()
                && entry.depth() > 0
                && (entry.file_name().to_str().is_some_and(|name| IGNORED_DIRS.contains(&name))
                    || work_dir.is_some_and(|dir| absolute(entry.path()) == absolute(dir)));
            !ignored
        });
        files.extend(
            walker
                .filter_map(Result::ok)
                .filter(|entry| entry.file_type().is_file() && pattern.matches_path(entry.path()))
                .map(|entry| absolute(entry.path())),
        );
    }
    files.sort();
    files.dedup();
    debug!(count = files.len(), "discovered test files");
    files
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn walks_directories_and_filters_by_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("test")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg/test")).unwrap();
        fs::create_dir_all(root.join(".cloister")).unwrap();
        fs::write(root.join("test/b.mjs"), "").unwrap();
        fs::write(root.join("a.test.mjs"), "").unwrap();
        fs::write(root.join("helper.mjs"), "").unwrap();
        fs::write(root.join("node_modules/pkg/test/x.mjs"), "").unwrap();
        fs::write(root.join(".cloister/cloister-wrapper-a.test.mjs"), "").unwrap();

        let found = discover(&[root.to_path_buf()], &TestPattern::default(), Some(&root.join(".cloister")));
        assert_eq!(found, vec![root.join("a.test.mjs"), root.join("test/b.mjs")]);
    }

    #[test]
    fn explicit_files_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain.mjs");
        fs::write(&file, "").unwrap();
        let found = discover(&[file.clone(), file.clone()], &TestPattern::default(), None);
        assert_eq!(found, vec![file]);
    }
}
