//! Wrapper Generator
//!
//! The fallback used when the host cannot run loader hooks. Each original
//! test file gets a generated wrapper module plus a v3 source map in the
//! working directory:
//!
//! ```text
//! <work_dir>/<prefix>-wrapper-<basename>        wrapper module
//! <work_dir>/<prefix>-wrapper-<basename>.map    its source map
//! ```
//!
//! A wrapper applies lockdown and registers exactly one test, whose body
//! loads the original in a fresh compartment and rewrites any escaping
//! error so its stack names the original instead of the wrapper.
//!
//! Names are not salted: one run per working directory at a time.

pub mod fs;
pub mod sourcemap;
pub mod stack;

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use futures::future::join_all;
use tracing::{debug, warn};

use crate::{
    errors::WrapperError,
    interceptor::templates::{lockdown_preamble, string_literal},
    lockdown::LockdownConfiguration,
};

pub use fs::{TokioFs, WrapperFs};
pub use sourcemap::SourceMap;

pub const DEFAULT_PREFIX: &str = "cloister";
pub const DEFAULT_WORK_DIR: &str = ".cloister";

#[derive(Debug, Clone)]
pub struct WrapperOptions {
    pub work_dir: PathBuf,
    pub prefix: String,
    pub lockdown: LockdownConfiguration,
}

impl Default for WrapperOptions {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            prefix: DEFAULT_PREFIX.to_string(),
            lockdown: LockdownConfiguration::default(),
        }
    }
}

/// One generated wrapper and its map, for one original test file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperFile {
    pub original: PathBuf,
    pub wrapper: PathBuf,
    pub map: PathBuf,
}

/// The rendered artifacts of one wrapper.
#[derive(Debug, Clone)]
pub struct WrapperSource {
    pub source: String,
    pub map: SourceMap,
}

// ============================================================================
// GENERATION
// ============================================================================

pub struct WrapperGenerator {
    options: WrapperOptions,
    fs: Arc<dyn WrapperFs>,
}

impl WrapperGenerator {
    pub fn new(options: WrapperOptions) -> Self {
        Self::with_fs(options, Arc::new(TokioFs))
    }

    pub fn with_fs(options: WrapperOptions, fs: Arc<dyn WrapperFs>) -> Self {
        Self { options, fs }
    }

    /// Generate wrappers for every original concurrently. If any artifact
    /// fails, the ones already written are removed before the error returns.
    pub async fn generate_batch(&self, originals: &[PathBuf]) -> Result<WrapperBatch, WrapperError> {
        let work_dir = absolute(&self.options.work_dir);
        self.fs
            .create_dir_all(&work_dir)
            .await
            .map_err(|source| WrapperError::WorkDir {
                path: work_dir.clone(),
                source,
            })?;

        let planned = plan(&work_dir, &self.options.prefix, originals)?;
        let writes = planned.iter().map(|file| self.write_one(file));
        let results = join_all(writes).await;

        let mut written = Vec::new();
        let mut first_error = None;
        for (file, result) in planned.iter().zip(results) {
            let (wrapper, map) = result;
            if wrapper.is_ok() {
                written.push(file.wrapper.clone());
            }
            if map.is_ok() {
                written.push(file.map.clone());
            }
            if first_error.is_none() {
                first_error = [(wrapper, &file.wrapper), (map, &file.map)]
                    .into_iter()
                    .find_map(|(result, path)| {
                        result.err().map(|source| WrapperError::Write {
                            path: path.clone(),
                            source,
                        })
                    });
            }
        }

        if let Some(err) = first_error {
            warn!(%err, removing = written.len(), "wrapper batch failed");
            remove_all(self.fs.as_ref(), &written).await;
            return Err(err);
        }

        debug!(count = planned.len(), dir = %work_dir.display(), "wrapper batch generated");
        Ok(WrapperBatch {
            files: planned,
            fs: self.fs.clone(),
            cleaned: false,
        })
    }

    /// Write one wrapper and its map concurrently.
    async fn write_one(&self, file: &WrapperFile) -> (io::Result<()>, io::Result<()>) {
        let rendered = render(file, &self.options.lockdown);
        let map_json = rendered.map.to_json();
        futures::join!(
            self.fs.write(&file.wrapper, &rendered.source),
            self.fs.write(&file.map, &map_json)
        )
    }
}

/// Assign deterministic artifact paths. Base-name collisions within the batch
/// get `-2`, `-3`… before the extension.
pub fn plan(work_dir: &Path, prefix: &str, originals: &[PathBuf]) -> Result<Vec<WrapperFile>, WrapperError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut planned = Vec::with_capacity(originals.len());
    for original in originals {
        let original = absolute(original);
        let basename = original
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| WrapperError::InvalidOriginal {
                path: original.clone(),
                reason: "no UTF-8 file name".into(),
            })?;
        if original.to_str().is_none() {
            return Err(WrapperError::InvalidOriginal {
                path: original.clone(),
                reason: "path is not valid UTF-8".into(),
            });
        }

        let count = seen.entry(basename.to_string()).or_insert(0);
        *count += 1;
        let basename = if *count == 1 {
            basename.to_string()
        } else {
            with_suffix(basename, *count)
        };

        let wrapper_name = format!("{prefix}-wrapper-{basename}");
        let wrapper = work_dir.join(&wrapper_name);
        let map = work_dir.join(format!("{wrapper_name}.map"));
        planned.push(WrapperFile { original, wrapper, map });
    }
    Ok(planned)
}

fn with_suffix(basename: &str, n: usize) -> String {
    match basename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}-{n}.{ext}"),
        _ => format!("{basename}-{n}"),
    }
}

/// Render the wrapper module for `file` and its source map.
pub fn render(file: &WrapperFile, lockdown: &LockdownConfiguration) -> WrapperSource {
    let wrapper = file.wrapper.to_string_lossy();
    let original = file.original.to_string_lossy();
    let wrapper_name = file
        .wrapper
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let (wrapper_lit, original_lit) = (string_literal(&wrapper), string_literal(&original));

    let load_call = format!("loadCompartment({original_lit});");
    let mut lines = vec![
        lockdown_preamble(lockdown),
        "import { test } from \"cloister:test\";".to_string(),
        "import { loadCompartment } from \"cloister:compartment\";".to_string(),
        "import { remapError } from \"cloister:wrapper\";".to_string(),
        String::new(),
        format!("test({original_lit}, () => {{"),
        "  try {".to_string(),
    ];
    let entry_line = lines.len();
    let entry_column = 4;
    lines.push(format!("{}{load_call}", " ".repeat(entry_column)));
    lines.extend([
        "  } catch (error) {".to_string(),
        format!("    throw remapError(error, {wrapper_lit}, {original_lit});"),
        "  }".to_string(),
        "});".to_string(),
        sourcemap::trailer(&format!("{wrapper_name}.map")),
        String::new(),
    ]);

    let map = SourceMap::single_mapping(&wrapper_name, &original, entry_line as u32, entry_column as u32);
    WrapperSource {
        source: lines.join("\n"),
        map,
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

// ============================================================================
// CLEANUP
// ============================================================================

/// Owns the artifacts of one generated batch.
pub struct WrapperBatch {
    files: Vec<WrapperFile>,
    fs: Arc<dyn WrapperFs>,
    cleaned: bool,
}

impl WrapperBatch {
    pub fn files(&self) -> &[WrapperFile] {
        &self.files
    }

    pub fn wrappers(&self) -> Vec<PathBuf> {
        self.files.iter().map(|f| f.wrapper.clone()).collect()
    }

    /// Delete every wrapper and map. Failures are logged and ignored.
    pub async fn cleanup(mut self) {
        let paths: Vec<PathBuf> = self
            .files
            .iter()
            .flat_map(|f| [f.wrapper.clone(), f.map.clone()])
            .collect();
        remove_all(self.fs.as_ref(), &paths).await;
        self.cleaned = true;
        debug!(count = self.files.len(), "wrapper batch cleaned up");
    }
}

impl Drop for WrapperBatch {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        // Last resort when `cleanup` was never awaited.
        for file in &self.files {
            for path in [&file.wrapper, &file.map] {
                if let Err(err) = std::fs::remove_file(path) {
                    debug!(path = %path.display(), %err, "wrapper artifact not removed on drop");
                }
            }
        }
    }
}

async fn remove_all(fs: &dyn WrapperFs, paths: &[PathBuf]) {
    let removals = paths.iter().map(|path| async move {
        if let Err(err) = fs.remove_file(path).await {
            warn!(path = %path.display(), %err, "failed to remove wrapper artifact");
        }
    });
    join_all(removals).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_module;

    #[test]
    fn colliding_basenames_get_numbered() {
        let originals = [
            PathBuf::from("/p/a/x.test.mjs"),
            PathBuf::from("/p/b/x.test.mjs"),
            PathBuf::from("/p/c/x.test.mjs"),
            PathBuf::from("/p/y.test.mjs"),
        ];
        let planned = plan(Path::new("/w"), "cloister", &originals).unwrap();
        let names: Vec<_> = planned
            .iter()
            .map(|f| f.wrapper.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "cloister-wrapper-x.test.mjs",
                "cloister-wrapper-x.test-2.mjs",
                "cloister-wrapper-x.test-3.mjs",
                "cloister-wrapper-y.test.mjs",
            ]
        );
        assert_eq!(planned[1].map, PathBuf::from("/w/cloister-wrapper-x.test-2.mjs.map"));
    }

    #[test]
    fn wrapper_source_parses_and_maps_the_entry_call() {
        let file = WrapperFile {
            original: PathBuf::from("/p/test/a.test.mjs"),
            wrapper: PathBuf::from("/w/cloister-wrapper-a.test.mjs"),
            map: PathBuf::from("/w/cloister-wrapper-a.test.mjs.map"),
        };
        let rendered = render(&file, &LockdownConfiguration::default());

        let module = parse_module(&rendered.source, "/w/cloister-wrapper-a.test.mjs").unwrap();
        assert_eq!(
            module.specifiers(),
            vec!["cloister:lockdown", "cloister:test", "cloister:compartment", "cloister:wrapper"]
        );
        assert_eq!(rendered.source.matches("test(").count(), 1);
        assert_eq!(
            sourcemap::trailer_url(&rendered.source),
            Some("cloister-wrapper-a.test.mjs.map")
        );

        let entry = rendered
            .source
            .lines()
            .position(|line| line.contains("loadCompartment(\""))
            .unwrap();
        let mapped = rendered.map.lookup(entry as u32, 4).unwrap();
        assert_eq!(mapped.source, "/p/test/a.test.mjs");
        assert_eq!((mapped.line, mapped.column), (0, 0));
    }
}
