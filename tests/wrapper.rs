use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use cloister::{
    errors::WrapperError,
    runner::{Runner, TestOutcome},
    wrapper::{TokioFs, WrapperFs, WrapperGenerator, WrapperOptions},
};

mod support;
use support::{Collector, Project};

/// Fails every write whose file name contains `poison`.
struct FailingFs {
    poison: &'static str,
}

#[async_trait::async_trait]
impl WrapperFs for FailingFs {
    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        TokioFs.create_dir_all(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        if path.to_string_lossy().contains(self.poison) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "disk says no"));
        }
        TokioFs.write(path, contents).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        TokioFs.remove_file(path).await
    }
}

fn options(project: &Project) -> WrapperOptions {
    WrapperOptions {
        work_dir: project.root().join(".cloister"),
        ..Default::default()
    }
}

fn originals(project: &Project) -> Vec<PathBuf> {
    ["a", "b", "c"]
        .iter()
        .map(|name| project.file(&format!("{name}.test.mjs"), "export const ok = 1;"))
        .collect()
}

#[tokio::test]
async fn failed_batch_leaves_no_artifacts_behind() {
    let project = Project::new();
    let originals = originals(&project);
    let options = options(&project);
    let work_dir = options.work_dir.clone();

    let generator = WrapperGenerator::with_fs(options, Arc::new(FailingFs { poison: "wrapper-b" }));
    let err = generator.generate_batch(&originals).await.err().expect("batch must fail");

    match err {
        WrapperError::Write { path, .. } => assert!(path.to_string_lossy().contains("wrapper-b.test.mjs")),
        other => panic!("unexpected {other:?}"),
    }
    for name in ["a", "b", "c"] {
        let wrapper = work_dir.join(format!("cloister-wrapper-{name}.test.mjs"));
        assert!(!wrapper.exists(), "{} left behind", wrapper.display());
        assert!(!wrapper.with_extension("mjs.map").exists());
    }
}

#[tokio::test]
async fn cleanup_removes_every_artifact() {
    let project = Project::new();
    let generator = WrapperGenerator::new(options(&project));
    let batch = generator.generate_batch(&originals(&project)).await.unwrap();

    let paths: Vec<PathBuf> = batch
        .files()
        .iter()
        .flat_map(|f| [f.wrapper.clone(), f.map.clone()])
        .collect();
    assert_eq!(paths.len(), 6);
    for path in &paths {
        assert!(path.exists());
    }

    batch.cleanup().await;
    for path in &paths {
        assert!(!path.exists(), "{} left behind", path.display());
    }
}

#[tokio::test]
async fn dropped_batch_is_cleaned_up() {
    let project = Project::new();
    let generator = WrapperGenerator::new(options(&project));
    let batch = generator.generate_batch(&originals(&project)).await.unwrap();
    let wrappers = batch.wrappers();
    drop(batch);
    for wrapper in wrappers {
        assert!(!wrapper.exists());
    }
}

#[tokio::test]
async fn wrapped_failures_name_the_original_file() {
    let project = Project::new();
    let original = project.file(
        "explode.test.mjs",
        "function explode() {\n  throw new Error('kaboom');\n}\nexplode();\n",
    );
    let passing = project.file("calm.test.mjs", "export const ok = 1;\n");

    let generator = WrapperGenerator::new(options(&project));
    let batch = generator.generate_batch(&[original.clone(), passing.clone()]).await.unwrap();
    let wrapper = batch.files()[0].wrapper.to_string_lossy().to_string();

    let collector = Collector::default();
    let mut runner = Runner::new(Box::new(collector.clone()), Box::new(termcolor::Buffer::no_color()));
    let summary = runner.run(&batch.wrappers());
    batch.cleanup().await;

    assert_eq!((summary.tests, summary.passed, summary.failed), (2, 1, 1));
    assert!(!summary.success());

    let original = original.to_string_lossy().to_string();
    let report = collector.find(&original).expect("one test per original");
    let TestOutcome::Failed { message } = &report.outcome else {
        panic!("expected a failure, got {:?}", report.outcome);
    };
    assert!(message.starts_with("Error: kaboom"), "{message}");
    assert!(message.contains(&format!("{original}:2:")), "{message}");
    assert_eq!(message.matches(&wrapper).count(), 0, "{message}");
    assert!(collector.find(&passing.to_string_lossy()).is_some());
}
