use std::fs;

use assert_cmd::Command;
use predicates::{prelude::PredicateBooleanExt, str::contains};

mod support;
use support::Project;

const PASSING: &str = r#"import { test } from "cloister:test";
import { equal } from "cloister:assert";
test("adds", () => { equal(1 + 1, 2); });
"#;

const FAILING: &str = r#"import { test } from "cloister:test";
import { equal } from "cloister:assert";
test("subtracts", () => { equal(2 - 1, 3); });
"#;

fn cloister(project: &Project) -> Command {
    let mut cmd = Command::cargo_bin("cloister").unwrap();
    cmd.current_dir(project.root()).env_remove("CLOISTER_LOG");
    cmd
}

#[test]
fn transform_prints_the_full_isolation_program() {
    let project = Project::new();
    let file = project.file("a.test.mjs", PASSING);

    cloister(&project)
        .arg("transform")
        .arg(&file)
        .assert()
        .success()
        .stdout(contains("cloister:lockdown").and(contains(format!("loadCompartment(\"{}\");", file.display()))));
}

#[test]
fn transform_diff_shows_the_added_preamble() {
    let project = Project::new();
    let file = project.file("a.test.mjs", PASSING);

    cloister(&project)
        .args(["transform", "--strategy", "simple", "--diff"])
        .arg(&file)
        .assert()
        .success()
        .stdout(contains("+import { lockdown } from \"cloister:lockdown\";").and(contains("-import { test }")));
}

#[test]
fn wrap_prints_wrapper_and_source_map() {
    let project = Project::new();
    let file = project.file("a.test.mjs", PASSING);

    cloister(&project)
        .arg("wrap")
        .arg(&file)
        .assert()
        .success()
        .stdout(
            contains("cloister-wrapper-a.test.mjs")
                .and(contains("remapError(error"))
                .and(contains("\"version\":3"))
                .and(contains("//# sourceMappingURL=cloister-wrapper-a.test.mjs.map")),
        );
    assert!(!project.root().join(".cloister").exists());
}

#[test]
fn exec_writes_the_summary_file() {
    let project = Project::new();
    let pass = project.file("a.test.mjs", PASSING);
    let fail = project.file("b.test.mjs", FAILING);
    let summary = project.root().join("summary.json");

    cloister(&project)
        .args(["exec", "--reporter", "tap"])
        .arg(&pass)
        .arg(&fail)
        .env("CLOISTER_SUMMARY_FILE", &summary)
        .assert()
        .failure()
        .code(1)
        .stdout(contains("TAP version 13").and(contains("not ok")));

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&summary).unwrap()).unwrap();
    assert_eq!(json["tests"], 2);
    assert_eq!(json["passed"], 1);
    assert_eq!(json["failed"], 1);
}

#[test]
fn run_in_wrapper_mode_cleans_up_after_itself() {
    let project = Project::new();
    project.file("test/a.mjs", PASSING);
    project.file("test/b.mjs", PASSING);

    cloister(&project)
        .args(["run", "--mode", "wrapper", "--reporter", "dot", "test"])
        .assert()
        .success();

    let leftovers: Vec<_> = fs::read_dir(project.root().join(".cloister"))
        .map(|entries| entries.filter_map(Result::ok).collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn run_in_loader_mode_reports_child_failures() {
    let project = Project::new();
    project.file("a.test.mjs", PASSING);
    project.file("b.test.mjs", FAILING);

    cloister(&project)
        .args(["run", "--mode", "loader", "--reporter", "spec"])
        .assert()
        .failure()
        .stdout(contains("subtracts").and(contains("adds")));
}

#[test]
fn run_with_no_test_files_succeeds() {
    let project = Project::new();
    project.file("src/lib.mjs", "export const x = 1;");
    cloister(&project).arg("run").assert().success();
}

#[test]
fn bad_configuration_is_reported_with_its_code() {
    let project = Project::new();
    project.file("cloister.toml", "[run]\nthreads = 4\n");
    project.file("a.test.mjs", PASSING);

    cloister(&project)
        .arg("run")
        .assert()
        .failure()
        .stderr(contains("cloister::config::parse"));
}

#[test]
fn invalid_env_flag_is_rejected() {
    let project = Project::new();
    project.file("a.test.mjs", PASSING);

    cloister(&project)
        .arg("run")
        .env("CLOISTER_ISOLATION", "partial")
        .assert()
        .failure()
        .stderr(contains("CLOISTER_ISOLATION"));
}
