use cloister::{
    host::{Host, LoaderChain},
    interceptor::TestPattern,
    runner::{self, Runner, Summary, TestOutcome},
    runtime::Interpreter,
};

mod support;
use support::{Collector, Project};

fn run(files: &[std::path::PathBuf]) -> (Summary, Collector) {
    let collector = Collector::default();
    let mut runner = Runner::with_parts(
        Interpreter::new(),
        Host::with_chain(LoaderChain::default()),
        Box::new(collector.clone()),
        Box::new(termcolor::Buffer::no_color()),
    );
    (runner.run(files), collector)
}

#[test]
fn outcomes_are_counted_by_kind() {
    let project = Project::new();
    let file = project.file(
        "math.test.mjs",
        r#"
        import { test } from "cloister:test";
        import { equal, deepEqual } from "cloister:assert";

        test("adds", () => { equal(1 + 1, 2); });
        test("compares shapes", () => { deepEqual({ a: [1, 2] }, { a: [1, 2] }); });
        test("is wrong", () => { equal(1 + 1, 3); });
        test.skip("later", () => { throw new Error("must not run"); });
        test.todo("someday");
        "#,
    );

    let (summary, collector) = run(&[file]);
    assert_eq!(summary.tests, 5);
    assert_eq!(summary.passed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.todo, 1);
    assert_eq!(summary.failed, summary.derived_failures());
    assert!(!summary.success());

    let failure = collector.find("is wrong").unwrap();
    let TestOutcome::Failed { message } = failure.outcome else {
        panic!("expected a failure");
    };
    assert!(message.starts_with("AssertionError: Expected values to be strictly equal"), "{message}");
}

#[test]
fn tests_run_after_the_file_evaluates() {
    let project = Project::new();
    let file = project.file(
        "order.test.mjs",
        r#"
        import { test } from "cloister:test";
        import { equal } from "cloister:assert";

        const log = [];
        test("sees the whole file", () => { equal(log.length, 1); });
        log.push("evaluated");
        "#,
    );
    let (summary, _) = run(&[file]);
    assert_eq!((summary.tests, summary.passed), (1, 1));
}

#[test]
fn failing_subtest_fails_its_parent() {
    let project = Project::new();
    let file = project.file(
        "nested.test.mjs",
        r#"
        import { test } from "cloister:test";
        import { ok } from "cloister:assert";

        test("parent", () => {
            test("good child", () => { ok(true); });
            test("bad child", () => { ok(false, "nope"); });
        });
        "#,
    );

    let (summary, collector) = run(&[file]);
    let reports = collector.reports();
    let names: Vec<_> = reports.iter().map(|r| (r.name.as_str(), r.depth)).collect();
    assert_eq!(names, vec![("good child", 1), ("bad child", 1), ("parent", 0)]);
    assert_eq!(
        reports[2].outcome,
        TestOutcome::Failed {
            message: "1 subtest(s) failed".into()
        }
    );
    assert_eq!((summary.tests, summary.passed, summary.failed), (3, 1, 2));
}

#[test]
fn file_that_throws_while_loading_cancels_its_tests() {
    let project = Project::new();
    let broken = project.file(
        "broken.test.mjs",
        r#"
        import { test } from "cloister:test";
        test("never runs", () => {});
        throw new Error("broken at load");
        "#,
    );
    let fine = project.file(
        "fine.test.mjs",
        "import { test } from \"cloister:test\";\ntest(\"fine\", () => {});\n",
    );

    let (summary, collector) = run(&[broken.clone(), fine]);
    let broken_name = broken.to_string_lossy().to_string();
    let synthetic = collector.find(&broken_name).expect("synthetic failure named after the file");
    assert!(matches!(synthetic.outcome, TestOutcome::Failed { ref message } if message.contains("broken at load")));
    assert_eq!(collector.find("never runs").unwrap().outcome, TestOutcome::Cancelled);
    assert_eq!(collector.find("fine").unwrap().outcome, TestOutcome::Passed);

    assert_eq!(summary.tests, 3);
    assert_eq!((summary.passed, summary.failed, summary.cancelled), (1, 1, 1));
}

#[test]
fn unreadable_file_is_a_synthetic_failure() {
    let project = Project::new();
    let missing = project.root().join("missing.test.mjs");
    let (summary, collector) = run(&[missing.clone()]);
    assert_eq!(summary.failed, 1);
    assert!(collector.find(&missing.to_string_lossy()).unwrap().outcome.is_failure());
}

#[test]
fn files_can_load_their_subjects_into_compartments() {
    let project = Project::new();
    project.file("src/counter.mjs", "let n = 0;\nexport function next() { n += 1; return n; }\n");
    let file = project.file(
        "test/counter.test.mjs",
        r#"
        import { test } from "cloister:test";
        import { equal, throws } from "cloister:assert";
        import { loadCompartment } from "cloister:compartment";

        test("fresh state per compartment", () => {
            const first = loadCompartment("../src/counter.mjs");
            first.next();
            const second = loadCompartment("../src/counter.mjs");
            equal(second.next(), 1);
        });

        test("missing modules report a code", () => {
            throws(() => loadCompartment("../src/absent.mjs"), { code: "cloister::compartment::read" });
        });
        "#,
    );

    let (summary, collector) = run(&[file]);
    assert!(summary.success(), "{:?}", collector.reports());
}

#[test]
fn discovery_keeps_matching_files_sorted() {
    let project = Project::new();
    project.file("test/b.mjs", "");
    project.file("a.test.mjs", "");
    project.file("src/lib.mjs", "");
    project.file("node_modules/dep/x.test.mjs", "");
    project.file(".cloister/cloister-wrapper-a.test.mjs", "");

    let work_dir = project.root().join(".cloister");
    let found = runner::discover(&[project.root().to_path_buf()], &TestPattern::default(), Some(&work_dir));
    let names: Vec<_> = found
        .iter()
        .map(|p| p.strip_prefix(project.root()).unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["a.test.mjs", "test/b.mjs"]);
}

#[test]
fn runaway_recursion_fails_with_a_range_error() {
    let project = Project::new();
    let file = project.file(
        "recursion.test.mjs",
        r#"
        import { test } from "cloister:test";

        function down(n) { return down(n + 1) + 1; }
        test("never returns", () => { down(0); });
        test("still runs", () => {});
        "#,
    );

    let (summary, reports) = runner::on_interpreter_thread(move || {
        let (summary, collector) = run(&[file]);
        (summary, collector.reports())
    })
    .unwrap();

    assert_eq!((summary.tests, summary.passed, summary.failed), (2, 1, 1));
    let failure = reports.iter().find(|r| r.name == "never returns").unwrap();
    let TestOutcome::Failed { message } = &failure.outcome else {
        panic!("expected a failure");
    };
    assert!(message.starts_with("RangeError: Maximum call stack size exceeded"), "{message}");
}
