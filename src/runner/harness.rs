//! Test registration and execution state behind the `cloister:test` module.
//!
//! `test()` at the top level of a file only registers; the runner executes the
//! registrations after the file finishes evaluating. `test()` called while a
//! test body is running executes immediately as a subtest of it, and a failing
//! subtest fails its parent.

use std::{cell::RefCell, rc::Rc, time::Instant};

use crate::runtime::{module::make_namespace, EvalResult, Interpreter, ObjectRef, Thrown, Value};

use super::{TestOutcome, TestReport};

pub type SharedHarness = Rc<RefCell<TestHarness>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Run,
    Skip,
    Todo,
}

pub struct Registration {
    pub name: String,
    pub body: Option<Value>,
    pub mode: Mode,
}

#[derive(Default)]
pub struct TestHarness {
    file: String,
    pending: Vec<Registration>,
    /// Failed-subtest counts of the tests currently executing, innermost last.
    running: Vec<usize>,
    reports: Vec<TestReport>,
}

impl TestHarness {
    pub fn shared() -> SharedHarness {
        Rc::new(RefCell::new(Self::default()))
    }

    /// Start collecting registrations for `file`.
    pub fn begin_file(&mut self, file: impl Into<String>) {
        self.file = file.into();
        self.pending.clear();
    }

    pub fn take_pending(&mut self) -> Vec<Registration> {
        std::mem::take(&mut self.pending)
    }

    pub fn take_reports(&mut self) -> Vec<TestReport> {
        std::mem::take(&mut self.reports)
    }

    /// Record every not-yet-run registration of the current file as cancelled.
    pub fn cancel_pending(&mut self) {
        for registration in std::mem::take(&mut self.pending) {
            self.push_report(registration.name, 0, TestOutcome::Cancelled, 0);
        }
    }

    /// Record a failure that no registered test owns, e.g. a file that threw
    /// while loading.
    pub fn record_failure(&mut self, name: impl Into<String>, message: impl Into<String>) {
        let outcome = TestOutcome::Failed {
            message: message.into(),
        };
        self.push_report(name.into(), 0, outcome, 0);
    }

    fn push_report(&mut self, name: String, depth: usize, outcome: TestOutcome, duration_ms: u64) {
        self.reports.push(TestReport {
            file: self.file.clone(),
            name,
            depth,
            outcome,
            duration_ms,
        });
    }
}

/// Execute one registration, recording its report after those of its subtests.
pub fn run_registration(harness: &SharedHarness, interp: &mut Interpreter, registration: Registration) {
    let depth = harness.borrow().running.len();
    let started = Instant::now();

    let outcome = match registration.mode {
        Mode::Skip => TestOutcome::Skipped,
        Mode::Todo => TestOutcome::Todo,
        Mode::Run => {
            harness.borrow_mut().running.push(0);
            // No harness borrow may be held here: the body can call test() again.
            let result = match &registration.body {
                Some(body) => interp.call(body, &[]).map(|_| ()),
                None => Ok(()),
            };
            let failed_subtests = harness.borrow_mut().running.pop().unwrap_or_default();
            match result {
                Err(thrown) => TestOutcome::Failed {
                    message: describe(&thrown),
                },
                Ok(()) if failed_subtests > 0 => TestOutcome::Failed {
                    message: format!("{failed_subtests} subtest(s) failed"),
                },
                Ok(()) => TestOutcome::Passed,
            }
        }
    };

    let mut state = harness.borrow_mut();
    if outcome.is_failure() {
        if let Some(parent) = state.running.last_mut() {
            *parent += 1;
        }
    }
    let duration_ms = started.elapsed().as_millis() as u64;
    state.push_report(registration.name, depth, outcome, duration_ms);
}

/// Stack text when the thrown value carries one, otherwise its summary.
pub fn describe(thrown: &Thrown) -> String {
    thrown.stack().unwrap_or_else(|| thrown.summary())
}

// ============================================================================
// cloister:test
// ============================================================================

/// The `cloister:test` namespace: `test`, with `test.skip` and `test.todo`.
pub fn test_module(harness: &SharedHarness) -> ObjectRef {
    let test = registrar(harness, Mode::Run);
    let _ = test.set("skip", Value::Object(registrar(harness, Mode::Skip)));
    let _ = test.set("todo", Value::Object(registrar(harness, Mode::Todo)));
    make_namespace([("test".to_string(), Value::Object(test))])
}

fn registrar(harness: &SharedHarness, mode: Mode) -> ObjectRef {
    let harness = harness.clone();
    let name = match mode {
        Mode::Run => "test",
        Mode::Skip => "skip",
        Mode::Todo => "todo",
    };
    ObjectRef::native(name, move |interp, args| register(&harness, interp, args, mode))
}

fn register(harness: &SharedHarness, interp: &mut Interpreter, args: &[Value], mode: Mode) -> EvalResult<Value> {
    let name = match args.first() {
        Some(Value::String(name)) => name.to_string(),
        Some(Value::Object(f)) if f.is_callable() => f.callable().map(|c| c.name().to_string()).unwrap_or_default(),
        _ => "<anonymous>".to_string(),
    };
    let body = args
        .iter()
        .find(|arg| arg.as_object().is_some_and(ObjectRef::is_callable))
        .cloned();
    let registration = Registration { name, body, mode };

    let nested = !harness.borrow().running.is_empty();
    if nested {
        run_registration(harness, interp, registration);
    } else {
        harness.borrow_mut().pending.push(registration);
    }
    Ok(Value::Undefined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{ModuleSource, Realm};
    use crate::syntax::parse_module;
    use std::collections::HashMap;

    fn run(source: &str) -> Vec<TestReport> {
        let harness = TestHarness::shared();
        let mut interp = Interpreter::new();
        let mut namespaces = HashMap::new();
        namespaces.insert("cloister:test".to_string(), test_module(&harness));

        let module = parse_module(source, "/t/a.test.mjs").unwrap();
        let bindings = crate::runtime::link_imports(&module, &namespaces).unwrap();
        let global = interp.host_global().clone();
        harness.borrow_mut().begin_file("/t/a.test.mjs");
        interp
            .evaluate_module(&module, Rc::new(ModuleSource::new("/t/a.test.mjs", source)), bindings, global, Realm::Host)
            .unwrap();

        let pending = harness.borrow_mut().take_pending();
        for registration in pending {
            run_registration(&harness, &mut interp, registration);
        }
        let reports = harness.borrow_mut().take_reports();
        reports
    }

    #[test]
    fn top_level_tests_run_after_registration() {
        let reports = run(r#"
            import { test } from "cloister:test";
            let order = [];
            test("first", () => { order.push("first"); });
            order.push("registered");
            test("second", () => { if (order.join(",") !== "registered,first") { throw new Error("order"); } });
        "#);
        let names: Vec<_> = reports.iter().map(|r| (r.name.as_str(), r.outcome.is_failure())).collect();
        assert_eq!(names, vec![("first", false), ("second", false)]);
    }

    #[test]
    fn failing_subtest_fails_parent() {
        let reports = run(r#"
            import { test } from "cloister:test";
            test("parent", () => {
                test("child ok", () => {});
                test("child bad", () => { throw new Error("nope"); });
            });
        "#);
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].depth, 1);
        assert!(reports[1].outcome.is_failure());
        assert_eq!(reports[2].name, "parent");
        assert!(matches!(&reports[2].outcome, TestOutcome::Failed { message } if message.contains("1 subtest")));
    }

    #[test]
    fn skip_and_todo_do_not_run() {
        let reports = run(r#"
            import { test } from "cloister:test";
            test.skip("skipped", () => { throw new Error("ran"); });
            test.todo("later");
        "#);
        assert_eq!(reports[0].outcome, TestOutcome::Skipped);
        assert_eq!(reports[1].outcome, TestOutcome::Todo);
    }
}
