//! Reporters stream test reports and the final summary to a terminal.

use std::{
    fmt,
    io::{self, Write},
};

use serde::{Deserialize, Serialize};
use termcolor::{Color, ColorSpec, WriteColor};

use super::{Summary, TestOutcome, TestReport};

/// The closed set of reporters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReporterKind {
    #[default]
    Spec,
    Tap,
    Dot,
    Junit,
}

impl ReporterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReporterKind::Spec => "spec",
            ReporterKind::Tap => "tap",
            ReporterKind::Dot => "dot",
            ReporterKind::Junit => "junit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "spec" => Some(ReporterKind::Spec),
            "tap" => Some(ReporterKind::Tap),
            "dot" => Some(ReporterKind::Dot),
            "junit" => Some(ReporterKind::Junit),
            _ => None,
        }
    }

    pub fn build(self) -> Box<dyn Reporter> {
        match self {
            ReporterKind::Spec => Box::new(SpecReporter::default()),
            ReporterKind::Tap => Box::new(TapReporter::default()),
            ReporterKind::Dot => Box::new(DotReporter::default()),
            ReporterKind::Junit => Box::new(JunitReporter::default()),
        }
    }
}

impl fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Reporter {
    fn start(&mut self, _out: &mut dyn WriteColor, _files: usize) -> io::Result<()> {
        Ok(())
    }

    /// Called once per finished test; subtests arrive before their parent.
    fn report(&mut self, out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()>;

    fn finish(&mut self, out: &mut dyn WriteColor, summary: &Summary) -> io::Result<()>;
}

fn write_colored(out: &mut dyn WriteColor, color: Color, text: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)))?;
    write!(out, "{text}")?;
    out.reset()
}

fn counts(summary: &Summary) -> [(&'static str, String); 7] {
    [
        ("tests", summary.tests.to_string()),
        ("pass", summary.passed.to_string()),
        ("fail", summary.failed.to_string()),
        ("cancelled", summary.cancelled.to_string()),
        ("skipped", summary.skipped.to_string()),
        ("todo", summary.todo.to_string()),
        ("duration_ms", summary.duration_ms.to_string()),
    ]
}

// ============================================================================
// SPEC
// ============================================================================

#[derive(Default)]
pub struct SpecReporter {
    failures: Vec<TestReport>,
}

impl Reporter for SpecReporter {
    fn report(&mut self, out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
        let indent = "  ".repeat(report.depth);
        let (mark, color, suffix) = match &report.outcome {
            TestOutcome::Passed => ("✔", Color::Green, String::new()),
            TestOutcome::Failed { .. } => ("✖", Color::Red, String::new()),
            TestOutcome::Skipped => ("﹣", Color::Yellow, " # SKIP".to_string()),
            TestOutcome::Todo => ("﹣", Color::Cyan, " # TODO".to_string()),
            TestOutcome::Cancelled => ("✖", Color::Yellow, " # CANCELLED".to_string()),
        };
        write!(out, "{indent}")?;
        write_colored(out, color, &format!("{mark} {}{suffix}", report.name))?;
        writeln!(out, " ({}ms)", report.duration_ms)?;
        if report.outcome.is_failure() {
            self.failures.push(report.clone());
        }
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn WriteColor, summary: &Summary) -> io::Result<()> {
        for (label, value) in counts(summary) {
            writeln!(out, "ℹ {label} {value}")?;
        }
        if self.failures.is_empty() {
            return Ok(());
        }
        writeln!(out)?;
        write_colored(out, Color::Red, "✖ failing tests:")?;
        writeln!(out)?;
        for failure in &self.failures {
            writeln!(out)?;
            writeln!(out, "test at {}", failure.file)?;
            write_colored(out, Color::Red, &format!("✖ {}", failure.name))?;
            writeln!(out)?;
            if let TestOutcome::Failed { message } = &failure.outcome {
                for line in message.lines() {
                    writeln!(out, "  {line}")?;
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// TAP
// ============================================================================

#[derive(Default)]
pub struct TapReporter {
    /// Next test number per nesting level.
    counters: Vec<usize>,
}

impl Reporter for TapReporter {
    fn start(&mut self, out: &mut dyn WriteColor, _files: usize) -> io::Result<()> {
        writeln!(out, "TAP version 13")
    }

    fn report(&mut self, out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
        let depth = report.depth;
        if self.counters.len() <= depth {
            self.counters.resize(depth + 1, 0);
        }
        self.counters[depth] += 1;
        let number = self.counters[depth];
        // A reported parent closes its subtests' numbering.
        self.counters.truncate(depth + 1);

        let indent = "    ".repeat(depth);
        let status = if report.outcome.is_failure() { "not ok" } else { "ok" };
        let directive = match report.outcome {
            TestOutcome::Skipped => " # SKIP",
            TestOutcome::Todo => " # TODO",
            _ => "",
        };
        writeln!(out, "{indent}{status} {number} - {}{directive}", report.name)?;
        writeln!(out, "{indent}  ---")?;
        writeln!(out, "{indent}  duration_ms: {}", report.duration_ms)?;
        match &report.outcome {
            TestOutcome::Failed { message } => {
                writeln!(out, "{indent}  location: {:?}", report.file)?;
                writeln!(out, "{indent}  failureType: 'testCodeFailure'")?;
                writeln!(out, "{indent}  error: |-")?;
                for line in message.lines() {
                    writeln!(out, "{indent}    {line}")?;
                }
            }
            TestOutcome::Cancelled => writeln!(out, "{indent}  failureType: 'cancelledByParent'")?,
            _ => {}
        }
        writeln!(out, "{indent}  ...")
    }

    fn finish(&mut self, out: &mut dyn WriteColor, summary: &Summary) -> io::Result<()> {
        writeln!(out, "1..{}", self.counters.first().copied().unwrap_or(0))?;
        for (label, value) in counts(summary) {
            writeln!(out, "# {label} {value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// DOT
// ============================================================================

#[derive(Default)]
pub struct DotReporter {
    column: usize,
    failures: Vec<TestReport>,
}

impl Reporter for DotReporter {
    fn report(&mut self, out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
        match &report.outcome {
            TestOutcome::Passed => write_colored(out, Color::Green, ".")?,
            TestOutcome::Failed { .. } => {
                write_colored(out, Color::Red, "X")?;
                self.failures.push(report.clone());
            }
            _ => write_colored(out, Color::Yellow, "-")?,
        }
        self.column += 1;
        if self.column == 20 {
            writeln!(out)?;
            self.column = 0;
        }
        out.flush()
    }

    fn finish(&mut self, out: &mut dyn WriteColor, summary: &Summary) -> io::Result<()> {
        writeln!(out)?;
        for failure in &self.failures {
            write_colored(out, Color::Red, &format!("✖ {} ({})", failure.name, failure.file))?;
            writeln!(out)?;
            if let TestOutcome::Failed { message } = &failure.outcome {
                for line in message.lines() {
                    writeln!(out, "  {line}")?;
                }
            }
        }
        writeln!(
            out,
            "{} passing, {} failing, {} skipped, {} todo, {} cancelled",
            summary.passed, summary.failed, summary.skipped, summary.todo, summary.cancelled
        )
    }
}

// ============================================================================
// JUNIT
// ============================================================================

/// Buffers reports and writes one XML document at the end.
#[derive(Default)]
pub struct JunitReporter {
    reports: Vec<TestReport>,
}

impl Reporter for JunitReporter {
    fn report(&mut self, _out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }

    fn finish(&mut self, out: &mut dyn WriteColor, summary: &Summary) -> io::Result<()> {
        writeln!(out, r#"<?xml version="1.0" encoding="utf-8"?>"#)?;
        writeln!(
            out,
            r#"<testsuites tests="{}" failures="{}" skipped="{}" time="{}">"#,
            summary.tests,
            summary.failed,
            summary.skipped + summary.todo + summary.cancelled,
            seconds(summary.duration_ms)
        )?;

        let mut files: Vec<&str> = Vec::new();
        for report in &self.reports {
            if !files.contains(&report.file.as_str()) {
                files.push(&report.file);
            }
        }
        for file in files {
            let suite: Vec<&TestReport> = self.reports.iter().filter(|r| r.file == file).collect();
            let failures = suite.iter().filter(|r| r.outcome.is_failure()).count();
            writeln!(
                out,
                r#"  <testsuite name="{}" tests="{}" failures="{failures}">"#,
                escape_xml(file),
                suite.len()
            )?;
            for report in suite {
                write_testcase(out, report)?;
            }
            writeln!(out, "  </testsuite>")?;
        }
        writeln!(out, "</testsuites>")
    }
}

fn write_testcase(out: &mut dyn WriteColor, report: &TestReport) -> io::Result<()> {
    write!(
        out,
        r#"    <testcase name="{}" classname="{}" time="{}""#,
        escape_xml(&report.name),
        escape_xml(&report.file),
        seconds(report.duration_ms)
    )?;
    match &report.outcome {
        TestOutcome::Passed => writeln!(out, "/>"),
        TestOutcome::Failed { message } => {
            let first = message.lines().next().unwrap_or_default();
            writeln!(out, ">")?;
            writeln!(
                out,
                r#"      <failure message="{}" type="testCodeFailure">{}</failure>"#,
                escape_xml(first),
                escape_xml(message)
            )?;
            writeln!(out, "    </testcase>")
        }
        TestOutcome::Skipped | TestOutcome::Todo | TestOutcome::Cancelled => {
            writeln!(out, ">")?;
            writeln!(out, r#"      <skipped message="{}"/>"#, report.outcome.label())?;
            writeln!(out, "    </testcase>")
        }
    }
}

fn seconds(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use termcolor::Buffer;

    fn report(name: &str, depth: usize, outcome: TestOutcome) -> TestReport {
        TestReport {
            file: "/t/a.test.mjs".into(),
            name: name.into(),
            depth,
            outcome,
            duration_ms: 0,
        }
    }

    fn render(kind: ReporterKind, reports: &[TestReport]) -> String {
        let mut reporter = kind.build();
        let mut out = Buffer::no_color();
        let mut summary = Summary::default();
        reporter.start(&mut out, 1).unwrap();
        for r in reports {
            reporter.report(&mut out, r).unwrap();
            summary.record(&r.outcome);
        }
        reporter.finish(&mut out, &summary).unwrap();
        String::from_utf8(out.into_inner()).unwrap()
    }

    fn sample() -> Vec<TestReport> {
        vec![
            report("child", 1, TestOutcome::Passed),
            report("parent", 0, TestOutcome::Passed),
            report("bad <one>", 0, TestOutcome::Failed { message: "Error: x & y".into() }),
            report("later", 0, TestOutcome::Todo),
        ]
    }

    #[test]
    fn tap_numbers_subtests_per_level() {
        let tap = render(ReporterKind::Tap, &sample());
        assert!(tap.starts_with("TAP version 13\n"));
        assert!(tap.contains("    ok 1 - child\n"));
        assert!(tap.contains("\nok 1 - parent\n"));
        assert!(tap.contains("\nnot ok 2 - bad <one>\n"));
        assert!(tap.contains("\nok 3 - later # TODO\n"));
        assert!(tap.contains("1..3\n# tests 4\n# pass 2\n# fail 1\n"));
    }

    #[test]
    fn junit_escapes_and_groups_by_file() {
        let xml = render(ReporterKind::Junit, &sample());
        assert!(xml.contains(r#"<testsuites tests="4" failures="1""#));
        assert!(xml.contains(r#"name="bad &lt;one&gt;""#));
        assert!(xml.contains("Error: x &amp; y</failure>"));
        assert_eq!(xml.matches("<testsuite ").count(), 1);
    }

    #[test]
    fn spec_lists_failures_after_counts() {
        let spec = render(ReporterKind::Spec, &sample());
        assert!(spec.contains("  ✔ child"));
        assert!(spec.contains("ℹ fail 1"));
        assert!(spec.contains("  Error: x & y"));
    }

    #[test]
    fn dot_prints_one_mark_per_test() {
        let dot = render(ReporterKind::Dot, &sample());
        assert!(dot.starts_with("..X-\n"));
        assert!(dot.contains("2 passing, 1 failing"));
    }
}
