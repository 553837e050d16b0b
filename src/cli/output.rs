//! Handles all user-facing output for the CLI that is not reporter output.
//!
//! Errors go to stderr through miette; generated sources and diffs go to
//! stdout, colored when it is a terminal.

use std::io::Write;

use difference::{Changeset, Difference};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::errors::CloisterError;

fn color_choice() -> ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// Print an error. With `verbose`, the full miette report including every
/// cause and help text; otherwise one line with the diagnostic code.
pub fn print_error(err: CloisterError, verbose: bool) {
    if verbose {
        eprintln!("{:?}", miette::Report::new(err));
        return;
    }
    let code = miette::Diagnostic::code(&err).map(|c| format!(" [{c}]")).unwrap_or_default();
    eprintln!("Error{code}: {err}");
}

/// Print a generated source under a highlighted title.
pub fn print_source(title: &str, text: &str) {
    let mut stdout = StandardStream::stdout(color_choice());
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)).set_bold(true));
    let _ = writeln!(stdout, "--- {title} ---");
    let _ = stdout.reset();
    let _ = write!(stdout, "{text}");
    if !text.ends_with('\n') {
        let _ = writeln!(stdout);
    }
}

/// Print a line diff from `original` to `generated`.
pub fn print_diff(original: &str, generated: &str) {
    let mut stdout = StandardStream::stdout(color_choice());
    let changeset = Changeset::new(original, generated, "\n");
    for diff in &changeset.diffs {
        let (prefix, color, text) = match diff {
            Difference::Same(text) => (" ", None, text),
            Difference::Add(text) => ("+", Some(Color::Green), text),
            Difference::Rem(text) => ("-", Some(Color::Red), text),
        };
        let _ = stdout.set_color(ColorSpec::new().set_fg(color));
        for line in text.lines() {
            let _ = writeln!(stdout, "{prefix}{line}");
        }
    }
    let _ = stdout.reset();
}
