//! Source emitters for intercepted modules.
//!
//! Every interpolated location is emitted as a JSON string literal and every
//! lockdown configuration as a JSON object literal. Nothing is spliced in as
//! raw code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::lockdown::LockdownConfiguration;

/// How an intercepted test file is isolated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Lockdown only; the file runs in the host realm.
    Simple,
    /// Lockdown, then the file is re-loaded inside a fresh compartment.
    #[default]
    Full,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Simple => "simple",
            Strategy::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "simple" => Some(Strategy::Simple),
            "full" => Some(Strategy::Full),
            _ => None,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A JSON-escaped string literal.
pub fn string_literal(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".into())
}

/// The single-line statement pair that imports and applies lockdown.
pub fn lockdown_preamble(config: &LockdownConfiguration) -> String {
    format!(
        "import {{ lockdown }} from \"cloister:lockdown\"; lockdown({});",
        config.to_json_literal()
    )
}

/// Rewrite `original` according to `strategy`.
pub fn render(strategy: Strategy, location: &str, original: &str, config: &LockdownConfiguration) -> String {
    match strategy {
        Strategy::Simple => simple(original, config),
        Strategy::Full => full(location, config),
    }
}

/// Preamble and original share line 1, so original line numbers hold.
pub fn simple(original: &str, config: &LockdownConfiguration) -> String {
    format!("{} {original}", lockdown_preamble(config))
}

/// A program that locks down and then evaluates `location` in a compartment.
pub fn full(location: &str, config: &LockdownConfiguration) -> String {
    format!(
        "{}\nimport {{ loadCompartment }} from \"cloister:compartment\";\nloadCompartment({});\n",
        lockdown_preamble(config),
        string_literal(location)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syntax::parse_module;

    #[test]
    fn simple_keeps_original_lines() {
        let original = "import { test } from \"cloister:test\";\ntest(\"x\", () => {});\n";
        let out = simple(original, &LockdownConfiguration::default());
        assert_eq!(out.lines().count(), original.lines().count());
        assert!(out.lines().nth(1).unwrap().starts_with("test(\"x\""));
        assert!(parse_module(&out, "/t/a.test.mjs").is_ok());
    }

    #[test]
    fn full_quotes_hostile_locations() {
        let location = "/t/we\"ird\\name.test.mjs";
        let out = full(location, &LockdownConfiguration::default());
        assert!(out.contains(r#"loadCompartment("/t/we\"ird\\name.test.mjs")"#));
        let module = parse_module(&out, "/t/x.mjs").unwrap();
        assert_eq!(module.specifiers(), vec!["cloister:lockdown", "cloister:compartment"]);
    }

    #[test]
    fn configuration_is_a_json_object() {
        let out = lockdown_preamble(&LockdownConfiguration::default());
        assert!(out.contains(r#"lockdown({"errorTaming":"unsafe","evalTaming":"safeEval""#));
    }
}
