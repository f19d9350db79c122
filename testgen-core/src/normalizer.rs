//! Result normalization
//!
//! Turns a raw [`ExecutionOutcome`] into the [`TestResult`] returned to
//! callers and attaches advisory hints for failure signatures we recognise.
//! Hints never change `success` or `exit_code`.

use crate::analyzer::SourceSummary;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;
use testgen_sandbox::ExecutionOutcome;

/// Separator placed between stdout and stderr in [`TestResult::output`]
pub const STDERR_SEPARATOR: &str = "--- stderr ---";

/// pytest's "no tests collected" exit status
const PYTEST_NO_TESTS: i32 = 5;
/// SIGKILL (memory cgroup / rlimit kill) and SIGXCPU exits
const RESOURCE_KILL_EXITS: [i32; 2] = [137, 152];

/// Known function names and the implementation suggested when they are missing
const STUB_TABLE: &[(&str, &str)] = &[
    (
        "reverse_string",
        "def reverse_string(s):\n    return s[::-1] if isinstance(s, str) else None",
    ),
    (
        "reverse_list",
        "def reverse_list(lst):\n    return lst[::-1] if isinstance(lst, list) else None",
    ),
    ("add_numbers", "def add_numbers(a, b):\n    return a + b"),
    ("multiply_numbers", "def multiply_numbers(a, b):\n    return a * b"),
    (
        "is_palindrome",
        "def is_palindrome(s):\n    s = str(s).lower()\n    return s == s[::-1]",
    ),
];

fn name_error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"NameError: name '(\w+)' is not defined").unwrap())
}

fn import_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"cannot import name '(\w+)' from '([\w.]+)'").unwrap())
}

fn module_attribute_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"module '([\w.]+)' has no attribute '(\w+)'").unwrap())
}

fn module_not_found_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"ModuleNotFoundError: No module named '([\w.]+)'").unwrap())
}

fn failed_assert_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)AssertionError|^E\s+assert\b").unwrap())
}

/// Structured result of one test execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub success: bool,
    pub exit_code: i32,
    pub output: String,
    pub note: Option<String>,
    pub hints: BTreeSet<String>,
    pub timed_out: bool,
    pub duration_ms: u64,
}

/// What the normalizer knows besides the outcome itself
#[derive(Debug, Clone, Copy)]
pub struct NormalizeContext<'a> {
    /// Module name the source was saved under
    pub module: &'a str,
    /// Names found in the submitted source, when it was analyzed
    pub summary: Option<&'a SourceSummary>,
    /// Suggest implementations for well-known missing functions
    pub stub_hints: bool,
}

impl Default for NormalizeContext<'_> {
    fn default() -> Self {
        Self {
            module: testgen_llm::SOLUTION_MODULE,
            summary: None,
            stub_hints: false,
        }
    }
}

pub fn normalize(outcome: &ExecutionOutcome, context: &NormalizeContext<'_>) -> TestResult {
    let output = combine_output(&outcome.stdout, &outcome.stderr);
    let success = outcome.success();
    let hints = classify(outcome, &output, context);

    let mut notes = Vec::new();
    if outcome.timed_out {
        notes.push(format!("Execution timed out after {} ms", outcome.duration_ms));
    }
    if outcome.truncated {
        notes.push("Output was truncated".to_string());
    }
    if success && !hints.is_empty() {
        notes.push("Tests passed, but the output contains warnings".to_string());
    }

    TestResult {
        success,
        exit_code: outcome.exit_code,
        output,
        note: (!notes.is_empty()).then(|| notes.join("; ")),
        hints,
        timed_out: outcome.timed_out,
        duration_ms: outcome.duration_ms,
    }
}

fn combine_output(stdout: &str, stderr: &str) -> String {
    let mut output = stdout.to_string();
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(STDERR_SEPARATOR);
        output.push('\n');
        output.push_str(stderr);
    }
    output
}

fn classify(outcome: &ExecutionOutcome, output: &str, context: &NormalizeContext<'_>) -> BTreeSet<String> {
    let mut hints = BTreeSet::new();

    for name in missing_names(output, context.module) {
        let defined = context.summary.is_some_and(|summary| summary.defines(&name));
        if defined {
            hints.insert(format!(
                "`{name}` is defined in the submitted code but was not available to the tests; \
                 make sure the tests import it from `{module}`.",
                module = context.module
            ));
        } else {
            hints.insert(format!(
                "`{name}` is referenced by the tests but not defined in the submitted code; \
                 it may be unimplemented or misnamed."
            ));
            if context.stub_hints {
                if let Some((_, stub)) = STUB_TABLE.iter().find(|(stub_name, _)| *stub_name == name) {
                    hints.insert(format!("A typical implementation of `{name}`:\n\n{stub}"));
                }
            }
        }
    }

    for caps in module_not_found_regex().captures_iter(output) {
        hints.insert(format!(
            "Module `{}` is not available in the test environment; \
             remove the import or use only the standard library.",
            &caps[1]
        ));
    }

    if output.contains("SyntaxError") || output.contains("IndentationError") {
        hints.insert(
            "The code or the generated tests contain a syntax error; \
             check the submitted code or regenerate the tests."
                .to_string(),
        );
    }

    if outcome.exit_code == PYTEST_NO_TESTS || output.contains("no tests ran") {
        hints.insert(
            "No tests were collected; test functions must be named `test_*` \
             or live in a class named `Test*`."
                .to_string(),
        );
    }

    if failed_assert_regex().is_match(output) {
        hints.insert(
            "At least one assertion failed: the code's behavior differs from \
             what the tests expect for the described use case."
                .to_string(),
        );
    }

    if output.contains("RecursionError") {
        hints.insert(
            "Maximum recursion depth exceeded; look for a missing base case.".to_string(),
        );
    }

    if output.contains("MemoryError")
        || (!outcome.timed_out && RESOURCE_KILL_EXITS.contains(&outcome.exit_code))
    {
        hints.insert(
            "The run hit a memory or CPU time limit; look for unbounded loops \
             or very large data structures."
                .to_string(),
        );
    }

    if outcome.timed_out {
        hints.insert(
            "The run exceeded its time limit; this usually means an infinite loop \
             or a call that waits for input."
                .to_string(),
        );
    }

    hints
}

/// Names the tests expected from the code under test, in order of appearance
fn missing_names(output: &str, module: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut push = |name: &str| {
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    };

    for caps in name_error_regex().captures_iter(output) {
        push(&caps[1]);
    }
    for caps in import_name_regex().captures_iter(output) {
        if &caps[2] == module {
            push(&caps[1]);
        }
    }
    for caps in module_attribute_regex().captures_iter(output) {
        if &caps[1] == module {
            push(&caps[2]);
        }
    }
    names
}
