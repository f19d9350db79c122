//! Test code extraction from raw model output
//!
//! Models wrap code in markdown fences and surround it with chatter. The
//! extractor keeps the code-bearing fences, falls back to the bare output when
//! it contains no prose, and rejects anything that does not look like tests.

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Info strings marking a fence as non-code
const NON_CODE_TAGS: &[&str] = &[
    "text",
    "txt",
    "plaintext",
    "markdown",
    "md",
    "output",
    "console",
    "log",
];

/// Line starts that make an unindented line Python rather than prose
const PYTHON_LINE_STARTS: &[&str] = &[
    "@", "def ", "class ", "import ", "from ", "assert", "if ", "elif ", "else", "for ", "while ",
    "with ", "try", "except", "finally", "return", "raise", "async ", "await ", "pass", "yield",
    "global ", "nonlocal ", "del ", "lambda", "print(", "\"", "'", ")", "]", "}",
];

/// Phrases models open their chatter with
const CONVERSATIONAL_OPENERS: &[&str] = &[
    "here is",
    "here are",
    "here's",
    "sure",
    "certainly",
    "of course",
    "below is",
    "below are",
    "the following",
    "this code",
    "these tests",
    "this test",
    "i have",
    "i've",
    "let me",
    "note",
    "explanation",
];

fn pytest_import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:import\s+pytest\b|from\s+pytest\b)").unwrap())
}

/// Why no test code could be extracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundReason {
    /// Nothing but whitespace
    Empty,
    /// Only non-code fences such as ```text
    NoCodeBlock,
    /// Unfenced output that reads like an explanation
    Prose,
    /// Code without any test constructs
    NotTestCode,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotFoundReason::Empty => "the model returned no content",
            NotFoundReason::NoCodeBlock => "the model returned no code block",
            NotFoundReason::Prose => "the model returned an explanation instead of code",
            NotFoundReason::NotTestCode => "the returned code contains no tests",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Extracted(String),
    NotFound(NotFoundReason),
}

impl Extraction {
    pub fn code(&self) -> Option<&str> {
        match self {
            Extraction::Extracted(code) => Some(code),
            Extraction::NotFound(_) => None,
        }
    }
}

/// Raw model output plus whatever test code could be pulled out of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArtifact {
    pub raw_model_output: String,
    pub extracted_test_code: Option<String>,
}

impl GeneratedArtifact {
    /// Extract from `raw_model_output`, returning the reason on failure
    pub fn from_model_output(raw_model_output: String) -> (Self, Option<NotFoundReason>) {
        match extract(&raw_model_output) {
            Extraction::Extracted(code) => (
                Self {
                    raw_model_output,
                    extracted_test_code: Some(code),
                },
                None,
            ),
            Extraction::NotFound(reason) => (
                Self {
                    raw_model_output,
                    extracted_test_code: None,
                },
                Some(reason),
            ),
        }
    }
}

pub fn extract(raw_model_output: &str) -> Extraction {
    if raw_model_output.trim().is_empty() {
        return Extraction::NotFound(NotFoundReason::Empty);
    }

    let blocks = fenced_blocks(raw_model_output);
    let candidate = if blocks.is_empty() {
        if contains_prose(raw_model_output) {
            return Extraction::NotFound(NotFoundReason::Prose);
        }
        raw_model_output.trim_matches(['\n', '\r']).to_string()
    } else {
        let code: Vec<&str> = blocks
            .iter()
            .filter(|block| !block.is_non_code())
            .map(|block| block.content.as_str())
            .collect();
        if code.is_empty() {
            return Extraction::NotFound(NotFoundReason::NoCodeBlock);
        }
        code.join("\n\n")
    };

    let code = normalize_code(&candidate);
    if code.trim().is_empty() {
        return Extraction::NotFound(NotFoundReason::Empty);
    }
    if !looks_like_tests(&code) {
        return Extraction::NotFound(NotFoundReason::NotTestCode);
    }
    Extraction::Extracted(code)
}

#[derive(Debug)]
struct FencedBlock {
    tag: String,
    content: String,
}

impl FencedBlock {
    fn is_non_code(&self) -> bool {
        NON_CODE_TAGS.contains(&self.tag.as_str())
    }
}

struct Fence {
    marker: char,
    len: usize,
    indent: usize,
}

/// Opening fence with its info-string tag, if `line` is one
fn parse_opening(line: &str) -> Option<(Fence, String)> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = trimmed.chars().take_while(|c| *c == marker).count();
    if len < 3 {
        return None;
    }
    let info = trimmed[len..].trim();
    if marker == '`' && info.contains('`') {
        return None;
    }
    let tag = info
        .split(|c: char| c.is_whitespace() || c == '{' || c == ',')
        .next()
        .unwrap_or("")
        .trim_start_matches('.')
        .to_ascii_lowercase();
    Some((Fence { marker, len, indent }, tag))
}

fn is_closing(line: &str, fence: &Fence) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= fence.len && trimmed.chars().all(|c| c == fence.marker)
}

fn fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<(Fence, String, Vec<&str>)> = None;

    for line in text.lines() {
        match open.take() {
            None => {
                if let Some((fence, tag)) = parse_opening(line) {
                    open = Some((fence, tag, Vec::new()));
                }
            }
            Some((fence, tag, mut lines)) => {
                if is_closing(line, &fence) {
                    blocks.push(finish_block(tag, &lines));
                } else {
                    lines.push(strip_indent(line, fence.indent));
                    open = Some((fence, tag, lines));
                }
            }
        }
    }
    // Unterminated final fence runs to the end of the output.
    if let Some((_, tag, lines)) = open {
        blocks.push(finish_block(tag, &lines));
    }
    blocks
}

fn finish_block(tag: String, lines: &[&str]) -> FencedBlock {
    FencedBlock {
        tag,
        content: lines.join("\n").trim_end_matches(['\n', '\r']).to_string(),
    }
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let removable = line
        .char_indices()
        .take(indent)
        .take_while(|(_, c)| *c == ' ')
        .count();
    &line[removable..]
}

/// Whether any line outside a triple-quoted string reads like prose
fn contains_prose(text: &str) -> bool {
    let mut in_string = false;
    for line in text.lines() {
        let quotes = line.matches("\"\"\"").count() + line.matches("'''").count();
        if !in_string && quotes == 0 && is_prose_line(line) {
            return true;
        }
        if quotes % 2 == 1 {
            in_string = !in_string;
        }
    }
    false
}

fn is_prose_line(line: &str) -> bool {
    if line.trim().is_empty() || line.starts_with(char::is_whitespace) {
        return false;
    }
    let trimmed = line.trim();
    if trimmed.starts_with('#') {
        return false;
    }
    if PYTHON_LINE_STARTS.iter().any(|start| trimmed.starts_with(start)) {
        return false;
    }

    let lower = trimmed.to_ascii_lowercase();
    let conversational = CONVERSATIONAL_OPENERS.iter().any(|opener| {
        lower.starts_with(opener)
            && !lower[opener.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    });
    if conversational {
        return true;
    }

    let words = trimmed.split_whitespace().count();
    words >= 4 && trimmed.ends_with(['.', ':', '!'])
}

fn normalize_code(code: &str) -> String {
    let code = code
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"");

    if code.contains("pytest.") && !pytest_import_regex().is_match(&code) {
        return format!("import pytest\n{}", code);
    }
    code
}

fn looks_like_tests(code: &str) -> bool {
    ["def test", "class Test", "assert", "unittest", "pytest"]
        .iter()
        .any(|marker| code.contains(marker))
}
