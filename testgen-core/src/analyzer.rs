//! Best-effort scan of submitted Python source
//!
//! Lists the module's top-level functions (with their parameters), classes
//! (with their methods) and imports using line regexes. It is not a parser:
//! malformed input simply yields fewer names.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn def_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[ \t]*(?:async[ \t]+)?def[ \t]+([A-Za-z_]\w*)[ \t]*\(").unwrap()
    })
}

fn class_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^class[ \t]+([A-Za-z_]\w*)[ \t]*[:(]").unwrap())
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:import\s+([\w.]+)|from\s+([\w.]+)\s+import\b)").unwrap())
}

/// A `def` and its named parameters, without annotations or defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub args: Vec<String>,
}

impl FunctionInfo {
    /// `name(a, b)`, leaving out a leading `self` or `cls`
    pub fn signature(&self) -> String {
        let skip = match self.args.first().map(String::as_str) {
            Some("self") | Some("cls") => 1,
            _ => 0,
        };
        format!("{}({})", self.name, self.args[skip..].join(", "))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassInfo {
    pub name: String,
    pub methods: Vec<FunctionInfo>,
}

/// Top-level names found in a Python module
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub functions: Vec<FunctionInfo>,
    pub classes: Vec<ClassInfo>,
    pub imports: Vec<String>,
}

impl SourceSummary {
    /// Functions and classes not starting with an underscore, in source
    /// order, with their call shapes: `add(a, b)` or
    /// `Stack (methods: __init__(), push(item))`
    pub fn public_signatures(&self) -> Vec<String> {
        let functions = self
            .functions
            .iter()
            .filter(|f| !f.name.starts_with('_'))
            .map(FunctionInfo::signature);
        let classes = self
            .classes
            .iter()
            .filter(|c| !c.name.starts_with('_'))
            .map(|class| {
                let methods: Vec<String> = class
                    .methods
                    .iter()
                    .filter(|m| m.name == "__init__" || !m.name.starts_with('_'))
                    .map(FunctionInfo::signature)
                    .collect();
                if methods.is_empty() {
                    class.name.clone()
                } else {
                    format!("{} (methods: {})", class.name, methods.join(", "))
                }
            });
        functions.chain(classes).collect()
    }

    /// Whether `name` is a top-level function or class
    pub fn defines(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name) || self.classes.iter().any(|c| c.name == name)
    }
}

/// Class whose body is still being read
struct OpenClass {
    index: usize,
    method_indent: Option<usize>,
}

pub fn analyze(source: &str) -> SourceSummary {
    let mut summary = SourceSummary::default();
    let mut open: Option<OpenClass> = None;
    let mut offset = 0;

    for line in source.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();

        let body = line.trim_start_matches([' ', '\t']);
        if body.trim().is_empty() || body.starts_with('#') {
            continue;
        }
        let indent = line.len() - body.len();
        if indent == 0 {
            open = None;
        }

        if let Some(caps) = class_regex().captures(line) {
            let name = caps[1].to_string();
            let index = match summary.classes.iter().position(|c| c.name == name) {
                Some(index) => {
                    summary.classes[index].methods.clear();
                    index
                }
                None => {
                    summary.classes.push(ClassInfo {
                        name,
                        methods: Vec::new(),
                    });
                    summary.classes.len() - 1
                }
            };
            open = Some(OpenClass {
                index,
                method_indent: None,
            });
            continue;
        }

        let Some(caps) = def_regex().captures(line) else {
            continue;
        };
        let Some(args) = parameters(&source[line_start + caps[0].len()..]) else {
            continue;
        };
        let function = FunctionInfo {
            name: caps[1].to_string(),
            args,
        };

        if indent == 0 {
            // A later definition rebinds the name.
            match summary.functions.iter_mut().find(|f| f.name == function.name) {
                Some(existing) => *existing = function,
                None => summary.functions.push(function),
            }
        } else if let Some(class) = open.as_mut() {
            if *class.method_indent.get_or_insert(indent) == indent {
                summary.classes[class.index].methods.push(function);
            }
        }
    }

    for caps in import_regex().captures_iter(source) {
        if let Some(module) = caps.get(1).or_else(|| caps.get(2)) {
            let module = module.as_str().to_string();
            if !summary.imports.contains(&module) {
                summary.imports.push(module);
            }
        }
    }

    summary
}

/// Parameter names from the text following a `def name(`; `None` when the
/// list never closes
fn parameters(rest: &str) -> Option<Vec<String>> {
    let mut depth = 0usize;
    let mut raw = Vec::new();
    let mut current = String::new();

    for ch in rest.chars() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' if depth == 0 => {
                raw.push(current);
                return Some(raw.iter().filter_map(|p| parameter_name(p)).collect());
            }
            ')' | ']' | '}' => depth -= 1,
            ',' if depth == 0 => {
                raw.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(ch);
    }
    None
}

/// `a: int = 3` gives `a`; bare `*` and `/` separators and `*args`/`**kwargs`
/// give nothing
fn parameter_name(raw: &str) -> Option<String> {
    let name = raw.split([':', '=']).next()?.trim();
    let valid = name
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_');
    valid.then(|| name.to_string())
}
