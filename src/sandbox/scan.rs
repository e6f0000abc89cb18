//! Static pre-execution scan of analysis code.
//!
//! A line-oriented regex pass over the source. It over-approximates: a
//! forbidden name inside a string literal is still reported.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Category of a static-scan finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingRule {
    /// Call to a builtin outside the allow-list.
    ForbiddenCall,
    /// `import` or `from .. import`.
    Import,
    /// Attribute access on a system module.
    ModuleAccess,
    /// Double-underscore name or attribute.
    DunderAccess,
    /// Path-style file read/write method.
    FileOperation,
}

impl FindingRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ForbiddenCall => "forbidden_call",
            Self::Import => "import",
            Self::ModuleAccess => "module_access",
            Self::DunderAccess => "dunder_access",
            Self::FileOperation => "file_operation",
        }
    }
}

/// A single static-scan hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFinding {
    pub rule: FindingRule,
    /// The matched name.
    pub name: String,
    /// 1-based source line.
    pub line: usize,
}

impl fmt::Display for ScanFinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {} '{}'", self.line, self.rule.as_str(), self.name)
    }
}

static FORBIDDEN_CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(eval|exec|compile|open|globals|locals|vars|getattr|setattr|delattr|breakpoint|input|memoryview|help|exit|quit|__import__)\s*\(",
    )
    .expect("forbidden call pattern is valid")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:import\s+([\w.]+)|from\s+([\w.]+)\s+import\b)")
        .expect("import pattern is valid")
});

static MODULE_ACCESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(os|sys|subprocess|shutil|socket|pathlib|builtins|importlib|ctypes|pickle|marshal|signal|resource)\s*\.\s*\w+",
    )
    .expect("module access pattern is valid")
});

static DUNDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__\w+__").expect("dunder pattern is valid"));

static FILE_OP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.\s*(read_text|write_text|read_bytes|write_bytes|unlink|rmdir|mkdir|touch)\s*\(")
        .expect("file operation pattern is valid")
});

/// Scans analysis code for forbidden constructs.
///
/// Returns findings in source order; an empty list means nothing was flagged.
pub fn scan(code: &str) -> Vec<ScanFinding> {
    let mut findings = Vec::new();

    for (idx, line) in code.lines().enumerate() {
        let line_no = idx + 1;
        let code_part = strip_line_comment(line);

        if let Some(caps) = IMPORT_RE.captures(code_part) {
            let module = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            findings.push(ScanFinding {
                rule: FindingRule::Import,
                name: module,
                line: line_no,
            });
        }

        let rules: [(FindingRule, &Regex, usize); 4] = [
            (FindingRule::ForbiddenCall, &*FORBIDDEN_CALL_RE, 1),
            (FindingRule::ModuleAccess, &*MODULE_ACCESS_RE, 0),
            (FindingRule::DunderAccess, &*DUNDER_RE, 0),
            (FindingRule::FileOperation, &*FILE_OP_RE, 1),
        ];

        for (rule, re, group) in rules {
            for caps in re.captures_iter(code_part) {
                if let Some(m) = caps.get(group) {
                    findings.push(ScanFinding {
                        rule,
                        name: m.as_str().to_string(),
                        line: line_no,
                    });
                }
            }
        }
    }

    findings
}

/// Drops a trailing `#` comment, ignoring `#` inside simple string literals.
fn strip_line_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, c) in line.char_indices() {
        match (quote, c) {
            (None, '#') => return &line[..i],
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            _ => {}
        }
    }
    line
}
