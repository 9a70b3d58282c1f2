//! Structural validation of generated resolution scripts.
//!
//! Hard issues block a script from being prepared; warnings only lower its
//! confidence label. Checks run in a fixed order and a syntax error stops
//! analysis immediately.

use rustpython_parser::ast::{self, Constant, Expr, Stmt};
use rustpython_parser::Parse;
use serde::{Deserialize, Serialize};

/// Name of the zero-argument function every script must define.
pub const ENTRY_FUNCTION: &str = "resolve_oracle";

/// Modules the script is expected to import for fetching and JSON output.
pub const REQUIRED_IMPORTS: [&str; 2] = ["requests", "json"];

/// Heuristic trust label derived from [`ScriptAnalysis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "LOW"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptAnalysis {
    pub success: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl ScriptAnalysis {
    fn from_findings(issues: Vec<String>, warnings: Vec<String>) -> Self {
        Self {
            success: issues.is_empty(),
            issues,
            warnings,
        }
    }

    pub fn confidence(&self) -> Confidence {
        if !self.success {
            Confidence::Low
        } else if self.warnings.is_empty() {
            Confidence::High
        } else {
            Confidence::Medium
        }
    }

    /// `; `-joined issues, or a generic message when analysis failed silently.
    pub fn issue_summary(&self) -> String {
        if self.issues.is_empty() {
            "Analysis failed".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}

/// Analyze `source` as a Python module.
pub fn analyze_script(source: &str) -> ScriptAnalysis {
    let suite = match ast::Suite::parse(source, "<generated>") {
        Ok(suite) => suite,
        Err(err) => {
            let offset = u32::from(err.offset) as usize;
            let issue = format!(
                "Syntax error on line {}: {}",
                line_of_offset(source, offset),
                err.error
            );
            return ScriptAnalysis::from_findings(vec![issue], Vec::new());
        }
    };

    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    match find_entry_function(&suite) {
        None => issues.push(format!("{ENTRY_FUNCTION}() function not defined")),
        Some(def) => {
            if !contains_return(&def.body) {
                issues.push(format!("{ENTRY_FUNCTION}() does not return a value"));
            }
            if requires_arguments(&def.args) {
                issues.push(format!("{ENTRY_FUNCTION}() must be callable without arguments"));
            }
        }
    }

    if !suite.iter().any(is_main_guard) {
        warnings.push("Missing `if __name__ == \"__main__\"` guard".to_string());
    }

    let imports = top_level_imports(&suite);
    for module in REQUIRED_IMPORTS {
        if !imports.iter().any(|m| m == module) {
            warnings.push(format!("{module} module not imported"));
        }
    }

    ScriptAnalysis::from_findings(issues, warnings)
}

fn line_of_offset(source: &str, offset: usize) -> usize {
    let end = offset.min(source.len());
    source.as_bytes()[..end].iter().filter(|b| **b == b'\n').count() + 1
}

fn find_entry_function(suite: &[Stmt]) -> Option<&ast::StmtFunctionDef> {
    suite.iter().find_map(|stmt| match stmt {
        Stmt::FunctionDef(def) if def.name.as_str() == ENTRY_FUNCTION => Some(def),
        _ => None,
    })
}

fn requires_arguments(args: &ast::Arguments) -> bool {
    args.posonlyargs
        .iter()
        .chain(args.args.iter())
        .chain(args.kwonlyargs.iter())
        .any(|arg| arg.default.is_none())
}

/// Whether any statement nested in `body` is a `return`.
fn contains_return(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| match stmt {
        Stmt::Return(_) => true,
        Stmt::If(s) => contains_return(&s.body) || contains_return(&s.orelse),
        Stmt::For(s) => contains_return(&s.body) || contains_return(&s.orelse),
        Stmt::AsyncFor(s) => contains_return(&s.body) || contains_return(&s.orelse),
        Stmt::While(s) => contains_return(&s.body) || contains_return(&s.orelse),
        Stmt::With(s) => contains_return(&s.body),
        Stmt::AsyncWith(s) => contains_return(&s.body),
        Stmt::Try(s) => {
            contains_return(&s.body)
                || contains_return(&s.orelse)
                || contains_return(&s.finalbody)
                || s.handlers.iter().any(handler_returns)
        }
        Stmt::TryStar(s) => {
            contains_return(&s.body)
                || contains_return(&s.orelse)
                || contains_return(&s.finalbody)
                || s.handlers.iter().any(handler_returns)
        }
        Stmt::Match(s) => s.cases.iter().any(|case| contains_return(&case.body)),
        Stmt::FunctionDef(s) => contains_return(&s.body),
        Stmt::AsyncFunctionDef(s) => contains_return(&s.body),
        Stmt::ClassDef(s) => contains_return(&s.body),
        _ => false,
    })
}

fn handler_returns(handler: &ast::ExceptHandler) -> bool {
    match handler {
        ast::ExceptHandler::ExceptHandler(h) => contains_return(&h.body),
    }
}

/// `if __name__ == "__main__":` at module level.
fn is_main_guard(stmt: &Stmt) -> bool {
    let Stmt::If(guard) = stmt else {
        return false;
    };
    let Expr::Compare(cmp) = guard.test.as_ref() else {
        return false;
    };
    let left_is_name = matches!(cmp.left.as_ref(), Expr::Name(n) if n.id.as_str() == "__name__");
    let has_eq = cmp.ops.iter().any(|op| matches!(op, ast::CmpOp::Eq));
    let against_main = cmp.comparators.iter().any(|c| {
        matches!(
            c,
            Expr::Constant(ast::ExprConstant { value: Constant::Str(s), .. }) if s == "__main__"
        )
    });
    left_is_name && has_eq && against_main
}

/// Root package names imported at module level.
fn top_level_imports(suite: &[Stmt]) -> Vec<String> {
    let mut modules = Vec::new();
    for stmt in suite {
        match stmt {
            Stmt::Import(import) => {
                for alias in &import.names {
                    modules.push(root_module(alias.name.as_str()));
                }
            }
            Stmt::ImportFrom(from) => {
                if let Some(module) = &from.module {
                    modules.push(root_module(module.as_str()));
                }
            }
            _ => {}
        }
    }
    modules
}

fn root_module(dotted: &str) -> String {
    dotted.split('.').next().unwrap_or(dotted).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD_SCRIPT: &str = r#"import json
import requests
from datetime import datetime


def resolve_oracle():
    try:
        resp = requests.get("https://api.example.com/price", timeout=10)
        resp.raise_for_status()
        price = float(resp.json()["price"])
    except Exception as exc:
        return {"decision": "NO", "reason": f"fetch failed: {exc}"}
    if price >= 50000.0:
        return {"decision": "YES", "reason": "above threshold", "data": {"price": price}}
    return {"decision": "NO", "reason": "below threshold", "data": {"price": price}}


if __name__ == "__main__":
    result = resolve_oracle()
    print(json.dumps(result))
"#;

    #[test]
    fn test_well_formed_script_is_high_confidence() {
        let analysis = analyze_script(GOOD_SCRIPT);
        assert!(analysis.success, "{:?}", analysis.issues);
        assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);
        assert_eq!(analysis.confidence(), Confidence::High);
    }

    #[test]
    fn test_syntax_error_reports_line_and_stops() {
        let src = "import json\n\ndef resolve_oracle(:\n    return 1\n";
        let analysis = analyze_script(src);
        assert!(!analysis.success);
        assert_eq!(analysis.issues.len(), 1);
        assert!(
            analysis.issues[0].starts_with("Syntax error on line 3"),
            "{}",
            analysis.issues[0]
        );
        assert!(analysis.warnings.is_empty());
        assert_eq!(analysis.confidence(), Confidence::Low);
    }

    #[test]
    fn test_missing_entry_function_is_hard_issue() {
        let src = "import json\nimport requests\n\ndef main():\n    return 1\n";
        let analysis = analyze_script(src);
        assert!(!analysis.success);
        assert!(analysis.issues[0].contains("resolve_oracle() function not defined"));
        // The missing guard is still reported, but never outranks the issue.
        assert!(!analysis.warnings.is_empty());
        assert_eq!(analysis.confidence(), Confidence::Low);
    }

    #[test]
    fn test_entry_without_return_is_hard_issue() {
        let src = "import json\nimport requests\n\ndef resolve_oracle():\n    print('x')\n";
        let analysis = analyze_script(src);
        assert_eq!(
            analysis.issues,
            vec!["resolve_oracle() does not return a value".to_string()]
        );
    }

    #[test]
    fn test_nested_return_counts() {
        let src = "def resolve_oracle():\n    for i in range(3):\n        if i == 2:\n            return {'decision': 'NO', 'reason': 'x'}\n";
        let analysis = analyze_script(src);
        assert!(analysis.success, "{:?}", analysis.issues);
    }

    #[test]
    fn test_entry_with_required_argument_is_hard_issue() {
        let src = "def resolve_oracle(url):\n    return {}\n";
        assert!(!analyze_script(src).success);
        let src = "def resolve_oracle(url=None):\n    return {}\n";
        assert!(analyze_script(src).success);
    }

    #[test]
    fn test_missing_guard_and_imports_are_warnings() {
        let src = "def resolve_oracle():\n    return {'decision': 'YES', 'reason': 'x'}\n";
        let analysis = analyze_script(src);
        assert!(analysis.success);
        assert_eq!(analysis.warnings.len(), 3);
        assert!(analysis.warnings[0].contains("__main__"));
        assert!(analysis.warnings.contains(&"requests module not imported".to_string()));
        assert!(analysis.warnings.contains(&"json module not imported".to_string()));
        assert_eq!(analysis.confidence(), Confidence::Medium);
    }

    #[test]
    fn test_from_import_counts_as_import() {
        let src = "from requests import get\nimport json as j\n\ndef resolve_oracle():\n    return {}\n\nif __name__ == '__main__':\n    print(j.dumps(resolve_oracle()))\n";
        let analysis = analyze_script(src);
        assert!(analysis.warnings.is_empty(), "{:?}", analysis.warnings);
        assert_eq!(analysis.confidence(), Confidence::High);
    }

    #[test]
    fn test_confidence_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Confidence::Medium).unwrap(), "\"MEDIUM\"");
        assert_eq!(Confidence::High.to_string(), "HIGH");
    }
}
