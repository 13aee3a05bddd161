//! Static validation of generated component source.
//!
//! `validate_source` is a pure function of its input: five independent passes, each
//! appending findings, deduplicated by message in first-occurrence order.

pub mod diagnostic;
pub mod imports;
pub mod rules;

pub use diagnostic::{ValidationResult, Violation, ViolationCode};
pub use rules::{ALLOWED_NAMESPACES, PRIMITIVES};

use imports::{ImportKind, find_computed_references, find_imports};
use std::collections::{BTreeSet, HashSet};

#[derive(Default)]
struct Findings {
    seen: HashSet<String>,
    violations: Vec<Violation>,
}

impl Findings {
    fn push(&mut self, code: ViolationCode, message: String) {
        if self.seen.insert(message.clone()) {
            self.violations.push(Violation::new(code, message));
        }
    }
}

/// Run every validation pass over `code`.
pub fn validate_source(code: &str) -> ValidationResult {
    let mut findings = Findings::default();
    check_capabilities(code, &mut findings);
    check_imports(code, &mut findings);
    check_balance(code, &mut findings);
    check_shape(code, &mut findings);
    check_styling(code, &mut findings);
    ValidationResult::from_violations(findings.violations)
}

fn check_capabilities(code: &str, findings: &mut Findings) {
    for (pattern, message) in rules::BLOCKLIST.iter() {
        if pattern.is_match(code) {
            findings.push(ViolationCode::BlockedCapability, (*message).to_string());
        }
    }
}

fn check_imports(code: &str, findings: &mut Findings) {
    for stmt in find_imports(code) {
        if rules::is_allowed_module(&stmt.module) {
            continue;
        }
        if stmt.is_erased() {
            findings.push(
                ViolationCode::MissingTypeDeclaration,
                format!("No type declarations available for '{}'", stmt.module),
            );
        } else {
            findings.push(
                ViolationCode::ImportNotAllowed,
                format!("Import not allowed: {}", stmt.module),
            );
        }
    }
    if !find_computed_references(code).is_empty() {
        findings.push(
            ViolationCode::ImportNotAllowed,
            "Import not allowed: <dynamic>".to_string(),
        );
    }
}

fn check_balance(code: &str, findings: &mut Findings) {
    for (open, close, label) in [('{', '}', "braces"), ('(', ')', "parentheses"), ('[', ']', "brackets")] {
        let opening = code.chars().filter(|c| *c == open).count();
        let closing = code.chars().filter(|c| *c == close).count();
        if opening != closing {
            findings.push(
                ViolationCode::UnbalancedDelimiters,
                format!("Mismatched {label}: {opening} opening, {closing} closing"),
            );
        }
    }
}

fn check_shape(code: &str, findings: &mut Findings) {
    if !rules::DEFAULT_EXPORT.is_match(code) {
        findings.push(
            ViolationCode::MissingDefaultExport,
            "Component must have 'export default'".into(),
        );
    }
    if !rules::RENDER_EXPR.is_match(code) {
        findings.push(
            ViolationCode::MissingRender,
            "Component function must return JSX".into(),
        );
    }

    let mut named_from_react = BTreeSet::new();
    let mut react_namespaces = BTreeSet::new();
    for stmt in find_imports(code) {
        if stmt.kind != ImportKind::Static || stmt.module != "react" {
            continue;
        }
        for binding in stmt.bindings {
            match binding.imported.as_str() {
                "default" | "*" => {
                    react_namespaces.insert(binding.local);
                }
                _ if binding.imported == binding.local => {
                    named_from_react.insert(binding.local);
                }
                _ => {}
            }
        }
    }

    for (primitive, uses) in rules::PRIMITIVE_USES.iter() {
        if named_from_react.contains(*primitive) {
            continue;
        }
        let mut occurrences = uses.find_iter(code).peekable();
        if occurrences.peek().is_none() {
            continue;
        }
        let all_qualified = occurrences.all(|m| {
            let before = &code[..m.start()];
            before.strip_suffix('.').is_some_and(|prefix| {
                react_namespaces
                    .iter()
                    .any(|ns| prefix.trim_end().ends_with(ns.as_str()))
            })
        });
        if !all_qualified {
            findings.push(
                ViolationCode::UnimportedPrimitive,
                format!("{primitive} is used but not imported from 'react'"),
            );
        }
    }
}

fn check_styling(code: &str, findings: &mut Findings) {
    for caps in rules::HOVER_CLASS.captures_iter(code) {
        findings.push(
            ViolationCode::DisallowedStyling,
            format!("Hover styles are not allowed: {}", &caps[1]),
        );
    }
    if rules::WHITE_BUTTON.is_match(code) {
        findings.push(
            ViolationCode::DisallowedStyling,
            "Buttons must not use a white background (bg-white)".into(),
        );
    }
}
