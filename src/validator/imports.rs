//! Discovery of module references in component source.
//!
//! Shared by the validator (allowlist and hook tracing) and the sandbox loader
//! (binding table for the capability scope).

use regex::Regex;
use std::sync::LazyLock;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s+(type\s+)?([^'";]*?)\s*\bfrom\s*['"]([^'"]+)['"]\s*;?"#).unwrap()
});

static SIDE_EFFECT_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bimport\s*['"]([^'"]+)['"]\s*;?"#).unwrap());

static DYNAMIC_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\bimport\s*\(\s*['"`]([^'"`]+)['"`]\s*\)"#).unwrap());

static REQUIRE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\brequire\s*\(\s*['"`]([^'"`]+)['"`]\s*\)"#).unwrap());

static MODULE_CALL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:import|require)\s*\(").unwrap());

static LITERAL_ARGUMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:'[^'\\]+'|"[^"\\]+"|`[^`$\\]+`)\s*\)"#).unwrap()
});

static RE_EXPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bexport\s+(?:type\s+)?(?:\*|\{[^}]*\})\s*(?:as\s+[A-Za-z_$][\w$]*\s*)?from\s*['"]([^'"]+)['"]\s*;?"#)
        .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
    Static,
    TypeOnly,
    SideEffect,
    Dynamic,
    Require,
    ReExport,
}

/// One name brought into scope. `imported` is `default`, `*` or the exported name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBinding {
    pub imported: String,
    pub local: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportStatement {
    pub module: String,
    pub kind: ImportKind,
    pub bindings: Vec<ImportBinding>,
    /// Byte range of the statement in the scanned text.
    pub span: (usize, usize),
}

impl ImportStatement {
    /// Type-only statements are erased before execution.
    pub fn is_erased(&self) -> bool {
        self.kind == ImportKind::TypeOnly
    }
}

/// Every module reference in `code`, in source order.
pub fn find_imports(code: &str) -> Vec<ImportStatement> {
    let mut found = Vec::new();

    for caps in STATIC_IMPORT.captures_iter(code) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
        let kind = if caps.get(1).is_some() {
            ImportKind::TypeOnly
        } else {
            ImportKind::Static
        };
        let clause = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        found.push(ImportStatement {
            module: caps[3].to_string(),
            kind,
            bindings: parse_clause(clause),
            span: whole,
        });
    }

    let simple: [(&Regex, ImportKind); 4] = [
        (&SIDE_EFFECT_IMPORT, ImportKind::SideEffect),
        (&DYNAMIC_IMPORT, ImportKind::Dynamic),
        (&REQUIRE_CALL, ImportKind::Require),
        (&RE_EXPORT, ImportKind::ReExport),
    ];
    for (re, kind) in simple {
        for caps in re.captures_iter(code) {
            let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or_default();
            found.push(ImportStatement {
                module: caps[1].to_string(),
                kind,
                bindings: Vec::new(),
                span: whole,
            });
        }
    }

    found.sort_by_key(|s| s.span.0);
    found
}

/// Offsets of `import(..)` / `require(..)` calls whose module name is not a plain
/// string literal. Such names cannot be checked against the allowlist.
pub fn find_computed_references(code: &str) -> Vec<usize> {
    MODULE_CALL
        .find_iter(code)
        .filter(|m| !code[..m.start()].trim_end().ends_with('.'))
        .filter(|m| !LITERAL_ARGUMENT.is_match(&code[m.end()..]))
        .map(|m| m.start())
        .collect()
}

/// Parse the part between `import` and `from`: `React, { useState, type X, a as b }`
/// or `* as Icons`. Type-only specifiers are dropped.
fn parse_clause(clause: &str) -> Vec<ImportBinding> {
    let clause = clause.trim();
    let (head, named) = match clause.find('{') {
        Some(open) => {
            let close = clause[open..].find('}').map(|i| open + i).unwrap_or(clause.len());
            (&clause[..open], Some(&clause[open + 1..close]))
        }
        None => (clause, None),
    };

    let mut bindings = Vec::new();
    for part in head.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some(rest) = part.strip_prefix('*') {
            if let Some(local) = rest.trim().strip_prefix("as") {
                bindings.push(ImportBinding {
                    imported: "*".into(),
                    local: local.trim().to_string(),
                });
            }
        } else {
            bindings.push(ImportBinding {
                imported: "default".into(),
                local: part.to_string(),
            });
        }
    }

    for item in named.unwrap_or_default().split(',') {
        let item = item.trim();
        if item.is_empty() || item.starts_with("type ") {
            continue;
        }
        let binding = match item.split_once(" as ") {
            Some((imported, local)) => ImportBinding {
                imported: imported.trim().to_string(),
                local: local.trim().to_string(),
            },
            None => ImportBinding {
                imported: item.to_string(),
                local: item.to_string(),
            },
        };
        bindings.push(binding);
    }

    bindings
}
