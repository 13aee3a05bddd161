//! Render-time loader for accepted lesson modules.
//!
//! Source text is never executed. It is lowered into a declarative component IR
//! and interpreted by a fixed renderer against a capability scope built from the
//! module's own imports. Only [`AcceptedSource`] can be loaded, and the only way
//! to obtain one is to pass the validator.

pub mod datefmt;
pub mod ir;
pub mod lower;
pub mod render;
pub mod scope;

use regex::Regex;
use serde::Serialize;
use std::sync::{Arc, LazyLock};

use crate::errors::SandboxError;
use crate::validator::{self, imports::find_imports};
use ir::ModuleIr;
use render::Renderer;
use scope::{CapabilityScope, is_host_tag};

pub const DEFAULT_MAX_DEPTH: usize = 64;

static ENTRY_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bexport\s+default\s+(?:async\s+)?function\s+([A-Za-z_$][\w$]*)").unwrap()
});

static ENTRY_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bexport\s+default\s+([A-Za-z_$][\w$]*)\s*;?").unwrap());

static USE_DIRECTIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^\s*['"]use (?:client|strict)['"]\s*;?"#).unwrap());

static EXPORT_KEYWORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bexport\s+(?:default\s+)?").unwrap());

/// Source text that passed the validator with no actionable violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedSource(String);

impl AcceptedSource {
    pub fn validate(text: &str) -> Result<Self, SandboxError> {
        let result = validator::validate_source(text);
        if result.has_actionable() {
            return Err(SandboxError::NotAccepted {
                violations: result
                    .actionable()
                    .into_iter()
                    .map(|v| v.message)
                    .collect(),
            });
        }
        Ok(Self(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A module to display: its stored source and the record it came from.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source_text: String,
    pub module_id: String,
}

/// Result of a render, shaped for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderOutcome {
    Rendered {
        #[serde(rename = "moduleId")]
        module_id: String,
        entry: String,
        html: String,
    },
    Failed {
        #[serde(rename = "moduleId")]
        module_id: String,
        error: String,
    },
}

/// A loaded module's callable entry component.
#[derive(Debug, Clone)]
pub struct EntryPoint {
    name: String,
    module: Arc<ModuleIr>,
    scope: Arc<CapabilityScope>,
    max_depth: usize,
}

impl EntryPoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Escaped HTML for the entry's initial state.
    pub fn render(&self) -> Result<String, SandboxError> {
        Renderer::new(&self.module, &self.scope, self.max_depth).render_entry(&self.name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SandboxLoader {
    pub max_depth: usize,
}

impl Default for SandboxLoader {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Name of the default-exported entry component.
fn entry_name(text: &str) -> Option<String> {
    if let Some(caps) = ENTRY_FUNCTION.captures(text) {
        return Some(caps[1].to_string());
    }
    ENTRY_REFERENCE
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .find(|name| !matches!(name.as_str(), "function" | "class" | "async"))
}

/// Remove directives, import statements and export keywords, keeping offsets stable.
fn strip_module_syntax(text: &str) -> String {
    let mut out = text.to_string();
    let mut spans: Vec<(usize, usize)> = find_imports(text).into_iter().map(|i| i.span).collect();
    spans.extend(
        USE_DIRECTIVE
            .find_iter(text)
            .map(|m| (m.start(), m.end())),
    );
    for (start, end) in spans {
        blank(&mut out, start, end);
    }
    let keywords: Vec<(usize, usize)> = EXPORT_KEYWORD
        .find_iter(&out)
        .map(|m| (m.start(), m.end()))
        .collect();
    for (start, end) in keywords {
        blank(&mut out, start, end);
    }
    out
}

/// Overwrite `start..end` with spaces, keeping newlines and byte length.
fn blank(text: &mut String, start: usize, end: usize) {
    let Some(segment) = text.get(start..end) else {
        return;
    };
    let replacement: String = segment
        .chars()
        .flat_map(|c| {
            let fill = if c == '\n' { '\n' } else { ' ' };
            std::iter::repeat_n(fill, c.len_utf8())
        })
        .collect();
    text.replace_range(start..end, &replacement);
}

/// The trailing `export default Name;` statement leaves a bare name behind; drop it.
fn drop_entry_reference(text: &str, entry: &str) -> String {
    let pattern = format!(r"(?m)^\s*{}\s*;?\s*$", regex::escape(entry));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "").into_owned(),
        Err(_) => text.to_string(),
    }
}

impl SandboxLoader {
    pub fn load(&self, source: &AcceptedSource, module_id: &str) -> Result<EntryPoint, SandboxError> {
        let text = source.as_str();
        let entry = entry_name(text).ok_or(SandboxError::MissingEntryPoint)?;
        tracing::debug!(module_id, entry = %entry, "Loading module");

        let stripped = drop_entry_reference(&strip_module_syntax(text), &entry);
        let module = lower::lower_module(&stripped)?;
        let scope = CapabilityScope::from_imports(&find_imports(text))?;
        check_tags(&module, &scope)?;

        let Some(component) = module.components.get(&entry) else {
            return Err(SandboxError::NotCallable {
                name: entry,
                reason: "it is not a component defined in this module".to_string(),
            });
        };
        if component.render_expr().is_none() {
            return Err(SandboxError::NotCallable {
                name: entry,
                reason: "it does not return markup".to_string(),
            });
        }

        Ok(EntryPoint {
            name: entry,
            module: Arc::new(module),
            scope: Arc::new(scope),
            max_depth: self.max_depth,
        })
    }
}

/// Every component reference must resolve before anything renders.
fn check_tags(module: &ModuleIr, scope: &CapabilityScope) -> Result<(), SandboxError> {
    let mut tags = Vec::new();
    let mut collect = |element: &ir::Element| tags.push(element.tag.clone());
    for binding in &module.globals {
        binding.visit_elements(&mut collect);
    }
    for component in module.components.values() {
        component.lambda.visit_elements(&mut collect);
    }
    for tag in tags {
        if is_host_tag(&tag) {
            if render::FORBIDDEN_TAGS.contains(&tag.to_ascii_lowercase().as_str()) {
                return Err(SandboxError::ForbiddenElement { tag });
            }
            continue;
        }
        scope.resolve_tag(&tag, module)?;
    }
    Ok(())
}

/// Validate, load and render a stored module. Total: every failure becomes `Failed`.
pub fn render_module(request: &RenderRequest) -> RenderOutcome {
    let module_id = request.module_id.clone();
    let result = AcceptedSource::validate(&request.source_text)
        .and_then(|source| SandboxLoader::default().load(&source, &module_id))
        .and_then(|entry| entry.render().map(|html| (entry.name().to_string(), html)));
    match result {
        Ok((entry, html)) => RenderOutcome::Rendered {
            module_id,
            entry,
            html,
        },
        Err(error) => {
            tracing::warn!(module_id = %module_id, error = %error, "Module failed to render");
            RenderOutcome::Failed {
                module_id,
                error: error.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LESSON: &str = r#""use client";
import React, { useState } from 'react';
import { Star } from 'lucide-react';

const FACTS = ["Halves", "Quarters"];

export default function LessonComponent() {
  const [score, setScore] = useState(0);
  return (
    <div className="p-6 bg-blue-200">
      <h1 className="text-2xl">Fractions <Star className="w-4" /></h1>
      <ul>{FACTS.map((f) => <li key={f}>{f}</li>)}</ul>
      <p>Score: {score}</p>
      <button onClick={() => setScore(score + 1)} className="bg-green-200">Add</button>
    </div>
  );
}
"#;

    fn load(text: &str) -> Result<EntryPoint, SandboxError> {
        let source = AcceptedSource::validate(text)?;
        SandboxLoader::default().load(&source, "lesson-1")
    }

    #[test]
    fn renders_an_accepted_lesson() {
        let entry = load(LESSON).unwrap();
        assert_eq!(entry.name(), "LessonComponent");
        let html = entry.render().unwrap();
        assert!(html.starts_with(r#"<div class="p-6 bg-blue-200">"#));
        assert!(html.contains("<li>Halves</li><li>Quarters</li>"));
        assert!(html.contains("<p>Score: 0</p>"));
        assert!(html.contains(r#"data-icon="Star""#));
        assert!(!html.contains("onClick"));
    }

    #[test]
    fn rejected_text_never_loads() {
        let err = AcceptedSource::validate(
            "export default function LessonComponent() { eval('1'); return <div />; }",
        )
        .unwrap_err();
        match err {
            SandboxError::NotAccepted { violations } => {
                assert!(violations.iter().any(|v| v.contains("eval")))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn export_default_reference_is_supported() {
        let text = r#"import React from 'react';
const Lesson = () => {
  return <main>Hi</main>;
};
export default Lesson;
"#;
        let entry = load(text).unwrap();
        assert_eq!(entry.name(), "Lesson");
        assert_eq!(entry.render().unwrap(), "<main>Hi</main>");
    }

    #[test]
    fn missing_entry_point_fails_closed() {
        assert_eq!(entry_name("const A = 1;"), None);
        assert_eq!(entry_name("export default function Foo() {}"), Some("Foo".into()));
        assert_eq!(entry_name("export default Foo;"), Some("Foo".into()));
    }

    #[test]
    fn entry_that_is_not_a_component_is_not_callable() {
        let text = r#"import React from 'react';
const lesson = { title: "x" };
export default lesson;
function Helper() { return <div />; }
"#;
        match load(text) {
            Err(SandboxError::NotCallable { name, .. }) => assert_eq!(name, "lesson"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_tags_fail_at_load() {
        let text = r#"import React from 'react';
export default function LessonComponent() {
  return <div><Widget /></div>;
}
"#;
        assert_eq!(
            load(text).unwrap_err(),
            SandboxError::UnboundComponent {
                name: "Widget".into()
            }
        );
    }

    #[test]
    fn strip_keeps_offsets() {
        let text = "import { a } from 'react';\nexport const B = 1;";
        let stripped = strip_module_syntax(text);
        assert_eq!(stripped.len(), text.len());
        assert!(stripped.trim_start().starts_with("const B = 1;"));
    }

    #[test]
    fn render_module_is_total() {
        let outcome = render_module(&RenderRequest {
            source_text: "not even code {".into(),
            module_id: "m1".into(),
        });
        match outcome {
            RenderOutcome::Failed { module_id, error } => {
                assert_eq!(module_id, "m1");
                assert!(!error.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        let outcome = render_module(&RenderRequest {
            source_text: LESSON.into(),
            module_id: "m2".into(),
        });
        assert!(matches!(outcome, RenderOutcome::Rendered { .. }));
    }
}
