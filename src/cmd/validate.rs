//! Static validation of a component file: `lessonforge validate <file>`.

use anyhow::{Context, Result};
use std::path::Path;

use lessonforge::sandbox::{RenderOutcome, RenderRequest, render_module};
use lessonforge::validator::validate_source;

/// Returns whether the file is acceptable (no actionable findings, and a clean probe if asked).
pub fn cmd_validate(file: &Path, probe: bool, json: bool) -> Result<bool> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let result = validate_source(&source);
    let probe_outcome = (probe && !result.has_actionable()).then(|| {
        render_module(&RenderRequest {
            source_text: source.clone(),
            module_id: file.display().to_string(),
        })
    });
    let probe_error = match &probe_outcome {
        Some(RenderOutcome::Failed { error, .. }) => Some(error.clone()),
        _ => None,
    };
    let ok = !result.has_actionable() && probe_error.is_none();

    if json {
        let report = serde_json::json!({
            "file": file.display().to_string(),
            "accepted": ok,
            "violations": result.violations,
            "probe": probe_outcome,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(ok);
    }

    for violation in &result.violations {
        let marker = if violation.is_actionable() { "error" } else { "note" };
        println!("{marker}[{}]: {}", violation.code, violation.message);
    }
    if let Some(error) = &probe_error {
        println!("error[probe_failed]: {error}");
    }
    if ok {
        println!("{}: ok", file.display());
    } else {
        let count = result.actionable().len() + usize::from(probe_error.is_some());
        println!("{}: {} problem(s) found", file.display(), count);
    }
    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_reports_clean_and_dirty_files() {
        let dir = tempfile::tempdir().unwrap();
        let clean = dir.path().join("clean.tsx");
        std::fs::write(
            &clean,
            "import React from 'react';\nexport default function LessonComponent() {\n  return <div className=\"bg-blue-200\">Hi</div>;\n}\n",
        )
        .unwrap();
        assert!(cmd_validate(&clean, true, false).unwrap());

        let dirty = dir.path().join("dirty.tsx");
        std::fs::write(
            &dirty,
            "import fs from 'fs';\nexport default function LessonComponent() {\n  return <div />;\n}\n",
        )
        .unwrap();
        assert!(!cmd_validate(&dirty, false, true).unwrap());
    }

    #[test]
    fn test_probe_catches_unbound_component() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("unbound.tsx");
        std::fs::write(
            &file,
            "import React from 'react';\nexport default function LessonComponent() {\n  return <div><Widget /></div>;\n}\n",
        )
        .unwrap();
        assert!(cmd_validate(&file, false, false).unwrap());
        assert!(!cmd_validate(&file, true, false).unwrap());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(cmd_validate(Path::new("/nonexistent/lesson.tsx"), false, false).is_err());
    }
}
