//! Render a stored lesson (or a local file) through the sandbox: `lessonforge render`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use lessonforge::config::LessonforgeConfig;
use lessonforge::lessons::LessonDb;
use lessonforge::sandbox::render::escape_html;
use lessonforge::sandbox::{RenderOutcome, RenderRequest, render_module};

pub enum RenderTarget {
    Stored { id: String, db_path: Option<PathBuf> },
    File(PathBuf),
}

/// Returns whether the module rendered.
pub fn cmd_render(
    config: &LessonforgeConfig,
    target: RenderTarget,
    open_browser: bool,
    json: bool,
) -> Result<bool> {
    let (request, title) = match target {
        RenderTarget::Stored { id, db_path } => {
            let db_path = config.db_path(db_path.as_deref());
            let db = LessonDb::new(&db_path)?;
            let lesson = db
                .get_lesson(&id)?
                .with_context(|| format!("Lesson {} not found in {}", id, db_path.display()))?;
            let request = RenderRequest {
                source_text: lesson.source_text,
                module_id: lesson.id,
            };
            (request, lesson.title)
        }
        RenderTarget::File(path) => {
            let source_text = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let title = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "lesson".to_string());
            let request = RenderRequest {
                source_text,
                module_id: path.display().to_string(),
            };
            (request, title)
        }
    };

    let outcome = render_module(&request);
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    match outcome {
        RenderOutcome::Rendered { module_id, html, .. } => {
            if open_browser {
                let path = write_preview(&module_id, &title, &html)?;
                println!("Preview written to {}", path.display());
                if let Err(e) = open::that(&path) {
                    tracing::warn!(error = %e, "Failed to open browser");
                }
            } else if !json {
                println!("{html}");
            }
            Ok(true)
        }
        RenderOutcome::Failed { module_id, error } => {
            if !json {
                eprintln!("Render failed for {module_id}: {error}");
            }
            Ok(false)
        }
    }
}

/// Standalone HTML page around a rendered fragment.
fn preview_document(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<script src=\"https://cdn.tailwindcss.com\"></script>\n</head>\n<body>\n{}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn preview_path(dir: &Path, module_id: &str) -> PathBuf {
    let slug: String = module_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    dir.join(format!("lessonforge-{slug}.html"))
}

fn write_preview(module_id: &str, title: &str, html: &str) -> Result<PathBuf> {
    let path = preview_path(&std::env::temp_dir(), module_id);
    std::fs::write(&path, preview_document(title, html))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
