//! One-shot generation command: `lessonforge generate <prompt>`.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use lessonforge::config::LessonforgeConfig;
use lessonforge::lessons::{DbHandle, LessonDb};
use lessonforge::pipeline::{LessonRequest, Orchestrator, Phase};

pub struct GenerateArgs {
    pub prompt: String,
    pub audience: Option<String>,
    pub tone: Option<String>,
    pub owner: Option<String>,
    pub db_path: Option<PathBuf>,
    pub json: bool,
}

/// Returns whether the run completed.
pub async fn cmd_generate(config: &LessonforgeConfig, args: GenerateArgs) -> Result<bool> {
    if args.prompt.trim().is_empty() {
        anyhow::bail!("Prompt must not be empty");
    }
    let db_path = config.db_path(args.db_path.as_deref());
    let db = LessonDb::new(&db_path)
        .with_context(|| format!("Failed to open lesson database at {}", db_path.display()))?;
    let model = super::model_client(config)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let orchestrator = Orchestrator::new(
        model,
        Arc::new(DbHandle::new(db)),
        config.toml.pipeline_settings(),
    )
    .with_cancellation(cancel);
    let request = LessonRequest {
        prompt: args.prompt.trim().to_string(),
        audience: args.audience,
        tone: args.tone,
        owner: args.owner,
    };
    let state = orchestrator.run(request).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(state.phase == Phase::Completed);
    }

    println!();
    match state.phase {
        Phase::Completed => {
            println!("Lesson created: {}", state.title);
            if let Some(id) = &state.record_id {
                println!("  id:       {}", id);
            }
            println!("  attempts: {}", state.attempt + 1);
            println!("  database: {}", db_path.display());
            for diagnostic in &state.diagnostics {
                println!("  note:     {}", diagnostic);
            }
        }
        Phase::Rejected => {
            println!(
                "Request rejected: {}",
                state.failure_reason.as_deref().unwrap_or("not a learning topic")
            );
        }
        _ => {
            println!(
                "Generation failed: {}",
                state.failure_reason.as_deref().unwrap_or("unknown error")
            );
            for violation in &state.violations {
                println!("  - {}", violation);
            }
        }
    }
    println!();
    Ok(state.phase == Phase::Completed)
}
