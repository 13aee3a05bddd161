//! The generation pipeline: a bounded analyze → generate → validate ⇄ fix → persist loop.

pub mod orchestrator;
pub mod state;
pub mod transition;

pub use orchestrator::Orchestrator;
pub use state::{GenerationState, LessonRequest, Phase};
pub use transition::{Action, max_stages, next_action};

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::lessons::models::{LessonRecord, NewLesson};

/// Tunables for one orchestrator.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Maximum failed validations before the run is forced to fail. Values below 1 act as 1.
    pub bounded_retries: u32,
    pub title_max_chars: usize,
    /// Render the accepted candidate once in the sandbox before persisting it.
    pub probe_before_save: bool,
    /// Upper bound on each model call and on the store write.
    pub stage_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bounded_retries: 3,
            title_max_chars: 100,
            probe_before_save: true,
            stage_timeout: Duration::from_secs(120),
        }
    }
}

/// Durable write of an accepted lesson.
/// Real implementation: `lessons::db::DbHandle`. Tests substitute failing or recording stores.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn save(&self, lesson: NewLesson) -> Result<LessonRecord>;
}
