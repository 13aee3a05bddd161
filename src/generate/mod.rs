//! Model-backed generation stages: prompt analysis, authoring, repair, and reply extraction.

pub mod analyzer;
pub mod author;
pub mod client;
pub mod extract;

pub use analyzer::{Analysis, PromptAnalyzer};
pub use author::{AuthoringHints, CodeFixer, CodeGenerator};
pub use client::{HttpModelClient, ModelSettings};
pub use extract::extract_component_code;

use anyhow::Result;
use async_trait::async_trait;

/// Abstraction over the generative model for testability.
/// Real implementation: `HttpModelClient`. Test doubles script replies per call.
#[async_trait]
pub trait ModelService: Send + Sync {
    /// Send a system instruction plus user content, returning the model's free-text reply.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}
