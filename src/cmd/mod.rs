//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `serve`    | `Serve`          |
//! | `generate` | `Generate`       |
//! | `validate` | `Validate`       |
//! | `render`   | `Render`         |
//! | `config`   | `Config`         |

pub mod config;
pub mod generate;
pub mod render;
pub mod serve;
pub mod validate;

pub use config::cmd_config;
pub use generate::cmd_generate;
pub use render::cmd_render;
pub use serve::cmd_serve;
pub use validate::cmd_validate;

use std::sync::Arc;

use anyhow::Result;
use lessonforge::config::LessonforgeConfig;
use lessonforge::generate::{HttpModelClient, ModelService};

/// Production model client from the resolved configuration.
pub(crate) fn model_client(config: &LessonforgeConfig) -> Result<Arc<dyn ModelService>> {
    let settings = config.toml.model_settings();
    if settings.api_key.is_none() {
        tracing::warn!(
            api_key_env = %config.toml.model.api_key_env,
            "No model API key configured; generation requests will fail"
        );
    }
    let client = HttpModelClient::new(settings)?;
    tracing::debug!(endpoint = %client.endpoint(), model = client.model(), "Model client ready");
    Ok(Arc::new(client))
}
