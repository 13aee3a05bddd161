//! HTTP server command: `lessonforge serve`.

use anyhow::Result;
use std::path::PathBuf;

use lessonforge::config::LessonforgeConfig;
use lessonforge::lessons::{ServerConfig, start_server};

pub async fn cmd_serve(
    config: &LessonforgeConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let server = ServerConfig {
        port: port.unwrap_or(config.toml.server.port),
        db_path: config.db_path(db_path.as_deref()),
        dev_mode: dev || config.toml.server.dev_mode,
    };
    let model = super::model_client(config)?;
    start_server(server, model, config.toml.pipeline_settings()).await
}
