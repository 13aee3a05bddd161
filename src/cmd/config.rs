//! Configuration view and validation commands: `lessonforge config`.

use anyhow::Result;

use super::super::ConfigCommands;
use lessonforge::config::{LessonforgeConfig, LessonforgeToml};

fn print_sections(toml: &LessonforgeToml) {
    println!("[server]");
    println!("  port = {}", toml.server.port);
    println!("  db_path = \"{}\"", toml.server.db_path.display());
    println!("  dev_mode = {}", toml.server.dev_mode);
    println!();

    println!("[model]");
    println!("  base_url = \"{}\"", toml.model.base_url);
    println!("  model = \"{}\"", toml.model.model);
    println!("  temperature = {}", toml.model.temperature);
    println!("  api_key_env = \"{}\"", toml.model.api_key_env);
    println!("  request_timeout_secs = {}", toml.model.request_timeout_secs);
    println!();

    println!("[pipeline]");
    println!("  bounded_retries = {}", toml.pipeline.bounded_retries);
    println!("  title_max_chars = {}", toml.pipeline.title_max_chars);
    println!("  probe_before_save = {}", toml.pipeline.probe_before_save);
    println!("  stage_timeout_secs = {}", toml.pipeline.stage_timeout_secs);
    println!();
}

pub fn cmd_config(config: &LessonforgeConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_file();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("lessonforge configuration");
            println!("=========================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No lessonforge.toml found at {}; using defaults.", config_path.display());
            }
            println!();
            print_sections(&config.toml);

            // Effective values after environment overrides
            let model = config.toml.model_settings();
            println!("Effective values (with env overrides):");
            println!("  model = \"{}\"", model.model);
            println!("  base_url = \"{}\"", model.base_url);
            println!(
                "  api_key = {}",
                if model.api_key.is_some() { "set" } else { "missing" }
            );
            println!("  db_path = \"{}\"", config.db_path(None).display());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            if !config_path.exists() {
                println!("No lessonforge.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.toml.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("lessonforge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&config.config_dir)?;
            LessonforgeToml::default().save(&config_path)?;

            println!("Created lessonforge.toml at {}", config_path.display());
            println!();
            println!("Put your model API key in GEMINI_KEY (or LESSONFORGE_API_KEY),");
            println!("for example in a .env file next to .lessonforge/.");
            println!();
        }
    }

    Ok(())
}
