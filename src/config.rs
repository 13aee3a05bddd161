//! Configuration for lessonforge, read from `.lessonforge/lessonforge.toml`.
//!
//! Layering is file → environment → CLI flags. Every section and key is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! port = 3141
//! db_path = ".lessonforge/lessons.db"
//! dev_mode = false
//!
//! [model]
//! base_url = "https://generativelanguage.googleapis.com/v1beta/openai"
//! model = "gemini-2.0-flash"
//! temperature = 0.7
//! api_key_env = "GEMINI_KEY"
//! request_timeout_secs = 90
//!
//! [pipeline]
//! bounded_retries = 3
//! title_max_chars = 100
//! probe_before_save = true
//! stage_timeout_secs = 120
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::generate::client::ModelSettings;
use crate::pipeline::PipelineSettings;

pub const CONFIG_DIR: &str = ".lessonforge";
pub const CONFIG_FILE: &str = "lessonforge.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Permissive CORS for a separately served frontend
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    3141
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("lessons.db")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            db_path: default_db_path(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSection {
    /// OpenAI-compatible API root; `/chat/completions` is appended
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_api_key_env() -> String {
    "GEMINI_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    90
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Maximum validation attempts before a run is forced to fail
    #[serde(default = "default_bounded_retries")]
    pub bounded_retries: u32,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    /// Render the accepted module once in the sandbox before saving it
    #[serde(default = "default_probe_before_save")]
    pub probe_before_save: bool,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

fn default_bounded_retries() -> u32 {
    3
}

fn default_title_max_chars() -> usize {
    100
}

fn default_probe_before_save() -> bool {
    true
}

fn default_stage_timeout_secs() -> u64 {
    120
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            bounded_retries: default_bounded_retries(),
            title_max_chars: default_title_max_chars(),
            probe_before_save: default_probe_before_save(),
            stage_timeout_secs: default_stage_timeout_secs(),
        }
    }
}

/// Root of `lessonforge.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LessonforgeToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub model: ModelSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl LessonforgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse lessonforge.toml")
    }

    /// Load from `<dir>/lessonforge.toml`, or defaults when the file doesn't exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize lessonforge.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Resolve model settings against the process environment.
    pub fn model_settings(&self) -> ModelSettings {
        self.model_settings_with(|key| std::env::var(key).ok())
    }

    /// Resolve model settings with an explicit variable lookup.
    ///
    /// The API key comes from `LESSONFORGE_API_KEY`, then the variable named by
    /// `api_key_env`. `LESSONFORGE_MODEL` and `LESSONFORGE_BASE_URL` override the file.
    pub fn model_settings_with<F>(&self, lookup: F) -> ModelSettings
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        ModelSettings {
            base_url: non_empty("LESSONFORGE_BASE_URL").unwrap_or_else(|| self.model.base_url.clone()),
            model: non_empty("LESSONFORGE_MODEL").unwrap_or_else(|| self.model.model.clone()),
            temperature: self.model.temperature,
            api_key: non_empty("LESSONFORGE_API_KEY").or_else(|| non_empty(&self.model.api_key_env)),
            request_timeout: Duration::from_secs(self.model.request_timeout_secs),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            bounded_retries: self.pipeline.bounded_retries,
            title_max_chars: self.pipeline.title_max_chars,
            probe_before_save: self.pipeline.probe_before_save,
            stage_timeout: Duration::from_secs(self.pipeline.stage_timeout_secs),
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.pipeline.bounded_retries == 0 {
            warnings.push(
                "bounded_retries is 0: every generated module will fail without validation".into(),
            );
        } else if self.pipeline.bounded_retries == 1 {
            warnings.push("bounded_retries is 1: the fixer will never run".into());
        }
        if self.pipeline.title_max_chars == 0 {
            warnings.push("title_max_chars is 0: fallback titles will be empty".into());
        }
        if self.pipeline.stage_timeout_secs == 0 {
            warnings.push("stage_timeout_secs is 0: every model call will time out".into());
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            warnings.push(format!(
                "temperature {} is outside the usual 0.0-2.0 range",
                self.model.temperature
            ));
        }
        if !self.model.base_url.starts_with("http://") && !self.model.base_url.starts_with("https://") {
            warnings.push(format!(
                "base_url '{}' is not an http(s) URL",
                self.model.base_url
            ));
        }
        if self.model.api_key_env.trim().is_empty() {
            warnings.push("api_key_env is empty: only LESSONFORGE_API_KEY will be read".into());
        }

        warnings
    }
}

/// Configuration for one invocation: parsed file plus the directories it came from.
#[derive(Debug, Clone)]
pub struct LessonforgeConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: LessonforgeToml,
}

impl LessonforgeConfig {
    /// Load `.lessonforge/lessonforge.toml` under `project_dir`, plus any `.env` there.
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let _ = dotenvy::from_path(project_dir.join(".env"));
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = LessonforgeToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Database path, resolved against the project directory when relative.
    pub fn db_path(&self, cli_override: Option<&Path>) -> PathBuf {
        let path = cli_override.unwrap_or(&self.toml.server.db_path);
        if path.is_absolute() || path == Path::new(":memory:") {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }
}
