use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use lessonforge::config::LessonforgeConfig;
use lessonforge::logging::{LogConfig, init_logging};

mod cmd;

#[derive(Parser)]
#[command(name = "lessonforge")]
#[command(version, about = "Generate interactive lessons with a model, validate them, render them safely")]
pub struct Cli {
    /// Debug-level logging for lessonforge
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Directory containing .lessonforge/ (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API and event socket
    Serve {
        #[arg(short, long)]
        port: Option<u16>,

        /// Database path (overrides server.db_path)
        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Permissive CORS and bind on all interfaces
        #[arg(long)]
        dev: bool,
    },
    /// Generate one lesson from a topic request and store it
    Generate {
        prompt: String,

        #[arg(long)]
        audience: Option<String>,

        #[arg(long)]
        tone: Option<String>,

        /// Owner reference stored with the lesson
        #[arg(long)]
        owner: Option<String>,

        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Print the final pipeline state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Statically validate a component file (exit code 1 on problems)
    Validate {
        file: PathBuf,

        /// Also load and render the module in the sandbox
        #[arg(long)]
        probe: bool,

        #[arg(long)]
        json: bool,
    },
    /// Render a stored lesson to HTML through the sandbox
    Render {
        /// Lesson id
        #[arg(required_unless_present = "file")]
        id: Option<String>,

        /// Render a local component file instead of a stored lesson
        #[arg(long, conflicts_with = "id")]
        file: Option<PathBuf>,

        #[arg(long)]
        db_path: Option<PathBuf>,

        /// Write a preview page and open it in the browser
        #[arg(long)]
        open: bool,

        #[arg(long)]
        json: bool,
    },
    /// Show, validate or initialize lessonforge.toml
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default lessonforge.toml file
    Init,
}

fn load_config(cli: &Cli) -> Result<LessonforgeConfig> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    LessonforgeConfig::new(project_dir)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_flags(cli.verbose, cli.log_json));

    let ok = match &cli.command {
        Commands::Serve { port, db_path, dev } => {
            let config = load_config(&cli)?;
            cmd::cmd_serve(&config, *port, db_path.clone(), *dev).await?;
            true
        }
        Commands::Generate {
            prompt,
            audience,
            tone,
            owner,
            db_path,
            json,
        } => {
            let config = load_config(&cli)?;
            cmd::cmd_generate(
                &config,
                cmd::generate::GenerateArgs {
                    prompt: prompt.clone(),
                    audience: audience.clone(),
                    tone: tone.clone(),
                    owner: owner.clone(),
                    db_path: db_path.clone(),
                    json: *json,
                },
            )
            .await?
        }
        Commands::Validate { file, probe, json } => cmd::cmd_validate(file, *probe, *json)?,
        Commands::Render {
            id,
            file,
            db_path,
            open,
            json,
        } => {
            let config = load_config(&cli)?;
            let target = match (id, file) {
                (_, Some(path)) => cmd::render::RenderTarget::File(path.clone()),
                (Some(id), None) => cmd::render::RenderTarget::Stored {
                    id: id.clone(),
                    db_path: db_path.clone(),
                },
                (None, None) => anyhow::bail!("Provide a lesson id or --file"),
            };
            cmd::cmd_render(&config, target, *open, *json)?
        }
        Commands::Config { command } => {
            let config = load_config(&cli)?;
            cmd::cmd_config(&config, command.clone())?;
            true
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
