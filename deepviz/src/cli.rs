use crate::config::{self, Config, process_env};
use crate::error::{Error, Result};
use crate::logging;
use crate::pipeline::{Mode, Orchestrator};
use crate::util;
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Runs Gemini Deep Research on a prompt and turns the report into an
/// infographic.
#[derive(Debug, Parser)]
#[command(name = config::APP_NAME, version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Default, Args)]
pub struct RunArgs {
    /// Research prompt
    #[arg(short, long, conflicts_with = "file")]
    pub prompt: Option<String>,

    /// Read the prompt from a file
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Output directory (overrides config)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Trace logging, including raw HTTP bodies
    #[arg(long)]
    pub trace: bool,

    /// Skip image generation
    #[arg(long, visible_alias = "no-image", conflicts_with = "image_only")]
    pub research_only: bool,

    /// Skip Deep Research and draw the prompt directly
    #[arg(long)]
    pub image_only: bool,

    /// Image model (overrides config)
    #[arg(long)]
    pub model: Option<String>,

    /// Image aspect ratio, e.g. 16:9 (overrides config)
    #[arg(long)]
    pub aspect_ratio: Option<String>,

    /// Image size, e.g. 2K (overrides config)
    #[arg(long)]
    pub image_size: Option<String>,

    /// Do not open the generated image
    #[arg(long)]
    pub no_open: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Print a shell completion script
    Completion { shell: Shell },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration
    Show,
    /// Write a config.yaml populated with the defaults
    Init {
        #[arg(long)]
        config_dir: Option<PathBuf>,
    },
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(aspect_ratio) = &self.aspect_ratio {
            config.aspect_ratio = aspect_ratio.clone();
        }
        if let Some(image_size) = &self.image_size {
            config.image_size = image_size.clone();
        }
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Some(Command::Config {
            command: ConfigCommand::Show,
        }) => {
            print!("{}", Config::load(None)?.show());
            Ok(())
        }
        Some(Command::Config {
            command: ConfigCommand::Init { config_dir },
        }) => {
            let dir = match config_dir {
                Some(dir) => dir,
                None => config::default_config_dir(&process_env)?,
            };
            let path = Config::defaults(&process_env).save(&dir)?;
            println!("Config file created: {}", path.display());
            Ok(())
        }
        Some(Command::Completion { shell }) => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, config::APP_NAME, &mut std::io::stdout());
            Ok(())
        }
        None => run_pipeline(cli.run).await,
    }
}

async fn run_pipeline(args: RunArgs) -> Result<()> {
    if args.prompt.is_none() && args.file.is_none() {
        return Err(Error::MissingPrompt);
    }

    let mut config = Config::load(None)?;
    args.apply(&mut config);

    let timestamp = util::timestamp();
    config.ensure_directories()?;
    logging::init(
        args.verbose,
        args.trace,
        &config.logs_dir().join(format!("{timestamp}.log")),
    )?;

    let prompt = match (args.prompt, &args.file) {
        (Some(prompt), _) => prompt,
        (None, Some(file)) => util::read_prompt(file)?,
        (None, None) => return Err(Error::MissingPrompt),
    };

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        }
    });

    let mode = Mode::from_flags(args.research_only, args.image_only);
    let summary = Orchestrator::new(config, mode, !args.no_open)
        .run(&prompt, &timestamp, &cancel)
        .await?;

    println!("{summary}");
    Ok(())
}
