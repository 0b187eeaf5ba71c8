// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use log::{error, info, warn, Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use std::io::Write;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use longform::app_config::{self, Config, OutputFormat, TranslationProvider};
use longform::app_controller::{Controller, TranslateRequest};
use longform::errors::AppError;

/// CLI Wrapper for TranslationProvider to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliTranslationProvider {
    Ollama,
    OpenAI,
    Anthropic,
    Gemini,
    DeepL,
}

impl From<CliTranslationProvider> for TranslationProvider {
    fn from(cli_provider: CliTranslationProvider) -> Self {
        match cli_provider {
            CliTranslationProvider::Ollama => TranslationProvider::Ollama,
            CliTranslationProvider::OpenAI => TranslationProvider::OpenAI,
            CliTranslationProvider::Anthropic => TranslationProvider::Anthropic,
            CliTranslationProvider::Gemini => TranslationProvider::Gemini,
            CliTranslationProvider::DeepL => TranslationProvider::DeepL,
        }
    }
}

/// CLI Wrapper for OutputFormat to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliOutputFormat {
    Text,
    Bilingual,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(cli_format: CliOutputFormat) -> Self {
        match cli_format {
            CliOutputFormat::Text => OutputFormat::Text,
            CliOutputFormat::Bilingual => OutputFormat::Bilingual,
        }
    }
}

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

/// Options shared by every command that reads the configuration
#[derive(clap::Args, Debug, Clone)]
struct CommonArgs {
    /// Configuration file path
    #[arg(short, long = "config", default_value = "conf.json", global = true)]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, global = true)]
    log_level: Option<CliLogLevel>,

    /// Job database path (defaults to the platform data directory)
    #[arg(long = "database", value_name = "PATH", env = "LONGFORM_DATABASE", global = true)]
    database_path: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct TranslateArgs {
    /// Text file to translate
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file (defaults to <stem>.<target>.txt next to the input)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Force overwrite of an existing output file
    #[arg(short, long)]
    force_overwrite: bool,

    /// Translation provider to use
    #[arg(short, long, value_enum)]
    provider: Option<CliTranslationProvider>,

    /// Model name to use for translation
    #[arg(short, long)]
    model: Option<String>,

    /// Source language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    source_language: Option<String>,

    /// Target language code (e.g., 'en', 'es', 'fr')
    #[arg(short, long)]
    target_language: Option<String>,

    /// Maximum estimated size of a chunk
    #[arg(long, value_name = "N")]
    max_unit_size: Option<usize>,

    /// Output layout: translated text, or source and translation sentence by sentence
    #[arg(long, value_enum)]
    format: Option<CliOutputFormat>,

    /// Ask the provider to judge each translated chunk
    #[arg(long)]
    validate: bool,

    /// Use a mock provider and an in-memory store; nothing is sent or persisted
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Translate a text file, resuming an unfinished job for the same document
    Translate(TranslateArgs),

    /// Show the progress of a job
    Status {
        /// Job identifier
        job_id: String,
    },

    /// List recent jobs
    Jobs {
        /// Maximum number of jobs to show
        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },

    /// Generate shell completions for longform
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// longform - chunked translation of long documents with AI
#[derive(Parser, Debug)]
#[command(name = "longform")]
#[command(version)]
#[command(about = "Translate long documents chunk by chunk with AI providers")]
#[command(long_about = "longform splits a long document into chunks, translates them one by one and
stores every finished chunk, so an interrupted run resumes where it stopped.

EXAMPLES:
    longform translate book.txt                     # Translate using default config
    longform translate -t ko book.txt               # Translate into Korean
    longform translate -p openai -m gpt-4o book.txt # Use specific provider and model
    longform translate --dry-run book.txt           # Exercise the pipeline without a provider
    longform translate --format bilingual book.txt  # Write source and translation side by side
    longform translate --validate book.txt          # Judge each translated chunk
    longform jobs                                   # List recent jobs
    longform status 3f2a...                         # Show a job's progress
    longform completions bash > longform.bash       # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config. If the config file doesn't exist, a default one
    will be created automatically.

SUPPORTED PROVIDERS:
    ollama    - Local Ollama server
    openai    - OpenAI API (requires API key)
    anthropic - Anthropic API (requires API key)
    gemini    - Google Gemini API (requires API key)
    deepl     - DeepL API (requires API key)")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    common: CommonArgs,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        // The logger itself accepts everything; `log::set_max_level` filters
        let logger = Box::new(CustomLogger::new(LevelFilter::Trace));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: Symbol and ANSI colour for a log level
    fn style_for_level(level: Level) -> (&'static str, &'static str) {
        match level {
            Level::Error => ("✖", "\x1B[1;31m"),
            Level::Warn => ("▲", "\x1B[1;33m"),
            Level::Info => ("•", "\x1B[1;32m"),
            Level::Debug => ("◦", "\x1B[1;36m"),
            Level::Trace => ("·", "\x1B[1;35m"),
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level && metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%H:%M:%S.%3f");
            let (symbol, colour) = Self::style_for_level(record.level());

            let mut stderr = std::io::stderr();
            let _ = writeln!(stderr, "{}{} {} {}\x1B[0m", colour, now, symbol, record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = CustomLogger::init(LevelFilter::Info) {
        eprintln!("Failed to initialize logger: {}", e);
    }

    let cli = CommandLineOptions::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        let code = match e.downcast_ref::<AppError>() {
            Some(AppError::Config(_)) => 2,
            _ => 1,
        };
        std::process::exit(code);
    }
}

async fn run(cli: CommandLineOptions) -> Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = CommandLineOptions::command();
        generate(*shell, &mut cmd, "longform", &mut std::io::stdout());
        return Ok(());
    }

    // A level given on the command line applies before the config is read
    if let Some(level) = &cli.common.log_level {
        let level: app_config::LogLevel = level.clone().into();
        log::set_max_level(level.to_level_filter());
    }

    let mut config = load_config(&cli.common)?;

    match cli.command {
        Commands::Translate(args) => {
            apply_translate_overrides(&mut config, &args);
            config
                .validate()
                .map_err(|e| AppError::Config(format!("{:#}", e)))?;
            run_translate(config, args).await
        }
        Commands::Status { job_id } => {
            let controller = Controller::with_config(config)?;
            let report = controller.status(&job_id).await?;
            println!("{}", report);
            Ok(())
        }
        Commands::Jobs { limit } => {
            let controller = Controller::with_config(config)?;
            let jobs = controller.jobs(limit).await?;
            if jobs.is_empty() {
                println!("No jobs yet");
            }
            for job in jobs {
                let total = job
                    .total_chunks
                    .map(|t| t.to_string())
                    .unwrap_or_else(|| "?".to_string());
                println!(
                    "{}  {:<11}  {:>5} chunks  {} -> {} ({})  {}",
                    job.id, job.status, total, job.provider, job.target_language, job.model, job.updated_at
                );
            }
            Ok(())
        }
        Commands::Completions { .. } => Ok(()),
    }
}

/// Load or create the configuration file and apply the options every command shares
fn load_config(common: &CommonArgs) -> Result<Config> {
    let (mut config, created) = Config::load_or_create(&common.config_path)
        .map_err(|e| AppError::Config(format!("{:#}", e)))?;
    if created {
        warn!(
            "Config file not found at '{}', created a default config.",
            common.config_path.display()
        );
    }

    if let Some(level) = &common.log_level {
        config.log_level = level.clone().into();
    } else {
        log::set_max_level(config.log_level.to_level_filter());
    }

    if let Some(path) = &common.database_path {
        config.storage.database_path = Some(path.clone());
    }

    Ok(config)
}

fn apply_translate_overrides(config: &mut Config, args: &TranslateArgs) {
    if let Some(provider) = &args.provider {
        config.translation.provider = provider.clone().into();
    }
    if let Some(model) = &args.model {
        config.translation.set_model(model.clone());
    }
    if let Some(source_language) = &args.source_language {
        config.source_language = source_language.clone();
    }
    if let Some(target_language) = &args.target_language {
        config.target_language = target_language.clone();
    }
    if let Some(max_unit_size) = args.max_unit_size {
        config.chunking.max_unit_size = max_unit_size;
    }
    if let Some(format) = &args.format {
        config.output_format = format.clone().into();
    }
    if args.validate {
        config.translation.common.validate_translations = true;
    }
}

async fn run_translate(config: Config, args: TranslateArgs) -> Result<()> {
    let controller = Controller::with_config(config)?;

    // Ctrl-C stops dispatching new chunks; committed chunks are kept
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing the current chunk");
            signal_token.cancel();
        }
    });

    let request = TranslateRequest {
        input: args.input,
        output: args.output,
        force_overwrite: args.force_overwrite,
        dry_run: args.dry_run,
    };

    let summary = controller
        .translate_file(&request, &cancel)
        .await
        .with_context(|| format!("Failed to translate {}", request.input.display()))?;

    if let Some(summary) = summary {
        info!(
            "Job {}: {} translated, {} resumed, {} with placeholders",
            summary.job_id,
            summary.outcome.translated_chunks,
            summary.outcome.skipped_chunks,
            summary.outcome.placeholder_chunks
        );
        if !summary.outcome.validations.is_empty() {
            info!(
                "Validation: {} of {} judged chunks passed",
                summary.outcome.validations.len() - summary.outcome.failed_validations().count(),
                summary.outcome.validations.len()
            );
        }
        if summary.outcome.cancelled {
            std::process::exit(130);
        }
    }
    Ok(())
}
