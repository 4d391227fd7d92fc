mod config;

use clap::{Parser, Subcommand};
use config::{AiMode, Config};
use pm_ai::{AiEvaluator, DisabledGenerator, GeminiGenerator, StubGenerator, TextGenerator};
use pm_core::{EvaluationRunner, TaskEvaluator};
use pm_db::{DbStoreFactory, schema};
use pm_events::EventBus;
use pm_serve::AppState;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Parser)]
#[command(name = "pm", about = "Task evaluation service", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "PM_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API and the evaluation worker.
    Serve,
    /// Create or upgrade the database, then exit.
    Migrate,
    /// Print the OpenAPI document.
    Openapi,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Serve => serve(cli.config.as_deref()).await,
        Command::Migrate => migrate(cli.config.as_deref()),
        Command::Openapi => {
            println!("{}", pm_serve::openapi::generate_spec());
            Ok(())
        }
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pm=debug"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let config = Config::load(path)?;
    config.validate()?;
    Ok(config)
}

fn prepare_database(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    schema::open_and_migrate(path)?;
    Ok(())
}

fn migrate(config_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    prepare_database(&config.database.path)?;
    info!(path = %config.database.path.display(), "database migrated");
    Ok(())
}

fn build_generator(config: &Config) -> Result<Arc<dyn TextGenerator>, Box<dyn Error>> {
    let ai = &config.ai;
    let generator: Arc<dyn TextGenerator> = match ai.effective_mode() {
        AiMode::Gemini => Arc::new(GeminiGenerator::new(
            ai.api_key.clone().unwrap_or_default(),
            Some(ai.model.clone()),
            Some(ai.base_url.clone()),
            ai.retry_policy().call_timeout,
        )?),
        AiMode::Stub => Arc::new(StubGenerator),
        AiMode::Disabled => Arc::new(DisabledGenerator),
    };
    Ok(generator)
}

async fn serve(config_path: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let config = load_config(config_path)?;
    let addr = config.socket_addr()?;
    prepare_database(&config.database.path)?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let (queue, receiver) = pm_core::queue::channel();
    let evaluator: Arc<dyn TaskEvaluator> = Arc::new(AiEvaluator::new(
        build_generator(&config)?,
        config.ai.retry_policy(),
    ));
    let runner = Arc::new(EvaluationRunner::new(
        DbStoreFactory::new(config.database.path.clone()),
        event_bus.clone(),
        queue.clone(),
        evaluator,
    ));
    info!(
        mode = ?config.ai.effective_mode(),
        max_attempts = config.ai.max_attempts,
        max_concurrent = config.worker.max_concurrent,
        "evaluation worker configured"
    );

    pm_serve::worker::recover(runner.as_ref())?;
    tokio::spawn(pm_serve::worker::run(
        Arc::clone(&runner),
        receiver,
        config.worker.max_concurrent,
    ));

    let state = AppState::new(config.database.path.clone(), event_bus, queue);
    pm_serve::serve(state, addr).await?;
    Ok(())
}
