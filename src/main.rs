mod config;
mod error;
mod core {
    pub mod diff;
    pub mod export;
    pub mod extract;
    pub mod normalize;
    pub mod types;
    pub mod workflow;
}
mod ai {
    pub mod agents;
    pub mod client;
    pub mod poll;
    pub mod prompts;
    pub mod schema_utils;
}
mod orchestrator;
mod provision;
mod server;

use ai::agents::AssistantSwarm;
use ai::client::AssistantsClient;
use clap::{Parser, Subcommand};
use config::{ApiSettings, Config};
use dotenv::dotenv;
use orchestrator::Orchestrator;
use server::AppState;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "prompt-lab", version)]
#[command(about = "Engineer, test and refine prompts with hosted assistants", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (the default)
    Serve,

    /// Create the assistants from an instructions file and record their ids
    Provision {
        /// Markdown file with one `## <Role> Assistant` section per assistant
        instructions: PathBuf,

        /// Model the assistants run on
        #[arg(long, default_value = provision::DEFAULT_MODEL)]
        model: String,

        /// Env file that receives the assistant ids
        #[arg(long, default_value = ".env")]
        env_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Provision { instructions, model, env_file }) => {
            run_provision(&instructions, &model, &env_file).await
        }
        Some(Commands::Serve) | None => run_server().await,
    }
}

async fn run_provision(
    instructions: &Path,
    model: &str,
    env_file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let settings = ApiSettings::from_env()?;
    let client = AssistantsClient::new(&settings)?;

    let markdown = tokio::fs::read_to_string(instructions).await?;
    let sections = provision::parse_instruction_sections(&markdown);
    let ids = provision::provision_assistants(&client, &sections, model).await?;

    let existing = match tokio::fs::read_to_string(env_file).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    tokio::fs::write(env_file, provision::merge_env(&existing, &ids)).await?;

    println!("✅ Assistants created and saved to {}", env_file.display());
    println!("   Prompt Engineer: {}", ids.prompt_engineer);
    println!("   Test Generator:  {}", ids.test_generator);
    println!("   Evaluator:       {}", ids.evaluator);
    println!("   Test Executor:   {}", ids.test_executor);
    Ok(())
}

async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ Configuration error: {e}");
            return Err(e.into());
        }
    };
    log::debug!("Loaded {config:?}");

    println!("🤖 PROMPT LAB INITIALIZED");
    println!("🔗 Assistant API: {}", config.api.base_url);

    let client = AssistantsClient::new(&config.api)?;
    let swarm = AssistantSwarm::new(Arc::new(client), config.assistants.clone(), config.poll);
    let state = AppState::new(Orchestrator::new(swarm));

    server::run(state, config.bind_addr).await?;
    Ok(())
}
