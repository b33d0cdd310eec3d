use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use talent_deck_lib::core::commands;
use talent_deck_lib::core::models::PipelineRequest;
use talent_deck_lib::core::service::CoreService;

const DEFAULT_LOG_FILTER: &str = "talent_deck=info,talent_deck_lib=info";

#[derive(Parser)]
#[command(name = "talent-deck", version, about = "Match CVs with assessments and build profile decks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Full pipeline: match, generate fields, write the workbook, decks and archive
    Run {
        /// Folder holding CV/assessment PDFs or ZIP archives of them
        #[arg(short, long)]
        input: PathBuf,
        /// Competency spreadsheet (xlsx or csv)
        #[arg(short, long)]
        competency: PathBuf,
        /// Presentation template (pptx) with {{placeholder}} tokens
        #[arg(short, long)]
        template: Option<PathBuf>,
        /// Output folder, defaults to <input>/output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Pair CVs with assessments and print the result as JSON
    Match {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Build decks from an existing results table
    Render {
        #[arg(long)]
        table: PathBuf,
        #[arg(short, long)]
        template: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match execute(cli.command).await {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(message) => {
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Command) -> Result<String, String> {
    match command {
        Command::Run {
            input,
            competency,
            template,
            output,
        } => {
            let core = build_core().await?;
            let outcome = commands::run_pipeline(
                &core,
                PipelineRequest {
                    input_dir: input,
                    competency_path: competency,
                    template_path: template,
                    output_dir: output,
                },
            )
            .await?;
            Ok(commands::outcome_message(&outcome))
        }
        Command::Match { input } => {
            let core = build_core().await?;
            let report = commands::match_documents(&core, &input).await?;
            serde_json::to_string_pretty(&report).map_err(|err| err.to_string())
        }
        Command::Render {
            table,
            template,
            output,
        } => {
            let decks = commands::render_presentations(&table, &template, &output).await?;
            Ok(format!("{} presentations written to {}", decks.len(), output.display()))
        }
    }
}

async fn build_core() -> Result<CoreService, String> {
    CoreService::new()
        .await
        .map_err(|err| commands::user_message(&err))
}
