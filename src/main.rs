//! zcode-runner
//!
//! Runs practice code locally (JavaScript) or through the Piston execution
//! service, and serves the AI challenge tools over MCP.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use zcode_runner::{
    ai::GeminiClient,
    backend::PistonClient,
    config::Config,
    dispatch::{ExecutionRequest, Executor},
    mcp::{self, PracticeServer},
    score::PointsStore,
};

#[derive(Parser, Debug)]
#[command(name = "zcode-runner")]
#[command(about = "Coding-practice runner with sandboxed execution and AI challenges")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// JSON configuration file (defaults to `ZCODE_CONFIG` or built-in defaults)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the practice tools over MCP
    Serve {
        /// Run in stdio mode (for MCP clients)
        #[arg(long)]
        stdio: bool,
    },
    /// Run a source file and print its output
    Run {
        /// Language identifier (javascript, python, typescript, cpp, java)
        #[arg(long, short)]
        language: String,

        /// Source file, or `-` for stdin
        file: PathBuf,
    },
    /// Print the points earned so far
    Points,
}

fn read_source(file: &Path) -> Result<String> {
    if file.as_os_str() == "-" {
        let mut source = String::new();
        std::io::stdin()
            .read_to_string(&mut source)
            .context("Failed to read source from stdin")?;
        Ok(source)
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read source file {}", file.display()))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP and program output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    info!(
        piston_url = %config.piston_url,
        ai_enabled = config.gemini.is_some(),
        "Loaded configuration"
    );

    let executor = Executor::new(
        config.javascript,
        PistonClient::new(&config.piston_url, config.request_timeout()),
    );
    let points = PointsStore::new(&config.points_file);

    match args.command {
        Command::Serve { stdio } => {
            if !stdio {
                anyhow::bail!("Only --stdio mode is currently supported");
            }
            let gemini = config.gemini.as_ref().map(GeminiClient::from_config);
            mcp::serve_stdio(PracticeServer::new(executor, gemini, points)).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Run { language, file } => {
            let source = read_source(&file)?;
            let request = ExecutionRequest::new(language, &source)?;
            let result = executor.run(&request).await;
            println!("{}", result.output);
            Ok(if result.is_error {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Points => {
            println!("Points: {}", points.total());
            Ok(ExitCode::SUCCESS)
        }
    }
}
