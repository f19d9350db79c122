mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use testgen_core::AppConfig;

#[derive(Parser)]
#[command(name = "testgen")]
#[command(about = "Generate pytest tests for Python code and run them in a sandbox")]
#[command(version)]
pub struct Cli {
    /// Config file (default: $TESTGEN_CONFIG, then ~/.config/testgen/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API (default if no subcommand provided)
    Serve {
        /// Address to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Generate tests for a source file
    Generate {
        /// Python file with the code under test
        code: PathBuf,

        /// What the code is supposed to do
        #[arg(short, long)]
        use_case: String,

        /// Run the generated tests against the code
        #[arg(short, long)]
        run: bool,

        /// Write the tests to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run an existing test file against a source file
    Run {
        /// Python file with the code under test
        code: PathBuf,

        /// pytest file to run against it
        tests: PathBuf,

        /// Wall-clock limit for the run in milliseconds
        #[arg(short, long)]
        timeout_ms: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let guard = logging::init_tracing(cli.verbose, cli.log_file.as_deref());

    let mut config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let passed = match cli.command {
        Some(Commands::Serve { host, port }) => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            commands::serve(config).await.map(|_| true)
        }
        Some(Commands::Generate {
            code,
            use_case,
            run,
            output,
            json,
        }) => commands::generate(config, &code, use_case, run, output.as_deref(), json).await,
        Some(Commands::Run {
            code,
            tests,
            timeout_ms,
            json,
        }) => commands::run(config, &code, &tests, timeout_ms, json).await,
        None => commands::serve(config).await.map(|_| true),
    }?;

    if !passed {
        drop(guard);
        std::process::exit(1);
    }
    Ok(())
}
