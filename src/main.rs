//! asyncsuite - demo runner for the async test engine
//!
//! Runs a bundled suite of test groups, including groups with an async
//! set-up, and prints the aggregated result.
//!
//! ## Usage
//!
//! ```bash
//! # Run everything
//! asyncsuite run
//!
//! # Run one parameter set of one test, as CSV
//! asyncsuite run --select '#Arithmetic/sum(1)' --format csv
//!
//! # Watch results arrive while async set-ups complete
//! asyncsuite run --progress
//!
//! # List runnable tests
//! asyncsuite list
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::info;

use asyncsuite::config::env::{env_help, EnvConfig};
use asyncsuite::config::EngineConfig;
use asyncsuite::output::{OutputFormat, ResultFormatter};
use asyncsuite::utils::logger::init_logger;

mod cli;
mod demo;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = EngineConfig::default().with_env(&EnvConfig::load())?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.verbose {
        config.log_level = "debug".to_string();
    }

    init_logger(config.level()?);

    match args.command {
        Command::Run(run_args) => run_suite(config, run_args).await?,
        Command::List(list_args) => list_tests(&config, list_args)?,
        Command::Env => {
            println!("Environment Variables:\n");
            println!("{}", env_help());
        }
    }

    Ok(())
}

async fn run_suite(mut config: EngineConfig, args: cli::RunArgs) -> Result<()> {
    if let Some(select) = args.select {
        config.selection = Some(select);
    }
    if let Some(format) = args.format {
        config.output_format = format;
    }
    if let Some(limit) = args.set_up_limit_ms {
        config.default_set_up_time_limit_ms = limit;
    }
    config.validate()?;

    let format = OutputFormat::from_str(&config.output_format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", config.output_format))?;
    let formatter = ResultFormatter::new(format);

    let engine = demo::build_engine(&config);
    if args.progress {
        engine.set_on_result_change(|result| eprintln!("{}", result.summary()));
    }

    info!("Running demo suite (selection: {})", engine.selector());

    let result = engine.run_selected().finished().await;
    println!("{}", formatter.format_result(&result)?);

    Ok(())
}

fn list_tests(config: &EngineConfig, args: cli::ListArgs) -> Result<()> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;
    let engine = demo::build_engine(config);
    let entries = engine.list_tests();

    if format == OutputFormat::Table {
        println!("\nRunnable tests ({} total)\n", entries.len());
    }
    println!("{}", ResultFormatter::new(format).format_listing(&entries)?);

    Ok(())
}
