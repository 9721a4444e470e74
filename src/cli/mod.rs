//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Run the bundled demo suite on the async test engine
#[derive(Parser, Debug)]
#[command(name = "asyncsuite")]
#[command(version = "0.1.0")]
#[command(about = "Run test groups with async set-up, time limits and selection")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the demo suite
    Run(RunArgs),

    /// List runnable tests
    List(ListArgs),

    /// Show recognised environment variables
    Env,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Selection fragment: #group, #group/test or #group/test(N)
    #[arg(short, long)]
    pub select: Option<String>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Default async set-up limit in milliseconds for groups without one
    #[arg(long)]
    pub set_up_limit_ms: Option<u64>,

    /// Print a progress line after every result change
    #[arg(short, long)]
    pub progress: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Output format (table, json, json-pretty)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "asyncsuite",
            "run",
            "--select",
            "#Arithmetic/sum(1)",
            "--format",
            "csv",
            "--progress",
        ]);
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.select.as_deref(), Some("#Arithmetic/sum(1)"));
                assert_eq!(run_args.format.as_deref(), Some("csv"));
                assert!(run_args.progress);
                assert!(run_args.set_up_limit_ms.is_none());
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let args = Args::parse_from(["asyncsuite", "list", "--log-level", "debug", "-v"]);
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.verbose);
        match args.command {
            Command::List(list_args) => assert_eq!(list_args.format, "table"),
            _ => panic!("Expected List command"),
        }
    }
}
