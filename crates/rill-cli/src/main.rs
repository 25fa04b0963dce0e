mod commands;
mod output;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::check::CheckArgs;
use commands::eval::EvalArgs;
use commands::run::RunArgs;

#[derive(Parser, Debug)]
#[command(name = "rill", version, about = "The rill language runtime")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a module
    Run(RunArgs),

    /// Statically check a module without running it
    Check(CheckArgs),

    /// Evaluate a snippet
    #[command(alias = "e")]
    Eval(EvalArgs),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Invalid command-line input exits with 1; evaluation failures use 2.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            // --help and --version land here too; only real errors are 1.
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            return ExitCode::from(code);
        }
    };
    let result = match cli.command {
        Command::Run(args) => commands::run::cmd_run(&args),
        Command::Check(args) => commands::check::cmd_check(&args),
        Command::Eval(args) => commands::eval::cmd_eval(&args),
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            output::print_error(&format!("{err:#}"));
            ExitCode::from(1)
        }
    }
}
