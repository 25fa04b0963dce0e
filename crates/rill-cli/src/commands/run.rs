//! `rill run <path>`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use rill_eval::bytecode::{compile_module, evaluate_module_bytecode, CompileOptions};
use rill_eval::check::check_module;
use rill_eval::treewalk::evaluate_module;

use crate::output;

use super::{load_module, root_context, EVAL_FAILURE};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Module to run (serialized AST)
    pub path: PathBuf,

    /// Use the tree-walking evaluator instead of the bytecode VM
    #[arg(short = 't', long = "tree-walk")]
    pub tree_walk: bool,

    /// Print the compiled bytecode before running
    #[arg(long = "show-bytecode")]
    pub show_bytecode: bool,

    /// Disable bytecode optimization
    #[arg(long = "no-optimization")]
    pub no_optimization: bool,

    /// Grant blanket capabilities instead of the manifest's
    #[arg(long = "fully-trusted")]
    pub fully_trusted: bool,
}

pub fn cmd_run(args: &RunArgs) -> Result<ExitCode> {
    let module = load_module(&args.path)?;
    let ctx = root_context(&module, args.fully_trusted)?;

    if let Err(errors) = check_module(&module, &ctx) {
        for error in errors {
            output::print_error(&format!("check: {error}"));
        }
        return Ok(ExitCode::from(EVAL_FAILURE));
    }

    let options = CompileOptions {
        optimize: !args.no_optimization,
    };

    if args.show_bytecode {
        let program = compile_module(&module, &options)?;
        eprintln!("{}", program.disassemble());
    }

    let result = if args.tree_walk {
        evaluate_module(&module, &ctx)
    } else {
        evaluate_module_bytecode(&module, &ctx, &options)
    };

    match result {
        Ok(outcome) => {
            if let Some(state) = outcome.ctx.state() {
                let printed = state.take_output();
                if !printed.is_empty() {
                    print!("{}", String::from_utf8_lossy(&printed));
                }
            }
            println!("{}", outcome.value);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            match err.assertion() {
                // Assertions keep their pretty form.
                Some(assertion) => output::print_error(&assertion.pretty),
                None => output::print_error(&err.to_string()),
            }
            Ok(ExitCode::from(EVAL_FAILURE))
        }
    }
}
