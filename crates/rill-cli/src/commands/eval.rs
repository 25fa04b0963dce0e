//! `rill eval <code>`
//!
//! The snippet is the serialized statement list the parser front end emits for
//! one-liners; `-c` prepends a startup module's statements.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use clap::Args;

use rill_eval::ast::{Module, Node};
use rill_eval::bytecode::{evaluate_module_bytecode, CompileOptions};
use rill_eval::treewalk::evaluate_module;

use crate::output;

use super::{load_module, root_context, EVAL_FAILURE};

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Startup module evaluated before the snippet
    #[arg(short = 'c', long = "startup")]
    pub startup: Option<PathBuf>,

    /// Serialized statements to evaluate
    pub code: String,

    /// Use the tree-walking evaluator instead of the bytecode VM
    #[arg(short = 't', long = "tree-walk")]
    pub tree_walk: bool,
}

pub fn cmd_eval(args: &EvalArgs) -> Result<ExitCode> {
    let statements: Vec<Node> =
        serde_json::from_str(&args.code).context("code is not a serialized statement list")?;

    let mut all_statements = Vec::new();
    if let Some(startup) = &args.startup {
        all_statements.extend(load_module(startup)?.statements);
    }
    all_statements.extend(statements);

    let module = Module::new("eval", all_statements);
    let ctx = root_context(&module, true)?;

    let result = if args.tree_walk {
        evaluate_module(&module, &ctx)
    } else {
        evaluate_module_bytecode(&module, &ctx, &CompileOptions::default())
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
            output::print_error(&err.to_string());
            Ok(ExitCode::from(EVAL_FAILURE))
        }
    }
}
