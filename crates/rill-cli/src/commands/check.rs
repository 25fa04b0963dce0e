//! `rill check <path>`

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Args;

use rill_eval::check::check_module;

use crate::output;

use super::{load_module, root_context, EVAL_FAILURE};

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Module to check (serialized AST)
    pub path: PathBuf,
}

pub fn cmd_check(args: &CheckArgs) -> Result<ExitCode> {
    let module = load_module(&args.path)?;
    let ctx = root_context(&module, true)?;
    match check_module(&module, &ctx) {
        Ok(()) => {
            println!("ok");
            Ok(ExitCode::SUCCESS)
        }
        Err(errors) => {
            for error in &errors {
                output::print_error(&format!(
                    "{}:{}..{}: {}",
                    args.path.display(),
                    error.span.start,
                    error.span.end,
                    error.message
                ));
            }
            Ok(ExitCode::from(EVAL_FAILURE))
        }
    }
}
