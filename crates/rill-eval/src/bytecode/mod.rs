//! The lowered instruction form and its executor.
//!
//! The bytecode evaluator preserves the observable semantics of the
//! tree-walker exactly: same permission checks (both go through the builtin
//! registry), same effect recording, same error propagation. The instruction
//! set is an internal contract; only its behavior is stable.

mod compiler;
mod vm;

use std::collections::HashMap;
use std::fmt::Write as _;

use rill_core::value::Value;

use crate::ast::{BinaryOp, PatternExpr, UnaryOp};

pub use compiler::{compile_module, CompileOptions};
pub use vm::evaluate_module_bytecode;

#[derive(Debug, Clone)]
pub enum Instr {
    /// Pushes a constant from the chunk's constant table.
    PushConst(usize),
    PushNil,
    LoadVar(usize),
    DefineVar(usize),
    StoreVar(usize),
    GetProp(usize),
    /// Stack: target, value.
    SetProp(usize),
    /// Stack: target, index.
    Index,
    /// Pops `n` (key, value) pairs pushed in declaration order.
    MakeObject(usize),
    MakeRecord(usize),
    MakeList(usize),
    MakeTuple(usize),
    Binary(BinaryOp),
    Unary(UnaryOp),
    Jump(usize),
    /// Pops a bool; jumps when false.
    JumpIfFalse(usize),
    /// Calls a user function or builtin by name.
    Call { name: usize, argc: usize },
    /// Resolves a named pattern and pushes it as a value.
    ResolvePattern(usize),
    /// Builds the pattern expression and registers it under the name.
    DefinePattern { name: usize, pattern: usize },
    /// Spawns an lthread running another chunk.
    Spawn { name: usize, chunk: usize },
    /// Pops an iterable and pushes a materialized element list.
    MaterializeIter,
    TxStart,
    /// Commits the innermost VM-started transaction if still running.
    TxEnd,
    /// Pops a bool; raises an assertion error when false.
    Assert { message: Option<usize> },
    PushScope,
    PopScope,
    Pop,
    /// Cooperative cancellation check between statements.
    PollCancel,
    Return,
}

/// One compiled body: the module root, a function, or an lthread body.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub consts: Vec<Value>,
    pub names: Vec<String>,
    pub patterns: Vec<PatternExpr>,
    pub instrs: Vec<Instr>,
}

impl Chunk {
    pub(crate) fn add_const(&mut self, value: Value) -> usize {
        self.consts.push(value);
        self.consts.len() - 1
    }

    pub(crate) fn add_name(&mut self, name: &str) -> usize {
        if let Some(index) = self.names.iter().position(|n| n == name) {
            return index;
        }
        self.names.push(name.to_string());
        self.names.len() - 1
    }

    pub(crate) fn add_pattern(&mut self, pattern: PatternExpr) -> usize {
        self.patterns.push(pattern);
        self.patterns.len() - 1
    }

    pub(crate) fn emit(&mut self, instr: Instr) -> usize {
        self.instrs.push(instr);
        self.instrs.len() - 1
    }

    /// Backpatches a jump target.
    pub(crate) fn patch_jump(&mut self, at: usize, target: usize) {
        match &mut self.instrs[at] {
            Instr::Jump(t) | Instr::JumpIfFalse(t) => *t = target,
            other => unreachable!("patching a non-jump instruction {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FnInfo {
    pub chunk: usize,
    pub params: Vec<String>,
}

/// A compiled module: chunk 0 is the root.
#[derive(Debug, Clone, Default)]
pub struct Program {
    pub chunks: Vec<Chunk>,
    pub functions: HashMap<String, FnInfo>,
}

impl Program {
    /// Human-readable listing for `--show-bytecode`.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            let header = if chunk_index == 0 {
                "chunk 0 (root)".to_string()
            } else {
                match self
                    .functions
                    .iter()
                    .find(|(_, info)| info.chunk == chunk_index)
                {
                    Some((name, _)) => format!("chunk {chunk_index} (fn {name})"),
                    None => format!("chunk {chunk_index}"),
                }
            };
            let _ = writeln!(out, "== {header} ==");
            for (i, instr) in chunk.instrs.iter().enumerate() {
                let detail = match instr {
                    Instr::PushConst(c) => format!("PushConst {c} ; {}", chunk.consts[*c]),
                    Instr::LoadVar(n) => format!("LoadVar {} ; {}", n, chunk.names[*n]),
                    Instr::DefineVar(n) => format!("DefineVar {} ; {}", n, chunk.names[*n]),
                    Instr::StoreVar(n) => format!("StoreVar {} ; {}", n, chunk.names[*n]),
                    Instr::GetProp(n) => format!("GetProp {} ; .{}", n, chunk.names[*n]),
                    Instr::SetProp(n) => format!("SetProp {} ; .{}", n, chunk.names[*n]),
                    Instr::Call { name, argc } => {
                        format!("Call {} ; {}({} args)", name, chunk.names[*name], argc)
                    }
                    Instr::ResolvePattern(n) => {
                        format!("ResolvePattern {} ; %{}", n, chunk.names[*n])
                    }
                    Instr::DefinePattern { name, pattern } => {
                        format!("DefinePattern {} {} ; %{}", name, pattern, chunk.names[*name])
                    }
                    Instr::Spawn { name, chunk: c } => {
                        format!("Spawn {} chunk={}", chunk.names[*name], c)
                    }
                    other => format!("{other:?}"),
                };
                let _ = writeln!(out, "{i:04}  {detail}");
            }
        }
        out
    }
}
