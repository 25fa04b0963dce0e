//! The bytecode executor.

use std::collections::HashMap;
use std::sync::Arc;

use rill_core::context::{Context, ContextConfig, GlobalState};
use rill_core::transaction::{Transaction, TransactionOptions};
use rill_core::value::{List, Object, Record, Sharability, Thread, Tuple, Value};

use crate::ast::{Module, UnaryOp};
use crate::builtins::call_builtin;
use crate::error::{AssertionError, EvalError, EvalErrorKind};
use crate::treewalk::{binary_op, build_pattern, index_value, property, ModuleResult};

use super::{compile_module, CompileOptions, Instr, Program};

/// Compiles the module and runs it with the VM. Behavior is observably
/// identical to [`crate::treewalk::evaluate_module`].
pub fn evaluate_module_bytecode(
    module: &Module,
    caller: &Context,
    options: &CompileOptions,
) -> Result<ModuleResult, EvalError> {
    let ctx = match &module.manifest {
        Some(manifest) => manifest.to_manifest().build_context(caller)?,
        None => caller.child(ContextConfig::with_permissions(caller.permissions()))?,
    };
    ctx.set_state(GlobalState::new(&module.name));
    tracing::debug!(module = %module.name, optimize = options.optimize, "compiling module");

    let program = Arc::new(compile_module(module, options)?);
    let value = run_program(&program, &ctx, HashMap::new())?;
    Ok(ModuleResult { value, ctx })
}

fn run_program(
    program: &Arc<Program>,
    ctx: &Context,
    initial_scope: HashMap<String, Value>,
) -> Result<Value, EvalError> {
    let mut vm = Vm {
        program: program.clone(),
        ctx: ctx.clone(),
        frames: vec![initial_scope],
        open_txs: Vec::new(),
    };
    vm.run_chunk(0)
}

struct Vm {
    program: Arc<Program>,
    ctx: Context,
    frames: Vec<HashMap<String, Value>>,
    /// Transactions started by `TxStart`, innermost last.
    open_txs: Vec<Transaction>,
}

impl Vm {
    fn load(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }

    fn define(&mut self, name: &str, value: Value) {
        self.frames
            .last_mut()
            .expect("at least one frame")
            .insert(name.to_string(), value);
    }

    fn store(&mut self, name: &str, value: Value) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    fn flattened(&self) -> HashMap<String, Value> {
        let mut all = HashMap::new();
        for frame in &self.frames {
            for (name, value) in frame {
                all.insert(name.clone(), value.clone());
            }
        }
        all
    }

    /// Runs a chunk and settles whatever an early exit skipped.
    ///
    /// `Instr::Return` leaves `run_chunk_inner` immediately, bypassing any
    /// `TxEnd`/`PopScope` the compiler placed after it. Mirroring the
    /// tree-walker's `tx` block: transactions this invocation started are
    /// committed on a normal exit and rolled back on an error, innermost
    /// first, and scope frames pushed inside the chunk are dropped.
    fn run_chunk(&mut self, chunk_index: usize) -> Result<Value, EvalError> {
        let frame_watermark = self.frames.len();
        let tx_watermark = self.open_txs.len();
        let mut result = self.run_chunk_inner(chunk_index);
        while self.open_txs.len() > tx_watermark {
            let tx = self.open_txs.pop().expect("watermark bounded");
            if tx.is_finished() {
                continue;
            }
            match &result {
                Ok(_) => {
                    if let Err(err) = tx.commit(&self.ctx) {
                        result = Err(err.into());
                    }
                }
                Err(_) => {
                    let _ = tx.rollback(&self.ctx);
                }
            }
        }
        self.frames.truncate(frame_watermark);
        result
    }

    fn run_chunk_inner(&mut self, chunk_index: usize) -> Result<Value, EvalError> {
        let program = self.program.clone();
        let chunk = &program.chunks[chunk_index];
        let mut stack: Vec<Value> = Vec::new();
        let mut ip = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().expect("stack underflow is a compiler bug")
            };
        }

        while ip < chunk.instrs.len() {
            match &chunk.instrs[ip] {
                Instr::PushConst(index) => stack.push(chunk.consts[*index].clone()),
                Instr::PushNil => stack.push(Value::Nil),
                Instr::LoadVar(name) => {
                    let name = &chunk.names[*name];
                    let value = self
                        .load(name)
                        .ok_or_else(|| EvalErrorKind::UnknownVariable(name.clone()))?;
                    stack.push(value);
                }
                Instr::DefineVar(name) => {
                    let value = pop!();
                    let name = chunk.names[*name].clone();
                    self.define(&name, value);
                }
                Instr::StoreVar(name) => {
                    let value = pop!();
                    let name = chunk.names[*name].clone();
                    if !self.store(&name, value) {
                        return Err(EvalErrorKind::UnknownVariable(name).into());
                    }
                }
                Instr::GetProp(name) => {
                    let target = pop!();
                    stack.push(property(&target, &chunk.names[*name])?);
                }
                Instr::SetProp(name) => {
                    let value = pop!();
                    let target = pop!();
                    match target {
                        Value::Object(object) => object.set_prop(&chunk.names[*name], value),
                        other => {
                            return Err(EvalErrorKind::TypeMismatch {
                                expected: "object",
                                actual: other.kind_name(),
                            }
                            .into());
                        }
                    }
                }
                Instr::Index => {
                    let index = pop!();
                    let target = pop!();
                    stack.push(index_value(&target, &index)?);
                }
                Instr::MakeObject(count) => {
                    let mut entries = Vec::with_capacity(*count);
                    for _ in 0..*count {
                        let value = pop!();
                        let key = pop!();
                        entries.push((expect_key(key)?, value));
                    }
                    entries.reverse();
                    stack.push(Value::Object(Object::new(entries)));
                }
                Instr::MakeRecord(count) => {
                    let mut entries = Vec::with_capacity(*count);
                    for _ in 0..*count {
                        let value = pop!();
                        let key = pop!();
                        entries.push((expect_key(key)?, value));
                    }
                    entries.reverse();
                    stack.push(Value::Record(Arc::new(Record::new(entries))));
                }
                Instr::MakeList(count) => {
                    let mut elements = Vec::with_capacity(*count);
                    for _ in 0..*count {
                        elements.push(pop!());
                    }
                    elements.reverse();
                    stack.push(Value::List(List::new(elements)));
                }
                Instr::MakeTuple(count) => {
                    let mut elements = Vec::with_capacity(*count);
                    for _ in 0..*count {
                        elements.push(pop!());
                    }
                    elements.reverse();
                    stack.push(Value::Tuple(Arc::new(Tuple::new(elements))));
                }
                Instr::Binary(op) => {
                    let right = pop!();
                    let left = pop!();
                    stack.push(binary_op(&self.ctx, *op, &left, &right)?);
                }
                Instr::Unary(op) => {
                    let operand = pop!();
                    let value = match (op, operand) {
                        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                        (UnaryOp::Neg, Value::Int(i)) => {
                            Value::Int(i.checked_neg().ok_or(EvalErrorKind::IntOverflow)?)
                        }
                        (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
                        (_, other) => {
                            return Err(EvalErrorKind::TypeMismatch {
                                expected: "bool or number",
                                actual: other.kind_name(),
                            }
                            .into());
                        }
                    };
                    stack.push(value);
                }
                Instr::Jump(target) => {
                    ip = *target;
                    continue;
                }
                Instr::JumpIfFalse(target) => {
                    let condition = pop!();
                    let condition = match condition {
                        Value::Bool(b) => b,
                        other => {
                            return Err(EvalErrorKind::TypeMismatch {
                                expected: "bool",
                                actual: other.kind_name(),
                            }
                            .into());
                        }
                    };
                    if !condition {
                        ip = *target;
                        continue;
                    }
                }
                Instr::Call { name, argc } => {
                    let mut args = Vec::with_capacity(*argc);
                    for _ in 0..*argc {
                        args.push(pop!());
                    }
                    args.reverse();
                    let name = &chunk.names[*name];
                    stack.push(self.call(name, args)?);
                }
                Instr::ResolvePattern(name) => {
                    let name = &chunk.names[*name];
                    let pattern = self
                        .ctx
                        .resolve_named_pattern(name)
                        .ok_or_else(|| EvalErrorKind::UnknownPattern(name.clone()))?;
                    stack.push(Value::Pattern(pattern));
                }
                Instr::DefinePattern { name, pattern } => {
                    let built = build_pattern(&self.ctx, &chunk.patterns[*pattern])?;
                    self.ctx.add_named_pattern(&chunk.names[*name], built)?;
                }
                Instr::Spawn { name, chunk: body } => {
                    stack.push(self.spawn(&chunk.names[*name], *body)?);
                }
                Instr::MaterializeIter => {
                    let iterable = pop!();
                    let elements: Vec<Value> = match iterable {
                        Value::List(list) => list.elements(),
                        Value::Tuple(tuple) => tuple.elements().to_vec(),
                        Value::IntRange(range) => {
                            (range.start..=range.end).map(Value::Int).collect()
                        }
                        other => {
                            return Err(EvalErrorKind::TypeMismatch {
                                expected: "list, tuple or int-range",
                                actual: other.kind_name(),
                            }
                            .into());
                        }
                    };
                    stack.push(Value::List(List::new(elements)));
                }
                Instr::TxStart => {
                    if self.ctx.has_tx() {
                        return Err(
                            rill_core::context::ContextError::AlreadyHasTransaction.into()
                        );
                    }
                    let tx = Transaction::start_new(&self.ctx, TransactionOptions::default());
                    self.open_txs.push(tx);
                }
                Instr::TxEnd => {
                    if let Some(tx) = self.open_txs.pop() {
                        if !tx.is_finished() {
                            tx.commit(&self.ctx)?;
                        }
                    }
                }
                Instr::Assert { message } => {
                    let condition = pop!();
                    let holds = matches!(condition, Value::Bool(true));
                    if !holds {
                        let message = (*message)
                            .map(|index| match &chunk.consts[index] {
                                Value::Str(s) => s.clone(),
                                other => other.to_string(),
                            })
                            .unwrap_or_else(|| "assertion failed".to_string());
                        let pretty = format!("assertion failed:\n\n  {message}\n");
                        return Err(AssertionError::new(message, pretty).into());
                    }
                }
                Instr::PushScope => self.frames.push(HashMap::new()),
                Instr::PopScope => {
                    self.frames.pop();
                }
                Instr::Pop => {
                    let _ = pop!();
                }
                Instr::PollCancel => {
                    if self.ctx.is_cancelled() {
                        return Err(EvalErrorKind::Cancelled.into());
                    }
                }
                Instr::Return => {
                    return Ok(stack.pop().unwrap_or(Value::Nil));
                }
            }
            ip += 1;
        }
        Ok(stack.pop().unwrap_or(Value::Nil))
    }

    fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        if let Some(info) = self.program.functions.get(name).cloned() {
            if info.params.len() != args.len() {
                return Err(EvalErrorKind::Arity {
                    name: name.to_string(),
                    expected: info.params.len(),
                    actual: args.len(),
                }
                .into());
            }
            self.frames.push(HashMap::new());
            for (param, arg) in info.params.iter().zip(args) {
                self.define(param, arg);
            }
            let result = self.run_chunk(info.chunk);
            self.frames.pop();
            return result;
        }
        call_builtin(&self.ctx, name, &args)
    }

    fn spawn(&mut self, name: &str, body_chunk: usize) -> Result<Value, EvalError> {
        self.ctx
            .check_has_permission(&rill_core::permission::Permission::lthread_create())?;
        self.ctx.take_from_limit("lthreads", 1)?;

        let child_ctx = self
            .ctx
            .child(ContextConfig::with_permissions(self.ctx.permissions()))?;

        let mut captured = HashMap::new();
        for (var_name, value) in self.flattened() {
            if value.sharability() == Sharability::Unshared {
                continue;
            }
            captured.insert(var_name, value.clone_value());
        }
        let program = self.program.clone();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut vm = Vm {
                    program,
                    ctx: child_ctx,
                    frames: vec![captured],
                    open_txs: Vec::new(),
                };
                vm.run_chunk(body_chunk).map_err(|e| e.to_string())
            })
            .map_err(|e| EvalError::from(EvalErrorKind::LThread(e.to_string())))?;

        Ok(Value::Thread(Thread::new(name, handle)))
    }
}

fn expect_key(value: Value) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "str",
            actual: other.kind_name(),
        }
        .into()),
    }
}
