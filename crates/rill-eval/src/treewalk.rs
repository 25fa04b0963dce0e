//! The tree-walking evaluator.
//!
//! Dispatches per node kind, consults the context before every privileged
//! operation, records effects into the active transaction (through the
//! builtins), and polls the cancellation token between statements.

use std::collections::HashMap;
use std::sync::Arc;

use rill_core::context::{Context, ContextConfig, GlobalState};
use rill_core::pattern::{EntryPattern, Pattern};
use rill_core::permission::Permission;
use rill_core::transaction::{Transaction, TransactionOptions};
use rill_core::value::{
    Duration, Host, IntRange, List, Object, Path, PathPattern, Record, Sharability, Thread, Tuple,
    Url, Value,
};
use tracing::debug;

use crate::ast::{BinaryOp, Literal, Module, Node, NodeKind, PatternExpr, UnaryOp};
use crate::builtins::call_builtin;
use crate::error::{AssertionError, EvalError, EvalErrorKind};

/// Result of running a module.
pub struct ModuleResult {
    pub value: Value,
    /// The module's execution context; its global state carries the output.
    pub ctx: Context,
}

/// Builds the module context from the manifest (validated against the
/// caller), then evaluates the statements.
pub fn evaluate_module(module: &Module, caller: &Context) -> Result<ModuleResult, EvalError> {
    let ctx = match &module.manifest {
        Some(manifest) => manifest.to_manifest().build_context(caller)?,
        None => caller.child(ContextConfig::with_permissions(caller.permissions()))?,
    };
    ctx.set_state(GlobalState::new(&module.name));
    debug!(module = %module.name, "tree-walk evaluation started");

    let mut walker = TreeWalker::new(ctx.clone());
    let value = walker.eval_statements(&module.statements)?;
    Ok(ModuleResult { value, ctx })
}

#[derive(Debug, Clone)]
struct FnDef {
    params: Vec<String>,
    body: Vec<Node>,
}

#[derive(Debug, Default, Clone)]
struct Scope {
    frames: Vec<HashMap<String, Value>>,
}

impl Scope {
    fn new() -> Self {
        Self {
            frames: vec![HashMap::new()],
        }
    }

    fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn define(&mut self, name: &str, value: Value) {
        self.frames
            .last_mut()
            .expect("at least one frame")
            .insert(name.to_string(), value);
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.frames
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }

    fn assign(&mut self, name: &str, value: Value) -> bool {
        for frame in self.frames.iter_mut().rev() {
            if let Some(slot) = frame.get_mut(name) {
                *slot = value;
                return true;
            }
        }
        false
    }

    /// The visible bindings, innermost shadowing outermost.
    fn flattened(&self) -> HashMap<String, Value> {
        let mut all = HashMap::new();
        for frame in &self.frames {
            for (name, value) in frame {
                all.insert(name.clone(), value.clone());
            }
        }
        all
    }
}

enum Flow {
    Normal(Value),
    Return(Value),
}

pub(crate) struct TreeWalker {
    ctx: Context,
    functions: HashMap<String, FnDef>,
    scope: Scope,
}

impl TreeWalker {
    pub(crate) fn new(ctx: Context) -> Self {
        Self {
            ctx,
            functions: HashMap::new(),
            scope: Scope::new(),
        }
    }

    /// Evaluates a statement block; the value of the last statement is the
    /// block's value.
    pub(crate) fn eval_statements(&mut self, statements: &[Node]) -> Result<Value, EvalError> {
        match self.eval_block(statements)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
        }
    }

    fn eval_block(&mut self, statements: &[Node]) -> Result<Flow, EvalError> {
        let mut last = Value::Nil;
        for statement in statements {
            // Suspension point: between any two statements.
            if self.ctx.is_cancelled() {
                return Err(EvalErrorKind::Cancelled.into());
            }
            match self.eval_node(statement)? {
                Flow::Normal(value) => last = value,
                Flow::Return(value) => return Ok(Flow::Return(value)),
            }
        }
        Ok(Flow::Normal(last))
    }

    fn eval_node(&mut self, node: &Node) -> Result<Flow, EvalError> {
        self.eval_kind(&node.kind)
            .map_err(|e| e.with_span(node.span))
    }

    fn eval_expr(&mut self, node: &Node) -> Result<Value, EvalError> {
        match self.eval_node(node)? {
            Flow::Normal(value) | Flow::Return(value) => Ok(value),
        }
    }

    fn eval_kind(&mut self, kind: &NodeKind) -> Result<Flow, EvalError> {
        let value = match kind {
            NodeKind::Literal(literal) => literal_value(literal)?,
            NodeKind::ObjectLiteral(entries) => {
                let mut evaluated = Vec::with_capacity(entries.len());
                for (key, node) in entries {
                    evaluated.push((key.clone(), self.eval_expr(node)?));
                }
                Value::Object(Object::new(evaluated))
            }
            NodeKind::RecordLiteral(entries) => {
                let mut evaluated = Vec::with_capacity(entries.len());
                for (key, node) in entries {
                    evaluated.push((key.clone(), self.eval_expr(node)?));
                }
                Value::Record(Arc::new(Record::new(evaluated)))
            }
            NodeKind::ListLiteral(elements) => {
                let mut evaluated = Vec::with_capacity(elements.len());
                for element in elements {
                    evaluated.push(self.eval_expr(element)?);
                }
                Value::List(List::new(evaluated))
            }
            NodeKind::TupleLiteral(elements) => {
                let mut evaluated = Vec::with_capacity(elements.len());
                for element in elements {
                    evaluated.push(self.eval_expr(element)?);
                }
                Value::Tuple(Arc::new(Tuple::new(evaluated)))
            }
            NodeKind::Variable(name) => self
                .scope
                .get(name)
                .ok_or_else(|| EvalErrorKind::UnknownVariable(name.clone()))?,
            NodeKind::Let { name, value } => {
                let value = self.eval_expr(value)?;
                self.scope.define(name, value);
                Value::Nil
            }
            NodeKind::Assign { name, value } => {
                let value = self.eval_expr(value)?;
                if !self.scope.assign(name, value) {
                    return Err(EvalErrorKind::UnknownVariable(name.clone()).into());
                }
                Value::Nil
            }
            NodeKind::Property { target, name } => {
                let target = self.eval_expr(target)?;
                property(&target, name)?
            }
            NodeKind::SetProperty {
                target,
                name,
                value,
            } => {
                let target = self.eval_expr(target)?;
                let value = self.eval_expr(value)?;
                match target {
                    Value::Object(object) => {
                        object.set_prop(name, value);
                        Value::Nil
                    }
                    other => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "object",
                            actual: other.kind_name(),
                        }
                        .into());
                    }
                }
            }
            NodeKind::Index { target, index } => {
                let target = self.eval_expr(target)?;
                let index = self.eval_expr(index)?;
                index_value(&target, &index)?
            }
            NodeKind::Binary { op, left, right } => self.eval_binary(*op, left, right)?,
            NodeKind::Unary { op, operand } => {
                let operand = self.eval_expr(operand)?;
                match (op, operand) {
                    (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
                    (UnaryOp::Neg, Value::Int(i)) => Value::Int(
                        i.checked_neg().ok_or(EvalErrorKind::IntOverflow)?,
                    ),
                    (UnaryOp::Neg, Value::Float(x)) => Value::Float(-x),
                    (_, other) => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "bool or number",
                            actual: other.kind_name(),
                        }
                        .into());
                    }
                }
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.expect_bool(condition)?;
                self.scope.push();
                let flow = if condition {
                    self.eval_block(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.eval_block(else_branch)
                } else {
                    Ok(Flow::Normal(Value::Nil))
                };
                self.scope.pop();
                return flow;
            }
            NodeKind::While { condition, body } => {
                loop {
                    if self.ctx.is_cancelled() {
                        return Err(EvalErrorKind::Cancelled.into());
                    }
                    if !self.expect_bool(condition)? {
                        break;
                    }
                    self.scope.push();
                    let flow = self.eval_block(body);
                    self.scope.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
                Value::Nil
            }
            NodeKind::ForIn {
                variable,
                iterable,
                body,
            } => {
                let iterable = self.eval_expr(iterable)?;
                let items: Vec<Value> = match iterable {
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
                for item in items {
                    if self.ctx.is_cancelled() {
                        return Err(EvalErrorKind::Cancelled.into());
                    }
                    self.scope.push();
                    self.scope.define(variable, item);
                    let flow = self.eval_block(body);
                    self.scope.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
                Value::Nil
            }
            NodeKind::FnDecl { name, params, body } => {
                self.functions.insert(
                    name.clone(),
                    FnDef {
                        params: params.clone(),
                        body: body.clone(),
                    },
                );
                Value::Nil
            }
            NodeKind::Call { callee, args } => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval_expr(arg)?);
                }
                self.call(callee, evaluated)?
            }
            NodeKind::PatternDef { name, pattern } => {
                let pattern = build_pattern(&self.ctx, pattern)?;
                self.ctx.add_named_pattern(name, pattern)?;
                Value::Nil
            }
            NodeKind::PatternIdent(name) => {
                let pattern = self
                    .ctx
                    .resolve_named_pattern(name)
                    .ok_or_else(|| EvalErrorKind::UnknownPattern(name.clone()))?;
                Value::Pattern(pattern)
            }
            NodeKind::Spawn { name, body } => self.spawn_lthread(name, body)?,
            NodeKind::TxBlock { body } => {
                if self.ctx.has_tx() {
                    return Err(
                        rill_core::context::ContextError::AlreadyHasTransaction.into()
                    );
                }
                let tx = Transaction::start_new(&self.ctx, TransactionOptions::default());
                self.scope.push();
                let result = self.eval_block(body);
                self.scope.pop();
                match result {
                    Ok(flow) => {
                        // The block may have committed or rolled back itself.
                        if !tx.is_finished() {
                            tx.commit(&self.ctx)?;
                        }
                        return Ok(flow);
                    }
                    Err(err) => {
                        if !tx.is_finished() {
                            let _ = tx.rollback(&self.ctx);
                        }
                        return Err(err);
                    }
                }
            }
            NodeKind::Assert { condition, message } => {
                let holds = self.expect_bool(condition)?;
                if !holds {
                    let message = message
                        .clone()
                        .unwrap_or_else(|| "assertion failed".to_string());
                    let pretty = format!("assertion failed:\n\n  {message}\n");
                    return Err(AssertionError::new(message, pretty).into());
                }
                Value::Nil
            }
            NodeKind::Return(value) => {
                let value = match value {
                    Some(node) => self.eval_expr(node)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(value));
            }
        };
        Ok(Flow::Normal(value))
    }

    fn expect_bool(&mut self, node: &Node) -> Result<bool, EvalError> {
        match self.eval_expr(node)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalErrorKind::TypeMismatch {
                expected: "bool",
                actual: other.kind_name(),
            }
            .into()),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, left: &Node, right: &Node) -> Result<Value, EvalError> {
        // Short-circuiting boolean operators evaluate the right side lazily.
        if matches!(op, BinaryOp::And | BinaryOp::Or) {
            let left = self.expect_bool(left)?;
            return match (op, left) {
                (BinaryOp::And, false) => Ok(Value::Bool(false)),
                (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                _ => Ok(Value::Bool(self.expect_bool(right)?)),
            };
        }

        let left = self.eval_expr(left)?;
        let right = self.eval_expr(right)?;
        binary_op(&self.ctx, op, &left, &right)
    }

    fn call(&mut self, callee: &str, args: Vec<Value>) -> Result<Value, EvalError> {
        if let Some(def) = self.functions.get(callee).cloned() {
            if def.params.len() != args.len() {
                return Err(EvalErrorKind::Arity {
                    name: callee.to_string(),
                    expected: def.params.len(),
                    actual: args.len(),
                }
                .into());
            }
            self.scope.push();
            for (param, arg) in def.params.iter().zip(args) {
                self.scope.define(param, arg);
            }
            let result = self.eval_block(&def.body);
            self.scope.pop();
            return match result? {
                Flow::Normal(value) | Flow::Return(value) => Ok(value),
            };
        }
        call_builtin(&self.ctx, callee, &args)
    }

    /// Spawns an lthread: permission check first, then a child context, then
    /// a thread evaluating `body` over a deep-cloned capture of the scope.
    fn spawn_lthread(&mut self, name: &str, body: &[Node]) -> Result<Value, EvalError> {
        self.ctx.check_has_permission(&Permission::lthread_create())?;
        self.ctx.take_from_limit("lthreads", 1)?;

        let child_ctx = self
            .ctx
            .child(ContextConfig::with_permissions(self.ctx.permissions()))?;

        // Unshared mutables never cross the lthread boundary; sharable values
        // alias once shared, everything else is deep-cloned.
        let mut captured = HashMap::new();
        for (var_name, value) in self.scope.flattened() {
            if value.sharability() == Sharability::Unshared {
                continue;
            }
            captured.insert(var_name, value.clone_value());
        }
        let functions = self.functions.clone();
        let body = body.to_vec();
        debug!(lthread = name, "spawning lthread");

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut walker = TreeWalker {
                    ctx: child_ctx,
                    functions,
                    scope: Scope {
                        frames: vec![captured],
                    },
                };
                walker
                    .eval_statements(&body)
                    .map_err(|e| e.to_string())
            })
            .map_err(|e| EvalError::from(EvalErrorKind::LThread(e.to_string())))?;

        Ok(Value::Thread(Thread::new(name, handle)))
    }
}

/// Materializes a pattern expression against the context's named patterns.
pub(crate) fn build_pattern(ctx: &Context, expr: &PatternExpr) -> Result<Pattern, EvalError> {
    match expr {
        PatternExpr::Named(name) => ctx
            .resolve_named_pattern(name)
            .ok_or_else(|| EvalErrorKind::UnknownPattern(name.clone()).into()),
        PatternExpr::Exact(literal) => Ok(Pattern::exact(literal_value(literal)?)),
        PatternExpr::Object { entries, inexact } => {
            let mut map = indexmap::IndexMap::new();
            for (key, sub, optional) in entries {
                map.insert(
                    key.clone(),
                    EntryPattern {
                        pattern: build_pattern(ctx, sub)?,
                        optional: *optional,
                    },
                );
            }
            Ok(Pattern::object(map, *inexact))
        }
        PatternExpr::Record { entries } => {
            let mut map = indexmap::IndexMap::new();
            for (key, sub, optional) in entries {
                map.insert(
                    key.clone(),
                    EntryPattern {
                        pattern: build_pattern(ctx, sub)?,
                        optional: *optional,
                    },
                );
            }
            Ok(Pattern::record(map))
        }
        PatternExpr::ListOf(inner) => Ok(Pattern::list_of(build_pattern(ctx, inner)?)),
        PatternExpr::ListElements(elements) => Ok(Pattern::list_elements(
            elements
                .iter()
                .map(|e| build_pattern(ctx, e))
                .collect::<Result<_, _>>()?,
        )),
        PatternExpr::TupleElements(elements) => Ok(Pattern::tuple_elements(
            elements
                .iter()
                .map(|e| build_pattern(ctx, e))
                .collect::<Result<_, _>>()?,
        )),
        PatternExpr::Union(members) => Ok(Pattern::union(
            members
                .iter()
                .map(|m| build_pattern(ctx, m))
                .collect::<Result<_, _>>()?,
        )),
        PatternExpr::Optional(inner) => Ok(Pattern::optional(build_pattern(ctx, inner)?)),
    }
}

pub(crate) fn literal_value(literal: &Literal) -> Result<Value, EvalError> {
    let invalid = |e: rill_core::value::PrimitiveError| {
        EvalError::from(EvalErrorKind::Other(e.to_string()))
    };
    Ok(match literal {
        Literal::Nil => Value::Nil,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(x) => Value::Float(*x),
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Rune(r) => Value::Rune(*r),
        Literal::Path(p) => Value::Path(Path::new(p.clone()).map_err(invalid)?),
        Literal::PathPattern(p) => {
            Value::PathPattern(PathPattern::new(p.clone()).map_err(invalid)?)
        }
        Literal::Url(u) => Value::Url(Url::new(u.clone()).map_err(invalid)?),
        Literal::Host(h) => Value::Host(Host::new(h.clone()).map_err(invalid)?),
        Literal::DurationNanos(ns) => Value::Duration(Duration::from_nanos(*ns)),
        Literal::ByteCount(n) => Value::ByteCount(rill_core::value::ByteCount::new(*n)),
        Literal::IntRange(start, end) => Value::IntRange(IntRange::new(*start, *end)),
        Literal::Identifier(name) => Value::Identifier(
            rill_core::value::Identifier::new(name.clone()).map_err(invalid)?,
        ),
    })
}

pub(crate) fn property(target: &Value, name: &str) -> Result<Value, EvalError> {
    let missing = || EvalErrorKind::MissingProperty {
        kind: target.kind_name(),
        name: name.to_string(),
    };
    match target {
        Value::Object(object) => object.prop(name).ok_or_else(missing).map_err(Into::into),
        Value::Record(record) => record.prop(name).cloned().ok_or_else(missing).map_err(Into::into),
        Value::FileInfo(info) => match name {
            "name" => Ok(Value::Str(info.name.clone())),
            "abs-path" => Ok(Value::Path(info.abs_path.clone())),
            "size" => Ok(Value::ByteCount(info.size)),
            "is-dir" => Ok(Value::Bool(info.is_dir)),
            "mod-time" => Ok(Value::Date(info.mod_time)),
            _ => Err(missing().into()),
        },
        _ => Err(missing().into()),
    }
}

pub(crate) fn index_value(target: &Value, index: &Value) -> Result<Value, EvalError> {
    let index = match index {
        Value::Int(i) => *i,
        other => {
            return Err(EvalErrorKind::TypeMismatch {
                expected: "int",
                actual: other.kind_name(),
            }
            .into());
        }
    };
    let (element, len) = match target {
        Value::List(list) => (
            usize::try_from(index).ok().and_then(|i| list.at(i)),
            list.len(),
        ),
        Value::Tuple(tuple) => (
            usize::try_from(index).ok().and_then(|i| tuple.at(i).cloned()),
            tuple.len(),
        ),
        other => {
            return Err(EvalErrorKind::TypeMismatch {
                expected: "list or tuple",
                actual: other.kind_name(),
            }
            .into());
        }
    };
    element.ok_or_else(|| EvalErrorKind::IndexOutOfBounds { index, len }.into())
}

/// Strict binary operator semantics shared with the VM.
pub(crate) fn binary_op(
    ctx: &Context,
    op: BinaryOp,
    left: &Value,
    right: &Value,
) -> Result<Value, EvalError> {
    use BinaryOp::*;
    let type_error = |expected: &'static str, actual: &Value| {
        EvalError::from(EvalErrorKind::TypeMismatch {
            expected,
            actual: actual.kind_name(),
        })
    };
    Ok(match (op, left, right) {
        (Add, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_add(*b).ok_or(EvalErrorKind::IntOverflow)?)
        }
        (Sub, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_sub(*b).ok_or(EvalErrorKind::IntOverflow)?)
        }
        (Mul, Value::Int(a), Value::Int(b)) => {
            Value::Int(a.checked_mul(*b).ok_or(EvalErrorKind::IntOverflow)?)
        }
        (Div, Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(EvalErrorKind::DivisionByZero.into());
            }
            Value::Int(a.checked_div(*b).ok_or(EvalErrorKind::IntOverflow)?)
        }
        (Add, Value::Float(a), Value::Float(b)) => Value::Float(a + b),
        (Sub, Value::Float(a), Value::Float(b)) => Value::Float(a - b),
        (Mul, Value::Float(a), Value::Float(b)) => Value::Float(a * b),
        (Div, Value::Float(a), Value::Float(b)) => Value::Float(a / b),
        (Add, Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
        (Lt, Value::Int(a), Value::Int(b)) => Value::Bool(a < b),
        (LtEq, Value::Int(a), Value::Int(b)) => Value::Bool(a <= b),
        (Gt, Value::Int(a), Value::Int(b)) => Value::Bool(a > b),
        (GtEq, Value::Int(a), Value::Int(b)) => Value::Bool(a >= b),
        (Lt, Value::Float(a), Value::Float(b)) => Value::Bool(a < b),
        (LtEq, Value::Float(a), Value::Float(b)) => Value::Bool(a <= b),
        (Gt, Value::Float(a), Value::Float(b)) => Value::Bool(a > b),
        (GtEq, Value::Float(a), Value::Float(b)) => Value::Bool(a >= b),
        (Eq, a, b) => Value::Bool(a == b),
        (NotEq, a, b) => Value::Bool(a != b),
        (And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
        (Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
        (Match, value, Value::Pattern(pattern)) => Value::Bool(pattern.test(ctx, value)),
        (Match, _, other) => return Err(type_error("pattern", other)),
        (Add | Sub | Mul | Div | Lt | LtEq | Gt | GtEq, a, b) => {
            if matches!(a, Value::Int(_) | Value::Float(_) | Value::Str(_)) {
                return Err(type_error(a.kind_name(), b));
            }
            return Err(type_error("number", a));
        }
        (And | Or, a, _) => return Err(type_error("bool", a)),
    })
}
