//! The static checker.
//!
//! Runs before evaluation: every property access, builtin call and pattern
//! reference is validated against the symbolic lattice, so a checked module
//! cannot fail on a shape error the lattice can see.

use std::collections::{HashMap, HashSet};

use rill_core::context::Context;
use rill_symbolic::{
    AtomKind, RecTestCallState, RuntimeKind, SymbolicKind, SymbolicSeq, SymbolicValue,
};

use crate::ast::{BinaryOp, Module, Node, NodeKind, PatternExpr, UnaryOp};
use crate::builtins::builtin;
use crate::error::CheckError;
use crate::treewalk::literal_value;

/// Checks a whole module. All diagnostics are collected, not just the first.
pub fn check_module(module: &Module, ctx: &Context) -> Result<(), Vec<CheckError>> {
    let mut checker = Checker {
        ctx,
        env: vec![HashMap::new()],
        functions: HashMap::new(),
        module_patterns: HashSet::new(),
        errors: Vec::new(),
    };
    for statement in &module.statements {
        checker.check_node(statement);
    }
    if checker.errors.is_empty() {
        Ok(())
    } else {
        Err(checker.errors)
    }
}

struct Checker<'a> {
    ctx: &'a Context,
    env: Vec<HashMap<String, SymbolicValue>>,
    functions: HashMap<String, usize>,
    /// Pattern names defined by this module, in addition to the context's.
    module_patterns: HashSet<String>,
    errors: Vec<CheckError>,
}

impl Checker<'_> {
    fn error(&mut self, node: &Node, message: impl Into<String>) {
        self.errors.push(CheckError::new(message, node.span));
    }

    fn lookup(&self, name: &str) -> Option<SymbolicValue> {
        self.env
            .iter()
            .rev()
            .find_map(|frame| frame.get(name).cloned())
    }

    fn define(&mut self, name: &str, value: SymbolicValue) {
        self.env
            .last_mut()
            .expect("at least one frame")
            .insert(name.to_string(), value);
    }

    fn pattern_exists(&self, name: &str) -> bool {
        self.module_patterns.contains(name) || self.ctx.resolve_named_pattern(name).is_some()
    }

    fn check_block(&mut self, statements: &[Node]) -> SymbolicValue {
        self.env.push(HashMap::new());
        let mut last = SymbolicValue::atom(rill_symbolic::Atom::Nil);
        for statement in statements {
            last = self.check_node(statement);
        }
        self.env.pop();
        last
    }

    fn expect_bool(&mut self, node: &Node) {
        let symbolic = self.check_node(node);
        let mut state = RecTestCallState::new();
        let bool_ok = matches!(symbolic.kind(), SymbolicKind::Any)
            || SymbolicValue::any_bool().test(&symbolic, &mut state);
        if !bool_ok {
            self.error(node, format!("expected a boolean condition, got {symbolic}"));
        }
    }

    fn check_node(&mut self, node: &Node) -> SymbolicValue {
        match &node.kind {
            NodeKind::Literal(literal) => match literal_value(literal) {
                Ok(value) => value.to_symbolic(),
                Err(err) => {
                    self.error(node, err.to_string());
                    SymbolicValue::any()
                }
            },
            NodeKind::ObjectLiteral(entries) => {
                let mut map = indexmap::IndexMap::new();
                for (key, value) in entries {
                    let symbolic = self.check_node(value);
                    map.insert(key.clone(), rill_symbolic::SymbolicEntry::required(symbolic));
                }
                SymbolicValue::object(map, false)
            }
            NodeKind::RecordLiteral(entries) => {
                let mut map = indexmap::IndexMap::new();
                for (key, value) in entries {
                    let symbolic = self.check_node(value);
                    map.insert(key.clone(), rill_symbolic::SymbolicEntry::required(symbolic));
                }
                SymbolicValue::record(map)
            }
            NodeKind::ListLiteral(elements) => SymbolicValue::list(SymbolicSeq::Elements(
                elements.iter().map(|e| self.check_node(e)).collect(),
            )),
            NodeKind::TupleLiteral(elements) => SymbolicValue::tuple(SymbolicSeq::Elements(
                elements.iter().map(|e| self.check_node(e)).collect(),
            )),
            NodeKind::Variable(name) => match self.lookup(name) {
                Some(symbolic) => symbolic,
                None => {
                    self.error(node, format!("unknown variable '{name}'"));
                    SymbolicValue::any()
                }
            },
            NodeKind::Let { name, value } => {
                let symbolic = self.check_node(value);
                self.define(name, symbolic);
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::Assign { name, value } => {
                let symbolic = self.check_node(value);
                if self.lookup(name).is_none() {
                    self.error(node, format!("unknown variable '{name}'"));
                } else {
                    // Widen: re-assignment may change the exact value.
                    self.define(name, symbolic.widest_of_type());
                }
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::Property { target, name } => {
                let target_symbolic = self.check_node(target);
                self.check_property(node, &target_symbolic, name)
            }
            NodeKind::SetProperty { target, value, .. } => {
                let target_symbolic = self.check_node(target);
                self.check_node(value);
                let is_object = matches!(
                    target_symbolic.kind(),
                    SymbolicKind::Object { .. } | SymbolicKind::Any
                );
                if !is_object {
                    self.error(
                        node,
                        format!("cannot set a property on {target_symbolic}"),
                    );
                }
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::Index { target, index } => {
                let target_symbolic = self.check_node(target);
                let index_symbolic = self.check_node(index);
                let mut state = RecTestCallState::new();
                if !matches!(index_symbolic.kind(), SymbolicKind::Any)
                    && !SymbolicValue::any_int().test(&index_symbolic, &mut state)
                {
                    self.error(node, format!("index must be an int, got {index_symbolic}"));
                }
                match target_symbolic.kind() {
                    SymbolicKind::List(seq) | SymbolicKind::Tuple(seq) => match seq {
                        SymbolicSeq::Any => SymbolicValue::any(),
                        SymbolicSeq::General(general) => general.clone(),
                        SymbolicSeq::Elements(elements) => {
                            SymbolicValue::union(elements.clone())
                        }
                    },
                    SymbolicKind::Any => SymbolicValue::any(),
                    other => {
                        self.error(node, format!("cannot index into {other:?}"));
                        SymbolicValue::any()
                    }
                }
            }
            NodeKind::Binary { op, left, right } => self.check_binary(node, *op, left, right),
            NodeKind::Unary { op, operand } => {
                let operand_symbolic = self.check_node(operand);
                let mut state = RecTestCallState::new();
                match op {
                    UnaryOp::Not => {
                        if !matches!(operand_symbolic.kind(), SymbolicKind::Any)
                            && !SymbolicValue::any_bool().test(&operand_symbolic, &mut state)
                        {
                            self.error(node, format!("cannot negate {operand_symbolic}"));
                        }
                        SymbolicValue::any_bool()
                    }
                    UnaryOp::Neg => {
                        let numeric = SymbolicValue::any_int().test(&operand_symbolic, &mut state)
                            || SymbolicValue::any_float().test(&operand_symbolic, &mut state)
                            || matches!(operand_symbolic.kind(), SymbolicKind::Any);
                        if !numeric {
                            self.error(node, format!("cannot negate {operand_symbolic}"));
                        }
                        operand_symbolic.widest_of_type()
                    }
                }
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.expect_bool(condition);
                let then_symbolic = self.check_block(then_branch);
                match else_branch {
                    Some(else_branch) => {
                        let else_symbolic = self.check_block(else_branch);
                        SymbolicValue::union(vec![then_symbolic, else_symbolic])
                    }
                    None => SymbolicValue::any(),
                }
            }
            NodeKind::While { condition, body } => {
                self.expect_bool(condition);
                self.check_block(body);
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::ForIn {
                variable,
                iterable,
                body,
            } => {
                let iterable_symbolic = self.check_node(iterable);
                let element = match iterable_symbolic.kind() {
                    SymbolicKind::List(seq) | SymbolicKind::Tuple(seq) => match seq {
                        SymbolicSeq::Any => SymbolicValue::any(),
                        SymbolicSeq::General(general) => general.clone(),
                        SymbolicSeq::Elements(elements) if elements.is_empty() => {
                            SymbolicValue::any()
                        }
                        SymbolicSeq::Elements(elements) => {
                            SymbolicValue::union(elements.clone())
                        }
                    },
                    SymbolicKind::AnyAtom(AtomKind::IntRange)
                    | SymbolicKind::Atom(rill_symbolic::Atom::IntRange(_, _)) => {
                        SymbolicValue::any_int()
                    }
                    SymbolicKind::Any => SymbolicValue::any(),
                    other => {
                        self.error(node, format!("cannot iterate over {other:?}"));
                        SymbolicValue::any()
                    }
                };
                self.env.push(HashMap::new());
                self.define(variable, element);
                for statement in body {
                    self.check_node(statement);
                }
                self.env.pop();
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::FnDecl { name, params, body } => {
                self.functions.insert(name.clone(), params.len());
                self.env.push(HashMap::new());
                for param in params {
                    self.define(param, SymbolicValue::any());
                }
                for statement in body {
                    self.check_node(statement);
                }
                self.env.pop();
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::Call { callee, args } => self.check_call(node, callee, args),
            NodeKind::PatternDef { name, pattern } => {
                self.check_pattern_expr(node, pattern);
                if self.pattern_exists(name) {
                    self.error(node, format!("pattern '%{name}' is already defined"));
                } else {
                    self.module_patterns.insert(name.clone());
                }
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::PatternIdent(name) => {
                if !self.pattern_exists(name) {
                    self.error(node, format!("unknown pattern '%{name}'"));
                }
                SymbolicValue::any_pattern()
            }
            NodeKind::Spawn { body, .. } => {
                // Every free variable the lthread body uses crosses the
                // boundary; the unshared tier cannot.
                let mut used = HashSet::new();
                collect_variables(body, &mut used);
                for name in used {
                    if let Some(symbolic) = self.lookup(&name) {
                        if matches!(
                            symbolic.kind(),
                            SymbolicKind::Runtime(RuntimeKind::HttpServer)
                        ) {
                            self.error(
                                node,
                                format!(
                                    "'{name}' ({symbolic}) cannot be shared with an lthread"
                                ),
                            );
                        }
                    }
                }
                self.check_block(body);
                SymbolicValue::runtime(RuntimeKind::Thread)
            }
            NodeKind::TxBlock { body } => self.check_block(body),
            NodeKind::Assert { condition, .. } => {
                self.expect_bool(condition);
                SymbolicValue::atom(rill_symbolic::Atom::Nil)
            }
            NodeKind::Return(value) => {
                if let Some(value) = value {
                    self.check_node(value);
                }
                SymbolicValue::any()
            }
        }
    }

    fn check_property(
        &mut self,
        node: &Node,
        target: &SymbolicValue,
        name: &str,
    ) -> SymbolicValue {
        match target.kind() {
            SymbolicKind::Object { entries, inexact } => match entries {
                None => SymbolicValue::any(),
                Some(entries) => match entries.get(name) {
                    Some(entry) => entry.value.clone(),
                    None if *inexact => SymbolicValue::any(),
                    None => {
                        self.error(node, format!("{target} has no property '{name}'"));
                        SymbolicValue::any()
                    }
                },
            },
            SymbolicKind::Record { entries } => match entries {
                None => SymbolicValue::any(),
                Some(entries) => match entries.get(name) {
                    Some(entry) => entry.value.clone(),
                    None => {
                        self.error(node, format!("{target} has no property '{name}'"));
                        SymbolicValue::any()
                    }
                },
            },
            SymbolicKind::Runtime(RuntimeKind::FileInfo) => SymbolicValue::any(),
            SymbolicKind::Any => SymbolicValue::any(),
            _ => {
                self.error(
                    node,
                    format!("values of type {target} have no property '{name}'"),
                );
                SymbolicValue::any()
            }
        }
    }

    fn check_binary(
        &mut self,
        node: &Node,
        op: BinaryOp,
        left: &Node,
        right: &Node,
    ) -> SymbolicValue {
        use BinaryOp::*;
        let left_symbolic = self.check_node(left);
        let right_symbolic = self.check_node(right);
        let mut state = RecTestCallState::new();

        let is = |top: &SymbolicValue, v: &SymbolicValue, state: &mut RecTestCallState| {
            matches!(v.kind(), SymbolicKind::Any) || top.test(v, state)
        };

        match op {
            Add | Sub | Mul | Div => {
                let ints = is(&SymbolicValue::any_int(), &left_symbolic, &mut state)
                    && is(&SymbolicValue::any_int(), &right_symbolic, &mut state);
                let floats = is(&SymbolicValue::any_float(), &left_symbolic, &mut state)
                    && is(&SymbolicValue::any_float(), &right_symbolic, &mut state);
                let strings = op == Add
                    && is(&SymbolicValue::any_string(), &left_symbolic, &mut state)
                    && is(&SymbolicValue::any_string(), &right_symbolic, &mut state);
                if !(ints || floats || strings) {
                    self.error(
                        node,
                        format!("invalid operands: {left_symbolic} and {right_symbolic}"),
                    );
                    return SymbolicValue::any();
                }
                if strings {
                    SymbolicValue::any_string()
                } else if floats && !ints {
                    SymbolicValue::any_float()
                } else {
                    left_symbolic.widest_of_type()
                }
            }
            Lt | LtEq | Gt | GtEq => {
                let comparable = (is(&SymbolicValue::any_int(), &left_symbolic, &mut state)
                    && is(&SymbolicValue::any_int(), &right_symbolic, &mut state))
                    || (is(&SymbolicValue::any_float(), &left_symbolic, &mut state)
                        && is(&SymbolicValue::any_float(), &right_symbolic, &mut state));
                if !comparable {
                    self.error(
                        node,
                        format!("cannot compare {left_symbolic} and {right_symbolic}"),
                    );
                }
                SymbolicValue::any_bool()
            }
            Eq | NotEq => SymbolicValue::any_bool(),
            And | Or => {
                for (side, symbolic) in [(left, &left_symbolic), (right, &right_symbolic)] {
                    if !is(&SymbolicValue::any_bool(), symbolic, &mut state) {
                        self.error(side, format!("expected bool, got {symbolic}"));
                    }
                }
                SymbolicValue::any_bool()
            }
            Match => {
                if !matches!(
                    right_symbolic.kind(),
                    SymbolicKind::AnyPattern | SymbolicKind::Any
                ) {
                    self.error(
                        right,
                        format!("right side of 'match' must be a pattern, got {right_symbolic}"),
                    );
                }
                SymbolicValue::any_bool()
            }
        }
    }

    fn check_call(&mut self, node: &Node, callee: &str, args: &[Node]) -> SymbolicValue {
        let arg_symbolics: Vec<SymbolicValue> =
            args.iter().map(|a| self.check_node(a)).collect();

        if let Some(&arity) = self.functions.get(callee) {
            if arity != args.len() {
                self.error(
                    node,
                    format!(
                        "function '{callee}' expects {arity} argument(s), got {}",
                        args.len()
                    ),
                );
            }
            return SymbolicValue::any();
        }

        let Some(builtin) = builtin(callee) else {
            self.error(node, format!("unknown function '{callee}'"));
            return SymbolicValue::any();
        };

        let params = (builtin.params)();
        if !builtin.variadic && params.len() != args.len() {
            self.error(
                node,
                format!(
                    "function '{callee}' expects {} argument(s), got {}",
                    params.len(),
                    args.len()
                ),
            );
            return (builtin.result)();
        }
        for (index, (param, arg)) in params.iter().zip(&arg_symbolics).enumerate() {
            let mut state = RecTestCallState::new();
            let accepted = matches!(arg.kind(), SymbolicKind::Any)
                || param.test(arg, &mut state);
            if !accepted {
                self.error(
                    node,
                    format!(
                        "argument {} of '{callee}': expected {param}, got {arg}",
                        index + 1
                    ),
                );
            }
        }
        (builtin.result)()
    }

    fn check_pattern_expr(&mut self, node: &Node, expr: &PatternExpr) {
        match expr {
            PatternExpr::Named(name) => {
                if !self.pattern_exists(name) {
                    self.error(node, format!("unknown pattern '%{name}'"));
                }
            }
            PatternExpr::Exact(literal) => {
                if let Err(err) = literal_value(literal) {
                    self.error(node, err.to_string());
                }
            }
            PatternExpr::Object { entries, .. } | PatternExpr::Record { entries } => {
                for (_, sub, _) in entries {
                    self.check_pattern_expr(node, sub);
                }
            }
            PatternExpr::ListOf(inner) | PatternExpr::Optional(inner) => {
                self.check_pattern_expr(node, inner);
            }
            PatternExpr::ListElements(elements)
            | PatternExpr::TupleElements(elements)
            | PatternExpr::Union(elements) => {
                for element in elements {
                    self.check_pattern_expr(node, element);
                }
            }
        }
    }
}

/// Variable names referenced anywhere under `nodes`.
fn collect_variables(nodes: &[Node], out: &mut HashSet<String>) {
    for node in nodes {
        collect_node_variables(node, out);
    }
}

fn collect_node_variables(node: &Node, out: &mut HashSet<String>) {
    match &node.kind {
        NodeKind::Variable(name) => {
            out.insert(name.clone());
        }
        NodeKind::Literal(_) | NodeKind::PatternIdent(_) | NodeKind::PatternDef { .. } => {}
        NodeKind::ObjectLiteral(entries) | NodeKind::RecordLiteral(entries) => {
            for (_, value) in entries {
                collect_node_variables(value, out);
            }
        }
        NodeKind::ListLiteral(elements) | NodeKind::TupleLiteral(elements) => {
            collect_variables(elements, out);
        }
        NodeKind::Let { value, .. } | NodeKind::Assign { value, .. } => {
            collect_node_variables(value, out);
        }
        NodeKind::Property { target, .. } => collect_node_variables(target, out),
        NodeKind::SetProperty { target, value, .. } => {
            collect_node_variables(target, out);
            collect_node_variables(value, out);
        }
        NodeKind::Index { target, index } => {
            collect_node_variables(target, out);
            collect_node_variables(index, out);
        }
        NodeKind::Binary { left, right, .. } => {
            collect_node_variables(left, out);
            collect_node_variables(right, out);
        }
        NodeKind::Unary { operand, .. } => collect_node_variables(operand, out),
        NodeKind::If {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_node_variables(condition, out);
            collect_variables(then_branch, out);
            if let Some(else_branch) = else_branch {
                collect_variables(else_branch, out);
            }
        }
        NodeKind::While { condition, body } => {
            collect_node_variables(condition, out);
            collect_variables(body, out);
        }
        NodeKind::ForIn {
            iterable, body, ..
        } => {
            collect_node_variables(iterable, out);
            collect_variables(body, out);
        }
        NodeKind::FnDecl { body, .. } => collect_variables(body, out),
        NodeKind::Call { args, .. } => collect_variables(args, out),
        NodeKind::Spawn { body, .. } => collect_variables(body, out),
        NodeKind::TxBlock { body } => collect_variables(body, out),
        NodeKind::Assert { condition, .. } => collect_node_variables(condition, out),
        NodeKind::Return(value) => {
            if let Some(value) = value {
                collect_node_variables(value, out);
            }
        }
    }
}
