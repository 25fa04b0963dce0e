//! AST to bytecode lowering.

use rill_core::value::Value;

use crate::ast::{BinaryOp, Literal, Module, Node, NodeKind, UnaryOp};
use crate::error::EvalError;
use crate::treewalk::literal_value;

use super::{Chunk, FnInfo, Instr, Program};

#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Constant folding before lowering. Disabled by `--no-optimization`.
    pub optimize: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self { optimize: true }
    }
}

pub fn compile_module(module: &Module, options: &CompileOptions) -> Result<Program, EvalError> {
    let mut program = Program::default();
    program.chunks.push(Chunk::default());

    let statements: Vec<Node> = if options.optimize {
        module.statements.iter().map(fold_node).collect()
    } else {
        module.statements.clone()
    };

    let mut compiler = Compiler {
        program: &mut program,
        loop_counter: 0,
    };
    compiler.compile_block_value(0, &statements)?;
    compiler.program.chunks[0].emit(Instr::Return);
    Ok(program)
}

struct Compiler<'a> {
    program: &'a mut Program,
    /// Suffix source for desugared loop variables.
    loop_counter: usize,
}

impl Compiler<'_> {
    fn chunk(&mut self, index: usize) -> &mut Chunk {
        &mut self.program.chunks[index]
    }

    fn new_chunk(&mut self) -> usize {
        self.program.chunks.push(Chunk::default());
        self.program.chunks.len() - 1
    }

    /// Compiles a statement block leaving exactly one value on the stack.
    fn compile_block_value(&mut self, chunk: usize, statements: &[Node]) -> Result<(), EvalError> {
        if statements.is_empty() {
            self.chunk(chunk).emit(Instr::PushNil);
            return Ok(());
        }
        let last = statements.len() - 1;
        for (i, statement) in statements.iter().enumerate() {
            self.chunk(chunk).emit(Instr::PollCancel);
            self.compile_node(chunk, statement)?;
            if i < last {
                self.chunk(chunk).emit(Instr::Pop);
            }
        }
        Ok(())
    }

    fn compile_node(&mut self, chunk: usize, node: &Node) -> Result<(), EvalError> {
        match &node.kind {
            NodeKind::Literal(literal) => {
                let value = literal_value(literal).map_err(|e| e.with_span(node.span))?;
                let idx = self.chunk(chunk).add_const(value);
                self.chunk(chunk).emit(Instr::PushConst(idx));
            }
            NodeKind::ObjectLiteral(entries) => {
                for (key, value) in entries {
                    let key_idx = self.chunk(chunk).add_const(Value::Str(key.clone()));
                    self.chunk(chunk).emit(Instr::PushConst(key_idx));
                    self.compile_node(chunk, value)?;
                }
                self.chunk(chunk).emit(Instr::MakeObject(entries.len()));
            }
            NodeKind::RecordLiteral(entries) => {
                for (key, value) in entries {
                    let key_idx = self.chunk(chunk).add_const(Value::Str(key.clone()));
                    self.chunk(chunk).emit(Instr::PushConst(key_idx));
                    self.compile_node(chunk, value)?;
                }
                self.chunk(chunk).emit(Instr::MakeRecord(entries.len()));
            }
            NodeKind::ListLiteral(elements) => {
                for element in elements {
                    self.compile_node(chunk, element)?;
                }
                self.chunk(chunk).emit(Instr::MakeList(elements.len()));
            }
            NodeKind::TupleLiteral(elements) => {
                for element in elements {
                    self.compile_node(chunk, element)?;
                }
                self.chunk(chunk).emit(Instr::MakeTuple(elements.len()));
            }
            NodeKind::Variable(name) => {
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::LoadVar(name_idx));
            }
            NodeKind::Let { name, value } => {
                self.compile_node(chunk, value)?;
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::DefineVar(name_idx));
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::Assign { name, value } => {
                self.compile_node(chunk, value)?;
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::StoreVar(name_idx));
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::Property { target, name } => {
                self.compile_node(chunk, target)?;
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::GetProp(name_idx));
            }
            NodeKind::SetProperty {
                target,
                name,
                value,
            } => {
                self.compile_node(chunk, target)?;
                self.compile_node(chunk, value)?;
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::SetProp(name_idx));
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::Index { target, index } => {
                self.compile_node(chunk, target)?;
                self.compile_node(chunk, index)?;
                self.chunk(chunk).emit(Instr::Index);
            }
            NodeKind::Binary { op, left, right } => {
                self.compile_binary(chunk, *op, left, right)?;
            }
            NodeKind::Unary { op, operand } => {
                self.compile_node(chunk, operand)?;
                self.chunk(chunk).emit(Instr::Unary(*op));
            }
            NodeKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.compile_node(chunk, condition)?;
                let to_else = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.chunk(chunk).emit(Instr::PushScope);
                self.compile_block_value(chunk, then_branch)?;
                self.chunk(chunk).emit(Instr::PopScope);
                let to_end = self.chunk(chunk).emit(Instr::Jump(0));
                let else_target = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_else, else_target);
                match else_branch {
                    Some(else_branch) => {
                        self.chunk(chunk).emit(Instr::PushScope);
                        self.compile_block_value(chunk, else_branch)?;
                        self.chunk(chunk).emit(Instr::PopScope);
                    }
                    None => {
                        self.chunk(chunk).emit(Instr::PushNil);
                    }
                }
                let end = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_end, end);
            }
            NodeKind::While { condition, body } => {
                let start = self.chunk(chunk).instrs.len();
                self.chunk(chunk).emit(Instr::PollCancel);
                self.compile_node(chunk, condition)?;
                let to_end = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.chunk(chunk).emit(Instr::PushScope);
                self.compile_block_value(chunk, body)?;
                self.chunk(chunk).emit(Instr::Pop);
                self.chunk(chunk).emit(Instr::PopScope);
                self.chunk(chunk).emit(Instr::Jump(start));
                let end = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_end, end);
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::ForIn {
                variable,
                iterable,
                body,
            } => {
                // Desugared to an index-based loop over a materialized list.
                self.loop_counter += 1;
                let iter_var = format!("__iter{}", self.loop_counter);
                let index_var = format!("__i{}", self.loop_counter);

                self.compile_node(chunk, iterable)?;
                self.chunk(chunk).emit(Instr::MaterializeIter);
                let iter_idx = self.chunk(chunk).add_name(&iter_var);
                self.chunk(chunk).emit(Instr::DefineVar(iter_idx));
                let zero = self.chunk(chunk).add_const(Value::Int(0));
                self.chunk(chunk).emit(Instr::PushConst(zero));
                let index_idx = self.chunk(chunk).add_name(&index_var);
                self.chunk(chunk).emit(Instr::DefineVar(index_idx));

                let len_name = self.chunk(chunk).add_name("len");
                let var_idx = self.chunk(chunk).add_name(variable);
                let one = self.chunk(chunk).add_const(Value::Int(1));

                let start = self.chunk(chunk).instrs.len();
                self.chunk(chunk).emit(Instr::PollCancel);
                self.chunk(chunk).emit(Instr::LoadVar(index_idx));
                self.chunk(chunk).emit(Instr::LoadVar(iter_idx));
                self.chunk(chunk).emit(Instr::Call {
                    name: len_name,
                    argc: 1,
                });
                self.chunk(chunk).emit(Instr::Binary(BinaryOp::Lt));
                let to_end = self.chunk(chunk).emit(Instr::JumpIfFalse(0));

                self.chunk(chunk).emit(Instr::PushScope);
                self.chunk(chunk).emit(Instr::LoadVar(iter_idx));
                self.chunk(chunk).emit(Instr::LoadVar(index_idx));
                self.chunk(chunk).emit(Instr::Index);
                self.chunk(chunk).emit(Instr::DefineVar(var_idx));
                self.compile_block_value(chunk, body)?;
                self.chunk(chunk).emit(Instr::Pop);
                self.chunk(chunk).emit(Instr::PopScope);

                self.chunk(chunk).emit(Instr::LoadVar(index_idx));
                self.chunk(chunk).emit(Instr::PushConst(one));
                self.chunk(chunk).emit(Instr::Binary(BinaryOp::Add));
                self.chunk(chunk).emit(Instr::StoreVar(index_idx));
                self.chunk(chunk).emit(Instr::Jump(start));

                let end = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_end, end);
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::FnDecl { name, params, body } => {
                let fn_chunk = self.new_chunk();
                self.compile_block_value(fn_chunk, body)?;
                self.chunk(fn_chunk).emit(Instr::Return);
                self.program.functions.insert(
                    name.clone(),
                    FnInfo {
                        chunk: fn_chunk,
                        params: params.clone(),
                    },
                );
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::Call { callee, args } => {
                for arg in args {
                    self.compile_node(chunk, arg)?;
                }
                let name_idx = self.chunk(chunk).add_name(callee);
                self.chunk(chunk).emit(Instr::Call {
                    name: name_idx,
                    argc: args.len(),
                });
            }
            NodeKind::PatternDef { name, pattern } => {
                let name_idx = self.chunk(chunk).add_name(name);
                let pattern_idx = self.chunk(chunk).add_pattern(pattern.clone());
                self.chunk(chunk).emit(Instr::DefinePattern {
                    name: name_idx,
                    pattern: pattern_idx,
                });
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::PatternIdent(name) => {
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::ResolvePattern(name_idx));
            }
            NodeKind::Spawn { name, body } => {
                let body_chunk = self.new_chunk();
                self.compile_block_value(body_chunk, body)?;
                self.chunk(body_chunk).emit(Instr::Return);
                let name_idx = self.chunk(chunk).add_name(name);
                self.chunk(chunk).emit(Instr::Spawn {
                    name: name_idx,
                    chunk: body_chunk,
                });
            }
            NodeKind::TxBlock { body } => {
                self.chunk(chunk).emit(Instr::TxStart);
                self.chunk(chunk).emit(Instr::PushScope);
                self.compile_block_value(chunk, body)?;
                self.chunk(chunk).emit(Instr::PopScope);
                self.chunk(chunk).emit(Instr::TxEnd);
            }
            NodeKind::Assert { condition, message } => {
                self.compile_node(chunk, condition)?;
                let message_idx = message
                    .as_ref()
                    .map(|m| self.chunk(chunk).add_const(Value::Str(m.clone())));
                self.chunk(chunk).emit(Instr::Assert {
                    message: message_idx,
                });
                self.chunk(chunk).emit(Instr::PushNil);
            }
            NodeKind::Return(value) => {
                match value {
                    Some(value) => self.compile_node(chunk, value)?,
                    None => {
                        self.chunk(chunk).emit(Instr::PushNil);
                    }
                }
                self.chunk(chunk).emit(Instr::Return);
            }
        }
        Ok(())
    }

    /// Short-circuiting lowering for `and`/`or`; plain binary otherwise.
    fn compile_binary(
        &mut self,
        chunk: usize,
        op: BinaryOp,
        left: &Node,
        right: &Node,
    ) -> Result<(), EvalError> {
        if !matches!(op, BinaryOp::And | BinaryOp::Or) {
            self.compile_node(chunk, left)?;
            self.compile_node(chunk, right)?;
            self.chunk(chunk).emit(Instr::Binary(op));
            return Ok(());
        }

        let true_const = self.chunk(chunk).add_const(Value::Bool(true));
        let false_const = self.chunk(chunk).add_const(Value::Bool(false));

        match op {
            BinaryOp::And => {
                self.compile_node(chunk, left)?;
                let to_false = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.compile_node(chunk, right)?;
                let to_false2 = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.chunk(chunk).emit(Instr::PushConst(true_const));
                let to_end = self.chunk(chunk).emit(Instr::Jump(0));
                let false_target = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_false, false_target);
                self.chunk(chunk).patch_jump(to_false2, false_target);
                self.chunk(chunk).emit(Instr::PushConst(false_const));
                let end = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_end, end);
            }
            BinaryOp::Or => {
                self.compile_node(chunk, left)?;
                let left_false = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.chunk(chunk).emit(Instr::PushConst(true_const));
                let to_end = self.chunk(chunk).emit(Instr::Jump(0));
                let try_right = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(left_false, try_right);
                self.compile_node(chunk, right)?;
                let right_false = self.chunk(chunk).emit(Instr::JumpIfFalse(0));
                self.chunk(chunk).emit(Instr::PushConst(true_const));
                let to_end2 = self.chunk(chunk).emit(Instr::Jump(0));
                let false_target = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(right_false, false_target);
                self.chunk(chunk).emit(Instr::PushConst(false_const));
                let end = self.chunk(chunk).instrs.len();
                self.chunk(chunk).patch_jump(to_end, end);
                self.chunk(chunk).patch_jump(to_end2, end);
            }
            _ => unreachable!(),
        }
        Ok(())
    }
}

/// AST-level constant folding: arithmetic and comparisons over int literals.
/// Folding never introduces errors; anything that could fail at runtime is
/// left in place.
fn fold_node(node: &Node) -> Node {
    let kind = match &node.kind {
        NodeKind::Binary { op, left, right } => {
            let left = fold_node(left);
            let right = fold_node(right);
            if let (
                NodeKind::Literal(Literal::Int(a)),
                NodeKind::Literal(Literal::Int(b)),
            ) = (&left.kind, &right.kind)
            {
                if let Some(folded) = fold_int_op(*op, *a, *b) {
                    return Node::new(NodeKind::Literal(folded), node.span);
                }
            }
            NodeKind::Binary {
                op: *op,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        NodeKind::Unary { op, operand } => {
            let operand = fold_node(operand);
            if let (UnaryOp::Neg, NodeKind::Literal(Literal::Int(a))) = (op, &operand.kind) {
                if let Some(negated) = a.checked_neg() {
                    return Node::new(NodeKind::Literal(Literal::Int(negated)), node.span);
                }
            }
            NodeKind::Unary {
                op: *op,
                operand: Box::new(operand),
            }
        }
        NodeKind::If {
            condition,
            then_branch,
            else_branch,
        } => NodeKind::If {
            condition: Box::new(fold_node(condition)),
            then_branch: then_branch.iter().map(fold_node).collect(),
            else_branch: else_branch
                .as_ref()
                .map(|b| b.iter().map(fold_node).collect()),
        },
        NodeKind::While { condition, body } => NodeKind::While {
            condition: Box::new(fold_node(condition)),
            body: body.iter().map(fold_node).collect(),
        },
        NodeKind::ForIn {
            variable,
            iterable,
            body,
        } => NodeKind::ForIn {
            variable: variable.clone(),
            iterable: Box::new(fold_node(iterable)),
            body: body.iter().map(fold_node).collect(),
        },
        NodeKind::Let { name, value } => NodeKind::Let {
            name: name.clone(),
            value: Box::new(fold_node(value)),
        },
        NodeKind::Assign { name, value } => NodeKind::Assign {
            name: name.clone(),
            value: Box::new(fold_node(value)),
        },
        NodeKind::Call { callee, args } => NodeKind::Call {
            callee: callee.clone(),
            args: args.iter().map(fold_node).collect(),
        },
        NodeKind::FnDecl { name, params, body } => NodeKind::FnDecl {
            name: name.clone(),
            params: params.clone(),
            body: body.iter().map(fold_node).collect(),
        },
        other => other.clone(),
    };
    Node::new(kind, node.span)
}

fn fold_int_op(op: BinaryOp, a: i64, b: i64) -> Option<Literal> {
    Some(match op {
        BinaryOp::Add => Literal::Int(a.checked_add(b)?),
        BinaryOp::Sub => Literal::Int(a.checked_sub(b)?),
        BinaryOp::Mul => Literal::Int(a.checked_mul(b)?),
        BinaryOp::Lt => Literal::Bool(a < b),
        BinaryOp::LtEq => Literal::Bool(a <= b),
        BinaryOp::Gt => Literal::Bool(a > b),
        BinaryOp::GtEq => Literal::Bool(a >= b),
        BinaryOp::Eq => Literal::Bool(a == b),
        BinaryOp::NotEq => Literal::Bool(a != b),
        // Division can fail; leave it to the evaluator.
        _ => return None,
    })
}
