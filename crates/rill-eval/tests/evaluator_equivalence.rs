//! The tree-walker and the bytecode VM must agree on every observable:
//! results, errors, permission denials and recorded effects.

use rill_core::context::{Context, ContextError};
use rill_core::permission::PermissionError;
use rill_core::value::{Path, Value};
use rill_eval::ast::{build, BinaryOp, Literal, Module, Node, NodeKind, PatternExpr};
use rill_eval::bytecode::{compile_module, evaluate_module_bytecode, CompileOptions};
use rill_eval::error::{EvalError, EvalErrorKind};
use rill_eval::treewalk::evaluate_module;
use rill_testkit::{locked_down_context, permissive_context};

fn run_tree(module: &Module, ctx: &Context) -> Result<Value, EvalError> {
    evaluate_module(module, ctx).map(|r| r.value)
}

fn run_vm(module: &Module, ctx: &Context) -> Result<Value, EvalError> {
    evaluate_module_bytecode(module, ctx, &CompileOptions::default()).map(|r| r.value)
}

/// Runs the module through both evaluators and asserts identical rendering of
/// the outcome (values compare by display form since objects have identity).
fn assert_equivalent(module: &Module) -> String {
    let tree = run_tree(module, &permissive_context());
    let vm = run_vm(module, &permissive_context());
    match (&tree, &vm) {
        (Ok(a), Ok(b)) => {
            assert_eq!(a.to_string(), b.to_string(), "evaluators disagree");
            a.to_string()
        }
        (Err(a), Err(b)) => {
            assert_eq!(a.to_string(), b.to_string(), "evaluator errors disagree");
            format!("error: {a}")
        }
        _ => panic!("one evaluator failed, the other did not: {tree:?} vs {vm:?}"),
    }
}

#[test]
fn arithmetic_and_variables() {
    let module = Module::new(
        "arith",
        vec![
            build::let_("a", build::int(20)),
            build::let_("b", build::int(22)),
            build::binary(BinaryOp::Add, build::variable("a"), build::variable("b")),
        ],
    );
    assert_eq!(assert_equivalent(&module), "42");
}

#[test]
fn string_concatenation() {
    let module = Module::new(
        "strings",
        vec![build::binary(
            BinaryOp::Add,
            build::string("he"),
            build::string("llo"),
        )],
    );
    assert_eq!(assert_equivalent(&module), "\"hello\"");
}

#[test]
fn division_by_zero_is_the_same_error() {
    let module = Module::new(
        "div",
        vec![build::binary(BinaryOp::Div, build::int(1), build::int(0))],
    );
    assert_eq!(assert_equivalent(&module), "error: division by zero");
}

#[test]
fn object_properties() {
    let module = Module::new(
        "objects",
        vec![
            build::let_(
                "user",
                build::object(vec![("name", build::string("ada")), ("age", build::int(36))]),
            ),
            build::property(build::variable("user"), "age"),
        ],
    );
    assert_eq!(assert_equivalent(&module), "36");
}

#[test]
fn missing_property_is_the_same_error() {
    let module = Module::new(
        "objects",
        vec![
            build::let_("user", build::object(vec![("name", build::string("ada"))])),
            build::property(build::variable("user"), "missing"),
        ],
    );
    assert!(assert_equivalent(&module).contains("no property 'missing'"));
}

#[test]
fn while_loop_sum() {
    let module = Module::new(
        "loops",
        vec![
            build::let_("i", build::int(0)),
            build::let_("total", build::int(0)),
            Node::unspanned(NodeKind::While {
                condition: Box::new(build::binary(
                    BinaryOp::Lt,
                    build::variable("i"),
                    build::int(5),
                )),
                body: vec![
                    build::assign(
                        "total",
                        build::binary(BinaryOp::Add, build::variable("total"), build::variable("i")),
                    ),
                    build::assign(
                        "i",
                        build::binary(BinaryOp::Add, build::variable("i"), build::int(1)),
                    ),
                ],
            }),
            build::variable("total"),
        ],
    );
    assert_eq!(assert_equivalent(&module), "10");
}

#[test]
fn for_in_over_int_range() {
    let module = Module::new(
        "ranges",
        vec![
            build::let_("total", build::int(0)),
            Node::unspanned(NodeKind::ForIn {
                variable: "n".into(),
                iterable: Box::new(Node::unspanned(NodeKind::Literal(Literal::IntRange(1, 4)))),
                body: vec![build::assign(
                    "total",
                    build::binary(BinaryOp::Add, build::variable("total"), build::variable("n")),
                )],
            }),
            build::variable("total"),
        ],
    );
    assert_eq!(assert_equivalent(&module), "10");
}

#[test]
fn user_functions() {
    let module = Module::new(
        "functions",
        vec![
            Node::unspanned(NodeKind::FnDecl {
                name: "double".into(),
                params: vec!["x".into()],
                body: vec![build::ret(build::binary(
                    BinaryOp::Mul,
                    build::variable("x"),
                    build::int(2),
                ))],
            }),
            build::call("double", vec![build::int(21)]),
        ],
    );
    assert_eq!(assert_equivalent(&module), "42");
}

#[test]
fn pattern_definition_and_match() {
    let module = Module::new(
        "patterns",
        vec![
            Node::unspanned(NodeKind::PatternDef {
                name: "small".into(),
                pattern: PatternExpr::Union(vec![
                    PatternExpr::Exact(Literal::Int(1)),
                    PatternExpr::Exact(Literal::Int(2)),
                ]),
            }),
            build::binary(
                BinaryOp::Match,
                build::int(2),
                Node::unspanned(NodeKind::PatternIdent("small".into())),
            ),
        ],
    );
    assert_eq!(assert_equivalent(&module), "true");
}

#[test]
fn permission_denial_is_identical() {
    let module = Module::new(
        "denied",
        vec![build::call(
            "read_file",
            vec![Node::unspanned(NodeKind::Literal(Literal::Path(
                "/secret".into(),
            )))],
        )],
    );
    let tree = run_tree(&module, &locked_down_context()).unwrap_err();
    let vm = run_vm(&module, &locked_down_context()).unwrap_err();
    for err in [&tree, &vm] {
        match &err.kind {
            EvalErrorKind::Context(ContextError::Permission(PermissionError::NotGranted {
                permission,
            })) => {
                assert_eq!(permission.domain(), "fs");
            }
            other => panic!("expected a permission error, got {other:?}"),
        }
    }
    assert_eq!(tree.to_string(), vm.to_string());
}

#[test]
fn transaction_block_commits_writes() {
    for run in [run_tree, run_vm] {
        let ctx = permissive_context();
        let module = Module::new(
            "tx-commit",
            vec![Node::unspanned(NodeKind::TxBlock {
                body: vec![build::call(
                    "write_file",
                    vec![
                        Node::unspanned(NodeKind::Literal(Literal::Path("/out.txt".into()))),
                        build::string("committed"),
                    ],
                )],
            })],
        );
        run(&module, &ctx).unwrap();
        let content = ctx
            .filesystem()
            .read_file(&Path::new("/out.txt").unwrap())
            .unwrap();
        assert_eq!(content, b"committed");
    }
}

#[test]
fn transaction_block_rolls_back_on_error() {
    for run in [run_tree, run_vm] {
        let ctx = permissive_context();
        let module = Module::new(
            "tx-rollback",
            vec![Node::unspanned(NodeKind::TxBlock {
                body: vec![
                    build::call(
                        "write_file",
                        vec![
                            Node::unspanned(NodeKind::Literal(Literal::Path("/out.txt".into()))),
                            build::string("never"),
                        ],
                    ),
                    // Unknown variable: evaluation fails, the tx rolls back.
                    build::variable("boom"),
                ],
            })],
        );
        let err = run(&module, &ctx).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::UnknownVariable(_)));
        assert!(!ctx.filesystem().exists(&Path::new("/out.txt").unwrap()));
        // The transaction was detached from the context.
        assert!(ctx.tx().is_none());
    }
}

#[test]
fn return_inside_transaction_block_commits() {
    for run in [run_tree, run_vm] {
        let ctx = permissive_context();
        let module = Module::new(
            "tx-return",
            vec![Node::unspanned(NodeKind::TxBlock {
                body: vec![
                    build::call(
                        "write_file",
                        vec![
                            Node::unspanned(NodeKind::Literal(Literal::Path("/out.txt".into()))),
                            build::string("committed"),
                        ],
                    ),
                    build::ret(build::int(7)),
                ],
            })],
        );
        let value = run(&module, &ctx).unwrap();
        assert_eq!(value, Value::Int(7));
        // The early return still commits the deferred write.
        let content = ctx
            .filesystem()
            .read_file(&Path::new("/out.txt").unwrap())
            .unwrap();
        assert_eq!(content, b"committed");
        assert!(ctx.tx().is_none());
    }
}

#[test]
fn return_from_nested_scopes_inside_functions() {
    // An early return out of an if-block must not corrupt later calls.
    let module = Module::new(
        "nested-returns",
        vec![
            Node::unspanned(NodeKind::FnDecl {
                name: "pick".into(),
                params: vec!["flag".into()],
                body: vec![
                    Node::unspanned(NodeKind::If {
                        condition: Box::new(build::variable("flag")),
                        then_branch: vec![build::ret(build::int(1))],
                        else_branch: None,
                    }),
                    build::ret(build::int(2)),
                ],
            }),
            build::let_("a", build::call("pick", vec![build::boolean(true)])),
            build::let_("b", build::call("pick", vec![build::boolean(false)])),
            build::binary(BinaryOp::Add, build::variable("a"), build::variable("b")),
        ],
    );
    assert_eq!(assert_equivalent(&module), "3");
}

#[test]
fn spawned_lthreads_join() {
    let module = Module::new(
        "lthreads",
        vec![
            build::let_("base", build::int(40)),
            build::let_(
                "worker",
                Node::unspanned(NodeKind::Spawn {
                    name: "worker".into(),
                    body: vec![build::binary(
                        BinaryOp::Add,
                        build::variable("base"),
                        build::int(2),
                    )],
                }),
            ),
            build::call("join", vec![build::variable("worker")]),
        ],
    );
    assert_eq!(assert_equivalent(&module), "42");
}

#[test]
fn lthread_mutations_on_unshared_captures_stay_private() {
    // The spawned body sees a deep clone, so the parent's object is untouched.
    let module = Module::new(
        "isolation",
        vec![
            build::let_("obj", build::object(vec![("n", build::int(1))])),
            build::let_(
                "worker",
                Node::unspanned(NodeKind::Spawn {
                    name: "w".into(),
                    body: vec![Node::unspanned(NodeKind::SetProperty {
                        target: Box::new(build::variable("obj")),
                        name: "n".into(),
                        value: Box::new(build::int(99)),
                    })],
                }),
            ),
            build::call("join", vec![build::variable("worker")]),
            build::property(build::variable("obj"), "n"),
        ],
    );
    assert_eq!(assert_equivalent(&module), "1");
}

#[test]
fn assertion_failures_carry_both_forms() {
    let module = Module::new(
        "asserts",
        vec![Node::unspanned(NodeKind::Assert {
            condition: Box::new(build::boolean(false)),
            message: Some("broken invariant".into()),
        })],
    );
    for run in [run_tree, run_vm] {
        let err = run(&module, &permissive_context()).unwrap_err();
        let assertion = err.assertion().expect("assertion error");
        assert_eq!(assertion.message, "broken invariant");
        assert!(assertion.pretty.contains("broken invariant"));
    }
}

#[test]
fn optimization_does_not_change_results() {
    let module = Module::new(
        "folding",
        vec![build::binary(
            BinaryOp::Mul,
            build::binary(BinaryOp::Add, build::int(1), build::int(2)),
            build::int(14),
        )],
    );
    let optimized = evaluate_module_bytecode(
        &module,
        &permissive_context(),
        &CompileOptions { optimize: true },
    )
    .unwrap();
    let unoptimized = evaluate_module_bytecode(
        &module,
        &permissive_context(),
        &CompileOptions { optimize: false },
    )
    .unwrap();
    assert_eq!(optimized.value, Value::Int(42));
    assert_eq!(unoptimized.value, Value::Int(42));

    // Folding shrinks the instruction stream.
    let folded = compile_module(&module, &CompileOptions { optimize: true }).unwrap();
    let plain = compile_module(&module, &CompileOptions { optimize: false }).unwrap();
    assert!(folded.chunks[0].instrs.len() < plain.chunks[0].instrs.len());
    assert!(folded.disassemble().contains("PushConst"));
}

#[test]
fn print_goes_to_the_module_output() {
    let module = Module::new(
        "printing",
        vec![build::call("print", vec![build::string("hello"), build::int(1)])],
    );

    let tree = evaluate_module(&module, &permissive_context()).unwrap();
    let tree_output = tree.ctx.state().unwrap().take_output();
    assert_eq!(String::from_utf8(tree_output).unwrap(), "\"hello\" 1\n");

    let vm =
        evaluate_module_bytecode(&module, &permissive_context(), &CompileOptions::default())
            .unwrap();
    let vm_output = vm.ctx.state().unwrap().take_output();
    assert_eq!(String::from_utf8(vm_output).unwrap(), "\"hello\" 1\n");
}
