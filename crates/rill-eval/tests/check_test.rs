//! Static checker diagnostics.

use rill_eval::ast::{build, BinaryOp, Literal, Module, Node, NodeKind, PatternExpr};
use rill_eval::check::check_module;
use rill_testkit::permissive_context;

fn check(module: &Module) -> Result<(), Vec<String>> {
    check_module(module, &permissive_context())
        .map_err(|errors| errors.into_iter().map(|e| e.message).collect())
}

#[test]
fn well_typed_module_passes() {
    let module = Module::new(
        "ok",
        vec![
            build::let_("a", build::int(1)),
            build::let_(
                "user",
                build::object(vec![("name", build::string("ada"))]),
            ),
            build::property(build::variable("user"), "name"),
            build::call("len", vec![build::list(vec![build::int(1)])]),
        ],
    );
    assert!(check(&module).is_ok());
}

#[test]
fn unknown_variable_is_reported() {
    let module = Module::new("bad", vec![build::variable("ghost")]);
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("unknown variable 'ghost'")));
}

#[test]
fn missing_property_is_reported() {
    let module = Module::new(
        "bad",
        vec![
            build::let_("user", build::object(vec![("name", build::string("ada"))])),
            build::property(build::variable("user"), "age"),
        ],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("no property 'age'")));
}

#[test]
fn property_on_scalar_is_reported() {
    let module = Module::new(
        "bad",
        vec![build::property(build::int(1), "anything")],
    );
    assert!(check(&module).is_err());
}

#[test]
fn builtin_arity_is_checked() {
    let module = Module::new("bad", vec![build::call("len", vec![])]);
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("expects 1 argument")));
}

#[test]
fn builtin_argument_types_are_checked() {
    let module = Module::new(
        "bad",
        vec![build::call("read_file", vec![build::int(3)])],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("expected path")));
}

#[test]
fn union_arguments_are_checked_against_params() {
    // if c { /a } else { 5 } infers a str-or-int union; read_file wants a path.
    let mixed = Node::unspanned(NodeKind::If {
        condition: Box::new(build::variable("c")),
        then_branch: vec![Node::unspanned(NodeKind::Literal(Literal::Path(
            "/a".into(),
        )))],
        else_branch: Some(vec![build::int(5)]),
    });
    let module = Module::new(
        "bad",
        vec![
            build::let_("c", build::boolean(true)),
            build::let_("x", mixed),
            build::call("read_file", vec![build::variable("x")]),
        ],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("argument 1 of 'read_file'")));

    // A union of paths is fine.
    let paths = Node::unspanned(NodeKind::If {
        condition: Box::new(build::variable("c")),
        then_branch: vec![Node::unspanned(NodeKind::Literal(Literal::Path(
            "/a".into(),
        )))],
        else_branch: Some(vec![Node::unspanned(NodeKind::Literal(Literal::Path(
            "/b".into(),
        )))]),
    });
    let ok_module = Module::new(
        "ok",
        vec![
            build::let_("c", build::boolean(true)),
            build::let_("x", paths),
            build::call("read_file", vec![build::variable("x")]),
        ],
    );
    assert!(check(&ok_module).is_ok());
}

#[test]
fn unknown_function_is_reported() {
    let module = Module::new("bad", vec![build::call("frobnicate", vec![])]);
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("unknown function")));
}

#[test]
fn condition_must_be_bool() {
    let module = Module::new(
        "bad",
        vec![Node::unspanned(NodeKind::If {
            condition: Box::new(build::int(1)),
            then_branch: vec![],
            else_branch: None,
        })],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("boolean condition")));
}

#[test]
fn match_needs_a_pattern_on_the_right() {
    let module = Module::new(
        "bad",
        vec![build::binary(BinaryOp::Match, build::int(1), build::int(2))],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("must be a pattern")));
}

#[test]
fn unknown_pattern_reference_is_reported() {
    let module = Module::new(
        "bad",
        vec![Node::unspanned(NodeKind::PatternIdent("nope".into()))],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("unknown pattern '%nope'")));
}

#[test]
fn pattern_redefinition_is_reported() {
    let module = Module::new(
        "bad",
        vec![Node::unspanned(NodeKind::PatternDef {
            name: "int".into(),
            pattern: PatternExpr::Exact(Literal::Int(1)),
        })],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("already defined")));
}

#[test]
fn defined_patterns_resolve_in_later_statements() {
    let module = Module::new(
        "ok",
        vec![
            Node::unspanned(NodeKind::PatternDef {
                name: "flag".into(),
                pattern: PatternExpr::Exact(Literal::Bool(true)),
            }),
            build::binary(
                BinaryOp::Match,
                build::boolean(true),
                Node::unspanned(NodeKind::PatternIdent("flag".into())),
            ),
        ],
    );
    assert!(check(&module).is_ok());
}

#[test]
fn arithmetic_type_mismatch_is_reported() {
    let module = Module::new(
        "bad",
        vec![build::binary(BinaryOp::Add, build::int(1), build::string("x"))],
    );
    let errors = check(&module).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("invalid operands")));
}

#[test]
fn multiple_errors_are_collected() {
    let module = Module::new(
        "bad",
        vec![
            build::variable("ghost"),
            build::call("frobnicate", vec![]),
        ],
    );
    let errors = check(&module).unwrap_err();
    assert_eq!(errors.len(), 2);
}
