//! The module AST consumed by the checker and both evaluators.
//!
//! The surface grammar and lexer live outside this workspace; the parser hands
//! over this structure. Every node carries a byte-offset span used in error
//! traces and assertion highlighting.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use rill_core::host::HostResolution;
use rill_core::limits::LimitSpec;
use rill_core::manifest::Manifest;
use rill_core::permission::Permission;
use rill_core::value::Host;

/// A byte-offset range in the module source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeSpan {
    pub start: usize,
    pub end: usize,
}

impl NodeSpan {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

/// A parsed module: manifest plus top-level statements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub manifest: Option<ManifestNode>,
    pub statements: Vec<Node>,
}

impl Module {
    pub fn new(name: impl Into<String>, statements: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            manifest: None,
            statements,
        }
    }

    pub fn with_manifest(mut self, manifest: ManifestNode) -> Self {
        self.manifest = Some(manifest);
        self
    }
}

/// The declarative requirements header of a module. The parser has already
/// lowered entity literals into core permission values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestNode {
    pub permissions: Vec<Permission>,
    pub limits: IndexMap<String, LimitSpec>,
    pub host_resolutions: IndexMap<Host, HostResolution>,
}

impl ManifestNode {
    pub fn to_manifest(&self) -> Manifest {
        Manifest {
            permissions: self.permissions.clone(),
            limits: self.limits.clone(),
            host_resolutions: self.host_resolutions.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub kind: NodeKind,
    pub span: NodeSpan,
}

impl Node {
    pub fn new(kind: NodeKind, span: NodeSpan) -> Self {
        Self { kind, span }
    }

    /// Convenience for tests and generated modules.
    pub fn unspanned(kind: NodeKind) -> Self {
        Self {
            kind,
            span: NodeSpan::default(),
        }
    }
}

/// Literal scalars the parser can produce directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Rune(char),
    Path(String),
    PathPattern(String),
    Url(String),
    Host(String),
    DurationNanos(u64),
    ByteCount(i64),
    IntRange(i64, i64),
    Identifier(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eq,
    NotEq,
    And,
    Or,
    /// `value match %pattern`
    Match,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A pattern expression; evaluated against the context's named patterns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PatternExpr {
    /// `%name`
    Named(String),
    /// An exact-value pattern.
    Exact(Literal),
    Object {
        entries: Vec<(String, PatternExpr, bool)>,
        inexact: bool,
    },
    Record {
        entries: Vec<(String, PatternExpr, bool)>,
    },
    ListOf(Box<PatternExpr>),
    ListElements(Vec<PatternExpr>),
    TupleElements(Vec<PatternExpr>),
    Union(Vec<PatternExpr>),
    Optional(Box<PatternExpr>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    Literal(Literal),
    ObjectLiteral(Vec<(String, Node)>),
    RecordLiteral(Vec<(String, Node)>),
    ListLiteral(Vec<Node>),
    TupleLiteral(Vec<Node>),
    Variable(String),
    Let {
        name: String,
        value: Box<Node>,
    },
    Assign {
        name: String,
        value: Box<Node>,
    },
    Property {
        target: Box<Node>,
        name: String,
    },
    SetProperty {
        target: Box<Node>,
        name: String,
        value: Box<Node>,
    },
    Index {
        target: Box<Node>,
        index: Box<Node>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Node>,
        right: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    If {
        condition: Box<Node>,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    While {
        condition: Box<Node>,
        body: Vec<Node>,
    },
    ForIn {
        variable: String,
        iterable: Box<Node>,
        body: Vec<Node>,
    },
    FnDecl {
        name: String,
        params: Vec<String>,
        body: Vec<Node>,
    },
    Call {
        callee: String,
        args: Vec<Node>,
    },
    /// `%name = <pattern>`
    PatternDef {
        name: String,
        pattern: PatternExpr,
    },
    /// `%name` used as an expression.
    PatternIdent(String),
    /// Spawns an lthread evaluating `body` in a child context.
    Spawn {
        name: String,
        body: Vec<Node>,
    },
    /// `tx { ... }`: starts a transaction, commits on success, rolls back on
    /// error.
    TxBlock {
        body: Vec<Node>,
    },
    Assert {
        condition: Box<Node>,
        message: Option<String>,
    },
    Return(Option<Box<Node>>),
}

/// Shorthand constructors used by the CLI `eval` front end and tests.
pub mod build {
    use super::*;

    pub fn int(value: i64) -> Node {
        Node::unspanned(NodeKind::Literal(Literal::Int(value)))
    }

    pub fn string(value: impl Into<String>) -> Node {
        Node::unspanned(NodeKind::Literal(Literal::Str(value.into())))
    }

    pub fn boolean(value: bool) -> Node {
        Node::unspanned(NodeKind::Literal(Literal::Bool(value)))
    }

    pub fn variable(name: impl Into<String>) -> Node {
        Node::unspanned(NodeKind::Variable(name.into()))
    }

    pub fn let_(name: impl Into<String>, value: Node) -> Node {
        Node::unspanned(NodeKind::Let {
            name: name.into(),
            value: Box::new(value),
        })
    }

    pub fn assign(name: impl Into<String>, value: Node) -> Node {
        Node::unspanned(NodeKind::Assign {
            name: name.into(),
            value: Box::new(value),
        })
    }

    pub fn binary(op: BinaryOp, left: Node, right: Node) -> Node {
        Node::unspanned(NodeKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn call(callee: impl Into<String>, args: Vec<Node>) -> Node {
        Node::unspanned(NodeKind::Call {
            callee: callee.into(),
            args,
        })
    }

    pub fn property(target: Node, name: impl Into<String>) -> Node {
        Node::unspanned(NodeKind::Property {
            target: Box::new(target),
            name: name.into(),
        })
    }

    pub fn object(entries: Vec<(&str, Node)>) -> Node {
        Node::unspanned(NodeKind::ObjectLiteral(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        ))
    }

    pub fn list(elements: Vec<Node>) -> Node {
        Node::unspanned(NodeKind::ListLiteral(elements))
    }

    pub fn assert(condition: Node) -> Node {
        Node::unspanned(NodeKind::Assert {
            condition: Box::new(condition),
            message: None,
        })
    }

    pub fn ret(value: Node) -> Node {
        Node::unspanned(NodeKind::Return(Some(Box::new(value))))
    }
}
