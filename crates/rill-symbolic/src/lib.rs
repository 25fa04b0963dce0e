//! Abstract-value lattice used by the rill static checker.
//!
//! Every runtime value kind has a symbolic counterpart here representing the
//! set of runtime values that may inhabit a position. Patterns project into
//! this lattice (`to_symbolic_value` on the runtime side) and subtyping is
//! decided with [`SymbolicValue::test`].

mod state;
mod value;

pub use state::{CallOutcome, RecTestCallState, MAX_TEST_CALL_DEPTH};
pub use value::{
    Atom, AtomKind, FunctionSignature, RuntimeKind, SymbolicEntry, SymbolicKind, SymbolicSeq,
    SymbolicValue,
};
