//! The symbolic value lattice.
//!
//! A [`SymbolicValue`] stands for the set of runtime values that may inhabit a
//! position at check time. Every runtime kind has a top (`any_int()`,
//! `any_object()`, ...) below the generic [`SymbolicValue::any`]. Inclusion is
//! asked with [`SymbolicValue::test`], threading a [`RecTestCallState`] so
//! recursive shapes terminate.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::state::{CallOutcome, RecTestCallState};

/// A shared handle to a symbolic value. Cloning is cheap and preserves
/// identity, which keys the cycle-breaking call stack.
#[derive(Debug, Clone)]
pub struct SymbolicValue(Arc<SymbolicKind>);

/// Kinds of atoms: every scalar-like runtime kind with a per-kind top.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomKind {
    Nil,
    Bool,
    Int,
    Float,
    Rune,
    Byte,
    Str,
    Path,
    PathPattern,
    Url,
    UrlPattern,
    Host,
    HostPattern,
    Scheme,
    EmailAddress,
    Identifier,
    PropertyName,
    Duration,
    Date,
    ByteCount,
    LineCount,
    RuneCount,
    ByteRate,
    SimpleRate,
    Port,
    Color,
    FileMode,
    Mimetype,
    Option,
    IntRange,
    RuneRange,
    QuantityRange,
}

impl AtomKind {
    pub fn name(self) -> &'static str {
        match self {
            AtomKind::Nil => "nil",
            AtomKind::Bool => "bool",
            AtomKind::Int => "int",
            AtomKind::Float => "float",
            AtomKind::Rune => "rune",
            AtomKind::Byte => "byte",
            AtomKind::Str => "str",
            AtomKind::Path => "path",
            AtomKind::PathPattern => "path-pattern",
            AtomKind::Url => "url",
            AtomKind::UrlPattern => "url-pattern",
            AtomKind::Host => "host",
            AtomKind::HostPattern => "host-pattern",
            AtomKind::Scheme => "scheme",
            AtomKind::EmailAddress => "email-addr",
            AtomKind::Identifier => "identifier",
            AtomKind::PropertyName => "property-name",
            AtomKind::Duration => "duration",
            AtomKind::Date => "date",
            AtomKind::ByteCount => "byte-count",
            AtomKind::LineCount => "line-count",
            AtomKind::RuneCount => "rune-count",
            AtomKind::ByteRate => "byte-rate",
            AtomKind::SimpleRate => "simple-rate",
            AtomKind::Port => "port",
            AtomKind::Color => "color",
            AtomKind::FileMode => "file-mode",
            AtomKind::Mimetype => "mimetype",
            AtomKind::Option => "option",
            AtomKind::IntRange => "int-range",
            AtomKind::RuneRange => "rune-range",
            AtomKind::QuantityRange => "quantity-range",
        }
    }

    /// Whether values of this kind can have a JSON representation at all.
    pub fn is_serializable(self) -> bool {
        !matches!(
            self,
            AtomKind::Byte | AtomKind::FileMode | AtomKind::QuantityRange
        )
    }
}

/// An exact atom inhabitant.
#[derive(Debug, Clone, PartialEq)]
pub enum Atom {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Rune(char),
    Byte(u8),
    Str(String),
    Path(String),
    PathPattern(String),
    Url(String),
    UrlPattern(String),
    Host(String),
    HostPattern(String),
    Scheme(String),
    EmailAddress(String),
    Identifier(String),
    PropertyName(String),
    /// i64-backed quantity kinds: durations, dates, counts, rates, ports,
    /// colors, file modes.
    Quantity(AtomKind, i64),
    Mimetype(String),
    IntRange(i64, i64),
    RuneRange(char, char),
}

impl Atom {
    pub fn kind(&self) -> AtomKind {
        match self {
            Atom::Nil => AtomKind::Nil,
            Atom::Bool(_) => AtomKind::Bool,
            Atom::Int(_) => AtomKind::Int,
            Atom::Float(_) => AtomKind::Float,
            Atom::Rune(_) => AtomKind::Rune,
            Atom::Byte(_) => AtomKind::Byte,
            Atom::Str(_) => AtomKind::Str,
            Atom::Path(_) => AtomKind::Path,
            Atom::PathPattern(_) => AtomKind::PathPattern,
            Atom::Url(_) => AtomKind::Url,
            Atom::UrlPattern(_) => AtomKind::UrlPattern,
            Atom::Host(_) => AtomKind::Host,
            Atom::HostPattern(_) => AtomKind::HostPattern,
            Atom::Scheme(_) => AtomKind::Scheme,
            Atom::EmailAddress(_) => AtomKind::EmailAddress,
            Atom::Identifier(_) => AtomKind::Identifier,
            Atom::PropertyName(_) => AtomKind::PropertyName,
            Atom::Quantity(kind, _) => *kind,
            Atom::Mimetype(_) => AtomKind::Mimetype,
            Atom::IntRange(_, _) => AtomKind::IntRange,
            Atom::RuneRange(_, _) => AtomKind::RuneRange,
        }
    }
}

/// Opaque runtime-only kinds. They have no serializable projection and no
/// structure the checker can look into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    Mutation,
    Thread,
    HttpRequest,
    HttpServer,
    FileInfo,
    Dictionary,
    KeyList,
    RuneSlice,
    ByteSlice,
    StringConcatenation,
}

impl RuntimeKind {
    pub fn name(self) -> &'static str {
        match self {
            RuntimeKind::Mutation => "mutation",
            RuntimeKind::Thread => "lthread",
            RuntimeKind::HttpRequest => "http-request",
            RuntimeKind::HttpServer => "http-server",
            RuntimeKind::FileInfo => "file-info",
            RuntimeKind::Dictionary => "dict",
            RuntimeKind::KeyList => "key-list",
            RuntimeKind::RuneSlice => "rune-slice",
            RuntimeKind::ByteSlice => "byte-slice",
            RuntimeKind::StringConcatenation => "str-concat",
        }
    }
}

/// An object/record entry at check time.
#[derive(Debug, Clone)]
pub struct SymbolicEntry {
    pub value: SymbolicValue,
    pub optional: bool,
}

impl SymbolicEntry {
    pub fn required(value: SymbolicValue) -> Self {
        Self {
            value,
            optional: false,
        }
    }

    pub fn optional(value: SymbolicValue) -> Self {
        Self {
            value,
            optional: true,
        }
    }
}

/// Sequence shape shared by lists and tuples.
#[derive(Debug, Clone)]
pub enum SymbolicSeq {
    /// Any element shape.
    Any,
    /// One pattern for every element.
    General(SymbolicValue),
    /// Positional element patterns.
    Elements(Vec<SymbolicValue>),
}

/// A builtin function signature used for arity/argument checking.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub params: Vec<SymbolicValue>,
    pub result: SymbolicValue,
}

#[derive(Debug, Clone)]
pub enum SymbolicKind {
    /// The generic top.
    Any,
    /// Top of every value that can have a JSON representation.
    Serializable,
    /// Per-kind atom top.
    AnyAtom(AtomKind),
    /// Exact atom.
    Atom(Atom),
    Object {
        /// `None` means "any object" (unknown shape).
        entries: Option<IndexMap<String, SymbolicEntry>>,
        /// An inexact object may carry keys beyond `entries`.
        inexact: bool,
    },
    Record {
        entries: Option<IndexMap<String, SymbolicEntry>>,
    },
    List(SymbolicSeq),
    Tuple(SymbolicSeq),
    Union(Vec<SymbolicValue>),
    Function(FunctionSignature),
    Runtime(RuntimeKind),
    /// Any first-class pattern value.
    AnyPattern,
}

impl SymbolicValue {
    fn from_kind(kind: SymbolicKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &SymbolicKind {
        &self.0
    }

    /// Identity token used by cycle-breaking maps.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn any() -> Self {
        Self::from_kind(SymbolicKind::Any)
    }

    pub fn serializable() -> Self {
        Self::from_kind(SymbolicKind::Serializable)
    }

    pub fn any_atom(kind: AtomKind) -> Self {
        Self::from_kind(SymbolicKind::AnyAtom(kind))
    }

    pub fn atom(atom: Atom) -> Self {
        Self::from_kind(SymbolicKind::Atom(atom))
    }

    pub fn nil() -> Self {
        Self::atom(Atom::Nil)
    }

    pub fn any_bool() -> Self {
        Self::any_atom(AtomKind::Bool)
    }

    pub fn any_int() -> Self {
        Self::any_atom(AtomKind::Int)
    }

    pub fn any_float() -> Self {
        Self::any_atom(AtomKind::Float)
    }

    pub fn any_string() -> Self {
        Self::any_atom(AtomKind::Str)
    }

    pub fn any_path() -> Self {
        Self::any_atom(AtomKind::Path)
    }

    pub fn any_url() -> Self {
        Self::any_atom(AtomKind::Url)
    }

    pub fn any_host() -> Self {
        Self::any_atom(AtomKind::Host)
    }

    pub fn any_object() -> Self {
        Self::from_kind(SymbolicKind::Object {
            entries: None,
            inexact: true,
        })
    }

    pub fn object(entries: IndexMap<String, SymbolicEntry>, inexact: bool) -> Self {
        Self::from_kind(SymbolicKind::Object {
            entries: Some(entries),
            inexact,
        })
    }

    pub fn any_record() -> Self {
        Self::from_kind(SymbolicKind::Record { entries: None })
    }

    pub fn record(entries: IndexMap<String, SymbolicEntry>) -> Self {
        Self::from_kind(SymbolicKind::Record {
            entries: Some(entries),
        })
    }

    pub fn any_list() -> Self {
        Self::from_kind(SymbolicKind::List(SymbolicSeq::Any))
    }

    pub fn list(seq: SymbolicSeq) -> Self {
        Self::from_kind(SymbolicKind::List(seq))
    }

    pub fn any_tuple() -> Self {
        Self::from_kind(SymbolicKind::Tuple(SymbolicSeq::Any))
    }

    pub fn tuple(seq: SymbolicSeq) -> Self {
        Self::from_kind(SymbolicKind::Tuple(seq))
    }

    pub fn union(members: Vec<SymbolicValue>) -> Self {
        Self::from_kind(SymbolicKind::Union(members))
    }

    pub fn function(params: Vec<SymbolicValue>, result: SymbolicValue) -> Self {
        Self::from_kind(SymbolicKind::Function(FunctionSignature { params, result }))
    }

    pub fn runtime(kind: RuntimeKind) -> Self {
        Self::from_kind(SymbolicKind::Runtime(kind))
    }

    pub fn any_pattern() -> Self {
        Self::from_kind(SymbolicKind::AnyPattern)
    }

    /// Inclusion: is every inhabitant of `other` also an inhabitant of `self`?
    pub fn test(&self, other: &SymbolicValue, state: &mut RecTestCallState) -> bool {
        match state.start_call(self.identity(), other.identity()) {
            CallOutcome::Revisited => return true,
            CallOutcome::DepthExceeded => return false,
            CallOutcome::Entered => {}
        }
        let included = self.test_inner(other, state);
        state.finish_call();
        included
    }

    fn test_inner(&self, other: &SymbolicValue, state: &mut RecTestCallState) -> bool {
        // A union on the tested side must be included member-wise, whatever
        // the tester is. When the tester is itself a union, each member of
        // `other` may be covered by a different member of `self`.
        if let SymbolicKind::Union(members) = other.kind() {
            return members.iter().all(|m| self.test(m, state));
        }

        match self.kind() {
            SymbolicKind::Any => true,
            SymbolicKind::Serializable => other.is_serializable(),
            SymbolicKind::AnyAtom(kind) => match other.kind() {
                SymbolicKind::AnyAtom(other_kind) => other_kind == kind,
                SymbolicKind::Atom(atom) => atom.kind() == *kind,
                _ => false,
            },
            SymbolicKind::Atom(atom) => match other.kind() {
                SymbolicKind::Atom(other_atom) => atom == other_atom,
                _ => false,
            },
            SymbolicKind::Object { entries, inexact } => match other.kind() {
                SymbolicKind::Object {
                    entries: other_entries,
                    inexact: other_inexact,
                } => test_struct_entries(
                    entries.as_ref(),
                    other_entries.as_ref(),
                    *inexact,
                    *other_inexact,
                    state,
                ),
                _ => false,
            },
            SymbolicKind::Record { entries } => match other.kind() {
                SymbolicKind::Record {
                    entries: other_entries,
                } => test_struct_entries(entries.as_ref(), other_entries.as_ref(), false, false, state),
                _ => false,
            },
            SymbolicKind::List(seq) => match other.kind() {
                SymbolicKind::List(other_seq) => test_seq(seq, other_seq, state),
                _ => false,
            },
            SymbolicKind::Tuple(seq) => match other.kind() {
                SymbolicKind::Tuple(other_seq) => test_seq(seq, other_seq, state),
                _ => false,
            },
            SymbolicKind::Union(members) => members.iter().any(|m| m.test(other, state)),
            SymbolicKind::Function(sig) => match other.kind() {
                SymbolicKind::Function(other_sig) => {
                    sig.params.len() == other_sig.params.len()
                        && sig
                            .params
                            .iter()
                            .zip(&other_sig.params)
                            .all(|(p, q)| p.test(q, state))
                        && sig.result.test(&other_sig.result, state)
                }
                _ => false,
            },
            SymbolicKind::Runtime(kind) => match other.kind() {
                SymbolicKind::Runtime(other_kind) => kind == other_kind,
                _ => false,
            },
            SymbolicKind::AnyPattern => matches!(other.kind(), SymbolicKind::AnyPattern),
        }
    }

    /// The per-kind top above this value.
    pub fn widest_of_type(&self) -> SymbolicValue {
        match self.kind() {
            SymbolicKind::Any => Self::any(),
            SymbolicKind::Serializable => Self::serializable(),
            SymbolicKind::AnyAtom(kind) => Self::any_atom(*kind),
            SymbolicKind::Atom(atom) => Self::any_atom(atom.kind()),
            SymbolicKind::Object { .. } => Self::any_object(),
            SymbolicKind::Record { .. } => Self::any_record(),
            SymbolicKind::List(_) => Self::any_list(),
            SymbolicKind::Tuple(_) => Self::any_tuple(),
            SymbolicKind::Union(_) => Self::any(),
            SymbolicKind::Function(_) => Self::any(),
            SymbolicKind::Runtime(kind) => Self::runtime(*kind),
            SymbolicKind::AnyPattern => Self::any_pattern(),
        }
    }

    /// Whether every inhabitant can have a JSON representation.
    pub fn is_serializable(&self) -> bool {
        self.is_serializable_inner(&mut Vec::new())
    }

    fn is_serializable_inner(&self, seen: &mut Vec<usize>) -> bool {
        if seen.contains(&self.identity()) {
            // A cyclic shape can never be fully serialized.
            return false;
        }
        seen.push(self.identity());
        let result = match self.kind() {
            SymbolicKind::Any => false,
            SymbolicKind::Serializable => true,
            SymbolicKind::AnyAtom(kind) => kind.is_serializable(),
            SymbolicKind::Atom(atom) => atom.kind().is_serializable(),
            SymbolicKind::Object { entries, .. } | SymbolicKind::Record { entries } => {
                match entries {
                    None => false,
                    Some(entries) => entries
                        .values()
                        .all(|e| e.value.is_serializable_inner(seen)),
                }
            }
            SymbolicKind::List(seq) | SymbolicKind::Tuple(seq) => match seq {
                SymbolicSeq::Any => false,
                SymbolicSeq::General(g) => g.is_serializable_inner(seen),
                SymbolicSeq::Elements(es) => es.iter().all(|e| e.is_serializable_inner(seen)),
            },
            SymbolicKind::Union(members) => {
                members.iter().all(|m| m.is_serializable_inner(seen))
            }
            SymbolicKind::Function(_) | SymbolicKind::Runtime(_) | SymbolicKind::AnyPattern => {
                false
            }
        };
        seen.pop();
        result
    }

    /// Whether this symbolic value carries enough structure to be materialized
    /// as a concrete pattern without runtime information.
    pub fn is_concretizable(&self) -> bool {
        self.is_concretizable_inner(&mut Vec::new())
    }

    fn is_concretizable_inner(&self, seen: &mut Vec<usize>) -> bool {
        if seen.contains(&self.identity()) {
            return true;
        }
        seen.push(self.identity());
        let result = match self.kind() {
            SymbolicKind::Any | SymbolicKind::Serializable => true,
            SymbolicKind::AnyAtom(_) | SymbolicKind::Atom(_) => true,
            SymbolicKind::Object { entries, .. } | SymbolicKind::Record { entries } => {
                match entries {
                    None => true,
                    Some(entries) => entries
                        .values()
                        .all(|e| e.value.is_concretizable_inner(seen)),
                }
            }
            SymbolicKind::List(seq) | SymbolicKind::Tuple(seq) => match seq {
                SymbolicSeq::Any => true,
                SymbolicSeq::General(g) => g.is_concretizable_inner(seen),
                SymbolicSeq::Elements(es) => es.iter().all(|e| e.is_concretizable_inner(seen)),
            },
            SymbolicKind::Union(members) => {
                members.iter().all(|m| m.is_concretizable_inner(seen))
            }
            SymbolicKind::Function(_) | SymbolicKind::Runtime(_) | SymbolicKind::AnyPattern => {
                false
            }
        };
        seen.pop();
        result
    }
}

fn test_struct_entries(
    entries: Option<&IndexMap<String, SymbolicEntry>>,
    other_entries: Option<&IndexMap<String, SymbolicEntry>>,
    inexact: bool,
    other_inexact: bool,
    state: &mut RecTestCallState,
) -> bool {
    let entries = match entries {
        // Unknown shape on the tester side matches any same-kind structure.
        None => return true,
        Some(entries) => entries,
    };
    let other_entries = match other_entries {
        None => return false,
        Some(other_entries) => other_entries,
    };

    for (key, entry) in entries {
        match other_entries.get(key) {
            Some(other_entry) => {
                if !entry.optional && other_entry.optional {
                    return false;
                }
                if !entry.value.test(&other_entry.value, state) {
                    return false;
                }
            }
            None => {
                if !entry.optional {
                    return false;
                }
            }
        }
    }

    if !inexact {
        if other_inexact {
            return false;
        }
        if other_entries.keys().any(|k| !entries.contains_key(k)) {
            return false;
        }
    }
    true
}

fn test_seq(seq: &SymbolicSeq, other: &SymbolicSeq, state: &mut RecTestCallState) -> bool {
    match seq {
        SymbolicSeq::Any => true,
        SymbolicSeq::General(general) => match other {
            SymbolicSeq::Any => false,
            SymbolicSeq::General(other_general) => general.test(other_general, state),
            SymbolicSeq::Elements(elements) => elements.iter().all(|e| general.test(e, state)),
        },
        SymbolicSeq::Elements(elements) => match other {
            SymbolicSeq::Elements(other_elements) if elements.len() == other_elements.len() => {
                elements
                    .iter()
                    .zip(other_elements)
                    .all(|(a, b)| a.test(b, state))
            }
            _ => false,
        },
    }
}

impl fmt::Display for SymbolicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            SymbolicKind::Any => f.write_str("any"),
            SymbolicKind::Serializable => f.write_str("serializable"),
            SymbolicKind::AnyAtom(kind) => f.write_str(kind.name()),
            SymbolicKind::Atom(atom) => write!(f, "{atom:?}"),
            SymbolicKind::Object { entries, inexact } => {
                write_struct(f, "object", entries.as_ref(), *inexact)
            }
            SymbolicKind::Record { entries } => write_struct(f, "record", entries.as_ref(), false),
            SymbolicKind::List(seq) => write_seq(f, "list", seq),
            SymbolicKind::Tuple(seq) => write_seq(f, "tuple", seq),
            SymbolicKind::Union(members) => {
                f.write_str("(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{m}")?;
                }
                f.write_str(")")
            }
            SymbolicKind::Function(sig) => {
                f.write_str("fn(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {}", sig.result)
            }
            SymbolicKind::Runtime(kind) => f.write_str(kind.name()),
            SymbolicKind::AnyPattern => f.write_str("pattern"),
        }
    }
}

fn write_struct(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    entries: Option<&IndexMap<String, SymbolicEntry>>,
    inexact: bool,
) -> fmt::Result {
    let Some(entries) = entries else {
        return write!(f, "{name}");
    };
    write!(f, "{name}{{")?;
    for (i, (key, entry)) in entries.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        let marker = if entry.optional { "?" } else { "" };
        write!(f, "{key}{marker}: {}", entry.value)?;
    }
    if inexact {
        if !entries.is_empty() {
            f.write_str(", ")?;
        }
        f.write_str("...")?;
    }
    f.write_str("}")
}

fn write_seq(f: &mut fmt::Formatter<'_>, name: &str, seq: &SymbolicSeq) -> fmt::Result {
    match seq {
        SymbolicSeq::Any => write!(f, "{name}"),
        SymbolicSeq::General(g) => write!(f, "{name}({g})"),
        SymbolicSeq::Elements(es) => {
            write!(f, "{name}[")?;
            for (i, e) in es.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{e}")?;
            }
            f.write_str("]")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, SymbolicValue, bool)]) -> IndexMap<String, SymbolicEntry> {
        pairs
            .iter()
            .map(|(k, v, optional)| {
                (
                    k.to_string(),
                    SymbolicEntry {
                        value: v.clone(),
                        optional: *optional,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn any_includes_everything() {
        let mut state = RecTestCallState::new();
        let any = SymbolicValue::any();
        assert!(any.test(&SymbolicValue::any_int(), &mut state));
        assert!(any.test(&SymbolicValue::any_object(), &mut state));
        assert!(any.test(&SymbolicValue::atom(Atom::Str("x".into())), &mut state));
    }

    #[test]
    fn atom_tops_include_exact_atoms_of_same_kind() {
        let mut state = RecTestCallState::new();
        let any_int = SymbolicValue::any_int();
        assert!(any_int.test(&SymbolicValue::atom(Atom::Int(42)), &mut state));
        assert!(!any_int.test(&SymbolicValue::any_string(), &mut state));
        assert!(!SymbolicValue::atom(Atom::Int(1)).test(&any_int, &mut state));
    }

    #[test]
    fn object_inclusion_respects_optionality() {
        let mut state = RecTestCallState::new();
        let int = SymbolicValue::any_int();
        let wide = SymbolicValue::object(
            entries(&[("a", int.clone(), false), ("b", int.clone(), true)]),
            false,
        );
        let narrow = SymbolicValue::object(
            entries(&[("a", int.clone(), false), ("b", int.clone(), false)]),
            false,
        );
        assert!(wide.test(&narrow, &mut state));
        // A required entry is not satisfied by an optional one.
        assert!(!narrow.test(&wide, &mut state));
    }

    #[test]
    fn exact_object_rejects_extra_keys() {
        let mut state = RecTestCallState::new();
        let int = SymbolicValue::any_int();
        let exact = SymbolicValue::object(entries(&[("a", int.clone(), false)]), false);
        let more = SymbolicValue::object(
            entries(&[("a", int.clone(), false), ("b", int.clone(), false)]),
            false,
        );
        assert!(!exact.test(&more, &mut state));

        let inexact = SymbolicValue::object(entries(&[("a", int, false)]), true);
        assert!(inexact.test(&more, &mut state));
    }

    #[test]
    fn record_is_not_an_object() {
        let mut state = RecTestCallState::new();
        assert!(!SymbolicValue::any_object().test(&SymbolicValue::any_record(), &mut state));
    }

    #[test]
    fn list_general_includes_element_lists() {
        let mut state = RecTestCallState::new();
        let ints = SymbolicValue::list(SymbolicSeq::General(SymbolicValue::any_int()));
        let pair = SymbolicValue::list(SymbolicSeq::Elements(vec![
            SymbolicValue::atom(Atom::Int(1)),
            SymbolicValue::atom(Atom::Int(2)),
        ]));
        assert!(ints.test(&pair, &mut state));

        let mixed = SymbolicValue::list(SymbolicSeq::Elements(vec![
            SymbolicValue::atom(Atom::Int(1)),
            SymbolicValue::any_string(),
        ]));
        assert!(!ints.test(&mixed, &mut state));
    }

    #[test]
    fn union_membership() {
        let mut state = RecTestCallState::new();
        let int_or_str =
            SymbolicValue::union(vec![SymbolicValue::any_int(), SymbolicValue::any_string()]);
        assert!(int_or_str.test(&SymbolicValue::any_int(), &mut state));
        assert!(!int_or_str.test(&SymbolicValue::any_bool(), &mut state));
        // Union on the tested side: all members must be included.
        let sub = SymbolicValue::union(vec![SymbolicValue::any_int()]);
        assert!(int_or_str.test(&sub, &mut state));
    }

    #[test]
    fn union_includes_union() {
        let mut state = RecTestCallState::new();
        let int_or_str =
            SymbolicValue::union(vec![SymbolicValue::any_int(), SymbolicValue::any_string()]);
        // An identical union: every member is covered by some member.
        let same =
            SymbolicValue::union(vec![SymbolicValue::any_int(), SymbolicValue::any_string()]);
        assert!(int_or_str.test(&same, &mut state));
        // Member order does not matter.
        let swapped =
            SymbolicValue::union(vec![SymbolicValue::any_string(), SymbolicValue::any_int()]);
        assert!(int_or_str.test(&swapped, &mut state));
        // Exact members are covered by their kind tops, split across members.
        let narrower = SymbolicValue::union(vec![
            SymbolicValue::atom(Atom::Int(1)),
            SymbolicValue::atom(Atom::Str("x".into())),
        ]);
        assert!(int_or_str.test(&narrower, &mut state));
        // One uncovered member sinks the whole union.
        let wider = SymbolicValue::union(vec![
            SymbolicValue::any_int(),
            SymbolicValue::any_bool(),
        ]);
        assert!(!int_or_str.test(&wider, &mut state));
    }

    #[test]
    fn serializable_top() {
        let mut state = RecTestCallState::new();
        let serializable = SymbolicValue::serializable();
        assert!(serializable.test(&SymbolicValue::any_int(), &mut state));
        assert!(serializable.test(
            &SymbolicValue::list(SymbolicSeq::General(SymbolicValue::any_path())),
            &mut state
        ));
        assert!(!serializable.test(&SymbolicValue::any_atom(AtomKind::Byte), &mut state));
        assert!(!serializable.test(&SymbolicValue::runtime(RuntimeKind::Thread), &mut state));
    }

    #[test]
    fn concretizability() {
        assert!(SymbolicValue::any_int().is_concretizable());
        assert!(SymbolicValue::any_object().is_concretizable());
        assert!(!SymbolicValue::runtime(RuntimeKind::Mutation).is_concretizable());
        assert!(
            !SymbolicValue::function(vec![], SymbolicValue::any()).is_concretizable()
        );
    }

    #[test]
    fn widest_of_type_returns_kind_top() {
        let mut state = RecTestCallState::new();
        let exact = SymbolicValue::atom(Atom::Int(7));
        let widest = exact.widest_of_type();
        assert!(widest.test(&exact, &mut state));
        assert!(widest.test(&SymbolicValue::atom(Atom::Int(8)), &mut state));
    }
}
