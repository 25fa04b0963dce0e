//! First-class patterns: sets of runtime values.
//!
//! A [`Pattern`] is an immutable, cheap-clone handle. Identity
//! (`Pattern::ptr_eq`) is meaningful: the migration engine treats two handles
//! to the same pattern as trivially compatible, and symbolic projection keys
//! its cycle map on identity.

mod builtins;
pub mod string;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use rill_symbolic::{Atom, AtomKind, SymbolicEntry, SymbolicSeq, SymbolicValue};

use crate::context::Context;
use crate::value::{HostPattern, PathPattern, UrlPattern, Value};

pub use builtins::{builtin_patterns, untyped_wrapper_key, TypeMatcher, TypePattern};
pub use string::{RegexPattern, StringPattern, StringPatternError};

/// A shared handle on a pattern.
#[derive(Debug, Clone)]
pub struct Pattern(Arc<PatternKind>);

/// An object/record entry pattern.
#[derive(Debug, Clone)]
pub struct EntryPattern {
    pub pattern: Pattern,
    pub optional: bool,
}

impl EntryPattern {
    pub fn required(pattern: Pattern) -> Self {
        Self {
            pattern,
            optional: false,
        }
    }

    pub fn optional(pattern: Pattern) -> Self {
        Self {
            pattern,
            optional: true,
        }
    }
}

/// Object pattern: entry patterns with optionality, `None` entries match any
/// object, `inexact` tolerates extra keys.
#[derive(Debug, Clone)]
pub struct ObjectPattern {
    pub entries: Option<IndexMap<String, EntryPattern>>,
    pub inexact: bool,
}

#[derive(Debug, Clone)]
pub struct RecordPattern {
    pub entries: Option<IndexMap<String, EntryPattern>>,
}

/// List/tuple element shape.
#[derive(Debug, Clone)]
pub enum SeqShape {
    /// One pattern for every element.
    General(Pattern),
    /// Positional element patterns.
    Elements(Vec<Pattern>),
}

#[derive(Debug, Clone)]
pub struct ListPattern {
    pub shape: SeqShape,
}

#[derive(Debug, Clone)]
pub struct TuplePattern {
    pub shape: SeqShape,
}

#[derive(Debug, Clone)]
pub struct OptionPattern {
    pub name: String,
    pub value: Pattern,
}

/// A path pattern with named segments (`/users/{id}/posts`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedSegmentPathPattern {
    pub segments: Vec<PathSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Literal(String),
    Named(String),
}

impl NamedSegmentPathPattern {
    pub fn matches(&self, path: &crate::value::Path) -> bool {
        let parts: Vec<&str> = path
            .as_str()
            .split('/')
            .filter(|p| !p.is_empty())
            .collect();
        if parts.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(parts).all(|(segment, part)| match segment {
            PathSegment::Literal(lit) => lit == part,
            PathSegment::Named(_) => true,
        })
    }
}

#[derive(Debug)]
pub enum PatternKind {
    /// The singleton set containing one value.
    ExactValue(Value),
    /// A whole kind (`%int`, `%str`, ...).
    Type(TypePattern),
    Object(ObjectPattern),
    Record(RecordPattern),
    List(ListPattern),
    Tuple(TuplePattern),
    Option(OptionPattern),
    /// A path set used as a pattern.
    PathSet(PathPattern),
    NamedSegmentPath(NamedSegmentPathPattern),
    UrlSet(UrlPattern),
    HostSet(HostPattern),
    Union(Vec<Pattern>),
    Difference { base: Pattern, removed: Pattern },
    /// Matches `nil` or the inner pattern.
    Optional(Pattern),
    String(StringPattern),
}

impl Pattern {
    fn from_kind(kind: PatternKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn kind(&self) -> &PatternKind {
        &self.0
    }

    pub fn ptr_eq(&self, other: &Pattern) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity token keying symbolic-projection cycle maps.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    // ---- constructors ----

    pub fn exact(value: Value) -> Self {
        Self::from_kind(PatternKind::ExactValue(value))
    }

    pub fn type_pattern(type_pattern: TypePattern) -> Self {
        Self::from_kind(PatternKind::Type(type_pattern))
    }

    pub fn object(entries: IndexMap<String, EntryPattern>, inexact: bool) -> Self {
        Self::from_kind(PatternKind::Object(ObjectPattern {
            entries: Some(entries),
            inexact,
        }))
    }

    /// An object pattern matching any object shape.
    pub fn any_object() -> Self {
        Self::from_kind(PatternKind::Object(ObjectPattern {
            entries: None,
            inexact: true,
        }))
    }

    pub fn record(entries: IndexMap<String, EntryPattern>) -> Self {
        Self::from_kind(PatternKind::Record(RecordPattern {
            entries: Some(entries),
        }))
    }

    pub fn any_record() -> Self {
        Self::from_kind(PatternKind::Record(RecordPattern { entries: None }))
    }

    pub fn list_of(general: Pattern) -> Self {
        Self::from_kind(PatternKind::List(ListPattern {
            shape: SeqShape::General(general),
        }))
    }

    pub fn list_elements(elements: Vec<Pattern>) -> Self {
        Self::from_kind(PatternKind::List(ListPattern {
            shape: SeqShape::Elements(elements),
        }))
    }

    pub fn tuple_of(general: Pattern) -> Self {
        Self::from_kind(PatternKind::Tuple(TuplePattern {
            shape: SeqShape::General(general),
        }))
    }

    pub fn tuple_elements(elements: Vec<Pattern>) -> Self {
        Self::from_kind(PatternKind::Tuple(TuplePattern {
            shape: SeqShape::Elements(elements),
        }))
    }

    pub fn option(name: impl Into<String>, value: Pattern) -> Self {
        Self::from_kind(PatternKind::Option(OptionPattern {
            name: name.into(),
            value,
        }))
    }

    pub fn path_set(pattern: PathPattern) -> Self {
        Self::from_kind(PatternKind::PathSet(pattern))
    }

    pub fn named_segment_path(segments: Vec<PathSegment>) -> Self {
        Self::from_kind(PatternKind::NamedSegmentPath(NamedSegmentPathPattern {
            segments,
        }))
    }

    pub fn url_set(pattern: UrlPattern) -> Self {
        Self::from_kind(PatternKind::UrlSet(pattern))
    }

    pub fn host_set(pattern: HostPattern) -> Self {
        Self::from_kind(PatternKind::HostSet(pattern))
    }

    pub fn union(members: Vec<Pattern>) -> Self {
        Self::from_kind(PatternKind::Union(members))
    }

    pub fn difference(base: Pattern, removed: Pattern) -> Self {
        Self::from_kind(PatternKind::Difference { base, removed })
    }

    pub fn optional(inner: Pattern) -> Self {
        Self::from_kind(PatternKind::Optional(inner))
    }

    pub fn string(pattern: StringPattern) -> Self {
        Self::from_kind(PatternKind::String(pattern))
    }

    // ---- operations ----

    /// Membership test.
    pub fn test(&self, ctx: &Context, value: &Value) -> bool {
        match self.kind() {
            PatternKind::ExactValue(expected) => expected == value,
            PatternKind::Type(type_pattern) => type_pattern.test(value),
            PatternKind::Object(object_pattern) => match value {
                Value::Object(object) => {
                    let entries = object.entries();
                    test_entries(
                        ctx,
                        object_pattern.entries.as_ref(),
                        object_pattern.inexact,
                        &entries,
                    )
                }
                _ => false,
            },
            PatternKind::Record(record_pattern) => match value {
                Value::Record(record) => {
                    let entries: Vec<(String, Value)> = record
                        .entries()
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    test_entries(ctx, record_pattern.entries.as_ref(), false, &entries)
                }
                _ => false,
            },
            PatternKind::List(list_pattern) => match value {
                Value::List(list) => test_seq(ctx, &list_pattern.shape, &list.elements()),
                _ => false,
            },
            PatternKind::Tuple(tuple_pattern) => match value {
                Value::Tuple(tuple) => test_seq(ctx, &tuple_pattern.shape, tuple.elements()),
                _ => false,
            },
            PatternKind::Option(option_pattern) => match value {
                Value::Option(option) => {
                    option.name == option_pattern.name
                        && option_pattern.value.test(ctx, &option.value)
                }
                _ => false,
            },
            PatternKind::PathSet(path_pattern) => match value {
                Value::Path(path) => path_pattern.matches_path(path),
                _ => false,
            },
            PatternKind::NamedSegmentPath(pattern) => match value {
                Value::Path(path) => pattern.matches(path),
                _ => false,
            },
            PatternKind::UrlSet(url_pattern) => match value {
                Value::Url(url) => url_pattern.matches_url(url),
                _ => false,
            },
            PatternKind::HostSet(host_pattern) => match value {
                Value::Host(host) => host_pattern.matches_host(host),
                _ => false,
            },
            PatternKind::Union(members) => members.iter().any(|m| m.test(ctx, value)),
            PatternKind::Difference { base, removed } => {
                base.test(ctx, value) && !removed.test(ctx, value)
            }
            PatternKind::Optional(inner) => {
                matches!(value, Value::Nil) || inner.test(ctx, value)
            }
            PatternKind::String(string_pattern) => {
                let candidate = match value {
                    Value::Str(s) => s.clone(),
                    Value::StringConcatenation(c) => c.string(),
                    _ => return false,
                };
                string_pattern.is_match(ctx, &candidate).unwrap_or(false)
            }
        }
    }

    /// Projects the pattern into the symbolic lattice.
    ///
    /// `encountered` maps already-visited pattern identities to their
    /// in-progress symbolic value; re-entering a pattern yields that marker
    /// (the widest value of the pattern's kind), which keeps recursive
    /// patterns finite.
    pub fn to_symbolic_value(
        &self,
        ctx: &Context,
        encountered: &mut HashMap<usize, SymbolicValue>,
    ) -> SymbolicValue {
        if let Some(in_progress) = encountered.get(&self.identity()) {
            return in_progress.clone();
        }
        encountered.insert(self.identity(), self.widest_symbolic());

        let symbolic = match self.kind() {
            PatternKind::ExactValue(value) => value.to_symbolic(),
            PatternKind::Type(type_pattern) => type_pattern.symbolic(),
            PatternKind::Object(object_pattern) => match &object_pattern.entries {
                None => SymbolicValue::any_object(),
                Some(entries) => SymbolicValue::object(
                    symbolic_entries(ctx, entries, encountered),
                    object_pattern.inexact,
                ),
            },
            PatternKind::Record(record_pattern) => match &record_pattern.entries {
                None => SymbolicValue::any_record(),
                Some(entries) => {
                    SymbolicValue::record(symbolic_entries(ctx, entries, encountered))
                }
            },
            PatternKind::List(list_pattern) => {
                SymbolicValue::list(symbolic_seq(ctx, &list_pattern.shape, encountered))
            }
            PatternKind::Tuple(tuple_pattern) => {
                SymbolicValue::tuple(symbolic_seq(ctx, &tuple_pattern.shape, encountered))
            }
            PatternKind::Option(_) => SymbolicValue::any_atom(AtomKind::Option),
            PatternKind::PathSet(_) | PatternKind::NamedSegmentPath(_) => {
                SymbolicValue::any_atom(AtomKind::Path)
            }
            PatternKind::UrlSet(_) => SymbolicValue::any_atom(AtomKind::Url),
            PatternKind::HostSet(_) => SymbolicValue::any_atom(AtomKind::Host),
            PatternKind::Union(members) => SymbolicValue::union(
                members
                    .iter()
                    .map(|m| m.to_symbolic_value(ctx, encountered))
                    .collect(),
            ),
            PatternKind::Difference { base, .. } => base.to_symbolic_value(ctx, encountered),
            PatternKind::Optional(inner) => SymbolicValue::union(vec![
                SymbolicValue::atom(Atom::Nil),
                inner.to_symbolic_value(ctx, encountered),
            ]),
            PatternKind::String(_) => SymbolicValue::any_atom(AtomKind::Str),
        };

        encountered.remove(&self.identity());
        symbolic
    }

    /// The per-kind symbolic top used as the in-progress cycle marker.
    fn widest_symbolic(&self) -> SymbolicValue {
        match self.kind() {
            PatternKind::ExactValue(value) => value.to_symbolic().widest_of_type(),
            PatternKind::Type(type_pattern) => type_pattern.symbolic(),
            PatternKind::Object(_) => SymbolicValue::any_object(),
            PatternKind::Record(_) => SymbolicValue::any_record(),
            PatternKind::List(_) => SymbolicValue::any_list(),
            PatternKind::Tuple(_) => SymbolicValue::any_tuple(),
            PatternKind::Option(_) => SymbolicValue::any_atom(AtomKind::Option),
            PatternKind::PathSet(_) | PatternKind::NamedSegmentPath(_) => {
                SymbolicValue::any_atom(AtomKind::Path)
            }
            PatternKind::UrlSet(_) => SymbolicValue::any_atom(AtomKind::Url),
            PatternKind::HostSet(_) => SymbolicValue::any_atom(AtomKind::Host),
            PatternKind::Union(_) | PatternKind::Difference { .. } => SymbolicValue::any(),
            PatternKind::Optional(_) => SymbolicValue::any(),
            PatternKind::String(_) => SymbolicValue::any_atom(AtomKind::Str),
        }
    }

    /// Name used in the untyped JSON wrapper when this pattern is a type
    /// pattern; `None` otherwise.
    pub fn type_name(&self) -> Option<&'static str> {
        match self.kind() {
            PatternKind::Type(type_pattern) => Some(type_pattern.name),
            _ => None,
        }
    }

    /// Materializes a concretizable symbolic value back into a pattern.
    ///
    /// This is the check-time schema-extension path: a symbolic shape that
    /// carries enough structure (`is_concretizable`) becomes a concrete
    /// pattern without any runtime information. Runtime-only kinds and
    /// function signatures return `None`.
    pub fn from_symbolic(symbolic: &SymbolicValue) -> Option<Pattern> {
        use rill_symbolic::SymbolicKind;
        match symbolic.kind() {
            SymbolicKind::Any => Some(Self::type_pattern(TypePattern {
                name: "any",
                matcher: crate::pattern::TypeMatcher::Any,
            })),
            SymbolicKind::Serializable => Some(Self::type_pattern(TypePattern {
                name: "serializable",
                matcher: crate::pattern::TypeMatcher::Serializable,
            })),
            SymbolicKind::AnyAtom(kind) => {
                let tag = atom_kind_tag(*kind);
                Some(Self::type_pattern(TypePattern::tag(tag.name(), tag)))
            }
            SymbolicKind::Atom(atom) => Some(Self::exact(value_from_atom(atom)?)),
            SymbolicKind::Object { entries, inexact } => match entries {
                None => Some(Self::any_object()),
                Some(entries) => Some(Self::object(entry_patterns(entries)?, *inexact)),
            },
            SymbolicKind::Record { entries } => match entries {
                None => Some(Self::any_record()),
                Some(entries) => Some(Self::record(entry_patterns(entries)?)),
            },
            SymbolicKind::List(seq) => seq_pattern(seq, Self::list_of, Self::list_elements),
            SymbolicKind::Tuple(seq) => seq_pattern(seq, Self::tuple_of, Self::tuple_elements),
            SymbolicKind::Union(members) => {
                let members: Option<Vec<Pattern>> =
                    members.iter().map(Self::from_symbolic).collect();
                Some(Self::union(members?))
            }
            SymbolicKind::Function(_)
            | SymbolicKind::Runtime(_)
            | SymbolicKind::AnyPattern => None,
        }
    }
}

fn atom_kind_tag(kind: rill_symbolic::AtomKind) -> crate::value::TypeTag {
    use crate::value::TypeTag;
    use rill_symbolic::AtomKind as K;
    match kind {
        K::Nil => TypeTag::Nil,
        K::Bool => TypeTag::Bool,
        K::Int => TypeTag::Int,
        K::Float => TypeTag::Float,
        K::Rune => TypeTag::Rune,
        K::Byte => TypeTag::Byte,
        K::Str => TypeTag::Str,
        K::Path => TypeTag::Path,
        K::PathPattern => TypeTag::PathPattern,
        K::Url => TypeTag::Url,
        K::UrlPattern => TypeTag::UrlPattern,
        K::Host => TypeTag::Host,
        K::HostPattern => TypeTag::HostPattern,
        K::Scheme => TypeTag::Scheme,
        K::EmailAddress => TypeTag::EmailAddress,
        K::Identifier => TypeTag::Identifier,
        K::PropertyName => TypeTag::PropertyName,
        K::Duration => TypeTag::Duration,
        K::Date => TypeTag::Date,
        K::ByteCount => TypeTag::ByteCount,
        K::LineCount => TypeTag::LineCount,
        K::RuneCount => TypeTag::RuneCount,
        K::ByteRate => TypeTag::ByteRate,
        K::SimpleRate => TypeTag::SimpleRate,
        K::Port => TypeTag::Port,
        K::Color => TypeTag::Color,
        K::FileMode => TypeTag::FileMode,
        K::Mimetype => TypeTag::Mimetype,
        K::Option => TypeTag::Option,
        K::IntRange => TypeTag::IntRange,
        K::RuneRange => TypeTag::RuneRange,
        K::QuantityRange => TypeTag::QuantityRange,
    }
}

/// The concrete value behind an exact atom, when one can be rebuilt.
fn value_from_atom(atom: &Atom) -> Option<Value> {
    use crate::value as v;
    Some(match atom {
        Atom::Nil => Value::Nil,
        Atom::Bool(b) => Value::Bool(*b),
        Atom::Int(i) => Value::Int(*i),
        Atom::Float(x) => Value::Float(*x),
        Atom::Rune(r) => Value::Rune(*r),
        Atom::Byte(b) => Value::Byte(*b),
        Atom::Str(s) => Value::Str(s.clone()),
        Atom::Path(s) => Value::Path(v::Path::new(s.clone()).ok()?),
        Atom::PathPattern(s) => Value::PathPattern(PathPattern::new(s.clone()).ok()?),
        Atom::Url(s) => Value::Url(v::Url::new(s.clone()).ok()?),
        Atom::UrlPattern(s) => Value::UrlPattern(UrlPattern::new(s.clone()).ok()?),
        Atom::Host(s) => Value::Host(v::Host::new(s.clone()).ok()?),
        Atom::HostPattern(s) => Value::HostPattern(HostPattern::new(s.clone()).ok()?),
        Atom::Scheme(s) => Value::Scheme(v::Scheme::new(s.clone()).ok()?),
        Atom::EmailAddress(s) => Value::EmailAddress(v::EmailAddress::new(s.clone()).ok()?),
        Atom::Identifier(s) => Value::Identifier(v::Identifier::new(s.clone()).ok()?),
        Atom::PropertyName(s) => Value::PropertyName(v::PropertyName::new(s.clone()).ok()?),
        Atom::Mimetype(s) => Value::Mimetype(v::Mimetype::new(s.clone()).ok()?),
        Atom::IntRange(start, end) => Value::IntRange(v::IntRange::new(*start, *end)),
        Atom::RuneRange(start, end) => Value::RuneRange(v::RuneRange::new(*start, *end)),
        Atom::Quantity(kind, value) => match kind {
            rill_symbolic::AtomKind::Duration => {
                Value::Duration(v::Duration::from_nanos(u64::try_from(*value).ok()?))
            }
            rill_symbolic::AtomKind::ByteCount => Value::ByteCount(v::ByteCount::new(*value)),
            rill_symbolic::AtomKind::LineCount => Value::LineCount(v::LineCount::new(*value)),
            rill_symbolic::AtomKind::RuneCount => Value::RuneCount(v::RuneCount::new(*value)),
            rill_symbolic::AtomKind::ByteRate => Value::ByteRate(v::ByteRate::new(*value)),
            rill_symbolic::AtomKind::SimpleRate => {
                Value::SimpleRate(v::SimpleRate::new(*value))
            }
            rill_symbolic::AtomKind::Port => Value::Port(v::Port {
                number: u16::try_from(*value).ok()?,
                scheme: None,
            }),
            rill_symbolic::AtomKind::FileMode => {
                Value::FileMode(v::FileMode(u32::try_from(*value).ok()?))
            }
            rill_symbolic::AtomKind::Date => {
                Value::Date(v::Date::new(chrono::DateTime::from_timestamp_nanos(*value)))
            }
            _ => return None,
        },
    })
}

fn entry_patterns(
    entries: &IndexMap<String, SymbolicEntry>,
) -> Option<IndexMap<String, EntryPattern>> {
    entries
        .iter()
        .map(|(key, entry)| {
            Pattern::from_symbolic(&entry.value).map(|pattern| {
                (
                    key.clone(),
                    EntryPattern {
                        pattern,
                        optional: entry.optional,
                    },
                )
            })
        })
        .collect()
}

fn seq_pattern(
    seq: &SymbolicSeq,
    general: fn(Pattern) -> Pattern,
    elements: fn(Vec<Pattern>) -> Pattern,
) -> Option<Pattern> {
    match seq {
        SymbolicSeq::Any => Some(general(Pattern::type_pattern(TypePattern {
            name: "any",
            matcher: TypeMatcher::Any,
        }))),
        SymbolicSeq::General(g) => Some(general(Pattern::from_symbolic(g)?)),
        SymbolicSeq::Elements(es) => {
            let patterns: Option<Vec<Pattern>> = es.iter().map(Pattern::from_symbolic).collect();
            Some(elements(patterns?))
        }
    }
}

fn test_entries(
    ctx: &Context,
    entry_patterns: Option<&IndexMap<String, EntryPattern>>,
    inexact: bool,
    entries: &[(String, Value)],
) -> bool {
    let Some(entry_patterns) = entry_patterns else {
        return true;
    };
    for (key, entry) in entry_patterns {
        match entries.iter().find(|(k, _)| k == key) {
            Some((_, value)) => {
                if !entry.pattern.test(ctx, value) {
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
        for (key, _) in entries {
            if !entry_patterns.contains_key(key) {
                return false;
            }
        }
    }
    true
}

fn test_seq(ctx: &Context, shape: &SeqShape, elements: &[Value]) -> bool {
    match shape {
        SeqShape::General(general) => elements.iter().all(|e| general.test(ctx, e)),
        SeqShape::Elements(patterns) => {
            patterns.len() == elements.len()
                && patterns
                    .iter()
                    .zip(elements)
                    .all(|(p, e)| p.test(ctx, e))
        }
    }
}

fn symbolic_entries(
    ctx: &Context,
    entries: &IndexMap<String, EntryPattern>,
    encountered: &mut HashMap<usize, SymbolicValue>,
) -> IndexMap<String, SymbolicEntry> {
    entries
        .iter()
        .map(|(key, entry)| {
            let value = entry.pattern.to_symbolic_value(ctx, encountered);
            (
                key.clone(),
                SymbolicEntry {
                    value,
                    optional: entry.optional,
                },
            )
        })
        .collect()
}

fn symbolic_seq(
    ctx: &Context,
    shape: &SeqShape,
    encountered: &mut HashMap<usize, SymbolicValue>,
) -> SymbolicSeq {
    match shape {
        SeqShape::General(general) => {
            SymbolicSeq::General(general.to_symbolic_value(ctx, encountered))
        }
        SeqShape::Elements(elements) => SymbolicSeq::Elements(
            elements
                .iter()
                .map(|e| e.to_symbolic_value(ctx, encountered))
                .collect(),
        ),
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            PatternKind::ExactValue(value) => write!(f, "{value}"),
            PatternKind::Type(type_pattern) => f.write_str(type_pattern.name),
            PatternKind::Object(object_pattern) => {
                write_entries(f, "{", object_pattern.entries.as_ref(), object_pattern.inexact)
            }
            PatternKind::Record(record_pattern) => {
                write_entries(f, "#{", record_pattern.entries.as_ref(), false)
            }
            PatternKind::List(list_pattern) => write_seq(f, "[]", &list_pattern.shape),
            PatternKind::Tuple(tuple_pattern) => write_seq(f, "#[]", &tuple_pattern.shape),
            PatternKind::Option(option_pattern) => {
                write!(f, "--{}={}", option_pattern.name, option_pattern.value)
            }
            PatternKind::PathSet(pattern) => write!(f, "{pattern}"),
            PatternKind::NamedSegmentPath(pattern) => {
                for segment in &pattern.segments {
                    match segment {
                        PathSegment::Literal(lit) => write!(f, "/{lit}")?,
                        PathSegment::Named(name) => write!(f, "/{{{name}}}")?,
                    }
                }
                Ok(())
            }
            PatternKind::UrlSet(pattern) => write!(f, "{pattern}"),
            PatternKind::HostSet(pattern) => write!(f, "{pattern}"),
            PatternKind::Union(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            PatternKind::Difference { base, removed } => write!(f, "({base} \\ {removed})"),
            PatternKind::Optional(inner) => write!(f, "{inner}?"),
            PatternKind::String(string_pattern) => write!(f, "{string_pattern}"),
        }
    }
}

fn write_entries(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    entries: Option<&IndexMap<String, EntryPattern>>,
    inexact: bool,
) -> fmt::Result {
    let Some(entries) = entries else {
        return write!(f, "{open}...}}");
    };
    f.write_str(open)?;
    for (i, (key, entry)) in entries.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        let marker = if entry.optional { "?" } else { "" };
        write!(f, "{key}{marker}: {}", entry.pattern)?;
    }
    if inexact {
        if !entries.is_empty() {
            f.write_str(", ")?;
        }
        f.write_str("...")?;
    }
    f.write_str("}")
}

fn write_seq(f: &mut fmt::Formatter<'_>, open: &str, shape: &SeqShape) -> fmt::Result {
    match shape {
        SeqShape::General(general) => write!(f, "{open}{general}"),
        SeqShape::Elements(elements) => {
            write!(f, "{open}(")?;
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{element}")?;
            }
            f.write_str(")")
        }
    }
}

/// Entry order is semantically visible (migration walks it); the helpers keep
/// construction terse in tests and builtins.
pub fn object_entries(
    pairs: impl IntoIterator<Item = (&'static str, Pattern, bool)>,
) -> IndexMap<String, EntryPattern> {
    pairs
        .into_iter()
        .map(|(key, pattern, optional)| {
            (
                key.to_string(),
                EntryPattern {
                    pattern,
                    optional,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use crate::value::{Object, Path};
    use rill_symbolic::{RecTestCallState, SymbolicKind};

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    fn int_pattern(ctx: &Context) -> Pattern {
        ctx.resolve_named_pattern("int").unwrap()
    }

    #[test]
    fn exact_value_pattern() {
        let ctx = ctx();
        let pattern = Pattern::exact(Value::Int(42));
        assert!(pattern.test(&ctx, &Value::Int(42)));
        assert!(!pattern.test(&ctx, &Value::Int(41)));
    }

    #[test]
    fn object_pattern_membership() {
        let ctx = ctx();
        let int = int_pattern(&ctx);
        let pattern = Pattern::object(
            object_entries([("a", int.clone(), false), ("b", int.clone(), true)]),
            false,
        );

        let ok = Object::new([("a".to_string(), Value::Int(1))]);
        assert!(pattern.test(&ctx, &Value::Object(ok)));

        let with_optional = Object::new([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]);
        assert!(pattern.test(&ctx, &Value::Object(with_optional)));

        let missing_required = Object::new([("b".to_string(), Value::Int(2))]);
        assert!(!pattern.test(&ctx, &Value::Object(missing_required)));

        let extra_key = Object::new([
            ("a".to_string(), Value::Int(1)),
            ("z".to_string(), Value::Int(3)),
        ]);
        assert!(!pattern.test(&ctx, &Value::Object(extra_key)));
    }

    #[test]
    fn inexact_object_pattern_tolerates_extras() {
        let ctx = ctx();
        let pattern = Pattern::object(
            object_entries([("a", int_pattern(&ctx), false)]),
            true,
        );
        let value = Object::new([
            ("a".to_string(), Value::Int(1)),
            ("extra".to_string(), Value::Bool(true)),
        ]);
        assert!(pattern.test(&ctx, &Value::Object(value)));
    }

    #[test]
    fn list_patterns() {
        let ctx = ctx();
        let ints = Pattern::list_of(int_pattern(&ctx));
        let list = crate::value::List::new_int(vec![1, 2, 3]);
        assert!(ints.test(&ctx, &Value::List(list)));

        let mixed = crate::value::List::new(vec![Value::Int(1), Value::Str("x".into())]);
        assert!(!ints.test(&ctx, &Value::List(mixed)));

        let pair = Pattern::list_elements(vec![int_pattern(&ctx), int_pattern(&ctx)]);
        let two = crate::value::List::new_int(vec![1, 2]);
        let three = crate::value::List::new_int(vec![1, 2, 3]);
        assert!(pair.test(&ctx, &Value::List(two)));
        assert!(!pair.test(&ctx, &Value::List(three)));
    }

    #[test]
    fn union_difference_optional() {
        let ctx = ctx();
        let int = int_pattern(&ctx);
        let str_pattern = ctx.resolve_named_pattern("str").unwrap();
        let union = Pattern::union(vec![int.clone(), str_pattern]);
        assert!(union.test(&ctx, &Value::Int(1)));
        assert!(union.test(&ctx, &Value::Str("x".into())));
        assert!(!union.test(&ctx, &Value::Bool(true)));

        let not_forty_two = Pattern::difference(int.clone(), Pattern::exact(Value::Int(42)));
        assert!(not_forty_two.test(&ctx, &Value::Int(41)));
        assert!(!not_forty_two.test(&ctx, &Value::Int(42)));

        let optional = Pattern::optional(int);
        assert!(optional.test(&ctx, &Value::Nil));
        assert!(optional.test(&ctx, &Value::Int(1)));
        assert!(!optional.test(&ctx, &Value::Str("x".into())));
    }

    #[test]
    fn named_segment_path_pattern() {
        let ctx = ctx();
        let pattern = Pattern::named_segment_path(vec![
            PathSegment::Literal("users".into()),
            PathSegment::Named("id".into()),
        ]);
        assert!(pattern.test(&ctx, &Value::Path(Path::new("/users/12").unwrap())));
        assert!(!pattern.test(&ctx, &Value::Path(Path::new("/users").unwrap())));
        assert!(!pattern.test(&ctx, &Value::Path(Path::new("/posts/12").unwrap())));
    }

    #[test]
    fn symbolic_projection_of_object_pattern() {
        let ctx = ctx();
        let pattern = Pattern::object(
            object_entries([("a", int_pattern(&ctx), false)]),
            false,
        );
        let symbolic = pattern.to_symbolic_value(&ctx, &mut HashMap::new());
        match symbolic.kind() {
            SymbolicKind::Object { entries, inexact } => {
                assert!(!inexact);
                let entries = entries.as_ref().unwrap();
                assert!(entries.contains_key("a"));
            }
            other => panic!("unexpected symbolic kind: {other:?}"),
        }
    }

    #[test]
    fn symbolic_projection_is_cycle_safe() {
        let ctx = ctx();
        // A list pattern whose general element is the pattern itself, built
        // through a union to obtain a cyclic Arc graph.
        let leaf = int_pattern(&ctx);
        let recursive = Pattern::list_of(Pattern::union(vec![leaf]));
        // Simulate re-entry by seeding the map with the pattern itself.
        let mut encountered = HashMap::new();
        encountered.insert(recursive.identity(), SymbolicValue::any_list());
        let symbolic = recursive.to_symbolic_value(&ctx, &mut encountered);
        let mut state = RecTestCallState::new();
        assert!(SymbolicValue::any_list().test(&symbolic, &mut state));
    }

    #[test]
    fn concretizing_a_projection_preserves_membership() {
        let ctx = ctx();
        let original = Pattern::object(
            object_entries([
                ("n", int_pattern(&ctx), false),
                ("tags", Pattern::list_of(ctx.resolve_named_pattern("str").unwrap()), true),
            ]),
            false,
        );
        let symbolic = original.to_symbolic_value(&ctx, &mut HashMap::new());
        assert!(symbolic.is_concretizable());
        let rebuilt = Pattern::from_symbolic(&symbolic).unwrap();

        let value = Value::Object(Object::new([("n".to_string(), Value::Int(3))]));
        assert!(original.test(&ctx, &value));
        assert!(rebuilt.test(&ctx, &value));

        let bad = Value::Object(Object::new([("n".to_string(), Value::Str("x".into()))]));
        assert!(!rebuilt.test(&ctx, &bad));
    }

    #[test]
    fn runtime_shapes_do_not_concretize() {
        assert!(Pattern::from_symbolic(&SymbolicValue::runtime(
            rill_symbolic::RuntimeKind::Thread
        ))
        .is_none());
    }

    #[test]
    fn subtype_through_symbolic_lattice() {
        let ctx = ctx();
        let int = int_pattern(&ctx);
        let wide = Pattern::object(
            object_entries([("a", int.clone(), false), ("b", int.clone(), true)]),
            false,
        );
        let narrow = Pattern::object(
            object_entries([("a", int.clone(), false), ("b", int, false)]),
            false,
        );
        let mut state = RecTestCallState::new();
        let wide_symbolic = wide.to_symbolic_value(&ctx, &mut HashMap::new());
        let narrow_symbolic = narrow.to_symbolic_value(&ctx, &mut HashMap::new());
        assert!(wide_symbolic.test(&narrow_symbolic, &mut state));
        assert!(!narrow_symbolic.test(&wide_symbolic, &mut state));
    }
}
