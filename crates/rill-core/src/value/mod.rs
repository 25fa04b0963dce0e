//! The runtime value universe.
//!
//! `Value` is a tagged union over every kind a rill script can manipulate.
//! Mutability is a property of the variant: objects, lists, slices and
//! dictionaries are handles with reference identity and internal locks;
//! records, tuples and all scalar kinds are immutable and freely shared.

pub mod dict;
pub mod list;
pub mod object;
pub mod primitives;
pub mod quantity;
pub mod range;
pub mod record;
pub mod runtime;
pub mod string;
pub mod visibility;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use rill_symbolic::{Atom, AtomKind, RuntimeKind, SymbolicEntry, SymbolicSeq, SymbolicValue};
use thiserror::Error;

pub use dict::{Dictionary, KeyList};
pub use list::{List, UnderlyingList};
pub use object::{Object, ObjectState};
pub use primitives::{
    EmailAddress, Host, HostPattern, Identifier, Mimetype, Path, PathPattern, PrimitiveError,
    PropertyName, Scheme, Url, UrlPattern,
};
pub use quantity::{
    ByteCount, ByteRate, Color, Date, Duration, FileMode, LineCount, Port, Quantity, RuneCount,
    SimpleRate,
};
pub use range::{IntRange, QuantityRange, RuneRange};
pub use record::{Record, Tuple};
pub use runtime::{FileInfo, HttpRequest, HttpServer, Mutation, MutationKind, Thread};
pub use string::{ByteSlice, RuneSlice, StringConcatenation};
pub use visibility::Visibility;

use crate::pattern::Pattern;

/// Process-unique identity token for handle values. Allocated at creation and
/// used to key cycle-detection maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u64);

static NEXT_VALUE_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_value_id() -> ValueId {
    ValueId(NEXT_VALUE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A named option value (`--verbose`, `-o out.txt`).
#[derive(Debug, Clone, PartialEq)]
pub struct OptionValue {
    pub name: String,
    pub value: Value,
}

impl OptionValue {
    /// The CLI flag form: one dash for single-rune names, two otherwise.
    pub fn flag(&self) -> String {
        if self.name.chars().count() <= 1 {
            format!("-{}", self.name)
        } else {
            format!("--{}", self.name)
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Rune(char),
    Byte(u8),
    Str(String),
    Path(Path),
    PathPattern(PathPattern),
    Url(Url),
    UrlPattern(UrlPattern),
    Host(Host),
    HostPattern(HostPattern),
    Scheme(Scheme),
    EmailAddress(EmailAddress),
    Identifier(Identifier),
    PropertyName(PropertyName),
    Duration(Duration),
    Date(Date),
    ByteCount(ByteCount),
    LineCount(LineCount),
    RuneCount(RuneCount),
    ByteRate(ByteRate),
    SimpleRate(SimpleRate),
    Port(Port),
    Color(Color),
    FileMode(FileMode),
    Mimetype(Mimetype),
    Option(Box<OptionValue>),
    IntRange(IntRange),
    RuneRange(RuneRange),
    QuantityRange(QuantityRange),
    RuneSlice(RuneSlice),
    ByteSlice(ByteSlice),
    Dictionary(Dictionary),
    KeyList(KeyList),
    Object(Object),
    Record(Arc<Record>),
    List(List),
    Tuple(Arc<Tuple>),
    StringConcatenation(Arc<StringConcatenation>),
    Mutation(Arc<Mutation>),
    Thread(Thread),
    HttpRequest(Arc<HttpRequest>),
    HttpServer(HttpServer),
    FileInfo(Arc<FileInfo>),
    Pattern(Pattern),
}

/// Kind tag of a value, used by type patterns and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
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
    RuneSlice,
    ByteSlice,
    Dictionary,
    KeyList,
    Object,
    Record,
    List,
    Tuple,
    StringConcatenation,
    Mutation,
    Thread,
    HttpRequest,
    HttpServer,
    FileInfo,
    Pattern,
}

impl TypeTag {
    /// The pattern name of this kind; also the `<typename>__value` wrapper key
    /// in context-free JSON.
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Nil => "nil",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Float => "float",
            TypeTag::Rune => "rune",
            TypeTag::Byte => "byte",
            TypeTag::Str => "str",
            TypeTag::Path => "path",
            TypeTag::PathPattern => "path-pattern",
            TypeTag::Url => "url",
            TypeTag::UrlPattern => "url-pattern",
            TypeTag::Host => "host",
            TypeTag::HostPattern => "host-pattern",
            TypeTag::Scheme => "scheme",
            TypeTag::EmailAddress => "email-addr",
            TypeTag::Identifier => "identifier",
            TypeTag::PropertyName => "property-name",
            TypeTag::Duration => "duration",
            TypeTag::Date => "date",
            TypeTag::ByteCount => "byte-count",
            TypeTag::LineCount => "line-count",
            TypeTag::RuneCount => "rune-count",
            TypeTag::ByteRate => "byte-rate",
            TypeTag::SimpleRate => "simple-rate",
            TypeTag::Port => "port",
            TypeTag::Color => "color",
            TypeTag::FileMode => "file-mode",
            TypeTag::Mimetype => "mimetype",
            TypeTag::Option => "option",
            TypeTag::IntRange => "int-range",
            TypeTag::RuneRange => "rune-range",
            TypeTag::QuantityRange => "quantity-range",
            TypeTag::RuneSlice => "rune-slice",
            TypeTag::ByteSlice => "byte-slice",
            TypeTag::Dictionary => "dict",
            TypeTag::KeyList => "key-list",
            TypeTag::Object => "object",
            TypeTag::Record => "record",
            TypeTag::List => "list",
            TypeTag::Tuple => "tuple",
            TypeTag::StringConcatenation => "str-concat",
            TypeTag::Mutation => "mutation",
            TypeTag::Thread => "lthread",
            TypeTag::HttpRequest => "http-request",
            TypeTag::HttpServer => "http-server",
            TypeTag::FileInfo => "file-info",
            TypeTag::Pattern => "pattern",
        }
    }
}

/// The three sharing tiers of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharability {
    /// Freely shared: scalars, records, tuples.
    Immutable,
    /// Mutable but lock-protected; may be shared after an explicit `share`.
    Sharable,
    /// Mutable without a lock; owned by a single lthread, never shared.
    Unshared,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharingError {
    #[error("values of type {0} cannot be shared between lthreads")]
    NotSharable(&'static str),
}

impl Value {
    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Rune(_) => TypeTag::Rune,
            Value::Byte(_) => TypeTag::Byte,
            Value::Str(_) => TypeTag::Str,
            Value::Path(_) => TypeTag::Path,
            Value::PathPattern(_) => TypeTag::PathPattern,
            Value::Url(_) => TypeTag::Url,
            Value::UrlPattern(_) => TypeTag::UrlPattern,
            Value::Host(_) => TypeTag::Host,
            Value::HostPattern(_) => TypeTag::HostPattern,
            Value::Scheme(_) => TypeTag::Scheme,
            Value::EmailAddress(_) => TypeTag::EmailAddress,
            Value::Identifier(_) => TypeTag::Identifier,
            Value::PropertyName(_) => TypeTag::PropertyName,
            Value::Duration(_) => TypeTag::Duration,
            Value::Date(_) => TypeTag::Date,
            Value::ByteCount(_) => TypeTag::ByteCount,
            Value::LineCount(_) => TypeTag::LineCount,
            Value::RuneCount(_) => TypeTag::RuneCount,
            Value::ByteRate(_) => TypeTag::ByteRate,
            Value::SimpleRate(_) => TypeTag::SimpleRate,
            Value::Port(_) => TypeTag::Port,
            Value::Color(_) => TypeTag::Color,
            Value::FileMode(_) => TypeTag::FileMode,
            Value::Mimetype(_) => TypeTag::Mimetype,
            Value::Option(_) => TypeTag::Option,
            Value::IntRange(_) => TypeTag::IntRange,
            Value::RuneRange(_) => TypeTag::RuneRange,
            Value::QuantityRange(_) => TypeTag::QuantityRange,
            Value::RuneSlice(_) => TypeTag::RuneSlice,
            Value::ByteSlice(_) => TypeTag::ByteSlice,
            Value::Dictionary(_) => TypeTag::Dictionary,
            Value::KeyList(_) => TypeTag::KeyList,
            Value::Object(_) => TypeTag::Object,
            Value::Record(_) => TypeTag::Record,
            Value::List(_) => TypeTag::List,
            Value::Tuple(_) => TypeTag::Tuple,
            Value::StringConcatenation(_) => TypeTag::StringConcatenation,
            Value::Mutation(_) => TypeTag::Mutation,
            Value::Thread(_) => TypeTag::Thread,
            Value::HttpRequest(_) => TypeTag::HttpRequest,
            Value::HttpServer(_) => TypeTag::HttpServer,
            Value::FileInfo(_) => TypeTag::FileInfo,
            Value::Pattern(_) => TypeTag::Pattern,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        self.type_tag().name()
    }

    /// Identity token for handle values, `None` for immutables.
    pub fn identity(&self) -> Option<ValueId> {
        match self {
            Value::Object(o) => Some(o.id()),
            Value::List(l) => Some(l.id()),
            Value::RuneSlice(s) => Some(s.id()),
            Value::ByteSlice(s) => Some(s.id()),
            Value::Dictionary(d) => Some(d.id()),
            Value::Thread(t) => Some(t.id()),
            Value::HttpServer(s) => Some(s.id()),
            _ => None,
        }
    }

    pub fn sharability(&self) -> Sharability {
        match self {
            Value::Object(_)
            | Value::List(_)
            | Value::RuneSlice(_)
            | Value::ByteSlice(_)
            | Value::Dictionary(_)
            | Value::Thread(_) => Sharability::Sharable,
            Value::HttpServer(_) => Sharability::Unshared,
            _ => Sharability::Immutable,
        }
    }

    pub fn is_mutable(&self) -> bool {
        !matches!(self.sharability(), Sharability::Immutable)
    }

    /// Marks a sharable value as shared. Fails for the `Unshared` tier.
    pub fn share(&self) -> Result<(), SharingError> {
        match self {
            Value::Object(o) => {
                o.mark_shared();
                Ok(())
            }
            Value::List(l) => {
                l.mark_shared();
                Ok(())
            }
            // Slices, dictionaries and threads are lock-protected already.
            Value::RuneSlice(_)
            | Value::ByteSlice(_)
            | Value::Dictionary(_)
            | Value::Thread(_) => Ok(()),
            value if value.sharability() == Sharability::Immutable => Ok(()),
            value => Err(SharingError::NotSharable(value.kind_name())),
        }
    }

    /// Deep-clones unshared mutable values; shared handles and immutables are
    /// cloned shallowly. Cyclic graphs keep their aliasing in the clone.
    pub fn clone_value(&self) -> Value {
        self.clone_value_inner(&mut HashMap::new())
    }

    fn clone_value_inner(&self, cloned: &mut HashMap<ValueId, Value>) -> Value {
        match self {
            Value::Object(object) => {
                if object.is_shared() {
                    return self.clone();
                }
                if let Some(existing) = cloned.get(&object.id()) {
                    return existing.clone();
                }
                let copy = Object::empty();
                cloned.insert(object.id(), Value::Object(copy.clone()));
                for (key, value) in object.entries() {
                    copy.set_prop(&key, value.clone_value_inner(cloned));
                }
                Value::Object(copy)
            }
            Value::List(list) => {
                if list.is_shared() {
                    return self.clone();
                }
                if let Some(existing) = cloned.get(&list.id()) {
                    return existing.clone();
                }
                let copy = List::new(Vec::new());
                cloned.insert(list.id(), Value::List(copy.clone()));
                for element in list.elements() {
                    copy.push(element.clone_value_inner(cloned));
                }
                Value::List(copy)
            }
            Value::RuneSlice(slice) => Value::RuneSlice(RuneSlice::new(slice.snapshot())),
            Value::ByteSlice(slice) => Value::ByteSlice(ByteSlice::new(slice.snapshot())),
            Value::Dictionary(dict) => Value::Dictionary(Dictionary::new(
                dict.entries()
                    .into_iter()
                    .map(|(k, v)| (k.clone_value_inner(cloned), v.clone_value_inner(cloned))),
            )),
            _ => self.clone(),
        }
    }

    /// The symbolic counterpart of this concrete value.
    pub fn to_symbolic(&self) -> SymbolicValue {
        self.to_symbolic_inner(&mut Vec::new())
    }

    fn to_symbolic_inner(&self, seen: &mut Vec<ValueId>) -> SymbolicValue {
        match self {
            Value::Nil => SymbolicValue::atom(Atom::Nil),
            Value::Bool(b) => SymbolicValue::atom(Atom::Bool(*b)),
            Value::Int(i) => SymbolicValue::atom(Atom::Int(*i)),
            Value::Float(f) => SymbolicValue::atom(Atom::Float(*f)),
            Value::Rune(r) => SymbolicValue::atom(Atom::Rune(*r)),
            Value::Byte(b) => SymbolicValue::atom(Atom::Byte(*b)),
            Value::Str(s) => SymbolicValue::atom(Atom::Str(s.clone())),
            Value::Path(p) => SymbolicValue::atom(Atom::Path(p.as_str().to_string())),
            Value::PathPattern(p) => {
                SymbolicValue::atom(Atom::PathPattern(p.as_str().to_string()))
            }
            Value::Url(u) => SymbolicValue::atom(Atom::Url(u.as_str().to_string())),
            Value::UrlPattern(u) => SymbolicValue::atom(Atom::UrlPattern(u.as_str().to_string())),
            Value::Host(h) => SymbolicValue::atom(Atom::Host(h.as_str().to_string())),
            Value::HostPattern(h) => {
                SymbolicValue::atom(Atom::HostPattern(h.as_str().to_string()))
            }
            Value::Scheme(s) => SymbolicValue::atom(Atom::Scheme(s.as_str().to_string())),
            Value::EmailAddress(e) => {
                SymbolicValue::atom(Atom::EmailAddress(e.as_str().to_string()))
            }
            Value::Identifier(i) => SymbolicValue::atom(Atom::Identifier(i.as_str().to_string())),
            Value::PropertyName(p) => {
                SymbolicValue::atom(Atom::PropertyName(p.as_str().to_string()))
            }
            Value::Duration(d) => SymbolicValue::atom(Atom::Quantity(
                AtomKind::Duration,
                d.as_nanos().min(i64::MAX as u64) as i64,
            )),
            Value::Date(d) => SymbolicValue::atom(Atom::Quantity(
                AtomKind::Date,
                d.inner().timestamp_nanos_opt().unwrap_or(i64::MAX),
            )),
            Value::ByteCount(c) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::ByteCount, c.get()))
            }
            Value::LineCount(c) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::LineCount, c.get()))
            }
            Value::RuneCount(c) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::RuneCount, c.get()))
            }
            Value::ByteRate(r) => SymbolicValue::atom(Atom::Quantity(AtomKind::ByteRate, r.get())),
            Value::SimpleRate(r) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::SimpleRate, r.get()))
            }
            Value::Port(p) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::Port, p.number as i64))
            }
            Value::Color(_) => SymbolicValue::any_atom(AtomKind::Color),
            Value::FileMode(m) => {
                SymbolicValue::atom(Atom::Quantity(AtomKind::FileMode, m.0 as i64))
            }
            Value::Mimetype(m) => SymbolicValue::atom(Atom::Mimetype(m.as_str().to_string())),
            Value::Option(_) => SymbolicValue::any_atom(AtomKind::Option),
            Value::IntRange(r) => SymbolicValue::atom(Atom::IntRange(r.start, r.end)),
            Value::RuneRange(r) => SymbolicValue::atom(Atom::RuneRange(r.start, r.end)),
            Value::QuantityRange(_) => SymbolicValue::any_atom(AtomKind::QuantityRange),
            Value::RuneSlice(_) => SymbolicValue::runtime(RuntimeKind::RuneSlice),
            Value::ByteSlice(_) => SymbolicValue::runtime(RuntimeKind::ByteSlice),
            Value::Dictionary(_) => SymbolicValue::runtime(RuntimeKind::Dictionary),
            Value::KeyList(_) => SymbolicValue::runtime(RuntimeKind::KeyList),
            Value::Object(object) => {
                if seen.contains(&object.id()) {
                    return SymbolicValue::any_object();
                }
                seen.push(object.id());
                let entries: IndexMap<String, SymbolicEntry> = object
                    .entries()
                    .into_iter()
                    .map(|(k, v)| (k, SymbolicEntry::required(v.to_symbolic_inner(seen))))
                    .collect();
                seen.pop();
                SymbolicValue::object(entries, false)
            }
            Value::Record(record) => {
                let entries: IndexMap<String, SymbolicEntry> = record
                    .entries()
                    .iter()
                    .map(|(k, v)| {
                        (k.clone(), SymbolicEntry::required(v.to_symbolic_inner(seen)))
                    })
                    .collect();
                SymbolicValue::record(entries)
            }
            Value::List(list) => {
                if seen.contains(&list.id()) {
                    return SymbolicValue::any_list();
                }
                seen.push(list.id());
                let elements = list
                    .elements()
                    .into_iter()
                    .map(|v| v.to_symbolic_inner(seen))
                    .collect();
                seen.pop();
                SymbolicValue::list(SymbolicSeq::Elements(elements))
            }
            Value::Tuple(tuple) => SymbolicValue::tuple(SymbolicSeq::Elements(
                tuple
                    .elements()
                    .iter()
                    .map(|v| v.to_symbolic_inner(seen))
                    .collect(),
            )),
            Value::StringConcatenation(concat) => {
                SymbolicValue::atom(Atom::Str(concat.string()))
            }
            Value::Mutation(_) => SymbolicValue::runtime(RuntimeKind::Mutation),
            Value::Thread(_) => SymbolicValue::runtime(RuntimeKind::Thread),
            Value::HttpRequest(_) => SymbolicValue::runtime(RuntimeKind::HttpRequest),
            Value::HttpServer(_) => SymbolicValue::runtime(RuntimeKind::HttpServer),
            Value::FileInfo(_) => SymbolicValue::runtime(RuntimeKind::FileInfo),
            Value::Pattern(_) => SymbolicValue::any_pattern(),
        }
    }
}

impl PartialEq for Value {
    /// Scalars compare by value, `Object` and `List` (and the other handle
    /// kinds) by reference, `Record` and `Tuple` structurally.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Rune(a), Value::Rune(b)) => a == b,
            (Value::Byte(a), Value::Byte(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Path(a), Value::Path(b)) => a == b,
            (Value::PathPattern(a), Value::PathPattern(b)) => a == b,
            (Value::Url(a), Value::Url(b)) => a == b,
            (Value::UrlPattern(a), Value::UrlPattern(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => a == b,
            (Value::HostPattern(a), Value::HostPattern(b)) => a == b,
            (Value::Scheme(a), Value::Scheme(b)) => a == b,
            (Value::EmailAddress(a), Value::EmailAddress(b)) => a == b,
            (Value::Identifier(a), Value::Identifier(b)) => a == b,
            (Value::PropertyName(a), Value::PropertyName(b)) => a == b,
            (Value::Duration(a), Value::Duration(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::ByteCount(a), Value::ByteCount(b)) => a == b,
            (Value::LineCount(a), Value::LineCount(b)) => a == b,
            (Value::RuneCount(a), Value::RuneCount(b)) => a == b,
            (Value::ByteRate(a), Value::ByteRate(b)) => a == b,
            (Value::SimpleRate(a), Value::SimpleRate(b)) => a == b,
            (Value::Port(a), Value::Port(b)) => a == b,
            (Value::Color(a), Value::Color(b)) => a == b,
            (Value::FileMode(a), Value::FileMode(b)) => a == b,
            (Value::Mimetype(a), Value::Mimetype(b)) => a == b,
            (Value::Option(a), Value::Option(b)) => a == b,
            (Value::IntRange(a), Value::IntRange(b)) => a == b,
            (Value::RuneRange(a), Value::RuneRange(b)) => a == b,
            (Value::QuantityRange(a), Value::QuantityRange(b)) => a == b,
            (Value::RuneSlice(a), Value::RuneSlice(b)) => a.ptr_eq(b),
            (Value::ByteSlice(a), Value::ByteSlice(b)) => a.ptr_eq(b),
            (Value::Dictionary(a), Value::Dictionary(b)) => a.ptr_eq(b),
            (Value::KeyList(a), Value::KeyList(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.ptr_eq(b),
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::StringConcatenation(a), Value::StringConcatenation(b)) => {
                a.string() == b.string()
            }
            (Value::Mutation(a), Value::Mutation(b)) => a == b,
            (Value::Thread(a), Value::Thread(b)) => a.ptr_eq(b),
            (Value::HttpRequest(a), Value::HttpRequest(b)) => a == b,
            (Value::HttpServer(a), Value::HttpServer(b)) => a.ptr_eq(b),
            (Value::FileInfo(a), Value::FileInfo(b)) => a == b,
            (Value::Pattern(a), Value::Pattern(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

const MAX_DISPLAY_DEPTH: usize = 16;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_value(self, f, 0)
    }
}

fn fmt_value(value: &Value, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    if depth > MAX_DISPLAY_DEPTH {
        return f.write_str("...");
    }
    match value {
        Value::Nil => f.write_str("nil"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Float(x) => {
            if x.fract() == 0.0 && x.is_finite() {
                write!(f, "{x:.1}")
            } else {
                write!(f, "{x}")
            }
        }
        Value::Rune(r) => write!(f, "'{r}'"),
        Value::Byte(b) => write!(f, "0x{b:02x}"),
        Value::Str(s) => write!(f, "{s:?}"),
        Value::Path(p) => write!(f, "{p}"),
        Value::PathPattern(p) => write!(f, "%{p}"),
        Value::Url(u) => write!(f, "{u}"),
        Value::UrlPattern(u) => write!(f, "%{u}"),
        Value::Host(h) => write!(f, "{h}"),
        Value::HostPattern(h) => write!(f, "%{h}"),
        Value::Scheme(s) => write!(f, "{s}://"),
        Value::EmailAddress(e) => write!(f, "{e}"),
        Value::Identifier(i) => write!(f, "#{i}"),
        Value::PropertyName(p) => write!(f, ".{p}"),
        Value::Duration(d) => write!(f, "{d}"),
        Value::Date(d) => write!(f, "{d}"),
        Value::ByteCount(c) => write!(f, "{c}"),
        Value::LineCount(c) => write!(f, "{c}"),
        Value::RuneCount(c) => write!(f, "{c}"),
        Value::ByteRate(r) => write!(f, "{r}"),
        Value::SimpleRate(r) => write!(f, "{r}"),
        Value::Port(p) => write!(f, "{p}"),
        Value::Color(c) => write!(f, "{c}"),
        Value::FileMode(m) => write!(f, "{m}"),
        Value::Mimetype(m) => write!(f, "{m}"),
        Value::Option(opt) => {
            write!(f, "{}=", opt.flag())?;
            fmt_value(&opt.value, f, depth + 1)
        }
        Value::IntRange(r) => write!(f, "{r}"),
        Value::RuneRange(r) => write!(f, "{r}"),
        Value::QuantityRange(r) => write!(f, "{r}"),
        Value::RuneSlice(s) => {
            write!(f, "runes({:?})", s.snapshot().into_iter().collect::<String>())
        }
        Value::ByteSlice(s) => {
            f.write_str("0x[")?;
            for byte in s.snapshot() {
                write!(f, "{byte:02x}")?;
            }
            f.write_str("]")
        }
        Value::Dictionary(d) => {
            f.write_str(":{")?;
            for (i, (k, v)) in d.entries().into_iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(&k, f, depth + 1)?;
                f.write_str(": ")?;
                fmt_value(&v, f, depth + 1)?;
            }
            f.write_str("}")
        }
        Value::KeyList(keys) => {
            f.write_str(".{")?;
            for (i, key) in keys.names().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                f.write_str(key)?;
            }
            f.write_str("}")
        }
        Value::Object(object) => {
            f.write_str("{")?;
            for (i, (key, value)) in object.entries().into_iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}: ")?;
                fmt_value(&value, f, depth + 1)?;
            }
            f.write_str("}")
        }
        Value::Record(record) => {
            f.write_str("#{")?;
            for (i, (key, value)) in record.entries().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}: ")?;
                fmt_value(value, f, depth + 1)?;
            }
            f.write_str("}")
        }
        Value::List(list) => {
            f.write_str("[")?;
            for (i, element) in list.elements().into_iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(&element, f, depth + 1)?;
            }
            f.write_str("]")
        }
        Value::Tuple(tuple) => {
            f.write_str("#[")?;
            for (i, element) in tuple.elements().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                fmt_value(element, f, depth + 1)?;
            }
            f.write_str("]")
        }
        Value::StringConcatenation(concat) => write!(f, "{:?}", concat.string()),
        Value::Mutation(m) => write!(f, "mutation({:?} at {})", m.kind, m.path),
        Value::Thread(t) => write!(f, "lthread({})", t.name()),
        Value::HttpRequest(r) => write!(f, "http-request({} {})", r.method, r.url),
        Value::HttpServer(s) => write!(f, "http-server({})", s.host()),
        Value::FileInfo(info) => write!(f, "file-info({})", info.abs_path),
        Value::Pattern(p) => write!(f, "%{p}"),
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_equality_is_by_value() {
        assert_eq!(Value::Int(3), Value::Int(3));
        assert_ne!(Value::Int(3), Value::Float(3.0));
        assert_eq!(Value::Str("a".into()), Value::Str("a".into()));
    }

    #[test]
    fn object_equality_is_by_reference() {
        let a = Object::new([("x".to_string(), Value::Int(1))]);
        let b = Object::new([("x".to_string(), Value::Int(1))]);
        assert_ne!(Value::Object(a.clone()), Value::Object(b));
        assert_eq!(Value::Object(a.clone()), Value::Object(a));
    }

    #[test]
    fn record_equality_is_structural() {
        let a = Record::new([("x".to_string(), Value::Int(1))]);
        let b = Record::new([("x".to_string(), Value::Int(1))]);
        assert_eq!(Value::Record(Arc::new(a)), Value::Record(Arc::new(b)));
    }

    #[test]
    fn clone_value_deep_clones_unshared_objects() {
        let object = Object::new([("x".to_string(), Value::Int(1))]);
        let copy = Value::Object(object.clone()).clone_value();
        let Value::Object(copy) = copy else {
            panic!("expected object");
        };
        copy.set_prop("x", Value::Int(2));
        assert_eq!(object.prop("x"), Some(Value::Int(1)));
    }

    #[test]
    fn clone_value_keeps_shared_aliases() {
        let object = Object::new([]);
        object.mark_shared();
        let copy = Value::Object(object.clone()).clone_value();
        let Value::Object(copy) = copy else {
            panic!("expected object");
        };
        assert!(copy.ptr_eq(&object));
    }

    #[test]
    fn clone_value_preserves_cycles() {
        let object = Object::empty();
        object.set_prop("me", Value::Object(object.clone()));
        let copy = Value::Object(object.clone()).clone_value();
        let Value::Object(copy) = copy else {
            panic!("expected object");
        };
        let Some(Value::Object(inner)) = copy.prop("me") else {
            panic!("expected object property");
        };
        assert!(inner.ptr_eq(&copy));
        assert!(!copy.ptr_eq(&object));
    }

    #[test]
    fn unshared_tier_cannot_be_shared() {
        let server = HttpServer::new(Host::new("https://localhost:8080").unwrap());
        let err = Value::HttpServer(server).share().unwrap_err();
        assert_eq!(err, SharingError::NotSharable("http-server"));
    }

    #[test]
    fn display_is_cycle_bounded() {
        let object = Object::empty();
        object.set_prop("me", Value::Object(object.clone()));
        // Must terminate.
        let rendered = Value::Object(object).to_string();
        assert!(rendered.contains("..."));
    }
}
