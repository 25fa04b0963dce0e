//! The builtin type patterns (`%int`, `%str`, `%path`, ...).

use indexmap::IndexMap;
use rill_symbolic::{AtomKind, RuntimeKind, SymbolicValue};

use crate::value::{TypeTag, Value};

use super::Pattern;

/// How a type pattern decides membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeMatcher {
    /// Values of exactly this kind.
    Tag(TypeTag),
    /// Every value.
    Any,
    /// Every value with a JSON representation.
    Serializable,
}

/// A named builtin pattern matching a whole kind. The name doubles as the
/// `<typename>__value` key of the untyped JSON wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePattern {
    pub name: &'static str,
    pub matcher: TypeMatcher,
}

impl TypePattern {
    pub const fn tag(name: &'static str, tag: TypeTag) -> Self {
        Self {
            name,
            matcher: TypeMatcher::Tag(tag),
        }
    }

    pub fn test(&self, value: &Value) -> bool {
        match self.matcher {
            TypeMatcher::Any => true,
            TypeMatcher::Serializable => {
                crate::json::has_json_representation(value, &Default::default())
            }
            TypeMatcher::Tag(tag) => {
                value.type_tag() == tag
                    // Lazy concatenations are strings.
                    || (tag == TypeTag::Str
                        && value.type_tag() == TypeTag::StringConcatenation)
            }
        }
    }

    /// Whether values matched by this pattern are strings.
    pub fn matches_strings(&self) -> bool {
        matches!(self.matcher, TypeMatcher::Tag(TypeTag::Str))
    }

    pub fn symbolic(&self) -> SymbolicValue {
        match self.matcher {
            TypeMatcher::Any => SymbolicValue::any(),
            TypeMatcher::Serializable => SymbolicValue::serializable(),
            TypeMatcher::Tag(tag) => match tag {
                TypeTag::Nil => SymbolicValue::any_atom(AtomKind::Nil),
                TypeTag::Bool => SymbolicValue::any_atom(AtomKind::Bool),
                TypeTag::Int => SymbolicValue::any_atom(AtomKind::Int),
                TypeTag::Float => SymbolicValue::any_atom(AtomKind::Float),
                TypeTag::Rune => SymbolicValue::any_atom(AtomKind::Rune),
                TypeTag::Byte => SymbolicValue::any_atom(AtomKind::Byte),
                TypeTag::Str | TypeTag::StringConcatenation => {
                    SymbolicValue::any_atom(AtomKind::Str)
                }
                TypeTag::Path => SymbolicValue::any_atom(AtomKind::Path),
                TypeTag::PathPattern => SymbolicValue::any_atom(AtomKind::PathPattern),
                TypeTag::Url => SymbolicValue::any_atom(AtomKind::Url),
                TypeTag::UrlPattern => SymbolicValue::any_atom(AtomKind::UrlPattern),
                TypeTag::Host => SymbolicValue::any_atom(AtomKind::Host),
                TypeTag::HostPattern => SymbolicValue::any_atom(AtomKind::HostPattern),
                TypeTag::Scheme => SymbolicValue::any_atom(AtomKind::Scheme),
                TypeTag::EmailAddress => SymbolicValue::any_atom(AtomKind::EmailAddress),
                TypeTag::Identifier => SymbolicValue::any_atom(AtomKind::Identifier),
                TypeTag::PropertyName => SymbolicValue::any_atom(AtomKind::PropertyName),
                TypeTag::Duration => SymbolicValue::any_atom(AtomKind::Duration),
                TypeTag::Date => SymbolicValue::any_atom(AtomKind::Date),
                TypeTag::ByteCount => SymbolicValue::any_atom(AtomKind::ByteCount),
                TypeTag::LineCount => SymbolicValue::any_atom(AtomKind::LineCount),
                TypeTag::RuneCount => SymbolicValue::any_atom(AtomKind::RuneCount),
                TypeTag::ByteRate => SymbolicValue::any_atom(AtomKind::ByteRate),
                TypeTag::SimpleRate => SymbolicValue::any_atom(AtomKind::SimpleRate),
                TypeTag::Port => SymbolicValue::any_atom(AtomKind::Port),
                TypeTag::Color => SymbolicValue::any_atom(AtomKind::Color),
                TypeTag::FileMode => SymbolicValue::any_atom(AtomKind::FileMode),
                TypeTag::Mimetype => SymbolicValue::any_atom(AtomKind::Mimetype),
                TypeTag::Option => SymbolicValue::any_atom(AtomKind::Option),
                TypeTag::IntRange => SymbolicValue::any_atom(AtomKind::IntRange),
                TypeTag::RuneRange => SymbolicValue::any_atom(AtomKind::RuneRange),
                TypeTag::QuantityRange => SymbolicValue::any_atom(AtomKind::QuantityRange),
                TypeTag::RuneSlice => SymbolicValue::runtime(RuntimeKind::RuneSlice),
                TypeTag::ByteSlice => SymbolicValue::runtime(RuntimeKind::ByteSlice),
                TypeTag::Dictionary => SymbolicValue::runtime(RuntimeKind::Dictionary),
                TypeTag::KeyList => SymbolicValue::runtime(RuntimeKind::KeyList),
                TypeTag::Object => SymbolicValue::any_object(),
                TypeTag::Record => SymbolicValue::any_record(),
                TypeTag::List => SymbolicValue::any_list(),
                TypeTag::Tuple => SymbolicValue::any_tuple(),
                TypeTag::Mutation => SymbolicValue::runtime(RuntimeKind::Mutation),
                TypeTag::Thread => SymbolicValue::runtime(RuntimeKind::Thread),
                TypeTag::HttpRequest => SymbolicValue::runtime(RuntimeKind::HttpRequest),
                TypeTag::HttpServer => SymbolicValue::runtime(RuntimeKind::HttpServer),
                TypeTag::FileInfo => SymbolicValue::runtime(RuntimeKind::FileInfo),
                TypeTag::Pattern => SymbolicValue::any_pattern(),
            },
        }
    }
}

const BUILTIN_TAGS: &[(&str, TypeTag)] = &[
    ("nil", TypeTag::Nil),
    ("bool", TypeTag::Bool),
    ("int", TypeTag::Int),
    ("float", TypeTag::Float),
    ("rune", TypeTag::Rune),
    ("byte", TypeTag::Byte),
    ("str", TypeTag::Str),
    ("path", TypeTag::Path),
    ("path-pattern", TypeTag::PathPattern),
    ("url", TypeTag::Url),
    ("url-pattern", TypeTag::UrlPattern),
    ("host", TypeTag::Host),
    ("host-pattern", TypeTag::HostPattern),
    ("scheme", TypeTag::Scheme),
    ("email-addr", TypeTag::EmailAddress),
    ("identifier", TypeTag::Identifier),
    ("property-name", TypeTag::PropertyName),
    ("duration", TypeTag::Duration),
    ("date", TypeTag::Date),
    ("byte-count", TypeTag::ByteCount),
    ("line-count", TypeTag::LineCount),
    ("rune-count", TypeTag::RuneCount),
    ("byte-rate", TypeTag::ByteRate),
    ("simple-rate", TypeTag::SimpleRate),
    ("port", TypeTag::Port),
    ("color", TypeTag::Color),
    ("file-mode", TypeTag::FileMode),
    ("mimetype", TypeTag::Mimetype),
    ("option", TypeTag::Option),
    ("int-range", TypeTag::IntRange),
    ("rune-range", TypeTag::RuneRange),
    ("quantity-range", TypeTag::QuantityRange),
    ("rune-slice", TypeTag::RuneSlice),
    ("byte-slice", TypeTag::ByteSlice),
    ("dict", TypeTag::Dictionary),
    ("key-list", TypeTag::KeyList),
    ("object", TypeTag::Object),
    ("record", TypeTag::Record),
    ("list", TypeTag::List),
    ("tuple", TypeTag::Tuple),
    ("file-info", TypeTag::FileInfo),
    ("lthread", TypeTag::Thread),
    ("mutation", TypeTag::Mutation),
];

/// The pattern table every root context starts with.
pub fn builtin_patterns() -> IndexMap<String, Pattern> {
    let mut patterns = IndexMap::new();
    for &(name, tag) in BUILTIN_TAGS {
        patterns.insert(name.to_string(), Pattern::type_pattern(TypePattern::tag(name, tag)));
    }
    patterns.insert(
        "any".to_string(),
        Pattern::type_pattern(TypePattern {
            name: "any",
            matcher: TypeMatcher::Any,
        }),
    );
    patterns.insert(
        "serializable".to_string(),
        Pattern::type_pattern(TypePattern {
            name: "serializable",
            matcher: TypeMatcher::Serializable,
        }),
    );
    patterns
}

/// The wrapper type name used for a kind's untyped JSON form.
pub fn untyped_wrapper_key(tag: TypeTag) -> String {
    format!("{}__value", tag.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_patterns_match_their_kind() {
        let int = TypePattern::tag("int", TypeTag::Int);
        assert!(int.test(&Value::Int(1)));
        assert!(!int.test(&Value::Float(1.0)));
        assert!(!int.test(&Value::Nil));
    }

    #[test]
    fn str_pattern_accepts_concatenations() {
        let str_pattern = TypePattern::tag("str", TypeTag::Str);
        let concat = Value::StringConcatenation(std::sync::Arc::new(
            crate::value::StringConcatenation::new(vec!["a".into(), "b".into()]),
        ));
        assert!(str_pattern.test(&concat));
    }

    #[test]
    fn builtin_table_contains_the_wrapper_kinds() {
        let table = builtin_patterns();
        for name in ["int", "str", "path", "url", "host", "duration", "date"] {
            assert!(table.contains_key(name), "missing builtin pattern {name}");
        }
    }
}
