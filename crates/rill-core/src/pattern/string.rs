//! The string-pattern sublanguage.
//!
//! String patterns compose into a single regex where possible; dynamic
//! elements resolve through the context's named patterns at test time.

use std::fmt;

use regex::Regex;
use thiserror::Error;

use crate::context::Context;
use crate::value::RuneRange;

use super::{Pattern, PatternKind};

const MAX_RESOLUTION_DEPTH: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StringPatternError {
    #[error("invalid regex '{source_text}': {message}")]
    InvalidRegex { source_text: String, message: String },
    #[error("unknown named pattern '%{0}' in string pattern")]
    UnknownNamedPattern(String),
    #[error("pattern '%{0}' cannot be used inside a string pattern")]
    NotAStringPattern(String),
    #[error("string pattern resolution too deep (cycle through '%{0}'?)")]
    TooDeep(String),
}

/// A compiled regex element. The source is kept for display and equality.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    source: String,
    regex: Regex,
}

impl RegexPattern {
    pub fn new(source: impl Into<String>) -> Result<Self, StringPatternError> {
        let source = source.into();
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            StringPatternError::InvalidRegex {
                source_text: source.clone(),
                message: e.to_string(),
            }
        })?;
        Ok(Self { source, regex })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, s: &str) -> bool {
        self.regex.is_match(s)
    }
}

impl PartialEq for RegexPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

#[derive(Debug, Clone)]
pub enum StringPattern {
    /// A raw regex element.
    Regex(RegexPattern),
    /// An exact string segment.
    Literal(String),
    /// Segments matched one after the other.
    Sequence(Vec<StringPattern>),
    /// Any one of the members.
    Union(Vec<StringPattern>),
    /// One rune within the range.
    RuneRange(RuneRange),
    /// A reference to a named pattern, resolved when tested.
    DynamicElem(String),
    /// `inner` repeated between `min` and `max` times (`None` = unbounded).
    Repeated {
        inner: Box<StringPattern>,
        min: u32,
        max: Option<u32>,
    },
}

impl StringPattern {
    /// Tests a candidate string by compiling the whole pattern to one regex.
    pub fn is_match(&self, ctx: &Context, candidate: &str) -> Result<bool, StringPatternError> {
        let source = self.to_regex_source(ctx, 0)?;
        let regex = Regex::new(&format!("^(?:{source})$")).map_err(|e| {
            StringPatternError::InvalidRegex {
                source_text: source,
                message: e.to_string(),
            }
        })?;
        Ok(regex.is_match(candidate))
    }

    fn to_regex_source(&self, ctx: &Context, depth: usize) -> Result<String, StringPatternError> {
        match self {
            StringPattern::Regex(regex) => Ok(format!("(?:{})", regex.source())),
            StringPattern::Literal(s) => Ok(regex::escape(s)),
            StringPattern::Sequence(elements) => {
                let mut source = String::new();
                for element in elements {
                    source.push_str(&element.to_regex_source(ctx, depth + 1)?);
                }
                Ok(source)
            }
            StringPattern::Union(members) => {
                let sources: Result<Vec<_>, _> = members
                    .iter()
                    .map(|m| m.to_regex_source(ctx, depth + 1))
                    .collect();
                Ok(format!("(?:{})", sources?.join("|")))
            }
            StringPattern::RuneRange(range) => Ok(format!(
                "[{}-{}]",
                regex::escape(&range.start.to_string()),
                regex::escape(&range.end.to_string())
            )),
            StringPattern::DynamicElem(name) => {
                if depth > MAX_RESOLUTION_DEPTH {
                    return Err(StringPatternError::TooDeep(name.clone()));
                }
                let pattern = ctx
                    .resolve_named_pattern(name)
                    .ok_or_else(|| StringPatternError::UnknownNamedPattern(name.clone()))?;
                string_pattern_source(&pattern, ctx, depth + 1)
                    .ok_or_else(|| StringPatternError::NotAStringPattern(name.clone()))?
            }
            StringPattern::Repeated { inner, min, max } => {
                let inner_source = inner.to_regex_source(ctx, depth + 1)?;
                let quantifier = match max {
                    Some(max) => format!("{{{min},{max}}}"),
                    None => format!("{{{min},}}"),
                };
                Ok(format!("(?:{inner_source}){quantifier}"))
            }
        }
    }
}

/// The regex source of a pattern when it describes strings; `None` otherwise.
fn string_pattern_source(
    pattern: &Pattern,
    ctx: &Context,
    depth: usize,
) -> Option<Result<String, StringPatternError>> {
    match pattern.kind() {
        PatternKind::String(string_pattern) => {
            Some(string_pattern.to_regex_source(ctx, depth))
        }
        PatternKind::ExactValue(crate::value::Value::Str(s)) => Some(Ok(regex::escape(s))),
        PatternKind::Type(type_pattern) if type_pattern.matches_strings() => {
            Some(Ok(".*".to_string()))
        }
        _ => None,
    }
}

impl fmt::Display for StringPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringPattern::Regex(regex) => write!(f, "%`{}`", regex.source()),
            StringPattern::Literal(s) => write!(f, "{s:?}"),
            StringPattern::Sequence(elements) => {
                f.write_str("%str(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{element}")?;
                }
                f.write_str(")")
            }
            StringPattern::Union(members) => {
                f.write_str("(")?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{member}")?;
                }
                f.write_str(")")
            }
            StringPattern::RuneRange(range) => write!(f, "{range}"),
            StringPattern::DynamicElem(name) => write!(f, "%{name}"),
            StringPattern::Repeated { inner, min, max } => match max {
                Some(max) => write!(f, "{inner}{{{min},{max}}}"),
                None => write!(f, "{inner}{{{min},}}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    #[test]
    fn literal_sequence() {
        let pattern = StringPattern::Sequence(vec![
            StringPattern::Literal("a".into()),
            StringPattern::Repeated {
                inner: Box::new(StringPattern::RuneRange(RuneRange::new('0', '9'))),
                min: 1,
                max: None,
            },
        ]);
        let ctx = ctx();
        assert!(pattern.is_match(&ctx, "a123").unwrap());
        assert!(!pattern.is_match(&ctx, "a").unwrap());
        assert!(!pattern.is_match(&ctx, "b1").unwrap());
    }

    #[test]
    fn union_of_literals() {
        let pattern = StringPattern::Union(vec![
            StringPattern::Literal("yes".into()),
            StringPattern::Literal("no".into()),
        ]);
        let ctx = ctx();
        assert!(pattern.is_match(&ctx, "yes").unwrap());
        assert!(pattern.is_match(&ctx, "no").unwrap());
        assert!(!pattern.is_match(&ctx, "maybe").unwrap());
    }

    #[test]
    fn dynamic_elem_resolves_named_pattern() {
        let ctx = ctx();
        ctx.add_named_pattern(
            "digit",
            Pattern::string(StringPattern::RuneRange(RuneRange::new('0', '9'))),
        )
        .unwrap();
        let pattern = StringPattern::Sequence(vec![
            StringPattern::Literal("#".into()),
            StringPattern::DynamicElem("digit".into()),
        ]);
        assert!(pattern.is_match(&ctx, "#7").unwrap());
        assert!(!pattern.is_match(&ctx, "#x").unwrap());
    }

    #[test]
    fn unknown_dynamic_elem_errors() {
        let ctx = ctx();
        let pattern = StringPattern::DynamicElem("nope".into());
        assert!(matches!(
            pattern.is_match(&ctx, "x"),
            Err(StringPatternError::UnknownNamedPattern(_))
        ));
    }

    #[test]
    fn regex_element_literals_are_escaped() {
        let pattern = StringPattern::Literal("a.b".into());
        let ctx = ctx();
        assert!(pattern.is_match(&ctx, "a.b").unwrap());
        assert!(!pattern.is_match(&ctx, "axb").unwrap());
    }
}
