//! Immutable structural values: records and tuples.

use indexmap::IndexMap;

use super::Value;

/// The immutable twin of [`Object`](super::Object). Records compare
/// structurally and are shared freely between lthreads.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    entries: IndexMap<String, Value>,
}

impl Record {
    pub fn new(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.entries.get(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> &IndexMap<String, Value> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An immutable fixed-length sequence with structural equality.
#[derive(Debug, Clone, PartialEq)]
pub struct Tuple {
    elements: Vec<Value>,
}

impl Tuple {
    pub fn new(elements: Vec<Value>) -> Self {
        Self { elements }
    }

    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    pub fn at(&self, index: usize) -> Option<&Value> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
