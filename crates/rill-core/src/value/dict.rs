//! Dictionaries and key lists.

use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use super::{next_value_id, Value, ValueId};

/// A mutable map keyed by serializable values. Keys are indexed by their
/// canonical display representation; the original key value is kept alongside
/// the entry.
#[derive(Debug, Clone)]
pub struct Dictionary {
    inner: Arc<DictionaryInner>,
}

#[derive(Debug)]
struct DictionaryInner {
    id: ValueId,
    state: Mutex<IndexMap<String, (Value, Value)>>,
}

impl Dictionary {
    pub fn new(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let state = entries
            .into_iter()
            .map(|(key, value)| (key.to_string(), (key, value)))
            .collect();
        Self {
            inner: Arc::new(DictionaryInner {
                id: next_value_id(),
                state: Mutex::new(state),
            }),
        }
    }

    pub fn id(&self) -> ValueId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &Dictionary) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        self.inner
            .state
            .lock()
            .unwrap()
            .get(&key.to_string())
            .map(|(_, v)| v.clone())
    }

    pub fn insert(&self, key: Value, value: Value) {
        self.inner
            .state
            .lock()
            .unwrap()
            .insert(key.to_string(), (key, value));
    }

    pub fn remove(&self, key: &Value) -> Option<Value> {
        self.inner
            .state
            .lock()
            .unwrap()
            .shift_remove(&key.to_string())
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.inner.state.lock().unwrap().values().cloned().collect()
    }
}

/// An immutable list of property names (`.{name, age}`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyList(pub Vec<String>);

impl KeyList {
    pub fn names(&self) -> &[String] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_keyed_by_representation() {
        let dict = Dictionary::new([]);
        dict.insert(Value::Int(1), Value::Str("one".into()));
        assert_eq!(dict.get(&Value::Int(1)), Some(Value::Str("one".into())));
        assert_eq!(dict.get(&Value::Int(2)), None);
        dict.insert(Value::Int(1), Value::Str("uno".into()));
        assert_eq!(dict.len(), 1);
    }
}
