//! Mutable lists with reference identity and specialized storage.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{next_value_id, Value, ValueId};

/// A mutable sequence handle. Like [`Object`](super::Object), cloning shares
/// storage and equality is identity.
#[derive(Debug, Clone)]
pub struct List {
    inner: Arc<ListInner>,
}

#[derive(Debug)]
struct ListInner {
    id: ValueId,
    state: Mutex<ListState>,
}

#[derive(Debug)]
pub struct ListState {
    elements: UnderlyingList,
    shared: bool,
}

impl ListState {
    pub fn elements(&self) -> &UnderlyingList {
        &self.elements
    }
}

/// Specialized storage: homogeneous lists of ints, bools and strings avoid
/// boxing every element as a [`Value`].
#[derive(Debug, Clone, PartialEq)]
pub enum UnderlyingList {
    Value(Vec<Value>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    String(Vec<String>),
}

impl UnderlyingList {
    pub fn len(&self) -> usize {
        match self {
            UnderlyingList::Value(v) => v.len(),
            UnderlyingList::Int(v) => v.len(),
            UnderlyingList::Bool(v) => v.len(),
            UnderlyingList::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Option<Value> {
        match self {
            UnderlyingList::Value(v) => v.get(index).cloned(),
            UnderlyingList::Int(v) => v.get(index).map(|&i| Value::Int(i)),
            UnderlyingList::Bool(v) => v.get(index).map(|&b| Value::Bool(b)),
            UnderlyingList::String(v) => v.get(index).map(|s| Value::Str(s.clone())),
        }
    }

    /// Generalizes specialized storage to `Value` elements.
    fn generalize(&mut self) -> &mut Vec<Value> {
        if !matches!(self, UnderlyingList::Value(_)) {
            let general: Vec<Value> = (0..self.len())
                .map(|i| self.at(i).expect("index in range"))
                .collect();
            *self = UnderlyingList::Value(general);
        }
        match self {
            UnderlyingList::Value(v) => v,
            _ => unreachable!(),
        }
    }

    pub fn push(&mut self, value: Value) {
        match (&mut *self, &value) {
            (UnderlyingList::Int(v), Value::Int(i)) => v.push(*i),
            (UnderlyingList::Bool(v), Value::Bool(b)) => v.push(*b),
            (UnderlyingList::String(v), Value::Str(s)) => v.push(s.clone()),
            (UnderlyingList::Value(v), _) => v.push(value),
            _ => self.generalize().push(value),
        }
    }

    pub fn set(&mut self, index: usize, value: Value) {
        match (&mut *self, &value) {
            (UnderlyingList::Int(v), Value::Int(i)) if index < v.len() => v[index] = *i,
            (UnderlyingList::Bool(v), Value::Bool(b)) if index < v.len() => v[index] = *b,
            (UnderlyingList::String(v), Value::Str(s)) if index < v.len() => {
                v[index] = s.clone();
            }
            (UnderlyingList::Value(v), _) if index < v.len() => v[index] = value,
            _ => {
                let general = self.generalize();
                if index < general.len() {
                    general[index] = value;
                }
            }
        }
    }

    pub fn iter_values(&self) -> Vec<Value> {
        (0..self.len()).filter_map(|i| self.at(i)).collect()
    }
}

impl List {
    pub fn from_underlying(elements: UnderlyingList) -> Self {
        Self {
            inner: Arc::new(ListInner {
                id: next_value_id(),
                state: Mutex::new(ListState {
                    elements,
                    shared: false,
                }),
            }),
        }
    }

    pub fn new(elements: Vec<Value>) -> Self {
        Self::from_underlying(UnderlyingList::Value(elements))
    }

    pub fn new_int(elements: Vec<i64>) -> Self {
        Self::from_underlying(UnderlyingList::Int(elements))
    }

    pub fn new_bool(elements: Vec<bool>) -> Self {
        Self::from_underlying(UnderlyingList::Bool(elements))
    }

    pub fn new_string(elements: Vec<String>) -> Self {
        Self::from_underlying(UnderlyingList::String(elements))
    }

    pub fn id(&self) -> ValueId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn lock(&self) -> MutexGuard<'_, ListState> {
        self.inner.state.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn at(&self, index: usize) -> Option<Value> {
        self.lock().elements.at(index)
    }

    pub fn push(&self, value: Value) {
        self.lock().elements.push(value);
    }

    pub fn set(&self, index: usize, value: Value) {
        self.lock().elements.set(index, value);
    }

    pub fn elements(&self) -> Vec<Value> {
        self.lock().elements.iter_values()
    }

    pub fn mark_shared(&self) {
        self.lock().shared = true;
    }

    pub fn is_shared(&self) -> bool {
        self.lock().shared
    }

    /// A readonly projection: a fresh immutable snapshot of the elements.
    pub fn readonly_snapshot(&self) -> Vec<Value> {
        self.elements()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_list_generalizes_on_foreign_push() {
        let list = List::new_int(vec![1, 2]);
        list.push(Value::Str("x".into()));
        assert_eq!(list.len(), 3);
        assert_eq!(list.at(0), Some(Value::Int(1)));
        assert_eq!(list.at(2), Some(Value::Str("x".into())));
        assert!(matches!(
            *list.lock().elements(),
            UnderlyingList::Value(_)
        ));
    }

    #[test]
    fn specialized_push_keeps_storage() {
        let list = List::new_int(vec![1]);
        list.push(Value::Int(2));
        assert!(matches!(*list.lock().elements(), UnderlyingList::Int(_)));
    }

    #[test]
    fn clones_are_aliases() {
        let list = List::new(vec![]);
        let alias = list.clone();
        alias.push(Value::Bool(true));
        assert_eq!(list.len(), 1);
    }
}
