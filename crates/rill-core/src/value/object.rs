//! Mutable objects with reference identity.

use std::sync::{Arc, Mutex, MutexGuard};

use super::visibility::Visibility;
use super::{next_value_id, Value, ValueId};

/// A mutable key/value structure. `Object` is a handle: cloning shares the
/// underlying storage and equality is identity. All property operations take
/// the internal lock, so a shared object can be mutated from several lthreads.
#[derive(Debug, Clone)]
pub struct Object {
    inner: Arc<ObjectInner>,
}

#[derive(Debug)]
struct ObjectInner {
    id: ValueId,
    state: Mutex<ObjectState>,
}

/// Locked object storage: ordered keys with parallel values.
#[derive(Debug)]
pub struct ObjectState {
    keys: Vec<String>,
    values: Vec<Value>,
    visibility: Visibility,
    shared: bool,
    /// Identity of the system graph this object is attached to, if any.
    system_graph: Option<ValueId>,
}

impl ObjectState {
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn visibility(&self) -> &Visibility {
        &self.visibility
    }

    pub fn prop(&self, name: &str) -> Option<&Value> {
        self.keys
            .iter()
            .position(|k| k == name)
            .map(|i| &self.values[i])
    }

    pub fn set_prop(&mut self, name: &str, value: Value) {
        match self.keys.iter().position(|k| k == name) {
            Some(i) => self.values[i] = value,
            None => {
                self.keys.push(name.to_string());
                self.values.push(value);
            }
        }
    }

    pub fn remove_prop(&mut self, name: &str) -> Option<Value> {
        let i = self.keys.iter().position(|k| k == name)?;
        self.keys.remove(i);
        Some(self.values.remove(i))
    }
}

impl Object {
    pub fn new(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        let (keys, values) = entries.into_iter().unzip();
        Self {
            inner: Arc::new(ObjectInner {
                id: next_value_id(),
                state: Mutex::new(ObjectState {
                    keys,
                    values,
                    visibility: Visibility::all(),
                    shared: false,
                    system_graph: None,
                }),
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new([])
    }

    pub fn id(&self) -> ValueId {
        self.inner.id
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Takes the object lock. Callers hold the guard across compound reads so
    /// serialization sees a consistent snapshot.
    pub fn lock(&self) -> MutexGuard<'_, ObjectState> {
        self.inner.state.lock().unwrap()
    }

    pub fn prop(&self, name: &str) -> Option<Value> {
        self.lock().prop(name).cloned()
    }

    pub fn set_prop(&self, name: &str, value: Value) {
        self.lock().set_prop(name, value);
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().keys.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> Vec<(String, Value)> {
        let state = self.lock();
        state
            .keys
            .iter()
            .cloned()
            .zip(state.values.iter().cloned())
            .collect()
    }

    pub fn set_visibility(&self, visibility: Visibility) {
        self.lock().visibility = visibility;
    }

    pub fn mark_shared(&self) {
        self.lock().shared = true;
    }

    pub fn is_shared(&self) -> bool {
        self.lock().shared
    }

    pub fn attach_to_system_graph(&self, graph: ValueId) {
        self.lock().system_graph = Some(graph);
    }

    pub fn system_graph(&self) -> Option<ValueId> {
        self.lock().system_graph
    }
}
