//! Runtime-facing values: mutations, lthread handles, HTTP values, file info.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use indexmap::IndexMap;

use super::primitives::{Host, Path, Url};
use super::quantity::{ByteCount, Date, FileMode};
use super::{next_value_id, Value, ValueId};

/// A description of a change applied to a watched value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    /// Slash-separated location of the change inside the watched value.
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    AddProperty,
    UpdateProperty,
    RemoveProperty,
    InsertElement,
    SetElement,
    RemoveElement,
}

/// A handle on a spawned lthread. Joining yields the lthread's module result;
/// a panic inside the lthread surfaces as an error string.
#[derive(Debug, Clone)]
pub struct Thread {
    inner: Arc<ThreadInner>,
}

#[derive(Debug)]
struct ThreadInner {
    id: ValueId,
    name: String,
    handle: Mutex<Option<JoinHandle<Result<Value, String>>>>,
    result: Mutex<Option<Result<Value, String>>>,
}

impl Thread {
    pub fn new(name: impl Into<String>, handle: JoinHandle<Result<Value, String>>) -> Self {
        Self {
            inner: Arc::new(ThreadInner {
                id: next_value_id(),
                name: name.into(),
                handle: Mutex::new(Some(handle)),
                result: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> ValueId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ptr_eq(&self, other: &Thread) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_finished(&self) -> bool {
        if self.inner.result.lock().unwrap().is_some() {
            return true;
        }
        self.inner
            .handle
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|h| h.is_finished())
    }

    /// Waits for the lthread and returns its result. Subsequent joins return
    /// the cached result.
    pub fn join(&self) -> Result<Value, String> {
        if let Some(result) = self.inner.result.lock().unwrap().clone() {
            return result;
        }
        let handle = self.inner.handle.lock().unwrap().take();
        let result = match handle {
            Some(handle) => match handle.join() {
                Ok(result) => result,
                Err(_) => Err(format!("lthread '{}' panicked", self.inner.name)),
            },
            // Another caller is joining right now; it will publish the result.
            None => {
                return self
                    .inner
                    .result
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| Err(format!("lthread '{}' already joined", self.inner.name)));
            }
        };
        *self.inner.result.lock().unwrap() = Some(result.clone());
        result
    }
}

/// An incoming HTTP request snapshot handed to handler scripts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub url: Url,
    pub headers: IndexMap<String, String>,
}

/// A handle on a listening HTTP server. Owned by its spawning lthread and not
/// sharable.
#[derive(Debug, Clone)]
pub struct HttpServer {
    inner: Arc<HttpServerInner>,
}

#[derive(Debug)]
struct HttpServerInner {
    id: ValueId,
    host: Host,
}

impl HttpServer {
    pub fn new(host: Host) -> Self {
        Self {
            inner: Arc::new(HttpServerInner {
                id: next_value_id(),
                host,
            }),
        }
    }

    pub fn id(&self) -> ValueId {
        self.inner.id
    }

    pub fn host(&self) -> &Host {
        &self.inner.host
    }

    pub fn ptr_eq(&self, other: &HttpServer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Metadata about a filesystem entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub abs_path: Path,
    pub size: ByteCount,
    pub mode: FileMode,
    pub mod_time: Date,
    pub is_dir: bool,
}
