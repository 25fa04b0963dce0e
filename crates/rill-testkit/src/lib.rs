//! Test helpers shared across the rill workspace.
//!
//! Everything here builds on `rill-core` only; the helpers exist so tests in
//! other crates do not keep re-declaring the same contexts and probe effects.

use std::sync::{Arc, Mutex};

use rill_core::context::{Context, ContextConfig};
use rill_core::effect::{Effect, EffectError, Reversibility};
use rill_core::filesystem::MemFilesystem;
use rill_core::permission::Permission;
use rill_core::value::PathPattern;

/// A context over an in-memory filesystem with blanket filesystem and lthread
/// permissions. Most evaluator tests start here.
pub fn permissive_context() -> Context {
    Context::new(ContextConfig {
        permissions: vec![
            Permission::fs_read(PathPattern::new("/...").unwrap()),
            Permission::fs_write(PathPattern::new("/...").unwrap()),
            Permission::lthread_create(),
        ],
        filesystem: Some(Arc::new(MemFilesystem::new())),
        ..Default::default()
    })
    .expect("root context")
}

/// A context holding no permissions at all, over an in-memory filesystem.
pub fn locked_down_context() -> Context {
    Context::new(ContextConfig {
        filesystem: Some(Arc::new(MemFilesystem::new())),
        ..Default::default()
    })
    .expect("root context")
}

/// Records its apply/reverse invocations into a shared journal so tests can
/// assert ordering.
#[derive(Debug)]
pub struct ProbeEffect {
    pub marker: &'static str,
    journal: Arc<Mutex<Vec<String>>>,
    reversibility: Reversibility,
}

impl ProbeEffect {
    pub fn reversible(journal: &Arc<Mutex<Vec<String>>>, marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            marker,
            journal: journal.clone(),
            reversibility: Reversibility::Reversible,
        })
    }

    pub fn irreversible(journal: &Arc<Mutex<Vec<String>>>, marker: &'static str) -> Arc<Self> {
        Arc::new(Self {
            marker,
            journal: journal.clone(),
            reversibility: Reversibility::Irreversible,
        })
    }
}

impl Effect for ProbeEffect {
    fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("apply:{}", self.marker));
        Ok(())
    }

    fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
        self.journal
            .lock()
            .unwrap()
            .push(format!("reverse:{}", self.marker));
        Ok(())
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        self.reversibility
    }

    fn describe(&self) -> String {
        format!("probe effect {}", self.marker)
    }
}

/// A fresh journal for [`ProbeEffect`]s.
pub fn journal() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Snapshot of a journal's entries.
pub fn journal_entries(journal: &Arc<Mutex<Vec<String>>>) -> Vec<String> {
    journal.lock().unwrap().clone()
}
