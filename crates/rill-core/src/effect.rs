//! Reversible effects recorded into transactions.

use std::fmt;
use std::sync::Mutex;

use thiserror::Error;

use crate::context::Context;
use crate::value::Path;

/// Whether an effect can be undone. Only `Irreversible` effects are rejected
/// by transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reversibility {
    Reversible,
    /// Undoable with caveats (e.g. timestamps are not restored).
    SomewhatReversible,
    Irreversible,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EffectError {
    pub message: String,
}

impl EffectError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A reversible description of a side-effect.
///
/// `apply` runs on commit, in insertion order; `reverse` runs on rollback, in
/// reverse insertion order.
pub trait Effect: Send + Sync + fmt::Debug {
    fn apply(&self, ctx: &Context) -> Result<(), EffectError>;
    fn reverse(&self, ctx: &Context) -> Result<(), EffectError>;
    fn reversibility(&self, ctx: &Context) -> Reversibility;
    fn describe(&self) -> String;
}

/// Creates a file on commit; removes it on rollback-after-apply.
#[derive(Debug)]
pub struct CreateFileEffect {
    pub path: Path,
    pub content: Vec<u8>,
    applied: Mutex<bool>,
}

impl CreateFileEffect {
    pub fn new(path: Path, content: Vec<u8>) -> Self {
        Self {
            path,
            content,
            applied: Mutex::new(false),
        }
    }
}

impl Effect for CreateFileEffect {
    fn apply(&self, ctx: &Context) -> Result<(), EffectError> {
        let fs = ctx.filesystem();
        if fs.exists(&self.path) {
            return Err(EffectError::new(format!(
                "a file already exists at {}",
                self.path
            )));
        }
        fs.write_file(&self.path, &self.content)
            .map_err(|e| EffectError::new(e.to_string()))?;
        *self.applied.lock().unwrap() = true;
        Ok(())
    }

    fn reverse(&self, ctx: &Context) -> Result<(), EffectError> {
        if !*self.applied.lock().unwrap() {
            return Ok(());
        }
        ctx.filesystem()
            .remove_file(&self.path)
            .map_err(|e| EffectError::new(e.to_string()))
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        Reversibility::Reversible
    }

    fn describe(&self) -> String {
        format!("create file {}", self.path)
    }
}

/// Overwrites a file on commit, restoring the previous content on rollback.
#[derive(Debug)]
pub struct UpdateFileEffect {
    pub path: Path,
    pub content: Vec<u8>,
    previous: Mutex<Option<Option<Vec<u8>>>>,
}

impl UpdateFileEffect {
    pub fn new(path: Path, content: Vec<u8>) -> Self {
        Self {
            path,
            content,
            previous: Mutex::new(None),
        }
    }
}

impl Effect for UpdateFileEffect {
    fn apply(&self, ctx: &Context) -> Result<(), EffectError> {
        let fs = ctx.filesystem();
        let previous = if fs.exists(&self.path) {
            Some(
                fs.read_file(&self.path)
                    .map_err(|e| EffectError::new(e.to_string()))?,
            )
        } else {
            None
        };
        *self.previous.lock().unwrap() = Some(previous);
        fs.write_file(&self.path, &self.content)
            .map_err(|e| EffectError::new(e.to_string()))
    }

    fn reverse(&self, ctx: &Context) -> Result<(), EffectError> {
        let previous = self.previous.lock().unwrap().take();
        match previous {
            // Apply never ran.
            None => Ok(()),
            Some(None) => ctx
                .filesystem()
                .remove_file(&self.path)
                .map_err(|e| EffectError::new(e.to_string())),
            Some(Some(content)) => ctx
                .filesystem()
                .write_file(&self.path, &content)
                .map_err(|e| EffectError::new(e.to_string())),
        }
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        Reversibility::SomewhatReversible
    }

    fn describe(&self) -> String {
        format!("update file {}", self.path)
    }
}

/// Removes a file on commit. The content is stashed at apply time so rollback
/// can restore it.
#[derive(Debug)]
pub struct RemoveFileEffect {
    pub path: Path,
    removed: Mutex<Option<Vec<u8>>>,
}

impl RemoveFileEffect {
    pub fn new(path: Path) -> Self {
        Self {
            path,
            removed: Mutex::new(None),
        }
    }
}

impl Effect for RemoveFileEffect {
    fn apply(&self, ctx: &Context) -> Result<(), EffectError> {
        let fs = ctx.filesystem();
        let content = fs
            .read_file(&self.path)
            .map_err(|e| EffectError::new(e.to_string()))?;
        fs.remove_file(&self.path)
            .map_err(|e| EffectError::new(e.to_string()))?;
        *self.removed.lock().unwrap() = Some(content);
        Ok(())
    }

    fn reverse(&self, ctx: &Context) -> Result<(), EffectError> {
        match self.removed.lock().unwrap().take() {
            None => Ok(()),
            Some(content) => ctx
                .filesystem()
                .write_file(&self.path, &content)
                .map_err(|e| EffectError::new(e.to_string())),
        }
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        Reversibility::SomewhatReversible
    }

    fn describe(&self) -> String {
        format!("remove file {}", self.path)
    }
}

/// An effect that can never be undone; transactions reject it.
#[derive(Debug)]
pub struct IrreversibleEffect {
    pub description: String,
}

impl Effect for IrreversibleEffect {
    fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
        Ok(())
    }

    fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
        Err(EffectError::new(format!(
            "{} cannot be reversed",
            self.description
        )))
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        Reversibility::Irreversible
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}
