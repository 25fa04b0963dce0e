//! Resource limits carried by execution contexts.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How a limit is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitKind {
    /// A budget consumed over the context's whole life.
    Total,
    /// A bytes-per-second ceiling.
    ByteRate,
    /// An events-per-second ceiling.
    SimpleRate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    pub kind: LimitKind,
    pub value: i64,
}

impl LimitSpec {
    pub fn total(value: i64) -> Self {
        Self {
            kind: LimitKind::Total,
            value,
        }
    }
}

impl fmt::Display for LimitSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LimitKind::Total => write!(f, "{}", self.value),
            LimitKind::ByteRate => write!(f, "{}B/s", self.value),
            LimitKind::SimpleRate => write!(f, "{}x/s", self.value),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LimitError {
    #[error("limit '{name}' exceeds the parent context's limit ({child} > {parent})")]
    AboveParent { name: String, child: i64, parent: i64 },
    #[error("total limit '{name}' is exhausted")]
    Exhausted { name: String },
    #[error("limit '{0}' is not a total limit")]
    NotTotal(String),
}

/// The limit table of one context, with total-budget accounting.
#[derive(Debug, Default)]
pub struct Limits {
    specs: IndexMap<String, LimitSpec>,
    taken: Mutex<HashMap<String, i64>>,
}

impl Limits {
    pub fn new(specs: IndexMap<String, LimitSpec>) -> Self {
        Self {
            specs,
            taken: Mutex::new(HashMap::new()),
        }
    }

    pub fn specs(&self) -> &IndexMap<String, LimitSpec> {
        &self.specs
    }

    pub fn get(&self, name: &str) -> Option<LimitSpec> {
        self.specs.get(name).copied()
    }

    /// Checks that every limit here stays at or below the parent's value for
    /// the same name. Limits absent from the parent are unconstrained.
    pub fn check_within(&self, parent: &Limits) -> Result<(), LimitError> {
        for (name, spec) in &self.specs {
            if let Some(parent_spec) = parent.specs.get(name) {
                if spec.value > parent_spec.value {
                    return Err(LimitError::AboveParent {
                        name: name.clone(),
                        child: spec.value,
                        parent: parent_spec.value,
                    });
                }
            }
        }
        Ok(())
    }

    /// Consumes `n` units from a total limit.
    pub fn take(&self, name: &str, n: i64) -> Result<(), LimitError> {
        let Some(spec) = self.specs.get(name) else {
            // Undeclared limits do not constrain.
            return Ok(());
        };
        if spec.kind != LimitKind::Total {
            return Err(LimitError::NotTotal(name.to_string()));
        }
        let mut taken = self.taken.lock().unwrap();
        let used = taken.entry(name.to_string()).or_insert(0);
        if *used + n > spec.value {
            return Err(LimitError::Exhausted {
                name: name.to_string(),
            });
        }
        *used += n;
        Ok(())
    }

    /// Returns `n` units to a total limit.
    pub fn give_back(&self, name: &str, n: i64) {
        let mut taken = self.taken.lock().unwrap();
        if let Some(used) = taken.get_mut(name) {
            *used = (*used - n).max(0);
        }
    }

    pub fn available(&self, name: &str) -> Option<i64> {
        let spec = self.specs.get(name)?;
        let taken = self.taken.lock().unwrap();
        Some(spec.value - taken.get(name).copied().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(pairs: &[(&str, i64)]) -> Limits {
        Limits::new(
            pairs
                .iter()
                .map(|&(name, value)| (name.to_string(), LimitSpec::total(value)))
                .collect(),
        )
    }

    #[test]
    fn child_limits_may_not_exceed_parent() {
        let parent = limits(&[("fs/new-file", 10)]);
        let ok = limits(&[("fs/new-file", 5)]);
        let too_high = limits(&[("fs/new-file", 20)]);
        assert!(ok.check_within(&parent).is_ok());
        assert!(matches!(
            too_high.check_within(&parent),
            Err(LimitError::AboveParent { .. })
        ));
    }

    #[test]
    fn total_accounting() {
        let limits = limits(&[("lthreads", 2)]);
        limits.take("lthreads", 1).unwrap();
        limits.take("lthreads", 1).unwrap();
        assert!(matches!(
            limits.take("lthreads", 1),
            Err(LimitError::Exhausted { .. })
        ));
        limits.give_back("lthreads", 1);
        assert!(limits.take("lthreads", 1).is_ok());
    }

    #[test]
    fn undeclared_limits_do_not_constrain() {
        let limits = limits(&[]);
        assert!(limits.take("anything", 1_000).is_ok());
    }
}
