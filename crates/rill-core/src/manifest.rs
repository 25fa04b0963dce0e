//! Module manifests: the declarative header stating what a module requires.
//!
//! The runtime validates a manifest against the invoking context before any
//! statement of the module runs.

use indexmap::IndexMap;
use thiserror::Error;

use crate::context::{Context, ContextConfig, ContextError};
use crate::host::{HostResolution, HostResolutionError};
use crate::limits::{LimitError, LimitSpec, Limits};
use crate::permission::Permission;
use crate::value::Host;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ManifestError {
    #[error("manifest requires a permission the caller does not hold: {0}")]
    ForbiddenPermission(Permission),
    #[error(transparent)]
    Limit(#[from] LimitError),
    #[error("invalid host resolution for {host}: {source}")]
    HostResolution {
        host: Host,
        source: HostResolutionError,
    },
}

/// The requirements a module declares.
#[derive(Debug, Default, Clone)]
pub struct Manifest {
    pub permissions: Vec<Permission>,
    pub limits: IndexMap<String, LimitSpec>,
    pub host_resolutions: IndexMap<Host, HostResolution>,
}

impl Manifest {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Checks that the invoking context can satisfy every requirement.
    pub fn validate_against(&self, caller: &Context) -> Result<(), ManifestError> {
        for permission in &self.permissions {
            if !caller.has_permission(permission) {
                return Err(ManifestError::ForbiddenPermission(permission.clone()));
            }
        }
        let requested = Limits::new(self.limits.clone());
        for (name, _) in self.limits.iter() {
            if let Some(parent_spec) = caller.limit(name) {
                let child_spec = requested.get(name).expect("declared limit");
                if child_spec.value > parent_spec.value {
                    return Err(LimitError::AboveParent {
                        name: name.clone(),
                        child: child_spec.value,
                        parent: parent_spec.value,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// The child context configuration for running the module.
    pub fn into_context_config(self, caller: &Context) -> ContextConfig {
        ContextConfig {
            parent: Some(caller.clone()),
            permissions: self.permissions,
            forbidden: Vec::new(),
            limits: self.limits,
            host_resolutions: self.host_resolutions,
            filesystem: None,
        }
    }

    /// Validates and builds the module's execution context in one step.
    pub fn build_context(self, caller: &Context) -> Result<Context, ManifestBuildError> {
        self.validate_against(caller)?;
        let config = self.into_context_config(caller);
        Context::new(config).map_err(ManifestBuildError::Context)
    }
}

#[derive(Debug, Error)]
pub enum ManifestBuildError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error(transparent)]
    Context(ContextError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Path, PathPattern};

    fn caller() -> Context {
        Context::new(ContextConfig {
            permissions: vec![Permission::fs_read(PathPattern::new("/data/...").unwrap())],
            limits: [("lthreads".to_string(), LimitSpec::total(4))]
                .into_iter()
                .collect(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn manifest_within_caller_permissions_builds_a_context() {
        let caller = caller();
        let manifest = Manifest {
            permissions: vec![Permission::fs_read_path(Path::new("/data/input.json").unwrap())],
            ..Default::default()
        };
        let module_ctx = manifest.build_context(&caller).unwrap();
        assert!(module_ctx
            .check_has_permission(&Permission::fs_read_path(
                Path::new("/data/input.json").unwrap()
            ))
            .is_ok());
    }

    #[test]
    fn manifest_requesting_more_is_rejected() {
        let caller = caller();
        let manifest = Manifest {
            permissions: vec![Permission::fs_read(PathPattern::new("/etc/...").unwrap())],
            ..Default::default()
        };
        assert!(matches!(
            manifest.validate_against(&caller),
            Err(ManifestError::ForbiddenPermission(_))
        ));
    }

    #[test]
    fn manifest_limits_above_caller_are_rejected() {
        let caller = caller();
        let manifest = Manifest {
            limits: [("lthreads".to_string(), LimitSpec::total(8))]
                .into_iter()
                .collect(),
            ..Default::default()
        };
        assert!(matches!(
            manifest.validate_against(&caller),
            Err(ManifestError::Limit(LimitError::AboveParent { .. }))
        ));
    }
}
