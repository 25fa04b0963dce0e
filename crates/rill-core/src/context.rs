//! Execution contexts: the capability + lifecycle object of the runtime.
//!
//! Every privileged operation goes through a [`Context`]: permission checks,
//! limit accounting, host resolution, filesystem access and transaction
//! attachment. Contexts form a tree; a child's permissions are always a
//! subset of its parent's and cancellation propagates downwards.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{mpsc, Arc, Mutex, Weak};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::filesystem::{OsFilesystem, SharedFilesystem};
use crate::host::HostResolution;
use crate::limits::{LimitError, LimitSpec, Limits};
use crate::pattern::{builtin_patterns, Pattern};
use crate::permission::{Permission, PermissionError};
use crate::transaction::Transaction;
use crate::value::{Host, Value};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ContextError {
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error(transparent)]
    Limit(#[from] LimitError),
    #[error("context is done")]
    Done,
    #[error("context already has a transaction")]
    AlreadyHasTransaction,
    #[error("a pattern named '%{0}' is already defined")]
    PatternAlreadyDefined(String),
    #[error("a pattern namespace named '{0}' is already defined")]
    NamespaceAlreadyDefined(String),
}

/// Edge-triggered, one-shot cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: AtomicBool,
    subscribers: Mutex<Vec<mpsc::Sender<()>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Fires the token. Only the first call has an effect.
    pub fn cancel(&self) {
        if self
            .inner
            .cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let subscribers = std::mem::take(&mut *self.inner.subscribers.lock().unwrap());
        for subscriber in subscribers {
            let _ = subscriber.send(());
        }
    }

    /// A receiver that yields one message (or disconnects) once the token has
    /// fired.
    pub fn done_receiver(&self) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel();
        if self.is_cancelled() {
            let _ = tx.send(());
        } else {
            self.inner.subscribers.lock().unwrap().push(tx);
        }
        rx
    }
}

/// Lifecycle states of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ContextStatus {
    Active = 0,
    Cancelling = 1,
    Done = 2,
}

/// Module-level bookkeeping attached to the context running a module.
#[derive(Debug, Clone, Default)]
pub struct GlobalState {
    pub module_name: String,
    output: Arc<Mutex<Vec<u8>>>,
}

impl GlobalState {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            output: Arc::default(),
        }
    }

    pub fn write_output(&self, bytes: &[u8]) {
        self.output.lock().unwrap().extend_from_slice(bytes);
    }

    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.output.lock().unwrap())
    }
}

/// A named collection of patterns exposed to modules as a namespace.
#[derive(Debug, Clone, Default)]
pub struct PatternNamespace {
    pub patterns: IndexMap<String, Pattern>,
}

/// Configuration for [`Context::new`].
#[derive(Default)]
pub struct ContextConfig {
    pub parent: Option<Context>,
    pub permissions: Vec<Permission>,
    pub forbidden: Vec<Permission>,
    pub limits: IndexMap<String, LimitSpec>,
    pub host_resolutions: IndexMap<Host, HostResolution>,
    pub filesystem: Option<SharedFilesystem>,
}

impl ContextConfig {
    pub fn with_permissions(permissions: Vec<Permission>) -> Self {
        Self {
            permissions,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    parent: Option<Weak<ContextInner>>,
    permissions: Mutex<Vec<Permission>>,
    forbidden: Vec<Permission>,
    limits: Limits,
    host_resolutions: Mutex<IndexMap<Host, HostResolution>>,
    filesystem: SharedFilesystem,
    named_patterns: Mutex<IndexMap<String, Pattern>>,
    pattern_namespaces: Mutex<IndexMap<String, PatternNamespace>>,
    state: Mutex<Option<GlobalState>>,
    current_tx: Mutex<Option<Transaction>>,
    cancellation: CancellationToken,
    children: Mutex<Vec<Weak<ContextInner>>>,
    status: AtomicU8,
}

impl Context {
    /// Creates a context. When a parent is configured, the requested
    /// permissions must be a subset of the parent's and the limits must not
    /// exceed the parent's.
    pub fn new(config: ContextConfig) -> Result<Context, ContextError> {
        let limits = Limits::new(config.limits);
        if let Some(parent) = &config.parent {
            for permission in &config.permissions {
                if !parent.has_permission(permission) {
                    return Err(PermissionError::Forbidden {
                        permission: permission.clone(),
                    }
                    .into());
                }
            }
            limits.check_within(&parent.inner.limits)?;
        }

        let filesystem = config
            .filesystem
            .or_else(|| config.parent.as_ref().map(|p| p.inner.filesystem.clone()))
            .unwrap_or_else(|| Arc::new(OsFilesystem::new()));

        let named_patterns = match &config.parent {
            Some(parent) => parent.inner.named_patterns.lock().unwrap().clone(),
            None => builtin_patterns(),
        };
        let pattern_namespaces = match &config.parent {
            Some(parent) => parent.inner.pattern_namespaces.lock().unwrap().clone(),
            None => IndexMap::new(),
        };
        let host_resolutions = {
            let mut map = match &config.parent {
                Some(parent) => parent.inner.host_resolutions.lock().unwrap().clone(),
                None => IndexMap::new(),
            };
            map.extend(config.host_resolutions);
            map
        };

        let ctx = Context {
            inner: Arc::new(ContextInner {
                parent: config.parent.as_ref().map(|p| Arc::downgrade(&p.inner)),
                permissions: Mutex::new(config.permissions),
                forbidden: config.forbidden,
                limits,
                host_resolutions: Mutex::new(host_resolutions),
                filesystem,
                named_patterns: Mutex::new(named_patterns),
                pattern_namespaces: Mutex::new(pattern_namespaces),
                state: Mutex::new(None),
                current_tx: Mutex::new(None),
                cancellation: CancellationToken::new(),
                children: Mutex::new(Vec::new()),
                status: AtomicU8::new(ContextStatus::Active as u8),
            }),
        };

        if let Some(parent) = &config.parent {
            parent
                .inner
                .children
                .lock()
                .unwrap()
                .push(Arc::downgrade(&ctx.inner));
            if parent.is_cancelled() {
                ctx.cancel();
            }
        }
        Ok(ctx)
    }

    /// A child context of `self`.
    pub fn child(&self, mut config: ContextConfig) -> Result<Context, ContextError> {
        config.parent = Some(self.clone());
        Context::new(config)
    }

    pub fn parent(&self) -> Option<Context> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Context { inner })
    }

    pub fn status(&self) -> ContextStatus {
        match self.inner.status.load(Ordering::Acquire) {
            0 => ContextStatus::Active,
            1 => ContextStatus::Cancelling,
            _ => ContextStatus::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.status() == ContextStatus::Done
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    fn ensure_not_done(&self) -> Result<(), ContextError> {
        if self.is_done() {
            Err(ContextError::Done)
        } else {
            Ok(())
        }
    }

    // ---- permissions ----

    /// Whether some held permission includes `p` and no forbidden one does.
    pub fn has_permission(&self, permission: &Permission) -> bool {
        if self
            .inner
            .forbidden
            .iter()
            .any(|forbidden| forbidden.includes(permission))
        {
            return false;
        }
        self.inner
            .permissions
            .lock()
            .unwrap()
            .iter()
            .any(|held| held.includes(permission))
    }

    pub fn check_has_permission(&self, permission: &Permission) -> Result<(), ContextError> {
        self.ensure_not_done()?;
        if self
            .inner
            .forbidden
            .iter()
            .any(|forbidden| forbidden.includes(permission))
        {
            debug!(%permission, "permission denied (forbidden)");
            return Err(PermissionError::Forbidden {
                permission: permission.clone(),
            }
            .into());
        }
        if !self
            .inner
            .permissions
            .lock()
            .unwrap()
            .iter()
            .any(|held| held.includes(permission))
        {
            debug!(%permission, "permission denied (not granted)");
            return Err(PermissionError::NotGranted {
                permission: permission.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Irreversibly narrows the permission set.
    pub fn drop_permissions(&self, dropped: &[Permission]) {
        let mut held = self.inner.permissions.lock().unwrap();
        held.retain(|permission| !dropped.iter().any(|d| d.includes(permission)));
    }

    pub fn permissions(&self) -> Vec<Permission> {
        self.inner.permissions.lock().unwrap().clone()
    }

    // ---- limits ----

    pub fn take_from_limit(&self, name: &str, n: i64) -> Result<(), ContextError> {
        self.ensure_not_done()?;
        self.inner.limits.take(name, n).map_err(Into::into)
    }

    pub fn give_back_to_limit(&self, name: &str, n: i64) {
        self.inner.limits.give_back(name, n);
    }

    pub fn limit(&self, name: &str) -> Option<LimitSpec> {
        self.inner.limits.get(name)
    }

    // ---- host resolutions ----

    pub fn get_host_resolution_data(&self, host: &Host) -> Option<Value> {
        self.inner
            .host_resolutions
            .lock()
            .unwrap()
            .get(host)
            .map(HostResolution::to_value)
    }

    /// Reverse lookup: the host whose resolution data equals `data`.
    pub fn get_host_from_resolution_data(&self, data: &Value) -> Option<Host> {
        self.inner
            .host_resolutions
            .lock()
            .unwrap()
            .iter()
            .find(|(_, resolution)| resolution.to_value() == *data)
            .map(|(host, _)| host.clone())
    }

    pub fn add_host_resolution(&self, host: Host, resolution: HostResolution) {
        self.inner
            .host_resolutions
            .lock()
            .unwrap()
            .insert(host, resolution);
    }

    // ---- filesystem ----

    pub fn filesystem(&self) -> &SharedFilesystem {
        &self.inner.filesystem
    }

    // ---- named patterns ----

    pub fn resolve_named_pattern(&self, name: &str) -> Option<Pattern> {
        self.inner.named_patterns.lock().unwrap().get(name).cloned()
    }

    /// Registers a module-scoped pattern name. Redefinition fails.
    pub fn add_named_pattern(&self, name: &str, pattern: Pattern) -> Result<(), ContextError> {
        self.ensure_not_done()?;
        let mut patterns = self.inner.named_patterns.lock().unwrap();
        if patterns.contains_key(name) {
            return Err(ContextError::PatternAlreadyDefined(name.to_string()));
        }
        patterns.insert(name.to_string(), pattern);
        Ok(())
    }

    pub fn named_pattern_names(&self) -> Vec<String> {
        self.inner
            .named_patterns
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect()
    }

    pub fn resolve_pattern_namespace(&self, name: &str) -> Option<PatternNamespace> {
        self.inner
            .pattern_namespaces
            .lock()
            .unwrap()
            .get(name)
            .cloned()
    }

    pub fn add_pattern_namespace(
        &self,
        name: &str,
        namespace: PatternNamespace,
    ) -> Result<(), ContextError> {
        self.ensure_not_done()?;
        let mut namespaces = self.inner.pattern_namespaces.lock().unwrap();
        if namespaces.contains_key(name) {
            return Err(ContextError::NamespaceAlreadyDefined(name.to_string()));
        }
        namespaces.insert(name.to_string(), namespace);
        Ok(())
    }

    // ---- global state ----

    pub fn set_state(&self, state: GlobalState) {
        *self.inner.state.lock().unwrap() = Some(state);
    }

    pub fn state(&self) -> Option<GlobalState> {
        self.inner.state.lock().unwrap().clone()
    }

    /// The state of the closest context (going upwards) that has one.
    pub fn closest_state(&self) -> Option<GlobalState> {
        if let Some(state) = self.state() {
            return Some(state);
        }
        self.parent().and_then(|parent| parent.closest_state())
    }

    // ---- transactions ----

    pub(crate) fn set_tx(&self, tx: Option<Transaction>) {
        let clearing = tx.is_none();
        *self.inner.current_tx.lock().unwrap() = tx;
        if clearing {
            // A cancelling context is done once its transaction released.
            let _ = self.inner.status.compare_exchange(
                ContextStatus::Cancelling as u8,
                ContextStatus::Done as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    pub fn tx(&self) -> Option<Transaction> {
        self.inner.current_tx.lock().unwrap().clone()
    }

    pub fn has_tx(&self) -> bool {
        self.inner.current_tx.lock().unwrap().is_some()
    }

    // ---- cancellation ----

    /// Fires the cancellation token. A pending transaction is rolled back
    /// asynchronously by its monitor; child contexts are cancelled as well.
    pub fn cancel(&self) {
        let _ = self.inner.status.compare_exchange(
            ContextStatus::Active as u8,
            ContextStatus::Cancelling as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.inner.cancellation.cancel();

        let children: Vec<_> = self.inner.children.lock().unwrap().clone();
        for child in children {
            if let Some(inner) = child.upgrade() {
                Context { inner }.cancel();
            }
        }

        if !self.has_tx() {
            self.inner
                .status
                .store(ContextStatus::Done as u8, Ordering::Release);
        }
    }

    /// Waits for the attached transaction (if any) to finish, then cancels.
    pub fn cancel_gracefully(&self) {
        if let Some(tx) = self.tx() {
            let receiver = tx.wait_finished();
            let _ = receiver.recv_timeout(tx.timeout().to_std());
        }
        self.cancel();
    }

    pub fn done_receiver(&self) -> mpsc::Receiver<()> {
        self.inner.cancellation.done_receiver()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancellation.clone()
    }
}

impl PartialEq for Context {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PathPattern;

    fn read_tmp() -> Permission {
        Permission::fs_read(PathPattern::new("/tmp/...").unwrap())
    }

    #[test]
    fn child_permissions_must_be_subset() {
        let parent = Context::new(ContextConfig::with_permissions(vec![read_tmp()])).unwrap();
        let ok = parent.child(ContextConfig::with_permissions(vec![Permission::fs_read(
            PathPattern::new("/tmp/sub/...").unwrap(),
        )]));
        assert!(ok.is_ok());

        let forbidden = parent.child(ContextConfig::with_permissions(vec![
            Permission::fs_read(PathPattern::new("/etc/...").unwrap()),
        ]));
        assert!(matches!(
            forbidden,
            Err(ContextError::Permission(PermissionError::Forbidden { .. }))
        ));
    }

    #[test]
    fn forbidden_wins_over_granted() {
        let ctx = Context::new(ContextConfig {
            permissions: vec![read_tmp()],
            forbidden: vec![Permission::fs_read(
                PathPattern::new("/tmp/secret/...").unwrap(),
            )],
            ..Default::default()
        })
        .unwrap();

        assert!(ctx
            .check_has_permission(&Permission::fs_read_path(
                crate::value::Path::new("/tmp/a").unwrap()
            ))
            .is_ok());
        assert!(matches!(
            ctx.check_has_permission(&Permission::fs_read_path(
                crate::value::Path::new("/tmp/secret/key").unwrap()
            )),
            Err(ContextError::Permission(PermissionError::Forbidden { .. }))
        ));
    }

    #[test]
    fn dropping_permissions_is_monotone() {
        let ctx = Context::new(ContextConfig::with_permissions(vec![read_tmp()])).unwrap();
        ctx.drop_permissions(&[read_tmp()]);
        assert!(ctx
            .check_has_permission(&Permission::fs_read_path(
                crate::value::Path::new("/tmp/a").unwrap()
            ))
            .is_err());
    }

    #[test]
    fn cancellation_propagates_to_children() {
        let parent = Context::new(ContextConfig::default()).unwrap();
        let child = parent.child(ContextConfig::default()).unwrap();
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(child.is_done());
        // Not the reverse.
        let parent2 = Context::new(ContextConfig::default()).unwrap();
        let child2 = parent2.child(ContextConfig::default()).unwrap();
        child2.cancel();
        assert!(!parent2.is_cancelled());
    }

    #[test]
    fn done_context_rejects_operations() {
        let ctx = Context::new(ContextConfig::with_permissions(vec![read_tmp()])).unwrap();
        ctx.cancel();
        assert!(ctx.is_done());
        assert_eq!(
            ctx.check_has_permission(&read_tmp()),
            Err(ContextError::Done)
        );
    }

    #[test]
    fn named_pattern_redefinition_fails() {
        let ctx = Context::new(ContextConfig::default()).unwrap();
        let pattern = ctx.resolve_named_pattern("int").unwrap();
        assert!(ctx.add_named_pattern("custom", pattern.clone()).is_ok());
        assert!(matches!(
            ctx.add_named_pattern("custom", pattern),
            Err(ContextError::PatternAlreadyDefined(_))
        ));
    }

    #[test]
    fn host_resolution_lookup_and_reverse_lookup() {
        let host = Host::new("ldb://main").unwrap();
        let resolution =
            HostResolution::Path(crate::value::Path::new("/databases/main").unwrap());
        let ctx = Context::new(ContextConfig {
            host_resolutions: [(host.clone(), resolution.clone())].into_iter().collect(),
            ..Default::default()
        })
        .unwrap();

        let data = ctx.get_host_resolution_data(&host).unwrap();
        assert_eq!(data, resolution.to_value());
        assert_eq!(ctx.get_host_from_resolution_data(&data), Some(host));
        assert!(ctx
            .get_host_resolution_data(&Host::new("ldb://other").unwrap())
            .is_none());
    }

    #[test]
    fn children_inherit_host_resolutions() {
        let host = Host::new("ldb://main").unwrap();
        let ctx = Context::new(ContextConfig {
            host_resolutions: [(
                host.clone(),
                HostResolution::Path(crate::value::Path::new("/db").unwrap()),
            )]
            .into_iter()
            .collect(),
            ..Default::default()
        })
        .unwrap();
        let child = ctx.child(ContextConfig::default()).unwrap();
        assert!(child.get_host_resolution_data(&host).is_some());
    }

    #[test]
    fn done_receiver_fires_on_cancel() {
        let ctx = Context::new(ContextConfig::default()).unwrap();
        let receiver = ctx.done_receiver();
        ctx.cancel();
        assert!(receiver
            .recv_timeout(std::time::Duration::from_secs(1))
            .is_ok());
    }
}
