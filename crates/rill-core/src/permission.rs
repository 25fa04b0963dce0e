//! The permission algebra.
//!
//! A permission pairs an ordered kind with an entity (a concrete path/host or
//! a pattern over them). `includes` decides whether one permission covers
//! another; the context consults it before every privileged operation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Host, HostPattern, Path, PathPattern, Url, UrlPattern};

/// The action dimension of a permission.
///
/// `Write` majorizes the narrower mutating kinds, so holding
/// `Filesystem(Write, /data/...)` also grants `Create`, `Update`, `Delete`
/// and `WriteStream` under that prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PermissionKind {
    Read,
    Write,
    Create,
    Update,
    Delete,
    WriteStream,
    Use,
    Provide,
}

impl PermissionKind {
    pub fn includes(self, other: PermissionKind) -> bool {
        self == other
            || (self == PermissionKind::Write
                && matches!(
                    other,
                    PermissionKind::Create
                        | PermissionKind::Update
                        | PermissionKind::Delete
                        | PermissionKind::WriteStream
                ))
    }

    pub fn name(self) -> &'static str {
        match self {
            PermissionKind::Read => "read",
            PermissionKind::Write => "write",
            PermissionKind::Create => "create",
            PermissionKind::Update => "update",
            PermissionKind::Delete => "delete",
            PermissionKind::WriteStream => "write-stream",
            PermissionKind::Use => "use",
            PermissionKind::Provide => "provide",
        }
    }
}

impl fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A filesystem entity: one path or a path set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathForm {
    Exact(Path),
    Pattern(PathPattern),
}

impl PathForm {
    pub fn includes(&self, other: &PathForm) -> bool {
        match (self, other) {
            (PathForm::Exact(a), PathForm::Exact(b)) => a == b,
            (PathForm::Pattern(p), PathForm::Exact(b)) => p.matches_path(b),
            (PathForm::Pattern(p), PathForm::Pattern(q)) => p.includes_pattern(q),
            (PathForm::Exact(_), PathForm::Pattern(_)) => false,
        }
    }
}

impl fmt::Display for PathForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathForm::Exact(p) => write!(f, "{p}"),
            PathForm::Pattern(p) => write!(f, "{p}"),
        }
    }
}

/// A network entity: one host, a host set, or a URL form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostForm {
    Exact(Host),
    Pattern(HostPattern),
    Url(Url),
    UrlPattern(UrlPattern),
}

impl HostForm {
    pub fn includes(&self, other: &HostForm) -> bool {
        match (self, other) {
            (HostForm::Exact(a), HostForm::Exact(b)) => a == b,
            (HostForm::Pattern(p), HostForm::Exact(h)) => p.matches_host(h),
            (HostForm::Pattern(p), HostForm::Pattern(q)) => p.includes_pattern(q),
            (HostForm::Exact(h), HostForm::Url(u)) => {
                u.host().map(|uh| uh == *h).unwrap_or(false)
            }
            (HostForm::Pattern(p), HostForm::Url(u)) => {
                u.host().map(|uh| p.matches_host(&uh)).unwrap_or(false)
            }
            (HostForm::Url(a), HostForm::Url(b)) => a == b,
            (HostForm::UrlPattern(p), HostForm::Url(u)) => p.matches_url(u),
            (HostForm::UrlPattern(a), HostForm::UrlPattern(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for HostForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostForm::Exact(h) => write!(f, "{h}"),
            HostForm::Pattern(p) => write!(f, "{p}"),
            HostForm::Url(u) => write!(f, "{u}"),
            HostForm::UrlPattern(p) => write!(f, "{p}"),
        }
    }
}

/// A command entity: an exact command name or a `*` glob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandForm {
    Exact(String),
    Glob(String),
}

impl CommandForm {
    pub fn includes(&self, other: &CommandForm) -> bool {
        match (self, other) {
            (CommandForm::Exact(a), CommandForm::Exact(b)) => a == b,
            (CommandForm::Glob(g), CommandForm::Exact(name)) => glob_match(g, name),
            (CommandForm::Glob(a), CommandForm::Glob(b)) => a == b || a == "*",
            (CommandForm::Exact(_), CommandForm::Glob(_)) => false,
        }
    }
}

fn glob_match(glob: &str, name: &str) -> bool {
    let mut regex_src = String::with_capacity(glob.len() * 2);
    regex_src.push('^');
    for c in glob.chars() {
        match c {
            '*' => regex_src.push_str(".*"),
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' | '?' => {
                regex_src.push('\\');
                regex_src.push(c);
            }
            _ => regex_src.push(c),
        }
    }
    regex_src.push('$');
    regex::Regex::new(&regex_src)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

impl fmt::Display for CommandForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandForm::Exact(name) => f.write_str(name),
            CommandForm::Glob(glob) => f.write_str(glob),
        }
    }
}

/// A capability required by a privileged operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    Filesystem {
        kind: PermissionKind,
        entity: PathForm,
    },
    Network {
        kind: PermissionKind,
        entity: HostForm,
    },
    Command {
        kind: PermissionKind,
        entity: CommandForm,
    },
    /// Spawning lthreads.
    LThread { kind: PermissionKind },
    Database {
        kind: PermissionKind,
        entity: HostForm,
    },
}

impl Permission {
    pub fn kind(&self) -> PermissionKind {
        match self {
            Permission::Filesystem { kind, .. }
            | Permission::Network { kind, .. }
            | Permission::Command { kind, .. }
            | Permission::LThread { kind }
            | Permission::Database { kind, .. } => *kind,
        }
    }

    /// Whether this permission covers `other`: kinds must be compatible and
    /// the entity of `self` must match the entity of `other`.
    pub fn includes(&self, other: &Permission) -> bool {
        if !self.kind().includes(other.kind()) {
            return false;
        }
        match (self, other) {
            (
                Permission::Filesystem { entity: a, .. },
                Permission::Filesystem { entity: b, .. },
            ) => a.includes(b),
            (Permission::Network { entity: a, .. }, Permission::Network { entity: b, .. }) => {
                a.includes(b)
            }
            (Permission::Command { entity: a, .. }, Permission::Command { entity: b, .. }) => {
                a.includes(b)
            }
            (Permission::LThread { .. }, Permission::LThread { .. }) => true,
            (Permission::Database { entity: a, .. }, Permission::Database { entity: b, .. }) => {
                a.includes(b)
            }
            _ => false,
        }
    }

    pub fn domain(&self) -> &'static str {
        match self {
            Permission::Filesystem { .. } => "fs",
            Permission::Network { .. } => "net",
            Permission::Command { .. } => "cmd",
            Permission::LThread { .. } => "lthread",
            Permission::Database { .. } => "db",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Filesystem { kind, entity } => write!(f, "fs:{kind} {entity}"),
            Permission::Network { kind, entity } => write!(f, "net:{kind} {entity}"),
            Permission::Command { kind, entity } => write!(f, "cmd:{kind} {entity}"),
            Permission::LThread { kind } => write!(f, "lthread:{kind}"),
            Permission::Database { kind, entity } => write!(f, "db:{kind} {entity}"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PermissionError {
    #[error("not allowed, missing permission: {permission}")]
    NotGranted { permission: Permission },
    #[error("permission is forbidden: {permission}")]
    Forbidden { permission: Permission },
}

impl PermissionError {
    pub fn permission(&self) -> &Permission {
        match self {
            PermissionError::NotGranted { permission }
            | PermissionError::Forbidden { permission } => permission,
        }
    }
}

/// Convenience constructors used across the runtime and tests.
impl Permission {
    pub fn fs_read(pattern: PathPattern) -> Self {
        Permission::Filesystem {
            kind: PermissionKind::Read,
            entity: PathForm::Pattern(pattern),
        }
    }

    pub fn fs_read_path(path: Path) -> Self {
        Permission::Filesystem {
            kind: PermissionKind::Read,
            entity: PathForm::Exact(path),
        }
    }

    pub fn fs_write(pattern: PathPattern) -> Self {
        Permission::Filesystem {
            kind: PermissionKind::Write,
            entity: PathForm::Pattern(pattern),
        }
    }

    pub fn fs_write_path(path: Path) -> Self {
        Permission::Filesystem {
            kind: PermissionKind::Write,
            entity: PathForm::Exact(path),
        }
    }

    pub fn net_read(entity: HostForm) -> Self {
        Permission::Network {
            kind: PermissionKind::Read,
            entity,
        }
    }

    pub fn lthread_create() -> Self {
        Permission::LThread {
            kind: PermissionKind::Create,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_tmp() -> Permission {
        Permission::fs_read(PathPattern::new("/tmp/...").unwrap())
    }

    #[test]
    fn prefix_pattern_includes_descendant_paths() {
        let p = read_tmp();
        assert!(p.includes(&Permission::fs_read_path(Path::new("/tmp/a").unwrap())));
        assert!(!p.includes(&Permission::fs_read_path(Path::new("/etc/passwd").unwrap())));
    }

    #[test]
    fn kind_mismatch_is_not_included() {
        let p = read_tmp();
        assert!(!p.includes(&Permission::fs_write_path(Path::new("/tmp/a").unwrap())));
    }

    #[test]
    fn write_majorizes_narrow_mutating_kinds() {
        let w = Permission::fs_write(PathPattern::new("/data/...").unwrap());
        let create = Permission::Filesystem {
            kind: PermissionKind::Create,
            entity: PathForm::Exact(Path::new("/data/new.txt").unwrap()),
        };
        assert!(w.includes(&create));

        let read = Permission::fs_read_path(Path::new("/data/new.txt").unwrap());
        assert!(!w.includes(&read));
    }

    #[test]
    fn network_wildcard_host() {
        let p = Permission::net_read(HostForm::Pattern(
            HostPattern::new("https://*.example.com").unwrap(),
        ));
        let q = Permission::net_read(HostForm::Exact(
            Host::new("https://api.example.com").unwrap(),
        ));
        assert!(p.includes(&q));
        let r = Permission::net_read(HostForm::Exact(Host::new("https://example.org").unwrap()));
        assert!(!p.includes(&r));
    }

    #[test]
    fn url_permission_included_in_host_permission() {
        let p = Permission::net_read(HostForm::Exact(Host::new("https://example.com").unwrap()));
        let q = Permission::net_read(HostForm::Url(
            Url::new("https://example.com/index.html").unwrap(),
        ));
        assert!(p.includes(&q));
    }

    #[test]
    fn command_glob() {
        let p = Permission::Command {
            kind: PermissionKind::Use,
            entity: CommandForm::Glob("git*".into()),
        };
        let q = Permission::Command {
            kind: PermissionKind::Use,
            entity: CommandForm::Exact("git".into()),
        };
        assert!(p.includes(&q));
    }

    #[test]
    fn permission_error_display_names_the_permission() {
        let err = PermissionError::NotGranted {
            permission: read_tmp(),
        };
        assert!(err.to_string().contains("fs:read /tmp/..."));
    }
}
