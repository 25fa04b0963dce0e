//! Host resolution: mapping logical hosts (`ldb://main`) to backing resources.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::{Host, Object, Path, Record, Url, Value};

/// The concrete resource backing a logical host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HostResolution {
    /// A filesystem-backed database directory.
    Path(Path),
    /// An in-memory store (`mem://` URL).
    InMemory(Url),
    /// An HTTPS proxy target.
    Proxy(Host),
    /// A cloud storage bucket.
    CloudStorage {
        bucket: String,
        host: Host,
        provider: String,
        access_key: String,
        secret_key: String,
    },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HostResolutionError {
    #[error("invalid host resolution data: {0}")]
    Invalid(String),
    #[error("in-memory resolutions must use the mem:// scheme, got {0}")]
    NotMemScheme(String),
}

impl HostResolution {
    /// Interprets a resolution entry value: a path, a `mem://` URL, a host, or
    /// an object carrying cloud storage credentials.
    pub fn from_value(value: &Value) -> Result<Self, HostResolutionError> {
        match value {
            Value::Path(path) => Ok(HostResolution::Path(path.clone())),
            Value::Url(url) => {
                if url.scheme().as_str() != "mem" {
                    return Err(HostResolutionError::NotMemScheme(url.to_string()));
                }
                Ok(HostResolution::InMemory(url.clone()))
            }
            Value::Host(host) => Ok(HostResolution::Proxy(host.clone())),
            Value::Object(object) => Self::from_entries(&object.entries()),
            Value::Record(record) => Self::from_entries(
                &record
                    .entries()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Vec<_>>(),
            ),
            other => Err(HostResolutionError::Invalid(format!(
                "expected a path, mem:// URL, host or object, got {}",
                other.kind_name()
            ))),
        }
    }

    fn from_entries(entries: &[(String, Value)]) -> Result<Self, HostResolutionError> {
        let get_str = |name: &str| -> Result<String, HostResolutionError> {
            entries
                .iter()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| match v {
                    Value::Str(s) => Some(s.clone()),
                    _ => None,
                })
                .ok_or_else(|| {
                    HostResolutionError::Invalid(format!("missing string property '{name}'"))
                })
        };
        let host = entries
            .iter()
            .find(|(k, _)| k == "host")
            .and_then(|(_, v)| match v {
                Value::Host(h) => Some(h.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                HostResolutionError::Invalid("missing host property 'host'".to_string())
            })?;
        Ok(HostResolution::CloudStorage {
            bucket: get_str("bucket")?,
            host,
            provider: get_str("provider")?,
            access_key: get_str("access-key")?,
            secret_key: get_str("secret-key")?,
        })
    }

    /// The value form handed back to scripts.
    pub fn to_value(&self) -> Value {
        match self {
            HostResolution::Path(path) => Value::Path(path.clone()),
            HostResolution::InMemory(url) => Value::Url(url.clone()),
            HostResolution::Proxy(host) => Value::Host(host.clone()),
            HostResolution::CloudStorage {
                bucket,
                host,
                provider,
                access_key,
                secret_key,
            } => Value::Record(Arc::new(Record::new([
                ("bucket".to_string(), Value::Str(bucket.clone())),
                ("host".to_string(), Value::Host(host.clone())),
                ("provider".to_string(), Value::Str(provider.clone())),
                ("access-key".to_string(), Value::Str(access_key.clone())),
                ("secret-key".to_string(), Value::Str(secret_key.clone())),
            ]))),
        }
    }

    /// Whether this resolution is backed by the given filesystem path.
    pub fn is_backed_by_path(&self, path: &Path) -> bool {
        matches!(self, HostResolution::Path(p) if p == path)
    }
}

// Object-carried credentials are accepted from script manifests.
impl TryFrom<&Object> for HostResolution {
    type Error = HostResolutionError;

    fn try_from(object: &Object) -> Result<Self, Self::Error> {
        Self::from_entries(&object.entries())
    }
}
