//! Core runtime substrate of the rill language: execution contexts with
//! capability-based permissions, application-level transactions with
//! reversible effects, the runtime value and pattern universe, its JSON
//! projection, and the schema-migration engine.

pub mod context;
pub mod effect;
pub mod filesystem;
pub mod host;
pub mod json;
pub mod limits;
pub mod manifest;
pub mod migration;
pub mod pattern;
pub mod permission;
pub mod transaction;
pub mod value;

pub use context::{
    CancellationToken, Context, ContextConfig, ContextError, ContextStatus, GlobalState,
    PatternNamespace,
};
pub use effect::{Effect, EffectError, Reversibility};
pub use filesystem::{Filesystem, FsError, MemFilesystem, OsFilesystem, SharedFilesystem};
pub use host::{HostResolution, HostResolutionError};
pub use json::{
    get_json_representation, has_json_representation, write_json_representation,
    JsonSerializationConfig, SerializationError,
};
pub use limits::{LimitError, LimitKind, LimitSpec, Limits};
pub use manifest::{Manifest, ManifestBuildError, ManifestError};
pub use migration::{get_migration_operations, MigrationError, MigrationOp, PseudoPath};
pub use pattern::{
    builtin_patterns, EntryPattern, ListPattern, ObjectPattern, OptionPattern, Pattern,
    PatternKind, RecordPattern, SeqShape, StringPattern, TuplePattern, TypeMatcher, TypePattern,
};
pub use permission::{
    CommandForm, HostForm, PathForm, Permission, PermissionError, PermissionKind,
};
pub use transaction::{
    Transaction, TransactionError, TransactionOptions, DEFAULT_TRANSACTION_TIMEOUT,
};
pub use value::{Sharability, SharingError, TypeTag, Value, ValueId};
