//! The builtin registry shared by the tree-walk evaluator and the VM.
//!
//! Each builtin carries a symbolic signature (used by the checker), a
//! permission derivation consulted before the call runs, and the
//! implementation itself. Both evaluators call through [`call_builtin`], so
//! permission checks and effect recording behave identically.

use std::sync::{Arc, LazyLock};

use rill_core::context::Context;
use rill_core::effect::{Effect, RemoveFileEffect, UpdateFileEffect};
use rill_core::json::{get_json_representation, JsonSerializationConfig};
use rill_core::permission::{PathForm, Permission, PermissionKind};
use rill_core::transaction::{Transaction, TransactionOptions};
use rill_core::value::{Duration, Host, Path, Value};
use rill_symbolic::{AtomKind, SymbolicValue};

use crate::error::{EvalError, EvalErrorKind};

pub struct Builtin {
    pub name: &'static str,
    /// Parameter signature; ignored when `variadic`.
    pub params: fn() -> Vec<SymbolicValue>,
    pub variadic: bool,
    pub result: fn() -> SymbolicValue,
    /// The permission this call demands, derived from the evaluated
    /// arguments. Checked before `run`.
    pub required_permission: fn(&[Value]) -> Option<Permission>,
    pub run: fn(&Context, &[Value]) -> Result<Value, EvalError>,
}

fn no_permission(_args: &[Value]) -> Option<Permission> {
    None
}

fn expect_path(value: &Value) -> Result<&Path, EvalError> {
    match value {
        Value::Path(path) => Ok(path),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "path",
            actual: other.kind_name(),
        }
        .into()),
    }
}

fn expect_str(value: &Value) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        Value::StringConcatenation(c) => Ok(c.string()),
        other => Err(EvalErrorKind::TypeMismatch {
            expected: "str",
            actual: other.kind_name(),
        }
        .into()),
    }
}

static BUILTINS: LazyLock<Vec<Builtin>> = LazyLock::new(|| {
    vec![
        Builtin {
            name: "print",
            params: Vec::new,
            variadic: true,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |ctx, args| {
                let line = args
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                match ctx.closest_state() {
                    Some(state) => {
                        state.write_output(line.as_bytes());
                        state.write_output(b"\n");
                    }
                    None => println!("{line}"),
                }
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "len",
            params: || vec![SymbolicValue::any()],
            variadic: false,
            result: || SymbolicValue::any_int(),
            required_permission: no_permission,
            run: |_ctx, args| {
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::StringConcatenation(c) => c.string().chars().count(),
                    Value::List(list) => list.len(),
                    Value::Tuple(tuple) => tuple.len(),
                    Value::Object(object) => object.len(),
                    Value::Record(record) => record.len(),
                    Value::ByteSlice(slice) => slice.len(),
                    Value::RuneSlice(slice) => slice.len(),
                    Value::KeyList(keys) => keys.names().len(),
                    Value::Dictionary(dict) => dict.len(),
                    other => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "a value with a length",
                            actual: other.kind_name(),
                        }
                        .into());
                    }
                };
                Ok(Value::Int(len as i64))
            },
        },
        Builtin {
            name: "type_of",
            params: || vec![SymbolicValue::any()],
            variadic: false,
            result: SymbolicValue::any_string,
            required_permission: no_permission,
            run: |_ctx, args| Ok(Value::Str(args[0].kind_name().to_string())),
        },
        Builtin {
            name: "append",
            params: || vec![SymbolicValue::any_list(), SymbolicValue::any()],
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |_ctx, args| match &args[0] {
                Value::List(list) => {
                    list.push(args[1].clone());
                    Ok(Value::Nil)
                }
                other => Err(EvalErrorKind::TypeMismatch {
                    expected: "list",
                    actual: other.kind_name(),
                }
                .into()),
            },
        },
        Builtin {
            name: "read_file",
            params: || vec![SymbolicValue::any_path()],
            variadic: false,
            result: SymbolicValue::any_string,
            required_permission: |args| {
                let Some(Value::Path(path)) = args.first() else {
                    return None;
                };
                Some(Permission::Filesystem {
                    kind: PermissionKind::Read,
                    entity: PathForm::Exact(path.clone()),
                })
            },
            run: |ctx, args| {
                let path = expect_path(&args[0])?;
                let bytes = ctx.filesystem().read_file(path)?;
                Ok(Value::Str(String::from_utf8_lossy(&bytes).into_owned()))
            },
        },
        Builtin {
            name: "write_file",
            params: || vec![SymbolicValue::any_path(), SymbolicValue::any_string()],
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: |args| {
                let Some(Value::Path(path)) = args.first() else {
                    return None;
                };
                Some(Permission::Filesystem {
                    kind: PermissionKind::Write,
                    entity: PathForm::Exact(path.clone()),
                })
            },
            run: |ctx, args| {
                let path = expect_path(&args[0])?.clone();
                let content = expect_str(&args[1])?;
                let effect = Arc::new(UpdateFileEffect::new(path, content.into_bytes()));
                match ctx.tx() {
                    // Inside a transaction the write is deferred to commit.
                    Some(tx) => tx.add_effect(ctx, effect)?,
                    None => effect
                        .apply(ctx)
                        .map_err(|e| EvalError::from(EvalErrorKind::Other(e.to_string())))?,
                }
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "remove_file",
            params: || vec![SymbolicValue::any_path()],
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: |args| {
                let Some(Value::Path(path)) = args.first() else {
                    return None;
                };
                Some(Permission::Filesystem {
                    kind: PermissionKind::Delete,
                    entity: PathForm::Exact(path.clone()),
                })
            },
            run: |ctx, args| {
                let path = expect_path(&args[0])?.clone();
                let effect = Arc::new(RemoveFileEffect::new(path));
                match ctx.tx() {
                    Some(tx) => tx.add_effect(ctx, effect)?,
                    None => effect
                        .apply(ctx)
                        .map_err(|e| EvalError::from(EvalErrorKind::Other(e.to_string())))?,
                }
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "sleep",
            params: || vec![SymbolicValue::any_atom(AtomKind::Duration)],
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |ctx, args| {
                let duration = match &args[0] {
                    Value::Duration(d) => *d,
                    other => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "duration",
                            actual: other.kind_name(),
                        }
                        .into());
                    }
                };
                sleep_cancellable(ctx, duration)?;
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "share",
            params: || vec![SymbolicValue::any()],
            variadic: false,
            result: SymbolicValue::any,
            required_permission: no_permission,
            run: |_ctx, args| {
                args[0].share()?;
                Ok(args[0].clone())
            },
        },
        Builtin {
            name: "join",
            params: || vec![SymbolicValue::runtime(rill_symbolic::RuntimeKind::Thread)],
            variadic: false,
            result: SymbolicValue::any,
            required_permission: no_permission,
            run: |_ctx, args| match &args[0] {
                Value::Thread(thread) => thread
                    .join()
                    .map_err(|message| EvalErrorKind::LThread(message).into()),
                other => Err(EvalErrorKind::TypeMismatch {
                    expected: "lthread",
                    actual: other.kind_name(),
                }
                .into()),
            },
        },
        Builtin {
            name: "get_host_resolution",
            params: || vec![SymbolicValue::any_host()],
            variadic: false,
            result: SymbolicValue::any,
            required_permission: no_permission,
            run: |ctx, args| {
                let host = match &args[0] {
                    Value::Host(host) => host.clone(),
                    other => {
                        return Err(EvalErrorKind::TypeMismatch {
                            expected: "host",
                            actual: other.kind_name(),
                        }
                        .into());
                    }
                };
                Ok(resolve_host(ctx, &host))
            },
        },
        Builtin {
            name: "to_json",
            params: || vec![SymbolicValue::serializable()],
            variadic: false,
            result: SymbolicValue::any_string,
            required_permission: no_permission,
            run: |ctx, args| {
                let json =
                    get_json_representation(ctx, &args[0], &JsonSerializationConfig::default())
                        .map_err(|e| EvalError::from(EvalErrorKind::Other(e.to_string())))?;
                Ok(Value::Str(json))
            },
        },
        Builtin {
            name: "start_tx",
            params: Vec::new,
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |ctx, _args| {
                if ctx.has_tx() {
                    return Err(
                        rill_core::context::ContextError::AlreadyHasTransaction.into()
                    );
                }
                Transaction::start_new(ctx, TransactionOptions::default());
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "commit_tx",
            params: Vec::new,
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |ctx, _args| {
                let tx = ctx
                    .tx()
                    .ok_or_else(|| EvalErrorKind::Other("no running transaction".into()))?;
                tx.commit(ctx)?;
                Ok(Value::Nil)
            },
        },
        Builtin {
            name: "rollback_tx",
            params: Vec::new,
            variadic: false,
            result: || SymbolicValue::atom(rill_symbolic::Atom::Nil),
            required_permission: no_permission,
            run: |ctx, _args| {
                let tx = ctx
                    .tx()
                    .ok_or_else(|| EvalErrorKind::Other("no running transaction".into()))?;
                tx.rollback(ctx)?;
                Ok(Value::Nil)
            },
        },
    ]
});

/// Sleeps in short slices, polling the cancellation token.
fn sleep_cancellable(ctx: &Context, duration: Duration) -> Result<(), EvalError> {
    const SLICE_MS: u64 = 10;
    let mut remaining = duration.as_millis();
    while remaining > 0 {
        if ctx.is_cancelled() {
            return Err(EvalErrorKind::Cancelled.into());
        }
        let slice = remaining.min(SLICE_MS);
        std::thread::sleep(std::time::Duration::from_millis(slice));
        remaining -= slice;
    }
    Ok(())
}

fn resolve_host(ctx: &Context, host: &Host) -> Value {
    ctx.get_host_resolution_data(host).unwrap_or(Value::Nil)
}

pub fn builtin(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn builtin_names() -> Vec<&'static str> {
    BUILTINS.iter().map(|b| b.name).collect()
}

/// Checks the derived permission, then runs the builtin. Both evaluators call
/// through here so the observable semantics stay identical.
pub fn call_builtin(ctx: &Context, name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let builtin =
        builtin(name).ok_or_else(|| EvalErrorKind::UnknownFunction(name.to_string()))?;
    if !builtin.variadic {
        let expected = (builtin.params)().len();
        if args.len() != expected {
            return Err(EvalErrorKind::Arity {
                name: name.to_string(),
                expected,
                actual: args.len(),
            }
            .into());
        }
    }
    if let Some(permission) = (builtin.required_permission)(args) {
        ctx.check_has_permission(&permission)?;
    }
    (builtin.run)(ctx, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_core::context::ContextConfig;
    use rill_core::filesystem::MemFilesystem;
    use rill_core::value::PathPattern;

    fn fs_ctx(permissions: Vec<Permission>) -> Context {
        Context::new(ContextConfig {
            permissions,
            filesystem: Some(Arc::new(MemFilesystem::new())),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn read_file_demands_a_read_permission() {
        let ctx = fs_ctx(vec![]);
        let path = Value::Path(Path::new("/a.txt").unwrap());
        let err = call_builtin(&ctx, "read_file", &[path]).unwrap_err();
        assert!(matches!(
            err.kind,
            EvalErrorKind::Context(rill_core::context::ContextError::Permission(_))
        ));
    }

    #[test]
    fn write_then_read_through_the_context_filesystem() {
        let ctx = fs_ctx(vec![
            Permission::fs_write(PathPattern::new("/...").unwrap()),
            Permission::fs_read(PathPattern::new("/...").unwrap()),
        ]);
        let path = Value::Path(Path::new("/a.txt").unwrap());
        call_builtin(
            &ctx,
            "write_file",
            &[path.clone(), Value::Str("hello".into())],
        )
        .unwrap();
        let read = call_builtin(&ctx, "read_file", &[path]).unwrap();
        assert_eq!(read, Value::Str("hello".into()));
    }

    #[test]
    fn write_inside_transaction_is_deferred_to_commit() {
        let ctx = fs_ctx(vec![
            Permission::fs_write(PathPattern::new("/...").unwrap()),
            Permission::fs_read(PathPattern::new("/...").unwrap()),
        ]);
        call_builtin(&ctx, "start_tx", &[]).unwrap();
        let path = Value::Path(Path::new("/a.txt").unwrap());
        call_builtin(
            &ctx,
            "write_file",
            &[path.clone(), Value::Str("deferred".into())],
        )
        .unwrap();
        // Not applied yet.
        assert!(!ctx.filesystem().exists(&Path::new("/a.txt").unwrap()));
        call_builtin(&ctx, "commit_tx", &[]).unwrap();
        assert!(ctx.filesystem().exists(&Path::new("/a.txt").unwrap()));
    }

    #[test]
    fn arity_is_enforced() {
        let ctx = fs_ctx(vec![]);
        let err = call_builtin(&ctx, "len", &[]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::Arity { .. }));
    }

    #[test]
    fn unknown_builtin() {
        let ctx = fs_ctx(vec![]);
        let err = call_builtin(&ctx, "no_such_fn", &[]).unwrap_err();
        assert!(matches!(err.kind, EvalErrorKind::UnknownFunction(_)));
    }
}
