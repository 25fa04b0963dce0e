//! End-to-end scenarios across the core subsystems: permissions, contexts,
//! transactions, JSON projection and migration.

use std::sync::{Arc, Mutex};

use rill_core::context::{Context, ContextConfig, ContextError};
use rill_core::effect::{Effect, EffectError, Reversibility};
use rill_core::json::{
    get_json_representation, has_json_representation, write_json_representation,
    JsonSerializationConfig, SerializationError,
};
use rill_core::migration::{get_migration_operations, MigrationOp};
use rill_core::pattern::{object_entries, Pattern};
use rill_core::permission::{Permission, PermissionError};
use rill_core::transaction::{Transaction, TransactionError, TransactionOptions};
use rill_core::value::{Duration, Object, Path, PathPattern, Value};

#[derive(Debug)]
struct AppendEffect {
    buffer: Arc<Mutex<String>>,
    text: &'static str,
}

impl AppendEffect {
    fn new(buffer: &Arc<Mutex<String>>, text: &'static str) -> Arc<dyn Effect> {
        Arc::new(Self {
            buffer: buffer.clone(),
            text,
        })
    }
}

impl Effect for AppendEffect {
    fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
        self.buffer.lock().unwrap().push_str(self.text);
        Ok(())
    }

    fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
        let mut buffer = self.buffer.lock().unwrap();
        if let Some(stripped) = buffer.strip_suffix(self.text) {
            *buffer = stripped.to_string();
        }
        Ok(())
    }

    fn reversibility(&self, _ctx: &Context) -> Reversibility {
        Reversibility::Reversible
    }

    fn describe(&self) -> String {
        format!("append {:?}", self.text)
    }
}

/// A context allows exactly what some held permission includes.
#[test]
fn permission_inclusion_through_a_context() {
    let ctx = Context::new(ContextConfig::with_permissions(vec![Permission::fs_read(
        PathPattern::new("/tmp/...").unwrap(),
    )]))
    .unwrap();

    assert!(ctx
        .check_has_permission(&Permission::fs_read_path(Path::new("/tmp/a").unwrap()))
        .is_ok());

    let denied = ctx
        .check_has_permission(&Permission::fs_write_path(Path::new("/tmp/a").unwrap()))
        .unwrap_err();
    assert!(matches!(
        denied,
        ContextError::Permission(PermissionError::NotGranted { .. })
    ));
}

/// Commit applies effects in insertion order.
#[test]
fn transaction_commit_order() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let buffer = Arc::new(Mutex::new(String::new()));
    let tx = Transaction::start_new(&ctx, TransactionOptions::default());
    tx.add_effect(&ctx, AppendEffect::new(&buffer, "1")).unwrap();
    tx.add_effect(&ctx, AppendEffect::new(&buffer, "2")).unwrap();
    tx.commit(&ctx).unwrap();
    assert_eq!(*buffer.lock().unwrap(), "12");
}

/// Readonly transactions reject effects.
#[test]
fn readonly_transaction_rejects_effects() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let buffer = Arc::new(Mutex::new(String::new()));
    let tx = Transaction::start_new_readonly(&ctx);
    assert_eq!(
        tx.add_effect(&ctx, AppendEffect::new(&buffer, "x")),
        Err(TransactionError::ReadonlyEffect)
    );
    tx.rollback(&ctx).unwrap();
}

/// An expired timeout rolls the transaction back; callbacks see failure.
#[test]
fn timeout_rollback() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let observed = Arc::new(Mutex::new(None::<bool>));
    let tx = Transaction::start_new(
        &ctx,
        TransactionOptions::with_timeout(Duration::from_millis(50)),
    );
    let seen = observed.clone();
    tx.on_end("probe", move |_, success| {
        *seen.lock().unwrap() = Some(success);
    })
    .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(150));

    assert!(tx.is_finished());
    assert_eq!(tx.commit(&ctx), Err(TransactionError::Finished));
    assert_eq!(*observed.lock().unwrap(), Some(false));
}

/// The exact JSON bytes for an int and a context-free path.
#[test]
fn json_exact_forms() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let config = JsonSerializationConfig::default();

    let int_json = get_json_representation(&ctx, &Value::Int(42), &config).unwrap();
    assert_eq!(int_json.as_bytes(), b"\"42\"");

    let path_json = get_json_representation(
        &ctx,
        &Value::Path(Path::new("/a").unwrap()),
        &config,
    )
    .unwrap();
    assert_eq!(path_json, r#"{"path__value":"/a"}"#);
}

/// Diffing two object patterns yields ordered, pseudopath-labelled ops.
#[test]
fn migration_diff() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let int = ctx.resolve_named_pattern("int").unwrap();

    let current = Pattern::object(
        object_entries([("a", int.clone(), false), ("b", int.clone(), true)]),
        false,
    );
    let next = Pattern::object(
        object_entries([
            ("a", int.clone(), false),
            ("b", int.clone(), false),
            ("c", int, false),
        ]),
        false,
    );

    let ops = get_migration_operations(&ctx, &current, &next, "").unwrap();
    assert_eq!(ops.len(), 2);
    assert!(matches!(
        &ops[0],
        MigrationOp::NillableInitialization { pseudo_path, .. } if pseudo_path == "/b"
    ));
    assert!(matches!(
        &ops[1],
        MigrationOp::Inclusion { pseudo_path, optional: false, .. } if pseudo_path == "/c"
    ));
}

/// Self-referencing objects have no JSON representation.
#[test]
fn cycle_detection() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let object = Object::empty();
    object.set_prop("inner", Value::Object(object.clone()));
    let value = Value::Object(object);

    assert!(!has_json_representation(
        &value,
        &JsonSerializationConfig::default()
    ));
    assert_eq!(
        write_json_representation(&ctx, &value, &JsonSerializationConfig::default()),
        Err(SerializationError::NoRepresentation("object"))
    );
}

/// Cancelling a context rolls back its running transaction.
#[test]
fn cancellation_rollback() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let observed = Arc::new(Mutex::new(None::<bool>));
    let tx = Transaction::start_new(&ctx, TransactionOptions::default());
    let seen = observed.clone();
    tx.on_end("probe", move |_, success| {
        *seen.lock().unwrap() = Some(success);
    })
    .unwrap();
    let finished = tx.wait_finished();

    ctx.cancel();
    finished
        .recv_timeout(std::time::Duration::from_secs(2))
        .unwrap();

    assert!(tx.is_finished());
    assert_eq!(*observed.lock().unwrap(), Some(false));
    assert!(ctx.is_done());
}

/// Rollback reverses effects in reverse insertion order.
#[test]
fn rollback_reverse_order() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    #[derive(Debug)]
    struct OrderProbe {
        order: Arc<Mutex<Vec<&'static str>>>,
        tag: &'static str,
    }

    impl Effect for OrderProbe {
        fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
            Ok(())
        }

        fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
            self.order.lock().unwrap().push(self.tag);
            Ok(())
        }

        fn reversibility(&self, _ctx: &Context) -> Reversibility {
            Reversibility::Reversible
        }

        fn describe(&self) -> String {
            self.tag.to_string()
        }
    }

    let tx = Transaction::start_new(&ctx, TransactionOptions::default());
    for tag in ["e1", "e2", "e3"] {
        tx.add_effect(
            &ctx,
            Arc::new(OrderProbe {
                order: order.clone(),
                tag,
            }),
        )
        .unwrap();
    }
    tx.rollback(&ctx).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["e3", "e2", "e1"]);
}

/// JSON written under a pattern parses back to a value the pattern accepts.
#[test]
fn json_parses_back_under_matching_pattern() {
    let ctx = Context::new(ContextConfig::default()).unwrap();
    let pattern = Pattern::object(
        object_entries([
            ("n", ctx.resolve_named_pattern("int").unwrap(), false),
            ("dir", ctx.resolve_named_pattern("path").unwrap(), false),
        ]),
        false,
    );
    let object = Object::new([
        ("n".to_string(), Value::Int(7)),
        ("dir".to_string(), Value::Path(Path::new("/data").unwrap())),
    ]);

    let config = JsonSerializationConfig::with_pattern(pattern.clone());
    let json = get_json_representation(&ctx, &Value::Object(object), &config).unwrap();
    assert_eq!(json, r#"{"n":"7","dir":"/data"}"#);

    // Rebuild the value the way a receiver holding the pattern would.
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    let rebuilt = Object::new([
        (
            "n".to_string(),
            Value::Int(parsed["n"].as_str().unwrap().parse().unwrap()),
        ),
        (
            "dir".to_string(),
            Value::Path(Path::new(parsed["dir"].as_str().unwrap()).unwrap()),
        ),
    ]);
    assert!(pattern.test(&ctx, &Value::Object(rebuilt)));
}
