//! Application-level transactions.
//!
//! A transaction records reversible effects and lets external participants
//! (databases, data containers) register end callbacks. Commit applies the
//! effects in insertion order; rollback notifies the participants first, then
//! reverses the effects in reverse insertion order.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Instant;

use thiserror::Error;
use tracing::warn;
use ulid::Ulid;

use crate::context::Context;
use crate::effect::{Effect, Reversibility};
use crate::value::{Duration, Value};

pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction is finished")]
    Finished,
    #[error("cannot add irreversible effect to transaction")]
    IrreversibleEffect,
    #[error("effects are not allowed in a readonly transaction")]
    ReadonlyEffect,
    #[error("transaction end callback is already set for key '{0}'")]
    CallbackKeyTaken(String),
    #[error("error when applying effect '{effect}': {message}")]
    EffectApply { effect: String, message: String },
    #[error("error when reversing effect '{effect}': {message}")]
    EffectReverse { effect: String, message: String },
    #[error("callback errors: {0}")]
    CallbackErrors(String),
}

/// Panic payloads for programmer errors, mirroring the documented aborts.
pub const ERR_TRANSACTION_ALREADY_STARTED: &str = "transaction has already started";
pub const ERR_TRANSACTION_SHOULD_BE_STARTED_BY_SAME_CONTEXT: &str =
    "a transaction should be started by the same context that created it";
pub const ERR_CTX_ALREADY_HAS_TRANSACTION: &str = "context already has a transaction";

pub type EndCallback = Box<dyn Fn(&Transaction, bool) + Send + Sync>;

#[derive(Default)]
pub struct TransactionOptions {
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// A cheap-clone handle on one transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

struct TransactionInner {
    id: Ulid,
    ctx: Context,
    readonly: bool,
    timeout: Duration,
    finished: AtomicBool,
    state: Mutex<TxState>,
}

#[derive(Default)]
struct TxState {
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    effects: Vec<Arc<dyn Effect>>,
    values: HashMap<String, Value>,
    end_callbacks: Vec<(String, EndCallback)>,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("readonly", &self.inner.readonly)
            .field("finished", &self.is_finished())
            .finish()
    }
}

static WAITER_COUNTER: AtomicU64 = AtomicU64::new(0);

impl Transaction {
    fn new(ctx: &Context, readonly: bool, options: TransactionOptions) -> Transaction {
        Transaction {
            inner: Arc::new(TransactionInner {
                id: Ulid::new(),
                ctx: ctx.clone(),
                readonly,
                timeout: options.timeout.unwrap_or(DEFAULT_TRANSACTION_TIMEOUT),
                finished: AtomicBool::new(false),
                state: Mutex::new(TxState::default()),
            }),
        }
    }

    /// Creates a transaction and starts it immediately against `ctx`.
    pub fn start_new(ctx: &Context, options: TransactionOptions) -> Transaction {
        let tx = Transaction::new(ctx, false, options);
        tx.start(ctx).expect("start on a fresh transaction");
        tx
    }

    pub fn start_new_readonly(ctx: &Context) -> Transaction {
        let tx = Transaction::new(ctx, true, TransactionOptions::default());
        tx.start(ctx).expect("start on a fresh transaction");
        tx
    }

    pub fn id(&self) -> Ulid {
        self.inner.id
    }

    pub fn is_readonly(&self) -> bool {
        self.inner.readonly
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }

    /// Attaches the transaction to its context and spawns the monitor that
    /// rolls it back on timeout or context cancellation.
    ///
    /// Panics when called with a different context, when already started, or
    /// when the context already has a transaction: these are programmer
    /// errors.
    pub fn start(&self, ctx: &Context) -> Result<(), TransactionError> {
        if self.is_finished() {
            return Err(TransactionError::Finished);
        }
        if *ctx != self.inner.ctx {
            panic!("{ERR_TRANSACTION_SHOULD_BE_STARTED_BY_SAME_CONTEXT}");
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            if state.start_time.is_some() {
                panic!("{ERR_TRANSACTION_ALREADY_STARTED}");
            }
            if ctx.has_tx() {
                panic!("{ERR_CTX_ALREADY_HAS_TRANSACTION}");
            }
            state.start_time = Some(Instant::now());
        }

        let monitor_tx = self.clone();
        let monitor_ctx = ctx.clone();
        let done_rx = ctx.done_receiver();
        let timeout = self.inner.timeout.to_std();
        std::thread::spawn(move || match done_rx.recv_timeout(timeout) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                let _ = monitor_tx.rollback(&monitor_ctx);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if !monitor_tx.is_finished() {
                    warn!(id = %monitor_tx.id(), "transaction timed out");
                    let _ = monitor_tx.rollback(&monitor_ctx);
                }
            }
        });

        ctx.set_tx(Some(self.clone()));
        Ok(())
    }

    /// Associates `key` with a callback invoked once on commit or rollback.
    /// The callback may run on a different thread from the registrar.
    pub fn on_end(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&Transaction, bool) + Send + Sync + 'static,
    ) -> Result<(), TransactionError> {
        if self.is_finished() {
            return Err(TransactionError::Finished);
        }
        let key = key.into();
        let mut state = self.inner.state.lock().unwrap();
        if state.end_callbacks.iter().any(|(k, _)| *k == key) {
            return Err(TransactionError::CallbackKeyTaken(key));
        }
        state.end_callbacks.push((key, Box::new(callback)));
        Ok(())
    }

    pub fn add_effect(&self, ctx: &Context, effect: Arc<dyn Effect>) -> Result<(), TransactionError> {
        if self.is_finished() {
            return Err(TransactionError::Finished);
        }
        if self.inner.readonly {
            return Err(TransactionError::ReadonlyEffect);
        }
        if effect.reversibility(ctx) == Reversibility::Irreversible {
            return Err(TransactionError::IrreversibleEffect);
        }
        self.inner.state.lock().unwrap().effects.push(effect);
        Ok(())
    }

    /// Scratch storage for participants (database handles, containers).
    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        self.inner
            .state
            .lock()
            .unwrap()
            .values
            .insert(key.into(), value);
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.inner.state.lock().unwrap().values.get(key).cloned()
    }

    pub fn effect_count(&self) -> usize {
        self.inner.state.lock().unwrap().effects.len()
    }

    /// Applies effects in insertion order, then notifies end callbacks with
    /// `success = true`.
    ///
    /// When an effect's `apply` fails, the error is returned (wrapping any
    /// callback errors) but callbacks are still invoked with `success = true`:
    /// participants see the *intent* to commit. Callback panics are caught and
    /// aggregated; they never prevent the remaining callbacks from running.
    pub fn commit(&self, ctx: &Context) -> Result<(), TransactionError> {
        if self
            .inner
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransactionError::Finished);
        }

        let (effects, callbacks) = {
            let mut state = self.inner.state.lock().unwrap();
            state.end_time = Some(Instant::now());
            (
                state.effects.clone(),
                std::mem::take(&mut state.end_callbacks),
            )
        };

        for effect in &effects {
            if let Err(err) = effect.apply(ctx) {
                let callback_errors = self.run_callbacks(callbacks, true);
                self.inner.ctx.set_tx(None);
                let mut message = err.to_string();
                if !callback_errors.is_empty() {
                    message = format!(
                        "{message}; callback errors: {}",
                        callback_errors.join("; ")
                    );
                }
                return Err(TransactionError::EffectApply {
                    effect: effect.describe(),
                    message,
                });
            }
        }

        let callback_errors = self.run_callbacks(callbacks, true);
        self.inner.ctx.set_tx(None);
        combine_callback_errors(callback_errors)
    }

    /// Notifies end callbacks with `success = false`, then reverses effects in
    /// reverse insertion order. Participants get a chance to discard dirty
    /// state before the in-process effects undo themselves.
    pub fn rollback(&self, ctx: &Context) -> Result<(), TransactionError> {
        if self
            .inner
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TransactionError::Finished);
        }

        let (effects, callbacks) = {
            let mut state = self.inner.state.lock().unwrap();
            state.end_time = Some(Instant::now());
            (
                state.effects.clone(),
                std::mem::take(&mut state.end_callbacks),
            )
        };

        let callback_errors = self.run_callbacks(callbacks, false);

        for effect in effects.iter().rev() {
            if let Err(err) = effect.reverse(ctx) {
                self.inner.ctx.set_tx(None);
                return Err(TransactionError::EffectReverse {
                    effect: effect.describe(),
                    message: err.to_string(),
                });
            }
        }

        self.inner.ctx.set_tx(None);
        combine_callback_errors(callback_errors)
    }

    fn run_callbacks(&self, callbacks: Vec<(String, EndCallback)>, success: bool) -> Vec<String> {
        let mut errors = Vec::new();
        for (key, callback) in callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(self, success)));
            if let Err(payload) = result {
                errors.push(format!("{key}: {}", panic_message(&payload)));
            }
        }
        errors
    }

    /// A one-shot signal firing when commit or rollback completes. Returns an
    /// already-fired receiver for a finished transaction.
    pub fn wait_finished(&self) -> mpsc::Receiver<()> {
        let (sender, receiver) = mpsc::channel();
        if self.is_finished() {
            let _ = sender.send(());
            return receiver;
        }
        let sender = Mutex::new(sender);
        let key = format!(
            "wait-finished-{}",
            WAITER_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let registered = self.on_end(key, move |_, _| {
            let _ = sender.lock().unwrap().send(());
        });
        if registered.is_err() {
            // Finished between the check and the registration.
            let (sender, receiver) = mpsc::channel();
            let _ = sender.send(());
            return receiver;
        }
        receiver
    }
}

fn combine_callback_errors(errors: Vec<String>) -> Result<(), TransactionError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TransactionError::CallbackErrors(errors.join("; ")))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, ContextConfig};
    use crate::effect::{EffectError, IrreversibleEffect};

    /// Appends a marker to a shared buffer on apply, removes it on reverse.
    #[derive(Debug)]
    struct BufferEffect {
        buffer: Arc<Mutex<String>>,
        marker: &'static str,
    }

    impl Effect for BufferEffect {
        fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
            self.buffer.lock().unwrap().push_str(self.marker);
            Ok(())
        }

        fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
            self.buffer
                .lock()
                .unwrap()
                .push_str(&format!("-{}", self.marker));
            Ok(())
        }

        fn reversibility(&self, _ctx: &Context) -> Reversibility {
            Reversibility::Reversible
        }

        fn describe(&self) -> String {
            format!("buffer append {}", self.marker)
        }
    }

    #[derive(Debug)]
    struct FailingApplyEffect;

    impl Effect for FailingApplyEffect {
        fn apply(&self, _ctx: &Context) -> Result<(), EffectError> {
            Err(EffectError::new("disk full"))
        }

        fn reverse(&self, _ctx: &Context) -> Result<(), EffectError> {
            Ok(())
        }

        fn reversibility(&self, _ctx: &Context) -> Reversibility {
            Reversibility::Reversible
        }

        fn describe(&self) -> String {
            "failing effect".into()
        }
    }

    fn ctx() -> Context {
        Context::new(ContextConfig::default()).unwrap()
    }

    fn buffer_effect(buffer: &Arc<Mutex<String>>, marker: &'static str) -> Arc<dyn Effect> {
        Arc::new(BufferEffect {
            buffer: buffer.clone(),
            marker,
        })
    }

    #[test]
    fn commit_applies_effects_in_insertion_order() {
        let ctx = ctx();
        let buffer = Arc::new(Mutex::new(String::new()));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.add_effect(&ctx, buffer_effect(&buffer, "1")).unwrap();
        tx.add_effect(&ctx, buffer_effect(&buffer, "2")).unwrap();
        tx.commit(&ctx).unwrap();
        assert_eq!(*buffer.lock().unwrap(), "12");
        assert!(ctx.tx().is_none());
    }

    #[test]
    fn rollback_reverses_in_reverse_insertion_order() {
        let ctx = ctx();
        let buffer = Arc::new(Mutex::new(String::new()));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.add_effect(&ctx, buffer_effect(&buffer, "1")).unwrap();
        tx.add_effect(&ctx, buffer_effect(&buffer, "2")).unwrap();
        tx.add_effect(&ctx, buffer_effect(&buffer, "3")).unwrap();
        tx.rollback(&ctx).unwrap();
        assert_eq!(*buffer.lock().unwrap(), "-3-2-1");
    }

    #[test]
    fn finished_transaction_rejects_everything() {
        let ctx = ctx();
        let buffer = Arc::new(Mutex::new(String::new()));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.commit(&ctx).unwrap();
        assert!(tx.is_finished());
        assert_eq!(tx.commit(&ctx), Err(TransactionError::Finished));
        assert_eq!(tx.rollback(&ctx), Err(TransactionError::Finished));
        assert_eq!(
            tx.add_effect(&ctx, buffer_effect(&buffer, "x")),
            Err(TransactionError::Finished)
        );
    }

    #[test]
    fn readonly_transaction_rejects_effects() {
        let ctx = ctx();
        let buffer = Arc::new(Mutex::new(String::new()));
        let tx = Transaction::start_new_readonly(&ctx);
        assert_eq!(
            tx.add_effect(&ctx, buffer_effect(&buffer, "x")),
            Err(TransactionError::ReadonlyEffect)
        );
        tx.rollback(&ctx).unwrap();
    }

    #[test]
    fn irreversible_effects_are_rejected() {
        let ctx = ctx();
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        let effect = Arc::new(IrreversibleEffect {
            description: "sent email".into(),
        });
        assert_eq!(
            tx.add_effect(&ctx, effect),
            Err(TransactionError::IrreversibleEffect)
        );
        tx.rollback(&ctx).unwrap();
    }

    #[test]
    fn duplicate_callback_key_fails() {
        let ctx = ctx();
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.on_end("db", |_, _| {}).unwrap();
        assert_eq!(
            tx.on_end("db", |_, _| {}),
            Err(TransactionError::CallbackKeyTaken("db".into()))
        );
        tx.rollback(&ctx).unwrap();
    }

    #[test]
    fn second_transaction_on_same_context_panics() {
        let ctx = ctx();
        let _tx = Transaction::start_new(&ctx, TransactionOptions::default());
        let result = catch_unwind(AssertUnwindSafe(|| {
            Transaction::start_new(&ctx, TransactionOptions::default())
        }));
        assert!(result.is_err());
    }

    #[test]
    fn starting_with_a_different_context_panics() {
        let a = ctx();
        let b = ctx();
        let tx = Transaction::new(&a, false, TransactionOptions::default());
        let result = catch_unwind(AssertUnwindSafe(|| tx.start(&b)));
        assert!(result.is_err());
    }

    #[test]
    fn timeout_rolls_back() {
        let ctx = ctx();
        let rolled_back = Arc::new(Mutex::new(None::<bool>));
        let tx = Transaction::start_new(
            &ctx,
            TransactionOptions::with_timeout(Duration::from_millis(50)),
        );
        let seen = rolled_back.clone();
        tx.on_end("probe", move |_, success| {
            *seen.lock().unwrap() = Some(success);
        })
        .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(tx.is_finished());
        assert_eq!(tx.commit(&ctx), Err(TransactionError::Finished));
        assert_eq!(*rolled_back.lock().unwrap(), Some(false));
    }

    #[test]
    fn context_cancellation_rolls_back() {
        let ctx = ctx();
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        let finished = tx.wait_finished();
        ctx.cancel();
        finished
            .recv_timeout(std::time::Duration::from_secs(2))
            .unwrap();
        assert!(tx.is_finished());
        assert!(ctx.is_done());
    }

    #[test]
    fn apply_failure_still_notifies_callbacks_with_success() {
        let ctx = ctx();
        let observed = Arc::new(Mutex::new(None::<bool>));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.add_effect(&ctx, Arc::new(FailingApplyEffect)).unwrap();
        let seen = observed.clone();
        tx.on_end("db", move |_, success| {
            *seen.lock().unwrap() = Some(success);
        })
        .unwrap();

        let err = tx.commit(&ctx).unwrap_err();
        assert!(matches!(err, TransactionError::EffectApply { .. }));
        // Callbacks see the intent to commit.
        assert_eq!(*observed.lock().unwrap(), Some(true));
    }

    #[test]
    fn apply_failure_wraps_callback_errors() {
        let ctx = ctx();
        let second_ran = Arc::new(Mutex::new(false));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.add_effect(&ctx, Arc::new(FailingApplyEffect)).unwrap();
        tx.on_end("a", |_, _| panic!("boom")).unwrap();
        let flag = second_ran.clone();
        tx.on_end("b", move |_, success| {
            assert!(success);
            *flag.lock().unwrap() = true;
        })
        .unwrap();

        let err = tx.commit(&ctx).unwrap_err();
        assert!(*second_ran.lock().unwrap());
        match err {
            TransactionError::EffectApply { message, .. } => {
                assert!(message.contains("disk full"));
                assert!(message.contains("callback errors"));
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn callback_panic_is_isolated_and_aggregated() {
        let ctx = ctx();
        let second_ran = Arc::new(Mutex::new(false));
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.on_end("a", |_, _| panic!("boom")).unwrap();
        let flag = second_ran.clone();
        tx.on_end("b", move |_, _| {
            *flag.lock().unwrap() = true;
        })
        .unwrap();

        let err = tx.commit(&ctx).unwrap_err();
        assert!(*second_ran.lock().unwrap());
        match err {
            TransactionError::CallbackErrors(message) => {
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn wait_finished_on_finished_transaction_fires_immediately() {
        let ctx = ctx();
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.commit(&ctx).unwrap();
        let receiver = tx.wait_finished();
        assert!(receiver
            .recv_timeout(std::time::Duration::from_millis(100))
            .is_ok());
    }

    #[test]
    fn transaction_scratch_values() {
        let ctx = ctx();
        let tx = Transaction::start_new(&ctx, TransactionOptions::default());
        tx.set_value("db/main", Value::Int(7));
        assert_eq!(tx.get_value("db/main"), Some(Value::Int(7)));
        assert_eq!(tx.get_value("missing"), None);
        tx.rollback(&ctx).unwrap();
    }
}
