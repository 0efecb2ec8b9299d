//! Asynchronous results flowing through the pipeline.
//!
//! # Data Flow
//! ```text
//! producer (handler, upstream client, deferred completer)
//!     → Promise<V, E> (boxed future + shared CancelToken)
//!     → combinators: then / then_async / then_catch / then_always / observers
//!     → awaited by the next filter out, finally by the boundary adapter
//! ```
//!
//! # Design Decisions
//! - Two channels: `E` carries typed, expected failures; panics inside a
//!   promise are runtime exceptions and can be observed or converted with
//!   `then_on_runtime_exception` / `then_catch_runtime_exception`
//! - `Promise<V, NeverThrows>` is the "cannot fail" flavour; `recover` and
//!   `into_failable` convert between the two
//! - Cancellation is cooperative: every promise derived from another shares
//!   its token, producers watch the token and abort best-effort, and a
//!   cancel after completion is a no-op
//! - Promises are lazy like every Rust future; nothing runs until the
//!   outermost consumer awaits

use std::any::Any;
use std::convert::Infallible;
use std::future::{Future, IntoFuture};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use thiserror::Error;
use tokio::sync::{oneshot, Notify};

/// Error type of a promise that is guaranteed not to fail.
pub type NeverThrows = Infallible;

/// A panic captured while a promise was running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("runtime exception: {message}")]
pub struct RuntimeException {
    message: String,
}

impl RuntimeException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Describe a panic payload.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The producer of a deferred promise went away without completing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("promise abandoned before completion")]
pub struct PromiseAbandoned;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    completed: AtomicBool,
    notify: Notify,
}

/// Shared cancellation flag for a promise and everything derived from it.
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns false if the promise already completed
    /// or was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.state.completed.load(Ordering::Acquire) {
            return false;
        }
        if self.state.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.state.notify.notify_waiters();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    fn mark_completed(&self) {
        self.state.completed.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .field("completed", &self.is_completed())
            .finish()
    }
}

/// A deferred result: a value `V` or a failure `E`.
#[must_use = "promises do nothing unless awaited"]
pub struct Promise<V, E> {
    future: BoxFuture<'static, Result<V, E>>,
    token: CancelToken,
}

impl<V, E> Promise<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    /// Wrap a future under a fresh cancellation token.
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self::with_token(future, CancelToken::new())
    }

    /// Wrap a future under an existing token.
    pub fn with_token<F>(future: F, token: CancelToken) -> Self
    where
        F: Future<Output = Result<V, E>> + Send + 'static,
    {
        Self {
            future: Box::pin(future),
            token,
        }
    }

    /// An already successful promise.
    pub fn result(value: V) -> Self {
        Self::from_future(async move { Ok(value) })
    }

    /// An already failed promise.
    pub fn exception(error: E) -> Self {
        Self::from_future(async move { Err(error) })
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Ask the producer to abort. No effect after completion.
    pub fn cancel(&self) -> bool {
        self.token.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Map both outcomes.
    pub fn then<V2, E2, S, F>(self, on_result: S, on_exception: F) -> Promise<V2, E2>
    where
        V2: Send + 'static,
        E2: Send + 'static,
        S: FnOnce(V) -> Result<V2, E2> + Send + 'static,
        F: FnOnce(E) -> Result<V2, E2> + Send + 'static,
    {
        let future = self.future;
        Promise::with_token(
            async move {
                match future.await {
                    Ok(value) => on_result(value),
                    Err(error) => on_exception(error),
                }
            },
            self.token,
        )
    }

    /// Map the successful value.
    pub fn map<V2, S>(self, on_result: S) -> Promise<V2, E>
    where
        V2: Send + 'static,
        S: FnOnce(V) -> V2 + Send + 'static,
    {
        self.then(move |v| Ok(on_result(v)), Err)
    }

    /// Recover from, or translate, a failure.
    pub fn then_catch<E2, F>(self, on_exception: F) -> Promise<V, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Result<V, E2> + Send + 'static,
    {
        self.then(Ok, on_exception)
    }

    /// Chain another asynchronous computation on success.
    pub fn then_async<V2, S>(self, on_result: S) -> Promise<V2, E>
    where
        V2: Send + 'static,
        S: FnOnce(V) -> Promise<V2, E> + Send + 'static,
    {
        let outer = self.token.clone();
        let future = self.future;
        Promise::with_token(
            async move {
                let value = future.await?;
                on_result(value).linked_to(outer).await
            },
            self.token,
        )
    }

    /// Chain another asynchronous computation on failure.
    pub fn then_catch_async<E2, F>(self, on_exception: F) -> Promise<V, E2>
    where
        E2: Send + 'static,
        F: FnOnce(E) -> Promise<V, E2> + Send + 'static,
    {
        let outer = self.token.clone();
        let future = self.future;
        Promise::with_token(
            async move {
                match future.await {
                    Ok(value) => Ok(value),
                    Err(error) => on_exception(error).linked_to(outer).await,
                }
            },
            self.token,
        )
    }

    /// Observe the value without changing it.
    pub fn then_on_result<S>(self, on_result: S) -> Self
    where
        S: FnOnce(&V) + Send + 'static,
    {
        self.then_on_completion(move |outcome| {
            if let Ok(value) = outcome {
                on_result(value);
            }
        })
    }

    /// Observe the failure without changing it.
    pub fn then_on_exception<F>(self, on_exception: F) -> Self
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.then_on_completion(move |outcome| {
            if let Err(error) = outcome {
                on_exception(error);
            }
        })
    }

    /// Observe either outcome without changing it.
    pub fn then_on_completion<F>(self, on_completion: F) -> Self
    where
        F: FnOnce(&Result<V, E>) + Send + 'static,
    {
        let future = self.future;
        Promise::with_token(
            async move {
                let outcome = future.await;
                on_completion(&outcome);
                outcome
            },
            self.token,
        )
    }

    /// Run `action` exactly once whatever happens: success, failure, panic,
    /// or the promise being dropped before it finishes.
    pub fn then_always<F>(self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = Always(Some(action));
        let future = self.future;
        Promise::with_token(
            async move {
                let outcome = future.await;
                drop(guard);
                outcome
            },
            self.token,
        )
    }

    /// Observe a panic raised while running; the panic keeps unwinding.
    pub fn then_on_runtime_exception<F>(self, on_runtime_exception: F) -> Self
    where
        F: FnOnce(&RuntimeException) + Send + 'static,
    {
        let future = self.future;
        Promise::with_token(
            async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => {
                        on_runtime_exception(&RuntimeException::from_panic(&*payload));
                        std::panic::resume_unwind(payload)
                    }
                }
            },
            self.token,
        )
    }

    /// Convert a panic raised while running into an ordinary outcome.
    pub fn then_catch_runtime_exception<F>(self, on_runtime_exception: F) -> Self
    where
        F: FnOnce(RuntimeException) -> Result<V, E> + Send + 'static,
    {
        let future = self.future;
        Promise::with_token(
            async move {
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => on_runtime_exception(RuntimeException::from_panic(&*payload)),
                }
            },
            self.token,
        )
    }

    /// Turn every failure into a value, yielding a promise that cannot fail.
    pub fn recover<F>(self, on_exception: F) -> Promise<V, NeverThrows>
    where
        F: FnOnce(E) -> V + Send + 'static,
    {
        self.then(Ok, move |error| Ok(on_exception(error)))
    }

    /// Await, cancelling this promise's producer if `outer` is cancelled first.
    pub async fn linked_to(self, outer: CancelToken) -> Result<V, E> {
        let inner = self.token;
        let mut future = self.future;
        tokio::select! {
            biased;
            outcome = &mut future => return outcome,
            _ = outer.cancelled() => {
                inner.cancel();
            }
        }
        future.await
    }
}

impl<V> Promise<V, NeverThrows>
where
    V: Send + 'static,
{
    /// View a promise that cannot fail as one with a failure type.
    pub fn into_failable<E>(self) -> Promise<V, E>
    where
        E: Send + 'static,
    {
        self.then(Ok, |never| match never {})
    }

    /// Await the value.
    pub async fn value(self) -> V {
        match self.await {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<V, E> IntoFuture for Promise<V, E>
where
    V: Send + 'static,
    E: Send + 'static,
{
    type Output = Result<V, E>;
    type IntoFuture = BoxFuture<'static, Result<V, E>>;

    fn into_future(self) -> Self::IntoFuture {
        let token = self.token;
        let future = self.future;
        Box::pin(async move {
            let outcome = future.await;
            token.mark_completed();
            outcome
        })
    }
}

impl<V, E> std::fmt::Debug for Promise<V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise").field("token", &self.token).finish_non_exhaustive()
    }
}

struct Always<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for Always<F> {
    fn drop(&mut self) {
        if let Some(action) = self.0.take() {
            action();
        }
    }
}

/// Producer side of a deferred promise.
pub struct Completer<V, E> {
    tx: oneshot::Sender<Result<V, E>>,
    token: CancelToken,
}

impl<V, E> Completer<V, E> {
    /// Complete successfully. Returns false if nobody is waiting any more.
    pub fn handle_result(self, value: V) -> bool {
        self.tx.send(Ok(value)).is_ok()
    }

    /// Complete with a failure. Returns false if nobody is waiting any more.
    pub fn handle_exception(self, error: E) -> bool {
        self.tx.send(Err(error)).is_ok()
    }

    /// True once the consumer asked for cancellation.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }
}

/// A promise completed later through its [`Completer`].
///
/// Dropping the completer without completing fails the promise with
/// `E::from(PromiseAbandoned)`.
pub fn deferred<V, E>() -> (Promise<V, E>, Completer<V, E>)
where
    V: Send + 'static,
    E: From<PromiseAbandoned> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let token = CancelToken::new();
    let promise = Promise::with_token(
        async move {
            match rx.await {
                Ok(outcome) => outcome,
                Err(_) => Err(E::from(PromiseAbandoned)),
            }
        },
        token.clone(),
    );
    (promise, Completer { tx, token })
}
