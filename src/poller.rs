//! Backoff-driven polling of a remote resource.
//!
//! A [`Poller`] runs one check at a time against a target, waiting between
//! checks on an exponentially growing interval. After every completed check
//! a caller-supplied interpreter maps the result to a [`CheckOutcome`]:
//!
//! - `Continue` grows the interval and polls again.
//! - `Reset` returns the interval to its base and zeroes the attempt count.
//! - `Stop` completes the poller and resolves its [`Completion`].
//! - Anything else aborts the poller silently.
//!
//! Reaching `max_attempts` also aborts silently. A [`Completion`] resolves
//! only on `Stop` or on [`Poller::stop(true)`](Poller::stop); on every
//! other termination it stays pending forever and never errors. Callers
//! that need to tell "gave up" from "still polling" inspect
//! [`Poller::phase`].
//!
//! ```rust,no_run
//! use statekeep::{CheckOutcome, FnCheck, Poller, PollerConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let check = FnCheck::new(|_url: String| async move {
//!     // issue the request for the url here
//!     "complete".to_string()
//! });
//! let poller = Poller::new(
//!     "/api/v1/progress/42",
//!     check,
//!     |state: &String| match state.as_str() {
//!         "queued" | "running" => CheckOutcome::Continue,
//!         "complete" => CheckOutcome::Stop,
//!         other => CheckOutcome::from(other),
//!     },
//!     PollerConfig::new(Duration::from_millis(500), 1.5).with_max_attempts(20),
//! )?;
//!
//! poller.start()?.await;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PollerConfig;
use crate::error::{ConfigError, PollerError};

/// One asynchronous check against a target resource.
///
/// The poller never inspects the output; it hands it to the interpreter.
#[async_trait]
pub trait ResourceCheck: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn check(&self, target: &str) -> Self::Output;
}

/// Adapts an async closure into a [`ResourceCheck`].
pub struct FnCheck<F>(F);

impl<F> FnCheck<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> ResourceCheck for FnCheck<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    type Output = Fut::Output;

    async fn check(&self, target: &str) -> Fut::Output {
        (self.0)(target.to_string()).await
    }
}

/// Control signal returned by the interpreter after each check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Continue,
    Reset,
    Stop,
    /// Any other signal; aborts the poller.
    Other(String),
}

impl From<&str> for CheckOutcome {
    fn from(signal: &str) -> Self {
        match signal {
            "continue" => CheckOutcome::Continue,
            "reset" => CheckOutcome::Reset,
            "stop" => CheckOutcome::Stop,
            other => CheckOutcome::Other(other.to_string()),
        }
    }
}

/// Why a poller aborted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// `max_attempts` checks completed without a `Stop`.
    AttemptBudgetExhausted,
    /// The interpreter returned a signal outside `continue | reset | stop`.
    UnrecognizedOutcome(String),
    /// The polling task ended without reaching a terminal phase: the check
    /// or the interpreter panicked, or the runtime shut down.
    TaskTerminated,
}

/// Lifecycle of a poller. Every phase after `Running` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerPhase {
    Idle,
    Running,
    /// The interpreter returned `Stop`.
    Completed,
    /// [`Poller::stop`] was called.
    Stopped,
    Aborted(AbortReason),
}

/// Resolves once when the poller completes or is stopped with
/// `call_callback = true`. Never resolves on any other path.
#[must_use = "a Completion does nothing unless awaited"]
pub struct Completion {
    rx: oneshot::Receiver<()>,
    closed: bool,
}

impl Future for Completion {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.closed {
            return Poll::Pending;
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(()),
            // The poller terminated without resolving; stay pending.
            Poll::Ready(Err(_)) => {
                self.closed = true;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

struct State {
    phase: PollerPhase,
    attempts: u32,
    interval: Duration,
    completion: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl State {
    fn abort(&mut self, reason: AbortReason) {
        self.phase = PollerPhase::Aborted(reason);
        self.task = None;
        // Dropping the sender leaves the completion pending forever.
        self.completion = None;
    }
}

struct Shared<C, I> {
    target: String,
    check: C,
    interpret: I,
    config: PollerConfig,
    state: Mutex<State>,
}

/// Sequential, backoff-driven poller. Single use: once it leaves
/// [`PollerPhase::Running`] it cannot be restarted.
///
/// Each instance owns its timer, so any number of pollers run side by side
/// without interfering. Dropping a running poller stops it silently.
pub struct Poller<C, I>
where
    C: ResourceCheck,
    I: Fn(&C::Output) -> CheckOutcome + Send + Sync + 'static,
{
    shared: Arc<Shared<C, I>>,
}

impl<C, I> Poller<C, I>
where
    C: ResourceCheck,
    I: Fn(&C::Output) -> CheckOutcome + Send + Sync + 'static,
{
    /// Create an idle poller for `target`.
    pub fn new(
        target: impl Into<String>,
        check: C,
        interpret: I,
        config: PollerConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let interval = config.base_interval();
        Ok(Self {
            shared: Arc::new(Shared {
                target: target.into(),
                check,
                interpret,
                config,
                state: Mutex::new(State {
                    phase: PollerPhase::Idle,
                    attempts: 0,
                    interval,
                    completion: None,
                    task: None,
                }),
            }),
        })
    }

    /// Begin polling on the current tokio runtime.
    ///
    /// The first check runs after the base interval.
    pub fn start(&self) -> Result<Completion, PollerError> {
        let handle = Handle::try_current().map_err(|_| PollerError::NoRuntime)?;

        let mut state = self.shared.state.lock();
        if state.phase != PollerPhase::Idle {
            return Err(PollerError::AlreadyStarted);
        }

        let (tx, rx) = oneshot::channel();
        state.phase = PollerPhase::Running;
        state.interval = self.shared.config.base_interval();
        state.completion = Some(tx);
        state.task = Some(handle.spawn(Shared::run(self.shared.clone())));

        info!(target_resource = %self.shared.target, "poller started");
        Ok(Completion { rx, closed: false })
    }

    /// Stop a running poller.
    ///
    /// Cancels the pending timer and discards the result of any check in
    /// flight. The completion resolves only if `call_callback` is true.
    /// Does nothing if the poller is not running.
    pub fn stop(&self, call_callback: bool) {
        let (task, completion) = {
            let mut state = self.shared.state.lock();
            if state.phase != PollerPhase::Running {
                return;
            }
            state.phase = PollerPhase::Stopped;
            (state.task.take(), state.completion.take())
        };
        if let Some(task) = task {
            task.abort();
        }

        info!(target_resource = %self.shared.target, call_callback, "poller stopped");
        if call_callback {
            if let Some(tx) = completion {
                let _ = tx.send(());
            }
        }
    }

    pub fn running(&self) -> bool {
        self.shared.state.lock().phase == PollerPhase::Running
    }

    /// Checks completed since start or the last reset.
    pub fn attempts(&self) -> u32 {
        self.shared.state.lock().attempts
    }

    pub fn phase(&self) -> PollerPhase {
        self.shared.state.lock().phase.clone()
    }

    /// The wait before the next check.
    pub fn current_interval(&self) -> Duration {
        self.shared.state.lock().interval
    }

    pub fn target(&self) -> &str {
        &self.shared.target
    }
}

impl<C, I> Drop for Poller<C, I>
where
    C: ResourceCheck,
    I: Fn(&C::Output) -> CheckOutcome + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.stop(false);
    }
}

impl<C, I> Shared<C, I>
where
    C: ResourceCheck,
    I: Fn(&C::Output) -> CheckOutcome + Send + Sync + 'static,
{
    /// The polling task. The guard is captured before the first poll, so it
    /// also fires if the runtime drops the task without ever running it.
    fn run(self: Arc<Self>) -> impl Future<Output = ()> + Send + 'static {
        let guard = Termination(self.clone());
        async move {
            let _guard = guard;
            self.poll_loop().await;
        }
    }

    async fn poll_loop(&self) {
        loop {
            let wait = {
                let state = self.state.lock();
                if state.phase != PollerPhase::Running {
                    return;
                }
                state.interval
            };
            tokio::time::sleep(wait).await;

            let result = self.check.check(&self.target).await;

            let attempts = {
                let mut state = self.state.lock();
                if state.phase != PollerPhase::Running {
                    return;
                }
                state.attempts += 1;
                state.attempts
            };

            let outcome = (self.interpret)(&result);
            debug!(target_resource = %self.target, attempts, ?outcome, "check completed");

            let mut state = self.state.lock();
            // The interpreter may have stopped the poller.
            if state.phase != PollerPhase::Running {
                return;
            }

            match outcome {
                CheckOutcome::Continue => {
                    state.interval = self.config.next_interval(state.interval);
                }
                CheckOutcome::Reset => {
                    state.interval = self.config.base_interval();
                    state.attempts = 0;
                }
                CheckOutcome::Stop => {
                    state.phase = PollerPhase::Completed;
                    state.task = None;
                    let completion = state.completion.take();
                    drop(state);

                    info!(target_resource = %self.target, attempts, "poller completed");
                    if let Some(tx) = completion {
                        let _ = tx.send(());
                    }
                    return;
                }
                CheckOutcome::Other(signal) => {
                    state.abort(AbortReason::UnrecognizedOutcome(signal));
                    info!(target_resource = %self.target, attempts, "poller aborted on unrecognized outcome");
                    return;
                }
            }

            if let Some(max) = self.config.max_attempts {
                if state.attempts >= max {
                    state.abort(AbortReason::AttemptBudgetExhausted);
                    info!(target_resource = %self.target, attempts, "poller exhausted its attempt budget");
                    return;
                }
            }
        }
    }
}

/// Aborts a poller whose task is torn down while still `Running`.
struct Termination<C, I>(Arc<Shared<C, I>>);

impl<C, I> Drop for Termination<C, I> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        if state.phase == PollerPhase::Running {
            state.abort(AbortReason::TaskTerminated);
            warn!(target_resource = %self.0.target, "polling task terminated unexpectedly");
        }
    }
}
