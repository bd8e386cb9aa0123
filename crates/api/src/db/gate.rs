//! Connection gate
//!
//! Brings the shared data-store connection up exactly once, no matter how many
//! requests arrive before the first attempt completes. Every caller that shows up
//! while an attempt is in flight subscribes to that attempt's outcome instead of
//! starting its own.
//!
//! State machine:
//!
//! ```text
//! Uninitialized --first call--> Initializing --ok--> Ready
//!                                    |
//!                                    +--err--> Failed --cool-down elapsed, next call--> Initializing
//! ```
//!
//! The attempt itself runs on a spawned task, so a caller that goes away (client
//! disconnect) never cancels initialization for everyone else.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tokio_retry::strategy::ExponentialBackoff;

/// Boxed future returned by a [`Connector`]
pub type ConnectFuture<H> = BoxFuture<'static, Result<H, ConnectError>>;

/// The collaborator that actually opens the shared resource.
///
/// The gate calls `connect` exactly once per initialization attempt.
pub trait Connector<H>: Send + Sync {
    fn connect(&self) -> ConnectFuture<H>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("connection failed: {0}")]
    Failed(String),
    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection attempt panicked")]
    Panicked,
    #[error("connection attempt ended without an outcome")]
    Abandoned,
}

/// Cool-down applied after consecutive failed attempts
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures.
    ///
    /// Doubles from `initial` and saturates at `max`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        if failures == 0 || self.initial.is_zero() {
            return Duration::ZERO;
        }

        let initial_ms = u64::try_from(self.initial.as_millis()).unwrap_or(u64::MAX);
        // from_millis(2) doubles each step; the factor scales step one to `initial`
        let mut backoff = ExponentialBackoff::from_millis(2)
            .factor((initial_ms / 2).max(1))
            .max_delay(self.max);

        backoff
            .nth(failures.saturating_sub(1) as usize)
            .unwrap_or(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

type Outcome<H> = Result<H, ConnectError>;

enum ConnectionState<H> {
    Uninitialized,
    /// The sender is the waiter list: every subscriber gets the attempt's outcome.
    Initializing(broadcast::Sender<Outcome<H>>),
    Ready(H),
    Failed {
        error: ConnectError,
        failures: u32,
        retry_at: Instant,
    },
}

/// Externally visible summary of the gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

pub struct ConnectionGate<H> {
    connector: Arc<dyn Connector<H>>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    state: Arc<Mutex<ConnectionState<H>>>,
}

impl<H> ConnectionGate<H>
where
    H: Clone + Send + Sync + 'static,
{
    pub fn new(
        connector: Arc<dyn Connector<H>>,
        retry: RetryPolicy,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            retry,
            attempt_timeout,
            state: Arc::new(Mutex::new(ConnectionState::Uninitialized)),
        }
    }

    /// Wait until the shared resource is ready and return its handle.
    ///
    /// Returns immediately once `Ready`. While an attempt is in flight the caller
    /// joins it. During the cool-down after a failure the stored error is returned
    /// without contacting the resource.
    pub async fn ensure_ready(&self) -> Result<H, ConnectError> {
        let mut rx = {
            let mut state = self.state.lock().await;
            match &*state {
                ConnectionState::Ready(handle) => return Ok(handle.clone()),
                ConnectionState::Initializing(tx) => {
                    tracing::debug!("Joining in-flight connection attempt");
                    tx.subscribe()
                }
                ConnectionState::Failed {
                    error, retry_at, ..
                } if Instant::now() < *retry_at => {
                    return Err(error.clone());
                }
                _ => self.begin_attempt(&mut state),
            }
        };

        match rx.recv().await {
            Ok(outcome) => outcome,
            Err(_) => Err(ConnectError::Abandoned),
        }
    }

    pub async fn status(&self) -> GateStatus {
        match &*self.state.lock().await {
            ConnectionState::Uninitialized => GateStatus::Uninitialized,
            ConnectionState::Initializing(_) => GateStatus::Initializing,
            ConnectionState::Ready(_) => GateStatus::Ready,
            ConnectionState::Failed { .. } => GateStatus::Failed,
        }
    }

    /// Remaining cool-down if the gate is currently failed
    pub async fn retry_in(&self) -> Option<Duration> {
        match &*self.state.lock().await {
            ConnectionState::Failed { retry_at, .. } => {
                Some(retry_at.saturating_duration_since(Instant::now()))
            }
            _ => None,
        }
    }

    /// Transition to `Initializing` and spawn the attempt. Must be called with the
    /// state lock held so that exactly one caller wins the transition.
    fn begin_attempt(&self, state: &mut ConnectionState<H>) -> broadcast::Receiver<Outcome<H>> {
        let failures = match state {
            ConnectionState::Failed { failures, .. } => *failures,
            _ => 0,
        };

        let (tx, rx) = broadcast::channel(1);
        *state = ConnectionState::Initializing(tx.clone());

        tracing::info!(
            previous_failures = failures,
            "Starting shared resource initialization"
        );

        let connector = Arc::clone(&self.connector);
        let shared_state = Arc::clone(&self.state);
        let retry = self.retry;
        let attempt_timeout = self.attempt_timeout;

        tokio::spawn(async move {
            let started = Instant::now();
            let outcome = run_attempt(connector, attempt_timeout).await;

            {
                let mut state = shared_state.lock().await;
                match &outcome {
                    Ok(handle) => {
                        *state = ConnectionState::Ready(handle.clone());
                        tracing::info!(
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Shared resource ready"
                        );
                    }
                    Err(error) => {
                        let failures = failures.saturating_add(1);
                        let delay = retry.delay_after(failures);
                        *state = ConnectionState::Failed {
                            error: error.clone(),
                            failures,
                            retry_at: Instant::now() + delay,
                        };
                        tracing::warn!(
                            error = %error,
                            failures,
                            retry_in_ms = delay.as_millis() as u64,
                            "Shared resource initialization failed"
                        );
                    }
                }
            }

            // Receivers may have been dropped by disconnected callers
            let _ = tx.send(outcome);
        });

        rx
    }
}

async fn run_attempt<H>(
    connector: Arc<dyn Connector<H>>,
    attempt_timeout: Duration,
) -> Outcome<H> {
    // Only effective with `panic = "unwind"`; an aborting profile takes the process down
    let attempt = AssertUnwindSafe(async move { connector.connect().await }).catch_unwind();

    match tokio::time::timeout(attempt_timeout, attempt).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(ConnectError::Panicked),
        Err(_) => Err(ConnectError::Timeout(attempt_timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Step {
        Succeed(u32),
        Fail(&'static str),
        Panic,
        Hang,
    }

    struct ScriptedConnector {
        calls: AtomicUsize,
        delay: Duration,
        steps: std::sync::Mutex<VecDeque<Step>>,
    }

    impl ScriptedConnector {
        fn new(delay: Duration, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                steps: std::sync::Mutex::new(steps.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Connector<u32> for ScriptedConnector {
        fn connect(&self) -> ConnectFuture<u32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self
                .steps
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Step::Succeed(0));
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                match step {
                    Step::Succeed(handle) => Ok(handle),
                    Step::Fail(reason) => Err(ConnectError::Failed(reason.to_string())),
                    Step::Panic => panic!("connector exploded"),
                    Step::Hang => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                }
            })
        }
    }

    fn gate(connector: Arc<ScriptedConnector>, retry: RetryPolicy) -> Arc<ConnectionGate<u32>> {
        Arc::new(ConnectionGate::new(
            connector,
            retry,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_attempt() {
        let connector = ScriptedConnector::new(Duration::from_millis(50), vec![Step::Succeed(7)]);
        let gate = gate(connector.clone(), RetryPolicy::default());

        let mut handles = Vec::new();
        for _ in 0..50 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.ensure_ready().await }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(connector.calls(), 1);
        assert_eq!(gate.status().await, GateStatus::Ready);
    }

    #[tokio::test]
    async fn test_ready_gate_does_not_reconnect() {
        let connector = ScriptedConnector::new(Duration::ZERO, vec![Step::Succeed(1)]);
        let gate = gate(connector.clone(), RetryPolicy::default());

        assert_eq!(gate.status().await, GateStatus::Uninitialized);
        for _ in 0..5 {
            assert_eq!(gate.ensure_ready().await, Ok(1));
        }
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_failure_released_to_every_waiter() {
        let connector =
            ScriptedConnector::new(Duration::from_millis(50), vec![Step::Fail("refused")]);
        let gate = gate(
            connector.clone(),
            RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(60)),
        );

        let mut handles = Vec::new();
        for _ in 0..20 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.ensure_ready().await }));
        }

        let expected = Err(ConnectError::Failed("refused".to_string()));
        for handle in handles {
            assert_eq!(handle.await.unwrap(), expected);
        }
        assert_eq!(connector.calls(), 1);
        assert_eq!(gate.status().await, GateStatus::Failed);
    }

    #[tokio::test]
    async fn test_cool_down_fails_fast_without_new_attempt() {
        let connector = ScriptedConnector::new(Duration::ZERO, vec![Step::Fail("down")]);
        let gate = gate(
            connector.clone(),
            RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(60)),
        );

        assert!(gate.ensure_ready().await.is_err());
        for _ in 0..10 {
            assert_eq!(
                gate.ensure_ready().await,
                Err(ConnectError::Failed("down".to_string()))
            );
        }
        assert_eq!(connector.calls(), 1);

        let remaining = gate.retry_in().await.unwrap();
        assert!(remaining > Duration::from_secs(50));
    }

    #[tokio::test]
    async fn test_retry_after_cool_down_recovers() {
        let connector = ScriptedConnector::new(
            Duration::ZERO,
            vec![Step::Fail("first"), Step::Succeed(3)],
        );
        let gate = gate(
            connector.clone(),
            RetryPolicy::new(Duration::from_millis(30), Duration::from_millis(30)),
        );

        assert!(gate.ensure_ready().await.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(gate.ensure_ready().await, Ok(3));
        assert_eq!(connector.calls(), 2);
        assert_eq!(gate.retry_in().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_abort_attempt() {
        let connector = ScriptedConnector::new(Duration::from_millis(80), vec![Step::Succeed(9)]);
        let gate = gate(connector.clone(), RetryPolicy::default());

        // The first caller starts the attempt and then disconnects
        let first = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.ensure_ready().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        assert_eq!(gate.ensure_ready().await, Ok(9));
        assert_eq!(connector.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_connector_does_not_wedge_gate() {
        let connector =
            ScriptedConnector::new(Duration::ZERO, vec![Step::Panic, Step::Succeed(4)]);
        let gate = gate(connector.clone(), RetryPolicy::new(Duration::ZERO, Duration::ZERO));

        assert_eq!(gate.ensure_ready().await, Err(ConnectError::Panicked));
        assert_eq!(gate.ensure_ready().await, Ok(4));
        assert_eq!(connector.calls(), 2);
    }

    #[test]
    fn test_build_profiles_keep_unwinding() {
        let manifest = include_str!("../../../../Cargo.toml");
        let aborts = manifest.lines().any(|line| {
            let line = line.trim();
            line.starts_with("panic") && line.contains("abort")
        });
        assert!(!aborts, "connector panics are only captured when panics unwind");
    }

    #[tokio::test]
    async fn test_hanging_connector_times_out() {
        let connector = ScriptedConnector::new(Duration::ZERO, vec![Step::Hang]);
        let gate = ConnectionGate::new(
            connector.clone(),
            RetryPolicy::default(),
            Duration::from_millis(50),
        );

        assert_eq!(
            gate.ensure_ready().await,
            Err(ConnectError::Timeout(Duration::from_millis(50)))
        );
        assert_eq!(gate.status().await, GateStatus::Failed);
    }

    #[test]
    fn test_retry_policy_doubles_and_caps() {
        let policy = RetryPolicy::new(Duration::from_millis(500), Duration::from_secs(3));

        assert_eq!(policy.delay_after(0), Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(4), Duration::from_secs(3));
        assert_eq!(policy.delay_after(400), Duration::from_secs(3));
    }

    #[test]
    fn test_retry_policy_zero_means_immediate() {
        let policy = RetryPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.delay_after(1), Duration::ZERO);
        assert_eq!(policy.delay_after(10), Duration::ZERO);
    }
}
