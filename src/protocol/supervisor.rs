//! Keep-alive supervisor: log in, sync until failure, repeat.
//!
//! A failed login waits `min(N, max_steps) * unit` before the next attempt,
//! where N counts consecutive failures starting at 1. A successful login
//! resets N.

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use tokio::sync::{mpsc, watch};

use crate::client::SessionContext;
use crate::protocol::sync::{run_sync_loop, sync_contacts, SyncError};
use crate::protocol::{LoginError, LoginFlow, QrPresenter, WebApi};
use crate::store::CredentialStore;
use crate::types::Event;

/// Linear backoff between failed logins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub unit: Duration,
    pub max_steps: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            unit: Duration::from_secs(60),
            max_steps: 60,
        }
    }
}

impl RetryPolicy {
    pub fn new(unit: Duration, max_steps: u32) -> Self {
        Self { unit, max_steps }
    }

    /// Wait before the next attempt after the `attempt`-th consecutive failure.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.unit * attempt.clamp(1, self.max_steps.max(1))
    }
}

/// Consecutive login failures, starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempt: u32,
}

impl Default for RetryState {
    fn default() -> Self {
        Self { attempt: 1 }
    }
}

impl RetryState {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Record a failure and return how long to wait before retrying.
    pub fn record_failure(&mut self, policy: &RetryPolicy) -> Duration {
        let delay = policy.delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 1;
    }
}

/// How one keep-alive cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    LoginFailed { error: LoginError, retry_in: Duration },
    SyncEnded(SyncError),
}

/// Owns everything a keep-alive cycle needs. Runs as its own task.
pub struct Supervisor<A: WebApi> {
    api: Arc<A>,
    store: Arc<dyn CredentialStore>,
    presenter: Arc<dyn QrPresenter>,
    context: Arc<SessionContext>,
    events: mpsc::Sender<Event>,
    shutdown: watch::Receiver<bool>,
    policy: RetryPolicy,
}

impl<A: WebApi> Supervisor<A> {
    pub fn new(
        api: Arc<A>,
        store: Arc<dyn CredentialStore>,
        presenter: Arc<dyn QrPresenter>,
        context: Arc<SessionContext>,
        events: mpsc::Sender<Event>,
        shutdown: watch::Receiver<bool>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            store,
            presenter,
            context,
            events,
            shutdown,
            policy,
        }
    }

    async fn emit_login(&self, logged_in: bool) {
        if self.events.send(Event::login_change(logged_in)).await.is_err() {
            warn!("event bus closed, login change not delivered");
        }
    }

    /// Log in once and, on success, sync until the loop fails.
    pub async fn cycle(&self) -> CycleOutcome {
        let mut flow = LoginFlow::new(&*self.api, &*self.store, &*self.presenter);
        let session = match flow.run().await {
            Ok(session) => session,
            Err(error) => {
                error!("login failed: {error}");
                let retry_in = self.context.with_retry(|r| r.record_failure(&self.policy));
                return CycleOutcome::LoginFailed { error, retry_in };
            }
        };

        info!("login succeeded");
        self.context.with_retry(RetryState::reset);
        self.context.install(session);
        self.context.roster().clear();

        info!("synchronizing contacts");
        if let Err(err) = sync_contacts(&*self.api, &self.context).await {
            error!("contact sync failed: {err}");
        }

        self.context.set_logged_in(true);
        self.emit_login(true).await;
        let err = run_sync_loop(&*self.api, &self.context, &self.events).await;
        self.context.set_logged_in(false);
        self.emit_login(false).await;

        error!("sync stopped: {err}");
        CycleOutcome::SyncEnded(err)
    }

    /// Repeat [`cycle`](Self::cycle) until shutdown is signalled or the
    /// event bus goes away. Shutdown interrupts both a running cycle and a
    /// backoff wait.
    pub async fn run(self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() || self.events.is_closed() {
                break;
            }
            let outcome = tokio::select! {
                outcome = self.cycle() => outcome,
                _ = shutdown.wait_for(|stop| *stop) => break,
            };
            match outcome {
                CycleOutcome::LoginFailed { retry_in, .. } => {
                    warn!("retrying login in {}s", retry_in.as_secs());
                    tokio::select! {
                        _ = tokio::time::sleep(retry_in) => {}
                        _ = shutdown.wait_for(|stop| *stop) => break,
                    }
                }
                CycleOutcome::SyncEnded(SyncError::BusClosed) => break,
                CycleOutcome::SyncEnded(_) => {}
            }
        }
        self.context.set_logged_in(false);
        info!("keep-alive stopped");
    }
}
