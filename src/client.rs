//! High-level client: wires the login state machine, the sync loop and the
//! event bus together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::info;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::config::WechatConfig;
use crate::error::ClientError;
use crate::protocol::{
    HttpApi, QrPresenter, RetryPolicy, RetryState, Supervisor, TerminalQrPresenter, WebApi,
};
use crate::store::{CredentialStore, FileCredentialStore, Roster, Session};
use crate::types::{Contact, Event};

/// Live session state shared by the supervisor, the sync loop and callers.
///
/// The session is replaced wholesale on login and refreshed copy-on-write;
/// readers get a clone and never see a partial update.
#[derive(Debug, Default)]
pub struct SessionContext {
    session: RwLock<Option<Session>>,
    logged_in: AtomicBool,
    retry: Mutex<RetryState>,
    roster: Roster,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<Session> {
        self.session.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Replace the session after a login.
    pub fn install(&self, session: Session) {
        *self.session.write().unwrap_or_else(|e| e.into_inner()) = Some(session);
    }

    /// Apply `update` to a copy of the session and publish the copy.
    pub fn update_session<F>(&self, update: F)
    where
        F: FnOnce(&mut Session),
    {
        let mut slot = self.session.write().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = slot.as_ref() {
            let mut next = current.clone();
            update(&mut next);
            *slot = Some(next);
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub(crate) fn set_logged_in(&self, logged_in: bool) {
        self.logged_in.store(logged_in, Ordering::SeqCst);
    }

    pub fn retry_state(&self) -> RetryState {
        *self.retry.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn with_retry<R>(&self, f: impl FnOnce(&mut RetryState) -> R) -> R {
        f(&mut self.retry.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }
}

/// WeChat Web client.
///
/// Handlers are registered by path prefix; [`start`](Self::start) launches
/// the keep-alive task and [`run`](Self::run) drives the event bus until
/// [`stop`](Self::stop) is called.
pub struct Client<A: WebApi = HttpApi> {
    config: WechatConfig,
    api: Arc<A>,
    store: Arc<dyn CredentialStore>,
    presenter: Arc<dyn QrPresenter>,
    context: Arc<SessionContext>,
    bus: EventBus,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl Client<HttpApi> {
    /// Client with the HTTP protocol, file-backed session cache and terminal QR output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: WechatConfig) -> Result<Self, ClientError> {
        let api = HttpApi::new(&config)?;
        let store = Arc::new(FileCredentialStore::new(config.cache_dir.clone()));
        Ok(Self::with_parts(config, api, store, Arc::new(TerminalQrPresenter::new())))
    }
}

impl<A: WebApi> Client<A> {
    /// Assemble a client from its collaborators.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_parts(
        config: WechatConfig,
        api: A,
        store: Arc<dyn CredentialStore>,
        presenter: Arc<dyn QrPresenter>,
    ) -> Self {
        let bus = EventBus::with_server_buffer(config.server_event_buffer);
        Self {
            config,
            api: Arc::new(api),
            store,
            presenter,
            context: Arc::new(SessionContext::new()),
            bus,
            keep_alive: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WechatConfig {
        &self.config
    }

    /// The underlying event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Read-only view of the live session state.
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Register a handler for events whose path starts with `prefix`.
    pub fn handle<F>(&self, prefix: &str, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.bus.handle(prefix, handler);
    }

    pub fn unregister(&self, prefix: &str) -> bool {
        self.bus.unregister(prefix)
    }

    pub fn reset_handlers(&self) {
        self.bus.reset_handlers();
    }

    /// Observe every event in stream order.
    pub fn set_hook<F>(&self, hook: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.bus.set_hook(hook);
    }

    /// Emit `/timer/<duration>` every `duration`.
    pub fn add_timer(&self, duration: Duration) -> Result<String, ClientError> {
        Ok(self.bus.add_timer(duration)?)
    }

    /// Emit `/timing/<HH:MM>` daily at `hm` local time.
    pub fn add_timing(&self, hm: &str) -> Result<String, ClientError> {
        Ok(self.bus.add_timing(hm)?)
    }

    /// Spawn the keep-alive task that logs in and keeps syncing.
    pub fn start(&self) -> Result<(), ClientError> {
        let mut slot = self.keep_alive.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return Err(ClientError::AlreadyStarted);
        }
        let policy = RetryPolicy::new(self.config.retry_unit(), self.config.max_backoff_steps);
        let supervisor = Supervisor::new(
            Arc::clone(&self.api),
            Arc::clone(&self.store),
            Arc::clone(&self.presenter),
            Arc::clone(&self.context),
            self.bus.server_sender(),
            self.bus.shutdown_signal(),
            policy,
        );
        *slot = Some(tokio::spawn(supervisor.run()));
        info!("keep-alive started");
        Ok(())
    }

    /// Drive the event bus until [`stop`](Self::stop).
    pub async fn run(&self) -> Result<(), ClientError> {
        Ok(self.bus.run().await?)
    }

    /// Stop the event bus and the keep-alive task, interrupting any login
    /// attempt, sync or backoff wait in progress.
    pub fn stop(&self) {
        self.bus.stop();
    }

    pub fn is_logged_in(&self) -> bool {
        self.context.is_logged_in()
    }

    /// The authenticated self identity.
    pub fn myself(&self) -> Option<Contact> {
        self.context.session().map(|s| s.myself)
    }

    pub fn contact_by_user_name(&self, user_name: &str) -> Option<Contact> {
        self.context.roster().contact(user_name)
    }

    pub fn members_of_group(&self, group: &str) -> Option<Vec<Contact>> {
        self.context.roster().group_members(group)
    }

    /// Send a text message with the current session. Not retried.
    pub async fn send_text(&self, content: &str, to: &str) -> Result<(), ClientError> {
        if !self.context.is_logged_in() {
            return Err(ClientError::NotLoggedIn);
        }
        let session = self.context.session().ok_or(ClientError::NotLoggedIn)?;
        let response = self.api.send_text(&session, content, to).await?;
        response.base_response.check()?;
        Ok(())
    }

    /// Forget the cached session so the next start logs in interactively.
    pub fn logout(&self) -> Result<(), ClientError> {
        self.store.invalidate()?;
        info!("cached session removed");
        Ok(())
    }
}
