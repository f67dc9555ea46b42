//! Event bus: fan-in of event sources, fan-out to path-routed handlers.
//!
//! Sources (server pushes, timers, timings, the internal control channel)
//! are merged into one stream. [`EventBus::run`] drains it and hands each
//! event to the handler registered under the longest matching path prefix,
//! on its own task. An optional hook sees every event in stream order.

mod merge;
mod path;
mod sources;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::types::{paths, Event};

pub use merge::SourceMerger;
pub use path::{is_match, longest_match, normalize};
pub use sources::{format_duration, timer_path, timer_source, timing_source, DailyTime};

/// Source name of the internal control channel.
pub const INTERNAL_SOURCE: &str = "internal";
/// Source name of server-pushed events.
pub const SERVER_SOURCE: &str = "serverEvent";
/// Source name of interval timers.
pub const TIMER_SOURCE: &str = "timer";
/// Source name of daily timings.
pub const TIMING_SOURCE: &str = "timing";

/// Default capacity of the server event channel.
pub const DEFAULT_SERVER_BUFFER: usize = 10;

/// Callback invoked for events routed to a registered prefix.
pub type Handler = Arc<dyn Fn(Event) + Send + Sync>;

/// Callback observing every event synchronously, in stream order.
pub type Hook = Arc<dyn Fn(&Event) + Send + Sync>;

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("event stream is closed")]
    Closed,
    #[error("event loop already started")]
    AlreadyRunning,
    #[error("invalid timing {0:?}, expected HH:MM")]
    InvalidTiming(String),
    #[error("timer interval must be a positive whole number of milliseconds")]
    InvalidDuration,
}

struct BusInner {
    handlers: RwLock<HashMap<String, Handler>>,
    hook: RwLock<Option<Hook>>,
    merger: SourceMerger,
    stream: Mutex<Option<mpsc::Receiver<Event>>>,
    control: mpsc::Sender<Event>,
    server: mpsc::Sender<Event>,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Cloneable handle to a shared event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.patterns())
            .field("active_sources", &self.active_sources())
            .finish()
    }
}

impl EventBus {
    /// Create a bus with the default server buffer.
    ///
    /// Must be called from within a tokio runtime: the internal and server
    /// sources are merged immediately.
    pub fn new() -> Self {
        Self::with_server_buffer(DEFAULT_SERVER_BUFFER)
    }

    /// Create a bus whose server source buffers up to `buffer` events.
    pub fn with_server_buffer(buffer: usize) -> Self {
        let (merger, stream) = SourceMerger::new(1);
        let (control, control_rx) = mpsc::channel(1);
        let (server, server_rx) = mpsc::channel(buffer.max(1));

        for (name, source) in [(INTERNAL_SOURCE, control_rx), (SERVER_SOURCE, server_rx)] {
            if let Err(e) = merger.merge(name, source) {
                warn!("failed to merge {name} source: {e}");
            }
        }

        Self {
            inner: Arc::new(BusInner {
                handlers: RwLock::new(HashMap::new()),
                hook: RwLock::new(None),
                merger,
                stream: Mutex::new(Some(stream)),
                control,
                server,
                stopped: AtomicBool::new(false),
                shutdown: watch::Sender::new(false),
            }),
        }
    }

    /// Sender feeding the server source.
    pub fn server_sender(&self) -> mpsc::Sender<Event> {
        self.inner.server.clone()
    }

    /// Flips to `true` once [`stop`](Self::stop) is called or [`run`](Self::run) returns.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Merge an additional source. Its events are tagged with `name`.
    pub fn merge_source(&self, name: &str, source: mpsc::Receiver<Event>) -> Result<(), BusError> {
        self.inner.merger.merge(name, source)
    }

    /// Number of sources still open.
    pub fn active_sources(&self) -> usize {
        self.inner.merger.active_sources()
    }

    /// Register `handler` for events whose path starts with `prefix`.
    ///
    /// A second registration for the same (normalised) prefix replaces the first.
    pub fn handle<F>(&self, prefix: &str, handler: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let pattern = normalize(prefix);
        debug!("registering handler for {pattern}");
        self.handlers_mut().insert(pattern, Arc::new(handler));
    }

    /// Remove the handler registered for `prefix`. Returns true if one existed.
    pub fn unregister(&self, prefix: &str) -> bool {
        self.handlers_mut().remove(&normalize(prefix)).is_some()
    }

    /// Remove every registered handler.
    pub fn reset_handlers(&self) {
        self.handlers_mut().clear();
    }

    /// Registered prefixes, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        patterns.sort();
        patterns
    }

    /// The registered prefix an event with `path` would be routed to.
    pub fn route(&self, path: &str) -> Option<String> {
        self.lookup(&normalize(path)).map(|(pattern, _)| pattern)
    }

    /// Install a hook that observes every event in stream order.
    pub fn set_hook<F>(&self, hook: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        *self.inner.hook.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(hook));
    }

    /// Remove the hook.
    pub fn clear_hook(&self) {
        *self.inner.hook.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Merge a timer source ticking every `duration`. Returns its event path.
    pub fn add_timer(&self, duration: Duration) -> Result<String, BusError> {
        let (path, source) = timer_source(duration)?;
        self.merge_source(TIMER_SOURCE, source)?;
        Ok(path)
    }

    /// Merge a timing source firing daily at `hm` (`HH:MM`). Returns its event path.
    pub fn add_timing(&self, hm: &str) -> Result<String, BusError> {
        let (path, source) = timing_source(hm)?;
        self.merge_source(TIMING_SOURCE, source)?;
        Ok(path)
    }

    /// Drain the merged stream until the stop signal arrives or every source closes.
    ///
    /// Matched handlers run on their own tasks and are not awaited. Can only
    /// be called once per bus.
    pub async fn run(&self) -> Result<(), BusError> {
        let mut stream = self
            .inner
            .stream
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(BusError::AlreadyRunning)?;

        info!("event loop started");
        while let Some(event) = stream.recv().await {
            let path = normalize(&event.path);
            if path == paths::STOP_LOOP {
                info!("event loop stopped");
                self.inner.shutdown.send_replace(true);
                return Ok(());
            }

            if let Some((pattern, handler)) = self.lookup(&path) {
                debug!("dispatching {} from {} to {pattern}", event.path, event.source);
                let routed = event.clone();
                tokio::spawn(async move { handler(routed) });
            }

            let hook = self.inner.hook.read().unwrap_or_else(|e| e.into_inner()).clone();
            if let Some(hook) = hook {
                hook(&event);
            }
        }

        info!("event loop finished: all sources closed");
        self.inner.shutdown.send_replace(true);
        Ok(())
    }

    /// Ask [`run`](Self::run) to return. Calls after the first are no-ops.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.send_replace(true);
        if let Err(e) = self.inner.control.try_send(Event::stop_loop()) {
            warn!("failed to send stop signal: {e}");
        }
    }

    fn lookup(&self, path: &str) -> Option<(String, Handler)> {
        let handlers = self.inner.handlers.read().unwrap_or_else(|e| e.into_inner());
        let pattern = longest_match(handlers.keys().map(String::as_str), path)?;
        handlers
            .get(pattern)
            .map(|handler| (pattern.to_string(), Arc::clone(handler)))
    }

    fn handlers_mut(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Handler>> {
        self.inner.handlers.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
