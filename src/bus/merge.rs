//! Fan-in of named event sources into one stream.
//!
//! Each merged source gets a forwarding task that stamps the source name on
//! every event. The merged stream closes once the last source has closed.

use std::sync::{Arc, Mutex, MutexGuard};

use log::debug;
use tokio::sync::mpsc;

use crate::bus::BusError;
use crate::types::Event;

#[derive(Debug)]
struct MergeState {
    /// Dropped once the last source finishes, which closes the stream.
    sender: Option<mpsc::Sender<Event>>,
    active: usize,
}

/// Merges any number of event sources into a single receiver.
#[derive(Debug, Clone)]
pub struct SourceMerger {
    state: Arc<Mutex<MergeState>>,
}

fn lock(state: &Mutex<MergeState>) -> MutexGuard<'_, MergeState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

impl SourceMerger {
    /// Create a merger and the merged stream it feeds.
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Event>) {
        let (sender, stream) = mpsc::channel(buffer.max(1));
        let merger = Self {
            state: Arc::new(Mutex::new(MergeState {
                sender: Some(sender),
                active: 0,
            })),
        };
        (merger, stream)
    }

    /// Start forwarding `source` into the merged stream, tagging events with `name`.
    ///
    /// Must be called from within a tokio runtime. Fails once the merged
    /// stream has closed.
    pub fn merge(&self, name: &str, mut source: mpsc::Receiver<Event>) -> Result<(), BusError> {
        let sender = {
            let mut state = lock(&self.state);
            let sender = state.sender.clone().ok_or(BusError::Closed)?;
            state.active += 1;
            sender
        };

        let state = Arc::clone(&self.state);
        let name = name.to_string();
        debug!("merging event source {name}");
        tokio::spawn(async move {
            while let Some(mut event) = source.recv().await {
                event.source = name.clone();
                if sender.send(event).await.is_err() {
                    break;
                }
            }
            drop(sender);

            let mut state = lock(&state);
            state.active -= 1;
            debug!("event source {name} closed, {} remaining", state.active);
            if state.active == 0 {
                state.sender = None;
            }
        });
        Ok(())
    }

    /// Number of sources still forwarding.
    pub fn active_sources(&self) -> usize {
        lock(&self.state).active
    }

    /// Returns true once the merged stream can no longer accept sources.
    pub fn is_closed(&self) -> bool {
        lock(&self.state).sender.is_none()
    }
}
