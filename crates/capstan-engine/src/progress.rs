// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Progress event fan-out.
//!
//! Events go to in-process listeners first, synchronously, then to the
//! run's persisted event list. Persistence failures are logged and
//! otherwise ignored.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use capstan_core::ProgressEvent;
use capstan_storage::Database;
use capstan_storage::queries::runs;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

type Listener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Handle returned by [`ProgressHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// In-process progress listeners shared by every run of an engine.
#[derive(Clone, Default)]
pub struct ProgressHub {
    listeners: Arc<RwLock<Vec<(ListenerId, Listener)>>>,
    next_id: Arc<AtomicU64>,
}

impl ProgressHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&ProgressEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(l, _)| *l != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Calls every listener with `event`.
    pub fn publish(&self, event: &ProgressEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

/// Emits the events of one run.
pub(crate) struct RunEmitter {
    hub: ProgressHub,
    db: Database,
    run_id: String,
    sink: Option<UnboundedSender<ProgressEvent>>,
}

impl RunEmitter {
    pub(crate) fn new(
        hub: ProgressHub,
        db: Database,
        run_id: String,
        sink: Option<UnboundedSender<ProgressEvent>>,
    ) -> Self {
        Self {
            hub,
            db,
            run_id,
            sink,
        }
    }

    pub(crate) fn run_id(&self) -> &str {
        &self.run_id
    }

    pub(crate) async fn emit(&self, event: ProgressEvent) {
        self.hub.publish(&event);
        let persisted = serde_json::to_value(&event);
        if let Some(sink) = &self.sink {
            // The receiver may have been dropped; the run carries on regardless.
            let _ = sink.send(event);
        }
        let result = match persisted {
            Ok(value) => runs::append_run_event(&self.db, &self.run_id, &value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(run_id = %self.run_id, error = %e, "failed to persist progress event");
        }
    }
}
