//! In-flight operation tracking.
//!
//! # Responsibilities
//! - Register operations by id with their cancellation token
//! - Remember ids cancelled before or while they run
//! - Abort one or all operations
//! - Remove entries when an operation ends, on every path
//!
//! # Design Decisions
//! - Cancellation entries are independent of registry entries, so a cancel
//!   that races ahead of its start still takes effect
//! - Cleanup is tied to [`OperationGuard`] drop, so error paths cannot leak
//! - Ids that finished within [`FINISHED_RETENTION`] are remembered, and a
//!   cancel arriving for one of them is dropped instead of recorded

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::control::OperationId;
use crate::observability::metrics;

/// Lifecycle state of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Pending,
    Executing,
    Relaying,
    Done,
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation {0} is already in flight")]
    Duplicate(OperationId),
}

#[derive(Debug)]
struct OperationEntry {
    token: CancellationToken,
    state: OperationState,
}

/// How long a finished id is remembered for late cancels.
pub const FINISHED_RETENTION: Duration = Duration::from_secs(60);

/// Registry of in-flight operations plus the cancellation set.
#[derive(Debug)]
pub struct OperationRegistry {
    active: DashMap<OperationId, OperationEntry>,
    cancelled: DashSet<OperationId>,
    finished: DashMap<OperationId, Instant>,
    retention: Duration,
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::with_retention(FINISHED_RETENTION)
    }
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retention(retention: Duration) -> Self {
        Self {
            active: DashMap::new(),
            cancelled: DashSet::new(),
            finished: DashMap::new(),
            retention,
        }
    }

    /// Register an operation. The returned guard removes it when dropped.
    pub fn register(self: &Arc<Self>, id: OperationId) -> Result<OperationGuard, RegistryError> {
        use dashmap::mapref::entry::Entry;

        let token = CancellationToken::new();
        match self.active.entry(id.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(OperationEntry {
                    token: token.clone(),
                    state: OperationState::Pending,
                });
            }
        }
        metrics::record_active_operations(self.active.len());

        Ok(OperationGuard {
            registry: Arc::clone(self),
            id,
            token,
        })
    }

    /// Mark an id cancelled and abort it if it is running.
    ///
    /// A cancel for an id that finished recently is ignored, so it cannot
    /// abort a later start reusing that id. Returns whether a running
    /// operation was aborted.
    pub fn cancel(&self, id: &OperationId) -> bool {
        if !self.active.contains_key(id) && self.finished_recently(id) {
            tracing::debug!(request_id = %id, "Ignoring cancel for finished operation");
            return false;
        }

        self.cancelled.insert(id.clone());
        match self.active.get(id) {
            Some(entry) => {
                tracing::info!(request_id = %id, "Aborting operation on controller request");
                entry.token.cancel();
                true
            }
            None => {
                tracing::debug!(request_id = %id, "Cancel recorded for operation not yet running");
                false
            }
        }
    }

    /// Abort every registered operation. Returns how many were aborted.
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            self.cancelled.insert(entry.key().clone());
            entry.value().token.cancel();
            count += 1;
        }
        count
    }

    pub fn is_cancelled(&self, id: &OperationId) -> bool {
        self.cancelled.contains(id)
    }

    pub fn is_active(&self, id: &OperationId) -> bool {
        self.active.contains_key(id)
    }

    pub fn state(&self, id: &OperationId) -> Option<OperationState> {
        self.active.get(id).map(|entry| entry.state)
    }

    fn set_state(&self, id: &OperationId, state: OperationState) {
        if let Some(mut entry) = self.active.get_mut(id) {
            entry.state = state;
        }
    }

    /// Number of in-flight operations.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    fn finished_recently(&self, id: &OperationId) -> bool {
        self.finished
            .get(id)
            .is_some_and(|at| at.elapsed() < self.retention)
    }

    fn remove(&self, id: &OperationId) {
        self.active.remove(id);
        self.cancelled.remove(id);

        let retention = self.retention;
        self.finished.retain(|_, at| at.elapsed() < retention);
        self.finished.insert(id.clone(), Instant::now());

        metrics::record_active_operations(self.active.len());
    }
}

/// Handle to a registered operation. Removes the registry and
/// cancellation-set entries when dropped.
pub struct OperationGuard {
    registry: Arc<OperationRegistry>,
    id: OperationId,
    token: CancellationToken,
}

impl OperationGuard {
    pub fn id(&self) -> &OperationId {
        &self.id
    }

    /// Token cancelled on controller cancel, channel loss, or idle timeout.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn set_state(&self, state: OperationState) {
        self.registry.set_state(&self.id, state);
    }

    pub fn is_cancelled(&self) -> bool {
        self.registry.is_cancelled(&self.id)
    }
}

impl fmt::Debug for OperationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationGuard")
            .field("id", &self.id)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
        tracing::trace!(request_id = %self.id, "Operation removed from registry");
    }
}
