//! Batched write scopes.
//!
//! Inside a batch, handle writes mark their object dirty instead of syncing.
//! When the outermost scope ends, each dirty object is synced once with its
//! final state. Scopes nest; only the outermost one flushes.

use super::{Engine, LabelUpdate};
use crate::models::{ObjectId, Tracked};
use crate::Result;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

/// Pending writes of one engine.
#[derive(Default)]
pub(crate) struct BatchState {
    depth: usize,
    pending: Vec<Weak<dyn Tracked>>,
    queued: HashSet<ObjectId>,
}

impl BatchState {
    fn defer(&mut self, object: &Rc<dyn Tracked>) {
        if self.queued.insert(object.object_id()) {
            self.pending.push(Rc::downgrade(object));
        }
    }

    /// Drops a pending write for an object that left the index.
    pub(crate) fn forget(&mut self, id: ObjectId) {
        if self.queued.remove(&id) {
            self.pending
                .retain(|object| object.upgrade().is_none_or(|o| o.object_id() != id));
        }
    }

    fn take(&mut self) -> Vec<Weak<dyn Tracked>> {
        self.queued.clear();
        std::mem::take(&mut self.pending)
    }
}

/// Scope guard returned by [`Engine::batch`].
///
/// The batch ends when the guard is committed or dropped, including on early
/// return and panic unwinding. Committing reports flush errors; dropping can
/// only log them.
#[must_use = "dropping the guard immediately ends the batch"]
pub struct BatchGuard {
    engine: Engine,
    open: bool,
}

impl BatchGuard {
    /// Ends the scope, flushing pending writes if this is the outermost one.
    ///
    /// # Errors
    ///
    /// Returns the first sync error. Every other pending object is still
    /// flushed.
    pub fn commit(mut self) -> Result<()> {
        self.open = false;
        self.engine.exit_batch()
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.engine.exit_batch() {
                tracing::error!(error = %e, "failed to flush batched writes");
            }
        }
    }
}

impl std::fmt::Debug for BatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchGuard")
            .field("open", &self.open)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens a batch scope.
    ///
    /// ```rust
    /// use mirage::{Collection, Engine, mirrorable};
    ///
    /// struct Counter {
    ///     hits: i64,
    /// }
    ///
    /// mirrorable!(Counter { hits });
    ///
    /// let engine = Engine::in_memory()?;
    /// let counters = engine.mirror(vec![mirage::Live::new(Counter { hits: 0 })])?;
    ///
    /// let batch = engine.batch();
    /// for _ in 0..10 {
    ///     counters[0].update(|c| c.hits += 1)?;
    /// }
    /// batch.commit()?;
    ///
    /// assert_eq!(counters.query("hits = 10")?.len(), 1);
    /// # Ok::<(), mirage::Error>(())
    /// ```
    pub fn batch(&self) -> BatchGuard {
        let depth = {
            let mut batch = self.inner.batch.borrow_mut();
            batch.depth += 1;
            batch.depth
        };
        tracing::trace!(depth, "entered batch scope");
        BatchGuard {
            engine: self.clone(),
            open: true,
        }
    }

    /// Runs `f` inside a batch scope.
    ///
    /// The scope is flushed whether or not `f` succeeds.
    ///
    /// # Errors
    ///
    /// Returns `f`'s error if it failed, otherwise the first flush error.
    pub fn batched<R>(&self, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let guard = self.batch();
        let outcome = f();
        let flushed = guard.commit();
        let value = outcome?;
        flushed?;
        Ok(value)
    }

    /// Returns `true` while a batch scope is open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.inner.batch.borrow().depth > 0
    }

    /// Number of objects waiting for the outermost batch to end.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.batch.borrow().pending.len()
    }

    /// Propagates a handle write.
    ///
    /// Objects whose rows were removed are left alone, so a stale handle
    /// cannot resurrect them. Any other object is synced, indexing it if
    /// needed.
    pub(crate) fn write_through(&self, object: &Rc<dyn Tracked>) -> Result<()> {
        let id = object.object_id();
        if self.is_detached(id) {
            tracing::debug!(%id, "write to a removed object not synced");
            return Ok(());
        }
        {
            let mut batch = self.inner.batch.borrow_mut();
            if batch.depth > 0 {
                batch.defer(object);
                return Ok(());
            }
        }
        self.sync_tracked(object, LabelUpdate::Keep)
    }

    fn exit_batch(&self) -> Result<()> {
        let pending = {
            let mut batch = self.inner.batch.borrow_mut();
            batch.depth = batch.depth.saturating_sub(1);
            if batch.depth > 0 {
                return Ok(());
            }
            batch.take()
        };
        self.flush(pending)
    }

    fn flush(&self, pending: Vec<Weak<dyn Tracked>>) -> Result<()> {
        let mut first_error = None;
        let mut flushed = 0_usize;
        for object in pending.iter().filter_map(Weak::upgrade) {
            match self.sync_tracked(&object, LabelUpdate::Keep) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    tracing::warn!(id = %object.object_id(), error = %e, "batched sync failed");
                    first_error.get_or_insert(e);
                },
            }
        }
        tracing::debug!(flushed, "flushed batched writes");
        first_error.map_or(Ok(()), Err)
    }
}
