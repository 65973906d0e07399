//! Drain-on-read mailbox between the listener thread and its consumer
//!
//! A single `Vec` behind one mutex. Producers append, the consumer swaps the
//! whole buffer out. Items come back in enqueue order and each item is handed
//! out exactly once.

use std::sync::{Mutex, MutexGuard};

/// Mutex-guarded queue drained in batches
#[derive(Debug)]
pub struct EventMailbox<T> {
    pending: Mutex<Vec<T>>,
}

impl<T> EventMailbox<T> {
    /// Create an empty mailbox
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
        }
    }

    // The buffer holds plain data, so a panic while it was locked cannot leave
    // it half-updated; keep going with whatever it contains.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append one item
    pub fn enqueue(&self, item: T) {
        self.lock().push(item);
    }

    /// Take every pending item, leaving the mailbox empty
    ///
    /// The flag is `false` (and the batch empty) when nothing was pending.
    pub fn drain(&self) -> (Vec<T>, bool) {
        let items = std::mem::take(&mut *self.lock());
        let had_any = !items.is_empty();
        (items, had_any)
    }

    /// Number of items waiting to be drained
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl<T> Default for EventMailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
