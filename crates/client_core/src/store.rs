use std::sync::Arc;

use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::types::ProgressState;

#[derive(Clone)]
pub struct ProgressStore {
    tx: Arc<watch::Sender<Arc<ProgressState>>>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new(ProgressState::default())
    }
}

impl ProgressStore {
    pub fn new(initial: ProgressState) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> Arc<ProgressState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProgressState>> {
        self.tx.subscribe()
    }

    pub fn changes(&self) -> WatchStream<Arc<ProgressState>> {
        WatchStream::new(self.subscribe())
    }

    /// Atomically replaces the snapshot with whatever `f` derives from it.
    /// Returning `None` leaves the state untouched and wakes no subscriber.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&ProgressState) -> Option<ProgressState>,
    {
        self.tx.send_if_modified(|current| match f(current) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    pub fn replace(&self, state: ProgressState) {
        self.update(|_| Some(state));
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
