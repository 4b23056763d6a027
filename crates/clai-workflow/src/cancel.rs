//! Cooperative cancellation for a whole run.
//!
//! A single token governs the run. Cancellation flips an atomic flag and
//! closes a channel, so blocking waiters can wake up through
//! `crossbeam_channel::select!` on [`CancelToken::cancelled`].

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    // Dropping the sender closes the channel, which wakes every receiver.
    sender: Arc<Mutex<Option<Sender<()>>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            sender: Arc::new(Mutex::new(Some(tx))),
            receiver: rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Channel that becomes ready once cancellation is requested. Receives
    /// never yield values; a closed-channel error is the wake-up signal.
    pub fn cancelled(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
