//! The data-link queue: the single serialization point between the
//! receive threads (and client request sources) and the dispatcher.
//!
//! One mutex, one condition variable, O(1) enqueue/dequeue, no external
//! calls while the lock is held. The queue never drops items; past an
//! advisory depth the appender is told so it can log that the consumer
//! has stalled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use crate::frame::{CallSign, Frame};

/// Depth at which `append` reports a stalled consumer.
pub const ADVISORY_DEPTH: usize = 10;

/// Everything that can arrive at the dispatcher, one variant per kind.
#[derive(Debug, Clone)]
pub enum DlqItem {
    /// A frame decoded by some channel's demodulator bank (or the DTMF
    /// sequencer, which uses subchannel -1).
    ReceivedFrame {
        chan: usize,
        subchan: i8,
        slicer: i8,
        frame: Frame,
        alevel: u8,
        retries: u8,
        spectrum: String,
    },
    ConnectRequest {
        chan: usize,
        local: CallSign,
        remote: CallSign,
        client: usize,
    },
    DisconnectRequest {
        chan: usize,
        local: CallSign,
        remote: CallSign,
        client: usize,
    },
    TxDataRequest {
        chan: usize,
        local: CallSign,
        remote: CallSign,
        client: usize,
        pid: u8,
        data: Vec<u8>,
    },
    RegisterCallsign {
        call: CallSign,
        client: usize,
    },
    UnregisterCallsign {
        call: CallSign,
        client: usize,
    },
    /// Query the peer's XID parameters on an established link.
    XidRequest {
        chan: usize,
        local: CallSign,
        remote: CallSign,
        client: usize,
    },
}

#[derive(Debug, Default)]
pub struct Dlq {
    items: Mutex<VecDeque<DlqItem>>,
    cond: Condvar,
    stopped: AtomicBool,
}

impl Dlq {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item and wake the dispatcher. Returns the queue depth
    /// after the append; the caller warns when it passes
    /// [`ADVISORY_DEPTH`].
    pub fn append(&self, item: DlqItem) -> usize {
        let depth = {
            let mut items = self.items.lock().expect("dlq poisoned");
            items.push_back(item);
            items.len()
        };
        self.cond.notify_one();
        depth
    }

    /// Block until the queue is non-empty or the queue is shut down.
    /// Returns false on shutdown.
    pub fn wait_while_empty(&self) -> bool {
        let mut items = self.items.lock().expect("dlq poisoned");
        while items.is_empty() {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            items = self.cond.wait(items).expect("dlq poisoned");
        }
        true
    }

    /// Take the oldest item, if any.
    pub fn remove(&self) -> Option<DlqItem> {
        self.items.lock().expect("dlq poisoned").pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("dlq poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wake all waiters and make subsequent waits return immediately.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        self.cond.notify_all();
    }
}
