//! Per-channel transmit queues.
//!
//! Two FIFOs per channel: HI for digipeated/expedited traffic, LO for
//! locally originated frames. One mutex covers all channels; each channel
//! has its own condition variable for the transmitter wake-up. Within a
//! contention-won burst the transmitter always drains HI before LO.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::errors::QueueError;
use crate::frame::{CallSign, Frame};

/// APRS frames are dropped when a channel's queues exceed this.
pub const APRS_HIGH_WATER: usize = 100;

/// Connected-mode frames are never dropped, only warned about here.
pub const LINK_WARN_DEPTH: usize = 250;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxPriority {
    High,
    Low,
}

/// Traffic class, used for the backpressure policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    /// Fire-and-forget UI traffic; droppable under backpressure.
    Aprs,
    /// Connected-mode traffic; never dropped.
    Link,
    /// Zero-length wake marker from `lm_seize_request`; discarded by the
    /// transmitter after it has forced the wake-up.
    Seize,
}

#[derive(Debug, Clone)]
pub struct TxEntry {
    pub frame: Option<Frame>,
    pub kind: TxKind,
    pub enqueued_at: Instant,
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy)]
pub struct AppendInfo {
    /// HI + LO depth after the append.
    pub depth: usize,
    /// The connected-mode warn threshold was crossed.
    pub congested: bool,
}

/// Optional filters for [`TxQueue::count`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CountFilter {
    pub source: Option<CallSign>,
    pub dest: Option<CallSign>,
    /// Count information bytes instead of frames.
    pub in_bytes: bool,
}

#[derive(Debug, Default)]
struct ChannelQueues {
    high: VecDeque<TxEntry>,
    low: VecDeque<TxEntry>,
}

impl ChannelQueues {
    fn depth(&self) -> usize {
        self.high.len() + self.low.len()
    }
}

pub struct TxQueue {
    queues: Mutex<Vec<ChannelQueues>>,
    conds: Vec<Condvar>,
    stopped: AtomicBool,
}

impl TxQueue {
    pub fn new(channels: usize) -> Self {
        Self {
            queues: Mutex::new((0..channels).map(|_| ChannelQueues::default()).collect()),
            conds: (0..channels).map(|_| Condvar::new()).collect(),
            stopped: AtomicBool::new(false),
        }
    }

    fn check_chan(&self, chan: usize) -> Result<(), QueueError> {
        if chan >= self.conds.len() {
            return Err(QueueError::NoTransmitter { chan });
        }
        Ok(())
    }

    /// Append a frame and signal the channel's transmitter.
    pub fn append(
        &self,
        chan: usize,
        prio: TxPriority,
        kind: TxKind,
        frame: Frame,
    ) -> Result<AppendInfo, QueueError> {
        self.check_chan(chan)?;
        let info = {
            let mut queues = self.queues.lock().expect("txq poisoned");
            let q = &mut queues[chan];
            let depth = q.depth();
            if kind == TxKind::Aprs && depth >= APRS_HIGH_WATER {
                return Err(QueueError::Overflow { chan, depth });
            }
            let entry = TxEntry {
                frame: Some(frame),
                kind,
                enqueued_at: Instant::now(),
            };
            match prio {
                TxPriority::High => q.high.push_back(entry),
                TxPriority::Low => q.low.push_back(entry),
            }
            AppendInfo {
                depth: depth + 1,
                congested: depth + 1 >= LINK_WARN_DEPTH,
            }
        };
        self.conds[chan].notify_all();
        Ok(info)
    }

    /// Enqueue a zero-length marker so the transmitter wakes even with no
    /// pending frames.
    pub fn lm_seize_request(&self, chan: usize) -> Result<(), QueueError> {
        self.check_chan(chan)?;
        {
            let mut queues = self.queues.lock().expect("txq poisoned");
            queues[chan].high.push_back(TxEntry {
                frame: None,
                kind: TxKind::Seize,
                enqueued_at: Instant::now(),
            });
        }
        self.conds[chan].notify_all();
        Ok(())
    }

    /// Remove the next entry, HI first.
    pub fn remove(&self, chan: usize) -> Option<TxEntry> {
        let mut queues = self.queues.lock().expect("txq poisoned");
        let q = &mut queues[chan];
        q.high.pop_front().or_else(|| q.low.pop_front())
    }

    /// Peek at the class of the next entry without removing it.
    pub fn peek_kind(&self, chan: usize, prio: TxPriority) -> Option<TxKind> {
        let queues = self.queues.lock().expect("txq poisoned");
        let q = &queues[chan];
        match prio {
            TxPriority::High => q.high.front().map(|e| e.kind),
            TxPriority::Low => q.low.front().map(|e| e.kind),
        }
    }

    pub fn has_work(&self, chan: usize) -> bool {
        let queues = self.queues.lock().expect("txq poisoned");
        queues[chan].depth() > 0
    }

    /// Count queued frames (or bytes) matching the filter.
    pub fn count(&self, chan: usize, prio: TxPriority, filter: CountFilter) -> usize {
        let queues = self.queues.lock().expect("txq poisoned");
        let q = &queues[chan];
        let iter = match prio {
            TxPriority::High => q.high.iter(),
            TxPriority::Low => q.low.iter(),
        };
        iter.filter_map(|e| e.frame.as_ref())
            .filter(|f| filter.source.map_or(true, |s| f.src() == s))
            .filter(|f| filter.dest.map_or(true, |d| f.dest() == d))
            .map(|f| if filter.in_bytes { f.len() } else { 1 })
            .sum()
    }

    /// Block until the channel has work or shutdown. Returns false on
    /// shutdown.
    pub fn wait_for_work(&self, chan: usize) -> bool {
        let mut queues = self.queues.lock().expect("txq poisoned");
        while queues[chan].depth() == 0 {
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            queues = self.conds[chan].wait(queues).expect("txq poisoned");
        }
        true
    }

    /// Wait up to `timeout` for more work. Returns true if work arrived.
    pub fn wait_for_work_timeout(&self, chan: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queues = self.queues.lock().expect("txq poisoned");
        loop {
            if queues[chan].depth() > 0 {
                return true;
            }
            if self.stopped.load(Ordering::Acquire) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self.conds[chan]
                .wait_timeout(queues, deadline - now)
                .expect("txq poisoned");
            queues = guard;
        }
    }

    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::Release);
        for cond in &self.conds {
            cond.notify_all();
        }
    }
}
