//! Bounded FIFO of payloads awaiting a live transport.

use std::collections::VecDeque;
use std::fmt;

/// Why a payload was discarded instead of delivered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Appending the payload would exceed `max_buffer_bytes`.
    BufferFull,
    /// Buffering was switched off after `maximum_attempts` failures.
    BufferingDisabled,
    /// The producer channel to the worker is full.
    QueueFull,
    /// The manager has been closed.
    Closed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::BufferFull => "buffer full",
            DropReason::BufferingDisabled => "buffering disabled",
            DropReason::QueueFull => "queue full",
            DropReason::Closed => "connection closed",
        };
        f.write_str(s)
    }
}

/// Final status delivered to a write's completion callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The transport accepted the whole payload.
    Delivered,
    Dropped(DropReason),
}

/// Callback invoked exactly once per write.
pub type Completion = Box<dyn FnOnce(WriteOutcome) + Send + 'static>;

/// A payload together with its completion callback.
pub struct PendingWrite {
    pub payload: Vec<u8>,
    completion: Completion,
}

impl PendingWrite {
    pub fn new(payload: Vec<u8>, completion: Completion) -> Self {
        Self {
            payload,
            completion,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Consume the write, reporting `outcome` to its owner.
    pub fn complete(self, outcome: WriteOutcome) {
        (self.completion)(outcome);
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite")
            .field("len", &self.payload.len())
            .finish()
    }
}

/// FIFO of [`PendingWrite`]s whose total payload size never exceeds the cap.
#[derive(Debug)]
pub struct OutboundBuffer {
    queue: VecDeque<PendingWrite>,
    bytes: usize,
    max_bytes: usize,
}

impl OutboundBuffer {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    /// Append `write`, handing it back when it would overflow the cap.
    pub fn push_back(&mut self, write: PendingWrite) -> Result<(), PendingWrite> {
        if !self.fits(write.len()) {
            return Err(write);
        }
        self.bytes += write.len();
        self.queue.push_back(write);
        Ok(())
    }

    /// Return a write to the head of the queue after a failed send.
    pub fn push_front(&mut self, write: PendingWrite) -> Result<(), PendingWrite> {
        if !self.fits(write.len()) {
            return Err(write);
        }
        self.bytes += write.len();
        self.queue.push_front(write);
        Ok(())
    }

    pub fn pop_front(&mut self) -> Option<PendingWrite> {
        let write = self.queue.pop_front()?;
        self.bytes -= write.len();
        Some(write)
    }

    /// Remove every queued write in FIFO order.
    pub fn take_all(&mut self) -> impl Iterator<Item = PendingWrite> + '_ {
        self.bytes = 0;
        self.queue.drain(..)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    fn fits(&self, len: usize) -> bool {
        self.bytes
            .checked_add(len)
            .is_some_and(|total| total <= self.max_bytes)
    }
}
