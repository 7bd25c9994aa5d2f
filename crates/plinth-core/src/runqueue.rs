//! Per-CPU run-queue
//!
//! An ordered sequence of descriptors eligible to run on one CPU.
//! Insertion order matters: round-robin fairness comes from enqueueing
//! at the tail and scanning from the head. A descriptor appears on at
//! most one run-queue at a time; the descriptor's queued flag is
//! maintained here, always under the owning CPU's lock.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::domain::DomainDescriptor;
use crate::types::DomainId;

/// Ordered run-queue of descriptors.
pub struct RunQueue {
    queue: VecDeque<Arc<DomainDescriptor>>,
}

impl RunQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Append at the tail. Returns false (and does nothing) if the
    /// descriptor is already queued.
    pub fn enqueue(&mut self, d: &Arc<DomainDescriptor>) -> bool {
        if d.is_queued() {
            return false;
        }
        d.set_queued(true);
        self.queue.push_back(d.clone());
        true
    }

    /// Remove a descriptor wherever it sits.
    pub fn dequeue(&mut self, d: &Arc<DomainDescriptor>) -> bool {
        if let Some(pos) = self.queue.iter().position(|q| Arc::ptr_eq(q, d)) {
            let _ = self.queue.remove(pos);
            d.set_queued(false);
            true
        } else {
            false
        }
    }

    /// Move a queued descriptor to the tail (quantum rotation).
    pub fn move_to_tail(&mut self, d: &Arc<DomainDescriptor>) {
        if let Some(pos) = self.queue.iter().position(|q| Arc::ptr_eq(q, d)) {
            if let Some(entry) = self.queue.remove(pos) {
                self.queue.push_back(entry);
            }
        }
    }

    /// Scan from the head, preferring the first non-idle entry; the idle
    /// sentinel is returned only when nothing else is queued.
    pub fn pick(&self) -> Option<Arc<DomainDescriptor>> {
        let mut fallback = None;
        for d in &self.queue {
            if d.id != DomainId::IDLE {
                return Some(d.clone());
            }
            if fallback.is_none() {
                fallback = Some(d.clone());
            }
        }
        fallback
    }

    /// Queued descriptor count.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Identifiers currently queued, head first.
    pub fn ids(&self) -> Vec<DomainId> {
        self.queue.iter().map(|d| d.id).collect()
    }
}

impl Default for RunQueue {
    fn default() -> Self {
        Self::new()
    }
}
