//! Bounded priority queue for requests waiting on a worker.
//!
//! Three FIFO tiers (high, normal, low). `pop` always serves the oldest entry
//! of the highest non-empty tier. Capacity is shared across tiers.

use std::collections::VecDeque;
use std::time::Instant;

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::request::Priority;

/// Handle identifying a queued entry, used to withdraw it on timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueTicket(u64);

#[derive(Debug)]
struct Entry<T> {
    ticket: QueueTicket,
    enqueued_at: Instant,
    item: T,
}

#[derive(Debug)]
pub struct PriorityQueue<T> {
    capacity: usize,
    next_ticket: u64,
    // Indexed high, normal, low.
    tiers: [VecDeque<Entry<T>>; 3],
}

fn tier(priority: Priority) -> usize {
    match priority {
        Priority::High => 0,
        Priority::Normal => 1,
        Priority::Low => 2,
    }
}

impl<T> PriorityQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_ticket: 0,
            tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
        }
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.iter().all(VecDeque::is_empty)
    }

    /// Enqueue `item`, failing with `QueueFull` at capacity.
    pub fn push(&mut self, priority: Priority, item: T) -> OrchestratorResult<QueueTicket> {
        if self.len() >= self.capacity {
            return Err(OrchestratorError::QueueFull(self.capacity));
        }
        self.next_ticket += 1;
        let ticket = QueueTicket(self.next_ticket);
        self.tiers[tier(priority)].push_back(Entry {
            ticket,
            enqueued_at: Instant::now(),
            item,
        });
        Ok(ticket)
    }

    /// The entry `pop` would return next.
    pub fn peek(&self) -> Option<&T> {
        self.tiers.iter().find_map(|t| t.front()).map(|e| &e.item)
    }

    pub fn pop(&mut self) -> Option<T> {
        self.tiers
            .iter_mut()
            .find(|t| !t.is_empty())
            .and_then(VecDeque::pop_front)
            .map(|e| e.item)
    }

    /// Withdraw a specific entry. Returns `None` if it was already served.
    pub fn remove(&mut self, ticket: QueueTicket) -> Option<T> {
        for t in self.tiers.iter_mut() {
            if let Some(pos) = t.iter().position(|e| e.ticket == ticket) {
                return t.remove(pos).map(|e| e.item);
            }
        }
        None
    }

    /// How long the oldest waiting entry has been queued.
    pub fn oldest_wait_ms(&self) -> Option<u64> {
        self.tiers
            .iter()
            .filter_map(|t| t.front())
            .map(|e| e.enqueued_at.elapsed().as_millis() as u64)
            .max()
    }

    /// Remove every entry, highest priority first.
    pub fn drain(&mut self) -> Vec<T> {
        self.tiers
            .iter_mut()
            .flat_map(|t| t.drain(..).map(|e| e.item))
            .collect()
    }
}
