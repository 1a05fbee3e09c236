//! Bounded product buffers with two-phase admission control.
//!
//! A [`Queue`] holds product handles in arrival order. Capacity counts both
//! stored items and outstanding reservations (`pending_put`), so a router
//! can claim a slot long before the transport that fills it arrives:
//!
//! ```text
//! items.len() + pending_put <= capacity      (capacity 0 = unbounded)
//! ```
//!
//! The queue never talks to the scheduler. Operations that complete a
//! blocked put or get collect the waiter's signal into a ready list which
//! the engine drains with [`Queue::take_ready`] and triggers.

use std::collections::VecDeque;

use crate::id::{ProductId, QueueId, SignalId};

/// Predicate selecting which item a pending get accepts.
pub type ItemFilter = Box<dyn Fn(ProductId) -> bool>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue {queue:?} is full ({len} items, {pending_put} reserved, capacity {capacity})")]
    QueueFull {
        queue: QueueId,
        len: usize,
        pending_put: usize,
        capacity: usize,
    },
    #[error("queue {queue:?} released a reservation it never granted")]
    UnbalancedReservation { queue: QueueId },
}

struct PendingGet {
    filter: ItemFilter,
    signal: SignalId,
}

impl std::fmt::Debug for PendingGet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGet")
            .field("filter", &"<fn>")
            .field("signal", &self.signal)
            .finish()
    }
}

/// A bounded, filterable buffer of products.
#[derive(Debug)]
pub struct Queue {
    pub id: QueueId,
    pub name: String,
    capacity: usize,
    items: VecDeque<ProductId>,
    pending_put: usize,
    blocked_puts: VecDeque<(ProductId, SignalId)>,
    pending_gets: VecDeque<PendingGet>,
    /// Items handed to pending gets, waiting for their taker to collect them.
    delivered: Vec<(SignalId, ProductId)>,
    ready: Vec<SignalId>,
}

impl Queue {
    /// A queue with the given capacity; 0 means unbounded.
    pub fn new(id: QueueId, name: impl Into<String>, capacity: usize) -> Self {
        Self {
            id,
            name: name.into(),
            capacity,
            items: VecDeque::new(),
            pending_put: 0,
            blocked_puts: VecDeque::new(),
            pending_gets: VecDeque::new(),
            delivered: Vec::new(),
            ready: Vec::new(),
        }
    }

    /// `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        (self.capacity > 0).then_some(self.capacity)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn pending_put(&self) -> usize {
        self.pending_put
    }

    /// Putters waiting for a free slot.
    pub fn blocked_puts(&self) -> usize {
        self.blocked_puts.len()
    }

    pub fn items(&self) -> impl Iterator<Item = ProductId> + '_ {
        self.items.iter().copied()
    }

    pub fn contains(&self, item: ProductId) -> bool {
        self.items.contains(&item)
    }

    fn has_room(&self) -> bool {
        self.capacity == 0 || self.items.len() + self.pending_put < self.capacity
    }

    /// `capacity - pending_put - len <= 0`. Unbounded queues are never full.
    pub fn is_full(&self) -> bool {
        !self.has_room()
    }

    fn full_error(&self) -> QueueError {
        QueueError::QueueFull {
            queue: self.id,
            len: self.items.len(),
            pending_put: self.pending_put,
            capacity: self.capacity,
        }
    }

    // -----------------------------------------------------------------------
    // Puts
    // -----------------------------------------------------------------------

    /// Append `item` if a slot is free.
    pub fn put(&mut self, item: ProductId) -> Result<(), QueueError> {
        if !self.has_room() {
            return Err(self.full_error());
        }
        self.items.push_back(item);
        self.settle();
        Ok(())
    }

    /// Park a put until a slot frees up. `signal` is made ready once `item`
    /// has been stored. Blocked puts are admitted in registration order.
    pub fn block_put(&mut self, item: ProductId, signal: SignalId) {
        self.blocked_puts.push_back((item, signal));
        self.settle();
    }

    /// Store `item` in a slot claimed earlier with [`Queue::reserve`]. The
    /// reservation is consumed and the item appended in one step.
    pub fn put_reserved(&mut self, item: ProductId) -> Result<(), QueueError> {
        if self.pending_put == 0 {
            return Err(QueueError::UnbalancedReservation { queue: self.id });
        }
        self.pending_put -= 1;
        self.items.push_back(item);
        self.settle();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reservations
    // -----------------------------------------------------------------------

    /// Claim a slot ahead of an arrival. Leaves the queue untouched on
    /// failure.
    pub fn reserve(&mut self) -> Result<(), QueueError> {
        if !self.has_room() {
            return Err(self.full_error());
        }
        self.pending_put += 1;
        Ok(())
    }

    /// Release a claim without storing anything.
    pub fn unreserve(&mut self) -> Result<(), QueueError> {
        if self.pending_put == 0 {
            return Err(QueueError::UnbalancedReservation { queue: self.id });
        }
        self.pending_put -= 1;
        self.settle();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Gets
    // -----------------------------------------------------------------------

    /// Remove and return the first item accepted by `filter`.
    pub fn get(&mut self, filter: impl Fn(ProductId) -> bool) -> Option<ProductId> {
        let index = self.items.iter().position(|i| filter(*i))?;
        let item = self.items.remove(index);
        self.settle();
        item
    }

    /// Park a get until a matching item arrives. Once served, `signal` is
    /// made ready and the item can be collected with [`Queue::take_delivery`].
    pub fn block_get(&mut self, filter: ItemFilter, signal: SignalId) {
        self.pending_gets.push_back(PendingGet { filter, signal });
        self.settle();
    }

    /// Collect the item handed to the get registered with `signal`.
    pub fn take_delivery(&mut self, signal: SignalId) -> Option<ProductId> {
        let index = self.delivered.iter().position(|(s, _)| *s == signal)?;
        Some(self.delivered.swap_remove(index).1)
    }

    /// Signals of waiters completed since the last call.
    pub fn take_ready(&mut self) -> Vec<SignalId> {
        std::mem::take(&mut self.ready)
    }

    /// Serve pending gets and admit blocked puts until neither can progress.
    fn settle(&mut self) {
        loop {
            let mut progressed = false;

            let mut served = None;
            'gets: for (g, get) in self.pending_gets.iter().enumerate() {
                for (i, item) in self.items.iter().enumerate() {
                    if (get.filter)(*item) {
                        served = Some((g, i));
                        break 'gets;
                    }
                }
            }
            if let Some((g, i)) = served
                && let Some(get) = self.pending_gets.remove(g)
                && let Some(item) = self.items.remove(i)
            {
                self.delivered.push((get.signal, item));
                self.ready.push(get.signal);
                progressed = true;
            }

            if self.has_room()
                && let Some((item, signal)) = self.blocked_puts.pop_front()
            {
                self.items.push_back(item);
                self.ready.push(signal);
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }
}
