//! Fixed-capacity slot pool with per-priority reservations.
//!
//! Implements the five-step allocation discipline from spec.md §4.4:
//! consume a caller's own reservation first, fall back to shared
//! (unreserved) capacity, then borrow from a strictly-lower-priority
//! tier's unused reservation, refusing only when none of those apply.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// Scheduling priority. Lower numeric value sorts first / borrows more
/// freely; unrecognized names map to [`Priority::Other(99)`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Priority {
    Urgent,
    High,
    Normal,
    Low,
    Other(u8),
}

impl Priority {
    /// Numeric rank used for borrowing comparisons: lower = higher priority.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Normal => 2,
            Priority::Low => 3,
            Priority::Other(_) => 99,
        }
    }
}

/// Errors from [`SlotPool`] operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("reservation total {requested} exceeds pool capacity {capacity}")]
    ReservationExceedsCapacity { requested: usize, capacity: usize },
    #[error("no slot available for priority {0:?}")]
    NoSlotAvailable(Priority),
}

struct Inner {
    total: usize,
    reserved: HashMap<Priority, usize>,
    allocated: HashMap<Priority, usize>,
    used: usize,
}

/// Defensive-copy snapshot of per-priority allocation counts.
pub type Usage = HashMap<Priority, usize>;

/// A fixed-capacity pool of execution slots with QoS reservations.
pub struct SlotPool {
    inner: Mutex<Inner>,
}

impl SlotPool {
    pub fn new(total: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                total,
                reserved: HashMap::new(),
                allocated: HashMap::new(),
                used: 0,
            }),
        }
    }

    /// Add (or replace) the reservation for `priority`. Fails if the sum of
    /// all reservations, with this one substituted in, would exceed total
    /// capacity.
    pub fn add_reservation(&self, priority: Priority, reserved: usize) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let mut projected: usize = inner
            .reserved
            .iter()
            .filter(|(p, _)| **p != priority)
            .map(|(_, v)| *v)
            .sum();
        projected += reserved;
        if projected > inner.total {
            return Err(PoolError::ReservationExceedsCapacity {
                requested: projected,
                capacity: inner.total,
            });
        }
        inner.reserved.insert(priority, reserved);
        Ok(())
    }

    /// Allocate one slot for `priority`, per the five-step discipline.
    pub fn allocate(&self, priority: Priority) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");

        // Step 1: pool-wide exhaustion.
        if inner.used >= inner.total {
            return Err(PoolError::NoSlotAvailable(priority));
        }

        let own_reserved = inner.reserved.get(&priority).copied().unwrap_or(0);
        let own_allocated = inner.allocated.get(&priority).copied().unwrap_or(0);

        // Step 2: consume the caller's own reservation.
        if own_reserved > 0 && own_allocated < own_reserved {
            *inner.allocated.entry(priority).or_insert(0) += 1;
            inner.used += 1;
            return Ok(());
        }

        // Step 3: shared (unreserved) capacity.
        let total_reserved: usize = inner.reserved.values().sum();
        let charged_to_reservations: usize = inner
            .reserved
            .keys()
            .map(|p| inner.allocated.get(p).copied().unwrap_or(0).min(inner.reserved[p]))
            .sum();
        let shared_capacity = inner.total.saturating_sub(total_reserved);
        let shared_in_use = inner.used.saturating_sub(charged_to_reservations);
        if shared_in_use < shared_capacity {
            *inner.allocated.entry(priority).or_insert(0) += 1;
            inner.used += 1;
            return Ok(());
        }

        // Step 4: borrow from the lowest-priority tier with unused reserved
        // capacity, strictly below the caller's own priority.
        let my_rank = priority.rank();
        let mut donor: Option<(Priority, u8)> = None;
        for (&donor_priority, &donor_reserved) in inner.reserved.iter() {
            let donor_allocated = inner.allocated.get(&donor_priority).copied().unwrap_or(0);
            if donor_allocated >= donor_reserved {
                continue;
            }
            let donor_rank = donor_priority.rank();
            if donor_rank <= my_rank {
                continue; // only borrow from strictly lower-priority tiers
            }
            match donor {
                Some((_, best_rank)) if donor_rank <= best_rank => {}
                _ => donor = Some((donor_priority, donor_rank)),
            }
        }

        if let Some((donor_priority, _)) = donor {
            *inner.allocated.entry(donor_priority).or_insert(0) += 1;
            inner.used += 1;
            return Ok(());
        }

        // Step 5: nothing left.
        Err(PoolError::NoSlotAvailable(priority))
    }

    /// Release one slot previously allocated for `priority`. No-op if the
    /// caller's allocation counter is already zero. Slots borrowed from a
    /// donor tier are never refunded to the donor — release is always
    /// charged against the caller's own counter (spec.md §4.4, §9).
    pub fn release(&self, priority: Priority) {
        let mut inner = self.inner.lock().expect("pool mutex poisoned");
        let entry = inner.allocated.entry(priority).or_insert(0);
        if *entry == 0 {
            return;
        }
        *entry -= 1;
        inner.used = inner.used.saturating_sub(1);
    }

    /// Defensive copy of current per-priority allocation counts.
    pub fn usage(&self) -> Usage {
        let inner = self.inner.lock().expect("pool mutex poisoned");
        inner.allocated.clone()
    }

    pub fn used(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").used
    }

    pub fn total(&self) -> usize {
        self.inner.lock().expect("pool mutex poisoned").total
    }
}
