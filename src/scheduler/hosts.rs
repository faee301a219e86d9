//! Worker hosts and the slot pool that binds invocations to them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Host name that selects local execution.
pub const LOCALHOST: &str = "localhost";

/// A worker host and the number of invocations it may run at once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostSpec {
    pub hostname: String,
    #[serde(alias = "parallel_slots")]
    pub slots: usize,
}

impl HostSpec {
    pub fn new(hostname: impl Into<String>, slots: usize) -> Self {
        Self {
            hostname: hostname.into(),
            slots,
        }
    }

    pub fn localhost(slots: usize) -> Self {
        Self::new(LOCALHOST, slots)
    }

    /// Returns true when invocations run without a remote shell.
    pub fn is_local(&self) -> bool {
        self.hostname == LOCALHOST
    }
}

impl From<(&str, usize)> for HostSpec {
    fn from((hostname, slots): (&str, usize)) -> Self {
        HostSpec::new(hostname, slots)
    }
}

/// Sum of slots across a host pool.
pub fn total_slots(hosts: &[HostSpec]) -> usize {
    hosts.iter().map(|h| h.slots).sum()
}

/// One concrete execution slot on a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSlot {
    pub host: HostSpec,
    pub index: usize,
}

impl fmt::Display for HostSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.host.hostname, self.index)
    }
}

/// The first `limit` slots of `hosts`, taken round-robin across hosts.
///
/// This is the order in which a fresh [`SlotPool`] hands out its slots.
pub fn fill_order(hosts: &[HostSpec], limit: usize) -> Vec<HostSlot> {
    let max_slots = hosts.iter().map(|h| h.slots).max().unwrap_or(0);
    let mut slots = Vec::new();

    'fill: for index in 0..max_slots {
        for host in hosts.iter().filter(|h| index < h.slots) {
            if slots.len() >= limit {
                break 'fill;
            }
            slots.push(HostSlot {
                host: host.clone(),
                index,
            });
        }
    }
    slots
}

/// Bounded pool of host slots for one stage.
///
/// Holds at most `limit` slots, taken round-robin across hosts so that a
/// stage with less parallelism than the pool spreads over every host before
/// stacking on one.
#[derive(Debug, Clone)]
pub struct SlotPool {
    semaphore: Arc<Semaphore>,
    free: Arc<Mutex<VecDeque<HostSlot>>>,
    capacity: usize,
}

impl SlotPool {
    /// An empty pool is closed: every `acquire` returns `None` at once.
    pub fn new(hosts: &[HostSpec], limit: usize) -> Self {
        let free: VecDeque<HostSlot> = fill_order(hosts, limit).into();
        let capacity = free.len();
        let semaphore = Semaphore::new(capacity);
        if capacity == 0 {
            semaphore.close();
        }
        Self {
            semaphore: Arc::new(semaphore),
            free: Arc::new(Mutex::new(free)),
            capacity,
        }
    }

    /// Number of slots this pool can hand out concurrently.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Waits for a free slot. Returns `None` if the pool has no slots.
    pub async fn acquire(&self) -> Option<SlotGuard> {
        let permit = self.semaphore.clone().acquire_owned().await.ok()?;
        let slot = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()?;
        Some(SlotGuard {
            slot,
            free: self.free.clone(),
            _permit: permit,
        })
    }
}

/// A leased slot; returned to the pool on drop.
#[derive(Debug)]
pub struct SlotGuard {
    slot: HostSlot,
    free: Arc<Mutex<VecDeque<HostSlot>>>,
    _permit: OwnedSemaphorePermit,
}

impl SlotGuard {
    pub fn slot(&self) -> &HostSlot {
        &self.slot
    }

    pub fn host(&self) -> &HostSpec {
        &self.slot().host
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(self.slot.clone());
    }
}
