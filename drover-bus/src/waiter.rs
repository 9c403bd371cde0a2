//! One-shot rendezvous slots joining command acks to parked callers.
//!
//! A slot is created when a command enters the bus (or lazily when a caller
//! starts waiting) and consumed by the first fulfillment. The slot outlives
//! a waiter's deadline so a late ack still finds somewhere to land; the
//! sweeper evicts slots that outlive their TTL.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use drover_core::{CommandId, CommandResult};
use std::time::Duration;
use tokio::sync::oneshot;

/// Result of reserving a slot at enqueue time.
#[derive(Debug)]
pub enum PrepareOutcome {
    /// A fresh slot was created.
    Prepared,
    /// A slot for this command already exists.
    Existing,
    /// The in-flight ceiling is reached; nothing was reserved.
    Full {
        /// Slots currently held.
        count: usize,
        /// Configured ceiling.
        max: usize,
    },
}

/// Result of attaching a waiter to a slot.
pub enum RegisterOutcome {
    /// The caller now holds the one receiving end for this command.
    Registered(ResultWaiter),
    /// Another caller already holds the receiving end.
    DuplicateWaiter,
    /// The in-flight ceiling is reached; no slot was created.
    RegistryFull {
        /// Slots currently held.
        count: usize,
        /// Configured ceiling.
        max: usize,
    },
}

/// The receiving half of a rendezvous slot.
pub struct ResultWaiter {
    command_id: CommandId,
    receiver: oneshot::Receiver<CommandResult>,
}

impl ResultWaiter {
    /// The command this waiter is parked on.
    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    /// Park until the slot is fulfilled.
    ///
    /// Returns `None` if the slot was evicted or discarded before any
    /// fulfillment arrived.
    pub async fn wait(self) -> Option<CommandResult> {
        self.receiver.await.ok()
    }
}

struct WaiterSlot {
    sender: Option<oneshot::Sender<CommandResult>>,
    receiver: Option<oneshot::Receiver<CommandResult>>,
    created_at: DateTime<Utc>,
}

impl WaiterSlot {
    fn new_parked() -> (Self, oneshot::Receiver<CommandResult>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                sender: Some(sender),
                receiver: None,
                created_at: Utc::now(),
            },
            receiver,
        )
    }

    fn new_prepared() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
            created_at: Utc::now(),
        }
    }
}

/// Rendezvous slots keyed by command id, bounded by the in-flight ceiling.
///
/// The ceiling is checked against [`DashMap::len`], which is approximate
/// under concurrent mutation; the bound is a backpressure valve, not an
/// exact admission count.
pub struct WaiterRegistry {
    slots: DashMap<CommandId, WaiterSlot>,
    max_inflight: usize,
}

impl WaiterRegistry {
    /// Create a registry holding at most `max_inflight` slots.
    pub fn new(max_inflight: usize) -> Self {
        Self {
            slots: DashMap::new(),
            max_inflight,
        }
    }

    /// Slots currently held.
    pub fn count(&self) -> usize {
        self.slots.len()
    }

    /// Reserve a slot for a command entering the bus.
    ///
    /// The receiving end stays inside the slot until a caller claims it via
    /// [`WaiterRegistry::register`].
    pub fn prepare(&self, command_id: CommandId) -> PrepareOutcome {
        if self.slots.contains_key(&command_id) {
            return PrepareOutcome::Existing;
        }
        let count = self.slots.len();
        if count >= self.max_inflight {
            return PrepareOutcome::Full {
                count,
                max: self.max_inflight,
            };
        }
        match self.slots.entry(command_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => PrepareOutcome::Existing,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(WaiterSlot::new_prepared());
                PrepareOutcome::Prepared
            }
        }
    }

    /// Claim the receiving end of a command's slot, creating the slot if the
    /// command was never prepared.
    ///
    /// Each slot hands out its receiver exactly once; a second caller gets
    /// [`RegisterOutcome::DuplicateWaiter`].
    pub fn register(&self, command_id: CommandId) -> RegisterOutcome {
        if let Some(mut slot) = self.slots.get_mut(&command_id) {
            return match slot.receiver.take() {
                Some(receiver) => RegisterOutcome::Registered(ResultWaiter {
                    command_id,
                    receiver,
                }),
                None => RegisterOutcome::DuplicateWaiter,
            };
        }
        let count = self.slots.len();
        if count >= self.max_inflight {
            return RegisterOutcome::RegistryFull {
                count,
                max: self.max_inflight,
            };
        }
        match self.slots.entry(command_id) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                match entry.get_mut().receiver.take() {
                    Some(receiver) => RegisterOutcome::Registered(ResultWaiter {
                        command_id,
                        receiver,
                    }),
                    None => RegisterOutcome::DuplicateWaiter,
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let (slot, receiver) = WaiterSlot::new_parked();
                entry.insert(slot);
                RegisterOutcome::Registered(ResultWaiter {
                    command_id,
                    receiver,
                })
            }
        }
    }

    /// Consume a command's slot, delivering `result` to its waiter if one is
    /// parked. Returns whether a slot existed.
    ///
    /// A waiter that already gave up is not an error; the send just lands
    /// nowhere.
    pub fn fulfill(&self, command_id: CommandId, result: CommandResult) -> bool {
        let Some((_, slot)) = self.slots.remove(&command_id) else {
            return false;
        };
        if let Some(sender) = slot.sender {
            let _ = sender.send(result);
        }
        true
    }

    /// Drop a command's slot without fulfilling it.
    pub fn discard(&self, command_id: CommandId) -> bool {
        self.slots.remove(&command_id).is_some()
    }

    /// Evict slots older than `ttl`. Returns the number evicted.
    ///
    /// A parked waiter whose slot is evicted observes a closed channel and
    /// falls back to the status table.
    pub fn sweep_stale(&self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let stale: Vec<CommandId> = self
            .slots
            .iter()
            .filter(|entry| now - entry.created_at >= ttl)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for command_id in stale {
            if self.slots.remove(&command_id).is_some() {
                tracing::warn!(command_id = %command_id, "Evicting stale waiter slot");
                evicted += 1;
            }
        }
        evicted
    }
}
