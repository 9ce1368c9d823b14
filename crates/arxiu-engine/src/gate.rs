//! Per-owner admission gate for the import worker.

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arxiu_core::{import::JobId, user::UserId};

#[derive(Debug, Default)]
struct Slots {
  per_owner: HashMap<UserId, usize>,
  busy:      HashSet<JobId>,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Gate {
  slots: Arc<Mutex<Slots>>,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
  slots.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Gate {
  /// Claim a slot for `job`. `None` when the job is already running or the
  /// owner is at `limit`.
  pub fn try_acquire(&self, owner: UserId, job: JobId, limit: usize) -> Option<GateGuard> {
    let mut slots = lock(&self.slots);
    let active = slots.per_owner.get(&owner).copied().unwrap_or(0);
    if active >= limit.max(1) || slots.busy.contains(&job) {
      return None;
    }
    slots.per_owner.insert(owner, active + 1);
    slots.busy.insert(job);
    Some(GateGuard { slots: self.slots.clone(), owner, job })
  }

  pub fn active(&self, owner: UserId) -> usize {
    lock(&self.slots).per_owner.get(&owner).copied().unwrap_or(0)
  }
}

/// Releases its slot when dropped.
#[derive(Debug)]
pub(crate) struct GateGuard {
  slots: Arc<Mutex<Slots>>,
  owner: UserId,
  job:   JobId,
}

impl Drop for GateGuard {
  fn drop(&mut self) {
    let mut slots = lock(&self.slots);
    slots.busy.remove(&self.job);
    if let Some(n) = slots.per_owner.get_mut(&self.owner) {
      *n = n.saturating_sub(1);
      if *n == 0 {
        slots.per_owner.remove(&self.owner);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn owner_limit_and_release() {
    let gate = Gate::default();
    let first = gate.try_acquire(1, 10, 1).unwrap();
    assert!(gate.try_acquire(1, 11, 1).is_none());
    assert!(gate.try_acquire(2, 12, 1).is_some());
    assert_eq!(gate.active(1), 1);
    drop(first);
    assert_eq!(gate.active(1), 0);
    assert!(gate.try_acquire(1, 11, 1).is_some());
  }

  #[test]
  fn same_job_is_never_admitted_twice() {
    let gate = Gate::default();
    let _held = gate.try_acquire(1, 10, 5).unwrap();
    assert!(gate.try_acquire(1, 10, 5).is_none());
  }

  #[test]
  fn guard_released_on_panic() {
    let gate = Gate::default();
    let clone = gate.clone();
    let result = std::thread::spawn(move || {
      let _guard = clone.try_acquire(7, 1, 1).unwrap();
      panic!("job blew up");
    })
    .join();
    assert!(result.is_err());
    assert_eq!(gate.active(7), 0);
  }
}
