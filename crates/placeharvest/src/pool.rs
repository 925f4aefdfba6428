//! Identity pool: proxy/session identities and the in-flight ceiling.
//!
//! Every extraction attempt runs inside a [`Slot`]. A slot holds one
//! semaphore permit (so at most `ceiling` attempts are in flight) and one
//! identity checked out exclusively. When the slot is released the caller
//! reports a [`Verdict`]; identities that hit their usage or error ceiling,
//! or that were challenged even once, are retired and never handed out
//! again.

use crate::error::{HarvestError, HarvestResult};
use crate::stealth::Fingerprint;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Opaque identity handle, unique within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(u64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id-{}", self.0)
    }
}

/// A proxy endpoint paired with a browser fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub proxy: Option<String>,
    pub fingerprint: Fingerprint,
}

/// How an attempt went, from the identity's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Ok,
    Transient,
    Challenged,
}

/// Ceilings that bound the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Maximum simultaneous checked-out identities.
    pub ceiling: usize,
    /// Attempts an identity may serve before it is retired.
    pub max_uses: u32,
    /// Transient failures an identity may accumulate before it is retired.
    pub max_errors: u32,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub minted: u64,
    pub retired: u64,
    pub challenged: u64,
}

/// An admitted attempt. Dropping it without [`IdentityPool::release`] frees
/// the permit but leaves the identity checked out.
#[derive(Debug)]
pub struct Slot {
    identity: Arc<Identity>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn id(&self) -> IdentityId {
        self.identity.id
    }
}

struct Entry {
    identity: Arc<Identity>,
    uses: u32,
    errors: u32,
    busy: bool,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<Entry>,
    next_id: u64,
    next_proxy: usize,
    stats: PoolStats,
}

pub struct IdentityPool {
    permits: Arc<Semaphore>,
    state: Mutex<PoolState>,
    proxies: Vec<String>,
    locale: Option<String>,
    limits: PoolLimits,
}

impl IdentityPool {
    pub fn new(limits: PoolLimits, proxies: Vec<String>, locale: Option<String>) -> Self {
        let ceiling = limits.ceiling.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            state: Mutex::new(PoolState::default()),
            proxies,
            locale,
            limits: PoolLimits { ceiling, ..limits },
        }
    }

    /// Wait for capacity, then check out an identity not listed in `avoid`.
    ///
    /// Reuses an idle identity when one qualifies, otherwise mints a new one
    /// with the next proxy in rotation and a fresh fingerprint.
    pub async fn acquire(&self, avoid: &[IdentityId]) -> HarvestResult<Slot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| HarvestError::PoolClosed)?;

        let mut state = self.lock();
        let reusable = state
            .entries
            .iter_mut()
            .find(|e| !e.busy && !avoid.contains(&e.identity.id));
        let identity = match reusable {
            Some(entry) => {
                entry.busy = true;
                Arc::clone(&entry.identity)
            }
            None => {
                let identity = Arc::new(self.mint(&mut state));
                state.entries.push(Entry {
                    identity: Arc::clone(&identity),
                    uses: 0,
                    errors: 0,
                    busy: true,
                });
                identity
            }
        };
        drop(state);

        tracing::trace!(identity = %identity.id, "identity checked out");
        Ok(Slot {
            identity,
            _permit: permit,
        })
    }

    /// Return a slot. Yields the identity id when it was retired, so the
    /// caller can drop any transport state bound to it.
    pub fn release(&self, slot: Slot, verdict: Verdict) -> Option<IdentityId> {
        let id = slot.id();
        let mut state = self.lock();
        let pos = state.entries.iter().position(|e| e.identity.id == id)?;

        let limits = self.limits;
        let entry = &mut state.entries[pos];
        entry.busy = false;
        entry.uses += 1;
        if verdict == Verdict::Transient {
            entry.errors += 1;
        }
        let retire = verdict == Verdict::Challenged
            || entry.uses >= limits.max_uses
            || entry.errors >= limits.max_errors;
        let (uses, errors) = (entry.uses, entry.errors);

        if verdict == Verdict::Challenged {
            state.stats.challenged += 1;
        }
        if !retire {
            return None;
        }
        state.entries.swap_remove(pos);
        state.stats.retired += 1;
        drop(state);

        tracing::debug!(identity = %id, ?verdict, uses, errors, "identity retired");
        Some(id)
    }

    /// Attempts currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.limits.ceiling - self.permits.available_permits()
    }

    pub fn stats(&self) -> PoolStats {
        self.lock().stats
    }

    /// Fail all pending and future acquisitions.
    pub fn close(&self) {
        self.permits.close();
    }

    fn mint(&self, state: &mut PoolState) -> Identity {
        state.next_id += 1;
        state.stats.minted += 1;
        let proxy = if self.proxies.is_empty() {
            None
        } else {
            let proxy = self.proxies[state.next_proxy % self.proxies.len()].clone();
            state.next_proxy = state.next_proxy.wrapping_add(1);
            Some(proxy)
        };
        let identity = Identity {
            id: IdentityId(state.next_id),
            proxy,
            fingerprint: Fingerprint::random(self.locale.as_deref()),
        };
        tracing::debug!(
            identity = %identity.id,
            proxy = identity.proxy.as_deref().unwrap_or("direct"),
            "identity minted"
        );
        identity
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
