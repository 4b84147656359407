//! Per-pool admission control.
//!
//! Each configured pool owns one [`AdmissionController`]. A claim passes only
//! when neither its destination address nor its client identity holds a live
//! cooldown entry; granting inserts both in the same critical section.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

/// Time source for cooldown bookkeeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Which key of a claim collided with a live entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeniedKey {
    Address,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub kind: DeniedKey,
    pub key: String,
    pub retry_after: Duration,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subject = match self.kind {
            DeniedKey::Address => "address",
            DeniedKey::Client => "client",
        };
        write!(
            f,
            "{} {} is requesting too frequently, try again in {}s",
            subject,
            self.key,
            self.retry_after.as_secs().max(1)
        )
    }
}

#[derive(Debug, Default)]
struct AdmissionState {
    by_address: HashMap<String, Instant>,
    by_client: HashMap<String, Instant>,
}

/// Returns the remaining cooldown of `key`, dropping the entry if it expired.
fn remaining(entries: &mut HashMap<String, Instant>, key: &str, now: Instant) -> Option<Duration> {
    match entries.get(key) {
        Some(expires_at) if *expires_at > now => Some(*expires_at - now),
        Some(_) => {
            entries.remove(key);
            None
        }
        None => None,
    }
}

pub struct AdmissionController {
    interval: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Arc::new(SystemClock))
    }

    pub fn with_clock(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            state: Mutex::new(AdmissionState::default()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_denial(state: &mut AdmissionState, address: &str, client: &str, now: Instant) -> Option<Denial> {
        if let Some(retry_after) = remaining(&mut state.by_address, address, now) {
            return Some(Denial {
                kind: DeniedKey::Address,
                key: address.to_string(),
                retry_after,
            });
        }
        remaining(&mut state.by_client, client, now).map(|retry_after| Denial {
            kind: DeniedKey::Client,
            key: client.to_string(),
            retry_after,
        })
    }

    /// Reports the denial `try_admit` would give right now without starting
    /// any cooldown. Only expired entries are dropped.
    pub fn check(&self, address: &str, client: &str) -> Result<(), Denial> {
        let now = self.clock.now();
        match Self::live_denial(&mut self.lock(), address, client, now) {
            Some(denial) => Err(denial),
            None => Ok(()),
        }
    }

    /// Grants the claim and starts both cooldowns, or denies it without
    /// touching any entry. Check and insert happen under one lock.
    pub fn try_admit(&self, address: &str, client: &str) -> Result<(), Denial> {
        let now = self.clock.now();
        let mut state = self.lock();

        if let Some(denial) = Self::live_denial(&mut state, address, client, now) {
            return Err(denial);
        }

        // An expiry past the clock's range can never be reached; deny instead.
        let Some(expires_at) = now.checked_add(self.interval) else {
            return Err(Denial {
                kind: DeniedKey::Address,
                key: address.to_string(),
                retry_after: self.interval,
            });
        };
        state.by_address.insert(address.to_string(), expires_at);
        state.by_client.insert(client.to_string(), expires_at);
        debug!(address, client, "Admission granted");
        Ok(())
    }

    /// Live expiry of an address entry, if any.
    pub fn address_expiry(&self, address: &str) -> Option<Instant> {
        let now = self.clock.now();
        self.lock().by_address.get(address).copied().filter(|e| *e > now)
    }

    /// Live expiry of a client entry, if any.
    pub fn client_expiry(&self, client: &str) -> Option<Instant> {
        let now = self.clock.now();
        self.lock().by_client.get(client).copied().filter(|e| *e > now)
    }

    /// Drops every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut state = self.lock();
        let before = state.by_address.len() + state.by_client.len();
        state.by_address.retain(|_, expires_at| *expires_at > now);
        state.by_client.retain(|_, expires_at| *expires_at > now);
        before - (state.by_address.len() + state.by_client.len())
    }

    /// Stored entries across both key spaces, expired ones included until swept.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.by_address.len() + state.by_client.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("interval", &self.interval)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: Duration = Duration::from_secs(3600);
    const ALICE: &str = "0x00000000000000000000000000000000000a11ce";
    const BOB: &str = "0x0000000000000000000000000000000000000b0b";

    fn controller(clock: &ManualClock) -> AdmissionController {
        AdmissionController::with_clock(HOUR, Arc::new(clock.clone()))
    }

    #[test]
    fn test_second_claim_for_address_is_denied_regardless_of_client() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        assert!(admission.try_admit(ALICE, "10.0.0.1").is_ok());
        let denial = admission.try_admit(ALICE, "10.0.0.2").unwrap_err();
        assert_eq!(denial.kind, DeniedKey::Address);
        assert_eq!(denial.key, ALICE);
        assert_eq!(denial.retry_after, HOUR);
        assert!(denial.to_string().contains(ALICE));
    }

    #[test]
    fn test_client_cooldown_covers_other_addresses() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        admission.try_admit(ALICE, "10.0.0.1").unwrap();
        let denial = admission.try_admit(BOB, "10.0.0.1").unwrap_err();
        assert_eq!(denial.kind, DeniedKey::Client);
        assert_eq!(denial.key, "10.0.0.1");
    }

    #[test]
    fn test_denial_leaves_no_trace() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        admission.try_admit(ALICE, "10.0.0.1").unwrap();
        let original = admission.address_expiry(ALICE).unwrap();

        clock.advance(Duration::from_secs(600));
        for _ in 0..3 {
            let denial = admission.try_admit(ALICE, "10.0.0.9").unwrap_err();
            assert_eq!(denial.retry_after, Duration::from_secs(3000));
        }

        // The denied client was never recorded and the address was not extended.
        assert!(admission.client_expiry("10.0.0.9").is_none());
        assert_eq!(admission.address_expiry(ALICE), Some(original));
        assert_eq!(admission.len(), 2);
    }

    #[test]
    fn test_expiry_readmits() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        admission.try_admit(ALICE, "10.0.0.1").unwrap();
        clock.advance(HOUR - Duration::from_secs(1));
        assert!(admission.try_admit(ALICE, "10.0.0.1").is_err());

        // Absent once now >= expires_at.
        clock.advance(Duration::from_secs(1));
        assert!(admission.try_admit(ALICE, "10.0.0.1").is_ok());
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        admission.try_admit(ALICE, "10.0.0.1").unwrap();
        clock.advance(Duration::from_secs(1800));
        admission.try_admit(BOB, "10.0.0.2").unwrap();
        assert_eq!(admission.sweep(), 0);

        clock.advance(Duration::from_secs(1800));
        assert_eq!(admission.sweep(), 2);
        assert_eq!(admission.len(), 2);
        assert!(admission.address_expiry(BOB).is_some());
    }

    #[test]
    fn test_concurrent_claims_grant_exactly_once() {
        let admission = AdmissionController::new(HOUR);
        let granted = AtomicUsize::new(0);
        let denied = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for i in 0..32 {
                let admission = &admission;
                let granted = &granted;
                let denied = &denied;
                scope.spawn(move || {
                    match admission.try_admit(ALICE, &format!("10.0.0.{}", i)) {
                        Ok(()) => granted.fetch_add(1, Ordering::SeqCst),
                        Err(_) => denied.fetch_add(1, Ordering::SeqCst),
                    };
                });
            }
        });

        assert_eq!(granted.load(Ordering::SeqCst), 1);
        assert_eq!(denied.load(Ordering::SeqCst), 31);
        assert_eq!(admission.len(), 2);
    }

    #[test]
    fn test_check_starts_no_cooldown() {
        let clock = ManualClock::new();
        let admission = controller(&clock);

        assert!(admission.check(ALICE, "10.0.0.1").is_ok());
        assert!(admission.is_empty());

        admission.try_admit(ALICE, "10.0.0.1").unwrap();
        assert_eq!(admission.check(ALICE, "10.0.0.2").unwrap_err().kind, DeniedKey::Address);
        assert_eq!(admission.check(BOB, "10.0.0.1").unwrap_err().kind, DeniedKey::Client);
        assert!(admission.client_expiry("10.0.0.2").is_none());
        assert_eq!(admission.len(), 2);
    }

    #[test]
    fn test_unrepresentable_expiry_is_denied() {
        let admission = AdmissionController::with_clock(Duration::MAX, Arc::new(ManualClock::new()));
        let denial = admission.try_admit(ALICE, "10.0.0.1").unwrap_err();
        assert_eq!(denial.kind, DeniedKey::Address);
        assert!(admission.is_empty());
    }

    #[test]
    fn test_controllers_are_independent() {
        let clock = ManualClock::new();
        let pool_a = controller(&clock);
        let pool_b = controller(&clock);

        pool_a.try_admit(ALICE, "10.0.0.1").unwrap();
        for i in 0..10 {
            let _ = pool_b.try_admit(ALICE, &format!("10.0.1.{}", i));
        }

        assert!(pool_a.try_admit(ALICE, "10.0.0.1").is_err());
        assert_eq!(pool_a.len(), 2);
        assert!(pool_b.address_expiry(ALICE).is_some());
    }
}
