// This file is part of Opvet.
//
// Opvet is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Opvet is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Opvet.
// If not, see https://www.gnu.org/licenses/.

use std::collections::HashMap;

use ethers::types::Address;
use opvet_types::{ReputationEntry, ReputationStatus};
use parking_lot::RwLock;

/// Thresholds for deriving a status from an address's failure count
#[derive(Debug, Clone, Copy)]
pub struct ReputationParams {
    /// Failures at or above which an address is throttled
    pub throttle_threshold: u64,
    /// Failures at or above which an address is banned
    pub ban_threshold: u64,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            throttle_threshold: 2,
            ban_threshold: 5,
        }
    }
}

/// Per-address reputation for factories and paymasters.
///
/// The store is deterministic: status is a pure function of the failure
/// count, with no wall-clock decay. Updates happen only in the driver's
/// post-phase step, so a simulation never observes reputation changes it
/// caused itself.
#[cfg_attr(test, mockall::automock)]
pub trait ReputationTracker: Send + Sync {
    /// The current status of `address`; unknown addresses are `Ok`
    fn status(&self, address: Address) -> ReputationStatus;

    /// Record one observed operation for `address`, counting a failure
    /// when `successful` is false, and re-derive its status
    fn update(&self, address: Address, successful: bool);

    /// Forget everything about `address`
    fn clear(&self, address: Address);

    /// The stored entry for `address`, if it has been observed
    fn entry(&self, address: Address) -> Option<ReputationEntry>;

    /// All stored entries
    fn dump(&self) -> Vec<ReputationEntry>;
}

/// The default in-memory [`ReputationTracker`], a hash map keyed by
/// address behind a read-write lock.
pub struct InMemoryReputation {
    state: RwLock<ReputationInner>,
}

impl InMemoryReputation {
    /// A store with the given thresholds
    pub fn new(params: ReputationParams) -> Self {
        Self {
            state: RwLock::new(ReputationInner {
                counts: HashMap::new(),
                params,
            }),
        }
    }
}

impl Default for InMemoryReputation {
    fn default() -> Self {
        Self::new(ReputationParams::default())
    }
}

impl ReputationTracker for InMemoryReputation {
    fn status(&self, address: Address) -> ReputationStatus {
        self.state.read().status(address)
    }

    fn update(&self, address: Address, successful: bool) {
        self.state.write().update(address, successful);
    }

    fn clear(&self, address: Address) {
        self.state.write().counts.remove(&address);
    }

    fn entry(&self, address: Address) -> Option<ReputationEntry> {
        self.state.read().entry(address)
    }

    fn dump(&self) -> Vec<ReputationEntry> {
        let state = self.state.read();
        let mut entries: Vec<_> = state
            .counts
            .keys()
            .filter_map(|address| state.entry(*address))
            .collect();
        entries.sort_by_key(|entry| entry.address);
        entries
    }
}

#[derive(Debug)]
struct ReputationInner {
    counts: HashMap<Address, AddressCount>,
    params: ReputationParams,
}

impl ReputationInner {
    fn status(&self, address: Address) -> ReputationStatus {
        self.counts
            .get(&address)
            .map(|count| self.params.status_for(count.ops_failed))
            .unwrap_or(ReputationStatus::Ok)
    }

    fn update(&mut self, address: Address, successful: bool) {
        let count = self.counts.entry(address).or_default();
        count.ops_seen += 1;
        if !successful {
            count.ops_failed += 1;
        }
    }

    fn entry(&self, address: Address) -> Option<ReputationEntry> {
        self.counts.get(&address).map(|count| ReputationEntry {
            address,
            ops_seen: count.ops_seen,
            ops_failed: count.ops_failed,
            status: self.params.status_for(count.ops_failed),
        })
    }
}

impl ReputationParams {
    fn status_for(&self, ops_failed: u64) -> ReputationStatus {
        if ops_failed >= self.ban_threshold {
            ReputationStatus::Banned
        } else if ops_failed >= self.throttle_threshold {
            ReputationStatus::Throttled
        } else {
            ReputationStatus::Ok
        }
    }
}

#[derive(Debug, Default, Clone)]
struct AddressCount {
    ops_seen: u64,
    ops_failed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn unknown_addresses_are_ok() {
        let reputation = InMemoryReputation::default();
        assert_eq!(reputation.status(addr(0x01)), ReputationStatus::Ok);
        assert!(reputation.entry(addr(0x01)).is_none());
    }

    #[test]
    fn failures_walk_through_throttled_to_banned() {
        let reputation = InMemoryReputation::default();
        let address = addr(0x02);

        reputation.update(address, false);
        assert_eq!(reputation.status(address), ReputationStatus::Ok);

        reputation.update(address, false);
        assert_eq!(reputation.status(address), ReputationStatus::Throttled);

        for _ in 0..3 {
            reputation.update(address, false);
        }
        assert_eq!(reputation.status(address), ReputationStatus::Banned);
    }

    #[test]
    fn successes_never_improve_a_ban() {
        let reputation = InMemoryReputation::default();
        let address = addr(0x03);
        for _ in 0..5 {
            reputation.update(address, false);
        }
        for _ in 0..100 {
            reputation.update(address, true);
        }
        // status is a pure function of ops_failed, which never decreases
        assert_eq!(reputation.status(address), ReputationStatus::Banned);
        let entry = reputation.entry(address).unwrap();
        assert_eq!(entry.ops_seen, 105);
        assert_eq!(entry.ops_failed, 5);
    }

    #[test]
    fn counters_are_monotonic() {
        let reputation = InMemoryReputation::default();
        let address = addr(0x04);
        let mut last_seen = 0;
        let mut last_failed = 0;
        for i in 0..20 {
            reputation.update(address, i % 3 == 0);
            let entry = reputation.entry(address).unwrap();
            assert!(entry.ops_seen >= last_seen);
            assert!(entry.ops_failed >= last_failed);
            last_seen = entry.ops_seen;
            last_failed = entry.ops_failed;
        }
    }

    #[test]
    fn clear_removes_the_entry() {
        let reputation = InMemoryReputation::default();
        let address = addr(0x05);
        for _ in 0..5 {
            reputation.update(address, false);
        }
        assert_eq!(reputation.status(address), ReputationStatus::Banned);
        reputation.clear(address);
        assert_eq!(reputation.status(address), ReputationStatus::Ok);
        assert!(reputation.dump().is_empty());
    }

    #[test]
    fn custom_thresholds_apply() {
        let reputation = InMemoryReputation::new(ReputationParams {
            throttle_threshold: 1,
            ban_threshold: 2,
        });
        let address = addr(0x06);
        reputation.update(address, false);
        assert_eq!(reputation.status(address), ReputationStatus::Throttled);
        reputation.update(address, false);
        assert_eq!(reputation.status(address), ReputationStatus::Banned);
    }
}
