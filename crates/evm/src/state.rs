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

use std::{collections::HashMap, fmt};

use ethers::types::{Address, Bytes, H256, U256};

/// A read-through source for state the manager has not materialized yet,
/// e.g. a fork of a live chain. Queries are made at most once per
/// address/slot; results are cached in the manager.
pub trait StateSource: Send + Sync {
    /// The deployed code at `address`, if the source knows the account
    fn code(&self, address: Address) -> Option<Bytes>;

    /// The storage value at `address`/`slot`, if the source knows it
    fn storage(&self, address: Address, slot: H256) -> Option<H256>;
}

/// One account's materialized state
#[derive(Clone, Debug, Default)]
pub struct Account {
    /// Deployed runtime code
    pub code: Bytes,
    /// Storage slots that have been read or written
    pub storage: HashMap<H256, H256>,
    /// Account balance
    pub balance: U256,
    /// Creation nonce, used to derive `CREATE` addresses
    pub nonce: u64,
}

/// Accounts, code and storage backing the embedded EVM.
///
/// State is shared across simulations: deployments made by one call are
/// visible to the next.
#[derive(Default)]
pub struct StateManager {
    accounts: HashMap<Address, Account>,
    source: Option<Box<dyn StateSource>>,
}

impl StateManager {
    /// An empty state with no backing source
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty state that falls back to `source` for unknown accounts
    pub fn with_source(source: Box<dyn StateSource>) -> Self {
        Self {
            accounts: HashMap::new(),
            source: Some(source),
        }
    }

    /// Install runtime code at `address`
    pub fn put_code(&mut self, address: Address, code: Bytes) {
        self.accounts.entry(address).or_default().code = code;
    }

    /// The runtime code at `address` (empty for unknown accounts)
    pub fn get_code(&mut self, address: Address) -> Bytes {
        if let Some(account) = self.accounts.get(&address) {
            return account.code.clone();
        }
        let code = self
            .source
            .as_ref()
            .and_then(|source| source.code(address))
            .unwrap_or_default();
        self.accounts.entry(address).or_default().code = code.clone();
        code
    }

    /// Read a storage slot (zero for untouched slots)
    pub fn storage_load(&mut self, address: Address, slot: H256) -> H256 {
        if let Some(value) = self
            .accounts
            .get(&address)
            .and_then(|account| account.storage.get(&slot))
        {
            return *value;
        }
        let value = self
            .source
            .as_ref()
            .and_then(|source| source.storage(address, slot))
            .unwrap_or_default();
        self.accounts
            .entry(address)
            .or_default()
            .storage
            .insert(slot, value);
        value
    }

    /// Write a storage slot
    pub fn storage_store(&mut self, address: Address, slot: H256, value: H256) {
        self.accounts
            .entry(address)
            .or_default()
            .storage
            .insert(slot, value);
    }

    /// Set an account balance
    pub fn put_balance(&mut self, address: Address, balance: U256) {
        self.accounts.entry(address).or_default().balance = balance;
    }

    /// Read an account balance
    pub fn balance(&self, address: Address) -> U256 {
        self.accounts
            .get(&address)
            .map(|account| account.balance)
            .unwrap_or_default()
    }

    /// Move `value` from `from` to `to`; false if `from` cannot cover it
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> bool {
        if value.is_zero() {
            return true;
        }
        let from_balance = self.balance(from);
        if from_balance < value {
            return false;
        }
        self.accounts.entry(from).or_default().balance = from_balance - value;
        let to_balance = self.balance(to);
        self.accounts.entry(to).or_default().balance = to_balance + value;
        true
    }

    /// Return the account's creation nonce and increment it
    pub fn take_nonce(&mut self, address: Address) -> u64 {
        let account = self.accounts.entry(address).or_default();
        let nonce = account.nonce;
        account.nonce += 1;
        nonce
    }

    /// The materialized account at `address`, if any
    pub fn account(&self, address: Address) -> Option<&Account> {
        self.accounts.get(&address)
    }
}

impl fmt::Debug for StateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateManager")
            .field("accounts", &self.accounts.len())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}
