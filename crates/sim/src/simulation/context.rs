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

use ethers::types::Address;
use opvet_types::{EntityKind, Violation};

/// Signalled by [`ValidationContext::record_violation`] when the context is
/// in throw mode: the first violation halts the current phase.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ViolationAbort {
    /// The recorded violation's message
    pub message: String,
}

/// Mutable record of one simulation run.
///
/// Owned by the driver for the life of a single simulation and lent to the
/// step inspector per phase. The entity changes only at phase boundaries
/// and the violation list only grows.
#[derive(Debug)]
pub struct ValidationContext {
    entity: EntityKind,
    sender: Address,
    entry_point: Address,
    factory: Option<Address>,
    paymaster: Option<Address>,
    violations: Vec<Violation>,
    throw_on_violation: bool,
}

impl ValidationContext {
    /// A context for one simulation of the given participants. The active
    /// entity starts at `Sender`.
    pub fn new(
        sender: Address,
        entry_point: Address,
        factory: Option<Address>,
        paymaster: Option<Address>,
        throw_on_violation: bool,
    ) -> Self {
        Self {
            entity: EntityKind::Sender,
            sender,
            entry_point,
            factory,
            paymaster,
            violations: Vec::new(),
            throw_on_violation,
        }
    }

    /// The entity whose phase is currently executing
    pub fn entity(&self) -> EntityKind {
        self.entity
    }

    /// The operation's sender
    pub fn sender(&self) -> Address {
        self.sender
    }

    /// The entry point the phases are called from
    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// The declared factory, if any
    pub fn factory(&self) -> Option<Address> {
        self.factory
    }

    /// The declared paymaster, if any
    pub fn paymaster(&self) -> Option<Address> {
        self.paymaster
    }

    /// Whether the first violation halts the current phase
    pub fn throws_on_violation(&self) -> bool {
        self.throw_on_violation
    }

    /// Move to the next phase's entity. Only the driver calls this, at
    /// phase boundaries.
    pub fn set_entity(&mut self, entity: EntityKind) {
        debug_assert!(
            entity != EntityKind::Factory || self.factory.is_some(),
            "factory phase without a declared factory"
        );
        debug_assert!(
            entity != EntityKind::Paymaster || self.paymaster.is_some(),
            "paymaster phase without a declared paymaster"
        );
        self.entity = entity;
    }

    /// Append a violation. In throw mode the violation is still recorded
    /// and the abort signal carries its message.
    pub fn record_violation(&mut self, violation: Violation) -> Result<(), ViolationAbort> {
        let message = violation.to_string();
        self.violations.push(violation);
        if self.throw_on_violation {
            return Err(ViolationAbort { message });
        }
        Ok(())
    }

    /// The violations recorded so far, in emission order
    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Consume the context, yielding its violations
    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}
