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

use ethers::types::{Address, H256};
use parse_display::Display;
use serde::Serialize;

use crate::{opcode::OpcodeId, EntityKind};

/// An EIP-7562 rule violation observed while simulating the validation
/// phase.
///
/// Violations are distinct from execution errors: a revert or out-of-gas is
/// an error, while a violation is a break of the mempool admission rules.
/// The reputation logic depends on that distinction.
#[derive(Display, Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Violation {
    /// An opcode from the banned set was executed during validation
    #[display("{entity} used banned opcode {opcode} during validation (pc {pc})")]
    #[serde(rename_all = "camelCase")]
    BannedOpcode {
        /// The entity whose phase executed the opcode
        entity: EntityKind,
        /// The offending opcode
        opcode: OpcodeId,
        /// Program counter of the offending instruction
        pc: u64,
    },
    /// A storage slot outside the entity's allowance was read or written
    #[display(
        "{entity} accessed forbidden storage of {storage_owner:?} at slot {slot:?} (pc {pc})"
    )]
    #[serde(rename_all = "camelCase")]
    IllegalStorageAccess {
        /// The entity whose phase performed the access
        entity: EntityKind,
        /// The account whose storage was touched
        storage_owner: Address,
        /// The 32-byte slot that was touched
        slot: H256,
        /// Program counter of the offending instruction
        pc: u64,
    },
    /// An operation reserved for another entity was attempted
    #[display("{entity} used {opcode}: account creation is only permitted for the factory (pc {pc})")]
    #[serde(rename_all = "camelCase")]
    EntityRestriction {
        /// The entity whose phase attempted the operation
        entity: EntityKind,
        /// The restricted opcode
        opcode: OpcodeId,
        /// Program counter of the offending instruction
        pc: u64,
    },
}

/// The tag of a [`Violation`], for callers that dispatch without caring
/// about the per-variant payload.
#[derive(Display, Debug, Clone, Copy, Eq, PartialEq, Serialize)]
#[display(style = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum ViolationKind {
    /// See [`Violation::BannedOpcode`]
    BannedOpcode,
    /// See [`Violation::IllegalStorageAccess`]
    IllegalStorageAccess,
    /// See [`Violation::EntityRestriction`]
    EntityRestriction,
}

impl Violation {
    /// The violation tag
    pub fn kind(&self) -> ViolationKind {
        match self {
            Violation::BannedOpcode { .. } => ViolationKind::BannedOpcode,
            Violation::IllegalStorageAccess { .. } => ViolationKind::IllegalStorageAccess,
            Violation::EntityRestriction { .. } => ViolationKind::EntityRestriction,
        }
    }

    /// The entity that was active when the violation was recorded
    pub fn entity(&self) -> EntityKind {
        match self {
            Violation::BannedOpcode { entity, .. }
            | Violation::IllegalStorageAccess { entity, .. }
            | Violation::EntityRestriction { entity, .. } => *entity,
        }
    }

    /// Program counter of the offending instruction
    pub fn pc(&self) -> u64 {
        match self {
            Violation::BannedOpcode { pc, .. }
            | Violation::IllegalStorageAccess { pc, .. }
            | Violation::EntityRestriction { pc, .. } => *pc,
        }
    }

    /// The accessed storage owner and slot, for storage violations
    pub fn storage_target(&self) -> Option<(Address, H256)> {
        match self {
            Violation::IllegalStorageAccess {
                storage_owner,
                slot,
                ..
            } => Some((*storage_owner, *slot)),
            _ => None,
        }
    }
}
