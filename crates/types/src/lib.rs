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

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
//! Domain types shared by the opvet crates.
//!
//! Includes:
//!
//! - The ERC-4337 v0.7 `PackedUserOperation` wire format and its unpacking
//!   accessors
//! - Validation-phase entities and rule violations
//! - The EIP-7562 opcode classification table
//! - Reputation status and entries for factories and paymasters

mod constants;
pub use constants::{
    ENTRY_POINT_ADDRESS_V0_7, VALIDATE_PAYMASTER_USER_OP_SELECTOR, VALIDATE_USER_OP_SELECTOR,
};

mod entity;
pub use entity::EntityKind;

pub mod opcode;
pub use opcode::{OpcodeClass, OpcodeId};

mod reputation;
pub use reputation::{ReputationEntry, ReputationStatus};

mod user_operation;
pub use user_operation::PackedUserOperation;

mod violation;
pub use violation::{Violation, ViolationKind};
