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
//! Admission checks for ERC-4337 user operations.
//!
//! Includes implementations for:
//!
//! - Structural validation of loosely typed operation records
//! - The pre-verification gas floor
//! - Validation-phase simulation with EIP-7562 opcode, creation and
//!   storage rules
//! - Reputation tracking for factories and paymasters

pub mod gas;
pub use gas::{calc_pre_verification_gas, GasOverheads};

mod precheck;
pub use precheck::{check_user_op_structure, parse_user_op, StructureCheck};

mod reputation;
pub use reputation::{InMemoryReputation, ReputationParams, ReputationTracker};

pub mod simulation;
pub use simulation::{
    Settings as SimulationSettings, SimulationResult, Simulator, ValidationContext,
    ValidationInspector,
};
