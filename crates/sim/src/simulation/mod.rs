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

//! Validation-phase simulation: the context, the per-step rule inspector,
//! the storage rule engine and the phased driver.

mod context;
pub use context::{ValidationContext, ViolationAbort};

mod inspector;
pub use inspector::ValidationInspector;

mod rules;
pub use rules::{get_storage_restriction, StorageRestriction, StorageRuleArgs};

mod simulator;
pub use simulator::{Settings, SimulationResult, Simulator};
