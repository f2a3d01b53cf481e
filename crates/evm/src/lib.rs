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
//! An embedded EVM interpreter with a per-instruction hook.
//!
//! This is not a consensus-grade EVM. It executes the validation-phase
//! bytecode of user operation entities deterministically against a fixed
//! block environment, and delivers every instruction to an attached
//! [`StepSink`] before it runs. That hook is the seam the validation
//! inspector plugs into.

mod error;
pub use error::EvmError;

mod hook;
pub use hook::{StepAbort, StepSink, StepView};

mod interpreter;
pub use interpreter::{BlockEnv, CallOutcome, CallParams, Evm, HookedEvm};

mod memory;
pub use memory::Memory;

mod stack;
pub use stack::Stack;

mod state;
pub use state::{Account, StateManager, StateSource};
