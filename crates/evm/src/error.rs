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

use ethers::types::Bytes;

/// Execution failure of an EVM call.
///
/// These are execution errors, not validation-rule violations: the
/// simulation driver records their messages and moves on to the next phase.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum EvmError {
    /// Execution hit a `REVERT`, carrying its returndata
    #[error("execution reverted")]
    Reverted(Bytes),
    /// The call's gas limit was exhausted
    #[error("out of gas")]
    OutOfGas,
    /// An instruction required more stack items than were present
    #[error("stack underflow")]
    StackUnderflow,
    /// The stack grew past its 1024-item limit
    #[error("stack overflow")]
    StackOverflow,
    /// `JUMP`/`JUMPI` targeted a position that is not a `JUMPDEST`
    #[error("invalid jump destination {0}")]
    InvalidJump(u64),
    /// An unassigned or `INVALID` opcode was executed
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    /// A memory access went past the interpreter's memory cap
    #[error("memory limit exceeded")]
    MemoryLimit,
    /// A state-modifying instruction ran inside a `STATICCALL`
    #[error("state modification in static call")]
    StaticViolation,
    /// An attached step hook aborted the call
    #[error("aborted by validation hook: {0}")]
    Aborted(String),
}
