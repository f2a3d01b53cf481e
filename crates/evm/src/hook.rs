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

use crate::Stack;

/// A view of one instruction about to execute, delivered to a [`StepSink`].
///
/// The stack is readable and ordered bottom-first; its top is the last
/// element, so the operands of the pending instruction sit at
/// `stack.peek(0)`, `stack.peek(1)`, ...
#[derive(Debug)]
pub struct StepView<'a> {
    /// The opcode byte about to execute
    pub opcode: u8,
    /// Program counter of the instruction
    pub pc: u64,
    /// The frame's stack, before the instruction executes
    pub stack: &'a Stack,
    /// The account whose storage the frame addresses (the natural target
    /// of `SLOAD`/`SSTORE`)
    pub address: Address,
    /// The account whose code is executing (differs from `address` inside
    /// a `DELEGATECALL`)
    pub code_address: Address,
    /// Call depth of the frame, zero at the top level
    pub depth: u32,
}

/// Returned by a [`StepSink`] to abort the current call.
///
/// The interpreter surfaces an abort as [`crate::EvmError::Aborted`] with
/// this message, halting the call without executing the flagged
/// instruction.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct StepAbort {
    /// Why the hook aborted execution
    pub message: String,
}

impl StepAbort {
    /// Build an abort carrying `message`
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A per-instruction hook on the interpreter's event stream.
///
/// Attach one with [`crate::Evm::hook`]; the returned guard is the cleanup
/// handle. The sink stays attached for every frame of every call made
/// through the guard, including sub-calls, and detaches when the guard is
/// dropped.
pub trait StepSink {
    /// Called before each instruction executes
    fn on_step(&mut self, step: &StepView<'_>) -> Result<(), StepAbort>;
}
