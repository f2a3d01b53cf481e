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

use ethers::types::{H256, U256};
use opvet_evm::{StepAbort, StepSink, StepView};
use opvet_types::{opcode, EntityKind, OpcodeClass, OpcodeId, Violation};

use super::{
    context::ValidationContext,
    rules::{get_storage_restriction, StorageRestriction, StorageRuleArgs},
};

/// The per-instruction rule check, attached to the EVM for the life of one
/// validation phase.
///
/// Borrows the context mutably for the life of the hook guard, so the
/// driver can only change the active entity between phases.
pub struct ValidationInspector<'a> {
    ctx: &'a mut ValidationContext,
}

impl<'a> ValidationInspector<'a> {
    /// An inspector recording into `ctx`
    pub fn new(ctx: &'a mut ValidationContext) -> Self {
        Self { ctx }
    }

    fn record(&mut self, violation: Violation) -> Result<(), StepAbort> {
        self.ctx
            .record_violation(violation)
            .map_err(|abort| StepAbort::new(abort.message))
    }
}

impl StepSink for ValidationInspector<'_> {
    fn on_step(&mut self, step: &StepView<'_>) -> Result<(), StepAbort> {
        let entity = self.ctx.entity();
        match opcode::classify(step.opcode) {
            OpcodeClass::Banned => self.record(Violation::BannedOpcode {
                entity,
                opcode: OpcodeId(step.opcode),
                pc: step.pc,
            })?,
            OpcodeClass::Create => {
                if entity != EntityKind::Factory {
                    self.record(Violation::EntityRestriction {
                        entity,
                        opcode: OpcodeId(step.opcode),
                        pc: step.pc,
                    })?;
                }
            }
            OpcodeClass::Storage => {
                // the slot is the instruction's first operand
                let slot = word_to_slot(step.stack.peek(0).unwrap_or_default());
                let restriction = get_storage_restriction(StorageRuleArgs {
                    entity,
                    storage_owner: step.address,
                    slot,
                    sender: self.ctx.sender(),
                    entry_point: self.ctx.entry_point(),
                    factory: self.ctx.factory(),
                    paymaster: self.ctx.paymaster(),
                });
                if let StorageRestriction::Denied(_) = restriction {
                    self.record(Violation::IllegalStorageAccess {
                        entity,
                        storage_owner: step.address,
                        slot,
                        pc: step.pc,
                    })?;
                }
            }
            OpcodeClass::Neutral => {}
        }
        Ok(())
    }
}

fn word_to_slot(value: U256) -> H256 {
    let mut buf = [0_u8; 32];
    value.to_big_endian(&mut buf);
    H256(buf)
}

#[cfg(test)]
mod tests {
    use ethers::types::Address;
    use opvet_evm::Stack;
    use opvet_types::ViolationKind;

    use super::*;

    fn context() -> ValidationContext {
        ValidationContext::new(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0xee),
            Some(Address::repeat_byte(0x02)),
            Some(Address::repeat_byte(0x03)),
            false,
        )
    }

    fn step<'a>(opcode: u8, stack: &'a Stack, address: Address) -> StepView<'a> {
        StepView {
            opcode,
            pc: 4,
            stack,
            address,
            code_address: address,
            depth: 0,
        }
    }

    #[test]
    fn create_is_allowed_for_the_factory_only() {
        let stack = Stack::default();
        let mut ctx = context();
        ctx.set_entity(EntityKind::Factory);
        {
            let mut inspector = ValidationInspector::new(&mut ctx);
            inspector
                .on_step(&step(0xf0, &stack, Address::repeat_byte(0x02)))
                .unwrap();
        }
        assert!(ctx.violations().is_empty());

        ctx.set_entity(EntityKind::Sender);
        {
            let mut inspector = ValidationInspector::new(&mut ctx);
            inspector
                .on_step(&step(0xf0, &stack, Address::repeat_byte(0x01)))
                .unwrap();
        }
        assert_eq!(ctx.violations().len(), 1);
        assert_eq!(ctx.violations()[0].kind(), ViolationKind::EntityRestriction);
        assert_eq!(ctx.violations()[0].entity(), EntityKind::Sender);
    }

    #[test]
    fn banned_opcode_is_recorded_with_pc() {
        let stack = Stack::default();
        let mut ctx = context();
        {
            let mut inspector = ValidationInspector::new(&mut ctx);
            inspector
                .on_step(&step(0x3a, &stack, Address::repeat_byte(0x01)))
                .unwrap();
        }
        let violation = &ctx.violations()[0];
        assert_eq!(violation.kind(), ViolationKind::BannedOpcode);
        assert_eq!(violation.pc(), 4);
        assert!(violation.to_string().contains("GASPRICE"));
    }

    #[test]
    fn foreign_sload_is_an_illegal_access() {
        let mut stack = Stack::default();
        stack.push(U256::zero()).unwrap();
        let mut ctx = context();
        let foreign = Address::repeat_byte(0x99);
        {
            let mut inspector = ValidationInspector::new(&mut ctx);
            inspector.on_step(&step(0x54, &stack, foreign)).unwrap();
        }
        let violation = &ctx.violations()[0];
        assert_eq!(violation.kind(), ViolationKind::IllegalStorageAccess);
        assert_eq!(violation.entity(), EntityKind::Sender);
        assert_eq!(violation.storage_target(), Some((foreign, H256::zero())));
    }

    #[test]
    fn own_sload_is_clean() {
        let mut stack = Stack::default();
        stack.push(U256::from(5)).unwrap();
        let mut ctx = context();
        {
            let mut inspector = ValidationInspector::new(&mut ctx);
            inspector
                .on_step(&step(0x54, &stack, Address::repeat_byte(0x01)))
                .unwrap();
        }
        assert!(ctx.violations().is_empty());
    }

    #[test]
    fn throw_mode_aborts_on_the_first_violation() {
        let stack = Stack::default();
        let mut ctx = ValidationContext::new(
            Address::repeat_byte(0x01),
            Address::repeat_byte(0xee),
            None,
            None,
            true,
        );
        let mut inspector = ValidationInspector::new(&mut ctx);
        let abort = inspector
            .on_step(&step(0x42, &stack, Address::repeat_byte(0x01)))
            .unwrap_err();
        assert!(abort.message.contains("TIMESTAMP"));
    }
}
