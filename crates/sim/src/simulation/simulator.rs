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

use std::sync::Arc;

use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, U256},
};
use opvet_evm::{CallParams, Evm, EvmError};
use opvet_types::{
    EntityKind, PackedUserOperation, ReputationStatus, Violation,
    VALIDATE_PAYMASTER_USER_OP_SELECTOR, VALIDATE_USER_OP_SELECTOR,
};
use serde::Serialize;
use tracing::debug;

use super::{context::ValidationContext, inspector::ValidationInspector};
use crate::reputation::ReputationTracker;

/// The aggregate outcome of simulating one operation's validation phase
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// True iff `errors` and `violations` are both empty
    pub is_valid: bool,
    /// Execution errors and reputation pre-check rejections
    pub errors: Vec<String>,
    /// EIP-7562 rule violations, in the order they were observed
    pub violations: Vec<Violation>,
    /// Gas consumed across the executed phases, absent when execution was
    /// skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U256>,
}

/// Simulation settings
#[derive(Clone, Copy, Debug)]
pub struct Settings {
    /// Gas bound for each validation phase call
    pub phase_gas_limit: u64,
    /// Halt a phase at its first violation instead of collecting all of
    /// them. Off by default: full collection gives better diagnostics.
    pub throw_on_violation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            phase_gas_limit: 1_000_000,
            throw_on_violation: false,
        }
    }
}

/// Drives the validation phases of a user operation through the embedded
/// EVM with the rule inspector attached.
///
/// The simulator owns the EVM, so chain state (deployments, balances)
/// persists across simulations. The reputation store is shared and only
/// touched in the post-phase update.
pub struct Simulator {
    evm: Evm,
    entry_point: Address,
    reputation: Arc<dyn ReputationTracker>,
    settings: Settings,
}

impl Simulator {
    /// Create a simulator calling validation functions from `entry_point`
    pub fn new(
        evm: Evm,
        entry_point: Address,
        reputation: Arc<dyn ReputationTracker>,
        settings: Settings,
    ) -> Self {
        Self {
            evm,
            entry_point,
            reputation,
            settings,
        }
    }

    /// The entry point the phase calls originate from
    pub fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Install runtime code in the embedded EVM's state
    pub fn deploy_code(&mut self, address: Address, code: Bytes) {
        self.evm.state_mut().put_code(address, code);
    }

    /// The embedded EVM, for state setup beyond deployments
    pub fn evm_mut(&mut self) -> &mut Evm {
        &mut self.evm
    }

    /// Simulate the validation phases of `op`.
    ///
    /// The operation must already have passed the structural check. Phases
    /// run in factory, sender, paymaster order; each is gas-bounded and
    /// its execution errors are collected rather than propagated. Banned
    /// or throttled factories and paymasters skip execution entirely.
    pub fn simulate_validation(&mut self, op: &PackedUserOperation) -> SimulationResult {
        let factory = op.factory();
        let paymaster = op.paymaster();
        let mut errors = Vec::new();

        for (kind, address) in [
            (EntityKind::Factory, factory),
            (EntityKind::Paymaster, paymaster),
        ] {
            let Some(address) = address else { continue };
            match self.reputation.status(address) {
                ReputationStatus::Banned => {
                    errors.push(format!("{kind} {address:?} is BANNED"));
                }
                ReputationStatus::Throttled => {
                    errors.push(format!("{kind} {address:?} is THROTTLED"));
                }
                ReputationStatus::Ok => {}
            }
        }
        // a flagged entity must not get to consume validation CPU
        if !errors.is_empty() {
            self.update_reputation(factory, paymaster, &[]);
            return SimulationResult {
                is_valid: false,
                errors,
                violations: Vec::new(),
                gas_used: None,
            };
        }

        let mut ctx = ValidationContext::new(
            op.sender,
            self.entry_point,
            factory,
            paymaster,
            self.settings.throw_on_violation,
        );
        let mut gas_used = U256::zero();
        let mut aborted = false;

        if let Some(factory_address) = factory {
            aborted = self.run_phase(
                &mut ctx,
                EntityKind::Factory,
                factory_address,
                op.factory_data().to_vec(),
                &mut errors,
                &mut gas_used,
            );
        }
        if !aborted {
            aborted = self.run_phase(
                &mut ctx,
                EntityKind::Sender,
                op.sender,
                sender_calldata(op),
                &mut errors,
                &mut gas_used,
            );
        }
        if !aborted {
            if let Some(paymaster_address) = paymaster {
                self.run_phase(
                    &mut ctx,
                    EntityKind::Paymaster,
                    paymaster_address,
                    paymaster_calldata(op),
                    &mut errors,
                    &mut gas_used,
                );
            }
        }

        let violations = ctx.into_violations();
        self.update_reputation(factory, paymaster, &violations);

        SimulationResult {
            is_valid: errors.is_empty() && violations.is_empty(),
            errors,
            violations,
            gas_used: Some(gas_used),
        }
    }

    // Run one phase with the inspector hooked. Returns true when the phase
    // was aborted by a throw-mode violation, which skips later phases.
    fn run_phase(
        &mut self,
        ctx: &mut ValidationContext,
        kind: EntityKind,
        to: Address,
        data: Vec<u8>,
        errors: &mut Vec<String>,
        gas_used: &mut U256,
    ) -> bool {
        ctx.set_entity(kind);
        debug!(phase = %kind, to = ?to, "running validation phase");
        let params = CallParams {
            caller: self.entry_point,
            to,
            value: U256::zero(),
            data,
            gas_limit: self.settings.phase_gas_limit,
        };
        let mut inspector = ValidationInspector::new(ctx);
        let result = self.evm.hook(&mut inspector).run_call(params);
        match result {
            Ok(outcome) => {
                *gas_used += U256::from(outcome.gas_used);
                false
            }
            Err(err) => {
                let phase_aborted = matches!(err, EvmError::Aborted(_));
                errors.push(format!("{kind} validation failed: {err}"));
                phase_aborted
            }
        }
    }

    // Reputation counts rule violations only; reverts and other execution
    // errors never count against an entity.
    fn update_reputation(
        &self,
        factory: Option<Address>,
        paymaster: Option<Address>,
        violations: &[Violation],
    ) {
        if let Some(address) = factory {
            let clean = !violations
                .iter()
                .any(|violation| violation.entity() == EntityKind::Factory);
            self.reputation.update(address, clean);
        }
        if let Some(address) = paymaster {
            let clean = !violations
                .iter()
                .any(|violation| violation.entity() == EntityKind::Paymaster);
            self.reputation.update(address, clean);
        }
    }
}

// validateUserOp(PackedUserOperation,bytes32,uint256) with a zeroed hash
// and zero missingAccountFunds
fn sender_calldata(op: &PackedUserOperation) -> Vec<u8> {
    let mut data = VALIDATE_USER_OP_SELECTOR.to_vec();
    data.extend(encode(&[
        op.abi_token(),
        Token::FixedBytes(vec![0_u8; 32]),
        Token::Uint(U256::zero()),
    ]));
    data
}

// validatePaymasterUserOp(PackedUserOperation,bytes32,uint256) with a
// zeroed hash and zero maxCost
fn paymaster_calldata(op: &PackedUserOperation) -> Vec<u8> {
    let mut data = VALIDATE_PAYMASTER_USER_OP_SELECTOR.to_vec();
    data.extend(encode(&[
        op.abi_token(),
        Token::FixedBytes(vec![0_u8; 32]),
        Token::Uint(U256::zero()),
    ]));
    data
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use opvet_types::{ViolationKind, ENTRY_POINT_ADDRESS_V0_7};

    use super::*;
    use crate::reputation::{InMemoryReputation, ReputationTracker};

    fn new_simulator(reputation: Arc<InMemoryReputation>) -> Simulator {
        Simulator::new(
            Evm::new(),
            ENTRY_POINT_ADDRESS_V0_7,
            reputation,
            Settings::default(),
        )
    }

    fn simulator() -> Simulator {
        new_simulator(Arc::new(InMemoryReputation::default()))
    }

    fn code(hex: &str) -> Bytes {
        Bytes::from_str(hex).unwrap()
    }

    fn paymaster_and_data(paymaster: Address) -> Bytes {
        let mut data = paymaster.as_bytes().to_vec();
        data.extend_from_slice(&[0_u8; 32]);
        Bytes::from(data)
    }

    fn init_code(factory: Address, data: &[u8]) -> Bytes {
        let mut bytes = factory.as_bytes().to_vec();
        bytes.extend_from_slice(data);
        Bytes::from(bytes)
    }

    #[test]
    fn minimal_empty_op_is_valid() {
        let mut sim = simulator();
        let result = sim.simulate_validation(&PackedUserOperation::default());
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        assert!(result.violations.is_empty());
        assert!(result.is_valid);
        assert_eq!(result.gas_used, Some(U256::zero()));
    }

    #[test]
    fn banned_opcode_on_sender_invalidates() {
        let sender = Address::from_str("0x1234567890123456789012345678901234567890").unwrap();
        let mut sim = simulator();
        // TIMESTAMP, STOP
        sim.deploy_code(sender, code("0x4200"));
        let op = PackedUserOperation {
            sender,
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert!(!result.violations.is_empty());
        let violation = &result.violations[0];
        assert_eq!(violation.kind(), ViolationKind::BannedOpcode);
        assert_eq!(violation.entity(), EntityKind::Sender);
        assert!(violation.to_string().contains("TIMESTAMP"));
    }

    #[test]
    fn factory_is_parsed_from_init_code() {
        let factory = Address::repeat_byte(0xaa);
        let mut sim = simulator();
        let op = PackedUserOperation {
            init_code: init_code(factory, &[0x12, 0x34, 0x56, 0x78, 0x90]),
            ..Default::default()
        };
        // no factory code deployed, so the phase is a no-op
        let result = sim.simulate_validation(&op);
        assert!(result.violations.is_empty());
        assert!(result.is_valid);
    }

    #[test]
    fn factory_phase_violations_carry_the_factory_entity() {
        let factory = Address::repeat_byte(0xaa);
        let mut sim = simulator();
        sim.deploy_code(factory, code("0x4200"));
        let op = PackedUserOperation {
            init_code: init_code(factory, &[]),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].entity(), EntityKind::Factory);
    }

    #[test]
    fn phase_violations_come_in_phase_order() {
        let factory = Address::repeat_byte(0xaa);
        let sender = Address::repeat_byte(0xbb);
        let paymaster = Address::repeat_byte(0xcc);
        let mut sim = simulator();
        for address in [factory, sender, paymaster] {
            sim.deploy_code(address, code("0x4200"));
        }
        let op = PackedUserOperation {
            sender,
            init_code: init_code(factory, &[]),
            paymaster_and_data: paymaster_and_data(paymaster),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        let entities: Vec<_> = result
            .violations
            .iter()
            .map(|violation| violation.entity())
            .collect();
        assert_eq!(
            entities,
            vec![
                EntityKind::Factory,
                EntityKind::Sender,
                EntityKind::Paymaster
            ]
        );
    }

    #[test]
    fn banned_paymaster_skips_execution() {
        let paymaster = Address::repeat_byte(0xcc);
        let reputation = Arc::new(InMemoryReputation::default());
        for _ in 0..5 {
            reputation.update(paymaster, false);
        }
        let mut sim = new_simulator(reputation.clone());
        // if the paymaster were executed this would add a violation
        sim.deploy_code(paymaster, code("0x4200"));
        let op = PackedUserOperation {
            paymaster_and_data: paymaster_and_data(paymaster),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("is BANNED"), "{:?}", result.errors);
        assert!(result.violations.is_empty());
        assert_eq!(result.gas_used, None);
        // the post-update still ran, and the clean pass does not unban
        let entry = reputation.entry(paymaster).unwrap();
        assert_eq!(entry.ops_seen, 6);
        assert_eq!(entry.ops_failed, 5);
    }

    #[test]
    fn throttled_factory_skips_execution() {
        let factory = Address::repeat_byte(0xaa);
        let reputation = Arc::new(InMemoryReputation::default());
        reputation.update(factory, false);
        reputation.update(factory, false);
        let mut sim = new_simulator(reputation);
        let op = PackedUserOperation {
            init_code: init_code(factory, &[]),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("is THROTTLED"));
        assert!(result.violations.is_empty());
    }

    #[test]
    fn foreign_storage_read_is_flagged() {
        let sender = Address::repeat_byte(0x11);
        let other = Address::repeat_byte(0x99);
        let mut sim = simulator();
        // other: PUSH1 0, SLOAD, POP, STOP
        sim.deploy_code(other, code("0x6000545000"));
        // sender calls into other, which reads its own storage while the
        // active entity is still the sender
        let call_other = format!(
            "0x6000600060006000600073{}5af100",
            "99".repeat(20)
        );
        sim.deploy_code(sender, code(&call_other));
        let op = PackedUserOperation {
            sender,
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        let violation = &result.violations[0];
        assert_eq!(violation.kind(), ViolationKind::IllegalStorageAccess);
        assert_eq!(violation.entity(), EntityKind::Sender);
        assert_eq!(
            violation.storage_target(),
            Some((other, ethers::types::H256::zero()))
        );
    }

    #[test]
    fn reverts_are_errors_not_violations() {
        let paymaster = Address::repeat_byte(0xcc);
        let reputation = Arc::new(InMemoryReputation::default());
        let mut sim = new_simulator(reputation.clone());
        // PUSH1 0, PUSH1 0, REVERT
        sim.deploy_code(paymaster, code("0x60006000fd"));
        let op = PackedUserOperation {
            paymaster_and_data: paymaster_and_data(paymaster),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("reverted"));
        assert!(result.violations.is_empty());
        // an execution error does not count against reputation
        let entry = reputation.entry(paymaster).unwrap();
        assert_eq!(entry.ops_failed, 0);
        assert_eq!(entry.ops_seen, 1);
    }

    #[test]
    fn rule_violations_feed_reputation() {
        let paymaster = Address::repeat_byte(0xcc);
        let reputation = Arc::new(InMemoryReputation::default());
        let mut sim = new_simulator(reputation.clone());
        sim.deploy_code(paymaster, code("0x4200"));
        let op = PackedUserOperation {
            paymaster_and_data: paymaster_and_data(paymaster),
            ..Default::default()
        };
        sim.simulate_validation(&op);
        let entry = reputation.entry(paymaster).unwrap();
        assert_eq!(entry.ops_failed, 1);
    }

    #[test]
    fn throw_mode_stops_at_the_first_violation() {
        let factory = Address::repeat_byte(0xaa);
        let sender = Address::repeat_byte(0xbb);
        let mut sim = Simulator::new(
            Evm::new(),
            ENTRY_POINT_ADDRESS_V0_7,
            Arc::new(InMemoryReputation::default()),
            Settings {
                throw_on_violation: true,
                ..Settings::default()
            },
        );
        // both would violate; throw mode must only reach the factory
        sim.deploy_code(factory, code("0x42420000"));
        sim.deploy_code(sender, code("0x4200"));
        let op = PackedUserOperation {
            sender,
            init_code: init_code(factory, &[]),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].entity(), EntityKind::Factory);
        assert!(result.errors[0].contains("aborted"));
    }

    #[test]
    fn simulations_are_independent_runs() {
        let sender = Address::repeat_byte(0xbb);
        let mut sim = simulator();
        sim.deploy_code(sender, code("0x4200"));
        let bad = PackedUserOperation {
            sender,
            ..Default::default()
        };
        let result = sim.simulate_validation(&bad);
        assert!(!result.is_valid);

        // the hook is released; a clean op through the same simulator sees
        // none of the previous run's violations
        let clean = PackedUserOperation::default();
        let result = sim.simulate_validation(&clean);
        assert!(result.is_valid, "{result:?}");
    }

    #[test]
    fn reputation_stub_drives_the_pre_check() {
        let paymaster = Address::repeat_byte(0xcc);
        let mut mock = crate::reputation::MockReputationTracker::new();
        mock.expect_status()
            .times(1)
            .returning(|_| ReputationStatus::Banned);
        mock.expect_update().times(1).return_const(());
        let mut sim = Simulator::new(
            Evm::new(),
            ENTRY_POINT_ADDRESS_V0_7,
            Arc::new(mock),
            Settings::default(),
        );
        let op = PackedUserOperation {
            paymaster_and_data: paymaster_and_data(paymaster),
            ..Default::default()
        };
        let result = sim.simulate_validation(&op);
        assert!(!result.is_valid);
        assert!(result.errors[0].contains("is BANNED"));
    }

    #[test]
    fn sender_calldata_uses_the_validate_user_op_selector() {
        let data = sender_calldata(&PackedUserOperation::default());
        assert_eq!(&data[..4], &[0x19, 0x82, 0x2f, 0x7c]);
        let data = paymaster_calldata(&PackedUserOperation::default());
        assert_eq!(&data[..4], &[0x52, 0xb7, 0x51, 0x2c]);
    }
}
