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

use std::collections::HashMap;

use ethers::{
    types::{Address, Bytes, H256, I256, U256, U512},
    utils::keccak256,
};
use tracing::trace;

use crate::{
    memory::MAX_MEMORY_BYTES, EvmError, Memory, Stack, StateManager, StepSink, StepView,
};

/// Maximum call-tree depth
const MAX_CALL_DEPTH: u32 = 64;

/// Fixed block context the interpreter executes against.
///
/// The values are deterministic stand-ins: block-dependent opcodes still
/// execute (rejecting them is the validation inspector's job, not the
/// interpreter's), and two runs of the same call always observe the same
/// environment.
#[derive(Clone, Debug)]
pub struct BlockEnv {
    /// `NUMBER`
    pub number: U256,
    /// `TIMESTAMP`
    pub timestamp: U256,
    /// `COINBASE`
    pub coinbase: Address,
    /// `DIFFICULTY` / `PREVRANDAO`
    pub prev_randao: H256,
    /// `GASLIMIT`
    pub gas_limit: U256,
    /// `BASEFEE`
    pub base_fee: U256,
    /// `GASPRICE`
    pub gas_price: U256,
    /// `CHAINID`
    pub chain_id: U256,
    /// `BLOCKHASH`, returned for any queried block number
    pub block_hash: H256,
}

impl Default for BlockEnv {
    fn default() -> Self {
        Self {
            number: U256::from(100),
            timestamp: U256::from(1_700_000_000_u64),
            coinbase: Address::zero(),
            prev_randao: H256::zero(),
            gas_limit: U256::from(30_000_000_u64),
            base_fee: U256::from(7),
            gas_price: U256::from(10),
            chain_id: U256::one(),
            block_hash: H256::zero(),
        }
    }
}

/// Parameters of a top-level call
#[derive(Clone, Debug)]
pub struct CallParams {
    /// The account issuing the call
    pub caller: Address,
    /// The account being called
    pub to: Address,
    /// Wei sent with the call
    pub value: U256,
    /// Calldata
    pub data: Vec<u8>,
    /// Gas budget for the call
    pub gas_limit: u64,
}

/// The result of a completed top-level call
#[derive(Clone, Debug)]
pub struct CallOutcome {
    /// Returned data
    pub output: Bytes,
    /// Gas consumed by the call
    pub gas_used: u64,
}

/// The embedded EVM: state plus a fixed block environment.
#[derive(Debug, Default)]
pub struct Evm {
    state: StateManager,
    env: BlockEnv,
    transient: HashMap<(Address, H256), H256>,
}

// Per-frame execution context
struct Frame {
    code_address: Address,
    address: Address,
    caller: Address,
    origin: Address,
    value: U256,
    calldata: Vec<u8>,
    gas_limit: u64,
    is_static: bool,
    depth: u32,
}

struct ExecOutput {
    output: Vec<u8>,
    gas_used: u64,
}

impl Evm {
    /// An EVM over empty state and the default block environment
    pub fn new() -> Self {
        Self::default()
    }

    /// An EVM over the given state
    pub fn with_state(state: StateManager) -> Self {
        Self {
            state,
            ..Self::default()
        }
    }

    /// Replace the block environment
    pub fn set_env(&mut self, env: BlockEnv) {
        self.env = env;
    }

    /// The backing state
    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Mutable access to the backing state (deployments, balances)
    pub fn state_mut(&mut self) -> &mut StateManager {
        &mut self.state
    }

    /// Run a call without any step hook attached
    pub fn run_call(&mut self, params: CallParams) -> Result<CallOutcome, EvmError> {
        self.call_inner(params, None)
    }

    /// Attach `sink` to the per-instruction event stream.
    ///
    /// The returned guard is the cleanup handle: the sink observes every
    /// instruction of calls made through it and is detached when the guard
    /// goes out of scope. The mutable borrow makes a second attachment
    /// without a detach unrepresentable.
    pub fn hook<'a>(&'a mut self, sink: &'a mut dyn StepSink) -> HookedEvm<'a> {
        HookedEvm { evm: self, sink }
    }

    fn call_inner(
        &mut self,
        params: CallParams,
        mut sink: Option<&mut dyn StepSink>,
    ) -> Result<CallOutcome, EvmError> {
        self.transient.clear();
        let code = self.state.get_code(params.to);
        // calls to accounts without code are no-ops
        if code.is_empty() {
            return Ok(CallOutcome {
                output: Bytes::new(),
                gas_used: 0,
            });
        }
        trace!(to = ?params.to, gas = params.gas_limit, "running call");
        let out = self.exec_code(
            &code,
            Frame {
                code_address: params.to,
                address: params.to,
                caller: params.caller,
                origin: params.caller,
                value: params.value,
                calldata: params.data,
                gas_limit: params.gas_limit,
                is_static: false,
                depth: 0,
            },
            &mut sink,
        )?;
        Ok(CallOutcome {
            output: out.output.into(),
            gas_used: out.gas_used,
        })
    }

    #[allow(clippy::too_many_lines)]
    fn exec_code(
        &mut self,
        code: &[u8],
        frame: Frame,
        sink: &mut Option<&mut dyn StepSink>,
    ) -> Result<ExecOutput, EvmError> {
        let jumpdests = analyze_jumpdests(code);
        let mut stack = Stack::default();
        let mut memory = Memory::default();
        let mut returndata: Vec<u8> = Vec::new();
        let mut gas_remaining = frame.gas_limit;
        let mut pc: usize = 0;

        loop {
            // running off the end of code is an implicit STOP
            let Some(&op) = code.get(pc) else {
                return Ok(ExecOutput {
                    output: Vec::new(),
                    gas_used: frame.gas_limit - gas_remaining,
                });
            };

            if let Some(hook) = sink.as_deref_mut() {
                let view = StepView {
                    opcode: op,
                    pc: pc as u64,
                    stack: &stack,
                    address: frame.address,
                    code_address: frame.code_address,
                    depth: frame.depth,
                };
                hook.on_step(&view)
                    .map_err(|abort| EvmError::Aborted(abort.message))?;
            }

            let cost = gas_cost(op);
            if cost > gas_remaining {
                return Err(EvmError::OutOfGas);
            }
            gas_remaining -= cost;

            let mut next_pc = pc + 1;
            match op {
                // STOP
                0x00 => {
                    return Ok(ExecOutput {
                        output: Vec::new(),
                        gas_used: frame.gas_limit - gas_remaining,
                    })
                }
                // ADD
                0x01 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a.overflowing_add(b).0)?;
                }
                // MUL
                0x02 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a.overflowing_mul(b).0)?;
                }
                // SUB
                0x03 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a.overflowing_sub(b).0)?;
                }
                // DIV
                0x04 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a.checked_div(b).unwrap_or_default())?;
                }
                // SDIV
                0x05 => {
                    let a = I256::from_raw(stack.pop()?);
                    let b = I256::from_raw(stack.pop()?);
                    let quotient = if b.is_zero() {
                        I256::zero()
                    } else {
                        a.checked_div(b).unwrap_or(I256::MIN)
                    };
                    stack.push(quotient.into_raw())?;
                }
                // MOD
                0x06 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a.checked_rem(b).unwrap_or_default())?;
                }
                // SMOD
                0x07 => {
                    let a = I256::from_raw(stack.pop()?);
                    let b = I256::from_raw(stack.pop()?);
                    let remainder = if b.is_zero() {
                        I256::zero()
                    } else {
                        a.checked_rem(b).unwrap_or_default()
                    };
                    stack.push(remainder.into_raw())?;
                }
                // ADDMOD
                0x08 => {
                    let (a, b, modulus) = (stack.pop()?, stack.pop()?, stack.pop()?);
                    stack.push(wide_mod(
                        U512::from(a) + U512::from(b),
                        modulus,
                    ))?;
                }
                // MULMOD
                0x09 => {
                    let (a, b, modulus) = (stack.pop()?, stack.pop()?, stack.pop()?);
                    stack.push(wide_mod(
                        U512::from(a) * U512::from(b),
                        modulus,
                    ))?;
                }
                // EXP
                0x0a => {
                    let (base, exponent) = (stack.pop()?, stack.pop()?);
                    stack.push(base.overflowing_pow(exponent).0)?;
                }
                // SIGNEXTEND
                0x0b => {
                    let (index, value) = (stack.pop()?, stack.pop()?);
                    let extended = if index < U256::from(32) {
                        let bit = index.low_u64() as usize * 8 + 7;
                        let mask = (U256::one() << bit) | ((U256::one() << bit) - U256::one());
                        if value.bit(bit) {
                            value | !mask
                        } else {
                            value & mask
                        }
                    } else {
                        value
                    };
                    stack.push(extended)?;
                }
                // LT, GT, SLT, SGT, EQ
                0x10 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(bool_word(a < b))?;
                }
                0x11 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(bool_word(a > b))?;
                }
                0x12 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(bool_word(I256::from_raw(a) < I256::from_raw(b)))?;
                }
                0x13 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(bool_word(I256::from_raw(a) > I256::from_raw(b)))?;
                }
                0x14 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(bool_word(a == b))?;
                }
                // ISZERO
                0x15 => {
                    let a = stack.pop()?;
                    stack.push(bool_word(a.is_zero()))?;
                }
                // AND, OR, XOR, NOT
                0x16 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a & b)?;
                }
                0x17 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a | b)?;
                }
                0x18 => {
                    let (a, b) = (stack.pop()?, stack.pop()?);
                    stack.push(a ^ b)?;
                }
                0x19 => {
                    let a = stack.pop()?;
                    stack.push(!a)?;
                }
                // BYTE
                0x1a => {
                    let (index, value) = (stack.pop()?, stack.pop()?);
                    let byte = if index < U256::from(32) {
                        U256::from(value.byte(31 - index.low_u64() as usize))
                    } else {
                        U256::zero()
                    };
                    stack.push(byte)?;
                }
                // SHL
                0x1b => {
                    let (shift, value) = (stack.pop()?, stack.pop()?);
                    let shifted = if shift >= U256::from(256) {
                        U256::zero()
                    } else {
                        value << shift.low_u64() as usize
                    };
                    stack.push(shifted)?;
                }
                // SHR
                0x1c => {
                    let (shift, value) = (stack.pop()?, stack.pop()?);
                    let shifted = if shift >= U256::from(256) {
                        U256::zero()
                    } else {
                        value >> shift.low_u64() as usize
                    };
                    stack.push(shifted)?;
                }
                // SAR
                0x1d => {
                    let (shift, value) = (stack.pop()?, stack.pop()?);
                    let negative = value.bit(255);
                    let shifted = if shift >= U256::from(256) {
                        if negative {
                            U256::MAX
                        } else {
                            U256::zero()
                        }
                    } else {
                        let s = shift.low_u64() as usize;
                        let logical = value >> s;
                        if negative && s > 0 {
                            logical | !(U256::MAX >> s)
                        } else {
                            logical
                        }
                    };
                    stack.push(shifted)?;
                }
                // SHA3
                0x20 => {
                    let (offset, size) = (mem_index(stack.pop()?)?, mem_index(stack.pop()?)?);
                    let data = memory.read(offset, size)?;
                    stack.push(U256::from_big_endian(&keccak256(&data)))?;
                }
                // ADDRESS, BALANCE, ORIGIN, CALLER, CALLVALUE
                0x30 => stack.push(word_from_address(frame.address))?,
                0x31 => {
                    let address = address_from_word(stack.pop()?);
                    stack.push(self.state.balance(address))?;
                }
                0x32 => stack.push(word_from_address(frame.origin))?,
                0x33 => stack.push(word_from_address(frame.caller))?,
                0x34 => stack.push(frame.value)?,
                // CALLDATALOAD
                0x35 => {
                    let offset = stack.pop()?;
                    let mut buf = [0_u8; 32];
                    if offset < U256::from(frame.calldata.len()) {
                        let offset = offset.low_u64() as usize;
                        let end = frame.calldata.len().min(offset + 32);
                        buf[..end - offset].copy_from_slice(&frame.calldata[offset..end]);
                    }
                    stack.push(U256::from_big_endian(&buf))?;
                }
                // CALLDATASIZE
                0x36 => stack.push(U256::from(frame.calldata.len()))?,
                // CALLDATACOPY
                0x37 => {
                    let dest = mem_index(stack.pop()?)?;
                    let src = stack.pop()?;
                    let size = mem_index(stack.pop()?)?;
                    copy_to_memory(&mut memory, dest, &frame.calldata, src, size)?;
                }
                // CODESIZE
                0x38 => stack.push(U256::from(code.len()))?,
                // CODECOPY
                0x39 => {
                    let dest = mem_index(stack.pop()?)?;
                    let src = stack.pop()?;
                    let size = mem_index(stack.pop()?)?;
                    copy_to_memory(&mut memory, dest, code, src, size)?;
                }
                // GASPRICE
                0x3a => stack.push(self.env.gas_price)?,
                // EXTCODESIZE
                0x3b => {
                    let address = address_from_word(stack.pop()?);
                    stack.push(U256::from(self.state.get_code(address).len()))?;
                }
                // EXTCODECOPY
                0x3c => {
                    let address = address_from_word(stack.pop()?);
                    let dest = mem_index(stack.pop()?)?;
                    let src = stack.pop()?;
                    let size = mem_index(stack.pop()?)?;
                    let ext_code = self.state.get_code(address);
                    copy_to_memory(&mut memory, dest, &ext_code, src, size)?;
                }
                // RETURNDATASIZE
                0x3d => stack.push(U256::from(returndata.len()))?,
                // RETURNDATACOPY
                0x3e => {
                    let dest = mem_index(stack.pop()?)?;
                    let src = stack.pop()?;
                    let size = mem_index(stack.pop()?)?;
                    copy_to_memory(&mut memory, dest, &returndata, src, size)?;
                }
                // EXTCODEHASH
                0x3f => {
                    let address = address_from_word(stack.pop()?);
                    let ext_code = self.state.get_code(address);
                    let hash = if ext_code.is_empty() {
                        U256::zero()
                    } else {
                        U256::from_big_endian(&keccak256(&ext_code))
                    };
                    stack.push(hash)?;
                }
                // BLOCKHASH
                0x40 => {
                    let _number = stack.pop()?;
                    stack.push(U256::from_big_endian(self.env.block_hash.as_bytes()))?;
                }
                // COINBASE, TIMESTAMP, NUMBER, DIFFICULTY, GASLIMIT
                0x41 => stack.push(word_from_address(self.env.coinbase))?,
                0x42 => stack.push(self.env.timestamp)?,
                0x43 => stack.push(self.env.number)?,
                0x44 => stack.push(U256::from_big_endian(self.env.prev_randao.as_bytes()))?,
                0x45 => stack.push(self.env.gas_limit)?,
                // CHAINID
                0x46 => stack.push(self.env.chain_id)?,
                // SELFBALANCE
                0x47 => stack.push(self.state.balance(frame.address))?,
                // BASEFEE
                0x48 => stack.push(self.env.base_fee)?,
                // BLOBHASH, BLOBBASEFEE
                0x49 => {
                    let _index = stack.pop()?;
                    stack.push(U256::zero())?;
                }
                0x4a => stack.push(U256::zero())?,
                // POP
                0x50 => {
                    stack.pop()?;
                }
                // MLOAD, MSTORE, MSTORE8
                0x51 => {
                    let offset = mem_index(stack.pop()?)?;
                    let word = memory.read_word(offset)?;
                    stack.push(word)?;
                }
                0x52 => {
                    let offset = mem_index(stack.pop()?)?;
                    let value = stack.pop()?;
                    memory.store_word(offset, value)?;
                }
                0x53 => {
                    let offset = mem_index(stack.pop()?)?;
                    let value = stack.pop()?;
                    memory.store8(offset, value.byte(0))?;
                }
                // SLOAD
                0x54 => {
                    let slot = h256_from_u256(stack.pop()?);
                    let value = self.state.storage_load(frame.address, slot);
                    stack.push(U256::from_big_endian(value.as_bytes()))?;
                }
                // SSTORE
                0x55 => {
                    if frame.is_static {
                        return Err(EvmError::StaticViolation);
                    }
                    let slot = h256_from_u256(stack.pop()?);
                    let value = h256_from_u256(stack.pop()?);
                    self.state.storage_store(frame.address, slot, value);
                }
                // JUMP
                0x56 => {
                    let dest = stack.pop()?;
                    next_pc = checked_jump(&jumpdests, dest)?;
                }
                // JUMPI
                0x57 => {
                    let dest = stack.pop()?;
                    let condition = stack.pop()?;
                    if !condition.is_zero() {
                        next_pc = checked_jump(&jumpdests, dest)?;
                    }
                }
                // PC, MSIZE, GAS, JUMPDEST
                0x58 => stack.push(U256::from(pc))?,
                0x59 => stack.push(U256::from(memory.size()))?,
                0x5a => stack.push(U256::from(gas_remaining))?,
                0x5b => {}
                // TLOAD, TSTORE
                0x5c => {
                    let slot = h256_from_u256(stack.pop()?);
                    let value = self
                        .transient
                        .get(&(frame.address, slot))
                        .copied()
                        .unwrap_or_default();
                    stack.push(U256::from_big_endian(value.as_bytes()))?;
                }
                0x5d => {
                    if frame.is_static {
                        return Err(EvmError::StaticViolation);
                    }
                    let slot = h256_from_u256(stack.pop()?);
                    let value = h256_from_u256(stack.pop()?);
                    self.transient.insert((frame.address, slot), value);
                }
                // MCOPY
                0x5e => {
                    let dest = mem_index(stack.pop()?)?;
                    let src = mem_index(stack.pop()?)?;
                    let size = mem_index(stack.pop()?)?;
                    let chunk = memory.read(src, size)?;
                    memory.store(dest, &chunk)?;
                }
                // PUSH0
                0x5f => stack.push(U256::zero())?,
                // PUSH1..PUSH32
                0x60..=0x7f => {
                    let n = (op - 0x5f) as usize;
                    let end = code.len().min(pc + 1 + n);
                    let mut buf = [0_u8; 32];
                    buf[32 - n..32 - n + (end - pc - 1)].copy_from_slice(&code[pc + 1..end]);
                    stack.push(U256::from_big_endian(&buf))?;
                    next_pc = pc + 1 + n;
                }
                // DUP1..DUP16
                0x80..=0x8f => stack.dup((op - 0x7f) as usize)?,
                // SWAP1..SWAP16
                0x90..=0x9f => stack.swap((op - 0x8f) as usize)?,
                // LOG0..LOG4
                0xa0..=0xa4 => {
                    if frame.is_static {
                        return Err(EvmError::StaticViolation);
                    }
                    let _offset = stack.pop()?;
                    let _size = stack.pop()?;
                    for _ in 0..(op - 0xa0) {
                        stack.pop()?;
                    }
                }
                // CREATE, CREATE2
                0xf0 | 0xf5 => {
                    if frame.is_static {
                        return Err(EvmError::StaticViolation);
                    }
                    let value = stack.pop()?;
                    let offset = mem_index(stack.pop()?)?;
                    let size = mem_index(stack.pop()?)?;
                    let salt = if op == 0xf5 { Some(stack.pop()?) } else { None };
                    let init_code = memory.read(offset, size)?;
                    let created = self.do_create(
                        &frame,
                        value,
                        &init_code,
                        salt,
                        gas_sent(gas_remaining),
                        sink,
                    )?;
                    match created {
                        Some((address, gas_used)) => {
                            gas_remaining = gas_remaining.saturating_sub(gas_used);
                            returndata.clear();
                            stack.push(word_from_address(address))?;
                        }
                        None => stack.push(U256::zero())?,
                    }
                }
                // CALL, CALLCODE
                0xf1 | 0xf2 => {
                    let _gas = stack.pop()?;
                    let target = address_from_word(stack.pop()?);
                    let value = stack.pop()?;
                    let in_offset = mem_index(stack.pop()?)?;
                    let in_size = mem_index(stack.pop()?)?;
                    let out_offset = mem_index(stack.pop()?)?;
                    let out_size = mem_index(stack.pop()?)?;
                    if frame.is_static && !value.is_zero() {
                        return Err(EvmError::StaticViolation);
                    }
                    let input = memory.read(in_offset, in_size)?;
                    // CALLCODE runs the target's code in the current
                    // storage context
                    let context = if op == 0xf2 { frame.address } else { target };
                    let sub = SubCall {
                        code_address: target,
                        address: context,
                        caller: frame.address,
                        value,
                        input,
                        is_static: frame.is_static,
                        transfers_value: op == 0xf1,
                    };
                    self.do_call(
                        &frame,
                        sub,
                        gas_sent(gas_remaining),
                        &mut gas_remaining,
                        &mut stack,
                        &mut memory,
                        &mut returndata,
                        out_offset,
                        out_size,
                        sink,
                    )?;
                }
                // RETURN
                0xf3 => {
                    let offset = mem_index(stack.pop()?)?;
                    let size = mem_index(stack.pop()?)?;
                    let output = memory.read(offset, size)?;
                    return Ok(ExecOutput {
                        output,
                        gas_used: frame.gas_limit - gas_remaining,
                    });
                }
                // DELEGATECALL, STATICCALL
                0xf4 | 0xfa => {
                    let _gas = stack.pop()?;
                    let target = address_from_word(stack.pop()?);
                    let in_offset = mem_index(stack.pop()?)?;
                    let in_size = mem_index(stack.pop()?)?;
                    let out_offset = mem_index(stack.pop()?)?;
                    let out_size = mem_index(stack.pop()?)?;
                    let input = memory.read(in_offset, in_size)?;
                    let sub = if op == 0xf4 {
                        SubCall {
                            code_address: target,
                            address: frame.address,
                            caller: frame.caller,
                            value: frame.value,
                            input,
                            is_static: frame.is_static,
                            transfers_value: false,
                        }
                    } else {
                        SubCall {
                            code_address: target,
                            address: target,
                            caller: frame.address,
                            value: U256::zero(),
                            input,
                            is_static: true,
                            transfers_value: false,
                        }
                    };
                    self.do_call(
                        &frame,
                        sub,
                        gas_sent(gas_remaining),
                        &mut gas_remaining,
                        &mut stack,
                        &mut memory,
                        &mut returndata,
                        out_offset,
                        out_size,
                        sink,
                    )?;
                }
                // REVERT
                0xfd => {
                    let offset = mem_index(stack.pop()?)?;
                    let size = mem_index(stack.pop()?)?;
                    let output = memory.read(offset, size)?;
                    return Err(EvmError::Reverted(output.into()));
                }
                // SELFDESTRUCT (halts; the account is left in place)
                0xff => {
                    if frame.is_static {
                        return Err(EvmError::StaticViolation);
                    }
                    let _beneficiary = stack.pop()?;
                    return Ok(ExecOutput {
                        output: Vec::new(),
                        gas_used: frame.gas_limit - gas_remaining,
                    });
                }
                // INVALID and unassigned opcodes
                _ => return Err(EvmError::InvalidOpcode(op)),
            }

            pc = next_pc;
        }
    }

    // Run CREATE/CREATE2 init code and install the returned runtime code.
    // Returns None when the creation failed (the caller pushes zero).
    fn do_create(
        &mut self,
        frame: &Frame,
        value: U256,
        init_code: &[u8],
        salt: Option<U256>,
        gas_limit: u64,
        sink: &mut Option<&mut dyn StepSink>,
    ) -> Result<Option<(Address, u64)>, EvmError> {
        // past the depth limit the creation fails, it is not an error
        if frame.depth + 1 >= MAX_CALL_DEPTH {
            return Ok(None);
        }
        let nonce = self.state.take_nonce(frame.address);
        let created = match salt {
            Some(salt) => create2_address(frame.address, salt, init_code),
            None => create_address(frame.address, nonce),
        };
        if !self.state.transfer(frame.address, created, value) {
            return Ok(None);
        }
        if init_code.is_empty() {
            return Ok(Some((created, 0)));
        }
        let result = self.exec_code(
            init_code,
            Frame {
                code_address: created,
                address: created,
                caller: frame.address,
                origin: frame.origin,
                value,
                calldata: Vec::new(),
                gas_limit,
                is_static: false,
                depth: frame.depth + 1,
            },
            sink,
        );
        match result {
            Ok(out) => {
                self.state.put_code(created, out.output.clone().into());
                Ok(Some((created, out.gas_used)))
            }
            Err(EvmError::Aborted(message)) => Err(EvmError::Aborted(message)),
            Err(_) => Ok(None),
        }
    }

    // Shared tail of the CALL-family opcodes: run the sub-call, charge gas,
    // write returndata, push the success flag.
    #[allow(clippy::too_many_arguments)]
    fn do_call(
        &mut self,
        frame: &Frame,
        sub: SubCall,
        sub_gas: u64,
        gas_remaining: &mut u64,
        stack: &mut Stack,
        memory: &mut Memory,
        returndata: &mut Vec<u8>,
        out_offset: usize,
        out_size: usize,
        sink: &mut Option<&mut dyn StepSink>,
    ) -> Result<(), EvmError> {
        // past the depth limit the sub-call fails (zero pushed), it is not
        // an error the caller observes
        if frame.depth + 1 >= MAX_CALL_DEPTH {
            returndata.clear();
            return stack.push(U256::zero());
        }
        if sub.transfers_value && !self.state.transfer(frame.address, sub.address, sub.value) {
            returndata.clear();
            return stack.push(U256::zero());
        }
        let target_code = self.state.get_code(sub.code_address);
        let result = if target_code.is_empty() {
            Ok(ExecOutput {
                output: Vec::new(),
                gas_used: 0,
            })
        } else {
            self.exec_code(
                &target_code,
                Frame {
                    code_address: sub.code_address,
                    address: sub.address,
                    caller: sub.caller,
                    origin: frame.origin,
                    value: sub.value,
                    calldata: sub.input,
                    gas_limit: sub_gas,
                    is_static: sub.is_static,
                    depth: frame.depth + 1,
                },
                sink,
            )
        };
        match result {
            Ok(out) => {
                *gas_remaining = gas_remaining.saturating_sub(out.gas_used);
                write_call_output(memory, out_offset, out_size, &out.output)?;
                *returndata = out.output;
                stack.push(U256::one())
            }
            Err(EvmError::Aborted(message)) => Err(EvmError::Aborted(message)),
            Err(EvmError::Reverted(data)) => {
                *gas_remaining = gas_remaining.saturating_sub(sub_gas);
                write_call_output(memory, out_offset, out_size, &data)?;
                *returndata = data.to_vec();
                stack.push(U256::zero())
            }
            Err(_) => {
                *gas_remaining = gas_remaining.saturating_sub(sub_gas);
                returndata.clear();
                stack.push(U256::zero())
            }
        }
    }
}

/// Executes calls with a [`StepSink`] attached; see [`Evm::hook`].
pub struct HookedEvm<'a> {
    evm: &'a mut Evm,
    sink: &'a mut dyn StepSink,
}

impl HookedEvm<'_> {
    /// Run a call, delivering every instruction to the attached sink
    pub fn run_call(&mut self, params: CallParams) -> Result<CallOutcome, EvmError> {
        self.evm.call_inner(params, Some(&mut *self.sink))
    }
}

struct SubCall {
    code_address: Address,
    address: Address,
    caller: Address,
    value: U256,
    input: Vec<u8>,
    is_static: bool,
    transfers_value: bool,
}

// All but 1/64th of the remaining gas, per the EIP-150 rule
fn gas_sent(gas_remaining: u64) -> u64 {
    gas_remaining - gas_remaining / 64
}

fn gas_cost(opcode: u8) -> u64 {
    match opcode {
        0x00 | 0x58 | 0x59 | 0x5a | 0x5b => 2,
        0x50 | 0x5f..=0x9f => 3,
        0x0a => 10,
        0x20 => 30,
        0x31 | 0x3b | 0x3c | 0x3f => 100,
        0x54 => 2100,
        0x55 => 5000,
        0x5c | 0x5d => 100,
        0x56 => 8,
        0x57 => 10,
        0xa0..=0xa4 => 375,
        0xf0 | 0xf5 => 32000,
        0xf1 | 0xf2 | 0xf4 | 0xfa => 100,
        _ => 3,
    }
}

// Mark the code positions that are JUMPDEST and not inside push data
fn analyze_jumpdests(code: &[u8]) -> Vec<bool> {
    let mut dests = vec![false; code.len()];
    let mut i = 0;
    while i < code.len() {
        let op = code[i];
        if op == 0x5b {
            dests[i] = true;
        }
        if (0x60..=0x7f).contains(&op) {
            i += (op - 0x5f) as usize;
        }
        i += 1;
    }
    dests
}

fn checked_jump(jumpdests: &[bool], dest: U256) -> Result<usize, EvmError> {
    if dest >= U256::from(jumpdests.len()) {
        return Err(EvmError::InvalidJump(dest.low_u64()));
    }
    let dest = dest.low_u64() as usize;
    if !jumpdests[dest] {
        return Err(EvmError::InvalidJump(dest as u64));
    }
    Ok(dest)
}

fn write_call_output(
    memory: &mut Memory,
    out_offset: usize,
    out_size: usize,
    output: &[u8],
) -> Result<(), EvmError> {
    let n = out_size.min(output.len());
    if n > 0 {
        memory.store(out_offset, &output[..n])?;
    }
    Ok(())
}

fn copy_to_memory(
    memory: &mut Memory,
    dest: usize,
    source: &[u8],
    source_offset: U256,
    size: usize,
) -> Result<(), EvmError> {
    if size == 0 {
        return Ok(());
    }
    let mut chunk = vec![0_u8; size];
    if source_offset < U256::from(source.len()) {
        let offset = source_offset.low_u64() as usize;
        let n = (source.len() - offset).min(size);
        chunk[..n].copy_from_slice(&source[offset..offset + n]);
    }
    memory.store(dest, &chunk)
}

fn mem_index(value: U256) -> Result<usize, EvmError> {
    if value > U256::from(MAX_MEMORY_BYTES) {
        return Err(EvmError::MemoryLimit);
    }
    Ok(value.low_u64() as usize)
}

fn bool_word(value: bool) -> U256 {
    if value {
        U256::one()
    } else {
        U256::zero()
    }
}

fn word_from_address(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

fn address_from_word(value: U256) -> Address {
    let mut buf = [0_u8; 32];
    value.to_big_endian(&mut buf);
    Address::from_slice(&buf[12..])
}

fn h256_from_u256(value: U256) -> H256 {
    let mut buf = [0_u8; 32];
    value.to_big_endian(&mut buf);
    H256(buf)
}

// Simplified CREATE derivation: keccak(deployer || nonce) without RLP
fn create_address(deployer: Address, nonce: u64) -> Address {
    let mut buf = Vec::with_capacity(28);
    buf.extend_from_slice(deployer.as_bytes());
    buf.extend_from_slice(&nonce.to_be_bytes());
    Address::from_slice(&keccak256(&buf)[12..])
}

// Canonical CREATE2 derivation: keccak(0xff || deployer || salt || keccak(init))
fn create2_address(deployer: Address, salt: U256, init_code: &[u8]) -> Address {
    let mut buf = Vec::with_capacity(85);
    buf.push(0xff);
    buf.extend_from_slice(deployer.as_bytes());
    let mut salt_bytes = [0_u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    buf.extend_from_slice(&salt_bytes);
    buf.extend_from_slice(&keccak256(init_code));
    Address::from_slice(&keccak256(&buf)[12..])
}

fn wide_mod(value: U512, modulus: U256) -> U256 {
    if modulus.is_zero() {
        return U256::zero();
    }
    let reduced = value % U512::from(modulus);
    U256::try_from(reduced).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn deploy(evm: &mut Evm, address: Address, code: &str) {
        evm.state_mut()
            .put_code(address, Bytes::from_str(code).unwrap());
    }

    fn call(evm: &mut Evm, to: Address) -> Result<CallOutcome, EvmError> {
        evm.run_call(CallParams {
            caller: Address::zero(),
            to,
            value: U256::zero(),
            data: Vec::new(),
            gas_limit: 1_000_000,
        })
    }

    #[test]
    fn add_and_return() {
        let mut evm = Evm::new();
        let target = Address::repeat_byte(0x01);
        // PUSH1 2, PUSH1 3, ADD, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
        deploy(&mut evm, target, "0x600260030160005260206000f3");
        let out = call(&mut evm, target).unwrap();
        assert_eq!(U256::from_big_endian(&out.output), U256::from(5));
    }

    #[test]
    fn call_to_codeless_account_is_a_noop() {
        let mut evm = Evm::new();
        let out = call(&mut evm, Address::repeat_byte(0x02)).unwrap();
        assert!(out.output.is_empty());
        assert_eq!(out.gas_used, 0);
    }

    #[test]
    fn revert_carries_returndata() {
        let mut evm = Evm::new();
        let target = Address::repeat_byte(0x03);
        // PUSH1 0x2a, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, REVERT
        deploy(&mut evm, target, "0x602a60005260206000fd");
        let err = call(&mut evm, target).unwrap_err();
        match err {
            EvmError::Reverted(data) => {
                assert_eq!(U256::from_big_endian(&data), U256::from(0x2a));
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn infinite_loop_runs_out_of_gas() {
        let mut evm = Evm::new();
        let target = Address::repeat_byte(0x04);
        // JUMPDEST, PUSH1 0, JUMP
        deploy(&mut evm, target, "0x5b600056");
        let err = evm
            .run_call(CallParams {
                caller: Address::zero(),
                to: target,
                value: U256::zero(),
                data: Vec::new(),
                gas_limit: 10_000,
            })
            .unwrap_err();
        assert_eq!(err, EvmError::OutOfGas);
    }

    #[test]
    fn subcall_returns_data_to_caller() {
        let mut evm = Evm::new();
        let callee = Address::repeat_byte(0x05);
        // PUSH1 0x2a, PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
        deploy(&mut evm, callee, "0x602a60005260206000f3");
        let caller = Address::repeat_byte(0x06);
        // retSize 32, retOff 0, argsSize 0, argsOff 0, value 0,
        // PUSH20 callee, GAS, CALL, then return memory[0..32]
        let code = format!(
            "0x6020600060006000600073{}5af160206000f3",
            "0505050505050505050505050505050505050505"
        );
        deploy(&mut evm, caller, &code);
        let out = call(&mut evm, caller).unwrap();
        assert_eq!(U256::from_big_endian(&out.output), U256::from(0x2a));
    }

    #[test]
    fn create_installs_returned_code() {
        let mut evm = Evm::new();
        let factory = Address::repeat_byte(0x07);
        // CREATE with empty init code, store the address word, return it
        // PUSH1 0(size), PUSH1 0(offset), PUSH1 0(value), CREATE,
        // PUSH1 0, MSTORE, PUSH1 32, PUSH1 0, RETURN
        deploy(&mut evm, factory, "0x600060006000f060005260206000f3");
        let out = call(&mut evm, factory).unwrap();
        let created = address_from_word(U256::from_big_endian(&out.output));
        assert_ne!(created, Address::zero());
        assert_eq!(created, create_address(factory, 0));
    }

    struct Recorder {
        opcodes: Vec<u8>,
        abort_on: Option<u8>,
    }

    impl StepSink for Recorder {
        fn on_step(&mut self, step: &StepView<'_>) -> Result<(), crate::StepAbort> {
            self.opcodes.push(step.opcode);
            if self.abort_on == Some(step.opcode) {
                return Err(crate::StepAbort::new("flagged opcode"));
            }
            Ok(())
        }
    }

    #[test]
    fn hook_observes_every_step() {
        let mut evm = Evm::new();
        let target = Address::repeat_byte(0x08);
        // TIMESTAMP, POP, STOP
        deploy(&mut evm, target, "0x425000");
        let mut recorder = Recorder {
            opcodes: vec![],
            abort_on: None,
        };
        {
            let mut hooked = evm.hook(&mut recorder);
            hooked
                .run_call(CallParams {
                    caller: Address::zero(),
                    to: target,
                    value: U256::zero(),
                    data: Vec::new(),
                    gas_limit: 100_000,
                })
                .unwrap();
        }
        assert_eq!(recorder.opcodes, vec![0x42, 0x50, 0x00]);
        // the guard is gone, the evm runs unhooked again
        call(&mut evm, target).unwrap();
    }

    #[test]
    fn hook_abort_halts_the_call() {
        let mut evm = Evm::new();
        let target = Address::repeat_byte(0x09);
        deploy(&mut evm, target, "0x425000");
        let mut recorder = Recorder {
            opcodes: vec![],
            abort_on: Some(0x42),
        };
        let err = evm
            .hook(&mut recorder)
            .run_call(CallParams {
                caller: Address::zero(),
                to: target,
                value: U256::zero(),
                data: Vec::new(),
                gas_limit: 100_000,
            })
            .unwrap_err();
        assert_eq!(err, EvmError::Aborted("flagged opcode".to_string()));
        assert_eq!(recorder.opcodes, vec![0x42]);
    }
}
