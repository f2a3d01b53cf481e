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

use ethers::types::U256;
use opvet_types::PackedUserOperation;

/// Gas overheads charged to a user operation outside its own execution
#[derive(Clone, Copy, Debug)]
pub struct GasOverheads {
    /// The fixed intrinsic gas of any EVM transaction
    pub transaction_gas_overhead: U256,
    /// Buffer the entry point requires over the operation's own limits
    pub bundle_transaction_gas_buffer: U256,
    /// Calldata cost of a zero byte
    pub zero_byte: U256,
    /// Calldata cost of a non-zero byte
    pub non_zero_byte: U256,
}

impl Default for GasOverheads {
    fn default() -> Self {
        Self {
            transaction_gas_overhead: 21_000.into(),
            bundle_transaction_gas_buffer: 5_000.into(),
            zero_byte: 4.into(),
            non_zero_byte: 16.into(),
        }
    }
}

/// The minimum `preVerificationGas` an operation must declare: the fixed
/// transaction overheads plus the calldata cost of its nine fields.
///
/// Integer fields contribute their minimal big-endian encoding (zero is a
/// single zero byte); the packed gas words contribute their full 32 bytes.
pub fn calc_pre_verification_gas(op: &PackedUserOperation) -> U256 {
    let ov = GasOverheads::default();
    let call_data_cost = encoded_fields(op)
        .iter()
        .map(|&byte| {
            if byte == 0 {
                ov.zero_byte
            } else {
                ov.non_zero_byte
            }
        })
        .fold(U256::zero(), |acc, cost| acc + cost);

    ov.transaction_gas_overhead + ov.bundle_transaction_gas_buffer + call_data_cost
}

// The nine wire fields, concatenated in declaration order
fn encoded_fields(op: &PackedUserOperation) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(op.sender.as_bytes());
    bytes.extend_from_slice(&minimal_big_endian(op.nonce));
    bytes.extend_from_slice(&op.init_code);
    bytes.extend_from_slice(&op.call_data);
    bytes.extend_from_slice(op.account_gas_limits.as_bytes());
    bytes.extend_from_slice(&minimal_big_endian(op.pre_verification_gas));
    bytes.extend_from_slice(op.gas_fees.as_bytes());
    bytes.extend_from_slice(&op.paymaster_and_data);
    bytes.extend_from_slice(&op.signature);
    bytes
}

fn minimal_big_endian(value: U256) -> Vec<u8> {
    let mut buf = [0_u8; 32];
    value.to_big_endian(&mut buf);
    let first = buf.iter().position(|&b| b != 0).unwrap_or(31);
    buf[first..].to_vec()
}
