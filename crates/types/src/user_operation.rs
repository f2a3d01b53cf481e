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

use ethers::{
    abi::{encode, Token},
    types::{Address, Bytes, H256, U256},
};
use serde::{Deserialize, Serialize};

/// Offset of the paymaster verification gas limit within `paymasterAndData`
const PAYMASTER_VERIFICATION_GAS_OFFSET: usize = 20;
/// Offset of the paymaster post-op gas limit within `paymasterAndData`
const PAYMASTER_POST_OP_GAS_OFFSET: usize = 36;
/// Offset of the paymaster-specific data within `paymasterAndData`
const PAYMASTER_DATA_OFFSET: usize = 52;

/// An ERC-4337 v0.7 user operation in its packed on-chain representation.
///
/// The packed form keeps the nine wire fields exactly as the entry point
/// consumes them; the accessors below unpack the composite fields.
/// `initCode` and `paymasterAndData` define the presence of the factory and
/// paymaster by length, not by value: an all-zero 20-byte prefix still
/// counts as a declared entity.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedUserOperation {
    /// The smart account sending the operation
    pub sender: Address,
    /// Semi-abstracted nonce: high 192 bits are the key, low 64 bits the
    /// sequence
    pub nonce: U256,
    /// Empty, or `factory (20 bytes) || factoryData`
    pub init_code: Bytes,
    /// Calldata for the execution phase
    pub call_data: Bytes,
    /// `verificationGasLimit (16 bytes) || callGasLimit (16 bytes)`
    pub account_gas_limits: H256,
    /// Gas to compensate the bundler for work outside the on-chain execution
    pub pre_verification_gas: U256,
    /// `maxPriorityFeePerGas (16 bytes) || maxFeePerGas (16 bytes)`
    pub gas_fees: H256,
    /// Empty, or `paymaster (20) || pmVerificationGasLimit (16) ||
    /// pmPostOpGasLimit (16) || paymasterData`
    pub paymaster_and_data: Bytes,
    /// Account signature over the operation
    pub signature: Bytes,
}

impl PackedUserOperation {
    /// The factory declared by `initCode`, if one is present
    pub fn factory(&self) -> Option<Address> {
        (self.init_code.len() >= 20).then(|| Address::from_slice(&self.init_code[..20]))
    }

    /// The factory-specific deploy calldata (empty when no factory)
    pub fn factory_data(&self) -> &[u8] {
        if self.init_code.len() >= 20 {
            &self.init_code[20..]
        } else {
            &[]
        }
    }

    /// The paymaster declared by `paymasterAndData`, if one is present
    pub fn paymaster(&self) -> Option<Address> {
        (self.paymaster_and_data.len() >= 20)
            .then(|| Address::from_slice(&self.paymaster_and_data[..20]))
    }

    /// The paymaster's verification gas limit (zero when absent)
    pub fn paymaster_verification_gas_limit(&self) -> U256 {
        self.paymaster_window(PAYMASTER_VERIFICATION_GAS_OFFSET)
    }

    /// The paymaster's post-op gas limit (zero when absent)
    pub fn paymaster_post_op_gas_limit(&self) -> U256 {
        self.paymaster_window(PAYMASTER_POST_OP_GAS_OFFSET)
    }

    /// The paymaster-specific data (empty when shorter than the fixed prefix)
    pub fn paymaster_data(&self) -> &[u8] {
        if self.paymaster_and_data.len() >= PAYMASTER_DATA_OFFSET {
            &self.paymaster_and_data[PAYMASTER_DATA_OFFSET..]
        } else {
            &[]
        }
    }

    /// The verification gas limit, from the high half of `accountGasLimits`
    pub fn verification_gas_limit(&self) -> U256 {
        high_half(self.account_gas_limits)
    }

    /// The call gas limit, from the low half of `accountGasLimits`
    pub fn call_gas_limit(&self) -> U256 {
        low_half(self.account_gas_limits)
    }

    /// The max priority fee per gas, from the high half of `gasFees`
    pub fn max_priority_fee_per_gas(&self) -> U256 {
        high_half(self.gas_fees)
    }

    /// The max fee per gas, from the low half of `gasFees`
    pub fn max_fee_per_gas(&self) -> U256 {
        low_half(self.gas_fees)
    }

    /// The nonce key (high 192 bits of `nonce`)
    pub fn nonce_key(&self) -> U256 {
        self.nonce >> 64
    }

    /// The nonce sequence (low 64 bits of `nonce`)
    pub fn nonce_sequence(&self) -> u64 {
        self.nonce.low_u64()
    }

    /// ABI-encode the operation as the 9-field `PackedUserOperation` tuple
    /// used in entry point calldata
    pub fn abi_encode(&self) -> Vec<u8> {
        encode(&[self.abi_token()])
    }

    /// The operation as an ABI tuple token, for embedding in larger calls
    pub fn abi_token(&self) -> Token {
        Token::Tuple(vec![
            Token::Address(self.sender),
            Token::Uint(self.nonce),
            Token::Bytes(self.init_code.to_vec()),
            Token::Bytes(self.call_data.to_vec()),
            Token::FixedBytes(self.account_gas_limits.as_bytes().to_vec()),
            Token::Uint(self.pre_verification_gas),
            Token::FixedBytes(self.gas_fees.as_bytes().to_vec()),
            Token::Bytes(self.paymaster_and_data.to_vec()),
            Token::Bytes(self.signature.to_vec()),
        ])
    }

    fn paymaster_window(&self, offset: usize) -> U256 {
        let mut buf = [0_u8; 16];
        for (i, byte) in buf.iter_mut().enumerate() {
            if let Some(b) = self.paymaster_and_data.get(offset + i) {
                *byte = *b;
            }
        }
        U256::from_big_endian(&buf)
    }
}

fn high_half(word: H256) -> U256 {
    U256::from_big_endian(&word.as_bytes()[..16])
}

fn low_half(word: H256) -> U256 {
    U256::from_big_endian(&word.as_bytes()[16..])
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn packed_word(high: u128, low: u128) -> H256 {
        let mut buf = [0_u8; 32];
        buf[..16].copy_from_slice(&high.to_be_bytes());
        buf[16..].copy_from_slice(&low.to_be_bytes());
        H256(buf)
    }

    #[test]
    fn factory_presence_is_by_length() {
        let mut op = PackedUserOperation::default();
        assert_eq!(op.factory(), None);

        // 19 bytes is too short to carry an address
        op.init_code = Bytes::from(vec![0xaa; 19]);
        assert_eq!(op.factory(), None);

        // an all-zero 20-byte prefix still declares a factory
        op.init_code = Bytes::from(vec![0x00; 20]);
        assert_eq!(op.factory(), Some(Address::zero()));

        let mut init_code = vec![0xaa; 20];
        init_code.extend_from_slice(&[0x12, 0x34, 0x56, 0x78, 0x90]);
        op.init_code = Bytes::from(init_code);
        assert_eq!(
            op.factory(),
            Some(Address::from_str("0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap())
        );
        assert_eq!(op.factory_data(), &[0x12, 0x34, 0x56, 0x78, 0x90]);
    }

    #[test]
    fn paymaster_fields_unpack() {
        let pm = Address::from_str("0x8abb13360b87be5eeb1b98647a016add927a136c").unwrap();
        let mut data = pm.as_bytes().to_vec();
        data.extend_from_slice(&200_000_u128.to_be_bytes());
        data.extend_from_slice(&40_000_u128.to_be_bytes());
        data.extend_from_slice(&[0xde, 0xad]);
        let op = PackedUserOperation {
            paymaster_and_data: Bytes::from(data),
            ..Default::default()
        };
        assert_eq!(op.paymaster(), Some(pm));
        assert_eq!(op.paymaster_verification_gas_limit(), U256::from(200_000));
        assert_eq!(op.paymaster_post_op_gas_limit(), U256::from(40_000));
        assert_eq!(op.paymaster_data(), &[0xde, 0xad]);
    }

    #[test]
    fn gas_words_split_into_halves() {
        let op = PackedUserOperation {
            account_gas_limits: packed_word(150_000, 21_000),
            gas_fees: packed_word(2_000_000_000, 120_000_000_000),
            ..Default::default()
        };
        assert_eq!(op.verification_gas_limit(), U256::from(150_000));
        assert_eq!(op.call_gas_limit(), U256::from(21_000));
        assert_eq!(op.max_priority_fee_per_gas(), U256::from(2_000_000_000_u64));
        assert_eq!(op.max_fee_per_gas(), U256::from(120_000_000_000_u64));
    }

    #[test]
    fn nonce_splits_into_key_and_sequence() {
        let op = PackedUserOperation {
            nonce: (U256::from(7) << 64) + U256::from(42),
            ..Default::default()
        };
        assert_eq!(op.nonce_key(), U256::from(7));
        assert_eq!(op.nonce_sequence(), 42);
    }

    #[test]
    fn abi_encoding_starts_with_tuple_offset() {
        let op = PackedUserOperation::default();
        let encoded = op.abi_encode();
        // head: a single offset word pointing at the tuple body
        assert_eq!(encoded[31], 0x20);
        // the packed op is word aligned
        assert_eq!(encoded.len() % 32, 0);
    }
}
