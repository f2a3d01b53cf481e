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

use ethers::types::{Address, H160};

/// The canonical ERC-4337 v0.7 entry point address.
///
/// `0x0000000071727De22E5E9d8BAf0edAc6f37da032`
pub const ENTRY_POINT_ADDRESS_V0_7: Address = H160([
    0x00, 0x00, 0x00, 0x00, 0x71, 0x72, 0x7d, 0xe2, 0x2e, 0x5e, 0x9d, 0x8b, 0xaf, 0x0e, 0xda,
    0xc6, 0xf3, 0x7d, 0xa0, 0x32,
]);

/// Selector of `IAccount.validateUserOp(PackedUserOperation,bytes32,uint256)`
pub const VALIDATE_USER_OP_SELECTOR: [u8; 4] = [0x19, 0x82, 0x2f, 0x7c];

/// Selector of `IPaymaster.validatePaymasterUserOp(PackedUserOperation,bytes32,uint256)`
pub const VALIDATE_PAYMASTER_USER_OP_SELECTOR: [u8; 4] = [0x52, 0xb7, 0x51, 0x2c];
