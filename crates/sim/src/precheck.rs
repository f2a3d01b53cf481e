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

use std::str::FromStr;

use anyhow::{anyhow, Context};
use arrayvec::ArrayVec;
use ethers::{
    types::{Address, Bytes, H256, U256},
    utils::hex,
};
use opvet_types::PackedUserOperation;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::gas::calc_pre_verification_gas;

const REQUIRED_FIELDS: [&str; 9] = [
    "sender",
    "nonce",
    "initCode",
    "callData",
    "accountGasLimits",
    "preVerificationGas",
    "gasFees",
    "paymasterAndData",
    "signature",
];

const VARIABLE_BYTE_FIELDS: [&str; 4] = ["initCode", "callData", "paymasterAndData", "signature"];
const WORD_FIELDS: [&str; 2] = ["accountGasLimits", "gasFees"];
const QUANTITY_FIELDS: [&str; 2] = ["nonce", "preVerificationGas"];

/// The outcome of the structural check on a loosely typed user operation
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureCheck {
    /// Whether the record is a well-formed operation with sufficient
    /// declared pre-verification gas
    pub is_valid: bool,
    /// Everything wrong with the record, human readable
    pub errors: Vec<String>,
}

/// Check that a loosely typed JSON record is a structurally valid
/// `PackedUserOperation`.
///
/// Every defect is reported; the check itself never fails. Simulation
/// requires this check to have passed first.
pub fn check_user_op_structure(value: &Value) -> StructureCheck {
    let Some(obj) = value.as_object() else {
        return StructureCheck {
            is_valid: false,
            errors: vec!["user operation must be a JSON object".to_string()],
        };
    };

    let mut errors: Vec<String> = Vec::new();
    for field in REQUIRED_FIELDS {
        if !obj.contains_key(field) {
            errors.push(format!("missing field {field}"));
        }
    }
    errors.extend(check_sender(obj));
    errors.extend(check_byte_fields(obj));
    errors.extend(check_word_fields(obj));
    errors.extend(check_quantity_fields(obj));

    // the gas floor is only meaningful once the shape checks pass
    if errors.is_empty() {
        match parse_user_op(value) {
            Ok(op) => {
                let required = calc_pre_verification_gas(&op);
                if op.pre_verification_gas < required {
                    errors.push(format!(
                        "preVerificationGas {} is below the required {}",
                        op.pre_verification_gas, required
                    ));
                }
            }
            Err(err) => errors.push(format!("{err:#}")),
        }
    }

    StructureCheck {
        is_valid: errors.is_empty(),
        errors,
    }
}

/// Materialize the typed operation from a record that passed
/// [`check_user_op_structure`].
pub fn parse_user_op(value: &Value) -> anyhow::Result<PackedUserOperation> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("user operation must be a JSON object"))?;
    Ok(PackedUserOperation {
        sender: Address::from_str(field_str(obj, "sender")?)
            .context("sender is not a valid address")?,
        nonce: parse_quantity(field(obj, "nonce")?)
            .ok_or_else(|| anyhow!("nonce must be an integer or 0x-prefixed hex"))?,
        init_code: parse_bytes(field_str(obj, "initCode")?)
            .ok_or_else(|| anyhow!("initCode must be 0x-prefixed hex of even length"))?,
        call_data: parse_bytes(field_str(obj, "callData")?)
            .ok_or_else(|| anyhow!("callData must be 0x-prefixed hex of even length"))?,
        account_gas_limits: parse_word(field_str(obj, "accountGasLimits")?)
            .ok_or_else(|| anyhow!("accountGasLimits must be exactly 32 bytes of hex"))?,
        pre_verification_gas: parse_quantity(field(obj, "preVerificationGas")?)
            .ok_or_else(|| anyhow!("preVerificationGas must be an integer or 0x-prefixed hex"))?,
        gas_fees: parse_word(field_str(obj, "gasFees")?)
            .ok_or_else(|| anyhow!("gasFees must be exactly 32 bytes of hex"))?,
        paymaster_and_data: parse_bytes(field_str(obj, "paymasterAndData")?)
            .ok_or_else(|| anyhow!("paymasterAndData must be 0x-prefixed hex of even length"))?,
        signature: parse_bytes(field_str(obj, "signature")?)
            .ok_or_else(|| anyhow!("signature must be 0x-prefixed hex of even length"))?,
    })
}

fn check_sender(obj: &Map<String, Value>) -> ArrayVec<String, 1> {
    let mut errors = ArrayVec::new();
    if let Some(sender) = obj.get("sender") {
        let ok = sender
            .as_str()
            .is_some_and(|s| Address::from_str(s).is_ok());
        if !ok {
            errors.push("sender must be a 20-byte hex address".to_string());
        }
    }
    errors
}

fn check_byte_fields(obj: &Map<String, Value>) -> ArrayVec<String, 4> {
    let mut errors = ArrayVec::new();
    for name in VARIABLE_BYTE_FIELDS {
        if let Some(value) = obj.get(name) {
            let ok = value.as_str().is_some_and(|s| parse_bytes(s).is_some());
            if !ok {
                errors.push(format!("{name} must be 0x-prefixed hex of even length"));
            }
        }
    }
    errors
}

fn check_word_fields(obj: &Map<String, Value>) -> ArrayVec<String, 2> {
    let mut errors = ArrayVec::new();
    for name in WORD_FIELDS {
        if let Some(value) = obj.get(name) {
            let ok = value.as_str().is_some_and(|s| parse_word(s).is_some());
            if !ok {
                errors.push(format!("{name} must be exactly 32 bytes of 0x-prefixed hex"));
            }
        }
    }
    errors
}

fn check_quantity_fields(obj: &Map<String, Value>) -> ArrayVec<String, 2> {
    let mut errors = ArrayVec::new();
    for name in QUANTITY_FIELDS {
        if let Some(value) = obj.get(name) {
            if parse_quantity(value).is_none() {
                errors.push(format!("{name} must be an integer or 0x-prefixed hex"));
            }
        }
    }
    errors
}

fn field<'a>(obj: &'a Map<String, Value>, name: &str) -> anyhow::Result<&'a Value> {
    obj.get(name).ok_or_else(|| anyhow!("missing field {name}"))
}

fn field_str<'a>(obj: &'a Map<String, Value>, name: &str) -> anyhow::Result<&'a str> {
    field(obj, name)?
        .as_str()
        .ok_or_else(|| anyhow!("field {name} must be a string"))
}

fn hex_body(s: &str) -> Option<&str> {
    s.strip_prefix("0x")
        .filter(|body| body.chars().all(|c| c.is_ascii_hexdigit()))
}

fn parse_bytes(s: &str) -> Option<Bytes> {
    let body = hex_body(s)?;
    if body.len() % 2 != 0 {
        return None;
    }
    hex::decode(body).ok().map(Bytes::from)
}

fn parse_word(s: &str) -> Option<H256> {
    let bytes = parse_bytes(s)?;
    (bytes.len() == 32).then(|| H256::from_slice(&bytes))
}

// Quantities accept JSON integers and 0x-hex; odd-length hex is fine here
fn parse_quantity(value: &Value) -> Option<U256> {
    match value {
        Value::Number(n) => n.as_u64().map(U256::from),
        Value::String(s) => {
            let body = hex_body(s)?;
            if body.is_empty() {
                return None;
            }
            U256::from_str_radix(body, 16).ok()
        }
        _ => None,
    }
}
