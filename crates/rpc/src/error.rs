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

use jsonrpsee_types::{ErrorObject, ErrorObjectOwned};
use opvet_sim::{SimulationResult, StructureCheck};
use opvet_types::{Violation, ViolationKind};

// Custom ERC-4337 error codes
const ENTRYPOINT_VALIDATION_REJECTED_CODE: i32 = -32500;
const PAYMASTER_VALIDATION_REJECTED_CODE: i32 = -32501;
const OPCODE_VIOLATION_CODE: i32 = -32502;
const INVALID_STORAGE_ACCESS_CODE: i32 = -32503;
const THROTTLED_CODE: i32 = -32504;
const BANNED_CODE: i32 = -32505;
const INVALID_SIGNATURE_CODE: i32 = -32506;
const INVALID_NONCE_CODE: i32 = -32507;

/// An admission rejection with its ERC-4337 error code
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationRpcError {
    /// The operation was rejected by the entry point's checks
    #[error("{0}")]
    EntryPointValidationRejected(String),
    /// The paymaster rejected the operation
    #[error("{0}")]
    PaymasterValidationRejected(String),
    /// A banned or entity-restricted opcode ran during validation
    #[error("{0}")]
    OpcodeViolation(Violation),
    /// A storage slot outside the entity's allowance was accessed
    #[error("{0}")]
    InvalidStorageAccess(Violation),
    /// The factory or paymaster is throttled
    #[error("{0}")]
    Throttled(String),
    /// The factory or paymaster is banned
    #[error("{0}")]
    Banned(String),
    /// The operation's signature failed verification
    #[error("invalid UserOp signature")]
    InvalidSignature,
    /// The operation's nonce was rejected
    #[error("invalid nonce")]
    InvalidNonce,
}

impl ValidationRpcError {
    /// The ERC-4337 error code of this rejection
    pub fn code(&self) -> i32 {
        match self {
            ValidationRpcError::EntryPointValidationRejected(_) => {
                ENTRYPOINT_VALIDATION_REJECTED_CODE
            }
            ValidationRpcError::PaymasterValidationRejected(_) => {
                PAYMASTER_VALIDATION_REJECTED_CODE
            }
            ValidationRpcError::OpcodeViolation(_) => OPCODE_VIOLATION_CODE,
            ValidationRpcError::InvalidStorageAccess(_) => INVALID_STORAGE_ACCESS_CODE,
            ValidationRpcError::Throttled(_) => THROTTLED_CODE,
            ValidationRpcError::Banned(_) => BANNED_CODE,
            ValidationRpcError::InvalidSignature => INVALID_SIGNATURE_CODE,
            ValidationRpcError::InvalidNonce => INVALID_NONCE_CODE,
        }
    }
}

impl From<ValidationRpcError> for ErrorObjectOwned {
    fn from(error: ValidationRpcError) -> Self {
        ErrorObject::owned(error.code(), error.to_string(), None::<()>)
    }
}

/// Map a failed structural check to its rejection. Structural defects are
/// entry point rejections.
pub fn classify_structure(check: &StructureCheck) -> Option<ValidationRpcError> {
    if check.is_valid {
        return None;
    }
    Some(ValidationRpcError::EntryPointValidationRejected(
        check.errors.join("; "),
    ))
}

/// Map a failed simulation to its highest-priority rejection.
///
/// Bans and throttles outrank rule violations, which outrank plain
/// execution errors; among violations the first observed of the winning
/// kind is reported.
pub fn classify_simulation(result: &SimulationResult) -> Option<ValidationRpcError> {
    if result.is_valid {
        return None;
    }
    if let Some(message) = find_marker(&result.errors, "is BANNED") {
        return Some(ValidationRpcError::Banned(message));
    }
    if let Some(message) = find_marker(&result.errors, "is THROTTLED") {
        return Some(ValidationRpcError::Throttled(message));
    }
    if let Some(violation) = result.violations.iter().find(|violation| {
        matches!(
            violation.kind(),
            ViolationKind::BannedOpcode | ViolationKind::EntityRestriction
        )
    }) {
        return Some(ValidationRpcError::OpcodeViolation(violation.clone()));
    }
    if let Some(violation) = result
        .violations
        .iter()
        .find(|violation| violation.kind() == ViolationKind::IllegalStorageAccess)
    {
        return Some(ValidationRpcError::InvalidStorageAccess(violation.clone()));
    }
    if let Some(message) = result
        .errors
        .iter()
        .find(|message| message.starts_with("paymaster"))
    {
        return Some(ValidationRpcError::PaymasterValidationRejected(
            message.clone(),
        ));
    }
    result
        .errors
        .first()
        .map(|message| ValidationRpcError::EntryPointValidationRejected(message.clone()))
}

fn find_marker(errors: &[String], marker: &str) -> Option<String> {
    errors
        .iter()
        .find(|message| message.contains(marker))
        .cloned()
}
