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

use anyhow::bail;
use parse_display::Display;
use serde::{Deserialize, Serialize};
use strum::EnumIter;

/// The kind of entity whose code is executing during validation
#[derive(
    Display, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, EnumIter, Serialize,
    Deserialize,
)]
#[display(style = "camelCase")]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    /// The smart account being validated
    Sender,
    /// The contract deploying the sender when `initCode` is present
    Factory,
    /// The contract sponsoring gas when `paymasterAndData` is present
    Paymaster,
    /// The entry point itself, used by callers that bypass the phased driver
    EntryPoint,
}

impl EntityKind {
    /// Get the string representation of the entity kind
    pub fn to_str(self) -> &'static str {
        match self {
            EntityKind::Sender => "sender",
            EntityKind::Factory => "factory",
            EntityKind::Paymaster => "paymaster",
            EntityKind::EntryPoint => "entryPoint",
        }
    }
}

impl FromStr for EntityKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sender" => Ok(EntityKind::Sender),
            "factory" => Ok(EntityKind::Factory),
            "paymaster" => Ok(EntityKind::Paymaster),
            "entryPoint" => Ok(EntityKind::EntryPoint),
            _ => bail!("Invalid entity kind: {s}"),
        }
    }
}
