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
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Reputation status for a factory or paymaster address
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReputationStatus {
    /// Address is not throttled or banned
    Ok,
    /// Address is throttled
    Throttled,
    /// Address is banned
    Banned,
}

impl Serialize for ReputationStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ReputationStatus::Ok => serializer.serialize_str("ok"),
            ReputationStatus::Throttled => serializer.serialize_str("throttled"),
            ReputationStatus::Banned => serializer.serialize_str("banned"),
        }
    }
}

impl<'de> Deserialize<'de> for ReputationStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "ok" => Ok(ReputationStatus::Ok),
            "throttled" => Ok(ReputationStatus::Throttled),
            "banned" => Ok(ReputationStatus::Banned),
            _ => Err(de::Error::custom(format!("Invalid reputation status {s}"))),
        }
    }
}

/// The reputation of an observed factory or paymaster
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationEntry {
    /// The entity's address
    pub address: Address,
    /// Number of operations seen involving this address
    pub ops_seen: u64,
    /// Number of those operations that failed validation rules
    pub ops_failed: u64,
    /// Status derived from `ops_failed` at the last update
    pub status: ReputationStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ReputationStatus::Throttled).unwrap(),
            "\"throttled\""
        );
        let parsed: ReputationStatus = serde_json::from_str("\"banned\"").unwrap();
        assert_eq!(parsed, ReputationStatus::Banned);
    }
}
