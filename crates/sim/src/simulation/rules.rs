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

use ethers::types::{Address, H256};
use opvet_types::EntityKind;

/// Whether a storage access is allowed for the active entity
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum StorageRestriction {
    /// The access is within the entity's allowance
    Allowed,
    /// The access breaks the rules; the reason names entity, slot and owner
    Denied(String),
}

/// Everything the storage rules need to judge one `SLOAD`/`SSTORE`
#[derive(Debug, Clone, Copy)]
pub struct StorageRuleArgs {
    /// The entity whose phase is executing
    pub entity: EntityKind,
    /// The account whose storage is being accessed
    pub storage_owner: Address,
    /// The accessed slot
    pub slot: H256,
    /// The operation's sender
    pub sender: Address,
    /// The entry point address
    pub entry_point: Address,
    /// The declared factory, if any
    pub factory: Option<Address>,
    /// The declared paymaster, if any
    pub paymaster: Option<Address>,
}

/// Decide whether a storage access is allowed. First match wins:
///
/// 1. The entry point's own execution is unrestricted.
/// 2. Entry point storage is readable by anyone (deposits and stakes).
/// 3. The sender may use its own storage.
/// 4. The factory may use its own and the sender's storage (deployment
///    writes account state).
/// 5. The paymaster may use its own storage.
/// 6. Everything else is denied.
///
/// Associated-storage detection for mapping slots is deliberately not
/// implemented; ownership equality is the approximation.
pub fn get_storage_restriction(args: StorageRuleArgs) -> StorageRestriction {
    let StorageRuleArgs {
        entity,
        storage_owner,
        slot,
        sender,
        entry_point,
        factory,
        paymaster,
    } = args;

    let allowed = match entity {
        EntityKind::EntryPoint => true,
        _ if storage_owner == entry_point => true,
        EntityKind::Sender => storage_owner == sender,
        EntityKind::Factory => Some(storage_owner) == factory || storage_owner == sender,
        EntityKind::Paymaster => Some(storage_owner) == paymaster,
    };

    if allowed {
        StorageRestriction::Allowed
    } else {
        StorageRestriction::Denied(format!(
            "{entity} may not access storage of {storage_owner:?} at slot {slot:?}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(entity: EntityKind, storage_owner: Address) -> StorageRuleArgs {
        StorageRuleArgs {
            entity,
            storage_owner,
            slot: H256::zero(),
            sender: Address::repeat_byte(0x01),
            entry_point: Address::repeat_byte(0xee),
            factory: Some(Address::repeat_byte(0x02)),
            paymaster: Some(Address::repeat_byte(0x03)),
        }
    }

    fn is_allowed(entity: EntityKind, storage_owner: Address) -> bool {
        get_storage_restriction(args(entity, storage_owner)) == StorageRestriction::Allowed
    }

    #[test]
    fn entry_point_execution_is_unrestricted() {
        assert!(is_allowed(EntityKind::EntryPoint, Address::repeat_byte(0x99)));
    }

    #[test]
    fn entry_point_storage_is_readable_by_all() {
        for entity in [EntityKind::Sender, EntityKind::Factory, EntityKind::Paymaster] {
            assert!(is_allowed(entity, Address::repeat_byte(0xee)));
        }
    }

    #[test]
    fn sender_is_confined_to_its_own_storage() {
        assert!(is_allowed(EntityKind::Sender, Address::repeat_byte(0x01)));
        assert!(!is_allowed(EntityKind::Sender, Address::repeat_byte(0x02)));
    }

    #[test]
    fn factory_may_touch_factory_and_sender() {
        assert!(is_allowed(EntityKind::Factory, Address::repeat_byte(0x02)));
        assert!(is_allowed(EntityKind::Factory, Address::repeat_byte(0x01)));
        assert!(!is_allowed(EntityKind::Factory, Address::repeat_byte(0x03)));
    }

    #[test]
    fn paymaster_is_confined_to_its_own_storage() {
        assert!(is_allowed(EntityKind::Paymaster, Address::repeat_byte(0x03)));
        assert!(!is_allowed(EntityKind::Paymaster, Address::repeat_byte(0x01)));
    }

    #[test]
    fn denial_names_entity_slot_and_owner() {
        let restriction = get_storage_restriction(StorageRuleArgs {
            slot: H256::from_low_u64_be(7),
            ..args(EntityKind::Paymaster, Address::repeat_byte(0x42))
        });
        let StorageRestriction::Denied(reason) = restriction else {
            panic!("expected denial");
        };
        assert!(reason.contains("paymaster"), "{reason}");
        assert!(reason.contains("0x4242424242424242424242424242424242424242"), "{reason}");
        assert!(reason.contains("0007"), "{reason}");
    }

    #[test]
    fn rules_ignore_missing_participants() {
        let restriction = get_storage_restriction(StorageRuleArgs {
            factory: None,
            paymaster: None,
            ..args(EntityKind::Sender, Address::repeat_byte(0x05))
        });
        assert!(matches!(restriction, StorageRestriction::Denied(_)));
    }
}
