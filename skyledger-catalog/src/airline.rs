use serde::{Deserialize, Serialize};
use skyledger_core::identity::AirlineOwners;
use skyledger_core::{Address, AirlineId, LedgerError, LedgerResult};
use std::collections::{BTreeMap, HashMap};

pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 32;

/// Placeholder logo reference used when an airline is registered without one.
pub const DEFAULT_LOGO_REF: &str = "QmZ9Nbn5Bfcf28p5Mn9Aobw2hvkW4ANxJJDBZdh5kUyQPm";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Airline {
    pub id: AirlineId,
    pub name: String,
    pub owner: Address,
    /// Opaque blob-store reference; never interpreted here.
    pub logo_ref: String,
}

/// Replacement values for `AirlineDirectory::edit`. A `None` logo keeps the
/// current one.
#[derive(Debug, Clone, Deserialize)]
pub struct AirlineUpdate {
    pub name: String,
    pub owner: Address,
    pub logo_ref: Option<String>,
}

/// Airlines keyed by id, with a name index that enforces uniqueness among the
/// airlines that currently exist.
#[derive(Debug, Clone, Default)]
pub struct AirlineDirectory {
    airlines: BTreeMap<AirlineId, Airline>,
    names: HashMap<String, AirlineId>,
    last_id: AirlineId,
}

impl AirlineDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the directory from persisted records.
    pub fn restore(records: Vec<Airline>, last_id: AirlineId) -> LedgerResult<Self> {
        let mut directory = Self {
            last_id,
            ..Self::default()
        };
        for airline in records {
            if airline.id == 0 || airline.id > last_id || directory.airlines.contains_key(&airline.id) {
                return Err(LedgerError::InvalidInput(format!(
                    "airline id {} is duplicated or outside the allocated range",
                    airline.id
                )));
            }
            directory.ensure_name_free(&airline.name)?;
            directory.names.insert(airline.name.clone(), airline.id);
            directory.airlines.insert(airline.id, airline);
        }
        Ok(directory)
    }

    pub fn add(&mut self, name: String, owner: Address, logo_ref: Option<String>) -> LedgerResult<AirlineId> {
        validate_name(&name)?;
        validate_owner(&owner)?;
        self.ensure_name_free(&name)?;

        self.last_id += 1;
        let id = self.last_id;
        self.names.insert(name.clone(), id);
        self.airlines.insert(
            id,
            Airline {
                id,
                name,
                owner,
                logo_ref: logo_ref.unwrap_or_else(|| DEFAULT_LOGO_REF.to_string()),
            },
        );
        Ok(id)
    }

    pub fn edit(&mut self, id: AirlineId, update: AirlineUpdate) -> LedgerResult<&Airline> {
        validate_name(&update.name)?;
        validate_owner(&update.owner)?;

        let current_name = self
            .airlines
            .get(&id)
            .map(|airline| airline.name.clone())
            .ok_or_else(|| not_found(id))?;

        if current_name != update.name {
            self.ensure_name_free(&update.name)?;
            self.names.remove(&current_name);
            self.names.insert(update.name.clone(), id);
        }

        let airline = self.airlines.get_mut(&id).ok_or_else(|| not_found(id))?;
        airline.name = update.name;
        airline.owner = update.owner;
        if let Some(logo_ref) = update.logo_ref {
            airline.logo_ref = logo_ref;
        }
        Ok(airline)
    }

    /// Removes the record and frees its name. Tickets are left untouched.
    pub fn remove(&mut self, id: AirlineId) -> LedgerResult<Airline> {
        let airline = self.airlines.remove(&id).ok_or_else(|| not_found(id))?;
        self.names.remove(&airline.name);
        Ok(airline)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn get(&self, id: AirlineId) -> Option<&Airline> {
        self.airlines.get(&id)
    }

    pub fn count(&self) -> usize {
        self.airlines.len()
    }

    /// Enumerates airlines by position in ascending id order.
    pub fn at(&self, index: usize) -> Option<&Airline> {
        self.airlines.values().nth(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Airline> {
        self.airlines.values()
    }

    pub fn last_id(&self) -> AirlineId {
        self.last_id
    }

    fn ensure_name_free(&self, name: &str) -> LedgerResult<()> {
        if self.exists(name) {
            Err(LedgerError::AlreadyExists(format!("airline name '{}'", name)))
        } else {
            Ok(())
        }
    }
}

impl AirlineOwners for AirlineDirectory {
    fn owner_of(&self, airline_id: AirlineId) -> Option<&Address> {
        self.airlines.get(&airline_id).map(|airline| &airline.owner)
    }

    fn owned_by(&self, address: &Address) -> Vec<AirlineId> {
        self.airlines
            .values()
            .filter(|airline| &airline.owner == address)
            .map(|airline| airline.id)
            .collect()
    }
}

fn validate_name(name: &str) -> LedgerResult<()> {
    let length = name.chars().count();
    if !(NAME_MIN_CHARS..=NAME_MAX_CHARS).contains(&length) {
        return Err(LedgerError::InvalidInput(format!(
            "airline name must be {}-{} characters, got {}",
            NAME_MIN_CHARS, NAME_MAX_CHARS, length
        )));
    }
    Ok(())
}

fn validate_owner(owner: &Address) -> LedgerResult<()> {
    if owner.is_blank() {
        return Err(LedgerError::InvalidInput("airline owner address is empty".to_string()));
    }
    Ok(())
}

fn not_found(id: AirlineId) -> LedgerError {
    LedgerError::NotFound(format!("airline {}", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn owner(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_airline_lifecycle() {
        let mut directory = AirlineDirectory::new();

        let id = directory
            .add("Test Airline".to_string(), owner("0x2"), Some("QmLogo".to_string()))
            .unwrap();
        assert_eq!(id, 1);
        assert!(directory.exists("Test Airline"));
        assert_eq!(directory.count(), 1);
        assert_eq!(directory.get(id).unwrap().logo_ref, "QmLogo");

        directory
            .edit(
                id,
                AirlineUpdate {
                    name: "New Airline Name".to_string(),
                    owner: owner("0x3"),
                    logo_ref: None,
                },
            )
            .unwrap();
        let airline = directory.get(id).unwrap();
        assert_eq!(airline.name, "New Airline Name");
        assert_eq!(airline.owner, owner("0x3"));
        assert_eq!(airline.logo_ref, "QmLogo");
        assert!(!directory.exists("Test Airline"));

        directory.remove(id).unwrap();
        assert_eq!(directory.count(), 0);
        assert!(!directory.exists("New Airline Name"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut directory = AirlineDirectory::new();
        directory.add("Test Airline".to_string(), owner("0x2"), None).unwrap();

        let result = directory.add("Test Airline".to_string(), owner("0x4"), None);

        assert!(matches!(result, Err(LedgerError::AlreadyExists(_))));
        assert_eq!(directory.count(), 1);
    }

    #[test]
    fn test_names_are_case_sensitive() {
        let mut directory = AirlineDirectory::new();
        directory.add("Test Airline".to_string(), owner("0x2"), None).unwrap();
        assert!(directory.add("test airline".to_string(), owner("0x2"), None).is_ok());
    }

    #[test]
    fn test_name_length_bounds() {
        let mut directory = AirlineDirectory::new();
        assert!(matches!(
            directory.add("AB".to_string(), owner("0x2"), None),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(matches!(
            directory.add("X".repeat(33), owner("0x2"), None),
            Err(LedgerError::InvalidInput(_))
        ));
        assert!(directory.add("ABC".to_string(), owner("0x2"), None).is_ok());
        assert!(directory.add("Y".repeat(32), owner("0x2"), None).is_ok());
        assert!(matches!(
            directory.add("Valid Name".to_string(), owner(" "), None),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_edit_checks_uniqueness_only_on_rename() {
        let mut directory = AirlineDirectory::new();
        let first = directory.add("First Air".to_string(), owner("0x1"), None).unwrap();
        directory.add("Second Air".to_string(), owner("0x2"), None).unwrap();

        let clash = directory.edit(
            first,
            AirlineUpdate {
                name: "Second Air".to_string(),
                owner: owner("0x1"),
                logo_ref: None,
            },
        );
        assert!(matches!(clash, Err(LedgerError::AlreadyExists(_))));
        assert_eq!(directory.get(first).unwrap().name, "First Air");

        let same_name = directory.edit(
            first,
            AirlineUpdate {
                name: "First Air".to_string(),
                owner: owner("0x9"),
                logo_ref: Some("QmNew".to_string()),
            },
        );
        assert!(same_name.is_ok());
        assert_eq!(directory.get(first).unwrap().owner, owner("0x9"));
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut directory = AirlineDirectory::new();
        let first = directory.add("First Air".to_string(), owner("0x1"), None).unwrap();
        directory.remove(first).unwrap();

        let second = directory.add("First Air".to_string(), owner("0x1"), None).unwrap();

        assert_eq!(second, first + 1);
        assert_eq!(directory.last_id(), second);
        assert_eq!(directory.get(second).unwrap().logo_ref, DEFAULT_LOGO_REF);
    }

    #[test]
    fn test_enumerate_by_index_follows_id_order() {
        let mut directory = AirlineDirectory::new();
        for name in ["Alpha Air", "Beta Air", "Gamma Air"] {
            directory.add(name.to_string(), owner("0x1"), None).unwrap();
        }
        directory.remove(2).unwrap();

        assert_eq!(directory.at(0).unwrap().name, "Alpha Air");
        assert_eq!(directory.at(1).unwrap().name, "Gamma Air");
        assert!(directory.at(2).is_none());
        assert_eq!(directory.owned_by(&owner("0x1")), vec![1, 3]);
    }

    #[test]
    fn test_restore_rejects_duplicate_names() {
        let records = vec![
            Airline { id: 1, name: "Dup Air".to_string(), owner: owner("0x1"), logo_ref: String::new() },
            Airline { id: 2, name: "Dup Air".to_string(), owner: owner("0x2"), logo_ref: String::new() },
        ];
        assert!(AirlineDirectory::restore(records, 2).is_err());
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let records = vec![
            Airline { id: 1, name: "First Air".to_string(), owner: owner("0x1"), logo_ref: String::new() },
            Airline { id: 1, name: "Second Air".to_string(), owner: owner("0x2"), logo_ref: String::new() },
        ];
        assert!(matches!(
            AirlineDirectory::restore(records, 2),
            Err(LedgerError::InvalidInput(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Rename(u8, u8),
        Remove(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Add),
            (1u8..8, 0u8..6).prop_map(|(id, name)| Op::Rename(id, name)),
            (1u8..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_names_stay_unique(ops in proptest::collection::vec(op(), 1..40)) {
            let mut directory = AirlineDirectory::new();
            for op in ops {
                let _ = match op {
                    Op::Add(n) => directory.add(format!("Airline {}", n), owner("0x1"), None).map(|_| ()),
                    Op::Rename(id, n) => directory
                        .edit(id as AirlineId, AirlineUpdate {
                            name: format!("Airline {}", n),
                            owner: owner("0x1"),
                            logo_ref: None,
                        })
                        .map(|_| ()),
                    Op::Remove(id) => directory.remove(id as AirlineId).map(|_| ()),
                };

                let mut seen = std::collections::HashSet::new();
                for airline in directory.iter() {
                    prop_assert!(seen.insert(airline.name.clone()));
                    prop_assert!(directory.exists(&airline.name));
                }
                prop_assert_eq!(seen.len(), directory.count());
            }
        }
    }
}
