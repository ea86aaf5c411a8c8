use serde::{Deserialize, Serialize};
use skyledger_shared::LedgerEvent;
use tracing::info;

use crate::{Address, AirlineId, LedgerError, LedgerResult};

/// Anything that can answer "who owns airline N". Implemented by the airline
/// directory so guards here stay independent of its storage.
pub trait AirlineOwners {
    fn owner_of(&self, airline_id: AirlineId) -> Option<&Address>;

    /// Ids of every airline the address owns, ascending.
    fn owned_by(&self, address: &Address) -> Vec<AirlineId>;
}

/// Turns a presented credential (for instance a bearer token) into the
/// identity an operation runs as.
pub trait IdentityResolver: Send + Sync {
    fn resolve(&self, credential: &str) -> LedgerResult<Address>;
}

/// Holder of the single administrator identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    admin: Address,
}

impl AccessControl {
    pub fn new(admin: Address) -> Self {
        Self { admin }
    }

    pub fn admin(&self) -> &Address {
        &self.admin
    }

    pub fn is_admin(&self, caller: &Address) -> bool {
        &self.admin == caller
    }

    pub fn require_admin(&self, caller: &Address) -> LedgerResult<()> {
        if self.is_admin(caller) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized(format!(
                "{} is not the administrator",
                caller
            )))
        }
    }

    /// Hands administration to `new_admin`. Only the current administrator may
    /// do this.
    pub fn transfer_ownership(
        &mut self,
        caller: &Address,
        new_admin: Address,
    ) -> LedgerResult<LedgerEvent> {
        self.require_admin(caller)?;
        if new_admin.is_blank() {
            return Err(LedgerError::InvalidInput(
                "new administrator address is empty".to_string(),
            ));
        }

        let previous = std::mem::replace(&mut self.admin, new_admin);
        info!(previous = %previous, current = %self.admin, "Administrator changed");

        Ok(LedgerEvent::OwnershipTransferred {
            previous,
            current: self.admin.clone(),
        })
    }
}

/// Fails with `NotFound` for an unknown airline and `Unauthorized` when the
/// caller is not its recorded owner.
pub fn require_airline_owner(
    owners: &impl AirlineOwners,
    airline_id: AirlineId,
    caller: &Address,
) -> LedgerResult<()> {
    let owner = owners
        .owner_of(airline_id)
        .ok_or_else(|| LedgerError::NotFound(format!("airline {}", airline_id)))?;

    if owner == caller {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized(format!(
            "{} does not own airline {}",
            caller, airline_id
        )))
    }
}

/// What a given identity is allowed to manage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    AirlineOwner { airline_ids: Vec<AirlineId> },
    Customer,
}

impl Role {
    /// The administrator wins over airline ownership; anyone else is a customer.
    pub fn resolve(access: &AccessControl, owners: &impl AirlineOwners, address: &Address) -> Self {
        if access.is_admin(address) {
            return Role::Admin;
        }
        let airline_ids = owners.owned_by(address);
        if airline_ids.is_empty() {
            Role::Customer
        } else {
            Role::AirlineOwner { airline_ids }
        }
    }
}
