use serde::{Deserialize, Serialize};
use skyledger_shared::LedgerEvent;
use tracing::info;

use crate::identity::AccessControl;
use crate::{Address, LedgerError, LedgerResult};

/// Stable indirection to the live ledger instance. Callers resolve
/// `current` once and re-resolve on a `BackendChanged` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendRegistry {
    access: AccessControl,
    current: Address,
    /// Previously active instances, oldest first. Never pruned.
    history: Vec<Address>,
}

impl BackendRegistry {
    pub fn new(admin: Address, initial: Address) -> Self {
        Self {
            access: AccessControl::new(admin),
            current: initial,
            history: Vec::new(),
        }
    }

    /// Rebuilds a persisted registry.
    pub fn restore(admin: Address, current: Address, history: Vec<Address>) -> Self {
        Self {
            access: AccessControl::new(admin),
            current,
            history,
        }
    }

    pub fn current(&self) -> &Address {
        &self.current
    }

    pub fn history(&self) -> &[Address] {
        &self.history
    }

    pub fn admin(&self) -> &Address {
        self.access.admin()
    }

    pub fn require_admin(&self, caller: &Address) -> LedgerResult<()> {
        self.access.require_admin(caller)
    }

    pub fn change_backend(&mut self, caller: &Address, instance: Address) -> LedgerResult<LedgerEvent> {
        self.access.require_admin(caller)?;
        if instance.is_blank() {
            return Err(LedgerError::InvalidInput("instance reference is empty".to_string()));
        }

        let previous = std::mem::replace(&mut self.current, instance);
        self.history.push(previous.clone());
        info!(previous = %previous, current = %self.current, "Backend changed");

        Ok(LedgerEvent::BackendChanged {
            previous,
            current: self.current.clone(),
        })
    }

    pub fn transfer_ownership(&mut self, caller: &Address, new_admin: Address) -> LedgerResult<LedgerEvent> {
        self.access.transfer_ownership(caller, new_admin)
    }
}
