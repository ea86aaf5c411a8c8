use serde::{Deserialize, Serialize};

use crate::{LedgerError, LedgerResult};

/// Emergency-control state of a ledger instance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Active,
    Paused,
    /// Terminal.
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Active,
        }
    }

    pub fn restore(state: LifecycleState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Gate for airline, ticket and booking mutations.
    pub fn ensure_mutable(&self) -> LedgerResult<()> {
        match self.state {
            LifecycleState::Active => Ok(()),
            LifecycleState::Paused => Err(LedgerError::SystemPaused),
            LifecycleState::Destroyed => Err(destroyed()),
        }
    }

    /// Gate for the admin-only controls, which keep working while paused.
    pub fn ensure_live(&self) -> LedgerResult<()> {
        if self.state == LifecycleState::Destroyed {
            Err(destroyed())
        } else {
            Ok(())
        }
    }

    /// Active → Paused
    pub fn pause(&mut self) -> LedgerResult<()> {
        self.transition(LifecycleState::Active, LifecycleState::Paused)
    }

    /// Paused → Active
    pub fn unpause(&mut self) -> LedgerResult<()> {
        self.transition(LifecycleState::Paused, LifecycleState::Active)
    }

    /// Any live state → Destroyed
    pub fn destroy(&mut self) -> LedgerResult<()> {
        self.ensure_live()?;
        self.state = LifecycleState::Destroyed;
        Ok(())
    }

    fn transition(&mut self, from: LifecycleState, to: LifecycleState) -> LedgerResult<()> {
        if self.state != from {
            return Err(LedgerError::InvalidState(format!(
                "cannot move from {:?} to {:?}",
                self.state, to
            )));
        }
        self.state = to;
        Ok(())
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

fn destroyed() -> LedgerError {
    LedgerError::InvalidState("ledger instance has been destroyed".to_string())
}
