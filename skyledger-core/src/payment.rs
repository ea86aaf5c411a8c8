use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::{Address, Amount};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferPurpose {
    /// Buyer funds attached to a booking call.
    Payment,
    /// A leg's price paid out to the airline owner.
    Disbursement,
    /// Overpayment returned to the buyer.
    Change,
    /// Funds held by a destroyed instance released to the administrator.
    Release,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transfer {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    pub purpose: TransferPurpose,
}

impl Transfer {
    pub fn new(from: Address, to: Address, amount: Amount, purpose: TransferPurpose) -> Self {
        Self {
            from,
            to,
            amount,
            purpose,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("recipient {0} rejected the funds")]
    Rejected(Address),
    #[error("insufficient funds in {account}: needs {needed}, has {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("balance overflow for {0}")]
    Overflow(Address),
    #[error("rail unavailable: {0}")]
    Unavailable(String),
}

/// The value-transfer substrate. `settle` applies an ordered batch of
/// transfers as one unit: either every transfer lands or none does.
pub trait FundsRail: Send + Sync {
    fn settle(&self, batch: &[Transfer]) -> Result<(), TransferError>;

    fn balance_of(&self, account: &Address) -> Amount;

    /// Full balance table, for rails whose state the host must persist.
    /// External rails keep their own books and return `None`.
    fn export_balances(&self) -> Option<Vec<(Address, Amount)>> {
        None
    }
}

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<Address, Amount>,
    rejecting: HashSet<Address>,
}

/// In-process rail keeping balances in memory. Accounts can be flagged to
/// refuse incoming funds, which is how a hostile recipient is simulated.
#[derive(Debug, Default)]
pub struct BalanceBook {
    book: RwLock<Book>,
}

impl BalanceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances(balances: impl IntoIterator<Item = (Address, Amount)>) -> Self {
        let book = Book {
            balances: balances.into_iter().collect(),
            rejecting: HashSet::new(),
        };
        Self {
            book: RwLock::new(book),
        }
    }

    /// Mints funds into an account. Used to seed wallets.
    pub fn credit(&self, account: &Address, amount: Amount) -> Result<Amount, TransferError> {
        let mut book = self.write()?;
        let balance = book.balances.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::Overflow(account.clone()))?;
        Ok(*balance)
    }

    pub fn set_rejecting(&self, account: &Address, rejecting: bool) -> Result<(), TransferError> {
        let mut book = self.write()?;
        if rejecting {
            book.rejecting.insert(account.clone());
        } else {
            book.rejecting.remove(account);
        }
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Book>, TransferError> {
        self.book
            .write()
            .map_err(|_| TransferError::Unavailable("balance book lock poisoned".to_string()))
    }
}

impl FundsRail for BalanceBook {
    fn settle(&self, batch: &[Transfer]) -> Result<(), TransferError> {
        let mut book = self.write()?;
        // Work on a copy so a failure halfway through leaves nothing applied.
        let mut balances = book.balances.clone();

        for transfer in batch {
            if book.rejecting.contains(&transfer.to) {
                warn!(recipient = %transfer.to, "Recipient refused transfer");
                return Err(TransferError::Rejected(transfer.to.clone()));
            }

            let available = balances.get(&transfer.from).copied().unwrap_or(0);
            if available < transfer.amount {
                return Err(TransferError::InsufficientFunds {
                    account: transfer.from.clone(),
                    needed: transfer.amount,
                    available,
                });
            }
            balances.insert(transfer.from.clone(), available - transfer.amount);

            let target = balances.entry(transfer.to.clone()).or_insert(0);
            *target = target
                .checked_add(transfer.amount)
                .ok_or_else(|| TransferError::Overflow(transfer.to.clone()))?;
        }

        book.balances = balances;
        debug!(transfers = batch.len(), "Settled transfer batch");
        Ok(())
    }

    fn balance_of(&self, account: &Address) -> Amount {
        match self.book.read() {
            Ok(book) => book.balances.get(account).copied().unwrap_or(0),
            Err(poisoned) => poisoned
                .into_inner()
                .balances
                .get(account)
                .copied()
                .unwrap_or(0),
        }
    }

    fn export_balances(&self) -> Option<Vec<(Address, Amount)>> {
        let book = match self.book.read() {
            Ok(book) => book,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut balances: Vec<(Address, Amount)> = book
            .balances
            .iter()
            .map(|(account, amount)| (account.clone(), *amount))
            .collect();
        balances.sort();
        Some(balances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::new(s)
    }

    #[test]
    fn test_batch_moves_funds_through_escrow() {
        let rail = BalanceBook::with_balances([(addr("buyer"), 1_000)]);
        let batch = vec![
            Transfer::new(addr("buyer"), addr("ledger"), 700, TransferPurpose::Payment),
            Transfer::new(addr("ledger"), addr("airline"), 500, TransferPurpose::Disbursement),
            Transfer::new(addr("ledger"), addr("buyer"), 200, TransferPurpose::Change),
        ];

        rail.settle(&batch).unwrap();

        assert_eq!(rail.balance_of(&addr("buyer")), 500);
        assert_eq!(rail.balance_of(&addr("airline")), 500);
        assert_eq!(rail.balance_of(&addr("ledger")), 0);
    }

    #[test]
    fn test_rejected_recipient_aborts_whole_batch() {
        let rail = BalanceBook::with_balances([(addr("buyer"), 1_000)]);
        rail.set_rejecting(&addr("airline-2"), true).unwrap();
        let batch = vec![
            Transfer::new(addr("buyer"), addr("ledger"), 300, TransferPurpose::Payment),
            Transfer::new(addr("ledger"), addr("airline-1"), 100, TransferPurpose::Disbursement),
            Transfer::new(addr("ledger"), addr("airline-2"), 200, TransferPurpose::Disbursement),
        ];

        let result = rail.settle(&batch);

        assert_eq!(result, Err(TransferError::Rejected(addr("airline-2"))));
        assert_eq!(rail.balance_of(&addr("buyer")), 1_000);
        assert_eq!(rail.balance_of(&addr("airline-1")), 0);
        assert_eq!(rail.balance_of(&addr("ledger")), 0);
    }

    #[test]
    fn test_insufficient_funds() {
        let rail = BalanceBook::new();
        rail.credit(&addr("buyer"), 50).unwrap();
        let batch = vec![Transfer::new(
            addr("buyer"),
            addr("ledger"),
            80,
            TransferPurpose::Payment,
        )];

        assert!(matches!(
            rail.settle(&batch),
            Err(TransferError::InsufficientFunds { needed: 80, available: 50, .. })
        ));
        assert_eq!(rail.balance_of(&addr("buyer")), 50);
    }

    #[test]
    fn test_export_reflects_settled_balances() {
        let rail = BalanceBook::with_balances([(addr("buyer"), 100)]);
        rail.settle(&[Transfer::new(addr("buyer"), addr("owner"), 40, TransferPurpose::Disbursement)])
            .unwrap();

        assert_eq!(
            rail.export_balances(),
            Some(vec![(addr("buyer"), 60), (addr("owner"), 40)])
        );
    }
}
