//! Per-faction cash bookkeeping with rollback of optimistic debits.

use log::debug;
use shared::{FactionId, StructureId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub cash: i64,
    /// Total spent on construction so far.
    pub construction: i64,
}

/// An optimistic debit that may still be rolled back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCost {
    pub faction: FactionId,
    pub cost: i64,
}

pub struct EconomyLedger {
    accounts: HashMap<FactionId, Account>,
    pending: HashMap<StructureId, PendingCost>,
    starting_cash: i64,
}

impl EconomyLedger {
    pub fn new(starting_cash: i64) -> Self {
        Self {
            accounts: HashMap::new(),
            pending: HashMap::new(),
            starting_cash,
        }
    }

    fn account_mut(&mut self, faction: FactionId) -> &mut Account {
        let starting_cash = self.starting_cash;
        self.accounts.entry(faction).or_insert(Account {
            cash: starting_cash,
            construction: 0,
        })
    }

    pub fn account(&self, faction: FactionId) -> Account {
        self.accounts.get(&faction).copied().unwrap_or(Account {
            cash: self.starting_cash,
            construction: 0,
        })
    }

    pub fn cash(&self, faction: FactionId) -> i64 {
        self.account(faction).cash
    }

    pub fn set_cash(&mut self, faction: FactionId, cash: i64) {
        self.account_mut(faction).cash = cash;
    }

    pub fn can_afford(&self, faction: FactionId, cost: i64) -> bool {
        self.cash(faction) >= cost
    }

    /// Debits `cost` for structure `id` and remembers it until committed.
    pub fn debit(&mut self, faction: FactionId, id: &StructureId, cost: i64) {
        let account = self.account_mut(faction);
        account.cash -= cost;
        account.construction += cost;
        self.pending.insert(id.clone(), PendingCost { faction, cost });
        debug!("Faction {} debited {} for {}", faction, cost, id);
    }

    /// Reverses a still-pending debit. Returns the refunded record.
    pub fn refund(&mut self, id: &StructureId) -> Option<PendingCost> {
        let record = self.pending.remove(id)?;
        let account = self.account_mut(record.faction);
        account.cash += record.cost;
        account.construction -= record.cost;
        debug!("Faction {} refunded {} for {}", record.faction, record.cost, id);
        Some(record)
    }

    /// Drops the pending record without touching cash.
    pub fn forget(&mut self, id: &StructureId) {
        self.pending.remove(id);
    }

    pub fn is_pending(&self, id: &StructureId) -> bool {
        self.pending.contains_key(id)
    }

    /// Confirms every pending debit. Returns how many were committed.
    pub fn commit_pending(&mut self) -> usize {
        let committed = self.pending.len();
        self.pending.clear();
        committed
    }
}
