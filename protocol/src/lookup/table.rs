//! The registry state: at most one record per key.
//!
//! Operations reach the table in per-block batches. Each batch goes through
//! three steps:
//!
//! 1. **Admissibility.** Create needs an absent key. Every other kind needs an
//!    existing record owned by the operation's owner. Anything else is
//!    dropped without a trace.
//! 2. **Conflict resolution.** Per key, the admissible operation with the
//!    highest weight wins. On equal weight the first one in the batch wins.
//! 3. **Application.** Winners are applied in key order.

use std::collections::btree_map::Entry as MapEntry;
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::error::LookupError;
use crate::codec::entry::{EntryKey, EntryValue};
use crate::operation::{Operation, OperationKind};

/// What the table knows about one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
    pub value: EntryValue,
    pub owner: String,
    /// Block of the creating operation or the most recent renewal.
    pub activation_block: u64,
}

/// Counts reported by [`LookupTable::apply_operations`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Operations handed in.
    pub received: usize,
    /// Operations that passed the admissibility check.
    pub admissible: usize,
    /// Winning operations that changed a record.
    pub applied: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LookupTable {
    records: HashMap<EntryKey, LookupRecord>,
    height: u64,
}

impl LookupTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a table from persisted records.
    pub fn from_records<I>(height: u64, records: I) -> Self
    where
        I: IntoIterator<Item = (EntryKey, LookupRecord)>,
    {
        Self {
            records: records.into_iter().collect(),
            height,
        }
    }

    // -- Reads --------------------------------------------------------------

    pub fn lookup(&self, key: &[u8]) -> Option<&EntryValue> {
        self.records.get(key).map(|r| &r.value)
    }

    pub fn lookup_owner(&self, key: &[u8]) -> Option<&str> {
        self.records.get(key).map(|r| r.owner.as_str())
    }

    pub fn lookup_record(&self, key: &[u8]) -> Option<&LookupRecord> {
        self.records.get(key)
    }

    pub fn lookup_activation_block(&self, key: &[u8]) -> Option<u64> {
        self.records.get(key).map(|r| r.activation_block)
    }

    /// All records owned by `owner`, ordered by key.
    pub fn entries_of_owner(&self, owner: &str) -> Vec<(EntryKey, LookupRecord)> {
        let mut entries: Vec<_> = self
            .records
            .iter()
            .filter(|(_, record)| record.owner == owner)
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EntryKey, &LookupRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // -- Height -------------------------------------------------------------

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn set_height(&mut self, height: u64) {
        self.height = height;
    }

    /// Drops every record and resets the height to zero.
    pub fn clear(&mut self) {
        self.records.clear();
        self.height = 0;
    }

    // -- Writes -------------------------------------------------------------

    /// Applies one block's worth of operations.
    ///
    /// Fails without touching any record if an operation belongs to a block
    /// at or below the current height.
    pub fn apply_operations(&mut self, ops: Vec<Operation>) -> Result<ApplySummary, LookupError> {
        if let Some(stale) = ops.iter().find(|op| op.block() <= self.height) {
            return Err(LookupError::InvariantViolated {
                block: stale.block(),
                height: self.height,
            });
        }

        let mut summary = ApplySummary {
            received: ops.len(),
            ..ApplySummary::default()
        };

        let mut winners: BTreeMap<EntryKey, Operation> = BTreeMap::new();
        for op in ops.into_iter().filter(|op| self.is_admissible(op)) {
            summary.admissible += 1;
            match winners.entry(op.key().to_vec()) {
                MapEntry::Vacant(slot) => {
                    slot.insert(op);
                }
                MapEntry::Occupied(mut slot) => {
                    if op.weight() > slot.get().weight() {
                        slot.insert(op);
                    }
                }
            }
        }

        for (key, op) in winners {
            if self.apply(key, op) {
                summary.applied += 1;
            }
        }
        Ok(summary)
    }

    /// Removes records whose validity window has closed, i.e. those with
    /// `activation_block + ttl <= height`. Returns how many were removed.
    pub fn prune_expired(&mut self, ttl: u64) -> usize {
        let height = self.height;
        let before = self.records.len();
        self.records
            .retain(|_, record| record.activation_block.saturating_add(ttl) > height);
        before - self.records.len()
    }

    fn is_admissible(&self, op: &Operation) -> bool {
        match (op.kind(), self.records.get(op.key())) {
            (OperationKind::Create { .. }, existing) => existing.is_none(),
            (_, Some(record)) => record.owner == op.owner(),
            (_, None) => false,
        }
    }

    /// Applies a single winning operation. Returns whether a record changed.
    fn apply(&mut self, key: EntryKey, op: Operation) -> bool {
        let block = op.block();
        let owner = op.owner().to_string();

        match op.kind().clone() {
            OperationKind::Create { value } => {
                if self.records.contains_key(&key) {
                    return false;
                }
                self.records.insert(
                    key,
                    LookupRecord {
                        value,
                        owner,
                        activation_block: block,
                    },
                );
                true
            }
            OperationKind::Update { value } => match self.owned_mut(&key, &owner) {
                Some(record) => {
                    record.value = value;
                    true
                }
                None => false,
            },
            OperationKind::Renew => match self.owned_mut(&key, &owner) {
                Some(record) => {
                    record.activation_block = block;
                    true
                }
                None => false,
            },
            OperationKind::TransferOwnership { new_owner } => match self.owned_mut(&key, &owner) {
                Some(record) => {
                    record.owner = new_owner;
                    true
                }
                None => false,
            },
            OperationKind::Delete { value } => {
                let matches = self
                    .records
                    .get(&key)
                    .is_some_and(|r| r.owner == owner && r.value == value);
                if matches {
                    self.records.remove(&key);
                }
                matches
            }
        }
    }

    fn owned_mut(&mut self, key: &[u8], owner: &str) -> Option<&mut LookupRecord> {
        self.records.get_mut(key).filter(|r| r.owner == owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = &[0xAB];

    fn ip(last: u8) -> EntryValue {
        EntryValue::Ipv4([10, 0, 0, last])
    }

    fn create(owner: &str, block: u64, weight: u64, value: EntryValue) -> Operation {
        Operation::new(KEY.to_vec(), owner, block, weight, OperationKind::Create { value })
    }

    fn update(owner: &str, block: u64, weight: u64, value: EntryValue) -> Operation {
        Operation::new(KEY.to_vec(), owner, block, weight, OperationKind::Update { value })
    }

    fn op(owner: &str, block: u64, kind: OperationKind) -> Operation {
        Operation::new(KEY.to_vec(), owner, block, 1, kind)
    }

    /// Table holding KEY -> ip(1) owned by alice, activated at block 1.
    fn seeded() -> LookupTable {
        let mut table = LookupTable::new();
        table.apply_operations(vec![create("alice", 1, 1, ip(1))]).unwrap();
        table.set_height(1);
        table
    }

    // -- admissibility ------------------------------------------------------

    #[test]
    fn create_on_empty_key() {
        let table = seeded();
        let record = table.lookup_record(KEY).unwrap();
        assert_eq!(record.value, ip(1));
        assert_eq!(record.owner, "alice");
        assert_eq!(record.activation_block, 1);
    }

    #[test]
    fn second_create_is_ignored() {
        let mut table = seeded();
        let summary = table.apply_operations(vec![create("bob", 2, 100, ip(2))]).unwrap();

        assert_eq!(summary.admissible, 0);
        assert_eq!(table.lookup(KEY), Some(&ip(1)));
        assert_eq!(table.lookup_owner(KEY), Some("alice"));
    }

    #[test]
    fn foreign_owner_cannot_touch_record() {
        let kinds = [
            OperationKind::Update { value: ip(9) },
            OperationKind::Renew,
            OperationKind::TransferOwnership {
                new_owner: "mallory".into(),
            },
            OperationKind::Delete { value: ip(1) },
        ];
        for kind in kinds {
            let mut table = seeded();
            let before = table.clone();
            let summary = table.apply_operations(vec![op("mallory", 2, kind)]).unwrap();
            assert_eq!(summary.admissible, 0);
            assert_eq!(table, before);
        }
    }

    #[test]
    fn operations_on_missing_key_are_dropped() {
        let mut table = LookupTable::new();
        let summary = table
            .apply_operations(vec![update("alice", 1, 1, ip(1))])
            .unwrap();
        assert_eq!(summary, ApplySummary { received: 1, admissible: 0, applied: 0 });
        assert!(table.is_empty());
    }

    // -- conflict resolution ------------------------------------------------

    #[test]
    fn higher_weight_wins_regardless_of_order() {
        let mut a = LookupTable::new();
        a.apply_operations(vec![create("alice", 1, 5, ip(1)), create("bob", 1, 9, ip(2))])
            .unwrap();
        let mut b = LookupTable::new();
        b.apply_operations(vec![create("bob", 1, 9, ip(2)), create("alice", 1, 5, ip(1))])
            .unwrap();

        assert_eq!(a.lookup_owner(KEY), Some("bob"));
        assert_eq!(a, b);
    }

    #[test]
    fn equal_weight_first_wins() {
        let mut table = LookupTable::new();
        let summary = table
            .apply_operations(vec![create("alice", 1, 5, ip(1)), create("bob", 1, 5, ip(2))])
            .unwrap();

        assert_eq!(summary.admissible, 2);
        assert_eq!(summary.applied, 1);
        assert_eq!(table.lookup_owner(KEY), Some("alice"));
    }

    #[test]
    fn conflicts_are_resolved_per_key() {
        let mut table = LookupTable::new();
        let other = Operation::new(
            b"other".to_vec(),
            "carol",
            1,
            1,
            OperationKind::Create { value: EntryValue::None },
        );
        let summary = table
            .apply_operations(vec![create("alice", 1, 5, ip(1)), other])
            .unwrap();
        assert_eq!(summary.applied, 2);
        assert_eq!(table.len(), 2);
    }

    // -- application --------------------------------------------------------

    #[test]
    fn update_rewrites_value() {
        let mut table = seeded();
        table.apply_operations(vec![update("alice", 2, 1, ip(7))]).unwrap();
        assert_eq!(table.lookup(KEY), Some(&ip(7)));
        assert_eq!(table.lookup_activation_block(KEY), Some(1));
    }

    #[test]
    fn renew_moves_activation_block() {
        let mut table = seeded();
        table.apply_operations(vec![op("alice", 4, OperationKind::Renew)]).unwrap();
        assert_eq!(table.lookup_activation_block(KEY), Some(4));
    }

    #[test]
    fn transfer_changes_owner() {
        let mut table = seeded();
        table
            .apply_operations(vec![op(
                "alice",
                2,
                OperationKind::TransferOwnership { new_owner: "bob".into() },
            )])
            .unwrap();
        assert_eq!(table.lookup_owner(KEY), Some("bob"));
        assert_eq!(table.entries_of_owner("alice"), Vec::new());
        assert_eq!(table.entries_of_owner("bob").len(), 1);
    }

    #[test]
    fn delete_requires_matching_value() {
        let mut table = seeded();
        let summary = table
            .apply_operations(vec![op("alice", 2, OperationKind::Delete { value: ip(2) })])
            .unwrap();
        assert_eq!(summary.applied, 0);
        assert!(table.lookup(KEY).is_some());

        table
            .apply_operations(vec![op("alice", 3, OperationKind::Delete { value: ip(1) })])
            .unwrap();
        assert!(table.lookup(KEY).is_none());
    }

    #[test]
    fn stale_block_is_rejected_before_mutation() {
        let mut table = seeded();
        table.set_height(5);
        let before = table.clone();

        let result = table.apply_operations(vec![
            update("alice", 6, 1, ip(3)),
            update("alice", 5, 1, ip(4)),
        ]);
        assert_eq!(
            result,
            Err(LookupError::InvariantViolated { block: 5, height: 5 })
        );
        assert_eq!(table, before);
    }

    // -- expiry -------------------------------------------------------------

    #[test]
    fn expiry_window_is_half_open() {
        let mut table = LookupTable::new();
        table.apply_operations(vec![create("alice", 100, 1, ip(1))]).unwrap();

        table.set_height(109);
        assert_eq!(table.prune_expired(10), 0);
        assert!(table.lookup(KEY).is_some());

        table.set_height(110);
        assert_eq!(table.prune_expired(10), 1);
        assert!(table.lookup(KEY).is_none());
    }

    #[test]
    fn renewal_extends_lifetime() {
        let mut table = LookupTable::new();
        table.apply_operations(vec![create("alice", 100, 1, ip(1))]).unwrap();
        table.set_height(105);
        table.apply_operations(vec![op("alice", 106, OperationKind::Renew)]).unwrap();

        table.set_height(112);
        assert_eq!(table.prune_expired(10), 0);
        table.set_height(116);
        assert_eq!(table.prune_expired(10), 1);
    }

    // -- misc ---------------------------------------------------------------

    #[test]
    fn entries_of_owner_sorted_by_key() {
        let mut table = LookupTable::new();
        let ops = [b"zeta".to_vec(), b"alpha".to_vec(), b"mid".to_vec()]
            .into_iter()
            .map(|key| Operation::new(key, "alice", 1, 1, OperationKind::Create { value: EntryValue::None }))
            .collect();
        table.apply_operations(ops).unwrap();

        let keys: Vec<_> = table.entries_of_owner("alice").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![b"alpha".to_vec(), b"mid".to_vec(), b"zeta".to_vec()]);
    }

    #[test]
    fn clear_resets_everything() {
        let mut table = seeded();
        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.height(), 0);
    }
}
