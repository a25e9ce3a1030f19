//! Script tables
//!
//! An array part for keys `1..=n` plus an insertion-ordered hash part. The
//! hash part never reorders, so `pairs` visits keys in the same order on
//! every peer.

use indexmap::IndexMap;

use crate::runtime::value::{KeyError, TableKey, Value};

#[derive(Debug, Clone, Default)]
pub struct Table {
    array: Vec<Value>,
    hash: IndexMap<TableKey, Value>,
    /// Hash entries set to nil but kept so traversal can continue past them
    tombstones: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(
        array: usize,
        hash: usize,
    ) -> Self {
        Self {
            array: Vec::with_capacity(array),
            hash: IndexMap::with_capacity(hash),
            tombstones: 0,
        }
    }

    fn array_index(
        &self,
        key: &TableKey,
    ) -> Option<usize> {
        match key {
            TableKey::Int(i) if *i >= 1 && (*i as u64) <= self.array.len() as u64 => {
                Some(*i as usize - 1)
            }
            _ => None,
        }
    }

    pub fn get(
        &self,
        key: &TableKey,
    ) -> Value {
        if let Some(idx) = self.array_index(key) {
            return self.array[idx].clone();
        }
        self.hash.get(key).cloned().unwrap_or(Value::Nil)
    }

    /// Lookup by script value; nil and NaN keys are simply absent
    pub fn get_value(
        &self,
        key: &Value,
    ) -> Value {
        match TableKey::from_value(key) {
            Ok(key) => self.get(&key),
            Err(_) => Value::Nil,
        }
    }

    pub fn get_str(
        &self,
        key: &str,
    ) -> Value {
        self.get(&TableKey::str(key))
    }

    pub fn get_int(
        &self,
        key: i64,
    ) -> Value {
        self.get(&TableKey::Int(key))
    }

    pub fn set(
        &mut self,
        key: TableKey,
        value: Value,
    ) {
        if let Some(idx) = self.array_index(&key) {
            self.array[idx] = value;
            if idx + 1 == self.array.len() {
                while matches!(self.array.last(), Some(Value::Nil)) {
                    self.array.pop();
                }
            }
            return;
        }

        if let TableKey::Int(i) = key {
            if i >= 1 && i as u64 == self.array.len() as u64 + 1 {
                if value.is_nil() {
                    self.remove_hash(&key);
                    return;
                }
                self.array.push(value);
                self.remove_hash(&key);
                self.migrate_from_hash();
                return;
            }
        }

        match self.hash.get_mut(&key) {
            Some(slot) => {
                if slot.is_nil() && !value.is_nil() {
                    self.tombstones -= 1;
                } else if !slot.is_nil() && value.is_nil() {
                    self.tombstones += 1;
                }
                *slot = value;
            }
            None => {
                if value.is_nil() {
                    return;
                }
                if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
                    self.compact();
                }
                self.hash.insert(key, value);
            }
        }
    }

    pub fn set_value(
        &mut self,
        key: &Value,
        value: Value,
    ) -> Result<(), KeyError> {
        let key = TableKey::from_value(key)?;
        self.set(key, value);
        Ok(())
    }

    pub fn set_str(
        &mut self,
        key: &str,
        value: Value,
    ) {
        self.set(TableKey::str(key), value);
    }

    pub fn set_int(
        &mut self,
        key: i64,
        value: Value,
    ) {
        self.set(TableKey::Int(key), value);
    }

    fn remove_hash(
        &mut self,
        key: &TableKey,
    ) {
        if let Some(old) = self.hash.shift_remove(key) {
            if old.is_nil() {
                self.tombstones -= 1;
            }
        }
    }

    /// Move `n+1, n+2, ...` from the hash part once the array reaches them
    fn migrate_from_hash(&mut self) {
        loop {
            let next = TableKey::Int(self.array.len() as i64 + 1);
            match self.hash.shift_remove(&next) {
                Some(Value::Nil) => {
                    self.tombstones -= 1;
                    break;
                }
                Some(value) => self.array.push(value),
                None => break,
            }
        }
    }

    /// Drop nil tombstones from the hash part
    pub fn compact(&mut self) {
        self.hash.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// Border used by `#`
    pub fn len(&self) -> usize {
        self.array.len()
    }

    pub fn is_empty(&self) -> bool {
        self.array.is_empty() && self.hash.len() == self.tombstones
    }

    /// Traversal step used by `next`
    ///
    /// `Err(())` means the key is not present in the table.
    #[allow(clippy::result_unit_err)]
    pub fn next(
        &self,
        key: &Value,
    ) -> Result<Option<(Value, Value)>, ()> {
        let start_array = match key {
            Value::Nil => 0,
            other => {
                let key = TableKey::from_value(other).map_err(|_| ())?;
                match self.array_index(&key) {
                    Some(idx) => idx + 1,
                    None => {
                        let pos = self.hash.get_index_of(&key).ok_or(())?;
                        return Ok(self.next_hash(pos + 1));
                    }
                }
            }
        };
        for (idx, value) in self.array.iter().enumerate().skip(start_array) {
            if !value.is_nil() {
                return Ok(Some((Value::Int(idx as i64 + 1), value.clone())));
            }
        }
        Ok(self.next_hash(0))
    }

    fn next_hash(
        &self,
        from: usize,
    ) -> Option<(Value, Value)> {
        (from..self.hash.len()).find_map(|i| {
            let (k, v) = self.hash.get_index(i)?;
            (!v.is_nil()).then(|| (k.to_value(), v.clone()))
        })
    }

    /// Insert at array position `pos` (1-based), shifting up
    pub fn insert(
        &mut self,
        pos: usize,
        value: Value,
    ) {
        if pos >= 1 && pos <= self.array.len() + 1 && !value.is_nil() {
            self.array.insert(pos - 1, value);
            self.migrate_from_hash();
        }
    }

    /// Remove array position `pos` (1-based), shifting down
    pub fn remove(
        &mut self,
        pos: usize,
    ) -> Value {
        if pos >= 1 && pos <= self.array.len() {
            let value = self.array.remove(pos - 1);
            while matches!(self.array.last(), Some(Value::Nil)) {
                self.array.pop();
            }
            value
        } else {
            Value::Nil
        }
    }

    /// Array part, including nil holes
    pub fn array(&self) -> &[Value] {
        &self.array
    }

    /// Live key/value pairs in traversal order
    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        let array = self
            .array
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nil())
            .map(|(i, v)| (Value::Int(i as i64 + 1), v.clone()));
        let hash = self
            .hash
            .iter()
            .filter(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.to_value(), v.clone()));
        array.chain(hash)
    }

    /// Hash part in insertion order, tombstones included
    pub fn hash_entries(&self) -> impl Iterator<Item = (&TableKey, &Value)> + '_ {
        self.hash.iter()
    }

    /// Rebuild a table from its array and raw hash parts
    ///
    /// Traversal order, nil holes and tombstones come back as they were.
    pub fn from_parts(
        array: Vec<Value>,
        hash: IndexMap<TableKey, Value>,
    ) -> Self {
        let tombstones = hash.values().filter(|v| v.is_nil()).count();
        Self {
            array,
            hash,
            tombstones,
        }
    }

    /// Every value and key, for the collector
    pub(crate) fn references(&self) -> impl Iterator<Item = &Value> + '_ {
        self.array.iter().chain(self.hash.values())
    }

    pub(crate) fn key_references(&self) -> impl Iterator<Item = &TableKey> + '_ {
        self.hash.keys()
    }
}
