//! Skip-list and exclusion map
//!
//! The skip-list names everything an environment dump must not contain:
//! the libraries and built-in functions every interpreter creates itself.
//! Each entry is written as its 1-based position, so the list is
//! append-only. Never reorder or remove an entry.

use std::collections::HashMap;

use crate::runtime::extfunc::NATIVES;
use crate::runtime::value::{ObjId, Value};
use crate::scripting::objects::OBJECT_RESTORER_NAME;
use crate::std::base::{IPAIRS_ITERATOR, PAIRS_ITERATOR};
use crate::vm::VM;

/// How a skip-list entry is found in a live interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipEntry {
    /// Value of a global
    Global(&'static str),
    /// Native without a global name, by qualified name
    Native(&'static str),
}

impl SkipEntry {
    pub fn name(&self) -> &'static str {
        match *self {
            SkipEntry::Global(name) | SkipEntry::Native(name) => name,
        }
    }
}

/// Versioned, ordered exclusion list
#[derive(Debug, Clone, Copy)]
pub struct SkipList {
    pub version: u16,
    pub entries: &'static [SkipEntry],
}

impl SkipList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The skip-list this build writes
pub static SKIPLIST: SkipList = SkipList {
    version: 1,
    entries: &[
        SkipEntry::Native(OBJECT_RESTORER_NAME),
        SkipEntry::Global("assert"),
        SkipEntry::Global("coroutine"),
        SkipEntry::Global("error"),
        SkipEntry::Global("include"),
        SkipEntry::Global("ipairs"),
        SkipEntry::Global("math"),
        SkipEntry::Global("next"),
        SkipEntry::Global("pairs"),
        SkipEntry::Global("pcall"),
        SkipEntry::Global("print"),
        SkipEntry::Global("select"),
        SkipEntry::Global("string"),
        SkipEntry::Global("table"),
        SkipEntry::Global("tonumber"),
        SkipEntry::Global("tostring"),
        SkipEntry::Global("type"),
        SkipEntry::Global("wl"),
        SkipEntry::Global("push_textdomain"),
        SkipEntry::Global("pop_textdomain"),
        SkipEntry::Global("_"),
        SkipEntry::Global("current_textdomain"),
        SkipEntry::Native(PAIRS_ITERATOR.name),
        SkipEntry::Native(IPAIRS_ITERATOR.name),
    ],
};

/// Identity of an excluded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Excluded {
    Object(ObjId),
    Native(&'static str),
}

fn identity(value: &Value) -> Option<Excluded> {
    match value {
        Value::Native(native) => Some(Excluded::Native(native.name)),
        other => other.obj_id().map(Excluded::Object),
    }
}

/// Skip-list entries resolved against one interpreter
#[derive(Debug)]
pub struct ExclusionMap {
    /// `values[i]` is placeholder `i + 1`; `None` when absent here
    values: Vec<Option<Value>>,
    names: Vec<&'static str>,
    index_of: HashMap<Excluded, u16>,
}

impl ExclusionMap {
    pub fn build(
        vm: &VM,
        skiplist: &SkipList,
    ) -> Self {
        let mut values = Vec::with_capacity(skiplist.len());
        let mut index_of = HashMap::new();
        for (i, entry) in skiplist.entries.iter().enumerate() {
            let value = match entry {
                SkipEntry::Global(name) => vm.global(name).ok().filter(|v| {
                    matches!(
                        v,
                        Value::Table(_) | Value::Native(_) | Value::Function(_) | Value::Userdata(_)
                    )
                }),
                SkipEntry::Native(name) => NATIVES.get(name).map(Value::Native),
            };
            if let Some(id) = value.as_ref().and_then(identity) {
                index_of.entry(id).or_insert(i as u16 + 1);
            }
            values.push(value);
        }
        Self {
            values,
            names: skiplist.entries.iter().map(SkipEntry::name).collect(),
            index_of,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Placeholder for `value`, if it is excluded
    pub fn placeholder(
        &self,
        value: &Value,
    ) -> Option<u16> {
        identity(value).and_then(|id| self.index_of.get(&id).copied())
    }

    /// Placeholder of a native by qualified name
    pub fn native_placeholder(
        &self,
        name: &'static str,
    ) -> Option<u16> {
        self.index_of.get(&Excluded::Native(name)).copied()
    }

    /// Value behind `placeholder`, 1-based
    pub fn resolve(
        &self,
        placeholder: u16,
    ) -> Result<Value, String> {
        let idx = (placeholder as usize)
            .checked_sub(1)
            .ok_or_else(|| "placeholder 0 is not valid".to_string())?;
        match self.values.get(idx) {
            Some(Some(value)) => Ok(value.clone()),
            Some(None) => Err(format!(
                "skip-list entry '{}' does not exist in this interpreter",
                self.names[idx]
            )),
            None => Err(format!("placeholder {} is beyond the skip-list", placeholder)),
        }
    }
}
