//! Engine-backed script objects
//!
//! Userdata values wrap a [`ScriptObject`]. Each object type is tagged with
//! a `(module, class)` pair and registered in [`ObjectTypes`] with a
//! no-argument instantiator, so a savegame only needs the tag and a field
//! dump to bring the object back.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use crate::runtime::value::{NativeRef, Value};

/// Behaviour of an engine object exposed to scripts
pub trait ScriptObject: fmt::Debug {
    fn module(&self) -> &'static str;

    fn class(&self) -> &'static str;

    /// Property lookup, `obj.key`
    fn get(
        &self,
        key: &str,
    ) -> Option<Value>;

    /// Method lookup, `obj:name(...)`
    fn method(
        &self,
        name: &str,
    ) -> Option<NativeRef>;

    /// Fields written to a savegame
    fn persist(&self) -> Vec<(String, Value)>;

    /// Restore from fields produced by [`ScriptObject::persist`]
    fn unpersist(
        &mut self,
        fields: &[(String, Value)],
    ) -> Result<(), String>;

    fn as_any(&self) -> &dyn Any;
}

/// No-argument constructor used by the object restorer
pub type Instantiator = fn() -> Box<dyn ScriptObject>;

/// Registry of instantiable object types
#[derive(Default, Clone)]
pub struct ObjectTypes {
    types: BTreeMap<(String, String), Instantiator>,
}

impl ObjectTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        module: &str,
        class: &str,
        instantiator: Instantiator,
    ) {
        self.types
            .insert((module.to_string(), class.to_string()), instantiator);
    }

    pub fn contains(
        &self,
        module: &str,
        class: &str,
    ) -> bool {
        self.types
            .contains_key(&(module.to_string(), class.to_string()))
    }

    /// Instantiate `(module, class)` and restore its fields
    pub fn restore(
        &self,
        module: &str,
        class: &str,
        fields: &[(String, Value)],
    ) -> Result<Box<dyn ScriptObject>, String> {
        let instantiate = self
            .types
            .get(&(module.to_string(), class.to_string()))
            .ok_or_else(|| format!("unknown object type {}.{}", module, class))?;
        let mut object = instantiate();
        object.unpersist(fields)?;
        Ok(object)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl fmt::Debug for ObjectTypes {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_set()
            .entries(self.types.keys().map(|(m, c)| format!("{}.{}", m, c)))
            .finish()
    }
}

/// Find an integer field in a persisted field list
pub fn field_int(
    fields: &[(String, Value)],
    name: &str,
) -> Result<i64, String> {
    fields
        .iter()
        .find(|(k, _)| k == name)
        .and_then(|(_, v)| v.as_integer())
        .ok_or_else(|| format!("missing integer field '{}'", name))
}
