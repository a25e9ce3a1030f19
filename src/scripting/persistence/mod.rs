//! 全局环境的持久化
//!
//! Dumps the whole object graph reachable from the global table, which
//! includes every registered coroutine, and reads it back into a fresh
//! interpreter.
//!
//! # Blob layout (version 1)
//!
//! ```text
//! "LDPS"  version:u8  skiplist_version:u16  skiplist_len:u16  root value
//! ```
//!
//! Values reachable from the skip-list are written as placeholders and
//! re-linked against the reading interpreter's own libraries.

mod codec;
mod skiplist;

pub use skiplist::{ExclusionMap, SkipEntry, SkipList, SKIPLIST};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::debug;

use crate::runtime::value::{ObjId, Value};
use crate::scripting::errors::{GameDataError, VersionMismatchError};
use crate::vm::VM;

use codec::{Reader, Writer};

pub const MAGIC: &[u8; 4] = b"LDPS";
pub const BLOB_VERSION: u8 = 1;

/// Append the environment dump to `out`; returns the bytes written
pub fn persist(
    vm: &VM,
    skiplist: &SkipList,
    out: &mut Vec<u8>,
) -> Result<usize, GameDataError> {
    let start = out.len();
    let exclusions = ExclusionMap::build(vm, skiplist);
    out.extend_from_slice(MAGIC);
    out.write_u8(BLOB_VERSION)?;
    out.write_u16::<LittleEndian>(skiplist.version)?;
    out.write_u16::<LittleEndian>(skiplist.len() as u16)?;

    let mut writer = Writer::new(vm, &exclusions, out);
    writer.value(&Value::Table(vm.globals()))?;
    let objects = writer.object_count();
    let written = out.len() - start;
    debug!(objects, bytes = written, "environment written");
    Ok(written)
}

/// Rebuild an environment dump inside `vm` and return the new global table
///
/// `data` must hold exactly one dump. The caller installs the returned
/// table; `vm`'s current globals are not touched.
pub fn unpersist(
    vm: &mut VM,
    skiplist: &SkipList,
    data: &[u8],
) -> Result<ObjId, GameDataError> {
    let mut input = data;
    let mut magic = [0u8; 4];
    std::io::Read::read_exact(&mut input, &mut magic)?;
    if &magic != MAGIC {
        return Err(GameDataError::persistence("not an environment dump"));
    }
    let version = input.read_u8()?;
    if version != BLOB_VERSION {
        return Err(VersionMismatchError::new(
            "environment",
            u32::from(version),
            BLOB_VERSION.to_string(),
        )
        .into());
    }
    let list_version = input.read_u16::<LittleEndian>()?;
    let list_len = input.read_u16::<LittleEndian>()?;
    if list_version > skiplist.version || list_len as usize > skiplist.len() {
        return Err(VersionMismatchError::new(
            "skip-list",
            u32::from(list_version),
            format!(
                "up to {} with {} entries, blob has {}",
                skiplist.version,
                skiplist.len(),
                list_len
            ),
        )
        .into());
    }

    let exclusions = ExclusionMap::build(vm, skiplist);
    let mut reader = Reader::new(vm, &exclusions, &mut input);
    let root = reader.value()?;
    let objects = reader.object_count();
    if !input.is_empty() {
        return Err(GameDataError::persistence(format!(
            "{} bytes left after the environment",
            input.len()
        )));
    }
    match root {
        Value::Table(id) => {
            debug!(objects, bytes = data.len(), "environment read");
            Ok(id)
        }
        other => Err(GameDataError::persistence(format!(
            "environment root is a {} value",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests;
