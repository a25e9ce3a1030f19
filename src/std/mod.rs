//! Standard library
//!
//! This module contains the built-in functions scripts see as globals and
//! library tables. Each library is a [`StdModule`]; [`install`] writes all
//! of them into a VM's global table.

use crate::runtime::table::Table;
use crate::runtime::value::{NativeFn, NativeRef, Value};
use crate::vm::{VMResult, VM};

pub mod base;
pub mod coroutine;
pub mod math;
pub mod string;
pub mod table;

/// A function exported from a std module.
#[derive(Debug, Clone, Copy)]
pub struct NativeExport {
    /// Short name (e.g., "insert")
    pub short_name: &'static str,
    pub native: NativeRef,
}

impl NativeExport {
    pub const fn new(
        short_name: &'static str,
        qualified_name: &'static str,
        func: NativeFn,
    ) -> Self {
        Self {
            short_name,
            native: NativeRef::new(qualified_name, func),
        }
    }
}

/// A library of natives
pub trait StdModule {
    /// Global table the exports live in, `None` for plain globals
    fn module_path(&self) -> Option<&'static str>;

    fn exports(&self) -> Vec<NativeExport>;

    /// Non-function members such as `math.pi`
    fn constants(&self) -> Vec<(&'static str, Value)> {
        Vec::new()
    }

    /// Natives scripts can reach without a global name
    fn hidden(&self) -> Vec<NativeRef> {
        Vec::new()
    }
}

/// The language's own libraries
pub fn modules() -> Vec<Box<dyn StdModule>> {
    vec![
        Box::new(base::BaseModule),
        Box::new(string::StringModule),
        Box::new(table::TableModule),
        Box::new(math::MathModule),
        Box::new(coroutine::CoroutineModule),
    ]
}

/// Write one module into the globals
pub fn install_module(
    vm: &mut VM,
    module: &dyn StdModule,
) -> VMResult<()> {
    match module.module_path() {
        None => {
            for export in module.exports() {
                vm.set_global(export.short_name, Value::Native(export.native))?;
            }
            for (name, value) in module.constants() {
                vm.set_global(name, value)?;
            }
        }
        Some(path) => {
            let mut table = Table::new();
            for export in module.exports() {
                table.set_str(export.short_name, Value::Native(export.native));
            }
            for (name, value) in module.constants() {
                table.set_str(name, value);
            }
            let id = vm.heap.alloc_table(table);
            vm.set_global(path, Value::Table(id))?;
        }
    }
    Ok(())
}

/// Install every standard library into the globals
pub fn install(vm: &mut VM) -> VMResult<()> {
    for module in modules() {
        install_module(vm, module.as_ref())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests;
