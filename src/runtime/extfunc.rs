//! 原生函数注册表
//!
//! 按限定名（如 `string.format`、`pairs_iterator`）索引所有内建函数，
//! 包括没有全局名字的迭代器和对象方法。持久化层用它重新链接原生函数。

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::runtime::value::NativeRef;

/// 原生函数注册表
pub static NATIVES: Lazy<NativeRegistry> = Lazy::new(|| {
    let mut registry = NativeRegistry::new();
    registry.init_builtin();
    registry
});

/// 原生函数注册表类型
#[derive(Debug, Default)]
pub struct NativeRegistry {
    natives: HashMap<&'static str, NativeRef>,
}

impl NativeRegistry {
    /// 创建新的注册表
    pub fn new() -> Self {
        Self {
            natives: HashMap::new(),
        }
    }

    /// 注册原生函数
    pub fn register(
        &mut self,
        native: NativeRef,
    ) {
        self.natives.insert(native.name, native);
    }

    /// 按限定名查找
    pub fn get(
        &self,
        name: &str,
    ) -> Option<NativeRef> {
        self.natives.get(name).copied()
    }

    pub fn contains(
        &self,
        name: &str,
    ) -> bool {
        self.natives.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }

    /// 所有限定名，按字典序
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.natives.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// 注册标准库与游戏库的全部原生函数
    fn init_builtin(&mut self) {
        let modules = crate::std::modules()
            .into_iter()
            .chain(crate::scripting::modules());
        for module in modules {
            for export in module.exports() {
                self.register(export.native);
            }
            for native in module.hidden() {
                self.register(native);
            }
        }
    }
}
