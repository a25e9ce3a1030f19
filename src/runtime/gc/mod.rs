//! 堆与垃圾回收器
//!
//! 所有可被脚本引用的对象都存放在一个分代索引 arena 中：
//! - 每个槽位带有 generation，释放后递增，旧的 [`ObjId`] 因此失效
//! - 回收采用显式的 mark-and-sweep，根由调用方给出（全局表）
//! - 只在两次宿主级 resume 之间回收，运行中的线程不在堆里

use std::sync::Arc;

use tracing::debug;

use crate::middle::Proto;
use crate::runtime::table::Table;
use crate::runtime::userdata::ScriptObject;
use crate::runtime::value::{ObjId, Value};
use crate::vm::errors::{VMError, VMResult};
use crate::vm::frames::Thread;

/// Script closure: prototype plus captured cells
#[derive(Debug, Clone)]
pub struct Closure {
    pub proto: Arc<Proto>,
    pub upvalues: Vec<ObjId>,
}

/// 堆对象
#[derive(Debug)]
pub enum HeapObject {
    Table(Table),
    Closure(Closure),
    Cell(Value),
    /// `None` while the thread is executing
    Thread(Option<Box<Thread>>),
    Userdata(Box<dyn ScriptObject>),
}

impl HeapObject {
    fn kind(&self) -> &'static str {
        match self {
            HeapObject::Table(_) => "table",
            HeapObject::Closure(_) => "function",
            HeapObject::Cell(_) => "cell",
            HeapObject::Thread(_) => "thread",
            HeapObject::Userdata(_) => "userdata",
        }
    }
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
    marked: bool,
}

/// GC statistics of one collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub live: usize,
    pub freed: usize,
}

/// 分代索引堆
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    allocated_since_collect: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配新对象
    pub fn alloc(
        &mut self,
        object: HeapObject,
    ) -> ObjId {
        self.live += 1;
        self.allocated_since_collect += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return ObjId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            object: Some(object),
            marked: false,
        });
        ObjId {
            index,
            generation: 0,
        }
    }

    pub fn alloc_table(
        &mut self,
        table: Table,
    ) -> ObjId {
        self.alloc(HeapObject::Table(table))
    }

    pub fn contains(
        &self,
        id: ObjId,
    ) -> bool {
        self.get(id).is_ok()
    }

    pub fn get(
        &self,
        id: ObjId,
    ) -> VMResult<&HeapObject> {
        match self.slots.get(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.object.as_ref().ok_or(VMError::Dangling(id))
            }
            _ => Err(VMError::Dangling(id)),
        }
    }

    pub fn get_mut(
        &mut self,
        id: ObjId,
    ) -> VMResult<&mut HeapObject> {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation => {
                slot.object.as_mut().ok_or(VMError::Dangling(id))
            }
            _ => Err(VMError::Dangling(id)),
        }
    }

    fn mismatch(
        id: ObjId,
        expected: &str,
        found: &HeapObject,
    ) -> VMError {
        VMError::Runtime(format!(
            "object {} is a {}, expected a {}",
            id,
            found.kind(),
            expected
        ))
    }

    pub fn table(
        &self,
        id: ObjId,
    ) -> VMResult<&Table> {
        match self.get(id)? {
            HeapObject::Table(t) => Ok(t),
            other => Err(Self::mismatch(id, "table", other)),
        }
    }

    pub fn table_mut(
        &mut self,
        id: ObjId,
    ) -> VMResult<&mut Table> {
        match self.get_mut(id)? {
            HeapObject::Table(t) => Ok(t),
            other => Err(Self::mismatch(id, "table", other)),
        }
    }

    pub fn closure(
        &self,
        id: ObjId,
    ) -> VMResult<&Closure> {
        match self.get(id)? {
            HeapObject::Closure(c) => Ok(c),
            other => Err(Self::mismatch(id, "function", other)),
        }
    }

    pub fn cell(
        &self,
        id: ObjId,
    ) -> VMResult<&Value> {
        match self.get(id)? {
            HeapObject::Cell(v) => Ok(v),
            other => Err(Self::mismatch(id, "cell", other)),
        }
    }

    pub fn set_cell(
        &mut self,
        id: ObjId,
        value: Value,
    ) -> VMResult<()> {
        match self.get_mut(id)? {
            HeapObject::Cell(v) => {
                *v = value;
                Ok(())
            }
            other => Err(Self::mismatch(id, "cell", other)),
        }
    }

    pub fn userdata(
        &self,
        id: ObjId,
    ) -> VMResult<&dyn ScriptObject> {
        match self.get(id)? {
            HeapObject::Userdata(u) => Ok(u.as_ref()),
            other => Err(Self::mismatch(id, "userdata", other)),
        }
    }

    /// Borrow a thread that is not currently executing
    pub fn thread(
        &self,
        id: ObjId,
    ) -> VMResult<Option<&Thread>> {
        match self.get(id)? {
            HeapObject::Thread(t) => Ok(t.as_deref()),
            other => Err(Self::mismatch(id, "thread", other)),
        }
    }

    pub fn thread_mut(
        &mut self,
        id: ObjId,
    ) -> VMResult<Option<&mut Thread>> {
        match self.get_mut(id)? {
            HeapObject::Thread(t) => Ok(t.as_deref_mut()),
            other => Err(Self::mismatch(id, "thread", other)),
        }
    }

    /// Take a thread out of the heap to run it
    pub fn take_thread(
        &mut self,
        id: ObjId,
    ) -> VMResult<Box<Thread>> {
        match self.get_mut(id)? {
            HeapObject::Thread(slot) => slot
                .take()
                .ok_or_else(|| VMError::Runtime("cannot resume non-suspended coroutine".to_string())),
            other => Err(Self::mismatch(id, "thread", other)),
        }
    }

    pub fn put_thread(
        &mut self,
        id: ObjId,
        thread: Box<Thread>,
    ) -> VMResult<()> {
        match self.get_mut(id)? {
            HeapObject::Thread(slot) => {
                *slot = Some(thread);
                Ok(())
            }
            other => Err(Self::mismatch(id, "thread", other)),
        }
    }

    /// 存活对象数量
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Allocations since the last collection
    pub fn allocated_since_collect(&self) -> usize {
        self.allocated_since_collect
    }

    /// 从给定根开始执行一次完整的 mark-and-sweep
    pub fn collect(
        &mut self,
        roots: &[Value],
    ) -> CollectStats {
        let mut worklist: Vec<ObjId> = roots.iter().filter_map(Value::obj_id).collect();
        while let Some(id) = worklist.pop() {
            let Some(slot) = self.slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation || slot.marked {
                continue;
            }
            slot.marked = true;
            let Some(object) = slot.object.as_ref() else {
                continue;
            };
            match object {
                HeapObject::Table(t) => {
                    worklist.extend(t.references().filter_map(Value::obj_id));
                    worklist.extend(t.key_references().filter_map(|k| k.obj_id()));
                }
                HeapObject::Closure(c) => worklist.extend(c.upvalues.iter().copied()),
                HeapObject::Cell(v) => worklist.extend(v.obj_id()),
                HeapObject::Thread(Some(t)) => worklist.extend(t.references()),
                HeapObject::Thread(None) | HeapObject::Userdata(_) => {}
            }
        }

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.live -= freed;
        self.allocated_since_collect = 0;
        debug!(live = self.live, freed, "garbage collected");
        CollectStats {
            live: self.live,
            freed,
        }
    }
}

#[cfg(test)]
mod tests;
