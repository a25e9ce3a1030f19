//! Object graph writer and reader
//!
//! Objects get ids in first-encounter order and are registered before
//! their contents are written, so cycles come out as back-references.
//! Prototypes have their own id space.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use indexmap::IndexMap;

use crate::middle::bytecode::{read_str, read_want, write_str, write_want};
use crate::middle::{Capture, Constant, Instr, Proto};
use crate::runtime::gc::{Closure, HeapObject};
use crate::runtime::table::Table;
use crate::runtime::value::{ObjId, TableKey, Value};
use crate::scripting::errors::GameDataError;
use crate::scripting::objects::OBJECT_RESTORER;
use crate::scripting::persistence::skiplist::ExclusionMap;
use crate::vm::{CallFrame, LocalHost, NativeCtx, NativeReturn, PendingCall, Thread, ThreadStatus, VM};

const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_BACKREF: u8 = 6;
const TAG_EXTERNAL: u8 = 7;
const TAG_TABLE: u8 = 8;
const TAG_CLOSURE: u8 = 9;
const TAG_CELL: u8 = 10;
const TAG_THREAD: u8 = 11;
const TAG_USERDATA: u8 = 12;
const TAG_PROTO: u8 = 13;
const TAG_PROTO_REF: u8 = 14;

fn corrupt(message: impl Into<String>) -> GameDataError {
    GameDataError::persistence(message)
}

fn status_byte(status: ThreadStatus) -> u8 {
    match status {
        ThreadStatus::Suspended => 0,
        ThreadStatus::Running => 1,
        ThreadStatus::Normal => 2,
        ThreadStatus::Dead => 3,
    }
}

// ============================================================================
// Writer
// ============================================================================

pub(crate) struct Writer<'a> {
    vm: &'a VM,
    exclusions: &'a ExclusionMap,
    out: &'a mut Vec<u8>,
    objects: HashMap<ObjId, u32>,
    protos: HashMap<*const Proto, u32>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(
        vm: &'a VM,
        exclusions: &'a ExclusionMap,
        out: &'a mut Vec<u8>,
    ) -> Self {
        Self {
            vm,
            exclusions,
            out,
            objects: HashMap::new(),
            protos: HashMap::new(),
        }
    }

    /// Objects written so far
    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub(crate) fn value(
        &mut self,
        value: &Value,
    ) -> Result<(), GameDataError> {
        if let Some(placeholder) = self.exclusions.placeholder(value) {
            self.out.write_u8(TAG_EXTERNAL)?;
            self.out.write_u16::<LittleEndian>(placeholder)?;
            return Ok(());
        }
        match value {
            Value::Nil => self.out.write_u8(TAG_NIL)?,
            Value::Bool(false) => self.out.write_u8(TAG_FALSE)?,
            Value::Bool(true) => self.out.write_u8(TAG_TRUE)?,
            Value::Int(i) => {
                self.out.write_u8(TAG_INT)?;
                self.out.write_i64::<LittleEndian>(*i)?;
            }
            Value::Float(f) => {
                self.out.write_u8(TAG_FLOAT)?;
                self.out.write_u64::<LittleEndian>(f.to_bits())?;
            }
            Value::Str(s) => {
                self.out.write_u8(TAG_STRING)?;
                write_str(self.out, s)?;
            }
            Value::Native(native) => {
                return Err(corrupt(format!(
                    "cannot persist native function '{}'",
                    native.name
                )))
            }
            Value::Table(id)
            | Value::Function(id)
            | Value::Thread(id)
            | Value::Userdata(id)
            | Value::Cell(id) => self.object(*id)?,
        }
        Ok(())
    }

    fn object(
        &mut self,
        id: ObjId,
    ) -> Result<(), GameDataError> {
        if let Some(&index) = self.objects.get(&id) {
            self.out.write_u8(TAG_BACKREF)?;
            self.out.write_u32::<LittleEndian>(index)?;
            return Ok(());
        }
        let index = self.objects.len() as u32;
        self.objects.insert(id, index);

        let vm = self.vm;
        match vm.heap.get(id)? {
            HeapObject::Table(table) => {
                self.out.write_u8(TAG_TABLE)?;
                self.out.write_u32::<LittleEndian>(table.array().len() as u32)?;
                for value in table.array() {
                    self.value(value)?;
                }
                let entries: Vec<_> = table.hash_entries().collect();
                self.out.write_u32::<LittleEndian>(entries.len() as u32)?;
                for (key, value) in entries {
                    self.value(&key.to_value())?;
                    self.value(value)?;
                }
            }
            HeapObject::Closure(closure) => {
                self.out.write_u8(TAG_CLOSURE)?;
                self.proto(&closure.proto)?;
                self.out.write_u32::<LittleEndian>(closure.upvalues.len() as u32)?;
                for cell in &closure.upvalues {
                    self.value(&Value::Cell(*cell))?;
                }
            }
            HeapObject::Cell(value) => {
                self.out.write_u8(TAG_CELL)?;
                self.value(value)?;
            }
            HeapObject::Thread(None) => {
                return Err(corrupt("cannot persist a running coroutine"));
            }
            HeapObject::Thread(Some(thread)) => {
                self.out.write_u8(TAG_THREAD)?;
                self.thread(thread)?;
            }
            HeapObject::Userdata(object) => {
                let restorer = self
                    .exclusions
                    .native_placeholder(OBJECT_RESTORER.name)
                    .ok_or_else(|| corrupt("skip-list has no object restorer"))?;
                self.out.write_u8(TAG_USERDATA)?;
                self.out.write_u16::<LittleEndian>(restorer)?;
                write_str(self.out, object.module())?;
                write_str(self.out, object.class())?;
                let fields = object.persist();
                self.out.write_u32::<LittleEndian>(fields.len() as u32)?;
                for (name, value) in &fields {
                    write_str(self.out, name)?;
                    self.value(value)?;
                }
            }
        }
        Ok(())
    }

    fn thread(
        &mut self,
        thread: &Thread,
    ) -> Result<(), GameDataError> {
        self.out.write_u8(status_byte(thread.status))?;
        self.out.write_u8(u8::from(thread.yieldable))?;
        self.out.write_u32::<LittleEndian>(thread.multi as u32)?;
        match thread.pending {
            Some(pending) => {
                self.out.write_u8(1)?;
                self.out.write_u32::<LittleEndian>(pending.func_idx as u32)?;
                write_want(self.out, pending.want)?;
            }
            None => self.out.write_u8(0)?,
        }
        self.out.write_u32::<LittleEndian>(thread.stack.len() as u32)?;
        for value in &thread.stack {
            self.value(value)?;
        }
        self.out.write_u32::<LittleEndian>(thread.frames.len() as u32)?;
        for frame in &thread.frames {
            self.value(&Value::Function(frame.closure))?;
            self.out.write_u32::<LittleEndian>(frame.pc as u32)?;
            self.out.write_u32::<LittleEndian>(frame.base as u32)?;
            write_want(self.out, frame.want)?;
            self.out.write_u8(u8::from(frame.protected))?;
        }
        Ok(())
    }

    fn proto(
        &mut self,
        proto: &Arc<Proto>,
    ) -> Result<(), GameDataError> {
        if let Some(&index) = self.protos.get(&Arc::as_ptr(proto)) {
            self.out.write_u8(TAG_PROTO_REF)?;
            self.out.write_u32::<LittleEndian>(index)?;
            return Ok(());
        }
        self.out.write_u8(TAG_PROTO)?;
        write_str(self.out, &proto.name)?;
        write_str(self.out, &proto.chunk)?;
        self.out.write_u32::<LittleEndian>(proto.line)?;
        self.out.write_u16::<LittleEndian>(proto.num_params)?;
        self.out.write_u32::<LittleEndian>(proto.code.len() as u32)?;
        for instr in &proto.code {
            instr.write_to(self.out)?;
        }
        for line in &proto.lines {
            self.out.write_u32::<LittleEndian>(*line)?;
        }
        self.out.write_u32::<LittleEndian>(proto.constants.len() as u32)?;
        for constant in &proto.constants {
            constant.write_to(self.out)?;
        }
        self.out.write_u32::<LittleEndian>(proto.captures.len() as u32)?;
        for capture in &proto.captures {
            capture.write_to(self.out)?;
        }
        self.out.write_u32::<LittleEndian>(proto.protos.len() as u32)?;
        for child in &proto.protos {
            self.proto(child)?;
        }
        // children first, matching the reader
        let index = self.protos.len() as u32;
        self.protos.insert(Arc::as_ptr(proto), index);
        Ok(())
    }
}

// ============================================================================
// Reader
// ============================================================================

pub(crate) struct Reader<'a, 'd> {
    vm: &'a mut VM,
    exclusions: &'a ExclusionMap,
    input: &'a mut &'d [u8],
    objects: Vec<Value>,
    protos: Vec<Arc<Proto>>,
}

impl<'a, 'd> Reader<'a, 'd> {
    pub(crate) fn new(
        vm: &'a mut VM,
        exclusions: &'a ExclusionMap,
        input: &'a mut &'d [u8],
    ) -> Self {
        Self {
            vm,
            exclusions,
            input,
            objects: Vec::new(),
            protos: Vec::new(),
        }
    }

    pub(crate) fn object_count(&self) -> usize {
        self.objects.len()
    }

    fn count(&mut self) -> Result<usize, GameDataError> {
        let n = self.input.read_u32::<LittleEndian>()? as usize;
        // every element takes at least one byte
        if n > self.input.len() {
            return Err(corrupt(format!("count {} exceeds the remaining data", n)));
        }
        Ok(n)
    }

    fn register(
        &mut self,
        value: Value,
    ) -> usize {
        self.objects.push(value);
        self.objects.len() - 1
    }

    pub(crate) fn value(&mut self) -> Result<Value, GameDataError> {
        let tag = self.input.read_u8()?;
        let value = match tag {
            TAG_NIL => Value::Nil,
            TAG_FALSE => Value::Bool(false),
            TAG_TRUE => Value::Bool(true),
            TAG_INT => Value::Int(self.input.read_i64::<LittleEndian>()?),
            TAG_FLOAT => Value::Float(f64::from_bits(self.input.read_u64::<LittleEndian>()?)),
            TAG_STRING => Value::from(read_str(self.input)?),
            TAG_BACKREF => {
                let index = self.input.read_u32::<LittleEndian>()? as usize;
                self.objects
                    .get(index)
                    .cloned()
                    .ok_or_else(|| corrupt(format!("back-reference {} to an unknown object", index)))?
            }
            TAG_EXTERNAL => {
                let placeholder = self.input.read_u16::<LittleEndian>()?;
                self.exclusions.resolve(placeholder).map_err(corrupt)?
            }
            TAG_TABLE => self.table()?,
            TAG_CLOSURE => self.closure()?,
            TAG_CELL => {
                let id = self.vm.heap.alloc(HeapObject::Cell(Value::Nil));
                self.register(Value::Cell(id));
                let value = self.value()?;
                self.vm.heap.set_cell(id, value)?;
                Value::Cell(id)
            }
            TAG_THREAD => self.thread()?,
            TAG_USERDATA => self.userdata()?,
            other => return Err(corrupt(format!("unknown value tag {}", other))),
        };
        Ok(value)
    }

    fn key(&mut self) -> Result<TableKey, GameDataError> {
        let key = self.value()?;
        TableKey::from_value(&key).map_err(|e| corrupt(format!("invalid table key: {}", e)))
    }

    fn table(&mut self) -> Result<Value, GameDataError> {
        let id = self.vm.heap.alloc_table(Table::new());
        self.register(Value::Table(id));
        let array_len = self.count()?;
        let mut array = Vec::with_capacity(array_len);
        for _ in 0..array_len {
            array.push(self.value()?);
        }
        let hash_len = self.count()?;
        let mut hash = IndexMap::with_capacity(hash_len);
        for _ in 0..hash_len {
            let key = self.key()?;
            let value = self.value()?;
            hash.insert(key, value);
        }
        *self.vm.heap.table_mut(id)? = Table::from_parts(array, hash);
        Ok(Value::Table(id))
    }

    fn closure(&mut self) -> Result<Value, GameDataError> {
        let proto = self.proto()?;
        let id = self.vm.heap.alloc(HeapObject::Closure(Closure {
            proto: proto.clone(),
            upvalues: Vec::new(),
        }));
        self.register(Value::Function(id));
        let count = self.count()?;
        if count != proto.captures.len() {
            return Err(corrupt(format!(
                "closure of '{}' has {} upvalues, expected {}",
                proto.name,
                count,
                proto.captures.len()
            )));
        }
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            match self.value()? {
                Value::Cell(cell) => upvalues.push(cell),
                other => {
                    return Err(corrupt(format!(
                        "upvalue is a {} value, expected a cell",
                        other.type_name()
                    )))
                }
            }
        }
        if let HeapObject::Closure(closure) = self.vm.heap.get_mut(id)? {
            closure.upvalues = upvalues;
        }
        Ok(Value::Function(id))
    }

    fn thread(&mut self) -> Result<Value, GameDataError> {
        let id = self.vm.heap.alloc(HeapObject::Thread(None));
        self.register(Value::Thread(id));
        let status = match self.input.read_u8()? {
            0 => ThreadStatus::Suspended,
            3 => ThreadStatus::Dead,
            other => return Err(corrupt(format!("coroutine persisted in state {}", other))),
        };
        let yieldable = self.input.read_u8()? != 0;
        let multi = self.input.read_u32::<LittleEndian>()? as usize;
        let pending = match self.input.read_u8()? {
            0 => None,
            _ => Some(PendingCall {
                func_idx: self.input.read_u32::<LittleEndian>()? as usize,
                want: read_want(self.input)?,
            }),
        };
        let stack_len = self.count()?;
        let mut stack = Vec::with_capacity(stack_len);
        for _ in 0..stack_len {
            stack.push(self.value()?);
        }
        let frame_count = self.count()?;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            let closure = match self.value()? {
                Value::Function(closure) => closure,
                other => {
                    return Err(corrupt(format!(
                        "call frame runs a {} value",
                        other.type_name()
                    )))
                }
            };
            let proto = self.vm.heap.closure(closure)?.proto.clone();
            let pc = self.input.read_u32::<LittleEndian>()? as usize;
            let base = self.input.read_u32::<LittleEndian>()? as usize;
            let want = read_want(self.input)?;
            let protected = self.input.read_u8()? != 0;
            if pc > proto.code.len() || base >= stack.len() {
                return Err(corrupt(format!("call frame of '{}' is out of range", proto.name)));
            }
            frames.push(CallFrame {
                closure,
                proto,
                pc,
                base,
                want,
                protected,
            });
        }
        if pending.is_some_and(|p| p.func_idx > stack.len()) {
            return Err(corrupt("parked call is beyond the coroutine stack"));
        }
        let thread = Thread {
            status,
            stack,
            frames,
            pending,
            multi,
            yieldable,
        };
        if let HeapObject::Thread(slot) = self.vm.heap.get_mut(id)? {
            *slot = Some(Box::new(thread));
        }
        Ok(Value::Thread(id))
    }

    fn userdata(&mut self) -> Result<Value, GameDataError> {
        let placeholder = self.input.read_u16::<LittleEndian>()?;
        let restorer = match self.exclusions.resolve(placeholder).map_err(corrupt)? {
            Value::Native(native) => native,
            other => {
                return Err(corrupt(format!(
                    "object restorer is a {} value",
                    other.type_name()
                )))
            }
        };
        let index = self.register(Value::Nil);
        let module = read_str(self.input)?;
        let class = read_str(self.input)?;
        let count = self.count()?;
        let mut fields = Table::new();
        for _ in 0..count {
            let name = read_str(self.input)?;
            let value = self.value()?;
            fields.set_str(&name, value);
        }
        let fields = self.vm.heap.alloc_table(fields);

        let mut host = LocalHost::default();
        let globals = self.vm.globals();
        let mut ctx = NativeCtx {
            heap: &mut self.vm.heap,
            globals,
            host: &mut host,
            types: &self.vm.types,
            textdomains: &mut self.vm.textdomains,
            current: globals,
            active: &[],
            yieldable: false,
            position: None,
            name: restorer.name,
        };
        let args = vec![Value::from(module), Value::from(class), Value::Table(fields)];
        let restored = match (restorer.func)(&mut ctx, args)? {
            NativeReturn::Values(values) => values.into_iter().next(),
            _ => None,
        };
        match restored {
            Some(value @ Value::Userdata(_)) => {
                self.objects[index] = value.clone();
                Ok(value)
            }
            _ => Err(corrupt("object restorer returned no object")),
        }
    }

    fn proto(&mut self) -> Result<Arc<Proto>, GameDataError> {
        match self.input.read_u8()? {
            TAG_PROTO_REF => {
                let index = self.input.read_u32::<LittleEndian>()? as usize;
                return self
                    .protos
                    .get(index)
                    .cloned()
                    .ok_or_else(|| corrupt(format!("reference to unknown prototype {}", index)));
            }
            TAG_PROTO => {}
            other => return Err(corrupt(format!("expected a prototype, found tag {}", other))),
        }
        let name = read_str(self.input)?;
        let chunk: Arc<str> = Arc::from(read_str(self.input)?);
        let line = self.input.read_u32::<LittleEndian>()?;
        let num_params = self.input.read_u16::<LittleEndian>()?;
        let code_len = self.count()?;
        let code = (0..code_len)
            .map(|_| Instr::read_from(self.input))
            .collect::<io::Result<Vec<_>>>()?;
        let lines = (0..code_len)
            .map(|_| self.input.read_u32::<LittleEndian>())
            .collect::<io::Result<Vec<_>>>()?;
        let constant_count = self.count()?;
        let constants = (0..constant_count)
            .map(|_| Constant::read_from(self.input))
            .collect::<io::Result<Vec<_>>>()?;
        let capture_count = self.count()?;
        let captures = (0..capture_count)
            .map(|_| Capture::read_from(self.input))
            .collect::<io::Result<Vec<_>>>()?;
        let child_count = self.count()?;
        let mut protos = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            protos.push(self.proto()?);
        }
        let proto = Proto {
            name,
            chunk,
            line,
            num_params,
            code,
            lines,
            constants,
            protos,
            captures,
        };
        proto.validate().map_err(corrupt)?;
        let proto = Arc::new(proto);
        self.protos.push(proto.clone());
        Ok(proto)
    }
}
