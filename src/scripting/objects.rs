//! Game library `wl` and the engine objects it hands out
//!
//! `Player` and `Field` are userdata tagged `(wl.game, Player)` and
//! `(wl.map, Field)`. They persist as a small field dump and come back
//! through the object restorer.

use std::any::Any;

use crate::runtime::gc::{Heap, HeapObject};
use crate::runtime::table::Table;
use crate::runtime::userdata::{field_int, ObjectTypes, ScriptObject};
use crate::runtime::value::{NativeRef, Value};
use crate::std::{NativeExport, StdModule};
use crate::vm::{NativeCtx, NativeReturn, VMError, VMResult};

/// Qualified name of the restorer native, first entry of the skip-list
pub const OBJECT_RESTORER_NAME: &str = "ObjectRestorer";

pub const OBJECT_RESTORER: NativeRef = NativeRef::new(OBJECT_RESTORER_NAME, native_restore);

const PLAYER_SEND_MESSAGE: NativeRef =
    NativeRef::new("wl.game.Player.send_message", native_player_send_message);

const FIELD_NEIGHBOUR: NativeRef = NativeRef::new("wl.map.Field.neighbour", native_field_neighbour);

/// The `wl` table
#[derive(Debug, Default, Clone, Copy)]
pub struct WlModule;

impl StdModule for WlModule {
    fn module_path(&self) -> Option<&'static str> {
        Some("wl")
    }

    fn exports(&self) -> Vec<NativeExport> {
        vec![
            NativeExport::new("Field", "wl.Field", native_field),
            NativeExport::new("Player", "wl.Player", native_player),
            NativeExport::new("players", "wl.players", native_players),
            NativeExport::new("send_message", "wl.send_message", native_send_message),
            NativeExport::new("time", "wl.time", native_time),
        ]
    }

    fn hidden(&self) -> Vec<NativeRef> {
        vec![OBJECT_RESTORER, PLAYER_SEND_MESSAGE, FIELD_NEIGHBOUR]
    }
}

/// Register every engine object type with its instantiator
pub fn register_types(types: &mut ObjectTypes) {
    types.register("wl.game", "Player", || Box::new(Player::default()));
    types.register("wl.map", "Field", || Box::new(Field::default()));
}

// ============================================================================
// Player
// ============================================================================

/// A player slot
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Player {
    pub number: u8,
}

impl ScriptObject for Player {
    fn module(&self) -> &'static str {
        "wl.game"
    }

    fn class(&self) -> &'static str {
        "Player"
    }

    fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        match key {
            "number" => Some(Value::Int(i64::from(self.number))),
            _ => None,
        }
    }

    fn method(
        &self,
        name: &str,
    ) -> Option<NativeRef> {
        match name {
            "send_message" => Some(PLAYER_SEND_MESSAGE),
            _ => None,
        }
    }

    fn persist(&self) -> Vec<(String, Value)> {
        vec![("number".to_string(), Value::Int(i64::from(self.number)))]
    }

    fn unpersist(
        &mut self,
        fields: &[(String, Value)],
    ) -> Result<(), String> {
        let number = field_int(fields, "number")?;
        self.number = u8::try_from(number).map_err(|_| format!("invalid player number {}", number))?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Field
// ============================================================================

/// Map coordinates
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub x: i32,
    pub y: i32,
}

impl ScriptObject for Field {
    fn module(&self) -> &'static str {
        "wl.map"
    }

    fn class(&self) -> &'static str {
        "Field"
    }

    fn get(
        &self,
        key: &str,
    ) -> Option<Value> {
        match key {
            "x" => Some(Value::Int(i64::from(self.x))),
            "y" => Some(Value::Int(i64::from(self.y))),
            _ => None,
        }
    }

    fn method(
        &self,
        name: &str,
    ) -> Option<NativeRef> {
        match name {
            "neighbour" => Some(FIELD_NEIGHBOUR),
            _ => None,
        }
    }

    fn persist(&self) -> Vec<(String, Value)> {
        vec![
            ("x".to_string(), Value::Int(i64::from(self.x))),
            ("y".to_string(), Value::Int(i64::from(self.y))),
        ]
    }

    fn unpersist(
        &mut self,
        fields: &[(String, Value)],
    ) -> Result<(), String> {
        let coord = |name: &str| {
            let v = field_int(fields, name)?;
            i32::try_from(v).map_err(|_| format!("coordinate {} out of range", v))
        };
        self.x = coord("x")?;
        self.y = coord("y")?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Allocate a `Player` userdata
pub fn new_player(
    heap: &mut Heap,
    number: u8,
) -> Value {
    Value::Userdata(heap.alloc(HeapObject::Userdata(Box::new(Player { number }))))
}

/// Allocate a `Field` userdata
pub fn new_field(
    heap: &mut Heap,
    x: i32,
    y: i32,
) -> Value {
    Value::Userdata(heap.alloc(HeapObject::Userdata(Box::new(Field { x, y }))))
}

fn check_object<'c, T: ScriptObject + 'static>(
    ctx: &'c NativeCtx<'_>,
    args: &[Value],
    n: usize,
    class: &str,
) -> VMResult<&'c T> {
    let object = match args.get(n - 1) {
        Some(Value::Userdata(id)) => ctx.heap.userdata(*id)?.as_any().downcast_ref::<T>(),
        _ => None,
    };
    object.ok_or_else(|| ctx.arg_error(n, &format!("{} expected", class)))
}

/// Player number from a `Player` object or a plain integer
fn check_player_number(
    ctx: &NativeCtx<'_>,
    args: &[Value],
    n: usize,
) -> VMResult<u8> {
    let number = match args.get(n - 1) {
        Some(Value::Userdata(_)) => return Ok(check_object::<Player>(ctx, args, n, "Player")?.number),
        _ => ctx.check_int(args, n)?,
    };
    let number = u8::try_from(number).map_err(|_| ctx.arg_error(n, "player number out of range"))?;
    if !ctx.host.player_numbers().contains(&number) {
        return Err(ctx.arg_error(n, &format!("player {} does not exist", number)));
    }
    Ok(number)
}

fn check_coord(
    ctx: &NativeCtx<'_>,
    args: &[Value],
    n: usize,
) -> VMResult<i32> {
    let v = ctx.check_int(args, n)?;
    i32::try_from(v).map_err(|_| ctx.arg_error(n, "coordinate out of range"))
}

// ============================================================================
// Natives
// ============================================================================

fn native_time(
    ctx: &mut NativeCtx<'_>,
    _args: Vec<Value>,
) -> VMResult<NativeReturn> {
    Ok(NativeReturn::one(ctx.host.gametime() as i64))
}

fn native_players(
    ctx: &mut NativeCtx<'_>,
    _args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let mut table = Table::new();
    for (i, number) in ctx.host.player_numbers().into_iter().enumerate() {
        let player = new_player(ctx.heap, number);
        table.set_int(i as i64 + 1, player);
    }
    Ok(NativeReturn::one(ctx.new_table(table)))
}

fn native_player(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let number = check_player_number(ctx, &args, 1)?;
    Ok(NativeReturn::one(new_player(ctx.heap, number)))
}

fn native_field(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let x = check_coord(ctx, &args, 1)?;
    let y = check_coord(ctx, &args, 2)?;
    Ok(NativeReturn::one(new_field(ctx.heap, x, y)))
}

fn deliver(
    ctx: &mut NativeCtx<'_>,
    player: u8,
    title: &str,
    body: &str,
) -> VMResult<NativeReturn> {
    ctx.host
        .send_message(player, title, body)
        .map_err(VMError::Runtime)?;
    Ok(NativeReturn::none())
}

/// `wl.send_message(player, title, body)`
fn native_send_message(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let player = check_player_number(ctx, &args, 1)?;
    let title = ctx.check_str(&args, 2)?;
    let body = ctx.check_str(&args, 3)?;
    deliver(ctx, player, &title, &body)
}

/// `player:send_message(title, body)`
fn native_player_send_message(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let player = check_object::<Player>(ctx, &args, 1, "Player")?.number;
    let title = ctx.check_str(&args, 2)?;
    let body = ctx.check_str(&args, 3)?;
    deliver(ctx, player, &title, &body)
}

/// `field:neighbour(dx, dy)`
fn native_field_neighbour(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let field = *check_object::<Field>(ctx, &args, 1, "Field")?;
    let dx = check_coord(ctx, &args, 2)?;
    let dy = check_coord(ctx, &args, 3)?;
    Ok(NativeReturn::one(new_field(
        ctx.heap,
        field.x.wrapping_add(dx),
        field.y.wrapping_add(dy),
    )))
}

/// 对象恢复器：`(module, class, fields)` → 新的引擎对象
///
/// 按类型标签查找注册的无参构造器，再交给该类型自己的字段恢复逻辑。
fn native_restore(
    ctx: &mut NativeCtx<'_>,
    args: Vec<Value>,
) -> VMResult<NativeReturn> {
    let module = ctx.check_str(&args, 1)?;
    let class = ctx.check_str(&args, 2)?;
    let fields_id = ctx.check_table(&args, 3)?;
    let fields: Vec<(String, Value)> = ctx
        .heap
        .table(fields_id)?
        .iter()
        .filter_map(|(k, v)| k.as_str().map(|k| (k.to_string(), v)))
        .collect();
    let object = ctx
        .types
        .restore(&module, &class, &fields)
        .map_err(VMError::Runtime)?;
    Ok(NativeReturn::one(Value::Userdata(
        ctx.heap.alloc(HeapObject::Userdata(object)),
    )))
}
