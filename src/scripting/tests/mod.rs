//! Scripting layer tests

use crate::game::MemoryFilesystem;
use crate::runtime::value::Value;
use crate::scripting::command::{richtext_escape, SCRIPT_ERROR_TITLE};
use crate::scripting::coroutine::REGISTRY_NAME;
use crate::scripting::{
    CommandOutcome, CommandQueue, CoroutineArg, CoroutineHandle, CoroutineStatus, Due,
    GameContext, GameController, GameDataError, MessageDelivery, ScheduledCoroutineCommand,
    ScriptEngineState, ScriptError,
};
use crate::util::config::ScriptingConfig;
use crate::vm::HostServices;

/// Game double with a scripted random stream
struct TestGame {
    time: u64,
    draws: Vec<u32>,
    players: Vec<u8>,
    delivered: Vec<(u8, String, String)>,
    speed: u32,
}

impl Default for TestGame {
    fn default() -> Self {
        Self {
            time: 0,
            draws: vec![7, 12, 3],
            players: vec![1, 2, 3],
            delivered: Vec::new(),
            speed: 1000,
        }
    }
}

impl HostServices for TestGame {
    fn random_u32(&mut self) -> u32 {
        if self.draws.is_empty() {
            0
        } else {
            self.draws.remove(0)
        }
    }

    fn gametime(&self) -> u64 {
        self.time
    }

    fn player_numbers(&self) -> Vec<u8> {
        self.players.clone()
    }

    fn send_message(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    ) -> Result<(), String> {
        self.deliver(player, title, body);
        Ok(())
    }
}

impl MessageDelivery for TestGame {
    fn player_slots(&self) -> Vec<u8> {
        self.players.clone()
    }

    fn deliver(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    ) {
        self.delivered
            .push((player, title.to_string(), body.to_string()));
    }
}

impl GameController for TestGame {
    fn desired_speed(&self) -> u32 {
        self.speed
    }

    fn set_desired_speed(
        &mut self,
        speed: u32,
    ) {
        self.speed = speed;
    }
}

#[derive(Default)]
struct VecQueue {
    ticks: Vec<(u64, ScheduledCoroutineCommand)>,
    wall: Vec<(u64, ScheduledCoroutineCommand)>,
}

impl CommandQueue for VecQueue {
    fn enqueue_at_tick(
        &mut self,
        tick: u64,
        command: ScheduledCoroutineCommand,
    ) {
        self.ticks.push((tick, command));
    }

    fn enqueue_at_walltime(
        &mut self,
        millis: u64,
        command: ScheduledCoroutineCommand,
    ) {
        self.wall.push((millis, command));
    }
}

fn engine_with(files: &[(&str, &str)]) -> ScriptEngineState {
    let mut fs = MemoryFilesystem::new();
    for (path, source) in files {
        fs.insert(*path, *source);
    }
    ScriptEngineState::new(&ScriptingConfig::default(), Box::new(fs)).unwrap()
}

/// Run `main.lua` and fetch `name` from its result table
fn entry(
    engine: &mut ScriptEngineState,
    game: &mut TestGame,
    name: &str,
) -> Value {
    let result = engine.run_script("main.lua", game).unwrap();
    engine.vm().heap.table(result).unwrap().get_str(name)
}

fn coroutine_for(
    src: &str,
    game: &mut TestGame,
) -> (ScriptEngineState, CoroutineHandle) {
    let mut engine = engine_with(&[("main.lua", src)]);
    let f = entry(&mut engine, game, "f");
    let handle = engine.new_coroutine(f).unwrap();
    (engine, handle)
}

fn execute(
    engine: &mut ScriptEngineState,
    queue: &mut VecQueue,
    game: &mut TestGame,
    handle: CoroutineHandle,
    wall_clock: u64,
) -> CommandOutcome {
    let command = ScheduledCoroutineCommand::new(Due::Tick(game.time), handle);
    let mut ctx = GameContext {
        engine,
        queue,
        game,
        wall_clock,
    };
    command.execute(&mut ctx).unwrap()
}

fn registry_len(engine: &ScriptEngineState) -> usize {
    let vm = engine.vm();
    match vm.global(REGISTRY_NAME).unwrap() {
        Value::Table(id) => vm.heap.table(id).unwrap().iter().count(),
        other => panic!("registry is a {}", other.type_name()),
    }
}

// ----------------------------------------------------------------------------
// Coroutine handle
// ----------------------------------------------------------------------------

#[test]
fn test_handle_arguments_and_pops() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        "return { f = function(who, n) coroutine.yield(who, n * 2, 'tail') end }",
        &mut game,
    );
    handle
        .push_arg(engine.vm_mut(), CoroutineArg::Str("alice".into()))
        .unwrap();
    handle
        .push_arg(engine.vm_mut(), CoroutineArg::Int(21))
        .unwrap();
    assert_eq!(handle.pending_args(), 2);

    let status = engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(status, CoroutineStatus::Suspended);
    assert_eq!(handle.pending_args(), 0);
    assert_eq!(handle.pending_returns(), 3);

    let vm = engine.vm_mut();
    assert_eq!(handle.pop_string(vm).unwrap(), "tail");
    assert_eq!(handle.pop_uint32(vm).unwrap(), 42);
    assert_eq!(handle.pop_string(vm).unwrap(), "alice");
    assert!(matches!(handle.pop_string(vm), Err(ScriptError::BadValue(_))));
}

#[test]
fn test_handle_pop_type_errors() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        "return { f = function() coroutine.yield(-1) coroutine.yield({}) end }",
        &mut game,
    );
    engine.resume(&mut handle, &mut game).unwrap();
    assert!(handle.pop_uint32(engine.vm_mut()).is_err());

    engine.resume(&mut handle, &mut game).unwrap();
    let table = handle.pop_table(engine.vm_mut()).unwrap();
    assert!(engine.vm().heap.table(table).unwrap().is_empty());
}

#[test]
fn test_game_objects_as_arguments() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        r#"return { f = function(p, field)
  local n = field:neighbour(1, -1)
  coroutine.yield(p.number, field.x + field.y, n.x, n.y)
end }"#,
        &mut game,
    );
    let vm = engine.vm_mut();
    handle.push_arg(vm, CoroutineArg::Player(2)).unwrap();
    handle
        .push_arg(vm, CoroutineArg::Coords { x: 10, y: 4 })
        .unwrap();
    engine.resume(&mut handle, &mut game).unwrap();

    let vm = engine.vm_mut();
    assert_eq!(handle.pop_uint32(vm).unwrap(), 3);
    assert_eq!(handle.pop_uint32(vm).unwrap(), 11);
    assert_eq!(handle.pop_uint32(vm).unwrap(), 14);
    assert_eq!(handle.pop_uint32(vm).unwrap(), 2);
}

#[test]
fn test_unpopped_returns_are_dropped_on_resume() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        "return { f = function() local x = coroutine.yield(1, 2) coroutine.yield(x) end }",
        &mut game,
    );
    engine.resume(&mut handle, &mut game).unwrap();
    handle.push_arg(engine.vm_mut(), CoroutineArg::Int(9)).unwrap();
    engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(handle.pending_returns(), 1);
    assert_eq!(handle.pop_uint32(engine.vm_mut()).unwrap(), 9);
}

#[test]
fn test_completed_status_is_stable() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for("return { f = function() return 5 end }", &mut game);
    assert_eq!(engine.resume(&mut handle, &mut game).unwrap(), CoroutineStatus::Completed);
    assert_eq!(handle.status(), CoroutineStatus::Completed);
    assert_eq!(handle.status(), CoroutineStatus::Completed);
    assert_eq!(handle.pop_uint32(engine.vm_mut()).unwrap(), 5);
    assert!(engine.resume(&mut handle, &mut game).is_err());
}

#[test]
fn test_error_marks_coroutine_completed() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) =
        coroutine_for("return { f = function() error('oops') end }", &mut game);
    let err = engine.resume(&mut handle, &mut game).unwrap_err();
    assert!(err.to_string().contains("oops"));
    assert_eq!(handle.status(), CoroutineStatus::Completed);
}

#[test]
fn test_registry_reuses_lowest_free_index() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[("main.lua", "return { f = function() end }")]);
    let f = entry(&mut engine, &mut game, "f");

    let a = engine.new_coroutine(f.clone()).unwrap();
    let b = engine.new_coroutine(f.clone()).unwrap();
    let c = engine.new_coroutine(f.clone()).unwrap();
    assert_eq!((a.registry_index(), b.registry_index(), c.registry_index()), (1, 2, 3));
    assert_eq!(registry_len(&engine), 3);

    b.release(engine.vm_mut()).unwrap();
    assert_eq!(registry_len(&engine), 2);
    let d = engine.new_coroutine(f).unwrap();
    assert_eq!(d.registry_index(), 2);
    a.release(engine.vm_mut()).unwrap();
    c.release(engine.vm_mut()).unwrap();
    d.release(engine.vm_mut()).unwrap();
    assert_eq!(registry_len(&engine), 0);
}

#[test]
fn test_registered_coroutine_survives_collection() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        "return { f = function() local t = { 'kept' } coroutine.yield() coroutine.yield(t[1]) end }",
        &mut game,
    );
    engine.resume(&mut handle, &mut game).unwrap();
    engine.collect_garbage();
    engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(handle.pop_string(engine.vm_mut()).unwrap(), "kept");
}

#[test]
fn test_textdomain_travels_with_coroutine() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) = coroutine_for(
        r#"return { f = function()
  push_textdomain("scenario")
  coroutine.yield(current_textdomain())
  coroutine.yield(current_textdomain())
  pop_textdomain()
  coroutine.yield(current_textdomain())
end }"#,
        &mut game,
    );
    engine.push_textdomain("engine");

    engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(handle.pop_string(engine.vm_mut()).unwrap(), "scenario");
    assert_eq!(handle.textdomains(), ["scenario".to_string()]);
    assert_eq!(engine.current_textdomain(), Some("engine"));

    engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(handle.pop_string(engine.vm_mut()).unwrap(), "scenario");

    engine.resume(&mut handle, &mut game).unwrap();
    assert_eq!(handle.pending_returns(), 1);
    assert!(handle.textdomains().is_empty());
    assert_eq!(engine.pop_textdomain().as_deref(), Some("engine"));
    assert_eq!(engine.current_textdomain(), None);
}

#[test]
fn test_pop_textdomain_on_empty_stack_fails() {
    let mut game = TestGame::default();
    let (mut engine, mut handle) =
        coroutine_for("return { f = function() pop_textdomain() end }", &mut game);
    let err = engine.resume(&mut handle, &mut game).unwrap_err();
    assert!(err.to_string().contains("textdomain stack is empty"));
}

// ----------------------------------------------------------------------------
// Scheduled command
// ----------------------------------------------------------------------------

#[test]
fn test_yield_reschedules_relative_to_gametime() {
    let mut game = TestGame {
        time: 100,
        ..TestGame::default()
    };
    let (mut engine, handle) =
        coroutine_for("return { f = function() coroutine.yield(50) end }", &mut game);
    let mut queue = VecQueue::default();

    let outcome = execute(&mut engine, &mut queue, &mut game, handle, 0);
    assert_eq!(outcome, CommandOutcome::Rescheduled(Due::Tick(150)));
    assert_eq!(queue.ticks.len(), 1);
    let (tick, command) = queue.ticks.pop().unwrap();
    assert_eq!(tick, 150);
    assert_eq!(command.due(), Due::Tick(150));
    assert_eq!(command.handle().pending_returns(), 0);

    let outcome = execute(&mut engine, &mut queue, &mut game, command.into_handle(), 0);
    assert_eq!(outcome, CommandOutcome::Completed);
    assert_eq!(registry_len(&engine), 0);
}

#[test]
fn test_float_delay_is_accepted() {
    let mut game = TestGame::default();
    let (mut engine, handle) =
        coroutine_for("return { f = function() coroutine.yield(2.0) end }", &mut game);
    let mut queue = VecQueue::default();
    let outcome = execute(&mut engine, &mut queue, &mut game, handle, 0);
    assert_eq!(outcome, CommandOutcome::Rescheduled(Due::Tick(2)));
}

#[test]
fn test_realtimedelta_uses_wall_clock() {
    let mut game = TestGame {
        time: 7,
        ..TestGame::default()
    };
    let (mut engine, handle) = coroutine_for(
        "return { f = function() coroutine.yield(250, 'realtimedelta') end }",
        &mut game,
    );
    let mut queue = VecQueue::default();
    let outcome = execute(&mut engine, &mut queue, &mut game, handle, 10_000);
    assert_eq!(outcome, CommandOutcome::Rescheduled(Due::WallClock(10_250)));
    assert_eq!(queue.wall.len(), 1);
    assert!(queue.ticks.is_empty());
}

#[test]
fn test_bad_yields_are_contained() {
    let shapes = [
        "coroutine.yield()",
        "coroutine.yield('soon')",
        "coroutine.yield(5, 'gametime')",
        "coroutine.yield(1, 2, 3)",
        "coroutine.yield(-4)",
    ];
    for shape in shapes {
        let mut game = TestGame::default();
        let src = format!("return {{ f = function() {} end }}", shape);
        let (mut engine, handle) = coroutine_for(&src, &mut game);
        let mut queue = VecQueue::default();

        let outcome = execute(&mut engine, &mut queue, &mut game, handle, 0);
        assert!(matches!(outcome, CommandOutcome::Errored(_)), "{}", shape);
        assert!(queue.ticks.is_empty() && queue.wall.is_empty(), "{}", shape);
        assert_eq!(game.speed, 0, "{}", shape);
        assert_eq!(registry_len(&engine), 0, "{}", shape);
        let slots: Vec<u8> = game.delivered.iter().map(|(p, _, _)| *p).collect();
        assert_eq!(slots, vec![1, 2, 3], "{}", shape);
        assert!(game.delivered.iter().all(|(_, title, _)| title == SCRIPT_ERROR_TITLE));
    }
}

#[test]
fn test_script_error_message_is_escaped() {
    let mut game = TestGame::default();
    let (mut engine, handle) = coroutine_for(
        "return { f = function() error('a < b & c') end }",
        &mut game,
    );
    let mut queue = VecQueue::default();
    match execute(&mut engine, &mut queue, &mut game, handle, 0) {
        CommandOutcome::Errored(message) => {
            assert!(message.contains("a < b & c"));
            assert_eq!(game.delivered[0].2, richtext_escape(&message));
            assert!(game.delivered[0].2.contains("a &lt; b &amp; c"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_richtext_escape() {
    assert_eq!(richtext_escape("<p>\"x\" & y\n"), "&lt;p&gt;&quot;x&quot; &amp; y<br>");
    assert_eq!(richtext_escape("plain"), "plain");
}

#[test]
fn test_command_packet_round_trip() {
    let mut game = TestGame {
        time: 30,
        ..TestGame::default()
    };
    let (mut engine, handle) =
        coroutine_for("return { f = function() coroutine.yield(5) end }", &mut game);
    let mut queue = VecQueue::default();
    execute(&mut engine, &mut queue, &mut game, handle, 0);
    let (_, command) = queue.ticks.pop().unwrap();

    let mut packet = Vec::new();
    command.write(&mut packet).unwrap();
    assert_eq!(&packet[..2], &3u16.to_le_bytes());
    let restored = ScheduledCoroutineCommand::read(&mut packet.as_slice(), &engine).unwrap();
    assert_eq!(restored.due(), Due::Tick(35));
    assert_eq!(restored.handle().registry_index(), command.handle().registry_index());
    assert_eq!(restored.handle().thread(), command.handle().thread());
}

#[test]
fn test_command_packet_version_mismatch() {
    let engine = engine_with(&[]);
    let mut packet = vec![2, 0, 0];
    packet.extend_from_slice(&0u64.to_le_bytes());
    let err = ScheduledCoroutineCommand::read(&mut packet.as_slice(), &engine).unwrap_err();
    assert!(matches!(err, GameDataError::Version(ref v) if v.found == 2));
    assert!(err.to_string().contains("unsupported coroutine command version 2"));
}

#[test]
fn test_subblob_versions() {
    let mut game = TestGame::default();
    let (mut engine, handle) =
        coroutine_for("return { f = function() coroutine.yield(1) end }", &mut game);
    engine.collect_garbage();

    // version 4 has no textdomain stack
    let mut blob = vec![4u8];
    for n in [0u32, 0, handle.registry_index()] {
        blob.extend_from_slice(&n.to_le_bytes());
    }
    let old = engine.read_coroutine(&mut blob.as_slice()).unwrap();
    assert!(old.textdomains().is_empty());
    assert_eq!(old.status(), CoroutineStatus::Suspended);

    blob[0] = 6;
    let err = engine.read_coroutine(&mut blob.as_slice()).unwrap_err();
    assert!(err.to_string().contains("supported: 4..=5"));

    blob[0] = 3;
    assert!(matches!(
        engine.read_coroutine(&mut blob.as_slice()),
        Err(GameDataError::Version(_))
    ));
}

#[test]
fn test_subblob_with_unknown_registry_slot() {
    let engine = engine_with(&[]);
    let mut blob = vec![5u8];
    for n in [0u32, 0, 77, 0] {
        blob.extend_from_slice(&n.to_le_bytes());
    }
    let err = engine.read_coroutine(&mut blob.as_slice()).unwrap_err();
    assert!(err.to_string().contains("registry slot 77"));
}

// ----------------------------------------------------------------------------
// Engine state
// ----------------------------------------------------------------------------

#[test]
fn test_get_hook() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[("main.lua", "return {}")]);
    assert!(engine.get_hook("custom_statistic").is_none());

    let mut engine2 = engine_with(&[(
        "main.lua",
        "hooks = { custom_statistic = function() return 1 end, gone = nil }",
    )]);
    engine.run_script("main.lua", &mut game).unwrap();
    engine2.run_script("main.lua", &mut game).unwrap();
    assert!(engine.get_hook("custom_statistic").is_none());
    assert!(matches!(engine2.get_hook("custom_statistic"), Some(Value::Function(_))));
    assert!(engine2.get_hook("gone").is_none());
}

#[test]
fn test_run_script_results() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[
        ("nil.lua", "local x = 1"),
        ("number.lua", "return 3"),
        ("table.lua", "return { answer = 42 }"),
        ("dir/inner.lua", "return {}"),
    ]);

    let empty = engine.run_script("nil.lua", &mut game).unwrap();
    assert!(engine.vm().heap.table(empty).unwrap().is_empty());

    let table = engine.run_script("table.lua", &mut game).unwrap();
    assert_eq!(engine.vm().heap.table(table).unwrap().get_str("answer"), Value::Int(42));

    match engine.run_script("number.lua", &mut game) {
        Err(ScriptError::NotATable { path, found }) => {
            assert_eq!(path, "number.lua");
            assert_eq!(found, "number");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert!(matches!(
        engine.run_script("dir", &mut game),
        Err(ScriptError::MissingScript(_))
    ));
    assert!(matches!(
        engine.run_script("missing.lua", &mut game),
        Err(ScriptError::MissingScript(_))
    ));
}

#[test]
fn test_compile_errors_surface() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[("bad.lua", "local = 3")]);
    let err = engine.run_script("bad.lua", &mut game).unwrap_err();
    assert!(matches!(err, ScriptError::Compile(_)));
    assert!(err.to_string().contains("bad.lua"));
}

#[test]
fn test_map_prefix_resolves_against_map_filesystem() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[
        ("main.lua", "include('map:scripting/init.lua') return { from_map = loaded }"),
    ]);
    assert!(matches!(
        engine.run_script("map:scripting/init.lua", &mut game),
        Err(ScriptError::MissingScript(_))
    ));

    let map = MemoryFilesystem::new().with_file("scripting/init.lua", "loaded = 'yes'");
    engine.set_map_filesystem(Some(Box::new(map)));
    let result = engine.run_script("main.lua", &mut game).unwrap();
    assert_eq!(
        engine.vm().heap.table(result).unwrap().get_str("from_map"),
        Value::str("yes")
    );
}

#[test]
fn test_random_draws_from_simulation_stream() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[(
        "main.lua",
        "return { a = math.random(1, 10), b = math.random(10), c = math.random(1, 10), seed = math.randomseed }",
    )]);
    let result = engine.run_script("main.lua", &mut game).unwrap();
    let table = engine.vm().heap.table(result).unwrap();
    assert_eq!(table.get_str("a"), Value::Int(8));
    assert_eq!(table.get_str("b"), Value::Int(3));
    assert_eq!(table.get_str("c"), Value::Int(4));
    assert!(table.get_str("seed").is_nil());
    assert!(game.draws.is_empty());
}

#[test]
fn test_wl_library() {
    let mut game = TestGame {
        time: 1234,
        ..TestGame::default()
    };
    let mut engine = engine_with(&[(
        "main.lua",
        r#"
local players = wl.players()
local p = wl.Player(2)
p:send_message("hi", "there")
wl.send_message(players[3], "yo", "all")
return { time = wl.time(), count = #players, number = p.number, kind = tostring(wl.Field(1, 2)) }
"#,
    )]);
    let result = engine.run_script("main.lua", &mut game).unwrap();
    let table = engine.vm().heap.table(result).unwrap();
    assert_eq!(table.get_str("time"), Value::Int(1234));
    assert_eq!(table.get_str("count"), Value::Int(3));
    assert_eq!(table.get_str("number"), Value::Int(2));
    assert_eq!(
        game.delivered,
        vec![
            (2, "hi".to_string(), "there".to_string()),
            (3, "yo".to_string(), "all".to_string()),
        ]
    );
}

#[test]
fn test_wl_rejects_unknown_player() {
    let mut game = TestGame::default();
    let mut engine = engine_with(&[("main.lua", "wl.Player(9)")]);
    let err = engine.run_script("main.lua", &mut game).unwrap_err();
    assert!(err.to_string().contains("player 9 does not exist"));
}
