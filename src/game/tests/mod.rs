//! Reference collaborator tests

use crate::game::{DiskFilesystem, MemoryFilesystem, Savegame, SeededRng, Session, NORMAL_SPEED};
use crate::scripting::{CommandOutcome, Due, SimulationRng, VirtualFilesystem};
use crate::util::config::EngineConfig;

const TICKER: &str = r#"
local count = 0
local function tick()
  while true do
    count = count + 1
    wl.send_message(1, "tick", tostring(count))
    coroutine.yield(10)
  end
end
return { func = tick }
"#;

fn session_with(script: &str) -> Session {
    let fs = MemoryFilesystem::new().with_file("main.lua", script);
    Session::new(&EngineConfig::default(), Box::new(fs)).unwrap()
}

fn bodies(
    session: &Session,
    player: u8,
) -> Vec<String> {
    session
        .inbox(player)
        .iter()
        .map(|m| m.body.clone())
        .collect()
}

// ----------------------------------------------------------------------------
// Filesystems
// ----------------------------------------------------------------------------

#[test]
fn test_memory_filesystem_directories() {
    let fs = MemoryFilesystem::new()
        .with_file("scripting/init.lua", "return {}")
        .with_file("./main.lua", "");
    assert!(fs.file_exists("main.lua"));
    assert!(fs.file_exists("scripting"));
    assert!(fs.is_directory("scripting"));
    assert!(!fs.is_directory("scripting/init.lua"));
    assert!(!fs.file_exists("missing.lua"));
    assert_eq!(fs.load("scripting/init.lua").unwrap(), b"return {}");
    assert!(fs.load("missing.lua").is_err());
}

#[test]
fn test_disk_filesystem_stays_below_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.lua"), "return 1").unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    let fs = DiskFilesystem::new(dir.path());

    assert!(fs.file_exists("a.lua"));
    assert!(fs.is_directory("sub"));
    assert_eq!(fs.load("./a.lua").unwrap(), b"return 1");
    assert!(!fs.file_exists("../a.lua"));
    assert!(fs.load("/etc/passwd").is_err());
}

// ----------------------------------------------------------------------------
// RNG
// ----------------------------------------------------------------------------

#[test]
fn test_seeded_rng_restore_continues_stream() {
    let mut original = SeededRng::new(42);
    for _ in 0..5 {
        original.next_u32();
    }
    let mut restored = SeededRng::restore(original.seed(), original.draws());
    assert_eq!(restored.draws(), 5);
    for _ in 0..10 {
        assert_eq!(original.next_u32(), restored.next_u32());
    }
}

// ----------------------------------------------------------------------------
// Session
// ----------------------------------------------------------------------------

#[test]
fn test_session_reschedules_on_yield() {
    let mut session = session_with(TICKER);
    session.start_script("main.lua").unwrap();

    let outcomes = session.advance(25).unwrap();
    assert_eq!(
        outcomes,
        vec![
            CommandOutcome::Rescheduled(Due::Tick(10)),
            CommandOutcome::Rescheduled(Due::Tick(20)),
            CommandOutcome::Rescheduled(Due::Tick(30)),
        ]
    );
    assert_eq!(session.time(), 25);
    assert_eq!(bodies(&session, 1), vec!["1", "2", "3"]);
    assert!(session.inbox(2).is_empty());
}

#[test]
fn test_session_falls_back_to_main_hook() {
    let mut session = session_with(
        r#"
hooks = { main = function() wl.send_message(2, "hello", "from main") end }
"#,
    );
    session.start_script("main.lua").unwrap();
    assert_eq!(session.advance(1).unwrap(), vec![CommandOutcome::Completed]);
    assert_eq!(bodies(&session, 2), vec!["from main"]);
    assert!(session.queue().is_empty());
}

#[test]
fn test_session_without_entry_point() {
    let mut session = session_with("return {}");
    assert!(session.start_script("main.lua").is_err());
}

#[test]
fn test_script_error_pauses_session() {
    let mut session = session_with(
        r#"
return { func = function()
  coroutine.yield(5)
  error("map <broken>")
end }
"#,
    );
    session.start_script("main.lua").unwrap();
    let outcomes = session.advance(100).unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(matches!(&outcomes[1], CommandOutcome::Errored(msg) if msg.contains("map <broken>")));
    assert_eq!(session.speed(), 0);
    assert_eq!(session.time(), 5);
    for player in [1, 2] {
        let inbox = session.inbox(player);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].title, "Script error");
        assert!(inbox[0].body.contains("map &lt;broken&gt;"));
    }

    session.set_speed(NORMAL_SPEED);
    assert!(session.advance(10).unwrap().is_empty());
    assert_eq!(session.time(), 15);
}

#[test]
fn test_pause_tick_finishes_its_pass() {
    let mut session = session_with(
        r#"
function broken() error("first") end
function after() wl.send_message(1, "after", "second") end
"#,
    );
    session.run_script("main.lua").unwrap();
    for name in ["broken", "after"] {
        let f = session.engine().vm().global(name).unwrap();
        session.start_coroutine(f, Vec::new(), 3).unwrap();
    }
    let outcomes = session.advance(10).unwrap();

    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[1], CommandOutcome::Completed);
    assert_eq!(session.speed(), 0);
    assert_eq!(session.time(), 3);
    assert_eq!(bodies(&session, 1).last().map(String::as_str), Some("second"));
}

#[test]
fn test_wall_clock_lane() {
    let mut session = session_with(
        r#"
return { func = function()
  coroutine.yield(500, "realtimedelta")
  wl.send_message(1, "late", "done")
end }
"#,
    );
    session.set_wall_clock(1_000);
    session.start_script("main.lua").unwrap();
    assert_eq!(
        session.advance(1).unwrap(),
        vec![CommandOutcome::Rescheduled(Due::WallClock(1_500))]
    );

    session.set_wall_clock(1_499);
    assert!(session.advance(1).unwrap().is_empty());
    session.set_wall_clock(1_500);
    assert_eq!(session.advance(1).unwrap(), vec![CommandOutcome::Completed]);
    assert_eq!(bodies(&session, 1), vec!["done"]);
}

#[test]
fn test_zero_delay_waits_for_next_step() {
    let mut session = session_with(
        r#"
local n = 0
return { func = function()
  while true do
    n = n + 1
    wl.send_message(1, "spin", tostring(n))
    coroutine.yield(0)
  end
end }
"#,
    );
    session.start_script("main.lua").unwrap();
    let outcomes = session.advance(5).unwrap();

    assert_eq!(outcomes.len(), 6);
    assert_eq!(outcomes[5], CommandOutcome::Rescheduled(Due::Tick(5)));
    assert_eq!(session.time(), 5);
    assert_eq!(bodies(&session, 1).len(), 6);
}

#[test]
fn test_zero_realtime_delay_returns_control() {
    let mut session = session_with(
        r#"
return { func = function()
  while true do coroutine.yield(0, "realtimedelta") end
end }
"#,
    );
    session.set_wall_clock(100);
    session.start_script("main.lua").unwrap();
    let outcomes = session.advance(5).unwrap();

    assert_eq!(outcomes, vec![CommandOutcome::Rescheduled(Due::WallClock(100)); 2]);
    assert_eq!(session.time(), 5);
    assert_eq!(session.queue().len(), 1);
}

#[test]
fn test_spinning_coroutine_does_not_starve_others() {
    let mut session = session_with(TICKER);
    session.start_script("main.lua").unwrap();
    let vm = session.engine_mut().vm_mut();
    let chunk = crate::frontend::compile(
        "return function() while true do coroutine.yield(0) end end",
        "spin",
    )
    .unwrap();
    let chunk = vm.load(chunk).unwrap();
    let spin = vm
        .call(chunk, Vec::new(), &mut crate::vm::LocalHost::default())
        .unwrap()
        .remove(0);
    session.start_coroutine(spin, Vec::new(), 0).unwrap();

    session.advance(20).unwrap();
    assert_eq!(bodies(&session, 1), vec!["1", "2", "3"]);
}

#[test]
fn test_same_tick_commands_keep_start_order() {
    let mut session = session_with(
        r#"
function say(text)
  return function() wl.send_message(1, "order", text) end
end
"#,
    );
    session.run_script("main.lua").unwrap();
    for text in ["a", "b", "c"] {
        let vm = session.engine_mut().vm_mut();
        let say = vm.global("say").unwrap();
        let f = vm
            .call(say, vec![text.into()], &mut crate::vm::LocalHost::default())
            .unwrap()
            .remove(0);
        session.start_coroutine(f, Vec::new(), 3).unwrap();
    }
    session.advance(3).unwrap();
    assert_eq!(bodies(&session, 1), vec!["a", "b", "c"]);
}

#[test]
fn test_save_and_load_continue_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("game.ldsg");
    let config = EngineConfig::default();

    let mut session = session_with(TICKER);
    session.start_script("main.lua").unwrap();
    session.advance(25).unwrap();
    session.save(&path).unwrap();

    let fs = MemoryFilesystem::new().with_file("main.lua", TICKER);
    let mut loaded = Session::load(&config, Box::new(fs), &path).unwrap();
    assert_eq!(loaded.time(), 25);
    assert_eq!(loaded.queue().len(), 1);
    assert_eq!(bodies(&loaded, 1), bodies(&session, 1));

    session.advance(20).unwrap();
    loaded.advance(20).unwrap();
    assert_eq!(bodies(&loaded, 1), vec!["1", "2", "3", "4", "5"]);
    assert_eq!(bodies(&loaded, 1), bodies(&session, 1));
}

#[test]
fn test_savegame_summary_lists_commands() {
    let mut session = session_with(TICKER);
    session.start_script("main.lua").unwrap();
    session.advance(5).unwrap();
    let summary = session.snapshot().unwrap().summary();

    assert_eq!(summary.time, 5);
    assert_eq!(summary.players, vec![1, 2]);
    assert_eq!(summary.commands.len(), 1);
    let command = &summary.commands[0];
    assert_eq!(command.lane, "tick");
    assert_eq!(command.due, 10);
    assert_eq!(command.registry_index, 1);
    let json = serde_json::to_value(&summary).unwrap();
    assert_eq!(json["inboxes"][0]["messages"][0]["body"], "1");
}

#[test]
fn test_savegame_rejects_bad_header() {
    let mut bytes = Vec::new();
    Savegame::default().write_to(&mut bytes).unwrap();
    bytes[4] = 9;
    let err = Savegame::read_from(&mut bytes.as_slice()).unwrap_err();
    assert!(err.to_string().contains("unsupported savegame version 9"));

    let err = Savegame::read_from(&mut &b"NOPE\x01"[..]).unwrap_err();
    assert!(err.to_string().contains("not a savegame"));
}

#[test]
fn test_synchronized_random_matches_after_load() {
    let script = r#"
return { func = function()
  while true do
    wl.send_message(1, "roll", tostring(math.random(1, 1000)))
    coroutine.yield(1)
  end
end }
"#;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rng.ldsg");
    let mut session = session_with(script);
    session.start_script("main.lua").unwrap();
    session.advance(3).unwrap();
    session.save(&path).unwrap();

    let fs = MemoryFilesystem::new().with_file("main.lua", script);
    let mut loaded = Session::load(&EngineConfig::default(), Box::new(fs), &path).unwrap();
    session.advance(5).unwrap();
    loaded.advance(5).unwrap();
    assert_eq!(bodies(&loaded, 1), bodies(&session, 1));
    assert_eq!(loaded.world().rng().draws(), session.world().rng().draws());
}
