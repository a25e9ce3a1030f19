//! End-to-end scheduling and savegame scenarios

use ludus::scripting::{CommandOutcome, Due};

use crate::common::{inbox, reload, started};

const WAIT_50: &str = r#"
return { func = function()
  wl.send_message(1, "start", tostring(wl.time()))
  coroutine.yield(50)
  wl.send_message(1, "resumed", tostring(wl.time()))
end }
"#;

#[test]
fn test_yield_reschedules_by_ticks() {
    let mut session = started(WAIT_50);
    assert_eq!(
        session.advance(49).unwrap(),
        vec![CommandOutcome::Rescheduled(Due::Tick(50))]
    );
    assert_eq!(inbox(&session, 1).len(), 1);

    assert_eq!(session.advance(1).unwrap(), vec![CommandOutcome::Completed]);
    assert_eq!(
        inbox(&session, 1),
        vec![
            ("start".to_string(), "0".to_string()),
            ("resumed".to_string(), "50".to_string()),
        ]
    );
}

#[test]
fn test_realtimedelta_ignores_ticks() {
    let script = r#"
return { func = function()
  coroutine.yield(50, "realtimedelta")
  wl.send_message(1, "wall", "done")
end }
"#;
    let mut session = crate::common::session(script);
    session.set_wall_clock(5_000);
    session.start_script("main.lua").unwrap();
    assert_eq!(
        session.advance(1).unwrap(),
        vec![CommandOutcome::Rescheduled(Due::WallClock(5_050))]
    );
    assert!(session.advance(10_000).unwrap().is_empty());
    assert!(inbox(&session, 1).is_empty());

    session.set_wall_clock(5_050);
    assert_eq!(session.advance(1).unwrap(), vec![CommandOutcome::Completed]);
}

#[test]
fn test_uncaught_error_broadcasts_and_pauses() {
    let script = r#"
return { func = function()
  local units = nil
  return units.count
end }
"#;
    let mut session = started(script);
    let outcomes = session.advance(10).unwrap();
    assert_eq!(outcomes.len(), 1);
    let message = match &outcomes[0] {
        CommandOutcome::Errored(message) => message.clone(),
        other => panic!("unexpected outcome {:?}", other),
    };
    assert_eq!(session.speed(), 0);
    for player in [1, 2] {
        let received = inbox(&session, player);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, "Script error");
        assert!(!message.is_empty());
    }
}

#[test]
fn test_error_leaves_other_coroutines_running() {
    let script = r#"
function bad() coroutine.yield(1) error("bad one") end
function good()
  for i = 1, 3 do
    wl.send_message(2, "good", tostring(i))
    coroutine.yield(1)
  end
end
"#;
    let mut session = crate::common::session(script);
    session.run_script("main.lua").unwrap();
    let bad = session.engine().vm().global("bad").unwrap();
    let good = session.engine().vm().global("good").unwrap();
    session.start_coroutine(bad, Vec::new(), 0).unwrap();
    session.start_coroutine(good, Vec::new(), 0).unwrap();

    session.advance(1).unwrap();
    assert_eq!(session.speed(), 0);
    session.set_speed(1000);
    session.advance(5).unwrap();
    let goods: Vec<String> = inbox(&session, 2)
        .into_iter()
        .filter(|(title, _)| title == "good")
        .map(|(_, body)| body)
        .collect();
    assert_eq!(goods, vec!["1", "2", "3"]);
}

const COUNTER: &str = r#"
local function counter(name, step)
  return function()
    local value = 0
    local history = {}
    while true do
      value = value + step
      history[#history + 1] = value
      wl.send_message(1, name, tostring(value) .. "/" .. tostring(#history))
      coroutine.yield(step)
    end
  end
end
return { func = counter("solo", 3) }
"#;

#[test]
fn test_reload_continues_identically() {
    let mut uninterrupted = started(COUNTER);
    uninterrupted.advance(40).unwrap();

    let mut first = started(COUNTER);
    first.advance(17).unwrap();
    let mut second = reload(&mut first, COUNTER);
    assert_eq!(second.time(), 17);
    second.advance(23).unwrap();

    assert_eq!(inbox(&second, 1), inbox(&uninterrupted, 1));
    assert_eq!(second.queue().len(), 1);
}

#[test]
fn test_two_coroutines_keep_their_own_state() {
    let script = r#"
function make(name, step)
  local total = 0
  return function()
    while true do
      total = total + step
      wl.send_message(1, name, tostring(total))
      coroutine.yield(1)
    end
  end
end
"#;
    let mut session = crate::common::session(script);
    session.run_script("main.lua").unwrap();
    let host = &mut ludus::vm::LocalHost::default();
    for (name, step) in [("a", 1), ("b", 100)] {
        let vm = session.engine_mut().vm_mut();
        let make = vm.global("make").unwrap();
        let f = vm
            .call(make, vec![name.into(), ludus::runtime::value::Value::Int(step)], host)
            .unwrap()
            .remove(0);
        session.start_coroutine(f, Vec::new(), 0).unwrap();
    }
    session.advance(1).unwrap();

    let mut loaded = reload(&mut session, script);
    let indices: Vec<u32> = loaded
        .queue()
        .iter()
        .map(|c| c.handle().registry_index())
        .collect();
    assert_eq!(indices, vec![1, 2]);
    let threads: Vec<_> = loaded.queue().iter().map(|c| c.handle().thread()).collect();
    assert_ne!(threads[0], threads[1]);

    loaded.advance(1).unwrap();
    let tail: Vec<(String, String)> = inbox(&loaded, 1).into_iter().skip(4).collect();
    assert_eq!(
        tail,
        vec![
            ("a".to_string(), "3".to_string()),
            ("b".to_string(), "300".to_string()),
        ]
    );
}

#[test]
fn test_reload_keeps_errored_pause() {
    let script = "return { func = function() error('stop') end }";
    let mut session = started(script);
    session.advance(3).unwrap();
    let loaded = reload(&mut session, script);
    assert_eq!(loaded.speed(), 0);
    assert_eq!(inbox(&loaded, 1).len(), 1);
    assert!(loaded.queue().is_empty());
}
