//! Property tests for rescheduling and persistence

use ludus::runtime::value::Value;
use ludus::scripting::{CommandOutcome, CoroutineArg, Due};
use proptest::prelude::*;

use crate::common::{inbox, reload, session, started};

const DELAY: &str = r#"
function wait(n)
  coroutine.yield(n)
  wl.send_message(1, "ran", tostring(wl.time()))
end
"#;

const WALKER: &str = r#"
return { func = function()
  local seen = {}
  local state = 17
  while true do
    state = (state * 31 + math.random(1, 97)) % 1000003
    seen[#seen + 1] = state
    wl.send_message(1, "step", tostring(state) .. ":" .. tostring(#seen))
    coroutine.yield(1 + state % 5)
  end
end }
"#;

/// Literal for a table element
fn element_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<i32>().prop_map(|i| i.to_string()),
        "[a-z]{0,8}".prop_map(|s| format!("'{}'", s)),
        Just("true".to_string()),
        Just("false".to_string()),
        (-1000i32..1000).prop_map(|i| format!("{}.5", i)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_single_yield_waits_exactly(start in 0u64..500, n in 1u32..5000) {
        let mut game = session(DELAY);
        game.run_script("main.lua").unwrap();
        game.advance(start).unwrap();
        let wait = game.engine().vm().global("wait").unwrap();
        game.start_coroutine(wait, vec![CoroutineArg::Int(i64::from(n))], 0).unwrap();

        let outcomes = game.advance(0).unwrap();
        prop_assert_eq!(outcomes, vec![CommandOutcome::Rescheduled(Due::Tick(start + u64::from(n)))]);
        game.advance(u64::from(n) - 1).unwrap();
        prop_assert!(inbox(&game, 1).is_empty());
        game.advance(1).unwrap();
        prop_assert_eq!(inbox(&game, 1), vec![("ran".to_string(), (start + u64::from(n)).to_string())]);
    }

    #[test]
    fn prop_reload_matches_uninterrupted(split in 0u64..60, total in 60u64..120, seed in any::<u64>()) {
        let mut config = ludus::util::config::EngineConfig::default();
        config.session.seed = seed;
        let make = || {
            let fs = crate::common::filesystem(WALKER);
            let mut s = ludus::game::Session::new(&config, Box::new(fs)).unwrap();
            s.start_script("main.lua").unwrap();
            s
        };
        let mut straight = make();
        straight.advance(total).unwrap();

        let mut interrupted = make();
        interrupted.advance(split).unwrap();
        let mut resumed = reload(&mut interrupted, WALKER);
        resumed.advance(total - split).unwrap();

        prop_assert_eq!(inbox(&resumed, 1), inbox(&straight, 1));
        prop_assert_eq!(resumed.world().rng().draws(), straight.world().rng().draws());
    }

    #[test]
    fn prop_table_contents_survive_reload(elements in prop::collection::vec(element_strategy(), 0..24)) {
        let script = format!("data = {{ {} }}", elements.join(", "));
        let mut original = session(&script);
        original.run_script("main.lua").unwrap();
        let mut loaded = reload(&mut original, &script);

        let fetch = |s: &ludus::game::Session| -> Vec<Value> {
            let vm = s.engine().vm();
            let data = match vm.global("data").unwrap() {
                Value::Table(id) => id,
                other => panic!("data is {}", other.type_name()),
            };
            let table = vm.heap.table(data).unwrap();
            (1..=elements.len() as i64).map(|i| table.get_int(i)).collect()
        };
        prop_assert_eq!(fetch(&loaded), fetch(&original));
        prop_assert!(loaded.advance(1).unwrap().is_empty());
    }
}

#[test]
fn test_status_is_idempotent_across_reload() {
    let mut game = started(WALKER);
    game.advance(3).unwrap();
    let loaded = reload(&mut game, WALKER);
    let first: Vec<_> = loaded.queue().iter().map(|c| c.handle().status()).collect();
    let second: Vec<_> = loaded.queue().iter().map(|c| c.handle().status()).collect();
    assert_eq!(first, second);
}
