//! Drives the `ludus` binary

use std::fs;
use std::process::Command;

fn ludus() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ludus"));
    command.env_remove("LUDUS_FAIL_ON_SCRIPT_ERROR");
    command
}

#[test]
fn test_run_save_inspect_resume() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("main.lua"),
        r#"
return { func = function()
  local n = 0
  while true do
    n = n + 1
    wl.send_message(1, "beat", tostring(n))
    coroutine.yield(10)
  end
end }
"#,
    )
    .unwrap();
    let save = dir.path().join("game.ldsg");

    let output = ludus()
        .current_dir(dir.path())
        .args(["run", "main.lua", "--ticks", "25", "--save"])
        .arg(&save)
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[player 1] beat: 3"), "{}", stdout);
    assert!(save.exists());

    let output = ludus().args(["inspect"]).arg(&save).output().unwrap();
    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["time"], 25);
    assert_eq!(summary["commands"][0]["due"], 30);
    assert_eq!(summary["commands"][0]["lane"], "tick");

    let output = ludus()
        .current_dir(dir.path())
        .args(["resume"])
        .arg(&save)
        .args(["--ticks", "10"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("beat: 4"));
}

#[test]
fn test_fail_on_script_error_flag() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("main.lua"),
        "return { func = function() error('boom') end }",
    )
    .unwrap();

    let contained = ludus()
        .current_dir(dir.path())
        .args(["run", "main.lua", "--ticks", "1"])
        .output()
        .unwrap();
    assert!(contained.status.success());
    assert!(String::from_utf8_lossy(&contained.stdout).contains("game paused"));

    let fatal = ludus()
        .current_dir(dir.path())
        .args(["--fail-on-script-error", "run", "main.lua", "--ticks", "1"])
        .output()
        .unwrap();
    assert!(!fatal.status.success());
    assert!(String::from_utf8_lossy(&fatal.stderr).contains("boom"));
}

#[test]
fn test_inspect_rejects_garbage() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("junk.ldsg");
    fs::write(&path, b"not a savegame").unwrap();
    let output = ludus().arg("inspect").arg(&path).output().unwrap();
    assert!(!output.status.success());
}
