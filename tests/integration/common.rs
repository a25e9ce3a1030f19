//! Shared helpers for the integration tests

use ludus::game::{MemoryFilesystem, Session};
use ludus::util::config::EngineConfig;

pub fn filesystem(script: &str) -> MemoryFilesystem {
    MemoryFilesystem::new().with_file("main.lua", script)
}

/// Session with `script` as `main.lua`, not started
pub fn session(script: &str) -> Session {
    Session::new(&EngineConfig::default(), Box::new(filesystem(script))).unwrap()
}

/// Session with `main.lua` started at tick 0
pub fn started(script: &str) -> Session {
    let mut session = session(script);
    session.start_script("main.lua").unwrap();
    session
}

/// Save and load through a real file
pub fn reload(
    session: &mut Session,
    script: &str,
) -> Session {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reload.ldsg");
    session.save(&path).unwrap();
    Session::load(&EngineConfig::default(), Box::new(filesystem(script)), &path).unwrap()
}

pub fn inbox(
    session: &Session,
    player: u8,
) -> Vec<(String, String)> {
    session
        .inbox(player)
        .iter()
        .map(|m| (m.title.clone(), m.body.clone()))
        .collect()
}
