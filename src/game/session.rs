//! Reference game session
//!
//! Drives one [`ScriptEngineState`] against a simulated clock: player
//! inboxes, desired speed, the synchronized random stream and the command
//! queue. Saving writes the whole thing into one savegame file.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::game::queue::TickCommandQueue;
use crate::game::rng::SeededRng;
use crate::game::savegame::{Message, Savegame};
use crate::runtime::value::{ObjId, Value};
use crate::scripting::{
    CommandOutcome, CommandQueue, CoroutineArg, Due, FatalScriptError, GameController,
    GameDataError, MessageDelivery, ScheduledCoroutineCommand, ScriptEngineState, ScriptError,
    SimulationRng, VirtualFilesystem,
};
use crate::util::config::EngineConfig;
use crate::vm::HostServices;

/// Normal speed, in thousandths of real time
pub const NORMAL_SPEED: u32 = 1000;

/// Simulation state scripts observe through the host interfaces
#[derive(Debug)]
pub struct World {
    time: u64,
    players: Vec<u8>,
    inboxes: BTreeMap<u8, Vec<Message>>,
    speed: u32,
    rng: SeededRng,
}

impl World {
    fn new(
        players: u8,
        seed: u64,
    ) -> Self {
        Self {
            time: 0,
            players: (1..=players).collect(),
            inboxes: BTreeMap::new(),
            speed: NORMAL_SPEED,
            rng: SeededRng::new(seed),
        }
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn players(&self) -> &[u8] {
        &self.players
    }

    pub fn rng(&self) -> &SeededRng {
        &self.rng
    }

    pub fn inbox(
        &self,
        player: u8,
    ) -> &[Message] {
        self.inboxes.get(&player).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl HostServices for World {
    fn random_u32(&mut self) -> u32 {
        self.rng.next_u32()
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
        if !self.players.contains(&player) {
            return Err(format!("player {} does not exist", player));
        }
        self.deliver(player, title, body);
        Ok(())
    }
}

impl MessageDelivery for World {
    fn player_slots(&self) -> Vec<u8> {
        self.players.clone()
    }

    fn deliver(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    ) {
        debug!(player, title, "message delivered");
        self.inboxes.entry(player).or_default().push(Message {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}

impl GameController for World {
    fn desired_speed(&self) -> u32 {
        self.speed
    }

    fn set_desired_speed(
        &mut self,
        speed: u32,
    ) {
        if speed == 0 {
            warn!(time = self.time, "game paused");
        }
        self.speed = speed;
    }
}

/// 一局游戏会话
pub struct Session {
    engine: ScriptEngineState,
    queue: TickCommandQueue,
    world: World,
    wall_clock: u64,
}

impl Session {
    pub fn new(
        config: &EngineConfig,
        global_fs: Box<dyn VirtualFilesystem>,
    ) -> Result<Self, ScriptError> {
        Ok(Self {
            engine: ScriptEngineState::new(&config.scripting, global_fs)?,
            queue: TickCommandQueue::new(),
            world: World::new(config.session.players, config.session.seed),
            wall_clock: 0,
        })
    }

    pub fn engine(&self) -> &ScriptEngineState {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut ScriptEngineState {
        &mut self.engine
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn queue(&self) -> &TickCommandQueue {
        &self.queue
    }

    pub fn time(&self) -> u64 {
        self.world.time
    }

    pub fn inbox(
        &self,
        player: u8,
    ) -> &[Message] {
        self.world.inbox(player)
    }

    pub fn speed(&self) -> u32 {
        self.world.speed
    }

    pub fn set_speed(
        &mut self,
        speed: u32,
    ) {
        self.world.set_desired_speed(speed);
    }

    pub fn wall_clock(&self) -> u64 {
        self.wall_clock
    }

    /// Wall clock in milliseconds, used by the next `advance`
    pub fn set_wall_clock(
        &mut self,
        millis: u64,
    ) {
        self.wall_clock = millis;
    }

    /// Run a script file and return its result table
    pub fn run_script(
        &mut self,
        path: &str,
    ) -> Result<ObjId, ScriptError> {
        self.engine.run_script(path, &mut self.world)
    }

    /// Schedule `callable` as a coroutine `delay` ticks from now
    pub fn start_coroutine(
        &mut self,
        callable: Value,
        args: Vec<CoroutineArg>,
        delay: u64,
    ) -> Result<u32, ScriptError> {
        let mut handle = self.engine.new_coroutine(callable)?;
        for arg in args {
            handle.push_arg(self.engine.vm_mut(), arg)?;
        }
        let index = handle.registry_index();
        let due = self.world.time + delay;
        self.queue
            .enqueue_at_tick(due, ScheduledCoroutineCommand::new(Due::Tick(due), handle));
        debug!(index, due, "coroutine started");
        Ok(index)
    }

    /// Run `path` and start its entry point
    ///
    /// The entry point is the `func` field of the returned table, falling
    /// back to `hooks.main`.
    pub fn start_script(
        &mut self,
        path: &str,
    ) -> Result<u32, ScriptError> {
        let result = self.run_script(path)?;
        let func = self.engine.vm().heap.table(result)?.get_str("func");
        let entry = if func.is_nil() {
            self.engine.get_hook("main")
        } else {
            Some(func)
        };
        let entry = entry.ok_or_else(|| {
            ScriptError::BadValue(format!("{} has neither a func field nor hooks.main", path))
        })?;
        self.start_coroutine(entry, Vec::new(), 0)
    }

    /// Advance game time by `ticks`, running every command that becomes due
    ///
    /// Each step runs one queue pass at a later tick than the one before.
    /// Time stops at the tick where the game got paused.
    pub fn advance(
        &mut self,
        ticks: u64,
    ) -> Result<Vec<CommandOutcome>, FatalScriptError> {
        let target = self.world.time.saturating_add(ticks);
        let mut outcomes = Vec::new();
        let mut floor = self.world.time;
        loop {
            let step = match self.queue.next_tick() {
                Some(due) if due <= target => due.max(floor),
                _ => target,
            };
            self.world.time = step;
            outcomes.extend(self.queue.run_until(
                step,
                self.wall_clock,
                &mut self.engine,
                &mut self.world,
            )?);
            if self.world.speed == 0 || step == target {
                break;
            }
            floor = step + 1;
        }
        debug!(time = self.world.time, executed = outcomes.len(), "session advanced");
        Ok(outcomes)
    }

    /// Snapshot the session into a [`Savegame`]
    pub fn snapshot(&mut self) -> Result<Savegame, GameDataError> {
        let mut environment = Vec::new();
        self.engine.write_global_env(&mut environment)?;
        let mut commands = Vec::with_capacity(self.queue.len());
        for command in self.queue.iter() {
            let mut packet = Vec::new();
            command.write(&mut packet)?;
            commands.push(packet);
        }
        Ok(Savegame {
            time: self.world.time,
            speed: self.world.speed,
            wall_clock: self.wall_clock,
            players: self.world.players.clone(),
            seed: self.world.rng.seed(),
            draws: self.world.rng.draws(),
            inboxes: self
                .world
                .inboxes
                .iter()
                .map(|(player, messages)| (*player, messages.clone()))
                .collect(),
            environment,
            commands,
        })
    }

    pub fn save(
        &mut self,
        path: &Path,
    ) -> Result<(), GameDataError> {
        let savegame = self.snapshot()?;
        savegame.save(path)?;
        info!(
            path = %path.display(),
            time = savegame.time,
            commands = savegame.commands.len(),
            "session saved"
        );
        Ok(())
    }

    /// Rebuild a session from a snapshot
    pub fn restore(
        config: &EngineConfig,
        global_fs: Box<dyn VirtualFilesystem>,
        savegame: &Savegame,
    ) -> Result<Self, GameDataError> {
        let mut session = Self::new(config, global_fs)?;
        session.engine.read_global_env(&savegame.environment)?;
        for packet in &savegame.commands {
            let mut input = packet.as_slice();
            let command = ScheduledCoroutineCommand::read(&mut input, &session.engine)?;
            match command.due() {
                Due::Tick(tick) => session.queue.enqueue_at_tick(tick, command),
                Due::WallClock(ms) => session.queue.enqueue_at_walltime(ms, command),
            }
        }
        session.world = World {
            time: savegame.time,
            players: savegame.players.clone(),
            inboxes: savegame.inboxes.iter().cloned().collect(),
            speed: savegame.speed,
            rng: SeededRng::restore(savegame.seed, savegame.draws),
        };
        session.wall_clock = savegame.wall_clock;
        Ok(session)
    }

    pub fn load(
        config: &EngineConfig,
        global_fs: Box<dyn VirtualFilesystem>,
        path: &Path,
    ) -> Result<Self, GameDataError> {
        let savegame = Savegame::load(path)?;
        let session = Self::restore(config, global_fs, &savegame)?;
        info!(path = %path.display(), time = session.time(), "session loaded");
        Ok(session)
    }
}
