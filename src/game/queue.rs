//! Deterministic command queue
//!
//! Tick commands run in `(due, insertion serial)` order, so commands due at
//! the same tick keep FIFO order on every peer. Wall-clock commands wait in
//! a separate lane and are checked at every step.

use std::collections::BTreeMap;

use crate::scripting::{
    CommandOutcome, CommandQueue, FatalScriptError, GameContext, GameServices,
    ScheduledCoroutineCommand, ScriptEngineState,
};

#[derive(Debug, Default)]
pub struct TickCommandQueue {
    ticks: BTreeMap<(u64, u64), ScheduledCoroutineCommand>,
    wall: BTreeMap<(u64, u64), ScheduledCoroutineCommand>,
    serial: u64,
}

impl TickCommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    pub fn len(&self) -> usize {
        self.ticks.len() + self.wall.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty() && self.wall.is_empty()
    }

    /// Earliest tick a command is due at
    pub fn next_tick(&self) -> Option<u64> {
        self.ticks.keys().next().map(|(due, _)| *due)
    }

    /// Commands in execution order, tick lane first
    pub fn iter(&self) -> impl Iterator<Item = &ScheduledCoroutineCommand> + '_ {
        self.ticks.values().chain(self.wall.values())
    }

    /// Take the next command due by `tick` or `wall_clock`
    ///
    /// Wall-clock commands go first once due.
    pub fn pop_due(
        &mut self,
        tick: u64,
        wall_clock: u64,
    ) -> Option<ScheduledCoroutineCommand> {
        self.pop_due_before(tick, wall_clock, u64::MAX)
    }

    /// Like [`pop_due`](Self::pop_due), skipping commands enqueued after
    /// serial `limit`
    fn pop_due_before(
        &mut self,
        tick: u64,
        wall_clock: u64,
        limit: u64,
    ) -> Option<ScheduledCoroutineCommand> {
        let wall = Self::first_due(&self.wall, wall_clock, limit);
        if let Some(key) = wall {
            return self.wall.remove(&key);
        }
        let key = Self::first_due(&self.ticks, tick, limit)?;
        self.ticks.remove(&key)
    }

    fn first_due(
        lane: &BTreeMap<(u64, u64), ScheduledCoroutineCommand>,
        due: u64,
        limit: u64,
    ) -> Option<(u64, u64)> {
        lane.keys()
            .take_while(|(at, _)| *at <= due)
            .find(|(_, serial)| *serial <= limit)
            .copied()
    }

    /// Execute every command due by `tick` that was queued before the pass
    /// started
    ///
    /// A command rescheduled into the window waits for the next pass, so a
    /// zero delay cannot keep the pass running. The pass does not look at
    /// the game speed: commands due at the pause tick still run.
    pub fn run_until(
        &mut self,
        tick: u64,
        wall_clock: u64,
        engine: &mut ScriptEngineState,
        game: &mut dyn GameServices,
    ) -> Result<Vec<CommandOutcome>, FatalScriptError> {
        let limit = self.serial;
        let mut outcomes = Vec::new();
        while let Some(command) = self.pop_due_before(tick, wall_clock, limit) {
            let mut ctx = GameContext {
                engine: &mut *engine,
                queue: &mut *self,
                game: &mut *game,
                wall_clock,
            };
            outcomes.push(command.execute(&mut ctx)?);
        }
        Ok(outcomes)
    }
}

impl CommandQueue for TickCommandQueue {
    fn enqueue_at_tick(
        &mut self,
        tick: u64,
        command: ScheduledCoroutineCommand,
    ) {
        let serial = self.next_serial();
        self.ticks.insert((tick, serial), command);
    }

    fn enqueue_at_walltime(
        &mut self,
        millis: u64,
        command: ScheduledCoroutineCommand,
    ) {
        let serial = self.next_serial();
        self.wall.insert((millis, serial), command);
    }
}
