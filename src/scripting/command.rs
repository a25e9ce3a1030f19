//! Scheduled coroutine command
//!
//! The command queue pops a due [`ScheduledCoroutineCommand`], which
//! resumes its coroutine once and then decides from what the coroutine
//! yielded whether to reschedule, finish or contain an error:
//!
//! ```text
//! Scheduled ──due──▶ Running ──yield N──────────────────▶ Scheduled (now + N ticks)
//!                       │    ──yield N, "realtimedelta"──▶ Scheduled (wall clock + N ms)
//!                       │    ──return─────────────────────▶ Completed
//!                       └────any other shape / error──────▶ Errored
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::{debug, error, warn};

use crate::scripting::collaborators::{CommandQueue, GameServices};
use crate::scripting::coroutine::{CoroutineHandle, CoroutineStatus};
use crate::scripting::errors::{
    FatalScriptError, GameDataError, ScriptError, VersionMismatchError,
};
use crate::scripting::state::ScriptEngineState;
use crate::util::config::fail_on_script_error;

/// Command packet version
pub const PACKET_VERSION: u16 = 3;

/// Second yield value that selects the wall-clock lane
pub const REALTIME_DELTA: &str = "realtimedelta";

/// Title of the inbox message sent when a script fails
pub const SCRIPT_ERROR_TITLE: &str = "Script error";

/// When a command becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Due {
    /// Game time in ticks
    Tick(u64),
    /// Wall-clock milliseconds, not synchronized between peers
    WallClock(u64),
}

impl Due {
    fn kind(&self) -> u8 {
        match self {
            Due::Tick(_) => 0,
            Due::WallClock(_) => 1,
        }
    }

    pub fn value(&self) -> u64 {
        match *self {
            Due::Tick(t) | Due::WallClock(t) => t,
        }
    }
}

/// What one execution did
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Rescheduled(Due),
    Completed,
    /// Contained error, with the message every player received
    Errored(String),
}

/// Everything an executing command may touch
pub struct GameContext<'a> {
    pub engine: &'a mut ScriptEngineState,
    pub queue: &'a mut dyn CommandQueue,
    pub game: &'a mut dyn GameServices,
    /// Current wall clock in milliseconds
    pub wall_clock: u64,
}

/// Timed command owning one coroutine
#[derive(Debug)]
pub struct ScheduledCoroutineCommand {
    due: Due,
    handle: CoroutineHandle,
}

/// Escape text for the rich-text inbox renderer
pub fn richtext_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("<br>"),
            c => out.push(c),
        }
    }
    out
}

impl ScheduledCoroutineCommand {
    pub fn new(
        due: Due,
        handle: CoroutineHandle,
    ) -> Self {
        Self { due, handle }
    }

    pub fn due(&self) -> Due {
        self.due
    }

    pub fn handle(&self) -> &CoroutineHandle {
        &self.handle
    }

    pub fn into_handle(self) -> CoroutineHandle {
        self.handle
    }

    /// Resume the coroutine once and act on the result
    ///
    /// Script failures are contained and reported through the outcome.
    /// They only surface as an error when the fail-on-script-error policy
    /// is set.
    pub fn execute(
        self,
        ctx: &mut GameContext<'_>,
    ) -> Result<CommandOutcome, FatalScriptError> {
        let Self { due, mut handle } = self;
        let result = Self::step(&mut handle, ctx);
        match result {
            Ok(Some(next)) => {
                debug!(
                    index = handle.registry_index(),
                    from = due.value(),
                    due = ?next,
                    "coroutine rescheduled"
                );
                let command = ScheduledCoroutineCommand::new(next, handle);
                match next {
                    Due::Tick(tick) => ctx.queue.enqueue_at_tick(tick, command),
                    Due::WallClock(ms) => ctx.queue.enqueue_at_walltime(ms, command),
                }
                Ok(CommandOutcome::Rescheduled(next))
            }
            Ok(None) => {
                debug!(index = handle.registry_index(), "coroutine completed");
                Self::discard(handle, ctx);
                Ok(CommandOutcome::Completed)
            }
            Err(err) => {
                Self::discard(handle, ctx);
                Self::contain(err, ctx)
            }
        }
    }

    /// Resume and interpret the yield; `None` once the coroutine finished
    fn step(
        handle: &mut CoroutineHandle,
        ctx: &mut GameContext<'_>,
    ) -> Result<Option<Due>, ScriptError> {
        let status = ctx.engine.resume(handle, ctx.game.as_host())?;
        if status == CoroutineStatus::Completed {
            return Ok(None);
        }
        let vm = ctx.engine.vm_mut();
        match handle.pending_returns() {
            1 => {
                let delay = handle.pop_uint32(vm).map_err(bad_delay)?;
                let now = ctx.game.gametime();
                Ok(Some(Due::Tick(now + u64::from(delay))))
            }
            2 => {
                let lane = handle.pop_string(vm).map_err(|_| {
                    ScriptError::BadYield(format!(
                        "second yield value must be \"{}\"",
                        REALTIME_DELTA
                    ))
                })?;
                if lane != REALTIME_DELTA {
                    return Err(ScriptError::BadYield(format!(
                        "second yield value must be \"{}\", got \"{}\"",
                        REALTIME_DELTA, lane
                    )));
                }
                let delay = handle.pop_uint32(vm).map_err(bad_delay)?;
                Ok(Some(Due::WallClock(ctx.wall_clock + u64::from(delay))))
            }
            n => Err(ScriptError::BadYield(format!(
                "coroutine yielded {} values, expected a delay",
                n
            ))),
        }
    }

    fn discard(
        handle: CoroutineHandle,
        ctx: &mut GameContext<'_>,
    ) {
        if let Err(err) = handle.release(ctx.engine.vm_mut()) {
            warn!(error = %err, "could not release coroutine");
        }
    }

    /// Tell every player, then pause the game
    fn contain(
        err: ScriptError,
        ctx: &mut GameContext<'_>,
    ) -> Result<CommandOutcome, FatalScriptError> {
        error!(error = %err, "script error in coroutine");
        for line in err.traceback() {
            warn!("  {}", line);
        }
        if fail_on_script_error() {
            return Err(FatalScriptError(err));
        }
        let message = err.to_string();
        let body = richtext_escape(&message);
        for slot in ctx.game.player_slots() {
            ctx.game.deliver(slot, SCRIPT_ERROR_TITLE, &body);
        }
        ctx.game.set_desired_speed(0);
        Ok(CommandOutcome::Errored(message))
    }

    /// Write the command packet
    pub fn write<W: Write>(
        &self,
        out: &mut W,
    ) -> Result<(), GameDataError> {
        out.write_u16::<LittleEndian>(PACKET_VERSION)?;
        out.write_u8(self.due.kind())?;
        out.write_u64::<LittleEndian>(self.due.value())?;
        self.handle.write(out)
    }

    /// Read a command packet against the restored environment
    pub fn read<R: Read>(
        input: &mut R,
        engine: &ScriptEngineState,
    ) -> Result<Self, GameDataError> {
        let version = input.read_u16::<LittleEndian>()?;
        if version != PACKET_VERSION {
            return Err(VersionMismatchError::new(
                "coroutine command",
                u32::from(version),
                PACKET_VERSION.to_string(),
            )
            .into());
        }
        let kind = input.read_u8()?;
        let value = input.read_u64::<LittleEndian>()?;
        let due = match kind {
            0 => Due::Tick(value),
            1 => Due::WallClock(value),
            other => {
                return Err(ScriptError::Corrupt(format!("unknown due kind {}", other)).into())
            }
        };
        let handle = CoroutineHandle::read(input, engine.vm())?;
        Ok(Self { due, handle })
    }
}

fn bad_delay(err: ScriptError) -> ScriptError {
    ScriptError::BadYield(format!("coroutine yielded an invalid delay: {}", err))
}
