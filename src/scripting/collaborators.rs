//! Interfaces of the game systems the scripting layer relies on
//!
//! The engine never owns these; reference implementations live in
//! [`crate::game`].

use std::io;

use crate::scripting::command::ScheduledCoroutineCommand;
use crate::vm::HostServices;

/// Read-only file tree scripts are loaded from
pub trait VirtualFilesystem {
    fn load(
        &self,
        path: &str,
    ) -> io::Result<Vec<u8>>;

    fn file_exists(
        &self,
        path: &str,
    ) -> bool;

    fn is_directory(
        &self,
        path: &str,
    ) -> bool;
}

/// Deterministic command queue the scheduler hands commands back to
pub trait CommandQueue {
    /// Run `command` when the game time reaches `tick`
    fn enqueue_at_tick(
        &mut self,
        tick: u64,
        command: ScheduledCoroutineCommand,
    );

    /// Run `command` once the wall clock reaches `millis`
    ///
    /// Not synchronized between peers.
    fn enqueue_at_walltime(
        &mut self,
        millis: u64,
        command: ScheduledCoroutineCommand,
    );
}

/// Inbox delivery to player slots
pub trait MessageDelivery {
    /// Occupied player slots, in ascending order
    fn player_slots(&self) -> Vec<u8>;

    fn deliver(
        &mut self,
        player: u8,
        title: &str,
        body: &str,
    );
}

/// Simulation speed control
pub trait GameController {
    /// Desired speed in thousandths of real time, 0 is paused
    fn desired_speed(&self) -> u32;

    fn set_desired_speed(
        &mut self,
        speed: u32,
    );
}

/// The simulation's synchronized random stream
pub trait SimulationRng {
    fn next_u32(&mut self) -> u32;
}

/// Everything a scheduled command touches while it runs
pub trait GameServices: HostServices + MessageDelivery + GameController {
    fn as_host(&mut self) -> &mut dyn HostServices;
}

impl<T: HostServices + MessageDelivery + GameController> GameServices for T {
    fn as_host(&mut self) -> &mut dyn HostServices {
        self
    }
}
