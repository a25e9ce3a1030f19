//! 存档文件格式
//!
//! ```text
//! "LDSG"  version:u8
//! time:u64  speed:u32  wall_clock:u64
//! players:u8 × number:u8
//! seed:u64  draws:u64
//! inboxes:u32 × (player:u8  messages:u32 × (title:str  body:str))
//! environment:u32-length blob
//! commands:u32 × (u32-length command packet)
//! ```
//!
//! The environment must be read before the command packets, which refer to
//! coroutine threads through the restored registry.

use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::middle::bytecode::{read_str, write_str};
use crate::scripting::{GameDataError, VersionMismatchError};

pub const SAVEGAME_MAGIC: &[u8; 4] = b"LDSG";
pub const SAVEGAME_VERSION: u8 = 1;

/// One inbox entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub title: String,
    pub body: String,
}

/// Decoded savegame, environment and commands still as raw bytes
#[derive(Debug, Clone, Default)]
pub struct Savegame {
    pub time: u64,
    pub speed: u32,
    pub wall_clock: u64,
    pub players: Vec<u8>,
    pub seed: u64,
    pub draws: u64,
    pub inboxes: Vec<(u8, Vec<Message>)>,
    pub environment: Vec<u8>,
    pub commands: Vec<Vec<u8>>,
}

fn write_blob<W: Write>(
    out: &mut W,
    bytes: &[u8],
) -> io::Result<()> {
    out.write_u32::<LittleEndian>(bytes.len() as u32)?;
    out.write_all(bytes)
}

fn read_blob<R: Read>(input: &mut R) -> io::Result<Vec<u8>> {
    let len = input.read_u32::<LittleEndian>()? as usize;
    let mut buf = Vec::new();
    input.take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated savegame"));
    }
    Ok(buf)
}

impl Savegame {
    pub fn write_to<W: Write>(
        &self,
        out: &mut W,
    ) -> Result<(), GameDataError> {
        out.write_all(SAVEGAME_MAGIC)?;
        out.write_u8(SAVEGAME_VERSION)?;
        out.write_u64::<LittleEndian>(self.time)?;
        out.write_u32::<LittleEndian>(self.speed)?;
        out.write_u64::<LittleEndian>(self.wall_clock)?;
        out.write_u8(self.players.len() as u8)?;
        for number in &self.players {
            out.write_u8(*number)?;
        }
        out.write_u64::<LittleEndian>(self.seed)?;
        out.write_u64::<LittleEndian>(self.draws)?;
        out.write_u32::<LittleEndian>(self.inboxes.len() as u32)?;
        for (player, messages) in &self.inboxes {
            out.write_u8(*player)?;
            out.write_u32::<LittleEndian>(messages.len() as u32)?;
            for message in messages {
                write_str(out, &message.title)?;
                write_str(out, &message.body)?;
            }
        }
        write_blob(out, &self.environment)?;
        out.write_u32::<LittleEndian>(self.commands.len() as u32)?;
        for packet in &self.commands {
            write_blob(out, packet)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(input: &mut R) -> Result<Self, GameDataError> {
        let mut magic = [0u8; 4];
        input.read_exact(&mut magic)?;
        if &magic != SAVEGAME_MAGIC {
            return Err(GameDataError::persistence("not a savegame"));
        }
        let version = input.read_u8()?;
        if version != SAVEGAME_VERSION {
            return Err(VersionMismatchError::new(
                "savegame",
                u32::from(version),
                SAVEGAME_VERSION.to_string(),
            )
            .into());
        }
        let time = input.read_u64::<LittleEndian>()?;
        let speed = input.read_u32::<LittleEndian>()?;
        let wall_clock = input.read_u64::<LittleEndian>()?;
        let nplayers = input.read_u8()?;
        let mut players = Vec::with_capacity(nplayers as usize);
        for _ in 0..nplayers {
            players.push(input.read_u8()?);
        }
        let seed = input.read_u64::<LittleEndian>()?;
        let draws = input.read_u64::<LittleEndian>()?;
        let ninboxes = input.read_u32::<LittleEndian>()?;
        let mut inboxes = Vec::new();
        for _ in 0..ninboxes {
            let player = input.read_u8()?;
            let count = input.read_u32::<LittleEndian>()?;
            let mut messages = Vec::new();
            for _ in 0..count {
                let title = read_str(input)?;
                let body = read_str(input)?;
                messages.push(Message { title, body });
            }
            inboxes.push((player, messages));
        }
        let environment = read_blob(input)?;
        let ncommands = input.read_u32::<LittleEndian>()?;
        let mut commands = Vec::new();
        for _ in 0..ncommands {
            commands.push(read_blob(input)?);
        }
        Ok(Self {
            time,
            speed,
            wall_clock,
            players,
            seed,
            draws,
            inboxes,
            environment,
            commands,
        })
    }

    /// Write to `path` through a temporary file in the same directory
    ///
    /// An existing file is only replaced once the new one is complete.
    pub fn save(
        &self,
        path: &Path,
    ) -> Result<(), GameDataError> {
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut file = NamedTempFile::new_in(dir)?;
        let mut bytes = Vec::new();
        self.write_to(&mut bytes)?;
        file.write_all(&bytes)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| GameDataError::Io(e.error))?;
        debug!(path = %path.display(), bytes = bytes.len(), "savegame written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, GameDataError> {
        let bytes = std::fs::read(path)?;
        let mut input = bytes.as_slice();
        let savegame = Self::read_from(&mut input)?;
        if !input.is_empty() {
            return Err(GameDataError::persistence(format!(
                "{} bytes left after the savegame",
                input.len()
            )));
        }
        Ok(savegame)
    }

    /// Overview for `ludus inspect`
    pub fn summary(&self) -> SavegameSummary {
        SavegameSummary {
            version: SAVEGAME_VERSION,
            time: self.time,
            speed: self.speed,
            wall_clock: self.wall_clock,
            players: self.players.clone(),
            seed: self.seed,
            draws: self.draws,
            environment_bytes: self.environment.len(),
            commands: self.commands.iter().map(|p| CommandSummary::parse(p)).collect(),
            inboxes: self
                .inboxes
                .iter()
                .map(|(player, messages)| InboxSummary {
                    player: *player,
                    messages: messages.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SavegameSummary {
    pub version: u8,
    pub time: u64,
    pub speed: u32,
    pub wall_clock: u64,
    pub players: Vec<u8>,
    pub seed: u64,
    pub draws: u64,
    pub environment_bytes: usize,
    pub commands: Vec<CommandSummary>,
    pub inboxes: Vec<InboxSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InboxSummary {
    pub player: u8,
    pub messages: Vec<Message>,
}

/// Header fields of one command packet
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandSummary {
    pub packet_version: u16,
    pub lane: &'static str,
    pub due: u64,
    pub coroutine_version: u8,
    pub pending_args: u32,
    pub pending_returns: u32,
    pub registry_index: u32,
    pub bytes: usize,
}

impl CommandSummary {
    fn parse(packet: &[u8]) -> Self {
        let mut input = packet;
        let mut summary = CommandSummary {
            lane: "unknown",
            bytes: packet.len(),
            ..Default::default()
        };
        let mut fill = || -> io::Result<()> {
            summary.packet_version = input.read_u16::<LittleEndian>()?;
            summary.lane = match input.read_u8()? {
                0 => "tick",
                1 => "wall_clock",
                _ => "unknown",
            };
            summary.due = input.read_u64::<LittleEndian>()?;
            summary.coroutine_version = input.read_u8()?;
            summary.pending_args = input.read_u32::<LittleEndian>()?;
            summary.pending_returns = input.read_u32::<LittleEndian>()?;
            summary.registry_index = input.read_u32::<LittleEndian>()?;
            Ok(())
        };
        // a truncated packet keeps whatever was read
        let _ = fill();
        summary
    }
}
