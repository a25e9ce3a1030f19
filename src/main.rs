//! Ludus - CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ludus::game::{DiskFilesystem, Savegame, Session};
use ludus::scripting::CommandOutcome;
use ludus::util::config::EngineConfig;
use ludus::util::logger::{self, LogLevel};
use ludus::{NAME, VERSION};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Resumable game-script coroutines with savegame persistence
#[derive(Parser, Debug)]
#[command(name = "ludus")]
#[command(author = "Ludus Team")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file
    #[arg(long, global = true, default_value = "ludus.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Abort on the first script error instead of pausing the game
    #[arg(long, global = true)]
    fail_on_script_error: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a script's entry point as a coroutine and advance the game
    Run {
        /// Script returning `{ func = ... }` or defining `hooks.main`
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Game ticks to simulate
        #[arg(long, default_value_t = 1000)]
        ticks: u64,

        /// Number of player slots
        #[arg(long)]
        players: Option<u8>,

        /// Seed of the synchronized random stream
        #[arg(long)]
        seed: Option<u64>,

        /// Write a savegame when done
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Directory scripts are loaded from, default: the script's directory
        #[arg(long, value_name = "DIR")]
        data_dir: Option<PathBuf>,
    },

    /// Continue a saved game
    Resume {
        #[arg(value_name = "SAVEGAME")]
        savegame: PathBuf,

        /// Game ticks to simulate
        #[arg(long, default_value_t = 1000)]
        ticks: u64,

        /// Write a savegame when done
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Directory scripts are loaded from
        #[arg(long, value_name = "DIR", default_value = ".")]
        data_dir: PathBuf,
    },

    /// Print a JSON summary of a savegame
    Inspect {
        #[arg(value_name = "SAVEGAME")]
        savegame: PathBuf,
    },
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = EngineConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config: {}", args.config.display()))?
        .with_env_overrides();
    if args.fail_on_script_error {
        config.scripting.fail_on_script_error = true;
    }
    config.apply_policies();
    Ok(config)
}

/// Advance `session` and report what happened
fn play(
    session: &mut Session,
    ticks: u64,
    save: Option<&Path>,
) -> Result<()> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    session.set_wall_clock(now.max(session.wall_clock()));
    let outcomes = session
        .advance(ticks)
        .context("Game aborted by a script error")?;

    let errors = outcomes
        .iter()
        .filter(|o| matches!(o, CommandOutcome::Errored(_)))
        .count();
    println!(
        "time {}  commands executed {}  script errors {}  pending {}",
        session.time(),
        outcomes.len(),
        errors,
        session.queue().len()
    );
    for player in session.world().players().to_vec() {
        for message in session.inbox(player) {
            println!("[player {}] {}: {}", player, message.title, message.body);
        }
    }
    if session.speed() == 0 {
        println!("game paused");
    }

    if let Some(path) = save {
        session
            .save(path)
            .with_context(|| format!("Failed to save: {}", path.display()))?;
        println!("saved {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = load_config(&args)?;

    let level = if args.verbose {
        LogLevel::Debug
    } else {
        config.logging.level
    };
    logger::init_with_level(level);

    if args.verbose {
        eprintln!("{} version: {}", NAME, VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    match args.command {
        Commands::Run {
            script,
            ticks,
            players,
            seed,
            save,
            data_dir,
        } => {
            if let Some(players) = players {
                config.session.players = players;
            }
            if let Some(seed) = seed {
                config.session.seed = seed;
            }
            let data_dir = data_dir
                .or_else(|| script.parent().map(Path::to_path_buf))
                .unwrap_or_else(|| PathBuf::from("."));
            let relative = script.strip_prefix(&data_dir).unwrap_or(script.as_path());
            let relative = relative.to_string_lossy().into_owned();

            let mut session = Session::new(&config, Box::new(DiskFilesystem::new(&data_dir)))
                .context("Failed to create the script engine")?;
            session
                .start_script(&relative)
                .with_context(|| format!("Failed to start: {}", script.display()))?;
            play(&mut session, ticks, save.as_deref())?;
        }
        Commands::Resume {
            savegame,
            ticks,
            save,
            data_dir,
        } => {
            let mut session =
                Session::load(&config, Box::new(DiskFilesystem::new(&data_dir)), &savegame)
                    .with_context(|| format!("Failed to load: {}", savegame.display()))?;
            play(&mut session, ticks, save.as_deref())?;
        }
        Commands::Inspect { savegame } => {
            let loaded = Savegame::load(&savegame)
                .with_context(|| format!("Failed to read: {}", savegame.display()))?;
            let json = serde_json::to_string_pretty(&loaded.summary())
                .context("Failed to encode the summary")?;
            println!("{}", json);
        }
    }

    Ok(())
}
