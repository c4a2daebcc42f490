use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Headless host that runs compiled game scripts against a world",
    version
)]
pub struct Args {
    /// Directory tree holding loose game files (worlds, script images)
    #[arg(long)]
    pub data_root: Option<PathBuf>,

    /// VDF archive to index; may be given several times
    #[arg(long = "archive", value_name = "VDF")]
    pub archives: Vec<PathBuf>,

    /// Optional JSON engine config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// World (zen file name) to load at start
    #[arg(long)]
    pub world: Option<String>,

    /// Savegame to restore the world from (requires --world)
    #[arg(long)]
    pub savegame: Option<String>,

    /// Number of ticks to simulate before reading commands
    #[arg(long, default_value_t = 0)]
    pub ticks: u32,

    /// File with one console command per line (default: stdin)
    #[arg(long)]
    pub commands: Option<PathBuf>,

    /// Print every frame and the event log after each command
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct RunArgs {
    pub data_root: Option<PathBuf>,
    pub archives: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub world: Option<String>,
    pub savegame: Option<String>,
    pub ticks: u32,
    pub commands: Option<PathBuf>,
    pub verbose: bool,
}

pub fn parse() -> Result<RunArgs> {
    Args::parse().into_command()
}

impl Args {
    pub fn into_command(self) -> Result<RunArgs> {
        if self.data_root.is_none() && self.archives.is_empty() {
            bail!("give --data-root or at least one --archive");
        }
        if self.savegame.is_some() && self.world.is_none() {
            bail!("--savegame requires --world");
        }
        if self.ticks > 0 && self.world.is_none() {
            bail!("--ticks requires --world");
        }
        Ok(RunArgs {
            data_root: self.data_root,
            archives: self.archives,
            config: self.config,
            world: self.world,
            savegame: self.savegame,
            ticks: self.ticks,
            commands: self.commands,
            verbose: self.verbose,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savegame_needs_a_world() {
        let args = Args::parse_from(["regoth_engine", "--data-root", "data", "--savegame", "a.json"]);
        let err = args.into_command().unwrap_err();
        assert!(err.to_string().contains("--savegame requires --world"));
    }

    #[test]
    fn archives_repeat() -> Result<()> {
        let args = Args::parse_from([
            "regoth_engine",
            "--archive",
            "a.vdf",
            "--archive",
            "b.vdf",
            "--world",
            "NEWWORLD.ZEN",
            "--ticks",
            "5",
        ]);
        let run = args.into_command()?;
        assert_eq!(run.archives.len(), 2);
        assert_eq!(run.ticks, 5);
        Ok(())
    }
}
