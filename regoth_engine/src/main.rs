use std::fs;
use std::io::{self, BufRead};

use anyhow::{Context, Result};
use log::info;
use regoth_engine::cli::{self, RunArgs};
use regoth_engine::file_index::{ArchiveIndex, DirectoryIndex, LayeredIndex};
use regoth_engine::presentation::{LogPresenter, Presenter};
use regoth_engine::{Console, EngineConfig, GameEngine};

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::parse()?;
    run(args)
}

fn run(args: RunArgs) -> Result<()> {
    let config =
        EngineConfig::from_json_file(args.config.as_deref()).context("loading engine config")?;

    let mut files = LayeredIndex::new();
    if let Some(root) = &args.data_root {
        let index = DirectoryIndex::from_root(root)
            .with_context(|| format!("indexing {}", root.display()))?;
        info!("indexed {} loose file(s) under {}", index.len(), root.display());
        files.push(Box::new(index));
    }
    if !args.archives.is_empty() {
        files.push(Box::new(ArchiveIndex::open(&args.archives)?));
    }

    let mut engine = GameEngine::new(Box::new(files), config);
    let console = Console::new();
    let mut presenter = LogPresenter::new();

    if let Some(zen) = &args.world {
        match &args.savegame {
            Some(savegame) => engine.load_world(zen, savegame)?,
            None => engine.add_world(zen, None)?,
        };
        for _ in 0..args.ticks {
            if let Some(frame) = engine.tick() {
                if args.verbose {
                    presenter.present(&frame);
                }
            }
        }
        if let Some(frame) = engine.world().map(|world| world.snapshot()) {
            presenter.present(&frame);
        }
    }

    let lines: Vec<String> = match &args.commands {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("reading commands from {}", path.display()))?
            .lines()
            .map(str::to_string)
            .collect(),
        None => io::stdin()
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("reading commands from stdin")?,
    };

    for line in lines {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        println!("> {line}");
        println!("{}", console.execute(&mut engine, line));
        if args.verbose {
            if let Some(world) = engine.world() {
                let overlay = world.events().last_lines(8);
                presenter.overlay_text(&overlay);
                presenter.present(&world.snapshot());
            }
        }
    }
    Ok(())
}
