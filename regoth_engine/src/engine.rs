use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{error, info};
use regoth_script::{ExternalTable, SymbolTable};

use crate::config::EngineConfig;
use crate::error::SerializeError;
use crate::file_index::FileIndex;
use crate::presentation::FrameSnapshot;
use crate::savegame::{
    export_player, export_world, import_world, read_document, write_document, ImportMode,
    ImportReport,
};
use crate::traps::register_traps;
use crate::world::{World, WorldState};

/// Owns the single active world and everything needed to build new ones.
pub struct GameEngine {
    files: Box<dyn FileIndex>,
    externals: Rc<ExternalTable<WorldState>>,
    config: EngineConfig,
    symbols: Option<Arc<SymbolTable>>,
    world: Option<World>,
}

impl GameEngine {
    pub fn new(files: Box<dyn FileIndex>, config: EngineConfig) -> Self {
        let mut externals = ExternalTable::new();
        register_traps(&mut externals);
        GameEngine {
            files,
            externals: Rc::new(externals),
            config,
            symbols: None,
            world: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn files(&self) -> &dyn FileIndex {
        self.files.as_ref()
    }

    pub fn externals(&self) -> &ExternalTable<WorldState> {
        &self.externals
    }

    pub fn world(&self) -> Option<&World> {
        self.world.as_ref()
    }

    pub fn world_mut(&mut self) -> Option<&mut World> {
        self.world.as_mut()
    }

    /// The script image is decoded once and shared by every world.
    fn symbols(&mut self) -> Result<Arc<SymbolTable>> {
        if let Some(symbols) = &self.symbols {
            return Ok(Arc::clone(symbols));
        }
        let name = &self.config.script_image;
        let bytes = self
            .files
            .read_file(name)
            .with_context(|| format!("reading script image {name}"))?;
        let symbols = Arc::new(
            SymbolTable::from_bytes(&bytes)
                .with_context(|| format!("loading script image {name}"))?,
        );
        info!("loaded {} symbols from {name}", symbols.len());
        self.symbols = Some(Arc::clone(&symbols));
        Ok(symbols)
    }

    /// Load `zen`, replacing the current world. Without a savegame the player
    /// is spawned and the world's startup script runs.
    pub fn add_world(&mut self, zen: &str, savegame: Option<&Path>) -> Result<&mut World> {
        if !self.files.has_file(zen) {
            bail!("File '{zen}' not found.");
        }
        let symbols = self.symbols()?;
        let mut world = World::new(symbols, Rc::clone(&self.externals), &self.config, zen);

        match savegame {
            Some(path) => {
                let document = read_document(path)?;
                import_world(&document, &mut world, ImportMode::Full)
                    .with_context(|| format!("restoring savegame {}", path.display()))?;
            }
            None => {
                let name = &self.config.player_instance;
                let player = world
                    .spawn_actor(name)
                    .with_context(|| format!("spawning player {name}"))?;
                world.set_player(player)?;
                world.run_startup();
            }
        }

        info!("world {zen} ready with {} actor(s)", world.actors().count());
        self.remove_world();
        Ok(self.world.insert(world))
    }

    pub fn remove_world(&mut self) -> Option<World> {
        let world = self.world.take()?;
        info!("unloading world {}", world.zen());
        Some(world)
    }

    fn current(&self) -> Result<&World> {
        self.world.as_ref().context("no world loaded")
    }

    /// Write the full world to `file` inside the save directory.
    pub fn save_world(&self, file: &str) -> Result<PathBuf> {
        let document = export_world(self.current()?);
        let path = self.config.save_path(file);
        write_document(&path, &document)?;
        Ok(path)
    }

    pub fn load_world(&mut self, zen: &str, savegame: &str) -> Result<&mut World> {
        let path = self.config.save_path(savegame);
        if !path.is_file() {
            bail!("File '{savegame}' not found.");
        }
        self.add_world(zen, Some(&path))
    }

    pub fn export_hero(&self, file: &str) -> Result<PathBuf> {
        let document = export_player(self.current()?).context("world has no player")?;
        let path = self.config.save_path(file);
        write_document(&path, &document)?;
        Ok(path)
    }

    pub fn import_hero(&mut self, file: &str) -> Result<ImportReport> {
        let path = self.config.save_path(file);
        let document = read_document(&path)?;
        let world = self.world.as_mut().context("no world loaded")?;
        Ok(import_world(&document, world, ImportMode::Merge)?)
    }

    /// Save the current world, load `zen` (from its own savegame when one
    /// exists) and carry the player over.
    pub fn switch_world(&mut self, zen: &str) -> Result<ImportReport> {
        if !self.files.has_file(zen) {
            bail!("File '{zen}' not found.");
        }
        let world = self.current()?;
        let hero = export_player(world).context("current world has no player")?;
        let current = world.zen().to_string();
        self.save_world(&format!("{current}.json"))?;

        let savegame = self.config.save_path(&format!("{zen}.json"));
        let savegame = savegame.is_file().then_some(savegame);
        let world = self.add_world(zen, savegame.as_deref())?;

        match import_world(&hero, world, ImportMode::Merge) {
            Ok(report) => Ok(report),
            Err(SerializeError::NoPlayer) => {
                error!("world {zen} has no player to carry the hero into");
                Ok(ImportReport::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Advance the active world by one configured step.
    pub fn tick(&mut self) -> Option<FrameSnapshot> {
        let dt = self.config.tick_seconds;
        self.world.as_mut().map(|world| world.tick(dt))
    }
}
