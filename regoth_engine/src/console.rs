use std::collections::BTreeMap;

use log::debug;

use crate::engine::GameEngine;
use crate::world::{ActorHandle, World};

pub type CommandFn = fn(&mut GameEngine, &[&str]) -> String;

pub const DEFAULT_HERO_FILE: &str = "hero.json";

#[derive(Clone, Copy)]
pub struct Command {
    pub usage: &'static str,
    pub help: &'static str,
    pub run: CommandFn,
}

/// Named text commands. Every command answers with a status line.
pub struct Console {
    commands: BTreeMap<String, Command>,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    pub fn new() -> Self {
        let mut console = Console {
            commands: BTreeMap::new(),
        };
        console.register("test", "test", "check that the console answers", cmd_test);
        console.register("save", "save <savegame>", "write the world to a savegame", cmd_save);
        console.register(
            "load",
            "load <zenfile> [savegame]",
            "load a world, optionally from a savegame",
            cmd_load,
        );
        console.register(
            "switchlevel",
            "switchlevel <zenfile>",
            "save this world and move the hero to another",
            cmd_switchlevel,
        );
        console.register(
            "heroexport",
            "heroexport [file]",
            "write the hero to a file",
            cmd_heroexport,
        );
        console.register(
            "heroimport",
            "heroimport [file]",
            "merge a hero file into the current hero",
            cmd_heroimport,
        );
        console.register(
            "knockout",
            "knockout [name]",
            "knock an NPC out (the hero by default)",
            cmd_knockout,
        );
        console.register("kill", "kill [name...]", "kill an NPC (the hero by default)", cmd_kill);
        console.register(
            "interrupt",
            "interrupt",
            "clear the hero's messages and states",
            cmd_interrupt,
        );
        console.register("tick", "tick [n]", "advance the simulation", cmd_tick);
        console
    }

    /// Add or replace a command; names are case-insensitive.
    pub fn register(&mut self, name: &str, usage: &'static str, help: &'static str, run: CommandFn) {
        self.commands
            .insert(name.to_ascii_lowercase(), Command { usage, help, run });
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn execute(&self, engine: &mut GameEngine, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return String::new();
        };
        let args: Vec<&str> = words.collect();
        let name = name.to_ascii_lowercase();
        debug!("console: {name} {args:?}");
        if name == "help" {
            return self.help();
        }
        match self.commands.get(&name) {
            Some(command) => (command.run)(engine, &args),
            None => format!("Unknown command: {name}. Type 'help' for a list."),
        }
    }

    fn help(&self) -> String {
        let mut lines = vec!["help - list commands".to_string()];
        lines.extend(
            self.commands
                .values()
                .map(|command| format!("{} - {}", command.usage, command.help)),
        );
        lines.join("\n")
    }
}

const NO_WORLD: &str = "No world loaded.";
const INVALID_NPC: &str = "Invalid NPC";

fn cmd_test(_engine: &mut GameEngine, _args: &[&str]) -> String {
    "Hello World!".to_string()
}

fn cmd_save(engine: &mut GameEngine, args: &[&str]) -> String {
    let Some(file) = args.first() else {
        return "Missing argument. Usage: save <savegame>".to_string();
    };
    match engine.save_world(file) {
        Ok(path) => format!("World saved to file: {}", path.display()),
        Err(err) => format!("Failed to save world: {err:#}"),
    }
}

fn cmd_load(engine: &mut GameEngine, args: &[&str]) -> String {
    let Some(zen) = args.first() else {
        return "Missing argument. Usage: load <zenfile> <savegame>".to_string();
    };
    if !engine.files().has_file(zen) {
        return format!("File '{zen}' not found.");
    }
    match args.get(1) {
        Some(savegame) => {
            if !engine.config().save_path(savegame).is_file() {
                return format!("File '{savegame}' not found.");
            }
            match engine.load_world(zen, savegame) {
                Ok(_) => format!("Successfully loaded savegame: {savegame}"),
                Err(err) => format!("Failed to load savegame: {err:#}"),
            }
        }
        None => match engine.add_world(zen, None) {
            Ok(_) => format!("Successfully loaded world: {zen}"),
            Err(err) => format!("Failed to load world: {err:#}"),
        },
    }
}

fn cmd_switchlevel(engine: &mut GameEngine, args: &[&str]) -> String {
    let Some(zen) = args.first() else {
        return "Missing argument. Usage: switchlevel <zenfile>".to_string();
    };
    if !engine.files().has_file(zen) {
        return format!("File '{zen}' not found.");
    }
    match engine.switch_world(zen) {
        Ok(_) => format!("Successfully switched world to: {zen}"),
        Err(err) => format!("Failed to switch world: {err:#}"),
    }
}

fn cmd_heroexport(engine: &mut GameEngine, args: &[&str]) -> String {
    let file = args.first().copied().unwrap_or(DEFAULT_HERO_FILE);
    match engine.export_hero(file) {
        Ok(_) => format!("Hero successfully exported to: {file}"),
        Err(err) => format!("Failed to export hero: {err:#}"),
    }
}

fn cmd_heroimport(engine: &mut GameEngine, args: &[&str]) -> String {
    let file = args.first().copied().unwrap_or(DEFAULT_HERO_FILE);
    match engine.import_hero(file) {
        Ok(_) => format!("Hero successfully imported from: {file}"),
        Err(err) => format!("Failed to import hero: {err:#}"),
    }
}

/// The named actor, or the player when no name is given.
fn target(world: &World, name: &str) -> Option<ActorHandle> {
    if name.is_empty() {
        world.player()
    } else {
        world.find_actor_by_name(name)
    }
}

fn cmd_knockout(engine: &mut GameEngine, args: &[&str]) -> String {
    let Some(world) = engine.world_mut() else {
        return NO_WORLD.to_string();
    };
    let name = args.join(" ");
    let Some(handle) = target(world, &name) else {
        return INVALID_NPC.to_string();
    };
    if world.knock_out(handle) {
        format!("{} is now in UNCONSCIOUS state", actor_name(world, handle))
    } else {
        INVALID_NPC.to_string()
    }
}

fn cmd_kill(engine: &mut GameEngine, args: &[&str]) -> String {
    let Some(world) = engine.world_mut() else {
        return NO_WORLD.to_string();
    };
    let name = args.join(" ");
    let Some(handle) = target(world, &name) else {
        return INVALID_NPC.to_string();
    };
    if world.kill(handle) {
        format!("{} is now in DEAD state", actor_name(world, handle))
    } else {
        INVALID_NPC.to_string()
    }
}

fn cmd_interrupt(engine: &mut GameEngine, _args: &[&str]) -> String {
    let Some(world) = engine.world_mut() else {
        return NO_WORLD.to_string();
    };
    let interrupted = world
        .player()
        .is_some_and(|player| world.interrupt(player));
    if interrupted {
        "Interrupted player, cleared EM".to_string()
    } else {
        "No player to interrupt".to_string()
    }
}

fn cmd_tick(engine: &mut GameEngine, args: &[&str]) -> String {
    let count = match args.first().map(|raw| raw.parse::<u32>()) {
        None => 1,
        Some(Ok(count)) => count,
        Some(Err(_)) => return "Invalid argument. Usage: tick [n]".to_string(),
    };
    let mut last = None;
    for _ in 0..count {
        match engine.tick() {
            Some(frame) => last = Some(frame.tick),
            None => return NO_WORLD.to_string(),
        }
    }
    match last.or_else(|| engine.world().map(World::current_tick)) {
        Some(tick) => format!("Advanced {count} tick(s), now at tick {tick}"),
        None => NO_WORLD.to_string(),
    }
}

fn actor_name(world: &World, handle: ActorHandle) -> String {
    world
        .actor(handle)
        .map_or_else(|| handle.to_string(), |actor| actor.name().to_string())
}
