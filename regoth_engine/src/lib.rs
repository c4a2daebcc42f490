pub mod cli;
pub mod config;
pub mod console;
pub mod engine;
pub mod error;
pub mod event_log;
pub mod file_index;
pub mod presentation;
pub mod savegame;
pub mod traps;
pub mod world;

pub use config::EngineConfig;
pub use console::Console;
pub use engine::GameEngine;
pub use error::{EngineError, SerializeError};
pub use event_log::EventLog;
pub use savegame::{export_actor, export_world, import_world, ImportMode, ImportReport, WorldDocument};
pub use world::{Actor, ActorHandle, World, WorldState};
